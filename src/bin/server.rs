//! GTS 서버 - GT06 계열 GPS 단말기 수신 서버
//!
//! TCP로 단말기 연결을 받아 코어 레지스트리에 바이트를 공급한다.
//! 코어는 소켓을 모른다: 이 바이너리가 전송 어댑터 구현체다.
//!
//! 사용법:
//!   cargo run --release --bin gts-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신
//!   cargo run --release --bin gts-server -- --bind 0.0.0.0:21100
//!
//!   # 불안정 망 프리셋 + 짧은 하트비트 간격
//!   cargo run --release --bin gts-server -- --preset unstable --heartbeat-interval 30

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use gts::session::ConnectionId;
use gts::{Config, Registry, TracingEventSink, TracingTelemetrySink, Transport};

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:21100".parse().unwrap(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut server = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    server.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--preset" => {
                if i + 1 < args.len() {
                    server.config = match args[i + 1].as_str() {
                        "dense" => Config::dense_fleet(),
                        "unstable" => Config::unstable_network(),
                        "default" => Config::default(),
                        other => panic!("알 수 없는 프리셋: {}", other),
                    };
                    i += 1;
                }
            }
            "--heartbeat-interval" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    server.config.heartbeat_interval_ms = secs * 1000;
                    i += 1;
                }
            }
            "--missed-budget" => {
                if i + 1 < args.len() {
                    server.config.missed_heartbeat_budget =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--checksum-budget" => {
                if i + 1 < args.len() {
                    server.config.checksum_failure_budget =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"GTS Server - GT06 계열 GPS 단말기 수신 서버

단말기 인증, 하트비트 생존 확인, 위치/상태/알람 프레임 디코딩

사용법:
  cargo run --release --bin gts-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>            바인드 주소 (기본: 0.0.0.0:21100)
  --preset <NAME>              설정 프리셋: default | dense | unstable
  --heartbeat-interval <SECS>  하트비트 간격 초 (기본: 60)
  --missed-budget <N>          허용 하트비트 누락 횟수 (기본: 3)
  --checksum-budget <N>        허용 연속 체크섬 실패 횟수 (기본: 3)
  -h, --help                   이 도움말 출력

예시:
  # 포트 변경
  cargo run --release --bin gts-server -- --bind 0.0.0.0:5023

  # 대규모 차량군 프리셋
  cargo run --release --bin gts-server -- --preset dense
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    server
}

/// tokio TCP 전송 어댑터
///
/// 코어의 send/close 요청을 연결별 송신 큐와 종료 알림으로 변환한다.
/// 둘 다 블로킹하지 않는다.
#[derive(Default)]
struct TcpTransport {
    writers: DashMap<ConnectionId, mpsc::Sender<Bytes>>,
    closers: DashMap<ConnectionId, Arc<Notify>>,
}

impl TcpTransport {
    fn register(&self, id: ConnectionId, tx: mpsc::Sender<Bytes>, notify: Arc<Notify>) {
        self.writers.insert(id, tx);
        self.closers.insert(id, notify);
    }

    fn deregister(&self, id: ConnectionId) {
        self.writers.remove(&id);
        self.closers.remove(&id);
    }
}

impl Transport for TcpTransport {
    fn send(&self, connection_id: ConnectionId, bytes: Bytes) {
        if let Some(tx) = self.writers.get(&connection_id) {
            // 큐가 가득 차면 프레임을 버린다. 이 프로토콜의 ACK는
            // 단말기가 재전송으로 복구한다.
            if tx.try_send(bytes).is_err() {
                warn!(connection_id, "송신 큐 가득 참, ACK 폐기");
            }
        }
    }

    fn close(&self, connection_id: ConnectionId) {
        if let Some(notify) = self.closers.get(&connection_id) {
            notify.notify_one();
        }
    }
}

async fn handle_connection(
    registry: Arc<Registry>,
    transport: Arc<TcpTransport>,
    stream: TcpStream,
    connection_id: ConnectionId,
) {
    let peer = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::channel::<Bytes>(registry.config().write_queue_depth);
    let notify = Arc::new(Notify::new());
    transport.register(connection_id, tx, notify.clone());

    let epoch = registry.on_connect(connection_id);
    info!(connection_id, peer = ?peer, "단말기 연결 수락");

    // 송신 태스크: 큐에 쌓인 프레임을 순서대로 기록
    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    // 생존 타이머 태스크: 간격마다 레지스트리에 판정 위임.
    // tick이 false를 돌려주면 (종료/에폭 불일치) 스스로 멈춘다.
    let registry_timer = registry.clone();
    let interval = Duration::from_millis(registry.config().heartbeat_interval_ms);
    let timer_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if !registry_timer.tick(connection_id, epoch, Instant::now()) {
                break;
            }
        }
    });

    // 수신 루프: 읽은 바이트를 그대로 코어에 공급한다.
    // 프레임 경계는 코어의 재조립기 책임이다.
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = notify.notified() => {
                // 코어가 종료를 요청함 (타임아웃, 위반, 재접속 교체)
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    registry.on_close(connection_id);
                    break;
                }
                Ok(n) => registry.on_bytes(connection_id, &buf[..n]),
                Err(e) => {
                    registry.on_error(connection_id, &e.to_string());
                    break;
                }
            }
        }
    }

    transport.deregister(connection_id);
    timer_task.abort();
    let _ = writer_task.await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server = parse_args();

    info!("GTS Server starting...");
    info!("Bind address: {}", server.bind_addr);
    info!(
        "Heartbeat interval: {}s, missed budget: {}",
        server.config.heartbeat_interval_ms / 1000,
        server.config.missed_heartbeat_budget
    );

    let transport = Arc::new(TcpTransport::default());
    let registry = Arc::new(Registry::new(
        server.config,
        transport.clone(),
        Arc::new(TracingTelemetrySink),
        Arc::new(TracingEventSink),
    ));

    let listener = TcpListener::bind(server.bind_addr).await?;
    info!("Server listening on {}", server.bind_addr);

    // 주기적 통계 출력
    let registry_stats = registry.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let snapshot = registry_stats.stats().snapshot();
            info!(
                active = registry_stats.active_connections(),
                frames = snapshot.frames_decoded,
                anomalies = snapshot.framing_anomalies,
                checksum_failures = snapshot.checksum_failures,
                timeouts = snapshot.liveness_timeouts,
                "서버 통계"
            );
        }
    });

    let next_id = AtomicU64::new(1);
    loop {
        let (stream, _) = listener.accept().await?;
        let connection_id = next_id.fetch_add(1, Ordering::Relaxed);
        let registry = registry.clone();
        let transport = transport.clone();

        // 연결당 태스크 하나. 한 연결의 실패가 accept 루프나 다른
        // 연결에 전파되지 않는다.
        tokio::spawn(handle_connection(registry, transport, stream, connection_id));
    }
}
