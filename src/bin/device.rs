//! GTS 단말기 시뮬레이터
//!
//! GT06 계열 단말기처럼 행동한다: 로그인 → ACK 대기 → 주기적
//! 하트비트와 위치 보고. 서버 동작 확인과 부하 실험용.
//!
//! 사용법:
//!   cargo run --release --bin gts-device -- [OPTIONS]
//!
//! 예시:
//!   # 기본 시뮬레이션 (보고 10회)
//!   cargo run --release --bin gts-device -- --server 127.0.0.1:21100
//!
//!   # SOS 알람 포함
//!   cargo run --release --bin gts-device -- --imei 0355951092918889 --sos

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use gts::frame::{encode_frame, Frame};
use gts::reassembler::Reassembler;
use gts::{PROTO_ALARM, PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN, PROTO_STATUS};

/// 시뮬레이터 설정
struct DeviceConfig {
    server_addr: SocketAddr,
    imei: String,
    interval_secs: u64,
    reports: u32,
    sos: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:21100".parse().unwrap(),
            imei: "0355951092918889".into(),
            interval_secs: 10,
            reports: 10,
            sos: false,
        }
    }
}

fn parse_args() -> DeviceConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DeviceConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--imei" => {
                if i + 1 < args.len() {
                    config.imei = args[i + 1].clone();
                    i += 1;
                }
            }
            "--interval" => {
                if i + 1 < args.len() {
                    config.interval_secs = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--reports" | "-n" => {
                if i + 1 < args.len() {
                    config.reports = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--sos" => {
                config.sos = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"GTS Device - GT06 계열 단말기 시뮬레이터

로그인 → ACK 대기 → 주기적 하트비트/위치 보고

사용법:
  cargo run --release --bin gts-device -- [OPTIONS]

옵션:
  -s, --server <ADDR>    서버 주소 (기본: 127.0.0.1:21100)
  --imei <HEX16>         16자리 단말기 식별 코드
  --interval <SECS>      보고 간격 초 (기본: 10)
  -n, --reports <N>      위치 보고 횟수 (기본: 10)
  --sos                  마지막에 SOS 알람 전송
  -h, --help             이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

/// 16자리 16진수 IMEI 문자열을 8바이트 식별 코드로 변환
fn identity_bytes(imei: &str) -> [u8; 8] {
    assert_eq!(imei.len(), 16, "IMEI는 16자리 16진수여야 함");
    let mut bytes = [0u8; 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&imei[i * 2..i * 2 + 2], 16).expect("유효한 16진수 필요");
    }
    bytes
}

/// 현재 시각 기반 6바이트 프레임 시각 필드
fn device_time() -> [u8; 6] {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    // 대략적인 달력 분해면 충분하다 (시뮬레이터 용도)
    let days = secs / 86_400;
    let year = (1970 + days / 365 - 2000) as u8;
    let day_secs = secs % 86_400;
    [
        year,
        ((days / 30) % 12 + 1) as u8,
        (days % 30 + 1) as u8,
        (day_secs / 3600) as u8,
        ((day_secs / 60) % 60) as u8,
        (day_secs % 60) as u8,
    ]
}

/// 위치/알람 페이로드 조립
fn position_payload(head: u8, lat: u32, lon: u32, speed: u8, course: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(18);
    payload.extend_from_slice(&device_time());
    payload.push(head);
    payload.extend_from_slice(&lat.to_be_bytes());
    payload.extend_from_slice(&lon.to_be_bytes());
    payload.push(speed);
    payload.extend_from_slice(&course.to_be_bytes());
    payload
}

/// ACK 프레임 하나를 기다린다
async fn wait_ack(
    stream: &mut TcpStream,
    reassembler: &mut Reassembler,
    expected_protocol: u8,
) -> std::io::Result<bool> {
    let mut buf = [0u8; 256];
    loop {
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await;
        let n = match read {
            Ok(Ok(0)) => return Ok(false),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("ACK 대기 타임아웃");
                return Ok(false);
            }
        };

        let fed = match reassembler.feed(&buf[..n]) {
            Ok(fed) => fed,
            Err(e) => {
                warn!("ACK 재조립 실패: {}", e);
                return Ok(false);
            }
        };
        for raw in fed.frames {
            match Frame::decode(&raw) {
                Ok(frame) if frame.protocol == expected_protocol => {
                    info!(
                        protocol = format_args!("{:#04X}", frame.protocol),
                        serial = frame.serial,
                        "ACK 수신"
                    );
                    return Ok(true);
                }
                Ok(frame) => {
                    warn!(protocol = frame.protocol, "예상 밖 프레임");
                }
                Err(e) => warn!("ACK 디코딩 실패: {}", e),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args();
    let identity = identity_bytes(&config.imei);

    info!("GTS Device simulator starting...");
    info!("Server: {}", config.server_addr);
    info!("IMEI: {}", config.imei);

    let mut stream = TcpStream::connect(config.server_addr).await?;
    let mut reassembler = Reassembler::new(4096, 1024);
    let mut serial: u16 = 1;

    // 로그인
    stream
        .write_all(&encode_frame(PROTO_LOGIN, &identity, serial))
        .await?;
    if !wait_ack(&mut stream, &mut reassembler, PROTO_LOGIN).await? {
        return Err("로그인 ACK 없음".into());
    }
    info!("로그인 완료");

    // 서울 시청 근방에서 시작해 조금씩 이동
    let mut rng = rand::thread_rng();
    let mut lat: u32 = (37.5665 * 1_800_000.0) as u32;
    let mut lon: u32 = (126.9780 * 1_800_000.0) as u32;

    for report in 1..=config.reports {
        tokio::time::sleep(Duration::from_secs(config.interval_secs)).await;

        // 하트비트 → ACK
        serial = serial.wrapping_add(1);
        stream
            .write_all(&encode_frame(PROTO_HEARTBEAT, &[], serial))
            .await?;
        wait_ack(&mut stream, &mut reassembler, PROTO_HEARTBEAT).await?;

        // 위치 보고 (ACK 없음)
        lat = lat.wrapping_add(rng.gen_range(0..600));
        lon = lon.wrapping_add(rng.gen_range(0..600));
        let speed = rng.gen_range(0..90u8);
        let course = rng.gen_range(0..360u16);

        serial = serial.wrapping_add(1);
        let mut payload = position_payload(rng.gen_range(4..12), lat, lon, speed, course);
        if report % 3 == 0 {
            // 일부 보고에는 누적 주행거리 포함
            payload.extend_from_slice(&(report * 1250).to_be_bytes());
        }
        stream
            .write_all(&encode_frame(PROTO_LOCATION, &payload, serial))
            .await?;
        info!(report, speed, "위치 보고 전송");

        // 가끔 상태 보고
        if report % 5 == 0 {
            serial = serial.wrapping_add(1);
            let status = [0x40, rng.gen_range(3..7u8), rng.gen_range(1..5u8)];
            stream
                .write_all(&encode_frame(PROTO_STATUS, &status, serial))
                .await?;
        }
    }

    if config.sos {
        serial = serial.wrapping_add(1);
        let payload = position_payload(1, lat, lon, 0, 0); // 알람 코드 1 = SOS
        stream
            .write_all(&encode_frame(PROTO_ALARM, &payload, serial))
            .await?;
        info!("SOS 알람 전송");
    }

    info!("시뮬레이션 종료");
    Ok(())
}
