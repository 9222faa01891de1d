//! 연결 레지스트리 & 디스패처
//!
//! 살아있는 세션 집합을 소유하고, 수신 바이트를 재조립 → 디코딩 →
//! 세션 상태 머신으로 라우팅한다. 연결별 상태는 DashMap 엔트리의
//! 뮤텍스 뒤에 있어 같은 키는 한 번에 한 작성자만, 다른 키는 서로
//! 간섭 없이 진행한다.
//!
//! 잠금 규율: 엔트리 잠금을 쥔 동안에는 전송/싱크 호출이나 다른
//! 엔트리 접근을 하지 않는다. 전이 결과를 액션으로 모아 잠금 해제
//! 후 수행한다. 한 연결의 실패는 다른 연결로 전파되지 않는다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::Config;
use crate::frame::{encode_ack, Frame};
use crate::reassembler::Reassembler;
use crate::record::{decode_payload, TelemetryRecord};
use crate::session::{ConnectionId, Session, SessionState, TickOutcome};
use crate::sink::{EventSink, ServerEvent, TelemetrySink};
use crate::stats::ServerStats;
use crate::transport::Transport;
use crate::Error;

/// 연결 하나의 소유 상태
struct Entry {
    session: Session,
    reassembler: Reassembler,

    /// 타이머 세대 번호. 재사용된 connection_id에 옛 타이머가
    /// 닿지 못하게 막는다.
    epoch: u64,
}

/// 잠금 해제 후 수행할 작업
enum Action {
    Send(Bytes),
    Forward(String, TelemetryRecord),
    Event(ServerEvent),
    /// IMEI 인덱스 갱신 (기존 연결이 있으면 교체)
    Admit(String),
    /// 이 연결 종료 (항상 마지막 액션)
    Close,
}

/// 연결 레지스트리
pub struct Registry {
    config: Config,
    transport: Arc<dyn Transport>,
    telemetry: Arc<dyn TelemetrySink>,
    events: Arc<dyn EventSink>,
    connections: DashMap<ConnectionId, Mutex<Entry>>,
    by_imei: DashMap<String, ConnectionId>,
    stats: ServerStats,
    epoch_counter: AtomicU64,
}

impl Registry {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        telemetry: Arc<dyn TelemetrySink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            transport,
            telemetry,
            events,
            connections: DashMap::new(),
            by_imei: DashMap::new(),
            stats: ServerStats::new(),
            epoch_counter: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// 활성 연결 수
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// 연결의 현재 세션 상태 (없으면 None)
    pub fn session_state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.lock().session.state)
    }

    /// IMEI의 현재 연결 (재접속 추적용 보조 인덱스)
    pub fn connection_for_imei(&self, imei: &str) -> Option<ConnectionId> {
        self.by_imei.get(imei).map(|id| *id)
    }

    /// 전송 연결 수립. 반환된 epoch는 생존 타이머에 넘긴다.
    pub fn on_connect(&self, connection_id: ConnectionId) -> u64 {
        let epoch = self.epoch_counter.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            session: Session::new(connection_id, Instant::now()),
            reassembler: Reassembler::new(
                self.config.reassembly_buffer_cap,
                self.config.max_declared_len,
            ),
            epoch,
        };
        self.connections.insert(connection_id, Mutex::new(entry));
        self.stats.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.events
            .on_event(&ServerEvent::ConnectionOpened { connection_id });
        epoch
    }

    /// 수신 바이트 처리
    ///
    /// 같은 연결의 프레임은 도착 순서대로 처리된다. 알 수 없는
    /// 연결의 바이트는 무시한다 (종료 경합 시 발생 가능).
    pub fn on_bytes(&self, connection_id: ConnectionId, data: &[u8]) {
        let mut actions = Vec::new();
        {
            let Some(entry) = self.connections.get(&connection_id) else {
                return;
            };
            let mut entry = entry.lock();
            self.process_bytes(connection_id, &mut entry, data, &mut actions);
        }
        self.apply(connection_id, actions);
    }

    /// 전송 계층이 연결 종료를 알릴 때
    pub fn on_close(&self, connection_id: ConnectionId) {
        self.remove(connection_id);
    }

    /// 전송 계층 에러. 해당 연결만 정리하고 레지스트리는 계속 동작한다.
    pub fn on_error(&self, connection_id: ConnectionId, message: &str) {
        self.events.on_event(&ServerEvent::TransportError {
            connection_id,
            message: message.to_string(),
        });
        self.remove(connection_id);
    }

    /// 생존 타이머 판정. false를 반환하면 타이머를 중단해야 한다.
    ///
    /// epoch가 다르면 재사용된 connection_id에 대한 옛 타이머이므로
    /// 세션을 건드리지 않고 끝낸다.
    pub fn tick(&self, connection_id: ConnectionId, epoch: u64, now: Instant) -> bool {
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let (outcome, imei) = {
            let Some(entry) = self.connections.get(&connection_id) else {
                return false;
            };
            let mut entry = entry.lock();
            if entry.epoch != epoch {
                return false;
            }
            let outcome =
                entry
                    .session
                    .tick(now, interval, self.config.missed_heartbeat_budget);
            (outcome, entry.session.imei.clone())
        };

        match outcome {
            TickOutcome::Expired(missed) => {
                self.stats.liveness_timeouts.fetch_add(1, Ordering::Relaxed);
                self.events.on_event(&ServerEvent::SessionTimeout {
                    connection_id,
                    imei,
                    missed,
                });
                self.teardown(connection_id);
                false
            }
            _ => true,
        }
    }

    /// 엔트리 잠금 하에서 바이트를 프레임 → 레코드 → 전이로 처리
    fn process_bytes(
        &self,
        connection_id: ConnectionId,
        entry: &mut Entry,
        data: &[u8],
        actions: &mut Vec<Action>,
    ) {
        let fed = match entry.reassembler.feed(data) {
            Ok(fed) => fed,
            Err(_) => {
                entry.session.state = SessionState::Closing;
                actions.push(Action::Event(ServerEvent::BufferOverflow { connection_id }));
                actions.push(Action::Close);
                return;
            }
        };

        if fed.anomalies > 0 {
            self.stats
                .framing_anomalies
                .fetch_add(fed.anomalies as u64, Ordering::Relaxed);
            actions.push(Action::Event(ServerEvent::FramingAnomaly {
                connection_id,
                count: fed.anomalies,
            }));
        }

        for raw in fed.frames {
            let frame = match Frame::decode(&raw) {
                Ok(frame) => frame,
                Err(Error::ChecksumMismatch { expected, got }) => {
                    self.stats.checksum_failures.fetch_add(1, Ordering::Relaxed);
                    actions.push(Action::Event(ServerEvent::ChecksumFailure {
                        connection_id,
                        expected,
                        got,
                    }));
                    if entry
                        .session
                        .on_checksum_failure(self.config.checksum_failure_budget)
                    {
                        actions.push(Action::Close);
                        return;
                    }
                    continue;
                }
                Err(_) => {
                    // 재조립기가 마커/길이를 이미 검증했으므로 드물다.
                    // 해당 프레임만 폐기한다.
                    self.stats.framing_anomalies.fetch_add(1, Ordering::Relaxed);
                    actions.push(Action::Event(ServerEvent::FramingAnomaly {
                        connection_id,
                        count: 1,
                    }));
                    continue;
                }
            };

            self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
            actions.push(Action::Event(ServerEvent::FrameDecoded {
                connection_id,
                protocol: frame.protocol,
                serial: frame.serial,
            }));

            let record = match decode_payload(frame.protocol, &frame.payload, frame.serial) {
                Ok(record) => record,
                Err(_) => {
                    self.stats.framing_anomalies.fetch_add(1, Ordering::Relaxed);
                    actions.push(Action::Event(ServerEvent::FramingAnomaly {
                        connection_id,
                        count: 1,
                    }));
                    continue;
                }
            };

            if let TelemetryRecord::Unknown(unknown) = &record {
                actions.push(Action::Event(ServerEvent::UnknownProtocol {
                    connection_id,
                    protocol: unknown.protocol,
                }));
            }

            match entry.session.handle(&record, Instant::now()) {
                Ok(reply) => {
                    if let Some(imei) = reply.authenticated {
                        self.stats
                            .sessions_authenticated
                            .fetch_add(1, Ordering::Relaxed);
                        actions.push(Action::Admit(imei));
                    }
                    if let Some((protocol, serial)) = reply.ack {
                        actions.push(Action::Send(encode_ack(protocol, serial)));
                    }
                    if reply.forward {
                        if let Some(imei) = entry.session.imei.clone() {
                            actions.push(Action::Forward(imei, record));
                        }
                    }
                }
                Err(_) => {
                    actions.push(Action::Event(ServerEvent::ProtocolViolation {
                        connection_id,
                    }));
                    actions.push(Action::Close);
                    return;
                }
            }
        }
    }

    /// 모아둔 액션을 잠금 없이 수행
    fn apply(&self, connection_id: ConnectionId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(bytes) => self.transport.send(connection_id, bytes),
                Action::Forward(imei, record) => self.telemetry.on_record(&imei, &record),
                Action::Event(event) => self.events.on_event(&event),
                Action::Admit(imei) => self.admit(connection_id, imei),
                Action::Close => {
                    self.teardown(connection_id);
                    return;
                }
            }
        }
    }

    /// IMEI 인덱스 등록. 단말기 하나당 세션 하나 정책:
    /// 같은 IMEI의 기존 연결이 있으면 새 연결을 들이기 전에 닫는다.
    fn admit(&self, connection_id: ConnectionId, imei: String) {
        if let Some(old) = self.by_imei.insert(imei.clone(), connection_id) {
            if old != connection_id {
                self.events.on_event(&ServerEvent::SessionReplaced {
                    imei,
                    old,
                    new: connection_id,
                });
                self.teardown(old);
            }
        }
    }

    /// 레지스트리 주도 종료: 엔트리 제거 후 전송 계층에 종료 요청
    fn teardown(&self, connection_id: ConnectionId) {
        self.remove(connection_id);
        self.transport.close(connection_id);
    }

    /// 엔트리와 인덱스 제거. 이미 없으면 아무 일도 하지 않는다.
    fn remove(&self, connection_id: ConnectionId) {
        if let Some((_, entry)) = self.connections.remove(&connection_id) {
            let entry = entry.into_inner();
            if let Some(imei) = &entry.session.imei {
                // 재접속으로 교체된 경우 인덱스는 이미 새 연결을 가리킨다
                self.by_imei.remove_if(imei, |_, id| *id == connection_id);
            }
            self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
            self.events.on_event(&ServerEvent::ConnectionClosed {
                connection_id,
                imei: entry.session.imei,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crate::sink::ServerEvent;
    use crate::transport::QueueTransport;
    use crate::{PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN};

    #[derive(Default)]
    struct CaptureTelemetry(Mutex<Vec<(String, TelemetryRecord)>>);

    impl TelemetrySink for CaptureTelemetry {
        fn on_record(&self, imei: &str, record: &TelemetryRecord) {
            self.0.lock().push((imei.to_string(), record.clone()));
        }
    }

    #[derive(Default)]
    struct CaptureEvents(Mutex<Vec<ServerEvent>>);

    impl EventSink for CaptureEvents {
        fn on_event(&self, event: &ServerEvent) {
            self.0.lock().push(event.clone());
        }
    }

    struct Harness {
        registry: Registry,
        transport: Arc<QueueTransport>,
        telemetry: Arc<CaptureTelemetry>,
        events: Arc<CaptureEvents>,
    }

    fn harness(config: Config) -> Harness {
        let transport = Arc::new(QueueTransport::new());
        let telemetry = Arc::new(CaptureTelemetry::default());
        let events = Arc::new(CaptureEvents::default());
        let registry = Registry::new(
            config,
            transport.clone(),
            telemetry.clone(),
            events.clone(),
        );
        Harness {
            registry,
            transport,
            telemetry,
            events,
        }
    }

    const IDENTITY: [u8; 8] = [0x03, 0x55, 0x95, 0x10, 0x92, 0x91, 0x88, 0x89];
    const IMEI: &str = "0355951092918889";

    fn login_frame(serial: u16) -> Bytes {
        encode_frame(PROTO_LOGIN, &IDENTITY, serial)
    }

    fn location_frame(serial: u16) -> Bytes {
        let payload = [
            24, 6, 15, 12, 30, 45, 0x08, 0x02, 0x6B, 0x3F, 0x3E, 0x0C, 0x22, 0xAD, 0x65, 0x28,
            0x01, 0x54,
        ];
        encode_frame(PROTO_LOCATION, &payload, serial)
    }

    #[test]
    fn test_login_scenario() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(0x0001));

        assert_eq!(h.registry.session_state(1), Some(SessionState::Authenticated));
        assert_eq!(h.registry.connection_for_imei(IMEI), Some(1));

        // ACK: 프로토콜 0x01, 시리얼 0x0001 에코
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        let ack = Frame::decode(&sent[0].1).unwrap();
        assert_eq!(ack.protocol, PROTO_LOGIN);
        assert_eq!(ack.serial, 0x0001);
        assert_eq!(ack.declared_len(), 5);
    }

    #[test]
    fn test_telemetry_before_login_closes_without_forwarding() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &location_frame(1));

        // 싱크에 레코드가 전달되지 않고 연결이 종료된다
        assert!(h.telemetry.0.lock().is_empty());
        assert_eq!(h.registry.session_state(1), None);
        assert_eq!(h.transport.closed(), vec![1]);
        assert!(h
            .events
            .0
            .lock()
            .iter()
            .any(|e| matches!(e, ServerEvent::ProtocolViolation { connection_id: 1 })));
    }

    #[test]
    fn test_authenticated_location_forwarded() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));
        h.registry.on_bytes(1, &location_frame(2));

        let records = h.telemetry.0.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, IMEI);
        assert!(matches!(records[0].1, TelemetryRecord::Location(_)));

        // 위치 프레임에는 ACK 없음 (로그인 ACK 하나뿐)
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[test]
    fn test_heartbeat_acked() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));
        h.registry.on_bytes(1, &encode_frame(PROTO_HEARTBEAT, &[], 0x0042));

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        let ack = Frame::decode(&sent[1].1).unwrap();
        assert_eq!(ack.protocol, PROTO_HEARTBEAT);
        assert_eq!(ack.serial, 0x0042);
    }

    #[test]
    fn test_single_session_per_imei() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));
        h.registry.on_connect(2);
        h.registry.on_bytes(2, &login_frame(1));

        // 같은 IMEI는 항상 세션 하나: 옛 연결이 닫힌다
        assert_eq!(h.registry.session_state(1), None);
        assert_eq!(h.registry.session_state(2), Some(SessionState::Authenticated));
        assert_eq!(h.registry.connection_for_imei(IMEI), Some(2));
        assert!(h.transport.closed().contains(&1));
        assert!(h.events.0.lock().iter().any(|e| matches!(
            e,
            ServerEvent::SessionReplaced { old: 1, new: 2, .. }
        )));
    }

    #[test]
    fn test_byte_by_byte_feed_equivalent() {
        let h = harness(Config::default());
        h.registry.on_connect(1);

        let mut stream = Vec::new();
        stream.extend_from_slice(&login_frame(1));
        stream.extend_from_slice(&encode_frame(PROTO_HEARTBEAT, &[], 2));
        stream.extend_from_slice(&location_frame(3));

        for byte in stream {
            h.registry.on_bytes(1, &[byte]);
        }

        assert_eq!(h.transport.sent().len(), 2); // 로그인 + 하트비트 ACK
        assert_eq!(h.telemetry.0.lock().len(), 1);
        assert_eq!(h.registry.session_state(1), Some(SessionState::Authenticated));
    }

    #[test]
    fn test_liveness_timeout_removes_session() {
        let h = harness(Config::default());
        let epoch = h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));

        let interval = Duration::from_millis(h.registry.config().heartbeat_interval_ms);
        let budget = h.registry.config().missed_heartbeat_budget;
        let base = Instant::now();

        // 예산까지는 유지
        for i in 1..=budget {
            assert!(h.registry.tick(1, epoch, base + interval * i));
            assert_eq!(h.registry.session_state(1), Some(SessionState::Authenticated));
        }

        // 예산 초과 → 종료, 레지스트리에서 제거
        assert!(!h.registry.tick(1, epoch, base + interval * (budget + 1)));
        assert_eq!(h.registry.session_state(1), None);
        assert_eq!(h.registry.connection_for_imei(IMEI), None);
        assert!(h.transport.closed().contains(&1));
        assert!(h
            .events
            .0
            .lock()
            .iter()
            .any(|e| matches!(e, ServerEvent::SessionTimeout { connection_id: 1, .. })));
    }

    #[test]
    fn test_stale_timer_epoch_ignored() {
        let h = harness(Config::default());
        let epoch = h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));

        // 같은 connection_id가 재사용된 상황
        h.registry.on_close(1);
        let epoch2 = h.registry.on_connect(1);
        assert_ne!(epoch, epoch2);

        let far = Instant::now() + Duration::from_secs(3600);
        // 옛 타이머는 세션을 건드리지 못하고 중단된다
        assert!(!h.registry.tick(1, epoch, far));
        assert_eq!(h.registry.session_state(1), Some(SessionState::Unauthenticated));
    }

    #[test]
    fn test_checksum_escalation_closes() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));

        // 시리얼 바이트를 망가뜨려 체크섬만 실패시킨다
        let mut corrupted = encode_frame(PROTO_HEARTBEAT, &[], 7).to_vec();
        let n = corrupted.len();
        corrupted[n - 5] ^= 0xFF;

        let budget = h.registry.config().checksum_failure_budget;
        for _ in 0..budget {
            h.registry.on_bytes(1, &corrupted);
            assert_eq!(h.registry.session_state(1), Some(SessionState::Authenticated));
        }

        // 예산 초과 → 연결 종료
        h.registry.on_bytes(1, &corrupted);
        assert_eq!(h.registry.session_state(1), None);
        assert!(h.transport.closed().contains(&1));
        assert_eq!(
            h.registry.stats().snapshot().checksum_failures,
            budget as u64 + 1
        );
    }

    #[test]
    fn test_unknown_protocol_surfaced_not_fatal() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));
        h.registry.on_bytes(1, &encode_frame(0x8A, &[0xDE, 0xAD], 5));

        assert_eq!(h.registry.session_state(1), Some(SessionState::Authenticated));
        assert!(h.telemetry.0.lock().is_empty());
        assert!(h
            .events
            .0
            .lock()
            .iter()
            .any(|e| matches!(
                e,
                ServerEvent::UnknownProtocol { connection_id: 1, protocol: 0x8A }
            )));
    }

    #[test]
    fn test_error_isolated_to_connection() {
        let h = harness(Config::default());
        h.registry.on_connect(1);
        h.registry.on_bytes(1, &login_frame(1));
        h.registry.on_connect(2);

        h.registry.on_error(2, "connection reset by peer");

        // 다른 연결은 영향 없음
        assert_eq!(h.registry.session_state(2), None);
        assert_eq!(h.registry.session_state(1), Some(SessionState::Authenticated));
        assert_eq!(h.registry.connection_for_imei(IMEI), Some(1));
    }

    #[test]
    fn test_buffer_overflow_closes() {
        let config = Config {
            reassembly_buffer_cap: 32,
            ..Config::default()
        };
        let h = harness(config);
        h.registry.on_connect(1);
        // 마커 없는 0x78 반복은 버퍼에 쌓이다가 상한 초과
        h.registry.on_bytes(1, &[0x78; 64]);

        assert_eq!(h.registry.session_state(1), None);
        assert!(h.transport.closed().contains(&1));
        assert!(h
            .events
            .0
            .lock()
            .iter()
            .any(|e| matches!(e, ServerEvent::BufferOverflow { connection_id: 1 })));
    }
}
