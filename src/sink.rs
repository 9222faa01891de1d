//! 외부 협력자 싱크
//!
//! 코어는 콘솔 출력이나 저장을 직접 하지 않는다. 디코딩된 텔레메트리는
//! `TelemetrySink`로, 구조화된 서버 이벤트는 `EventSink`로 넘긴다.
//! 전달은 코어 관점에서 at-least-once이며 멱등성은 싱크 책임이다.

use tracing::{debug, info, warn};

use crate::record::TelemetryRecord;
use crate::session::ConnectionId;

/// 구조화된 서버 이벤트
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ConnectionOpened {
        connection_id: ConnectionId,
    },
    ConnectionClosed {
        connection_id: ConnectionId,
        imei: Option<String>,
    },
    FrameDecoded {
        connection_id: ConnectionId,
        protocol: u8,
        serial: u16,
    },
    /// 스트림 재동기화 발생 (바이트 폐기)
    FramingAnomaly {
        connection_id: ConnectionId,
        count: usize,
    },
    ChecksumFailure {
        connection_id: ConnectionId,
        expected: u16,
        got: u16,
    },
    /// 인증 전 텔레메트리 등 상태에 맞지 않는 프레임
    ProtocolViolation {
        connection_id: ConnectionId,
    },
    /// 미확인 프로토콜 번호 (치명적이지 않음)
    UnknownProtocol {
        connection_id: ConnectionId,
        protocol: u8,
    },
    SessionTimeout {
        connection_id: ConnectionId,
        imei: Option<String>,
        missed: u32,
    },
    /// 같은 IMEI 재접속으로 기존 연결 교체
    SessionReplaced {
        imei: String,
        old: ConnectionId,
        new: ConnectionId,
    },
    TransportError {
        connection_id: ConnectionId,
        message: String,
    },
    /// 재조립 버퍼 상한 초과
    BufferOverflow {
        connection_id: ConnectionId,
    },
}

/// 관측 이벤트 싱크
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &ServerEvent);
}

/// 텔레메트리 레코드 싱크 (IMEI 키)
pub trait TelemetrySink: Send + Sync {
    fn on_record(&self, imei: &str, record: &TelemetryRecord);
}

/// tracing 기반 기본 이벤트 싱크
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::ConnectionOpened { connection_id } => {
                info!(connection_id, "단말기 연결됨");
            }
            ServerEvent::ConnectionClosed {
                connection_id,
                imei,
            } => {
                info!(connection_id, imei = imei.as_deref(), "연결 종료");
            }
            ServerEvent::FrameDecoded {
                connection_id,
                protocol,
                serial,
            } => {
                debug!(connection_id, protocol, serial, "프레임 디코딩");
            }
            ServerEvent::FramingAnomaly {
                connection_id,
                count,
            } => {
                warn!(connection_id, count, "프레이밍 이상, 재동기화");
            }
            ServerEvent::ChecksumFailure {
                connection_id,
                expected,
                got,
            } => {
                warn!(
                    connection_id,
                    expected = format_args!("{:04X}", expected),
                    got = format_args!("{:04X}", got),
                    "체크섬 불일치"
                );
            }
            ServerEvent::ProtocolViolation { connection_id } => {
                warn!(connection_id, "프로토콜 위반, 연결 종료");
            }
            ServerEvent::UnknownProtocol {
                connection_id,
                protocol,
            } => {
                warn!(connection_id, protocol, "미확인 프로토콜 번호");
            }
            ServerEvent::SessionTimeout {
                connection_id,
                imei,
                missed,
            } => {
                warn!(
                    connection_id,
                    imei = imei.as_deref(),
                    missed,
                    "하트비트 타임아웃"
                );
            }
            ServerEvent::SessionReplaced { imei, old, new } => {
                info!(imei, old, new, "재접속, 기존 연결 교체");
            }
            ServerEvent::TransportError {
                connection_id,
                message,
            } => {
                warn!(connection_id, message, "전송 계층 에러");
            }
            ServerEvent::BufferOverflow { connection_id } => {
                warn!(connection_id, "재조립 버퍼 오버플로우, 연결 종료");
            }
        }
    }
}

/// tracing 기반 기본 텔레메트리 싱크
///
/// 실제 배포에서는 DB 싱크로 교체한다.
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn on_record(&self, imei: &str, record: &TelemetryRecord) {
        match record {
            TelemetryRecord::Location(loc) => {
                info!(
                    imei,
                    lat = loc.latitude_deg(),
                    lon = loc.longitude_deg(),
                    speed = loc.speed,
                    mileage = loc.mileage,
                    "위치 보고"
                );
            }
            TelemetryRecord::Alarm(alarm) => {
                warn!(imei, kind = ?alarm.kind, "알람 수신");
            }
            other => {
                info!(imei, record = ?other, "텔레메트리 수신");
            }
        }
    }
}
