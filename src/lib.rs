//! # GTS (GPS Tracker Server)
//!
//! GT06 계열 GPS 단말기용 TCP 세션 엔진
//!
//! ## 핵심 특징
//! - **스트림 재조립**: 임의로 분할된 TCP 바이트 스트림에서 프레임 추출
//! - **프레임 코덱**: 로그인/하트비트/위치/상태/알람 프레임 디코딩
//! - **CRC-16/X.25 검증**: 프레임 무결성 검사 (CRC-ITU)
//! - **세션 상태 머신**: 인증 → 하트비트 생존 확인 → 종료
//! - **연결 레지스트리**: IMEI 기반 재접속 처리, 연결별 독립 처리
//! - **ACK 응답**: 로그인/하트비트 프레임에 시리얼 에코 응답

pub mod checksum;
pub mod config;
pub mod error;
pub mod frame;
pub mod reassembler;
pub mod record;
pub mod registry;
pub mod session;
pub mod sink;
pub mod stats;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use frame::{encode_ack, encode_frame, Frame, MarkerKind};
pub use reassembler::{FeedResult, Reassembler};
pub use record::{
    decode_payload, AlarmKind, AlarmRecord, DeviceTime, HeartbeatRecord, LocationRecord,
    LoginRecord, StatusRecord, TelemetryRecord, UnknownRecord,
};
pub use registry::Registry;
pub use session::{ConnectionId, Session, SessionState};
pub use sink::{EventSink, ServerEvent, TelemetrySink, TracingEventSink, TracingTelemetrySink};
pub use stats::ServerStats;
pub use transport::{QueueTransport, Transport};

/// 표준 프레임 시작 마커
pub const START_MARKER: [u8; 2] = [0x78, 0x78];

/// 확장 프레임 시작 마커 (2바이트 길이 필드)
pub const START_MARKER_EXT: [u8; 2] = [0x79, 0x79];

/// 프레임 종료 마커
pub const STOP_MARKER: [u8; 2] = [0x0D, 0x0A];

/// 프로토콜 번호: 로그인
pub const PROTO_LOGIN: u8 = 0x01;

/// 프로토콜 번호: 하트비트
pub const PROTO_HEARTBEAT: u8 = 0x10;

/// 프로토콜 번호: 상태 보고
pub const PROTO_STATUS: u8 = 0x13;

/// 프로토콜 번호: 위치 보고
pub const PROTO_LOCATION: u8 = 0x22;

/// 프로토콜 번호: 알람
pub const PROTO_ALARM: u8 = 0x26;

/// 길이 필드 최솟값 (프로토콜 번호 1 + 시리얼 2 + 체크섬 2)
pub const MIN_DECLARED_LEN: usize = 5;
