//! 에러 타입 정의

use thiserror::Error;

/// GTS 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 시작 마커: {got:02X?}")]
    InvalidStartMarker { got: [u8; 2] },

    #[error("유효하지 않은 종료 마커: {got:02X?}")]
    InvalidStopMarker { got: [u8; 2] },

    #[error("프레임 길이 불일치: declared {declared}, available {available}")]
    LengthMismatch { declared: usize, available: usize },

    #[error("체크섬 불일치: expected {expected:04X}, got {got:04X}")]
    ChecksumMismatch { expected: u16, got: u16 },

    #[error("페이로드 길이 부족: protocol {protocol:#04X}, needed {needed}, got {got}")]
    TruncatedPayload {
        protocol: u8,
        needed: usize,
        got: usize,
    },

    #[error("프로토콜 위반: {reason}")]
    ProtocolViolation { reason: &'static str },

    #[error("하트비트 타임아웃: {missed}회 누락")]
    LivenessTimeout { missed: u32 },

    #[error("수신 버퍼 오버플로우: 최대 {cap} 바이트 초과")]
    BufferOverflow { cap: usize },

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 프레임 하나에 국한된 에러인지 (연결 유지 가능)
    ///
    /// 체크섬 불일치는 반복 횟수에 따라 레지스트리에서 별도로 종료 판단한다.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. } | Error::TruncatedPayload { .. }
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
