//! 서버 통계

use std::sync::atomic::{AtomicU64, Ordering};

/// 서버 전역 카운터
///
/// 여러 연결 핸들러가 동시에 갱신하므로 원자 카운터로 둔다.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// 디코딩 성공한 프레임 수
    pub frames_decoded: AtomicU64,

    /// 재동기화 횟수
    pub framing_anomalies: AtomicU64,

    /// 체크섬 실패 프레임 수
    pub checksum_failures: AtomicU64,

    /// 인증 완료된 세션 수 (누적)
    pub sessions_authenticated: AtomicU64,

    /// 하트비트 타임아웃으로 종료된 세션 수
    pub liveness_timeouts: AtomicU64,

    /// 열린 연결 수 (누적)
    pub connections_opened: AtomicU64,

    /// 닫힌 연결 수 (누적)
    pub connections_closed: AtomicU64,
}

/// 한 시점의 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_decoded: u64,
    pub framing_anomalies: u64,
    pub checksum_failures: u64,
    pub sessions_authenticated: u64,
    pub liveness_timeouts: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            framing_anomalies: self.framing_anomalies.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            sessions_authenticated: self.sessions_authenticated.load(Ordering::Relaxed),
            liveness_timeouts: self.liveness_timeouts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
        }
    }

    /// 현재 활성 연결 수 추정
    pub fn active_connections(&self) -> u64 {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        opened.saturating_sub(closed)
    }
}
