//! 세션 상태 머신
//!
//! 단말기 한 대의 연결 수명 주기: 인증 → 생존 확인 → 종료.
//! 상태 전이는 순수 로직이며 I/O를 하지 않는다. 전이 결과로 해야 할
//! 일(ACK 송신, 싱크 전달)은 `Reply`로 돌려주고 레지스트리가 수행한다.

use std::time::{Duration, Instant};

use crate::record::TelemetryRecord;
use crate::{Error, Result, PROTO_HEARTBEAT, PROTO_LOGIN};

/// 연결 식별자 (전송 어댑터가 부여하는 불투명 키)
pub type ConnectionId = u64;

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 로그인 프레임 수신 전
    Unauthenticated,

    /// 로그인 완료, 텔레메트리 수신 중
    Authenticated,

    /// 종료 확정 (터미널 상태, 재진입 없음)
    Closing,
}

/// 상태 전이 결과
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// 송신할 ACK (프로토콜 번호, 에코할 시리얼)
    pub ack: Option<(u8, u16)>,

    /// 레코드를 텔레메트리 싱크로 전달할지
    pub forward: bool,

    /// 이 전이로 인증된 IMEI (레지스트리 인덱스 갱신용)
    pub authenticated: Option<String>,
}

/// 생존 타이머 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 간격 내 정상 프레임 수신됨
    Alive,

    /// 하트비트 누락 (허용 범위 내)
    Missed(u32),

    /// 허용 횟수 초과, 세션 종료 대상
    Expired(u32),
}

/// 단말기 세션
#[derive(Debug)]
pub struct Session {
    pub connection_id: ConnectionId,

    /// 단말기 식별자. 로그인 전에는 없음.
    pub imei: Option<String>,

    pub state: SessionState,

    /// 마지막으로 인정된 로그인/하트비트/텔레메트리 시각
    pub last_heartbeat_at: Instant,

    /// 연속 하트비트 누락 횟수
    pub missed_heartbeats: u32,

    /// 마지막으로 에코한 시리얼 번호
    pub pending_serial: u16,

    /// 연속 체크섬 실패 횟수 (정상 프레임 수신 시 리셋)
    pub checksum_failures: u32,
}

impl Session {
    pub fn new(connection_id: ConnectionId, now: Instant) -> Self {
        Self {
            connection_id,
            imei: None,
            state: SessionState::Unauthenticated,
            last_heartbeat_at: now,
            missed_heartbeats: 0,
            pending_serial: 0,
            checksum_failures: 0,
        }
    }

    /// 디코딩된 레코드로 상태 전이
    ///
    /// 인증 전 텔레메트리는 프로토콜 위반이며 연결 종료 사유다.
    pub fn handle(&mut self, record: &TelemetryRecord, now: Instant) -> Result<Reply> {
        if self.state == SessionState::Closing {
            return Ok(Reply::default());
        }

        // 정상 프레임이 디코딩됐으므로 체크섬 실패 연속 카운트 리셋
        self.checksum_failures = 0;

        match record {
            TelemetryRecord::Login(login) => {
                let newly_bound = self.imei.as_deref() != Some(login.imei.as_str());
                self.imei = Some(login.imei.clone());
                self.state = SessionState::Authenticated;
                self.refresh(now, login.serial);

                Ok(Reply {
                    ack: Some((PROTO_LOGIN, login.serial)),
                    forward: false,
                    authenticated: newly_bound.then(|| login.imei.clone()),
                })
            }

            _ if self.state == SessionState::Unauthenticated => {
                self.state = SessionState::Closing;
                Err(Error::ProtocolViolation {
                    reason: "인증 전 텔레메트리 수신",
                })
            }

            TelemetryRecord::Heartbeat(hb) => {
                self.refresh(now, hb.serial);
                Ok(Reply {
                    ack: Some((PROTO_HEARTBEAT, hb.serial)),
                    forward: false,
                    authenticated: None,
                })
            }

            TelemetryRecord::Status(_)
            | TelemetryRecord::Location(_)
            | TelemetryRecord::Alarm(_) => {
                // 모든 트래픽이 생존 신호로 인정됨. ACK는 없음.
                self.refresh(now, record.serial());
                Ok(Reply {
                    ack: None,
                    forward: true,
                    authenticated: None,
                })
            }

            TelemetryRecord::Unknown(_) => Ok(Reply::default()),
        }
    }

    /// 체크섬 실패 기록. 반환값 true면 연결 종료 대상.
    pub fn on_checksum_failure(&mut self, budget: u32) -> bool {
        self.checksum_failures += 1;
        if self.checksum_failures > budget {
            self.state = SessionState::Closing;
            true
        } else {
            false
        }
    }

    /// 생존 타이머 판정
    ///
    /// 타이머 태스크가 간격마다 호출한다. 시각을 인자로 받으므로
    /// 테스트에서 가상 시계로 검증할 수 있다.
    pub fn tick(&mut self, now: Instant, interval: Duration, budget: u32) -> TickOutcome {
        if self.state == SessionState::Closing {
            return TickOutcome::Expired(self.missed_heartbeats);
        }

        if now.saturating_duration_since(self.last_heartbeat_at) < interval {
            return TickOutcome::Alive;
        }

        self.missed_heartbeats += 1;
        if self.missed_heartbeats > budget {
            self.state = SessionState::Closing;
            TickOutcome::Expired(self.missed_heartbeats)
        } else {
            TickOutcome::Missed(self.missed_heartbeats)
        }
    }

    fn refresh(&mut self, now: Instant, serial: u16) {
        self.last_heartbeat_at = now;
        self.missed_heartbeats = 0;
        self.pending_serial = serial;
    }
}
