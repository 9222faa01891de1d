//! 서버 설정

/// GTS 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 하트비트 간격 (밀리초)
    ///
    /// 이 간격마다 생존 타이머가 한 번씩 동작한다.
    pub heartbeat_interval_ms: u64,

    /// 허용 하트비트 누락 횟수
    ///
    /// 누락 횟수가 이 값을 초과하면 연결을 종료한다.
    pub missed_heartbeat_budget: u32,

    /// 허용 연속 체크섬 실패 횟수
    ///
    /// 초과 시 연결 종료. 단발 실패는 해당 프레임만 폐기한다.
    pub checksum_failure_budget: u32,

    /// 연결당 재조립 버퍼 최대 크기 (바이트)
    pub reassembly_buffer_cap: usize,

    /// 확장 프레임 길이 필드 상한 (바이트)
    ///
    /// 선언 길이가 이 값을 넘으면 손상된 프레임으로 간주하고 재동기화한다.
    pub max_declared_len: usize,

    /// 연결당 송신 큐 깊이 (프레임 수)
    pub write_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,    // 1분
            missed_heartbeat_budget: 3,
            checksum_failure_budget: 3,
            reassembly_buffer_cap: 64 * 1024, // 64KB
            max_declared_len: 1024,
            write_queue_depth: 64,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 연결 종료까지의 총 생존 유예 (밀리초)
    pub fn liveness_deadline_ms(&self) -> u64 {
        self.heartbeat_interval_ms * (self.missed_heartbeat_budget as u64 + 1)
    }

    /// 대규모 차량군용 설정
    ///
    /// 단말기가 많고 보고 주기가 긴 환경. 연결당 메모리를 줄이고
    /// 죽은 연결을 빨리 정리한다.
    pub fn dense_fleet() -> Self {
        Self {
            heartbeat_interval_ms: 180_000,   // 3분
            missed_heartbeat_budget: 2,
            checksum_failure_budget: 2,
            reassembly_buffer_cap: 16 * 1024, // 16KB
            max_declared_len: 512,
            write_queue_depth: 32,
        }
    }

    /// 불안정한 이동통신망용 설정
    ///
    /// 2G/3G 음영 지역을 오가는 단말기. 누락과 손상에 관대하게.
    pub fn unstable_network() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            missed_heartbeat_budget: 5,
            checksum_failure_budget: 8,
            reassembly_buffer_cap: 128 * 1024, // 128KB
            max_declared_len: 1024,
            write_queue_depth: 128,
        }
    }
}
