//! 디코딩된 텔레메트리 레코드
//!
//! 프로토콜 번호별 페이로드를 값 타입으로 변환한다. 레코드는 호출자
//! 소유로 넘어가며 코어는 사본을 남기지 않는다.

use serde::Serialize;

use crate::{Error, Result};
use crate::{PROTO_ALARM, PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN};

/// 위치/알람 페이로드의 고정 구간 크기
/// 날짜(6) + 위성수(1) + 위도(4) + 경도(4) + 속도(1) + 방위/상태(2)
const LOCATION_FIXED_LEN: usize = 18;

/// GT06 위경도 스케일 (1/1,800,000 도)
const COORD_SCALE: f64 = 1_800_000.0;

/// 단말기 보고 시각 (6바이트: 연 월 일 시 분 초)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceTime {
    /// 2000년 기준 오프셋 (예: 24 = 2024년)
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DeviceTime {
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self {
            year: bytes[0],
            month: bytes[1],
            day: bytes[2],
            hour: bytes[3],
            minute: bytes[4],
            second: bytes[5],
        }
    }
}

/// 로그인 레코드 (0x01)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRecord {
    /// 8바이트 단말기 식별 코드의 16자리 16진수 표현
    pub imei: String,

    /// 프레임 시리얼 번호
    pub serial: u16,
}

/// 하트비트 레코드 (0x10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartbeatRecord {
    pub serial: u16,
}

/// 상태 레코드 (0x13)
///
/// 페이로드가 충분히 길 때만 단말 상태 필드가 채워진다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub serial: u16,

    /// 단말 정보 비트필드
    pub terminal_info: Option<u8>,

    /// 배터리 전압 레벨
    pub voltage_level: Option<u8>,

    /// GSM 신호 세기
    pub gsm_signal: Option<u8>,
}

/// 위치 레코드 (0x22)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationRecord {
    pub time: DeviceTime,

    /// GPS 위성 수
    pub satellites: u8,

    /// 위도 원시 값 (4바이트 고정소수점, IEEE float 아님)
    pub latitude_raw: u32,

    /// 경도 원시 값
    pub longitude_raw: u32,

    /// 속도 (km/h)
    pub speed: u8,

    /// 방위/상태 비트필드
    pub course_status: u16,

    /// 누적 주행거리 (선언 길이가 기본 위치 프레임을 넘을 때만 존재)
    ///
    /// 없음은 0이 아니라 `None`이다.
    pub mileage: Option<u32>,

    pub serial: u16,
}

impl LocationRecord {
    /// 위도 (도 단위)
    pub fn latitude_deg(&self) -> f64 {
        self.latitude_raw as f64 / COORD_SCALE
    }

    /// 경도 (도 단위)
    pub fn longitude_deg(&self) -> f64 {
        self.longitude_raw as f64 / COORD_SCALE
    }

    /// 방위 (하위 10비트, 0~360도)
    pub fn course(&self) -> u16 {
        self.course_status & 0x03FF
    }
}

/// 알람 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlarmKind {
    /// SOS 버튼 (코드 1)
    Sos,

    /// 전원선 절단 (코드 2)
    PowerCut,

    /// 예약/미정의 코드
    Reserved(u8),
}

impl AlarmKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => AlarmKind::Sos,
            2 => AlarmKind::PowerCut,
            other => AlarmKind::Reserved(other),
        }
    }
}

/// 알람 레코드 (0x26)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlarmRecord {
    pub time: DeviceTime,
    pub kind: AlarmKind,
    pub latitude_raw: u32,
    pub longitude_raw: u32,
    pub speed: u8,
    pub course_status: u16,
    pub serial: u16,
}

/// 미확인 프로토콜 레코드
///
/// 페이로드를 그대로 보존해 관측 싱크로 전달한다. 조용히 버리지 않는다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownRecord {
    pub protocol: u8,
    pub payload: Vec<u8>,
    pub serial: u16,
}

/// 통합 레코드 enum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TelemetryRecord {
    Login(LoginRecord),
    Heartbeat(HeartbeatRecord),
    Status(StatusRecord),
    Location(LocationRecord),
    Alarm(AlarmRecord),
    Unknown(UnknownRecord),
}

impl TelemetryRecord {
    /// 프레임 시리얼 번호
    pub fn serial(&self) -> u16 {
        match self {
            TelemetryRecord::Login(r) => r.serial,
            TelemetryRecord::Heartbeat(r) => r.serial,
            TelemetryRecord::Status(r) => r.serial,
            TelemetryRecord::Location(r) => r.serial,
            TelemetryRecord::Alarm(r) => r.serial,
            TelemetryRecord::Unknown(r) => r.serial,
        }
    }
}

fn require(protocol: u8, payload: &[u8], needed: usize) -> Result<()> {
    if payload.len() < needed {
        return Err(Error::TruncatedPayload {
            protocol,
            needed,
            got: payload.len(),
        });
    }
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_time(bytes: &[u8]) -> DeviceTime {
    DeviceTime::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]])
}

fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// 페이로드 디코딩
///
/// 미확인 프로토콜 번호는 에러가 아니라 `Unknown` 레코드다.
pub fn decode_payload(protocol: u8, payload: &[u8], serial: u16) -> Result<TelemetryRecord> {
    match protocol {
        PROTO_LOGIN => {
            require(protocol, payload, 8)?;
            Ok(TelemetryRecord::Login(LoginRecord {
                imei: hex_string(&payload[..8]),
                serial,
            }))
        }

        PROTO_HEARTBEAT => Ok(TelemetryRecord::Heartbeat(HeartbeatRecord { serial })),

        crate::PROTO_STATUS => Ok(TelemetryRecord::Status(StatusRecord {
            serial,
            terminal_info: payload.first().copied(),
            voltage_level: payload.get(1).copied(),
            gsm_signal: payload.get(2).copied(),
        })),

        PROTO_LOCATION => {
            require(protocol, payload, LOCATION_FIXED_LEN)?;
            let mileage = if payload.len() >= LOCATION_FIXED_LEN + 4 {
                Some(read_u32(&payload[LOCATION_FIXED_LEN..]))
            } else {
                None
            };
            Ok(TelemetryRecord::Location(LocationRecord {
                time: read_time(&payload[..6]),
                satellites: payload[6],
                latitude_raw: read_u32(&payload[7..11]),
                longitude_raw: read_u32(&payload[11..15]),
                speed: payload[15],
                course_status: u16::from_be_bytes([payload[16], payload[17]]),
                mileage,
                serial,
            }))
        }

        PROTO_ALARM => {
            require(protocol, payload, LOCATION_FIXED_LEN)?;
            Ok(TelemetryRecord::Alarm(AlarmRecord {
                time: read_time(&payload[..6]),
                kind: AlarmKind::from_code(payload[6]),
                latitude_raw: read_u32(&payload[7..11]),
                longitude_raw: read_u32(&payload[11..15]),
                speed: payload[15],
                course_status: u16::from_be_bytes([payload[16], payload[17]]),
                serial,
            }))
        }

        other => Ok(TelemetryRecord::Unknown(UnknownRecord {
            protocol: other,
            payload: payload.to_vec(),
            serial,
        })),
    }
}
