//! 프레임 코덱
//!
//! 완성된 프레임 바이트 슬라이스 ↔ `Frame` 변환. I/O와 공유 상태 없음.
//!
//! 프레임 배치:
//! ```text
//! 표준:  [78 78][len:1][proto:1][payload:len-5][serial:2][crc:2][0D 0A]
//! 확장:  [79 79][len:2][proto:1][payload:len-5][serial:2][crc:2][0D 0A]
//! ```
//! `len`은 프로토콜 번호부터 체크섬까지의 바이트 수 (마커 제외).
//! CRC는 길이 필드부터 시리얼 번호까지를 대상으로 계산한다.

use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum;
use crate::{Error, Result};
use crate::{MIN_DECLARED_LEN, START_MARKER, START_MARKER_EXT, STOP_MARKER};

/// 시작 마커 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// 0x7878, 1바이트 길이 필드
    Standard,

    /// 0x7979, 2바이트 길이 필드
    Extended,
}

impl MarkerKind {
    /// 길이 필드 크기 (바이트)
    pub fn len_field_size(&self) -> usize {
        match self {
            MarkerKind::Standard => 1,
            MarkerKind::Extended => 2,
        }
    }
}

/// 디코딩된 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 시작 마커 종류
    pub marker: MarkerKind,

    /// 프로토콜 번호
    pub protocol: u8,

    /// 페이로드 (프로토콜 번호와 시리얼 사이)
    pub payload: Bytes,

    /// 단말기 시리얼 번호 (ACK 상관용)
    pub serial: u16,

    /// 수신된 체크섬
    pub checksum: u16,
}

impl Frame {
    /// 선언 길이 (프로토콜 번호부터 체크섬까지)
    pub fn declared_len(&self) -> usize {
        self.payload.len() + MIN_DECLARED_LEN
    }

    /// 완성된 프레임 슬라이스 디코딩
    ///
    /// 재조립기가 잘라낸 마커 포함 슬라이스를 받는다.
    /// 체크섬 불일치는 절대 조용히 통과시키지 않는다.
    pub fn decode(raw: &[u8]) -> Result<Frame> {
        if raw.len() < 2 {
            return Err(Error::LengthMismatch {
                declared: 0,
                available: raw.len(),
            });
        }

        let marker = if raw[..2] == START_MARKER {
            MarkerKind::Standard
        } else if raw[..2] == START_MARKER_EXT {
            MarkerKind::Extended
        } else {
            return Err(Error::InvalidStartMarker {
                got: [raw[0], raw[1]],
            });
        };

        let lf = marker.len_field_size();
        if raw.len() < 2 + lf {
            return Err(Error::LengthMismatch {
                declared: 0,
                available: raw.len(),
            });
        }

        let declared = match marker {
            MarkerKind::Standard => raw[2] as usize,
            MarkerKind::Extended => u16::from_be_bytes([raw[2], raw[3]]) as usize,
        };

        let total = 2 + lf + declared + 2;
        if declared < MIN_DECLARED_LEN || raw.len() != total {
            return Err(Error::LengthMismatch {
                declared,
                available: raw.len(),
            });
        }

        if raw[total - 2..] != STOP_MARKER {
            return Err(Error::InvalidStopMarker {
                got: [raw[total - 2], raw[total - 1]],
            });
        }

        // 길이 필드 ~ 시리얼 번호
        let body = &raw[2..total - 4];
        let got = u16::from_be_bytes([raw[total - 4], raw[total - 3]]);
        let expected = checksum::compute(body);
        if expected != got {
            return Err(Error::ChecksumMismatch { expected, got });
        }

        let payload_start = 2 + lf + 1;
        let payload_len = declared - MIN_DECLARED_LEN;
        let serial = u16::from_be_bytes([raw[total - 6], raw[total - 5]]);

        Ok(Frame {
            marker,
            protocol: raw[2 + lf],
            payload: Bytes::copy_from_slice(&raw[payload_start..payload_start + payload_len]),
            serial,
            checksum: got,
        })
    }
}

/// 프레임 인코딩
///
/// 페이로드 크기에 따라 마커를 선택한다 (선언 길이가 255를 넘으면 확장 마커).
pub fn encode_frame(protocol: u8, payload: &[u8], serial: u16) -> Bytes {
    let declared = payload.len() + MIN_DECLARED_LEN;
    let extended = declared > u8::MAX as usize;
    let lf = if extended { 2 } else { 1 };

    let mut buf = BytesMut::with_capacity(2 + lf + declared + 2);
    if extended {
        buf.put_slice(&START_MARKER_EXT);
        buf.put_u16(declared as u16);
    } else {
        buf.put_slice(&START_MARKER);
        buf.put_u8(declared as u8);
    }
    buf.put_u8(protocol);
    buf.put_slice(payload);
    buf.put_u16(serial);

    // 길이 필드 ~ 시리얼 번호
    let crc = checksum::compute(&buf[2..]);
    buf.put_u16(crc);
    buf.put_slice(&STOP_MARKER);
    buf.freeze()
}

/// ACK 프레임 인코딩 (로그인/하트비트 응답)
///
/// 페이로드 없이 프로토콜 번호와 시리얼만 에코한다. 선언 길이 5.
pub fn encode_ack(protocol: u8, serial: u16) -> Bytes {
    encode_frame(protocol, &[], serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PROTO_HEARTBEAT, PROTO_LOGIN};

    #[test]
    fn test_ack_roundtrip() {
        for &(protocol, serial) in &[
            (PROTO_LOGIN, 0x0001u16),
            (PROTO_HEARTBEAT, 0xFFFF),
            (0x00, 0x0000),
            (0xFF, 0xABCD),
        ] {
            let bytes = encode_ack(protocol, serial);
            let frame = Frame::decode(&bytes).unwrap();

            assert_eq!(frame.marker, MarkerKind::Standard);
            assert_eq!(frame.protocol, protocol);
            assert_eq!(frame.serial, serial);
            assert_eq!(frame.declared_len(), 5);
            assert!(frame.payload.is_empty());
        }
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF];
        let bytes = encode_frame(PROTO_LOGIN, &payload, 0x0042);
        let frame = Frame::decode(&bytes).unwrap();

        assert_eq!(frame.payload.as_ref(), &payload);
        assert_eq!(frame.serial, 0x0042);
    }

    #[test]
    fn test_extended_marker_roundtrip() {
        // 선언 길이 > 255 → 확장 마커
        let payload = vec![0x5A; 300];
        let bytes = encode_frame(0x22, &payload, 0x0100);
        assert_eq!(bytes[..2], crate::START_MARKER_EXT);

        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.marker, MarkerKind::Extended);
        assert_eq!(frame.payload.len(), 300);
        assert_eq!(frame.serial, 0x0100);
    }

    #[test]
    fn test_corrupted_byte_rejected() {
        let bytes = encode_frame(PROTO_LOGIN, &[0x11, 0x22], 0x0007);

        // 체크섬 범위 내 (길이 필드 ~ 시리얼) 모든 바이트 손상 시도
        for i in 2..bytes.len() - 4 {
            let mut corrupted = bytes.to_vec();
            corrupted[i] ^= 0x01;
            match Frame::decode(&corrupted) {
                Err(Error::ChecksumMismatch { .. }) | Err(Error::LengthMismatch { .. }) => {}
                other => panic!("byte {} corruption accepted: {:?}", i, other),
            }
        }
    }

    #[test]
    fn test_invalid_markers() {
        let mut bytes = encode_ack(PROTO_LOGIN, 1).to_vec();
        bytes[0] = 0x70;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(Error::InvalidStartMarker { .. })
        ));

        let mut bytes = encode_ack(PROTO_LOGIN, 1).to_vec();
        let n = bytes.len();
        bytes[n - 1] = 0x00;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(Error::InvalidStopMarker { .. })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let mut bytes = encode_ack(PROTO_LOGIN, 1).to_vec();
        // 선언 길이를 부풀림
        bytes[2] = 0x09;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(Error::LengthMismatch { declared: 9, .. })
        ));
    }
}
