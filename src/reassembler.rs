//! 스트림 재조립기
//!
//! 연결별로 미소비 바이트를 누적하고 완성된 프레임 슬라이스를 잘라낸다.
//! TCP는 프레임 경계를 보존하지 않으므로 한 번의 read에 프레임 일부만
//! 오거나 여러 프레임이 한꺼번에 올 수 있다.
//!
//! 보장: 같은 논리 스트림을 어떤 단위로 쪼개 넣어도 방출되는 프레임
//! 순서열은 전체를 한 번에 넣은 것과 동일하다.

use bytes::{Buf, Bytes, BytesMut};

use crate::{Error, Result};
use crate::{MIN_DECLARED_LEN, STOP_MARKER};

/// feed 한 번의 결과
#[derive(Debug)]
pub struct FeedResult {
    /// 완성된 프레임 슬라이스 (마커 포함, 도착 순서)
    pub frames: Vec<Bytes>,

    /// 재동기화 횟수 (프레이밍 이상 감지)
    pub anomalies: usize,
}

/// 연결별 재조립기
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    cap: usize,
    max_declared_len: usize,
}

impl Reassembler {
    pub fn new(cap: usize, max_declared_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            cap,
            max_declared_len,
        }
    }

    /// 현재 버퍼에 남은 바이트 수
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 바이트 추가 후 완성 프레임 추출
    ///
    /// 선언 길이보다 버퍼가 짧은 프레임은 에러가 아니라 대기 상태다.
    /// 버퍼 상한 초과만 에러이며 이때 연결은 종료 대상이다.
    pub fn feed(&mut self, data: &[u8]) -> Result<FeedResult> {
        if self.buf.len() + data.len() > self.cap {
            return Err(Error::BufferOverflow { cap: self.cap });
        }
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        let mut anomalies = 0;

        loop {
            // 1. 버퍼 머리를 시작 마커에 동기화
            match find_start_marker(&self.buf) {
                Some(0) => {}
                Some(pos) => {
                    self.buf.advance(pos);
                    anomalies += 1;
                }
                None => {
                    // 마커 없음. 다음 feed에서 마커가 완성될 수 있으므로
                    // 끝의 마커 후보 바이트 하나만 남기고 버린다.
                    let keep = match self.buf.last() {
                        Some(&b) if b == 0x78 || b == 0x79 => 1,
                        _ => 0,
                    };
                    if self.buf.len() > keep {
                        let drop = self.buf.len() - keep;
                        self.buf.advance(drop);
                        anomalies += 1;
                    }
                    break;
                }
            }

            // 2. 길이 필드 읽기 (확장 마커는 2바이트)
            let lf = if self.buf[0] == 0x78 { 1 } else { 2 };
            if self.buf.len() < 2 + lf {
                break;
            }
            let declared = if lf == 1 {
                self.buf[2] as usize
            } else {
                u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize
            };

            if declared < MIN_DECLARED_LEN || declared > self.max_declared_len {
                // 손상된 길이. 마커를 버리고 다음 마커를 재탐색한다.
                self.buf.advance(2);
                anomalies += 1;
                continue;
            }

            let total = 2 + lf + declared + 2;
            if self.buf.len() < total {
                // 부분 프레임, 대기
                break;
            }

            // 3. 예측 위치에 종료 마커가 있는지 확인
            if self.buf[total - 2..total] != STOP_MARKER {
                self.buf.advance(2);
                anomalies += 1;
                continue;
            }

            // 4. 프레임 방출
            frames.push(self.buf.split_to(total).freeze());
        }

        Ok(FeedResult { frames, anomalies })
    }
}

/// 버퍼에서 첫 시작 마커 위치 탐색
fn find_start_marker(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    (0..buf.len() - 1)
        .find(|&i| (buf[i] == 0x78 && buf[i + 1] == 0x78) || (buf[i] == 0x79 && buf[i + 1] == 0x79))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_ack, encode_frame};
    use crate::{PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN};

    fn sample_stream() -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_frame(PROTO_LOGIN, &[0x11; 8], 1));
        stream.extend_from_slice(&encode_ack(PROTO_HEARTBEAT, 2));
        stream.extend_from_slice(&encode_frame(PROTO_LOCATION, &[0x22; 18], 3));
        // 확장 마커 프레임
        stream.extend_from_slice(&encode_frame(0x2C, &vec![0x33; 280], 4));
        stream
    }

    fn collect_all(chunk_size: usize, stream: &[u8]) -> Vec<Bytes> {
        let mut r = Reassembler::new(64 * 1024, 1024);
        let mut frames = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            frames.extend(r.feed(chunk).unwrap().frames);
        }
        frames
    }

    #[test]
    fn test_deterministic_under_chunking() {
        let stream = sample_stream();
        let whole = collect_all(stream.len(), &stream);
        assert_eq!(whole.len(), 4);

        for chunk_size in [1, 2, 3, 5, 7, 11, 16, 64] {
            let chunked = collect_all(chunk_size, &stream);
            assert_eq!(chunked, whole, "chunk_size={}", chunk_size);
        }
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = encode_ack(PROTO_LOGIN, 0x1234);
        let mut r = Reassembler::new(1024, 1024);

        let out = r.feed(&frame[..4]).unwrap();
        assert!(out.frames.is_empty());
        assert_eq!(out.anomalies, 0);
        assert_eq!(r.buffered(), 4);

        let out = r.feed(&frame[4..]).unwrap();
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0], frame);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn test_garbage_prefix_resync() {
        let frame = encode_ack(PROTO_LOGIN, 7);
        let mut stream = vec![0x00, 0xFF, 0x13, 0x78, 0x9A];
        stream.extend_from_slice(&frame);

        let mut r = Reassembler::new(1024, 1024);
        let out = r.feed(&stream).unwrap();
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0], frame);
        assert!(out.anomalies >= 1);
    }

    #[test]
    fn test_stop_marker_mismatch_resyncs_forward() {
        // 종료 마커가 깨진 프레임 뒤에 정상 프레임
        let mut bad = encode_ack(PROTO_LOGIN, 1).to_vec();
        let n = bad.len();
        bad[n - 2] = 0x00;
        bad[n - 1] = 0x00;
        let good = encode_ack(PROTO_HEARTBEAT, 2);

        let mut stream = bad;
        stream.extend_from_slice(&good);

        let mut r = Reassembler::new(1024, 1024);
        let out = r.feed(&stream).unwrap();
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0], good);
        assert!(out.anomalies >= 1);
    }

    #[test]
    fn test_insane_declared_length_resyncs() {
        // 확장 마커 + 선언 길이 0xFFFF
        let mut stream = vec![0x79, 0x79, 0xFF, 0xFF];
        let good = encode_ack(PROTO_LOGIN, 9);
        stream.extend_from_slice(&good);

        let mut r = Reassembler::new(1024, 1024);
        let out = r.feed(&stream).unwrap();
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0], good);
        assert!(out.anomalies >= 1);
    }

    #[test]
    fn test_marker_split_across_feeds() {
        let frame = encode_ack(PROTO_LOGIN, 5);
        let mut r = Reassembler::new(1024, 1024);

        // 쓰레기 + 마커 첫 바이트까지만
        let _ = r.feed(&[0xAA, 0xBB, frame[0]]).unwrap();
        let out = r.feed(&frame[1..]).unwrap();
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0], frame);
    }

    #[test]
    fn test_buffer_overflow() {
        let mut r = Reassembler::new(16, 1024);
        let err = r.feed(&[0x78; 32]).unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { cap: 16 }));
    }
}
