//! 프레임 무결성 체크섬 (CRC-16/X.25)
//!
//! GT06 계열 펌웨어가 쓰는 CRC-ITU 변형:
//! 반전 다항식 0x1021, 초기값 0xFFFF, 최종 XOR 0xFFFF.
//! 계산 범위는 길이 필드부터 시리얼 번호까지 (마커와 체크섬 제외).

use crc::{Crc, CRC_16_IBM_SDLC};

/// CRC-16/X.25 == CRC-16/IBM-SDLC
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// 체크섬 계산
pub fn compute(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// 체크섬 검증
pub fn verify(bytes: &[u8], expected: u16) -> bool {
    compute(bytes) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-16/X.25 표준 검증 벡터
        assert_eq!(compute(b"123456789"), 0x906E);
    }

    #[test]
    fn test_empty_input() {
        // init 0xFFFF xor 0xFFFF
        assert_eq!(compute(&[]), 0x0000);
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let original = [0x05, 0x01, 0x00, 0x01];
        let crc = compute(&original);

        for i in 0..original.len() {
            for bit in 0..8 {
                let mut corrupted = original;
                corrupted[i] ^= 1 << bit;
                assert!(
                    !verify(&corrupted, crc),
                    "corruption at byte {} bit {} not detected",
                    i,
                    bit
                );
            }
        }
    }
}
