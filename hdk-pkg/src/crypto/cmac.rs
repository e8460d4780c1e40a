//! AES-128-CMAC (RFC 4493).

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

/// Compute the AES-128-CMAC of `data` under `key`.
pub fn aes_cmac(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());

    let mut l = Block::default();
    cipher.encrypt_block(&mut l);
    let k1 = double_block(&l.into());
    let k2 = double_block(&k1);

    // The empty message is treated as one incomplete block.
    let block_count = data.len().div_ceil(16).max(1);
    let last_complete = !data.is_empty() && data.len() % 16 == 0;

    let mut x = Block::default();
    for chunk in data.chunks(16).take(block_count - 1) {
        xor_into(&mut x, chunk);
        cipher.encrypt_block(&mut x);
    }

    let tail = &data[(block_count - 1) * 16..];
    let mut last = [0u8; 16];
    last[..tail.len()].copy_from_slice(tail);
    if last_complete {
        for (b, k) in last.iter_mut().zip(k1.iter()) {
            *b ^= k;
        }
    } else {
        last[tail.len()] = 0x80;
        for (b, k) in last.iter_mut().zip(k2.iter()) {
            *b ^= k;
        }
    }

    xor_into(&mut x, &last);
    cipher.encrypt_block(&mut x);
    x.into()
}

/// Subkey derivation: shift left by one bit, reduce with `Rb = 0x87`.
fn double_block(block: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..15 {
        out[i] = (block[i] << 1) | (block[i + 1] >> 7);
    }
    out[15] = block[15] << 1;
    if block[0] & 0x80 != 0 {
        out[15] ^= 0x87;
    }
    out
}

fn xor_into(acc: &mut Block, data: &[u8]) {
    for (a, b) in acc.iter_mut().zip(data) {
        *a ^= b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_KEY: [u8; 16] = [
        0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F,
        0x3C,
    ];

    const RFC_MESSAGE: [u8; 64] = [
        0x6B, 0xC1, 0xBE, 0xE2, 0x2E, 0x40, 0x9F, 0x96, 0xE9, 0x3D, 0x7E, 0x11, 0x73, 0x93, 0x17,
        0x2A, 0xAE, 0x2D, 0x8A, 0x57, 0x1E, 0x03, 0xAC, 0x9C, 0x9E, 0xB7, 0x6F, 0xAC, 0x45, 0xAF,
        0x8E, 0x51, 0x30, 0xC8, 0x1C, 0x46, 0xA3, 0x5C, 0xE4, 0x11, 0xE5, 0xFB, 0xC1, 0x19, 0x1A,
        0x0A, 0x52, 0xEF, 0xF6, 0x9F, 0x24, 0x45, 0xDF, 0x4F, 0x9B, 0x17, 0xAD, 0x2B, 0x41, 0x7B,
        0xE6, 0x6C, 0x37, 0x10,
    ];

    #[test]
    fn rfc4493_empty_message() {
        let expected = [
            0xBB, 0x1D, 0x69, 0x29, 0xE9, 0x59, 0x37, 0x28, 0x7F, 0xA3, 0x7D, 0x12, 0x9B, 0x75,
            0x67, 0x46,
        ];
        assert_eq!(aes_cmac(&RFC_KEY, &[]), expected);
    }

    #[test]
    fn rfc4493_one_block() {
        let expected = [
            0x07, 0x0A, 0x16, 0xB4, 0x6B, 0x4D, 0x41, 0x44, 0xF7, 0x9B, 0xDD, 0x9D, 0xD0, 0x4A,
            0x28, 0x7C,
        ];
        assert_eq!(aes_cmac(&RFC_KEY, &RFC_MESSAGE[..16]), expected);
    }

    #[test]
    fn rfc4493_partial_last_block() {
        let expected = [
            0xDF, 0xA6, 0x67, 0x47, 0xDE, 0x9A, 0xE6, 0x30, 0x30, 0xCA, 0x32, 0x61, 0x14, 0x97,
            0xC8, 0x27,
        ];
        assert_eq!(aes_cmac(&RFC_KEY, &RFC_MESSAGE[..40]), expected);
    }

    #[test]
    fn rfc4493_four_blocks() {
        let expected = [
            0x51, 0xF0, 0xBE, 0xBF, 0x7E, 0x3B, 0x9D, 0x92, 0xFC, 0x49, 0x74, 0x17, 0x79, 0x36,
            0x3C, 0xFE,
        ];
        assert_eq!(aes_cmac(&RFC_KEY, &RFC_MESSAGE), expected);
    }
}
