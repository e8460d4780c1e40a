//! Format-wide key material.
//!
//! Every constant the PKG and NPD codecs need lives in one read-only
//! [`PkgKeys`] table. Components take it by reference, so tests and tools
//! can inject their own table without touching global state.

use crate::crypto::ecdsa::{CurveParams, CurvePoint};

/// Read-only key table shared by the cipher, digest and NPD components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkgKeys {
    /// AES-128 key for the body cipher and the digest CMAC.
    pub pkg_aes: [u8; 16],
    /// CMAC key for the NPD content-ID hash (content ID ‖ filename).
    pub npdrm_content_hash: [u8; 16],
    /// XORed with a klicensee to form the NPD header-hash CMAC key.
    pub npdrm_header_hash_xor: [u8; 16],
    /// Klicensee shared by every DRM-free title.
    pub npdrm_free_klicensee: [u8; 16],
    /// Curve used by package and NPD signatures.
    pub curve: CurveParams,
    /// Public key that signs retail package digests.
    pub npdrm_public_key: CurvePoint,
}

/// Inverted VSH curve 2.
pub const VSH_CURVE2_INV: CurveParams = CurveParams {
    p: [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF,
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    ],
    a: [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF,
        0xFF, 0xFF, 0xFF, 0xFF, 0xFC,
    ],
    b: [
        0xA6, 0x8B, 0xED, 0xC3, 0x34, 0x18, 0x02, 0x9C, 0x1D, 0x3C, 0xE3, 0x3B, 0x9A, 0x32, 0x1F,
        0xCC, 0xBB, 0x9E, 0x0F, 0x0B,
    ],
    n: [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xB5, 0xAE, 0x3C, 0x52, 0x3E,
        0x63, 0x94, 0x4F, 0x21, 0x27,
    ],
    g: CurvePoint {
        x: [
            0x12, 0x8E, 0xC4, 0x25, 0x64, 0x87, 0xFD, 0x8F, 0xDF, 0x64, 0xE2, 0x43, 0x7B, 0xC0,
            0xA1, 0xF6, 0xD5, 0xAF, 0xDE, 0x2C,
        ],
        y: [
            0x59, 0x58, 0x55, 0x7E, 0xB1, 0xDB, 0x00, 0x12, 0x60, 0x42, 0x55, 0x24, 0xDB, 0xC3,
            0x79, 0xD5, 0xAC, 0x5F, 0x4A, 0xDF,
        ],
    },
};

/// Key table for retail PS3 packages.
pub const RETAIL_KEYS: PkgKeys = PkgKeys {
    pkg_aes: [
        0x2E, 0x7B, 0x71, 0xD7, 0xC9, 0xC9, 0xA1, 0x4E, 0xA3, 0x22, 0x1F, 0x18, 0x88, 0x28, 0xB8,
        0xF8,
    ],
    npdrm_content_hash: [
        0x9B, 0x51, 0x5F, 0xEA, 0xCF, 0x75, 0x06, 0x49, 0x81, 0xAA, 0x60, 0x4D, 0x91, 0xA5, 0x4E,
        0x97,
    ],
    npdrm_header_hash_xor: [
        0x6B, 0xA5, 0x29, 0x76, 0xEF, 0xDA, 0x16, 0xEF, 0x3C, 0x33, 0x9F, 0xB2, 0x97, 0x1E, 0x25,
        0x6B,
    ],
    npdrm_free_klicensee: [
        0x72, 0xF9, 0x90, 0x78, 0x8F, 0x9C, 0xFF, 0x74, 0x57, 0x25, 0xF0, 0x8E, 0x4C, 0x12, 0x83,
        0x87,
    ],
    curve: VSH_CURVE2_INV,
    npdrm_public_key: CurvePoint {
        x: [
            0xE6, 0x79, 0x2E, 0x44, 0x6C, 0xEB, 0xA2, 0x7B, 0xCA, 0xDF, 0x37, 0x4B, 0x99, 0x50,
            0x4F, 0xD8, 0xE8, 0x0A, 0xDF, 0xEB,
        ],
        y: [
            0x3E, 0x66, 0xDE, 0x73, 0xFF, 0xE5, 0x8D, 0x32, 0x91, 0x22, 0x1C, 0x65, 0x01, 0x8C,
            0x03, 0x8D, 0x38, 0x22, 0xC3, 0xC9,
        ],
    },
};

impl Default for PkgKeys {
    fn default() -> Self {
        RETAIL_KEYS
    }
}
