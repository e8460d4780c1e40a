//! The 0x40-byte digest envelope that follows the header and the metadata.
//!
//! ```text
//! 0x00  [u8;16]  AES-CMAC(pkg key, data)
//! 0x10  [u8;40]  ECDSA signature r ‖ s over SHA-1(data)
//! 0x38  [u8;8]   SHA-1(data)[12..20]
//! ```
//!
//! Generated envelopes carry a fixed filler in place of the signature, so
//! only the CMAC and the hash tail ever check out for packages built here.

use crate::crypto::{aes_cmac, ecdsa_verify, sha1};
use crate::keys::PkgKeys;
use crate::pkg::structs::PKG_DIGEST_SIZE;

/// Stands in for the vendor signature in generated envelopes.
pub const FILLER_SIGNATURE: &[u8; 40] = b"hdk-pkg unsigned digest: no vendor key!!";

/// Outcome of checking one digest envelope. The three checks are
/// independent; none of them aborts parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigestCheck {
    pub cmac_valid: bool,
    pub signature_valid: bool,
    pub sha1_valid: bool,
}

impl DigestCheck {
    /// The data matches what the envelope was generated over.
    pub const fn is_intact(&self) -> bool {
        self.cmac_valid && self.sha1_valid
    }

    /// The envelope carries a genuine vendor signature.
    pub const fn is_vendor_signed(&self) -> bool {
        self.signature_valid
    }
}

/// Build the envelope for `data`.
pub fn generate_digest(keys: &PkgKeys, data: &[u8]) -> [u8; PKG_DIGEST_SIZE] {
    let cmac = aes_cmac(&keys.pkg_aes, data);
    let hash = sha1(data);

    let mut out = [0u8; PKG_DIGEST_SIZE];
    out[0x00..0x10].copy_from_slice(&cmac);
    out[0x10..0x38].copy_from_slice(FILLER_SIGNATURE);
    out[0x38..0x40].copy_from_slice(&hash[12..20]);
    out
}

/// Check `digest` against `data`.
pub fn validate_digest(keys: &PkgKeys, data: &[u8], digest: &[u8; PKG_DIGEST_SIZE]) -> DigestCheck {
    let cmac = aes_cmac(&keys.pkg_aes, data);
    let hash = sha1(data);

    let mut signature = [0u8; 40];
    signature.copy_from_slice(&digest[0x10..0x38]);

    DigestCheck {
        cmac_valid: digest[0x00..0x10] == cmac,
        signature_valid: ecdsa_verify(&keys.curve, &keys.npdrm_public_key, &hash, &signature),
        sha1_valid: digest[0x38..0x40] == hash[12..20],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ecdsa::{ecdsa_sign_with_nonce, public_key_for};
    use crate::keys::RETAIL_KEYS;

    #[test]
    fn generated_digest_validates_except_signature() {
        let data = b"\x7FPKG header bytes go here";
        let digest = generate_digest(&RETAIL_KEYS, data);
        let check = validate_digest(&RETAIL_KEYS, data, &digest);

        assert!(check.cmac_valid);
        assert!(check.sha1_valid);
        assert!(!check.signature_valid);
        assert!(check.is_intact());
        assert!(!check.is_vendor_signed());
        assert_eq!(&digest[0x10..0x38], FILLER_SIGNATURE);
    }

    #[test]
    fn checks_fail_independently() {
        let data = vec![0x5Au8; 0x80];
        let digest = generate_digest(&RETAIL_KEYS, &data);

        let mut bad_cmac = digest;
        bad_cmac[3] ^= 1;
        let check = validate_digest(&RETAIL_KEYS, &data, &bad_cmac);
        assert!(!check.cmac_valid);
        assert!(check.sha1_valid);

        let mut bad_tail = digest;
        bad_tail[0x3F] ^= 1;
        let check = validate_digest(&RETAIL_KEYS, &data, &bad_tail);
        assert!(check.cmac_valid);
        assert!(!check.sha1_valid);

        let mut changed = data.clone();
        changed[0x10] = 0;
        let check = validate_digest(&RETAIL_KEYS, &changed, &digest);
        assert_eq!(check, DigestCheck::default());
    }

    #[test]
    fn signature_check_uses_injected_public_key() {
        let private = [0x11u8; 20];
        let keys = PkgKeys {
            npdrm_public_key: public_key_for(&RETAIL_KEYS.curve, &private).unwrap(),
            ..RETAIL_KEYS
        };

        let data = b"metadata entries";
        let mut digest = generate_digest(&keys, data);
        let sig = ecdsa_sign_with_nonce(&keys.curve, &private, &sha1(data), &[0x22u8; 20]).unwrap();
        digest[0x10..0x38].copy_from_slice(&sig);

        let check = validate_digest(&keys, data, &digest);
        assert!(check.is_intact());
        assert!(check.is_vendor_signed());
    }
}
