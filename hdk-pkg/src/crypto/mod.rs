//! Cryptographic primitives used by the package codec.

pub mod cmac;
pub mod ctr;
pub mod ecdsa;
pub mod hash;

pub use cmac::aes_cmac;
pub use self::ctr::CtrStream;
pub use ecdsa::{CurveParams, CurvePoint, ecdsa_verify};
pub use hash::{Sha1Writer, sha1};
