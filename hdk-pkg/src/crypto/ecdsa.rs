//! ECDSA-SHA1 verification over 160-bit short Weierstrass curves.
//!
//! The package and NPD signatures use a curve that no off-the-shelf curve
//! crate ships, so the arithmetic is done directly on `crypto_bigint`
//! runtime-modulus residues. Points are affine with `None` standing for the
//! point at infinity. Everything here is public data (verification only),
//! so nothing tries to be constant-time.

use crypto_bigint::modular::runtime_mod::{DynResidue, DynResidueParams};
use crypto_bigint::{Encoding, U192};

const LIMBS: usize = U192::LIMBS;

type Fe = DynResidue<LIMBS>;

/// Big-endian affine point with 20-byte coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurvePoint {
    pub x: [u8; 20],
    pub y: [u8; 20],
}

/// Curve `y^2 = x^3 + ax + b` over `GF(p)` with base point `g` of order `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveParams {
    pub p: [u8; 20],
    pub a: [u8; 20],
    pub b: [u8; 20],
    pub n: [u8; 20],
    pub g: CurvePoint,
}

/// Widen a 160-bit big-endian value into a `U192`.
fn uint_from_be20(bytes: &[u8; 20]) -> U192 {
    let mut wide = [0u8; 24];
    wide[4..].copy_from_slice(bytes);
    U192::from_be_bytes(wide)
}

fn uint_to_be20(value: &U192) -> [u8; 20] {
    let wide = value.to_be_bytes();
    let mut out = [0u8; 20];
    out.copy_from_slice(&wide[4..]);
    out
}

#[derive(Clone, Copy)]
struct Affine {
    x: Fe,
    y: Fe,
}

/// Field context derived from [`CurveParams`].
struct Curve {
    fp: DynResidueParams<LIMBS>,
    fn_: DynResidueParams<LIMBS>,
    p: U192,
    n: U192,
    a: Fe,
    b: Fe,
    g: Affine,
}

impl Curve {
    fn new(params: &CurveParams) -> Self {
        let p = uint_from_be20(&params.p);
        let n = uint_from_be20(&params.n);
        let fp = DynResidueParams::new(&p);
        let fn_ = DynResidueParams::new(&n);

        Self {
            fp,
            fn_,
            p,
            n,
            a: DynResidue::new(&uint_from_be20(&params.a), fp),
            b: DynResidue::new(&uint_from_be20(&params.b), fp),
            g: Affine {
                x: DynResidue::new(&uint_from_be20(&params.g.x), fp),
                y: DynResidue::new(&uint_from_be20(&params.g.y), fp),
            },
        }
    }

    fn point(&self, point: &CurvePoint) -> Affine {
        Affine {
            x: DynResidue::new(&uint_from_be20(&point.x), self.fp),
            y: DynResidue::new(&uint_from_be20(&point.y), self.fp),
        }
    }

    /// Inverse in `GF(p)` via Fermat; `value` must be non-zero.
    fn invert(&self, value: &Fe) -> Fe {
        value.pow(&self.p.wrapping_sub(&U192::from_u8(2)))
    }

    fn contains(&self, pt: &Affine) -> bool {
        let lhs = pt.y * pt.y;
        let rhs = pt.x * pt.x * pt.x + self.a * pt.x + self.b;
        lhs.retrieve() == rhs.retrieve()
    }

    fn double(&self, pt: Option<Affine>) -> Option<Affine> {
        let pt = pt?;
        if pt.y.retrieve() == U192::ZERO {
            return None;
        }

        let two = DynResidue::new(&U192::from_u8(2), self.fp);
        let three = DynResidue::new(&U192::from_u8(3), self.fp);

        let lambda = (three * pt.x * pt.x + self.a) * self.invert(&(two * pt.y));
        let x = lambda * lambda - pt.x - pt.x;
        let y = lambda * (pt.x - x) - pt.y;
        Some(Affine { x, y })
    }

    fn add(&self, lhs: Option<Affine>, rhs: Option<Affine>) -> Option<Affine> {
        let (l, r) = match (lhs, rhs) {
            (None, other) | (other, None) => return other,
            (Some(l), Some(r)) => (l, r),
        };

        if l.x.retrieve() == r.x.retrieve() {
            return if l.y.retrieve() == r.y.retrieve() {
                self.double(Some(l))
            } else {
                None
            };
        }

        let lambda = (r.y - l.y) * self.invert(&(r.x - l.x));
        let x = lambda * lambda - l.x - r.x;
        let y = lambda * (l.x - x) - l.y;
        Some(Affine { x, y })
    }

    /// Double-and-add, most significant bit first.
    fn mul(&self, scalar: &U192, pt: Affine) -> Option<Affine> {
        let mut acc = None;
        for byte in scalar.to_be_bytes() {
            for bit in (0..8).rev() {
                acc = self.double(acc);
                if (byte >> bit) & 1 == 1 {
                    acc = self.add(acc, Some(pt));
                }
            }
        }
        acc
    }

    /// Scalar in `[1, n)`.
    fn is_valid_scalar(&self, value: &U192) -> bool {
        *value != U192::ZERO && *value < self.n
    }
}

/// Check that `point` satisfies the curve equation.
pub fn is_on_curve(params: &CurveParams, point: &CurvePoint) -> bool {
    let curve = Curve::new(params);
    let p = curve.point(point);
    uint_from_be20(&point.x) < curve.p && uint_from_be20(&point.y) < curve.p && curve.contains(&p)
}

/// Verify an ECDSA signature `r ‖ s` over a precomputed SHA-1 `hash`.
///
/// Any malformed input (out-of-range scalars, a public key off the curve)
/// yields `false`.
pub fn ecdsa_verify(
    params: &CurveParams,
    public_key: &CurvePoint,
    hash: &[u8; 20],
    signature: &[u8; 40],
) -> bool {
    let curve = Curve::new(params);

    let mut r_bytes = [0u8; 20];
    let mut s_bytes = [0u8; 20];
    r_bytes.copy_from_slice(&signature[..20]);
    s_bytes.copy_from_slice(&signature[20..]);
    let r = uint_from_be20(&r_bytes);
    let s = uint_from_be20(&s_bytes);

    if !curve.is_valid_scalar(&r) || !curve.is_valid_scalar(&s) {
        return false;
    }
    if !is_on_curve(params, public_key) {
        return false;
    }

    let e = DynResidue::new(&uint_from_be20(hash), curve.fn_);
    let s = DynResidue::new(&s, curve.fn_);
    let w = s.pow(&curve.n.wrapping_sub(&U192::from_u8(2)));

    let u1 = (e * w).retrieve();
    let u2 = (DynResidue::new(&r, curve.fn_) * w).retrieve();

    let q = curve.point(public_key);
    let point = curve.add(curve.mul(&u1, curve.g), curve.mul(&u2, q));

    match point {
        Some(pt) => DynResidue::new(&pt.x.retrieve(), curve.fn_).retrieve() == r,
        None => false,
    }
}

/// Derive the public point `d * G`.
pub fn public_key_for(params: &CurveParams, private_key: &[u8; 20]) -> Option<CurvePoint> {
    let curve = Curve::new(params);
    let d = uint_from_be20(private_key);
    if !curve.is_valid_scalar(&d) {
        return None;
    }

    let pt = curve.mul(&d, curve.g)?;
    Some(CurvePoint {
        x: uint_to_be20(&pt.x.retrieve()),
        y: uint_to_be20(&pt.y.retrieve()),
    })
}

/// Sign a precomputed hash with an explicit nonce. Test helper only; the
/// format's real signing key is not available.
#[cfg(test)]
pub(crate) fn ecdsa_sign_with_nonce(
    params: &CurveParams,
    private_key: &[u8; 20],
    hash: &[u8; 20],
    nonce: &[u8; 20],
) -> Option<[u8; 40]> {
    let curve = Curve::new(params);
    let k = uint_from_be20(nonce);
    if !curve.is_valid_scalar(&k) {
        return None;
    }

    let point = curve.mul(&k, curve.g)?;
    let r = DynResidue::new(&point.x.retrieve(), curve.fn_);
    let e = DynResidue::new(&uint_from_be20(hash), curve.fn_);
    let d = DynResidue::new(&uint_from_be20(private_key), curve.fn_);
    let k = DynResidue::new(&k, curve.fn_);
    let k_inv = k.pow(&curve.n.wrapping_sub(&U192::from_u8(2)));
    let s = k_inv * (e + r * d);

    let (r, s) = (r.retrieve(), s.retrieve());
    if r == U192::ZERO || s == U192::ZERO {
        return None;
    }

    let mut out = [0u8; 40];
    out[..20].copy_from_slice(&uint_to_be20(&r));
    out[20..].copy_from_slice(&uint_to_be20(&s));
    Some(out)
}
