//! Fiat-Shamir helpers over a BLAKE3 transcript.
//!
//! Every value is absorbed with a length prefix so that adjacent fields
//! cannot be re-split into a different transcript with the same bytes.

use blake3::Hasher;
use num_bigint::BigUint;
use zeroize::Zeroize;

pub fn absorb_bytes(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

pub fn absorb(hasher: &mut Hasher, value: &BigUint) {
    absorb_bytes(hasher, &value.to_bytes_be());
}

pub fn absorb_all<'a, I>(hasher: &mut Hasher, values: I)
where
    I: IntoIterator<Item = &'a BigUint>,
{
    for value in values {
        absorb(hasher, value);
    }
}

/// Squeezes 64 bytes out of the transcript and reduces them mod `modulus`.
/// The hasher is reset and the buffer wiped afterwards.
pub fn challenge(hasher: &mut Hasher, buf: &mut [u8; 64], modulus: &BigUint) -> BigUint {
    hasher.finalize_xof().fill(buf);

    let c = BigUint::from_bytes_le(buf) % modulus;

    hasher.reset();
    buf.zeroize();

    c
}
