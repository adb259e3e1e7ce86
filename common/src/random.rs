use num_bigint::BigUint;
use num_traits::Zero;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// Uniform sample in `[0, bound)` by rejection over the bit length of `bound`.
pub fn random_below<R>(rng: &mut R, bound: &BigUint) -> BigUint
where
    R: CryptoRng + RngCore,
{
    assert!(!bound.is_zero(), "empty sampling range");

    let bits = bound.bits();
    let mut buf = vec![0u8; bits.div_ceil(8) as usize];
    let excess = (buf.len() as u64 * 8 - bits) as u32;

    loop {
        rng.fill_bytes(&mut buf);
        buf[0] &= 0xffu8 >> excess;

        let candidate = BigUint::from_bytes_be(&buf);
        if &candidate < bound {
            buf.zeroize();
            return candidate;
        }
    }
}

/// Fresh context nonce for binding a ballot's proofs.
pub fn random_nonce<R>(rng: &mut R) -> [u8; 32]
where
    R: CryptoRng + RngCore,
{
    let mut nonce = [0u8; 32];
    rng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn samples_respect_odd_bounds() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for bound in [1u32, 2, 3, 255, 256, 257, 65_537] {
            let bound = BigUint::from(bound);
            for _ in 0..64 {
                assert!(random_below(&mut rng, &bound) < bound);
            }
        }
    }

    #[test]
    fn nonces_differ() {
        let mut rng = rand::rng();
        assert_ne!(random_nonce(&mut rng), random_nonce(&mut rng));
    }
}
