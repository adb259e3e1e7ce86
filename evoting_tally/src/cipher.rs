use common::{
    error::{
        Error,
        ErrorKind::{Malformed, SearchSpaceExhausted},
    },
    group::GroupParameters,
};
use num_bigint::BigUint;
use num_traits::One;
use rayon::prelude::*;
use threshold::keys::{
    CombinedPrivateKey, PartialDecryption, PrivateKeyShare, PublicKey,
    combine_partial_decryptions,
};

/// Exponential ElGamal ciphertext `(G, H) = (g^r, h^r g^m)`.
#[allow(non_snake_case)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    pub(crate) G: BigUint,
    pub(crate) H: BigUint,
}

#[allow(non_snake_case)]
impl Ciphertext {
    pub fn from_parts(G: BigUint, H: BigUint) -> Self {
        Self { G, H }
    }

    /// The encryption of 0 under randomness 0, the neutral element of [`Ciphertext::combine`].
    pub fn identity() -> Self {
        Self {
            G: BigUint::one(),
            H: BigUint::one(),
        }
    }

    pub fn G(&self) -> &BigUint {
        &self.G
    }

    pub fn H(&self) -> &BigUint {
        &self.H
    }

    pub fn is_well_formed(&self, group: &GroupParameters) -> bool {
        group.is_member(&self.G) && group.is_member(&self.H)
    }

    /// Component-wise product; the plaintexts add.
    pub fn combine(&self, other: &Self, group: &GroupParameters) -> Self {
        Self {
            G: group.mul(&self.G, &other.G),
            H: group.mul(&self.H, &other.H),
        }
    }

    /// Same plaintext, randomness shifted by `r`.
    pub fn re_randomize(&self, pk: &PublicKey, r: &BigUint) -> Self {
        self.combine(&encrypt(pk, 0, r), pk.group())
    }
}

pub fn encrypt(pk: &PublicKey, m: u64, r: &BigUint) -> Ciphertext {
    let group = pk.group();

    Ciphertext {
        G: group.pow_g(r),
        H: group.mul(
            &group.pow(pk.h(), r),
            &group.pow_g(&BigUint::from(m)),
        ),
    }
}

pub fn combine_all<'a, I>(group: &GroupParameters, ciphertexts: I) -> Ciphertext
where
    I: IntoParallelIterator<Item = &'a Ciphertext>,
{
    ciphertexts
        .into_par_iter()
        .cloned()
        .reduce(Ciphertext::identity, |a, b| a.combine(&b, group))
}

/// Bounded discrete-log decryption: finds `m` in `0..=bound` with `g^m == H / G^x`.
pub fn decrypt(key: &CombinedPrivateKey, ciphertext: &Ciphertext, bound: u64) -> Result<u64, Error> {
    let group = key.group();
    if !ciphertext.is_well_formed(group) {
        return Err(Malformed("ciphertext outside the order-q subgroup".into()).into());
    }

    search(group, &group.div(&ciphertext.H, &key.unmask(&ciphertext.G)), bound)
}

/// Authority `share`'s contribution `G^{X_j}` to a threshold decryption of
/// `ciphertext`.
pub fn partial_decrypt(
    share: &PrivateKeyShare,
    ciphertext: &Ciphertext,
) -> Result<PartialDecryption, Error> {
    if !ciphertext.is_well_formed(share.group()) {
        return Err(Malformed("ciphertext outside the order-q subgroup".into()).into());
    }

    Ok(share.partial_unmask(&ciphertext.G))
}

/// Threshold decryption: `G^x` is interpolated from the partial decryptions,
/// then searched like [`decrypt`]. The election key is never rebuilt.
pub fn decrypt_with_partials(
    group: &GroupParameters,
    ciphertext: &Ciphertext,
    partials: &[PartialDecryption],
    bound: u64,
) -> Result<u64, Error> {
    if !ciphertext.is_well_formed(group) {
        return Err(Malformed("ciphertext outside the order-q subgroup".into()).into());
    }

    let mask = combine_partial_decryptions(group, partials)?;
    search(group, &group.div(&ciphertext.H, &mask), bound)
}

fn search(group: &GroupParameters, target: &BigUint, bound: u64) -> Result<u64, Error> {
    let mut candidate = BigUint::one();
    for m in 0..=bound {
        if &candidate == target {
            return Ok(m);
        }
        candidate = group.mul(&candidate, group.g());
    }

    Err(SearchSpaceExhausted(bound).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::ErrorKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use threshold::utils::{generate_authorities, run_ceremony};
    use threshold::keys::combine_private_key;

    fn setup(seed: u64) -> (PublicKey, CombinedPrivateKey, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let group = GroupParameters::new(BigUint::from(23u32), BigUint::from(4u32)).unwrap();
        let mut authorities = generate_authorities(&group, &mut rng, 3, 2).unwrap();
        let f = group.random_generator(&mut rng);
        let (pk, shares) = run_ceremony(&mut authorities, f).unwrap();
        let key = combine_private_key(&shares[1..]).unwrap();
        (pk, key, rng)
    }

    #[test]
    fn decrypts_small_plaintexts() {
        let (pk, key, mut rng) = setup(1);
        for m in 0..10u64 {
            let r = pk.group().random_exponent(&mut rng);
            let c = encrypt(&pk, m, &r);
            assert!(c.is_well_formed(pk.group()));
            assert_eq!(decrypt(&key, &c, 10).unwrap(), m);
        }
    }

    #[test]
    fn homomorphism() {
        let (pk, key, mut rng) = setup(2);
        let group = pk.group();
        for (m1, m2) in [(0u64, 0u64), (0, 1), (1, 1), (3, 4)] {
            let c1 = encrypt(&pk, m1, &group.random_exponent(&mut rng));
            let c2 = encrypt(&pk, m2, &group.random_exponent(&mut rng));
            assert_eq!(decrypt(&key, &c1.combine(&c2, group), 10).unwrap(), m1 + m2);
        }
    }

    #[test]
    fn combination_is_order_independent() {
        let (pk, _, mut rng) = setup(3);
        let group = pk.group();
        let cs: Vec<Ciphertext> = (0..6)
            .map(|i| encrypt(&pk, i % 2, &group.random_exponent(&mut rng)))
            .collect();

        let forward = cs.iter().fold(Ciphertext::identity(), |acc, c| acc.combine(c, group));
        let backward = cs
            .iter()
            .rev()
            .fold(Ciphertext::identity(), |acc, c| acc.combine(c, group));
        assert_eq!(forward, backward);
        assert_eq!(forward, combine_all(group, &cs));
    }

    #[test]
    fn re_randomization_keeps_plaintext() {
        let (pk, key, mut rng) = setup(4);
        let group = pk.group();
        let c = encrypt(&pk, 1, &BigUint::from(3u32));
        let shifted = c.re_randomize(&pk, &BigUint::from(5u32));

        assert_eq!(shifted, encrypt(&pk, 1, &BigUint::from(8u32)));
        assert_eq!(decrypt(&key, &shifted, 1).unwrap(), 1);

        let r = group.random_exponent(&mut rng);
        assert_eq!(decrypt(&key, &c.re_randomize(&pk, &r), 1).unwrap(), 1);
    }

    #[test]
    fn search_bound_is_enforced() {
        let (pk, key, _) = setup(5);
        let c = encrypt(&pk, 4, &BigUint::from(2u32));
        assert!(matches!(
            decrypt(&key, &c, 3).unwrap_err().kind(),
            ErrorKind::SearchSpaceExhausted(3)
        ));
        assert_eq!(decrypt(&key, &c, 4).unwrap(), 4);
    }

    #[test]
    fn threshold_decryption_from_partials() {
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let group = GroupParameters::new(BigUint::from(23u32), BigUint::from(4u32)).unwrap();
        let mut authorities = generate_authorities(&group, &mut rng, 4, 3).unwrap();
        let f = group.random_generator(&mut rng);
        let (pk, shares) = run_ceremony(&mut authorities, f).unwrap();

        let c = encrypt(&pk, 5, &group.random_exponent(&mut rng))
            .combine(&encrypt(&pk, 2, &group.random_exponent(&mut rng)), &group);
        let partials: Vec<PartialDecryption> = shares
            .iter()
            .map(|share| partial_decrypt(share, &c).unwrap())
            .collect();

        assert_eq!(decrypt_with_partials(&group, &c, &partials[1..], 10).unwrap(), 7);
        assert_eq!(decrypt_with_partials(&group, &c, &partials, 10).unwrap(), 7);

        assert!(matches!(
            decrypt_with_partials(&group, &c, &partials[2..], 10).unwrap_err().kind(),
            ErrorKind::NotEnoughShares(2, 3)
        ));
        assert!(matches!(
            decrypt_with_partials(&group, &c, &partials[1..], 6).unwrap_err().kind(),
            ErrorKind::SearchSpaceExhausted(6)
        ));

        let outside = Ciphertext::from_parts(BigUint::from(5u32), c.H().clone());
        assert!(matches!(
            partial_decrypt(&shares[0], &outside).unwrap_err().kind(),
            ErrorKind::Malformed(_)
        ));
    }
}
