use std::collections::BTreeMap;

use common::{
    error::{
        Error,
        ErrorKind::{
            BadKey, DuplicateAuthority, InvalidKeyShare, InvalidParameterSet, NotEnoughShares,
            UninitializedValue,
        },
    },
    group::GroupParameters,
    utils::{precompute_lambda, wipe},
};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An authority's own keypair: `x_i` in Z_q and `h_i = g^{x_i}`.
pub struct AuthorityKeyShare {
    pub(crate) index: usize,
    pub(crate) x: BigUint,
    pub(crate) h: BigUint,
}

/// The public half of an [`AuthorityKeyShare`], tagged with its authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicShare {
    pub index: usize,
    pub h: BigUint,
}

/// Combined election public key `(p, g, f, h)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    group: GroupParameters,
    f: BigUint,
    h: BigUint,
}

/// Authority `index`'s point on the joint sharing polynomial.
pub struct PrivateKeyShare {
    group: GroupParameters,
    index: usize,
    threshold: usize,
    value: BigUint,
}

/// `value^{X_j}`: authority `j`'s share of unmasking a ciphertext whose first
/// component is `value`. At least `threshold` of these recover `value^x`
/// without the election key ever being assembled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialDecryption {
    pub index: usize,
    pub threshold: usize,
    pub value: BigUint,
}

/// The election decryption key. Only ever built from at least `t` shares.
pub struct CombinedPrivateKey {
    group: GroupParameters,
    x: BigUint,
}

impl AuthorityKeyShare {
    pub fn generate<R>(group: &GroupParameters, index: usize, rng: &mut R) -> Self
    where
        R: CryptoRng + RngCore,
    {
        let x = group.random_nonzero_exponent(rng);
        let h = group.pow_g(&x);

        Self { index, x, h }
    }

    /// Rebuilds a share from a stored secret, refusing zero or unreduced values.
    pub fn from_parts(group: &GroupParameters, index: usize, x: BigUint) -> Result<Self, Error> {
        if index == 0 {
            Err(InvalidKeyShare("authority index 0 is reserved for the secret".into()).into())
        } else if BigUint::from(index) >= *group.q() {
            Err(InvalidKeyShare(format!("authority index {index} is not below q")).into())
        } else if x.is_zero() || &x >= group.q() {
            Err(InvalidKeyShare(format!("authority {index}: secret outside [1, q)")).into())
        } else {
            let h = group.pow_g(&x);
            Ok(Self { index, x, h })
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn public_share(&self) -> PublicShare {
        PublicShare {
            index: self.index,
            h: self.h.clone(),
        }
    }
}

impl Zeroize for AuthorityKeyShare {
    fn zeroize(&mut self) {
        wipe(&mut self.x);
    }
}

impl Drop for AuthorityKeyShare {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for AuthorityKeyShare {}

impl PublicKey {
    pub fn new(group: GroupParameters, f: BigUint, h: BigUint) -> Result<Self, Error> {
        if !group.is_member(&f) || f.is_one() {
            Err(BadKey("f is not a generator of the order-q subgroup".into()).into())
        } else if !group.is_member(&h) || h.is_one() {
            Err(BadKey("h is not a generator of the order-q subgroup".into()).into())
        } else {
            Ok(Self { group, f, h })
        }
    }

    pub fn group(&self) -> &GroupParameters {
        &self.group
    }

    pub fn p(&self) -> &BigUint {
        self.group.p()
    }

    pub fn g(&self) -> &BigUint {
        self.group.g()
    }

    pub fn f(&self) -> &BigUint {
        &self.f
    }

    pub fn h(&self) -> &BigUint {
        &self.h
    }
}

impl PrivateKeyShare {
    pub fn from_parts(
        group: GroupParameters,
        index: usize,
        threshold: usize,
        value: BigUint,
    ) -> Result<Self, Error> {
        if index == 0 || threshold == 0 {
            Err(InvalidParameterSet(0, threshold, index).into())
        } else if BigUint::from(index) >= *group.q() {
            // indices equal mod q would share an interpolation point
            Err(InvalidKeyShare(format!("authority index {index} is not below q")).into())
        } else if &value >= group.q() {
            Err(InvalidKeyShare(format!("authority {index}: share not reduced mod q")).into())
        } else {
            Ok(Self {
                group,
                index,
                threshold,
                value,
            })
        }
    }

    pub fn group(&self) -> &GroupParameters {
        &self.group
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// This authority's contribution to unmasking `value`, a ciphertext's
    /// first component.
    pub fn partial_unmask(&self, value: &BigUint) -> PartialDecryption {
        PartialDecryption {
            index: self.index,
            threshold: self.threshold,
            value: self.group.pow(value, &self.value),
        }
    }
}

impl Zeroize for PrivateKeyShare {
    fn zeroize(&mut self) {
        wipe(&mut self.value);
    }
}

impl Drop for PrivateKeyShare {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for PrivateKeyShare {}

impl CombinedPrivateKey {
    pub fn group(&self) -> &GroupParameters {
        &self.group
    }

    /// `value^x`, the ElGamal mask for a ciphertext whose first component is `value`.
    pub fn unmask(&self, value: &BigUint) -> BigUint {
        self.group.pow(value, &self.x)
    }

    /// Whether this key decrypts ciphertexts made under `pk`.
    pub fn matches(&self, pk: &PublicKey) -> bool {
        &self.group == pk.group() && &self.group.pow_g(&self.x) == pk.h()
    }
}

impl Zeroize for CombinedPrivateKey {
    fn zeroize(&mut self) {
        wipe(&mut self.x);
    }
}

impl Drop for CombinedPrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for CombinedPrivateKey {}

/// `h = Π h_i mod p`. The set of shares, not their order, fixes the result.
pub fn combine_public_key(
    group: &GroupParameters,
    f: BigUint,
    shares: &[PublicShare],
) -> Result<PublicKey, Error> {
    if shares.is_empty() {
        return Err(UninitializedValue("authority public shares").into());
    }

    let mut by_index: BTreeMap<usize, &BigUint> = BTreeMap::new();
    for share in shares {
        if !group.is_member(&share.h) || share.h.is_one() {
            return Err(InvalidKeyShare(format!(
                "authority {}: public share outside the subgroup",
                share.index
            ))
            .into());
        }
        if by_index.insert(share.index, &share.h).is_some() {
            return Err(DuplicateAuthority(share.index).into());
        }
    }

    let h = by_index
        .into_par_iter()
        .map(|(_, h)| h.clone())
        .reduce(BigUint::one, |a, b| group.mul(&a, &b));

    PublicKey::new(group.clone(), f, h)
}

/// Interpolates the joint secret at zero from the given shares, without any
/// threshold check.
pub(crate) fn interpolate(group: &GroupParameters, shares: &[&PrivateKeyShare]) -> BigUint {
    let indices: Vec<usize> = shares.iter().map(|share| share.index).collect();
    let lambdas = precompute_lambda(group, &indices);

    shares
        .par_iter()
        .zip(lambdas.par_iter())
        .map(|(share, lambda)| group.mul_q(lambda, &share.value))
        .reduce(BigUint::zero, |a, b| group.add_q(&a, &b))
}

/// Rebuilds the election key from at least `threshold` distinct shares.
pub fn combine_private_key(shares: &[PrivateKeyShare]) -> Result<CombinedPrivateKey, Error> {
    let first = shares
        .first()
        .ok_or_else(|| Error::from(UninitializedValue("private key shares")))?;
    let (group, threshold) = (first.group(), first.threshold());

    let mut distinct: BTreeMap<usize, &PrivateKeyShare> = BTreeMap::new();
    for share in shares {
        if share.group() != group || share.threshold() != threshold {
            return Err(InvalidKeyShare(format!(
                "authority {}: share belongs to a different election",
                share.index()
            ))
            .into());
        }
        if let Some(existing) = distinct.insert(share.index(), share) {
            if existing.value() != share.value() {
                return Err(DuplicateAuthority(share.index()).into());
            }
        }
    }

    if distinct.len() < threshold {
        return Err(NotEnoughShares(distinct.len(), threshold).into());
    }

    let subset: Vec<&PrivateKeyShare> = distinct.into_values().take(threshold).collect();

    Ok(CombinedPrivateKey {
        group: group.clone(),
        x: interpolate(group, &subset),
    })
}

/// Recovers `value^x` from partial decryptions of the same `value`,
/// interpolating in the exponent: `Π D_j^{λ_j}` over `threshold` distinct
/// authorities.
pub fn combine_partial_decryptions(
    group: &GroupParameters,
    partials: &[PartialDecryption],
) -> Result<BigUint, Error> {
    let threshold = partials
        .first()
        .ok_or_else(|| Error::from(UninitializedValue("partial decryptions")))?
        .threshold;
    if threshold == 0 {
        return Err(InvalidParameterSet(0, threshold, 0).into());
    }

    let mut distinct: BTreeMap<usize, &BigUint> = BTreeMap::new();
    for partial in partials {
        if partial.threshold != threshold {
            return Err(InvalidKeyShare(format!(
                "authority {}: partial decryption for a different threshold",
                partial.index
            ))
            .into());
        }
        if partial.index == 0 || BigUint::from(partial.index) >= *group.q() {
            return Err(InvalidKeyShare(format!(
                "authority index {} outside [1, q)",
                partial.index
            ))
            .into());
        }
        if !group.is_member(&partial.value) {
            return Err(InvalidKeyShare(format!(
                "authority {}: partial decryption outside the subgroup",
                partial.index
            ))
            .into());
        }
        if let Some(existing) = distinct.insert(partial.index, &partial.value) {
            if existing != &partial.value {
                return Err(DuplicateAuthority(partial.index).into());
            }
        }
    }

    if distinct.len() < threshold {
        return Err(NotEnoughShares(distinct.len(), threshold).into());
    }

    let (indices, values): (Vec<usize>, Vec<&BigUint>) =
        distinct.into_iter().take(threshold).unzip();
    let lambdas = precompute_lambda(group, &indices);

    Ok(values
        .par_iter()
        .zip(lambdas.par_iter())
        .map(|(value, lambda)| group.pow(value, lambda))
        .reduce(BigUint::one, |a, b| group.mul(&a, &b)))
}
