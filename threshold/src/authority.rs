use common::{
    error::{
        Error,
        ErrorKind::{
            CountMismatch, DuplicateAuthority, InvalidKeyShare, InvalidParameterSet,
            UninitializedValue,
        },
    },
    group::GroupParameters,
    utils::wipe,
};
use log::debug;
use num_bigint::BigUint;
use num_traits::Zero;
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    keys::{AuthorityKeyShare, PrivateKeyShare, PublicShare},
    polynomial::{Polynomial, PolynomialCommitment},
};

/// `P_dealer(recipient)`, sent privately from one authority to another.
pub struct SecretShare {
    pub(crate) dealer: usize,
    pub(crate) recipient: usize,
    pub(crate) value: BigUint,
}

impl SecretShare {
    pub fn dealer(&self) -> usize {
        self.dealer
    }

    pub fn recipient(&self) -> usize {
        self.recipient
    }
}

impl Zeroize for SecretShare {
    fn zeroize(&mut self) {
        wipe(&mut self.value);
    }
}

impl Drop for SecretShare {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for SecretShare {}

/// One of `n` key-holders in a `t`-of-`n` election key ceremony.
///
/// Each authority draws its own keypair, shares the secret with a fresh
/// degree-`(t-1)` polynomial, and ends up holding one point of the sum of all
/// authorities' polynomials.
pub struct KeyAuthority {
    group: GroupParameters,
    pub index: usize,
    pub n: usize,
    pub t: usize,

    key_share: AuthorityKeyShare,
    polynomial: Polynomial,
    received: Vec<Option<BigUint>>,
    /// Each dealer's committed public share, the constant term of its commitment.
    committed: Vec<Option<BigUint>>,
}

impl KeyAuthority {
    pub fn new<R>(
        group: GroupParameters,
        rng: &mut R,
        n: usize,
        t: usize,
        index: usize,
    ) -> Result<Self, Error>
    where
        R: CryptoRng + RngCore,
    {
        if !(1..=n).contains(&index) || t == 0 || t > n || BigUint::from(n) >= *group.q() {
            return Err(InvalidParameterSet(n, t, index).into());
        }

        let key_share = Self::generate_key_share(&group, index, rng);
        let polynomial = Polynomial::sample_set_f0(&group, t - 1, rng, &key_share.x);

        let mut received = vec![None; n];
        received[index - 1] = Some(polynomial.evaluate(&group, &BigUint::from(index)));
        let mut committed = vec![None; n];
        committed[index - 1] = Some(key_share.h.clone());

        Ok(Self {
            group,
            index,
            n,
            t,
            key_share,
            polynomial,
            received,
            committed,
        })
    }

    pub fn generate_key_share<R>(
        group: &GroupParameters,
        authority_id: usize,
        rng: &mut R,
    ) -> AuthorityKeyShare
    where
        R: CryptoRng + RngCore,
    {
        AuthorityKeyShare::generate(group, authority_id, rng)
    }

    pub fn group(&self) -> &GroupParameters {
        &self.group
    }

    pub fn key_share(&self) -> &AuthorityKeyShare {
        &self.key_share
    }

    pub fn public_share(&self) -> PublicShare {
        self.key_share.public_share()
    }

    pub(crate) fn polynomial(&self) -> &Polynomial {
        &self.polynomial
    }

    /// Publishes this authority's sharing polynomial in verifiable form: the
    /// Feldman commitment for everyone, plus one evaluation per counterpart.
    pub fn publish_polynomial(&self) -> (PolynomialCommitment, Vec<SecretShare>) {
        let shares = (1..=self.n)
            .filter(|j| *j != self.index)
            .map(|j| SecretShare {
                dealer: self.index,
                recipient: j,
                value: self.polynomial.evaluate(&self.group, &BigUint::from(j)),
            })
            .collect();

        (self.polynomial.commit(&self.group), shares)
    }

    pub fn receive_share(
        &mut self,
        share: &SecretShare,
        commitment: &PolynomialCommitment,
    ) -> Result<(), Error> {
        if share.recipient != self.index {
            return Err(InvalidKeyShare(format!(
                "share for authority {} delivered to authority {}",
                share.recipient, self.index
            ))
            .into());
        }
        if !(1..=self.n).contains(&share.dealer) {
            return Err(InvalidParameterSet(self.n, self.t, share.dealer).into());
        }
        if commitment.len() != self.t {
            return Err(CountMismatch(self.t, "coefficients", commitment.len(), "commitments").into());
        }
        if self.received[share.dealer - 1].is_some() {
            return Err(DuplicateAuthority(share.dealer).into());
        }
        if !commitment.verify_share(&self.group, &BigUint::from(self.index), &share.value) {
            return Err(InvalidKeyShare(format!(
                "share from authority {} does not match its commitment",
                share.dealer
            ))
            .into());
        }

        debug!(
            "authority {} accepted share from authority {}",
            self.index, share.dealer
        );
        self.received[share.dealer - 1] = Some(share.value.clone());
        self.committed[share.dealer - 1] = commitment.public_share().cloned();
        Ok(())
    }

    /// Checks that every authority's published public share is the one its
    /// polynomial commitment fixed, so the combined public key matches the
    /// private shares.
    pub fn check_public_shares(&self, shares: &[PublicShare]) -> Result<(), Error> {
        if shares.len() != self.n {
            return Err(CountMismatch(self.n, "authorities", shares.len(), "public shares").into());
        }

        for share in shares {
            let committed = share
                .index
                .checked_sub(1)
                .and_then(|i| self.committed.get(i))
                .ok_or_else(|| Error::from(InvalidParameterSet(self.n, self.t, share.index)))?;

            match committed {
                None => return Err(UninitializedValue("authority.committed_shares").into()),
                Some(h) if h != &share.h => {
                    return Err(InvalidKeyShare(format!(
                        "authority {} published a public share it did not commit to",
                        share.index
                    ))
                    .into());
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Sums the received shares into this authority's point on the joint polynomial.
    pub fn finish(&self) -> Result<PrivateKeyShare, Error> {
        if self.received.iter().any(Option::is_none) {
            return Err(UninitializedValue("authority.received_shares").into());
        }

        let value = self
            .received
            .iter()
            .flatten()
            .fold(BigUint::zero(), |acc, share| self.group.add_q(&acc, share));

        PrivateKeyShare::from_parts(self.group.clone(), self.index, self.t, value)
    }
}

impl Drop for KeyAuthority {
    fn drop(&mut self) {
        self.received.iter_mut().flatten().for_each(wipe);
    }
}
