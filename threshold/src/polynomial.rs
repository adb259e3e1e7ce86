use common::{group::GroupParameters, utils::wipe};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret-sharing polynomial over Z_q. The constant term is the dealer's secret.
pub struct Polynomial {
    pub(crate) coefficients: Vec<BigUint>,
}

/// Feldman commitments `g^{c_k}` to every coefficient of a [`Polynomial`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolynomialCommitment {
    pub(crate) commitments: Vec<BigUint>,
}

fn x_powers(group: &GroupParameters, x: &BigUint, len: usize) -> Vec<BigUint> {
    let x = x % group.q();
    let mut powers: Vec<BigUint> = vec![BigUint::one(), x.clone()];

    for i in 2..len {
        powers.push(group.mul_q(&powers[1], &powers[i - 1]));
    }
    powers.truncate(len);
    powers
}

impl Polynomial {
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn degree(&self) -> usize {
        self.len().saturating_sub(1)
    }

    pub(crate) fn sample_set_f0<R>(
        group: &GroupParameters,
        degree: usize,
        rng: &mut R,
        f0: &BigUint,
    ) -> Self
    where
        R: CryptoRng + RngCore,
    {
        let mut coefs: Vec<BigUint> = (0..=degree).map(|_| group.random_exponent(rng)).collect();
        coefs[0] = f0 % group.q();

        Polynomial {
            coefficients: coefs,
        }
    }

    /// `Σ c_i x^i mod q`.
    pub fn evaluate(&self, group: &GroupParameters, x: &BigUint) -> BigUint {
        let x_powers = x_powers(group, x, self.len());

        self.coefficients
            .par_iter()
            .zip(x_powers)
            .map(|(coef, x_pow)| group.mul_q(coef, &x_pow))
            .reduce(BigUint::zero, |a, b| group.add_q(&a, &b))
    }

    pub fn commit(&self, group: &GroupParameters) -> PolynomialCommitment {
        PolynomialCommitment {
            commitments: self
                .coefficients
                .par_iter()
                .map(|coef| group.pow_g(coef))
                .collect(),
        }
    }
}

impl Zeroize for Polynomial {
    fn zeroize(&mut self) {
        self.coefficients.iter_mut().for_each(wipe);
    }
}

impl Drop for Polynomial {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for Polynomial {}

impl PolynomialCommitment {
    pub fn len(&self) -> usize {
        self.commitments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }

    /// Commitment to the constant term, i.e. the dealer's public share.
    pub fn public_share(&self) -> Option<&BigUint> {
        self.commitments.first()
    }

    /// Checks `g^share == Π C_k^{x^k}`.
    pub fn verify_share(&self, group: &GroupParameters, x: &BigUint, share: &BigUint) -> bool {
        if self.commitments.iter().any(|c| !group.is_member(c)) {
            return false;
        }

        let x_powers = x_powers(group, x, self.len());

        let expected = self
            .commitments
            .par_iter()
            .zip(x_powers)
            .map(|(commitment, x_pow)| group.pow(commitment, &x_pow))
            .reduce(BigUint::one, |a, b| group.mul(&a, &b));

        group.pow_g(share) == expected
    }
}

impl std::fmt::Display for PolynomialCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.commitments
                .iter()
                .map(|c| format!("{c:x}"))
                .collect::<Vec<String>>()
                .join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn toy() -> GroupParameters {
        GroupParameters::new(BigUint::from(23u32), BigUint::from(4u32)).unwrap()
    }

    #[test]
    fn evaluate_matches_horner() {
        let group = toy();
        let poly = Polynomial {
            coefficients: vec![5u32, 3, 7].into_iter().map(BigUint::from).collect(),
        };

        for x in 0u32..15 {
            let expected = (5 + 3 * x + 7 * x * x) % 11;
            assert_eq!(poly.evaluate(&group, &BigUint::from(x)), BigUint::from(expected));
        }
        assert_eq!(poly.degree(), 2);
    }

    #[test]
    fn constant_term_is_fixed() {
        let group = toy();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let secret = BigUint::from(9u32);

        let poly = Polynomial::sample_set_f0(&group, 1, &mut rng, &secret);
        assert_eq!(poly.len(), 2);
        assert_eq!(poly.evaluate(&group, &BigUint::zero()), secret);
    }

    #[test]
    fn commitment_verifies_honest_shares_only() {
        let group = toy();
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let poly = Polynomial::sample_set_f0(&group, 2, &mut rng, &BigUint::from(6u32));
        let commitment = poly.commit(&group);

        assert_eq!(commitment.public_share(), Some(&group.pow_g(&BigUint::from(6u32))));

        for j in 1u32..=4 {
            let x = BigUint::from(j);
            let share = poly.evaluate(&group, &x);
            assert!(commitment.verify_share(&group, &x, &share));

            let forged = group.add_q(&share, &BigUint::one());
            assert!(!commitment.verify_share(&group, &x, &forged));
        }
    }

    #[test]
    fn zeroize_clears_coefficients() {
        let mut poly = Polynomial {
            coefficients: vec![BigUint::from(8u32), BigUint::from(2u32)],
        };
        poly.zeroize();
        assert!(poly.coefficients.iter().all(Zero::is_zero));
    }
}
