use num_bigint::BigUint;
use num_prime::nt_funcs::is_safe_prime;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

use crate::{
    error::{Error, ErrorKind::InvalidGroupParameters},
    random::random_below,
};

/// RFC 3526, 2048-bit MODP group (group 14). p = 2q + 1 with q prime.
const MODP_2048_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// A safe-prime group: `p = 2q + 1`, `g` generating the subgroup of order `q`.
///
/// Elements are residues mod `p`, exponents are residues mod `q`. The
/// arithmetic helpers assume their operands are already reduced into the
/// right residue class and panic otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupParameters {
    p: BigUint,
    q: BigUint,
    g: BigUint,
}

impl GroupParameters {
    pub fn new(p: BigUint, g: BigUint) -> Result<Self, Error> {
        let one = BigUint::one();

        if p < BigUint::from(5u32) || !p.bit(0) {
            return Err(InvalidGroupParameters(format!("p = {p} is not an odd prime above 3")).into());
        }
        if !is_safe_prime(&p).probably() {
            return Err(InvalidGroupParameters(format!("p = {p} is not a safe prime")).into());
        }

        let q = (&p - &one) >> 1u32;

        if g <= one || g >= p {
            Err(InvalidGroupParameters(format!("g = {g} is outside (1, p)")).into())
        } else if !g.modpow(&q, &p).is_one() {
            Err(InvalidGroupParameters(format!(
                "g = {g} does not generate the order-q subgroup"
            ))
            .into())
        } else {
            Ok(Self { p, q, g })
        }
    }

    /// The RFC 3526 2048-bit group with `g = 4`.
    pub fn modp_2048() -> Result<Self, Error> {
        let p = BigUint::parse_bytes(MODP_2048_PRIME.as_bytes(), 16)
            .ok_or_else(|| InvalidGroupParameters("unparsable built-in prime".into()))?;

        Self::new(p, BigUint::from(4u32))
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn q(&self) -> &BigUint {
        &self.q
    }

    pub fn g(&self) -> &BigUint {
        &self.g
    }

    pub fn pow(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        assert!(base < &self.p, "base is not reduced mod p");
        base.modpow(exp, &self.p)
    }

    pub fn pow_g(&self, exp: &BigUint) -> BigUint {
        self.g.modpow(exp, &self.p)
    }

    /// `base^(-exp)`, only meaningful for members of the order-q subgroup.
    pub fn pow_neg(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        self.pow(base, &self.neg_q(exp))
    }

    pub fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.p
    }

    pub fn invert(&self, value: &BigUint) -> BigUint {
        assert!(
            !value.is_zero() && value < &self.p,
            "only non-zero residues mod p are invertible"
        );
        value.modpow(&(&self.p - BigUint::from(2u32)), &self.p)
    }

    pub fn div(&self, a: &BigUint, b: &BigUint) -> BigUint {
        self.mul(a, &self.invert(b))
    }

    /// Membership in the order-q subgroup.
    pub fn is_member(&self, value: &BigUint) -> bool {
        !value.is_zero() && value < &self.p && value.modpow(&self.q, &self.p).is_one()
    }

    pub fn add_q(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + b) % &self.q
    }

    pub fn sub_q(&self, a: &BigUint, b: &BigUint) -> BigUint {
        ((a % &self.q) + &self.q - (b % &self.q)) % &self.q
    }

    pub fn mul_q(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.q
    }

    pub fn neg_q(&self, a: &BigUint) -> BigUint {
        (&self.q - (a % &self.q)) % &self.q
    }

    pub fn invert_q(&self, a: &BigUint) -> BigUint {
        let a = a % &self.q;
        assert!(!a.is_zero(), "zero has no inverse mod q");
        a.modpow(&(&self.q - BigUint::from(2u32)), &self.q)
    }

    /// Uniform in `[0, q)`.
    pub fn random_exponent<R>(&self, rng: &mut R) -> BigUint
    where
        R: CryptoRng + RngCore,
    {
        random_below(rng, &self.q)
    }

    /// Uniform in `[1, q)`.
    pub fn random_nonzero_exponent<R>(&self, rng: &mut R) -> BigUint
    where
        R: CryptoRng + RngCore,
    {
        loop {
            let x = self.random_exponent(rng);
            if !x.is_zero() {
                return x;
            }
        }
    }

    /// A random generator of the order-q subgroup other than `g` itself.
    pub fn random_generator<R>(&self, rng: &mut R) -> BigUint
    where
        R: CryptoRng + RngCore,
    {
        loop {
            let candidate = self.pow_g(&self.random_nonzero_exponent(rng));
            if candidate != self.g || self.q <= BigUint::from(2u32) {
                return candidate;
            }
        }
    }
}
