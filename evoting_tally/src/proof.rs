//! Non-interactive Chaum-Pedersen proofs over exponential ElGamal ciphertexts.
//!
//! A [`MembershipProof`] is a disjunction of DLEQ statements, one per value of
//! the allowed domain: for the real plaintext `m` the prover runs the honest
//! protocol, for every other value it simulates a transcript. The Fiat-Shamir
//! challenge is split so that the simulated challenges and the real one sum to
//! the hash of the whole transcript.
//!
//! A [`SumProof`] is a single DLEQ proof that the product of a list of
//! ciphertexts encrypts a declared total.

use blake3::Hasher;
use common::{
    error::{
        Error,
        ErrorKind::{CountMismatch, InvalidSelection},
    },
    group::GroupParameters,
    hash::{absorb, absorb_all, absorb_bytes, challenge},
    utils::wipe,
};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::{CryptoRng, RngCore};
use threshold::keys::PublicKey;

use crate::cipher::{Ciphertext, combine_all, encrypt};

/// Plaintexts a single vote may take.
pub const VOTE_DOMAIN: [u64; 2] = [0, 1];

const MEMBERSHIP_LABEL: &[u8] = b"evoting_tally/membership/v1";
const SUM_LABEL: &[u8] = b"evoting_tally/sum/v1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipProof {
    pub(crate) challenges: Vec<BigUint>,
    pub(crate) responses: Vec<BigUint>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SumProof {
    pub(crate) challenge: BigUint,
    pub(crate) response: BigUint,
}

impl MembershipProof {
    pub fn from_parts(challenges: Vec<BigUint>, responses: Vec<BigUint>) -> Self {
        Self {
            challenges,
            responses,
        }
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

impl SumProof {
    pub fn from_parts(challenge: BigUint, response: BigUint) -> Self {
        Self {
            challenge,
            response,
        }
    }
}

fn absorb_statement(
    hasher: &mut Hasher,
    label: &[u8],
    context: &[u8],
    pk: &PublicKey,
    ciphertexts: &[&Ciphertext],
    values: &[u64],
) {
    absorb_bytes(hasher, label);
    absorb_bytes(hasher, context);
    absorb_all(hasher, [pk.p(), pk.g(), pk.f(), pk.h()]);
    for ciphertext in ciphertexts {
        absorb(hasher, &ciphertext.G);
        absorb(hasher, &ciphertext.H);
    }
    for value in values {
        absorb_bytes(hasher, &value.to_be_bytes());
    }
}

/// `H / g^d`: the value `h^r` must equal if the ciphertext encrypts `d`.
fn shifted(group: &GroupParameters, ciphertext: &Ciphertext, d: u64) -> BigUint {
    group.mul(&ciphertext.H, &group.pow_neg(group.g(), &BigUint::from(d)))
}

/// Commitments `(g^s G^-c, h^s (H/g^d)^-c)` the verifier recomputes from `(c, s)`.
fn commitments(
    pk: &PublicKey,
    ciphertext_g: &BigUint,
    shifted_h: &BigUint,
    c: &BigUint,
    s: &BigUint,
) -> (BigUint, BigUint) {
    let group = pk.group();
    (
        group.mul(&group.pow_g(s), &group.pow_neg(ciphertext_g, c)),
        group.mul(&group.pow(pk.h(), s), &group.pow_neg(shifted_h, c)),
    )
}

/// Proves that `ciphertext = encrypt(pk, m, r)` for some `m` in `domain`.
#[allow(clippy::too_many_arguments)]
pub fn prove_in_domain<R>(
    pk: &PublicKey,
    ciphertext: &Ciphertext,
    domain: &[u64],
    m: u64,
    r: &BigUint,
    context: &[u8],
    rng: &mut R,
    hasher: &mut Hasher,
    buf: &mut [u8; 64],
) -> Result<MembershipProof, Error>
where
    R: CryptoRng + RngCore,
{
    let group = pk.group();
    let real = domain
        .iter()
        .position(|d| *d == m)
        .ok_or_else(|| Error::from(InvalidSelection(format!("{m} is outside {domain:?}"))))?;

    if &encrypt(pk, m, r) != ciphertext {
        return Err(InvalidSelection("ciphertext does not open to the claimed plaintext".into()).into());
    }

    let mut w = group.random_exponent(rng);
    let mut challenges = vec![BigUint::zero(); domain.len()];
    let mut responses = vec![BigUint::zero(); domain.len()];
    let mut ys = Vec::with_capacity(domain.len());
    let mut zs = Vec::with_capacity(domain.len());

    for (i, d) in domain.iter().enumerate() {
        if i == real {
            ys.push(group.pow_g(&w));
            zs.push(group.pow(pk.h(), &w));
        } else {
            challenges[i] = group.random_exponent(rng);
            responses[i] = group.random_exponent(rng);

            let (y, z) = commitments(
                pk,
                &ciphertext.G,
                &shifted(group, ciphertext, *d),
                &challenges[i],
                &responses[i],
            );
            ys.push(y);
            zs.push(z);
        }
    }

    absorb_statement(hasher, MEMBERSHIP_LABEL, context, pk, &[ciphertext], domain);
    absorb_all(hasher, ys.iter().chain(zs.iter()));
    let c = challenge(hasher, buf, group.q());

    let simulated = challenges
        .iter()
        .fold(BigUint::zero(), |acc, c_i| group.add_q(&acc, c_i));
    challenges[real] = group.sub_q(&c, &simulated);
    responses[real] = group.add_q(&w, &group.mul_q(&challenges[real], r));

    wipe(&mut w);

    Ok(MembershipProof {
        challenges,
        responses,
    })
}

pub fn verify_in_domain(
    pk: &PublicKey,
    ciphertext: &Ciphertext,
    domain: &[u64],
    proof: &MembershipProof,
    context: &[u8],
    hasher: &mut Hasher,
    buf: &mut [u8; 64],
) -> bool {
    let group = pk.group();

    if proof.challenges.len() != domain.len()
        || proof.responses.len() != domain.len()
        || proof
            .challenges
            .iter()
            .chain(proof.responses.iter())
            .any(|v| v >= group.q())
        || !ciphertext.is_well_formed(group)
    {
        return false;
    }

    let (ys, zs): (Vec<BigUint>, Vec<BigUint>) = domain
        .iter()
        .zip(proof.challenges.iter().zip(proof.responses.iter()))
        .map(|(d, (c, s))| commitments(pk, &ciphertext.G, &shifted(group, ciphertext, *d), c, s))
        .unzip();

    absorb_statement(hasher, MEMBERSHIP_LABEL, context, pk, &[ciphertext], domain);
    absorb_all(hasher, ys.iter().chain(zs.iter()));
    let c = challenge(hasher, buf, group.q());

    let total = proof
        .challenges
        .iter()
        .fold(BigUint::zero(), |acc, c_i| group.add_q(&acc, c_i));

    c == total
}

/// Proves that `ciphertext` encrypts 0 or 1.
#[allow(clippy::too_many_arguments)]
pub fn prove_membership<R>(
    pk: &PublicKey,
    ciphertext: &Ciphertext,
    m: u64,
    r: &BigUint,
    context: &[u8],
    rng: &mut R,
    hasher: &mut Hasher,
    buf: &mut [u8; 64],
) -> Result<MembershipProof, Error>
where
    R: CryptoRng + RngCore,
{
    prove_in_domain(pk, ciphertext, &VOTE_DOMAIN, m, r, context, rng, hasher, buf)
}

pub fn verify_membership(
    pk: &PublicKey,
    ciphertext: &Ciphertext,
    proof: &MembershipProof,
    context: &[u8],
    hasher: &mut Hasher,
    buf: &mut [u8; 64],
) -> bool {
    verify_in_domain(pk, ciphertext, &VOTE_DOMAIN, proof, context, hasher, buf)
}

/// Proves that the product of `ciphertexts` encrypts `declared_total`, using
/// the sum of the per-ciphertext randomness as the witness.
#[allow(clippy::too_many_arguments)]
pub fn prove_sum<R>(
    pk: &PublicKey,
    ciphertexts: &[Ciphertext],
    declared_total: u64,
    randomness: &[BigUint],
    context: &[u8],
    rng: &mut R,
    hasher: &mut Hasher,
    buf: &mut [u8; 64],
) -> Result<SumProof, Error>
where
    R: CryptoRng + RngCore,
{
    let group = pk.group();
    if ciphertexts.len() != randomness.len() {
        return Err(CountMismatch(
            ciphertexts.len(),
            "ciphertexts",
            randomness.len(),
            "randomness values",
        )
        .into());
    }

    let product = combine_all(group, ciphertexts);
    let mut r_total = randomness
        .iter()
        .fold(BigUint::zero(), |acc, r| group.add_q(&acc, r));

    if encrypt(pk, declared_total, &r_total) != product {
        wipe(&mut r_total);
        return Err(InvalidSelection(format!(
            "ciphertexts do not sum to the declared total {declared_total}"
        ))
        .into());
    }

    let mut w = group.random_exponent(rng);
    let a = group.pow_g(&w);
    let b = group.pow(pk.h(), &w);

    let refs: Vec<&Ciphertext> = ciphertexts.iter().collect();
    absorb_statement(hasher, SUM_LABEL, context, pk, &refs, &[declared_total]);
    absorb_all(hasher, [&a, &b]);
    let c = challenge(hasher, buf, group.q());

    let response = group.add_q(&w, &group.mul_q(&c, &r_total));

    wipe(&mut w);
    wipe(&mut r_total);

    Ok(SumProof {
        challenge: c,
        response,
    })
}

pub fn verify_sum(
    pk: &PublicKey,
    ciphertexts: &[Ciphertext],
    declared_total: u64,
    proof: &SumProof,
    context: &[u8],
    hasher: &mut Hasher,
    buf: &mut [u8; 64],
) -> bool {
    let group = pk.group();

    if &proof.challenge >= group.q()
        || &proof.response >= group.q()
        || ciphertexts.iter().any(|c| !c.is_well_formed(group))
    {
        return false;
    }

    let product = combine_all(group, ciphertexts);
    let (a, b) = commitments(
        pk,
        &product.G,
        &shifted(group, &product, declared_total),
        &proof.challenge,
        &proof.response,
    );

    let refs: Vec<&Ciphertext> = ciphertexts.iter().collect();
    absorb_statement(hasher, SUM_LABEL, context, pk, &refs, &[declared_total]);
    absorb_all(hasher, [&a, &b]);

    challenge(hasher, buf, group.q()) == proof.challenge
}
