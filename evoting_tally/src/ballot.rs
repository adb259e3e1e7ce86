use std::collections::{BTreeMap, BTreeSet};

use blake3::Hasher;
use common::{
    error::{
        Error,
        ErrorKind::{BallotMismatch, InvalidProof, InvalidSelection},
    },
    utils::wipe,
};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use threshold::keys::{CombinedPrivateKey, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    cipher::{Ciphertext, decrypt, encrypt},
    proof::{MembershipProof, SumProof, prove_membership, prove_sum, verify_membership, verify_sum},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaintextRace {
    pub name: String,
    pub selection_limit: u64,
    pub votes: BTreeMap<String, bool>,
}

impl PlaintextRace {
    pub fn new<S, I>(name: &str, selection_limit: u64, votes: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, bool)>,
    {
        Self {
            name: name.to_string(),
            selection_limit,
            votes: votes.into_iter().map(|(c, v)| (c.into(), v)).collect(),
        }
    }

    pub fn selected(&self) -> u64 {
        self.votes.values().filter(|v| **v).count() as u64
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaintextBallot {
    pub ballot_id: String,
    pub races: Vec<PlaintextRace>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedVote {
    pub(crate) ciphertext: Ciphertext,
    pub(crate) proof: MembershipProof,
}

impl EncryptedVote {
    pub fn ciphertext(&self) -> &Ciphertext {
        &self.ciphertext
    }

    pub fn proof(&self) -> &MembershipProof {
        &self.proof
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedRace {
    pub(crate) name: String,
    pub(crate) selection_limit: u64,
    pub(crate) votes: BTreeMap<String, EncryptedVote>,
    pub(crate) sum_proof: SumProof,
}

impl EncryptedRace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selection_limit(&self) -> u64 {
        self.selection_limit
    }

    pub fn votes(&self) -> &BTreeMap<String, EncryptedVote> {
        &self.votes
    }

    pub fn sum_proof(&self) -> &SumProof {
        &self.sum_proof
    }

    fn ciphertexts(&self) -> Vec<Ciphertext> {
        self.votes.values().map(|v| v.ciphertext.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBallot {
    pub(crate) ballot_id: String,
    pub(crate) nonce: Vec<u8>,
    pub(crate) races: Vec<EncryptedRace>,
}

impl EncryptedBallot {
    pub fn ballot_id(&self) -> &str {
        &self.ballot_id
    }

    /// Context nonce every proof on this ballot is bound to.
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn races(&self) -> &[EncryptedRace] {
        &self.races
    }

    pub fn race(&self, name: &str) -> Option<&EncryptedRace> {
        self.races.iter().find(|race| race.name == name)
    }
}

/// Per-vote plaintext and randomness kept by the encrypting device, keyed by
/// race and then candidate. Needed to re-encrypt the ballot later.
#[derive(Default)]
pub struct BallotWitness {
    pub(crate) races: BTreeMap<String, BTreeMap<String, (bool, BigUint)>>,
}

impl BallotWitness {
    pub fn len(&self) -> usize {
        self.races.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, race: &str, candidate: &str) -> Option<&(bool, BigUint)> {
        self.races.get(race).and_then(|votes| votes.get(candidate))
    }
}

impl Zeroize for BallotWitness {
    fn zeroize(&mut self) {
        self.races
            .values_mut()
            .flat_map(|votes| votes.values_mut())
            .for_each(|(selected, r)| {
                *selected = false;
                wipe(r);
            });
    }
}

impl Drop for BallotWitness {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for BallotWitness {}

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

pub(crate) fn vote_context(nonce: &[u8], race: &str, candidate: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + nonce.len() + race.len() + candidate.len());
    push_field(&mut out, nonce);
    push_field(&mut out, race.as_bytes());
    push_field(&mut out, candidate.as_bytes());
    out
}

pub(crate) fn race_context(nonce: &[u8], race: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + nonce.len() + race.len());
    push_field(&mut out, nonce);
    push_field(&mut out, race.as_bytes());
    out
}

fn check_races(plaintext: &PlaintextBallot) -> Result<(), Error> {
    let mut seen = BTreeSet::new();

    for race in &plaintext.races {
        if !seen.insert(race.name.as_str()) {
            return Err(InvalidSelection(format!("race {} appears twice", race.name)).into());
        }
        if race.selected() != race.selection_limit {
            return Err(InvalidSelection(format!(
                "race {} has {} selections, expected {}",
                race.name,
                race.selected(),
                race.selection_limit
            ))
            .into());
        }
    }

    Ok(())
}

/// Encrypts and proves one race given the plaintext bit and randomness of
/// every candidate.
#[allow(clippy::too_many_arguments)]
fn seal_race<R>(
    pk: &PublicKey,
    name: &str,
    selection_limit: u64,
    openings: &BTreeMap<String, (bool, BigUint)>,
    nonce: &[u8],
    rng: &mut R,
    hasher: &mut Hasher,
    buf: &mut [u8; 64],
) -> Result<EncryptedRace, Error>
where
    R: CryptoRng + RngCore,
{
    let mut votes = BTreeMap::new();

    for (candidate, (selected, r)) in openings {
        let m = u64::from(*selected);
        let ciphertext = encrypt(pk, m, r);
        let proof = prove_membership(
            pk,
            &ciphertext,
            m,
            r,
            &vote_context(nonce, name, candidate),
            rng,
            hasher,
            buf,
        )?;
        votes.insert(candidate.clone(), EncryptedVote { ciphertext, proof });
    }

    let ciphertexts: Vec<Ciphertext> = votes.values().map(|v| v.ciphertext.clone()).collect();
    let randomness: Vec<BigUint> = openings.values().map(|(_, r)| r.clone()).collect();

    let sum_proof = prove_sum(
        pk,
        &ciphertexts,
        selection_limit,
        &randomness,
        &race_context(nonce, name),
        rng,
        hasher,
        buf,
    );

    randomness.into_iter().for_each(|mut r| wipe(&mut r));

    Ok(EncryptedRace {
        name: name.to_string(),
        selection_limit,
        votes,
        sum_proof: sum_proof?,
    })
}

/// Encrypts every vote under fresh randomness and attaches a membership proof
/// per vote and a sum proof per race, all bound to `nonce`.
pub fn encrypt_ballot<R>(
    pk: &PublicKey,
    plaintext: &PlaintextBallot,
    nonce: &[u8],
    rng: &mut R,
) -> Result<(EncryptedBallot, BallotWitness), Error>
where
    R: CryptoRng + RngCore,
{
    check_races(plaintext)?;

    let group = pk.group();
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 64];
    let mut witness = BallotWitness::default();
    let mut races = Vec::with_capacity(plaintext.races.len());

    for race in &plaintext.races {
        let openings: BTreeMap<String, (bool, BigUint)> = race
            .votes
            .iter()
            .map(|(candidate, selected)| {
                (candidate.clone(), (*selected, group.random_exponent(rng)))
            })
            .collect();

        races.push(seal_race(
            pk,
            &race.name,
            race.selection_limit,
            &openings,
            nonce,
            rng,
            &mut hasher,
            &mut buf,
        )?);
        witness.races.insert(race.name.clone(), openings);
    }

    Ok((
        EncryptedBallot {
            ballot_id: plaintext.ballot_id.clone(),
            nonce: nonce.to_vec(),
            races,
        },
        witness,
    ))
}

/// Opens every vote individually. Only meant for challenged ballots, the
/// regular tally never decrypts a single ballot.
pub fn decrypt_ballot(
    key: &CombinedPrivateKey,
    encrypted: &EncryptedBallot,
) -> Result<PlaintextBallot, Error> {
    open_ballot(encrypted, |_, _, ciphertext| decrypt(key, ciphertext, 1))
}

/// Rebuilds the plaintext of `encrypted`, with `open(race, candidate, c)`
/// yielding the plaintext of each vote.
pub(crate) fn open_ballot<F>(encrypted: &EncryptedBallot, open: F) -> Result<PlaintextBallot, Error>
where
    F: Fn(&str, &str, &Ciphertext) -> Result<u64, Error> + Sync,
{
    let races = encrypted
        .races
        .par_iter()
        .map(|race| -> Result<PlaintextRace, Error> {
            let votes = race
                .votes
                .iter()
                .map(|(candidate, vote)| -> Result<(String, bool), Error> {
                    Ok((candidate.clone(), open(&race.name, candidate, &vote.ciphertext)? == 1))
                })
                .collect::<Result<BTreeMap<String, bool>, Error>>()?;

            Ok(PlaintextRace {
                name: race.name.clone(),
                selection_limit: race.selection_limit,
                votes,
            })
        })
        .collect::<Result<Vec<PlaintextRace>, Error>>()?;

    Ok(PlaintextBallot {
        ballot_id: encrypted.ballot_id.clone(),
        races,
    })
}

/// Re-randomizes every ciphertext of `encrypted` and proves the result afresh
/// under `new_nonce`. The witness must open the current ciphertexts; the
/// returned witness opens the new ones.
pub fn reencrypt_ballot<R>(
    pk: &PublicKey,
    encrypted: &EncryptedBallot,
    witness: &BallotWitness,
    new_nonce: &[u8],
    rng: &mut R,
) -> Result<(EncryptedBallot, BallotWitness), Error>
where
    R: CryptoRng + RngCore,
{
    let group = pk.group();

    if witness.len() != encrypted.races.iter().map(|race| race.votes.len()).sum::<usize>() {
        return Err(BallotMismatch("witness does not cover the ballot".into()).into());
    }

    let mut hasher = Hasher::new();
    let mut buf = [0u8; 64];
    let mut fresh = BallotWitness::default();
    let mut races = Vec::with_capacity(encrypted.races.len());

    for race in &encrypted.races {
        let mut openings = BTreeMap::new();

        for (candidate, vote) in &race.votes {
            let (selected, r) = witness.get(&race.name, candidate).ok_or_else(|| {
                Error::from(BallotMismatch(format!(
                    "no witness for {}/{}",
                    race.name, candidate
                )))
            })?;

            if encrypt(pk, u64::from(*selected), r) != vote.ciphertext {
                return Err(BallotMismatch(format!(
                    "witness does not open {}/{}",
                    race.name, candidate
                ))
                .into());
            }

            let shift = group.random_exponent(rng);
            openings.insert(candidate.clone(), (*selected, group.add_q(r, &shift)));
        }

        races.push(seal_race(
            pk,
            &race.name,
            race.selection_limit,
            &openings,
            new_nonce,
            rng,
            &mut hasher,
            &mut buf,
        )?);
        fresh.races.insert(race.name.clone(), openings);
    }

    Ok((
        EncryptedBallot {
            ballot_id: encrypted.ballot_id.clone(),
            nonce: new_nonce.to_vec(),
            races,
        },
        fresh,
    ))
}

/// Checks every membership and sum proof on the ballot against its own nonce.
pub fn verify_ballot(pk: &PublicKey, encrypted: &EncryptedBallot) -> Result<(), Error> {
    let nonce = &encrypted.nonce;

    let votes: Vec<(&EncryptedRace, &String, &EncryptedVote)> = encrypted
        .races
        .iter()
        .flat_map(|race| race.votes.iter().map(move |(candidate, vote)| (race, candidate, vote)))
        .collect();

    let bad_vote = votes
        .par_iter()
        .map_init(
            || (Hasher::new(), [0u8; 64]),
            |(hasher, buf), (race, candidate, vote)| {
                let context = vote_context(nonce, &race.name, candidate);
                (!verify_membership(pk, &vote.ciphertext, &vote.proof, &context, hasher, buf))
                    .then(|| format!("membership proof for {}/{}", race.name, candidate))
            },
        )
        .find_map_any(|failure| failure);

    if let Some(reason) = bad_vote {
        return Err(InvalidProof(reason).into());
    }

    let bad_race = encrypted
        .races
        .par_iter()
        .map_init(
            || (Hasher::new(), [0u8; 64]),
            |(hasher, buf), race| {
                let context = race_context(nonce, &race.name);
                (!verify_sum(
                    pk,
                    &race.ciphertexts(),
                    race.selection_limit,
                    &race.sum_proof,
                    &context,
                    hasher,
                    buf,
                ))
                .then(|| format!("sum proof for race {}", race.name))
            },
        )
        .find_map_any(|failure| failure);

    match bad_race {
        Some(reason) => Err(InvalidProof(reason).into()),
        None => Ok(()),
    }
}
