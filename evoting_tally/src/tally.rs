//! Ballot lifecycle and homomorphic tally.
//!
//! A ballot enters as `Committed` once its proofs check out, then moves to
//! `Confirmed` (folded into every race's running ciphertext) or `Challenged`
//! (kept out of the tally for good and opened for audit). The report closes
//! the engine.
//!
//! Locking: one mutex over the ballot map, one mutex per race record and a
//! read/write gate over the engine phase. Mutating calls hold the gate's read
//! side for their short critical section; the report takes the write side so
//! it runs after every in-flight transition and before any later one. Race
//! records are always locked in name order, and before the ballot map when
//! both are held.
//!
//! A report is produced either from the reconstructed election key or, without
//! the key ever existing in one place, from the authorities' partial
//! decryptions of [`TallyEngine::close`]'s output.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use common::{
    error::{
        Error,
        ErrorKind::{
            BadKey, BallotMismatch, DuplicateBallot, InvalidKeyShare, InvalidTransition,
            LockPoisoned, TallyClosed, UnknownBallot,
        },
    },
    group::GroupParameters,
};
use log::{debug, info, warn};
use rayon::prelude::*;
use threshold::keys::{CombinedPrivateKey, PartialDecryption, PrivateKeyShare};

use crate::{
    ballot::{
        EncryptedBallot, EncryptedRace, PlaintextBallot, decrypt_ballot, open_ballot,
        verify_ballot,
    },
    cipher::{Ciphertext, decrypt, decrypt_with_partials, partial_decrypt},
    config::{ElectionContext, RaceDefinition, TallyConfig},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BallotState {
    Committed,
    Confirmed,
    Challenged,
}

impl BallotState {
    pub fn name(self) -> &'static str {
        match self {
            BallotState::Committed => "committed",
            BallotState::Confirmed => "confirmed",
            BallotState::Challenged => "challenged",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    /// A report was attempted and failed; nothing new is accepted.
    Closed,
    Reported,
}

struct Entry {
    ballot: Arc<EncryptedBallot>,
    state: BallotState,
}

#[derive(Default)]
struct Ballots {
    by_nonce: HashMap<Vec<u8>, Entry>,
    by_id: HashMap<String, Vec<u8>>,
}

impl Ballots {
    fn count(&self, state: BallotState) -> usize {
        self.by_nonce.values().filter(|e| e.state == state).count()
    }

    fn in_state(&self, state: BallotState) -> Vec<Arc<EncryptedBallot>> {
        self.by_nonce
            .values()
            .filter(|e| e.state == state)
            .map(|e| Arc::clone(&e.ballot))
            .collect()
    }
}

/// Running per-candidate ciphertexts of one race and the ballots folded in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TallyRecord {
    totals: BTreeMap<String, Ciphertext>,
    ballot_ids: BTreeSet<String>,
}

impl TallyRecord {
    fn new(race: &RaceDefinition) -> Self {
        Self {
            totals: race
                .candidates
                .iter()
                .map(|c| (c.clone(), Ciphertext::identity()))
                .collect(),
            ballot_ids: BTreeSet::new(),
        }
    }

    /// Multiplies the race's ciphertexts into the totals unless `ballot_id`
    /// is already in. Returns whether anything changed.
    fn fold(&mut self, ballot_id: &str, race: &EncryptedRace, group: &GroupParameters) -> bool {
        if !self.ballot_ids.insert(ballot_id.to_string()) {
            return false;
        }

        for (candidate, vote) in race.votes() {
            if let Some(total) = self.totals.get_mut(candidate) {
                *total = total.combine(vote.ciphertext(), group);
            }
        }

        true
    }

    pub fn totals(&self) -> &BTreeMap<String, Ciphertext> {
        &self.totals
    }

    pub fn ballot_ids(&self) -> &BTreeSet<String> {
        &self.ballot_ids
    }
}

/// Decrypted result: race -> candidate -> count, plus the opened challenged
/// ballots keyed by ballot-id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TallyReport {
    races: BTreeMap<String, BTreeMap<String, u64>>,
    challenged: BTreeMap<String, PlaintextBallot>,
}

impl TallyReport {
    pub fn races(&self) -> &BTreeMap<String, BTreeMap<String, u64>> {
        &self.races
    }

    pub fn race(&self, name: &str) -> Option<&BTreeMap<String, u64>> {
        self.races.get(name)
    }

    pub fn total(&self, race: &str, candidate: &str) -> Option<u64> {
        self.races.get(race)?.get(candidate).copied()
    }

    pub fn challenged(&self) -> &BTreeMap<String, PlaintextBallot> {
        &self.challenged
    }

    /// `"race/candidate"` -> decimal count.
    pub fn to_strings(&self) -> BTreeMap<String, String> {
        self.races
            .iter()
            .flat_map(|(race, totals)| {
                totals
                    .iter()
                    .map(move |(candidate, n)| (format!("{race}/{candidate}"), n.to_string()))
            })
            .collect()
    }
}

impl fmt::Display for TallyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, n) in self.to_strings() {
            writeln!(f, "{key}: {n}")?;
        }
        Ok(())
    }
}

/// `(race, candidate)`.
pub type TotalSlot = (String, String);

/// `(ballot-id, race, candidate)`.
pub type VoteSlot = (String, String, String);

/// Everything a report decrypts: the running total of every race/candidate
/// and the challenged ballots, opened for audit.
#[derive(Clone, Debug)]
pub struct TallyCiphertexts {
    totals: BTreeMap<TotalSlot, Ciphertext>,
    challenged: Vec<Arc<EncryptedBallot>>,
}

impl TallyCiphertexts {
    pub fn totals(&self) -> &BTreeMap<TotalSlot, Ciphertext> {
        &self.totals
    }

    /// Sorted by ballot-id.
    pub fn challenged(&self) -> &[Arc<EncryptedBallot>] {
        &self.challenged
    }

    fn challenged_votes(&self) -> Vec<(VoteSlot, &Ciphertext)> {
        self.challenged
            .iter()
            .flat_map(|ballot| {
                ballot.races.iter().flat_map(move |race| {
                    race.votes.iter().map(move |(candidate, vote)| {
                        (
                            (
                                ballot.ballot_id.clone(),
                                race.name.clone(),
                                candidate.clone(),
                            ),
                            &vote.ciphertext,
                        )
                    })
                })
            })
            .collect()
    }
}

/// One authority's partial decryptions of a [`TallyCiphertexts`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionShare {
    index: usize,
    totals: BTreeMap<TotalSlot, PartialDecryption>,
    challenged: BTreeMap<VoteSlot, PartialDecryption>,
}

impl DecryptionShare {
    pub fn new(share: &PrivateKeyShare, ciphertexts: &TallyCiphertexts) -> Result<Self, Error> {
        let totals = ciphertexts
            .totals
            .par_iter()
            .map(|(slot, c)| -> Result<_, Error> { Ok((slot.clone(), partial_decrypt(share, c)?)) })
            .collect::<Result<BTreeMap<_, _>, Error>>()?;

        let challenged = ciphertexts
            .challenged_votes()
            .into_par_iter()
            .map(|(slot, c)| -> Result<_, Error> { Ok((slot, partial_decrypt(share, c)?)) })
            .collect::<Result<BTreeMap<_, _>, Error>>()?;

        Ok(Self {
            index: share.index(),
            totals,
            challenged,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Every authority's partial decryption of one slot.
fn gather<'a, F, D>(
    shares: &'a [DecryptionShare],
    pick: F,
    describe: D,
) -> Result<Vec<PartialDecryption>, Error>
where
    F: Fn(&'a DecryptionShare) -> Option<&'a PartialDecryption>,
    D: Fn() -> String,
{
    shares
        .iter()
        .map(|share| {
            pick(share).cloned().ok_or_else(|| {
                Error::from(InvalidKeyShare(format!(
                    "authority {} sent no partial decryption of {}",
                    share.index,
                    describe()
                )))
            })
        })
        .collect()
}

/// Decrypts every total with `open` and regroups the counts by race.
fn decrypt_totals<F>(
    totals: &BTreeMap<TotalSlot, Ciphertext>,
    open: F,
) -> Result<BTreeMap<String, BTreeMap<String, u64>>, Error>
where
    F: Fn(&TotalSlot, &Ciphertext) -> Result<u64, Error> + Sync,
{
    let decrypted = totals
        .par_iter()
        .map(|(slot, c)| -> Result<_, Error> { Ok((slot, open(slot, c)?)) })
        .collect::<Result<Vec<_>, Error>>()?;

    let mut races: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    for ((race, candidate), n) in decrypted {
        races
            .entry(race.clone())
            .or_default()
            .insert(candidate.clone(), n);
    }

    Ok(races)
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> Result<MutexGuard<'a, T>, Error> {
    mutex.lock().map_err(|_| Error::from(LockPoisoned(name)))
}

pub struct TallyEngine {
    context: Arc<ElectionContext>,
    config: TallyConfig,
    ballots: Mutex<Ballots>,
    records: BTreeMap<String, Mutex<TallyRecord>>,
    phase: RwLock<Phase>,
}

impl TallyEngine {
    pub fn new(context: Arc<ElectionContext>, config: TallyConfig) -> Self {
        let records = context
            .races()
            .map(|race| (race.name.clone(), Mutex::new(TallyRecord::new(race))))
            .collect();

        Self {
            context,
            config,
            ballots: Mutex::new(Ballots::default()),
            records,
            phase: RwLock::new(Phase::Open),
        }
    }

    pub fn context(&self) -> &Arc<ElectionContext> {
        &self.context
    }

    pub fn config(&self) -> TallyConfig {
        self.config
    }

    /// Read side of the phase gate, refused once the engine is closed.
    fn open(&self) -> Result<RwLockReadGuard<'_, Phase>, Error> {
        let phase = self
            .phase
            .read()
            .map_err(|_| Error::from(LockPoisoned("tally phase")))?;

        if *phase == Phase::Open {
            Ok(phase)
        } else {
            Err(TallyClosed.into())
        }
    }

    fn ballots(&self) -> Result<MutexGuard<'_, Ballots>, Error> {
        lock(&self.ballots, "ballot map")
    }

    /// Checks `ballot` against the election and its own proofs, then records
    /// it as committed under `nonce`. Verification runs before any lock is
    /// taken; a ballot that fails it leaves no trace.
    pub fn record_votes(&self, ballot: EncryptedBallot, nonce: &[u8]) -> Result<(), Error> {
        drop(self.open()?);

        if ballot.nonce() != nonce {
            warn!("ballot {}: nonce does not match its proofs", ballot.ballot_id());
            return Err(BallotMismatch(format!(
                "ballot {} is bound to nonce {}, not {}",
                ballot.ballot_id(),
                hex::encode(ballot.nonce()),
                hex::encode(nonce)
            ))
            .into());
        }

        self.context
            .check_ballot(&ballot)
            .and_then(|_| verify_ballot(self.context.public_key(), &ballot))
            .inspect_err(|e| warn!("rejected ballot {}: {}", ballot.ballot_id(), e))?;

        let _open = self.open()?;
        let mut ballots = self.ballots()?;

        if ballots.by_nonce.contains_key(nonce) {
            return Err(DuplicateBallot(format!("nonce {}", hex::encode(nonce))).into());
        }
        if ballots.by_id.contains_key(ballot.ballot_id()) {
            return Err(DuplicateBallot(ballot.ballot_id().to_string()).into());
        }

        debug!("ballot {} committed", ballot.ballot_id());

        ballots
            .by_id
            .insert(ballot.ballot_id().to_string(), nonce.to_vec());
        ballots.by_nonce.insert(
            nonce.to_vec(),
            Entry {
                ballot: Arc::new(ballot),
                state: BallotState::Committed,
            },
        );

        Ok(())
    }

    /// Committed -> Confirmed, folding the ballot into every race. Returns
    /// `Ok(false)` if the ballot was already confirmed.
    pub fn confirmed(&self, nonce: &[u8]) -> Result<bool, Error> {
        let _open = self.open()?;

        // every race lock, in name order, before the transition: a ballot is
        // never marked confirmed without being folded
        let mut guards = self
            .records
            .iter()
            .map(|(name, record)| -> Result<_, Error> { Ok((name, lock(record, "race record")?)) })
            .collect::<Result<Vec<_>, Error>>()?;

        let ballot = {
            let mut ballots = self.ballots()?;
            let entry = ballots
                .by_nonce
                .get_mut(nonce)
                .ok_or_else(|| Error::from(UnknownBallot(hex::encode(nonce))))?;

            match entry.state {
                BallotState::Confirmed => return Ok(false),
                BallotState::Challenged => {
                    return Err(InvalidTransition(
                        entry.ballot.ballot_id().to_string(),
                        BallotState::Challenged.name(),
                        BallotState::Confirmed.name(),
                    )
                    .into());
                }
                BallotState::Committed => {
                    entry.state = BallotState::Confirmed;
                    Arc::clone(&entry.ballot)
                }
            }
        };

        let group = self.context.group();
        for (name, record) in &mut guards {
            if let Some(race) = ballot.race(name.as_str()) {
                record.fold(ballot.ballot_id(), race, group);
            }
        }
        drop(guards);

        debug!("ballot {} confirmed", ballot.ballot_id());

        Ok(true)
    }

    /// Committed -> Challenged. The ballot never enters the tally. Returns
    /// `Ok(false)` if it was already challenged.
    pub fn challenge(&self, nonce: &[u8]) -> Result<bool, Error> {
        let _open = self.open()?;
        let mut ballots = self.ballots()?;
        let entry = ballots
            .by_nonce
            .get_mut(nonce)
            .ok_or_else(|| Error::from(UnknownBallot(hex::encode(nonce))))?;

        match entry.state {
            BallotState::Challenged => Ok(false),
            BallotState::Confirmed => Err(InvalidTransition(
                entry.ballot.ballot_id().to_string(),
                BallotState::Confirmed.name(),
                BallotState::Challenged.name(),
            )
            .into()),
            BallotState::Committed => {
                entry.state = BallotState::Challenged;
                debug!("ballot {} challenged", entry.ballot.ballot_id());
                Ok(true)
            }
        }
    }

    pub fn state(&self, nonce: &[u8]) -> Result<Option<BallotState>, Error> {
        Ok(self.ballots()?.by_nonce.get(nonce).map(|e| e.state))
    }

    /// The nonce a ballot-id was committed under.
    pub fn nonce_for(&self, ballot_id: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.ballots()?.by_id.get(ballot_id).cloned())
    }

    pub fn pending_count(&self) -> Result<usize, Error> {
        Ok(self.ballots()?.count(BallotState::Committed))
    }

    pub fn confirmed_count(&self) -> Result<usize, Error> {
        Ok(self.ballots()?.count(BallotState::Confirmed))
    }

    /// Ids of the challenged ballots, sorted.
    pub fn challenged_ballots(&self) -> Result<Vec<String>, Error> {
        let mut ids: Vec<String> = self
            .ballots()?
            .in_state(BallotState::Challenged)
            .iter()
            .map(|b| b.ballot_id().to_string())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Snapshot of one race's running record.
    pub fn record(&self, race: &str) -> Result<Option<TallyRecord>, Error> {
        match self.records.get(race) {
            Some(record) => Ok(Some(lock(record, "race record")?.clone())),
            None => Ok(None),
        }
    }

    /// Opens every challenged ballot individually.
    pub fn audit_challenged(
        &self,
        key: &CombinedPrivateKey,
    ) -> Result<BTreeMap<String, PlaintextBallot>, Error> {
        if !key.matches(self.context.public_key()) {
            return Err(BadKey("private key does not match the election public key".into()).into());
        }

        let challenged = self.ballots()?.in_state(BallotState::Challenged);

        challenged
            .par_iter()
            .map(|ballot| -> Result<(String, PlaintextBallot), Error> {
                Ok((ballot.ballot_id().to_string(), decrypt_ballot(key, ballot)?))
            })
            .collect()
    }

    /// Write side of the phase gate, with the engine closed to new ballots
    /// and transitions. Refused once a report exists.
    fn close_gate(&self) -> Result<RwLockWriteGuard<'_, Phase>, Error> {
        let mut phase = self
            .phase
            .write()
            .map_err(|_| Error::from(LockPoisoned("tally phase")))?;

        if *phase == Phase::Reported {
            return Err(TallyClosed.into());
        }
        *phase = Phase::Closed;

        Ok(phase)
    }

    fn ciphertexts(&self) -> Result<TallyCiphertexts, Error> {
        let mut totals = BTreeMap::new();
        for (race, record) in &self.records {
            for (candidate, ciphertext) in lock(record, "race record")?.totals() {
                totals.insert((race.clone(), candidate.clone()), ciphertext.clone());
            }
        }

        let mut challenged = self.ballots()?.in_state(BallotState::Challenged);
        challenged.sort_by(|a, b| a.ballot_id().cmp(b.ballot_id()));

        Ok(TallyCiphertexts { totals, challenged })
    }

    fn confirmed_within(&self, bound: u64) -> Result<usize, Error> {
        let confirmed = self.confirmed_count()?;
        if bound < confirmed as u64 {
            warn!("search bound {bound} is below the {confirmed} confirmed ballots");
        }
        Ok(confirmed)
    }

    /// Closes the engine and returns what the authorities partially decrypt
    /// into [`DecryptionShare`]s for [`TallyEngine::get_report_from_shares`].
    pub fn close(&self) -> Result<TallyCiphertexts, Error> {
        let _closed = self.close_gate()?;
        let ciphertexts = self.ciphertexts()?;

        info!(
            "tally closed: {} totals, {} challenged ballots to decrypt",
            ciphertexts.totals.len(),
            ciphertexts.challenged.len()
        );

        Ok(ciphertexts)
    }

    /// Closes the engine and decrypts every race total with the configured
    /// search bound. The key is consumed and wiped before returning.
    pub fn get_report(&self, key: CombinedPrivateKey) -> Result<TallyReport, Error> {
        self.get_report_with_bound(key, self.config.search_bound)
    }

    /// As [`TallyEngine::get_report`] with an explicit bound, e.g. to retry
    /// after [`SearchSpaceExhausted`](common::error::ErrorKind::SearchSpaceExhausted).
    pub fn get_report_with_bound(
        &self,
        key: CombinedPrivateKey,
        bound: u64,
    ) -> Result<TallyReport, Error> {
        let mut phase = self.close_gate()?;

        if !key.matches(self.context.public_key()) {
            return Err(BadKey("private key does not match the election public key".into()).into());
        }

        let confirmed = self.confirmed_within(bound)?;
        let ciphertexts = self.ciphertexts()?;

        let races = decrypt_totals(&ciphertexts.totals, |_, c| decrypt(&key, c, bound))?;
        let challenged = ciphertexts
            .challenged
            .par_iter()
            .map(|ballot| -> Result<(String, PlaintextBallot), Error> {
                Ok((ballot.ballot_id().to_string(), decrypt_ballot(&key, ballot)?))
            })
            .collect::<Result<BTreeMap<_, _>, Error>>()?;
        drop(key);

        *phase = Phase::Reported;
        info!(
            "tally report generated: {} races, {} confirmed ballots, {} challenged",
            races.len(),
            confirmed,
            challenged.len()
        );

        Ok(TallyReport { races, challenged })
    }

    /// Threshold report: every total and every challenged vote is decrypted
    /// from the authorities' partial decryptions, at least `t` of them per
    /// ciphertext, with the configured search bound. Too few shares leave the
    /// engine closed but unreported, so the call can be repeated.
    pub fn get_report_from_shares(
        &self,
        shares: &[DecryptionShare],
    ) -> Result<TallyReport, Error> {
        let mut phase = self.close_gate()?;
        let bound = self.config.search_bound;
        let group = self.context.group();

        let confirmed = self.confirmed_within(bound)?;
        let ciphertexts = self.ciphertexts()?;

        let races = decrypt_totals(&ciphertexts.totals, |slot, c| {
            let partials = gather(
                shares,
                |share| share.totals.get(slot),
                || format!("{}/{}", slot.0, slot.1),
            )?;
            decrypt_with_partials(group, c, &partials, bound)
        })?;

        let challenged = ciphertexts
            .challenged
            .par_iter()
            .map(|ballot| -> Result<(String, PlaintextBallot), Error> {
                let id = ballot.ballot_id();
                let plaintext = open_ballot(ballot, |race, candidate, c| {
                    let slot = (id.to_string(), race.to_string(), candidate.to_string());
                    let partials = gather(
                        shares,
                        |share| share.challenged.get(&slot),
                        || format!("{id}/{race}/{candidate}"),
                    )?;
                    decrypt_with_partials(group, c, &partials, 1)
                })?;
                Ok((id.to_string(), plaintext))
            })
            .collect::<Result<BTreeMap<_, _>, Error>>()?;

        *phase = Phase::Reported;
        info!(
            "threshold tally report generated from {} authorities: {} races, {} confirmed ballots, {} challenged",
            shares.len(),
            races.len(),
            confirmed,
            challenged.len()
        );

        Ok(TallyReport { races, challenged })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ballot::{PlaintextRace, encrypt_ballot},
        config::ElectionConfig,
    };
    use common::error::ErrorKind;
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use threshold::keys::{PrivateKeyShare, combine_private_key};

    const P256: &[u8] = b"c998ff967972196995c8de6284b5bf11a36ae4d26bd3767468e33bd0e61a5a7f";

    struct Setup {
        engine: TallyEngine,
        shares: Vec<PrivateKeyShare>,
        rng: ChaCha20Rng,
    }

    fn setup(seed: u64, search_bound: u64) -> Setup {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let group =
            GroupParameters::new(BigUint::parse_bytes(P256, 16).unwrap(), BigUint::from(4u32))
                .unwrap();
        let (pk, shares) = ElectionConfig::new(3, 2)
            .unwrap()
            .run_key_ceremony(&group, &mut rng)
            .unwrap();
        let context = ElectionContext::new(
            pk,
            vec![
                RaceDefinition::new("mayor", 1, ["ann", "ben"]),
                RaceDefinition::new("council", 2, ["cat", "dan", "eve"]),
            ],
        )
        .unwrap();

        Setup {
            engine: TallyEngine::new(Arc::new(context), TallyConfig::new(search_bound)),
            shares,
            rng,
        }
    }

    impl Setup {
        fn ballot(&mut self, id: &str, mayor: &str, council: [&str; 2]) -> EncryptedBallot {
            let context = Arc::clone(self.engine.context());
            let mut plaintext = context.blank_ballot(id);
            let mayor = [mayor];
            for race in plaintext.races.iter_mut() {
                let picks: &[&str] = if race.name == "mayor" { &mayor } else { &council };
                for pick in picks {
                    race.votes.insert(pick.to_string(), true);
                }
            }
            let nonce = format!("nonce-{id}");
            encrypt_ballot(context.public_key(), &plaintext, nonce.as_bytes(), &mut self.rng)
                .unwrap()
                .0
        }

        fn key(&self) -> CombinedPrivateKey {
            combine_private_key(&self.shares[1..]).unwrap()
        }
    }

    fn kind_of<T>(res: Result<T, Error>) -> ErrorKind {
        res.err().unwrap().0
    }

    #[test]
    fn commit_confirm_report() {
        let mut s = setup(1, 10);
        for (id, mayor, council) in [
            ("b1", "ann", ["cat", "dan"]),
            ("b2", "ben", ["cat", "eve"]),
            ("b3", "ann", ["dan", "eve"]),
        ] {
            let ballot = s.ballot(id, mayor, council);
            let nonce = ballot.nonce().to_vec();
            s.engine.record_votes(ballot, &nonce).unwrap();
            assert!(s.engine.confirmed(&nonce).unwrap());
        }

        assert_eq!(s.engine.confirmed_count().unwrap(), 3);
        assert_eq!(s.engine.pending_count().unwrap(), 0);
        assert_eq!(s.engine.record("mayor").unwrap().unwrap().ballot_ids().len(), 3);

        let report = s.engine.get_report(s.key()).unwrap();
        assert_eq!(report.total("mayor", "ann"), Some(2));
        assert_eq!(report.total("mayor", "ben"), Some(1));
        assert_eq!(report.total("council", "cat"), Some(2));
        assert_eq!(report.total("council", "dan"), Some(2));
        assert_eq!(report.total("council", "eve"), Some(2));
        assert_eq!(report.to_strings()["mayor/ann"], "2");
        assert!(report.to_string().contains("council/eve: 2"));
    }

    #[test]
    fn rejected_ballots_leave_no_trace() {
        let mut s = setup(2, 10);
        let ballot = s.ballot("b1", "ann", ["cat", "dan"]);

        // the nonce the proofs are bound to must be the one recorded
        assert!(matches!(
            kind_of(s.engine.record_votes(ballot.clone(), b"other")),
            ErrorKind::BallotMismatch(_)
        ));

        let mut forged = ballot.clone();
        forged.nonce = b"other".to_vec();
        assert!(matches!(
            kind_of(s.engine.record_votes(forged, b"other")),
            ErrorKind::InvalidProof(_)
        ));

        let mut partial = ballot.clone();
        partial.races.pop();
        assert!(matches!(
            kind_of(s.engine.record_votes(partial, ballot.nonce())),
            ErrorKind::BallotMismatch(_)
        ));

        assert_eq!(s.engine.pending_count().unwrap(), 0);
        assert_eq!(s.engine.state(ballot.nonce()).unwrap(), None);
    }

    #[test]
    fn duplicates_are_refused() {
        let mut s = setup(3, 10);
        let ballot = s.ballot("b1", "ann", ["cat", "dan"]);
        let nonce = ballot.nonce().to_vec();
        s.engine.record_votes(ballot.clone(), &nonce).unwrap();

        assert!(matches!(
            kind_of(s.engine.record_votes(ballot, &nonce)),
            ErrorKind::DuplicateBallot(_)
        ));

        // same id under a fresh nonce
        let context = Arc::clone(s.engine.context());
        let mut plaintext = context.blank_ballot("b1");
        plaintext.races[0] = PlaintextRace::new("council", 2, [("cat", true), ("dan", true), ("eve", false)]);
        plaintext.races[1] = PlaintextRace::new("mayor", 1, [("ann", true), ("ben", false)]);
        let (again, _) =
            encrypt_ballot(context.public_key(), &plaintext, b"fresh", &mut s.rng).unwrap();
        assert!(matches!(
            kind_of(s.engine.record_votes(again, b"fresh")),
            ErrorKind::DuplicateBallot(_)
        ));
    }

    #[test]
    fn transitions() {
        let mut s = setup(4, 10);
        let a = s.ballot("a", "ann", ["cat", "dan"]);
        let b = s.ballot("b", "ben", ["cat", "eve"]);
        let (na, nb) = (a.nonce().to_vec(), b.nonce().to_vec());
        s.engine.record_votes(a, &na).unwrap();
        s.engine.record_votes(b, &nb).unwrap();

        assert!(matches!(
            kind_of(s.engine.confirmed(b"nope")),
            ErrorKind::UnknownBallot(_)
        ));
        assert!(matches!(
            kind_of(s.engine.challenge(b"nope")),
            ErrorKind::UnknownBallot(_)
        ));

        assert!(s.engine.confirmed(&na).unwrap());
        assert!(!s.engine.confirmed(&na).unwrap());
        assert!(matches!(
            kind_of(s.engine.challenge(&na)),
            ErrorKind::InvalidTransition(_, "confirmed", "challenged")
        ));

        assert!(s.engine.challenge(&nb).unwrap());
        assert!(!s.engine.challenge(&nb).unwrap());
        assert!(matches!(
            kind_of(s.engine.confirmed(&nb)),
            ErrorKind::InvalidTransition(_, "challenged", "confirmed")
        ));

        assert_eq!(s.engine.state(&na).unwrap(), Some(BallotState::Confirmed));
        assert_eq!(s.engine.state(&nb).unwrap(), Some(BallotState::Challenged));
        assert_eq!(s.engine.challenged_ballots().unwrap(), vec!["b".to_string()]);
        assert_eq!(s.engine.nonce_for("a").unwrap(), Some(na));

        let audit = s.engine.audit_challenged(&s.key()).unwrap();
        assert_eq!(audit["b"].races.len(), 2);

        let report = s.engine.get_report(s.key()).unwrap();
        assert_eq!(report.total("mayor", "ben"), Some(0));
        assert!(report.challenged().contains_key("b"));
    }

    #[test]
    fn report_closes_the_engine() {
        let mut s = setup(5, 10);
        let a = s.ballot("a", "ann", ["cat", "dan"]);
        let b = s.ballot("b", "ben", ["cat", "eve"]);
        let na = a.nonce().to_vec();
        s.engine.record_votes(a, &na).unwrap();

        // a key for some other election
        let other = setup(6, 10);
        assert!(matches!(
            kind_of(s.engine.get_report(other.key())),
            ErrorKind::BadKey(_)
        ));

        // the failed attempt already closed the engine
        let nb = b.nonce().to_vec();
        assert!(matches!(
            kind_of(s.engine.record_votes(b, &nb)),
            ErrorKind::TallyClosed
        ));
        assert!(matches!(kind_of(s.engine.confirmed(&na)), ErrorKind::TallyClosed));

        let report = s.engine.get_report(s.key()).unwrap();
        assert_eq!(report.total("mayor", "ann"), Some(0));

        assert!(matches!(
            kind_of(s.engine.get_report(s.key())),
            ErrorKind::TallyClosed
        ));
    }

    #[test]
    fn search_bound_can_be_widened() {
        let mut s = setup(7, 1);
        for id in ["a", "b"] {
            let ballot = s.ballot(id, "ann", ["cat", "dan"]);
            let nonce = ballot.nonce().to_vec();
            s.engine.record_votes(ballot, &nonce).unwrap();
            s.engine.confirmed(&nonce).unwrap();
        }

        assert!(matches!(
            kind_of(s.engine.get_report(s.key())),
            ErrorKind::SearchSpaceExhausted(1)
        ));

        let report = s.engine.get_report_with_bound(s.key(), 2).unwrap();
        assert_eq!(report.total("mayor", "ann"), Some(2));
    }

    #[test]
    fn threshold_report_from_partial_decryptions() {
        let mut s = setup(8, 10);
        let mut nonces = Vec::new();
        for (id, mayor, council) in [
            ("a", "ann", ["cat", "dan"]),
            ("b", "ben", ["dan", "eve"]),
            ("c", "ann", ["cat", "eve"]),
        ] {
            let ballot = s.ballot(id, mayor, council);
            let nonce = ballot.nonce().to_vec();
            s.engine.record_votes(ballot, &nonce).unwrap();
            nonces.push(nonce);
        }
        s.engine.confirmed(&nonces[0]).unwrap();
        s.engine.confirmed(&nonces[1]).unwrap();
        s.engine.challenge(&nonces[2]).unwrap();

        let ciphertexts = s.engine.close().unwrap();
        assert_eq!(ciphertexts.totals().len(), 5);
        assert_eq!(ciphertexts.challenged().len(), 1);
        assert!(matches!(kind_of(s.engine.confirmed(&nonces[0])), ErrorKind::TallyClosed));

        let shares: Vec<DecryptionShare> = s
            .shares
            .iter()
            .map(|share| DecryptionShare::new(share, &ciphertexts).unwrap())
            .collect();

        // one authority alone cannot decrypt, and the engine stays reportable
        assert!(matches!(
            kind_of(s.engine.get_report_from_shares(&shares[..1])),
            ErrorKind::NotEnoughShares(1, 2)
        ));

        let mut stripped = shares[1].clone();
        stripped.totals.clear();
        assert!(matches!(
            kind_of(s.engine.get_report_from_shares(&[shares[0].clone(), stripped])),
            ErrorKind::InvalidKeyShare(_)
        ));

        let report = s
            .engine
            .get_report_from_shares(&[shares[0].clone(), shares[2].clone()])
            .unwrap();
        assert_eq!(report.total("mayor", "ann"), Some(1));
        assert_eq!(report.total("mayor", "ben"), Some(1));
        assert_eq!(report.total("council", "cat"), Some(1));
        assert_eq!(report.total("council", "dan"), Some(2));
        assert_eq!(report.total("council", "eve"), Some(1));

        let opened = &report.challenged()["c"];
        assert_eq!(opened.races.iter().map(|race| race.selected()).sum::<u64>(), 3);
        assert!(opened
            .races
            .iter()
            .any(|race| race.name == "mayor" && race.votes["ann"]));

        assert!(matches!(
            kind_of(s.engine.get_report_from_shares(&shares)),
            ErrorKind::TallyClosed
        ));
    }

    #[test]
    fn poisoned_race_record_leaves_the_ballot_pending() {
        let mut s = setup(9, 10);
        let ballot = s.ballot("a", "ann", ["cat", "dan"]);
        let nonce = ballot.nonce().to_vec();
        s.engine.record_votes(ballot, &nonce).unwrap();

        let record = &s.engine.records["council"];
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = record.lock().unwrap();
            panic!("council record holder failed");
        }));

        assert!(matches!(
            kind_of(s.engine.confirmed(&nonce)),
            ErrorKind::LockPoisoned(_)
        ));
        assert_eq!(s.engine.state(&nonce).unwrap(), Some(BallotState::Committed));
        assert_eq!(s.engine.pending_count().unwrap(), 1);
    }

    #[test]
    fn confirmation_order_does_not_matter() {
        let mut s = setup(10, 10);
        let ballots: Vec<EncryptedBallot> = [
            ("a", "ann", ["cat", "dan"]),
            ("b", "ben", ["dan", "eve"]),
            ("c", "ann", ["cat", "eve"]),
            ("d", "ben", ["cat", "dan"]),
        ]
        .into_iter()
        .map(|(id, mayor, council)| s.ballot(id, mayor, council))
        .collect();

        let other = TallyEngine::new(Arc::clone(s.engine.context()), s.engine.config());
        for ballot in &ballots {
            let nonce = ballot.nonce().to_vec();
            s.engine.record_votes(ballot.clone(), &nonce).unwrap();
            other.record_votes(ballot.clone(), &nonce).unwrap();
        }

        for ballot in &ballots {
            s.engine.confirmed(ballot.nonce()).unwrap();
        }
        for i in [2, 0, 3, 1] {
            other.confirmed(ballots[i].nonce()).unwrap();
        }

        for race in ["mayor", "council"] {
            assert_eq!(s.engine.record(race).unwrap(), other.record(race).unwrap());
        }
        assert_eq!(
            s.engine.get_report(s.key()).unwrap(),
            other.get_report(s.key()).unwrap()
        );
    }
}
