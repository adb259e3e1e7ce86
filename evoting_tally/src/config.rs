use std::collections::{BTreeMap, BTreeSet};

use common::{
    error::{
        Error,
        ErrorKind::{BallotMismatch, InvalidConfiguration, InvalidParameterSet},
    },
    group::GroupParameters,
};
use rand::{CryptoRng, RngCore};
use threshold::{
    keys::{PrivateKeyShare, PublicKey},
    utils::{generate_authorities, run_ceremony},
};

use crate::ballot::{EncryptedBallot, PlaintextBallot, PlaintextRace};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaceDefinition {
    pub name: String,
    pub candidates: BTreeSet<String>,
    pub selection_limit: u64,
}

impl RaceDefinition {
    pub fn new<S, I>(name: &str, selection_limit: u64, candidates: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        Self {
            name: name.to_string(),
            candidates: candidates.into_iter().map(Into::into).collect(),
            selection_limit,
        }
    }
}

/// Everything a ballot is checked against: the election public key and the
/// races on offer. Built once and shared behind an `Arc`.
#[derive(Clone, Debug)]
pub struct ElectionContext {
    public_key: PublicKey,
    races: BTreeMap<String, RaceDefinition>,
}

impl ElectionContext {
    pub fn new(public_key: PublicKey, races: Vec<RaceDefinition>) -> Result<Self, Error> {
        if races.is_empty() {
            return Err(InvalidConfiguration("no races defined".into()).into());
        }

        let mut by_name = BTreeMap::new();
        for race in races {
            if race.candidates.is_empty() {
                return Err(InvalidConfiguration(format!("race {} has no candidates", race.name)).into());
            }
            if race.selection_limit > race.candidates.len() as u64 {
                return Err(InvalidConfiguration(format!(
                    "race {} allows {} selections among {} candidates",
                    race.name,
                    race.selection_limit,
                    race.candidates.len()
                ))
                .into());
            }
            if by_name.contains_key(&race.name) {
                return Err(InvalidConfiguration(format!("race {} defined twice", race.name)).into());
            }
            by_name.insert(race.name.clone(), race);
        }

        Ok(Self {
            public_key,
            races: by_name,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn group(&self) -> &GroupParameters {
        self.public_key.group()
    }

    pub fn races(&self) -> impl Iterator<Item = &RaceDefinition> {
        self.races.values()
    }

    pub fn race(&self, name: &str) -> Option<&RaceDefinition> {
        self.races.get(name)
    }

    /// Structural check of an encrypted ballot against the race definitions:
    /// every race exactly once, the declared selection limits and the
    /// candidate lists. Proofs are checked separately.
    pub fn check_ballot(&self, ballot: &EncryptedBallot) -> Result<(), Error> {
        let mut seen = BTreeSet::new();

        for race in ballot.races() {
            let definition = self.races.get(race.name()).ok_or_else(|| {
                Error::from(BallotMismatch(format!("unknown race {}", race.name())))
            })?;

            if !seen.insert(race.name()) {
                return Err(BallotMismatch(format!("race {} appears twice", race.name())).into());
            }
            if race.selection_limit() != definition.selection_limit {
                return Err(BallotMismatch(format!(
                    "race {} declares {} selections, election allows {}",
                    race.name(),
                    race.selection_limit(),
                    definition.selection_limit
                ))
                .into());
            }
            if !race.votes().keys().eq(definition.candidates.iter()) {
                return Err(BallotMismatch(format!(
                    "race {} does not list the election's candidates",
                    race.name()
                ))
                .into());
            }
        }

        if seen.len() != self.races.len() {
            return Err(BallotMismatch(format!(
                "ballot covers {} of {} races",
                seen.len(),
                self.races.len()
            ))
            .into());
        }

        Ok(())
    }

    /// A plaintext ballot with every race present and nothing selected,
    /// for callers to fill in.
    pub fn blank_ballot(&self, ballot_id: &str) -> PlaintextBallot {
        PlaintextBallot {
            ballot_id: ballot_id.to_string(),
            races: self
                .races
                .values()
                .map(|race| PlaintextRace {
                    name: race.name.clone(),
                    selection_limit: race.selection_limit,
                    votes: race.candidates.iter().map(|c| (c.clone(), false)).collect(),
                })
                .collect(),
        }
    }
}

/// Size of the key ceremony.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElectionConfig {
    authorities: usize,
    threshold: usize,
}

impl ElectionConfig {
    pub fn new(authorities: usize, threshold: usize) -> Result<Self, Error> {
        if authorities == 0 || threshold == 0 || threshold > authorities {
            Err(InvalidParameterSet(authorities, threshold, 0).into())
        } else {
            Ok(Self {
                authorities,
                threshold,
            })
        }
    }

    pub fn authorities(&self) -> usize {
        self.authorities
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Runs an in-process ceremony between `authorities` fresh key
    /// authorities and returns the election key with one share per authority.
    pub fn run_key_ceremony<R>(
        &self,
        group: &GroupParameters,
        rng: &mut R,
    ) -> Result<(PublicKey, Vec<PrivateKeyShare>), Error>
    where
        R: CryptoRng + RngCore,
    {
        let mut authorities = generate_authorities(group, rng, self.authorities, self.threshold)?;
        let f = group.random_generator(rng);

        run_ceremony(&mut authorities, f)
    }
}

/// Knobs of the tally engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TallyConfig {
    /// Largest per-candidate total the discrete-log search will try.
    pub search_bound: u64,
}

impl TallyConfig {
    pub fn new(search_bound: u64) -> Self {
        Self { search_bound }
    }
}
