//! Adapters from transport-layer messages to tally engine calls.

use common::error::{
    Error,
    ErrorKind::{BallotMismatch, UnknownBallot},
};
use log::debug;

use crate::{ballot::EncryptedBallot, tally::TallyEngine, wire::WireRecord};

/// A voting machine committed an encrypted ballot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitBallotEvent {
    pub sender_id: u32,
    pub nonce: Vec<u8>,
    /// Wire-encoded [`EncryptedBallot`].
    pub ballot: Vec<u8>,
    pub ballot_id: String,
    pub precinct_id: String,
}

/// A scanner physically accepted a ballot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BallotScannedEvent {
    pub sender_id: u32,
    pub ballot_id: String,
}

impl CommitBallotEvent {
    pub fn new(sender_id: u32, precinct_id: &str, ballot: &EncryptedBallot) -> Self {
        Self {
            sender_id,
            nonce: ballot.nonce().to_vec(),
            ballot: ballot.to_bytes(),
            ballot_id: ballot.ballot_id().to_string(),
            precinct_id: precinct_id.to_string(),
        }
    }
}

impl TallyEngine {
    pub fn handle_commit(&self, event: &CommitBallotEvent) -> Result<(), Error> {
        let ballot = EncryptedBallot::from_bytes(&event.ballot)?;

        if ballot.ballot_id() != event.ballot_id {
            return Err(BallotMismatch(format!(
                "event names ballot {}, payload carries {}",
                event.ballot_id,
                ballot.ballot_id()
            ))
            .into());
        }

        debug!(
            "commit of ballot {} from machine {} in precinct {}",
            event.ballot_id, event.sender_id, event.precinct_id
        );

        self.record_votes(ballot, &event.nonce)
    }

    /// Confirms the ballot committed under `event.ballot_id`. Returns
    /// `Ok(false)` for a repeated scan.
    pub fn handle_scanned(&self, event: &BallotScannedEvent) -> Result<bool, Error> {
        let nonce = self
            .nonce_for(&event.ballot_id)?
            .ok_or_else(|| Error::from(UnknownBallot(event.ballot_id.clone())))?;

        debug!(
            "scan of ballot {} from machine {}",
            event.ballot_id, event.sender_id
        );

        self.confirmed(&nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ballot::{PlaintextBallot, PlaintextRace, encrypt_ballot},
        config::{ElectionConfig, ElectionContext, RaceDefinition, TallyConfig},
    };
    use common::{error::ErrorKind, group::GroupParameters};
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::sync::Arc;
    use threshold::keys::combine_private_key;

    #[test]
    fn commit_then_scan() {
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let group = GroupParameters::new(BigUint::from(23u32), BigUint::from(4u32)).unwrap();
        let (pk, shares) = ElectionConfig::new(1, 1)
            .unwrap()
            .run_key_ceremony(&group, &mut rng)
            .unwrap();
        let context = ElectionContext::new(
            pk.clone(),
            vec![RaceDefinition::new("measure", 1, ["yes", "no"])],
        )
        .unwrap();
        let engine = TallyEngine::new(Arc::new(context), TallyConfig::new(4));

        let plaintext = PlaintextBallot {
            ballot_id: "b-42".into(),
            races: vec![PlaintextRace::new("measure", 1, [("yes", true), ("no", false)])],
        };
        let (ballot, _) = encrypt_ballot(&pk, &plaintext, b"n-42", &mut rng).unwrap();

        let mut renamed = CommitBallotEvent::new(3, "precinct-1", &ballot);
        renamed.ballot_id = "b-43".into();
        assert!(matches!(
            engine.handle_commit(&renamed).err().unwrap().kind(),
            ErrorKind::BallotMismatch(_)
        ));

        let mut garbled = CommitBallotEvent::new(3, "precinct-1", &ballot);
        garbled.ballot.truncate(10);
        assert!(matches!(
            engine.handle_commit(&garbled).err().unwrap().kind(),
            ErrorKind::Malformed(_)
        ));

        let scan = BallotScannedEvent {
            sender_id: 9,
            ballot_id: "b-42".into(),
        };
        assert!(matches!(
            engine.handle_scanned(&scan).err().unwrap().kind(),
            ErrorKind::UnknownBallot(_)
        ));

        engine
            .handle_commit(&CommitBallotEvent::new(3, "precinct-1", &ballot))
            .unwrap();
        assert!(engine.handle_scanned(&scan).unwrap());
        assert!(!engine.handle_scanned(&scan).unwrap());

        let report = engine
            .get_report(combine_private_key(&shares).unwrap())
            .unwrap();
        assert_eq!(report.total("measure", "yes"), Some(1));
        assert_eq!(report.total("measure", "no"), Some(0));
    }
}
