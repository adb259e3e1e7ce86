//! Versioned binary encoding of the records that cross a process boundary.
//!
//! Every record starts with a tag byte naming its type and a version byte,
//! followed by its fields. Each field is a big-endian `u32` length and that
//! many bytes. Nested records are fields holding a complete tagged record.

use std::collections::BTreeMap;

use common::{
    error::{Error, ErrorKind::Malformed},
    group::GroupParameters,
};
use num_bigint::BigUint;
use threshold::keys::{PrivateKeyShare, PublicKey};
use zeroize::Zeroizing;

use crate::{
    ballot::{EncryptedBallot, EncryptedRace, EncryptedVote},
    cipher::Ciphertext,
    proof::{MembershipProof, SumProof},
};

pub const VERSION: u8 = 1;

pub const TAG_GROUP_PARAMETERS: u8 = 0x01;
pub const TAG_PUBLIC_KEY: u8 = 0x02;
pub const TAG_PRIVATE_KEY_SHARE: u8 = 0x03;
pub const TAG_CIPHERTEXT: u8 = 0x10;
pub const TAG_MEMBERSHIP_PROOF: u8 = 0x11;
pub const TAG_SUM_PROOF: u8 = 0x12;
pub const TAG_ENCRYPTED_BALLOT: u8 = 0x20;

fn malformed(reason: impl Into<String>) -> Error {
    Malformed(reason.into()).into()
}

pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(tag: u8) -> Self {
        Self {
            buf: vec![tag, VERSION],
        }
    }

    pub fn bytes(&mut self, field: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(field);
        self
    }

    pub fn biguint(&mut self, value: &BigUint) -> &mut Self {
        self.bytes(&value.to_bytes_be())
    }

    /// Like [`Writer::biguint`] but the intermediate byte buffer is wiped.
    pub fn secret(&mut self, value: &BigUint) -> &mut Self {
        let bytes = Zeroizing::new(value.to_bytes_be());
        self.bytes(&bytes)
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    pub fn record<T: WireRecord>(&mut self, value: &T) -> &mut Self {
        self.bytes(&value.to_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8], tag: u8) -> Result<Self, Error> {
        match bytes {
            [] | [_] => Err(malformed("missing record header")),
            [t, _, ..] if *t != tag => Err(malformed(format!(
                "expected record tag {tag:#04x}, found {t:#04x}"
            ))),
            [_, v, ..] if *v != VERSION => Err(malformed(format!("unsupported version {v}"))),
            _ => Ok(Self { bytes, pos: 2 }),
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(malformed(format!(
                "truncated: needed {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8], Error> {
        let mut len = [0u8; 4];
        len.copy_from_slice(self.take(4)?);
        self.take(u32::from_be_bytes(len) as usize)
    }

    pub fn biguint(&mut self) -> Result<BigUint, Error> {
        Ok(BigUint::from_bytes_be(self.bytes()?))
    }

    pub fn u64(&mut self) -> Result<u64, Error> {
        let field = self.bytes()?;
        let raw: [u8; 8] = field
            .try_into()
            .map_err(|_| malformed(format!("integer field of {} bytes", field.len())))?;
        Ok(u64::from_be_bytes(raw))
    }

    pub fn usize(&mut self) -> Result<usize, Error> {
        let value = self.u64()?;
        usize::try_from(value).map_err(|_| malformed(format!("{value} does not fit in usize")))
    }

    /// An element count; each element takes at least one length prefix so a
    /// count larger than the remaining input is rejected before allocating.
    pub fn count(&mut self) -> Result<usize, Error> {
        let n = self.usize()?;
        if n > self.remaining() / 4 {
            return Err(malformed(format!("count {n} exceeds the remaining input")));
        }
        Ok(n)
    }

    pub fn string(&mut self) -> Result<String, Error> {
        String::from_utf8(self.bytes()?.to_vec()).map_err(|_| malformed("field is not UTF-8"))
    }

    pub fn record<T: WireRecord>(&mut self) -> Result<T, Error> {
        T::from_bytes(self.bytes()?)
    }

    pub fn finish(self) -> Result<(), Error> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(malformed(format!("{n} trailing bytes"))),
        }
    }
}

pub trait WireRecord: Sized {
    const TAG: u8;

    fn write_fields(&self, w: &mut Writer);

    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new(Self::TAG);
        self.write_fields(&mut w);
        w.finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes, Self::TAG)?;
        let value = Self::read_fields(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

impl WireRecord for GroupParameters {
    const TAG: u8 = TAG_GROUP_PARAMETERS;

    fn write_fields(&self, w: &mut Writer) {
        w.biguint(self.p()).biguint(self.g());
    }

    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error> {
        let p = r.biguint()?;
        let g = r.biguint()?;
        GroupParameters::new(p, g)
    }
}

impl WireRecord for PublicKey {
    const TAG: u8 = TAG_PUBLIC_KEY;

    fn write_fields(&self, w: &mut Writer) {
        w.record(self.group()).biguint(self.f()).biguint(self.h());
    }

    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error> {
        let group = r.record()?;
        let f = r.biguint()?;
        let h = r.biguint()?;
        PublicKey::new(group, f, h)
    }
}

impl WireRecord for PrivateKeyShare {
    const TAG: u8 = TAG_PRIVATE_KEY_SHARE;

    fn write_fields(&self, w: &mut Writer) {
        w.record(self.group())
            .u64(self.index() as u64)
            .u64(self.threshold() as u64)
            .secret(self.value());
    }

    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error> {
        let group = r.record()?;
        let index = r.usize()?;
        let threshold = r.usize()?;
        let value = r.biguint()?;
        PrivateKeyShare::from_parts(group, index, threshold, value)
    }
}

impl WireRecord for Ciphertext {
    const TAG: u8 = TAG_CIPHERTEXT;

    fn write_fields(&self, w: &mut Writer) {
        w.biguint(&self.G).biguint(&self.H);
    }

    #[allow(non_snake_case)]
    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error> {
        let G = r.biguint()?;
        let H = r.biguint()?;
        Ok(Ciphertext::from_parts(G, H))
    }
}

impl WireRecord for MembershipProof {
    const TAG: u8 = TAG_MEMBERSHIP_PROOF;

    fn write_fields(&self, w: &mut Writer) {
        w.u64(self.challenges.len() as u64);
        for value in self.challenges.iter().chain(self.responses.iter()) {
            w.biguint(value);
        }
    }

    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error> {
        let n = r.count()?;
        let challenges = (0..n).map(|_| r.biguint()).collect::<Result<Vec<_>, _>>()?;
        let responses = (0..n).map(|_| r.biguint()).collect::<Result<Vec<_>, _>>()?;
        Ok(MembershipProof::from_parts(challenges, responses))
    }
}

impl WireRecord for SumProof {
    const TAG: u8 = TAG_SUM_PROOF;

    fn write_fields(&self, w: &mut Writer) {
        w.biguint(&self.challenge).biguint(&self.response);
    }

    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error> {
        let challenge = r.biguint()?;
        let response = r.biguint()?;
        Ok(SumProof::from_parts(challenge, response))
    }
}

impl WireRecord for EncryptedBallot {
    const TAG: u8 = TAG_ENCRYPTED_BALLOT;

    fn write_fields(&self, w: &mut Writer) {
        w.str(&self.ballot_id)
            .bytes(&self.nonce)
            .u64(self.races.len() as u64);

        for race in &self.races {
            w.str(&race.name)
                .u64(race.selection_limit)
                .u64(race.votes.len() as u64);
            for (candidate, vote) in &race.votes {
                w.str(candidate).record(&vote.ciphertext).record(&vote.proof);
            }
            w.record(&race.sum_proof);
        }
    }

    fn read_fields(r: &mut Reader<'_>) -> Result<Self, Error> {
        let ballot_id = r.string()?;
        let nonce = r.bytes()?.to_vec();
        let race_count = r.count()?;

        let mut races = Vec::with_capacity(race_count);
        for _ in 0..race_count {
            let name = r.string()?;
            let selection_limit = r.u64()?;
            let vote_count = r.count()?;

            let mut votes = BTreeMap::new();
            for _ in 0..vote_count {
                let candidate = r.string()?;
                let vote = EncryptedVote {
                    ciphertext: r.record()?,
                    proof: r.record()?,
                };
                if votes.insert(candidate, vote).is_some() {
                    return Err(malformed(format!("race {name} lists a candidate twice")));
                }
            }

            races.push(EncryptedRace {
                name,
                selection_limit,
                votes,
                sum_proof: r.record()?,
            });
        }

        Ok(EncryptedBallot {
            ballot_id,
            nonce,
            races,
        })
    }
}
