use error_chain::error_chain;

error_chain! {
    foreign_links {
        Io(std::io::Error);
    }

    errors {
        InvalidGroupParameters(reason: String) {
            description("invalid group parameters")
            display("invalid group parameters: {}", reason)
        }
        InvalidParameterSet(n: usize, t: usize, index: usize) {
            description("invalid parameter set")
            display("invalid parameter set: n = {}, t = {}, index = {}", n, t, index)
        }
        InvalidConfiguration(reason: String) {
            description("invalid election configuration")
            display("invalid election configuration: {}", reason)
        }
        InvalidKeyShare(reason: String) {
            description("invalid key share")
            display("invalid key share: {}", reason)
        }
        DuplicateAuthority(index: usize) {
            description("duplicate authority")
            display("authority {} supplied more than once", index)
        }
        NotEnoughShares(have: usize, need: usize) {
            description("not enough key shares")
            display("not enough key shares: have {}, need {}", have, need)
        }
        CountMismatch(expected: usize, expected_label: &'static str, got: usize, got_label: &'static str) {
            description("count mismatch")
            display("count mismatch: {} {} vs {} {}", expected, expected_label, got, got_label)
        }
        UninitializedValue(name: &'static str) {
            description("uninitialized value")
            display("uninitialized value: {}", name)
        }
        BadKey(reason: String) {
            description("bad key")
            display("bad key: {}", reason)
        }
        Malformed(reason: String) {
            description("malformed encoding")
            display("malformed encoding: {}", reason)
        }
        InvalidProof(reason: String) {
            description("invalid proof")
            display("invalid proof: {}", reason)
        }
        InvalidSelection(reason: String) {
            description("invalid selection")
            display("invalid selection: {}", reason)
        }
        SearchSpaceExhausted(bound: u64) {
            description("discrete log search space exhausted")
            display("no plaintext in 0..={} matches the ciphertext", bound)
        }
        BallotMismatch(reason: String) {
            description("ballot does not match the election")
            display("ballot does not match the election: {}", reason)
        }
        DuplicateBallot(id: String) {
            description("duplicate ballot")
            display("ballot {} already recorded", id)
        }
        UnknownBallot(id: String) {
            description("unknown ballot")
            display("no committed ballot for {}", id)
        }
        InvalidTransition(id: String, from: &'static str, to: &'static str) {
            description("invalid ballot state transition")
            display("ballot {} cannot move from {} to {}", id, from, to)
        }
        TallyClosed {
            description("tally closed")
            display("the tally report has already been generated")
        }
        LockPoisoned(name: &'static str) {
            description("lock poisoned")
            display("lock poisoned: {}", name)
        }
    }
}
