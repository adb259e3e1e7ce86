pub mod authority;
pub mod keys;
pub mod polynomial;
pub mod utils;

#[cfg(test)]
mod tests {
    use common::{error::ErrorKind, group::GroupParameters};
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use crate::{
        keys::{PrivateKeyShare, combine_private_key, interpolate},
        utils::{generate_authorities, run_ceremony},
    };

    const P256: &[u8] = b"c998ff967972196995c8de6284b5bf11a36ae4d26bd3767468e33bd0e61a5a7f";

    #[test]
    fn end_to_end() {
        const N: usize = 5;
        const T: usize = 3;

        let mut rng = ChaCha20Rng::seed_from_u64(2024);
        let group =
            GroupParameters::new(BigUint::parse_bytes(P256, 16).unwrap(), BigUint::from(4u32))
                .unwrap();

        let mut authorities = generate_authorities(&group, &mut rng, N, T).unwrap();
        let f = group.random_generator(&mut rng);
        let (public_key, shares) = run_ceremony(&mut authorities, f).unwrap();

        assert_eq!(shares.len(), N);

        // every T-subset reconstructs the same key
        for skip in 0..N {
            let subset: Vec<PrivateKeyShare> = shares
                .iter()
                .filter(|share| share.index() != skip + 1)
                .take(T)
                .map(|share| {
                    PrivateKeyShare::from_parts(
                        group.clone(),
                        share.index(),
                        share.threshold(),
                        share.value().clone(),
                    )
                    .unwrap()
                })
                .collect();

            let key = combine_private_key(&subset).unwrap();
            assert!(key.matches(&public_key));
        }

        // T - 1 shares are refused outright...
        let res = combine_private_key(&shares[..T - 1]);
        assert!(matches!(
            res.err().unwrap().kind(),
            ErrorKind::NotEnoughShares(2, 3)
        ));

        // ...and interpolating them anyway does not give the key
        let short: Vec<&PrivateKeyShare> = shares[..T - 1].iter().collect();
        let guess = interpolate(&group, &short);
        assert_ne!(&group.pow_g(&guess), public_key.h());
    }

    #[test]
    fn single_authority_ceremony() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let group = GroupParameters::new(BigUint::from(23u32), BigUint::from(4u32)).unwrap();

        let mut authorities = generate_authorities(&group, &mut rng, 1, 1).unwrap();
        let f = group.random_generator(&mut rng);
        let (public_key, shares) = run_ceremony(&mut authorities, f).unwrap();

        assert_eq!(public_key.h(), &authorities[0].public_share().h);
        assert!(combine_private_key(&shares).unwrap().matches(&public_key));
    }
}
