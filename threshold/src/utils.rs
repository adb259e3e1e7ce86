use common::{
    error::{Error, ErrorKind::UninitializedValue},
    group::GroupParameters,
};
use log::info;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};

use crate::{
    authority::{KeyAuthority, SecretShare},
    keys::{PrivateKeyShare, PublicKey, PublicShare, combine_public_key},
    polynomial::PolynomialCommitment,
};

pub fn generate_authorities<R>(
    group: &GroupParameters,
    rng: &mut R,
    n: usize,
    t: usize,
) -> Result<Vec<KeyAuthority>, Error>
where
    R: CryptoRng + RngCore,
{
    (1..=n)
        .map(|i| KeyAuthority::new(group.clone(), rng, n, t, i))
        .collect()
}

/// Runs the share exchange between co-located authorities and combines the
/// results into the election public key plus one private share per authority.
pub fn run_ceremony(
    authorities: &mut [KeyAuthority],
    f: BigUint,
) -> Result<(PublicKey, Vec<PrivateKeyShare>), Error> {
    let group = authorities
        .first()
        .map(|authority| authority.group().clone())
        .ok_or_else(|| Error::from(UninitializedValue("authorities")))?;

    let published: Vec<(PolynomialCommitment, Vec<SecretShare>)> = authorities
        .iter()
        .map(KeyAuthority::publish_polynomial)
        .collect();

    for (commitment, shares) in &published {
        for share in shares {
            authorities
                .iter_mut()
                .find(|authority| authority.index == share.recipient())
                .ok_or_else(|| Error::from(UninitializedValue("authority for share recipient")))?
                .receive_share(share, commitment)?;
        }
    }

    let public_shares: Vec<PublicShare> = authorities
        .iter()
        .map(KeyAuthority::public_share)
        .collect();
    for authority in authorities.iter() {
        authority.check_public_shares(&public_shares)?;
    }
    let public_key = combine_public_key(&group, f, &public_shares)?;

    let private_shares = authorities
        .iter()
        .map(KeyAuthority::finish)
        .collect::<Result<Vec<PrivateKeyShare>, Error>>()?;

    info!(
        "key ceremony complete: {} authorities, threshold {}",
        authorities.len(),
        authorities[0].t
    );

    Ok((public_key, private_shares))
}
