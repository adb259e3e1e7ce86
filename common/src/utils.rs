use num_bigint::BigUint;
use num_traits::{One, Zero};
use rayon::prelude::*;

use crate::group::GroupParameters;

/// Lagrange coefficients for interpolating at `x = 0` from the shares held by
/// `indices` (1-based authority indices, pairwise distinct mod q).
pub fn precompute_lambda(group: &GroupParameters, indices: &[usize]) -> Vec<BigUint> {
    indices
        .par_iter()
        .map(|&i| {
            let zq_i = BigUint::from(i);
            let mut lambda_i = BigUint::one();
            for &j in indices {
                if j != i {
                    let zq_j = BigUint::from(j);

                    lambda_i = group.mul_q(
                        &lambda_i,
                        &group.mul_q(&zq_j, &group.invert_q(&group.sub_q(&zq_j, &zq_i))),
                    );
                }
            }
            lambda_i
        })
        .collect()
}

/// Overwrites the limbs of `value` with zeros before they are released.
pub fn wipe(value: &mut BigUint) {
    let limbs = value.iter_u32_digits().len();
    value.assign_from_slice(&vec![0u32; limbs]);
    debug_assert!(value.is_zero());
}
