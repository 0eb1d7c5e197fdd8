//! Threshold arithmetic.
//!
//! Every node must agree on the exact power required for a resolution to
//! pass, so the scaling is done in arbitrary precision and only the final
//! ceiling-divided quotient comes back to a fixed-width integer.

use num_bigint::BigInt;

use crate::error::VoteStoreError;
use crate::power;
use crate::sql::SqlExecutor;

/// The minimum approved power for the fraction `numerator / denominator` of
/// the current total power, rounded up. 0 when there is no power at all.
pub async fn required_power<E>(
    db: &mut E,
    numerator: i64,
    denominator: i64,
) -> Result<i64, VoteStoreError>
where
    E: SqlExecutor + ?Sized,
{
    let total = power::total_power(db).await?;
    required_power_for_total(total, numerator, denominator)
}

/// Pure form of [`required_power`]: `ceil(total * numerator / denominator)`.
pub fn required_power_for_total(
    total: i64,
    numerator: i64,
    denominator: i64,
) -> Result<i64, VoteStoreError> {
    if denominator <= 0 {
        return Err(VoteStoreError::InvalidArgument(format!(
            "threshold denominator must be positive, got {denominator}"
        )));
    }
    if numerator < 0 {
        return Err(VoteStoreError::InvalidArgument(format!(
            "threshold numerator must be non-negative, got {numerator}"
        )));
    }
    if total == 0 {
        return Ok(0);
    }

    // ceil(total * numerator / denominator) == (total*numerator + denominator - 1) / denominator
    let scaled = BigInt::from(total) * BigInt::from(numerator) + (BigInt::from(denominator) - 1);
    let required = scaled / BigInt::from(denominator);

    i64::try_from(required).map_err(|_| {
        VoteStoreError::InvalidArgument(format!(
            "required power for {numerator}/{denominator} of {total} exceeds the i64 range"
        ))
    })
}
