use super::error::{Result, ensure_age, ensure_amount};
use super::types::YearlyAccumulationRecord;

pub const FIRST_BEND_POINT: f64 = 1_024.0;
pub const SECOND_BEND_POINT: f64 = 6_172.0;

const FIRST_FACTOR: f64 = 0.90;
const SECOND_FACTOR: f64 = 0.32;
const THIRD_FACTOR: f64 = 0.15;

/// Percent of the primary amount lost per month claimed before full age.
const EARLY_REDUCTION_PER_MONTH: f64 = 5.0 / 9.0;
/// Percent gained per month claimed after full age.
const DELAYED_CREDIT_PER_MONTH: f64 = 8.0 / 12.0;

/// Unadjusted monthly benefit from average indexed monthly earnings.
pub fn primary_amount(average_monthly_earnings: f64) -> f64 {
    let earnings = average_monthly_earnings.max(0.0);
    let first = earnings.min(FIRST_BEND_POINT);
    let second = (earnings.min(SECOND_BEND_POINT) - FIRST_BEND_POINT).max(0.0);
    let third = (earnings - SECOND_BEND_POINT).max(0.0);
    first * FIRST_FACTOR + second * SECOND_FACTOR + third * THIRD_FACTOR
}

/// Multiplier applied to the primary amount for claiming at `claiming_age`.
///
/// Early claims lose 5/9 of a percent per month, late claims gain 2/3 of a
/// percent per month. The factor never drops below zero.
pub fn adjustment_factor(full_benefit_age: u32, claiming_age: u32) -> f64 {
    let months_offset = (i64::from(claiming_age) - i64::from(full_benefit_age)) * 12;
    let months = months_offset.unsigned_abs() as f64;
    let factor = match months_offset.signum() {
        -1 => 1.0 - months * EARLY_REDUCTION_PER_MONTH / 100.0,
        1 => 1.0 + months * DELAYED_CREDIT_PER_MONTH / 100.0,
        _ => 1.0,
    };
    factor.max(0.0)
}

pub fn estimate_monthly_benefit(
    average_monthly_earnings: f64,
    full_benefit_age: u32,
    claiming_age: u32,
) -> Result<f64> {
    ensure_amount("average monthly earnings", average_monthly_earnings)?;
    ensure_age("full benefit age", full_benefit_age)?;
    ensure_age("claiming age", claiming_age)?;

    let benefit =
        primary_amount(average_monthly_earnings) * adjustment_factor(full_benefit_age, claiming_age);
    Ok(round_to_cents(benefit))
}

/// Mean of each year's gross income spread over twelve months; zero for no
/// records.
pub fn average_monthly_earnings(records: &[YearlyAccumulationRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let total: f64 = records.iter().map(|r| r.gross_income / 12.0).sum();
    total / records.len() as f64
}

fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
