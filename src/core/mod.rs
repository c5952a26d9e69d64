mod benefit;
mod engine;
mod error;
mod tax;
mod types;

pub use benefit::{
    FIRST_BEND_POINT, SECOND_BEND_POINT, adjustment_factor, average_monthly_earnings,
    estimate_monthly_benefit, primary_amount,
};
pub use engine::{compute_accumulation, compute_distribution, run_accumulation, run_distribution};
pub use error::{ProjectionError, Result};
pub use tax::{TaxBracketRepository, apply_brackets, compute_tax};
pub use types::{
    AccumulationInputs, AccumulationProjection, BenefitSource, BracketTable, ContributionPolicy,
    DistributionInputs, DistributionProjection, TaxBracket, TaxOutcome, YearlyAccumulationRecord,
    YearlyDistributionRecord,
};
