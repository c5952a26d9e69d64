use serde::{Deserialize, Serialize};

/// One progressive band: `rate` applies to income above `threshold` up to the
/// next band's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub rate: f64,
    #[serde(alias = "min")]
    pub threshold: f64,
}

/// Brackets resolved for a calendar year, tagged by where they came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BracketTable {
    Known {
        year: i32,
        brackets: Vec<TaxBracket>,
    },
    #[serde(rename_all = "camelCase")]
    Extrapolated {
        year: i32,
        base_year: i32,
        latest_year: i32,
        brackets: Vec<TaxBracket>,
    },
}

impl BracketTable {
    pub fn year(&self) -> i32 {
        match self {
            BracketTable::Known { year, .. } | BracketTable::Extrapolated { year, .. } => *year,
        }
    }

    pub fn brackets(&self) -> &[TaxBracket] {
        match self {
            BracketTable::Known { brackets, .. } | BracketTable::Extrapolated { brackets, .. } => {
                brackets
            }
        }
    }

    pub fn is_extrapolated(&self) -> bool {
        matches!(self, BracketTable::Extrapolated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxOutcome {
    pub year: i32,
    pub table: BracketTable,
    pub income: f64,
    pub total_tax: f64,
    pub effective_rate: f64,
    pub marginal_rate: f64,
    pub income_after_tax: f64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributionPolicy {
    /// Contributions rise each year by the income growth rate.
    #[default]
    GrowWithIncome,
    Flat,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BenefitSource {
    /// Derive the benefit from lifetime accumulation earnings.
    #[default]
    Estimated,
    #[serde(rename_all = "camelCase")]
    Fixed { monthly_amount: f64 },
    Omitted,
}

#[derive(Debug, Clone)]
pub struct AccumulationInputs {
    pub current_age: u32,
    pub retirement_age: u32,
    pub start_year: i32,
    pub annual_income: f64,
    pub current_savings: f64,
    pub monthly_contributions: f64,
    pub current_monthly_expenses: f64,
    pub pre_return_rate: f64,
    pub inflation_rate: f64,
    pub income_growth_rate: f64,
    pub contribution_policy: ContributionPolicy,
}

#[derive(Debug, Clone)]
pub struct DistributionInputs {
    pub retirement_age: u32,
    pub life_expectancy: u32,
    /// First calendar year when no accumulation records are supplied.
    pub start_year: i32,
    pub retirement_savings: f64,
    pub monthly_expenses: f64,
    pub other_monthly_income: f64,
    pub post_return_rate: f64,
    pub inflation_rate: f64,
    pub benefit_source: BenefitSource,
    pub full_benefit_age: u32,
    pub claiming_age: u32,
}

/// Balances and income carried from one accumulation year to the next.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AccumulationState {
    pub balance: f64,
    pub income: f64,
    pub contributions: f64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DistributionState {
    pub balance: f64,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyAccumulationRecord {
    pub year: i32,
    pub age: u32,
    pub gross_income: f64,
    pub tax: TaxOutcome,
    pub contributions: f64,
    pub investment_income: f64,
    pub start_balance: f64,
    pub end_balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyDistributionRecord {
    pub year: i32,
    pub age: u32,
    pub expenses: f64,
    pub benefit_income: f64,
    pub other_income: f64,
    pub investment_income: f64,
    pub withdrawal: f64,
    pub remaining_balance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationProjection {
    pub years: Vec<YearlyAccumulationRecord>,
    pub projected_retirement_savings: f64,
    pub projected_monthly_expenses_at_retirement: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionProjection {
    pub years: Vec<YearlyDistributionRecord>,
    pub starting_monthly_benefit: f64,
    pub depletion_age: Option<u32>,
}
