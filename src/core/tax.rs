use std::collections::BTreeMap;

use tracing::debug;

use super::error::{ProjectionError, Result, ensure_amount};
use super::types::{BracketTable, TaxBracket, TaxOutcome};

const fn bracket(rate: f64, threshold: f64) -> TaxBracket {
    TaxBracket { rate, threshold }
}

const US_FEDERAL_2022: [TaxBracket; 7] = [
    bracket(0.10, 0.0),
    bracket(0.12, 10_275.0),
    bracket(0.22, 41_775.0),
    bracket(0.24, 89_075.0),
    bracket(0.32, 170_050.0),
    bracket(0.35, 215_950.0),
    bracket(0.37, 539_900.0),
];

const US_FEDERAL_2023: [TaxBracket; 7] = [
    bracket(0.10, 0.0),
    bracket(0.12, 11_000.0),
    bracket(0.22, 44_725.0),
    bracket(0.24, 95_375.0),
    bracket(0.32, 182_100.0),
    bracket(0.35, 231_250.0),
    bracket(0.37, 578_125.0),
];

/// Reference bracket tables keyed by calendar year.
///
/// Years that are not stored are projected linearly from the latest known
/// year and the known year immediately before it. Projections are computed
/// on demand and never cached.
#[derive(Debug, Clone)]
pub struct TaxBracketRepository {
    tables: BTreeMap<i32, Vec<TaxBracket>>,
}

impl Default for TaxBracketRepository {
    fn default() -> Self {
        Self::us_federal()
    }
}

impl TaxBracketRepository {
    pub fn new(tables: BTreeMap<i32, Vec<TaxBracket>>) -> Result<Self> {
        if tables.is_empty() {
            return Err(ProjectionError::malformed("no known bracket years configured"));
        }
        let mut validated = BTreeMap::new();
        for (year, mut brackets) in tables {
            validate_table(year, &mut brackets)?;
            validated.insert(year, brackets);
        }
        Ok(Self { tables: validated })
    }

    /// Built-in US federal single-filer tables for 2022 and 2023.
    pub fn us_federal() -> Self {
        let tables = BTreeMap::from([
            (2022, US_FEDERAL_2022.to_vec()),
            (2023, US_FEDERAL_2023.to_vec()),
        ]);
        Self { tables }
    }

    /// Parses `{"2023": [{"rate": 0.1, "threshold": 0}, ...], ...}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let tables = serde_json::from_str::<BTreeMap<i32, Vec<TaxBracket>>>(json)
            .map_err(|e| ProjectionError::malformed(format!("invalid bracket JSON: {e}")))?;
        Self::new(tables)
    }

    pub fn known_years(&self) -> impl Iterator<Item = i32> + '_ {
        self.tables.keys().copied()
    }

    pub fn latest_known_year(&self) -> Option<i32> {
        self.tables.keys().next_back().copied()
    }

    pub fn brackets_for_year(&self, year: i32) -> Result<BracketTable> {
        match self.tables.get(&year) {
            Some(brackets) => Ok(BracketTable::Known {
                year,
                brackets: brackets.clone(),
            }),
            None => self.extrapolate(year),
        }
    }

    fn extrapolate(&self, year: i32) -> Result<BracketTable> {
        let Some((&latest_year, latest)) = self.tables.iter().next_back() else {
            return Err(ProjectionError::malformed("no known bracket years configured"));
        };
        let Some((&base_year, base)) = self.tables.range(..latest_year).next_back() else {
            return Err(ProjectionError::malformed(format!(
                "cannot project {year}: need a known year before {latest_year}"
            )));
        };
        if base.len() != latest.len() {
            return Err(ProjectionError::malformed(format!(
                "{base_year} has {} brackets but {latest_year} has {}",
                base.len(),
                latest.len()
            )));
        }

        let years_ahead = (i64::from(year) - i64::from(latest_year)) as f64;
        let mut brackets = Vec::with_capacity(latest.len());
        for (base_bracket, latest_bracket) in base.iter().zip(latest) {
            if base_bracket.rate != latest_bracket.rate {
                return Err(ProjectionError::malformed(format!(
                    "rate order differs between {base_year} and {latest_year}: {} vs {}",
                    base_bracket.rate, latest_bracket.rate
                )));
            }
            let delta = latest_bracket.threshold - base_bracket.threshold;
            brackets.push(TaxBracket {
                rate: latest_bracket.rate,
                threshold: (latest_bracket.threshold + delta * years_ahead).round(),
            });
        }

        let degenerate = brackets.iter().any(|b| b.threshold < 0.0)
            || brackets
                .windows(2)
                .any(|pair| pair[1].threshold <= pair[0].threshold);
        if degenerate {
            return Err(ProjectionError::invalid(format!(
                "year {year} is too far from {latest_year} to project brackets"
            )));
        }

        debug!(year, base_year, latest_year, "extrapolated tax brackets");
        Ok(BracketTable::Extrapolated {
            year,
            base_year,
            latest_year,
            brackets,
        })
    }
}

fn validate_table(year: i32, brackets: &mut [TaxBracket]) -> Result<()> {
    if brackets.is_empty() {
        return Err(ProjectionError::malformed(format!("{year} has no brackets")));
    }
    for b in brackets.iter() {
        if !b.rate.is_finite() || b.rate <= 0.0 || b.rate > 1.0 {
            return Err(ProjectionError::malformed(format!(
                "{year} has rate {} outside (0, 1]",
                b.rate
            )));
        }
        if !b.threshold.is_finite() || b.threshold < 0.0 {
            return Err(ProjectionError::malformed(format!(
                "{year} has negative or non-finite threshold {}",
                b.threshold
            )));
        }
    }

    brackets.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
    if brackets[0].threshold != 0.0 {
        return Err(ProjectionError::malformed(format!(
            "{year} lowest bracket starts at {} instead of 0",
            brackets[0].threshold
        )));
    }
    if let Some(pair) = brackets
        .windows(2)
        .find(|pair| pair[0].threshold == pair[1].threshold)
    {
        return Err(ProjectionError::malformed(format!(
            "{year} has two brackets at threshold {}",
            pair[0].threshold
        )));
    }
    for (i, a) in brackets.iter().enumerate() {
        if brackets[i + 1..].iter().any(|b| b.rate == a.rate) {
            return Err(ProjectionError::malformed(format!(
                "{year} repeats rate {}",
                a.rate
            )));
        }
    }
    Ok(())
}

/// Returns `(total_tax, marginal_rate)` for `income` across `brackets`,
/// which need not be sorted.
pub fn apply_brackets(income: f64, brackets: &[TaxBracket]) -> (f64, f64) {
    let mut sorted = brackets.to_vec();
    sorted.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));

    let mut total_tax = 0.0;
    let mut remaining = income;
    let mut marginal_rate = 0.0;

    for (idx, current) in sorted.iter().enumerate() {
        if income <= current.threshold {
            break;
        }
        let slice = match sorted.get(idx + 1) {
            Some(next) => remaining.min(next.threshold - current.threshold),
            None => remaining,
        };
        total_tax += slice * current.rate;
        remaining -= slice;
        marginal_rate = current.rate;
    }

    (total_tax, marginal_rate)
}

/// Progressive tax owed on `income` in calendar `year`.
pub fn compute_tax(repository: &TaxBracketRepository, income: f64, year: i32) -> Result<TaxOutcome> {
    ensure_amount("income", income)?;
    if income == 0.0 {
        return Err(ProjectionError::invalid(
            "income must be > 0 to compute an effective tax rate",
        ));
    }

    let table = repository.brackets_for_year(year)?;
    let (total_tax, marginal_rate) = apply_brackets(income, table.brackets());

    Ok(TaxOutcome {
        year,
        table,
        income,
        total_tax,
        effective_rate: total_tax / income,
        marginal_rate,
        income_after_tax: income - total_tax,
    })
}
