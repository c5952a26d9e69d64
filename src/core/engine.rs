use tracing::{debug, warn};

use super::benefit::{average_monthly_earnings, estimate_monthly_benefit};
use super::error::{
    ProjectionError, Result, ensure_age, ensure_amount, ensure_rate, offset_year,
};
use super::tax::{TaxBracketRepository, compute_tax};
use super::types::{
    AccumulationInputs, AccumulationProjection, AccumulationState, BenefitSource,
    ContributionPolicy, DistributionInputs, DistributionProjection, DistributionState, TaxOutcome,
    YearlyAccumulationRecord, YearlyDistributionRecord,
};

pub fn compute_accumulation(
    repository: &TaxBracketRepository,
    inputs: &AccumulationInputs,
) -> Result<AccumulationProjection> {
    validate_accumulation_inputs(inputs)?;

    let years = run_accumulation(
        repository,
        inputs,
        inputs.current_age,
        inputs.retirement_age,
    )?;
    let projected_retirement_savings = years.last().map(|r| r.end_balance).unwrap_or(0.0);
    let projected_monthly_expenses_at_retirement =
        projected_monthly_expenses(inputs.current_monthly_expenses, inputs);

    debug!(
        current_age = inputs.current_age,
        retirement_age = inputs.retirement_age,
        years = years.len(),
        projected_retirement_savings,
        "accumulation projected"
    );

    Ok(AccumulationProjection {
        years,
        projected_retirement_savings,
        projected_monthly_expenses_at_retirement,
    })
}

/// Simulates each age in `from_age..=to_age`, starting from the inputs'
/// savings, income and contributions.
pub fn run_accumulation(
    repository: &TaxBracketRepository,
    inputs: &AccumulationInputs,
    from_age: u32,
    to_age: u32,
) -> Result<Vec<YearlyAccumulationRecord>> {
    let mut state = AccumulationState {
        balance: inputs.current_savings,
        income: inputs.annual_income,
        contributions: inputs.monthly_contributions * 12.0,
    };

    let mut years = Vec::with_capacity(to_age.saturating_sub(from_age) as usize + 1);
    for age in from_age..=to_age {
        let year = offset_year(inputs.start_year, age - from_age)?;
        let (record, next) = accumulation_year(repository, inputs, age, year, state)?;
        years.push(record);
        state = next;
    }
    Ok(years)
}

fn accumulation_year(
    repository: &TaxBracketRepository,
    inputs: &AccumulationInputs,
    age: u32,
    year: i32,
    state: AccumulationState,
) -> Result<(YearlyAccumulationRecord, AccumulationState)> {
    let investment_income = state.balance * inputs.pre_return_rate;
    let end_balance = state.balance + state.contributions + investment_income;
    let income = state.income * (1.0 + inputs.income_growth_rate);
    let contributions = match inputs.contribution_policy {
        ContributionPolicy::GrowWithIncome => state.contributions * (1.0 + inputs.income_growth_rate),
        ContributionPolicy::Flat => state.contributions,
    };
    let tax = tax_on_income(repository, income, year)?;

    let record = YearlyAccumulationRecord {
        year,
        age,
        gross_income: income,
        tax,
        contributions,
        investment_income,
        start_balance: state.balance,
        end_balance,
    };
    let next = AccumulationState {
        balance: end_balance,
        income,
        contributions,
    };
    Ok((record, next))
}

// A year without earnings owes nothing; the calculator itself rejects zero
// income because the effective rate is undefined.
fn tax_on_income(repository: &TaxBracketRepository, income: f64, year: i32) -> Result<TaxOutcome> {
    if income > 0.0 {
        return compute_tax(repository, income, year);
    }
    let table = repository.brackets_for_year(year)?;
    Ok(TaxOutcome {
        year,
        table,
        income: 0.0,
        total_tax: 0.0,
        effective_rate: 0.0,
        marginal_rate: 0.0,
        income_after_tax: 0.0,
    })
}

fn projected_monthly_expenses(monthly_expenses: f64, inputs: &AccumulationInputs) -> f64 {
    let years = inputs.retirement_age.saturating_sub(inputs.current_age) as i32;
    monthly_expenses * (1.0 + inputs.inflation_rate).powi(years)
}

fn validate_accumulation_inputs(inputs: &AccumulationInputs) -> Result<()> {
    ensure_age("current age", inputs.current_age)?;
    ensure_age("retirement age", inputs.retirement_age)?;
    if inputs.retirement_age < inputs.current_age {
        return Err(ProjectionError::invalid(format!(
            "retirement age {} must be >= current age {}",
            inputs.retirement_age, inputs.current_age
        )));
    }
    offset_year(inputs.start_year, inputs.retirement_age - inputs.current_age)?;
    ensure_amount("annual income", inputs.annual_income)?;
    ensure_amount("current savings", inputs.current_savings)?;
    ensure_amount("monthly contributions", inputs.monthly_contributions)?;
    ensure_amount("current monthly expenses", inputs.current_monthly_expenses)?;
    ensure_rate("pre-retirement return", inputs.pre_return_rate)?;
    ensure_rate("inflation", inputs.inflation_rate)?;
    ensure_rate("income growth", inputs.income_growth_rate)?;
    Ok(())
}

/// Runs the retirement phase seeded by a finished accumulation run.
///
/// The first year is the calendar year of the accumulation record at the
/// retirement age, or `inputs.start_year` when there is no such record.
pub fn compute_distribution(
    inputs: &DistributionInputs,
    accumulation: &[YearlyAccumulationRecord],
) -> Result<DistributionProjection> {
    validate_distribution_inputs(inputs)?;

    let starting_monthly_benefit = match inputs.benefit_source {
        BenefitSource::Estimated => estimate_monthly_benefit(
            average_monthly_earnings(accumulation),
            inputs.full_benefit_age,
            inputs.claiming_age,
        )?,
        BenefitSource::Fixed { monthly_amount } => monthly_amount,
        BenefitSource::Omitted => 0.0,
    };

    let start_year = accumulation
        .iter()
        .find(|r| r.age == inputs.retirement_age)
        .map(|r| r.year)
        .unwrap_or(inputs.start_year);

    let years = run_distribution(
        inputs,
        inputs.retirement_savings,
        start_year,
        starting_monthly_benefit,
        inputs.retirement_age,
        inputs.life_expectancy,
    )?;
    let depletion_age = years
        .last()
        .filter(|r| r.remaining_balance <= 0.0)
        .map(|r| r.age);

    debug!(
        retirement_age = inputs.retirement_age,
        life_expectancy = inputs.life_expectancy,
        years = years.len(),
        starting_monthly_benefit,
        "distribution projected"
    );

    Ok(DistributionProjection {
        years,
        starting_monthly_benefit,
        depletion_age,
    })
}

/// Simulates each age in `start_age..=max_age`, stopping after the first
/// year whose remaining balance is not positive.
pub fn run_distribution(
    inputs: &DistributionInputs,
    initial_balance: f64,
    start_year: i32,
    monthly_benefit: f64,
    start_age: u32,
    max_age: u32,
) -> Result<Vec<YearlyDistributionRecord>> {
    let mut balance = initial_balance;

    let mut years = Vec::with_capacity(max_age.saturating_sub(start_age) as usize + 1);
    for age in start_age..=max_age {
        let state = DistributionState {
            balance,
            year: offset_year(start_year, age - start_age)?,
        };
        let record = distribution_year(inputs, monthly_benefit, age, state);
        years.push(record);
        if record.remaining_balance <= 0.0 {
            warn!(age, year = record.year, "retirement savings depleted");
            break;
        }
        balance = record.remaining_balance;
    }
    Ok(years)
}

fn distribution_year(
    inputs: &DistributionInputs,
    monthly_benefit: f64,
    age: u32,
    state: DistributionState,
) -> YearlyDistributionRecord {
    let years_retired = i64::from(age) - i64::from(inputs.retirement_age);
    let inflation = (1.0 + inputs.inflation_rate).powi(years_retired as i32);

    let expenses = inputs.monthly_expenses * 12.0 * inflation;
    let benefit_income = monthly_benefit * 12.0 * inflation;
    let other_income = inputs.other_monthly_income * 12.0 * inflation;

    let investment_income = state.balance * inputs.post_return_rate;
    let withdrawal = (expenses - benefit_income - other_income).max(0.0);
    let remaining_balance = state.balance + investment_income - withdrawal;

    YearlyDistributionRecord {
        year: state.year,
        age,
        expenses,
        benefit_income,
        other_income,
        investment_income,
        withdrawal,
        remaining_balance,
    }
}

fn validate_distribution_inputs(inputs: &DistributionInputs) -> Result<()> {
    ensure_age("retirement age", inputs.retirement_age)?;
    ensure_age("life expectancy", inputs.life_expectancy)?;
    if inputs.life_expectancy < inputs.retirement_age {
        return Err(ProjectionError::invalid(format!(
            "life expectancy {} must be >= retirement age {}",
            inputs.life_expectancy, inputs.retirement_age
        )));
    }
    ensure_amount("retirement savings", inputs.retirement_savings)?;
    ensure_amount("monthly expenses", inputs.monthly_expenses)?;
    ensure_amount("other monthly income", inputs.other_monthly_income)?;
    ensure_rate("post-retirement return", inputs.post_return_rate)?;
    ensure_rate("inflation", inputs.inflation_rate)?;
    if let BenefitSource::Fixed { monthly_amount } = inputs.benefit_source {
        ensure_amount("monthly benefit", monthly_amount)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn sample_accumulation_inputs() -> AccumulationInputs {
        AccumulationInputs {
            current_age: 35,
            retirement_age: 65,
            start_year: 2023,
            annual_income: 85_000.0,
            current_savings: 100_000.0,
            monthly_contributions: 1_000.0,
            current_monthly_expenses: 4_000.0,
            pre_return_rate: 0.07,
            inflation_rate: 0.03,
            income_growth_rate: 0.02,
            contribution_policy: ContributionPolicy::GrowWithIncome,
        }
    }

    fn sample_distribution_inputs() -> DistributionInputs {
        DistributionInputs {
            retirement_age: 65,
            life_expectancy: 90,
            start_year: 2053,
            retirement_savings: 1_000_000.0,
            monthly_expenses: 5_000.0,
            other_monthly_income: 0.0,
            post_return_rate: 0.05,
            inflation_rate: 0.03,
            benefit_source: BenefitSource::Omitted,
            full_benefit_age: 67,
            claiming_age: 65,
        }
    }

    fn zero_growth_inputs() -> AccumulationInputs {
        let mut inputs = sample_accumulation_inputs();
        inputs.current_savings = 0.0;
        inputs.monthly_contributions = 1_000.0;
        inputs.pre_return_rate = 0.0;
        inputs.income_growth_rate = 0.0;
        inputs
    }

    #[test]
    fn single_year_without_returns_saves_contributions() {
        let mut inputs = zero_growth_inputs();
        inputs.retirement_age = inputs.current_age;
        let projection =
            compute_accumulation(&TaxBracketRepository::us_federal(), &inputs).expect("valid");

        assert_eq!(projection.years.len(), 1);
        let year = &projection.years[0];
        assert_eq!(year.year, 2023);
        assert_eq!(year.age, 35);
        assert_approx(year.start_balance, 0.0);
        assert_approx(year.investment_income, 0.0);
        assert_approx(year.end_balance, 12_000.0);
        assert_approx(projection.projected_retirement_savings, 12_000.0);
    }

    #[test]
    fn compound_path_matches_hand_calculation() {
        let mut inputs = sample_accumulation_inputs();
        inputs.current_age = 30;
        inputs.retirement_age = 32;
        inputs.current_savings = 1_000.0;
        inputs.monthly_contributions = 10.0;
        inputs.pre_return_rate = 0.10;
        inputs.income_growth_rate = 0.0;

        // ((1000*1.1 + 120)*1.1 + 120)*1.1 + 120 = 1_728.2
        let projection =
            compute_accumulation(&TaxBracketRepository::us_federal(), &inputs).expect("valid");
        assert_eq!(projection.years.len(), 3);
        assert_approx(projection.years[0].end_balance, 1_220.0);
        assert_approx(projection.years[1].end_balance, 1_462.0);
        assert_approx(projection.projected_retirement_savings, 1_728.2);
        assert_approx(projection.years[2].investment_income, 146.2);
    }

    #[test]
    fn income_grows_before_tax_is_assessed() {
        let mut inputs = sample_accumulation_inputs();
        inputs.current_age = 40;
        inputs.retirement_age = 41;
        inputs.annual_income = 100_000.0 / 1.02;

        let projection =
            compute_accumulation(&TaxBracketRepository::us_federal(), &inputs).expect("valid");
        let first = &projection.years[0];
        assert_approx(first.gross_income, 100_000.0);
        assert_eq!(first.tax.year, 2023);
        assert_approx(first.tax.total_tax, 17_400.0);
        assert!(!first.tax.table.is_extrapolated());

        let second = &projection.years[1];
        assert_eq!(second.year, 2024);
        assert!(second.tax.table.is_extrapolated());
        assert_approx(second.gross_income, 102_000.0);
    }

    #[test]
    fn contribution_policy_controls_growth() {
        let repo = TaxBracketRepository::us_federal();
        let mut inputs = sample_accumulation_inputs();
        inputs.current_age = 30;
        inputs.retirement_age = 32;
        inputs.income_growth_rate = 0.10;

        inputs.contribution_policy = ContributionPolicy::GrowWithIncome;
        let growing = compute_accumulation(&repo, &inputs).expect("valid");
        let recorded: Vec<f64> = growing.years.iter().map(|r| r.contributions).collect();
        assert_approx(recorded[0], 13_200.0);
        assert_approx(recorded[1], 14_520.0);
        assert_approx(recorded[2], 15_972.0);

        inputs.contribution_policy = ContributionPolicy::Flat;
        let flat = compute_accumulation(&repo, &inputs).expect("valid");
        assert!(flat.years.iter().all(|r| (r.contributions - 12_000.0).abs() < EPS));
        assert!(growing.projected_retirement_savings > flat.projected_retirement_savings);
    }

    #[test]
    fn zero_income_years_owe_no_tax() {
        let mut inputs = sample_accumulation_inputs();
        inputs.annual_income = 0.0;
        inputs.retirement_age = inputs.current_age + 2;
        let projection =
            compute_accumulation(&TaxBracketRepository::us_federal(), &inputs).expect("valid");
        for year in &projection.years {
            assert_approx(year.tax.total_tax, 0.0);
            assert_approx(year.tax.effective_rate, 0.0);
        }
    }

    #[test]
    fn expenses_compound_over_the_accumulation_horizon() {
        let mut inputs = sample_accumulation_inputs();
        inputs.current_age = 60;
        inputs.retirement_age = 62;
        inputs.current_monthly_expenses = 1_000.0;
        inputs.inflation_rate = 0.10;
        let projection =
            compute_accumulation(&TaxBracketRepository::us_federal(), &inputs).expect("valid");
        assert_approx(projection.projected_monthly_expenses_at_retirement, 1_210.0);
    }

    #[test]
    fn accumulation_rejects_inverted_ages_and_bad_amounts() {
        let repo = TaxBracketRepository::us_federal();

        let mut inverted = sample_accumulation_inputs();
        inverted.retirement_age = inverted.current_age - 1;
        assert!(matches!(
            compute_accumulation(&repo, &inverted),
            Err(ProjectionError::InvalidInput(_))
        ));

        let mut negative = sample_accumulation_inputs();
        negative.current_savings = -5.0;
        assert!(compute_accumulation(&repo, &negative).is_err());

        let mut nan_rate = sample_accumulation_inputs();
        nan_rate.pre_return_rate = f64::NAN;
        assert!(compute_accumulation(&repo, &nan_rate).is_err());
    }

    #[test]
    fn accumulation_surfaces_bracket_failures() {
        let tables = std::collections::BTreeMap::from([(
            2023,
            vec![crate::core::TaxBracket {
                rate: 0.1,
                threshold: 0.0,
            }],
        )]);
        let repo = TaxBracketRepository::new(tables).expect("valid table");
        let inputs = sample_accumulation_inputs();
        assert!(matches!(
            compute_accumulation(&repo, &inputs),
            Err(ProjectionError::MalformedBracketTable(_))
        ));
    }

    #[test]
    fn accumulation_rejects_calendar_years_past_the_representable_range() {
        let mut inputs = sample_accumulation_inputs();
        inputs.current_age = 60;
        inputs.retirement_age = 61;
        inputs.start_year = i32::MAX;
        assert!(matches!(
            compute_accumulation(&TaxBracketRepository::us_federal(), &inputs),
            Err(ProjectionError::InvalidInput(_))
        ));
    }

    #[test]
    fn distribution_rejects_calendar_years_past_the_representable_range() {
        let mut inputs = sample_distribution_inputs();
        inputs.life_expectancy = inputs.retirement_age + 1;
        inputs.start_year = i32::MAX;
        assert!(matches!(
            compute_distribution(&inputs, &[]),
            Err(ProjectionError::InvalidInput(_))
        ));

        inputs.life_expectancy = inputs.retirement_age;
        let projection = compute_distribution(&inputs, &[]).expect("single year fits");
        assert_eq!(projection.years[0].year, i32::MAX);
    }

    #[test]
    fn withdrawals_drain_savings_until_depleted() {
        let mut inputs = sample_distribution_inputs();
        inputs.retirement_savings = 100_000.0;
        inputs.monthly_expenses = 2_000.0;
        inputs.post_return_rate = 0.0;
        inputs.inflation_rate = 0.03;

        let projection = compute_distribution(&inputs, &[]).expect("valid");
        let years = &projection.years;

        // 24_000 + 24_720 + 25_461.6 + 26_225.448 exceeds 100_000 in the 4th year.
        assert_eq!(years.len(), 4);
        assert_eq!(projection.depletion_age, Some(68));
        assert_approx(years[1].withdrawal, 24_720.0);
        for pair in years.windows(2) {
            assert!(pair[1].remaining_balance < pair[0].remaining_balance);
        }
        for year in years {
            assert_approx(year.withdrawal, year.expenses);
        }
        assert_approx(years[3].remaining_balance, -407.048);
        assert_eq!(years[0].year, 2053);
        assert_eq!(years[3].year, 2056);
    }

    #[test]
    fn income_covering_expenses_means_no_withdrawal() {
        let mut inputs = sample_distribution_inputs();
        inputs.retirement_savings = 50_000.0;
        inputs.monthly_expenses = 3_000.0;
        inputs.other_monthly_income = 1_000.0;
        inputs.benefit_source = BenefitSource::Fixed {
            monthly_amount: 2_500.0,
        };
        inputs.post_return_rate = 0.0;

        let projection = compute_distribution(&inputs, &[]).expect("valid");
        assert_eq!(projection.years.len(), 26);
        assert_eq!(projection.depletion_age, None);
        assert_approx(projection.starting_monthly_benefit, 2_500.0);
        for year in &projection.years {
            assert_approx(year.withdrawal, 0.0);
            assert_approx(year.remaining_balance, 50_000.0);
        }
    }

    #[test]
    fn expenses_benefit_and_other_income_inflate_together() {
        let mut inputs = sample_distribution_inputs();
        inputs.monthly_expenses = 1_000.0;
        inputs.other_monthly_income = 100.0;
        inputs.benefit_source = BenefitSource::Fixed {
            monthly_amount: 200.0,
        };
        inputs.inflation_rate = 0.10;
        inputs.life_expectancy = 67;

        let projection = compute_distribution(&inputs, &[]).expect("valid");
        let third = &projection.years[2];
        assert_eq!(third.age, 67);
        assert_approx(third.expenses, 14_520.0);
        assert_approx(third.benefit_income, 2_904.0);
        assert_approx(third.other_income, 1_452.0);
        assert_approx(third.withdrawal, 14_520.0 - 2_904.0 - 1_452.0);
    }

    #[test]
    fn estimated_benefit_uses_lifetime_average_earnings() {
        let repo = TaxBracketRepository::us_federal();
        let mut acc = sample_accumulation_inputs();
        acc.current_age = 60;
        acc.retirement_age = 62;
        acc.annual_income = 24_000.0;
        acc.income_growth_rate = 0.0;
        let accumulation = compute_accumulation(&repo, &acc).expect("valid");

        let mut inputs = sample_distribution_inputs();
        inputs.retirement_age = 62;
        inputs.claiming_age = 62;
        inputs.full_benefit_age = 67;
        inputs.benefit_source = BenefitSource::Estimated;

        let projection = compute_distribution(&inputs, &accumulation.years).expect("valid");
        // Average monthly earnings of 2_000 claimed five years early.
        assert_approx(projection.starting_monthly_benefit, 822.61);
        assert_approx(projection.years[0].benefit_income, 822.61 * 12.0);
        assert_eq!(projection.years[0].year, 2025);
    }

    #[test]
    fn estimated_benefit_without_history_is_zero() {
        let mut inputs = sample_distribution_inputs();
        inputs.benefit_source = BenefitSource::Estimated;
        let projection = compute_distribution(&inputs, &[]).expect("valid");
        assert_approx(projection.starting_monthly_benefit, 0.0);
        assert_eq!(projection.years[0].year, 2053);
    }

    #[test]
    fn already_empty_savings_report_a_single_depleted_year() {
        let mut inputs = sample_distribution_inputs();
        inputs.retirement_savings = 0.0;
        let projection = compute_distribution(&inputs, &[]).expect("valid");
        assert_eq!(projection.years.len(), 1);
        assert_eq!(projection.depletion_age, Some(65));
    }

    #[test]
    fn distribution_rejects_invalid_inputs() {
        let mut inverted = sample_distribution_inputs();
        inverted.life_expectancy = 60;
        assert!(matches!(
            compute_distribution(&inverted, &[]),
            Err(ProjectionError::InvalidInput(_))
        ));

        let mut negative_benefit = sample_distribution_inputs();
        negative_benefit.benefit_source = BenefitSource::Fixed {
            monthly_amount: -1.0,
        };
        assert!(compute_distribution(&negative_benefit, &[]).is_err());
    }

    #[test]
    fn full_projection_hands_accumulation_results_to_distribution() {
        let repo = TaxBracketRepository::us_federal();
        let acc = sample_accumulation_inputs();
        let accumulation = compute_accumulation(&repo, &acc).expect("valid");

        let mut inputs = sample_distribution_inputs();
        inputs.retirement_savings = accumulation.projected_retirement_savings;
        inputs.monthly_expenses = accumulation.projected_monthly_expenses_at_retirement;
        inputs.benefit_source = BenefitSource::Estimated;
        let distribution = compute_distribution(&inputs, &accumulation.years).expect("valid");

        assert_eq!(accumulation.years.len(), 31);
        assert_eq!(distribution.years[0].year, 2053);
        assert_approx_tol(
            distribution.years[0].expenses,
            4_000.0 * 1.03f64.powi(30) * 12.0,
            1e-6,
        );
        assert!(distribution.starting_monthly_benefit > 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_accumulation_years_chain_balances(
            savings in 0.0f64..500_000.0,
            monthly in 0.0f64..5_000.0,
            income in 0.0f64..300_000.0,
            pre_return in -0.2f64..0.2,
            growth in 0.0f64..0.08,
            span in 0u32..30,
            flat in proptest::prelude::any::<bool>(),
        ) {
            let mut inputs = sample_accumulation_inputs();
            inputs.current_age = 30;
            inputs.retirement_age = 30 + span;
            inputs.current_savings = savings;
            inputs.monthly_contributions = monthly;
            inputs.annual_income = income;
            inputs.pre_return_rate = pre_return;
            inputs.income_growth_rate = growth;
            inputs.contribution_policy = if flat {
                ContributionPolicy::Flat
            } else {
                ContributionPolicy::GrowWithIncome
            };

            let projection =
                compute_accumulation(&TaxBracketRepository::us_federal(), &inputs).expect("valid");
            prop_assert_eq!(projection.years.len(), span as usize + 1);

            let mut applied = monthly * 12.0;
            let mut expected_start = savings;
            for (idx, year) in projection.years.iter().enumerate() {
                prop_assert_eq!(year.age, 30 + idx as u32);
                prop_assert_eq!(year.year, 2023 + idx as i32);
                prop_assert!((year.start_balance - expected_start).abs() <= 1e-6);
                let identity = year.start_balance + applied + year.investment_income;
                prop_assert!((year.end_balance - identity).abs() <= 1e-6 * identity.abs().max(1.0));
                prop_assert!(year.tax.total_tax <= year.gross_income + 1e-9);
                applied = year.contributions;
                expected_start = year.end_balance;
            }
        }

        #[test]
        fn prop_distribution_stops_at_first_depleted_year(
            savings in 0.0f64..2_000_000.0,
            monthly_expenses in 0.0f64..15_000.0,
            post_return in 0.0f64..0.03,
            extra_inflation in 0.001f64..0.05,
            retirement_age in 50u32..70,
            years_retired in 0u32..40,
        ) {
            let mut inputs = sample_distribution_inputs();
            inputs.retirement_savings = savings;
            inputs.monthly_expenses = monthly_expenses;
            inputs.post_return_rate = post_return;
            inputs.inflation_rate = post_return + extra_inflation;
            inputs.retirement_age = retirement_age;
            inputs.life_expectancy = retirement_age + years_retired;

            let projection = compute_distribution(&inputs, &[]).expect("valid");
            let years = &projection.years;
            prop_assert!(!years.is_empty());
            prop_assert!(years.len() <= years_retired as usize + 1);
            prop_assert!(years.last().map(|r| r.age).unwrap_or(0) <= inputs.life_expectancy);

            let (last, earlier) = years.split_last().expect("non-empty");
            prop_assert!(earlier.iter().all(|r| r.remaining_balance > 0.0));
            if years.len() < years_retired as usize + 1 {
                prop_assert!(last.remaining_balance <= 0.0);
                prop_assert_eq!(projection.depletion_age, Some(last.age));
            }
        }
    }
}
