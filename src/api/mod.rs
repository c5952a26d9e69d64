use axum::{
    Router,
    extract::{
        Json, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Datelike;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::core::{
    AccumulationInputs, AccumulationProjection, BenefitSource, BracketTable, ContributionPolicy,
    DistributionInputs, DistributionProjection, ProjectionError, TaxBracketRepository, TaxOutcome,
    compute_accumulation, compute_distribution, compute_tax,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliContributionPolicy {
    GrowWithIncome,
    Flat,
}

impl From<CliContributionPolicy> for ContributionPolicy {
    fn from(value: CliContributionPolicy) -> Self {
        match value {
            CliContributionPolicy::GrowWithIncome => ContributionPolicy::GrowWithIncome,
            CliContributionPolicy::Flat => ContributionPolicy::Flat,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliBenefitSource {
    Estimated,
    Fixed,
    Omitted,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiContributionPolicy {
    #[serde(alias = "growWithIncome", alias = "grow_with_income", alias = "grow")]
    GrowWithIncome,
    Flat,
}

impl From<ApiContributionPolicy> for CliContributionPolicy {
    fn from(value: ApiContributionPolicy) -> Self {
        match value {
            ApiContributionPolicy::GrowWithIncome => CliContributionPolicy::GrowWithIncome,
            ApiContributionPolicy::Flat => CliContributionPolicy::Flat,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiBenefitSource {
    #[serde(alias = "estimate")]
    Estimated,
    #[serde(alias = "provided")]
    Fixed,
    #[serde(alias = "none")]
    Omitted,
}

impl From<ApiBenefitSource> for CliBenefitSource {
    fn from(value: ApiBenefitSource) -> Self {
        match value {
            ApiBenefitSource::Estimated => CliBenefitSource::Estimated,
            ApiBenefitSource::Fixed => CliBenefitSource::Fixed,
            ApiBenefitSource::Omitted => CliBenefitSource::Omitted,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectionPayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    life_expectancy: Option<u32>,
    start_year: Option<i32>,

    annual_income: Option<f64>,
    current_savings: Option<f64>,
    monthly_contributions: Option<f64>,
    current_monthly_expenses: Option<f64>,
    other_income: Option<f64>,

    pre_return_rate: Option<f64>,
    post_return_rate: Option<f64>,
    inflation_rate: Option<f64>,
    inflation_rate_distribution: Option<f64>,
    #[serde(alias = "incomeIncrease")]
    income_growth_rate: Option<f64>,

    contribution_policy: Option<ApiContributionPolicy>,
    benefit_source: Option<ApiBenefitSource>,
    #[serde(alias = "monthlySocialSecurity")]
    monthly_benefit: Option<f64>,
    full_benefit_age: Option<u32>,
    claiming_age: Option<u32>,
}

/// Inputs for a full accumulation + distribution projection. Rates are in
/// percent.
#[derive(Args, Debug, Clone)]
pub struct ProjectionArgs {
    #[arg(long, default_value_t = 35)]
    pub current_age: u32,
    #[arg(long, default_value_t = 65)]
    pub retirement_age: u32,
    #[arg(long, default_value_t = 90, help = "Age to project retirement savings through")]
    pub life_expectancy: u32,
    #[arg(long, help = "First simulated calendar year; defaults to the current year")]
    pub start_year: Option<i32>,
    #[arg(long, default_value_t = 85_000.0)]
    pub annual_income: f64,
    #[arg(long, default_value_t = 100_000.0)]
    pub current_savings: f64,
    #[arg(long, default_value_t = 1_000.0)]
    pub monthly_contributions: f64,
    #[arg(long, default_value_t = 4_000.0, help = "Monthly expenses in today's money")]
    pub current_monthly_expenses: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Other monthly income in retirement, in money at the retirement date"
    )]
    pub other_income: f64,
    #[arg(
        long,
        default_value_t = 7.0,
        help = "Annual return before retirement in percent"
    )]
    pub pre_return_rate: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Annual return during retirement in percent"
    )]
    pub post_return_rate: f64,
    #[arg(long, default_value_t = 3.0, help = "Annual inflation in percent")]
    pub inflation_rate: f64,
    #[arg(
        long,
        help = "Annual inflation during retirement in percent, defaults to --inflation-rate"
    )]
    pub inflation_rate_distribution: Option<f64>,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Annual income growth in percent"
    )]
    pub income_growth_rate: f64,
    #[arg(long, value_enum, default_value_t = CliContributionPolicy::GrowWithIncome)]
    pub contribution_policy: CliContributionPolicy,
    #[arg(
        long,
        value_enum,
        default_value_t = CliBenefitSource::Estimated,
        help = "Retirement benefit: estimated from earnings, a fixed monthly amount, or none"
    )]
    pub benefit_source: CliBenefitSource,
    #[arg(long, help = "Monthly benefit, required when --benefit-source=fixed")]
    pub monthly_benefit: Option<f64>,
    #[arg(long, default_value_t = 67)]
    pub full_benefit_age: u32,
    #[arg(long, help = "Age the benefit is claimed, defaults to --retirement-age")]
    pub claiming_age: Option<u32>,
}

impl Default for ProjectionArgs {
    fn default() -> Self {
        Self {
            current_age: 35,
            retirement_age: 65,
            life_expectancy: 90,
            start_year: None,
            annual_income: 85_000.0,
            current_savings: 100_000.0,
            monthly_contributions: 1_000.0,
            current_monthly_expenses: 4_000.0,
            other_income: 0.0,
            pre_return_rate: 7.0,
            post_return_rate: 5.0,
            inflation_rate: 3.0,
            inflation_rate_distribution: None,
            income_growth_rate: 2.0,
            contribution_policy: CliContributionPolicy::GrowWithIncome,
            benefit_source: CliBenefitSource::Estimated,
            monthly_benefit: None,
            full_benefit_age: 67,
            claiming_age: None,
        }
    }
}

/// Accumulation inputs plus the distribution inputs that do not depend on
/// the accumulation result.
#[derive(Debug, Clone)]
pub struct ProjectionRequest {
    pub accumulation: AccumulationInputs,
    pub distribution: DistributionInputs,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResponse {
    pub accumulation: AccumulationProjection,
    pub distribution: DistributionProjection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxResponse {
    #[serde(flatten)]
    pub outcome: TaxOutcome,
    pub effective_rate_percentage: String,
    pub marginal_rate_percentage: String,
}

/// Calendar years with stored bracket tables.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketYears {
    pub known_years: Vec<i32>,
    pub latest_known_year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct TaxQuery {
    income: f64,
    year: Option<i32>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

struct AppState {
    repository: TaxBracketRepository,
}

pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

pub fn build_inputs(args: &ProjectionArgs) -> Result<ProjectionRequest, ProjectionError> {
    if args.retirement_age < args.current_age {
        return Err(ProjectionError::InvalidInput(
            "--retirement-age must be >= --current-age".to_string(),
        ));
    }
    if args.life_expectancy < args.retirement_age {
        return Err(ProjectionError::InvalidInput(
            "--life-expectancy must be >= --retirement-age".to_string(),
        ));
    }
    for (name, rate) in [
        ("--pre-return-rate", args.pre_return_rate),
        ("--post-return-rate", args.post_return_rate),
        ("--inflation-rate", args.inflation_rate),
        ("--income-growth-rate", args.income_growth_rate),
    ] {
        if !rate.is_finite() || rate <= -100.0 {
            return Err(ProjectionError::InvalidInput(format!("{name} must be > -100")));
        }
    }

    let benefit_source = match args.benefit_source {
        CliBenefitSource::Estimated => BenefitSource::Estimated,
        CliBenefitSource::Omitted => BenefitSource::Omitted,
        CliBenefitSource::Fixed => {
            let Some(monthly_amount) = args.monthly_benefit else {
                return Err(ProjectionError::InvalidInput(
                    "--monthly-benefit is required when --benefit-source=fixed".to_string(),
                ));
            };
            BenefitSource::Fixed { monthly_amount }
        }
    };

    let start_year = args.start_year.unwrap_or_else(current_year);
    let fits_horizon = i32::try_from(args.life_expectancy - args.current_age)
        .ok()
        .and_then(|years| start_year.checked_add(years))
        .is_some();
    if !fits_horizon {
        return Err(ProjectionError::InvalidInput(format!(
            "--start-year {start_year} is too late to project through --life-expectancy {}",
            args.life_expectancy
        )));
    }
    let inflation_rate = args.inflation_rate / 100.0;
    let distribution_inflation_rate = args
        .inflation_rate_distribution
        .map(|rate| rate / 100.0)
        .unwrap_or(inflation_rate);

    let accumulation = AccumulationInputs {
        current_age: args.current_age,
        retirement_age: args.retirement_age,
        start_year,
        annual_income: args.annual_income,
        current_savings: args.current_savings,
        monthly_contributions: args.monthly_contributions,
        current_monthly_expenses: args.current_monthly_expenses,
        pre_return_rate: args.pre_return_rate / 100.0,
        inflation_rate,
        income_growth_rate: args.income_growth_rate / 100.0,
        contribution_policy: args.contribution_policy.into(),
    };
    let distribution = DistributionInputs {
        retirement_age: args.retirement_age,
        life_expectancy: args.life_expectancy,
        start_year: start_year + (args.retirement_age - args.current_age) as i32,
        retirement_savings: 0.0,
        monthly_expenses: 0.0,
        other_monthly_income: args.other_income,
        post_return_rate: args.post_return_rate / 100.0,
        inflation_rate: distribution_inflation_rate,
        benefit_source,
        full_benefit_age: args.full_benefit_age,
        claiming_age: args.claiming_age.unwrap_or(args.retirement_age),
    };

    Ok(ProjectionRequest {
        accumulation,
        distribution,
    })
}

/// Runs the accumulation phase and feeds its savings, expenses and earnings
/// history into the distribution phase.
pub fn run_projection(
    repository: &TaxBracketRepository,
    request: &ProjectionRequest,
) -> Result<ProjectionResponse, ProjectionError> {
    let accumulation = compute_accumulation(repository, &request.accumulation)?;

    let mut distribution_inputs = request.distribution.clone();
    distribution_inputs.retirement_savings = accumulation.projected_retirement_savings;
    distribution_inputs.monthly_expenses = accumulation.projected_monthly_expenses_at_retirement;
    let distribution = compute_distribution(&distribution_inputs, &accumulation.years)?;

    Ok(ProjectionResponse {
        accumulation,
        distribution,
    })
}

pub fn bracket_years(repository: &TaxBracketRepository) -> BracketYears {
    BracketYears {
        known_years: repository.known_years().collect(),
        latest_known_year: repository.latest_known_year(),
    }
}

pub fn tax_report(
    repository: &TaxBracketRepository,
    income: f64,
    year: i32,
) -> Result<TaxResponse, ProjectionError> {
    let outcome = compute_tax(repository, income, year)?;
    Ok(TaxResponse {
        effective_rate_percentage: format_percentage(outcome.effective_rate),
        marginal_rate_percentage: format_percentage(outcome.marginal_rate),
        outcome,
    })
}

fn format_percentage(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

pub fn load_repository(path: Option<&std::path::Path>) -> Result<TaxBracketRepository, String> {
    let Some(path) = path else {
        return Ok(TaxBracketRepository::us_federal());
    };
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    TaxBracketRepository::from_json_str(&json).map_err(|e| e.to_string())
}

pub async fn run_http_server(port: u16, repository: TaxBracketRepository) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(repository);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "projection HTTP API listening");

    axum::serve(listener, app).await
}

fn router(repository: TaxBracketRepository) -> Router {
    let state = Arc::new(AppState { repository });
    Router::new()
        .route("/api/tax", get(tax_handler))
        .route("/api/brackets", get(bracket_years_handler))
        .route("/api/brackets/:year", get(brackets_handler))
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(state)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn tax_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TaxQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    let year = query.year.unwrap_or_else(current_year);
    match tax_report(&state.repository, query.income, year) {
        Ok(report) => json_response(StatusCode::OK, report),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn bracket_years_handler(State(state): State<Arc<AppState>>) -> Response {
    json_response(StatusCode::OK, bracket_years(&state.repository))
}

async fn brackets_handler(State(state): State<Arc<AppState>>, Path(year): Path<i32>) -> Response {
    match state.repository.brackets_for_year(year) {
        Ok(table) => {
            debug!(
                year = table.year(),
                extrapolated = table.is_extrapolated(),
                "served bracket table"
            );
            json_response::<BracketTable>(StatusCode::OK, table)
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn project_get_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Query<ProjectionPayload>, QueryRejection>,
) -> Response {
    match payload {
        Ok(Query(payload)) => project_handler_impl(&state, payload),
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    }
}

async fn project_post_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProjectionPayload>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(payload)) => project_handler_impl(&state, payload),
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    }
}

fn project_handler_impl(state: &AppState, payload: ProjectionPayload) -> Response {
    let result = build_inputs(&args_from_payload(payload))
        .and_then(|request| run_projection(&state.repository, &request));
    match result {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn args_from_json(json: &str) -> Result<ProjectionArgs, String> {
    let payload = serde_json::from_str::<ProjectionPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(args_from_payload(payload))
}

fn args_from_payload(payload: ProjectionPayload) -> ProjectionArgs {
    let mut args = ProjectionArgs::default();

    if let Some(v) = payload.current_age {
        args.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        args.retirement_age = v;
    }
    if let Some(v) = payload.life_expectancy {
        args.life_expectancy = v;
    }
    if let Some(v) = payload.start_year {
        args.start_year = Some(v);
    }

    if let Some(v) = payload.annual_income {
        args.annual_income = v;
    }
    if let Some(v) = payload.current_savings {
        args.current_savings = v;
    }
    if let Some(v) = payload.monthly_contributions {
        args.monthly_contributions = v;
    }
    if let Some(v) = payload.current_monthly_expenses {
        args.current_monthly_expenses = v;
    }
    if let Some(v) = payload.other_income {
        args.other_income = v;
    }

    if let Some(v) = payload.pre_return_rate {
        args.pre_return_rate = v;
    }
    if let Some(v) = payload.post_return_rate {
        args.post_return_rate = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.inflation_rate_distribution {
        args.inflation_rate_distribution = Some(v);
    }
    if let Some(v) = payload.income_growth_rate {
        args.income_growth_rate = v;
    }

    if let Some(v) = payload.contribution_policy {
        args.contribution_policy = v.into();
    }
    if let Some(v) = payload.benefit_source {
        args.benefit_source = v.into();
    }
    if let Some(v) = payload.monthly_benefit {
        args.monthly_benefit = Some(v);
    }
    if let Some(v) = payload.full_benefit_age {
        args.full_benefit_age = v;
    }
    if let Some(v) = payload.claiming_age {
        args.claiming_age = Some(v);
    }

    args
}
