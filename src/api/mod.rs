use axum::{
    Router,
    extract::{Json, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub mod migration;
pub mod session;

use crate::core::{
    AssetAllocation, BonusAmount, BonusPolicy, ContributionConfig, EngineResult, FinancialProfile,
    FormulaCache, FormulaKey, LiquidityReport, MAX_PROJECTION_YEARS, Milestone, MilestoneCategory,
    MilestoneFilter, Projection, ProjectionSettings, RetirementNeeds, UserGoal, YearMonth,
    analyze_liquidity, compound_growth, derive_milestones, portfolio_stats, project,
    required_contribution, retirement_corpus,
};

const FORMULA_CACHE_CAPACITY: usize = 256;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliBonusKind {
    Fixed,
    SalaryMultiple,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiBonusKind {
    Fixed,
    SalaryMultiple,
}

impl From<ApiBonusKind> for CliBonusKind {
    fn from(value: ApiBonusKind) -> Self {
        match value {
            ApiBonusKind::Fixed => CliBonusKind::Fixed,
            ApiBonusKind::SalaryMultiple => CliBonusKind::SalaryMultiple,
        }
    }
}

/// Projection settings as flags. Rates are given in percent.
#[derive(Args, Debug, Clone)]
pub struct ProjectionArgs {
    #[arg(long, default_value_t = 10, help = "Projection horizon in years")]
    pub years: u32,
    #[arg(long, default_value_t = 3.0, help = "Annual salary growth in percent")]
    pub salary_growth: f64,
    #[arg(long, default_value_t = 2.0, help = "Annual expense growth in percent")]
    pub expense_growth: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual return on liquid cash in percent"
    )]
    pub investment_return: f64,
    #[arg(
        long,
        default_value_t = 2.5,
        help = "Annual retirement account interest in percent"
    )]
    pub retirement_interest: f64,
    #[arg(
        long,
        help = "First projected month as YYYY-MM; defaults to the current month"
    )]
    pub start: Option<String>,
    #[arg(long, help = "Liquid cash threshold for the savings milestone")]
    pub savings_goal: Option<f64>,
    #[arg(long, help = "Age that marks the retirement milestone")]
    pub retirement_age: Option<u32>,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Months paying the traditional bonus, e.g. 12 or 6,12"
    )]
    pub bonus_months: Vec<u32>,
    #[arg(long, default_value_t = 1, help = "Traditional bonuses paid per year")]
    pub bonus_max_per_year: u32,
    #[arg(long, value_enum, default_value_t = CliBonusKind::SalaryMultiple)]
    pub bonus_kind: CliBonusKind,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Traditional bonus as a fixed sum or a multiple of monthly salary"
    )]
    pub bonus_amount: f64,
    #[arg(
        long,
        help = "Stop this many months after the loan and savings milestones are both reached"
    )]
    pub early_exit_after: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SettingsPayload {
    years: Option<u32>,
    salary_growth: Option<f64>,
    expense_growth: Option<f64>,
    investment_return: Option<f64>,
    retirement_interest: Option<f64>,
    start: Option<String>,
    savings_goal: Option<f64>,
    retirement_age: Option<u32>,
    bonus_months: Option<Vec<u32>>,
    bonus_max_per_year: Option<u32>,
    bonus_kind: Option<ApiBonusKind>,
    bonus_amount: Option<f64>,
    early_exit_after: Option<u32>,
}

/// Fields shared by every projection-backed request. `profile` may be a stored
/// document of any version.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionRequest {
    profile: Value,
    #[serde(default)]
    settings: SettingsPayload,
    #[serde(default)]
    today: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiquidityRequest {
    #[serde(flatten)]
    base: ProjectionRequest,
    #[serde(default = "first_month")]
    month_index: u32,
    #[serde(default)]
    minimum_buffer: f64,
}

fn first_month() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MilestonesRequest {
    #[serde(flatten)]
    base: ProjectionRequest,
    #[serde(default)]
    goals: Vec<UserGoal>,
    #[serde(default)]
    categories: Vec<MilestoneCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompoundRequest {
    principal: f64,
    #[serde(default)]
    contribution: f64,
    annual_rate: f64,
    years: f64,
    #[serde(default = "monthly_periods")]
    periods_per_year: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequiredContributionRequest {
    target: f64,
    #[serde(default)]
    current: f64,
    annual_rate: f64,
    years: f64,
    #[serde(default = "monthly_periods")]
    periods_per_year: u32,
}

fn monthly_periods() -> u32 {
    12
}

#[derive(Debug, Deserialize)]
struct PortfolioRequest {
    assets: Vec<AssetAllocation>,
}

#[derive(Debug)]
struct PreparedProjection {
    profile: FinancialProfile,
    settings: ProjectionSettings,
    today: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MilestonesResponse {
    milestones: Vec<Milestone>,
    total: usize,
    filter: MilestoneFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequiredContributionResponse {
    contribution: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
struct AppState {
    config: Arc<ContributionConfig>,
    formulas: Arc<Mutex<FormulaCache>>,
}

impl AppState {
    fn new(config: ContributionConfig) -> Self {
        Self {
            config: Arc::new(config),
            formulas: Arc::new(Mutex::new(FormulaCache::new(FORMULA_CACHE_CAPACITY))),
        }
    }
}

pub fn build_settings(args: ProjectionArgs, today: NaiveDate) -> Result<ProjectionSettings, String> {
    if args.years == 0 {
        return Err("--years must be > 0".to_string());
    }
    if args.years > MAX_PROJECTION_YEARS {
        return Err(format!("--years must be <= {MAX_PROJECTION_YEARS}"));
    }

    for (flag, pct) in [
        ("--salary-growth", args.salary_growth),
        ("--expense-growth", args.expense_growth),
        ("--investment-return", args.investment_return),
        ("--retirement-interest", args.retirement_interest),
    ] {
        if !pct.is_finite() || pct <= -100.0 {
            return Err(format!("{flag} must be > -100"));
        }
    }

    let start = match args.start.as_deref() {
        Some(raw) => parse_year_month(raw).ok_or_else(|| "--start must be YYYY-MM".to_string())?,
        None => YearMonth::new(today.year(), today.month()),
    };

    if let Some(goal) = args.savings_goal {
        if !goal.is_finite() || goal < 0.0 {
            return Err("--savings-goal must be >= 0".to_string());
        }
    }

    if let Some(month) = args.bonus_months.iter().find(|m| !(1..=12).contains(*m)) {
        return Err(format!("--bonus-months entry {month} must be between 1 and 12"));
    }
    if !args.bonus_amount.is_finite() || args.bonus_amount < 0.0 {
        return Err("--bonus-amount must be >= 0".to_string());
    }
    if !args.bonus_months.is_empty() && args.bonus_max_per_year == 0 {
        return Err("--bonus-max-per-year must be > 0 when --bonus-months is set".to_string());
    }

    let amount = match args.bonus_kind {
        CliBonusKind::Fixed => BonusAmount::Fixed(args.bonus_amount),
        CliBonusKind::SalaryMultiple => BonusAmount::SalaryMultiple(args.bonus_amount),
    };

    Ok(ProjectionSettings {
        salary_growth: args.salary_growth / 100.0,
        expense_growth: args.expense_growth / 100.0,
        investment_return: args.investment_return / 100.0,
        retirement_interest: args.retirement_interest / 100.0,
        years: args.years,
        bonus_policy: BonusPolicy {
            months: args.bonus_months,
            max_per_year: args.bonus_max_per_year,
            amount,
        },
        start: Some(start),
        savings_goal: args.savings_goal,
        retirement_age: args.retirement_age,
        early_exit_after: args.early_exit_after,
    })
}

pub fn parse_year_month(raw: &str) -> Option<YearMonth> {
    let (year, month) = raw.trim().split_once('-')?;
    let at = YearMonth::new(year.parse().ok()?, month.parse().ok()?);
    at.is_valid().then_some(at)
}

/// `YYYY-MM-DD`, or the local date when absent.
pub fn resolve_today(raw: Option<&str>) -> Result<NaiveDate, String> {
    match raw {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
            .map_err(|_| "--today must be YYYY-MM-DD".to_string()),
        None => Ok(Local::now().date_naive()),
    }
}

pub async fn run_http_server(port: u16, config: ContributionConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = AppState::new(config);
    let app = Router::new()
        .route("/api/project", post(project_handler))
        .route("/api/liquidity", post(liquidity_handler))
        .route("/api/milestones", post(milestones_handler))
        .route("/api/formulas/compound", post(compound_handler))
        .route(
            "/api/formulas/required-contribution",
            post(required_contribution_handler),
        )
        .route(
            "/api/formulas/retirement-corpus",
            post(retirement_corpus_handler),
        )
        .route("/api/formulas/portfolio", post(portfolio_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    log::info!("cashpath HTTP API listening on http://{addr}");
    log::info!("Local access: http://127.0.0.1:{port}/api/project");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_handler(
    State(state): State<AppState>,
    Json(request): Json<ProjectionRequest>,
) -> Response {
    respond("project", run_project(&state.config, request))
}

async fn liquidity_handler(
    State(state): State<AppState>,
    Json(request): Json<LiquidityRequest>,
) -> Response {
    respond("liquidity", run_liquidity(&state.config, request))
}

async fn milestones_handler(
    State(state): State<AppState>,
    Json(request): Json<MilestonesRequest>,
) -> Response {
    respond("milestones", run_milestones(&state.config, request))
}

async fn compound_handler(
    State(state): State<AppState>,
    Json(request): Json<CompoundRequest>,
) -> Response {
    respond("compound", run_compound(&state, request))
}

async fn required_contribution_handler(
    State(state): State<AppState>,
    Json(request): Json<RequiredContributionRequest>,
) -> Response {
    respond(
        "required-contribution",
        run_required_contribution(&state, request),
    )
}

async fn retirement_corpus_handler(
    State(state): State<AppState>,
    Json(request): Json<RetirementNeeds>,
) -> Response {
    respond("retirement-corpus", run_retirement_corpus(&state, request))
}

async fn portfolio_handler(
    State(state): State<AppState>,
    Json(request): Json<PortfolioRequest>,
) -> Response {
    respond("portfolio", run_portfolio(&state, request))
}

fn respond<T: Serialize>(endpoint: &str, result: Result<T, String>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(msg) => {
            log::warn!("{endpoint} request rejected: {msg}");
            error_response(StatusCode::BAD_REQUEST, &msg)
        }
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

fn default_args_for_api() -> ProjectionArgs {
    ProjectionArgs {
        years: 10,
        salary_growth: 3.0,
        expense_growth: 2.0,
        investment_return: 0.0,
        retirement_interest: 2.5,
        start: None,
        savings_goal: None,
        retirement_age: None,
        bonus_months: Vec::new(),
        bonus_max_per_year: 1,
        bonus_kind: CliBonusKind::SalaryMultiple,
        bonus_amount: 0.0,
        early_exit_after: None,
    }
}

fn settings_from_payload(
    payload: SettingsPayload,
    today: NaiveDate,
) -> Result<ProjectionSettings, String> {
    let mut args = default_args_for_api();

    if let Some(v) = payload.years {
        args.years = v;
    }
    if let Some(v) = payload.salary_growth {
        args.salary_growth = v;
    }
    if let Some(v) = payload.expense_growth {
        args.expense_growth = v;
    }
    if let Some(v) = payload.investment_return {
        args.investment_return = v;
    }
    if let Some(v) = payload.retirement_interest {
        args.retirement_interest = v;
    }
    if payload.start.is_some() {
        args.start = payload.start;
    }
    if payload.savings_goal.is_some() {
        args.savings_goal = payload.savings_goal;
    }
    if payload.retirement_age.is_some() {
        args.retirement_age = payload.retirement_age;
    }
    if let Some(v) = payload.bonus_months {
        args.bonus_months = v;
    }
    if let Some(v) = payload.bonus_max_per_year {
        args.bonus_max_per_year = v;
    }
    if let Some(v) = payload.bonus_kind {
        args.bonus_kind = v.into();
    }
    if let Some(v) = payload.bonus_amount {
        args.bonus_amount = v;
    }
    if payload.early_exit_after.is_some() {
        args.early_exit_after = payload.early_exit_after;
    }

    build_settings(args, today)
}

fn prepare(request: ProjectionRequest) -> Result<PreparedProjection, String> {
    let today = resolve_today(request.today.as_deref())?;
    let profile = migration::normalize_profile(request.profile).map_err(|e| e.to_string())?;
    let settings = settings_from_payload(request.settings, today)?;
    Ok(PreparedProjection {
        profile,
        settings,
        today,
    })
}

fn run_prepared(
    config: &ContributionConfig,
    prepared: &PreparedProjection,
) -> Result<Projection, String> {
    project(
        &prepared.profile,
        &prepared.settings,
        config,
        prepared.today,
    )
    .map_err(|e| e.to_string())
}

fn run_project(config: &ContributionConfig, request: ProjectionRequest) -> Result<Projection, String> {
    let prepared = prepare(request)?;
    run_prepared(config, &prepared)
}

fn run_liquidity(
    config: &ContributionConfig,
    request: LiquidityRequest,
) -> Result<LiquidityReport, String> {
    let prepared = prepare(request.base)?;
    let projection = run_prepared(config, &prepared)?;
    let month = request
        .month_index
        .checked_sub(1)
        .and_then(|i| projection.months.get(i as usize))
        .ok_or_else(|| {
            format!(
                "monthIndex must be between 1 and {}",
                projection.months.len()
            )
        })?;
    analyze_liquidity(month, &prepared.profile, request.minimum_buffer).map_err(|e| e.to_string())
}

fn run_milestones(
    config: &ContributionConfig,
    request: MilestonesRequest,
) -> Result<MilestonesResponse, String> {
    let prepared = prepare(request.base)?;
    let projection = run_prepared(config, &prepared)?;
    let milestones = derive_milestones(&projection, &request.goals);
    let filter = if request.categories.is_empty() {
        MilestoneFilter::new()
    } else {
        MilestoneFilter::from_categories(request.categories)
    };
    let visible = filter.apply(&milestones).into_iter().cloned().collect();
    Ok(MilestonesResponse {
        milestones: visible,
        total: milestones.len(),
        filter,
    })
}

fn cached_formula<T: Serialize>(
    state: &AppState,
    key: FormulaKey,
    compute: impl FnOnce() -> EngineResult<T>,
) -> Result<Value, String> {
    let mut cache = state
        .formulas
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    cache.get_or_insert_with(key, || {
        let result = compute().map_err(|e| e.to_string())?;
        serde_json::to_value(result).map_err(|e| e.to_string())
    })
}

fn run_compound(state: &AppState, r: CompoundRequest) -> Result<Value, String> {
    let key = FormulaKey::new(
        "compound",
        &[
            r.principal,
            r.contribution,
            r.annual_rate,
            r.years,
            r.periods_per_year as f64,
        ],
    );
    cached_formula(state, key, || {
        compound_growth(
            r.principal,
            r.contribution,
            r.annual_rate,
            r.years,
            r.periods_per_year,
        )
    })
}

fn run_required_contribution(
    state: &AppState,
    r: RequiredContributionRequest,
) -> Result<Value, String> {
    let key = FormulaKey::new(
        "required-contribution",
        &[
            r.target,
            r.current,
            r.annual_rate,
            r.years,
            r.periods_per_year as f64,
        ],
    );
    cached_formula(state, key, || {
        required_contribution(
            r.target,
            r.current,
            r.annual_rate,
            r.years,
            r.periods_per_year,
        )
        .map(|contribution| RequiredContributionResponse { contribution })
    })
}

fn run_retirement_corpus(state: &AppState, needs: RetirementNeeds) -> Result<Value, String> {
    let key = FormulaKey::new(
        "retirement-corpus",
        &[
            needs.annual_expenses,
            needs.years_to_retirement,
            needs.retirement_years,
            needs.inflation_rate,
            needs.post_retirement_return,
            needs.safe_withdrawal_rate,
        ],
    );
    cached_formula(state, key, || retirement_corpus(&needs))
}

fn run_portfolio(state: &AppState, r: PortfolioRequest) -> Result<Value, String> {
    let args: Vec<f64> = r
        .assets
        .iter()
        .flat_map(|a| [a.weight_pct, a.expected_return, a.volatility])
        .collect();
    let key = FormulaKey::new("portfolio", &args);
    cached_formula(state, key, || portfolio_stats(&r.assets))
}

#[cfg(test)]
fn project_from_json(config: &ContributionConfig, json: &str) -> Result<Projection, String> {
    let request = serde_json::from_str::<ProjectionRequest>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    run_project(config, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MilestoneKind, Severity};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn config() -> ContributionConfig {
        ContributionConfig::bundled().expect("bundled config is valid")
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date")
    }

    fn sample_args() -> ProjectionArgs {
        default_args_for_api()
    }

    fn profile_json() -> &'static str {
        r#"{
            "personal": {
                "birth": { "year": 1994, "month": 5 },
                "liquidCash": 500.0,
                "loanBalance": 10000.0,
                "loanAnnualRate": 0.0,
                "loanMonthlyPayment": 1000.0
            },
            "income": {
                "baseSalary": 6000.0,
                "contribution": { "kind": "fixedRates", "employeeRate": 0.2, "employerRate": 0.17 },
                "salaryDay": 25
            },
            "recurringExpenses": [{ "name": "Rent", "amount": 700.0, "dueDay": 1 }]
        }"#
    }

    #[test]
    fn build_settings_converts_percentages() {
        let mut args = sample_args();
        args.salary_growth = 5.0;
        args.retirement_interest = 4.0;
        let settings = build_settings(args, today()).expect("valid settings");
        assert_approx(settings.salary_growth, 0.05);
        assert_approx(settings.retirement_interest, 0.04);
        assert_eq!(settings.years, 10);
        assert_eq!(settings.early_exit_after, None);
    }

    #[test]
    fn build_settings_defaults_start_to_current_month() {
        let settings = build_settings(sample_args(), today()).expect("valid settings");
        assert_eq!(settings.start, Some(YearMonth::new(2025, 1)));

        let mut args = sample_args();
        args.start = Some("2026-07".to_string());
        let settings = build_settings(args, today()).expect("valid settings");
        assert_eq!(settings.start, Some(YearMonth::new(2026, 7)));
    }

    #[test]
    fn build_settings_rejects_invalid_flags() {
        let mut args = sample_args();
        args.years = 0;
        assert!(build_settings(args, today()).expect_err("zero years").contains("--years"));

        let mut args = sample_args();
        args.start = Some("2025-13".to_string());
        assert!(build_settings(args, today()).expect_err("bad month").contains("--start"));

        let mut args = sample_args();
        args.bonus_months = vec![12, 0];
        assert!(
            build_settings(args, today())
                .expect_err("bad bonus month")
                .contains("--bonus-months")
        );

        let mut args = sample_args();
        args.expense_growth = -100.0;
        assert!(
            build_settings(args, today())
                .expect_err("growth <= -100")
                .contains("--expense-growth")
        );
    }

    #[test]
    fn build_settings_maps_bonus_policy() {
        let mut args = sample_args();
        args.bonus_months = vec![6, 12];
        args.bonus_max_per_year = 2;
        args.bonus_kind = CliBonusKind::Fixed;
        args.bonus_amount = 3_000.0;
        let settings = build_settings(args, today()).expect("valid settings");
        assert_eq!(settings.bonus_policy.months, vec![6, 12]);
        assert_eq!(settings.bonus_policy.max_per_year, 2);
        assert_eq!(settings.bonus_policy.amount, BonusAmount::Fixed(3_000.0));
    }

    #[test]
    fn parse_year_month_and_today() {
        assert_eq!(parse_year_month("2030-02"), Some(YearMonth::new(2030, 2)));
        assert_eq!(parse_year_month("2030/02"), None);
        assert_eq!(parse_year_month("2030-00"), None);
        assert_eq!(resolve_today(Some("2025-03-15")), Ok(NaiveDate::from_ymd_opt(2025, 3, 15).expect("valid")));
        assert!(resolve_today(Some("15/03/2025")).is_err());
    }

    #[test]
    fn settings_payload_parses_web_keys() {
        let payload: SettingsPayload = serde_json::from_str(
            r#"{ "years": 2, "salaryGrowth": 0, "expenseGrowth": 0, "retirementInterest": 0,
                 "start": "2025-01", "savingsGoal": 5000, "bonusMonths": [12],
                 "bonusKind": "fixed", "bonusAmount": 1000, "earlyExitAfter": 3 }"#,
        )
        .expect("valid payload");
        let settings = settings_from_payload(payload, today()).expect("valid settings");
        assert_eq!(settings.years, 2);
        assert_eq!(settings.savings_goal, Some(5_000.0));
        assert_eq!(settings.bonus_policy.amount, BonusAmount::Fixed(1_000.0));
        assert_eq!(settings.early_exit_after, Some(3));
        assert_approx(settings.salary_growth, 0.0);
    }

    #[test]
    fn settings_payload_rejects_unknown_bonus_kind() {
        let result = serde_json::from_str::<SettingsPayload>(r#"{ "bonusKind": "lottery" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn project_endpoint_runs_full_horizon_and_finds_loan_payoff() {
        let json = format!(
            r#"{{ "profile": {}, "settings": {{ "years": 2, "start": "2025-01",
                 "salaryGrowth": 0, "expenseGrowth": 0, "retirementInterest": 0 }},
                 "today": "2025-01-01" }}"#,
            profile_json()
        );
        let projection = project_from_json(&config(), &json).expect("valid request");
        assert_eq!(projection.months.len(), 24);
        assert_approx(projection.months[0].take_home, 4_800.0);
        let payoff = projection
            .milestones
            .get(MilestoneKind::LoanPaidOff)
            .expect("loan is repaid");
        assert_eq!(payoff.index, 10);
    }

    #[test]
    fn project_endpoint_accepts_legacy_profiles() {
        let json = r#"{
            "profile": { "version": 1, "birthYear": 1990, "salary": 5000, "savings": 100,
                         "expenses": [{ "name": "Food", "amount": 400 }] },
            "settings": { "years": 1, "start": "2025-01" },
            "today": "2025-01-01"
        }"#;
        let projection = project_from_json(&config(), json).expect("valid request");
        assert_eq!(projection.months.len(), 12);
        assert_approx(projection.months[0].recurring_expenses, 400.0);
    }

    #[test]
    fn project_endpoint_reports_missing_fields() {
        let json = r#"{ "profile": { "income": { "baseSalary": 1000 } }, "today": "2025-01-01" }"#;
        let err = project_from_json(&config(), json).expect_err("birth is required");
        assert!(err.contains("personal.birth"));
    }

    #[test]
    fn liquidity_endpoint_flags_rent_before_payday() {
        let json = format!(
            r#"{{ "profile": {}, "settings": {{ "years": 1, "start": "2025-01" }},
                 "today": "2025-01-01", "monthIndex": 1 }}"#,
            profile_json()
        )
        .replace(r#""loanBalance": 10000.0"#, r#""loanBalance": 0.0"#);
        let request: LiquidityRequest = serde_json::from_str(&json).expect("valid request");
        let report = run_liquidity(&config(), request).expect("valid month");

        assert_eq!(report.warnings[0].day, 1);
        assert_eq!(report.warnings[0].severity, Severity::Critical);
        assert_eq!(report.min_balance_day, Some(1));
        assert_eq!(report.daily_balances.len(), 31);
    }

    #[test]
    fn liquidity_endpoint_rejects_month_outside_projection() {
        let json = format!(
            r#"{{ "profile": {}, "settings": {{ "years": 1, "start": "2025-01" }},
                 "today": "2025-01-01", "monthIndex": 13 }}"#,
            profile_json()
        );
        let request: LiquidityRequest = serde_json::from_str(&json).expect("valid request");
        let err = run_liquidity(&config(), request).expect_err("out of range");
        assert!(err.contains("monthIndex"));
    }

    #[test]
    fn milestones_endpoint_merges_goals_and_filters() {
        let json = format!(
            r#"{{ "profile": {}, "settings": {{ "years": 2, "start": "2025-01", "savingsGoal": 10000 }},
                 "today": "2025-01-01",
                 "goals": [{{ "id": "goal-1", "title": "Holiday", "category": "custom",
                              "target": {{ "kind": "liquidCash", "amount": 2000 }} }}],
                 "categories": ["custom"] }}"#,
            profile_json()
        );
        let request: MilestonesRequest = serde_json::from_str(&json).expect("valid request");
        let response = run_milestones(&config(), request).expect("valid request");

        assert_eq!(response.total, 3);
        assert_eq!(response.milestones.len(), 1);
        let holiday = &response.milestones[0];
        assert_eq!(holiday.id, "goal-1");
        assert!(!holiday.system);
        assert!(holiday.reached.is_some());
    }

    #[test]
    fn formula_results_are_cached() {
        let state = AppState::new(config());
        let request = || CompoundRequest {
            principal: 1_000.0,
            contribution: 100.0,
            annual_rate: 0.1,
            years: 2.0,
            periods_per_year: 1,
        };
        let first = run_compound(&state, request()).expect("valid");
        let second = run_compound(&state, request()).expect("valid");
        assert_eq!(first, second);
        assert_approx(first["futureValue"].as_f64().expect("number"), 1_420.0);

        let cache = state.formulas.lock().expect("lock");
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn formula_errors_are_reported_not_cached() {
        let state = AppState::new(config());
        let err = run_required_contribution(
            &state,
            RequiredContributionRequest {
                target: 10_000.0,
                current: 0.0,
                annual_rate: 0.05,
                years: 1.0,
                periods_per_year: 0,
            },
        )
        .expect_err("zero periods");
        assert!(err.contains("periodsPerYear"));
        assert!(state.formulas.lock().expect("lock").is_empty());
    }

    #[test]
    fn portfolio_and_corpus_endpoints_parse_camel_case() {
        let state = AppState::new(config());
        let portfolio: PortfolioRequest = serde_json::from_str(
            r#"{ "assets": [
                { "name": "equities", "weightPct": 60, "expectedReturn": 0.08, "volatility": 0.15 },
                { "name": "bonds", "weightPct": 40, "expectedReturn": 0.03, "volatility": 0.05 }
            ] }"#,
        )
        .expect("valid payload");
        let stats = run_portfolio(&state, portfolio).expect("valid");
        assert_approx(stats["expectedReturn"].as_f64().expect("number"), 0.06);

        let needs: RetirementNeeds = serde_json::from_str(
            r#"{ "annualExpenses": 40000, "yearsToRetirement": 0, "retirementYears": 30,
                 "inflationRate": 0, "postRetirementReturn": 0, "safeWithdrawalRate": 0.04 }"#,
        )
        .expect("valid payload");
        let corpus = run_retirement_corpus(&state, needs).expect("valid");
        assert_approx(corpus["recommended"].as_f64().expect("number"), 1_200_000.0);
    }
}
