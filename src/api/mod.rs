use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::{
    Breakeven, CashFlowYear, FilingStatus, FundAllocation, HouseholdYear, MonteCarloConfig,
    MonteCarloResult, PercentileBand, ProjectionError, ProjectionResult, RiskMetrics,
    ScenarioParameters, SummaryPoint, SurvivorOption, TrialResult, WithdrawalStrategy,
    YearRecord, cash_flow, combine_household, cumulative_income, find_breakeven, project,
    project_expenses, risk_metrics, run_monte_carlo, summarize, validate,
};
use crate::export::{monte_carlo_csv, projection_csv, projection_monthly_csv};
use crate::store::{ScenarioStore, StoreError};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

const DEFAULT_SCENARIO_NAME: &str = "Scenario";
const DEFAULT_SIMULATIONS: u32 = 100;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_COLA_STD_PCT: f64 = 0.5;
const DEFAULT_TSP_GROWTH_STD_PCT: f64 = 10.0;

/// Form-shaped scenario. Every field is optional and falls back to
/// [`default_parameters`]. Rates are percentages (`2` means 2%).
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioPayload {
    name: Option<String>,
    birthdate: Option<NaiveDate>,
    service_start_date: Option<NaiveDate>,
    retire_date: Option<NaiveDate>,
    projection_start_year: Option<i32>,
    high3_salary: Option<f64>,
    current_salary: Option<f64>,
    tsp_balance: Option<f64>,
    biweekly_tsp_contribution: Option<f64>,
    agency_matching: Option<bool>,
    sick_leave_hours: Option<f64>,
    ss_start_age: Option<u32>,
    ss_base_benefit: Option<f64>,
    survivor_option: Option<SurvivorOption>,
    filing_status: Option<FilingStatus>,
    state_tax_exempt: Option<bool>,
    cola_rate: Option<f64>,
    tsp_growth_rate: Option<f64>,
    tsp_withdrawal_rate: Option<f64>,
    withdrawal_strategy: Option<WithdrawalStrategy>,
    fehb_monthly_premium: Option<f64>,
    fehb_growth_rate: Option<f64>,
    include_medicare: Option<bool>,
    g_fund_pct: Option<f64>,
    f_fund_pct: Option<f64>,
    c_fund_pct: Option<f64>,
    s_fund_pct: Option<f64>,
    i_fund_pct: Option<f64>,
    years_in_retirement: Option<u32>,
    notes: Option<String>,
}

impl From<&ScenarioParameters> for ScenarioPayload {
    fn from(params: &ScenarioParameters) -> Self {
        let allocation = params.fund_allocation;
        Self {
            name: Some(params.name.clone()),
            birthdate: Some(params.birthdate),
            service_start_date: Some(params.service_start_date),
            retire_date: Some(params.retire_date),
            projection_start_year: Some(params.projection_start_year),
            high3_salary: Some(params.high3_salary),
            current_salary: params.current_salary,
            tsp_balance: Some(params.tsp_balance),
            biweekly_tsp_contribution: Some(params.biweekly_tsp_contribution),
            agency_matching: Some(params.agency_matching),
            sick_leave_hours: Some(params.sick_leave_hours),
            ss_start_age: Some(params.ss_start_age),
            ss_base_benefit: params.ss_base_benefit,
            survivor_option: Some(params.survivor_option),
            filing_status: Some(params.filing_status),
            state_tax_exempt: Some(params.state_tax_exempt),
            cola_rate: Some(to_pct(params.cola_rate)),
            tsp_growth_rate: Some(to_pct(params.tsp_growth_rate)),
            tsp_withdrawal_rate: Some(to_pct(params.tsp_withdrawal_rate)),
            withdrawal_strategy: Some(params.withdrawal_strategy),
            fehb_monthly_premium: Some(params.fehb_monthly_premium),
            fehb_growth_rate: Some(to_pct(params.fehb_growth_rate)),
            include_medicare: Some(params.include_medicare),
            g_fund_pct: allocation.map(|a| a.g_fund_pct),
            f_fund_pct: allocation.map(|a| a.f_fund_pct),
            c_fund_pct: allocation.map(|a| a.c_fund_pct),
            s_fund_pct: allocation.map(|a| a.s_fund_pct),
            i_fund_pct: allocation.map(|a| a.i_fund_pct),
            years_in_retirement: Some(params.years_in_retirement),
            notes: Some(params.notes.clone()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MonteCarloPayload {
    #[serde(flatten)]
    scenario: ScenarioPayload,
    simulations: Option<u32>,
    seed: Option<u64>,
    cola_mean: Option<f64>,
    cola_std: Option<f64>,
    tsp_growth_mean: Option<f64>,
    tsp_growth_std: Option<f64>,
    include_trials: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ExpensePayload {
    pre_retirement: Option<f64>,
    post_retirement: Option<f64>,
    inflation_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ComparePayload {
    a: ScenarioPayload,
    b: ScenarioPayload,
    expenses: Option<ExpensePayload>,
}

struct MonteCarloRequest {
    params: ScenarioParameters,
    config: MonteCarloConfig,
    include_trials: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    scenario: String,
    warnings: Vec<String>,
    cumulative_income: Vec<f64>,
    #[serde(flatten)]
    result: ProjectionResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonteCarloResponse {
    scenario: String,
    simulations: u32,
    seed: u64,
    warnings: Vec<String>,
    income_bands: Vec<PercentileBand>,
    balance_bands: Vec<PercentileBand>,
    summary: Vec<SummaryPoint>,
    risk: RiskMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    trials: Option<Vec<TrialResult>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareScenario {
    name: String,
    warnings: Vec<String>,
    years: Vec<YearRecord>,
    cumulative_income: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cash_flow: Option<Vec<CashFlowYear>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    a: CompareScenario,
    b: CompareScenario,
    breakeven: Option<Breakeven>,
    household: Vec<HouseholdYear>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioListResponse {
    scenarios: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedResponse {
    saved: String,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletedResponse {
    deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportedResponse {
    imported: usize,
}

#[derive(Clone)]
struct AppState {
    store: Arc<ScenarioStore>,
}

pub async fn run_http_server(port: u16, store: ScenarioStore) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let scenarios_dir = store.dir().display().to_string();
    let app = router(AppState {
        store: Arc::new(store),
    });

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, scenarios_dir, "retirement dashboard listening on http://{addr}/");

    axum::serve(listener, app).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/compare", post(compare_handler))
        .route(
            "/api/scenarios",
            get(list_scenarios_handler).delete(clear_scenarios_handler),
        )
        .route(
            "/api/scenarios/:name",
            get(load_scenario_handler)
                .put(save_scenario_handler)
                .delete(delete_scenario_handler),
        )
        .route(
            "/api/scenarios-bundle",
            get(export_bundle_handler).post(import_bundle_handler),
        )
        .route(
            "/api/export/projection.csv",
            get(projection_csv_get_handler).post(projection_csv_post_handler),
        )
        .route(
            "/api/export/projection-monthly.csv",
            get(projection_monthly_csv_get_handler).post(projection_monthly_csv_post_handler),
        )
        .route("/api/export/monte-carlo.csv", post(monte_carlo_csv_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(Query(payload): Query<ScenarioPayload>) -> Response {
    project_handler_impl(payload)
}

async fn project_post_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    project_handler_impl(payload)
}

fn project_handler_impl(payload: ScenarioPayload) -> Response {
    let params = match build_parameters(payload) {
        Ok(params) => params,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match project(&params) {
        Ok(result) => {
            debug!(scenario = %params.name, years = result.years.len(), "projection served");
            json_response(StatusCode::OK, build_project_response(&params, result))
        }
        Err(e) => projection_error_response(&e),
    }
}

fn build_project_response(params: &ScenarioParameters, result: ProjectionResult) -> ProjectResponse {
    ProjectResponse {
        scenario: params.name.clone(),
        warnings: params.warnings(),
        cumulative_income: cumulative_income(&result),
        result,
    }
}

async fn monte_carlo_handler(Json(payload): Json<MonteCarloPayload>) -> Response {
    let request = match monte_carlo_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let MonteCarloRequest {
        params,
        config,
        include_trials,
    } = request;
    let computed = tokio::task::spawn_blocking(move || {
        run_monte_carlo(&params, &config).map(|result| (params, result))
    })
    .await;

    match computed {
        Ok(Ok((params, result))) => json_response(
            StatusCode::OK,
            build_monte_carlo_response(&params, &config, result, include_trials),
        ),
        Ok(Err(e)) => projection_error_response(&e),
        Err(e) => {
            warn!(error = %e, "monte carlo task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn build_monte_carlo_response(
    params: &ScenarioParameters,
    config: &MonteCarloConfig,
    result: MonteCarloResult,
    include_trials: bool,
) -> MonteCarloResponse {
    let summary = summarize(&result, params);
    let risk = risk_metrics(&result, params);
    MonteCarloResponse {
        scenario: params.name.clone(),
        simulations: result.simulations,
        seed: config.seed,
        warnings: params.warnings(),
        summary,
        risk,
        trials: include_trials.then_some(result.trials),
        income_bands: result.income_bands,
        balance_bands: result.balance_bands,
    }
}

async fn compare_handler(Json(payload): Json<ComparePayload>) -> Response {
    match build_compare_response(payload) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn build_compare_response(payload: ComparePayload) -> Result<CompareResponse, String> {
    let a_params = build_parameters(payload.a).map_err(|e| format!("Scenario A: {e}"))?;
    let b_params = build_parameters(payload.b).map_err(|e| format!("Scenario B: {e}"))?;
    let a = project(&a_params).map_err(|e| format!("Scenario A: {}", join_messages(&e)))?;
    let b = project(&b_params).map_err(|e| format!("Scenario B: {}", join_messages(&e)))?;

    let breakeven = find_breakeven(&a, &b);
    let household = combine_household(&a, &b);
    let expenses = payload.expenses.map(build_expenses).transpose()?;

    let a = compare_scenario(&a_params, a, expenses.as_ref())?;
    let b = compare_scenario(&b_params, b, expenses.as_ref())?;
    Ok(CompareResponse {
        a,
        b,
        breakeven,
        household,
    })
}

struct Expenses {
    pre_retirement: f64,
    post_retirement: f64,
    inflation_rate: f64,
}

fn build_expenses(payload: ExpensePayload) -> Result<Expenses, String> {
    let expenses = Expenses {
        pre_retirement: payload.pre_retirement.unwrap_or(0.0),
        post_retirement: payload.post_retirement.unwrap_or(0.0),
        inflation_rate: payload.inflation_rate.unwrap_or(0.0) / 100.0,
    };
    if !(expenses.pre_retirement.is_finite() && expenses.pre_retirement >= 0.0) {
        return Err("preRetirement expenses must be >= 0".to_string());
    }
    if !(expenses.post_retirement.is_finite() && expenses.post_retirement >= 0.0) {
        return Err("postRetirement expenses must be >= 0".to_string());
    }
    if !(expenses.inflation_rate.is_finite() && expenses.inflation_rate > -1.0) {
        return Err("inflationRate must be > -100".to_string());
    }
    Ok(expenses)
}

fn compare_scenario(
    params: &ScenarioParameters,
    result: ProjectionResult,
    expenses: Option<&Expenses>,
) -> Result<CompareScenario, String> {
    let flow = match expenses {
        Some(expenses) => {
            let calendar_years = result
                .years
                .iter()
                .map(|y| y.calendar_year)
                .collect::<Vec<_>>();
            let yearly = project_expenses(
                &calendar_years,
                params.retire_date.year(),
                params.retire_date.month(),
                expenses.pre_retirement,
                expenses.post_retirement,
                expenses.inflation_rate,
            );
            Some(cash_flow(&result, &yearly).map_err(|e| join_messages(&e))?)
        }
        None => None,
    };

    Ok(CompareScenario {
        name: params.name.clone(),
        warnings: params.warnings(),
        cumulative_income: cumulative_income(&result),
        years: result.years,
        cash_flow: flow,
    })
}

/// Runs a store operation on the blocking pool.
async fn with_store<T, F>(state: &AppState, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&ScenarioStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .unwrap_or_else(|e| Err(StoreError::Io(std::io::Error::other(e))))
}

async fn list_scenarios_handler(State(state): State<AppState>) -> Response {
    match with_store(&state, ScenarioStore::list).await {
        Ok(scenarios) => json_response(StatusCode::OK, ScenarioListResponse { scenarios }),
        Err(e) => store_error_response(&e),
    }
}

async fn clear_scenarios_handler(State(state): State<AppState>) -> Response {
    match with_store(&state, ScenarioStore::clear).await {
        Ok(deleted) => json_response(StatusCode::OK, DeletedResponse { deleted }),
        Err(e) => store_error_response(&e),
    }
}

async fn load_scenario_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match with_store(&state, move |store| store.load(&name)).await {
        Ok(params) => json_response(StatusCode::OK, ScenarioPayload::from(&params)),
        Err(e) => store_error_response(&e),
    }
}

/// The path segment is the scenario name, verbatim. A `name` in the body is
/// ignored.
async fn save_scenario_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<ScenarioPayload>,
) -> Response {
    let mut params = match build_parameters(payload) {
        Ok(params) => params,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    params.name = name;
    let warnings = params.warnings();
    match with_store(&state, move |store| store.save(&params).map(|_| params.name)).await {
        Ok(saved) => json_response(StatusCode::OK, SavedResponse { warnings, saved }),
        Err(e) => store_error_response(&e),
    }
}

async fn delete_scenario_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let target = name.clone();
    match with_store(&state, move |store| store.delete(&target)).await {
        Ok(true) => json_response(StatusCode::OK, DeletedResponse { deleted: true }),
        Ok(false) => store_error_response(&StoreError::NotFound(name)),
        Err(e) => store_error_response(&e),
    }
}

async fn export_bundle_handler(State(state): State<AppState>) -> Response {
    match with_store(&state, ScenarioStore::export_bundle).await {
        Ok(Some(bytes)) => download_response("application/json", "scenarios.json", bytes),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No saved scenarios to export"),
        Err(e) => store_error_response(&e),
    }
}

async fn import_bundle_handler(State(state): State<AppState>, body: Bytes) -> Response {
    match with_store(&state, move |store| store.import_bundle(&body)).await {
        Ok(imported) => json_response(StatusCode::OK, ImportedResponse { imported }),
        Err(e) => store_error_response(&e),
    }
}

async fn projection_csv_get_handler(Query(payload): Query<ScenarioPayload>) -> Response {
    projection_csv_impl(payload, false)
}

async fn projection_csv_post_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    projection_csv_impl(payload, false)
}

async fn projection_monthly_csv_get_handler(Query(payload): Query<ScenarioPayload>) -> Response {
    projection_csv_impl(payload, true)
}

async fn projection_monthly_csv_post_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    projection_csv_impl(payload, true)
}

fn projection_csv_impl(payload: ScenarioPayload, monthly: bool) -> Response {
    let params = match build_parameters(payload) {
        Ok(params) => params,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let result = match project(&params) {
        Ok(result) => result,
        Err(e) => return projection_error_response(&e),
    };
    let (rendered, filename) = if monthly {
        (projection_monthly_csv(&result), "projection-monthly.csv")
    } else {
        (projection_csv(&result), "projection.csv")
    };
    csv_response(rendered.map_err(|e| e.to_string()), filename)
}

async fn monte_carlo_csv_handler(Json(payload): Json<MonteCarloPayload>) -> Response {
    let MonteCarloRequest { params, config, .. } = match monte_carlo_request_from_payload(payload)
    {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let computed = tokio::task::spawn_blocking(move || run_monte_carlo(&params, &config)).await;
    match computed {
        Ok(Ok(result)) => csv_response(
            monte_carlo_csv(&result).map_err(|e| e.to_string()),
            "monte-carlo.csv",
        ),
        Ok(Err(e)) => projection_error_response(&e),
        Err(e) => {
            warn!(error = %e, "monte carlo export task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn csv_response(rendered: Result<String, String>, filename: &str) -> Response {
    match rendered {
        Ok(csv) => download_response("text/csv; charset=utf-8", filename, csv.into_bytes()),
        Err(msg) => {
            warn!(error = %msg, filename, "CSV export failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg)
        }
    }
}

fn download_response(content_type: &'static str, filename: &str, body: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{filename}\"");
    let mut response = with_cache_control(([(header::CONTENT_TYPE, content_type)], body));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn projection_error_response(err: &ProjectionError) -> Response {
    error_response(StatusCode::BAD_REQUEST, &join_messages(err))
}

fn store_error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidName(_) | StoreError::InvalidBundle(_) | StoreError::Corrupt { .. } => {
            StatusCode::BAD_REQUEST
        }
        StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_error_response(err: &StoreError) -> Response {
    let status = store_error_status(err);
    if status.is_server_error() {
        warn!(error = %err, "scenario store failure");
    }
    error_response(status, &err.to_string())
}

fn join_messages(err: &ProjectionError) -> String {
    err.messages().join(" ")
}

fn to_pct(rate: f64) -> f64 {
    // 0.07 * 100.0 is 7.000000000000001
    (rate * 100.0 * 1e9).round() / 1e9
}

fn default_parameters() -> ScenarioParameters {
    ScenarioParameters {
        name: DEFAULT_SCENARIO_NAME.to_string(),
        birthdate: NaiveDate::from_ymd_opt(1965, 2, 25).unwrap_or_default(),
        service_start_date: NaiveDate::from_ymd_opt(1987, 6, 22).unwrap_or_default(),
        retire_date: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap_or_default(),
        projection_start_year: Local::now().year(),
        high3_salary: 179_000.0,
        current_salary: None,
        tsp_balance: 1_800_000.0,
        biweekly_tsp_contribution: 0.0,
        agency_matching: true,
        sick_leave_hours: 1_866.0,
        ss_start_age: 67,
        ss_base_benefit: None,
        survivor_option: SurvivorOption::Partial,
        filing_status: FilingStatus::Single,
        state_tax_exempt: true,
        cola_rate: 0.02,
        tsp_growth_rate: 0.05,
        tsp_withdrawal_rate: 0.04,
        withdrawal_strategy: WithdrawalStrategy::GreaterOfBoth,
        fehb_monthly_premium: 350.0,
        fehb_growth_rate: 0.05,
        include_medicare: true,
        fund_allocation: None,
        years_in_retirement: 25,
        notes: String::new(),
    }
}

fn build_parameters(payload: ScenarioPayload) -> Result<ScenarioParameters, String> {
    let mut params = default_parameters();

    if let Some(v) = payload.name {
        let trimmed = v.trim();
        if !trimmed.is_empty() {
            params.name = trimmed.to_string();
        }
    }
    if let Some(v) = payload.birthdate {
        params.birthdate = v;
    }
    if let Some(v) = payload.service_start_date {
        params.service_start_date = v;
    }
    if let Some(v) = payload.retire_date {
        params.retire_date = v;
    }
    if let Some(v) = payload.projection_start_year {
        params.projection_start_year = v;
    }
    if let Some(v) = payload.high3_salary {
        params.high3_salary = v;
    }
    params.current_salary = payload.current_salary.filter(|v| *v > 0.0);
    if let Some(v) = payload.tsp_balance {
        params.tsp_balance = v;
    }
    if let Some(v) = payload.biweekly_tsp_contribution {
        params.biweekly_tsp_contribution = v;
    }
    if let Some(v) = payload.agency_matching {
        params.agency_matching = v;
    }
    if let Some(v) = payload.sick_leave_hours {
        params.sick_leave_hours = v;
    }
    if let Some(v) = payload.ss_start_age {
        params.ss_start_age = v;
    }
    params.ss_base_benefit = payload.ss_base_benefit.filter(|v| *v > 0.0);
    if let Some(v) = payload.survivor_option {
        params.survivor_option = v;
    }
    if let Some(v) = payload.filing_status {
        params.filing_status = v;
    }
    if let Some(v) = payload.state_tax_exempt {
        params.state_tax_exempt = v;
    }
    if let Some(v) = payload.cola_rate {
        params.cola_rate = v / 100.0;
    }
    if let Some(v) = payload.tsp_growth_rate {
        params.tsp_growth_rate = v / 100.0;
    }
    if let Some(v) = payload.tsp_withdrawal_rate {
        params.tsp_withdrawal_rate = v / 100.0;
    }
    if let Some(v) = payload.withdrawal_strategy {
        params.withdrawal_strategy = v;
    }
    if let Some(v) = payload.fehb_monthly_premium {
        params.fehb_monthly_premium = v;
    }
    if let Some(v) = payload.fehb_growth_rate {
        params.fehb_growth_rate = v / 100.0;
    }
    if let Some(v) = payload.include_medicare {
        params.include_medicare = v;
    }
    let funds = [
        payload.g_fund_pct,
        payload.f_fund_pct,
        payload.c_fund_pct,
        payload.s_fund_pct,
        payload.i_fund_pct,
    ];
    if funds.iter().any(Option::is_some) {
        let [g, f, c, s, i] = funds.map(|v| v.unwrap_or(0.0));
        params.fund_allocation = Some(FundAllocation {
            g_fund_pct: g,
            f_fund_pct: f,
            c_fund_pct: c,
            s_fund_pct: s,
            i_fund_pct: i,
        });
    }
    if let Some(v) = payload.years_in_retirement {
        params.years_in_retirement = v;
    }
    if let Some(v) = payload.notes {
        params.notes = v;
    }

    validate(&params).map_err(|e| join_messages(&e))?;
    Ok(params)
}

fn monte_carlo_request_from_payload(payload: MonteCarloPayload) -> Result<MonteCarloRequest, String> {
    let params = build_parameters(payload.scenario)?;
    let mut config = MonteCarloConfig::centered_on(
        &params,
        payload.simulations.unwrap_or(DEFAULT_SIMULATIONS),
        payload.seed.unwrap_or(DEFAULT_SEED),
        payload.cola_std.unwrap_or(DEFAULT_COLA_STD_PCT) / 100.0,
        payload.tsp_growth_std.unwrap_or(DEFAULT_TSP_GROWTH_STD_PCT) / 100.0,
    );
    if let Some(v) = payload.cola_mean {
        config.cola_mean = v / 100.0;
    }
    if let Some(v) = payload.tsp_growth_mean {
        config.tsp_growth_mean = v / 100.0;
    }

    if config.simulations == 0 {
        return Err("simulations must be >= 1".to_string());
    }
    if !(config.cola_std.is_finite() && config.cola_std >= 0.0) {
        return Err("colaStd must be >= 0".to_string());
    }
    if !(config.tsp_growth_std.is_finite() && config.tsp_growth_std >= 0.0) {
        return Err("tspGrowthStd must be >= 0".to_string());
    }

    let include_trials = payload.include_trials.unwrap_or(false);
    config.keep_trial_years = include_trials;

    Ok(MonteCarloRequest {
        params,
        config,
        include_trials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn payload_from_json(json: &str) -> ScenarioPayload {
        serde_json::from_str(json).expect("valid payload JSON")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("JSON body")
    }

    fn test_state(dir: &std::path::Path) -> AppState {
        AppState {
            store: Arc::new(ScenarioStore::new(dir)),
        }
    }

    #[test]
    fn defaults_build_a_valid_scenario() {
        let params = build_parameters(ScenarioPayload::default()).expect("defaults valid");
        assert_eq!(params.name, DEFAULT_SCENARIO_NAME);
        assert!(project(&params).is_ok());
    }

    #[test]
    fn payload_rates_are_percentages() {
        let params = build_parameters(payload_from_json(
            r#"{"colaRate": 3, "tspGrowthRate": 6.5, "tspWithdrawalRate": 4, "fehbGrowthRate": 0}"#,
        ))
        .expect("valid");
        assert_approx(params.cola_rate, 0.03);
        assert_approx(params.tsp_growth_rate, 0.065);
        assert_approx(params.tsp_withdrawal_rate, 0.04);
        assert_approx(params.fehb_growth_rate, 0.0);
    }

    #[test]
    fn payload_parses_web_keys() {
        let params = build_parameters(payload_from_json(
            r#"{
                "name": "  Spouse  ",
                "birthdate": "1970-05-01",
                "serviceStartDate": "1995-01-09",
                "retireDate": "2030-05-31",
                "survivorOption": "full",
                "filingStatus": "married",
                "withdrawalStrategy": "irs-rmd",
                "stateTaxExempt": false,
                "ssBaseBenefit": 2800,
                "currentSalary": 0
            }"#,
        ))
        .expect("valid");
        assert_eq!(params.name, "Spouse");
        assert_eq!(params.birthdate, NaiveDate::from_ymd_opt(1970, 5, 1).unwrap());
        assert_eq!(params.survivor_option, SurvivorOption::Full);
        assert_eq!(params.filing_status, FilingStatus::Married);
        assert_eq!(params.withdrawal_strategy, WithdrawalStrategy::IrsRmd);
        assert!(!params.state_tax_exempt);
        assert_eq!(params.ss_base_benefit, Some(2_800.0));
        assert_eq!(params.current_salary, None);
    }

    #[test]
    fn any_fund_field_enables_allocation() {
        let params = build_parameters(payload_from_json(
            r#"{"gFundPct": 40, "cFundPct": 60}"#,
        ))
        .expect("valid");
        let allocation = params.fund_allocation.expect("allocation");
        assert_approx(allocation.g_fund_pct, 40.0);
        assert_approx(allocation.f_fund_pct, 0.0);
        assert_approx(allocation.c_fund_pct, 60.0);
    }

    #[test]
    fn build_parameters_rejects_out_of_range_values() {
        let err = build_parameters(payload_from_json(
            r#"{"ssStartAge": 75, "tspBalance": -1}"#,
        ))
        .expect_err("invalid");
        assert!(err.contains("Social Security"), "{err}");
        assert!(err.contains("TSP balance"), "{err}");
    }

    #[test]
    fn scenario_payload_round_trips_parameters() {
        let mut original = build_parameters(payload_from_json(
            r#"{"name": "rt", "gFundPct": 50, "iFundPct": 50, "ssBaseBenefit": 3000}"#,
        ))
        .expect("valid");
        original.notes = "kept".to_string();
        let rebuilt = build_parameters(ScenarioPayload::from(&original)).expect("valid");
        assert_eq!(rebuilt.name, original.name);
        assert_eq!(rebuilt.fund_allocation, original.fund_allocation);
        assert_eq!(rebuilt.ss_base_benefit, original.ss_base_benefit);
        assert_eq!(rebuilt.notes, "kept");
        assert_approx(rebuilt.cola_rate, original.cola_rate);
        assert_approx(rebuilt.fehb_growth_rate, original.fehb_growth_rate);
    }

    #[test]
    fn monte_carlo_payload_reads_flattened_scenario() {
        let payload: MonteCarloPayload = serde_json::from_str(
            r#"{"name": "mc", "colaRate": 2.5, "simulations": 12, "seed": 7, "tspGrowthStd": 15}"#,
        )
        .expect("valid JSON");
        let request = monte_carlo_request_from_payload(payload).expect("valid");
        assert_eq!(request.params.name, "mc");
        assert_eq!(request.config.simulations, 12);
        assert_eq!(request.config.seed, 7);
        assert_approx(request.config.cola_mean, 0.025);
        assert_approx(request.config.cola_std, DEFAULT_COLA_STD_PCT / 100.0);
        assert_approx(request.config.tsp_growth_std, 0.15);
        assert!(!request.include_trials);
        assert!(!request.config.keep_trial_years);
    }

    #[test]
    fn monte_carlo_payload_rejects_zero_simulations() {
        let payload: MonteCarloPayload =
            serde_json::from_str(r#"{"simulations": 0}"#).expect("valid JSON");
        assert!(monte_carlo_request_from_payload(payload).is_err());
    }

    #[test]
    fn project_response_serialization_contains_expected_fields() {
        let params = build_parameters(ScenarioPayload::default()).expect("valid");
        let result = project(&params).expect("valid");
        let response = build_project_response(&params, result);
        let value = serde_json::to_value(&response).expect("serializable");
        for key in [
            "scenario",
            "warnings",
            "cumulativeIncome",
            "serviceYears",
            "annuityMultiplier",
            "grossAnnualAnnuity",
            "years",
            "months",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let first_year = &value["years"][0];
        assert!(first_year.get("calendarYear").is_some());
        assert!(first_year.get("tspBalance").is_some());
    }

    #[test]
    fn compare_reports_household_and_cash_flow() {
        let payload: ComparePayload = serde_json::from_str(
            r#"{
                "a": {"name": "A", "ssStartAge": 62, "yearsInRetirement": 35},
                "b": {"name": "B", "ssStartAge": 70, "yearsInRetirement": 35},
                "expenses": {"preRetirement": 90000, "postRetirement": 80000, "inflationRate": 2}
            }"#,
        )
        .expect("valid JSON");
        let response = build_compare_response(payload).expect("valid");
        assert_eq!(response.a.name, "A");
        assert_eq!(response.household.len(), response.a.years.len());
        let flow = response.a.cash_flow.as_ref().expect("expenses given");
        assert_eq!(flow.len(), response.a.years.len());
        let breakeven = response.breakeven.expect("delayed benefit catches up");
        assert!(breakeven.calendar_year > 2035);
    }

    #[test]
    fn store_errors_map_to_http_status() {
        assert_eq!(
            store_error_status(&StoreError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            store_error_status(&StoreError::InvalidName("..".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            store_error_status(&StoreError::Io(std::io::Error::other("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn project_handler_returns_bad_request_with_message() {
        let response = project_handler_impl(payload_from_json(r#"{"yearsInRetirement": 0}"#));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("retirement"));
    }

    #[tokio::test]
    async fn scenario_handlers_save_load_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let saved = save_scenario_handler(
            State(state.clone()),
            Path("Plan A".to_string()),
            Json(payload_from_json(r#"{"colaRate": 3}"#)),
        )
        .await;
        assert_eq!(saved.status(), StatusCode::OK);

        let listed = body_json(list_scenarios_handler(State(state.clone())).await).await;
        assert_eq!(listed["scenarios"], serde_json::json!(["Plan A"]));

        let loaded =
            load_scenario_handler(State(state.clone()), Path("Plan A".to_string())).await;
        assert_eq!(loaded.status(), StatusCode::OK);
        let loaded = body_json(loaded).await;
        assert_eq!(loaded["name"], "Plan A");
        assert_approx(loaded["colaRate"].as_f64().unwrap(), 3.0);

        let deleted =
            delete_scenario_handler(State(state.clone()), Path("Plan A".to_string())).await;
        assert_eq!(deleted.status(), StatusCode::OK);
        let missing = load_scenario_handler(State(state), Path("Plan A".to_string())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn save_handler_stores_under_the_path_name_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let blank = save_scenario_handler(
            State(state.clone()),
            Path("   ".to_string()),
            Json(ScenarioPayload::default()),
        )
        .await;
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
        let listed = body_json(list_scenarios_handler(State(state.clone())).await).await;
        assert_eq!(listed["scenarios"], serde_json::json!([]));

        let padded = save_scenario_handler(
            State(state.clone()),
            Path(" Plan ".to_string()),
            Json(payload_from_json(r#"{"name": "Other"}"#)),
        )
        .await;
        assert_eq!(padded.status(), StatusCode::OK);
        assert_eq!(body_json(padded).await["saved"], " Plan ");

        let loaded = load_scenario_handler(State(state.clone()), Path(" Plan ".to_string())).await;
        assert_eq!(loaded.status(), StatusCode::OK);
        assert_eq!(body_json(loaded).await["name"], " Plan ");
        let listed = body_json(list_scenarios_handler(State(state)).await).await;
        assert_eq!(listed["scenarios"], serde_json::json!([" Plan "]));
    }

    #[tokio::test]
    async fn monte_carlo_handler_returns_bands_and_summary() {
        let payload: MonteCarloPayload =
            serde_json::from_str(r#"{"simulations": 20, "includeTrials": true}"#)
                .expect("valid JSON");
        let response = monte_carlo_handler(Json(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["simulations"], 20);
        assert_eq!(body["trials"].as_array().unwrap().len(), 20);
        assert!(!body["trials"][0]["years"].as_array().unwrap().is_empty());
        assert!(body["incomeBands"].as_array().unwrap().len() > 1);
        assert!(body["summary"].as_array().is_some());
        assert!(body["risk"].get("startingIncome").is_some());
    }

    #[tokio::test]
    async fn projection_csv_is_served_as_download() {
        let response = projection_csv_impl(ScenarioPayload::default(), false);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"projection.csv\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.starts_with(b"Year,Year Index,"));
    }
}
