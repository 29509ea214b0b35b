mod analysis;
mod engine;
mod error;
mod monte_carlo;
pub mod rules;
mod types;

pub use analysis::{
    Breakeven, CashFlowYear, HouseholdYear, cash_flow, combine_household, cumulative_income,
    find_breakeven, project_expenses,
};
pub use engine::{effective_tsp_growth, project, validate};
pub use error::ProjectionError;
pub use monte_carlo::{percentile, risk_metrics, run_monte_carlo, summarize};
pub use types::{
    FilingStatus, FundAllocation, MonteCarloConfig, MonteCarloResult, MonthRecord,
    PercentileBand, ProjectionResult, RiskMetrics, ScenarioParameters, SummaryPoint,
    SurvivorOption, TrialResult, WithdrawalStrategy, YearRecord,
};
