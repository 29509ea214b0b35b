use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurvivorOption {
    None,
    Partial,
    Full,
}

impl SurvivorOption {
    pub fn annuity_reduction(self) -> f64 {
        match self {
            SurvivorOption::None => 0.0,
            SurvivorOption::Partial => 0.05,
            SurvivorOption::Full => 0.10,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    Married,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalStrategy {
    FixedPercentage,
    IrsRmd,
    GreaterOfBoth,
}

/// TSP fund mix in percent. Each field is the share held in that fund.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundAllocation {
    pub g_fund_pct: f64,
    pub f_fund_pct: f64,
    pub c_fund_pct: f64,
    pub s_fund_pct: f64,
    pub i_fund_pct: f64,
}

impl FundAllocation {
    pub fn total_pct(&self) -> f64 {
        self.g_fund_pct + self.f_fund_pct + self.c_fund_pct + self.s_fund_pct + self.i_fund_pct
    }
}

/// Rates are fractions (0.02 is 2%). Money is in nominal dollars, and
/// `fehb_monthly_premium` and `ss_base_benefit` are monthly amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioParameters {
    pub name: String,
    pub birthdate: NaiveDate,
    pub service_start_date: NaiveDate,
    pub retire_date: NaiveDate,
    pub projection_start_year: i32,
    pub high3_salary: f64,
    #[serde(default)]
    pub current_salary: Option<f64>,
    pub tsp_balance: f64,
    #[serde(default)]
    pub biweekly_tsp_contribution: f64,
    #[serde(default = "default_true")]
    pub agency_matching: bool,
    #[serde(default)]
    pub sick_leave_hours: f64,
    pub ss_start_age: u32,
    #[serde(default)]
    pub ss_base_benefit: Option<f64>,
    pub survivor_option: SurvivorOption,
    pub filing_status: FilingStatus,
    pub state_tax_exempt: bool,
    pub cola_rate: f64,
    pub tsp_growth_rate: f64,
    pub tsp_withdrawal_rate: f64,
    pub withdrawal_strategy: WithdrawalStrategy,
    pub fehb_monthly_premium: f64,
    pub fehb_growth_rate: f64,
    #[serde(default = "default_true")]
    pub include_medicare: bool,
    #[serde(default)]
    pub fund_allocation: Option<FundAllocation>,
    pub years_in_retirement: u32,
    #[serde(default)]
    pub notes: String,
}

fn default_true() -> bool {
    true
}

impl ScenarioParameters {
    pub fn salary(&self) -> f64 {
        self.current_salary.unwrap_or(self.high3_salary)
    }

    pub fn first_projection_year(&self) -> i32 {
        self.projection_start_year.min(self.retire_date.year())
    }

    pub fn projection_end_date(&self) -> Option<NaiveDate> {
        self.retire_date
            .checked_add_months(Months::new(self.years_in_retirement.saturating_mul(12)))
    }

    pub fn final_projection_year(&self) -> i32 {
        self.projection_end_date()
            .map(|d| d.year())
            .unwrap_or(self.retire_date.year())
    }

    /// Number of calendar years covered by a projection of these parameters.
    pub fn horizon_years(&self) -> usize {
        (self.final_projection_year() - self.first_projection_year() + 1).max(0) as usize
    }

    /// Non-fatal oddities worth showing next to the results.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.sick_leave_hours > 5_000.0 {
            warnings.push("Unusually high sick leave hours; please verify input.".to_string());
        }
        if self.tsp_withdrawal_rate > 0.10 {
            warnings.push(
                "TSP withdrawal rate above 10% may exhaust the balance quickly.".to_string(),
            );
        }
        warnings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthRecord {
    pub date: NaiveDate,
    pub salary: f64,
    pub fers_annuity: f64,
    pub fers_supplement: f64,
    pub tsp_withdrawal: f64,
    pub social_security: f64,
    pub fehb: f64,
    pub medicare: f64,
    pub total_income: f64,
    pub tsp_balance: f64,
    pub rmd_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub year_index: u32,
    pub calendar_year: i32,
    pub age: u32,
    pub salary: f64,
    pub pension_income: f64,
    pub fers_supplement: f64,
    pub tsp_withdrawal: f64,
    pub social_security: f64,
    pub health_premiums: f64,
    pub total_income: f64,
    pub tsp_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub service_years: f64,
    pub annuity_multiplier: f64,
    pub gross_annual_annuity: f64,
    pub tsp_growth_rate: f64,
    pub cola_rate: f64,
    pub years: Vec<YearRecord>,
    pub months: Vec<MonthRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonteCarloConfig {
    pub simulations: u32,
    pub seed: u64,
    pub cola_mean: f64,
    pub cola_std: f64,
    pub tsp_growth_mean: f64,
    pub tsp_growth_std: f64,
    /// Keep every trial's yearly records. Bands are computed either way.
    pub keep_trial_years: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    pub trial: u32,
    pub cola_rate: f64,
    pub tsp_growth_rate: f64,
    /// Empty unless the run was configured with `keep_trial_years`.
    pub years: Vec<YearRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBand {
    pub year_index: u32,
    pub calendar_year: i32,
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub simulations: u32,
    pub trials: Vec<TrialResult>,
    pub income_bands: Vec<PercentileBand>,
    pub balance_bands: Vec<PercentileBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryPoint {
    pub label: String,
    pub calendar_year: i32,
    pub median_income: f64,
    pub p10_income: f64,
    pub p90_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub starting_income: f64,
    pub probability_below_start_pct: f64,
    pub max_drop_p5_pct: f64,
    pub median_income_volatility: f64,
    pub significant_drop_risk_pct: f64,
}
