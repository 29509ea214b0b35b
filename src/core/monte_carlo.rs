use std::f64::consts::PI;

use chrono::Datelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::engine::{Rates, effective_tsp_growth, simulate, validate};
use super::error::ProjectionError;
use super::rules::date_at_age;
use super::types::{
    MonteCarloConfig, MonteCarloResult, PercentileBand, RiskMetrics, ScenarioParameters,
    SummaryPoint, TrialResult, YearRecord,
};

const MAX_SIMULATIONS: u32 = 100_000;
const MIN_SAMPLED_GROWTH: f64 = -0.95;
const MAX_SAMPLED_GROWTH: f64 = 2.5;

impl MonteCarloConfig {
    /// Noise centred on the scenario's own COLA and TSP growth assumptions.
    pub fn centered_on(
        params: &ScenarioParameters,
        simulations: u32,
        seed: u64,
        cola_std: f64,
        tsp_growth_std: f64,
    ) -> Self {
        Self {
            simulations,
            seed,
            cola_mean: params.cola_rate,
            cola_std,
            tsp_growth_mean: effective_tsp_growth(params),
            tsp_growth_std,
            keep_trial_years: false,
        }
    }
}

pub fn run_monte_carlo(
    params: &ScenarioParameters,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, ProjectionError> {
    validate_config(config)?;
    validate(params)?;

    let capacity = config.simulations as usize;
    let mut trials = Vec::with_capacity(capacity);
    let mut samples = Vec::new();
    for trial in 0..config.simulations {
        let mut rng = TrialRng::new(derive_seed(config.seed, trial));
        let rates = sample_rates(config, &mut rng);
        let projection = simulate(params, rates);
        record_samples(&mut samples, &projection.years, capacity);
        trials.push(TrialResult {
            trial,
            cola_rate: rates.cola,
            tsp_growth_rate: rates.tsp_growth,
            years: if config.keep_trial_years {
                projection.years
            } else {
                Vec::new()
            },
        });
    }

    let mut income_bands = Vec::with_capacity(samples.len());
    let mut balance_bands = Vec::with_capacity(samples.len());
    for year in &mut samples {
        let (year_index, calendar_year) = (year.year_index, year.calendar_year);
        income_bands.push(percentile_band(year_index, calendar_year, &mut year.income));
        balance_bands.push(percentile_band(year_index, calendar_year, &mut year.balance));
    }
    debug!(
        simulations = config.simulations,
        years = income_bands.len(),
        "monte carlo projection complete"
    );

    Ok(MonteCarloResult {
        simulations: config.simulations,
        trials,
        income_bands,
        balance_bands,
    })
}

/// Per-year income and balance samples, one entry per trial.
struct YearSamples {
    year_index: u32,
    calendar_year: i32,
    income: Vec<f64>,
    balance: Vec<f64>,
}

fn record_samples(samples: &mut Vec<YearSamples>, years: &[YearRecord], capacity: usize) {
    for (idx, year) in years.iter().enumerate() {
        if idx == samples.len() {
            samples.push(YearSamples {
                year_index: year.year_index,
                calendar_year: year.calendar_year,
                income: Vec::with_capacity(capacity),
                balance: Vec::with_capacity(capacity),
            });
        }
        samples[idx].income.push(year.total_income);
        samples[idx].balance.push(year.tsp_balance);
    }
}

fn validate_config(config: &MonteCarloConfig) -> Result<(), ProjectionError> {
    let mut errors = Vec::new();
    if config.simulations == 0 {
        errors.push("Number of simulations must be at least 1.".to_string());
    }
    if config.simulations > MAX_SIMULATIONS {
        errors.push(format!(
            "Number of simulations cannot exceed {MAX_SIMULATIONS}."
        ));
    }
    for (label, value) in [
        ("COLA mean", config.cola_mean),
        ("TSP growth mean", config.tsp_growth_mean),
    ] {
        if !value.is_finite() {
            errors.push(format!("{label} must be a finite number."));
        }
    }
    for (label, value) in [
        ("COLA standard deviation", config.cola_std),
        ("TSP growth standard deviation", config.tsp_growth_std),
    ] {
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("{label} must be >= 0."));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProjectionError::InvalidInput(errors))
    }
}

fn sample_rates(config: &MonteCarloConfig, rng: &mut TrialRng) -> Rates {
    let cola = rng.normal(config.cola_mean, config.cola_std).max(0.0);
    let tsp_growth = rng
        .normal(config.tsp_growth_mean, config.tsp_growth_std)
        .clamp(MIN_SAMPLED_GROWTH, MAX_SAMPLED_GROWTH);
    Rates { cola, tsp_growth }
}

fn percentile_band(year_index: u32, calendar_year: i32, samples: &mut [f64]) -> PercentileBand {
    PercentileBand {
        year_index,
        calendar_year,
        p5: percentile(samples, 5.0),
        p10: percentile(samples, 10.0),
        p25: percentile(samples, 25.0),
        p50: percentile(samples, 50.0),
        p75: percentile(samples, 75.0),
        p90: percentile(samples, 90.0),
        p95: percentile(samples, 95.0),
    }
}

/// Income bands at retirement, ten years on, the final year and the Social
/// Security start year when it falls inside the projection.
pub fn summarize(result: &MonteCarloResult, params: &ScenarioParameters) -> Vec<SummaryPoint> {
    let bands = &result.income_bands;
    let Some(last) = bands.last() else {
        return Vec::new();
    };
    let retire_year = params.retire_date.year();
    let ss_year = date_at_age(params.birthdate, params.ss_start_age).year();

    let mut points = Vec::with_capacity(4);
    if let Some(band) = band_for_year(bands, retire_year) {
        points.push(summary_point("At Retirement", band));
    }
    let ten_years = band_for_year(bands, retire_year + 10).unwrap_or(last);
    points.push(summary_point("10 Years After Retirement", ten_years));
    points.push(summary_point("End of Projection", last));
    if let Some(band) = band_for_year(bands, ss_year) {
        points.push(summary_point("At Social Security Start", band));
    }
    points
}

fn band_for_year(bands: &[PercentileBand], calendar_year: i32) -> Option<&PercentileBand> {
    bands.iter().find(|band| band.calendar_year == calendar_year)
}

fn summary_point(label: &str, band: &PercentileBand) -> SummaryPoint {
    SummaryPoint {
        label: label.to_string(),
        calendar_year: band.calendar_year,
        median_income: band.p50,
        p10_income: band.p10,
        p90_income: band.p90,
    }
}

/// Risk of income shortfall measured over full calendar years of retirement,
/// against the median income of the first such year.
pub fn risk_metrics(result: &MonteCarloResult, params: &ScenarioParameters) -> RiskMetrics {
    let retire_year = params.retire_date.year();
    let final_year = params.final_projection_year();
    let final_year_is_full = params
        .projection_end_date()
        .is_some_and(|end| end.month() == 12);

    let window = result
        .income_bands
        .iter()
        .filter(|band| band.calendar_year > retire_year)
        .filter(|band| band.calendar_year < final_year || final_year_is_full)
        .collect::<Vec<_>>();

    let Some(first) = window.first() else {
        return RiskMetrics {
            starting_income: 0.0,
            probability_below_start_pct: 0.0,
            max_drop_p5_pct: 0.0,
            median_income_volatility: 0.0,
            significant_drop_risk_pct: 0.0,
        };
    };

    let starting_income = first.p50;
    let n = window.len() as f64;
    let below_start = window.iter().filter(|b| b.p50 < starting_income).count() as f64;
    let significant_drop = window
        .iter()
        .filter(|b| b.p25 < starting_income * 0.8)
        .count() as f64;
    let min_p5 = window
        .iter()
        .map(|b| b.p5)
        .fold(f64::INFINITY, f64::min);
    let max_drop_p5_pct = if starting_income > 0.0 {
        (starting_income - min_p5) / starting_income * 100.0
    } else {
        0.0
    };

    RiskMetrics {
        starting_income,
        probability_below_start_pct: below_start / n * 100.0,
        max_drop_p5_pct,
        median_income_volatility: sample_std_dev(window.iter().map(|b| b.p50)),
        significant_drop_risk_pct: significant_drop / n * 100.0,
    }
}

fn sample_std_dev(values: impl Iterator<Item = f64>) -> f64 {
    let values = values.collect::<Vec<_>>();
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    splitmix64(base_seed ^ ((trial as u64) << 32) ^ trial as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct TrialRng {
    inner: StdRng,
    cached_normal: Option<f64>,
}

impl TrialRng {
    fn new(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
            cached_normal: None,
        }
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.inner.random::<f64>().max(1e-12);
        let u2 = self.inner.random::<f64>();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }

    fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        mean + std_dev * self.standard_normal()
    }
}

pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
