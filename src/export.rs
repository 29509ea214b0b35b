//! CSV renderings of projection and Monte Carlo results.

use std::string::FromUtf8Error;

use chrono::NaiveDate;
use serde::Serialize;

use crate::core::{MonteCarloResult, PercentileBand, ProjectionResult};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output was not UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

#[derive(Serialize)]
struct YearRow {
    #[serde(rename = "Year")]
    calendar_year: i32,
    #[serde(rename = "Year Index")]
    year_index: u32,
    #[serde(rename = "Age")]
    age: u32,
    #[serde(rename = "Salary")]
    salary: f64,
    #[serde(rename = "FERS Annuity")]
    pension_income: f64,
    #[serde(rename = "FERS Supplement")]
    fers_supplement: f64,
    #[serde(rename = "TSP Withdrawal")]
    tsp_withdrawal: f64,
    #[serde(rename = "Social Security")]
    social_security: f64,
    #[serde(rename = "Health Premiums")]
    health_premiums: f64,
    #[serde(rename = "Total Income")]
    total_income: f64,
    #[serde(rename = "TSP Balance")]
    tsp_balance: f64,
}

#[derive(Serialize)]
struct MonthRow {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Salary")]
    salary: f64,
    #[serde(rename = "FERS Annuity")]
    fers_annuity: f64,
    #[serde(rename = "FERS Supplement")]
    fers_supplement: f64,
    #[serde(rename = "TSP Withdrawal")]
    tsp_withdrawal: f64,
    #[serde(rename = "Social Security")]
    social_security: f64,
    #[serde(rename = "FEHB")]
    fehb: f64,
    #[serde(rename = "Medicare")]
    medicare: f64,
    #[serde(rename = "Total Income")]
    total_income: f64,
    #[serde(rename = "TSP Balance")]
    tsp_balance: f64,
    #[serde(rename = "RMD Amount")]
    rmd_amount: f64,
}

#[derive(Serialize)]
struct BandRow {
    #[serde(rename = "Year")]
    calendar_year: i32,
    #[serde(rename = "Year Index")]
    year_index: u32,
    #[serde(rename = "Income P5")]
    income_p5: f64,
    #[serde(rename = "Income P10")]
    income_p10: f64,
    #[serde(rename = "Income P25")]
    income_p25: f64,
    #[serde(rename = "Income P50")]
    income_p50: f64,
    #[serde(rename = "Income P75")]
    income_p75: f64,
    #[serde(rename = "Income P90")]
    income_p90: f64,
    #[serde(rename = "Income P95")]
    income_p95: f64,
    #[serde(rename = "Balance P5")]
    balance_p5: f64,
    #[serde(rename = "Balance P10")]
    balance_p10: f64,
    #[serde(rename = "Balance P25")]
    balance_p25: f64,
    #[serde(rename = "Balance P50")]
    balance_p50: f64,
    #[serde(rename = "Balance P75")]
    balance_p75: f64,
    #[serde(rename = "Balance P90")]
    balance_p90: f64,
    #[serde(rename = "Balance P95")]
    balance_p95: f64,
}

impl BandRow {
    fn new(income: &PercentileBand, balance: &PercentileBand) -> Self {
        Self {
            calendar_year: income.calendar_year,
            year_index: income.year_index,
            income_p5: cents(income.p5),
            income_p10: cents(income.p10),
            income_p25: cents(income.p25),
            income_p50: cents(income.p50),
            income_p75: cents(income.p75),
            income_p90: cents(income.p90),
            income_p95: cents(income.p95),
            balance_p5: cents(balance.p5),
            balance_p10: cents(balance.p10),
            balance_p25: cents(balance.p25),
            balance_p50: cents(balance.p50),
            balance_p75: cents(balance.p75),
            balance_p90: cents(balance.p90),
            balance_p95: cents(balance.p95),
        }
    }
}

fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn write_rows<R: Serialize>(rows: impl IntoIterator<Item = R>) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn projection_csv(result: &ProjectionResult) -> Result<String, ExportError> {
    write_rows(result.years.iter().map(|y| YearRow {
        calendar_year: y.calendar_year,
        year_index: y.year_index,
        age: y.age,
        salary: cents(y.salary),
        pension_income: cents(y.pension_income),
        fers_supplement: cents(y.fers_supplement),
        tsp_withdrawal: cents(y.tsp_withdrawal),
        social_security: cents(y.social_security),
        health_premiums: cents(y.health_premiums),
        total_income: cents(y.total_income),
        tsp_balance: cents(y.tsp_balance),
    }))
}

pub fn projection_monthly_csv(result: &ProjectionResult) -> Result<String, ExportError> {
    write_rows(result.months.iter().map(|m| MonthRow {
        date: m.date,
        salary: cents(m.salary),
        fers_annuity: cents(m.fers_annuity),
        fers_supplement: cents(m.fers_supplement),
        tsp_withdrawal: cents(m.tsp_withdrawal),
        social_security: cents(m.social_security),
        fehb: cents(m.fehb),
        medicare: cents(m.medicare),
        total_income: cents(m.total_income),
        tsp_balance: cents(m.tsp_balance),
        rmd_amount: cents(m.rmd_amount),
    }))
}

pub fn monte_carlo_csv(result: &MonteCarloResult) -> Result<String, ExportError> {
    write_rows(
        result
            .income_bands
            .iter()
            .zip(&result.balance_bands)
            .map(|(income, balance)| BandRow::new(income, balance)),
    )
}
