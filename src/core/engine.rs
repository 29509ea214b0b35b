use chrono::{Datelike, Months, NaiveDate};

use super::error::ProjectionError;
use super::rules::{
    MEDICARE_PART_B_MONTHLY, MEDICARE_PART_D_MONTHLY, MEDICARE_START_AGE, PAY_PERIODS_PER_YEAR,
    age_on, agency_matching, annuity_multiplier, apply_cola, date_at_age, days_in_month,
    effective_federal_rate, fers_supplement, monthly_rmd, service_years, social_security_benefit,
    social_security_taxable_share, state_tax_rate, weighted_tsp_growth, whole_years_between,
};
use super::types::{
    MonthRecord, ProjectionResult, ScenarioParameters, WithdrawalStrategy, YearRecord,
};

const MAX_YEARS_IN_RETIREMENT: u32 = 100;
const MIN_PROJECTION_YEAR: i32 = 1900;
const MAX_PROJECTION_YEAR: i32 = 2200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Rates {
    pub cola: f64,
    pub tsp_growth: f64,
}

#[derive(Debug, Clone, Copy)]
struct Timeline {
    first_month: NaiveDate,
    retire: NaiveDate,
    end: NaiveDate,
    age_62: NaiveDate,
    ss_start: NaiveDate,
}

impl Timeline {
    fn new(params: &ScenarioParameters) -> Self {
        let retire = params.retire_date;
        Self {
            first_month: NaiveDate::from_ymd_opt(params.first_projection_year(), 1, 1)
                .unwrap_or(retire),
            retire,
            end: params.projection_end_date().unwrap_or(retire),
            age_62: date_at_age(params.birthdate, 62),
            ss_start: date_at_age(params.birthdate, params.ss_start_age),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Annuity {
    service_years: f64,
    multiplier: f64,
    gross_annual: f64,
    ss_benefit: f64,
    ss_benefit_at_62: f64,
    supplement_eligible: bool,
}

impl Annuity {
    fn new(params: &ScenarioParameters, timeline: &Timeline) -> Self {
        let service = service_years(
            params.service_start_date,
            params.retire_date,
            params.sick_leave_hours,
        );
        let multiplier = annuity_multiplier(params.retire_date, timeline.age_62, service);
        let gross_annual = multiplier
            * service
            * params.high3_salary
            * (1.0 - params.survivor_option.annuity_reduction());

        Self {
            service_years: service,
            multiplier,
            gross_annual,
            ss_benefit: social_security_benefit(params.ss_start_age, params.ss_base_benefit),
            ss_benefit_at_62: social_security_benefit(62, params.ss_base_benefit),
            supplement_eligible: service >= 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RetiredMonth {
    fers_annuity: f64,
    fers_supplement: f64,
    tsp_draw_gross: f64,
    tsp_withdrawal_net: f64,
    social_security: f64,
    fehb: f64,
    medicare: f64,
    rmd_amount: f64,
}

/// Runs the deterministic projection for `params`.
pub fn project(params: &ScenarioParameters) -> Result<ProjectionResult, ProjectionError> {
    validate(params)?;
    Ok(simulate(params, base_rates(params)))
}

pub fn effective_tsp_growth(params: &ScenarioParameters) -> f64 {
    params
        .fund_allocation
        .as_ref()
        .map(weighted_tsp_growth)
        .unwrap_or(params.tsp_growth_rate)
}

pub(crate) fn base_rates(params: &ScenarioParameters) -> Rates {
    Rates {
        cola: params.cola_rate,
        tsp_growth: effective_tsp_growth(params),
    }
}

pub fn validate(params: &ScenarioParameters) -> Result<(), ProjectionError> {
    let mut errors = Vec::new();

    for (label, value) in [
        ("High-3 salary", params.high3_salary),
        ("Starting TSP balance", params.tsp_balance),
        ("Biweekly TSP contribution", params.biweekly_tsp_contribution),
        ("Sick leave hours", params.sick_leave_hours),
        ("COLA", params.cola_rate),
        ("TSP growth", params.tsp_growth_rate),
        ("TSP withdrawal rate", params.tsp_withdrawal_rate),
        ("FEHB premium", params.fehb_monthly_premium),
        ("FEHB growth rate", params.fehb_growth_rate),
    ] {
        require_non_negative(&mut errors, label, value);
    }
    if let Some(salary) = params.current_salary {
        require_non_negative(&mut errors, "Current salary", salary);
    }
    if let Some(benefit) = params.ss_base_benefit {
        require_non_negative(&mut errors, "Social Security base benefit", benefit);
    }

    if params.tsp_withdrawal_rate > 1.0 {
        errors.push("TSP withdrawal rate cannot exceed 100%.".to_string());
    }
    if !(62..=70).contains(&params.ss_start_age) {
        errors.push("Social Security start age should be between 62 and 70.".to_string());
    }
    if params.years_in_retirement < 1 {
        errors.push("Years in retirement must be at least 1.".to_string());
    }
    if params.years_in_retirement > MAX_YEARS_IN_RETIREMENT {
        errors.push(format!(
            "Years in retirement cannot exceed {MAX_YEARS_IN_RETIREMENT}."
        ));
    }
    if !(MIN_PROJECTION_YEAR..=MAX_PROJECTION_YEAR).contains(&params.projection_start_year) {
        errors.push(format!(
            "Projection start year must be between {MIN_PROJECTION_YEAR} and {MAX_PROJECTION_YEAR}."
        ));
    }

    if params.retire_date <= params.service_start_date {
        errors.push("Retirement date must be after service start date.".to_string());
    } else if params.birthdate >= params.retire_date {
        errors.push("Birthdate must be before retirement date.".to_string());
    }

    if let Some(allocation) = &params.fund_allocation {
        for (fund, pct) in [
            ("G", allocation.g_fund_pct),
            ("F", allocation.f_fund_pct),
            ("C", allocation.c_fund_pct),
            ("S", allocation.s_fund_pct),
            ("I", allocation.i_fund_pct),
        ] {
            require_non_negative(&mut errors, &format!("{fund} fund allocation"), pct);
        }
        if (allocation.total_pct() - 100.0).abs() > 0.5 {
            errors.push("TSP fund allocation must total 100%.".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProjectionError::InvalidInput(errors))
    }
}

fn require_non_negative(errors: &mut Vec<String>, label: &str, value: f64) {
    if !value.is_finite() {
        errors.push(format!("{label} must be a finite number."));
    } else if value < 0.0 {
        errors.push(format!("{label} cannot be negative."));
    }
}

/// Month-by-month projection. Callers must have validated `params`.
pub(crate) fn simulate(params: &ScenarioParameters, rates: Rates) -> ProjectionResult {
    let timeline = Timeline::new(params);
    let annuity = Annuity::new(params, &timeline);

    let salary = params.salary();
    let monthly_gross_salary = salary / 12.0;
    let salary_net = monthly_gross_salary
        * (1.0
            - effective_federal_rate(monthly_gross_salary, params.filing_status)
            - state_tax_rate(params.state_tax_exempt));
    let monthly_contribution = monthly_tsp_contribution(params, salary);
    let monthly_growth = rates.tsp_growth / 12.0;

    let mut balance = params.tsp_balance;
    let mut months = Vec::with_capacity(params.horizon_years() * 12);
    let mut date = timeline.first_month;

    while date <= timeline.end {
        let retired_fraction = retired_share(date, timeline.retire);
        let working_share = 1.0 - retired_fraction;
        let retired = if retired_fraction > 0.0 {
            retired_month(params, &timeline, &annuity, rates, date, balance)
        } else {
            RetiredMonth::default()
        };

        let draw = retired.tsp_draw_gross * retired_fraction;
        balance = ((balance - draw) * (1.0 + monthly_growth)
            + monthly_contribution * working_share)
            .max(0.0);

        let mut record = MonthRecord {
            date,
            salary: salary_net * working_share,
            fers_annuity: retired.fers_annuity * retired_fraction,
            fers_supplement: retired.fers_supplement * retired_fraction,
            tsp_withdrawal: retired.tsp_withdrawal_net * retired_fraction,
            social_security: retired.social_security * retired_fraction,
            fehb: retired.fehb * retired_fraction,
            medicare: retired.medicare * retired_fraction,
            total_income: 0.0,
            tsp_balance: balance,
            rmd_amount: retired.rmd_amount,
        };
        record.total_income = record.salary
            + record.fers_annuity
            + record.fers_supplement
            + record.tsp_withdrawal
            + record.social_security
            + record.fehb
            + record.medicare;
        months.push(record);

        date = match date.checked_add_months(Months::new(1)) {
            Some(next) => next,
            None => break,
        };
    }

    ProjectionResult {
        service_years: annuity.service_years,
        annuity_multiplier: annuity.multiplier,
        gross_annual_annuity: annuity.gross_annual,
        tsp_growth_rate: rates.tsp_growth,
        cola_rate: rates.cola,
        years: roll_up_years(params.birthdate, &months),
        months,
    }
}

fn monthly_tsp_contribution(params: &ScenarioParameters, salary: f64) -> f64 {
    if params.biweekly_tsp_contribution <= 0.0 {
        return 0.0;
    }
    let biweekly_salary = salary / PAY_PERIODS_PER_YEAR;
    let matching = agency_matching(
        biweekly_salary,
        params.biweekly_tsp_contribution,
        params.agency_matching,
    );
    (params.biweekly_tsp_contribution + matching) * PAY_PERIODS_PER_YEAR / 12.0
}

// Fraction of the month spent retired; the retirement month is split by day.
fn retired_share(month_start: NaiveDate, retire: NaiveDate) -> f64 {
    if month_start.year() == retire.year() && month_start.month() == retire.month() {
        let days = days_in_month(month_start) as f64;
        let working_days = (retire.day() - 1) as f64;
        (days - working_days) / days
    } else if month_start > retire {
        1.0
    } else {
        0.0
    }
}

fn retired_month(
    params: &ScenarioParameters,
    timeline: &Timeline,
    annuity: &Annuity,
    rates: Rates,
    date: NaiveDate,
    balance: f64,
) -> RetiredMonth {
    let status = params.filing_status;
    let age = age_on(params.birthdate, date);
    let years_retired = whole_years_between(timeline.retire, date);

    let monthly_annuity = apply_cola(annuity.gross_annual / 12.0, rates.cola, years_retired);
    let annuity_rate = effective_federal_rate(monthly_annuity, status);
    let fers_annuity = monthly_annuity * (1.0 - annuity_rate);

    let supplement = if date < timeline.age_62 && annuity.supplement_eligible {
        fers_supplement(annuity.service_years, annuity.ss_benefit_at_62) * (1.0 - annuity_rate)
    } else {
        0.0
    };

    let rmd_amount = monthly_rmd(age, balance);
    let tsp_draw_gross = if balance > 0.0 {
        (balance * withdrawal_rate(params, rmd_amount, balance)).min(balance)
    } else {
        0.0
    };
    let tsp_rate = effective_federal_rate(tsp_draw_gross, status);
    let tsp_withdrawal_net = tsp_draw_gross * (1.0 - tsp_rate);

    let social_security = if date >= timeline.ss_start {
        let years_on_benefit = whole_years_between(timeline.ss_start, date);
        let monthly_ss = apply_cola(annuity.ss_benefit, rates.cola, years_on_benefit);
        let taxable_share =
            social_security_taxable_share(monthly_annuity + tsp_draw_gross + monthly_ss);
        (monthly_ss - monthly_ss * taxable_share * annuity_rate).max(0.0)
    } else {
        0.0
    };

    let fehb = -params.fehb_monthly_premium
        * (1.0 + params.fehb_growth_rate).powi(years_retired as i32);
    let medicare = if params.include_medicare && age >= MEDICARE_START_AGE {
        -(MEDICARE_PART_B_MONTHLY + MEDICARE_PART_D_MONTHLY)
    } else {
        0.0
    };

    RetiredMonth {
        fers_annuity,
        fers_supplement: supplement,
        tsp_draw_gross,
        tsp_withdrawal_net,
        social_security,
        fehb,
        medicare,
        rmd_amount,
    }
}

fn withdrawal_rate(params: &ScenarioParameters, rmd_amount: f64, balance: f64) -> f64 {
    let fixed = params.tsp_withdrawal_rate / 12.0;
    let rmd = if balance > 0.0 { rmd_amount / balance } else { 0.0 };
    match params.withdrawal_strategy {
        WithdrawalStrategy::FixedPercentage => fixed,
        WithdrawalStrategy::IrsRmd => rmd,
        WithdrawalStrategy::GreaterOfBoth => fixed.max(rmd),
    }
}

fn roll_up_years(birthdate: NaiveDate, months: &[MonthRecord]) -> Vec<YearRecord> {
    let mut years: Vec<YearRecord> = Vec::new();
    for month in months {
        let calendar_year = month.date.year();
        if years
            .last()
            .is_none_or(|year| year.calendar_year != calendar_year)
        {
            years.push(YearRecord {
                year_index: years.len() as u32,
                calendar_year,
                age: 0,
                salary: 0.0,
                pension_income: 0.0,
                fers_supplement: 0.0,
                tsp_withdrawal: 0.0,
                social_security: 0.0,
                health_premiums: 0.0,
                total_income: 0.0,
                tsp_balance: 0.0,
            });
        }
        if let Some(year) = years.last_mut() {
            year.age = age_on(birthdate, month.date);
            year.salary += month.salary;
            year.pension_income += month.fers_annuity;
            year.fers_supplement += month.fers_supplement;
            year.tsp_withdrawal += month.tsp_withdrawal;
            year.social_security += month.social_security;
            year.health_premiums += month.fehb + month.medicare;
            year.total_income += month.total_income;
            year.tsp_balance = month.tsp_balance;
        }
    }
    years
}
