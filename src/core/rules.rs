use chrono::{Datelike, Months, NaiveDate};

use super::types::{FilingStatus, FundAllocation};

pub const MEDICARE_PART_B_MONTHLY: f64 = 174.70;
pub const MEDICARE_PART_D_MONTHLY: f64 = 35.00;
pub const MEDICARE_START_AGE: u32 = 65;
pub const RMD_START_AGE: u32 = 73;
pub const SS_FULL_RETIREMENT_AGE: u32 = 67;
pub const SICK_LEAVE_HOURS_PER_MONTH: f64 = 174.0;
pub const STATE_TAX_RATE: f64 = 0.03;
pub const PAY_PERIODS_PER_YEAR: f64 = 26.0;

const SINGLE_BRACKETS: [(f64, f64); 7] = [
    (11_600.0, 0.10),
    (47_150.0, 0.12),
    (100_525.0, 0.22),
    (191_950.0, 0.24),
    (243_725.0, 0.32),
    (609_350.0, 0.35),
    (f64::INFINITY, 0.37),
];

const MARRIED_BRACKETS: [(f64, f64); 7] = [
    (23_200.0, 0.10),
    (94_300.0, 0.12),
    (201_050.0, 0.22),
    (383_900.0, 0.24),
    (487_450.0, 0.32),
    (731_200.0, 0.35),
    (f64::INFINITY, 0.37),
];

// Personalised monthly benefit estimates for claiming ages 62..=70.
const SS_BENEFIT_BY_AGE: [f64; 9] = [
    2_795.0, 2_985.0, 3_191.0, 3_464.0, 3_738.0, 4_012.0, 4_314.0, 4_643.0, 5_000.0,
];

// IRS Uniform Lifetime Table divisors, ages 73..=120.
const RMD_DIVISORS: [f64; 48] = [
    26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2, 14.4, 13.7,
    12.9, 12.2, 11.5, 10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, 5.6, 5.2, 4.9, 4.6, 4.3,
    4.1, 3.9, 3.7, 3.5, 3.4, 3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0,
];
const RMD_DIVISOR_PAST_TABLE: f64 = 15.0;

const G_FUND_RETURN: f64 = 0.025;
const F_FUND_RETURN: f64 = 0.035;
const C_FUND_RETURN: f64 = 0.07;
const S_FUND_RETURN: f64 = 0.08;
const I_FUND_RETURN: f64 = 0.065;

/// 2024 progressive federal income tax on an annual amount.
pub fn federal_tax(annual_income: f64, filing_status: FilingStatus) -> f64 {
    let brackets = match filing_status {
        FilingStatus::Single => &SINGLE_BRACKETS,
        FilingStatus::Married => &MARRIED_BRACKETS,
    };
    let income = annual_income.max(0.0);

    let mut tax = 0.0;
    let mut lower = 0.0;
    for &(upper, rate) in brackets {
        if income <= lower {
            break;
        }
        tax += (income.min(upper) - lower) * rate;
        lower = upper;
    }
    tax
}

/// Effective federal rate for a monthly amount, taxed as if it recurred all year.
pub fn effective_federal_rate(monthly_amount: f64, filing_status: FilingStatus) -> f64 {
    if monthly_amount <= 0.0 {
        return 0.0;
    }
    federal_tax(monthly_amount * 12.0, filing_status) / 12.0 / monthly_amount
}

pub fn state_tax_rate(exempt: bool) -> f64 {
    if exempt { 0.0 } else { STATE_TAX_RATE }
}

/// Monthly Social Security benefit when claiming at `start_age`.
///
/// With a full-retirement-age `base_benefit`, early claiming is reduced by 5/9%
/// per month for the first 36 months and 5/12% per month beyond, and delayed
/// claiming earns 8% per year. Without one, the age table is used.
pub fn social_security_benefit(start_age: u32, base_benefit: Option<f64>) -> f64 {
    let Some(base) = base_benefit else {
        return start_age
            .checked_sub(62)
            .and_then(|idx| SS_BENEFIT_BY_AGE.get(idx as usize).copied())
            .unwrap_or(SS_BENEFIT_BY_AGE[5]);
    };

    if start_age < SS_FULL_RETIREMENT_AGE {
        let months_early = ((SS_FULL_RETIREMENT_AGE - start_age) * 12) as f64;
        let reduction = if months_early <= 36.0 {
            months_early * (5.0 / 9.0) / 100.0
        } else {
            36.0 * (5.0 / 9.0) / 100.0 + (months_early - 36.0) * (5.0 / 12.0) / 100.0
        };
        base * (1.0 - reduction)
    } else {
        let years_delayed = (start_age - SS_FULL_RETIREMENT_AGE) as f64;
        base * (1.0 + years_delayed * 0.08)
    }
}

/// Share of the monthly Social Security benefit treated as taxable.
pub fn social_security_taxable_share(total_monthly_gross: f64) -> f64 {
    if total_monthly_gross > 5_000.0 {
        0.85
    } else if total_monthly_gross > 3_000.0 {
        0.50
    } else {
        0.0
    }
}

/// Monthly FERS supplement: 1/40th of the age-62 benefit per year of service.
pub fn fers_supplement(service_years: f64, ss_benefit_at_62: f64) -> f64 {
    ss_benefit_at_62 * service_years.clamp(0.0, 40.0) / 40.0
}

pub fn rmd_divisor(age: u32) -> Option<f64> {
    if age < RMD_START_AGE {
        return None;
    }
    Some(
        RMD_DIVISORS
            .get((age - RMD_START_AGE) as usize)
            .copied()
            .unwrap_or(RMD_DIVISOR_PAST_TABLE),
    )
}

pub fn monthly_rmd(age: u32, balance: f64) -> f64 {
    match rmd_divisor(age) {
        Some(divisor) if balance > 0.0 => balance / divisor / 12.0,
        _ => 0.0,
    }
}

/// Agency contribution per pay period: 1% automatic, the first 3% matched in
/// full and the next 2% matched at half.
pub fn agency_matching(biweekly_salary: f64, biweekly_contribution: f64, enabled: bool) -> f64 {
    if !enabled || biweekly_salary <= 0.0 {
        return 0.0;
    }
    let contribution_pct = biweekly_contribution.max(0.0) / biweekly_salary * 100.0;

    let automatic = 0.01;
    let full_match = contribution_pct.min(3.0) / 100.0;
    let half_match = (contribution_pct.min(5.0) - 3.0).max(0.0) / 100.0 * 0.5;
    biweekly_salary * (automatic + full_match + half_match)
}

pub fn weighted_tsp_growth(allocation: &FundAllocation) -> f64 {
    allocation.g_fund_pct / 100.0 * G_FUND_RETURN
        + allocation.f_fund_pct / 100.0 * F_FUND_RETURN
        + allocation.c_fund_pct / 100.0 * C_FUND_RETURN
        + allocation.s_fund_pct / 100.0 * S_FUND_RETURN
        + allocation.i_fund_pct / 100.0 * I_FUND_RETURN
}

pub fn apply_cola(base: f64, cola: f64, whole_years: u32) -> f64 {
    base * (1.0 + cola).powi(whole_years as i32)
}

pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}

/// Whole calendar years from `from` to `to`, counted by month, never negative.
pub fn whole_years_between(from: NaiveDate, to: NaiveDate) -> u32 {
    (months_between(from, to).max(0) / 12) as u32
}

pub fn service_years(start: NaiveDate, end: NaiveDate, sick_leave_hours: f64) -> f64 {
    let worked = months_between(start, end) as f64 / 12.0;
    let sick_leave_months = sick_leave_hours.max(0.0) / SICK_LEAVE_HOURS_PER_MONTH;
    worked + sick_leave_months / 12.0
}

pub fn age_on(birthdate: NaiveDate, date: NaiveDate) -> u32 {
    date.years_since(birthdate).unwrap_or(0)
}

pub fn date_at_age(birthdate: NaiveDate, age: u32) -> NaiveDate {
    birthdate
        .checked_add_months(Months::new(age * 12))
        .unwrap_or(NaiveDate::MAX)
}

/// 1.1% when retiring at or after 62 with at least 20 years, otherwise 1.0%.
pub fn annuity_multiplier(retire_date: NaiveDate, age_62_date: NaiveDate, service: f64) -> f64 {
    if retire_date >= age_62_date && service >= 20.0 {
        0.011
    } else {
        0.01
    }
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .map(|next| (next - first).num_days() as u32)
        .unwrap_or(31)
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

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn federal_tax_single_fifty_thousand_uses_three_brackets() {
        let expected = 11_600.0 * 0.10 + (47_150.0 - 11_600.0) * 0.12 + (50_000.0 - 47_150.0) * 0.22;
        assert_approx(federal_tax(50_000.0, FilingStatus::Single), expected);
    }

    #[test]
    fn federal_tax_married_brackets_are_wider() {
        let single = federal_tax(120_000.0, FilingStatus::Single);
        let married = federal_tax(120_000.0, FilingStatus::Married);
        assert!(married < single);
        assert_approx(federal_tax(0.0, FilingStatus::Married), 0.0);
        assert_approx(federal_tax(-5.0, FilingStatus::Single), 0.0);
    }

    #[test]
    fn effective_rate_is_zero_for_no_income() {
        assert_approx(effective_federal_rate(0.0, FilingStatus::Single), 0.0);
        let rate = effective_federal_rate(5_000.0, FilingStatus::Single);
        assert!(rate > 0.10 && rate < 0.22);
    }

    #[test]
    fn social_security_table_and_adjustments() {
        assert_approx(social_security_benefit(62, None), 2_795.0);
        assert_approx(social_security_benefit(70, None), 5_000.0);
        assert_approx(social_security_benefit(75, None), 4_012.0);

        assert_approx(social_security_benefit(67, Some(3_000.0)), 3_000.0);
        assert_approx(social_security_benefit(70, Some(3_000.0)), 3_000.0 * 1.24);
        // 36 months at 5/9% then 24 months at 5/12% is a 30% reduction.
        assert_approx(social_security_benefit(62, Some(3_000.0)), 3_000.0 * 0.70);
        assert_approx(
            social_security_benefit(65, Some(3_000.0)),
            3_000.0 * (1.0 - 24.0 * 5.0 / 9.0 / 100.0),
        );
    }

    #[test]
    fn fers_supplement_caps_at_forty_years() {
        assert_approx(fers_supplement(20.0, 2_800.0), 1_400.0);
        assert_approx(fers_supplement(45.0, 2_800.0), 2_800.0);
    }

    #[test]
    fn rmd_starts_at_seventy_three() {
        assert!(rmd_divisor(72).is_none());
        assert_approx(rmd_divisor(73).expect("divisor"), 26.5);
        assert_approx(rmd_divisor(120).expect("divisor"), 2.0);
        assert_approx(rmd_divisor(121).expect("divisor"), 15.0);
        assert_approx(monthly_rmd(73, 265_000.0), 10_000.0 / 12.0);
        assert_approx(monthly_rmd(70, 265_000.0), 0.0);
    }

    #[test]
    fn agency_matching_follows_tiers() {
        let salary = 4_000.0;
        assert_approx(agency_matching(salary, 0.0, true), 40.0);
        assert_approx(agency_matching(salary, 120.0, true), 40.0 + 120.0);
        assert_approx(agency_matching(salary, 160.0, true), 40.0 + 120.0 + 20.0);
        assert_approx(agency_matching(salary, 400.0, true), 40.0 + 120.0 + 40.0);
        assert_approx(agency_matching(salary, 400.0, false), 0.0);
    }

    #[test]
    fn weighted_growth_of_all_c_fund_is_c_return() {
        let allocation = FundAllocation {
            g_fund_pct: 0.0,
            f_fund_pct: 0.0,
            c_fund_pct: 100.0,
            s_fund_pct: 0.0,
            i_fund_pct: 0.0,
        };
        assert_approx(weighted_tsp_growth(&allocation), 0.07);
    }

    #[test]
    fn service_years_include_sick_leave_credit() {
        let years = service_years(date(1995, 1, 1), date(2025, 1, 1), 174.0 * 6.0);
        assert_approx(years, 30.5);
    }

    #[test]
    fn ages_and_month_arithmetic() {
        let birth = date(1965, 2, 25);
        assert_eq!(age_on(birth, date(2027, 2, 24)), 61);
        assert_eq!(age_on(birth, date(2027, 2, 25)), 62);
        assert_eq!(date_at_age(birth, 62), date(2027, 2, 25));
        assert_eq!(whole_years_between(date(2025, 8, 1), date(2026, 7, 1)), 0);
        assert_eq!(whole_years_between(date(2025, 8, 1), date(2026, 8, 1)), 1);
        assert_eq!(whole_years_between(date(2025, 8, 1), date(2024, 8, 1)), 0);
        assert_eq!(days_in_month(date(2024, 2, 10)), 29);
        assert_eq!(days_in_month(date(2025, 12, 1)), 31);
    }

    #[test]
    fn multiplier_requires_age_and_service() {
        let age_62 = date(2027, 2, 25);
        assert_approx(annuity_multiplier(date(2027, 3, 1), age_62, 25.0), 0.011);
        assert_approx(annuity_multiplier(date(2027, 3, 1), age_62, 19.9), 0.01);
        assert_approx(annuity_multiplier(date(2026, 3, 1), age_62, 30.0), 0.01);
    }
}
