use std::collections::BTreeMap;

use serde::Serialize;

use super::error::ProjectionError;
use super::types::{ProjectionResult, YearRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakeven {
    /// Position within the calendar years both projections share.
    pub year_index: usize,
    pub calendar_year: i32,
    pub cumulative_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdYear {
    pub calendar_year: i32,
    pub salary: f64,
    pub pension_income: f64,
    pub fers_supplement: f64,
    pub tsp_withdrawal: f64,
    pub social_security: f64,
    pub health_premiums: f64,
    pub total_income: f64,
    pub tsp_balance: f64,
    pub cumulative_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowYear {
    pub calendar_year: i32,
    pub total_income: f64,
    pub expenses: f64,
    pub net_cash_flow: f64,
    pub cumulative_cash_flow: f64,
}

pub fn cumulative_income(result: &ProjectionResult) -> Vec<f64> {
    running_total(result.years.iter().map(|y| y.total_income))
}

fn running_total(values: impl Iterator<Item = f64>) -> Vec<f64> {
    values
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// First shared year where the cumulative income lead changes hands.
///
/// Both projections are aligned on the calendar years they have in common and
/// accumulated from the first of those. Years where the cumulative totals tie
/// do not end a lead, so identical early years followed by a divergence are
/// not a crossing.
pub fn find_breakeven(a: &ProjectionResult, b: &ProjectionResult) -> Option<Breakeven> {
    let b_by_year = b
        .years
        .iter()
        .map(|y| (y.calendar_year, y))
        .collect::<BTreeMap<_, _>>();
    let shared = a
        .years
        .iter()
        .filter_map(|ya| b_by_year.get(&ya.calendar_year).map(|yb| (ya, *yb)))
        .collect::<Vec<_>>();

    let cum_a = running_total(shared.iter().map(|(ya, _)| ya.total_income));
    let cum_b = running_total(shared.iter().map(|(_, yb)| yb.total_income));
    let delta = cum_a
        .iter()
        .zip(&cum_b)
        .map(|(a, b)| b - a)
        .collect::<Vec<_>>();

    let mut leader = 0.0;
    for (i, &d) in delta.iter().enumerate() {
        if d == 0.0 {
            continue;
        }
        if leader != 0.0 && d.signum() != leader {
            return Some(Breakeven {
                year_index: i,
                calendar_year: shared[i].0.calendar_year,
                cumulative_income: cum_a[i],
            });
        }
        leader = d.signum();
    }
    None
}

/// Component-wise household totals over every calendar year either
/// projection covers. A year missing from one side contributes nothing.
pub fn combine_household(a: &ProjectionResult, b: &ProjectionResult) -> Vec<HouseholdYear> {
    let mut by_year: BTreeMap<i32, HouseholdYear> = BTreeMap::new();
    for year in a.years.iter().chain(&b.years) {
        let entry = by_year
            .entry(year.calendar_year)
            .or_insert_with(|| HouseholdYear {
                calendar_year: year.calendar_year,
                ..HouseholdYear::default()
            });
        add_year(entry, year);
    }

    let mut cumulative = 0.0;
    by_year
        .into_values()
        .map(|mut year| {
            cumulative += year.total_income;
            year.cumulative_income = cumulative;
            year
        })
        .collect()
}

fn add_year(total: &mut HouseholdYear, year: &YearRecord) {
    total.salary += year.salary;
    total.pension_income += year.pension_income;
    total.fers_supplement += year.fers_supplement;
    total.tsp_withdrawal += year.tsp_withdrawal;
    total.social_security += year.social_security;
    total.health_premiums += year.health_premiums;
    total.total_income += year.total_income;
    total.tsp_balance += year.tsp_balance;
}

/// Annual expenses for each calendar year, inflated from the first one.
///
/// `pre_retirement` and `post_retirement` are annual amounts in first-year
/// dollars. The retirement year is split by month: months before
/// `retire_month` (1-based) use the pre-retirement level.
pub fn project_expenses(
    calendar_years: &[i32],
    retire_year: i32,
    retire_month: u32,
    pre_retirement: f64,
    post_retirement: f64,
    inflation_rate: f64,
) -> Vec<f64> {
    let Some(&first_year) = calendar_years.first() else {
        return Vec::new();
    };

    calendar_years
        .iter()
        .map(|&year| {
            let base = if year < retire_year {
                pre_retirement
            } else if year > retire_year {
                post_retirement
            } else {
                let working = f64::from(retire_month.clamp(1, 12) - 1) / 12.0;
                pre_retirement * working + post_retirement * (1.0 - working)
            };
            base * (1.0 + inflation_rate).powi(year - first_year)
        })
        .collect()
}

pub fn cash_flow(
    result: &ProjectionResult,
    expenses: &[f64],
) -> Result<Vec<CashFlowYear>, ProjectionError> {
    if expenses.len() != result.years.len() {
        return Err(ProjectionError::InvalidInput(vec![format!(
            "Expected {} yearly expense values, got {}.",
            result.years.len(),
            expenses.len()
        )]));
    }

    let mut cumulative = 0.0;
    Ok(result
        .years
        .iter()
        .zip(expenses)
        .map(|(year, &expenses)| {
            let net_cash_flow = year.total_income - expenses;
            cumulative += net_cash_flow;
            CashFlowYear {
                calendar_year: year.calendar_year,
                total_income: year.total_income,
                expenses,
                net_cash_flow,
                cumulative_cash_flow: cumulative,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::project;
    use crate::core::engine::tests::sample_params;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn year(calendar_year: i32, total_income: f64) -> YearRecord {
        YearRecord {
            year_index: 0,
            calendar_year,
            age: 60,
            salary: 0.0,
            pension_income: total_income,
            fers_supplement: 0.0,
            tsp_withdrawal: 0.0,
            social_security: 0.0,
            health_premiums: 0.0,
            total_income,
            tsp_balance: 1_000.0,
        }
    }

    fn result_from(years: Vec<YearRecord>) -> ProjectionResult {
        ProjectionResult {
            service_years: 30.0,
            annuity_multiplier: 0.011,
            gross_annual_annuity: 0.0,
            tsp_growth_rate: 0.05,
            cola_rate: 0.02,
            years,
            months: Vec::new(),
        }
    }

    #[test]
    fn cumulative_income_is_running_sum() {
        let result = result_from(vec![year(2025, 10.0), year(2026, 20.0), year(2027, 5.0)]);
        assert_eq!(cumulative_income(&result), vec![10.0, 30.0, 35.0]);
    }

    #[test]
    fn breakeven_found_when_late_starter_catches_up() {
        let early = result_from(vec![
            year(2025, 100.0),
            year(2026, 100.0),
            year(2027, 100.0),
            year(2028, 100.0),
        ]);
        let late = result_from(vec![
            year(2025, 0.0),
            year(2026, 150.0),
            year(2027, 150.0),
            year(2028, 150.0),
        ]);
        let breakeven = find_breakeven(&early, &late).expect("crossing");
        assert_eq!(breakeven.year_index, 3);
        assert_eq!(breakeven.calendar_year, 2028);
        assert_approx(breakeven.cumulative_income, 400.0);
    }

    #[test]
    fn breakeven_absent_when_one_side_always_leads() {
        let low = result_from(vec![year(2025, 1.0), year(2026, 1.0)]);
        let high = result_from(vec![year(2025, 2.0), year(2026, 2.0)]);
        assert_eq!(find_breakeven(&low, &high), None);
        assert_eq!(find_breakeven(&low, &low), None);
    }

    #[test]
    fn breakeven_aligns_on_shared_calendar_years() {
        let a = result_from(vec![year(2024, 500.0), year(2025, 10.0), year(2026, 10.0)]);
        let b = result_from(vec![year(2025, 5.0), year(2026, 30.0)]);
        let breakeven = find_breakeven(&a, &b).expect("crossing");
        assert_eq!(breakeven.year_index, 1);
        assert_eq!(breakeven.calendar_year, 2026);
        assert_approx(breakeven.cumulative_income, 20.0);
    }

    #[test]
    fn identical_early_years_are_not_a_crossing() {
        let a = result_from(vec![year(2025, 10.0), year(2026, 10.0), year(2027, 10.0)]);
        let b = result_from(vec![year(2025, 10.0), year(2026, 5.0), year(2027, 30.0)]);
        let breakeven = find_breakeven(&a, &b).expect("crossing");
        assert_eq!(breakeven.calendar_year, 2027);
    }

    #[test]
    fn household_sums_by_calendar_year() {
        let a = result_from(vec![year(2025, 10.0), year(2026, 20.0)]);
        let b = result_from(vec![year(2026, 5.0), year(2027, 7.0)]);
        let household = combine_household(&a, &b);
        let years = household.iter().map(|h| h.calendar_year).collect::<Vec<_>>();
        assert_eq!(years, vec![2025, 2026, 2027]);
        assert_approx(household[1].total_income, 25.0);
        assert_approx(household[1].pension_income, 25.0);
        assert_approx(household[1].tsp_balance, 2_000.0);
        assert_approx(household[2].cumulative_income, 42.0);
    }

    #[test]
    fn expenses_inflate_and_switch_at_retirement() {
        let expenses = project_expenses(&[2024, 2025, 2026], 2025, 7, 1_200.0, 600.0, 0.10);
        assert_approx(expenses[0], 1_200.0);
        assert_approx(expenses[1], (600.0 + 300.0) * 1.1);
        assert_approx(expenses[2], 600.0 * 1.21);
        assert!(project_expenses(&[], 2025, 1, 1.0, 1.0, 0.0).is_empty());
    }

    #[test]
    fn cash_flow_accumulates_net_income() {
        let result = result_from(vec![year(2025, 100.0), year(2026, 50.0)]);
        let flow = cash_flow(&result, &[60.0, 70.0]).expect("matching lengths");
        assert_approx(flow[0].net_cash_flow, 40.0);
        assert_approx(flow[1].net_cash_flow, -20.0);
        assert_approx(flow[1].cumulative_cash_flow, 20.0);
    }

    #[test]
    fn cash_flow_rejects_length_mismatch() {
        let result = result_from(vec![year(2025, 100.0)]);
        assert!(cash_flow(&result, &[]).is_err());
    }

    #[test]
    fn household_of_real_projections_covers_both_horizons() {
        let a = project(&sample_params()).expect("valid");
        let mut other = sample_params();
        other.years_in_retirement = 30;
        let b = project(&other).expect("valid");
        let household = combine_household(&a, &b);
        assert_eq!(household.len(), b.years.len());
        let total = household.last().expect("non-empty").cumulative_income;
        let expected = cumulative_income(&a).last().copied().unwrap_or(0.0)
            + cumulative_income(&b).last().copied().unwrap_or(0.0);
        assert!((total - expected).abs() < 1e-3);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_breakeven_marks_a_sign_change(
            a_incomes in proptest::collection::vec(0u32..1_000, 1..20),
            b_incomes in proptest::collection::vec(0u32..1_000, 1..20),
        ) {
            let a = result_from(a_incomes.iter().enumerate().map(|(i, v)| year(2025 + i as i32, *v as f64)).collect());
            let b = result_from(b_incomes.iter().enumerate().map(|(i, v)| year(2025 + i as i32, *v as f64)).collect());

            let shared = a_incomes.len().min(b_incomes.len());
            let cum_a = cumulative_income(&a);
            let cum_b = cumulative_income(&b);
            let delta = (0..shared).map(|i| cum_b[i] - cum_a[i]).collect::<Vec<_>>();

            match find_breakeven(&a, &b) {
                Some(found) => {
                    let i = found.year_index;
                    prop_assert!(i >= 1 && delta[i] != 0.0);
                    let previous_lead = delta[..i].iter().rev().find(|d| **d != 0.0).copied();
                    prop_assert!(previous_lead.is_some_and(|d| d.signum() != delta[i].signum()));
                    let earlier = delta[..i].iter().filter(|d| **d != 0.0).map(|d| d.signum()).collect::<Vec<_>>();
                    prop_assert!(earlier.windows(2).all(|w| w[0] == w[1]));
                    prop_assert_eq!(found.calendar_year, 2025 + i as i32);
                }
                None => {
                    let signs = delta.iter().filter(|d| **d != 0.0).map(|d| d.signum()).collect::<Vec<_>>();
                    prop_assert!(signs.windows(2).all(|w| w[0] == w[1]));
                }
            }
        }
    }
}
