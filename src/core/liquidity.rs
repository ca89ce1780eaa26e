use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::error::{EngineError, EngineResult};
use super::types::{FinancialProfile, ProjectionMonth};

/// Loan repayments are debited on the first of the month.
const LOAN_PAYMENT_DAY: u32 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LiquidityCategory {
    Salary,
    Expense,
    Loan,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityEvent {
    pub day: u32,
    /// Positive for inflows, negative for outflows.
    pub amount: f64,
    pub category: LiquidityCategory,
    pub description: String,
    pub balance_after: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityWarning {
    pub day: u32,
    pub balance: f64,
    pub severity: Severity,
    pub description: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBalance {
    pub day: u32,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityReport {
    pub year: i32,
    pub month: u32,
    pub opening_balance: f64,
    pub closing_balance: f64,
    pub events: Vec<LiquidityEvent>,
    pub daily_balances: Vec<DailyBalance>,
    pub min_balance: f64,
    /// `None` when no event moved the balance below the opening figure.
    pub min_balance_day: Option<u32>,
    pub warnings: Vec<LiquidityWarning>,
}

impl LiquidityReport {
    pub fn has_critical(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| w.severity == Severity::Critical)
    }
}

pub fn days_in_month(year: i32, month: u32) -> EngineResult<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        EngineError::out_of_range("month", format!("{year}-{month} is not a calendar month"))
    })?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match next {
        Some(next) => Ok(next.signed_duration_since(first).num_days() as u32),
        None => Ok(31 - first.day0()),
    }
}

/// Day-by-day cash position inside one projected month, starting from that
/// month's opening cash. Nothing carries over between months.
pub fn analyze_liquidity(
    month: &ProjectionMonth,
    profile: &FinancialProfile,
    minimum_buffer: f64,
) -> EngineResult<LiquidityReport> {
    if !minimum_buffer.is_finite() {
        return Err(EngineError::out_of_range(
            "minimumBuffer",
            "must be a finite amount",
        ));
    }
    let last_day = days_in_month(month.year, month.month)?;
    let clamp = |day: u32| day.clamp(1, last_day);

    let mut events = collect_events(month, profile, clamp);
    // Stable: same-day events keep declaration order.
    events.sort_by_key(|e| e.day);

    let opening_balance = month.opening_cash;
    let mut balance = opening_balance;
    let mut min_balance = opening_balance;
    let mut min_balance_day = None;
    let mut warnings = Vec::new();

    for event in &mut events {
        balance += event.amount;
        event.balance_after = balance;

        if balance < min_balance {
            min_balance = balance;
            min_balance_day = Some(event.day);
        }
        if balance < minimum_buffer {
            let severity = if balance < 0.0 {
                Severity::Critical
            } else {
                Severity::Warning
            };
            warnings.push(LiquidityWarning {
                day: event.day,
                balance,
                severity,
                description: format!("{} leaves {balance:.2}", event.description),
            });
        }
    }

    let daily_balances = end_of_day_balances(opening_balance, &events, last_day);

    Ok(LiquidityReport {
        year: month.year,
        month: month.month,
        opening_balance,
        closing_balance: balance,
        events,
        daily_balances,
        min_balance,
        min_balance_day,
        warnings,
    })
}

fn collect_events(
    month: &ProjectionMonth,
    profile: &FinancialProfile,
    clamp: impl Fn(u32) -> u32,
) -> Vec<LiquidityEvent> {
    // Flows in a month whose salary has already been received are settled before
    // the projection starts; only the opening balance remains.
    if month.salary_already_received {
        return Vec::new();
    }

    let mut events = Vec::new();
    let mut push = |day: u32, amount: f64, category: LiquidityCategory, description: String| {
        events.push(LiquidityEvent {
            day: clamp(day),
            amount,
            category,
            description,
            balance_after: 0.0,
        });
    };

    let inflow = month.take_home + month.bonus;
    if inflow > 0.0 {
        let description = match &month.bonus_source {
            Some(source) if month.bonus > 0.0 => format!("Salary + {source}"),
            _ => "Salary".to_string(),
        };
        push(
            profile.income.salary_day,
            inflow,
            LiquidityCategory::Salary,
            description,
        );
    }

    for expense in &profile.recurring_expenses {
        push(
            expense.due_day,
            -(expense.amount * month.expense_growth_factor),
            LiquidityCategory::Expense,
            expense.name.clone(),
        );
    }

    if month.loan_payment > 0.0 {
        push(
            LOAN_PAYMENT_DAY,
            -month.loan_payment,
            LiquidityCategory::Loan,
            "Loan payment".to_string(),
        );
    }

    for item in profile
        .one_off_spending
        .iter()
        .filter(|s| s.year == month.year && s.month == month.month)
    {
        let description = if item.name.is_empty() {
            "One-off spending".to_string()
        } else {
            item.name.clone()
        };
        push(item.day, -item.amount, LiquidityCategory::Expense, description);
    }

    events
}

fn end_of_day_balances(opening: f64, events: &[LiquidityEvent], last_day: u32) -> Vec<DailyBalance> {
    let mut balance = opening;
    let mut pending = events.iter().peekable();
    (1..=last_day)
        .map(|day| {
            while let Some(event) = pending.next_if(|e| e.day == day) {
                balance = event.balance_after;
            }
            DailyBalance { day, balance }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OneOffSpending, RecurringExpense, SubAccounts};

    fn month(opening_cash: f64, take_home: f64) -> ProjectionMonth {
        ProjectionMonth {
            index: 1,
            year: 2025,
            month: 2,
            label: "Feb 2025".to_string(),
            age: 30,
            gross_salary: take_home,
            take_home,
            employee_contribution: 0.0,
            employer_contribution: 0.0,
            contribution_allocation: SubAccounts::default(),
            recurring_expenses: 0.0,
            expense_growth_factor: 1.0,
            yearly_expenses: 0.0,
            one_off_spending: 0.0,
            expense_total: 0.0,
            bonus: 0.0,
            bonus_source: None,
            loan_payment: 0.0,
            loan_interest: 0.0,
            loan_principal: 0.0,
            loan_balance: 0.0,
            investment_return: 0.0,
            retirement_interest: 0.0,
            net_cash_change: 0.0,
            opening_cash,
            cash: opening_cash,
            retirement: SubAccounts::default(),
            retirement_total: 0.0,
            net_worth: opening_cash,
            salary_already_received: false,
            milestones: Vec::new(),
        }
    }

    fn profile_with_rent(rent: f64) -> FinancialProfile {
        let mut profile = FinancialProfile::default();
        profile.income.salary_day = 25;
        profile.recurring_expenses.push(RecurringExpense {
            name: "Rent".to_string(),
            amount: rent,
            due_day: 1,
        });
        profile
    }

    #[test]
    fn rent_before_payday_is_critical_on_day_one() {
        let report =
            analyze_liquidity(&month(500.0, 3_000.0), &profile_with_rent(700.0), 0.0).expect("ok");

        assert_eq!(report.warnings.len(), 1);
        let warning = &report.warnings[0];
        assert_eq!(warning.day, 1);
        assert_eq!(warning.severity, Severity::Critical);
        assert!((warning.balance + 200.0).abs() < 1e-9);
        assert_eq!(report.min_balance_day, Some(1));
        assert!((report.min_balance + 200.0).abs() < 1e-9);

        let payday = &report.daily_balances[24];
        assert_eq!(payday.day, 25);
        assert!((payday.balance - 2_800.0).abs() < 1e-9);
        assert!((report.closing_balance - 2_800.0).abs() < 1e-9);
    }

    #[test]
    fn balance_below_buffer_but_positive_is_a_warning() {
        let report =
            analyze_liquidity(&month(1_000.0, 3_000.0), &profile_with_rent(700.0), 500.0)
                .expect("ok");
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].severity, Severity::Warning);
        assert!(!report.has_critical());
    }

    #[test]
    fn every_breaching_event_is_reported() {
        let mut profile = profile_with_rent(300.0);
        profile.recurring_expenses.push(RecurringExpense {
            name: "Utilities".to_string(),
            amount: 100.0,
            due_day: 3,
        });
        let report = analyze_liquidity(&month(350.0, 3_000.0), &profile, 100.0).expect("ok");
        let days: Vec<u32> = report.warnings.iter().map(|w| w.day).collect();
        assert_eq!(days, vec![1, 3]);
        assert_eq!(report.warnings[1].severity, Severity::Critical);
    }

    #[test]
    fn same_day_events_keep_declaration_order() {
        let mut profile = FinancialProfile::default();
        profile.income.salary_day = 10;
        for (name, amount) in [("Gym", 50.0), ("Phone", 30.0), ("Insurance", 200.0)] {
            profile.recurring_expenses.push(RecurringExpense {
                name: name.to_string(),
                amount,
                due_day: 10,
            });
        }
        let report = analyze_liquidity(&month(0.0, 1_000.0), &profile, 0.0).expect("ok");
        let names: Vec<&str> = report.events.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(names, vec!["Salary", "Gym", "Phone", "Insurance"]);
    }

    #[test]
    fn loan_lands_on_day_one_and_expenses_scale_with_growth() {
        let mut projected = month(2_000.0, 0.0);
        projected.loan_payment = 500.0;
        projected.expense_growth_factor = 1.1;
        let mut profile = profile_with_rent(1_000.0);
        profile.recurring_expenses[0].due_day = 15;

        let report = analyze_liquidity(&projected, &profile, 0.0).expect("ok");
        assert_eq!(report.events[0].category, LiquidityCategory::Loan);
        assert_eq!(report.events[0].day, 1);
        assert!((report.events[1].amount + 1_100.0).abs() < 1e-9);
        assert!((report.closing_balance - 400.0).abs() < 1e-9);
    }

    #[test]
    fn days_past_month_end_are_clamped() {
        let mut profile = profile_with_rent(100.0);
        profile.recurring_expenses[0].due_day = 31;
        profile.one_off_spending.push(OneOffSpending {
            name: String::new(),
            year: 2025,
            month: 2,
            day: 30,
            amount: 50.0,
        });
        profile.one_off_spending.push(OneOffSpending {
            name: "Other month".to_string(),
            year: 2025,
            month: 3,
            day: 1,
            amount: 999.0,
        });

        let report = analyze_liquidity(&month(1_000.0, 0.0), &profile, 0.0).expect("ok");
        assert_eq!(report.daily_balances.len(), 28);
        assert!(report.events.iter().all(|e| e.day == 28));
        assert_eq!(report.events[1].description, "One-off spending");
        assert!((report.closing_balance - 850.0).abs() < 1e-9);
    }

    #[test]
    fn settled_month_has_no_events() {
        let mut projected = month(800.0, 3_000.0);
        projected.salary_already_received = true;
        let report = analyze_liquidity(&projected, &profile_with_rent(700.0), 0.0).expect("ok");
        assert!(report.events.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.min_balance_day, None);
        assert!(report.daily_balances.iter().all(|d| d.balance == 800.0));
    }

    #[test]
    fn month_lengths_follow_the_calendar() {
        assert_eq!(days_in_month(2024, 2), Ok(29));
        assert_eq!(days_in_month(2025, 2), Ok(28));
        assert_eq!(days_in_month(2025, 12), Ok(31));
        assert_eq!(days_in_month(2025, 4), Ok(30));
        assert!(days_in_month(2025, 13).is_err());
    }
}
