use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Datelike, NaiveDate};

use super::amortization::{AmortizationStep, amortize_month, months_to_payoff};
use super::contribution::{ContributionConfig, ContributionSplit, compute_contribution};
use super::error::{EngineError, EngineResult};
use super::types::{
    BonusAmount, FinancialProfile, MilestoneHit, MilestoneKind, Projection, ProjectionMetadata,
    ProjectionMilestones, ProjectionMonth, ProjectionSettings, SalaryAdjustment, SubAccounts,
    YearMonth,
};

const TRADITIONAL_BONUS_SOURCE: &str = "Traditional bonus";

/// Longest horizon a projection accepts.
pub const MAX_PROJECTION_YEARS: u32 = 100;

/// Validated, defaulted view of the inputs the loop needs every month.
#[derive(Debug)]
struct Plan<'a> {
    profile: &'a FinancialProfile,
    settings: &'a ProjectionSettings,
    birth: YearMonth,
    start: YearMonth,
    base_salary: f64,
    months_requested: u32,
    adjustments: Vec<&'a SalaryAdjustment>,
    salary_already_received: bool,
    rates: MonthlyRates,
}

#[derive(Debug, Clone, Copy)]
struct MonthlyRates {
    salary_growth: f64,
    expense_growth: f64,
    investment_return: f64,
    retirement_interest: f64,
}

#[derive(Debug)]
struct RunningState {
    salary_baseline: f64,
    expense_factor: f64,
    cash: f64,
    retirement: SubAccounts,
    loan_balance: f64,
    bonus_year: i32,
    traditional_bonuses_paid: u32,
}

#[derive(Debug, Default)]
struct MilestoneTracker {
    loan_paid_off: Option<MilestoneHit>,
    savings_goal_reached: Option<MilestoneHit>,
    retirement_age_reached: Option<MilestoneHit>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CashEvents {
    recurring: f64,
    yearly: f64,
    one_off: f64,
}

impl CashEvents {
    fn total(self) -> f64 {
        self.recurring + self.yearly + self.one_off
    }
}

/// Everything that moves cash or contributions in a month, before balances update.
#[derive(Debug, Default)]
struct MonthFlows {
    gross_salary: f64,
    contribution: ContributionSplit,
    bonus: f64,
    bonus_source: Option<String>,
    events: CashEvents,
    loan_step: AmortizationStep,
}

pub fn project(
    profile: &FinancialProfile,
    settings: &ProjectionSettings,
    config: &ContributionConfig,
    today: NaiveDate,
) -> EngineResult<Projection> {
    run_projection(profile, settings, config, today, None)
}

/// Same as [`project`] but stops with [`EngineError::Cancelled`] once `cancel` is
/// observed set between two months.
pub fn project_cancellable(
    profile: &FinancialProfile,
    settings: &ProjectionSettings,
    config: &ContributionConfig,
    today: NaiveDate,
    cancel: &AtomicBool,
) -> EngineResult<Projection> {
    run_projection(profile, settings, config, today, Some(cancel))
}

/// Converts an annual rate into the geometric monthly rate that compounds back to it.
pub fn monthly_rate(annual: f64) -> f64 {
    (1.0 + annual).powf(1.0 / 12.0) - 1.0
}

/// Whole years between `birth` and `at`; negative when `at` precedes the birth month.
pub fn age_at(birth: YearMonth, at: YearMonth) -> i32 {
    at.months_since(birth).div_euclid(12) as i32
}

fn run_projection(
    profile: &FinancialProfile,
    settings: &ProjectionSettings,
    config: &ContributionConfig,
    today: NaiveDate,
    cancel: Option<&AtomicBool>,
) -> EngineResult<Projection> {
    let plan = build_plan(profile, settings, today)?;
    let personal = &profile.personal;

    let mut state = RunningState {
        salary_baseline: plan.base_salary,
        expense_factor: 1.0,
        cash: personal.liquid_cash,
        retirement: personal.retirement_balances,
        loan_balance: personal.loan_balance,
        bonus_year: plan.start.year,
        traditional_bonuses_paid: 0,
    };
    let mut tracker = MilestoneTracker::default();
    let mut months = Vec::with_capacity(plan.months_requested as usize);
    let mut early_exit_at: Option<u32> = None;

    for offset in 0..plan.months_requested {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(EngineError::Cancelled {
                completed_months: offset,
            });
        }

        let row = simulate_month(&plan, config, &mut state, &mut tracker, offset)?;
        let index = row.index;
        months.push(row);

        if let Some(extra) = settings.early_exit_after {
            if early_exit_at.is_none()
                && tracker.loan_paid_off.is_some()
                && tracker.savings_goal_reached.is_some()
            {
                early_exit_at = Some(index + extra);
            }
        }
        if early_exit_at.is_some_and(|stop| index >= stop) {
            break;
        }
    }

    let metadata = build_metadata(&plan, &months);
    log::debug!(
        "projected {} of {} months from {} (loan payoff: {:?}, savings goal: {:?})",
        metadata.months_emitted,
        metadata.months_requested,
        metadata.start_label,
        tracker.loan_paid_off.as_ref().map(|hit| hit.index),
        tracker.savings_goal_reached.as_ref().map(|hit| hit.index),
    );

    Ok(Projection {
        months,
        milestones: ProjectionMilestones {
            loan_paid_off: tracker.loan_paid_off,
            savings_goal_reached: tracker.savings_goal_reached,
            retirement_age_reached: tracker.retirement_age_reached,
        },
        metadata,
    })
}

fn simulate_month(
    plan: &Plan<'_>,
    config: &ContributionConfig,
    state: &mut RunningState,
    tracker: &mut MilestoneTracker,
    offset: u32,
) -> EngineResult<ProjectionMonth> {
    let at = plan.start.plus_months(offset);
    let index = offset + 1;

    if offset > 0 {
        state.salary_baseline *= 1.0 + plan.rates.salary_growth;
        state.expense_factor *= 1.0 + plan.rates.expense_growth;
    }
    if at.year != state.bonus_year {
        state.bonus_year = at.year;
        state.traditional_bonuses_paid = 0;
    }

    let age = age_at(plan.birth, at);
    let cash_flows_settled = offset == 0 && plan.salary_already_received;

    let opening_cash = state.cash;
    let opening_retirement = state.retirement;
    let investment_return = opening_cash.max(0.0) * plan.rates.investment_return;
    let retirement_interest = opening_retirement.scaled(plan.rates.retirement_interest);

    let flows = if cash_flows_settled {
        MonthFlows::default()
    } else {
        resolve_flows(plan, config, state, at, age)?
    };
    let MonthFlows {
        gross_salary,
        contribution,
        bonus,
        bonus_source,
        events,
        loan_step,
    } = flows;

    let take_home = gross_salary - contribution.employee;
    let net_cash_change = take_home - events.recurring + bonus
        - events.one_off
        - events.yearly
        - loan_step.payment;

    state.cash = opening_cash + investment_return + net_cash_change;
    state.retirement = opening_retirement
        .plus(retirement_interest)
        .plus(contribution.allocation);
    if !cash_flows_settled && state.loan_balance > 0.0 {
        state.loan_balance = loan_step.new_balance;
    }

    let reached = record_milestones(plan, state, tracker, at, index, age);
    let retirement_total = state.retirement.total();

    Ok(ProjectionMonth {
        index,
        year: at.year,
        month: at.month,
        label: at.label(),
        age,
        gross_salary,
        take_home,
        employee_contribution: contribution.employee,
        employer_contribution: contribution.employer,
        contribution_allocation: contribution.allocation,
        recurring_expenses: events.recurring,
        expense_growth_factor: state.expense_factor,
        yearly_expenses: events.yearly,
        one_off_spending: events.one_off,
        expense_total: events.total(),
        bonus,
        bonus_source,
        loan_payment: loan_step.payment,
        loan_interest: loan_step.interest,
        loan_principal: loan_step.principal,
        loan_balance: state.loan_balance,
        investment_return,
        retirement_interest: retirement_interest.total(),
        net_cash_change,
        opening_cash,
        cash: state.cash,
        retirement: state.retirement,
        retirement_total,
        net_worth: state.cash + retirement_total - state.loan_balance,
        salary_already_received: cash_flows_settled,
        milestones: reached,
    })
}

fn resolve_flows(
    plan: &Plan<'_>,
    config: &ContributionConfig,
    state: &mut RunningState,
    at: YearMonth,
    age: i32,
) -> EngineResult<MonthFlows> {
    let gross_salary = resolve_salary(plan, state.salary_baseline, at);
    let contribution =
        compute_contribution(gross_salary, age, plan.profile.income.contribution, config)?;
    let (bonus, bonus_source) = resolve_bonus(plan, state, gross_salary, at);
    let events = resolve_cash_events(plan, state.expense_factor, at);
    let loan_step = amortize_month(
        state.loan_balance,
        plan.profile.personal.loan_monthly_payment,
        plan.profile.personal.loan_annual_rate,
    );
    Ok(MonthFlows {
        gross_salary,
        contribution,
        bonus,
        bonus_source,
        events,
        loan_step,
    })
}

fn resolve_salary(plan: &Plan<'_>, baseline: f64, at: YearMonth) -> f64 {
    plan.adjustments
        .iter()
        .rev()
        .find(|adj| adj.effective() <= at)
        .map(|adj| adj.new_salary)
        .unwrap_or(baseline)
}

fn resolve_bonus(
    plan: &Plan<'_>,
    state: &mut RunningState,
    salary: f64,
    at: YearMonth,
) -> (f64, Option<String>) {
    let explicit = plan
        .profile
        .bonuses
        .iter()
        .filter(|b| b.year == at.year && b.month == at.month)
        .collect::<Vec<_>>();
    if !explicit.is_empty() {
        let amount = explicit.iter().map(|b| b.amount).sum();
        let source = explicit
            .iter()
            .map(|b| {
                if b.description.trim().is_empty() {
                    "Bonus"
                } else {
                    b.description.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        return (amount, Some(source));
    }

    let policy = &plan.settings.bonus_policy;
    if policy.months.contains(&at.month) && state.traditional_bonuses_paid < policy.max_per_year {
        state.traditional_bonuses_paid += 1;
        let amount = match policy.amount {
            BonusAmount::Fixed(amount) => amount,
            BonusAmount::SalaryMultiple(multiple) => salary * multiple,
        };
        return (amount, Some(TRADITIONAL_BONUS_SOURCE.to_string()));
    }

    (0.0, None)
}

fn resolve_cash_events(plan: &Plan<'_>, expense_factor: f64, at: YearMonth) -> CashEvents {
    let profile = plan.profile;
    CashEvents {
        recurring: profile.recurring_expense_total() * expense_factor,
        yearly: profile
            .yearly_expenses
            .iter()
            .filter(|e| e.applies_to(at))
            .map(|e| e.amount)
            .sum(),
        one_off: profile
            .one_off_spending
            .iter()
            .filter(|s| s.year == at.year && s.month == at.month)
            .map(|s| s.amount)
            .sum(),
    }
}

fn record_milestones(
    plan: &Plan<'_>,
    state: &RunningState,
    tracker: &mut MilestoneTracker,
    at: YearMonth,
    index: u32,
    age: i32,
) -> Vec<MilestoneKind> {
    let hit = || MilestoneHit {
        index,
        year: at.year,
        month: at.month,
        label: at.label(),
    };
    let mut reached = Vec::new();

    if tracker.loan_paid_off.is_none()
        && plan.profile.personal.loan_balance > 0.0
        && state.loan_balance <= 0.0
    {
        tracker.loan_paid_off = Some(hit());
        reached.push(MilestoneKind::LoanPaidOff);
    }

    if let Some(goal) = plan.settings.savings_goal {
        if tracker.savings_goal_reached.is_none() && state.cash >= goal {
            tracker.savings_goal_reached = Some(hit());
            reached.push(MilestoneKind::SavingsGoalReached);
        }
    }

    if let Some(retirement_age) = plan.settings.retirement_age {
        if tracker.retirement_age_reached.is_none() && age >= retirement_age as i32 {
            tracker.retirement_age_reached = Some(hit());
            reached.push(MilestoneKind::RetirementAgeReached);
        }
    }

    reached
}

fn build_metadata(plan: &Plan<'_>, months: &[ProjectionMonth]) -> ProjectionMetadata {
    let personal = &plan.profile.personal;
    let (loan_months_to_payoff, loan_non_convergent) = if personal.loan_balance > 0.0 {
        match months_to_payoff(
            personal.loan_balance,
            personal.loan_monthly_payment,
            personal.loan_annual_rate,
        ) {
            // A settled first month skips its payment, so payoff lands a month later.
            Ok(n) => (Some(n + u32::from(plan.salary_already_received)), false),
            Err(err) => {
                log::debug!("loan does not amortize: {err}");
                (None, true)
            }
        }
    } else {
        (None, false)
    };

    let months_emitted = months.len() as u32;
    let end = months
        .last()
        .map(|m| m.calendar())
        .unwrap_or(plan.start);

    ProjectionMetadata {
        start_label: plan.start.label(),
        end_label: end.label(),
        months_requested: plan.months_requested,
        months_emitted,
        truncated_early: months_emitted < plan.months_requested,
        monthly_salary_growth: plan.rates.salary_growth,
        monthly_expense_growth: plan.rates.expense_growth,
        monthly_investment_return: plan.rates.investment_return,
        monthly_retirement_interest: plan.rates.retirement_interest,
        initial_cash: personal.liquid_cash,
        initial_retirement_total: personal.retirement_balances.total(),
        initial_loan_balance: personal.loan_balance,
        savings_goal: plan.settings.savings_goal,
        retirement_age: plan.settings.retirement_age,
        loan_months_to_payoff,
        loan_non_convergent,
    }
}

fn build_plan<'a>(
    profile: &'a FinancialProfile,
    settings: &'a ProjectionSettings,
    today: NaiveDate,
) -> EngineResult<Plan<'a>> {
    let birth = profile
        .personal
        .birth
        .ok_or(EngineError::MissingRequiredField("personal.birth"))?;
    let base_salary = profile
        .income
        .base_salary
        .ok_or(EngineError::MissingRequiredField("income.baseSalary"))?;
    let start = settings
        .start
        .ok_or(EngineError::MissingRequiredField("settings.start"))?;

    validate_profile(profile, base_salary)?;
    validate_settings(settings)?;
    check_month("personal.birth.month", birth)?;
    check_month("settings.start.month", start)?;

    let mut adjustments = profile.income.salary_adjustments.iter().collect::<Vec<_>>();
    adjustments.sort_by_key(|adj| adj.effective());

    let salary_already_received = today.year() == start.year
        && today.month() == start.month
        && today.day() > profile.income.salary_day;
    let months_requested = settings.years.checked_mul(12).ok_or_else(|| {
        EngineError::out_of_range("settings.years", "horizon overflows the month count")
    })?;

    Ok(Plan {
        profile,
        settings,
        birth,
        start,
        base_salary,
        months_requested,
        adjustments,
        salary_already_received,
        rates: MonthlyRates {
            salary_growth: monthly_rate(settings.salary_growth),
            expense_growth: monthly_rate(settings.expense_growth),
            investment_return: monthly_rate(settings.investment_return),
            retirement_interest: monthly_rate(settings.retirement_interest),
        },
    })
}

fn check_amount(field: impl Into<String>, value: f64) -> EngineResult<()> {
    let field = field.into();
    if !value.is_finite() {
        return Err(EngineError::out_of_range(field, format!("{value} is not finite")));
    }
    if value < 0.0 {
        return Err(EngineError::negative(field, value));
    }
    Ok(())
}

fn check_day(field: impl Into<String>, day: u32) -> EngineResult<()> {
    if !(1..=31).contains(&day) {
        return Err(EngineError::out_of_range(
            field,
            format!("day {day} must be between 1 and 31"),
        ));
    }
    Ok(())
}

fn check_month(field: impl Into<String>, at: YearMonth) -> EngineResult<()> {
    if !at.is_valid() {
        return Err(EngineError::out_of_range(
            field,
            format!("month {} must be between 1 and 12", at.month),
        ));
    }
    Ok(())
}

fn validate_profile(profile: &FinancialProfile, base_salary: f64) -> EngineResult<()> {
    let personal = &profile.personal;
    check_amount("income.baseSalary", base_salary)?;
    check_amount("personal.liquidCash", personal.liquid_cash)?;
    check_amount(
        "personal.retirementBalances.primary",
        personal.retirement_balances.primary,
    )?;
    check_amount(
        "personal.retirementBalances.secondary",
        personal.retirement_balances.secondary,
    )?;
    check_amount(
        "personal.retirementBalances.medical",
        personal.retirement_balances.medical,
    )?;
    check_amount("personal.loanBalance", personal.loan_balance)?;
    check_amount("personal.loanAnnualRate", personal.loan_annual_rate)?;
    check_amount("personal.loanMonthlyPayment", personal.loan_monthly_payment)?;

    let income = &profile.income;
    check_day("income.salaryDay", income.salary_day)?;
    if let super::types::ContributionBasis::FixedRates {
        employee_rate,
        employer_rate,
    } = income.contribution
    {
        for (field, rate) in [
            ("income.contribution.employeeRate", employee_rate),
            ("income.contribution.employerRate", employer_rate),
        ] {
            check_amount(field, rate)?;
            if rate > 1.0 {
                return Err(EngineError::out_of_range(
                    field,
                    format!("rate {rate} must be at most 1"),
                ));
            }
        }
    }
    for (idx, adj) in income.salary_adjustments.iter().enumerate() {
        check_amount(format!("income.salaryAdjustments[{idx}].newSalary"), adj.new_salary)?;
        check_month(
            format!("income.salaryAdjustments[{idx}].month"),
            adj.effective(),
        )?;
    }

    for (idx, expense) in profile.recurring_expenses.iter().enumerate() {
        check_amount(format!("recurringExpenses[{idx}].amount"), expense.amount)?;
        check_day(format!("recurringExpenses[{idx}].dueDay"), expense.due_day)?;
    }
    for (idx, bonus) in profile.bonuses.iter().enumerate() {
        check_amount(format!("bonuses[{idx}].amount"), bonus.amount)?;
        check_month(
            format!("bonuses[{idx}].month"),
            YearMonth::new(bonus.year, bonus.month),
        )?;
    }
    for (idx, expense) in profile.yearly_expenses.iter().enumerate() {
        check_amount(format!("yearlyExpenses[{idx}].amount"), expense.amount)?;
        check_month(
            format!("yearlyExpenses[{idx}].month"),
            YearMonth::new(expense.start_year, expense.month),
        )?;
        if expense.end_year.is_some_and(|end| end < expense.start_year) {
            return Err(EngineError::out_of_range(
                format!("yearlyExpenses[{idx}].endYear"),
                "end year precedes start year",
            ));
        }
    }
    for (idx, item) in profile.one_off_spending.iter().enumerate() {
        check_amount(format!("oneOffSpending[{idx}].amount"), item.amount)?;
        check_month(
            format!("oneOffSpending[{idx}].month"),
            YearMonth::new(item.year, item.month),
        )?;
        check_day(format!("oneOffSpending[{idx}].day"), item.day)?;
    }
    Ok(())
}

fn validate_settings(settings: &ProjectionSettings) -> EngineResult<()> {
    if settings.years == 0 {
        return Err(EngineError::out_of_range(
            "settings.years",
            "horizon must be at least one year",
        ));
    }
    if settings.years > MAX_PROJECTION_YEARS {
        return Err(EngineError::out_of_range(
            "settings.years",
            format!("horizon must be at most {MAX_PROJECTION_YEARS} years"),
        ));
    }
    for (field, rate) in [
        ("settings.salaryGrowth", settings.salary_growth),
        ("settings.expenseGrowth", settings.expense_growth),
        ("settings.investmentReturn", settings.investment_return),
        ("settings.retirementInterest", settings.retirement_interest),
    ] {
        if !rate.is_finite() || rate <= -1.0 {
            return Err(EngineError::out_of_range(
                field,
                format!("annual rate {rate} must be a finite value > -1"),
            ));
        }
    }
    if let Some(goal) = settings.savings_goal {
        check_amount("settings.savingsGoal", goal)?;
    }

    let policy = &settings.bonus_policy;
    for month in &policy.months {
        if !(1..=12).contains(month) {
            return Err(EngineError::out_of_range(
                "settings.bonusPolicy.months",
                format!("month {month} must be between 1 and 12"),
            ));
        }
    }
    match policy.amount {
        BonusAmount::Fixed(amount) => check_amount("settings.bonusPolicy.amount", amount)?,
        BonusAmount::SalaryMultiple(multiple) => {
            check_amount("settings.bonusPolicy.amount", multiple)?
        }
    }
    Ok(())
}
