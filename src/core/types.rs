use serde::{Deserialize, Serialize};

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Calendar month with 1-based `month`. All month arithmetic goes through the
/// ordinal so no calendar library is involved in the projection loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn ordinal(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    pub fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: ordinal.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn plus_months(self, months: u32) -> Self {
        Self::from_ordinal(self.ordinal() + months as i64)
    }

    pub fn months_since(self, earlier: YearMonth) -> i64 {
        self.ordinal() - earlier.ordinal()
    }

    pub fn is_valid(self) -> bool {
        (1..=12).contains(&self.month)
    }

    pub fn label(self) -> String {
        let name = MONTH_NAMES
            .get(self.month.saturating_sub(1) as usize)
            .copied()
            .unwrap_or("???");
        format!("{name} {}", self.year)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributionCategory {
    Citizen,
    PrFirstYear,
    PrSecondYear,
}

impl ContributionCategory {
    pub fn key(self) -> &'static str {
        match self {
            ContributionCategory::Citizen => "citizen",
            ContributionCategory::PrFirstYear => "pr-first-year",
            ContributionCategory::PrSecondYear => "pr-second-year",
        }
    }
}

/// How the employee/employer contribution rates are obtained for a profile.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContributionBasis {
    #[serde(rename_all = "camelCase")]
    Category { category: ContributionCategory },
    #[serde(rename_all = "camelCase")]
    FixedRates { employee_rate: f64, employer_rate: f64 },
}

impl Default for ContributionBasis {
    fn default() -> Self {
        ContributionBasis::Category {
            category: ContributionCategory::Citizen,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubAccounts {
    pub primary: f64,
    pub secondary: f64,
    pub medical: f64,
}

impl SubAccounts {
    pub fn total(self) -> f64 {
        self.primary + self.secondary + self.medical
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            primary: self.primary * factor,
            secondary: self.secondary * factor,
            medical: self.medical * factor,
        }
    }

    pub fn plus(self, other: SubAccounts) -> Self {
        Self {
            primary: self.primary + other.primary,
            secondary: self.secondary + other.secondary,
            medical: self.medical + other.medical,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonalInfo {
    pub birth: Option<YearMonth>,
    pub liquid_cash: f64,
    pub retirement_balances: SubAccounts,
    pub loan_balance: f64,
    pub loan_annual_rate: f64,
    pub loan_monthly_payment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryAdjustment {
    pub year: i32,
    pub month: u32,
    pub new_salary: f64,
}

impl SalaryAdjustment {
    pub fn effective(&self) -> YearMonth {
        YearMonth::new(self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeInfo {
    pub base_salary: Option<f64>,
    pub contribution: ContributionBasis,
    pub salary_day: u32,
    pub salary_adjustments: Vec<SalaryAdjustment>,
}

impl Default for IncomeInfo {
    fn default() -> Self {
        Self {
            base_salary: None,
            contribution: ContributionBasis::default(),
            salary_day: 25,
            salary_adjustments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringExpense {
    pub name: String,
    pub amount: f64,
    pub due_day: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusEvent {
    pub year: i32,
    pub month: u32,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
}

/// Expense that repeats every year in `month`, active from `start_year` through
/// `end_year` inclusive (open-ended when `end_year` is absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyExpense {
    #[serde(default)]
    pub name: String,
    pub month: u32,
    pub amount: f64,
    pub start_year: i32,
    #[serde(default)]
    pub end_year: Option<i32>,
}

impl YearlyExpense {
    pub fn applies_to(&self, at: YearMonth) -> bool {
        self.month == at.month
            && at.year >= self.start_year
            && self.end_year.is_none_or(|end| at.year <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneOffSpending {
    #[serde(default)]
    pub name: String,
    pub year: i32,
    pub month: u32,
    #[serde(default = "default_day")]
    pub day: u32,
    pub amount: f64,
}

fn default_day() -> u32 {
    1
}

/// Canonical profile consumed by the engine. Stored or legacy shapes are turned
/// into this by `api::migration` before the engine ever sees them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FinancialProfile {
    pub personal: PersonalInfo,
    pub income: IncomeInfo,
    pub recurring_expenses: Vec<RecurringExpense>,
    pub bonuses: Vec<BonusEvent>,
    pub yearly_expenses: Vec<YearlyExpense>,
    pub one_off_spending: Vec<OneOffSpending>,
}

impl FinancialProfile {
    pub fn recurring_expense_total(&self) -> f64 {
        self.recurring_expenses.iter().map(|e| e.amount).sum()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum BonusAmount {
    Fixed(f64),
    SalaryMultiple(f64),
}

/// Fallback bonus paid in `months` when no explicit bonus is scheduled, at most
/// `max_per_year` times per calendar year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BonusPolicy {
    pub months: Vec<u32>,
    pub max_per_year: u32,
    pub amount: BonusAmount,
}

impl Default for BonusPolicy {
    fn default() -> Self {
        Self {
            months: Vec::new(),
            max_per_year: 0,
            amount: BonusAmount::Fixed(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectionSettings {
    pub salary_growth: f64,
    pub expense_growth: f64,
    pub investment_return: f64,
    pub retirement_interest: f64,
    pub years: u32,
    pub bonus_policy: BonusPolicy,
    pub start: Option<YearMonth>,
    pub savings_goal: Option<f64>,
    pub retirement_age: Option<u32>,
    /// Stop this many months after both loan and savings milestones are found.
    pub early_exit_after: Option<u32>,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            salary_growth: 0.0,
            expense_growth: 0.0,
            investment_return: 0.0,
            retirement_interest: 0.0,
            years: 10,
            bonus_policy: BonusPolicy::default(),
            start: None,
            savings_goal: None,
            retirement_age: None,
            early_exit_after: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MilestoneKind {
    LoanPaidOff,
    SavingsGoalReached,
    RetirementAgeReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionMonth {
    pub index: u32,
    pub year: i32,
    pub month: u32,
    pub label: String,
    pub age: i32,
    pub gross_salary: f64,
    pub take_home: f64,
    pub employee_contribution: f64,
    pub employer_contribution: f64,
    pub contribution_allocation: SubAccounts,
    pub recurring_expenses: f64,
    pub expense_growth_factor: f64,
    pub yearly_expenses: f64,
    pub one_off_spending: f64,
    pub expense_total: f64,
    pub bonus: f64,
    pub bonus_source: Option<String>,
    pub loan_payment: f64,
    pub loan_interest: f64,
    pub loan_principal: f64,
    pub loan_balance: f64,
    pub investment_return: f64,
    pub retirement_interest: f64,
    pub net_cash_change: f64,
    pub opening_cash: f64,
    pub cash: f64,
    pub retirement: SubAccounts,
    pub retirement_total: f64,
    pub net_worth: f64,
    pub salary_already_received: bool,
    pub milestones: Vec<MilestoneKind>,
}

impl ProjectionMonth {
    pub fn calendar(&self) -> YearMonth {
        YearMonth::new(self.year, self.month)
    }

    pub fn contribution_total(&self) -> f64 {
        self.employee_contribution + self.employer_contribution
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneHit {
    pub index: u32,
    pub year: i32,
    pub month: u32,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionMilestones {
    pub loan_paid_off: Option<MilestoneHit>,
    pub savings_goal_reached: Option<MilestoneHit>,
    pub retirement_age_reached: Option<MilestoneHit>,
}

impl ProjectionMilestones {
    pub fn get(&self, kind: MilestoneKind) -> Option<&MilestoneHit> {
        match kind {
            MilestoneKind::LoanPaidOff => self.loan_paid_off.as_ref(),
            MilestoneKind::SavingsGoalReached => self.savings_goal_reached.as_ref(),
            MilestoneKind::RetirementAgeReached => self.retirement_age_reached.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionMetadata {
    pub start_label: String,
    pub end_label: String,
    pub months_requested: u32,
    pub months_emitted: u32,
    pub truncated_early: bool,
    pub monthly_salary_growth: f64,
    pub monthly_expense_growth: f64,
    pub monthly_investment_return: f64,
    pub monthly_retirement_interest: f64,
    pub initial_cash: f64,
    pub initial_retirement_total: f64,
    pub initial_loan_balance: f64,
    pub savings_goal: Option<f64>,
    pub retirement_age: Option<u32>,
    /// `None` when there is no loan or it never amortizes at the scheduled payment.
    pub loan_months_to_payoff: Option<u32>,
    pub loan_non_convergent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub months: Vec<ProjectionMonth>,
    pub milestones: ProjectionMilestones,
    pub metadata: ProjectionMetadata,
}

impl Projection {
    /// Placeholder shown when a projection cannot be computed.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&ProjectionMonth> {
        self.months.last()
    }
}
