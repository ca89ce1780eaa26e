use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::safe_ratio;
use super::types::{MilestoneHit, MilestoneKind, Projection, ProjectionMonth};

pub const NOT_WITHIN_PROJECTION: &str = "Not within projection";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MilestoneCategory {
    Loan,
    SavingsGoal,
    Retirement,
    Custom,
}

impl MilestoneCategory {
    pub const ALL: [MilestoneCategory; 4] = [
        MilestoneCategory::Loan,
        MilestoneCategory::SavingsGoal,
        MilestoneCategory::Retirement,
        MilestoneCategory::Custom,
    ];
}

/// Projected quantity a user goal is measured against.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "camelCase")]
pub enum GoalTarget {
    NetWorth(f64),
    LiquidCash(f64),
    RetirementBalance(f64),
}

impl GoalTarget {
    pub fn amount(self) -> f64 {
        match self {
            GoalTarget::NetWorth(v) | GoalTarget::LiquidCash(v) | GoalTarget::RetirementBalance(v) => v,
        }
    }

    fn measure(self, month: &ProjectionMonth) -> f64 {
        match self {
            GoalTarget::NetWorth(_) => month.net_worth,
            GoalTarget::LiquidCash(_) => month.cash,
            GoalTarget::RetirementBalance(_) => month.retirement_total,
        }
    }
}

/// Goal fields as entered by the user, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalDraft {
    pub title: String,
    #[serde(default = "custom_category")]
    pub category: MilestoneCategory,
    #[serde(default)]
    pub target_description: String,
    #[serde(default)]
    pub target: Option<GoalTarget>,
    #[serde(default)]
    pub completed: bool,
}

fn custom_category() -> MilestoneCategory {
    MilestoneCategory::Custom
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGoal {
    pub id: String,
    #[serde(flatten)]
    pub draft: GoalDraft,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub title: String,
    pub category: MilestoneCategory,
    pub target_description: String,
    pub reached: Option<MilestoneHit>,
    pub completed: bool,
    pub progress_pct: f64,
    pub system: bool,
    pub months_until: Option<u32>,
    pub time_remaining: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GoalError {
    #[error("goal title must not be empty")]
    EmptyTitle,
    #[error("goal target must be a finite amount >= 0, got {0}")]
    InvalidTarget(f64),
    #[error("no goal with id `{0}`")]
    NotFound(String),
}

/// Owns user-authored goals. System milestones are never stored here; they are
/// rebuilt from each projection by [`derive_milestones`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneBook {
    goals: Vec<UserGoal>,
    next_id: u64,
}

impl MilestoneBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn goals(&self) -> &[UserGoal] {
        &self.goals
    }

    pub fn get(&self, id: &str) -> Option<&UserGoal> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn create(&mut self, draft: GoalDraft) -> Result<&UserGoal, GoalError> {
        validate_draft(&draft)?;
        self.next_id += 1;
        let id = format!("goal-{}", self.next_id);
        self.goals.push(UserGoal { id, draft });
        let index = self.goals.len() - 1;
        Ok(&self.goals[index])
    }

    pub fn edit(&mut self, id: &str, draft: GoalDraft) -> Result<&UserGoal, GoalError> {
        validate_draft(&draft)?;
        let goal = self
            .goals
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| GoalError::NotFound(id.to_string()))?;
        goal.draft = draft;
        Ok(&*goal)
    }

    pub fn delete(&mut self, id: &str) -> Result<UserGoal, GoalError> {
        let position = self
            .goals
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| GoalError::NotFound(id.to_string()))?;
        Ok(self.goals.remove(position))
    }
}

fn validate_draft(draft: &GoalDraft) -> Result<(), GoalError> {
    if draft.title.trim().is_empty() {
        return Err(GoalError::EmptyTitle);
    }
    if let Some(target) = draft.target {
        let amount = target.amount();
        if !amount.is_finite() || amount < 0.0 {
            return Err(GoalError::InvalidTarget(amount));
        }
    }
    Ok(())
}

/// System milestones regenerated from `projection`, followed by user goals in
/// the order they were created.
pub fn derive_milestones(projection: &Projection, goals: &[UserGoal]) -> Vec<Milestone> {
    let mut out = system_milestones(projection);
    out.extend(goals.iter().map(|goal| user_milestone(projection, goal)));
    out
}

fn system_milestones(projection: &Projection) -> Vec<Milestone> {
    let meta = &projection.metadata;
    let last = projection.last();
    let mut out = Vec::new();

    if meta.initial_loan_balance > 0.0 {
        let repaid = last.map_or(0.0, |m| meta.initial_loan_balance - m.loan_balance);
        let target_description = if meta.loan_non_convergent {
            "Scheduled payment does not cover the interest".to_string()
        } else {
            format!("Repay {:.2}", meta.initial_loan_balance)
        };
        out.push(system_milestone(
            projection,
            MilestoneKind::LoanPaidOff,
            "Loan paid off",
            target_description,
            ratio_pct(repaid, meta.initial_loan_balance),
        ));
    }

    if let Some(goal) = meta.savings_goal {
        let cash = last.map_or(meta.initial_cash, |m| m.cash);
        out.push(system_milestone(
            projection,
            MilestoneKind::SavingsGoalReached,
            "Savings goal reached",
            format!("Liquid cash of {goal:.2}"),
            ratio_pct(cash, goal),
        ));
    }

    if let Some(age) = meta.retirement_age {
        let current = last.map_or(0.0, |m| m.age as f64);
        out.push(system_milestone(
            projection,
            MilestoneKind::RetirementAgeReached,
            "Retirement age reached",
            format!("Turn {age}"),
            ratio_pct(current, age as f64),
        ));
    }

    out
}

fn system_milestone(
    projection: &Projection,
    kind: MilestoneKind,
    title: &str,
    target_description: String,
    horizon_progress: f64,
) -> Milestone {
    let (category, id) = match kind {
        MilestoneKind::LoanPaidOff => (MilestoneCategory::Loan, "system-loan-paid-off"),
        MilestoneKind::SavingsGoalReached => {
            (MilestoneCategory::SavingsGoal, "system-savings-goal")
        }
        MilestoneKind::RetirementAgeReached => {
            (MilestoneCategory::Retirement, "system-retirement-age")
        }
    };
    let reached = projection.milestones.get(kind).cloned();
    finish(
        id.to_string(),
        title.to_string(),
        category,
        target_description,
        reached,
        false,
        horizon_progress,
        true,
    )
}

fn user_milestone(projection: &Projection, goal: &UserGoal) -> Milestone {
    let draft = &goal.draft;
    let (reached, progress) = match draft.target {
        Some(target) => {
            let amount = target.amount();
            let reached = projection
                .months
                .iter()
                .find(|m| target.measure(m) >= amount)
                .map(|m| MilestoneHit {
                    index: m.index,
                    year: m.year,
                    month: m.month,
                    label: m.label.clone(),
                });
            let at_horizon = projection.last().map_or(0.0, |m| target.measure(m));
            (reached, ratio_pct(at_horizon, amount))
        }
        None => (None, 0.0),
    };
    finish(
        goal.id.clone(),
        draft.title.clone(),
        draft.category,
        draft.target_description.clone(),
        reached,
        draft.completed,
        progress,
        false,
    )
}

#[allow(clippy::too_many_arguments)]
fn finish(
    id: String,
    title: String,
    category: MilestoneCategory,
    target_description: String,
    reached: Option<MilestoneHit>,
    marked_complete: bool,
    horizon_progress: f64,
    system: bool,
) -> Milestone {
    let completed = marked_complete || reached.is_some();
    let progress_pct = if completed { 100.0 } else { horizon_progress };
    let months_until = if marked_complete {
        Some(0)
    } else {
        reached.as_ref().map(|hit| hit.index)
    };
    Milestone {
        id,
        title,
        category,
        target_description,
        reached,
        completed,
        progress_pct,
        system,
        months_until,
        time_remaining: format_time_remaining(months_until),
    }
}

/// Percentage of `target` achieved, clamped to `[0, 100]`. A zero or negative
/// target counts as already met.
fn ratio_pct(achieved: f64, target: f64) -> f64 {
    let ratio = if target < 0.0 {
        1.0
    } else {
        safe_ratio(achieved, target, 1.0)
    };
    (ratio * 100.0).clamp(0.0, 100.0)
}

/// "2 years 3 months", "1 year", "5 months"; `None` is outside the horizon.
pub fn format_time_remaining(months: Option<u32>) -> String {
    let Some(months) = months else {
        return NOT_WITHIN_PROJECTION.to_string();
    };
    if months == 0 {
        return "0 months".to_string();
    }
    let plural = |n: u32, unit: &str| {
        if n == 1 {
            format!("{n} {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };
    let years = months / 12;
    let rest = months % 12;
    match (years, rest) {
        (0, m) => plural(m, "month"),
        (y, 0) => plural(y, "year"),
        (y, m) => format!("{} {}", plural(y, "year"), plural(m, "month")),
    }
}

/// Category view over milestones. Either "all" is active or at least one
/// category is; the two never coexist. Only built through its methods, so it is
/// serialized for responses but never deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneFilter {
    all: bool,
    categories: BTreeSet<MilestoneCategory>,
}

impl Default for MilestoneFilter {
    fn default() -> Self {
        Self {
            all: true,
            categories: BTreeSet::new(),
        }
    }
}

impl MilestoneFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_categories(categories: impl IntoIterator<Item = MilestoneCategory>) -> Self {
        let mut filter = Self::default();
        for category in categories {
            filter.select(category);
        }
        filter
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn categories(&self) -> impl Iterator<Item = MilestoneCategory> + '_ {
        self.categories.iter().copied()
    }

    pub fn select_all(&mut self) {
        self.all = true;
        self.categories.clear();
    }

    pub fn select(&mut self, category: MilestoneCategory) {
        self.all = false;
        self.categories.insert(category);
    }

    /// Toggling off the last category falls back to "all".
    pub fn toggle(&mut self, category: MilestoneCategory) {
        if self.categories.remove(&category) {
            if self.categories.is_empty() {
                self.all = true;
            }
        } else {
            self.select(category);
        }
    }

    pub fn matches(&self, category: MilestoneCategory) -> bool {
        self.all || self.categories.contains(&category)
    }

    pub fn apply<'a>(&self, milestones: &'a [Milestone]) -> Vec<&'a Milestone> {
        milestones.iter().filter(|m| self.matches(m.category)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ProjectionMetadata, ProjectionMilestones, SubAccounts};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn month(index: u32, cash: f64, loan_balance: f64, age: i32) -> ProjectionMonth {
        ProjectionMonth {
            index,
            year: 2025,
            month: index,
            label: format!("M{index}"),
            age,
            gross_salary: 0.0,
            take_home: 0.0,
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
            loan_balance,
            investment_return: 0.0,
            retirement_interest: 0.0,
            net_cash_change: 0.0,
            opening_cash: cash,
            cash,
            retirement: SubAccounts::default(),
            retirement_total: 1_000.0 * index as f64,
            net_worth: cash - loan_balance,
            salary_already_received: false,
            milestones: Vec::new(),
        }
    }

    fn hit(index: u32) -> MilestoneHit {
        MilestoneHit {
            index,
            year: 2025,
            month: index,
            label: format!("M{index}"),
        }
    }

    fn projection() -> Projection {
        let months = (1..=6)
            .map(|i| month(i, 1_000.0 * i as f64, (4_000.0 - 1_000.0 * i as f64).max(0.0), 40))
            .collect();
        Projection {
            months,
            milestones: ProjectionMilestones {
                loan_paid_off: Some(hit(4)),
                savings_goal_reached: None,
                retirement_age_reached: None,
            },
            metadata: ProjectionMetadata {
                initial_loan_balance: 4_000.0,
                savings_goal: Some(10_000.0),
                retirement_age: Some(65),
                ..ProjectionMetadata::default()
            },
        }
    }

    fn draft(title: &str, target: Option<GoalTarget>) -> GoalDraft {
        GoalDraft {
            title: title.to_string(),
            category: MilestoneCategory::Custom,
            target_description: String::new(),
            target,
            completed: false,
        }
    }

    #[test]
    fn time_remaining_formats_years_and_months() {
        assert_eq!(format_time_remaining(None), "Not within projection");
        assert_eq!(format_time_remaining(Some(0)), "0 months");
        assert_eq!(format_time_remaining(Some(1)), "1 month");
        assert_eq!(format_time_remaining(Some(11)), "11 months");
        assert_eq!(format_time_remaining(Some(12)), "1 year");
        assert_eq!(format_time_remaining(Some(13)), "1 year 1 month");
        assert_eq!(format_time_remaining(Some(26)), "2 years 2 months");
        assert_eq!(format_time_remaining(Some(36)), "3 years");
    }

    #[test]
    fn system_milestones_come_from_the_projection() {
        let milestones = derive_milestones(&projection(), &[]);
        assert_eq!(milestones.len(), 3);

        let loan = &milestones[0];
        assert_eq!(loan.category, MilestoneCategory::Loan);
        assert!(loan.system && loan.completed);
        assert_eq!(loan.progress_pct, 100.0);
        assert_eq!(loan.months_until, Some(4));
        assert_eq!(loan.time_remaining, "4 months");

        let savings = &milestones[1];
        assert!(!savings.completed);
        assert_eq!(savings.reached, None);
        assert!((savings.progress_pct - 60.0).abs() < 1e-9);
        assert_eq!(savings.time_remaining, NOT_WITHIN_PROJECTION);

        let retirement = &milestones[2];
        assert_eq!(retirement.category, MilestoneCategory::Retirement);
        assert!(retirement.progress_pct < 100.0);
    }

    #[test]
    fn no_loan_means_no_loan_milestone() {
        let mut projection = projection();
        projection.metadata.initial_loan_balance = 0.0;
        projection.metadata.savings_goal = None;
        projection.metadata.retirement_age = None;
        assert!(derive_milestones(&projection, &[]).is_empty());
    }

    #[test]
    fn user_goals_survive_recomputation_and_resolve_targets() {
        let mut book = MilestoneBook::new();
        book.create(draft("Emergency fund", Some(GoalTarget::LiquidCash(3_000.0))))
            .expect("valid");
        book.create(draft("Travel", None)).expect("valid");

        let first = derive_milestones(&projection(), book.goals());
        let mut recomputed = projection();
        recomputed.milestones.loan_paid_off = None;
        let second = derive_milestones(&recomputed, book.goals());

        for milestones in [&first, &second] {
            let fund = milestones.iter().find(|m| m.title == "Emergency fund").expect("present");
            assert!(!fund.system);
            assert_eq!(fund.reached.as_ref().map(|h| h.index), Some(3));
            assert!(fund.completed);
            let travel = milestones.iter().find(|m| m.title == "Travel").expect("present");
            assert!(!travel.completed);
            assert_eq!(travel.progress_pct, 0.0);
        }
        assert!(!second[0].completed);
    }

    #[test]
    fn manually_completed_goal_needs_no_time() {
        let mut book = MilestoneBook::new();
        let mut done = draft("Quit smoking", None);
        done.completed = true;
        book.create(done).expect("valid");
        let milestones = derive_milestones(&Projection::empty(), book.goals());
        assert_eq!(milestones[0].time_remaining, "0 months");
        assert_eq!(milestones[0].progress_pct, 100.0);
    }

    #[test]
    fn book_supports_create_edit_delete() {
        let mut book = MilestoneBook::new();
        let id = book.create(draft("House", None)).expect("valid").id.clone();
        let other = book.create(draft("Car", None)).expect("valid").id.clone();
        assert_ne!(id, other);

        let edited = book
            .edit(&id, draft("House deposit", Some(GoalTarget::NetWorth(50_000.0))))
            .expect("exists");
        assert_eq!(edited.draft.title, "House deposit");

        let removed = book.delete(&id).expect("exists");
        assert_eq!(removed.id, id);
        assert_eq!(book.goals().len(), 1);
        assert_eq!(book.delete(&id), Err(GoalError::NotFound(id.clone())));

        // Ids are never reused after deletion.
        let again = book.create(draft("Boat", None)).expect("valid").id.clone();
        assert_ne!(again, id);
    }

    #[test]
    fn book_rejects_invalid_goals() {
        let mut book = MilestoneBook::new();
        assert_eq!(book.create(draft("  ", None)), Err(GoalError::EmptyTitle));
        assert!(matches!(
            book.create(draft("Bad", Some(GoalTarget::NetWorth(-1.0)))),
            Err(GoalError::InvalidTarget(_))
        ));
        assert!(book.goals().is_empty());
    }

    #[test]
    fn filter_all_and_categories_are_exclusive() {
        let mut filter = MilestoneFilter::new();
        assert!(filter.is_all());

        filter.select(MilestoneCategory::Loan);
        assert!(!filter.is_all());
        assert!(filter.matches(MilestoneCategory::Loan));
        assert!(!filter.matches(MilestoneCategory::Custom));

        filter.select_all();
        assert!(filter.is_all());
        assert_eq!(filter.categories().count(), 0);

        filter.toggle(MilestoneCategory::Custom);
        filter.toggle(MilestoneCategory::Custom);
        assert!(filter.is_all());
    }

    #[test]
    fn progress_is_clamped_and_empty_targets_count_as_met() {
        assert!((ratio_pct(50.0, 200.0) - 25.0).abs() < 1e-9);
        assert_eq!(ratio_pct(300.0, 200.0), 100.0);
        assert_eq!(ratio_pct(-5.0, 200.0), 0.0);
        assert_eq!(ratio_pct(0.0, 0.0), 100.0);
        assert_eq!(ratio_pct(10.0, -1.0), 100.0);
    }

    #[test]
    fn filter_serializes_only_consistent_states() {
        let all = serde_json::to_value(MilestoneFilter::new()).expect("serialize");
        assert_eq!(all, serde_json::json!({ "all": true, "categories": [] }));

        let mut filter = MilestoneFilter::from_categories([MilestoneCategory::Loan]);
        let picked = serde_json::to_value(&filter).expect("serialize");
        assert_eq!(picked, serde_json::json!({ "all": false, "categories": ["loan"] }));

        filter.toggle(MilestoneCategory::Loan);
        assert_eq!(filter, MilestoneFilter::new());
    }

    #[test]
    fn filter_does_not_remove_data() {
        let milestones = derive_milestones(&projection(), &[]);
        let filter = MilestoneFilter::from_categories([MilestoneCategory::SavingsGoal]);
        let view = filter.apply(&milestones);
        assert_eq!(view.len(), 1);
        assert_eq!(milestones.len(), 3);
    }

    fn category(n: u8) -> MilestoneCategory {
        MilestoneCategory::ALL[n as usize % MilestoneCategory::ALL.len()]
    }

    proptest! {
        #[test]
        fn prop_filter_is_never_empty(ops in proptest::collection::vec((0u8..3, 0u8..4), 0..40)) {
            let mut filter = MilestoneFilter::new();
            for (op, n) in ops {
                match op {
                    0 => filter.select_all(),
                    1 => filter.select(category(n)),
                    _ => filter.toggle(category(n)),
                }
                let active = filter.categories().count();
                prop_assert!(filter.is_all() != (active > 0));
            }
        }

        #[test]
        fn prop_time_remaining_round_trips_month_count(months in 1u32..1_200) {
            let text = format_time_remaining(Some(months));
            let mut parts = text.split_whitespace();
            let mut total = 0;
            while let (Some(n), Some(unit)) = (parts.next(), parts.next()) {
                let n: u32 = n.parse().expect("number");
                total += if unit.starts_with("year") { n * 12 } else { n };
            }
            prop_assert_eq!(total, months);
        }
    }
}
