mod amortization;
mod cache;
mod contribution;
mod engine;
mod error;
pub mod format;
mod formulas;
mod liquidity;
mod milestones;
mod types;

pub use amortization::{AmortizationStep, amortize_month, months_to_payoff};
pub use cache::{BoundedCache, FormulaCache, FormulaKey};
pub use contribution::{
    AgeTable, ContributionConfig, ContributionSplit, RatePair, compute_contribution,
};
pub use engine::{MAX_PROJECTION_YEARS, age_at, monthly_rate, project, project_cancellable};
pub use error::{EngineError, EngineResult};
pub use formulas::{
    AssetAllocation, CorpusEstimate, GrowthProjection, PortfolioStats, RetirementNeeds,
    compound_growth, portfolio_stats, required_contribution, retirement_corpus,
};
pub use liquidity::{
    DailyBalance, LiquidityCategory, LiquidityEvent, LiquidityReport, LiquidityWarning, Severity,
    analyze_liquidity, days_in_month,
};
pub use milestones::{
    GoalDraft, GoalError, GoalTarget, Milestone, MilestoneBook, MilestoneCategory,
    MilestoneFilter, NOT_WITHIN_PROJECTION, UserGoal, derive_milestones, format_time_remaining,
};
pub use types::{
    BonusAmount, BonusEvent, BonusPolicy, ContributionBasis, ContributionCategory,
    FinancialProfile, IncomeInfo, MilestoneHit, MilestoneKind, OneOffSpending, PersonalInfo,
    Projection, ProjectionMetadata, ProjectionMilestones, ProjectionMonth, ProjectionSettings,
    RecurringExpense, SalaryAdjustment, SubAccounts, YearMonth, YearlyExpense,
};
