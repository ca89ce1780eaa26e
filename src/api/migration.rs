//! Upgrades stored profiles to the canonical [`FinancialProfile`].
//!
//! Stored documents carry a numeric `version`. Each version has its own shape and a
//! pure step to the next one; documents without a `version` are already canonical.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::{
    BonusEvent, ContributionBasis, ContributionCategory, FinancialProfile, IncomeInfo,
    PersonalInfo, RecurringExpense, SubAccounts, YearMonth,
};

pub const CURRENT_VERSION: u64 = 3;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("unsupported profile version {0} (latest is {})", CURRENT_VERSION)]
    UnsupportedVersion(u64),
    #[error("profile `version` must be a positive integer")]
    InvalidVersion,
    #[error("malformed version {version} profile: {source}")]
    Malformed {
        version: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// First stored shape: flat fields, loan rate in percent, expenses without a due
/// day and a boolean for permanent-resident status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileV1 {
    pub birth_year: Option<i32>,
    pub birth_month: Option<u32>,
    pub salary: Option<f64>,
    pub permanent_resident: bool,
    pub savings: f64,
    pub retirement_primary: f64,
    pub retirement_secondary: f64,
    pub retirement_medical: f64,
    pub loan_balance: f64,
    pub loan_rate_pct: f64,
    pub loan_payment: f64,
    pub expenses: Vec<ExpenseV1>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpenseV1 {
    pub name: String,
    pub amount: f64,
}

/// Second stored shape: grouped sections, explicit category and salary day.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileV2 {
    pub personal: PersonalV2,
    pub income: IncomeV2,
    pub expenses: Vec<RecurringExpense>,
    pub bonuses: Vec<BonusEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonalV2 {
    pub birth: Option<YearMonth>,
    pub liquid_cash: f64,
    pub retirement: SubAccounts,
    pub loan_balance: f64,
    pub loan_rate_pct: f64,
    pub loan_payment: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeV2 {
    pub salary: Option<f64>,
    pub category: ContributionCategory,
    pub salary_day: u32,
}

impl Default for IncomeV2 {
    fn default() -> Self {
        Self {
            salary: None,
            category: ContributionCategory::Citizen,
            salary_day: 25,
        }
    }
}

/// Third stored shape wraps the canonical profile.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileV3 {
    pub profile: FinancialProfile,
}

#[derive(Debug, Clone)]
pub enum StoredProfile {
    V1(ProfileV1),
    V2(ProfileV2),
    V3(ProfileV3),
}

impl StoredProfile {
    pub fn from_json(value: Value) -> Result<Self, MigrationError> {
        let version = match value.get("version") {
            None | Some(Value::Null) => {
                return parse(CURRENT_VERSION, value)
                    .map(|profile| StoredProfile::V3(ProfileV3 { profile }));
            }
            Some(v) => v.as_u64().ok_or(MigrationError::InvalidVersion)?,
        };
        match version {
            1 => parse(version, value).map(StoredProfile::V1),
            2 => parse(version, value).map(StoredProfile::V2),
            3 => parse(version, value).map(StoredProfile::V3),
            0 => Err(MigrationError::InvalidVersion),
            other => Err(MigrationError::UnsupportedVersion(other)),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            StoredProfile::V1(_) => 1,
            StoredProfile::V2(_) => 2,
            StoredProfile::V3(_) => 3,
        }
    }

    /// Apply upgrade steps until the profile is canonical.
    pub fn into_canonical(self) -> FinancialProfile {
        let mut stored = self;
        loop {
            stored = match stored {
                StoredProfile::V1(v1) => StoredProfile::V2(upgrade_v1(v1)),
                StoredProfile::V2(v2) => StoredProfile::V3(upgrade_v2(v2)),
                StoredProfile::V3(v3) => return v3.profile,
            };
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(version: u64, value: Value) -> Result<T, MigrationError> {
    serde_json::from_value(value).map_err(|source| MigrationError::Malformed { version, source })
}

/// Stored JSON of any known version to the canonical profile.
pub fn normalize_profile(value: Value) -> Result<FinancialProfile, MigrationError> {
    let stored = StoredProfile::from_json(value)?;
    if stored.version() < CURRENT_VERSION {
        log::debug!("upgrading stored profile from version {}", stored.version());
    }
    Ok(stored.into_canonical())
}

pub fn upgrade_v1(v1: ProfileV1) -> ProfileV2 {
    let birth = match (v1.birth_year, v1.birth_month) {
        (Some(year), month) => Some(YearMonth::new(year, month.unwrap_or(1))),
        (None, _) => None,
    };
    let category = if v1.permanent_resident {
        ContributionCategory::PrSecondYear
    } else {
        ContributionCategory::Citizen
    };
    ProfileV2 {
        personal: PersonalV2 {
            birth,
            liquid_cash: v1.savings,
            retirement: SubAccounts {
                primary: v1.retirement_primary,
                secondary: v1.retirement_secondary,
                medical: v1.retirement_medical,
            },
            loan_balance: v1.loan_balance,
            loan_rate_pct: v1.loan_rate_pct,
            loan_payment: v1.loan_payment,
        },
        income: IncomeV2 {
            salary: v1.salary,
            category,
            ..IncomeV2::default()
        },
        expenses: v1
            .expenses
            .into_iter()
            .map(|e| RecurringExpense {
                name: e.name,
                amount: e.amount,
                due_day: 1,
            })
            .collect(),
        bonuses: Vec::new(),
    }
}

pub fn upgrade_v2(v2: ProfileV2) -> ProfileV3 {
    let personal = v2.personal;
    ProfileV3 {
        profile: FinancialProfile {
            personal: PersonalInfo {
                birth: personal.birth,
                liquid_cash: personal.liquid_cash,
                retirement_balances: personal.retirement,
                loan_balance: personal.loan_balance,
                loan_annual_rate: personal.loan_rate_pct / 100.0,
                loan_monthly_payment: personal.loan_payment,
            },
            income: IncomeInfo {
                base_salary: v2.income.salary,
                contribution: ContributionBasis::Category {
                    category: v2.income.category,
                },
                salary_day: v2.income.salary_day,
                salary_adjustments: Vec::new(),
            },
            recurring_expenses: v2.expenses,
            bonuses: v2.bonuses,
            ..FinancialProfile::default()
        },
    }
}
