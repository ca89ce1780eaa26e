use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use super::types::{ContributionBasis, ContributionCategory, SubAccounts};

const BUNDLED_CONFIG: &str = include_str!("../../config/contribution.toml");
const ALLOCATION_TOLERANCE: f64 = 1e-6;

const ALL_CATEGORIES: [ContributionCategory; 3] = [
    ContributionCategory::Citizen,
    ContributionCategory::PrFirstYear,
    ContributionCategory::PrSecondYear,
];

#[derive(Debug, Deserialize)]
struct RawConfig {
    wage_ceiling: f64,
    rates: BTreeMap<String, Vec<RawRateBracket>>,
    allocation: Vec<RawAllocationBracket>,
}

#[derive(Debug, Deserialize)]
struct RawRateBracket {
    min_age: u32,
    max_age: Option<u32>,
    employee: f64,
    employer: f64,
}

#[derive(Debug, Deserialize)]
struct RawAllocationBracket {
    min_age: u32,
    max_age: Option<u32>,
    primary: f64,
    secondary: f64,
    medical: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePair {
    pub employee: f64,
    pub employer: f64,
}

#[derive(Clone, Debug, PartialEq)]
struct AgeBracket<T> {
    min_age: u32,
    max_age: Option<u32>,
    value: T,
}

impl<T> AgeBracket<T> {
    fn contains(&self, age: i32) -> bool {
        if age < 0 {
            return false;
        }
        let age = age as u32;
        age >= self.min_age && self.max_age.is_none_or(|max| age <= max)
    }
}

/// Age-bracketed lookup table. Only constructible through [`AgeTable::new`], which
/// rejects gaps, overlaps and a bounded top bracket.
#[derive(Clone, Debug, PartialEq)]
pub struct AgeTable<T> {
    brackets: Vec<AgeBracket<T>>,
}

impl<T> AgeTable<T> {
    fn new(table: &'static str, brackets: Vec<AgeBracket<T>>) -> EngineResult<Self> {
        let gap = |detail: String| EngineError::ConfigurationGap { table, detail };

        let Some(first) = brackets.first() else {
            return Err(gap("table has no brackets".to_string()));
        };
        if first.min_age != 0 {
            return Err(gap(format!(
                "first bracket starts at age {}, expected 0",
                first.min_age
            )));
        }

        for (idx, bracket) in brackets.iter().enumerate() {
            let is_last = idx + 1 == brackets.len();
            match (bracket.max_age, is_last) {
                (Some(max), _) if max < bracket.min_age => {
                    return Err(gap(format!(
                        "bracket {}..={} is empty",
                        bracket.min_age, max
                    )));
                }
                (Some(max), true) => {
                    return Err(gap(format!(
                        "last bracket ends at age {max}; ages above it are not covered"
                    )));
                }
                (None, false) => {
                    return Err(gap(format!(
                        "bracket starting at age {} is open-ended but not last",
                        bracket.min_age
                    )));
                }
                (Some(max), false) => {
                    let next = brackets[idx + 1].min_age;
                    if next != max + 1 {
                        return Err(gap(format!(
                            "bracket ending at age {max} is followed by one starting at {next}"
                        )));
                    }
                }
                (None, true) => {}
            }
        }

        Ok(Self { brackets })
    }

    pub fn lookup(&self, age: i32) -> Option<&T> {
        self.brackets
            .iter()
            .find(|bracket| bracket.contains(age))
            .map(|bracket| &bracket.value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContributionConfig {
    wage_ceiling: f64,
    rates: BTreeMap<ContributionCategory, AgeTable<RatePair>>,
    allocation: AgeTable<SubAccounts>,
}

impl ContributionConfig {
    /// Table shipped with the crate under `config/contribution.toml`.
    pub fn bundled() -> EngineResult<Self> {
        Self::from_toml_str(BUNDLED_CONFIG)
    }

    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        let raw: RawConfig = toml::from_str(source)
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> EngineResult<Self> {
        if !raw.wage_ceiling.is_finite() || raw.wage_ceiling < 0.0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "wage_ceiling must be a finite value >= 0, got {}",
                raw.wage_ceiling
            )));
        }

        let mut rates = BTreeMap::new();
        for (key, brackets) in raw.rates {
            let category = ALL_CATEGORIES
                .into_iter()
                .find(|c| c.key() == key)
                .ok_or_else(|| {
                    EngineError::InvalidConfiguration(format!("unknown category `{key}`"))
                })?;
            let mut converted = Vec::with_capacity(brackets.len());
            for b in brackets {
                for (label, rate) in [("employee", b.employee), ("employer", b.employer)] {
                    if !(0.0..=1.0).contains(&rate) {
                        return Err(EngineError::InvalidConfiguration(format!(
                            "{key} {label} rate {rate} must be between 0 and 1"
                        )));
                    }
                }
                converted.push(AgeBracket {
                    min_age: b.min_age,
                    max_age: b.max_age,
                    value: RatePair {
                        employee: b.employee,
                        employer: b.employer,
                    },
                });
            }
            rates.insert(category, AgeTable::new("contribution rates", converted)?);
        }

        for category in ALL_CATEGORIES {
            if !rates.contains_key(&category) {
                return Err(EngineError::ConfigurationGap {
                    table: "contribution rates",
                    detail: format!("no rate table for category `{}`", category.key()),
                });
            }
        }

        let mut allocation = Vec::with_capacity(raw.allocation.len());
        for b in raw.allocation {
            let shares = SubAccounts {
                primary: b.primary,
                secondary: b.secondary,
                medical: b.medical,
            };
            if shares.primary < 0.0 || shares.secondary < 0.0 || shares.medical < 0.0 {
                return Err(EngineError::InvalidConfiguration(format!(
                    "allocation shares for age {} must be >= 0",
                    b.min_age
                )));
            }
            let sum = shares.total();
            if (sum - 1.0).abs() > ALLOCATION_TOLERANCE {
                return Err(EngineError::InvalidConfiguration(format!(
                    "allocation shares for age {} sum to {sum}, expected 1.0",
                    b.min_age
                )));
            }
            allocation.push(AgeBracket {
                min_age: b.min_age,
                max_age: b.max_age,
                // Normalised so credits sum to the total at float precision.
                value: shares.scaled(1.0 / sum),
            });
        }

        Ok(Self {
            wage_ceiling: raw.wage_ceiling,
            rates,
            allocation: AgeTable::new("allocation", allocation)?,
        })
    }

    pub fn wage_ceiling(&self) -> f64 {
        self.wage_ceiling
    }

    pub fn rates_for(&self, category: ContributionCategory, age: i32) -> EngineResult<RatePair> {
        self.rates
            .get(&category)
            .and_then(|table| table.lookup(age))
            .copied()
            .ok_or_else(|| EngineError::ConfigurationGap {
                table: "contribution rates",
                detail: format!("no bracket for age {age} in category `{}`", category.key()),
            })
    }

    pub fn allocation_for(&self, age: i32) -> EngineResult<SubAccounts> {
        self.allocation
            .lookup(age)
            .copied()
            .ok_or_else(|| EngineError::ConfigurationGap {
                table: "allocation",
                detail: format!("no bracket for age {age}"),
            })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSplit {
    pub contributable_wage: f64,
    pub employee: f64,
    pub employer: f64,
    pub allocation: SubAccounts,
}

impl ContributionSplit {
    pub fn total(&self) -> f64 {
        self.employee + self.employer
    }
}

pub fn compute_contribution(
    monthly_salary: f64,
    age: i32,
    basis: ContributionBasis,
    config: &ContributionConfig,
) -> EngineResult<ContributionSplit> {
    if monthly_salary <= 0.0 {
        return Ok(ContributionSplit::default());
    }

    let rates = match basis {
        ContributionBasis::Category { category } => config.rates_for(category, age)?,
        ContributionBasis::FixedRates {
            employee_rate,
            employer_rate,
        } => RatePair {
            employee: employee_rate,
            employer: employer_rate,
        },
    };
    let shares = config.allocation_for(age)?;

    let contributable_wage = monthly_salary.min(config.wage_ceiling);
    let employee = contributable_wage * rates.employee;
    let employer = contributable_wage * rates.employer;

    Ok(ContributionSplit {
        contributable_wage,
        employee,
        employer,
        allocation: shares.scaled(employee + employer),
    })
}
