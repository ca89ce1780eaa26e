//! Closed-form time-value-of-money helpers used by planning screens and to
//! cross-check the month-by-month engine.

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

const RATE_EPSILON: f64 = 1e-12;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthProjection {
    pub future_value: f64,
    pub principal_growth: f64,
    pub contributions_growth: f64,
    pub total_contributed: f64,
    pub interest_earned: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementNeeds {
    /// Annual spending in today's money.
    pub annual_expenses: f64,
    pub years_to_retirement: f64,
    pub retirement_years: f64,
    pub inflation_rate: f64,
    pub post_retirement_return: f64,
    pub safe_withdrawal_rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusEstimate {
    pub inflated_annual_expenses: f64,
    pub withdrawal_rate_estimate: f64,
    pub annuity_estimate: f64,
    pub recommended: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAllocation {
    #[serde(default)]
    pub name: String,
    pub weight_pct: f64,
    pub expected_return: f64,
    pub volatility: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStats {
    pub expected_return: f64,
    pub volatility: f64,
    pub total_weight_pct: f64,
}

fn periods(years: f64, periods_per_year: u32) -> EngineResult<(f64, f64)> {
    if periods_per_year == 0 {
        return Err(EngineError::out_of_range(
            "periodsPerYear",
            "must be at least 1",
        ));
    }
    if !years.is_finite() || years < 0.0 {
        return Err(EngineError::negative("years", years));
    }
    Ok((years * periods_per_year as f64, periods_per_year as f64))
}

fn check_rate(field: &str, rate: f64) -> EngineResult<()> {
    if !rate.is_finite() || rate <= -1.0 {
        return Err(EngineError::out_of_range(
            field,
            format!("rate {rate} must be a finite value > -1"),
        ));
    }
    Ok(())
}

/// Future value of `principal` plus an end-of-period `contribution` stream, with
/// `annual_rate` split evenly over `periods_per_year`.
pub fn compound_growth(
    principal: f64,
    contribution: f64,
    annual_rate: f64,
    years: f64,
    periods_per_year: u32,
) -> EngineResult<GrowthProjection> {
    let (n, per_year) = periods(years, periods_per_year)?;
    check_rate("annualRate", annual_rate)?;
    let rate = annual_rate / per_year;

    let (principal_growth, contributions_growth) = if rate.abs() < RATE_EPSILON {
        (principal, contribution * n)
    } else {
        let factor = (1.0 + rate).powf(n);
        (principal * factor, contribution * (factor - 1.0) / rate)
    };

    let future_value = principal_growth + contributions_growth;
    let total_contributed = principal + contribution * n;
    Ok(GrowthProjection {
        future_value,
        principal_growth,
        contributions_growth,
        total_contributed,
        interest_earned: future_value - total_contributed,
    })
}

/// Level periodic contribution that grows `current` into `target` by maturity.
pub fn required_contribution(
    target: f64,
    current: f64,
    annual_rate: f64,
    years: f64,
    periods_per_year: u32,
) -> EngineResult<f64> {
    let (n, per_year) = periods(years, periods_per_year)?;
    check_rate("annualRate", annual_rate)?;
    if target < 0.0 {
        return Err(EngineError::negative("target", target));
    }
    let rate = annual_rate / per_year;
    let factor = if rate.abs() < RATE_EPSILON {
        1.0
    } else {
        (1.0 + rate).powf(n)
    };

    let shortfall = target - current * factor;
    if shortfall <= 0.0 {
        return Ok(0.0);
    }
    if n <= 0.0 {
        return Err(EngineError::out_of_range(
            "years",
            "target is not met today and there is no time left to contribute",
        ));
    }

    if rate.abs() < RATE_EPSILON {
        Ok(shortfall / n)
    } else {
        Ok(shortfall * rate / (factor - 1.0))
    }
}

/// Conservative corpus: the larger of a flat withdrawal-rate estimate and the
/// present value of inflation-adjusted spending over the retirement years.
pub fn retirement_corpus(needs: &RetirementNeeds) -> EngineResult<CorpusEstimate> {
    if needs.annual_expenses < 0.0 {
        return Err(EngineError::negative(
            "annualExpenses",
            needs.annual_expenses,
        ));
    }
    if needs.years_to_retirement < 0.0 || needs.retirement_years < 0.0 {
        return Err(EngineError::negative(
            "years",
            needs.years_to_retirement.min(needs.retirement_years),
        ));
    }
    if !(needs.safe_withdrawal_rate > 0.0 && needs.safe_withdrawal_rate <= 1.0) {
        return Err(EngineError::out_of_range(
            "safeWithdrawalRate",
            format!(
                "{} must be within (0, 1]",
                needs.safe_withdrawal_rate
            ),
        ));
    }
    check_rate("inflationRate", needs.inflation_rate)?;
    check_rate("postRetirementReturn", needs.post_retirement_return)?;

    let inflated = needs.annual_expenses * (1.0 + needs.inflation_rate).powf(needs.years_to_retirement);
    let withdrawal_rate_estimate = inflated / needs.safe_withdrawal_rate;

    let real_return = (1.0 + needs.post_retirement_return) / (1.0 + needs.inflation_rate) - 1.0;
    let annuity_estimate = if real_return.abs() < RATE_EPSILON {
        inflated * needs.retirement_years
    } else {
        inflated * (1.0 - (1.0 + real_return).powf(-needs.retirement_years)) / real_return
    };

    Ok(CorpusEstimate {
        inflated_annual_expenses: inflated,
        withdrawal_rate_estimate,
        annuity_estimate,
        recommended: withdrawal_rate_estimate.max(annuity_estimate),
    })
}

/// Weighted expected return and volatility of a set of asset classes.
///
/// Volatility treats the asset classes as uncorrelated, so variance is the sum of
/// squared weighted volatilities. This is a simplification: correlated assets make
/// the real figure higher.
pub fn portfolio_stats(allocations: &[AssetAllocation]) -> EngineResult<PortfolioStats> {
    let mut expected_return = 0.0;
    let mut variance = 0.0;
    let mut total_weight_pct = 0.0;
    for asset in allocations {
        if asset.weight_pct < 0.0 {
            return Err(EngineError::negative(
                format!("{}.weightPct", asset.name),
                asset.weight_pct,
            ));
        }
        if asset.volatility < 0.0 {
            return Err(EngineError::negative(
                format!("{}.volatility", asset.name),
                asset.volatility,
            ));
        }
        let weight = asset.weight_pct / 100.0;
        expected_return += weight * asset.expected_return;
        variance += (weight * asset.volatility).powi(2);
        total_weight_pct += asset.weight_pct;
    }
    Ok(PortfolioStats {
        expected_return,
        volatility: variance.sqrt(),
        total_weight_pct,
    })
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

    fn asset(name: &str, weight_pct: f64, expected_return: f64, volatility: f64) -> AssetAllocation {
        AssetAllocation {
            name: name.to_string(),
            weight_pct,
            expected_return,
            volatility,
        }
    }

    #[test]
    fn compound_growth_matches_hand_calculation() {
        // 1000 at 10% for 2 years plus 100 a year: 1210 + 100*1.1 + 100 = 1420.
        let growth = compound_growth(1_000.0, 100.0, 0.10, 2.0, 1).expect("valid");
        assert_approx(growth.principal_growth, 1_210.0);
        assert_approx(growth.contributions_growth, 210.0);
        assert_approx(growth.future_value, 1_420.0);
        assert_approx(growth.total_contributed, 1_200.0);
        assert_approx(growth.interest_earned, 220.0);
    }

    #[test]
    fn zero_rate_growth_is_linear() {
        let growth = compound_growth(500.0, 50.0, 0.0, 3.0, 12).expect("valid");
        assert_approx(growth.future_value, 500.0 + 50.0 * 36.0);
        assert_approx(growth.interest_earned, 0.0);
    }

    #[test]
    fn compound_growth_rejects_zero_periods() {
        assert!(compound_growth(1.0, 1.0, 0.05, 1.0, 0).is_err());
        assert!(compound_growth(1.0, 1.0, 0.05, -1.0, 12).is_err());
    }

    #[test]
    fn required_contribution_inverts_compound_growth() {
        let payment = required_contribution(100_000.0, 10_000.0, 0.06, 10.0, 12).expect("valid");
        let check = compound_growth(10_000.0, payment, 0.06, 10.0, 12).expect("valid");
        assert_approx(check.future_value, 100_000.0);
    }

    #[test]
    fn required_contribution_is_zero_when_current_suffices() {
        let payment = required_contribution(10_000.0, 9_000.0, 0.05, 5.0, 12).expect("valid");
        assert_eq!(payment, 0.0);
        let payment = required_contribution(10_000.0, 10_000.0, 0.0, 0.0, 12).expect("valid");
        assert_eq!(payment, 0.0);
    }

    #[test]
    fn required_contribution_with_zero_rate_splits_shortfall_evenly() {
        let payment = required_contribution(12_000.0, 0.0, 0.0, 1.0, 12).expect("valid");
        assert_approx(payment, 1_000.0);
    }

    #[test]
    fn required_contribution_without_time_left_is_an_error() {
        assert!(required_contribution(10_000.0, 0.0, 0.05, 0.0, 12).is_err());
    }

    fn needs() -> RetirementNeeds {
        RetirementNeeds {
            annual_expenses: 40_000.0,
            years_to_retirement: 0.0,
            retirement_years: 30.0,
            inflation_rate: 0.0,
            post_retirement_return: 0.0,
            safe_withdrawal_rate: 0.04,
        }
    }

    #[test]
    fn corpus_takes_the_larger_estimate() {
        let estimate = retirement_corpus(&needs()).expect("valid");
        assert_approx(estimate.withdrawal_rate_estimate, 1_000_000.0);
        assert_approx(estimate.annuity_estimate, 1_200_000.0);
        assert_approx(estimate.recommended, 1_200_000.0);

        let mut shorter = needs();
        shorter.retirement_years = 20.0;
        let estimate = retirement_corpus(&shorter).expect("valid");
        assert_approx(estimate.recommended, 1_000_000.0);
    }

    #[test]
    fn corpus_inflates_expenses_to_retirement() {
        let mut inflated = needs();
        inflated.years_to_retirement = 2.0;
        inflated.inflation_rate = 0.10;
        inflated.post_retirement_return = 0.10;
        let estimate = retirement_corpus(&inflated).expect("valid");
        assert_approx(estimate.inflated_annual_expenses, 48_400.0);
        // Real return is zero, so the annuity is a flat multiple.
        assert_approx(estimate.annuity_estimate, 48_400.0 * 30.0);
    }

    #[test]
    fn corpus_rejects_invalid_withdrawal_rate() {
        let mut bad = needs();
        bad.safe_withdrawal_rate = 0.0;
        assert!(retirement_corpus(&bad).is_err());
    }

    #[test]
    fn portfolio_return_is_weighted_and_volatility_uncorrelated() {
        let stats = portfolio_stats(&[
            asset("equities", 60.0, 0.08, 0.15),
            asset("bonds", 40.0, 0.03, 0.05),
        ])
        .expect("valid");
        assert_approx(stats.expected_return, 0.6 * 0.08 + 0.4 * 0.03);
        let variance: f64 = (0.6_f64 * 0.15).powi(2) + (0.4_f64 * 0.05).powi(2);
        assert_approx(stats.volatility, variance.sqrt());
        assert_approx(stats.total_weight_pct, 100.0);
    }

    #[test]
    fn empty_portfolio_is_all_zero() {
        let stats = portfolio_stats(&[]).expect("valid");
        assert_eq!(stats.expected_return, 0.0);
        assert_eq!(stats.volatility, 0.0);
    }

    #[test]
    fn portfolio_rejects_negative_weight() {
        assert!(portfolio_stats(&[asset("short", -10.0, 0.05, 0.1)]).is_err());
    }
}
