use serde::Serialize;

use super::error::{EngineError, EngineResult};

/// Absorbs float noise when the annuity term lands on a whole month.
const TERM_EPSILON: f64 = 1e-9;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmortizationStep {
    pub payment: f64,
    pub interest: f64,
    pub principal: f64,
    pub new_balance: f64,
}

impl AmortizationStep {
    /// Payment covered no principal while a balance is still outstanding.
    pub fn is_stalled(&self) -> bool {
        self.principal <= 0.0 && self.new_balance > 0.0
    }
}

/// One month of reducing-balance amortization.
pub fn amortize_month(
    remaining_balance: f64,
    scheduled_payment: f64,
    annual_rate: f64,
) -> AmortizationStep {
    if remaining_balance <= 0.0 {
        return AmortizationStep::default();
    }

    let scheduled_payment = scheduled_payment.max(0.0);
    let interest = remaining_balance * (annual_rate / 12.0);
    let principal = (scheduled_payment - interest).clamp(0.0, remaining_balance);
    let new_balance = (remaining_balance - principal).max(0.0);

    AmortizationStep {
        payment: scheduled_payment.min(interest + remaining_balance),
        interest,
        principal,
        new_balance,
    }
}

/// Number of monthly payments until the balance reaches zero, from the annuity
/// term `n = -ln(1 - rB/P) / ln(1 + r)`. Only a payment that never exceeds the
/// monthly interest is non-convergent; a slow but converging loan gets its term.
pub fn months_to_payoff(
    remaining_balance: f64,
    scheduled_payment: f64,
    annual_rate: f64,
) -> EngineResult<u32> {
    if remaining_balance <= 0.0 {
        return Ok(0);
    }
    let first = amortize_month(remaining_balance, scheduled_payment, annual_rate);
    if first.is_stalled() {
        return Err(EngineError::NonConvergentAmortization {
            payment: scheduled_payment,
            interest: first.interest,
        });
    }
    if first.new_balance <= 0.0 {
        return Ok(1);
    }

    let monthly = annual_rate / 12.0;
    let term = if monthly == 0.0 {
        remaining_balance / scheduled_payment
    } else {
        -(-monthly * remaining_balance / scheduled_payment).ln_1p() / monthly.ln_1p()
    };
    // Saturates for terms beyond u32::MAX months.
    Ok((term - TERM_EPSILON).ceil().max(1.0) as u32)
}
