//! Display helpers. The engine never rounds; values are rounded only here.

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `a / b`, or `fallback` when `b` is zero or the result is not finite.
pub fn safe_ratio(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator == 0.0 {
        return fallback;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() { ratio } else { fallback }
}

/// `-$1,234.50` style with thousands separators.
pub fn format_currency(value: f64) -> String {
    let rounded = round2(value);
    let sign = if rounded < 0.0 { "-" } else { "" };
    let cents = (rounded.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Fraction to percentage text, e.g. `0.0525` -> `5.25%`.
pub fn format_percent(fraction: f64) -> String {
    format!("{:.2}%", round2(fraction * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_groups_thousands_and_keeps_sign() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(999.999), "$1,000.00");
        assert_eq!(format_currency(1_234_567.8), "$1,234,567.80");
        assert_eq!(format_currency(-200.5), "-$200.50");
        assert_eq!(format_currency(-0.001), "$0.00");
    }

    #[test]
    fn percent_renders_two_decimals() {
        assert_eq!(format_percent(0.0525), "5.25%");
        assert_eq!(format_percent(-0.1), "-10.00%");
    }

    #[test]
    fn safe_ratio_falls_back_on_zero_denominator() {
        assert_eq!(safe_ratio(5.0, 0.0, 0.0), 0.0);
        assert_eq!(safe_ratio(5.0, 2.0, 0.0), 2.5);
        assert_eq!(safe_ratio(f64::INFINITY, 1.0, -1.0), -1.0);
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(-2.345_6), -2.35);
    }
}
