//! Salary normalization to annual USD.
//!
//! Adapters parse their own native salary shape and funnel it through
//! [`annualize`] or [`parse_salary_text`]; nothing else writes the numeric
//! salary fields of a record.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::contains_word;

/// Standard full-time hours in a year (40h x 52w).
pub const HOURS_PER_YEAR: i64 = 2080;

/// Plausible bounds for an annual figure; anything outside is a parse artifact.
pub const MIN_PLAUSIBLE_ANNUAL: i64 = 10_000;
pub const MAX_PLAUSIBLE_ANNUAL: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl SalaryRange {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Swap the bounds if they arrive inverted.
    pub fn ordered(self) -> Self {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => Self {
                min: Some(max),
                max: Some(min),
            },
            _ => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayPeriod {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl PayPeriod {
    pub fn annual_multiplier(&self) -> i64 {
        match self {
            PayPeriod::Hour => HOURS_PER_YEAR,
            PayPeriod::Day => 260,
            PayPeriod::Week => 52,
            PayPeriod::Month => 12,
            PayPeriod::Year => 1,
        }
    }

    /// Parse an upstream period label (`HOUR`, `hourly`, `per-month`, `yr`, ...).
    pub fn parse(label: &str) -> Option<Self> {
        let lower = label.trim().to_ascii_lowercase();
        let lower = lower.trim_start_matches("per").trim_matches(|c: char| !c.is_ascii_alphabetic());
        match lower {
            "hour" | "hourly" | "hr" | "h" => Some(PayPeriod::Hour),
            "day" | "daily" => Some(PayPeriod::Day),
            "week" | "weekly" | "wk" => Some(PayPeriod::Week),
            "month" | "monthly" | "mo" => Some(PayPeriod::Month),
            "year" | "yearly" | "annual" | "annually" | "yr" | "annum" => Some(PayPeriod::Year),
            _ => None,
        }
    }
}

/// Convert a native-unit range to annual figures. Non-positive inputs are
/// dropped, out-of-range results are discarded, and the bounds are ordered.
pub fn annualize(min: Option<f64>, max: Option<f64>, period: PayPeriod) -> SalaryRange {
    let convert = |v: Option<f64>| {
        v.filter(|n| n.is_finite() && *n > 0.0)
            .map(|n| (n * period.annual_multiplier() as f64).round() as i64)
            .filter(|n| (MIN_PLAUSIBLE_ANNUAL..=MAX_PLAUSIBLE_ANNUAL).contains(n))
    };
    SalaryRange {
        min: convert(min),
        max: convert(max),
    }
    .ordered()
}

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)\s*(k\b)?").expect("valid amount regex")
});

const FOREIGN_CURRENCY_SYMBOLS: &[&str] = &["€", "£", "₹", "¥", "ca$", "a$", "c$"];

/// ISO codes; matched as whole words so "Europe" or "academy" don't count.
const FOREIGN_CURRENCY_CODES: &[&str] = &[
    "eur", "gbp", "cad", "aud", "inr", "chf", "sek", "nok", "dkk", "pln", "brl", "mxn", "jpy",
];

fn is_foreign_currency(lower: &str) -> bool {
    FOREIGN_CURRENCY_SYMBOLS.iter().any(|m| lower.contains(m))
        || FOREIGN_CURRENCY_CODES.iter().any(|code| contains_word(lower, code))
}

fn has_usd_marker(lower: &str) -> bool {
    lower.contains('$') || contains_word(lower, "usd")
}

fn detect_period(lower: &str) -> Option<PayPeriod> {
    const HOURLY: &[&str] = &["/hr", "/hour", "/h ", "per hour", "hourly", "an hour", "p/h"];
    const DAILY: &[&str] = &["/day", "per day", "daily"];
    const WEEKLY: &[&str] = &["/wk", "/week", "per week", "weekly"];
    const MONTHLY: &[&str] = &["/mo", "/month", "per month", "monthly", "a month"];
    const YEARLY: &[&str] = &["/yr", "/year", "per year", "per annum", "annual", "yearly", "a year"];

    let padded = format!("{lower} ");
    let hit = |needles: &[&str]| needles.iter().any(|n| padded.contains(n));
    if hit(HOURLY) {
        Some(PayPeriod::Hour)
    } else if hit(DAILY) {
        Some(PayPeriod::Day)
    } else if hit(WEEKLY) {
        Some(PayPeriod::Week)
    } else if hit(MONTHLY) {
        Some(PayPeriod::Month)
    } else if hit(YEARLY) {
        Some(PayPeriod::Year)
    } else {
        None
    }
}

/// Parse a free-text salary such as `$50 - $75/hr` or `$120k – $150k`.
///
/// Returns `None` for non-USD amounts and anything without a plausible
/// figure; callers keep the raw text in `salary_text` in that case.
/// Percentages are never amounts, and a small figure only counts as hourly
/// when the text names the period or carries a dollar marker.
pub fn parse_salary_text(text: &str) -> Option<SalaryRange> {
    let lower = text.to_lowercase();
    if is_foreign_currency(&lower) {
        return None;
    }

    let amounts: Vec<f64> = AMOUNT
        .captures_iter(&lower)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            if lower[whole.end()..].trim_start().starts_with('%') {
                return None;
            }
            let raw = cap.get(1)?.as_str().replace(',', "");
            let value: f64 = raw.parse().ok()?;
            let thousands = cap.get(2).is_some();
            Some(if thousands { value * 1000.0 } else { value })
        })
        .filter(|v| *v > 0.0)
        .take(2)
        .collect();

    let first = *amounts.first()?;
    let second = amounts.get(1).copied();
    let largest = second.map_or(first, |s| s.max(first));

    let period = match detect_period(&lower) {
        Some(period) => period,
        None if largest >= 300.0 => PayPeriod::Year,
        None if has_usd_marker(&lower) => PayPeriod::Hour,
        None => return None,
    };

    let range = annualize(Some(first), second.or(Some(first)), period);
    if range.is_empty() {
        None
    } else {
        Some(range)
    }
}
