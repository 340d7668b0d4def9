//! Small pieces shared by the per-source raw record types.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

/// Upstream field that is sometimes a number and sometimes a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum NumOrString {
    Int(i64),
    Float(f64),
    Text(String),
}

impl NumOrString {
    pub(crate) fn to_id(&self) -> String {
        match self {
            NumOrString::Int(n) => n.to_string(),
            NumOrString::Float(n) => format!("{n:.0}"),
            NumOrString::Text(s) => s.trim().to_string(),
        }
    }

    pub(crate) fn to_f64(&self) -> Option<f64> {
        match self {
            NumOrString::Int(n) => Some(*n as f64),
            NumOrString::Float(n) => Some(*n),
            NumOrString::Text(s) => s.trim().replace(',', "").parse().ok(),
        }
    }
}

/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC) and bare dates.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub(crate) fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

pub(crate) fn from_epoch_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// `linear-app` -> `Linear App`.
pub(crate) fn titlecase_slug(slug: &str) -> String {
    slug.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Join location parts, skipping blanks: `["Berlin", "", "DE"]` -> `Berlin, DE`.
pub(crate) fn join_location<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let joined = parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_in_every_upstream_shape() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).single().unwrap();
        assert_eq!(parse_timestamp("2024-01-05T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-05T05:00:00-05:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-05T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-05T10:00:00.000"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-05"),
            Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).single()
        );
        assert_eq!(parse_timestamp("last tuesday"), None);
        assert_eq!(from_epoch_millis(1_704_448_800_000), Some(expected));
    }

    #[test]
    fn polymorphic_ids() {
        let ids: Vec<NumOrString> = serde_json::from_str(r#"[123, "abc-9", 4.0]"#).unwrap();
        let ids: Vec<String> = ids.iter().map(NumOrString::to_id).collect();
        assert_eq!(ids, vec!["123", "abc-9", "4"]);
    }

    #[test]
    fn slugs_and_locations() {
        assert_eq!(titlecase_slug("linear-app"), "Linear App");
        assert_eq!(
            join_location([Some("Berlin"), Some(" "), Some("DE")]),
            Some("Berlin, DE".to_string())
        );
        assert_eq!(join_location([None, Some("")]), None);
    }
}
