//! Locale-aware parsing of amounts, dates and periods found in extraction
//! payloads. Every parser is total: unparsable input yields `None`.

use crate::utils::normalize_text;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];

const MONTH_NAMES: [(&str, u32); 12] = [
    ("janeiro", 1),
    ("fevereiro", 2),
    ("marco", 3),
    ("abril", 4),
    ("maio", 5),
    ("junho", 6),
    ("julho", 7),
    ("agosto", 8),
    ("setembro", 9),
    ("outubro", 10),
    ("novembro", 11),
    ("dezembro", 12),
];

static YEAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})(?:\D|$)").expect("valid year regex"));

static YEAR_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\D)((?:19|20)\d{2})[/\-.](\d{1,2})(?:\D|$)").expect("valid year-month regex")
});

static MONTH_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\D)(\d{1,2})[/\-.]((?:19|20)\d{2})(?:\D|$)").expect("valid month-year regex")
});

/// Parses a monetary amount from a payload scalar.
///
/// Numbers are taken as-is. Strings lose an optional `R$` prefix and all
/// whitespace, then separators are disambiguated:
/// - both `,` and `.` present: `.` groups thousands, `,` is the decimal mark
/// - a single `,` and no `.`: `,` is the decimal mark
/// - several `.` and no `,`: the last `.` is the decimal mark
///
/// Booleans, containers and null are not amounts.
pub fn parse_amount(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_amount_str(s),
        _ => None,
    }
}

pub fn parse_amount_str(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .replace("R$", "")
        .replace("r$", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();

    let canonical = if commas > 0 && dots > 0 {
        cleaned.replace('.', "").replace(',', ".")
    } else if commas == 1 {
        cleaned.replace(',', ".")
    } else if dots > 1 {
        let (integer, fraction) = cleaned.rsplit_once('.')?;
        format!("{}.{}", integer.replace('.', ""), fraction)
    } else {
        cleaned
    };

    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Renders an amount as Brazilian Real: `R$ 1.234,56`.
pub fn format_currency(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (integer, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let digits: Vec<char> = integer.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, digit) in digits.iter().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*digit);
    }

    let sign = if value.is_sign_negative() && fixed != "0.00" {
        "-"
    } else {
        ""
    };
    format!("R$ {}{},{}", sign, grouped, fraction)
}

/// Tries ISO, `DD/MM/YYYY`, `DD-MM-YYYY` and `YYYY/MM/DD`, in that order.
pub fn parse_date(raw: &Value) -> Option<NaiveDate> {
    match raw {
        Value::String(s) => parse_date_str(s),
        _ => None,
    }
}

pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cleaned, fmt).ok())
}

/// Finds the first `19xx`/`20xx` token in a scalar, descending into
/// containers in payload order.
pub fn extract_year(raw: &Value) -> Option<i32> {
    match raw {
        Value::Number(n) => {
            let year = n.as_f64()?;
            if year.fract() == 0.0 && (1900.0..2100.0).contains(&year) {
                Some(year as i32)
            } else {
                None
            }
        }
        Value::String(s) => extract_year_str(s),
        Value::Array(items) => items.iter().find_map(extract_year),
        Value::Object(map) => map.values().find_map(extract_year),
        _ => None,
    }
}

pub fn extract_year_str(text: &str) -> Option<i32> {
    YEAR_TOKEN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Finds a `(year, month)` pair: numeric `YYYY/MM`, then `MM/YYYY`, then a
/// Portuguese month name next to a year. Descends into containers.
pub fn extract_month_year(raw: &Value) -> Option<(i32, u32)> {
    match raw {
        Value::String(s) => extract_month_year_str(s),
        Value::Array(items) => items.iter().find_map(extract_month_year),
        Value::Object(map) => map.values().find_map(extract_month_year),
        _ => None,
    }
}

pub fn extract_month_year_str(text: &str) -> Option<(i32, u32)> {
    let numeric = YEAR_FIRST
        .captures_iter(text)
        .filter_map(|caps| valid_month_year(caps.get(1)?.as_str(), caps.get(2)?.as_str()))
        .next()
        .or_else(|| {
            MONTH_FIRST
                .captures_iter(text)
                .filter_map(|caps| {
                    valid_month_year(caps.get(2)?.as_str(), caps.get(1)?.as_str())
                })
                .next()
        });
    if numeric.is_some() {
        return numeric;
    }

    let normalized = normalize_text(text);
    let month = MONTH_NAMES
        .iter()
        .find(|(name, _)| normalized.contains(name))
        .map(|(_, number)| *number)?;
    let year = extract_year_str(&normalized)?;
    Some((year, month))
}

fn valid_month_year(year: &str, month: &str) -> Option<(i32, u32)> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// Booleans, non-zero numbers and affirmative words count as true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "1" | "sim" | "yes" | "y" | "s"
        ),
        _ => false,
    }
}

/// Float rendering that always keeps a fractional part (`12500.0`).
pub fn float_repr(value: f64) -> String {
    let rendered = value.to_string();
    if rendered.contains('.') || rendered.contains("inf") || rendered.contains("NaN") {
        rendered
    } else {
        format!("{}.0", rendered)
    }
}

/// `(year, month)` of a calendar date.
pub fn month_of(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}
