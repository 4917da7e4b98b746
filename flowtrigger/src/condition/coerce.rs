//! Value coercion used by the comparison operators

use super::evaluator::EvaluationError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;

/// Short rendering of a value for error messages and traces
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Plain decimal: optional sign, digits, optional fraction, nothing else
fn is_strict_decimal(text: &str) -> bool {
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match frac_part {
        Some(frac) => {
            digits(int_part) && digits(frac) && !(int_part.is_empty() && frac.is_empty())
        }
        None => !int_part.is_empty() && digits(int_part),
    }
}

pub(crate) fn to_number(value: &Value) -> Result<f64, EvaluationError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EvaluationError::NotANumber(n.to_string())),
        Value::String(s) if is_strict_decimal(s) => s
            .parse::<f64>()
            .map_err(|_| EvaluationError::NotANumber(s.clone())),
        other => Err(EvaluationError::NotANumber(describe(other))),
    }
}

pub(crate) fn to_date(value: &Value) -> Result<DateTime<Utc>, EvaluationError> {
    let Value::String(text) = value else {
        return Err(EvaluationError::NotADate(describe(value)));
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| EvaluationError::NotADate(text.clone()))
}

pub(crate) fn to_bool(value: &Value) -> Result<bool, EvaluationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(EvaluationError::NotABoolean(describe(other))),
    }
}

/// String form used by the text operators; only scalars have one
pub(crate) fn to_text(value: &Value) -> Result<String, EvaluationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(EvaluationError::NotText(describe(other))),
    }
}

/// Equality driven by the type of the expected value
pub(crate) fn loosely_equal(actual: &Value, expected: &Value) -> Result<bool, EvaluationError> {
    match expected {
        Value::Number(_) => Ok(to_number(actual)? == to_number(expected)?),
        Value::Bool(b) => Ok(to_bool(actual)? == *b),
        Value::String(text) => match actual {
            Value::String(actual_text) => Ok(actual_text == text),
            Value::Number(_) => Ok(to_number(actual)? == to_number(expected)?),
            Value::Bool(b) => Ok(*b == to_bool(expected)?),
            other => Err(EvaluationError::TypeMismatch {
                actual: describe(other),
                expected: text.clone(),
            }),
        },
        _ => Ok(actual == expected),
    }
}

/// Ordering of two values, numerically when both are numbers, else as dates
pub(crate) fn compare(actual: &Value, expected: &Value) -> Result<Ordering, EvaluationError> {
    if let (Ok(a), Ok(b)) = (to_number(actual), to_number(expected)) {
        return a.partial_cmp(&b).ok_or_else(|| EvaluationError::TypeMismatch {
            actual: describe(actual),
            expected: describe(expected),
        });
    }
    match (to_date(actual), to_date(expected)) {
        (Ok(a), Ok(b)) => Ok(a.cmp(&b)),
        _ => Err(EvaluationError::TypeMismatch {
            actual: describe(actual),
            expected: describe(expected),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_decimal() {
        for ok in ["1", "-2", "+3", "4.5", ".5", "5.", "001"] {
            assert!(is_strict_decimal(ok), "{ok}");
        }
        for bad in ["", ".", "1e3", "inf", "NaN", " 1", "1 ", "1,000", "0x10", "--1"] {
            assert!(!is_strict_decimal(bad), "{bad}");
        }
    }

    #[test]
    fn test_date_formats() {
        let midnight = to_date(&json!("2024-03-01")).unwrap();
        assert_eq!(midnight.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        let offset = to_date(&json!("2024-03-01T10:00:00+02:00")).unwrap();
        assert_eq!(offset.to_rfc3339(), "2024-03-01T08:00:00+00:00");
        assert!(to_date(&json!("2024-03-01T10:00:00")).is_ok());
        assert!(to_date(&json!("03/01/2024")).is_err());
        assert!(to_date(&json!(20240301)).is_err());
    }

    #[test]
    fn test_loose_equality_follows_expected_type() {
        assert!(loosely_equal(&json!("42"), &json!(42)).unwrap());
        assert!(loosely_equal(&json!(42), &json!("42.0")).unwrap());
        assert!(loosely_equal(&json!("TRUE"), &json!(true)).unwrap());
        assert!(!loosely_equal(&json!("done"), &json!("DONE")).unwrap());
        assert!(loosely_equal(&json!("abc"), &json!(1)).is_err());
        assert!(loosely_equal(&json!(["a"]), &json!("a")).is_err());
    }

    #[test]
    fn test_compare_numbers_then_dates() {
        assert_eq!(compare(&json!("10"), &json!(9)).unwrap(), Ordering::Greater);
        assert_eq!(
            compare(&json!("2024-01-01"), &json!("2024-06-01T00:00:00Z")).unwrap(),
            Ordering::Less
        );
        assert!(compare(&json!("soon"), &json!(3)).is_err());
    }
}
