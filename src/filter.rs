//! Metadata predicates evaluated against chunk metadata.
//!
//! A filter maps dot-separated field paths to either a literal (implicit
//! equality) or an operator object such as `{"$gte": 5, "$lt": 10}`. All
//! top-level fields must match.
//!
//! Filters are validated once, when parsed: unknown operators and
//! malformed operands are rejected there. Evaluating a parsed filter never
//! fails; a record whose field is missing, has the wrong type or holds an
//! unparsable date simply does not match.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use vecstore::{filter::Filter, metadata};
//!
//! let filter = Filter::from_json(json!({"a.b": {"$gte": 5}})).unwrap();
//! let seven = metadata::from_json(json!({"a": {"b": 7}})).unwrap();
//! let three = metadata::from_json(json!({"a": {"b": 3}})).unwrap();
//! assert!(filter.matches(&seven));
//! assert!(!filter.matches(&three));
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    metadata::{self, Metadata, Value},
};

/// Formats tried, in order, after RFC 3339.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// A validated metadata filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "Metadata")]
pub struct Filter {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
struct Clause {
    path: Vec<String>,
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Contains(String),
    Regex(Regex),
    Exists(bool),
    DateAfter(NaiveDateTime),
    DateBefore(NaiveDateTime),
    DateRange {
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    },
}

impl Filter {
    /// Validate a filter expression.
    pub fn parse(expr: &Metadata) -> Result<Self> {
        let clauses = expr
            .iter()
            .map(|(path, condition)| parse_clause(path, condition))
            .collect::<Result<_>>()?;
        Ok(Self { clauses })
    }

    /// Validate a filter expression given as JSON.
    pub fn from_json(expr: serde_json::Value) -> Result<Self> {
        let expr = metadata::from_json(expr).map_err(|_| {
            Error::InvalidFilter("filter must be a JSON object".to_string())
        })?;
        Self::parse(&expr)
    }

    /// A filter without clauses accepts every record.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses.iter().all(|clause| {
            let field = metadata::lookup(metadata, &clause.path);
            clause.conditions.iter().all(|c| c.holds(field))
        })
    }
}

impl TryFrom<Metadata> for Filter {
    type Error = Error;

    fn try_from(expr: Metadata) -> Result<Self> {
        Self::parse(&expr)
    }
}

/// Evaluate `filter` against `metadata`.
pub fn matches(metadata: &Metadata, filter: &Filter) -> bool {
    filter.matches(metadata)
}

fn parse_clause(path: &str, condition: &Value) -> Result<Clause> {
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(Error::InvalidFilter(format!(
            "invalid field path '{path}'"
        )));
    }

    let conditions = match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => ops
            .iter()
            .map(|(op, operand)| parse_condition(path, op, operand))
            .collect::<Result<_>>()?,
        literal => vec![Condition::Eq(literal.clone())],
    };

    Ok(Clause {
        path: segments,
        conditions,
    })
}

fn parse_condition(path: &str, op: &str, operand: &Value) -> Result<Condition> {
    let condition = match op {
        "$eq" => Condition::Eq(operand.clone()),
        "$ne" => Condition::Ne(operand.clone()),
        "$gt" => Condition::Gt(number_operand(path, op, operand)?),
        "$gte" => Condition::Gte(number_operand(path, op, operand)?),
        "$lt" => Condition::Lt(number_operand(path, op, operand)?),
        "$lte" => Condition::Lte(number_operand(path, op, operand)?),
        "$in" => Condition::In(array_operand(path, op, operand)?),
        "$nin" => Condition::Nin(array_operand(path, op, operand)?),
        "$contains" => {
            Condition::Contains(string_operand(path, op, operand)?.to_lowercase())
        }
        "$regex" => {
            let pattern = string_operand(path, op, operand)?;
            let regex = Regex::new(pattern).map_err(|e| {
                Error::InvalidFilter(format!(
                    "{path}: invalid $regex pattern: {e}"
                ))
            })?;
            Condition::Regex(regex)
        }
        "$exists" => match operand {
            Value::Bool(b) => Condition::Exists(*b),
            other => return Err(bad_operand(path, op, "a boolean", other)),
        },
        "$date_after" => Condition::DateAfter(date_operand(path, op, operand)?),
        "$date_before" => {
            Condition::DateBefore(date_operand(path, op, operand)?)
        }
        "$date_range" => parse_date_range(path, operand)?,
        unknown => return Err(Error::InvalidFilterOperator(unknown.to_string())),
    };
    Ok(condition)
}

fn parse_date_range(path: &str, operand: &Value) -> Result<Condition> {
    let Value::Object(bounds) = operand else {
        return Err(bad_operand(
            path,
            "$date_range",
            "an object with start and/or end",
            operand,
        ));
    };
    if let Some(key) = bounds.keys().find(|k| *k != "start" && *k != "end") {
        return Err(Error::InvalidFilter(format!(
            "{path}: unexpected $date_range key '{key}'"
        )));
    }

    let bound = |key: &str| {
        bounds
            .get(key)
            .map(|v| date_operand(path, "$date_range", v))
            .transpose()
    };
    let start = bound("start")?;
    let end = bound("end")?;
    if start.is_none() && end.is_none() {
        return Err(Error::InvalidFilter(format!(
            "{path}: $date_range needs a start or an end"
        )));
    }
    Ok(Condition::DateRange { start, end })
}

fn bad_operand(path: &str, op: &str, expected: &str, got: &Value) -> Error {
    Error::InvalidFilter(format!(
        "{path}: {op} expects {expected}, got {}",
        got.type_name()
    ))
}

fn number_operand(path: &str, op: &str, operand: &Value) -> Result<f64> {
    operand
        .as_f64()
        .ok_or_else(|| bad_operand(path, op, "a number", operand))
}

fn string_operand<'a>(path: &str, op: &str, operand: &'a Value) -> Result<&'a str> {
    operand
        .as_str()
        .ok_or_else(|| bad_operand(path, op, "a string", operand))
}

fn array_operand(path: &str, op: &str, operand: &Value) -> Result<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        other => Err(bad_operand(path, op, "an array", other)),
    }
}

fn date_operand(path: &str, op: &str, operand: &Value) -> Result<NaiveDateTime> {
    let text = string_operand(path, op, operand)?;
    parse_date(text).ok_or_else(|| {
        Error::InvalidFilter(format!("{path}: {op} cannot parse date '{text}'"))
    })
}

/// Parse an ISO-8601 timestamp or one of a few common date layouts.
///
/// Offsets are normalised to UTC; bare dates mean midnight.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS.iter().find_map(|fmt| {
                NaiveDate::parse_from_str(text, fmt)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
        })
}

impl Condition {
    fn holds(&self, field: Option<&Value>) -> bool {
        let Some(value) = field else {
            return matches!(self, Condition::Exists(false));
        };

        match self {
            Condition::Exists(expected) => *expected,
            Condition::Eq(expected) => value == expected,
            Condition::Ne(expected) => value != expected,
            Condition::Gt(bound) => value.as_f64().is_some_and(|n| n > *bound),
            Condition::Gte(bound) => value.as_f64().is_some_and(|n| n >= *bound),
            Condition::Lt(bound) => value.as_f64().is_some_and(|n| n < *bound),
            Condition::Lte(bound) => value.as_f64().is_some_and(|n| n <= *bound),
            Condition::In(options) => any_in(value, options),
            Condition::Nin(options) => !any_in(value, options),
            Condition::Contains(needle) => {
                value
                    .as_str()
                    .is_some_and(|s| s.to_lowercase().contains(needle.as_str()))
            }
            Condition::Regex(regex) => {
                value.as_str().is_some_and(|s| regex.is_match(s))
            }
            Condition::DateAfter(bound) => field_date(value).is_some_and(|d| d > *bound),
            Condition::DateBefore(bound) => {
                field_date(value).is_some_and(|d| d < *bound)
            }
            Condition::DateRange { start, end } => {
                field_date(value).is_some_and(|d| {
                    start.is_none_or(|s| d >= s) && end.is_none_or(|e| d <= e)
                })
            }
        }
    }
}

/// Array fields match when any element is among `options`.
fn any_in(value: &Value, options: &[Value]) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| options.contains(item)),
        scalar => options.contains(scalar),
    }
}

fn field_date(value: &Value) -> Option<NaiveDateTime> {
    value.as_str().and_then(parse_date)
}
