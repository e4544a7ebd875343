//! Filter engine - declarative rules that tag rows out of the pipeline

use crate::core::row::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Comparison applied by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    Between,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Contains => "contains",
            FilterOperator::Equals => "equals",
            FilterOperator::StartsWith => "startsWith",
            FilterOperator::EndsWith => "endsWith",
            FilterOperator::GreaterThan => "greaterThan",
            FilterOperator::LessThan => "lessThan",
            FilterOperator::Between => "between",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FilterOperator::GreaterThan | FilterOperator::LessThan | FilterOperator::Between
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule does with its match outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    /// Tag the row when the rule matches
    Eliminate,
    /// Tag the row when the rule does not match
    Pass,
}

/// A single filter rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Field name, possibly a dotted path into nested data
    pub field: String,
    pub operator: FilterOperator,
    /// Comparison value, or `"min,max"` for `between`
    pub value: String,
    pub action: FilterAction,
}

impl FilterRule {
    /// Evaluate the operator against a row.
    ///
    /// Returns `None` when the field is missing, which skips the rule.
    pub fn matches(&self, row: &Row) -> Option<bool> {
        let actual = row.lookup(&self.field)?;

        let matched = match self.operator {
            FilterOperator::Contains => text_of(actual).contains(&self.value.to_lowercase()),
            FilterOperator::Equals => text_of(actual) == self.value.to_lowercase(),
            FilterOperator::StartsWith => text_of(actual).starts_with(&self.value.to_lowercase()),
            FilterOperator::EndsWith => text_of(actual).ends_with(&self.value.to_lowercase()),
            FilterOperator::GreaterThan => compare(actual, &self.value, |a, b| a > b),
            FilterOperator::LessThan => compare(actual, &self.value, |a, b| a < b),
            FilterOperator::Between => match (number_of(actual), parse_range(&self.value)) {
                (Some(n), Some((min, max))) => n >= min && n <= max,
                _ => false,
            },
        };

        Some(matched)
    }

    /// Whether this rule, given a row, excludes it
    pub fn excludes(&self, row: &Row) -> bool {
        match (self.matches(row), self.action) {
            (Some(true), FilterAction::Eliminate) => true,
            (Some(false), FilterAction::Pass) => true,
            _ => false,
        }
    }

    /// Human-diagnosable tag stamped on rows this rule excludes
    pub fn tag(&self, prefix: &str) -> String {
        format!("{}_{}_{}_{}", prefix, self.field, self.operator, self.value)
    }

    /// Check that numeric operators carry a parsable value
    pub fn validate(&self) -> Result<(), String> {
        if self.field.trim().is_empty() {
            return Err("rule has an empty field".to_string());
        }
        match self.operator {
            FilterOperator::Between => parse_range(&self.value)
                .map(|_| ())
                .ok_or_else(|| format!("'{}' is not a \"min,max\" range", self.value)),
            FilterOperator::GreaterThan | FilterOperator::LessThan => self
                .value
                .trim()
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not a number", self.value)),
            _ => Ok(()),
        }
    }
}

/// Ordered rule set applied after a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default)]
    pub rules: Vec<FilterRule>,

    #[serde(default)]
    pub tag_prefix: String,
}

impl FilterSpec {
    /// Tag prefix, falling back when none was configured
    pub fn effective_prefix<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.tag_prefix.is_empty() {
            fallback
        } else {
            &self.tag_prefix
        }
    }

    /// First rule that excludes the row, if any
    pub fn first_exclusion(&self, row: &Row) -> Option<&FilterRule> {
        self.rules.iter().find(|rule| rule.excludes(row))
    }
}

/// Result of applying a filter spec to a row set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Untagged rows the filter looked at
    pub evaluated: usize,
    /// Rows stamped by this pass
    pub tagged: usize,
}

/// Apply a filter spec to every untagged row.
///
/// Rows tagged by an earlier step are never re-evaluated. The first rule
/// that excludes a row stamps it and evaluation for that row stops.
pub fn apply_filters(rows: &mut [Row], spec: &FilterSpec, fallback_prefix: &str) -> FilterOutcome {
    let prefix = spec.effective_prefix(fallback_prefix);
    let mut outcome = FilterOutcome::default();

    for row in rows.iter_mut().filter(|r| r.is_eligible()) {
        outcome.evaluated += 1;
        if let Some(rule) = spec.first_exclusion(row) {
            row.set_relevance_tag(rule.tag(prefix));
            outcome.tagged += 1;
        }
    }

    outcome
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn compare(actual: &Value, expected: &str, op: impl Fn(f64, f64) -> bool) -> bool {
    match (number_of(actual), expected.trim().parse::<f64>().ok()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn parse_range(value: &str) -> Option<(f64, f64)> {
    let (min, max) = value.split_once(',')?;
    let min = min.trim().parse::<f64>().ok()?;
    let max = max.trim().parse::<f64>().ok()?;
    Some((min, max))
}
