//! Condition evaluation.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde_json::Value;

use crate::model::{ConditionGroup, Conditions, Predicate};
use crate::parity::{Biweek, Parity};

/// The moment conditions are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    pub now: NaiveDateTime,
    pub biweek: Biweek,
}

impl EvalContext {
    pub fn new(now: NaiveDateTime, biweek: Biweek) -> Self {
        Self { now, biweek }
    }

    pub fn hhmm(&self) -> String {
        format!("{:02}:{:02}", self.now.hour(), self.now.minute())
    }
}

/// Evaluate a full tree. No groups means no conditions: `true`.
pub fn evaluate(conditions: &Conditions, ctx: &EvalContext) -> bool {
    conditions
        .mode
        .combine(conditions.groups.iter().map(|g| evaluate_group(g, ctx)))
}

pub fn evaluate_group(group: &ConditionGroup, ctx: &EvalContext) -> bool {
    group
        .mode
        .combine(group.items.iter().map(|p| evaluate_predicate(p, ctx)))
}

/// Evaluate one leaf, applying `negate`. Unknown kinds are `true`.
/// A parity test with no base date is `false` even when negated.
pub fn evaluate_predicate(predicate: &Predicate, ctx: &EvalContext) -> bool {
    let date = ctx.now.date();
    let raw = match predicate.kind.as_str() {
        "alwaysTrue" => true,
        "alwaysFalse" => false,
        "timeEquals" => predicate
            .value
            .as_str()
            .and_then(|t| plugdeck_plugin::parse_hhmm(t).ok())
            .is_some_and(|t| t == ctx.hhmm()),
        "weekdayIn" => numbers(&predicate.value).contains(&i64::from(date.weekday().number_from_monday())),
        "monthIn" => numbers(&predicate.value).contains(&i64::from(date.month())),
        "dayOfMonthIn" => numbers(&predicate.value).contains(&i64::from(date.day())),
        "biweek" => {
            let wanted = predicate.value.as_str().and_then(|s| s.parse::<Parity>().ok());
            match (wanted, ctx.biweek.parity(date)) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => return false,
            }
        }
        other => {
            tracing::debug!(kind = other, "unknown predicate kind, treating as true");
            true
        }
    };
    raw != predicate.negate
}

/// A number or a list of numbers (numeric strings accepted).
fn numbers(value: &Value) -> Vec<i64> {
    let one = |v: &Value| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match value {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        other => one(other).into_iter().collect(),
    }
}
