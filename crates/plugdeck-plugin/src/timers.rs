//! Plugin-declared periods and minute triggers.

use std::collections::HashMap;

use chrono::NaiveTime;
use parking_lot::RwLock;
use plugdeck_core::{HostError, HostResult, Value};
use serde::{Deserialize, Serialize};

/// Normalize an `H:MM`/`HH:MM` string to `HH:MM`.
pub fn parse_hhmm(text: &str) -> HostResult<String> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| HostError::Config {
            message: format!("invalid time '{text}', expected HH:MM"),
        })
}

/// Which weeks a period runs in, by biweek parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekFilter {
    #[default]
    All,
    Odd,
    Even,
}

/// A plugin function invoked by a timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerAction {
    /// Plugin to call; the owning plugin when empty.
    #[serde(default)]
    pub target: String,
    #[serde(rename = "fn", alias = "function")]
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

/// A daily window with actions at both edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSpec {
    pub id: String,
    pub start: String,
    pub end: String,
    /// ISO weekdays (Monday = 1, Sunday = 7). Empty means every day.
    #[serde(default)]
    pub weekdays: Vec<u8>,
    #[serde(default)]
    pub week: WeekFilter,
    #[serde(default)]
    pub start_actions: Vec<TimerAction>,
    #[serde(default)]
    pub end_actions: Vec<TimerAction>,
}

impl PeriodSpec {
    /// Validate times and weekdays, normalizing times to `HH:MM`.
    pub fn normalized(mut self) -> HostResult<Self> {
        self.start = parse_hhmm(&self.start)?;
        self.end = parse_hhmm(&self.end)?;
        if let Some(bad) = self.weekdays.iter().find(|d| !(1..=7).contains(*d)) {
            return Err(HostError::Config {
                message: format!("invalid weekday {bad} in period '{}'", self.id),
            });
        }
        Ok(self)
    }
}

/// Run `function` on the owning plugin at `time` every day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteTrigger {
    pub id: String,
    pub time: String,
    #[serde(rename = "fn", alias = "function")]
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

impl MinuteTrigger {
    pub fn normalized(mut self) -> HostResult<Self> {
        self.time = parse_hhmm(&self.time)?;
        Ok(self)
    }
}

/// Everything one plugin has scheduled.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginTimers {
    pub periods: Vec<PeriodSpec>,
    pub minute_triggers: Vec<MinuteTrigger>,
}

impl PluginTimers {
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty() && self.minute_triggers.is_empty()
    }
}

/// Timers of every plugin under one lock.
///
/// Teardown of a plugin is a single write-locked removal and readers take a
/// snapshot under a single read lock, so a reader never sees a plugin half
/// torn down.
#[derive(Default)]
pub struct TimerRegistry {
    timers: RwLock<HashMap<String, PluginTimers>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a period, replacing one with the same id.
    pub fn add_period(&self, plugin: &str, period: PeriodSpec) -> HostResult<()> {
        let period = period.normalized()?;
        let mut timers = self.timers.write();
        let entry = timers.entry(plugin.to_string()).or_default();
        entry.periods.retain(|p| p.id != period.id);
        entry.periods.push(period);
        Ok(())
    }

    /// Add a minute trigger, replacing one with the same id.
    pub fn add_minute_trigger(&self, plugin: &str, trigger: MinuteTrigger) -> HostResult<()> {
        let trigger = trigger.normalized()?;
        let mut timers = self.timers.write();
        let entry = timers.entry(plugin.to_string()).or_default();
        entry.minute_triggers.retain(|t| t.id != trigger.id);
        entry.minute_triggers.push(trigger);
        Ok(())
    }

    pub fn clear_periods(&self, plugin: &str) {
        let mut timers = self.timers.write();
        if let Some(entry) = timers.get_mut(plugin) {
            entry.periods.clear();
            if entry.is_empty() {
                timers.remove(plugin);
            }
        }
    }

    pub fn clear_minute_triggers(&self, plugin: &str) {
        let mut timers = self.timers.write();
        if let Some(entry) = timers.get_mut(plugin) {
            entry.minute_triggers.clear();
            if entry.is_empty() {
                timers.remove(plugin);
            }
        }
    }

    /// Remove everything a plugin scheduled.
    pub fn clear(&self, plugin: &str) -> Option<PluginTimers> {
        self.timers.write().remove(plugin)
    }

    pub fn list(&self, plugin: &str) -> PluginTimers {
        self.timers.read().get(plugin).cloned().unwrap_or_default()
    }

    /// Consistent copy of all timers, sorted by plugin id.
    pub fn snapshot(&self) -> Vec<(String, PluginTimers)> {
        let mut all: Vec<(String, PluginTimers)> = self
            .timers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
