//! The automation engine: what fires on a tick, on protocol text, or on
//! demand, and how one item runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDateTime};
use parking_lot::Mutex;
use plugdeck_core::{HostConfig, HostResult, Value};
use plugdeck_plugin::{TimerAction, WeekFilter};
use serde::Serialize;
use serde_json::Map;
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::condition::{EvalContext, evaluate};
use crate::confirm::{ConfirmPrompt, Decision, PendingPrompt, confirm};
use crate::executor::{ActionExecutor, ActionOutcome, CommandRunner, TokioCommandRunner};
use crate::gateway::PluginGateway;
use crate::model::AutomationItem;
use crate::parity::{Biweek, Parity};
use crate::store::AutomationStore;

const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RunStatus {
    Completed,
    /// Conditions evaluated false.
    Skipped,
    Declined,
    Disabled,
}

/// How one run of an item went.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub item: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub outcomes: Vec<ActionOutcome>,
}

impl RunReport {
    fn without_actions(item: &AutomationItem, status: RunStatus, decision: Option<Decision>) -> Self {
        Self {
            item: item.id.clone(),
            status,
            decision,
            outcomes: vec![],
        }
    }
}

/// What one tick started. Dropping the report detaches the tasks.
#[derive(Debug, Default)]
pub struct TickReport {
    /// De-duplication keys of everything that fired, in firing order.
    pub fired: Vec<String>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl TickReport {
    /// Wait for every task started by the tick.
    pub async fn join(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "automation task panicked");
            }
        }
    }
}

/// Keys that already fired in the current minute.
#[derive(Default)]
struct FiredMinute {
    minute: String,
    keys: HashSet<String>,
}

impl FiredMinute {
    /// True the first time `key` is seen within `minute`.
    fn mark(&mut self, minute: &str, key: &str) -> bool {
        if self.minute != minute {
            self.minute = minute.to_string();
            self.keys.clear();
        }
        self.keys.insert(key.to_string())
    }
}

pub struct AutomationEngine {
    store: Arc<AutomationStore>,
    executor: ActionExecutor,
    prompt: Arc<dyn ConfirmPrompt>,
    biweek: Biweek,
    fired: Mutex<FiredMinute>,
    tasks: TaskTracker,
}

impl AutomationEngine {
    /// An engine running commands through `tokio::process`, with no prompt
    /// attached and no biweek base date.
    pub fn new(store: Arc<AutomationStore>, gateway: Arc<dyn PluginGateway>) -> Self {
        Self {
            store,
            executor: ActionExecutor::new(gateway, Arc::new(TokioCommandRunner)),
            prompt: Arc::new(PendingPrompt),
            biweek: Biweek::default(),
            fired: Mutex::new(FiredMinute::default()),
            tasks: TaskTracker::new(),
        }
    }

    /// Load the item store and parity settings named by `config`.
    pub fn from_config(config: &HostConfig, gateway: Arc<dyn PluginGateway>) -> HostResult<Self> {
        let store = Arc::new(AutomationStore::load(&config.automation_file)?);
        Ok(Self::new(store, gateway).with_biweek(Biweek::from_config(config)))
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        let gateway = self.executor.gateway().clone();
        self.executor = ActionExecutor::new(gateway, runner);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConfirmPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_biweek(mut self, biweek: Biweek) -> Self {
        self.biweek = biweek;
        self
    }

    pub fn store(&self) -> &Arc<AutomationStore> {
        &self.store
    }

    pub fn biweek(&self) -> Biweek {
        self.biweek
    }

    fn gateway(&self) -> &Arc<dyn PluginGateway> {
        self.executor.gateway()
    }

    fn first_in_minute(&self, minute: &str, key: &str) -> bool {
        self.fired.lock().mark(minute, key)
    }

    /// Conditions (unless `force`), confirmation, actions, then the
    /// `lastSuccessAt` stamp.
    pub async fn run_item(
        &self,
        item: &AutomationItem,
        params: &Map<String, Value>,
        force: bool,
        now: NaiveDateTime,
    ) -> RunReport {
        if !force && !evaluate(&item.conditions, &EvalContext::new(now, self.biweek)) {
            tracing::debug!(item = %item.id, "conditions not met");
            return RunReport::without_actions(item, RunStatus::Skipped, None);
        }

        let decision = confirm(self.prompt.as_ref(), item).await;
        if !decision.proceeds() {
            tracing::info!(item = %item.id, "declined, actions skipped");
            return RunReport::without_actions(item, RunStatus::Declined, Some(decision));
        }

        let outcomes = self.executor.execute(&item.id, &item.actions, params).await;
        let stamp = Local::now().to_rfc3339();
        if let Err(e) = self.store.stamp_success(&item.id, &stamp) {
            tracing::warn!(item = %item.id, error = %e, "could not persist lastSuccessAt");
        }

        let failed = outcomes.iter().filter(|o| !o.ok).count();
        tracing::info!(item = %item.id, actions = outcomes.len(), failed, "automation item finished");
        RunReport {
            item: item.id.clone(),
            status: RunStatus::Completed,
            decision: Some(decision),
            outcomes,
        }
    }

    /// Start everything due at `now`: time-triggered items, plugin period
    /// edges and plugin minute triggers, each at most once per minute.
    pub fn tick_at(self: &Arc<Self>, now: NaiveDateTime) -> TickReport {
        let minute = now.format(MINUTE_FORMAT).to_string();
        let hhmm = now.format("%H:%M").to_string();
        let mut report = TickReport::default();

        for item in self.store.list() {
            if !item.enabled || !item.has_time(&hhmm) {
                continue;
            }
            let key = format!("item:{}", item.id);
            if !self.first_in_minute(&minute, &key) {
                continue;
            }
            let engine = Arc::clone(self);
            report.tasks.push(self.tasks.spawn(async move {
                engine.run_item(&item, &Map::new(), false, now).await;
            }));
            report.fired.push(key);
        }

        // One snapshot per tick: a plugin torn down meanwhile is either
        // entirely present or entirely gone.
        let snapshot = self.gateway().timer_snapshot();
        let weekday = now.weekday().number_from_monday() as u8;
        let parity = self.biweek.parity(now.date());

        for (plugin, timers) in snapshot {
            for period in &timers.periods {
                if !period.weekdays.is_empty() && !period.weekdays.contains(&weekday) {
                    continue;
                }
                let in_week = match period.week {
                    WeekFilter::All => true,
                    WeekFilter::Odd => parity == Some(Parity::Odd),
                    WeekFilter::Even => parity == Some(Parity::Even),
                };
                if !in_week {
                    continue;
                }

                let edges = [
                    ("start", &period.start, &period.start_actions),
                    ("end", &period.end, &period.end_actions),
                ];
                for (edge, time, actions) in edges {
                    if *time != hhmm {
                        continue;
                    }
                    let key = format!("period:{plugin}:{}:{edge}", period.id);
                    if !self.first_in_minute(&minute, &key) {
                        continue;
                    }
                    report
                        .tasks
                        .push(self.spawn_timer_actions(plugin.clone(), key.clone(), actions.clone()));
                    report.fired.push(key);
                }
            }

            for trigger in &timers.minute_triggers {
                if trigger.time != hhmm {
                    continue;
                }
                let key = format!("minute:{plugin}:{}", trigger.id);
                if !self.first_in_minute(&minute, &key) {
                    continue;
                }
                let action = TimerAction {
                    target: plugin.clone(),
                    function: trigger.function.clone(),
                    args: trigger.args.clone(),
                };
                report
                    .tasks
                    .push(self.spawn_timer_actions(plugin.clone(), key.clone(), vec![action]));
                report.fired.push(key);
            }
        }

        if !report.fired.is_empty() {
            tracing::debug!(%minute, fired = ?report.fired, "tick");
        }
        report
    }

    fn spawn_timer_actions(
        self: &Arc<Self>,
        plugin: String,
        key: String,
        actions: Vec<TimerAction>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            for action in actions {
                let target = if action.target.is_empty() {
                    plugin.as_str()
                } else {
                    action.target.as_str()
                };
                if let Err(e) = engine
                    .gateway()
                    .call_plugin(target, &action.function, action.args.clone())
                    .await
                {
                    tracing::warn!(timer = %key, plugin = target, function = %action.function, error = %e, "timer action failed");
                }
            }
        })
    }

    /// Run every enabled item with a `protocol` trigger matching `text`.
    /// `params` feed `${protocol:name}` tokens.
    pub async fn handle_protocol(&self, text: &str, params: Map<String, Value>) -> Vec<RunReport> {
        let now = Local::now().naive_local();
        let matching: Vec<AutomationItem> = self
            .store
            .list()
            .into_iter()
            .filter(|item| item.enabled && item.has_protocol(text))
            .collect();
        tracing::info!(protocol = text, items = matching.len(), "protocol trigger");

        futures::future::join_all(
            matching
                .iter()
                .map(|item| self.run_item(item, &params, false, now)),
        )
        .await
    }

    /// Run one item now. Disabled items run only when forced; `force` also
    /// bypasses conditions.
    pub async fn run_now(&self, id: &str, force: bool) -> HostResult<RunReport> {
        let item = self.store.require(id)?;
        if !item.enabled && !force {
            return Ok(RunReport::without_actions(&item, RunStatus::Disabled, None));
        }
        Ok(self
            .run_item(&item, &Map::new(), force, Local::now().naive_local())
            .await)
    }

    /// Wait up to `grace` for running automation tasks. Returns whether
    /// everything finished.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        let finished = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        if !finished {
            tracing::warn!(running = self.tasks.len(), "automation tasks still running at shutdown");
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fired_minute_resets() {
        let mut fired = FiredMinute::default();
        assert!(fired.mark("2026-03-02 08:00", "item:a"));
        assert!(!fired.mark("2026-03-02 08:00", "item:a"));
        assert!(fired.mark("2026-03-02 08:00", "item:b"));
        assert!(fired.mark("2026-03-02 08:01", "item:a"));
        assert_eq!(fired.keys.len(), 1);
    }
}
