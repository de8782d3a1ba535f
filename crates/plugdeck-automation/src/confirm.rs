//! Confirmation gate in front of an item's actions.
//!
//! Unanswered prompts approve once the item's timeout elapses. Declining is
//! the only way to stop an item that already passed its conditions.

use std::time::Duration;

use plugdeck_core::BoxFuture;
use serde::Serialize;
use strum::Display;
use tokio::sync::{mpsc, oneshot};

use crate::model::AutomationItem;

/// What the user is asked about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub item_id: String,
    pub item_name: String,
    pub timeout_secs: u64,
}

impl ConfirmRequest {
    pub fn for_item(item: &AutomationItem) -> Self {
        Self {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            timeout_secs: item.confirm.timeout,
        }
    }
}

/// Asks whether an item may run.
pub trait ConfirmPrompt: Send + Sync {
    /// `Some(true)` approves, `Some(false)` declines, `None` means the prompt
    /// went away without an answer. The caller bounds the wait.
    fn ask<'a>(&'a self, request: &'a ConfirmRequest) -> BoxFuture<'a, Option<bool>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Decision {
    /// No confirmation needed, or the user approved.
    Approved,
    /// Nobody answered in time.
    AutoApproved,
    Declined,
}

impl Decision {
    pub fn proceeds(self) -> bool {
        self != Self::Declined
    }
}

/// Run the gate for `item`.
pub async fn confirm(prompt: &dyn ConfirmPrompt, item: &AutomationItem) -> Decision {
    if !item.confirm.enabled {
        return Decision::Approved;
    }
    let request = ConfirmRequest::for_item(item);
    let wait = Duration::from_secs(item.confirm.timeout);

    let decision = match tokio::time::timeout(wait, prompt.ask(&request)).await {
        Ok(Some(true)) => Decision::Approved,
        Ok(Some(false)) => Decision::Declined,
        Ok(None) | Err(_) => Decision::AutoApproved,
    };
    tracing::info!(item = %item.id, %decision, "confirmation settled");
    decision
}

/// A prompt nobody can answer. Every confirmation auto-approves after its
/// timeout; used when running headless.
#[derive(Debug, Default, Clone, Copy)]
pub struct PendingPrompt;

impl ConfirmPrompt for PendingPrompt {
    fn ask<'a>(&'a self, request: &'a ConfirmRequest) -> BoxFuture<'a, Option<bool>> {
        tracing::info!(
            item = %request.item_id,
            timeout_secs = request.timeout_secs,
            "confirmation requested, no prompt attached"
        );
        Box::pin(std::future::pending::<Option<bool>>())
    }
}

/// A confirmation waiting for an answer from whoever drains the channel.
#[derive(Debug)]
pub struct PendingConfirm {
    pub request: ConfirmRequest,
    responder: oneshot::Sender<bool>,
}

impl PendingConfirm {
    /// Answer the prompt. Answers after the timeout are dropped.
    pub fn answer(self, approve: bool) {
        let _ = self.responder.send(approve);
    }

    pub fn approve(self) {
        self.answer(true);
    }

    pub fn decline(self) {
        self.answer(false);
    }
}

/// Forwards every confirmation over an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelPrompt {
    tx: mpsc::Sender<PendingConfirm>,
}

impl ChannelPrompt {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingConfirm>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ConfirmPrompt for ChannelPrompt {
    fn ask<'a>(&'a self, request: &'a ConfirmRequest) -> BoxFuture<'a, Option<bool>> {
        Box::pin(async move {
            let (responder, answer) = oneshot::channel();
            let pending = PendingConfirm {
                request: request.clone(),
                responder,
            };
            self.tx.send(pending).await.ok()?;
            answer.await.ok()
        })
    }
}
