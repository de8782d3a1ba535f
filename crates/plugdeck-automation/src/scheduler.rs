//! Minute-aligned tick loop.
//!
//! One immediate check, a sleep to the next `:00`, then a fixed 60 s
//! interval. A wall-clock jump between ticks (suspend, clock change) starts
//! over from the immediate check.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::AutomationEngine;

pub const TICK: Duration = Duration::from_secs(60);

/// Largest wall-clock gap between ticks not treated as a resume.
pub const RESUME_GAP: Duration = Duration::from_secs(90);

/// Time from `now` to the next minute boundary. Exactly on a boundary this is
/// a full minute; the immediate check covers the current one.
pub fn until_next_minute(now: NaiveDateTime) -> Duration {
    // Leap seconds report nanoseconds past 1e9.
    let millis = u64::from(now.second()) * 1000 + u64::from(now.nanosecond() / 1_000_000 % 1000);
    Duration::from_millis(60_000 - millis.min(59_999))
}

/// Whether the wall clock moved too far (or backwards) between two ticks.
pub fn is_resume(previous: NaiveDateTime, now: NaiveDateTime) -> bool {
    let gap = now - previous;
    gap < TimeDelta::zero() || gap > TimeDelta::from_std(RESUME_GAP).unwrap_or(TimeDelta::MAX)
}

/// Drive `engine` until `cancel` fires. Tick tasks are detached; call
/// [`AutomationEngine::drain`] afterwards to wait for them.
pub async fn run(engine: Arc<AutomationEngine>, cancel: CancellationToken) {
    tracing::info!("automation scheduler started");

    'align: loop {
        let mut last = Local::now().naive_local();
        engine.tick_at(last);

        let wait = until_next_minute(last);
        tracing::debug!(wait_ms = wait.as_millis() as u64, "aligning to minute boundary");
        tokio::select! {
            _ = cancel.cancelled() => break 'align,
            _ = tokio::time::sleep(wait) => {}
        }

        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'align,
                _ = interval.tick() => {}
            }

            let now = Local::now().naive_local();
            if is_resume(last, now) {
                tracing::info!(gap_secs = (now - last).num_seconds(), "wall clock jumped, realigning");
                continue 'align;
            }
            last = now;
            engine.tick_at(now);
        }
    }

    tracing::info!("automation scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn test_until_next_minute() {
        assert_eq!(until_next_minute(at(8, 0, 0, 0)), Duration::from_secs(60));
        assert_eq!(until_next_minute(at(8, 0, 59, 500)), Duration::from_millis(500));
        assert_eq!(until_next_minute(at(8, 0, 15, 250)), Duration::from_millis(44_750));
    }

    #[test]
    fn test_is_resume() {
        assert!(!is_resume(at(8, 0, 0, 0), at(8, 1, 0, 20)));
        assert!(!is_resume(at(8, 0, 0, 0), at(8, 1, 30, 0)));
        assert!(is_resume(at(8, 0, 0, 0), at(8, 1, 30, 1)));
        assert!(is_resume(at(8, 0, 0, 0), at(9, 15, 0, 0)));
        assert!(is_resume(at(8, 0, 0, 0), at(7, 59, 0, 0)));
    }
}
