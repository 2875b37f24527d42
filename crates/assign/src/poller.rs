//! Completion poller: drives a waiting session forward.
//!
//! Each tick, while the orchestrator waits for a spool to be inserted, the
//! poller checks the insertion timeout, signals when the printer starts
//! reading the waiting slot, and drains completion events since the wait
//! began. At most one event is consumed per tick.

use crate::orchestrator::AssignmentOrchestrator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use spoolsync_core::{Phase, SessionEvent, SlotAddress};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// The orchestrator was waiting for insertion when the tick started.
    pub waiting: bool,
    /// The insertion timeout fired and the wait was cancelled.
    pub expired: bool,
    /// `SlotReading` was published on this tick.
    pub reading_signalled: bool,
    pub poll_failed: bool,
    pub events_seen: usize,
    /// Phase the session moved to if a completion was consumed.
    pub consumed: Option<Phase>,
}

/// Identifies one wait so the reading signal fires once per wait.
type WaitKey = (Uuid, SlotAddress, DateTime<Utc>);

#[derive(Debug, Default)]
pub struct CompletionPoller {
    reading_signalled: Option<WaitKey>,
}

impl CompletionPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tick(&mut self, orchestrator: &mut AssignmentOrchestrator) -> TickReport {
        let mut report = TickReport::default();
        let Some(target) = orchestrator.waiting_target().cloned() else {
            return report;
        };
        report.waiting = true;

        if orchestrator.wait_expired() {
            match orchestrator.expire_wait().await {
                Ok(cancel) => {
                    info!(slot = %cancel.slot, acknowledged = cancel.device_acknowledged, "Staged assignment expired");
                    report.expired = true;
                }
                Err(e) => warn!(error = %e, "Failed to expire wait"),
            }
            return report;
        }

        let session_id = orchestrator.session().id;
        let wait_key = (session_id, target.slot, target.since);
        let link = orchestrator.collaborators().link.clone();

        if self.reading_signalled.as_ref() != Some(&wait_key) {
            match link.tray_reading_mask(target.device).await {
                Ok(mask) if mask.is_reading(&target.slot) => {
                    debug!(slot = %target.slot, "Printer is reading the waiting slot");
                    self.reading_signalled = Some(wait_key);
                    orchestrator.events().publish(SessionEvent::SlotReading {
                        session_id,
                        slot: target.slot,
                        timestamp: Utc::now(),
                    });
                    report.reading_signalled = true;
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Reading mask unavailable"),
            }
        }

        let events = match link.poll_completion_events(target.since).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Completion poll failed, skipping tick");
                report.poll_failed = true;
                return report;
            }
        };
        report.events_seen = events.len();

        for event in events {
            if !event.matches(&target.device_serial, &target.slot) {
                debug!(serial = %event.device_serial, slot = %event.slot, "Ignoring completion for another slot");
                continue;
            }
            match orchestrator.on_completion(event).await {
                Ok(phase) => {
                    report.consumed = Some(phase);
                    break;
                }
                Err(e) => debug!(error = %e, "Dropped completion event"),
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorSettings;
    use crate::test_helpers::*;
    use spoolsync_core::{AssignOutcome, DeviceError, EventBus, ReadingMask};
    use std::sync::Arc;
    use std::time::Duration;

    const A3: SlotAddress = SlotAddress::new(0, 2);

    async fn waiting(device: &Arc<ScriptedDevice>, timeout: Option<Duration>) -> AssignmentOrchestrator {
        let mut orch = AssignmentOrchestrator::new(
            device.collaborators(),
            OrchestratorSettings {
                nozzle_diameter: "0.4".into(),
                insertion_timeout: timeout,
            },
            Arc::new(EventBus::default()),
        );
        orch.open_session().await;
        orch.select(A3).unwrap();
        orch.submit().await.unwrap();
        orch
    }

    #[tokio::test]
    async fn idle_tick_does_nothing() {
        let device = Arc::new(ScriptedDevice::new());
        let mut orch = AssignmentOrchestrator::new(
            device.collaborators(),
            OrchestratorSettings::default(),
            Arc::new(EventBus::default()),
        );
        let report = CompletionPoller::new().tick(&mut orch).await;
        assert_eq!(report, TickReport::default());
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn consumes_at_most_one_event_per_tick() {
        let device = Arc::new(ScriptedDevice::new().with_assign(AssignOutcome::Staged));
        let mut orch = waiting(&device, None).await;
        device.push_poll(Ok(vec![
            completion("P2", A3, true),
            completion("P1", A3, false),
            completion("P1", A3, true),
        ]));

        let report = CompletionPoller::new().tick(&mut orch).await;
        assert_eq!(report.events_seen, 3);
        assert_eq!(report.consumed, Some(Phase::Failed));
        assert_eq!(orch.current_phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn polls_since_wait_start() {
        let device = Arc::new(ScriptedDevice::new().with_assign(AssignOutcome::Staged));
        let mut orch = waiting(&device, None).await;
        let since = orch.waiting_target().unwrap().since;

        CompletionPoller::new().tick(&mut orch).await;
        assert!(device.calls().contains(&Call::Poll { since }));
    }

    #[tokio::test]
    async fn poll_failure_skips_tick() {
        let device = Arc::new(ScriptedDevice::new().with_assign(AssignOutcome::Staged));
        let mut orch = waiting(&device, None).await;
        device.push_poll(Err(DeviceError::Network("timeout".into())));

        let report = CompletionPoller::new().tick(&mut orch).await;
        assert!(report.poll_failed);
        assert_eq!(orch.current_phase(), Phase::WaitingForInsertion);
    }

    #[tokio::test]
    async fn reading_signal_fires_once_per_wait() {
        let device = Arc::new(ScriptedDevice::new().with_assign(AssignOutcome::Staged));
        *device.mask.lock().unwrap() = ReadingMask::Known(1 << 2);
        let mut orch = waiting(&device, None).await;
        let mut rx = orch.events().subscribe();
        let mut poller = CompletionPoller::new();

        assert!(poller.tick(&mut orch).await.reading_signalled);
        assert!(!poller.tick(&mut orch).await.reading_signalled);

        let readings = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e.as_ref(), SessionEvent::SlotReading { .. }))
            .count();
        assert_eq!(readings, 1);
        assert_eq!(device.count(|c| *c == Call::ReadingMask), 1);
    }

    #[tokio::test]
    async fn reading_other_slot_is_not_signalled() {
        let device = Arc::new(ScriptedDevice::new().with_assign(AssignOutcome::Staged));
        *device.mask.lock().unwrap() = ReadingMask::Known(1 << 3);
        let mut orch = waiting(&device, None).await;

        let report = CompletionPoller::new().tick(&mut orch).await;
        assert!(!report.reading_signalled);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_wait() {
        let device = Arc::new(ScriptedDevice::new().with_assign(AssignOutcome::Staged));
        let mut orch = waiting(&device, Some(Duration::from_secs(30))).await;
        let mut poller = CompletionPoller::new();

        assert!(!poller.tick(&mut orch).await.expired);
        tokio::time::advance(Duration::from_secs(31)).await;

        let report = poller.tick(&mut orch).await;
        assert!(report.expired);
        assert_eq!(orch.current_phase(), Phase::Idle);
        assert_eq!(device.count(|c| matches!(c, Call::Cancel { .. })), 1);
    }

    #[tokio::test]
    async fn staged_replace_survives_empty_ticks_then_fails() {
        let device = Arc::new(
            ScriptedDevice::new()
                .with_assign(AssignOutcome::StagedReplace)
                .with_profile(3),
        );
        let mut orch = waiting(&device, None).await;
        let mut poller = CompletionPoller::new();

        for _ in 0..10 {
            let report = poller.tick(&mut orch).await;
            assert!(report.waiting);
            assert!(report.consumed.is_none());
        }
        assert_eq!(orch.current_phase(), Phase::WaitingForInsertion);

        device.push_poll(Ok(vec![completion("P1", A3, false)]));
        let report = poller.tick(&mut orch).await;
        assert_eq!(report.consumed, Some(Phase::Failed));
        assert_eq!(device.count(|c| matches!(c, Call::Calibrate { .. })), 0);
    }
}
