//! Session runtime: one task owning the orchestrator and its poller.
//!
//! Presentation code talks to the session through a cloneable
//! [`SessionHandle`]. Commands and poll ticks are serialised on the same
//! task, so the session is never mutated concurrently.

use crate::orchestrator::{AssignmentOrchestrator, CancelOutcome, SubmitOutcome};
use crate::poller::{CompletionPoller, TickReport};
use spoolsync_core::{
    Error, EventBus, Phase, Result, SessionDiagnostics, SessionEvent, SlotAddress, TagSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

enum Command {
    OpenSession(oneshot::Sender<TagSnapshot>),
    Select(SlotAddress, oneshot::Sender<Result<()>>),
    Submit(oneshot::Sender<Result<SubmitOutcome>>),
    Cancel(oneshot::Sender<Result<CancelOutcome>>),
    Phase(oneshot::Sender<Phase>),
    SelectedSlot(oneshot::Sender<Option<SlotAddress>>),
    StatusSummary(oneshot::Sender<Option<String>>),
    Snapshot(oneshot::Sender<TagSnapshot>),
    Diagnostics(oneshot::Sender<SessionDiagnostics>),
    Shutdown,
}

pub struct SessionRuntime;

impl SessionRuntime {
    /// Spawn the runtime task. It stops on `shutdown()` or when every handle is dropped.
    pub fn start(
        orchestrator: AssignmentOrchestrator,
        poll_interval: Duration,
    ) -> (SessionHandle, tokio::task::JoinHandle<()>) {
        let events = orchestrator.events().clone();
        let (tx, mut rx) = mpsc::channel::<Command>(32);

        let handle = tokio::spawn(async move {
            let mut orchestrator = orchestrator;
            let mut poller = CompletionPoller::new();
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_ms = poll_interval.as_millis() as u64, "Session runtime started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report: TickReport = poller.tick(&mut orchestrator).await;
                        if report.waiting {
                            debug!(?report, "Poll tick");
                        }
                    }
                    command = rx.recv() => {
                        let Some(command) = command else {
                            debug!("All session handles dropped, stopping runtime");
                            break;
                        };
                        if !handle_command(&mut orchestrator, command).await {
                            break;
                        }
                    }
                }
            }

            info!("Session runtime stopped");
        });

        (SessionHandle { tx, events }, handle)
    }
}

/// Returns `false` when the runtime should stop.
async fn handle_command(orchestrator: &mut AssignmentOrchestrator, command: Command) -> bool {
    match command {
        Command::OpenSession(reply) => {
            let snapshot = orchestrator.open_session().await.clone();
            let _ = reply.send(snapshot);
        }
        Command::Select(slot, reply) => {
            let _ = reply.send(orchestrator.select(slot));
        }
        Command::Submit(reply) => {
            let _ = reply.send(orchestrator.submit().await);
        }
        Command::Cancel(reply) => {
            let _ = reply.send(orchestrator.cancel().await);
        }
        Command::Phase(reply) => {
            let _ = reply.send(orchestrator.current_phase());
        }
        Command::SelectedSlot(reply) => {
            let _ = reply.send(orchestrator.selected_slot());
        }
        Command::StatusSummary(reply) => {
            let _ = reply.send(orchestrator.status_summary().map(str::to_owned));
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(orchestrator.snapshot().clone());
        }
        Command::Diagnostics(reply) => {
            let _ = reply.send(orchestrator.diagnostics().clone());
        }
        Command::Shutdown => return false,
    }
    true
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    events: Arc<EventBus>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.events.subscribe()
    }

    pub async fn open_session(&self) -> Result<TagSnapshot> {
        self.request(Command::OpenSession).await
    }

    pub async fn select(&self, slot: SlotAddress) -> Result<()> {
        self.request(|reply| Command::Select(slot, reply)).await?
    }

    pub async fn submit(&self) -> Result<SubmitOutcome> {
        self.request(Command::Submit).await?
    }

    pub async fn cancel(&self) -> Result<CancelOutcome> {
        self.request(Command::Cancel).await?
    }

    pub async fn phase(&self) -> Result<Phase> {
        self.request(Command::Phase).await
    }

    pub async fn selected_slot(&self) -> Result<Option<SlotAddress>> {
        self.request(Command::SelectedSlot).await
    }

    pub async fn status_summary(&self) -> Result<Option<String>> {
        self.request(Command::StatusSummary).await
    }

    pub async fn snapshot(&self) -> Result<TagSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub async fn diagnostics(&self) -> Result<SessionDiagnostics> {
        self.request(Command::Diagnostics).await
    }

    /// Ask the runtime to stop. Outstanding waits are left as they are.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::RuntimeStopped)?;
        rx.await.map_err(|_| Error::RuntimeStopped)
    }
}
