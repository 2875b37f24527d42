//! Drives one assignment session from open to a terminal outcome.
//!
//! Shared by `assign` and `simulate`; only the collaborators differ.

use spoolsync_assign::{
    AssignmentOrchestrator, OrchestratorSettings, SessionHandle, SessionRuntime, SubmitOutcome,
};
use spoolsync_config::AppConfig;
use spoolsync_core::{Collaborators, EventBus, Phase, SessionEvent, SlotAddress, TagSnapshot};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

pub async fn drive(
    collaborators: Collaborators,
    config: &AppConfig,
    events: Arc<EventBus>,
    slot: SlotAddress,
) -> Result<Phase, Box<dyn std::error::Error>> {
    let orchestrator = AssignmentOrchestrator::new(
        collaborators,
        OrchestratorSettings::from_config(&config.session),
        events,
    );
    let (handle, join) = SessionRuntime::start(orchestrator, config.poller.interval());
    let mut rx = handle.subscribe();

    let snapshot = handle.open_session().await?;
    print_snapshot(&snapshot);

    handle.select(slot).await?;
    match handle.submit().await? {
        SubmitOutcome::Completed { summary } => println!("\n  ✅ {summary}"),
        SubmitOutcome::Waiting { .. } => wait_for_insertion(&handle, &mut rx).await?,
        SubmitOutcome::Cancelled(cancel) => println!("\n  Cancelled wait on {}", cancel.slot),
    }

    let phase = handle.phase().await?;
    let diagnostics = handle.diagnostics().await?;
    println!("\n  Phase:        {phase}");
    println!(
        "  Diagnostics:  {}",
        serde_json::to_string(&diagnostics).unwrap_or_default()
    );

    handle.shutdown().await;
    join.await?;
    Ok(phase)
}

fn print_snapshot(snapshot: &TagSnapshot) {
    if snapshot.is_empty() {
        println!("  ⚠️  No tag staged");
        return;
    }
    println!("  Tag:          {}", snapshot.tag_id);
    println!("  Spool:        {} {}", snapshot.vendor, snapshot.filament_label());
    println!("  Color:        {} (#{:08X})", snapshot.color_name, snapshot.color_rgba);
    println!("  Weight:       {} g", snapshot.spool_weight);
    if snapshot.in_inventory {
        println!("  Inventory:    #{}", snapshot.spool_id);
    } else {
        println!("  ⚠️  Spool is not in inventory");
    }
}

/// Print progress until the wait ends. Ctrl-C cancels the staged assignment.
async fn wait_for_insertion(
    handle: &SessionHandle,
    rx: &mut broadcast::Receiver<Arc<SessionEvent>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                println!("\n  Cancelling...");
                match handle.cancel().await {
                    Ok(cancel) if cancel.device_acknowledged => {
                        println!("  Cancelled staged assignment on {}", cancel.slot);
                    }
                    Ok(cancel) => {
                        println!("  ⚠️  Printer did not confirm the cancel on {}", cancel.slot);
                    }
                    Err(e) => warn!(error = %e, "Cancel arrived after the wait ended"),
                }
                return Ok(());
            }
            event = rx.recv() => match event {
                Ok(event) => match event.as_ref() {
                    SessionEvent::InsertionRequested { prompt, .. } => println!("\n  ⏳ {prompt}"),
                    SessionEvent::SlotReading { slot, .. } => println!("  📡 Reading tag in {slot}..."),
                    SessionEvent::Completed { summary, .. } => {
                        println!("\n  ✅ {summary}");
                        return Ok(());
                    }
                    SessionEvent::Failed { slot, .. } => {
                        println!("\n  ❌ Assignment to {slot} failed");
                        return Ok(());
                    }
                    SessionEvent::Cancelled { slot, .. } => {
                        println!("\n  ⚠️  Gave up waiting for a spool in {slot}");
                        return Ok(());
                    }
                    other => debug!(?other, "Session event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}
