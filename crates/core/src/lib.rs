//! # SpoolSync Core
//!
//! Domain types, collaborator traits, and error definitions for assigning
//! scanned filament spools to AMS tray slots.
//!
//! ## Design Philosophy
//!
//! Every external system (printer, inventory, NFC staging) is a trait here.
//! Implementations live in `spoolsync-backend`; the state machine lives in
//! `spoolsync-assign`. This enables:
//! - Running the same orchestrator against HTTP, a simulator, or a test script
//! - Clean dependency graph (all crates depend inward on core)

pub mod device;
pub mod error;
pub mod event;
pub mod session;
pub mod slot;
pub mod tag;

// Re-export key types at crate root for ergonomics
pub use device::{
    Collaborators, CompletionEvent, DeviceDirectory, DeviceHandle, DeviceInfo, DeviceLink,
    EventKey, KProfile, SpoolCatalog, TagSource, TrayCalibration,
};
pub use error::{DeviceError, Error, Result};
pub use event::{EventBus, SessionEvent};
pub use session::{AssignOutcome, CalibrationOutcome, Phase, SessionDiagnostics};
pub use slot::{ReadingMask, SlotAddress, Topology};
pub use tag::{SpoolRecord, StagedTag, TagFields, TagSnapshot};
