//! Device backends for SpoolSync.
//!
//! - [`HttpBackend`]: the printer bridge REST API over `reqwest`
//! - [`SimulatedDevice`]: an in-memory printer for demos and tests
//!
//! Both implement every collaborator trait from `spoolsync-core`, so either
//! can be wired in with [`Collaborators::from_backend`](spoolsync_core::Collaborators::from_backend).

pub mod http;
pub mod simulated;

pub use http::{HttpBackend, parse_rgba};
pub use simulated::{DeviceCall, SimulatedDevice};
