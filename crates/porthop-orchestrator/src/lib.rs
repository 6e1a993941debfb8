//! porthop-orchestrator: Supervises the configured tunnels
//!
//! The registry owns one worker per live tunnel name, routes control
//! commands to it, and aggregates the status records the workers publish.
//! Each worker drives its own connect/verify/retry state machine over two
//! hop sessions obtained from a [`porthop_ssh::SessionFactory`].

pub mod api;
pub mod registry;
pub mod status;
pub mod worker;

pub use registry::TunnelRegistry;
pub use status::{StatusEvent, StatusStore};
