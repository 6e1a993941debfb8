//! porthop-ssh: The session adapter the orchestrator drives
//!
//! Exposes the [`SessionFactory`]/[`RemoteSession`] contract (open a hop,
//! run a command and stream its output, probe a port, close) plus the
//! russh-backed implementation and the argument-vector builder for the
//! nested reverse-forward command.

pub mod client;
pub mod command;
pub mod session;

pub use client::SshSessionFactory;
pub use command::{join_argv, reverse_forward_argv, shell_quote};
pub use session::{ExecEvent, ExecHandle, RemoteSession, SessionFactory};
