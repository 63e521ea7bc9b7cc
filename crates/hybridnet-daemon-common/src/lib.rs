//! Common infrastructure for the hybridnet node daemons.
//!
//! - [`shell`]: command execution with logged, quoted command lines
//! - [`host`]: the [`HostNetwork`] seam over links, routes and policy rules
//! - [`trigger`]: a coalescing, payload-free wake-up signal
//! - [`runner`]: the serialized reconcile loop with exponential backoff
//! - [`error`]: error types for host operations
//!
//! # Architecture
//!
//! A node daemon follows this pattern:
//!
//! 1. Watch the cluster store and fire a [`Trigger`] on any change
//! 2. Run one full reconcile pass per trigger via [`run_reconcile_loop`]
//! 3. Converge kernel state through a [`HostNetwork`] implementation
//! 4. Retry failed passes with backoff until they succeed

pub mod error;
pub mod host;
pub mod runner;
pub mod shell;
pub mod trigger;

// Re-export commonly used items at crate root
pub use error::{HostError, HostResult};
pub use host::{HostNetwork, PolicyRule, RouteEntry, RouteKind, ShellHost, MAIN_TABLE};
pub use runner::{run_reconcile_loop, Backoff, BackoffPolicy, LoopStats, Reconcile};
pub use trigger::{trigger_channel, Trigger, TriggerReceiver};
