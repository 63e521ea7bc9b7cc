//! Test infrastructure for hybridnet node daemons
//!
//! Provides:
//! - Descriptor fixtures for networks, subnets and remote subnets
//! - An in-memory [`FakeHost`] that records every kernel mutation
//! - Verification helpers over the fake host's state

pub mod fixtures;
mod fake_host;
mod verification;

pub use fake_host::FakeHost;
pub use fixtures::*;
pub use verification::*;
