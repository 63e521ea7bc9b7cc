//! Error types for routemgrd.
//!
//! Every variant aborts the current reconcile pass; the pass is retried as a
//! whole. None of them is fatal to the daemon.

use hybridnet_types::IpFamily;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for routemgrd operations.
pub type RouteMgrResult<T> = Result<T, RouteMgrError>;

/// Kernel changes made and attempted by a sync that did not fully converge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDelta {
    /// Changes that were applied, e.g. `route add 10.0.0.0/24 dev eth0.10 table 10000`.
    pub applied: Vec<String>,
    /// Changes that failed, with the reason appended.
    pub failed: Vec<String>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.failed.is_empty()
    }
}

impl fmt::Display for SyncDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} applied, {} failed", self.applied.len(), self.failed.len())
    }
}

/// Errors raised by the cluster store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not serve a list or get.
    #[error("Store operation failed: {operation}: {message}")]
    Unavailable { operation: String, message: String },

    /// A snapshot document could not be decoded.
    #[error("Failed to decode snapshot {source_name}: {message}")]
    Decode { source_name: String, message: String },

    /// A snapshot file could not be read.
    #[error("Failed to read snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur during a reconcile pass.
#[derive(Debug, Error)]
pub enum RouteMgrError {
    /// A subnet references a network that does not exist.
    #[error("Subnet '{subnet}' references unknown network '{network}'")]
    Resolution { subnet: String, network: String },

    /// A range descriptor failed validation.
    #[error("Malformed range in '{subject}': {reason}")]
    MalformedRange { subject: String, reason: String },

    /// A forwarding interface could not be named, looked up or created.
    #[error("Failed to provision interface '{interface}': {reason}")]
    InterfaceProvision { interface: String, reason: String },

    /// A remote subnet overlaps an already registered subnet.
    #[error("Remote subnet {cidr} overlaps registered subnet {existing}")]
    RemoteSubnetConflict { cidr: String, existing: String },

    /// Kernel route convergence did not complete.
    #[error("Failed to sync {family} routes ({delta}): {reason}")]
    Sync {
        family: IpFamily,
        delta: SyncDelta,
        reason: String,
    },

    /// The IPv6 capability check failed.
    #[error("Failed to check IPv6 global state: {reason}")]
    CapabilityCheck { reason: String },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RouteMgrError {
    /// Creates a malformed range error.
    pub fn malformed(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRange {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Creates an interface provisioning error.
    pub fn provision(interface: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InterfaceProvision {
            interface: interface.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a sync error.
    pub fn sync(family: IpFamily, delta: SyncDelta, reason: impl Into<String>) -> Self {
        Self::Sync {
            family,
            delta,
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition that may
    /// clear on retry without any descriptor change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouteMgrError::InterfaceProvision { .. }
                | RouteMgrError::Sync { .. }
                | RouteMgrError::CapabilityCheck { .. }
                | RouteMgrError::Store(_)
        )
    }
}
