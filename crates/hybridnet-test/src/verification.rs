//! Verification helpers for testing node daemons
//!
//! Assertion helpers over a [`FakeHost`]'s kernel state and operation log.

use crate::FakeHost;
use hybridnet_daemon_common::{PolicyRule, RouteEntry};
use hybridnet_types::IpFamily;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected route '{route}' not found; table has {actual:?}")]
    RouteNotFound { route: String, actual: Vec<String> },

    #[error("Unexpected route '{route}' present")]
    UnexpectedRoute { route: String },

    #[error("Expected {family} rule '{rule}' not found; rules are {actual:?}")]
    RuleNotFound {
        family: IpFamily,
        rule: String,
        actual: Vec<String>,
    },

    #[error("Expected link '{link}' to exist and be up")]
    LinkMissing { link: String },

    #[error("Expected no kernel mutations, found {ops:?}")]
    UnexpectedMutations { ops: Vec<String> },

    #[error("Expected an operation containing '{expected}', found {ops:?}")]
    OperationMissing { expected: String, ops: Vec<String> },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Kernel state verifier
pub struct HostVerifier<'a> {
    host: &'a FakeHost,
}

impl<'a> HostVerifier<'a> {
    pub fn new(host: &'a FakeHost) -> Self {
        Self { host }
    }

    /// Verify that a route is installed
    pub fn assert_route(&self, route: &RouteEntry) -> VerifyResult<()> {
        let table = self.host.routes_in_table(route.table);
        if table.contains(route) {
            return Ok(());
        }
        Err(VerificationError::RouteNotFound {
            route: route.to_string(),
            actual: table.iter().map(ToString::to_string).collect(),
        })
    }

    /// Verify that no route for this table and destination is installed
    pub fn assert_no_route(&self, route: &RouteEntry) -> VerifyResult<()> {
        let found = self
            .host
            .routes_in_table(route.table)
            .into_iter()
            .find(|r| r.destination == route.destination);
        match found {
            Some(r) => Err(VerificationError::UnexpectedRoute {
                route: r.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Verify that a policy rule is installed
    pub fn assert_rule(&self, family: IpFamily, rule: &PolicyRule) -> VerifyResult<()> {
        let rules = self.host.rules(family);
        if rules.contains(rule) {
            return Ok(());
        }
        Err(VerificationError::RuleNotFound {
            family,
            rule: rule.to_string(),
            actual: rules.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn assert_link_up(&self, link: &str) -> VerifyResult<()> {
        if self.host.link_is_up(link) {
            Ok(())
        } else {
            Err(VerificationError::LinkMissing {
                link: link.to_string(),
            })
        }
    }

    /// Verify that the operation log is empty
    pub fn assert_no_mutations(&self) -> VerifyResult<()> {
        let ops = self.host.ops();
        if ops.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::UnexpectedMutations { ops })
        }
    }

    /// Verify that some logged operation contains `expected`
    pub fn assert_operation(&self, expected: &str) -> VerifyResult<()> {
        let ops = self.host.ops();
        if ops.iter().any(|op| op.contains(expected)) {
            Ok(())
        } else {
            Err(VerificationError::OperationMissing {
                expected: expected.to_string(),
                ops,
            })
        }
    }
}
