//! NETCONF session seam.
//!
//! The adapter only needs two operations from a device session, expressed by
//! [`NetconfOps`]. [`StdioSession`] speaks NETCONF over the stdio of a
//! spawned transport command; [`mock::MockSession`] records requests for
//! tests.

pub mod mock;
mod stdio;

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use stdio::StdioSession;

/// Named configuration datastore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    #[default]
    Candidate,
    Running,
}

impl Datastore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Datastore::Candidate => "candidate",
            Datastore::Running => "running",
        }
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a NETCONF session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("rpc-error: {0}")]
    Rpc(String),

    #[error("session closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Operations the adapter performs against a device.
///
/// Calls are issued one at a time; implementations need not support
/// pipelining.
pub trait NetconfOps: Send {
    /// Run `<get-config>` on `source`, optionally scoped by a subtree filter,
    /// and return the contents of the reply's `<data>` element.
    fn get_config_subtree(
        &mut self,
        filter: Option<&str>,
        source: Datastore,
    ) -> impl Future<Output = Result<String, SessionError>> + Send;

    /// Run `<edit-config>` on `target` with the given `<config>` contents.
    fn edit_config(
        &mut self,
        target: Datastore,
        config: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}
