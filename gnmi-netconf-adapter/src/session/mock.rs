//! Recording NETCONF session for tests.
//!
//! Clones share state, so a test can hand one clone to the adapter and
//! inspect the recorded requests through another.

use std::future::{Future, ready};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Datastore, NetconfOps, SessionError};

#[derive(Debug, Default)]
struct MockState {
    response: String,
    get_failure: Option<String>,
    edit_failure: Option<(usize, String)>,
    filters: Vec<Option<String>>,
    sources: Vec<Datastore>,
    edits: Vec<(Datastore, String)>,
}

/// A device stand-in answering get-config with a canned document.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every get-config with `xml`.
    pub fn with_response(self, xml: impl Into<String>) -> Self {
        self.state().response = xml.into();
        self
    }

    /// Fail every get-config with `message`.
    pub fn fail_get(self, message: impl Into<String>) -> Self {
        self.state().get_failure = Some(message.into());
        self
    }

    /// Fail every edit-config with `message`.
    pub fn fail_edits(self, message: impl Into<String>) -> Self {
        self.fail_edits_after(0, message)
    }

    /// Accept the first `accepted` edits, then fail with `message`.
    pub fn fail_edits_after(self, accepted: usize, message: impl Into<String>) -> Self {
        self.state().edit_failure = Some((accepted, message.into()));
        self
    }

    /// Filters passed to get-config, in call order.
    pub fn filters(&self) -> Vec<Option<String>> {
        self.state().filters.clone()
    }

    /// Datastores read by get-config, in call order.
    pub fn sources(&self) -> Vec<Datastore> {
        self.state().sources.clone()
    }

    /// Edits applied (or attempted) by edit-config, in call order.
    pub fn edits(&self) -> Vec<(Datastore, String)> {
        self.state().edits.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl NetconfOps for MockSession {
    fn get_config_subtree(
        &mut self,
        filter: Option<&str>,
        source: Datastore,
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        let mut state = self.state();
        state.filters.push(filter.map(str::to_string));
        state.sources.push(source);
        let result = match &state.get_failure {
            Some(message) => Err(SessionError::Other(message.clone())),
            None => Ok(state.response.clone()),
        };
        ready(result)
    }

    fn edit_config(
        &mut self,
        target: Datastore,
        config: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send {
        let mut state = self.state();
        let applied = state.edits.len();
        state.edits.push((target, config.to_string()));
        let result = match &state.edit_failure {
            Some((accepted, message)) if applied >= *accepted => {
                Err(SessionError::Other(message.clone()))
            }
            _ => Ok(()),
        };
        ready(result)
    }
}
