//! In-memory fake provider for tests
//!
//! Implements [`ResourceClient`] over a hash map with scripted faults,
//! propagation lag, and status progression, and records every call so
//! tests can assert exact call counts and ordering.

use crate::client::{OperationHandle, RemoteResource, ResourceClient, ResourceState};
use crate::descriptor::Scope;
use crate::fault::RemoteError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Call {
    Get(String),
    Create(String),
    Delete(String),
}

/// Which operation a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Delete,
}

#[derive(Debug, Clone)]
struct Stored {
    config: serde_json::Value,
    /// Reads that still return 404 before the resource becomes visible
    invisible_reads: u32,
    /// Visible reads that still report Creating before Succeeded
    creating_reads: u32,
    statusless: bool,
    failed: bool,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, Stored>,
    calls: Vec<Call>,
    scripted: HashMap<(Op, String), VecDeque<RemoteError>>,
    /// Per-name behavior applied to resources created through the API
    propagation_lag: HashMap<String, u32>,
    settle_reads: HashMap<String, u32>,
    statusless: HashMap<String, bool>,
}

/// Scriptable in-memory cloud.
#[derive(Clone, Default)]
pub struct FakeCloud {
    inner: Arc<Mutex<Inner>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next call of `op` against `name`.
    /// Multiple queued errors are consumed one per call.
    pub fn fail_next(&self, op: Op, name: &str, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .scripted
            .entry((op, name.to_string()))
            .or_default()
            .push_back(error);
    }

    /// Resources created under `name` stay invisible to reads for this
    /// many gets (propagation lag).
    pub fn set_propagation_lag(&self, name: &str, reads: u32) {
        self.inner
            .lock()
            .unwrap()
            .propagation_lag
            .insert(name.to_string(), reads);
    }

    /// Resources created under `name` report Creating for this many
    /// visible reads before Succeeded.
    pub fn set_settle_reads(&self, name: &str, reads: u32) {
        self.inner
            .lock()
            .unwrap()
            .settle_reads
            .insert(name.to_string(), reads);
    }

    /// Resources created under `name` expose no status field.
    pub fn set_statusless(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .statusless
            .insert(name.to_string(), true);
    }

    /// Seed a resource as if a previous run had created it.
    pub fn insert_existing(&self, name: &str, config: serde_json::Value, state: ResourceState) {
        let mut inner = self.inner.lock().unwrap();
        inner.resources.insert(
            name.to_string(),
            Stored {
                config,
                invisible_reads: 0,
                creating_reads: 0,
                statusless: false,
                failed: state == ResourceState::Failed,
            },
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().resources.contains_key(name)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Names passed to create calls, in order.
    pub fn creates(&self) -> Vec<String> {
        self.filtered(|c| match c {
            Call::Create(n) => Some(n.clone()),
            _ => None,
        })
    }

    /// Names passed to delete calls, in order.
    pub fn deletes(&self) -> Vec<String> {
        self.filtered(|c| match c {
            Call::Delete(n) => Some(n.clone()),
            _ => None,
        })
    }

    /// Names passed to get calls, in order.
    pub fn gets(&self) -> Vec<String> {
        self.filtered(|c| match c {
            Call::Get(n) => Some(n.clone()),
            _ => None,
        })
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    fn filtered(&self, f: impl Fn(&Call) -> Option<String>) -> Vec<String> {
        self.inner.lock().unwrap().calls.iter().filter_map(f).collect()
    }

    fn scripted_error(inner: &mut Inner, op: Op, name: &str) -> Option<RemoteError> {
        inner
            .scripted
            .get_mut(&(op, name.to_string()))
            .and_then(|q| q.pop_front())
    }
}

/// Completion handle for fake operations; resolves immediately.
#[derive(Debug)]
pub struct FakeHandle {
    result: Result<(), RemoteError>,
}

impl OperationHandle for FakeHandle {
    async fn await_completion(self, _deadline: Duration) -> Result<(), RemoteError> {
        self.result
    }
}

impl ResourceClient for FakeCloud {
    type Handle = FakeHandle;

    async fn get(&self, _scope: &Scope, name: &str) -> Result<RemoteResource, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Get(name.to_string()));

        if let Some(err) = Self::scripted_error(&mut inner, Op::Get, name) {
            return Err(err);
        }

        let Some(stored) = inner.resources.get_mut(name) else {
            return Err(RemoteError::api(404, "ResourceNotFound", "no such resource"));
        };

        if stored.invisible_reads > 0 {
            stored.invisible_reads -= 1;
            return Err(RemoteError::api(404, "ResourceNotFound", "not yet visible"));
        }

        let state = if stored.statusless {
            None
        } else if stored.failed {
            Some(ResourceState::Failed)
        } else if stored.creating_reads > 0 {
            stored.creating_reads -= 1;
            Some(ResourceState::Creating)
        } else {
            Some(ResourceState::Succeeded)
        };

        Ok(RemoteResource {
            name: name.to_string(),
            config: stored.config.clone(),
            state,
        })
    }

    async fn create_or_update(
        &self,
        _scope: &Scope,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<FakeHandle, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Create(name.to_string()));

        if let Some(err) = Self::scripted_error(&mut inner, Op::Create, name) {
            return Err(err);
        }

        let stored = Stored {
            config: config.clone(),
            invisible_reads: inner.propagation_lag.get(name).copied().unwrap_or(0),
            creating_reads: inner.settle_reads.get(name).copied().unwrap_or(0),
            statusless: inner.statusless.get(name).copied().unwrap_or(false),
            failed: false,
        };
        inner.resources.insert(name.to_string(), stored);

        Ok(FakeHandle { result: Ok(()) })
    }

    async fn delete(&self, _scope: &Scope, name: &str) -> Result<FakeHandle, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Delete(name.to_string()));

        if let Some(err) = Self::scripted_error(&mut inner, Op::Delete, name) {
            return Err(err);
        }

        if inner.resources.remove(name).is_none() {
            return Err(RemoteError::api(404, "ResourceNotFound", "no such resource"));
        }

        Ok(FakeHandle { result: Ok(()) })
    }
}
