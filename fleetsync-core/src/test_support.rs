//! Test utilities for code that talks to a [`FeedSource`].
//!
//! [`StubFeedSource`] serves scripted feed pages and lookup tables from
//! memory, records every call it receives, and can be told to fail a given
//! feed call. It lets tests assert that a code path made no remote call at
//! all.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;

use crate::entities::{Controller, Device, Diagnostic, FailureMode, Keyed, UnitOfMeasure};
use crate::feed::{FeedError, FeedKind, FeedPage, FeedSource, FeedStart, FeedToken};
use crate::ids::EntityId;
use crate::records::{FaultData, LogRecord, StatusData};

/// One call received by a [`StubFeedSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubCall {
    /// `authenticate`.
    Authenticate,
    /// A feed page request.
    Feed {
        /// Feed requested.
        kind: FeedKind,
        /// Where the request started.
        start: FeedStart,
    },
    /// A full listing of a feedless table.
    GetAll {
        /// Upstream type name.
        type_name: &'static str,
    },
    /// A point lookup.
    Lookup {
        /// Upstream type name.
        type_name: &'static str,
        /// Identifier looked up.
        id: EntityId,
    },
}

#[derive(Debug, Default)]
struct Pages {
    log_records: VecDeque<FeedPage<LogRecord>>,
    status_data: VecDeque<FeedPage<StatusData>>,
    fault_data: VecDeque<FeedPage<FaultData>>,
    devices: VecDeque<FeedPage<Device>>,
    diagnostics: VecDeque<FeedPage<Diagnostic>>,
}

#[derive(Debug, Default)]
struct Tables {
    controllers: Vec<Controller>,
    failure_modes: Vec<FailureMode>,
    units: Vec<UnitOfMeasure>,
}

/// Scripted, call-recording [`FeedSource`].
///
/// Feeds with no queued page return an empty page whose token echoes the
/// request, so a drained feed stays put.
#[derive(Debug, Default)]
pub struct StubFeedSource {
    pages: RefCell<Pages>,
    tables: RefCell<Tables>,
    calls: RefCell<Vec<StubCall>>,
    feed_calls: Cell<usize>,
    failures: RefCell<HashMap<usize, FeedError>>,
    kind_failures: RefCell<HashMap<(FeedKind, usize), FeedError>>,
}

impl StubFeedSource {
    /// An empty stub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these controllers from `controllers` and point lookups.
    #[must_use]
    pub fn with_controllers(self, controllers: Vec<Controller>) -> Self {
        self.tables.borrow_mut().controllers = controllers;
        self
    }

    /// Serve these failure modes from `failure_modes` and point lookups.
    #[must_use]
    pub fn with_failure_modes(self, failure_modes: Vec<FailureMode>) -> Self {
        self.tables.borrow_mut().failure_modes = failure_modes;
        self
    }

    /// Serve these units from `units_of_measure`.
    #[must_use]
    pub fn with_units(self, units: Vec<UnitOfMeasure>) -> Self {
        self.tables.borrow_mut().units = units;
        self
    }

    /// Queue a page for the log record feed.
    pub fn push_log_records(&self, page: FeedPage<LogRecord>) {
        self.pages.borrow_mut().log_records.push_back(page);
    }

    /// Queue a page for the status data feed.
    pub fn push_status_data(&self, page: FeedPage<StatusData>) {
        self.pages.borrow_mut().status_data.push_back(page);
    }

    /// Queue a page for the fault data feed.
    pub fn push_fault_data(&self, page: FeedPage<FaultData>) {
        self.pages.borrow_mut().fault_data.push_back(page);
    }

    /// Queue a page for the device feed.
    pub fn push_devices(&self, page: FeedPage<Device>) {
        self.pages.borrow_mut().devices.push_back(page);
    }

    /// Queue a page for the diagnostic feed.
    pub fn push_diagnostics(&self, page: FeedPage<Diagnostic>) {
        self.pages.borrow_mut().diagnostics.push_back(page);
    }

    /// Fail the `call`-th feed request (1-based, counted across all feeds)
    /// with `error`.
    pub fn fail_feed_call(&self, call: usize, error: FeedError) {
        self.failures.borrow_mut().insert(call, error);
    }

    /// Fail the `call`-th request (1-based) made to the `kind` feed with
    /// `error`.
    pub fn fail_feed(&self, kind: FeedKind, call: usize, error: FeedError) {
        self.kind_failures.borrow_mut().insert((kind, call), error);
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.borrow().clone()
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Number of feed requests received so far.
    #[must_use]
    pub fn feed_call_count(&self) -> usize {
        self.feed_calls.get()
    }

    /// Start positions of every request made to `kind`, in order.
    #[must_use]
    pub fn feed_starts(&self, kind: FeedKind) -> Vec<FeedStart> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                StubCall::Feed { kind: seen, start } if *seen == kind => Some(*start),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StubCall) {
        self.calls.borrow_mut().push(call);
    }

    fn begin_feed(&self, kind: FeedKind, start: FeedStart) -> Result<(), FeedError> {
        self.record(StubCall::Feed { kind, start });
        let call = self.feed_calls.get() + 1;
        self.feed_calls.set(call);
        let nth = self.feed_starts(kind).len();
        if let Some(error) = self.kind_failures.borrow_mut().remove(&(kind, nth)) {
            return Err(error);
        }
        self.failures.borrow_mut().remove(&call).map_or(Ok(()), Err)
    }

    fn serve<T>(
        &self,
        kind: FeedKind,
        start: FeedStart,
        queue: impl FnOnce(&mut Pages) -> Option<FeedPage<T>>,
    ) -> Result<FeedPage<T>, FeedError> {
        self.begin_feed(kind, start)?;
        let next = queue(&mut self.pages.borrow_mut());
        Ok(next.unwrap_or_else(|| {
            let to_version = match start {
                FeedStart::Token(token) => token,
                FeedStart::Since(_) => FeedToken::ZERO,
            };
            FeedPage::new(Vec::new(), to_version)
        }))
    }

    fn lookup<T: Keyed + Clone>(
        &self,
        type_name: &'static str,
        id: &EntityId,
        table: impl FnOnce(&Tables) -> &[T],
    ) -> Option<T> {
        self.record(StubCall::Lookup {
            type_name,
            id: id.clone(),
        });
        let tables = self.tables.borrow();
        table(&tables).iter().find(|entry| entry.id() == id).cloned()
    }
}

#[async_trait(?Send)]
impl FeedSource for StubFeedSource {
    async fn authenticate(&self) -> Result<(), FeedError> {
        self.record(StubCall::Authenticate);
        Ok(())
    }

    async fn log_records(
        &self,
        start: FeedStart,
        _limit: usize,
    ) -> Result<FeedPage<LogRecord>, FeedError> {
        self.serve(FeedKind::LogRecord, start, |pages| {
            pages.log_records.pop_front()
        })
    }

    async fn status_data(
        &self,
        start: FeedStart,
        _limit: usize,
    ) -> Result<FeedPage<StatusData>, FeedError> {
        self.serve(FeedKind::StatusData, start, |pages| {
            pages.status_data.pop_front()
        })
    }

    async fn fault_data(
        &self,
        start: FeedStart,
        _limit: usize,
    ) -> Result<FeedPage<FaultData>, FeedError> {
        self.serve(FeedKind::FaultData, start, |pages| {
            pages.fault_data.pop_front()
        })
    }

    async fn devices(
        &self,
        start: FeedStart,
        _limit: usize,
    ) -> Result<FeedPage<Device>, FeedError> {
        self.serve(FeedKind::Device, start, |pages| pages.devices.pop_front())
    }

    async fn diagnostics(
        &self,
        start: FeedStart,
        _limit: usize,
    ) -> Result<FeedPage<Diagnostic>, FeedError> {
        self.serve(FeedKind::Diagnostic, start, |pages| {
            pages.diagnostics.pop_front()
        })
    }

    async fn controllers(&self) -> Result<Vec<Controller>, FeedError> {
        self.record(StubCall::GetAll {
            type_name: "Controller",
        });
        Ok(self.tables.borrow().controllers.clone())
    }

    async fn failure_modes(&self) -> Result<Vec<FailureMode>, FeedError> {
        self.record(StubCall::GetAll {
            type_name: "FailureMode",
        });
        Ok(self.tables.borrow().failure_modes.clone())
    }

    async fn units_of_measure(&self) -> Result<Vec<UnitOfMeasure>, FeedError> {
        self.record(StubCall::GetAll {
            type_name: "UnitOfMeasure",
        });
        Ok(self.tables.borrow().units.clone())
    }

    async fn controller(&self, id: &EntityId) -> Result<Option<Controller>, FeedError> {
        Ok(self.lookup("Controller", id, |tables| tables.controllers.as_slice()))
    }

    async fn failure_mode(&self, id: &EntityId) -> Result<Option<FailureMode>, FeedError> {
        Ok(self.lookup("FailureMode", id, |tables| tables.failure_modes.as_slice()))
    }
}

/// Drive a future to completion on a current-thread runtime.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
pub fn block_on_for_tests<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime for tests")
        .block_on(future)
}
