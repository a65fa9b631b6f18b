//! Run options and cancellation.

use crate::constants::DEFAULT_CALL_TIMEOUT_SECS;
use crate::descriptor::ResourceKind;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared flag checked between descriptor steps
///
/// Cloning shares the flag; the CLI sets it from its Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for [`super::reconcile`] and [`super::teardown`]
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Delete and recreate resources that already exist
    pub replace: bool,
    /// Limit `replace` to these kinds; `None` applies it to every kind
    pub replace_kinds: Option<BTreeSet<ResourceKind>>,
    /// Keep going after a failed lookup instead of aborting the run; teardown always keeps going
    pub continue_on_error: bool,
    /// Perform lookups only and report what would change
    pub dry_run: bool,
    /// Upper bound for every single store call
    pub call_timeout: Duration,
    pub cancel: CancellationFlag,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            replace: false,
            replace_kinds: None,
            continue_on_error: false,
            dry_run: false,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            cancel: CancellationFlag::default(),
        }
    }
}

impl ReconcileOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    #[must_use]
    pub fn replace_only(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.replace_kinds = Some(kinds.into_iter().collect());
        self
    }

    #[must_use]
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cancel_with(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether an existing resource of `kind` is deleted and recreated
    #[must_use]
    pub fn replaces(&self, kind: ResourceKind) -> bool {
        self.replace
            && self
                .replace_kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&kind))
    }
}
