//! Cooperative cancellation.
//!
//! A [`CancelToken`] is cloned into every component that should observe an
//! abort. Cancellation is cooperative: components consult the token at the
//! start of each public call and at their yield points, finish the item in
//! flight, and then surface [`CsvError::Cancelled`] carrying the caller's
//! reason unchanged.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::CsvError;

/// Clonable abort handle shared between a caller and the engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. The first reason wins; later calls are no-ops.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// The reason passed to [`CancelToken::cancel`], or a generic one.
    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| "operation was aborted".to_string())
    }

    /// The error to surface once the token has fired.
    pub fn to_error(&self) -> CsvError {
        CsvError::Cancelled {
            reason: self.reason(),
        }
    }

    /// Check the token, returning the abort error if it has fired.
    pub(crate) fn check(&self) -> Result<(), CsvError> {
        if self.is_cancelled() {
            Err(self.to_error())
        } else {
            Ok(())
        }
    }
}

/// Check an optional token.
pub(crate) fn check(signal: Option<&CancelToken>) -> Result<(), CsvError> {
    match signal {
        Some(token) => token.check(),
        None => Ok(()),
    }
}
