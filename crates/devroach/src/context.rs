//! Call context for blocking provisioning steps
//!
//! A [`Context`] is passed explicitly down every call that may block. It
//! carries a cancellation token, an optional deadline and the tracing span
//! that events of the call are recorded under.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Why a step stopped before its future completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for crate::DevroachError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => crate::DevroachError::Cancelled,
            Interrupted::DeadlineExceeded => crate::DevroachError::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    span: tracing::Span,
}

impl Context {
    /// Create a context that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            span: tracing::info_span!(target: "devroach", "devroach"),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Bound every step to finish within `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Record the call's events under `span` instead of the default one
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Reports an interruption that has already happened, without waiting
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `future` to completion unless the context is cancelled or its deadline passes first
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use devroach::{Context, Interrupted};
    ///
    /// let ctx = Context::new();
    /// assert_eq!(ctx.run(async { 1 + 1 }).await, Ok(2));
    ///
    /// ctx.cancel();
    /// assert_eq!(ctx.run(async { 1 + 1 }).await, Err(Interrupted::Cancelled));
    /// # });
    /// ```
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;

        let future = future.instrument(self.span.clone());
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            output = future => Ok(output),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
