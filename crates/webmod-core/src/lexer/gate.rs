//! One-time readiness gates for the lexers.
//!
//! Each lexer is prepared at most once per gate set. Concurrent first
//! callers all wait on the same initialization; every later caller gets the
//! ready lexer without waiting. Preparation never re-runs.

use super::{CjsLexer, EsmLexer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// A lexer could not be prepared.
#[derive(Error, Debug, Clone)]
pub enum GateError {
    #[error("CommonJS lexer failed to initialize: {0}")]
    Cjs(#[from] regex_lite::Error),
}

/// Readiness gates for the CJS and ESM lexers.
#[derive(Debug, Default)]
pub struct ReadinessGates {
    cjs: OnceCell<CjsLexer>,
    esm: OnceCell<EsmLexer>,
    initializations: AtomicUsize,
}

static GLOBAL: OnceLock<ReadinessGates> = OnceLock::new();

impl ReadinessGates {
    /// Fresh gates, independent of the process-wide set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide gates shared by every engine.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Wait for the CommonJS lexer.
    ///
    /// # Errors
    /// Returns [`GateError::Cjs`] if its patterns fail to compile. A failed
    /// preparation is retried by the next caller.
    pub async fn cjs(&self) -> Result<&CjsLexer, GateError> {
        self.cjs
            .get_or_try_init(|| async {
                let lexer = CjsLexer::new()?;
                self.initializations.fetch_add(1, Ordering::SeqCst);
                debug!("CommonJS lexer ready");
                Ok::<_, GateError>(lexer)
            })
            .await
    }

    /// Wait for the ES module lexer.
    pub async fn esm(&self) -> &EsmLexer {
        self.esm
            .get_or_init(|| async {
                self.initializations.fetch_add(1, Ordering::SeqCst);
                debug!("ES module lexer ready");
                EsmLexer::new()
            })
            .await
    }

    #[must_use]
    pub fn is_cjs_ready(&self) -> bool {
        self.cjs.initialized()
    }

    #[must_use]
    pub fn is_esm_ready(&self) -> bool {
        self.esm.initialized()
    }

    /// How many lexer preparations have completed on these gates.
    #[must_use]
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_gates_prepare_once() {
        let gates = ReadinessGates::new();
        assert!(!gates.is_cjs_ready());
        assert!(!gates.is_esm_ready());

        gates.cjs().await.unwrap();
        gates.esm().await;
        assert_eq!(gates.initializations(), 2);

        for _ in 0..5 {
            gates.cjs().await.unwrap();
            gates.esm().await;
        }
        assert_eq!(gates.initializations(), 2);
        assert!(gates.is_cjs_ready());
        assert!(gates.is_esm_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_share_preparation() {
        let gates = Arc::new(ReadinessGates::new());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let gates = Arc::clone(&gates);
                tokio::spawn(async move {
                    gates.cjs().await.map(|_| ()).unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(gates.initializations(), 1);
    }

    #[tokio::test]
    async fn test_global_is_shared() {
        let a = ReadinessGates::global();
        let b = ReadinessGates::global();
        assert!(std::ptr::eq(a, b));
        a.esm().await;
        assert!(b.is_esm_ready());
    }
}
