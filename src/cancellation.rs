//! Cancellation framework: CancellationToken + generation guard.
//! Every match pass runs under a guard; preempting a pass (a new utterance
//! superseded its partial transcripts) or shutting the engine down cancels
//! it, and a task that sees its guard fail stops between dictionary entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Manages pass generations. Preemption advances the generation, cancels all
/// in-flight passes, and installs a fresh root token.
pub struct TaskGeneration {
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel all current passes, advance generation, return the new generation.
    pub fn cancel_and_advance(&self) -> u64 {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        *token_guard = CancellationToken::new();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Guard for a new pass in the current generation. The guard owns a child
    /// token, so cancelling it (e.g. on the pass deadline) leaves sibling
    /// passes running.
    pub fn guard(&self) -> GenerationGuard {
        let token_guard = self.current_token.read();
        let child = token_guard.child_token();
        let gen = self.generation.load(Ordering::SeqCst);
        GenerationGuard::new(Arc::clone(&self.generation), gen, child)
    }

    /// Read current generation.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancel all current passes without advancing generation.
    pub fn cancel_all(&self) {
        let token_guard = self.current_token.read();
        token_guard.cancel();
    }
}

/// Guard that a task checks between units of work.
/// If the generation has advanced past `my_generation`, the pass is stale.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    pub fn new(generation: Arc<AtomicU64>, my_generation: u64, token: CancellationToken) -> Self {
        Self {
            generation,
            my_generation,
            token,
        }
    }

    /// Returns true if this pass is still the current generation.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    /// Returns true if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true if the task should continue (not cancelled and still current).
    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this pass only.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}
