//! Listening-session cancellation: one CancellationToken per session.
//! Every enable opens a new session and cancels the previous one, so a worker
//! from an older session stops feeding the detector as soon as it checks its guard.
//! The generation number only labels sessions in logs.

use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Issues one token per listening session.
pub struct SessionGeneration {
    current_token: Mutex<CancellationToken>,
    generation: AtomicU64,
}

impl SessionGeneration {
    pub fn new() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self {
            current_token: Mutex::new(token),
            generation: AtomicU64::new(0),
        }
    }

    /// Cancel the current session and open a new one.
    pub fn advance(&self) -> SessionGuard {
        let mut token_guard = self.current_token.lock();
        token_guard.cancel();
        let token = CancellationToken::new();
        *token_guard = token.clone();
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        SessionGuard {
            my_generation: gen,
            token,
        }
    }

    /// Cancel the current session without opening a new one.
    pub fn cancel(&self) {
        self.current_token.lock().cancel();
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for SessionGeneration {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard a worker checks before each unit of work.
#[derive(Clone)]
pub struct SessionGuard {
    my_generation: u64,
    token: CancellationToken,
}

impl SessionGuard {
    /// True once the session was stopped or superseded by a newer one.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled()
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}
