//! Boundary contract for the text-generation collaborator.
//!
//! The pipeline never talks HTTP itself; provider selection, streaming and
//! API keys live behind this trait. The only things the core cares about are
//! the prompt pair in, the full text out, optional chunk streaming, and a
//! distinguishable "aborted" condition for cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

/// Cooperative cancellation flag, cloned into whatever task drives the
/// provider call. One token per lane: foreground edits, automation, and
/// workflow runs each get their own so stopping one never stops another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the lane can be reused for the next request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// Cancelled by the user or by lane shutdown. Surfaces as an
    /// "interrupted, retry available" state, never as an error state.
    Aborted,
    /// Network or provider failure.
    Failed(String),
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::Aborted => write!(f, "generation aborted"),
            GenerateError::Failed(msg) => write!(f, "generation failed: {}", msg),
        }
    }
}

impl std::error::Error for GenerateError {}

pub type ChunkFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Opaque generation capability, implemented by the embedding application.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        on_chunk: Option<ChunkFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<String, GenerateError>;
}

/// The exact last request, cached so an aborted or failed generation can be
/// retried once without the caller re-deriving the prompts.
#[derive(Debug, Clone, Default)]
pub struct RetrySlot {
    cached: Option<RetryRequest>,
}

#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl RetrySlot {
    pub fn store(&mut self, system_prompt: &str, user_prompt: &str) {
        self.cached = Some(RetryRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
        });
    }

    /// Consumes the slot: each cached request is good for one retry.
    pub fn take(&mut self) -> Option<RetryRequest> {
        self.cached.take()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_round_trip() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn retry_slot_is_single_use() {
        let mut slot = RetrySlot::default();
        slot.store("system", "user");
        let req = slot.take().expect("cached request");
        assert_eq!(req.system_prompt, "system");
        assert_eq!(req.user_prompt, "user");
        assert!(slot.take().is_none());
    }
}
