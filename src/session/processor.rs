//! Payload processors.
//!
//! A processor receives the raw bytes of one read and may return a reply.
//! It runs inline in the session loop, so it must not block for long, and
//! it must not rely on state shared with other sessions. A failure (or a
//! panic) ends only the session that invoked it.

use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;

/// Failure raised by a processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// The processor rejected the input.
    #[error("{0}")]
    Failed(String),

    /// The processor panicked.
    #[error("processor panicked: {0}")]
    Panicked(String),
}

impl ProcessorError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ProcessorError::Failed(reason.into())
    }
}

/// Outcome of one processor call.
pub type ProcessorResult = Result<Option<Vec<u8>>, ProcessorError>;

/// Interprets the bytes exchanged over one connection.
pub trait Processor: Send + Sync + 'static {
    /// Handle one chunk of input. `Ok(None)` means "no reply".
    fn process(&self, input: &[u8]) -> ProcessorResult;
}

impl<F> Processor for F
where
    F: Fn(&[u8]) -> ProcessorResult + Send + Sync + 'static,
{
    fn process(&self, input: &[u8]) -> ProcessorResult {
        self(input)
    }
}

/// Run `processor`, converting a panic into [`ProcessorError::Panicked`].
pub fn invoke(processor: &dyn Processor, input: &[u8]) -> ProcessorResult {
    match catch_unwind(AssertUnwindSafe(|| processor.process(input))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ProcessorError::Panicked(message))
        }
    }
}

/// Replies with its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Processor for Echo {
    fn process(&self, input: &[u8]) -> ProcessorResult {
        Ok(Some(input.to_vec()))
    }
}

/// Replies with the same bytes whatever the input.
#[derive(Debug, Clone)]
pub struct FixedReply {
    reply: Vec<u8>,
}

impl FixedReply {
    pub fn new(reply: impl Into<Vec<u8>>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    /// Default reply of a client session.
    pub fn client_default() -> Self {
        Self::new("Do nothing\n")
    }

    /// Default reply of a server session.
    pub fn server_default() -> Self {
        Self::new("Server does nothing\n")
    }
}

impl Processor for FixedReply {
    fn process(&self, _input: &[u8]) -> ProcessorResult {
        Ok(Some(self.reply.clone()))
    }
}

/// Swallows all input.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Processor for Discard {
    fn process(&self, _input: &[u8]) -> ProcessorResult {
        Ok(None)
    }
}
