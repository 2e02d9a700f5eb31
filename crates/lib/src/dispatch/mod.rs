//! Dispatch of prompts to the remote workflow webhook.
//!
//! [`DispatchClient`] owns the retry policy; [`WebhookTransport`] is the seam tests replace.

mod client;
mod payload;
mod retry;
mod transport;

pub use client::{DispatchClient, FallbackResolver};
pub use payload::{DispatchFailure, DispatchPayload, DispatchResult, FailureKind};
pub use retry::{
    target_url, transition, AttemptOutcome, DispatchEvent, DispatchState, RetryPolicy,
    MAX_ATTEMPTS,
};
pub use transport::{HttpTransport, TransportError, WebhookResponse, WebhookTransport};
