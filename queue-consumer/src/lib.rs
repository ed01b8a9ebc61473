//! Concurrent, lease-renewing consumption of messages from a visibility-timeout queue.
//!
//! A [`Consumer`] runs one poller and a fixed pool of workers. Every fetched message is
//! wrapped in a [`Lease`] that keeps the message hidden from other consumers while it is
//! being handled, and cancels the handler's token if the lease cannot be renewed in time.

// Modules are private, the public surface is re-exported below.

// Types
mod types;
pub use types::AckRequest;
pub use types::FetchRequest;
pub use types::HandleResult;
pub use types::Message;
pub use types::PostMessage;
pub use types::PostMessageResult;
pub use types::PostMessagesRequest;
pub use types::RenewRequest;

// Boundaries
mod queue;
pub use queue::handler_fn;
pub use queue::Handler;
pub use queue::HandlerFn;
pub use queue::Queue;

// Errors
mod error;
// Errors raised by a queue backend for a single request
pub use error::QueueError;
// Errors surfaced by the consumer, through its error handler
pub use error::ConsumerError;

// Config
mod config;
pub use config::ConsumerConfig;
pub use config::LeasePolicy;
pub use config::ACK_REQUEST_TIMEOUT;
pub use config::DEFAULT_VISIBILITY_TIMEOUT;
pub use config::DEFAULT_WAIT_TIME;
pub use config::EXPIRY_FRACTION;
pub use config::MIN_FETCH_REQUEST_TIMEOUT;
pub use config::RENEW_FRACTION;
pub use config::RENEW_REQUEST_TIMEOUT;

mod retry;
pub use retry::RenewBackoff;

// Leases
mod lease;
pub use lease::Lease;

// Consumer
mod consumer;
pub use consumer::Consumer;
pub use consumer::ErrHandler;

// In-process backend
mod memory;
pub use memory::MemoryQueue;

pub mod metrics_consts;

#[doc(hidden)]
pub mod test_support;
