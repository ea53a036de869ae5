//! Long-polling client for a remote page buffer.
//!
//! This crate is the per-peer building block of a distributed exchange: a
//! consumer that aggregates pages from many upstream producers runs one
//! [`PageBufferClient`] per endpoint. Each client repeatedly pulls an
//! ordered, token-cursored stream of opaque binary pages over HTTP, hands
//! every page to its [`ClientCallback`], and deletes the remote buffer once
//! the server reports it drained. Transient failures are retried with
//! exponential backoff; a failure streak that outlives the configured error
//! budget, or a structurally invalid response, is reported as fatal and ends
//! the client's lifetime.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use exchange_client::{
//!     ClientCallback, ExchangeClientOptions, FramedPageCodec, Page, PageBufferClient, PageError,
//! };
//!
//! struct Consumer;
//!
//! impl ClientCallback for Consumer {
//!     fn add_page(&self, _client: &PageBufferClient, page: Page) {
//!         println!("{} positions", page.position_count());
//!     }
//!     fn request_complete(&self, client: &PageBufferClient) {
//!         // Keep draining until the client finishes or fails.
//!         client.schedule_request();
//!     }
//!     fn client_finished(&self, _client: &PageBufferClient) {}
//!     fn client_failed(&self, client: &PageBufferClient, _error: PageError) {
//!         client.close();
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let client = ExchangeClientOptions::default().connect(
//!     "http://worker-3:8080/v1/task/17/results/0".parse()?,
//!     Arc::new(FramedPageCodec),
//!     Arc::new(Consumer),
//! )?;
//! client.schedule_request();
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod callback;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod response;
pub mod transport;

#[cfg(test)]
mod testing;

pub use callback::ClientCallback;
pub use client::{PageBufferClient, PageBufferClientStatus};
pub use codec::{FramedPageCodec, Page, PageDeserializer};
pub use config::ExchangeClientOptions;
pub use error::{PageError, TransportError};
pub use response::PagesResponse;
pub use transport::{HttpPageTransport, PageTransport, RawPageResponse};
