use crate::{client::PageBufferClient, codec::Page, error::PageError};

/// The narrow interface between a client and its owning consumer.
///
/// All four notifications are delivered from spawned tasks and never while
/// the client's internal lock is held, so implementations may call back into
/// the client (`status`, `schedule_request`, `close`). They must not block:
/// an implementation that needs to do real work hands it off.
///
/// `client_finished` and `client_failed` are mutually exclusive terminal
/// signals for one client lifetime. If `close` races with an in-flight
/// response, any of these notifications may be skipped.
pub trait ClientCallback: Send + Sync + 'static {
    /// A page was taken from the remote buffer, in server order. Zero or
    /// more times per request.
    fn add_page(&self, client: &PageBufferClient, page: Page);

    /// A request attempt finished, successfully or not. Exactly once per
    /// attempt; the owner re-arms the client with `schedule_request` unless
    /// `client_failed` was signaled.
    fn request_complete(&self, client: &PageBufferClient);

    /// The drained remote buffer was deleted; the client is closed.
    fn client_finished(&self, client: &PageBufferClient);

    /// A fatal error was classified; the client will not retry. The owner is
    /// expected to `close` the client.
    fn client_failed(&self, client: &PageBufferClient, error: PageError);
}
