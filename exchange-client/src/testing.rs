use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    StatusCode,
};
use tokio::sync::Notify;
use url::Url;

use crate::{
    callback::ClientCallback,
    client::PageBufferClient,
    codec::{FramedPageCodec, Page},
    error::{PageError, TransportError},
    response::{
        BUFFER_COMPLETE_HEADER, PAGES_CONTENT_TYPE, PAGE_NEXT_TOKEN_HEADER, PAGE_TOKEN_HEADER,
    },
    transport::{PageTransport, RawPageResponse},
};

/// Install a fmt subscriber for the current test. Repeated calls are no-ops.
pub(crate) fn setup_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a `200 OK` page-stream response carrying the protocol headers.
pub(crate) fn pages_response(
    token: u64,
    next_token: u64,
    complete: bool,
    pages: &[Page],
) -> RawPageResponse {
    RawPageResponse {
        status: StatusCode::OK,
        headers: window_headers(token, next_token, complete, true),
        body: FramedPageCodec::encode(pages),
    }
}

/// Build a `204 No Content` empty-window response.
pub(crate) fn empty_response(token: u64, next_token: u64, complete: bool) -> RawPageResponse {
    RawPageResponse {
        status: StatusCode::NO_CONTENT,
        headers: window_headers(token, next_token, complete, false),
        body: Bytes::new(),
    }
}

fn window_headers(token: u64, next_token: u64, complete: bool, content_type: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if content_type {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(PAGES_CONTENT_TYPE));
    }
    headers.insert(PAGE_TOKEN_HEADER, HeaderValue::from(token));
    headers.insert(PAGE_NEXT_TOKEN_HEADER, HeaderValue::from(next_token));
    headers.insert(
        BUFFER_COMPLETE_HEADER,
        HeaderValue::from_static(if complete { "true" } else { "false" }),
    );
    headers
}

enum GetScript {
    Respond(Result<RawPageResponse, TransportError>),
    /// Park until the request is aborted.
    Hang,
}

/// Transport double serving scripted responses in order and logging every
/// request it sees.
#[derive(Default)]
pub(crate) struct MockTransport {
    gets: Mutex<VecDeque<GetScript>>,
    deletes: Mutex<VecDeque<Result<StatusCode, TransportError>>>,
    pub(crate) get_log: Mutex<Vec<(Url, u64)>>,
    pub(crate) delete_log: Mutex<Vec<Url>>,
}

impl MockTransport {
    pub(crate) fn push_get(&self, result: Result<RawPageResponse, TransportError>) {
        self.gets.lock().push_back(GetScript::Respond(result));
    }

    pub(crate) fn push_get_hang(&self) {
        self.gets.lock().push_back(GetScript::Hang);
    }

    pub(crate) fn push_delete(&self, result: Result<StatusCode, TransportError>) {
        self.deletes.lock().push_back(result);
    }
}

#[async_trait]
impl PageTransport for MockTransport {
    async fn get_pages(
        &self,
        uri: &Url,
        max_response_size: u64,
    ) -> Result<RawPageResponse, TransportError> {
        self.get_log.lock().push((uri.clone(), max_response_size));
        let script = self.gets.lock().pop_front().expect("unscripted GET");
        match script {
            GetScript::Respond(result) => result,
            GetScript::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            },
        }
    }

    async fn delete_buffer(&self, uri: &Url) -> Result<StatusCode, TransportError> {
        self.delete_log.lock().push(uri.clone());
        // An unscripted DELETE succeeds, matching a server that treats the
        // operation as idempotent.
        self.deletes
            .lock()
            .pop_front()
            .unwrap_or(Ok(StatusCode::OK))
    }
}

/// The notifications a test observed, in delivery order.
#[derive(Debug)]
pub(crate) enum Event {
    Page(Page),
    RequestComplete,
    Finished,
    Failed(PageError),
}

/// Records every callback and wakes tests waiting on a predicate.
#[derive(Default)]
pub(crate) struct TestCallback {
    pub(crate) events: Mutex<Vec<Event>>,
    notify: Notify,
}

impl TestCallback {
    /// Wait until the recorded events satisfy `predicate`.
    pub(crate) async fn wait_for(&self, predicate: impl Fn(&[Event]) -> bool) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking, so a notification
            // arriving in between is not lost.
            notified.as_mut().enable();
            if predicate(&self.events.lock()) {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}

impl ClientCallback for TestCallback {
    fn add_page(&self, _client: &PageBufferClient, page: Page) {
        self.record(Event::Page(page));
    }

    fn request_complete(&self, _client: &PageBufferClient) {
        self.record(Event::RequestComplete);
    }

    fn client_finished(&self, _client: &PageBufferClient) {
        self.record(Event::Finished);
    }

    fn client_failed(&self, _client: &PageBufferClient, error: PageError) {
        self.record(Event::Failed(error));
    }
}
