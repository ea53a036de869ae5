use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::sleep};
use url::Url;

use crate::{
    backoff::Backoff,
    callback::ClientCallback,
    codec::PageDeserializer,
    config::ExchangeClientOptions,
    error::PageError,
    response::{decode, PagesResponse},
    transport::PageTransport,
};

const NOT_SCHEDULED: &str = "not scheduled";

/// Mutable per-client state. Every field is read and written under the
/// client's lock; callbacks are always invoked after the guard is dropped.
#[derive(Debug)]
struct ClientState {
    /// Terminal flag, set by a successful DELETE or by `close`.
    closed: bool,
    /// Set between `schedule_request` and the moment the delayed task fires.
    scheduled: bool,
    /// Set once a response arrived with the buffer-complete flag; the next
    /// issued request is a DELETE instead of a GET.
    completed: bool,
    /// The current cursor. Advances only when a response's token matches it.
    token: u64,
    /// Handle to the single outstanding request task, if any.
    in_flight: Option<JoinHandle<()>>,
    http_request_state: &'static str,
    backoff: Backoff,
    last_update: OffsetDateTime,
}

impl ClientState {
    fn new() -> Self {
        Self {
            closed: false,
            scheduled: false,
            completed: false,
            token: 0,
            in_flight: None,
            http_request_state: NOT_SCHEDULED,
            backoff: Backoff::default(),
            last_update: OffsetDateTime::now_utc(),
        }
    }
}

struct ClientInner {
    endpoint: Url,
    max_response_size: u64,
    min_error_duration: Duration,
    transport: Arc<dyn PageTransport>,
    deserializer: Arc<dyn PageDeserializer>,
    callback: Arc<dyn ClientCallback>,
    state: Mutex<ClientState>,
    pages_received: AtomicU64,
    requests_scheduled: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
}

/// A single-peer, long-polling client over one remote page buffer.
///
/// The client repeatedly issues `GET <endpoint>/<token>` against an upstream
/// buffer, hands every received page to its [`ClientCallback`], and
/// acknowledges a fully drained buffer with a `DELETE <endpoint>`. It is the
/// per-peer building block of the exchange: a consumer fans one client out
/// per upstream endpoint and re-arms each with [`schedule_request`] after
/// every completed attempt.
///
/// All public operations are thread-safe and none of them blocks on I/O; the
/// requests themselves run on spawned tasks. At any instant there is at most
/// one in-flight request and at most one scheduled task per client. The type
/// is a cheap handle: clones share all state.
///
/// Two clients are equal iff their endpoints are equal, so a consumer can key
/// its pool by client directly.
///
/// [`schedule_request`]: Self::schedule_request
#[derive(Clone)]
pub struct PageBufferClient {
    inner: Arc<ClientInner>,
}

impl PageBufferClient {
    pub fn new(
        options: &ExchangeClientOptions,
        endpoint: Url,
        transport: Arc<dyn PageTransport>,
        deserializer: Arc<dyn PageDeserializer>,
        callback: Arc<dyn ClientCallback>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !endpoint.cannot_be_a_base(),
            "endpoint {endpoint} cannot carry a token path segment"
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint,
                max_response_size: options.max_response_size.as_u64(),
                min_error_duration: options.min_error_duration,
                transport,
                deserializer,
                callback,
                state: Mutex::new(ClientState::new()),
                pages_received: AtomicU64::new(0),
                requests_scheduled: AtomicU64::new(0),
                requests_completed: AtomicU64::new(0),
                requests_failed: AtomicU64::new(0),
            }),
        })
    }

    /// The endpoint this client drains.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Arm the client: submit a delayed task that issues the next request.
    ///
    /// Idempotent. A client that is closed, has a request in flight, or is
    /// already scheduled ignores the call, so owners may re-arm eagerly from
    /// any thread.
    pub fn schedule_request(&self) {
        let delay = {
            let mut state = self.inner.state.lock();
            if state.closed || state.in_flight.is_some() || state.scheduled {
                return;
            }
            state.scheduled = true;
            // The delay itself counts against the error budget.
            state.backoff.start_error_timer();
            state.backoff.delay()
        };
        self.inner.requests_scheduled.fetch_add(1, Ordering::Relaxed);

        let client = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            client.initiate_request();
        });
    }

    /// Whether a request is currently in flight.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    /// Stop the client.
    ///
    /// Idempotent. Cancels the in-flight request, if any, and fires one
    /// best-effort DELETE at the endpoint whose response is deliberately
    /// ignored; the authoritative cleanup is the DELETE the client sends
    /// itself once the buffer is complete. Never blocks.
    pub fn close(&self) {
        let (send_delete, in_flight) = {
            let mut state = self.inner.state.lock();
            let send_delete = !state.closed;
            state.closed = true;
            state.http_request_state = NOT_SCHEDULED;
            state.last_update = OffsetDateTime::now_utc();
            (send_delete, state.in_flight.take())
        };

        if let Some(handle) = in_flight {
            handle.abort();
        }

        if send_delete {
            let transport = Arc::clone(&self.inner.transport);
            let uri = self.inner.endpoint.clone();
            tokio::spawn(async move {
                if let Err(err) = transport.delete_buffer(&uri).await {
                    tracing::debug!(%uri, error = %err, "best-effort buffer delete failed");
                }
            });
        }
    }

    /// A point-in-time snapshot for observability.
    pub fn status(&self) -> PageBufferClientStatus {
        let state = self.inner.state.lock();
        let label = if state.closed {
            "closed"
        } else if state.in_flight.is_some() {
            "running"
        } else if state.scheduled {
            "scheduled"
        } else if state.completed {
            "completed"
        } else {
            "queued"
        };
        PageBufferClientStatus {
            uri: self.inner.endpoint.clone(),
            state: label,
            last_update: state.last_update,
            pages_received: self.inner.pages_received.load(Ordering::Relaxed),
            requests_scheduled: self.inner.requests_scheduled.load(Ordering::Relaxed),
            requests_completed: self.inner.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            http_request_state: state.http_request_state,
        }
    }

    /// The delayed task: decide between GET and DELETE and issue it.
    fn initiate_request(&self) {
        let mut state = self.inner.state.lock();
        state.scheduled = false;
        if state.closed || state.in_flight.is_some() {
            return;
        }
        if state.completed {
            self.send_delete(&mut state);
        } else {
            self.send_get_results(&mut state);
        }
        state.last_update = OffsetDateTime::now_utc();
    }

    /// Issue the GET for the current token window. Runs under the lock; the
    /// request itself runs on a spawned task whose handle becomes `in_flight`
    /// before the lock is released, so the continuation (which takes the lock
    /// first) can never observe an unregistered self.
    fn send_get_results(&self, state: &mut ClientState) {
        let uri = self.uri_for_token(state.token);
        let client = self.clone();
        let handle = tokio::spawn(async move {
            let result = match client
                .inner
                .transport
                .get_pages(&uri, client.inner.max_response_size)
                .await
            {
                Ok(raw) => decode(&uri, raw, &*client.inner.deserializer),
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(response) => client.on_get_success(response),
                Err(err) => client.on_get_failure(err),
            }
        });
        state.in_flight = Some(handle);
        state.http_request_state = "sending request";
    }

    fn on_get_success(&self, response: PagesResponse) {
        let token = response.token();
        let next_token = response.next_token();
        let client_complete = response.client_complete();

        let pages = {
            let mut state = self.inner.state.lock();
            state.backoff.reset();
            if token == state.token {
                state.token = next_token;
                response.into_pages()
            } else {
                // A replay of a window we already acknowledged; the server
                // will serve the current window on the next GET.
                tracing::debug!(
                    token,
                    current = state.token,
                    uri = %self.inner.endpoint,
                    "discarding replayed page window"
                );
                Vec::new()
            }
        };

        for page in pages {
            self.inner.pages_received.fetch_add(1, Ordering::Relaxed);
            self.inner.callback.add_page(self, page);
        }

        {
            let mut state = self.inner.state.lock();
            if client_complete {
                state.completed = true;
            }
            state.in_flight = None;
            state.http_request_state = NOT_SCHEDULED;
            state.last_update = OffsetDateTime::now_utc();
        }

        self.inner.requests_completed.fetch_add(1, Ordering::Relaxed);
        self.inner.callback.request_complete(self);
    }

    fn on_get_failure(&self, err: PageError) {
        tracing::debug!(uri = %err.uri(), error = %err, "request to peer failed");

        let error_duration = self.inner.state.lock().backoff.elapsed();
        let err = match err {
            // A streak of transient failures that outlived the error budget
            // is itself fatal.
            PageError::Failed { uri, source }
                if error_duration > self.inner.min_error_duration =>
            {
                PageError::TransportTimeout {
                    uri,
                    elapsed: error_duration,
                    source,
                }
            },
            other => other,
        };
        self.handle_failure(err);
    }

    /// Acknowledge the drained buffer. Runs under the lock, like
    /// `send_get_results`.
    fn send_delete(&self, state: &mut ClientState) {
        let uri = self.inner.endpoint.clone();
        let client = self.clone();
        let handle = tokio::spawn(async move {
            match client.inner.transport.delete_buffer(&uri).await {
                Ok(status) if status.is_success() => client.on_delete_success(),
                Ok(status) => client.on_delete_failure(PageError::Failed {
                    uri,
                    source: anyhow::anyhow!("expected delete to succeed, got {status}"),
                }),
                Err(err) => client.on_delete_failure(err.into()),
            }
        });
        state.in_flight = Some(handle);
        state.http_request_state = "sending delete";
    }

    fn on_delete_success(&self) {
        {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.in_flight = None;
            state.http_request_state = NOT_SCHEDULED;
            state.last_update = OffsetDateTime::now_utc();
        }
        self.inner.requests_completed.fetch_add(1, Ordering::Relaxed);
        self.inner.callback.client_finished(self);
    }

    fn on_delete_failure(&self, err: PageError) {
        tracing::error!(uri = %err.uri(), error = %err, "request to delete remote buffer failed");

        let error_duration = self.inner.state.lock().backoff.elapsed();
        let err = match err {
            PageError::Failed { uri, source }
                if error_duration > self.inner.min_error_duration =>
            {
                PageError::TooManyRequestsFailed {
                    uri,
                    elapsed: error_duration,
                    source,
                }
            },
            other => other,
        };
        self.handle_failure(err);
    }

    /// Common failure tail for both request kinds. Fatal errors are surfaced
    /// through `client_failed`; transient ones only feed the backoff and wait
    /// for the owner to re-arm the client.
    fn handle_failure(&self, err: PageError) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.inner.requests_completed.fetch_add(1, Ordering::Relaxed);

        if err.is_fatal() {
            tracing::warn!(client = %self, error = %err, "page buffer client failed");
            self.inner.callback.client_failed(self, err);
        }

        {
            let mut state = self.inner.state.lock();
            state.backoff.note_error();
            state.in_flight = None;
            state.http_request_state = NOT_SCHEDULED;
            state.last_update = OffsetDateTime::now_utc();
        }
        self.inner.callback.request_complete(self);
    }

    fn uri_for_token(&self, token: u64) -> Url {
        let mut uri = self.inner.endpoint.clone();
        uri.path_segments_mut()
            .expect("endpoint validated in new")
            .pop_if_empty()
            .push(&token.to_string());
        uri
    }
}

impl PartialEq for PageBufferClient {
    fn eq(&self, other: &Self) -> bool {
        self.inner.endpoint == other.inner.endpoint
    }
}

impl Eq for PageBufferClient {}

impl Hash for PageBufferClient {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.endpoint.hash(state);
    }
}

impl fmt::Debug for PageBufferClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBufferClient")
            .field("uri", &self.inner.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PageBufferClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status();
        write!(
            f,
            "PageBufferClient{{uri={}, state={}}}",
            status.uri,
            status.state.to_uppercase()
        )
    }
}

/// Point-in-time snapshot of one client, as returned by
/// [`PageBufferClient::status`].
#[derive(Clone, Debug)]
pub struct PageBufferClientStatus {
    pub uri: Url,
    /// `closed`, `running`, `scheduled`, `completed` or `queued`, first
    /// matching flag wins in that order.
    pub state: &'static str,
    pub last_update: OffsetDateTime,
    pub pages_received: u64,
    pub requests_scheduled: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub http_request_state: &'static str,
}
