use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Operator-facing diagnostic for an upstream node that keeps failing.
pub const WORKER_NODE_ERROR: &str = "Encountered too many errors talking to a worker node. \
     The node may have crashed or be under too much load.";

/// A failure raised by the transport itself, below the response decoder.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The response body exceeded the cap the request asked for.
    #[error("response from {uri} exceeded the maximum size of {limit} bytes")]
    ResponseTooLarge { uri: Url, limit: u64 },

    /// Any network-level failure: refused connection, reset, request timeout.
    #[error("request to {uri} failed: {source}")]
    Failed {
        uri: Url,
        #[source]
        source: anyhow::Error,
    },
}

/// The failure kinds the client distinguishes for control flow.
///
/// Every variant except [`Failed`](Self::Failed) is fatal: it is surfaced
/// through `client_failed` and the client is not re-armed. `Failed` wraps the
/// raw transient errors that drive the retry loop.
#[derive(Debug, Error)]
pub enum PageError {
    /// The response exceeded the advertised size cap. Never retried, no
    /// matter how short the error streak is: the next attempt would fetch the
    /// same oversized page.
    #[error("page from {uri} exceeded the maximum response size")]
    TooLarge { uri: Url },

    /// The server answered with something that is not a page stream: a bad
    /// status, a bad content type, a missing or malformed protocol header, or
    /// a body that failed to deserialize.
    #[error("invalid response from {uri}: {message}")]
    Transport { uri: Url, message: String },

    /// A streak of transient GET failures outlived the configured error
    /// budget.
    #[error("{} ({uri} - requests failed for {elapsed:?})", WORKER_NODE_ERROR)]
    TransportTimeout {
        uri: Url,
        elapsed: Duration,
        #[source]
        source: anyhow::Error,
    },

    /// A streak of transient DELETE failures outlived the configured error
    /// budget while acknowledging a drained buffer.
    #[error("{} ({uri} - buffer delete failed for {elapsed:?})", WORKER_NODE_ERROR)]
    TooManyRequestsFailed {
        uri: Url,
        elapsed: Duration,
        #[source]
        source: anyhow::Error,
    },

    /// A transient failure. The owner re-arms the client and the backoff
    /// controller spaces out the retries.
    #[error("request to {uri} failed: {source}")]
    Failed {
        uri: Url,
        #[source]
        source: anyhow::Error,
    },
}

impl PageError {
    /// Whether this error halts the retry loop and is reported through
    /// `client_failed`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PageError::Failed { .. })
    }

    /// The endpoint the failing request was addressed to.
    pub fn uri(&self) -> &Url {
        match self {
            PageError::TooLarge { uri }
            | PageError::Transport { uri, .. }
            | PageError::TransportTimeout { uri, .. }
            | PageError::TooManyRequestsFailed { uri, .. }
            | PageError::Failed { uri, .. } => uri,
        }
    }
}

impl From<TransportError> for PageError {
    /// Rewrite a raw transport failure for classification: an oversized
    /// response is fatal by contract, everything else stays transient.
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ResponseTooLarge { uri, .. } => PageError::TooLarge { uri },
            TransportError::Failed { uri, source } => PageError::Failed { uri, source },
        }
    }
}
