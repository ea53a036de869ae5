use std::{str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use bytesize::ByteSize;
use clap::Parser;
use cld::ClDuration;
use thiserror::Error;
use url::Url;

use crate::{
    callback::ClientCallback, client::PageBufferClient, codec::PageDeserializer,
    transport::HttpPageTransport,
};

/// Configuration for a page-buffer client.
#[derive(Clone, Debug, Parser)]
pub struct ExchangeClientOptions {
    /// Cap on the body size of one GET, advertised to the server in the
    /// request and enforced while draining the response.
    #[clap(
        long,
        env = "EXCHANGE_CLIENT_MAX_RESPONSE_SIZE",
        default_value = "16MiB"
    )]
    pub max_response_size: ByteSize,

    /// How long a streak of transient failures may last before the client
    /// reports it as fatal.
    #[clap(
        long,
        env = "EXCHANGE_CLIENT_MIN_ERROR_DURATION",
        default_value = "1m",
        value_parser = parse_duration,
    )]
    pub min_error_duration: Duration,
}

impl Default for ExchangeClientOptions {
    fn default() -> Self {
        Self::parse_from(std::iter::empty::<String>())
    }
}

impl ExchangeClientOptions {
    /// Build a client for `endpoint` over the default HTTP transport.
    pub fn connect(
        self,
        endpoint: Url,
        deserializer: Arc<dyn PageDeserializer>,
        callback: Arc<dyn ClientCallback>,
    ) -> anyhow::Result<PageBufferClient> {
        PageBufferClient::new(
            &self,
            endpoint,
            Arc::new(HttpPageTransport::default()),
            deserializer,
            callback,
        )
        .with_context(|| "failed to create page buffer client")
    }
}

#[derive(Clone, Debug, Error)]
#[error("failed to parse duration: {reason}")]
pub struct ParseDurationError {
    reason: String,
}

/// Parse a duration like `500ms`, `1s` or `2m30s`.
pub fn parse_duration(s: &str) -> Result<Duration, ParseDurationError> {
    ClDuration::from_str(s)
        .map(Duration::from)
        .map_err(|err| ParseDurationError {
            reason: err.to_string(),
        })
}
