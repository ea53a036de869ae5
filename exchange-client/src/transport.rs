use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{header::HeaderMap, StatusCode};
use url::Url;

use crate::{error::TransportError, response::MAX_SIZE_HEADER};

/// One raw HTTP response, before page decoding.
#[derive(Debug)]
pub struct RawPageResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The HTTP surface the client consumes. Implementations own connection
/// management, per-request timeouts and TLS; the client owns sequencing,
/// retries and cleanup.
#[async_trait]
pub trait PageTransport: Send + Sync + 'static {
    /// Issue `GET <uri>` with the size cap request header, draining at most
    /// `max_response_size` body bytes.
    async fn get_pages(
        &self,
        uri: &Url,
        max_response_size: u64,
    ) -> Result<RawPageResponse, TransportError>;

    /// Issue `DELETE <uri>`. Status-only; the body, if any, is not read.
    async fn delete_buffer(&self, uri: &Url) -> Result<StatusCode, TransportError>;
}

/// The default transport, backed by a shared `reqwest` client.
#[derive(Clone, Debug, Default)]
pub struct HttpPageTransport {
    client: reqwest::Client,
}

impl HttpPageTransport {
    /// Wrap an existing client so the owner can share one connection pool
    /// across every peer.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageTransport for HttpPageTransport {
    async fn get_pages(
        &self,
        uri: &Url,
        max_response_size: u64,
    ) -> Result<RawPageResponse, TransportError> {
        let mut response = self
            .client
            .get(uri.clone())
            .header(MAX_SIZE_HEADER, max_response_size.to_string())
            .send()
            .await
            .map_err(|err| failed(uri, err))?;

        let status = response.status();
        let headers = response.headers().clone();

        // The size cap is advisory for the server; enforce it while draining
        // so a misbehaving peer cannot balloon this process.
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|err| failed(uri, err))? {
            if (body.len() + chunk.len()) as u64 > max_response_size {
                return Err(TransportError::ResponseTooLarge {
                    uri: uri.clone(),
                    limit: max_response_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(RawPageResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }

    async fn delete_buffer(&self, uri: &Url) -> Result<StatusCode, TransportError> {
        let response = self
            .client
            .delete(uri.clone())
            .send()
            .await
            .map_err(|err| failed(uri, err))?;
        Ok(response.status())
    }
}

fn failed(uri: &Url, err: reqwest::Error) -> TransportError {
    TransportError::Failed {
        uri: uri.clone(),
        source: err.into(),
    }
}
