use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    StatusCode,
};
use url::Url;

use crate::{
    codec::{Page, PageDeserializer},
    error::PageError,
    transport::RawPageResponse,
};

/// Media type of a serialized page stream.
pub const PAGES_CONTENT_TYPE: &str = "application/X-presto-pages";

/// Request header carrying the response size cap, in bytes.
pub const MAX_SIZE_HEADER: &str = "X-Presto-Max-Size";

/// Response header: the token window the body fulfills.
pub const PAGE_TOKEN_HEADER: &str = "X-Presto-Page-Token";

/// Response header: the cursor to request next.
pub const PAGE_NEXT_TOKEN_HEADER: &str = "X-Presto-Page-Next-Token";

/// Response header: whether the server-side buffer has been fully drained.
pub const BUFFER_COMPLETE_HEADER: &str = "X-Presto-Buffer-Complete";

/// Everything one GET against a page buffer produced: the token window the
/// body fulfilled, the cursor to use next, the pages themselves, and whether
/// the server has finished producing.
#[derive(Clone, Debug)]
pub struct PagesResponse {
    token: u64,
    next_token: u64,
    pages: Vec<Page>,
    client_complete: bool,
}

impl PagesResponse {
    pub fn of(token: u64, next_token: u64, pages: Vec<Page>, client_complete: bool) -> Self {
        Self {
            token,
            next_token,
            pages,
            client_complete,
        }
    }

    /// A response carrying no pages, as produced by a `204 No Content` poll.
    pub fn empty(token: u64, next_token: u64, client_complete: bool) -> Self {
        Self::of(token, next_token, Vec::new(), client_complete)
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn next_token(&self) -> u64 {
        self.next_token
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn into_pages(self) -> Vec<Page> {
        self.pages
    }

    pub fn client_complete(&self) -> bool {
        self.client_complete
    }
}

/// Parse one raw HTTP response into a [`PagesResponse`].
///
/// `204 No Content` is the empty-window poll result and still carries the
/// three protocol headers. `200 OK` must carry the page-stream media type;
/// its body is run through `deserializer`. Everything else, including a
/// missing or malformed header and a body that fails to deserialize, is a
/// [`PageError::Transport`].
pub fn decode(
    uri: &Url,
    response: RawPageResponse,
    deserializer: &dyn PageDeserializer,
) -> Result<PagesResponse, PageError> {
    // No content means nothing was produced within the server-side wait
    // window, but the buffer is still live. The window headers are mandatory
    // even here.
    if response.status == StatusCode::NO_CONTENT {
        let (token, next_token, client_complete) = window_headers(uri, &response.headers)?;
        return Ok(PagesResponse::empty(token, next_token, client_complete));
    }

    if response.status != StatusCode::OK {
        return Err(transport_error(
            uri,
            format!("expected response code 200, got {}", response.status),
        ));
    }

    // An error page served under 200 must not reach the deserializer.
    let content_type = response
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    if !content_type.is_some_and(is_pages_media_type) {
        return Err(transport_error(
            uri,
            format!(
                "expected {PAGES_CONTENT_TYPE} response, got {}",
                content_type.unwrap_or("no content type")
            ),
        ));
    }

    let (token, next_token, client_complete) = window_headers(uri, &response.headers)?;
    let pages = deserializer
        .deserialize(response.body)
        .map_err(|err| transport_error(uri, format!("error reading page stream: {err}")))?;

    Ok(PagesResponse::of(token, next_token, pages, client_complete))
}

/// Extract and validate the three mandatory window headers.
fn window_headers(uri: &Url, headers: &HeaderMap) -> Result<(u64, u64, bool), PageError> {
    let token = required_header::<u64>(uri, headers, PAGE_TOKEN_HEADER)?;
    let next_token = required_header::<u64>(uri, headers, PAGE_NEXT_TOKEN_HEADER)?;
    let client_complete = required_header::<bool>(uri, headers, BUFFER_COMPLETE_HEADER)?;

    // A cursor that regresses would replay acknowledged pages forever.
    if next_token < token {
        return Err(transport_error(
            uri,
            format!("next token {next_token} regressed below token {token}"),
        ));
    }

    Ok((token, next_token, client_complete))
}

fn required_header<T>(uri: &Url, headers: &HeaderMap, name: &str) -> Result<T, PageError>
where
    T: std::str::FromStr,
{
    let value = headers
        .get(name)
        .ok_or_else(|| transport_error(uri, format!("expected {name} header")))?;
    value
        .to_str()
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| transport_error(uri, format!("invalid {name} header")))
}

fn is_pages_media_type(content_type: &str) -> bool {
    // Ignore media type parameters such as a charset.
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|media| media.eq_ignore_ascii_case(PAGES_CONTENT_TYPE))
}

fn transport_error(uri: &Url, message: String) -> PageError {
    PageError::Transport {
        uri: uri.clone(),
        message,
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        codec::FramedPageCodec,
        testing::{empty_response, pages_response},
    };

    fn uri() -> Url {
        "http://h/t".parse().unwrap()
    }

    fn decode_err(response: RawPageResponse) -> String {
        match decode(&uri(), response, &FramedPageCodec) {
            Err(PageError::Transport { message, .. }) => message,
            other => panic!("expected a transport error, got {other:?}"),
        }
    }

    #[test]
    fn no_content_is_an_empty_window() {
        let response = decode(&uri(), empty_response(3, 3, false), &FramedPageCodec).unwrap();
        assert_eq!(response.token(), 3);
        assert_eq!(response.next_token(), 3);
        assert!(!response.client_complete());
        assert!(response.pages().is_empty());
    }

    #[test]
    fn ok_response_carries_pages_in_order() {
        let pages = vec![
            Page::new(2, Bytes::from_static(b"p0")),
            Page::new(5, Bytes::from_static(b"p1")),
        ];
        let response = decode(
            &uri(),
            pages_response(0, 1, true, &pages),
            &FramedPageCodec,
        )
        .unwrap();

        assert_eq!(response.token(), 0);
        assert_eq!(response.next_token(), 1);
        assert!(response.client_complete());
        assert_eq!(response.pages(), &pages[..]);
    }

    #[test]
    fn unexpected_status_is_a_transport_error() {
        let mut response = pages_response(0, 1, false, &[]);
        response.status = StatusCode::INTERNAL_SERVER_ERROR;

        let message = decode_err(response);
        assert!(message.contains("500"), "{message}");
    }

    #[test]
    fn wrong_content_type_is_a_transport_error() {
        let mut response = pages_response(0, 1, false, &[]);
        response.headers.insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("text/html"),
        );

        let message = decode_err(response);
        assert!(message.contains("text/html"), "{message}");
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let mut response = pages_response(0, 1, false, &[]);
        response.headers.insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/x-presto-pages; charset=utf-8"),
        );

        assert!(decode(&uri(), response, &FramedPageCodec).is_ok());
    }

    #[test]
    fn missing_header_names_the_header() {
        let mut response = pages_response(0, 1, false, &[]);
        response.headers.remove(PAGE_NEXT_TOKEN_HEADER);

        let message = decode_err(response);
        assert!(message.contains(PAGE_NEXT_TOKEN_HEADER), "{message}");
    }

    #[test]
    fn malformed_token_is_a_transport_error() {
        let mut response = pages_response(0, 1, false, &[]);
        response.headers.insert(
            PAGE_TOKEN_HEADER,
            reqwest::header::HeaderValue::from_static("not-a-number"),
        );

        let message = decode_err(response);
        assert!(message.contains(PAGE_TOKEN_HEADER), "{message}");
    }

    #[test]
    fn headers_are_mandatory_on_no_content_too() {
        let mut response = empty_response(0, 0, false);
        response.headers.remove(BUFFER_COMPLETE_HEADER);

        let message = decode_err(response);
        assert!(message.contains(BUFFER_COMPLETE_HEADER), "{message}");
    }

    #[test]
    fn regressing_next_token_is_rejected() {
        let message = decode_err(pages_response(5, 4, false, &[]));
        assert!(message.contains("regressed"), "{message}");
    }

    #[test]
    fn undecodable_body_is_a_transport_error() {
        let mut response = pages_response(0, 1, false, &[]);
        response.body = Bytes::from_static(&[9, 9, 9]);

        let message = decode_err(response);
        assert!(message.contains("page stream"), "{message}");
    }
}
