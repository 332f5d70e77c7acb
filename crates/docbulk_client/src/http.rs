//! HTTP transport implementation.
//!
//! Requests follow the Elasticsearch REST layout (`/_bulk`, `/_doc`,
//! `/_search`, `/_search/scroll`, `/_count`, `/_refresh`). The actual HTTP
//! client is abstracted via a trait so any library (reqwest, hyper, ureq)
//! or an in-process loopback can carry the bytes.

use crate::config::HttpConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{DocumentTransport, VersionedDocument, WriteAck, WriteRequest};
use docbulk_protocol::{
    encode_bulk_body, format_ttl, BulkAction, BulkItemResponse, BulkResponse, ClearScrollRequest,
    ConcurrencyToken, CountRequest, CountResponse, GetResponse, RefreshPolicy, ScrollRequest,
    SearchPage, SearchRequest, SearchResponse, WriteResponse,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Errors are
/// connection-level failures only; non-2xx responses are returned as
/// [`HttpResponse`]s.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<HttpResponse, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based document transport.
///
/// Bodies are JSON, except bulk requests which are NDJSON.
pub struct HttpTransport<H: HttpClient> {
    config: HttpConfig,
    client: H,
    last_error: RwLock<Option<String>>,
}

impl<H: HttpClient> HttpTransport<H> {
    /// Creates a new HTTP transport.
    pub fn new(config: HttpConfig, client: H) -> Self {
        Self {
            config,
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &H {
        &self.client
    }

    /// Returns the last connection error, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true if the client reports itself healthy.
    pub fn is_healthy(&self) -> bool {
        self.client.is_healthy()
    }

    fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> ClientResult<HttpResponse> {
        let url = format!("{}{}", self.config.base_url, path);
        trace!(%method, %url, "sending request");
        let response = self
            .client
            .send(method, &url, body, self.config.timeout)
            .map_err(|e| {
                *self.last_error.write() = Some(e.clone());
                ClientError::transport_retryable(e)
            })?;
        *self.last_error.write() = None;
        Ok(response)
    }

    fn send_json<Req: Serialize>(
        &self,
        method: Method,
        path: &str,
        request: &Req,
    ) -> ClientResult<HttpResponse> {
        let body = serde_json::to_vec(request)
            .map_err(|e| ClientError::Protocol(format!("failed to encode request: {e}")))?;
        self.send(method, path, Some(body))
    }
}

fn decode<R: DeserializeOwned>(response: HttpResponse, id: Option<&str>) -> ClientResult<R> {
    if !response.is_success() {
        return Err(ClientError::from_response(response.status, &response.body, id));
    }
    serde_json::from_slice(&response.body)
        .map_err(|e| ClientError::Protocol(format!("failed to decode response: {e}")))
}

/// Percent-encodes a path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte))
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn doc_path(index: &str, id: &str) -> String {
    format!("/{}/_doc/{}", encode_segment(index), encode_segment(id))
}

fn write_query(
    op_type: Option<&str>,
    token: Option<ConcurrencyToken>,
    refresh: RefreshPolicy,
) -> String {
    let mut params = Vec::new();
    if let Some(op_type) = op_type {
        params.push(format!("op_type={op_type}"));
    }
    if let Some(token) = token {
        params.push(format!("if_seq_no={}", token.sequence));
        params.push(format!("if_primary_term={}", token.epoch));
    }
    params.push(format!("refresh={}", refresh.as_param()));
    format!("?{}", params.join("&"))
}

impl<H: HttpClient> DocumentTransport for HttpTransport<H> {
    fn bulk_write(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: RefreshPolicy,
    ) -> ClientResult<Vec<BulkItemResponse>> {
        let body = encode_bulk_body(actions)?;
        let path = format!("/{}/_bulk?refresh={}", encode_segment(index), refresh.as_param());
        let response: BulkResponse = decode(self.send(Method::Post, &path, Some(body))?, None)?;
        debug!(
            index,
            items = response.items.len(),
            errors = response.errors,
            took_ms = response.took,
            "bulk request completed"
        );
        Ok(response.items)
    }

    fn get(&self, index: &str, id: &str) -> ClientResult<Option<VersionedDocument>> {
        let response = self.send(Method::Get, &doc_path(index, id), None)?;
        if response.status == 404 {
            return Ok(None);
        }
        let response: GetResponse = decode(response, Some(id))?;
        if !response.found {
            return Ok(None);
        }
        let token = response
            .token()?
            .ok_or_else(|| ClientError::Protocol(format!("get of {id} returned no version")))?;
        let source = response.source_bytes()?.unwrap_or_else(|| b"{}".to_vec());
        Ok(Some(VersionedDocument {
            id: response.id,
            token,
            source,
        }))
    }

    fn write(&self, index: &str, request: &WriteRequest) -> ClientResult<WriteAck> {
        let (method, path) = match &request.id {
            Some(id) => (
                Method::Put,
                format!(
                    "{}{}",
                    doc_path(index, id),
                    write_query(Some(request.mode.as_str()), request.token, request.refresh)
                ),
            ),
            None => (
                Method::Post,
                format!(
                    "/{}/_doc{}",
                    encode_segment(index),
                    write_query(None, request.token, request.refresh)
                ),
            ),
        };
        let response = self.send(method, &path, Some(request.payload.clone()))?;
        let response: WriteResponse = decode(response, request.id.as_deref())?;
        Ok(WriteAck {
            token: response.token(),
            id: response.id,
            result: response.result,
        })
    }

    fn delete(
        &self,
        index: &str,
        id: &str,
        token: Option<ConcurrencyToken>,
        refresh: RefreshPolicy,
    ) -> ClientResult<WriteAck> {
        let path = format!("{}{}", doc_path(index, id), write_query(None, token, refresh));
        let response: WriteResponse = decode(self.send(Method::Delete, &path, None)?, Some(id))?;
        Ok(WriteAck {
            token: response.token(),
            id: response.id,
            result: response.result,
        })
    }

    fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> ClientResult<SearchPage> {
        let mut path = format!("/{}/_search", encode_segment(index));
        if let Some(ttl) = scroll {
            path.push_str(&format!("?scroll={}", format_ttl(ttl)));
        }
        let response: SearchResponse = decode(self.send_json(Method::Post, &path, request)?, None)?;
        Ok(response.into_page()?)
    }

    fn advance_cursor(&self, scroll_id: &str, ttl: Duration) -> ClientResult<SearchPage> {
        let request = ScrollRequest {
            scroll: format_ttl(ttl),
            scroll_id: scroll_id.to_string(),
        };
        let response: SearchResponse =
            decode(self.send_json(Method::Post, "/_search/scroll", &request)?, None)?;
        Ok(response.into_page()?)
    }

    fn release_cursor(&self, scroll_id: &str) -> ClientResult<()> {
        let request = ClearScrollRequest {
            scroll_id: vec![scroll_id.to_string()],
        };
        let response = self.send_json(Method::Delete, "/_search/scroll", &request)?;
        if response.status == 404 {
            debug!(scroll_id, "scroll cursor already expired");
            return Ok(());
        }
        if !response.is_success() {
            return Err(ClientError::from_response(response.status, &response.body, None));
        }
        Ok(())
    }

    fn count(&self, index: &str, query: Option<&serde_json::Value>) -> ClientResult<u64> {
        let request = CountRequest {
            query: query.cloned(),
        };
        let path = format!("/{}/_count", encode_segment(index));
        let response: CountResponse = decode(self.send_json(Method::Post, &path, &request)?, None)?;
        Ok(response.count)
    }

    fn refresh(&self, index: &str) -> ClientResult<()> {
        let path = format!("/{}/_refresh", encode_segment(index));
        let response = self.send(Method::Post, &path, None)?;
        if !response.is_success() {
            return Err(ClientError::from_response(response.status, &response.body, None));
        }
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request; `path` includes the query string.
    fn handle(&self, method: Method, path: &str, body: &[u8]) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to an in-process
/// server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        _timeout: Duration,
    ) -> Result<HttpResponse, String> {
        // Strip scheme and authority
        let path = match url.find("://") {
            Some(i) => url[i + 3..].find('/').map_or("/", |j| &url[i + 3 + j..]),
            None => url,
        };
        Ok(self
            .server
            .handle(method, path, body.as_deref().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        requests: Mutex<Vec<(Method, String, Option<Vec<u8>>)>>,
    }

    impl TestClient {
        fn respond(&self, status: u16, body: &str) {
            *self.response.lock() = Some(HttpResponse::new(status, body.as_bytes().to_vec()));
        }

        fn last_request(&self) -> (Method, String, Option<Vec<u8>>) {
            self.requests.lock().last().cloned().unwrap()
        }
    }

    impl HttpClient for TestClient {
        fn send(
            &self,
            method: Method,
            url: &str,
            body: Option<Vec<u8>>,
            _timeout: Duration,
        ) -> Result<HttpResponse, String> {
            self.requests.lock().push((method, url.to_string(), body));
            self.response
                .lock()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }
    }

    fn transport() -> HttpTransport<TestClient> {
        HttpTransport::new(HttpConfig::new("http://store:9200"), TestClient::default())
    }

    #[test]
    fn transport_creation() {
        let transport = transport();
        assert_eq!(transport.base_url(), "http://store:9200");
        assert!(transport.is_healthy());
        assert_eq!(transport.last_error(), None);
    }

    #[test]
    fn connection_failure_is_retryable() {
        let transport = transport();
        let err = transport.refresh("things").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));

        transport.client().respond(200, "{}");
        transport.refresh("things").unwrap();
        assert_eq!(transport.last_error(), None);
    }

    #[test]
    fn conditional_write_request_shape() {
        let transport = transport();
        transport.client().respond(
            200,
            r#"{"_index":"things","_id":"a b","result":"updated","_seq_no":7,"_primary_term":1}"#,
        );
        let request = WriteRequest::conditional("a b", b"{}".to_vec(), ConcurrencyToken::new(1, 6));
        let ack = transport.write("things", &request).unwrap();
        assert_eq!(ack.token, ConcurrencyToken::new(1, 7));

        let (method, url, _) = transport.client().last_request();
        assert_eq!(method, Method::Put);
        assert_eq!(
            url,
            "http://store:9200/things/_doc/a%20b?op_type=index&if_seq_no=6&if_primary_term=1&refresh=false"
        );
    }

    #[test]
    fn conflict_status_maps_to_conflict() {
        let transport = transport();
        transport.client().respond(
            409,
            r#"{"error":{"type":"version_conflict_engine_exception","reason":"stale"},"status":409}"#,
        );
        let request = WriteRequest::conditional("a", b"{}".to_vec(), ConcurrencyToken::new(1, 1));
        let err = transport.write("things", &request).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn missing_document_reads_as_none() {
        let transport = transport();
        transport
            .client()
            .respond(404, r#"{"_index":"things","_id":"x","found":false}"#);
        assert_eq!(transport.get("things", "x").unwrap(), None);
    }

    #[test]
    fn bulk_request_uses_ndjson_and_refresh() {
        let transport = transport();
        transport.client().respond(
            200,
            r#"{"took":1,"errors":false,"items":[{"index":{"_id":"a","status":201,"_seq_no":0,"_primary_term":1}}]}"#,
        );
        let items = transport
            .bulk_write(
                "things",
                &[BulkAction::index("a", br#"{"n":1}"#.to_vec())],
                RefreshPolicy::WaitFor,
            )
            .unwrap();
        assert_eq!(items.len(), 1);

        let (_, url, body) = transport.client().last_request();
        assert!(url.ends_with("/things/_bulk?refresh=wait_for"));
        assert_eq!(
            String::from_utf8(body.unwrap()).unwrap(),
            "{\"index\":{\"_id\":\"a\"}}\n{\"n\":1}\n"
        );
    }

    #[test]
    fn scroll_requests() {
        let transport = transport();
        transport.client().respond(
            200,
            r#"{"_scroll_id":"h1","hits":{"total":{"value":0,"relation":"eq"},"hits":[]}}"#,
        );
        let page = transport
            .search(
                "things",
                &SearchRequest::new(None, 5),
                Some(Duration::from_secs(60)),
            )
            .unwrap();
        assert_eq!(page.scroll_id.as_deref(), Some("h1"));
        assert!(transport.client().last_request().1.ends_with("/things/_search?scroll=60s"));

        transport.client().respond(404, "{}");
        transport.release_cursor("h1").unwrap();
        let (method, url, body) = transport.client().last_request();
        assert_eq!(method, Method::Delete);
        assert!(url.ends_with("/_search/scroll"));
        assert_eq!(body.unwrap(), br#"{"scroll_id":["h1"]}"#.to_vec());
    }

    #[test]
    fn loopback_strips_authority() {
        struct Echo;
        impl LoopbackServer for Echo {
            fn handle(&self, method: Method, path: &str, _body: &[u8]) -> HttpResponse {
                HttpResponse::new(200, format!("{method} {path}").into_bytes())
            }
        }

        let client = LoopbackClient::new(Echo);
        let response = client
            .send(Method::Get, "http://localhost:9200/things/_doc/1", None, Duration::ZERO)
            .unwrap();
        assert_eq!(response.body, b"GET /things/_doc/1".to_vec());
    }

    #[test]
    fn segments_are_percent_encoded() {
        assert_eq!(encode_segment("plain-id_1.x~"), "plain-id_1.x~");
        assert_eq!(encode_segment("a/b?c"), "a%2Fb%3Fc");
    }
}
