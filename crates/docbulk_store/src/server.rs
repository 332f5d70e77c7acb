//! HTTP-shaped request router.

use crate::config::StoreConfig;
use crate::documents::DocumentStore;
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::scroll::ScrollRegistry;
use docbulk_protocol::{
    decode_bulk_body, parse_ttl, ClearScrollRequest, ClearScrollResponse, ConcurrencyToken,
    CountRequest, CountResponse, HitsEnvelope, OpType, RefreshPolicy, ScrollRequest,
    SearchRequest, SearchResponse, TotalHits,
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Status and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReply {
    /// HTTP status code.
    pub status: u16,
    /// JSON response body.
    pub body: Vec<u8>,
}

impl StoreReply {
    fn json<T: Serialize>(status: u16, value: &T) -> StoreResult<Self> {
        Ok(Self {
            status,
            body: serde_json::to_vec(value)?,
        })
    }

    fn error(err: &StoreError) -> Self {
        let body = serde_json::to_vec(&err.to_response()).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status: err.status(),
            body,
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parsed query string.
struct Params(HashMap<String, String>);

impl Params {
    fn parse(query: &str) -> Self {
        Self(
            query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((k, v)) => (decode_component(k), decode_component(v)),
                    None => (decode_component(pair), String::new()),
                })
                .collect(),
        )
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn number(&self, name: &str) -> StoreResult<Option<u64>> {
        self.get(name)
            .map(|v| {
                v.parse()
                    .map_err(|_| StoreError::InvalidRequest(format!("[{name}] must be a number, got [{v}]")))
            })
            .transpose()
    }

    fn refresh(&self) -> StoreResult<RefreshPolicy> {
        match self.get("refresh") {
            None => Ok(RefreshPolicy::None),
            Some(value) => Ok(RefreshPolicy::from_param(value)?),
        }
    }

    fn token(&self) -> StoreResult<Option<ConcurrencyToken>> {
        ConcurrencyToken::from_parts(self.number("if_seq_no")?, self.number("if_primary_term")?).map_err(
            |_| StoreError::InvalidRequest("if_seq_no and if_primary_term must be set together".into()),
        )
    }

    fn op_type(&self) -> StoreResult<OpType> {
        match self.get("op_type") {
            None | Some("index") => Ok(OpType::Index),
            Some("create") => Ok(OpType::Create),
            Some(other) => Err(StoreError::InvalidRequest(format!("unknown op_type [{other}]"))),
        }
    }
}

/// Decodes `%XX` escapes and `+` in a path segment or query component.
fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Routes HTTP-shaped requests to a [`DocumentStore`] and a
/// [`ScrollRegistry`].
///
/// # Routes
///
/// | method | path |
/// |---|---|
/// | `POST` | `/_bulk`, `/{index}/_bulk` |
/// | `GET` | `/{index}/_doc/{id}` |
/// | `PUT`, `POST` | `/{index}/_doc/{id}`, `/{index}/_create/{id}` |
/// | `POST` | `/{index}/_doc` |
/// | `DELETE` | `/{index}/_doc/{id}` |
/// | `GET`, `POST` | `/{index}/_search`, `/{index}/_count` |
/// | `POST` | `/{index}/_refresh` |
/// | `GET`, `POST` | `/_search/scroll` |
/// | `DELETE` | `/_search/scroll` |
pub struct DocumentServer {
    store: DocumentStore,
    scrolls: ScrollRegistry,
}

impl DocumentServer {
    /// Creates a server with an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            store: DocumentStore::new(config),
            scrolls: ScrollRegistry::new(),
        }
    }

    /// Returns the document store.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Returns the scroll registry.
    pub fn scrolls(&self) -> &ScrollRegistry {
        &self.scrolls
    }

    /// Handles one request. `path` may carry a query string.
    pub fn handle(&self, method: &str, path: &str, body: &[u8]) -> StoreReply {
        match self.route(method, path, body) {
            Ok(reply) => reply,
            Err(err) => {
                if err.is_client_error() {
                    debug!(method, path, error = %err, "request rejected");
                } else {
                    warn!(method, path, error = %err, "request failed");
                }
                StoreReply::error(&err)
            }
        }
    }

    fn route(&self, method: &str, path: &str, body: &[u8]) -> StoreResult<StoreReply> {
        let (path_only, query) = path.split_once('?').unwrap_or((path, ""));
        let params = Params::parse(query);
        let segments: Vec<String> = path_only
            .split('/')
            .filter(|s| !s.is_empty())
            .map(decode_component)
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (method, segments.as_slice()) {
            ("POST", ["_bulk"]) => self.bulk(None, &params, body),
            ("POST", [index, "_bulk"]) => self.bulk(Some(*index), &params, body),
            ("GET" | "POST", ["_search", "scroll"]) => self.advance(body),
            ("DELETE", ["_search", "scroll"]) => self.clear_scroll(body),
            ("GET", [index, "_doc", id]) => {
                let response = self.store.get(index, id)?;
                StoreReply::json(if response.found { 200 } else { 404 }, &response)
            }
            ("PUT" | "POST", [index, "_doc", id]) => {
                self.write(index, Some(id.to_string()), params.op_type()?, &params, body)
            }
            ("PUT" | "POST", [index, "_create", id]) => {
                self.write(index, Some(id.to_string()), OpType::Create, &params, body)
            }
            ("POST", [index, "_doc"]) => self.write(index, None, OpType::Create, &params, body),
            ("DELETE", [index, "_doc", id]) => {
                let response = self
                    .store
                    .delete(index, id, params.token()?, params.refresh()?)?;
                StoreReply::json(200, &response)
            }
            ("GET" | "POST", [index, "_search"]) => self.search(index, &params, body),
            ("GET" | "POST", [index, "_count"]) => self.count(index, body),
            ("POST" | "GET", [index, "_refresh"]) => {
                self.store.refresh(index)?;
                let shards = serde_json::json!({"_shards": {"total": 1, "successful": 1, "failed": 0}});
                StoreReply::json(200, &shards)
            }
            _ => Err(StoreError::NoHandler {
                method: method.to_string(),
                path: path_only.to_string(),
            }),
        }
    }

    fn bulk(&self, index: Option<&str>, params: &Params, body: &[u8]) -> StoreResult<StoreReply> {
        let actions = decode_bulk_body(body)?;
        let response = self.store.bulk(index, actions, params.refresh()?)?;
        StoreReply::json(200, &response)
    }

    fn write(
        &self,
        index: &str,
        id: Option<String>,
        op_type: OpType,
        params: &Params,
        body: &[u8],
    ) -> StoreResult<StoreReply> {
        let (status, response) =
            self.store
                .write(index, id, op_type, params.token()?, body, params.refresh()?)?;
        StoreReply::json(status, &response)
    }

    fn search(&self, index: &str, params: &Params, body: &[u8]) -> StoreResult<StoreReply> {
        let started = Instant::now();
        let request: SearchRequest = if body.is_empty() {
            SearchRequest::new(None, 10)
        } else {
            serde_json::from_slice(body)?
        };
        let max_page = self.store.config().max_page_size;
        if request.size > max_page {
            return Err(StoreError::InvalidRequest(format!(
                "result window is too large, size [{}] exceeds [{max_page}]",
                request.size
            )));
        }

        let query = Query::parse(request.query.as_ref())?;
        let hits = self.store.search(index, &query, request.seq_no_primary_term)?;

        let mut response = match params.get("scroll") {
            Some(ttl) => {
                if request.size == 0 {
                    return Err(StoreError::InvalidRequest(
                        "[size] cannot be [0] in a scroll context".into(),
                    ));
                }
                self.scrolls.open(hits, request.size, self.lease(ttl)?)
            }
            None => {
                let total = TotalHits::exact(hits.len() as u64);
                let page = hits.into_iter().take(request.size as usize).collect();
                SearchResponse {
                    scroll_id: None,
                    took: 0,
                    hits: HitsEnvelope { total, hits: page },
                }
            }
        };
        response.took = started.elapsed().as_millis() as u64;
        StoreReply::json(200, &response)
    }

    fn advance(&self, body: &[u8]) -> StoreResult<StoreReply> {
        let request: ScrollRequest = serde_json::from_slice(body)?;
        let ttl = self.lease(&request.scroll)?;
        let response = self.scrolls.advance(&request.scroll_id, ttl)?;
        StoreReply::json(200, &response)
    }

    fn clear_scroll(&self, body: &[u8]) -> StoreResult<StoreReply> {
        let request: ClearScrollRequest = serde_json::from_slice(body)?;
        let num_freed = self.scrolls.clear(request.scroll_id.iter().map(String::as_str));
        let status = if num_freed == 0 && !request.scroll_id.is_empty() {
            404
        } else {
            200
        };
        StoreReply::json(
            status,
            &ClearScrollResponse {
                succeeded: true,
                num_freed,
            },
        )
    }

    fn count(&self, index: &str, body: &[u8]) -> StoreResult<StoreReply> {
        let request: CountRequest = if body.is_empty() {
            CountRequest::default()
        } else {
            serde_json::from_slice(body)?
        };
        let query = Query::parse(request.query.as_ref())?;
        let count = self.store.count(index, &query)?;
        StoreReply::json(200, &CountResponse { count })
    }

    fn lease(&self, ttl: &str) -> StoreResult<Duration> {
        let ttl = parse_ttl(ttl)?;
        let max = self.store.config().max_scroll_ttl;
        if ttl > max {
            return Err(StoreError::InvalidRequest(format!(
                "scroll keep alive [{}s] exceeds the maximum [{}s]",
                ttl.as_secs(),
                max.as_secs()
            )));
        }
        Ok(ttl)
    }
}

impl Default for DocumentServer {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbulk_protocol::{BulkResponse, ErrorResponse, GetResponse, WriteResponse};
    use serde_json::{json, Value};

    fn body(reply: &StoreReply) -> Value {
        serde_json::from_slice(&reply.body).unwrap()
    }

    fn seed(server: &DocumentServer, n: usize) {
        let mut ndjson = String::new();
        for i in 0..n {
            ndjson.push_str(&format!("{{\"index\":{{\"_id\":\"{i:03}\"}}}}\n{{\"n\":{i}}}\n"));
        }
        let reply = server.handle("POST", "/things/_bulk?refresh=true", ndjson.as_bytes());
        assert_eq!(reply.status, 200);
    }

    #[test]
    fn write_then_get() {
        let server = DocumentServer::default();
        let reply = server.handle("PUT", "/things/_doc/a?op_type=create", br#"{"title":"hi"}"#);
        assert_eq!(reply.status, 201);
        let written: WriteResponse = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(written.result, "created");

        let reply = server.handle("GET", "/things/_doc/a", b"");
        let doc: GetResponse = serde_json::from_slice(&reply.body).unwrap();
        assert!(doc.found);
        assert_eq!(doc.seq_no, Some(0));
        assert_eq!(doc.source, Some(json!({"title": "hi"})));

        let reply = server.handle("GET", "/things/_doc/b", b"");
        assert_eq!(reply.status, 404);
        assert_eq!(body(&reply)["found"], false);
    }

    #[test]
    fn conditional_write_conflict_body() {
        let server = DocumentServer::default();
        server.handle("PUT", "/things/_doc/a", b"{}");
        server.handle("PUT", "/things/_doc/a", b"{}");

        let reply = server.handle("PUT", "/things/_doc/a?if_seq_no=0&if_primary_term=1", b"{}");
        assert_eq!(reply.status, 409);
        let error: ErrorResponse = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(error.error.kind, "version_conflict_engine_exception");

        let reply = server.handle("PUT", "/things/_doc/a?if_seq_no=1", b"{}");
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn percent_encoded_ids() {
        let server = DocumentServer::default();
        let reply = server.handle("PUT", "/things/_doc/a%2Fb%20c", b"{}");
        assert_eq!(reply.status, 201);
        assert_eq!(body(&reply)["_id"], "a/b c");
        assert_eq!(server.handle("GET", "/things/_doc/a%2Fb%20c", b"").status, 200);
    }

    #[test]
    fn post_without_id_generates_one() {
        let server = DocumentServer::default();
        let reply = server.handle("POST", "/things/_doc", br#"{"x":1}"#);
        assert_eq!(reply.status, 201);
        let id = body(&reply)["_id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());
    }

    #[test]
    fn bulk_route_reports_items() {
        let server = DocumentServer::default();
        let ndjson = b"{\"create\":{\"_id\":\"1\"}}\n{\"a\":1}\n{\"create\":{\"_id\":\"1\"}}\n{\"a\":2}\n";
        let reply = server.handle("POST", "/things/_bulk", ndjson);
        let response: BulkResponse = serde_json::from_slice(&reply.body).unwrap();
        assert!(response.errors);
        assert_eq!(response.items[0].result().status, 201);
        assert_eq!(response.items[1].result().status, 409);

        let reply = server.handle("POST", "/things/_bulk", b"{\"index\":{}}\n");
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn search_visibility_follows_refresh() {
        let server = DocumentServer::default();
        server.handle("PUT", "/things/_doc/a", br#"{"title":"hi"}"#);

        let reply = server.handle("POST", "/things/_count", b"");
        assert_eq!(body(&reply)["count"], 0);

        server.handle("POST", "/things/_refresh", b"");
        let reply = server.handle("POST", "/things/_count", br#"{"query":{"term":{"title":"hi"}}}"#);
        assert_eq!(body(&reply)["count"], 1);
    }

    #[test]
    fn paged_search_has_no_scroll_id() {
        let server = DocumentServer::default();
        seed(&server, 7);
        let request = json!({"size": 3, "seq_no_primary_term": true});
        let reply = server.handle("POST", "/things/_search", request.to_string().as_bytes());
        let response: SearchResponse = serde_json::from_slice(&reply.body).unwrap();
        assert!(response.scroll_id.is_none());
        assert_eq!(response.hits.total.value, 7);
        assert_eq!(response.hits.hits.len(), 3);
        assert!(response.hits.hits[0].seq_no.is_some());
    }

    #[test]
    fn scroll_lifecycle() {
        let server = DocumentServer::default();
        seed(&server, 12);

        let request = json!({"size": 5, "seq_no_primary_term": true});
        let reply = server.handle("POST", "/things/_search?scroll=1m", request.to_string().as_bytes());
        let first: SearchResponse = serde_json::from_slice(&reply.body).unwrap();
        let scroll_id = first.scroll_id.clone().unwrap();
        assert_eq!(first.hits.hits.len(), 5);

        let mut seen = first.hits.hits.len();
        loop {
            let advance = json!({"scroll": "1m", "scroll_id": scroll_id});
            let reply = server.handle("POST", "/_search/scroll", advance.to_string().as_bytes());
            let page: SearchResponse = serde_json::from_slice(&reply.body).unwrap();
            if page.hits.hits.is_empty() {
                break;
            }
            seen += page.hits.hits.len();
        }
        assert_eq!(seen, 12);
        assert_eq!(server.scrolls().open_scrolls(), 1);

        let clear = json!({"scroll_id": [scroll_id]});
        let reply = server.handle("DELETE", "/_search/scroll", clear.to_string().as_bytes());
        assert_eq!(reply.status, 200);
        assert_eq!(body(&reply)["num_freed"], 1);

        let reply = server.handle("DELETE", "/_search/scroll", clear.to_string().as_bytes());
        assert_eq!(reply.status, 404);

        let advance = json!({"scroll": "1m", "scroll_id": scroll_id});
        let reply = server.handle("POST", "/_search/scroll", advance.to_string().as_bytes());
        assert_eq!(reply.status, 404);
        assert_eq!(body(&reply)["error"]["type"], "search_context_missing_exception");
    }

    #[test]
    fn rejects_oversized_requests() {
        let server = DocumentServer::new(
            StoreConfig::new()
                .with_max_page_size(10)
                .with_max_scroll_ttl(Duration::from_secs(60)),
        );
        seed(&server, 1);

        let big = json!({"size": 11});
        let reply = server.handle("POST", "/things/_search", big.to_string().as_bytes());
        assert_eq!(reply.status, 400);

        let ok = json!({"size": 5});
        let reply = server.handle("POST", "/things/_search?scroll=2h", ok.to_string().as_bytes());
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn missing_index_and_unknown_route() {
        let server = DocumentServer::default();
        let reply = server.handle("POST", "/nope/_search", b"{\"size\":1}");
        assert_eq!(reply.status, 404);
        assert_eq!(body(&reply)["error"]["type"], "index_not_found_exception");

        let reply = server.handle("PATCH", "/things/_doc/a", b"{}");
        assert_eq!(reply.status, 400);
        assert_eq!(body(&reply)["error"]["type"], "no_handler_found_exception");
    }

    #[test]
    fn decodes_components() {
        assert_eq!(decode_component("a%2Fb"), "a/b");
        assert_eq!(decode_component("a+b"), "a b");
        assert_eq!(decode_component("100%"), "100%");
        assert_eq!(decode_component("%zz"), "%zz");
    }
}
