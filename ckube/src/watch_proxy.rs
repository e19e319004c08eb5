//! Chunked streaming pass-through for watches that aren't served from the
//! mirror.
//!
//! Grounded on `kube-client`'s raw-body streaming: a watch response's body
//! is never buffered or decoded here, only forwarded chunk by chunk so that
//! events reach the client as the upstream produces them.
use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode};
use bytes::Bytes;
use ckube_k8s_client::Client;
use futures::StreamExt;
use http::Method;

use crate::error::Error;

/// Upstream watch requests carry a long request timeout so a quiet stream
/// isn't torn down by the client's own HTTP timeout machinery.
const WATCH_TIMEOUT_SECONDS: &str = "1800";

/// Open a streamed watch against `path_and_query` on `client` and relay its
/// body to the caller unchanged, setting `Transfer-Encoding: chunked`.
///
/// `path_and_query` is rewritten first: any sentinel `labelSelector=<none>`
/// left over from a degraded selector decode is stripped, and
/// `timeoutSeconds` is replaced with a long-lived value so the upstream
/// doesn't close the stream out from under a long-polling client.
pub async fn stream(client: &Client, method: Method, path_and_query: &str) -> Result<Response<Body>, Error> {
    let rewritten = rewrite_watch_query(path_and_query);
    let upstream = client.request_stream(method, &rewritten).await?;

    let body = Body::from_stream(
        upstream.map(|chunk: Result<Bytes, ckube_k8s_client::Error>| chunk.map_err(std::io::Error::other)),
    );

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(http::header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    response
        .headers_mut()
        .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn rewrite_watch_query(path_and_query: &str) -> String {
    let Some((path, query)) = path_and_query.split_once('?') else {
        return format!("{path_and_query}?timeoutSeconds={WATCH_TIMEOUT_SECONDS}");
    };
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, v)| !(k == "labelSelector" && v == "<none>"))
        .filter(|(k, _)| k != "timeoutSeconds")
        .collect();
    pairs.push(("timeoutSeconds".to_string(), WATCH_TIMEOUT_SECONDS.to_string()));
    let rebuilt = pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
    format!("{path}?{rebuilt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sentinel_selector_and_extends_timeout() {
        let rewritten = rewrite_watch_query("/api/v1/pods?labelSelector=<none>&timeoutSeconds=30&watch=true");
        assert!(!rewritten.contains("<none>"));
        assert!(rewritten.contains("timeoutSeconds=1800"));
        assert!(rewritten.contains("watch=true"));
    }

    #[test]
    fn adds_timeout_when_query_absent() {
        let rewritten = rewrite_watch_query("/api/v1/pods");
        assert_eq!(rewritten, "/api/v1/pods?timeoutSeconds=1800");
    }
}
