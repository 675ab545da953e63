//! HTTP request handlers.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Request, Response, StatusCode};
use log::*;
use percent_encoding::percent_decode_str;
use serde::Serialize;

use crate::api::metrics::METRICS;
use crate::idgen::{generate_id, IdRendering, IdSource};

/// Reply envelope of the identifier endpoint.
#[derive(Serialize)]
pub struct Envelope {
    status: i32,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<IdRendering>,
}

impl Envelope {
    pub fn ok(data: IdRendering) -> Self {
        Self {
            status: 0,
            message: "ok",
            data: Some(data),
        }
    }

    pub fn error() -> Self {
        Self {
            status: -1,
            message: "error node_id",
            data: None,
        }
    }
}

/// Parse a query parameter from a request.
pub fn parse_query_param<B>(req: &Request<B>, key: &str) -> Option<String> {
    let query = req.uri().query()?;
    for pair in query.split('&') {
        let mut it = pair.splitn(2, '=');
        let k = it.next()?;
        if k == key {
            let raw = it.next().unwrap_or_default();
            return percent_decode_str(raw)
                .decode_utf8()
                .ok()
                .map(|s| s.into_owned());
        }
    }
    None
}

/// Create a JSON response.
pub fn json_response<T: Serialize>(value: &T, status: StatusCode) -> Response<Full<Bytes>> {
    let (body, status) = match serde_json::to_vec(value) {
        Ok(body) => (Bytes::from(body), status),
        Err(e) => {
            error!("json serialize error: {}", e);
            (
                Bytes::from_static(b"{\"error\":\"serialization\"}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };
    let mut r = Response::new(Full::new(body));
    *r.status_mut() = status;
    r.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    r
}

/// Generate an identifier for the `node_id` query parameter.
///
/// Every outcome is a 200; failures use the error envelope.
pub fn handle_generate<B>(source: &dyn IdSource, req: &Request<B>) -> Response<Full<Bytes>> {
    let Some(node) = parse_query_param(req, "node_id").and_then(|v| v.parse::<i64>().ok()) else {
        debug!("http: missing or bad node_id in {:?}", req.uri().query());
        return json_response(&Envelope::error(), StatusCode::OK);
    };
    match generate_id(source, node) {
        Ok(id) => json_response(&Envelope::ok(id.into()), StatusCode::OK),
        Err(_) => json_response(&Envelope::error(), StatusCode::OK),
    }
}

/// Prometheus text exposition of the process counters.
pub fn handle_metrics() -> Response<Full<Bytes>> {
    let mut r = Response::new(Full::new(Bytes::from(METRICS.render_prometheus())));
    r.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::IdError;
    use crate::idgen::{SnowflakeId, SnowflakeSource};
    use http_body_util::BodyExt;

    struct Fixed;

    impl IdSource for Fixed {
        fn generate(&self, node: i64) -> Result<SnowflakeId, IdError> {
            Ok(SnowflakeId::from_raw(node))
        }
    }

    struct Broken;

    impl IdSource for Broken {
        fn generate(&self, _node: i64) -> Result<SnowflakeId, IdError> {
            Err(IdError::TimeOverflow)
        }
    }

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    async fn body_of(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn query_param_is_percent_decoded() {
        let req = get("/?a=1&node_id=%31%32&b");
        assert_eq!(parse_query_param(&req, "node_id").as_deref(), Some("12"));
        assert_eq!(parse_query_param(&req, "b").as_deref(), Some(""));
        assert_eq!(parse_query_param(&req, "c"), None);
        assert_eq!(parse_query_param(&get("/"), "node_id"), None);
    }

    #[tokio::test]
    async fn success_envelope() {
        let resp = handle_generate(&Fixed, &get("/?node_id=58"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            body_of(resp).await,
            r#"{"status":0,"message":"ok","data":{"id":"58","base32":"b4","base58":"21"}}"#
        );
    }

    #[tokio::test]
    async fn node_is_clamped() {
        let resp = handle_generate(&Fixed, &get("/?node_id=-4"));
        assert!(body_of(resp).await.contains(r#""id":"1""#));
    }

    #[tokio::test]
    async fn error_envelope() {
        const ERR: &str = r#"{"status":-1,"message":"error node_id"}"#;
        for uri in ["/", "/?node_id=", "/?node_id=abc", "/?node_id=1.5"] {
            let resp = handle_generate(&Fixed, &get(uri));
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_of(resp).await, ERR, "{}", uri);
        }
        let resp = handle_generate(&Broken, &get("/?node_id=3"));
        assert_eq!(body_of(resp).await, ERR);
    }

    #[tokio::test]
    async fn real_source_yields_distinct_ids() {
        let source = SnowflakeSource::new(1_288_834_974_657);
        let a = body_of(handle_generate(&source, &get("/?node_id=9"))).await;
        let b = body_of(handle_generate(&source, &get("/?node_id=9"))).await;
        assert_ne!(a, b);
    }
}
