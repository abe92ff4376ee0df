//! Request handling for stub servers.

use super::matcher::{IncomingRequest, StubRoutes};
use crate::mapping::ResponseDefinition;
use crate::metrics;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

/// Serve one request from `routes`.
pub async fn handle_stub_request(
    req: Request<Incoming>,
    routes: Arc<StubRoutes>,
    stub_name: Arc<str>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_ascii_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let body = match req.into_body().collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            if bytes.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&bytes).to_string())
            }
        }
        Err(_) => None,
    };

    let request = IncomingRequest {
        method,
        path,
        query,
        headers,
        body,
    };

    let response = match routes.find(&request) {
        Some(mapping) => {
            metrics::record_stub_request(&stub_name, true);
            debug!(
                "{} {} matched {} on {}",
                request.method,
                request.path,
                mapping.source.display(),
                stub_name
            );
            build_response(&mapping.response, routes.response_headers())
        }
        None => {
            metrics::record_stub_request(&stub_name, false);
            debug!(
                "{} {} matched no mapping on {}",
                request.method, request.path, stub_name
            );
            not_found(&request, routes.response_headers())
        }
    };

    Ok(response)
}

fn build_response(
    definition: &ResponseDefinition,
    extra_headers: &std::collections::HashMap<String, String>,
) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(definition.status).unwrap_or_else(|_| {
        warn!("Invalid status code {} in mapping", definition.status);
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let (body, json) = match (&definition.json_body, &definition.body) {
        (Some(json), _) => (json.to_string(), true),
        (None, Some(body)) => (body.clone(), false),
        (None, None) => (String::new(), false),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;

    let response_headers = response.headers_mut();
    for (name, value) in definition.headers.iter().chain(extra_headers.iter()) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response_headers.insert(name, value);
            }
            _ => warn!("Skipping invalid response header {}: {}", name, value),
        }
    }
    if json && !response_headers.contains_key(CONTENT_TYPE) {
        response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    response
}

fn not_found(
    request: &IncomingRequest,
    extra_headers: &std::collections::HashMap<String, String>,
) -> Response<Full<Bytes>> {
    let definition = ResponseDefinition {
        status: StatusCode::NOT_FOUND.as_u16(),
        json_body: Some(serde_json::json!({
            "error": "No stub mapping matched the request",
            "method": request.method,
            "path": request.path,
        })),
        ..Default::default()
    };
    build_response(&definition, extra_headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_json_body_sets_content_type() {
        let definition = ResponseDefinition {
            status: 201,
            json_body: Some(serde_json::json!({"id": 7})),
            ..Default::default()
        };
        let response = build_response(&definition, &HashMap::new());
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let definition = ResponseDefinition {
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/vnd.orders+json".to_string(),
            )]),
            json_body: Some(serde_json::json!([])),
            ..Default::default()
        };
        let response = build_response(&definition, &HashMap::new());
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/vnd.orders+json"
        );
    }

    #[test]
    fn test_extra_headers_and_invalid_status() {
        let definition = ResponseDefinition {
            status: 42,
            body: Some("plain".to_string()),
            ..Default::default()
        };
        let extra = HashMap::from([("X-Stub".to_string(), "foo".to_string())]);
        let response = build_response(&definition, &extra);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get("x-stub").unwrap(), "foo");
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }
}
