//! Request matching against a bundle's mappings.
//!
//! Mappings are compiled once when the server starts so that a malformed
//! pattern fails the start instead of every request.

use crate::error::TransportError;
use crate::mapping::{Mapping, MappingBundle, RequestPattern};
use regex::Regex;
use std::collections::HashMap;

/// The parts of an inbound request that mappings match on.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl IncomingRequest {
    fn path_and_query(&self) -> String {
        match self.query.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

#[derive(Debug)]
struct CompiledMapping {
    mapping: Mapping,
    url_pattern: Option<Regex>,
}

/// Compiled, priority-ordered mappings of one stub server.
#[derive(Debug)]
pub struct StubRoutes {
    mappings: Vec<CompiledMapping>,
    response_headers: HashMap<String, String>,
}

impl StubRoutes {
    /// Compile every mapping of `bundle`. Fails on an invalid `urlPattern`.
    pub fn compile(
        bundle: &MappingBundle,
        response_headers: HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let mut mappings = bundle
            .mappings()
            .iter()
            .map(|mapping| {
                let url_pattern = mapping
                    .request
                    .url_pattern
                    .as_deref()
                    .map(|p| {
                        Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                            TransportError::Start(format!(
                                "Invalid urlPattern '{p}' in {}: {e}",
                                mapping.source.display()
                            ))
                        })
                    })
                    .transpose()?;
                Ok(CompiledMapping {
                    mapping: mapping.clone(),
                    url_pattern,
                })
            })
            .collect::<Result<Vec<_>, TransportError>>()?;

        // Stable sort keeps bundle order among equal priorities
        mappings.sort_by_key(|m| m.mapping.priority.unwrap_or(u32::MAX));

        Ok(Self {
            mappings,
            response_headers,
        })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn response_headers(&self) -> &HashMap<String, String> {
        &self.response_headers
    }

    /// First mapping matching `request`, by priority then bundle order.
    pub fn find(&self, request: &IncomingRequest) -> Option<&Mapping> {
        let query = request
            .query
            .as_deref()
            .map(parse_query_string)
            .unwrap_or_default();

        self.mappings
            .iter()
            .find(|m| pattern_matches(&m.mapping.request, m.url_pattern.as_ref(), request, &query))
            .map(|m| &m.mapping)
    }
}

fn pattern_matches(
    pattern: &RequestPattern,
    url_pattern: Option<&Regex>,
    request: &IncomingRequest,
    query: &HashMap<String, String>,
) -> bool {
    if let Some(method) = pattern.method.as_deref() {
        if !method.eq_ignore_ascii_case("ANY") && !method.eq_ignore_ascii_case(&request.method) {
            return false;
        }
    }

    if let Some(url) = pattern.url.as_deref() {
        if url != request.path_and_query() {
            return false;
        }
    }

    if let Some(url_path) = pattern.url_path.as_deref() {
        if url_path != request.path {
            return false;
        }
    }

    if let Some(regex) = url_pattern {
        if !regex.is_match(&request.path_and_query()) {
            return false;
        }
    }

    let headers_match = pattern.headers.iter().all(|(name, value)| {
        request
            .headers
            .get(&name.to_ascii_lowercase())
            .is_some_and(|actual| actual == value)
    });
    if !headers_match {
        return false;
    }

    let query_match = pattern
        .query_parameters
        .iter()
        .all(|(name, value)| query.get(name) == Some(value));
    if !query_match {
        return false;
    }

    match pattern.body.as_ref() {
        Some(expected) => request
            .body
            .as_deref()
            .is_some_and(|actual| body_matches(expected, actual)),
        None => true,
    }
}

fn body_matches(expected: &serde_json::Value, actual: &str) -> bool {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(actual) {
        if &parsed == expected {
            return true;
        }
    }
    matches!(expected, serde_json::Value::String(s) if s == actual)
}

/// Parse a query string into decoded key/value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::decode(key).unwrap_or_default().into_owned(),
                urlencoding::decode(value).unwrap_or_default().into_owned(),
            )
        })
        .collect()
}
