//! Shared test utilities.
//!
//! [`ScriptedTransport`] stands in for the HTTP client: it answers every
//! request with a caller-supplied function and records what was sent, so
//! tests can assert on call counts.

use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde_json::json;

use std::cell::RefCell;

pub use crate::client::Response;
use crate::client::Transport;

/// A request as seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Request {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub struct ScriptedTransport {
    handler: Box<dyn Fn(&Request) -> Response>,
    requests: RefCell<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&Request) -> Response + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            requests: RefCell::default(),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    /// Counts the requests whose URL contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.url.contains(needle))
            .count()
    }

    fn answer(&self, request: Request) -> Result<Response> {
        let response = (self.handler)(&request);
        self.requests.borrow_mut().push(request);
        Ok(response)
    }
}

fn owned(pairs: &[(&str, impl AsRef<str>)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.as_ref().to_string()))
        .collect()
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Response> {
        self.answer(Request {
            method: "GET",
            url: url.to_string(),
            headers: owned(headers),
            form: Vec::new(),
        })
    }

    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, &str)],
    ) -> Result<Response> {
        self.answer(Request {
            method: "POST",
            url: url.to_string(),
            headers: owned(headers),
            form: owned(form),
        })
    }
}

/// Builds an unsigned JWT whose `exp` claim is `exp`.
pub fn jwt_expiring_at(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(json!({"sub": "customer", "exp": exp}).to_string());
    format!("{header}.{claims}.signature")
}

/// A successful token endpoint answer with an access token valid until `exp`.
pub fn token_response(exp: DateTime<Utc>) -> Response {
    Response::json(
        200,
        &json!({
            "access_token": jwt_expiring_at(exp.timestamp()),
            "refresh_token": "new-refresh-token",
            "expires_in": 3600,
            "token_type": "Bearer",
        }),
    )
}

impl Response {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }
}
