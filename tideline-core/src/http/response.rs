//! Response descriptor and the chainable builder handlers fill in.

use bytes::Bytes;
use hyper::StatusCode;
use serde::Serialize;

use super::headers::HeaderMap;

/// Immutable response produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    /// HTTP status code, validated by the resolver
    pub status: u16,
    /// Explicit reason phrase; the canonical one is reported when absent
    pub status_text: Option<String>,
    /// Response headers, names overwrite rather than merge
    pub headers: HeaderMap,
    /// Response body
    pub body: Option<Bytes>,
}

impl Default for ResponseDescriptor {
    fn default() -> Self {
        Self {
            status: 200,
            status_text: None,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl ResponseDescriptor {
    /// Returns the status text a transport should report.
    pub fn reason_phrase(&self) -> String {
        match &self.status_text {
            Some(text) => text.clone(),
            None => StatusCode::from_u16(self.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Returns the body decoded as UTF-8, lossily; empty when absent.
    pub fn body_text(&self) -> String {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .unwrap_or_default()
    }

    /// Returns body length in bytes.
    pub fn body_len(&self) -> u64 {
        self.body.as_ref().map_or(0, |body| body.len() as u64)
    }
}

/// Chainable accumulator handlers use to construct a response.
///
/// Starts as `200` with no headers or body.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuilder {
    response: ResponseDescriptor,
}

impl ResponseBuilder {
    /// Creates builder for a `200` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status code.
    pub fn status(mut self, code: u16) -> Self {
        self.response.status = code;
        self
    }

    /// Sets an explicit reason phrase.
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.response.status_text = Some(text.into());
        self
    }

    /// Sets a header, replacing any previous value for the name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.insert(name, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, content: impl Into<Bytes>) -> Self {
        self.response.body = Some(content.into());
        self
    }

    /// Serializes `value` as the body and sets a JSON content type.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - If `value` cannot be serialized
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self
            .header("Content-Type", "application/json")
            .body(encoded))
    }

    /// Returns the accumulated response.
    pub fn build(self) -> ResponseDescriptor {
        self.response
    }
}

impl From<ResponseBuilder> for ResponseDescriptor {
    fn from(builder: ResponseBuilder) -> Self {
        builder.build()
    }
}
