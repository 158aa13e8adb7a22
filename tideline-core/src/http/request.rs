//! Request descriptor captured when a transport is sent.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::headers::HeaderMap;

/// Whether the request carries credentials across origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    #[default]
    Omit,
    Include,
}

impl CredentialsMode {
    /// Maps the transport's `withCredentials` flag to a mode.
    pub fn from_flag(with_credentials: bool) -> Self {
        if with_credentials {
            CredentialsMode::Include
        } else {
            CredentialsMode::Omit
        }
    }
}

/// Optional request body as passed to `send`.
///
/// `()` means no body; strings, byte vectors and [`Bytes`] convert directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestBody(Option<Bytes>);

impl RequestBody {
    /// Body that is absent rather than empty.
    pub fn none() -> Self {
        Self(None)
    }

    /// Returns the body bytes, if any were given.
    pub fn into_bytes(self) -> Option<Bytes> {
        self.0
    }
}

impl From<()> for RequestBody {
    fn from(_: ()) -> Self {
        Self(None)
    }
}

impl From<&'static str> for RequestBody {
    fn from(body: &'static str) -> Self {
        Self(Some(Bytes::from_static(body.as_bytes())))
    }
}

impl From<String> for RequestBody {
    fn from(body: String) -> Self {
        Self(Some(Bytes::from(body)))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(body: Vec<u8>) -> Self {
        Self(Some(Bytes::from(body)))
    }
}

impl From<Bytes> for RequestBody {
    fn from(body: Bytes) -> Self {
        Self(Some(body))
    }
}

impl<T: Into<RequestBody>> From<Option<T>> for RequestBody {
    fn from(body: Option<T>) -> Self {
        body.map(Into::into).unwrap_or_default()
    }
}

/// Immutable snapshot of a request at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Request method as given to `open`, standard names upper-cased
    pub method: String,
    /// Request URL as given to `open`
    pub url: String,
    /// Headers set through `setRequestHeader`
    pub headers: HeaderMap,
    /// Body passed to `send`; dropped for GET and HEAD
    pub body: Option<Bytes>,
    /// Credentials mode derived from `withCredentials`
    pub credentials: CredentialsMode,
}

impl RequestDescriptor {
    /// Creates a descriptor with no headers, body or credentials.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            credentials: CredentialsMode::Omit,
        }
    }

    /// Returns a request header value, ignoring name case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the body decoded as UTF-8, lossily.
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    /// Parses the body as JSON.
    ///
    /// A missing body parses like an empty one and fails.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - If the body is absent or not valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.body.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[test]
    fn test_request_body_conversions() {
        assert_eq!(RequestBody::from(()).into_bytes(), None);
        assert_eq!(
            RequestBody::from("").into_bytes(),
            Some(Bytes::from_static(b""))
        );
        assert_eq!(
            RequestBody::from(Some("abc".to_string())).into_bytes(),
            Some(Bytes::from_static(b"abc"))
        );
        assert_eq!(RequestBody::from(None::<Vec<u8>>).into_bytes(), None);
    }

    #[test]
    fn test_json_body_parsing() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Login {
            user: String,
        }

        let mut request = RequestDescriptor::new("POST", "http://localhost/login");
        request.body = Some(Bytes::from_static(br#"{"user":"ada"}"#));

        let login: Login = request.json().unwrap();
        assert_eq!(
            login,
            Login {
                user: "ada".to_string()
            }
        );
        assert_eq!(request.body_text().as_deref(), Some(r#"{"user":"ada"}"#));
    }

    #[test]
    fn test_json_without_body_fails() {
        let request = RequestDescriptor::new("GET", "http://localhost/");
        assert!(request.json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_credentials_from_flag() {
        assert_eq!(CredentialsMode::from_flag(true), CredentialsMode::Include);
        assert_eq!(CredentialsMode::from_flag(false), CredentialsMode::Omit);
    }
}
