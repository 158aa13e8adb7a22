//! Request and response descriptors exchanged between transports and handlers

mod headers;
mod request;
mod response;

pub use headers::HeaderMap;
pub use request::{CredentialsMode, RequestBody, RequestDescriptor};
pub use response::{ResponseBuilder, ResponseDescriptor};

/// Upper-cases standard method names, leaving extension methods untouched.
///
/// Mirrors the real transport's `open`: `get` becomes `GET`, `purge` stays `purge`.
pub fn normalize_method(method: &str) -> String {
    const STANDARD: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT", "PATCH"];

    let upper = method.to_ascii_uppercase();
    if STANDARD.contains(&upper.as_str()) {
        upper
    } else {
        method.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("post"), "POST");
        assert_eq!(normalize_method("Get"), "GET");
        assert_eq!(normalize_method("purge"), "purge");
        assert_eq!(normalize_method("PURGE"), "PURGE");
    }
}
