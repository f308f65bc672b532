//! `Authorization` headers for the gateway client.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

/// HTTP Basic credentials, used only for the `auth.login` exchange.
pub(crate) fn basic_auth_headers(username: &str, password: &str) -> Result<HeaderMap> {
    let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
    authorization(format!("Basic {encoded}"))
}

/// Bearer token carried by every call of an authenticated session.
pub(crate) fn bearer_auth_headers(token: &str) -> Result<HeaderMap> {
    authorization(format!("Bearer {}", token.trim()))
}

fn authorization(value: String) -> Result<HeaderMap> {
    let mut value =
        HeaderValue::from_str(&value).context("failed to build Authorization header")?;
    value.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", value);
    Ok(headers)
}
