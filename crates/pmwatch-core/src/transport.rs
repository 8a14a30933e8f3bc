//! HTTP transport used by probe rules.
//!
//! Rules only depend on the [`HttpClient`] trait; [`HyperClient`] is the
//! production implementation over the hyper legacy client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, USER_AGENT};
use http_body_util::{BodyExt, Empty};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::BoxFuture;
use crate::error::TransportError;

/// What a GET returned: status, body text, and the decoded JSON body
/// when the server declared one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
    pub text: String,
    pub body: Option<serde_json::Value>,
}

impl ProbeResponse {
    /// A plain-text response, mostly useful for tests and custom clients.
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
            body: None,
        }
    }
}

/// The transport collaborator.
///
/// `get` resolves to the response or a transport error message. It does
/// not need to enforce the rule timeout; rules race it themselves.
pub trait HttpClient: Send + Sync {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ProbeResponse, String>>;
}

/// hyper-backed [`HttpClient`] over HTTP/1.1, with or without TLS.
///
/// `https` URLs are verified against the Mozilla root store.
#[derive(Clone)]
pub struct HyperClient {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
}

impl HyperClient {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_connect_timeout(None)
    }

    /// Build a client whose TCP connect phase gives up after `timeout`.
    pub fn with_connect_timeout(timeout: Option<Duration>) -> Result<Self, TransportError> {
        Ok(Self::with_tls_config(tls_config()?, timeout))
    }

    /// Build a client over a caller-supplied `rustls` configuration.
    pub fn with_tls_config(config: Arc<rustls::ClientConfig>, timeout: Option<Duration>) -> Self {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(timeout);
        http.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(Arc::unwrap_or_clone(config))
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<ProbeResponse, String> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| format!("invalid url {url:?}: {e}"))?;

        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .header(USER_AGENT, concat!("pmwatch/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .map_err(|e| e.to_string())?;

        let resp = self.client.request(req).await.map_err(|e| {
            let reason = error_chain(&e);
            debug!(%url, error = %reason, "probe request failed");
            reason
        })?;

        let status = resp.status().as_u16();
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| error_chain(&e))?
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = if is_json {
            serde_json::from_str(&text).ok()
        } else {
            None
        };

        Ok(ProbeResponse { status, text, body })
    }
}

impl HttpClient for HyperClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ProbeResponse, String>> {
        Box::pin(self.fetch(url))
    }
}

/// Client TLS settings trusting the Mozilla root certificates.
pub fn tls_config() -> Result<Arc<rustls::ClientConfig>, TransportError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config =
        rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_port_is_a_transport_error() {
        let client = HyperClient::new().unwrap();
        let err = client.get("http://127.0.0.1:1/").await.unwrap_err();
        assert!(!err.is_empty());
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let client = HyperClient::new().unwrap();
        let err = client.get("not a url").await.unwrap_err();
        assert!(err.starts_with("invalid url"));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("client error")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn error_chain_includes_sources() {
        let err = Outer(std::io::Error::other("connection refused"));
        assert_eq!(error_chain(&err), "client error: connection refused");
    }
}
