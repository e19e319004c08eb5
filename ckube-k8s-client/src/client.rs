//! A thin per-cluster HTTP client for the Kubernetes API.
//!
//! Grounded on `kube-client`'s `Client`: a cheaply-cloneable handle wrapping
//! one HTTP connector, `request`/`request_text`/`request_events` methods for
//! typed, string, and streaming-watch responses, and `Status` detection on
//! non-2xx bodies. Trimmed to what ckube needs: no websocket upgrade, no
//! discovery, no OAuth/exec auth, one authenticator fixed at construction.
use std::sync::Arc;

use bytes::Bytes;
use ckube_wire::{ErrorResponse, Status, WatchEvent};
use futures::{Stream, StreamExt, TryStream, TryStreamExt};
use http::{header::AUTHORIZATION, HeaderValue, Method, Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client as HyperClient},
    rt::TokioExecutor,
};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    io::StreamReader,
};

use crate::{
    config::{Identity, ResolvedContext},
    error::Error,
};

type Connector = HttpsConnector<HttpConnector>;

/// A certificate verifier that accepts anything, backing
/// `insecure-skip-tls-verify` in the kubeconfig. Only installed when that
/// flag is set; never the default.
#[derive(Debug)]
struct NoCertificateVerification(rustls::crypto::CryptoProvider);

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
        .map(|_| rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
        .map(|_| rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// How a [`Client`] authenticates its requests. Resolved once from
/// [`ResolvedContext::identity`] at construction time.
#[derive(Clone)]
enum Auth {
    Bearer(SecretString),
    Basic(HeaderValue),
}

/// A connected handle to a single Kubernetes-compatible API server.
///
/// Cheap to clone: the underlying hyper connection pool is reference
/// counted.
#[derive(Clone)]
pub struct Client {
    inner: HyperClient<Connector, Full<Bytes>>,
    base_url: Uri,
    auth: Auth,
    default_namespace: Arc<str>,
}

/// Install `ring` as the process-wide default rustls crypto provider.
///
/// Must be called once before the first [`Client::new`]; `rustls` panics on
/// its first TLS handshake if no provider has been installed. The `ckube`
/// binary calls this at the top of `main`.
pub fn install_default_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

impl Client {
    /// Build a client from an already-resolved kubeconfig context.
    pub fn new(resolved: &ResolvedContext) -> Result<Self, Error> {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(pem) = &resolved.root_cert_pem {
            let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
                .collect::<Result<_, _>>()
                .map_err(|e| Error::Tls(e.to_string()))?;
            for cert in certs {
                roots.add(cert).map_err(|e| Error::Tls(e.to_string()))?;
            }
        } else {
            for cert in rustls_native_certs::load_native_certs().certs {
                roots.add(cert).map_err(|e| Error::Tls(e.to_string()))?;
            }
        }

        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        if resolved.accept_invalid_certs {
            tls_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertificateVerification(
                    rustls::crypto::ring::default_provider(),
                )));
        }

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();

        let auth = match &resolved.identity {
            Identity::Bearer(token) => Auth::Bearer(token.clone()),
            Identity::ClientCert { .. } => {
                // Client-certificate identities are carried through the kubeconfig
                // for completeness, but ckube's deployments all authenticate with a
                // service-account bearer token; wiring client-cert TLS auth into the
                // connector is future work.
                return Err(Error::Tls(
                    "client-certificate authentication is not yet supported".into(),
                ));
            }
            Identity::Basic { username, password } => {
                use base64::Engine;
                let value = format!("{username}:{}", password.expose_secret());
                let encoded = base64::engine::general_purpose::STANDARD.encode(value);
                Auth::Basic(
                    HeaderValue::from_str(&format!("Basic {encoded}"))
                        .map_err(|_| Error::Tls("invalid basic auth credentials".into()))?,
                )
            }
        };

        Ok(Self {
            inner: HyperClient::builder(TokioExecutor::new()).build(https),
            base_url: resolved.cluster_url.clone(),
            auth,
            default_namespace: Arc::from(resolved.default_namespace.as_str()),
        })
    }

    /// The default namespace configured for this cluster's context.
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Resolve a path-and-query against this cluster's base URL.
    pub fn url_for(&self, path_and_query: &str) -> Result<Uri, Error> {
        let parts = self.base_url.clone().into_parts();
        let authority = parts.authority.expect("base url always has an authority");
        let scheme = parts.scheme.expect("base url always has a scheme");
        Uri::builder()
            .scheme(scheme)
            .authority(authority)
            .path_and_query(path_and_query)
            .build()
            .map_err(Error::InvalidUri)
    }

    fn authorize(&self, request: &mut Request<Full<Bytes>>) {
        match &self.auth {
            Auth::Bearer(token) => {
                if let Ok(value) =
                    HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                {
                    request.headers_mut().insert(AUTHORIZATION, value);
                }
            }
            Auth::Basic(value) => {
                request.headers_mut().insert(AUTHORIZATION, value.clone());
            }
        }
    }

    /// Send a raw request and return the raw response, with auth applied.
    /// Used directly by the proxy-pass and watch-proxy paths, which forward
    /// upstream responses without decoding them.
    pub async fn send_raw(&self, mut request: Request<Full<Bytes>>) -> Result<Response<Incoming>, Error> {
        self.authorize(&mut request);
        self.inner.request(request).await.map_err(|e| {
            Error::Connection(std::io::Error::other(e))
        })
    }

    fn build_request(&self, method: Method, path_and_query: &str, body: Vec<u8>) -> Result<Request<Full<Bytes>>, Error> {
        let uri = self.url_for(path_and_query)?;
        let mut builder = Request::builder().method(method).uri(uri);
        if !body.is_empty() {
            builder = builder.header(http::header::CONTENT_TYPE, "application/json");
        }
        builder
            .body(Full::new(Bytes::from(body)))
            .map_err(Error::HttpError)
    }

    /// Perform a request and deserialize the JSON response body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Vec<u8>,
    ) -> Result<T, Error> {
        let text = self.request_text(method, path_and_query, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            tracing::warn!(%text, error = %e, "failed to deserialize response body");
            Error::SerdeError(e)
        })
    }

    /// Perform a request and return the response body as a string, checking
    /// for a `Status` failure object first.
    pub async fn request_text(&self, method: Method, path_and_query: &str, body: Vec<u8>) -> Result<String, Error> {
        let request = self.build_request(method, path_and_query, body)?;
        let response = self.send_raw(request).await?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Connection(std::io::Error::other(e)))?
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if !status.is_success() {
            if let Ok(failure) = serde_json::from_str::<Status>(&text) {
                let code = if failure.code == 0 { status.as_u16() } else { failure.code };
                return Err(Error::Api(ErrorResponse {
                    status: failure.status,
                    message: failure.message,
                    reason: failure.reason,
                    code,
                }));
            }
        }
        Ok(text)
    }

    /// Perform a request and return a byte stream of the response body,
    /// without buffering it. Used for watch-proxy passthrough.
    pub async fn request_stream(
        &self,
        method: Method,
        path_and_query: &str,
    ) -> Result<impl Stream<Item = Result<Bytes, Error>>, Error> {
        let request = self.build_request(method, path_and_query, Vec::new())?;
        let response = self.send_raw(request).await?;
        Ok(response
            .into_body()
            .into_data_stream()
            .map_err(|e| Error::Connection(std::io::Error::other(e))))
    }

    /// Perform a watch request and decode the chunked newline-delimited JSON
    /// response as a stream of [`WatchEvent`]s.
    pub async fn request_events<T>(
        &self,
        method: Method,
        path_and_query: &str,
    ) -> Result<impl TryStream<Item = Result<WatchEvent<T>, Error>>, Error>
    where
        T: Clone + DeserializeOwned,
    {
        let request = self.build_request(method, path_and_query, Vec::new())?;
        let response = self.send_raw(request).await?;

        let io_stream = response.into_body().into_data_stream().map_err(|e| {
            std::io::Error::other(e)
        });
        let frames = FramedRead::new(StreamReader::new(io_stream), LinesCodec::new());

        Ok(frames.filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => match serde_json::from_str::<WatchEvent<T>>(&line) {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        if e.is_eof() {
                            return None;
                        }
                        if let Ok(value) = serde_json::from_str::<Value>(&line) {
                            if value.get("kind") == Some(&Value::String("Status".into())) {
                                if let Ok(status) = serde_json::from_value::<Status>(value) {
                                    let code = if status.code == 0 { 500 } else { status.code };
                                    return Some(Err(Error::Api(ErrorResponse {
                                        status: status.status,
                                        message: status.message,
                                        reason: status.reason,
                                        code,
                                    })));
                                }
                            }
                        }
                        Some(Err(Error::SerdeError(e)))
                    }
                },
                Err(LinesCodecError::Io(e)) => match e.kind() {
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                        tracing::debug!(error = %e, "watch stream ended");
                        None
                    }
                    _ => Some(Err(Error::ReadEvents(e))),
                },
                Err(LinesCodecError::MaxLineLengthExceeded) => Some(Err(Error::MalformedWatchLine)),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Identity;
    use secrecy::SecretString;

    fn resolved() -> ResolvedContext {
        install_default_crypto_provider();
        ResolvedContext {
            cluster_url: "https://cluster.example.com:6443".parse().unwrap(),
            root_cert_pem: None,
            accept_invalid_certs: false,
            identity: Identity::Bearer(SecretString::from("tok".to_string())),
            default_namespace: "default".into(),
        }
    }

    #[test]
    fn url_for_preserves_scheme_and_authority() {
        let client = Client::new(&resolved()).unwrap();
        let uri = client.url_for("/api/v1/namespaces/default/pods?limit=10").unwrap();
        assert_eq!(uri.host(), Some("cluster.example.com"));
        assert_eq!(uri.scheme_str(), Some("https"));
        assert_eq!(uri.path_and_query().unwrap(), "/api/v1/namespaces/default/pods?limit=10");
    }

    #[test]
    fn client_cert_identity_is_rejected_for_now() {
        let mut ctx = resolved();
        ctx.identity = Identity::ClientCert {
            cert_pem: vec![],
            key_pem: vec![],
        };
        assert!(Client::new(&ctx).is_err());
    }
}
