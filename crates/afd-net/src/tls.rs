//! TLS client configuration, handshake and failure classification.
//!
//! Every handshake is bounded by the connection's transfer timeout, so a
//! stalled peer cannot block the task. In non-strict mode any certificate
//! chain is accepted (handshake signatures are still checked); in strict
//! mode the chain must verify against the CA store and failures are mapped
//! onto [`TlsFailure`] for diagnostics.

use std::collections::HashMap;
use std::env;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, DigitallySignedStruct, OtherError, RootCertStore,
    SignatureScheme, SupportedCipherSuite, SupportedProtocolVersion,
};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{ConnectOptions, ProtocolOptions, TlsFloor};
use crate::{Error, Result};

pub use rustls::ClientConfig;

/// Environment variable holding an OpenSSL-style cipher list.
pub const CIPHER_ENV: &str = "SSL_CIPHER";

/// Classified TLS failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsFailure {
    /// Chain consists of a single certificate nobody vouches for.
    SelfSigned,
    /// Certificate validity period has ended.
    Expired,
    /// Certificate validity period has not started.
    NotYetValid,
    /// Issuer not found in the local CA store.
    UnknownIssuer,
    /// Certificate has been revoked.
    Revoked,
    /// Certificate revocation list could not be used.
    BadCrl,
    /// Certificate does not cover the requested hostname.
    NameMismatch,
    /// Any other handshake problem.
    Other,
}

impl TlsFailure {
    /// Returns true if the failure concerns the peer certificate itself.
    #[must_use]
    pub const fn is_certificate_problem(self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for TlsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SelfSigned => "self signed certificate",
            Self::Expired => "certificate has expired",
            Self::NotYetValid => "certificate is not yet valid",
            Self::UnknownIssuer => "unable to get local issuer certificate",
            Self::Revoked => "certificate revoked",
            Self::BadCrl => "certificate revocation list is invalid",
            Self::NameMismatch => "certificate does not match host name",
            Self::Other => "handshake failure",
        })
    }
}

/// Classifies a rustls error.
#[must_use]
pub fn classify(err: &rustls::Error) -> TlsFailure {
    match err {
        rustls::Error::InvalidCertificate(cert) => match cert {
            CertificateError::Expired | CertificateError::ExpiredContext { .. } => {
                TlsFailure::Expired
            }
            CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
                TlsFailure::NotYetValid
            }
            CertificateError::UnknownIssuer => TlsFailure::UnknownIssuer,
            CertificateError::Revoked => TlsFailure::Revoked,
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
                TlsFailure::NameMismatch
            }
            CertificateError::Other(other) if other.0.is::<SelfSignedCertificate>() => {
                TlsFailure::SelfSigned
            }
            _ => TlsFailure::Other,
        },
        rustls::Error::InvalidCertRevocationList(_) => TlsFailure::BadCrl,
        _ => TlsFailure::Other,
    }
}

/// Marker error for a lone untrusted certificate.
#[derive(Debug)]
struct SelfSignedCertificate;

impl fmt::Display for SelfSignedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("self signed certificate")
    }
}

impl StdError for SelfSignedCertificate {}

/// Inputs that determine a TLS client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TlsSettings {
    /// Require a verifiable peer certificate.
    pub strict_verify: bool,
    /// Legacy renegotiation requested.
    pub legacy_renegotiation: bool,
    /// Minimum protocol version.
    pub floor: TlsFloor,
    /// Cipher list override.
    pub cipher_list: Option<String>,
}

impl TlsSettings {
    /// Derives settings from connection options and the environment.
    #[must_use]
    pub fn from_options(options: &ConnectOptions) -> Self {
        Self {
            strict_verify: options.has(ProtocolOptions::TLS_STRICT_VERIFY),
            legacy_renegotiation: options.has(ProtocolOptions::TLS_LEGACY_RENEGOTIATION),
            floor: options.tls_floor,
            cipher_list: env::var(CIPHER_ENV).ok().filter(|s| !s.trim().is_empty()),
        }
    }
}

static CONFIG_CACHE: OnceLock<Mutex<HashMap<TlsSettings, Arc<ClientConfig>>>> = OnceLock::new();

/// Returns a shared client configuration for `settings`, building it on
/// first use.
///
/// # Errors
///
/// Returns [`Error::Permanent`] if no CA store can be loaded in strict mode
/// or the protocol/cipher selection is unusable.
pub fn shared_client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>> {
    let cache = CONFIG_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(config) = cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(settings)
    {
        return Ok(Arc::clone(config));
    }
    let config = client_config(settings)?;
    cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(settings.clone(), Arc::clone(&config));
    Ok(config)
}

/// Builds a client configuration for `settings`.
///
/// # Errors
///
/// See [`shared_client_config`].
pub fn client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>> {
    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Some(list) = settings.cipher_list.as_deref() {
        let selected = select_cipher_suites(list, &provider.cipher_suites);
        if selected.is_empty() {
            tracing::warn!(ciphers = list, "no known cipher in {CIPHER_ENV}, using defaults");
        } else {
            provider.cipher_suites = selected;
        }
    }
    let provider = Arc::new(provider);

    let versions: &[&'static SupportedProtocolVersion] = match settings.floor {
        TlsFloor::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        TlsFloor::Tls13 => &[&rustls::version::TLS13],
    };
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(versions)
        .map_err(|e| Error::Permanent(format!("TLS configuration: {e}")))?;

    let verifier: Arc<dyn ServerCertVerifier> = if settings.strict_verify {
        let roots = Arc::new(root_store()?);
        let inner = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(&provider))
            .build()
            .map_err(|e| Error::Permanent(format!("TLS verifier: {e}")))?;
        Arc::new(StrictVerifier { inner })
    } else {
        Arc::new(PermissiveVerifier { provider })
    };

    if settings.legacy_renegotiation {
        tracing::debug!("legacy renegotiation requested, peer renegotiation is never performed");
    }

    let config = builder
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Loads CA roots: `SSL_CERT_FILE`/`SSL_CERT_DIR` or the system store,
/// falling back to the bundled Mozilla roots.
fn root_store() -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::warn!(error = %err, "failed to load CA certificates");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "loaded native CA certificates");

    if roots.is_empty() {
        if env::var_os("SSL_CERT_FILE").is_some() || env::var_os("SSL_CERT_DIR").is_some() {
            return Err(Error::Permanent(
                "no usable CA certificates in SSL_CERT_FILE/SSL_CERT_DIR".to_string(),
            ));
        }
        roots
            .roots
            .extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    if roots.is_empty() {
        return Err(Error::Permanent("failed to load default CA store".to_string()));
    }
    Ok(roots)
}

/// Maps OpenSSL cipher names onto rustls suite names.
fn openssl_alias(name: &str) -> Option<&'static str> {
    Some(match name {
        "TLS_AES_256_GCM_SHA384" => "TLS13_AES_256_GCM_SHA384",
        "TLS_AES_128_GCM_SHA256" => "TLS13_AES_128_GCM_SHA256",
        "TLS_CHACHA20_POLY1305_SHA256" => "TLS13_CHACHA20_POLY1305_SHA256",
        "ECDHE-ECDSA-AES256-GCM-SHA384" => "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        "ECDHE-ECDSA-AES128-GCM-SHA256" => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        "ECDHE-ECDSA-CHACHA20-POLY1305" => "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        "ECDHE-RSA-AES256-GCM-SHA384" => "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        "ECDHE-RSA-AES128-GCM-SHA256" => "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        "ECDHE-RSA-CHACHA20-POLY1305" => "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        _ => return None,
    })
}

/// Picks the suites named in a colon-separated list, in list order.
///
/// Keywords and exclusions (`HIGH`, `!aNULL`, ...) are ignored.
pub(crate) fn select_cipher_suites(
    list: &str,
    available: &[SupportedCipherSuite],
) -> Vec<SupportedCipherSuite> {
    let mut selected: Vec<SupportedCipherSuite> = Vec::new();
    for token in list.split([':', ',', ' ']).map(str::trim) {
        if token.is_empty() || token.starts_with(['!', '-', '+']) {
            continue;
        }
        let name = openssl_alias(token).unwrap_or(token);
        let found = available
            .iter()
            .find(|suite| format!("{:?}", suite.suite()).eq_ignore_ascii_case(name));
        if let Some(suite) = found {
            if !selected.iter().any(|s| s.suite() == suite.suite()) {
                selected.push(*suite);
            }
        }
    }
    selected
}

/// Web-PKI verification that reports a lone untrusted certificate as
/// self-signed.
#[derive(Debug)]
struct StrictVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for StrictVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
                if intermediates.is_empty() =>
            {
                Err(rustls::Error::InvalidCertificate(CertificateError::Other(
                    OtherError(Arc::new(SelfSignedCertificate)),
                )))
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any certificate chain; handshake signatures are still checked.
#[derive(Debug)]
struct PermissiveVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PermissiveVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Summary of a negotiated TLS session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    /// Negotiated protocol version, e.g. `TLSv1_3`.
    pub version: String,
    /// Negotiated cipher suite.
    pub cipher: String,
    /// Number of certificates the peer presented.
    pub peer_certificates: usize,
    /// SHA-256 fingerprint of the peer's end-entity certificate.
    pub peer_fingerprint: Option<String>,
}

impl TlsInfo {
    fn from_session(session: &rustls::ClientConnection) -> Self {
        let certs = session.peer_certificates().unwrap_or_default();
        Self {
            version: session
                .protocol_version()
                .map_or_else(|| "unknown".to_string(), |v| format!("{v:?}")),
            cipher: session
                .negotiated_cipher_suite()
                .map_or_else(|| "unknown".to_string(), |s| format!("{:?}", s.suite())),
            peer_certificates: certs.len(),
            peer_fingerprint: certs.first().map(|cert| fingerprint(cert.as_ref())),
        }
    }
}

impl fmt::Display for TlsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.version, self.cipher)
    }
}

fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Runs the client handshake over an established TCP stream.
pub(crate) async fn handshake(
    tcp: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
    timeout: Duration,
) -> Result<(TlsStream<TcpStream>, TlsInfo)> {
    let server_name = ServerName::try_from(host.to_string())?;
    let connector = TlsConnector::from(config);
    let stream = match tokio::time::timeout(timeout, connector.connect(server_name, tcp)).await {
        Err(_) => {
            tracing::warn!(host, ?timeout, "TLS handshake timed out");
            return Err(Error::Timeout(timeout));
        }
        Ok(Err(e)) => return Err(handshake_error(e, host)),
        Ok(Ok(stream)) => stream,
    };
    let info = TlsInfo::from_session(stream.get_ref().1);
    tracing::info!(host, version = %info.version, cipher = %info.cipher, "TLS session established");
    Ok((stream, info))
}

fn handshake_error(err: io::Error, host: &str) -> Error {
    if let Some(tls_err) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        let kind = classify(tls_err);
        tracing::error!(host, %kind, error = %tls_err, "TLS handshake failed");
        return Error::Tls {
            kind,
            message: tls_err.to_string(),
        };
    }
    crate::error::classify_read_error(err, host)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_certificate_errors() {
        let expired = rustls::Error::InvalidCertificate(CertificateError::Expired);
        assert_eq!(classify(&expired), TlsFailure::Expired);

        let issuer = rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer);
        assert_eq!(classify(&issuer), TlsFailure::UnknownIssuer);

        let revoked = rustls::Error::InvalidCertificate(CertificateError::Revoked);
        assert_eq!(classify(&revoked), TlsFailure::Revoked);

        let early = rustls::Error::InvalidCertificate(CertificateError::NotValidYet);
        assert_eq!(classify(&early), TlsFailure::NotYetValid);

        let lone = rustls::Error::InvalidCertificate(CertificateError::Other(OtherError(
            Arc::new(SelfSignedCertificate),
        )));
        assert_eq!(classify(&lone), TlsFailure::SelfSigned);

        let other = rustls::Error::DecryptError;
        assert_eq!(classify(&other), TlsFailure::Other);
    }

    #[test]
    fn test_failure_strings_are_distinct() {
        let all = [
            TlsFailure::SelfSigned,
            TlsFailure::Expired,
            TlsFailure::NotYetValid,
            TlsFailure::UnknownIssuer,
            TlsFailure::Revoked,
            TlsFailure::BadCrl,
            TlsFailure::NameMismatch,
            TlsFailure::Other,
        ];
        let mut seen: Vec<String> = all.iter().map(ToString::to_string).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), all.len());
        assert!(!TlsFailure::Other.is_certificate_problem());
        assert!(TlsFailure::Expired.is_certificate_problem());
    }

    #[test]
    fn test_select_cipher_suites() {
        let available = rustls::crypto::aws_lc_rs::default_provider().cipher_suites;
        let selected = select_cipher_suites(
            "HIGH:!aNULL:TLS_AES_128_GCM_SHA256:ECDHE-RSA-AES256-GCM-SHA384",
            &available,
        );
        let names: Vec<String> = selected.iter().map(|s| format!("{:?}", s.suite())).collect();
        assert_eq!(
            names,
            vec![
                "TLS13_AES_128_GCM_SHA256".to_string(),
                "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384".to_string(),
            ]
        );
    }

    #[test]
    fn test_select_unknown_cipher_is_empty() {
        let available = rustls::crypto::aws_lc_rs::default_provider().cipher_suites;
        assert!(select_cipher_suites("RC4-MD5:DES-CBC3-SHA", &available).is_empty());
    }

    #[test]
    fn test_permissive_config_builds() {
        let settings = TlsSettings::default();
        let config = client_config(&settings).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_shared_config_is_reused() {
        let settings = TlsSettings {
            floor: TlsFloor::Tls13,
            ..TlsSettings::default()
        };
        let a = shared_client_config(&settings).unwrap();
        let b = shared_client_config(&settings).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(b"");
        assert!(fp.starts_with("e3:b0:c4:42"));
        assert_eq!(fp.len(), 32 * 3 - 1);
    }
}
