//! Client configuration with builder pattern.
//!
//! Provides type-safe configuration for the client including:
//! - Bootstrap endpoint addresses
//! - Bearer token credentials
//! - Timeouts and connection settings
//! - Retry policies
//! - TLS settings

use std::time::Duration;

use snafu::ensure;

use crate::error::{ConfigSnafu, InvalidEndpointSnafu, Result};

/// Default request timeout (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the Recordbase client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bootstrap endpoint addresses (e.g., `127.0.0.1:8500` or
    /// `http://node1:8500`). Used for cluster discovery and as dial targets.
    pub(crate) endpoints: Vec<String>,

    /// Bearer token attached to every outgoing request. Empty means
    /// unauthenticated.
    pub(crate) auth_token: String,

    /// Request timeout.
    pub(crate) timeout: Duration,

    /// Connection establishment timeout.
    pub(crate) connect_timeout: Duration,

    /// Retry policy for transient unary failures.
    pub(crate) retry_policy: RetryPolicy,

    /// TLS configuration for secure connections.
    pub(crate) tls: Option<TlsConfig>,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Returns the configured bootstrap endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the bearer token. Empty means unauthenticated.
    #[must_use]
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the TLS configuration if enabled.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    endpoints: Vec<String>,
    auth_token: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    tls: Option<TlsConfig>,
}

impl ClientConfigBuilder {
    /// Sets the bootstrap endpoint addresses.
    ///
    /// At least one endpoint must be provided. Addresses without a scheme
    /// are dialed as `http://` (or `https://` when TLS is configured).
    #[must_use]
    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single endpoint address.
    #[must_use]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Sets the bearer token attached to every request.
    ///
    /// Default: empty (no `authorization` header is sent).
    #[must_use]
    pub fn with_auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    ///
    /// Default: 30 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connection establishment timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the retry policy for transient unary failures.
    ///
    /// Default: [`RetryPolicy::default()`].
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the TLS configuration for secure connections.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use recordbase_client::{ClientConfig, TlsConfig};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ClientConfig::builder()
    ///     .with_endpoint("secure.example.com:8500")
    ///     .with_tls(TlsConfig::new()
    ///         .with_ca_cert_pem("/path/to/ca.pem"))
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Builds the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoints provided
    /// - An endpoint is empty or contains whitespace
    /// - Timeout or connect timeout is zero
    /// - The TLS configuration is inconsistent
    pub fn build(self) -> Result<ClientConfig> {
        ensure!(
            !self.endpoints.is_empty(),
            ConfigSnafu { message: "at least one endpoint is required" }
        );

        for endpoint in &self.endpoints {
            validate_endpoint(endpoint)?;
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        ensure!(!timeout.is_zero(), ConfigSnafu { message: "timeout cannot be zero" });

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        ensure!(
            !connect_timeout.is_zero(),
            ConfigSnafu { message: "connect_timeout cannot be zero" }
        );

        if let Some(ref tls) = self.tls {
            tls.validate()?;
        }

        Ok(ClientConfig {
            endpoints: self.endpoints,
            auth_token: self.auth_token.unwrap_or_default(),
            timeout,
            connect_timeout,
            retry_policy: self.retry_policy.unwrap_or_default(),
            tls: self.tls,
        })
    }
}

/// Retry policy configuration for unary calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,

    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential increase.
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) for randomizing backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Creates a policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the initial backoff duration.
    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    #[must_use]
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor (0.0 to 1.0).
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds the retry policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}

/// Validates that an endpoint address is plausible.
///
/// Scheme-less addresses are accepted; the dialer normalizes them.
fn validate_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.trim().is_empty() {
        return InvalidEndpointSnafu { endpoint, message: "endpoint cannot be empty" }.fail();
    }

    if endpoint.contains(char::is_whitespace) {
        return InvalidEndpointSnafu {
            endpoint,
            message: "endpoint cannot contain whitespace",
        }
        .fail();
    }

    Ok(())
}

/// TLS configuration for secure connections.
///
/// Supports both PEM and DER certificate formats. When using DER format,
/// the certificate is converted to PEM internally for tonic compatibility.
///
/// # Example
///
/// ```no_run
/// # use recordbase_client::TlsConfig;
/// // Server verification against a custom CA
/// let tls = TlsConfig::new()
///     .with_ca_cert_pem("/path/to/ca.pem");
///
/// // Mutual TLS with client certificate
/// let mtls = TlsConfig::new()
///     .with_ca_cert_pem("/path/to/ca.pem")
///     .with_client_cert_pem("/path/to/client.pem", "/path/to/client.key");
///
/// // Public CA with domain override
/// let tls = TlsConfig::with_native_roots()
///     .with_domain_name("records.example.com");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA certificate for server verification.
    ca_cert: Option<CertificateData>,

    /// Client certificate for mutual TLS.
    client_cert: Option<CertificateData>,

    /// Client private key for mutual TLS.
    client_key: Option<Vec<u8>>,

    /// Domain name to verify against server certificate.
    /// If not set, the hostname from the endpoint is used.
    domain_name: Option<String>,

    /// Whether to use the system's native root certificates.
    use_native_roots: bool,
}

/// Certificate data that can be either PEM or DER encoded.
#[derive(Debug, Clone)]
pub enum CertificateData {
    /// PEM-encoded certificate data.
    Pem(Vec<u8>),
    /// DER-encoded certificate data.
    Der(Vec<u8>),
}

impl CertificateData {
    /// Converts the certificate to PEM format.
    ///
    /// If already PEM, returns as-is. If DER, wraps with PEM headers.
    #[must_use]
    pub fn to_pem(&self) -> Vec<u8> {
        match self {
            Self::Pem(data) => data.clone(),
            Self::Der(der) => {
                use std::io::Write;

                let base64 = base64_encode(der);
                let mut pem = Vec::new();
                writeln!(pem, "-----BEGIN CERTIFICATE-----").ok();
                // Write in 64-character lines
                for chunk in base64.as_bytes().chunks(64) {
                    pem.extend_from_slice(chunk);
                    pem.push(b'\n');
                }
                writeln!(pem, "-----END CERTIFICATE-----").ok();
                pem
            },
        }
    }
}

/// Simple base64 encoding for DER to PEM conversion.
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut result = String::new();
    let mut i = 0;

    while i < data.len() {
        let b0 = data[i];
        let b1 = data.get(i + 1).copied().unwrap_or(0);
        let b2 = data.get(i + 2).copied().unwrap_or(0);

        let n = (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2);

        result.push(ALPHABET[(n >> 18) as usize & 0x3F] as char);
        result.push(ALPHABET[(n >> 12) as usize & 0x3F] as char);

        if i + 1 < data.len() {
            result.push(ALPHABET[(n >> 6) as usize & 0x3F] as char);
        } else {
            result.push('=');
        }

        if i + 2 < data.len() {
            result.push(ALPHABET[n as usize & 0x3F] as char);
        } else {
            result.push('=');
        }

        i += 3;
    }

    result
}

impl TlsConfig {
    /// Creates a new TLS configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a TLS configuration that uses the system's native root
    /// certificates, for servers with publicly-signed certificates.
    #[must_use]
    pub fn with_native_roots() -> Self {
        Self { use_native_roots: true, ..Self::default() }
    }

    /// Sets the CA certificate from a PEM file path.
    ///
    /// The certificate is read and stored. Any I/O errors will surface
    /// when the configuration is applied.
    #[must_use]
    pub fn with_ca_cert_pem(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        if let Ok(data) = std::fs::read(path.into()) {
            self.ca_cert = Some(CertificateData::Pem(data));
        }
        self
    }

    /// Sets the CA certificate from PEM bytes.
    #[must_use]
    pub fn with_ca_cert_pem_bytes(mut self, pem: impl AsRef<[u8]>) -> Self {
        self.ca_cert = Some(CertificateData::Pem(pem.as_ref().to_vec()));
        self
    }

    /// Sets the CA certificate from a DER file path.
    #[must_use]
    pub fn with_ca_cert_der(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        if let Ok(data) = std::fs::read(path.into()) {
            self.ca_cert = Some(CertificateData::Der(data));
        }
        self
    }

    /// Sets the CA certificate from DER bytes.
    #[must_use]
    pub fn with_ca_cert_der_bytes(mut self, der: impl AsRef<[u8]>) -> Self {
        self.ca_cert = Some(CertificateData::Der(der.as_ref().to_vec()));
        self
    }

    /// Sets the client certificate and key from PEM file paths for mutual TLS.
    #[must_use]
    pub fn with_client_cert_pem(
        mut self,
        cert_path: impl Into<std::path::PathBuf>,
        key_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        if let (Ok(cert), Ok(key)) =
            (std::fs::read(cert_path.into()), std::fs::read(key_path.into()))
        {
            self.client_cert = Some(CertificateData::Pem(cert));
            self.client_key = Some(key);
        }
        self
    }

    /// Sets the client certificate and key from PEM bytes for mutual TLS.
    #[must_use]
    pub fn with_client_cert_pem_bytes(
        mut self,
        cert: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Self {
        self.client_cert = Some(CertificateData::Pem(cert.as_ref().to_vec()));
        self.client_key = Some(key.as_ref().to_vec());
        self
    }

    /// Sets the domain name for server certificate verification.
    ///
    /// Use this when the server's certificate CN/SAN doesn't match
    /// the hostname used in the endpoint address.
    #[must_use]
    pub fn with_domain_name(mut self, domain: impl Into<String>) -> Self {
        self.domain_name = Some(domain.into());
        self
    }

    /// Returns the CA certificate data if configured.
    #[must_use]
    pub fn ca_cert(&self) -> Option<&CertificateData> {
        self.ca_cert.as_ref()
    }

    /// Returns the client certificate data if configured.
    #[must_use]
    pub fn client_cert(&self) -> Option<&CertificateData> {
        self.client_cert.as_ref()
    }

    /// Returns the client private key if configured.
    #[must_use]
    pub fn client_key(&self) -> Option<&[u8]> {
        self.client_key.as_deref()
    }

    /// Returns the domain name override if configured.
    #[must_use]
    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    /// Returns whether native root certificates should be used.
    #[must_use]
    pub fn use_native_roots(&self) -> bool {
        self.use_native_roots
    }

    /// Validates the TLS configuration.
    ///
    /// Returns an error if:
    /// - Client certificate is set but key is missing
    /// - Neither CA cert nor native roots are configured
    pub fn validate(&self) -> Result<()> {
        if self.client_cert.is_some() && self.client_key.is_none() {
            return ConfigSnafu { message: "client certificate requires a private key" }.fail();
        }

        if self.ca_cert.is_none() && !self.use_native_roots {
            return ConfigSnafu { message: "TLS requires either a CA certificate or native roots" }
                .fail();
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = ClientConfig::builder().with_endpoint("127.0.0.1:8500").build();

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.endpoints(), &["127.0.0.1:8500"]);
        assert_eq!(config.auth_token(), "");
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_config_with_multiple_endpoints() {
        let config = ClientConfig::builder()
            .with_endpoints(["node1:8500", "node2:8500"])
            .build();

        assert!(config.is_ok());
        assert_eq!(config.unwrap().endpoints().len(), 2);
    }

    #[test]
    fn test_missing_endpoints() {
        let result = ClientConfig::builder().build();

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let result = ClientConfig::builder().with_endpoint("").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_with_whitespace_rejected() {
        let result = ClientConfig::builder().with_endpoint("node 1:8500").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ClientConfig::builder()
            .with_endpoint("127.0.0.1:8500")
            .with_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_auth_token_stored() {
        let config = ClientConfig::builder()
            .with_endpoint("127.0.0.1:8500")
            .with_auth_token("secret")
            .build()
            .unwrap();
        assert_eq!(config.auth_token(), "secret");
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(10));
    }

    #[test]
    fn test_retry_policy_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::builder()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(50))
            .with_jitter(0.0)
            .build();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
        assert_eq!(policy.jitter, 0.0);
        // Unset fields take defaults
        assert_eq!(policy.max_backoff, Duration::from_secs(10));
    }

    #[test]
    fn test_tls_requires_trust_anchor() {
        let tls = TlsConfig::new();
        assert!(tls.validate().is_err());

        let tls = TlsConfig::with_native_roots();
        assert!(tls.validate().is_ok());

        let tls = TlsConfig::new().with_ca_cert_pem_bytes(b"-----BEGIN CERTIFICATE-----\n");
        assert!(tls.validate().is_ok());
    }

    #[test]
    fn test_tls_client_cert_requires_key() {
        let mut tls = TlsConfig::with_native_roots();
        tls.client_cert = Some(CertificateData::Pem(b"cert".to_vec()));
        assert!(tls.validate().is_err());

        tls.client_key = Some(b"key".to_vec());
        assert!(tls.validate().is_ok());
    }

    #[test]
    fn test_der_to_pem_conversion() {
        let der = CertificateData::Der(vec![0x30, 0x82, 0x01, 0x0a]);
        let pem = der.to_pem();
        let text = String::from_utf8(pem).unwrap();
        assert!(text.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(text.trim_end().ends_with("-----END CERTIFICATE-----"));
    }

    #[test]
    fn test_pem_passthrough() {
        let pem_bytes = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let pem = CertificateData::Pem(pem_bytes.to_vec());
        assert_eq!(pem.to_pem(), pem_bytes.to_vec());
    }

    #[test]
    fn test_base64_encode_known_values() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }
}
