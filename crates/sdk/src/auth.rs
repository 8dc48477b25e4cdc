//! Bearer token credentials.
//!
//! [`BearerAuth`] is a tonic [`Interceptor`] that attaches an
//! `authorization: Bearer <token>` metadata entry to every outgoing request.
//! The metadata value is parsed once at construction; a token that cannot be
//! encoded as ASCII metadata fails client construction, never an individual
//! call. An empty token produces a pass-through interceptor.

use tonic::{metadata::AsciiMetadataValue, service::Interceptor};

use crate::error::{ConfigSnafu, Result};

/// Metadata key carrying the bearer credential.
const AUTHORIZATION_KEY: &str = "authorization";

/// Interceptor that injects a bearer token into outgoing request metadata.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    /// Pre-built header value, `None` when the token is empty.
    header: Option<AsciiMetadataValue>,
}

impl BearerAuth {
    /// Creates a bearer auth interceptor from a token.
    ///
    /// An empty token yields an interceptor that adds no metadata.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the token contains characters that
    /// cannot appear in an ASCII metadata value.
    pub fn new(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self { header: None });
        }

        let header = format!("Bearer {token}").parse::<AsciiMetadataValue>().map_err(|_| {
            ConfigSnafu { message: "auth token is not a valid ASCII metadata value" }.build()
        })?;

        Ok(Self { header: Some(header) })
    }

    /// Returns true if a credential is attached to requests.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.header.is_some()
    }
}

impl Interceptor for BearerAuth {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        if let Some(header) = &self.header {
            request.metadata_mut().insert(AUTHORIZATION_KEY, header.clone());
        }
        Ok(request)
    }
}
