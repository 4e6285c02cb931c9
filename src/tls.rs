//! TLS policy surface.
//!
//! The daemon does not terminate TLS itself; certificate loading, generation
//! and socket wrapping belong to the embedder. These types describe what the
//! embedder should build: which files to load, whether to self-sign, and how
//! strictly to authenticate clients on the primary listener. The status
//! listener never requires client certificates, which is why it exists.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PeermitError;

/// How the primary listener treats client certificates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientAuthPolicy {
    /// No client certificate is requested.
    #[default]
    NoClientCert,
    /// A certificate is requested and verified when presented.
    VerifyClientCertIfGiven,
    /// A verified certificate is mandatory.
    RequireAndVerifyClientCert,
}

/// Certificate sources and verification policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// CA bundle used to verify peers and, absent a dedicated client CA,
    /// client certificates.
    pub ca_file: Option<PathBuf>,
    /// CA private key. With `auto_tls`, ephemeral server certificates are
    /// signed by this CA instead of being self-signed.
    pub ca_key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Generate a self-signed server certificate when no files are given.
    #[serde(default)]
    pub auto_tls: bool,
    #[serde(default)]
    pub client_auth: ClientAuthPolicy,
    /// CA bundle for verifying client certificates, when different from
    /// `ca_file`.
    pub client_auth_ca_file: Option<PathBuf>,
    /// Server name peers dial when certificates carry no IP SANs.
    pub client_auth_server_name: Option<String>,
    /// Skip server certificate verification on outgoing peer connections.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), PeermitError> {
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(PeermitError::InvalidArgument(
                "tls: cert_file and key_file must be provided together".into(),
            ));
        }
        if self.ca_key_file.is_some() && self.ca_file.is_none() {
            return Err(PeermitError::InvalidArgument(
                "tls: ca_key_file requires ca_file".into(),
            ));
        }
        if self.cert_file.is_none() && !self.auto_tls {
            return Err(PeermitError::InvalidArgument(
                "tls: provide cert_file/key_file or enable auto_tls".into(),
            ));
        }
        if self.client_auth != ClientAuthPolicy::NoClientCert
            && self.client_auth_ca_file.is_none()
            && self.ca_file.is_none()
        {
            return Err(PeermitError::InvalidArgument(
                "tls: client auth requires client_auth_ca_file or ca_file".into(),
            ));
        }
        Ok(())
    }
}
