//! PKI artifact store
//!
//! Maps client names onto the Easy-RSA on-disk layout and answers
//! presence questions about them. The store never runs the CA tool; it
//! only derives paths, checks artifacts, removes them, and reads PEM
//! material for profile assembly.
//!
//! Layout under `{ovpn_dir}/pki`:
//! - `issued/{name}.crt`  client certificate
//! - `private/{name}.key` client private key
//! - `reqs/{name}.req`    certificate request
//! - `ca.crt`, `crl.pem`  shared CA material

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{OvpnError, Result};

/// Maximum accepted client name length
const MAX_NAME_LEN: usize = 64;

/// On-disk paths for one client's artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct ClientPaths {
    /// Issued certificate (`issued/{name}.crt`)
    pub cert: PathBuf,
    /// Private key (`private/{name}.key`)
    pub key: PathBuf,
    /// Certificate request (`reqs/{name}.req`)
    pub req: PathBuf,
}

/// Artifact presence snapshot for one client
///
/// An identity is active only when certificate and key are both present.
/// A lone request file does not make an identity exist, but it is
/// reported so callers can clear it before re-issuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStatus {
    pub cert_present: bool,
    pub key_present: bool,
    pub req_present: bool,
}

impl ClientStatus {
    /// Certificate and key are both present
    pub fn is_active(&self) -> bool {
        self.cert_present && self.key_present
    }

    /// Neither certificate nor key is present
    pub fn is_absent(&self) -> bool {
        !self.cert_present && !self.key_present
    }

    /// Exactly one of certificate/key is present
    pub fn is_partial(&self) -> bool {
        self.cert_present != self.key_present
    }

    /// Which of the two live artifacts is missing, if the state is partial
    pub fn missing_artifact(&self) -> Option<&'static str> {
        match (self.cert_present, self.key_present) {
            (true, false) => Some("private key"),
            (false, true) => Some("certificate"),
            _ => None,
        }
    }
}

/// Filesystem access to the Easy-RSA PKI tree
#[derive(Debug, Clone)]
pub struct PkiStore {
    ovpn_dir: PathBuf,
    pki_dir: PathBuf,
    easyrsa_bin: PathBuf,
}

impl PkiStore {
    /// Create a store over the PKI tree described by `config`
    pub fn new(config: &Config) -> Self {
        Self {
            ovpn_dir: config.ovpn_dir.clone(),
            pki_dir: config.pki_dir(),
            easyrsa_bin: config.easyrsa_bin.clone(),
        }
    }

    /// PKI root directory
    pub fn pki_dir(&self) -> &Path {
        &self.pki_dir
    }

    /// Shared CA certificate path (`{pki}/ca.crt`)
    pub fn ca_cert_path(&self) -> PathBuf {
        self.pki_dir.join("ca.crt")
    }

    /// Current revocation list path (`{pki}/crl.pem`)
    pub fn crl_path(&self) -> PathBuf {
        self.pki_dir.join("crl.pem")
    }

    /// Derive the artifact paths for a client name (no filesystem access)
    pub fn locate(&self, name: &str) -> ClientPaths {
        ClientPaths {
            cert: self.pki_dir.join("issued").join(format!("{}.crt", name)),
            key: self.pki_dir.join("private").join(format!("{}.key", name)),
            req: self.pki_dir.join("reqs").join(format!("{}.req", name)),
        }
    }

    /// Check which artifacts currently exist for a client
    pub async fn status(&self, name: &str) -> ClientStatus {
        let paths = self.locate(name);
        ClientStatus {
            cert_present: is_file(&paths.cert).await,
            key_present: is_file(&paths.key).await,
            req_present: is_file(&paths.req).await,
        }
    }

    /// Verify the preconditions every CA-touching operation relies on
    ///
    /// Checked per request rather than once at startup so that a PKI
    /// initialized after the daemon boots is picked up without a restart.
    pub async fn ensure_ready(&self) -> Result<()> {
        if !is_dir(&self.ovpn_dir).await {
            return Err(OvpnError::config(format!(
                "OpenVPN dir not found: {}",
                self.ovpn_dir.display()
            )));
        }
        if !is_dir(&self.pki_dir).await {
            return Err(OvpnError::config(format!(
                "PKI dir not found (initialize Easy-RSA first): {}",
                self.pki_dir.display()
            )));
        }
        if !is_file(&self.easyrsa_bin).await {
            return Err(OvpnError::config(format!(
                "easyrsa not found at {}",
                self.easyrsa_bin.display()
            )));
        }
        Ok(())
    }

    /// Best-effort removal of a client's artifacts
    ///
    /// Missing files are fine; any other unlink failure is logged and
    /// skipped so one stuck file never wedges a lifecycle transition.
    /// Remaining artifacts keep showing up in `status`.
    pub async fn purge(&self, name: &str) {
        let paths = self.locate(name);
        for path in [&paths.cert, &paths.key, &paths.req] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Read PEM material for profile inlining, trimmed of surrounding whitespace
    ///
    /// A missing file surfaces as a not-found error describing the
    /// artifact instead of the raw path.
    pub async fn read_material(&self, path: &Path, description: &str) -> Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OvpnError::not_found(description.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Validate and canonicalize a client name
///
/// Trims surrounding whitespace, then requires a non-empty token of at
/// most 64 characters from `[A-Za-z0-9._@-]` that does not start with
/// `-` or `.`. The result is safe to use both as a file stem under the
/// PKI tree and as an easyrsa argument.
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(OvpnError::validation("client name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(OvpnError::validation(format!(
            "client name is too long (max {} characters)",
            MAX_NAME_LEN
        )));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(OvpnError::validation(
            "client name must not start with '-' or '.'",
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@')))
    {
        return Err(OvpnError::validation(format!(
            "client name contains invalid character {:?}",
            bad
        )));
    }
    Ok(name.to_string())
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
