//! Client lifecycle manager
//!
//! Orchestrates the artifact store and the CA gateway to implement the
//! create/overwrite/revoke transitions. Holds no persistent state of its
//! own; all durable effects live in the PKI tree and the CA's index.
//!
//! Mutations for one client name are serialized through a per-name lock
//! so two requests can never interleave an issuance with a purge or run
//! two issuances of the same name. Operations on different names run
//! concurrently (the CA gateway itself serializes actual tool runs).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::easyrsa::CertificateAuthority;
use crate::error::{OvpnError, Result};
use crate::store::{normalize_name, PkiStore};

/// Arena of per-name locks
///
/// Locks are created on first use and never removed; dropping an entry
/// while another task still holds a clone would split the exclusion
/// scope for that name.
#[derive(Default)]
pub struct NameLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Lock handle for a name, shared by every caller using that name
    pub fn for_name(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Options for a create/overwrite request
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Passphrase for the private key; ignored when `nopass` is set
    pub password: Option<String>,
    /// Generate the key without passphrase protection
    pub nopass: bool,
    /// Revoke and replace an existing identity instead of returning early
    pub overwrite: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            password: None,
            nopass: true,
            overwrite: false,
        }
    }
}

/// Result of a create/overwrite request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new certificate and key were issued
    Created { ca_output: String },
    /// The identity is already active and overwrite was not requested
    AlreadyExists,
}

impl CreateOutcome {
    /// Human-readable message for API responses
    pub fn message(&self) -> &'static str {
        match self {
            CreateOutcome::Created { .. } => "Client created",
            CreateOutcome::AlreadyExists => "Client already exists",
        }
    }
}

/// Result of a revoke request, carrying the tool output of both steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
    pub revoke_output: String,
    pub crl_output: String,
}

/// Create/overwrite/revoke orchestration over one PKI tree
#[derive(Clone)]
pub struct ClientManager {
    store: PkiStore,
    ca: Arc<dyn CertificateAuthority>,
    locks: Arc<NameLocks>,
}

impl ClientManager {
    /// Create a manager over `store`, delegating CA work to `ca`
    ///
    /// The lock arena is shared with the profile assembler so exports
    /// serialize against in-flight mutations of the same name.
    pub fn new(store: PkiStore, ca: Arc<dyn CertificateAuthority>, locks: Arc<NameLocks>) -> Self {
        Self { store, ca, locks }
    }

    /// Create a new client identity, optionally replacing an existing one
    ///
    /// Idempotent for an already-active name without `overwrite`. With
    /// `overwrite`, an existing certificate is revoked (and the CRL
    /// refreshed) before any file is deleted; a revoke failure aborts the
    /// whole request with the old identity untouched.
    pub async fn create(&self, raw_name: &str, opts: CreateOptions) -> Result<CreateOutcome> {
        let name = normalize_name(raw_name)?;
        let lock = self.locks.for_name(&name);
        let _guard = lock.lock().await;

        self.store.ensure_ready().await?;
        let status = self.store.status(&name).await;

        if status.is_active() && !opts.overwrite {
            return Ok(CreateOutcome::AlreadyExists);
        }
        if status.is_partial() && !opts.overwrite {
            let missing = status.missing_artifact().unwrap_or("artifact");
            return Err(OvpnError::inconsistent(format!(
                "client {} has its {} missing; pass overwrite to rebuild",
                name, missing
            )));
        }

        if opts.overwrite && status.cert_present {
            // A certificate on disk may still be trusted by the gateway.
            // Never delete it without a successful revocation and CRL
            // refresh first.
            let output = self.ca.revoke(&name).await?;
            self.refresh_crl().await?;
            tracing::info!(
                "Revoked {} before re-issue: {}",
                name,
                crate::easyrsa::last_line(&output).unwrap_or("")
            );
            self.store.purge(&name).await;
        } else if status.key_present || status.req_present {
            // Orphan key or stale request without a certificate; nothing
            // live to revoke, but issuance trips over leftovers.
            self.store.purge(&name).await;
        }

        let passwordless = opts.nopass || opts.password.as_deref().map_or(true, |p| p.is_empty());
        let issue_result = if passwordless {
            self.ca.issue(&name).await
        } else {
            let password = opts.password.as_deref().unwrap_or_default();
            self.ca.issue_with_password(&name, password).await
        };

        let ca_output = match issue_result {
            Ok(output) => output,
            Err(e) => {
                // The name held nothing live when issuance started, so
                // clearing half-written artifacts loses nothing and keeps
                // a failed create from later reading as active or partial.
                self.store.purge(&name).await;
                return Err(e);
            }
        };

        let status = self.store.status(&name).await;
        if !status.is_active() {
            self.store.purge(&name).await;
            return Err(OvpnError::inconsistent(format!(
                "issuance for {} reported success but artifacts are incomplete",
                name
            )));
        }

        tracing::info!("Issued certificate for client {}", name);
        Ok(CreateOutcome::Created { ca_output })
    }

    /// Revoke a client's certificate and refresh the CRL
    ///
    /// Files are retained on disk for audit. Revoking an unknown or
    /// already-revoked name surfaces the tool's own error.
    pub async fn revoke(&self, raw_name: &str) -> Result<RevokeOutcome> {
        let name = normalize_name(raw_name)?;
        let lock = self.locks.for_name(&name);
        let _guard = lock.lock().await;

        self.store.ensure_ready().await?;
        let revoke_output = self.ca.revoke(&name).await?;
        let crl_output = self.refresh_crl().await?;
        tracing::info!("Revoked client {}", name);

        Ok(RevokeOutcome {
            revoke_output,
            crl_output,
        })
    }

    /// Regenerate the CRL, retrying once
    ///
    /// A revoke without a refreshed CRL is an inconsistent state, so the
    /// refresh gets a second chance before the failure surfaces.
    async fn refresh_crl(&self) -> Result<String> {
        match self.ca.gen_crl().await {
            Ok(output) => Ok(output),
            Err(e) => {
                tracing::warn!("CRL regeneration failed, retrying: {}", e);
                self.ca.gen_crl().await
            }
        }
    }
}
