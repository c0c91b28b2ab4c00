//! Easy-RSA gateway
//!
//! Trait-based abstraction over the Easy-RSA CLI, so lifecycle logic can
//! be tested without a real PKI. The CLI implementation treats the tool
//! as a black box: spawn, feed stdin if a key passphrase is involved,
//! collect combined output, and translate exit status into errors.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{OvpnError, Result};

/// Operations the lifecycle manager needs from a certificate authority
///
/// Each call returns the tool's combined stdout+stderr on success so
/// callers can surface its trailing status line.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Issue a certificate with a passwordless private key
    async fn issue(&self, name: &str) -> Result<String>;

    /// Issue a certificate with a passphrase-protected private key
    async fn issue_with_password(&self, name: &str, password: &str) -> Result<String>;

    /// Revoke the certificate for `name`
    async fn revoke(&self, name: &str) -> Result<String>;

    /// Regenerate the CRL from the current revocation index
    async fn gen_crl(&self) -> Result<String>;
}

/// CLI-backed certificate authority using the easyrsa binary
///
/// Invocations are serialized internally: Easy-RSA rewrites shared
/// index/serial files and is not safe under concurrent writers, even
/// for unrelated client names.
pub struct EasyRsa {
    bin: PathBuf,
    pki_dir: PathBuf,
    timeout: Duration,
    gate: Mutex<()>,
}

impl EasyRsa {
    /// Create a gateway for the given binary and PKI root
    pub fn new(bin: impl Into<PathBuf>, pki_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            pki_dir: pki_dir.into(),
            timeout,
            gate: Mutex::new(()),
        }
    }

    /// Create a gateway from service configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.easyrsa_bin, config.pki_dir(), config.ca_timeout)
    }

    /// Run one easyrsa invocation under the gate
    ///
    /// `EASYRSA_PKI` points the tool at our PKI root and `EASYRSA_BATCH`
    /// suppresses interactive confirmation prompts; passphrase entry
    /// still happens over stdin in batch mode. The timeout bounds the
    /// whole invocation, and a timed-out child is killed on drop.
    async fn run(
        &self,
        args: &[&str],
        stdin_input: Option<String>,
        context: &str,
    ) -> Result<String> {
        let _guard = self.gate.lock().await;

        let mut command = Command::new(&self.bin);
        command
            .args(args)
            .env("EASYRSA_PKI", &self.pki_dir)
            .env("EASYRSA_BATCH", "1")
            .stdin(if stdin_input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            OvpnError::ca(context, format!("failed to spawn {}: {}", self.bin.display(), e))
        })?;

        if let Some(input) = stdin_input {
            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                // A child that exits before reading its stdin reports the
                // real failure through its exit status below.
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                OvpnError::ca(context, format!("failed to collect output: {}", e))
            })?,
            Err(_) => {
                return Err(OvpnError::ca(
                    context,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
        };

        let combined = combine_output(&output.stdout, &output.stderr);
        if output.status.success() {
            Ok(combined)
        } else {
            Err(OvpnError::ca(context, combined))
        }
    }
}

#[async_trait]
impl CertificateAuthority for EasyRsa {
    async fn issue(&self, name: &str) -> Result<String> {
        let context = format!("build-client-full {}", name);
        self.run(&["build-client-full", name, "nopass"], None, &context)
            .await
    }

    async fn issue_with_password(&self, name: &str, password: &str) -> Result<String> {
        let context = format!("build-client-full {}", name);
        // The tool prompts for the passphrase and a confirmation.
        let input = format!("{}\n{}\n", password, password);
        self.run(&["build-client-full", name], Some(input), &context)
            .await
    }

    async fn revoke(&self, name: &str) -> Result<String> {
        let context = format!("revoke {}", name);
        self.run(&["revoke", name], None, &context).await
    }

    async fn gen_crl(&self) -> Result<String> {
        self.run(&["gen-crl"], None, "gen-crl").await
    }
}

/// Merge a child's stdout and stderr into one trimmed buffer
fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).trim().to_string();
    let err = String::from_utf8_lossy(stderr);
    let err = err.trim();
    if !err.is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(err);
    }
    combined
}

/// Last non-empty line of a tool's output, for compact API responses
pub fn last_line(output: &str) -> Option<&str> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
}

/// Scripted certificate authority for lifecycle tests
///
/// Emulates issuance by writing placeholder artifacts into a real PKI
/// tree, counts calls, and fails on demand. Revocation leaves artifacts
/// in place, matching the real tool's observable effect on the paths
/// this service reads.
#[cfg(test)]
pub struct MockCa {
    pki_dir: PathBuf,
    pub issue_calls: std::sync::atomic::AtomicUsize,
    pub revoke_calls: std::sync::atomic::AtomicUsize,
    pub crl_calls: std::sync::atomic::AtomicUsize,
    pub fail_issue: std::sync::atomic::AtomicBool,
    pub fail_revoke: std::sync::atomic::AtomicBool,
    /// Number of upcoming gen-crl calls that should fail
    pub fail_crl_times: std::sync::atomic::AtomicUsize,
    /// When failing an issue, leave a lone key behind first
    pub partial_on_failure: std::sync::atomic::AtomicBool,
    pub passwords_seen: std::sync::Mutex<Vec<String>>,
    /// Names revoked so far, in order (stands in for the CA's index)
    pub revoked_names: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockCa {
    pub fn new(pki_dir: impl Into<PathBuf>) -> Self {
        use std::sync::atomic::{AtomicBool, AtomicUsize};
        Self {
            pki_dir: pki_dir.into(),
            issue_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            crl_calls: AtomicUsize::new(0),
            fail_issue: AtomicBool::new(false),
            fail_revoke: AtomicBool::new(false),
            fail_crl_times: AtomicUsize::new(0),
            partial_on_failure: AtomicBool::new(false),
            passwords_seen: std::sync::Mutex::new(Vec::new()),
            revoked_names: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn issue_count(&self) -> usize {
        self.issue_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn revoke_count(&self) -> usize {
        self.revoke_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn crl_count(&self) -> usize {
        self.crl_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn write_artifacts(&self, name: &str) {
        let issued = self.pki_dir.join("issued");
        let private = self.pki_dir.join("private");
        let reqs = self.pki_dir.join("reqs");
        for dir in [&issued, &private, &reqs] {
            tokio::fs::create_dir_all(dir).await.expect("create pki subdir");
        }
        tokio::fs::write(issued.join(format!("{}.crt", name)), format!("CERT {}", name))
            .await
            .expect("write cert");
        tokio::fs::write(private.join(format!("{}.key", name)), format!("KEY {}", name))
            .await
            .expect("write key");
        tokio::fs::write(reqs.join(format!("{}.req", name)), format!("REQ {}", name))
            .await
            .expect("write req");
    }
}

#[cfg(test)]
#[async_trait]
impl CertificateAuthority for MockCa {
    async fn issue(&self, name: &str) -> Result<String> {
        use std::sync::atomic::Ordering;
        if self.fail_issue.load(Ordering::SeqCst) {
            if self.partial_on_failure.load(Ordering::SeqCst) {
                let private = self.pki_dir.join("private");
                tokio::fs::create_dir_all(&private).await.expect("create pki subdir");
                tokio::fs::write(private.join(format!("{}.key", name)), "ORPHAN KEY")
                    .await
                    .expect("write orphan key");
            }
            return Err(OvpnError::ca(
                format!("build-client-full {}", name),
                "Easy-RSA error: issue failed",
            ));
        }
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        self.write_artifacts(name).await;
        Ok(format!("Certificate created at: issued/{}.crt", name))
    }

    async fn issue_with_password(&self, name: &str, password: &str) -> Result<String> {
        self.passwords_seen
            .lock()
            .expect("passwords lock")
            .push(password.to_string());
        self.issue(name).await
    }

    async fn revoke(&self, name: &str) -> Result<String> {
        use std::sync::atomic::Ordering;
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(OvpnError::ca(
                format!("revoke {}", name),
                "Easy-RSA error: unable to revoke",
            ));
        }
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        self.revoked_names
            .lock()
            .expect("revoked lock")
            .push(name.to_string());
        Ok("Revocation was successful.".to_string())
    }

    async fn gen_crl(&self) -> Result<String> {
        use std::sync::atomic::Ordering;
        let remaining = self.fail_crl_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_crl_times.store(remaining - 1, Ordering::SeqCst);
            return Err(OvpnError::ca("gen-crl", "Easy-RSA error: CRL generation failed"));
        }
        self.crl_calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(&self.pki_dir).await.expect("create pki dir");
        tokio::fs::write(self.pki_dir.join("crl.pem"), "CRL")
            .await
            .expect("write crl");
        Ok("An updated CRL has been created.".to_string())
    }
}
