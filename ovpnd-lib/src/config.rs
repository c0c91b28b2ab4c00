//! Service configuration
//!
//! Runtime settings loaded from environment variables with defaults that
//! match a stock Easy-RSA install under /etc/openvpn. Profile-facing
//! values (remote host/port/proto) are the base that per-request
//! overrides merge onto; the loaded `Config` itself is never mutated
//! after startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OvpnError, Result};

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// OpenVPN config directory; the PKI root lives at `{ovpn_dir}/pki`
    pub ovpn_dir: PathBuf,
    /// Path to the easyrsa binary
    pub easyrsa_bin: PathBuf,
    /// Static bearer token for the API; `None` disables the check
    pub api_token: Option<String>,
    /// Remote host written into profiles
    pub remote_host: String,
    /// Remote port written into profiles
    pub remote_port: u16,
    /// Remote protocol written into profiles (tcp, udp, ...)
    pub remote_proto: String,
    /// Emit a tls-auth block when `{ovpn_dir}/ta.key` exists
    pub tls_auth: bool,
    /// Emit a tls-crypt block when `{ovpn_dir}/tc.key` exists (preferred over tls-auth)
    pub tls_crypt: bool,
    /// Extra profile directives, one per line
    pub extra_client_opts: String,
    /// Upper bound on a single easyrsa invocation
    pub ca_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ovpn_dir: PathBuf::from("/etc/openvpn"),
            easyrsa_bin: PathBuf::from("/usr/share/easy-rsa/easyrsa"),
            api_token: None,
            remote_host: "example.com".to_string(),
            remote_port: 443,
            remote_proto: "tcp".to_string(),
            tls_auth: true,
            tls_crypt: false,
            extra_client_opts: String::new(),
            ca_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from process environment variables
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    ///
    /// Unset variables fall back to defaults; values that fail to parse
    /// are configuration errors naming the variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup("OVPN_DIR") {
            config.ovpn_dir = PathBuf::from(dir);
        }
        if let Some(bin) = lookup("EASYRSA_BIN") {
            config.easyrsa_bin = PathBuf::from(bin);
        }
        // An empty token would make every request fail the comparison,
        // so treat it the same as unset.
        config.api_token = lookup("API_TOKEN").filter(|token| !token.is_empty());

        if let Some(host) = lookup("OVPN_REMOTE_HOST") {
            config.remote_host = host;
        }
        if let Some(port) = lookup("OVPN_REMOTE_PORT") {
            config.remote_port = port.parse().map_err(|_| {
                OvpnError::config(format!("OVPN_REMOTE_PORT is not a valid port: {}", port))
            })?;
        }
        if let Some(proto) = lookup("OVPN_REMOTE_PROTO") {
            config.remote_proto = proto;
        }
        if let Some(value) = lookup("OVPN_TLS_AUTH") {
            config.tls_auth = parse_bool(&value);
        }
        if let Some(value) = lookup("OVPN_TLS_CRYPT") {
            config.tls_crypt = parse_bool(&value);
        }
        if let Some(opts) = lookup("OVPN_EXTRA_CLIENT_OPTS") {
            config.extra_client_opts = opts;
        }
        if let Some(secs) = lookup("OVPN_CA_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                OvpnError::config(format!(
                    "OVPN_CA_TIMEOUT_SECS is not a valid number of seconds: {}",
                    secs
                ))
            })?;
            config.ca_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// PKI root directory (`{ovpn_dir}/pki`)
    pub fn pki_dir(&self) -> PathBuf {
        self.ovpn_dir.join("pki")
    }

    /// Shared tls-auth key path (`{ovpn_dir}/ta.key`)
    pub fn tls_auth_key(&self) -> PathBuf {
        self.ovpn_dir.join("ta.key")
    }

    /// Shared tls-crypt key path (`{ovpn_dir}/tc.key`)
    pub fn tls_crypt_key(&self) -> PathBuf {
        self.ovpn_dir.join("tc.key")
    }

    /// Set the OpenVPN directory
    pub fn with_ovpn_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ovpn_dir = dir.into();
        self
    }

    /// Set the easyrsa binary path
    pub fn with_easyrsa_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.easyrsa_bin = bin.into();
        self
    }

    /// Set the API bearer token
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set the profile remote host
    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = host.into();
        self
    }

    /// Set the profile remote port
    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    /// Set the profile remote protocol
    pub fn with_remote_proto(mut self, proto: impl Into<String>) -> Self {
        self.remote_proto = proto.into();
        self
    }

    /// Enable or disable the tls-auth block
    pub fn with_tls_auth(mut self, enabled: bool) -> Self {
        self.tls_auth = enabled;
        self
    }

    /// Enable or disable the tls-crypt block
    pub fn with_tls_crypt(mut self, enabled: bool) -> Self {
        self.tls_crypt = enabled;
        self
    }

    /// Set extra profile directives (one per line)
    pub fn with_extra_client_opts(mut self, opts: impl Into<String>) -> Self {
        self.extra_client_opts = opts.into();
        self
    }

    /// Set the easyrsa invocation timeout
    pub fn with_ca_timeout(mut self, timeout: Duration) -> Self {
        self.ca_timeout = timeout;
        self
    }
}

/// Parse the truthy set accepted for boolean variables
fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
