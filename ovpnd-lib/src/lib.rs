//! ovpnd - Shared Library
//!
//! Core logic for the OpenVPN client-identity service: configuration,
//! the PKI artifact store, the Easy-RSA gateway, lifecycle orchestration,
//! and connection-profile assembly. The `ovpnd-server` daemon wires these
//! into an HTTP API.

pub mod config;
pub mod easyrsa;
pub mod error;
pub mod lifecycle;
pub mod profile;
pub mod store;

pub use config::Config;
pub use easyrsa::{last_line, CertificateAuthority, EasyRsa};
pub use error::{OvpnError, Result};
pub use lifecycle::{ClientManager, CreateOptions, CreateOutcome, NameLocks, RevokeOutcome};
pub use profile::{ProfileAssembler, RemoteOverrides};
pub use store::{normalize_name, ClientPaths, ClientStatus, PkiStore};
