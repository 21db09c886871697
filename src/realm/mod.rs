//! Realm strategies and the shared authentication skeleton.
//!
//! A realm resolves a username to a stored credential and a role list through its
//! backend. `RealmBase` carries everything the strategies share: identity, lifecycle,
//! the configured credential digest and certificate handling. The default methods on
//! `Realm` implement password, HTTP Digest and client-certificate authentication in
//! terms of the two backend hooks `get_password_internal` and `get_principal_internal`;
//! the public `get_password`/`get_principal` wrap them behind the started check. Strategies whose
//! store can verify credentials itself override `authenticate` instead.
//!
//! Authentication never fails loudly: backend trouble is logged and the caller sees
//! `None`, exactly as for a wrong password.

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::RealmCommonConfig;
use crate::digest::{http_digest_response, md5_hex, CredentialDigest, DigestAlgorithm};
use crate::error::RealmResult;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::principal::{GenericPrincipal, RealmId};

pub mod certificate;
pub mod datasource;
pub mod jaas;
pub mod jdbc;
pub mod jndi;
pub mod memory;
pub mod user_database;

pub use certificate::X509UsernameMapper;
pub use datasource::DataSourceRealm;
pub use jaas::JaasRealm;
pub use jdbc::JdbcRealm;
pub use jndi::JndiRealm;
pub use memory::MemoryRealm;
pub use user_database::UserDatabaseRealm;

/// Parameters of one RFC 2617 Digest authentication attempt.
#[derive(Debug, Clone, Copy)]
pub struct DigestRequest<'a> {
    pub username: &'a str,
    pub client_digest: &'a str,
    pub nonce: &'a str,
    pub nc: &'a str,
    pub cnonce: &'a str,
    pub qop: Option<&'a str>,
    pub realm_name: &'a str,
    /// MD5 of `method:uri` as computed by the caller.
    pub md5a2: &'a str,
}

/// State shared by every realm strategy.
#[derive(Debug)]
pub struct RealmBase {
    id: RealmId,
    lifecycle: Lifecycle,
    digest_name: Option<String>,
    digest_encoding: Option<String>,
    digest: RwLock<CredentialDigest>,
    validate: bool,
    x509_username: X509UsernameMapper,
}

impl RealmBase {
    pub fn new(common: &RealmCommonConfig) -> RealmResult<Self> {
        Ok(Self {
            id: RealmId::next(),
            lifecycle: Lifecycle::default(),
            digest_name: common.digest.clone(),
            digest_encoding: common.digest_encoding.clone(),
            digest: RwLock::new(CredentialDigest::plain()),
            validate: common.validate,
            x509_username: X509UsernameMapper::from_config(&common.x509_username)?,
        })
    }

    pub fn id(&self) -> RealmId { self.id }

    pub fn state(&self) -> LifecycleState { self.lifecycle.state() }

    pub fn validate(&self) -> bool { self.validate }

    /// Active digest; plain text until the realm has started.
    pub fn credential_digest(&self) -> CredentialDigest { *self.digest.read() }

    pub fn has_message_digest(&self) -> bool { self.credential_digest().is_active() }

    /// Digest a credential with the configured algorithm (identity in plain mode).
    pub fn digest(&self, credentials: &str) -> RealmResult<String> { self.credential_digest().digest(credentials) }

    /// Case-insensitive for hex digests, exact for plain text.
    pub fn compare_credentials(&self, supplied: &str, stored: &str) -> bool {
        self.credential_digest().matches(supplied, stored)
    }

    pub fn is_started(&self) -> bool { self.lifecycle.is_started() }

    /// Gate for every lookup: nothing is resolved against a backend unless started.
    pub fn ensure_started(&self, realm: &str) -> bool {
        let st = self.lifecycle.state();
        if st != LifecycleState::Started {
            warn!(target: "realmgate::realm", realm, state = %st, "lookup attempted on a realm that is not started");
            return false;
        }
        true
    }

    fn init_digest(&self) -> RealmResult<()> {
        let d = CredentialDigest::from_names(self.digest_name.as_deref(), self.digest_encoding.as_deref())?;
        *self.digest.write() = d;
        Ok(())
    }

    fn release_digest(&self) { *self.digest.write() = CredentialDigest::plain(); }
}

/// Capability set a container consumes: password, digest and certificate
/// authentication, role checks, and start/stop.
pub trait Realm: Send + Sync {
    fn base(&self) -> &RealmBase;

    /// Implementation label used in logs.
    fn name(&self) -> &'static str;

    /// Backend hook: stored credential for `username`, `None` when unknown or unavailable.
    /// Only reached through the started-gated entry points.
    fn get_password_internal(&self, username: &str) -> Option<String>;

    /// Backend hook: principal with roles for an already verified `username`.
    fn get_principal_internal(&self, username: &str) -> Option<GenericPrincipal>;

    fn get_password(&self, username: &str) -> Option<String> {
        if !self.base().ensure_started(self.name()) { return None; }
        self.get_password_internal(username)
    }

    fn get_principal(&self, username: &str) -> Option<GenericPrincipal> {
        if !self.base().ensure_started(self.name()) { return None; }
        self.get_principal_internal(username)
    }

    fn authenticate(&self, username: &str, credentials: &str) -> Option<GenericPrincipal> {
        if !self.base().ensure_started(self.name()) { return None; }
        let stored = self.get_password_internal(username)?;
        if !self.base().compare_credentials(credentials, &stored) {
            debug!(target: "realmgate::realm", realm = self.name(), username, "credentials rejected");
            return None;
        }
        self.get_principal_internal(username)
    }

    fn authenticate_digest(&self, req: &DigestRequest<'_>) -> Option<GenericPrincipal> {
        if !self.base().ensure_started(self.name()) { return None; }
        if self.base().credential_digest().algorithm() == Some(DigestAlgorithm::Argon2) {
            warn!(target: "realmgate::realm", realm = self.name(), "HTTP Digest is unavailable with salted ARGON2 credentials");
            return None;
        }
        let stored = self.get_password_internal(req.username)?;
        let ha1 = md5_hex(&format!("{}:{}:{}", req.username, req.realm_name, stored));
        let server_digest = http_digest_response(&ha1, req.nonce, req.nc, req.cnonce, req.qop, req.md5a2);
        if server_digest != req.client_digest {
            debug!(target: "realmgate::realm", realm = self.name(), username = req.username, "digest response mismatch");
            return None;
        }
        self.get_principal_internal(req.username)
    }

    /// DER-encoded chain, leaf first.
    fn authenticate_certificates(&self, chain: &[&[u8]]) -> Option<GenericPrincipal> {
        if !self.base().ensure_started(self.name()) { return None; }
        if chain.is_empty() { return None; }
        let certs = certificate::parse_chain(chain)?;
        if self.base().validate && !certificate::chain_valid_at(&certs, chrono::Utc::now().timestamp()) {
            return None;
        }
        let username = self.base().x509_username.username(&certs[0])?;
        debug!(target: "realmgate::realm", realm = self.name(), username = %username, "certificate subject resolved");
        self.get_principal_internal(&username)
    }

    /// In-memory check; only principals minted by this very realm qualify.
    fn has_role(&self, principal: &GenericPrincipal, role: &str) -> bool {
        if principal.realm() != self.base().id() {
            debug!(target: "realmgate::realm", realm = self.name(), principal = principal.name(), "principal from a different realm");
            return false;
        }
        principal.has_role(role)
    }

    /// Strategy-specific start work, run after the digest is ready.
    fn start_internal(&self) -> RealmResult<()> { Ok(()) }

    /// Strategy-specific stop work: close connections, drop handles.
    fn stop_internal(&self) {}

    fn start(&self) -> RealmResult<()> {
        let base = self.base();
        base.lifecycle.begin_start()?;
        let res = base.init_digest().and_then(|_| self.start_internal());
        base.lifecycle.finish_start(res.is_ok());
        match &res {
            Ok(()) => info!(target: "realmgate::realm", realm = self.name(), id = ?base.id, "realm started"),
            Err(e) => {
                base.release_digest();
                error!(target: "realmgate::realm", realm = self.name(), "realm failed to start: {}", e);
            }
        }
        res
    }

    fn stop(&self) -> RealmResult<()> {
        let base = self.base();
        base.lifecycle.begin_stop()?;
        self.stop_internal();
        base.release_digest();
        base.lifecycle.finish_stop();
        info!(target: "realmgate::realm", realm = self.name(), id = ?base.id, "realm stopped");
        Ok(())
    }
}
