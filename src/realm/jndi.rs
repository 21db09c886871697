//! Realm over an LDAP-style directory.
//!
//! Users are located either by DN pattern(s) or by a search that must match exactly one
//! entry. Credentials are checked by comparing a stored password attribute or, when no
//! such attribute is configured, by binding as the user and then restoring the service
//! identity. Roles come from an attribute on the user entry plus an optional (and
//! optionally nested) role search.
//!
//! The realm owns one directory context. Any failure closes it; a stale connection
//! error earns exactly one reopen-and-retry, and opening falls back to the alternate
//! URL when the primary server cannot be reached.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{Realm, RealmBase};
use crate::backend::directory::{
    escape_dn_value, escape_filter_value, format_template, parse_user_patterns, Attributes, DirContext, DirContextFactory,
    DirectoryEnvironment, SearchScope,
};
use crate::config::JndiRealmConfig;
use crate::digest::matches_ldap_scheme;
use crate::error::{DirectoryError, RealmError, RealmResult};
use crate::principal::GenericPrincipal;

const ATTEMPTS: usize = 2;

/// A user entry as found for one call.
#[derive(Debug, Clone)]
struct DirectoryUser {
    username: String,
    dn: String,
    password: Option<String>,
    roles: Vec<String>,
}

pub struct JndiRealm {
    base: RealmBase,
    factory: Arc<dyn DirContextFactory>,
    env: DirectoryEnvironment,
    alternate_url: Option<String>,
    user_patterns: Vec<String>,
    user_search: Option<String>,
    user_base: String,
    user_scope: SearchScope,
    user_password: Option<String>,
    user_role_name: Option<String>,
    role_search: Option<String>,
    role_base: String,
    role_name: Option<String>,
    role_scope: SearchScope,
    role_nested: bool,
    context: Mutex<Option<Box<dyn DirContext>>>,
}

impl JndiRealm {
    pub fn new(cfg: JndiRealmConfig, factory: Arc<dyn DirContextFactory>) -> RealmResult<Self> {
        let base = RealmBase::new(&cfg.common)?;
        if cfg.connection_url.is_empty() {
            return Err(RealmError::config("connection_url is required"));
        }
        let user_patterns = match &cfg.user_pattern {
            Some(p) => parse_user_patterns(p).map_err(RealmError::Config)?,
            None => Vec::new(),
        };
        if user_patterns.is_empty() && cfg.user_search.is_none() {
            return Err(RealmError::config("either user_pattern or user_search must be configured"));
        }
        let env = DirectoryEnvironment {
            provider_url: cfg.connection_url,
            connection_name: cfg.connection_name,
            connection_password: cfg.connection_password,
            authentication: cfg.authentication,
            protocol: cfg.protocol,
            referrals: cfg.referrals,
        };
        Ok(Self {
            base,
            factory,
            env,
            alternate_url: cfg.alternate_url.filter(|u| !u.is_empty()),
            user_patterns,
            user_search: cfg.user_search,
            user_base: cfg.user_base,
            user_scope: SearchScope::from_subtree(cfg.user_subtree),
            user_password: cfg.user_password,
            user_role_name: cfg.user_role_name,
            role_search: cfg.role_search,
            role_base: cfg.role_base,
            role_name: cfg.role_name,
            role_scope: SearchScope::from_subtree(cfg.role_subtree),
            role_nested: cfg.role_nested,
            context: Mutex::new(None),
        })
    }

    fn open(&self) -> Result<Box<dyn DirContext>, DirectoryError> {
        match self.factory.connect(&self.env) {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                let Some(alt) = &self.alternate_url else { return Err(e) };
                warn!(target: "realmgate::jndi", url = %self.env.provider_url, alternate = %alt, "primary directory unreachable, trying alternate: {}", e);
                let env = DirectoryEnvironment { provider_url: alt.clone(), ..self.env.clone() };
                self.factory.connect(&env)
            }
        }
    }

    fn close(slot: &mut Option<Box<dyn DirContext>>) {
        if let Some(mut ctx) = slot.take() {
            ctx.close();
        }
    }

    /// Run `op` against the realm's context, opening it on demand. Any error closes the
    /// context; a stale-connection error is retried once on a reopened one.
    fn with_context<T>(&self, what: &str, mut op: impl FnMut(&mut dyn DirContext) -> Result<T, DirectoryError>) -> Option<T> {
        let mut slot = self.context.lock();
        if !self.base.is_started() {
            // a context opened now would outlive stop()
            debug!(target: "realmgate::jndi", "{}: realm not started, directory untouched", what);
            return None;
        }
        for attempt in 1..=ATTEMPTS {
            if slot.is_none() {
                match self.open() {
                    Ok(ctx) => *slot = Some(ctx),
                    Err(e) => {
                        error!(target: "realmgate::jndi", "{}: cannot open directory context: {}", what, e);
                        return None;
                    }
                }
            }
            let ctx = slot.as_mut()?;
            match op(&mut **ctx) {
                Ok(v) => return Some(v),
                Err(e) => {
                    Self::close(&mut slot);
                    if e.is_stale_connection() && attempt < ATTEMPTS {
                        warn!(target: "realmgate::jndi", "{}: stale directory connection, reopening: {}", what, e);
                        continue;
                    }
                    error!(target: "realmgate::jndi", "{} failed: {}", what, e);
                    return None;
                }
            }
        }
        None
    }

    fn user_attr_ids(&self) -> Vec<&str> {
        self.user_password.iter().chain(self.user_role_name.iter()).map(String::as_str).collect()
    }

    fn user_from_attributes(&self, username: &str, dn: String, attrs: Option<&Attributes>) -> DirectoryUser {
        let password = self.user_password.as_deref().and_then(|id| attrs.and_then(|a| a.first(id))).map(str::to_string);
        let roles = match (self.user_role_name.as_deref(), attrs) {
            (Some(id), Some(a)) => a.get(id).map(<[String]>::to_vec).unwrap_or_default(),
            _ => Vec::new(),
        };
        DirectoryUser { username: username.to_string(), dn, password, roles }
    }

    fn user_by_pattern(&self, ctx: &mut dyn DirContext, username: &str, pattern: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        let dn = format_template(pattern, &[escape_dn_value(username).as_str()]);
        let attr_ids = self.user_attr_ids();
        if attr_ids.is_empty() {
            // nothing to fetch; a bind will tell whether the entry exists
            return Ok(Some(DirectoryUser { username: username.to_string(), dn, password: None, roles: Vec::new() }));
        }
        match ctx.get_attributes(&dn, &attr_ids) {
            Ok(attrs) => Ok(Some(self.user_from_attributes(username, dn, attrs.as_ref()))),
            Err(DirectoryError::NameNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn user_by_search(&self, ctx: &mut dyn DirContext, username: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        let Some(search) = &self.user_search else { return Ok(None) };
        let filter = format_template(search, &[escape_filter_value(username).as_str()]);
        let attr_ids = self.user_attr_ids();
        let mut results = ctx.search(&self.user_base, &filter, self.user_scope, &attr_ids)?;
        match results.len() {
            0 => Ok(None),
            1 => {
                let r = results.remove(0);
                Ok(Some(self.user_from_attributes(username, r.dn, Some(&r.attributes))))
            }
            n => {
                warn!(target: "realmgate::jndi", username, matches = n, "user search matched more than one entry");
                Ok(None)
            }
        }
    }

    /// First user the configured patterns (or the search) resolve.
    fn find_user(&self, ctx: &mut dyn DirContext, username: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        if self.user_patterns.is_empty() {
            return self.user_by_search(ctx, username);
        }
        for pattern in &self.user_patterns {
            if let Some(u) = self.user_by_pattern(ctx, username, pattern)? {
                return Ok(Some(u));
            }
        }
        Ok(None)
    }

    fn check_credentials(&self, ctx: &mut dyn DirContext, user: &DirectoryUser, credentials: &str) -> Result<bool, DirectoryError> {
        if self.user_password.is_some() {
            let Some(stored) = user.password.as_deref() else { return Ok(false) };
            return Ok(match matches_ldap_scheme(credentials, stored) {
                Some(ok) => ok,
                None => self.base.compare_credentials(credentials, stored),
            });
        }
        self.bind_as_user(ctx, user, credentials)
    }

    fn bind_as_user(&self, ctx: &mut dyn DirContext, user: &DirectoryUser, credentials: &str) -> Result<bool, DirectoryError> {
        let outcome = ctx.bind(Some(&user.dn), Some(credentials));
        let restored = ctx.bind(self.env.connection_name.as_deref(), self.env.connection_password.as_deref());
        let verified = match outcome {
            Ok(()) => true,
            Err(DirectoryError::Authentication(_)) | Err(DirectoryError::NameNotFound(_)) => false,
            Err(e) => return Err(e),
        };
        restored?;
        Ok(verified)
    }

    fn roles(&self, ctx: &mut dyn DirContext, user: &DirectoryUser) -> Result<Vec<String>, DirectoryError> {
        let mut roles = user.roles.clone();
        let (Some(search), Some(role_name)) = (&self.role_search, &self.role_name) else { return Ok(roles) };
        let attr_ids = [role_name.as_str()];
        let mut seen = BTreeSet::new();
        let mut frontier = vec![(user.dn.clone(), user.username.clone())];
        let mut first = true;
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for (dn, name) in frontier {
                let filter = format_template(search, &[escape_filter_value(&dn).as_str(), escape_filter_value(&name).as_str()]);
                for r in ctx.search(&self.role_base, &filter, self.role_scope, &attr_ids)? {
                    if !seen.insert(r.dn.clone()) {
                        continue;
                    }
                    let values = r.attributes.get(role_name).unwrap_or(&[]);
                    roles.extend(values.iter().cloned());
                    next.push((r.dn, values.first().cloned().unwrap_or_default()));
                }
            }
            if first && !self.role_nested {
                break;
            }
            first = false;
            frontier = next;
        }
        Ok(roles)
    }

    fn authenticate_once(&self, ctx: &mut dyn DirContext, username: &str, credentials: &str) -> Result<Option<GenericPrincipal>, DirectoryError> {
        let candidates: Vec<Option<&str>> =
            if self.user_patterns.is_empty() { vec![None] } else { self.user_patterns.iter().map(|p| Some(p.as_str())).collect() };
        for pattern in candidates {
            let user = match pattern {
                Some(p) => self.user_by_pattern(ctx, username, p)?,
                None => self.user_by_search(ctx, username)?,
            };
            let Some(user) = user else { continue };
            if !self.check_credentials(ctx, &user, credentials)? {
                debug!(target: "realmgate::jndi", username, dn = %user.dn, "credentials rejected");
                continue;
            }
            let roles = self.roles(ctx, &user)?;
            debug!(target: "realmgate::jndi", username, dn = %user.dn, roles = roles.len(), "authenticated");
            return Ok(Some(GenericPrincipal::new(self.base.id(), username, Some(credentials.to_string()), roles)));
        }
        Ok(None)
    }
}

impl Realm for JndiRealm {
    fn base(&self) -> &RealmBase { &self.base }

    fn name(&self) -> &'static str { "JNDIRealm" }

    fn get_password_internal(&self, username: &str) -> Option<String> {
        self.user_password.as_ref()?;
        self.with_context("password lookup", |ctx| self.find_user(ctx, username)).flatten()?.password
    }

    fn get_principal_internal(&self, username: &str) -> Option<GenericPrincipal> {
        let roles = self
            .with_context("principal lookup", |ctx| match self.find_user(ctx, username)? {
                Some(user) => self.roles(ctx, &user).map(Some),
                None => Ok(None),
            })
            .flatten()?;
        Some(GenericPrincipal::new(self.base.id(), username, None, roles))
    }

    fn authenticate(&self, username: &str, credentials: &str) -> Option<GenericPrincipal> {
        if !self.base.ensure_started(self.name()) { return None; }
        if username.is_empty() || credentials.is_empty() {
            return None;
        }
        self.with_context("authentication", |ctx| self.authenticate_once(ctx, username, credentials)).flatten()
    }

    fn start_internal(&self) -> RealmResult<()> {
        let mut slot = self.context.lock();
        match self.open() {
            Ok(ctx) => {
                *slot = Some(ctx);
                info!(target: "realmgate::jndi", url = %self.env.provider_url, "directory context opened");
            }
            // reopened lazily on the first authentication
            Err(e) => error!(target: "realmgate::jndi", url = %self.env.provider_url, "cannot open directory context: {}", e),
        }
        Ok(())
    }

    fn stop_internal(&self) {
        Self::close(&mut self.context.lock());
    }
}
