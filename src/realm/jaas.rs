//! Realm that delegates verification to a configured login-module chain and maps
//! the resulting subject onto a principal by principal type name.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{Realm, RealmBase};
use crate::backend::login::{Callback, CallbackHandler, LoginConfiguration, LoginContext, Subject};
use crate::config::JaasRealmConfig;
use crate::digest::DigestAlgorithm;
use crate::error::{LoginError, RealmError, RealmResult};
use crate::principal::GenericPrincipal;

/// Answers name and password callbacks with fixed values; never prompts.
pub struct FixedCallbackHandler {
    username: String,
    password: String,
}

impl FixedCallbackHandler {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl CallbackHandler for FixedCallbackHandler {
    fn handle(&self, callbacks: &mut [Callback]) -> Result<(), LoginError> {
        for cb in callbacks.iter_mut() {
            match cb {
                Callback::Name { value, .. } => *value = Some(self.username.clone()),
                Callback::Password { value, .. } => *value = Some(self.password.clone()),
                Callback::TextOutput(msg) => debug!(target: "realmgate::jaas", "login module says: {}", msg),
            }
        }
        Ok(())
    }
}

pub struct JaasRealm {
    base: RealmBase,
    app_name: String,
    user_classes: Vec<String>,
    role_classes: Vec<String>,
    login: Arc<LoginConfiguration>,
}

impl JaasRealm {
    pub fn new(cfg: JaasRealmConfig, login: Arc<LoginConfiguration>) -> RealmResult<Self> {
        let base = RealmBase::new(&cfg.common)?;
        Ok(Self { base, app_name: cfg.app_name, user_classes: cfg.user_class_names, role_classes: cfg.role_class_names, login })
    }

    pub fn app_name(&self) -> &str { &self.app_name }

    /// First user-class principal names the user; every role-class principal adds a role.
    fn principal_from_subject(&self, subject: &Subject, credentials: &str) -> Option<GenericPrincipal> {
        let user = subject.principals.iter().find(|p| self.user_classes.contains(&p.type_name));
        let Some(user) = user else {
            error!(target: "realmgate::jaas", app = %self.app_name, "no principal in the subject matches a configured user class");
            return None;
        };
        let roles = subject
            .principals
            .iter()
            .filter(|p| self.role_classes.contains(&p.type_name))
            .map(|p| p.name.clone());
        Some(GenericPrincipal::new(self.base.id(), user.name.clone(), Some(credentials.to_string()), roles))
    }
}

impl Realm for JaasRealm {
    fn base(&self) -> &RealmBase { &self.base }

    fn name(&self) -> &'static str { "JAASRealm" }

    /// Credentials live inside the login modules.
    fn get_password_internal(&self, _username: &str) -> Option<String> { None }

    fn get_principal_internal(&self, _username: &str) -> Option<GenericPrincipal> { None }

    fn authenticate(&self, username: &str, credentials: &str) -> Option<GenericPrincipal> {
        if !self.base.ensure_started(self.name()) { return None; }
        if self.base.credential_digest().algorithm() == Some(DigestAlgorithm::Argon2) {
            // salted per call, so never reproducible
            warn!(target: "realmgate::jaas", app = %self.app_name, "login modules cannot verify salted ARGON2 credentials");
            return None;
        }
        let answer = match self.base.digest(credentials) {
            Ok(d) => d,
            Err(e) => {
                error!(target: "realmgate::jaas", "cannot digest credentials: {}", e);
                return None;
            }
        };
        let handler = FixedCallbackHandler::new(username, answer);
        let ctx = match LoginContext::new(&self.app_name, &self.login, &handler) {
            Ok(c) => c,
            Err(e) => {
                error!(target: "realmgate::jaas", app = %self.app_name, "{}", e);
                return None;
            }
        };
        let subject = match ctx.login() {
            Ok(s) => s,
            Err(e) => {
                match &e {
                    LoginError::AccountExpired(_) | LoginError::CredentialExpired(_) => {
                        warn!(target: "realmgate::jaas", username, "{}", e)
                    }
                    LoginError::FailedLogin(_) => debug!(target: "realmgate::jaas", username, "{}", e),
                    LoginError::Config(_) | LoginError::UnsupportedCallback(_) => {
                        error!(target: "realmgate::jaas", app = %self.app_name, "{}", e)
                    }
                }
                return None;
            }
        };
        let principal = self.principal_from_subject(&subject, credentials)?;
        debug!(target: "realmgate::jaas", username, principal = principal.name(), roles = principal.roles().len(), "authenticated");
        Some(principal)
    }

    fn start_internal(&self) -> RealmResult<()> {
        if self.user_classes.is_empty() {
            return Err(RealmError::config("user_class_names must name at least one principal type"));
        }
        if self.role_classes.is_empty() {
            return Err(RealmError::config("role_class_names must name at least one principal type"));
        }
        if !self.login.contains(&self.app_name) {
            return Err(RealmError::config(format!("no login configuration for application '{}'", self.app_name)));
        }
        Ok(())
    }
}
