//! Login module backed by a fixed user table, for exercising login chains.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::backend::login::{Callback, CallbackHandler, LoginModule, LoginOutcome, ModuleOptions, SecurityPrincipal};
use crate::error::LoginError;

#[derive(Debug, Clone)]
struct StaticUser {
    password: String,
    principals: Vec<SecurityPrincipal>,
    expired: bool,
}

/// Asks for name and password through the callback handler and checks them against
/// its table. Option `ignore_unknown=true` makes unknown users neutral instead of a
/// failed login.
#[derive(Default)]
pub struct StaticLoginModule {
    users: RwLock<BTreeMap<String, StaticUser>>,
    attempts: AtomicUsize,
}

impl StaticLoginModule {
    pub fn new() -> Self { Self::default() }

    pub fn with_user(self, username: &str, password: &str, principals: Vec<SecurityPrincipal>) -> Self {
        self.users.write().insert(username.to_string(), StaticUser { password: password.to_string(), principals, expired: false });
        self
    }

    /// Number of `login` calls so far.
    pub fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }

    pub fn expire(&self, username: &str) {
        if let Some(u) = self.users.write().get_mut(username) {
            u.expired = true;
        }
    }
}

impl LoginModule for StaticLoginModule {
    fn login(&self, handler: &dyn CallbackHandler, options: &ModuleOptions) -> Result<LoginOutcome, LoginError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = [
            Callback::Name { prompt: "username".into(), value: None },
            Callback::Password { prompt: "password".into(), value: None },
        ];
        handler.handle(&mut callbacks)?;
        let (Callback::Name { value: Some(name), .. }, Callback::Password { value: Some(password), .. }) = (&callbacks[0], &callbacks[1]) else {
            return Err(LoginError::UnsupportedCallback("name and password callbacks were not answered".into()));
        };
        let users = self.users.read();
        let Some(user) = users.get(name) else {
            if options.get("ignore_unknown").is_some_and(|v| v == "true") {
                return Ok(LoginOutcome::Ignored);
            }
            return Err(LoginError::FailedLogin(format!("unknown user {}", name)));
        };
        if user.expired {
            return Err(LoginError::AccountExpired(name.clone()));
        }
        if &user.password != password {
            return Err(LoginError::FailedLogin("invalid password".into()));
        }
        Ok(LoginOutcome::Authenticated(user.principals.clone()))
    }
}
