//! Realm over an in-memory user table, filled from configuration, code, or a JSON file
//! read at start.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Realm, RealmBase};
use crate::config::{MemoryRealmConfig, MemoryUserEntry};
use crate::error::{RealmError, RealmResult};
use crate::principal::GenericPrincipal;

#[derive(Debug, Clone)]
struct MemoryUser {
    password: String,
    roles: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UsersDocument {
    #[serde(default)]
    users: Vec<MemoryUserEntry>,
}

pub struct MemoryRealm {
    base: RealmBase,
    pathname: Option<String>,
    users: RwLock<BTreeMap<String, MemoryUser>>,
}

impl MemoryRealm {
    pub fn new(cfg: MemoryRealmConfig) -> RealmResult<Self> {
        let base = RealmBase::new(&cfg.common)?;
        let realm = Self { base, pathname: cfg.pathname, users: RwLock::new(BTreeMap::new()) };
        for u in cfg.users {
            realm.add_user(&u.username, &u.password, &u.roles);
        }
        Ok(realm)
    }

    /// Insert or replace a user. `password` is stored as given (digested or plain).
    pub fn add_user<S: AsRef<str>>(&self, username: &str, password: &str, roles: &[S]) {
        let roles = roles.iter().map(|r| r.as_ref().to_string()).collect();
        self.users.write().insert(username.to_string(), MemoryUser { password: password.to_string(), roles });
    }

    pub fn remove_user(&self, username: &str) -> bool { self.users.write().remove(username).is_some() }

    pub fn len(&self) -> usize { self.users.read().len() }

    pub fn is_empty(&self) -> bool { self.users.read().is_empty() }

    fn load(&self, path: &str) -> RealmResult<usize> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RealmError::config(format!("cannot read memory realm file '{}': {}", path, e)))?;
        let doc: UsersDocument = serde_json::from_str(&text)?;
        let n = doc.users.len();
        for u in doc.users {
            self.add_user(&u.username, &u.password, &u.roles);
        }
        Ok(n)
    }
}

impl Realm for MemoryRealm {
    fn base(&self) -> &RealmBase { &self.base }

    fn name(&self) -> &'static str { "MemoryRealm" }

    fn get_password_internal(&self, username: &str) -> Option<String> {
        let pw = self.users.read().get(username).map(|u| u.password.clone());
        if pw.is_none() {
            debug!(target: "realmgate::memory", username, "unknown user");
        }
        pw
    }

    fn get_principal_internal(&self, username: &str) -> Option<GenericPrincipal> {
        let users = self.users.read();
        let u = users.get(username)?;
        Some(GenericPrincipal::new(self.base.id(), username, Some(u.password.clone()), u.roles.iter().cloned()))
    }

    fn start_internal(&self) -> RealmResult<()> {
        if let Some(path) = &self.pathname {
            let n = self.load(path)?;
            info!(target: "realmgate::memory", path = %path, users = n, "loaded users");
        }
        Ok(())
    }
}
