//! Realm over a hierarchical user database bound in the naming context.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{Realm, RealmBase};
use crate::backend::user_database::UserDatabase;
use crate::config::UserDatabaseRealmConfig;
use crate::error::{RealmError, RealmResult};
use crate::naming::NamingContext;
use crate::principal::GenericPrincipal;

pub struct UserDatabaseRealm {
    base: RealmBase,
    resource_name: String,
    naming: Arc<NamingContext>,
    database: RwLock<Option<Arc<dyn UserDatabase>>>,
}

impl UserDatabaseRealm {
    pub fn new(cfg: UserDatabaseRealmConfig, naming: Arc<NamingContext>) -> RealmResult<Self> {
        let base = RealmBase::new(&cfg.common)?;
        Ok(Self { base, resource_name: cfg.resource_name, naming, database: RwLock::new(None) })
    }

    fn database(&self) -> Option<Arc<dyn UserDatabase>> { self.database.read().clone() }
}

impl Realm for UserDatabaseRealm {
    fn base(&self) -> &RealmBase { &self.base }

    fn name(&self) -> &'static str { "UserDatabaseRealm" }

    fn get_password_internal(&self, username: &str) -> Option<String> {
        let user = self.database()?.find_user(username);
        if user.is_none() {
            debug!(target: "realmgate::user_database", username, "unknown user");
        }
        user.map(|u| u.password)
    }

    /// Direct roles plus the roles of every group, without duplicates.
    fn get_principal_internal(&self, username: &str) -> Option<GenericPrincipal> {
        let db = self.database()?;
        let user = db.find_user(username)?;
        let mut roles: BTreeSet<String> = user.roles.iter().cloned().collect();
        for g in &user.groups {
            match db.find_group(g) {
                Some(group) => roles.extend(group.roles),
                None => warn!(target: "realmgate::user_database", username, group = %g, "user refers to a missing group"),
            }
        }
        Some(GenericPrincipal::new(self.base.id(), username, Some(user.password), roles))
    }

    fn start_internal(&self) -> RealmResult<()> {
        let db = self
            .naming
            .lookup_user_database(&self.resource_name)
            .ok_or_else(|| RealmError::config(format!("no user database bound as '{}'", self.resource_name)))?;
        info!(target: "realmgate::user_database", resource = %self.resource_name, database = db.id(), "user database resolved");
        *self.database.write() = Some(db);
        Ok(())
    }

    fn stop_internal(&self) { *self.database.write() = None; }
}
