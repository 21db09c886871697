//! Realm over a pooled data source resolved by name from the naming context.
//! A connection is acquired per call and closed rather than returned when a
//! statement fails.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::{Realm, RealmBase};
use crate::backend::sql::{validate_identifier, DataSource, SqlConnection, SqlStatements};
use crate::config::DataSourceRealmConfig;
use crate::error::{RealmError, RealmResult, SqlError};
use crate::naming::NamingContext;
use crate::principal::GenericPrincipal;

pub struct DataSourceRealm {
    base: RealmBase,
    data_source_name: String,
    statements: SqlStatements,
    naming: Arc<NamingContext>,
}

impl DataSourceRealm {
    pub fn new(cfg: DataSourceRealmConfig, naming: Arc<NamingContext>) -> RealmResult<Self> {
        let base = RealmBase::new(&cfg.common)?;
        if cfg.data_source_name.is_empty() {
            return Err(RealmError::config("data_source_name is required"));
        }
        validate_identifier("user_table", &cfg.user_table).map_err(RealmError::Config)?;
        validate_identifier("user_name_col", &cfg.user_name_col).map_err(RealmError::Config)?;
        validate_identifier("user_cred_col", &cfg.user_cred_col).map_err(RealmError::Config)?;
        validate_identifier("user_role_table", &cfg.user_role_table).map_err(RealmError::Config)?;
        validate_identifier("role_name_col", &cfg.role_name_col).map_err(RealmError::Config)?;
        let statements = SqlStatements::build(&cfg.user_table, &cfg.user_name_col, &cfg.user_cred_col, &cfg.user_role_table, &cfg.role_name_col);
        Ok(Self { base, data_source_name: cfg.data_source_name, statements, naming })
    }

    fn data_source(&self) -> Option<Arc<dyn DataSource>> {
        let ds = self.naming.lookup_data_source(&self.data_source_name);
        if ds.is_none() {
            error!(target: "realmgate::datasource", name = %self.data_source_name, "data source not bound in naming context");
        }
        ds
    }

    /// One checkout: acquisition failure and statement failure both yield `None`.
    fn with_connection<T>(&self, what: &str, op: impl FnOnce(&mut dyn SqlConnection) -> Result<T, SqlError>) -> Option<T> {
        let ds = self.data_source()?;
        let mut conn = match ds.get_connection() {
            Ok(c) => c,
            Err(e) => {
                error!(target: "realmgate::datasource", name = %self.data_source_name, "cannot acquire connection: {}", e);
                return None;
            }
        };
        let res = op(&mut *conn);
        conn.close();
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                error!(target: "realmgate::datasource", "{} failed: {}", what, e);
                None
            }
        }
    }
}

impl Realm for DataSourceRealm {
    fn base(&self) -> &RealmBase { &self.base }

    fn name(&self) -> &'static str { "DataSourceRealm" }

    fn get_password_internal(&self, username: &str) -> Option<String> {
        self.with_connection("credential lookup", |c| self.statements.fetch_credential(c, username)).flatten()
    }

    fn get_principal_internal(&self, username: &str) -> Option<GenericPrincipal> {
        let roles = self.with_connection("role lookup", |c| self.statements.fetch_roles(c, username))?;
        Some(GenericPrincipal::new(self.base.id(), username, None, roles))
    }

    fn authenticate(&self, username: &str, credentials: &str) -> Option<GenericPrincipal> {
        if !self.base.ensure_started(self.name()) { return None; }
        let roles = self.with_connection("authentication", |c| {
            let Some(stored) = self.statements.fetch_credential(c, username)? else { return Ok(None) };
            if !self.base.compare_credentials(credentials, &stored) {
                return Ok(None);
            }
            self.statements.fetch_roles(c, username).map(Some)
        })??;
        debug!(target: "realmgate::datasource", username, roles = roles.len(), "authenticated");
        Some(GenericPrincipal::new(self.base.id(), username, Some(credentials.to_string()), roles))
    }

    fn start_internal(&self) -> RealmResult<()> {
        if self.naming.lookup_data_source(&self.data_source_name).is_none() {
            // the resource may be bound later; lookups happen per call
            info!(target: "realmgate::datasource", name = %self.data_source_name, "data source not yet bound");
        }
        Ok(())
    }
}
