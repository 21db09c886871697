//! Realm configuration surface and realm construction.
//!
//! Every strategy has a serde config struct whose `Default` mirrors the usual
//! defaults; the options every realm shares are flattened in from
//! `RealmCommonConfig`. `RealmConfig` tags the strategy with `"type"` so a whole
//! realm can be described in one JSON document. Collaborators that cannot be
//! expressed as data (drivers, directory factories, login modules, named resources)
//! come from a `RealmEnvironment` and are resolved once, in `build_realm`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::directory::DirContextFactory;
use crate::backend::login::LoginConfiguration;
use crate::backend::sql::SqlDriver;
use crate::error::{RealmError, RealmResult};
use crate::naming::NamingContext;
use crate::realm::{DataSourceRealm, JaasRealm, JdbcRealm, JndiRealm, MemoryRealm, Realm, UserDatabaseRealm};

/// How a client certificate subject becomes a username.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum X509UsernameConfig {
    #[default]
    SubjectDn,
    CommonName,
    Pattern { regex: String },
}

/// Options shared by all realm strategies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RealmCommonConfig {
    /// Digest algorithm name (`MD5`, `SHA-256`, `ARGON2`, ...); unset means plain text.
    pub digest: Option<String>,
    /// `utf-8` (default) or `iso-8859-1`.
    pub digest_encoding: Option<String>,
    /// Check certificate validity windows during certificate authentication.
    pub validate: bool,
    pub x509_username: X509UsernameConfig,
}

impl Default for RealmCommonConfig {
    fn default() -> Self {
        Self { digest: None, digest_encoding: None, validate: true, x509_username: X509UsernameConfig::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryUserEntry {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryRealmConfig {
    #[serde(flatten)]
    pub common: RealmCommonConfig,
    /// JSON file `{ "users": [...] }` read at start, merged over `users`.
    pub pathname: Option<String>,
    pub users: Vec<MemoryUserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JdbcRealmConfig {
    #[serde(flatten)]
    pub common: RealmCommonConfig,
    /// Registry key of the SQL driver in `RealmEnvironment`.
    pub driver_name: String,
    pub connection_url: String,
    pub connection_name: Option<String>,
    pub connection_password: Option<String>,
    pub connection_props: BTreeMap<String, String>,
    pub user_table: String,
    pub user_name_col: String,
    pub user_cred_col: String,
    pub user_role_table: String,
    pub role_name_col: String,
    /// 1 reproduces the single shared, serialised connection.
    pub max_connections: usize,
}

impl Default for JdbcRealmConfig {
    fn default() -> Self {
        Self {
            common: RealmCommonConfig::default(),
            driver_name: String::new(),
            connection_url: String::new(),
            connection_name: None,
            connection_password: None,
            connection_props: BTreeMap::new(),
            user_table: String::new(),
            user_name_col: String::new(),
            user_cred_col: String::new(),
            user_role_table: String::new(),
            role_name_col: String::new(),
            max_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DataSourceRealmConfig {
    #[serde(flatten)]
    pub common: RealmCommonConfig,
    /// Name the data source is bound under in the naming context.
    pub data_source_name: String,
    pub user_table: String,
    pub user_name_col: String,
    pub user_cred_col: String,
    pub user_role_table: String,
    pub role_name_col: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JndiRealmConfig {
    #[serde(flatten)]
    pub common: RealmCommonConfig,
    /// Registry key of the directory context factory.
    pub context_factory: String,
    pub connection_url: String,
    pub alternate_url: Option<String>,
    pub connection_name: Option<String>,
    pub connection_password: Option<String>,
    pub authentication: Option<String>,
    pub protocol: Option<String>,
    pub referrals: Option<String>,
    /// DN template(s) with `{0}` for the username; `(a)(b)` lists alternatives.
    pub user_pattern: Option<String>,
    /// Search filter with `{0}` for the username, used when no pattern is set.
    pub user_search: Option<String>,
    pub user_base: String,
    pub user_subtree: bool,
    /// Attribute holding the stored password; unset selects bind-as-user verification.
    pub user_password: Option<String>,
    /// Attribute on the user entry listing role names.
    pub user_role_name: Option<String>,
    /// Role filter: `{0}` user DN, `{1}` username.
    pub role_search: Option<String>,
    pub role_base: String,
    pub role_name: Option<String>,
    pub role_subtree: bool,
    pub role_nested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JaasRealmConfig {
    #[serde(flatten)]
    pub common: RealmCommonConfig,
    pub app_name: String,
    pub user_class_names: Vec<String>,
    pub role_class_names: Vec<String>,
}

impl Default for JaasRealmConfig {
    fn default() -> Self {
        Self {
            common: RealmCommonConfig::default(),
            app_name: "Realmgate".to_string(),
            user_class_names: Vec::new(),
            role_class_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserDatabaseRealmConfig {
    #[serde(flatten)]
    pub common: RealmCommonConfig,
    pub resource_name: String,
}

impl Default for UserDatabaseRealmConfig {
    fn default() -> Self { Self { common: RealmCommonConfig::default(), resource_name: "UserDatabase".to_string() } }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealmConfig {
    Memory(MemoryRealmConfig),
    Jdbc(JdbcRealmConfig),
    #[serde(rename = "datasource")]
    DataSource(DataSourceRealmConfig),
    Jndi(JndiRealmConfig),
    Jaas(JaasRealmConfig),
    UserDatabase(UserDatabaseRealmConfig),
}

impl RealmConfig {
    pub fn from_json_str(text: &str) -> RealmResult<Self> { Ok(serde_json::from_str(text)?) }

    pub fn from_json_file(path: impl AsRef<Path>) -> RealmResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn common(&self) -> &RealmCommonConfig {
        match self {
            RealmConfig::Memory(c) => &c.common,
            RealmConfig::Jdbc(c) => &c.common,
            RealmConfig::DataSource(c) => &c.common,
            RealmConfig::Jndi(c) => &c.common,
            RealmConfig::Jaas(c) => &c.common,
            RealmConfig::UserDatabase(c) => &c.common,
        }
    }
}

/// Non-data collaborators a realm may need, registered by name.
#[derive(Clone, Default)]
pub struct RealmEnvironment {
    pub naming: Arc<NamingContext>,
    pub sql_drivers: BTreeMap<String, Arc<dyn SqlDriver>>,
    pub directory_factories: BTreeMap<String, Arc<dyn DirContextFactory>>,
    pub login: Arc<LoginConfiguration>,
}

impl RealmEnvironment {
    pub fn new(naming: Arc<NamingContext>) -> Self { Self { naming, ..Default::default() } }

    pub fn with_sql_driver(mut self, name: &str, driver: Arc<dyn SqlDriver>) -> Self {
        self.sql_drivers.insert(name.to_string(), driver);
        self
    }

    pub fn with_directory_factory(mut self, name: &str, factory: Arc<dyn DirContextFactory>) -> Self {
        self.directory_factories.insert(name.to_string(), factory);
        self
    }

    pub fn with_login_configuration(mut self, login: LoginConfiguration) -> Self {
        self.login = Arc::new(login);
        self
    }
}

/// Build an unstarted realm. Missing driver or factory registrations are reported
/// here rather than on the first authentication.
pub fn build_realm(cfg: &RealmConfig, env: &RealmEnvironment) -> RealmResult<Arc<dyn Realm>> {
    let realm: Arc<dyn Realm> = match cfg {
        RealmConfig::Memory(c) => Arc::new(MemoryRealm::new(c.clone())?),
        RealmConfig::Jdbc(c) => {
            let driver = env
                .sql_drivers
                .get(&c.driver_name)
                .cloned()
                .ok_or_else(|| RealmError::config(format!("no SQL driver registered as '{}'", c.driver_name)))?;
            Arc::new(JdbcRealm::new(c.clone(), driver)?)
        }
        RealmConfig::DataSource(c) => Arc::new(DataSourceRealm::new(c.clone(), env.naming.clone())?),
        RealmConfig::Jndi(c) => {
            let factory = env
                .directory_factories
                .get(&c.context_factory)
                .cloned()
                .ok_or_else(|| RealmError::config(format!("no directory context factory registered as '{}'", c.context_factory)))?;
            Arc::new(JndiRealm::new(c.clone(), factory)?)
        }
        RealmConfig::Jaas(c) => Arc::new(JaasRealm::new(c.clone(), env.login.clone())?),
        RealmConfig::UserDatabase(c) => Arc::new(UserDatabaseRealm::new(c.clone(), env.naming.clone())?),
    };
    Ok(realm)
}
