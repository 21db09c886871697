//! Realm over a relational store reached through an `SqlDriver`.
//!
//! Connections come from a small bounded pool. With the default size of one the
//! realm behaves as a single shared connection serialised by a lock. A connection
//! that reported an error is closed and never returned to the pool, and every
//! lookup gets one retry on a freshly opened connection.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::{Realm, RealmBase};
use crate::backend::sql::{validate_identifier, ConnectionProps, SqlConnection, SqlDriver, SqlStatements};
use crate::config::JdbcRealmConfig;
use crate::error::{RealmError, RealmResult, SqlError};
use crate::principal::GenericPrincipal;

/// Initial try plus one reopen-and-retry.
const ATTEMPTS: usize = 2;

#[derive(Default)]
struct PoolState {
    idle: Vec<Box<dyn SqlConnection>>,
    open: usize,
    /// Off until the realm starts and again once it stops.
    accepting: bool,
}

struct ConnectionPool {
    driver: Arc<dyn SqlDriver>,
    url: String,
    props: ConnectionProps,
    max: usize,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl ConnectionPool {
    fn checkout(&self) -> Result<PooledConnection<'_>, SqlError> {
        let mut st = self.state.lock();
        loop {
            if !st.accepting {
                return Err(SqlError::Closed);
            }
            if let Some(conn) = st.idle.pop() {
                return Ok(PooledConnection { pool: self, conn: Some(conn), broken: false });
            }
            if st.open < self.max {
                st.open += 1;
                break;
            }
            self.released.wait(&mut st);
        }
        drop(st);
        match self.driver.connect(&self.url, &self.props) {
            Ok(conn) => {
                debug!(target: "realmgate::jdbc", url = %self.url, "opened connection");
                Ok(PooledConnection { pool: self, conn: Some(conn), broken: false })
            }
            Err(e) => {
                self.state.lock().open -= 1;
                self.released.notify_one();
                Err(e)
            }
        }
    }

    fn checkin(&self, mut conn: Box<dyn SqlConnection>, broken: bool) {
        let mut st = self.state.lock();
        if broken || !st.accepting {
            conn.close();
            st.open -= 1;
        } else {
            st.idle.push(conn);
        }
        drop(st);
        self.released.notify_one();
    }

    fn open_for_use(&self) { self.state.lock().accepting = true; }

    /// Stop handing out connections and close the idle ones. Checked-out connections
    /// are closed when they come back.
    fn shutdown(&self) -> usize {
        let mut st = self.state.lock();
        st.accepting = false;
        let idle = std::mem::take(&mut st.idle);
        st.open -= idle.len();
        drop(st);
        self.released.notify_all();
        let n = idle.len();
        for mut c in idle {
            c.close();
        }
        n
    }
}

struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Box<dyn SqlConnection>>,
    broken: bool,
}

impl PooledConnection<'_> {
    fn run<T>(&mut self, op: impl FnOnce(&mut dyn SqlConnection) -> Result<T, SqlError>) -> Result<T, SqlError> {
        let Some(conn) = self.conn.as_mut() else { return Err(SqlError::Closed) };
        let res = op(&mut **conn);
        if res.is_err() {
            self.broken = true;
        }
        res
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn, self.broken);
        }
    }
}

pub struct JdbcRealm {
    base: RealmBase,
    statements: SqlStatements,
    pool: ConnectionPool,
}

impl JdbcRealm {
    pub fn new(cfg: JdbcRealmConfig, driver: Arc<dyn SqlDriver>) -> RealmResult<Self> {
        let base = RealmBase::new(&cfg.common)?;
        for (kind, ident) in [
            ("user_table", &cfg.user_table),
            ("user_name_col", &cfg.user_name_col),
            ("user_cred_col", &cfg.user_cred_col),
            ("user_role_table", &cfg.user_role_table),
            ("role_name_col", &cfg.role_name_col),
        ] {
            validate_identifier(kind, ident).map_err(RealmError::Config)?;
        }
        if cfg.max_connections == 0 {
            return Err(RealmError::config("max_connections must be at least 1"));
        }
        let statements = SqlStatements::build(&cfg.user_table, &cfg.user_name_col, &cfg.user_cred_col, &cfg.user_role_table, &cfg.role_name_col);
        let props = ConnectionProps { user: cfg.connection_name, password: cfg.connection_password, extra: cfg.connection_props };
        let pool = ConnectionPool {
            driver,
            url: cfg.connection_url,
            props,
            max: cfg.max_connections,
            state: Mutex::new(PoolState::default()),
            released: Condvar::new(),
        };
        Ok(Self { base, statements, pool })
    }

    pub fn statements(&self) -> &SqlStatements { &self.statements }

    /// Run `op` on a pooled connection, retrying once on a fresh connection.
    fn with_connection<T>(&self, what: &str, op: impl Fn(&mut dyn SqlConnection) -> Result<T, SqlError>) -> Option<T> {
        for attempt in 1..=ATTEMPTS {
            let res = self.pool.checkout().and_then(|mut c| c.run(&op));
            match res {
                Ok(v) => return Some(v),
                Err(e) if attempt < ATTEMPTS => {
                    warn!(target: "realmgate::jdbc", attempt, "{} failed, reopening connection: {}", what, e);
                }
                Err(e) => {
                    error!(target: "realmgate::jdbc", attempt, "{} failed: {}", what, e);
                }
            }
        }
        None
    }
}

impl Realm for JdbcRealm {
    fn base(&self) -> &RealmBase { &self.base }

    fn name(&self) -> &'static str { "JDBCRealm" }

    fn get_password_internal(&self, username: &str) -> Option<String> {
        self.with_connection("credential lookup", |c| self.statements.fetch_credential(c, username)).flatten()
    }

    fn get_principal_internal(&self, username: &str) -> Option<GenericPrincipal> {
        let roles = self.with_connection("role lookup", |c| self.statements.fetch_roles(c, username))?;
        Some(GenericPrincipal::new(self.base.id(), username, None, roles))
    }

    /// Credential and roles are read on the same connection checkout.
    fn authenticate(&self, username: &str, credentials: &str) -> Option<GenericPrincipal> {
        if !self.base.ensure_started(self.name()) { return None; }
        let roles = self.with_connection("authentication", |c| {
            let Some(stored) = self.statements.fetch_credential(c, username)? else { return Ok(None) };
            if !self.base.compare_credentials(credentials, &stored) {
                return Ok(None);
            }
            self.statements.fetch_roles(c, username).map(Some)
        })??;
        debug!(target: "realmgate::jdbc", username, roles = roles.len(), "authenticated");
        Some(GenericPrincipal::new(self.base.id(), username, Some(credentials.to_string()), roles))
    }

    fn start_internal(&self) -> RealmResult<()> {
        self.pool.open_for_use();
        info!(target: "realmgate::jdbc", url = %self.pool.url, max_connections = self.pool.max, "JDBC realm ready");
        Ok(())
    }

    fn stop_internal(&self) {
        let n = self.pool.shutdown();
        debug!(target: "realmgate::jdbc", closed = n, "closed pooled connections");
    }
}
