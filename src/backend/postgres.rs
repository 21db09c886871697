//! `tokio-postgres` backed SQL driver. Each connection owns a current-thread runtime
//! so the realm-facing API stays blocking.

use std::collections::HashMap;

use tokio::runtime::Runtime;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, NoTls, Statement};

use super::sql::{numbered_placeholders, validate_identifier, ConnectionProps, DataSource, SqlConnection, SqlDriver};
use crate::error::SqlError;

#[derive(Debug, Default, Clone, Copy)]
pub struct PgDriver;

impl SqlDriver for PgDriver {
    fn connect(&self, url: &str, props: &ConnectionProps) -> Result<Box<dyn SqlConnection>, SqlError> {
        Ok(Box::new(PgConnection::open(url, props)?))
    }
}

/// `SET search_path` from a comma-separated schema list; each schema must be a plain identifier.
fn search_path_statement(schemas: &str) -> Result<String, SqlError> {
    let parts: Vec<&str> = schemas.split(',').map(str::trim).collect();
    for p in &parts {
        validate_identifier("search_path schema", p).map_err(SqlError::Connect)?;
    }
    Ok(format!("SET search_path TO {}", parts.join(", ")))
}

pub struct PgConnection {
    rt: Runtime,
    client: Client,
    statements: HashMap<String, Statement>,
}

impl PgConnection {
    pub fn open(url: &str, props: &ConnectionProps) -> Result<Self, SqlError> {
        let mut cfg: Config = url.parse().map_err(|e: tokio_postgres::Error| SqlError::Connect(e.to_string()))?;
        if let Some(u) = &props.user { cfg.user(u); }
        if let Some(p) = &props.password { cfg.password(p); }
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SqlError::Connect(e.to_string()))?;
        let (client, conn) = rt.block_on(cfg.connect(NoTls)).map_err(|e| SqlError::Connect(e.to_string()))?;
        // driven whenever the runtime blocks on a query
        rt.spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(target: "realmgate::postgres", "connection task ended: {}", e);
            }
        });
        if let Some(s) = props.extra.get("search_path") {
            let stmt = search_path_statement(s)?;
            rt.block_on(client.simple_query(&stmt)).map_err(|e| SqlError::Connect(e.to_string()))?;
        }
        Ok(Self { rt, client, statements: HashMap::new() })
    }

    fn prepared(&mut self, sql: &str) -> Result<Statement, SqlError> {
        if let Some(st) = self.statements.get(sql) { return Ok(st.clone()); }
        let text = numbered_placeholders(sql);
        let st = self.rt.block_on(self.client.prepare(&text)).map_err(|e| self.map_err(e))?;
        self.statements.insert(sql.to_string(), st.clone());
        Ok(st)
    }

    fn map_err(&self, e: tokio_postgres::Error) -> SqlError {
        if self.client.is_closed() { SqlError::Closed } else { SqlError::Statement(e.to_string()) }
    }
}

impl SqlConnection for PgConnection {
    fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Option<String>>, SqlError> {
        if self.client.is_closed() { return Err(SqlError::Closed); }
        let st = self.prepared(sql)?;
        let args: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.rt.block_on(self.client.query(&st, &args)).map_err(|e| self.map_err(e))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let v: Option<String> = row.try_get(0).map_err(|e| SqlError::Statement(e.to_string()))?;
            out.push(v);
        }
        Ok(out)
    }

    fn close(&mut self) {
        self.statements.clear();
    }
}

/// Opens a fresh connection per checkout.
pub struct PgDataSource {
    url: String,
    props: ConnectionProps,
}

impl PgDataSource {
    pub fn new(url: impl Into<String>, props: ConnectionProps) -> Self { Self { url: url.into(), props } }
}

impl DataSource for PgDataSource {
    fn get_connection(&self) -> Result<Box<dyn SqlConnection>, SqlError> {
        Ok(Box::new(PgConnection::open(&self.url, &self.props)?))
    }
}
