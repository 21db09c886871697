//! SQL-backed realms: the driver-pooled realm and the naming-context data source realm,
//! driven through the in-memory SQL store.

use std::sync::Arc;

use anyhow::Result;

use realmgate::config::{DataSourceRealmConfig, JdbcRealmConfig, RealmCommonConfig};
use realmgate::naming::NamingContext;
use realmgate::testing::{MemoryDataSource, MemorySqlDriver, MemorySqlStore};
use realmgate::{build_realm, tprintln, Realm, RealmConfig, RealmEnvironment};

const SECRET_MD5: &str = "5ebe2294ecd0e0f08eab7690d2a6ee69";

fn seeded_store() -> Arc<MemorySqlStore> {
    let store = MemorySqlStore::new();
    let upper = SECRET_MD5.to_ascii_uppercase();
    store.insert("users", &[("user_name", "bob"), ("user_pass", SECRET_MD5)]);
    store.insert("users", &[("user_name", "shouty"), ("user_pass", upper.as_str())]);
    store.insert("users", &[("user_name", "ghost")]);
    store.insert("user_roles", &[("user_name", "bob"), ("role_name", "admin")]);
    store.insert("user_roles", &[("user_name", "bob"), ("role_name", "ops")]);
    store.insert("user_roles", &[("user_name", "shouty"), ("role_name", "ops")]);
    store.insert("user_roles", &[("user_name", "shouty"), ("role_name", "ops")]);
    store
}

fn jdbc_config(max_connections: usize) -> JdbcRealmConfig {
    JdbcRealmConfig {
        common: RealmCommonConfig { digest: Some("MD5".into()), ..Default::default() },
        driver_name: "memory".into(),
        connection_url: "memory://auth".into(),
        user_table: "users".into(),
        user_name_col: "user_name".into(),
        user_cred_col: "user_pass".into(),
        user_role_table: "user_roles".into(),
        role_name_col: "role_name".into(),
        max_connections,
        ..Default::default()
    }
}

fn jdbc_realm(store: &Arc<MemorySqlStore>, max_connections: usize) -> Result<Arc<dyn Realm>> {
    let env = RealmEnvironment::new(Arc::new(NamingContext::new()))
        .with_sql_driver("memory", Arc::new(MemorySqlDriver::new(store.clone())));
    let realm = build_realm(&RealmConfig::Jdbc(jdbc_config(max_connections)), &env)?;
    realm.start()?;
    Ok(realm)
}

#[test]
fn jdbc_md5_end_to_end() -> Result<()> {
    let store = seeded_store();
    let realm = jdbc_realm(&store, 1)?;

    let p = realm.authenticate("bob", "secret").expect("bob authenticates");
    assert_eq!(p.name(), "bob");
    assert_eq!(p.roles(), ["admin".to_string(), "ops".to_string()]);
    assert_eq!(p.password(), Some("secret"));
    assert!(realm.has_role(&p, "admin"));
    assert!(!realm.has_role(&p, "root"));

    assert!(realm.authenticate("bob", "wrong").is_none());
    assert!(realm.authenticate("nobody", "secret").is_none());
    Ok(())
}

#[test]
fn jdbc_upper_case_digest_and_duplicate_role_rows() -> Result<()> {
    let store = seeded_store();
    let realm = jdbc_realm(&store, 1)?;
    let p = realm.authenticate("shouty", "secret").expect("case-insensitive hex compare");
    assert_eq!(p.roles(), ["ops".to_string(), "ops".to_string()]);
    Ok(())
}

#[test]
fn jdbc_null_credential_is_rejected() -> Result<()> {
    let store = seeded_store();
    let realm = jdbc_realm(&store, 1)?;
    assert!(realm.authenticate("ghost", "").is_none());
    assert!(realm.authenticate("ghost", "secret").is_none());
    Ok(())
}

#[test]
fn jdbc_broken_connection_is_recycled_and_retried() -> Result<()> {
    let store = seeded_store();
    let realm = jdbc_realm(&store, 1)?;

    store.fail_next_queries(1);
    assert!(realm.authenticate("bob", "secret").is_some(), "one failure is absorbed by the retry");
    assert_eq!(store.connects(), 2);
    assert_eq!(store.closes(), 1);

    store.fail_next_queries(2);
    assert!(realm.authenticate("bob", "secret").is_none(), "second failure is final");
    assert!(realm.authenticate("bob", "secret").is_some(), "next call reopens");
    tprintln!("connects={} closes={}", store.connects(), store.closes());
    Ok(())
}

#[test]
fn jdbc_connect_failure_then_recovery() -> Result<()> {
    let store = seeded_store();
    let realm = jdbc_realm(&store, 1)?;
    store.fail_next_connects(2);
    assert!(realm.authenticate("bob", "secret").is_none());
    assert!(realm.authenticate("bob", "secret").is_some());
    Ok(())
}

#[test]
fn jdbc_pool_bounds_connections_under_concurrency() -> Result<()> {
    let store = seeded_store();
    let realm = jdbc_realm(&store, 4)?;
    std::thread::scope(|s| {
        for _ in 0..8 {
            let realm = realm.clone();
            s.spawn(move || {
                for _ in 0..25 {
                    assert!(realm.authenticate("bob", "secret").is_some());
                }
            });
        }
    });
    assert!(store.connects() <= 4, "opened {} connections", store.connects());
    realm.stop()?;
    assert_eq!(store.closes(), store.connects());
    Ok(())
}

#[test]
fn jdbc_lookups_open_no_connection_unless_started() -> Result<()> {
    let store = seeded_store();
    let env = RealmEnvironment::new(Arc::new(NamingContext::new()))
        .with_sql_driver("memory", Arc::new(MemorySqlDriver::new(store.clone())));
    let realm = build_realm(&RealmConfig::Jdbc(jdbc_config(1)), &env)?;
    assert!(realm.get_password("bob").is_none());
    assert!(realm.get_principal("bob").is_none());
    assert_eq!((store.connects(), store.queries()), (0, 0));

    realm.start()?;
    assert_eq!(realm.get_password("bob").as_deref(), Some(SECRET_MD5));
    assert_eq!(realm.get_principal("bob").map(|p| p.roles().len()), Some(2));
    realm.stop()?;
    assert_eq!(store.connects(), 1);
    assert_eq!(store.closes(), 1);

    assert!(realm.get_password("bob").is_none());
    assert!(realm.authenticate("bob", "secret").is_none());
    assert_eq!(store.connects(), 1, "stopped realm must not reconnect");
    Ok(())
}

#[test]
fn datasource_lookups_require_a_started_realm() -> Result<()> {
    let store = seeded_store();
    let naming = Arc::new(NamingContext::new());
    naming.bind_data_source("jdbc/auth", Arc::new(MemoryDataSource::new(store.clone())));
    let realm = datasource_realm(&naming)?;
    realm.stop()?;
    assert!(realm.get_password("bob").is_none());
    assert!(realm.get_principal("bob").is_none());
    assert_eq!(store.connects(), 0);
    Ok(())
}

#[test]
fn jdbc_rejects_unsafe_identifiers() {
    let store = seeded_store();
    let env = RealmEnvironment::new(Arc::new(NamingContext::new()))
        .with_sql_driver("memory", Arc::new(MemorySqlDriver::new(store)));
    let mut cfg = jdbc_config(1);
    cfg.user_table = "users; DROP TABLE users".into();
    let err = build_realm(&RealmConfig::Jdbc(cfg), &env).err().expect("identifier must be rejected");
    assert_eq!(err.code_str(), "config");
}

fn datasource_realm(naming: &Arc<NamingContext>) -> Result<Arc<dyn Realm>> {
    let cfg = DataSourceRealmConfig {
        common: RealmCommonConfig { digest: Some("MD5".into()), ..Default::default() },
        data_source_name: "jdbc/auth".into(),
        user_table: "users".into(),
        user_name_col: "user_name".into(),
        user_cred_col: "user_pass".into(),
        user_role_table: "user_roles".into(),
        role_name_col: "role_name".into(),
    };
    let realm = build_realm(&RealmConfig::DataSource(cfg), &RealmEnvironment::new(naming.clone()))?;
    realm.start()?;
    Ok(realm)
}

#[test]
fn datasource_connection_per_call() -> Result<()> {
    let store = seeded_store();
    let naming = Arc::new(NamingContext::new());
    naming.bind_data_source("jdbc/auth", Arc::new(MemoryDataSource::new(store.clone())));
    let realm = datasource_realm(&naming)?;

    let p = realm.authenticate("bob", "secret").expect("bob authenticates");
    assert!(p.has_role("ops"));
    assert!(realm.authenticate("bob", "nope").is_none());
    assert_eq!(store.connects(), 2);
    assert_eq!(store.closes(), 2);
    Ok(())
}

#[test]
fn datasource_unbound_then_bound() -> Result<()> {
    let store = seeded_store();
    let naming = Arc::new(NamingContext::new());
    let realm = datasource_realm(&naming)?;
    assert!(realm.authenticate("bob", "secret").is_none());

    naming.bind_data_source("jdbc/auth", Arc::new(MemoryDataSource::new(store)));
    assert!(realm.authenticate("bob", "secret").is_some());
    Ok(())
}

#[test]
fn datasource_statement_failure_closes_and_recovers() -> Result<()> {
    let store = seeded_store();
    let naming = Arc::new(NamingContext::new());
    naming.bind_data_source("jdbc/auth", Arc::new(MemoryDataSource::new(store.clone())));
    let realm = datasource_realm(&naming)?;

    store.fail_next_queries(1);
    assert!(realm.authenticate("bob", "secret").is_none());
    assert_eq!(store.closes(), 1);
    assert!(realm.authenticate("bob", "secret").is_some());

    store.fail_next_connects(1);
    assert!(realm.authenticate("bob", "secret").is_none());
    Ok(())
}
