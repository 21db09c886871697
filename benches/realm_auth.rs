use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use realmgate::config::{JdbcRealmConfig, RealmCommonConfig};
use realmgate::digest::CredentialDigest;
use realmgate::naming::NamingContext;
use realmgate::testing::{MemorySqlDriver, MemorySqlStore};
use realmgate::{build_realm, Realm, RealmConfig, RealmEnvironment};

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("credential_digest");
    for alg in ["MD5", "SHA-1", "SHA-256", "SHA-512"] {
        let Ok(d) = CredentialDigest::from_names(Some(alg), None) else { continue };
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("digest", alg), &d, |b, d| {
            b.iter(|| criterion::black_box(d.digest("correct horse battery staple")));
        });
    }
    group.finish();
}

fn bench_jdbc_authenticate(c: &mut Criterion) {
    let store = MemorySqlStore::new();
    for i in 0..1_000 {
        let user = format!("user{i}");
        store.insert("users", &[("user_name", user.as_str()), ("user_pass", "5ebe2294ecd0e0f08eab7690d2a6ee69")]);
        store.insert("user_roles", &[("user_name", user.as_str()), ("role_name", "member")]);
    }
    let cfg = JdbcRealmConfig {
        common: RealmCommonConfig { digest: Some("MD5".into()), ..Default::default() },
        driver_name: "memory".into(),
        connection_url: "memory://bench".into(),
        user_table: "users".into(),
        user_name_col: "user_name".into(),
        user_cred_col: "user_pass".into(),
        user_role_table: "user_roles".into(),
        role_name_col: "role_name".into(),
        ..Default::default()
    };
    let env = RealmEnvironment::new(Arc::new(NamingContext::new())).with_sql_driver("memory", Arc::new(MemorySqlDriver::new(store)));
    let Ok(realm) = build_realm(&RealmConfig::Jdbc(cfg), &env) else { return };
    if realm.start().is_err() { return; }

    let mut group = c.benchmark_group("jdbc_realm");
    group.sample_size(30);
    group.bench_function("authenticate_ok", |b| b.iter(|| criterion::black_box(realm.authenticate("user500", "secret"))));
    group.bench_function("authenticate_wrong_password", |b| b.iter(|| criterion::black_box(realm.authenticate("user500", "nope"))));
    group.finish();
}

criterion_group!(benches, bench_digest, bench_jdbc_authenticate);
criterion_main!(benches);
