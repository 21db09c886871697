//! Behaviour shared by every realm, exercised through the in-memory realm:
//! lifecycle, HTTP Digest, client certificates, role checks and digest modes.

use std::sync::Arc;

use anyhow::Result;

use realmgate::config::{MemoryRealmConfig, MemoryUserEntry, RealmCommonConfig, X509UsernameConfig};
use realmgate::naming::NamingContext;
use realmgate::realm::MemoryRealm;
use realmgate::{build_realm, CredentialDigest, DigestRequest, Realm, RealmConfig, RealmEnvironment};

const VALID_CERT: &[u8] = include_bytes!("data/client_valid.der");
const EXPIRED_CERT: &[u8] = include_bytes!("data/client_expired.der");

/// `(username, stored password, comma-separated roles)`
fn memory_realm(common: RealmCommonConfig, users: &[(&str, &str, &str)]) -> Result<MemoryRealm> {
    let users = users
        .iter()
        .map(|(u, p, r)| MemoryUserEntry {
            username: u.to_string(),
            password: p.to_string(),
            roles: r.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
        })
        .collect();
    let realm = MemoryRealm::new(MemoryRealmConfig { common, users, ..Default::default() })?;
    realm.start()?;
    Ok(realm)
}

fn mufasa_request(qop: Option<&'static str>, client_digest: &'static str) -> DigestRequest<'static> {
    DigestRequest {
        username: "Mufasa",
        client_digest,
        nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
        nc: "00000001",
        cnonce: "0a4f113b",
        qop,
        realm_name: "testrealm@host.com",
        md5a2: "39aff3a2bab6126f332b942af96d3366",
    }
}

#[test]
fn lifecycle_misuse_is_reported() -> Result<()> {
    let realm = memory_realm(RealmCommonConfig::default(), &[("tom", "cat", "a")])?;
    assert_eq!(realm.start().unwrap_err().code_str(), "lifecycle");
    realm.stop()?;
    assert_eq!(realm.stop().unwrap_err().code_str(), "lifecycle");
    assert!(realm.authenticate("tom", "cat").is_none());
    realm.start()?;
    assert!(realm.authenticate("tom", "cat").is_some());
    Ok(())
}

#[test]
fn unknown_digest_algorithm_fails_start() -> Result<()> {
    let cfg = MemoryRealmConfig { common: RealmCommonConfig { digest: Some("ROT13".into()), ..Default::default() }, ..Default::default() };
    let realm = MemoryRealm::new(cfg)?;
    assert_eq!(realm.start().unwrap_err().code_str(), "unknown_algorithm");
    assert!(!realm.base().has_message_digest());
    Ok(())
}

#[test]
fn http_digest_qop_auth_and_legacy() -> Result<()> {
    let realm = memory_realm(RealmCommonConfig::default(), &[("Mufasa", "Circle Of Life", "king")])?;
    let p = realm.authenticate_digest(&mufasa_request(Some("auth"), "6629fae49393a05397450978507c4ef1")).expect("rfc 2617 example");
    assert!(p.has_role("king"));
    assert!(realm.authenticate_digest(&mufasa_request(None, "670fd8c2df070c60b045671b8b24ff02")).is_some());
    assert!(realm.authenticate_digest(&mufasa_request(Some("auth"), "6629FAE49393A05397450978507C4EF1")).is_none(), "response compare is case-sensitive");
    assert!(realm.authenticate_digest(&mufasa_request(None, "6629fae49393a05397450978507c4ef1")).is_none());
    Ok(())
}

#[test]
fn argon2_stored_values() -> Result<()> {
    let phc = realmgate::digest::digest("hunter2", "ARGON2", None)?;
    assert!(phc.starts_with("$argon2"));
    let common = RealmCommonConfig { digest: Some("ARGON2".into()), ..Default::default() };
    let realm = memory_realm(common, &[("Mufasa", phc.as_str(), "king")])?;
    assert!(realm.authenticate("Mufasa", "hunter2").is_some());
    assert!(realm.authenticate("Mufasa", "hunter3").is_none());
    assert!(realm.authenticate_digest(&mufasa_request(Some("auth"), "6629fae49393a05397450978507c4ef1")).is_none());
    Ok(())
}

#[test]
fn certificate_common_name_mapping() -> Result<()> {
    let common = RealmCommonConfig { x509_username: X509UsernameConfig::CommonName, ..Default::default() };
    let realm = memory_realm(common, &[("alice", "", "client"), ("bob", "", "client")])?;
    let p = realm.authenticate_certificates(&[VALID_CERT]).expect("valid leaf");
    assert_eq!(p.name(), "alice");
    assert!(realm.authenticate_certificates(&[EXPIRED_CERT]).is_none());
    assert!(realm.authenticate_certificates(&[VALID_CERT, EXPIRED_CERT]).is_none(), "any invalid certificate fails the chain");
    assert!(realm.authenticate_certificates(&[]).is_none());
    assert!(realm.authenticate_certificates(&[&b"not a certificate"[..]]).is_none());
    Ok(())
}

#[test]
fn certificate_validity_check_can_be_disabled() -> Result<()> {
    let common = RealmCommonConfig { validate: false, x509_username: X509UsernameConfig::CommonName, ..Default::default() };
    let realm = memory_realm(common, &[("bob", "", "client")])?;
    assert_eq!(realm.authenticate_certificates(&[EXPIRED_CERT]).map(|p| p.name().to_string()).as_deref(), Some("bob"));
    Ok(())
}

#[test]
fn certificate_subject_dn_and_pattern_mapping() -> Result<()> {
    let realm = memory_realm(RealmCommonConfig::default(), &[("CN=alice, OU=staff, O=Example", "", "client")])?;
    assert!(realm.authenticate_certificates(&[VALID_CERT]).is_some());

    let common = RealmCommonConfig { x509_username: X509UsernameConfig::Pattern { regex: r"OU=([^,]+)".into() }, ..Default::default() };
    let realm = memory_realm(common, &[("staff", "", "team")])?;
    assert!(realm.authenticate_certificates(&[VALID_CERT]).expect("OU capture").has_role("team"));
    Ok(())
}

#[test]
fn pattern_without_capture_group_is_a_config_error() {
    let common = RealmCommonConfig { x509_username: X509UsernameConfig::Pattern { regex: "CN=.*".into() }, ..Default::default() };
    let err = MemoryRealm::new(MemoryRealmConfig { common, ..Default::default() }).err().expect("needs a group");
    assert_eq!(err.code_str(), "config");
}

#[test]
fn roles_only_count_for_the_issuing_realm() -> Result<()> {
    let a = memory_realm(RealmCommonConfig::default(), &[("tom", "cat", "admin")])?;
    let b = memory_realm(RealmCommonConfig::default(), &[("tom", "cat", "admin")])?;
    let p = a.authenticate("tom", "cat").expect("tom");
    assert!(a.has_role(&p, "admin"));
    assert!(a.has_role(&p, "admin"), "repeatable");
    assert!(!b.has_role(&p, "admin"));
    Ok(())
}

#[test]
fn digest_is_deterministic_across_threads() -> Result<()> {
    let d = CredentialDigest::from_names(Some("SHA-256"), None)?;
    let expected = d.digest("correct horse")?;
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..100 {
                    assert_eq!(d.digest("correct horse").unwrap(), expected);
                }
            });
        }
    });
    Ok(())
}

#[test]
fn memory_realm_from_json_configuration() -> Result<()> {
    let cfg = RealmConfig::from_json_str(
        r#"{
            "type": "memory",
            "digest": "SHA",
            "users": [
                { "username": "ann", "password": "8BE3C943B1609FFFBFC51AAD666D0A04ADF83C9D", "roles": ["ops"] }
            ]
        }"#,
    )?;
    let realm: Arc<dyn Realm> = build_realm(&cfg, &RealmEnvironment::new(Arc::new(NamingContext::new())))?;
    realm.start()?;
    let p = realm.authenticate("ann", "Password").expect("sha-1 stored upper-case");
    assert_eq!(p.to_string(), "GenericPrincipal[ann(ops,)]");
    Ok(())
}
