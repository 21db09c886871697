use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Identity of one realm instance. Principals carry the id of the realm that
/// produced them so role checks can refuse principals minted elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RealmId(u64);

static NEXT_REALM_ID: AtomicU64 = AtomicU64::new(1);

impl RealmId {
    pub fn next() -> Self { RealmId(NEXT_REALM_ID.fetch_add(1, Ordering::Relaxed)) }
}

/// An authenticated identity plus the role names granted to it.
/// Built fresh by a realm on every successful authentication and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenericPrincipal {
    name: String,
    #[serde(skip)]
    password: Option<String>,
    roles: Vec<String>,
    realm: RealmId,
}

impl GenericPrincipal {
    pub fn new<I, S>(realm: RealmId, name: impl Into<String>, password: Option<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        roles.sort();
        Self { name: name.into(), password, roles, realm }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn password(&self) -> Option<&str> { self.password.as_deref() }

    /// Sorted role names.
    pub fn roles(&self) -> &[String] { &self.roles }

    pub fn realm(&self) -> RealmId { self.realm }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.binary_search_by(|r| r.as_str().cmp(role)).is_ok()
    }
}

impl fmt::Display for GenericPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericPrincipal[{}(", self.name)?;
        for r in &self.roles {
            write!(f, "{},", r)?;
        }
        f.write_str(")]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_sorted_for_binary_search() {
        let p = GenericPrincipal::new(RealmId::next(), "bob", None, ["ops", "admin", "dev"]);
        assert_eq!(p.roles(), &["admin".to_string(), "dev".to_string(), "ops".to_string()]);
        assert!(p.has_role("dev"));
        assert!(!p.has_role("root"));
    }

    #[test]
    fn empty_roles_when_none_supplied() {
        let p = GenericPrincipal::new(RealmId::next(), "anon", None, Vec::<String>::new());
        assert!(p.roles().is_empty());
        assert!(!p.has_role(""));
    }

    #[test]
    fn realm_ids_are_unique() {
        assert_ne!(RealmId::next(), RealmId::next());
    }

    #[test]
    fn display_lists_roles() {
        let p = GenericPrincipal::new(RealmId::next(), "carol", Some("pw".into()), ["b", "a"]);
        assert_eq!(p.to_string(), "GenericPrincipal[carol(a,b,)]");
        assert_eq!(p.password(), Some("pw"));
    }
}
