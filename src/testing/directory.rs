//! In-memory directory tree with a small RFC 4515 filter evaluator.
//!
//! Bind verifies against each entry's `userPassword` attribute. Unreachable URLs and
//! one-shot errors can be injected to exercise failover and reconnect paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::take_one;
use crate::backend::directory::{Attributes, DirContext, DirContextFactory, DirectoryEnvironment, SearchResult, SearchScope};
use crate::error::DirectoryError;

const PASSWORD_ATTR: &str = "userPassword";

#[derive(Debug, Clone)]
struct Entry {
    dn: String,
    attributes: Attributes,
}

#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<BTreeMap<String, Entry>>,
    unreachable: RwLock<BTreeSet<String>>,
    fail_ops: AtomicUsize,
    connected: Mutex<Vec<String>>,
    binds: AtomicUsize,
    closes: AtomicUsize,
}

/// Lower-cased RDNs, honouring `\,` escapes.
fn rdns(dn: &str) -> Vec<String> {
    if dn.trim().is_empty() { return Vec::new(); }
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for ch in dn.chars() {
        if escaped {
            cur.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                cur.push(ch);
                escaped = true;
            }
            ',' => out.push(std::mem::take(&mut cur)),
            _ => cur.push(ch),
        }
    }
    out.push(cur);
    out.into_iter().map(|r| r.trim().to_ascii_lowercase()).collect()
}

fn norm_dn(dn: &str) -> String { rdns(dn).join(",") }

impl MemoryDirectory {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn add_entry(&self, dn: &str, attributes: Attributes) {
        self.entries.write().insert(norm_dn(dn), Entry { dn: dn.to_string(), attributes });
    }

    pub fn remove_entry(&self, dn: &str) -> bool { self.entries.write().remove(&norm_dn(dn)).is_some() }

    /// Connections to `url` fail with a communication error.
    pub fn set_unreachable(&self, url: &str, unreachable: bool) {
        let mut set = self.unreachable.write();
        if unreachable { set.insert(url.to_string()); } else { set.remove(url); }
    }

    /// The next `n` reads or searches fail with a stale-connection error.
    pub fn fail_next_operations(&self, n: usize) { self.fail_ops.store(n, Ordering::SeqCst); }

    /// Provider URLs of every successful connection, in order.
    pub fn connections(&self) -> Vec<String> { self.connected.lock().clone() }

    pub fn binds(&self) -> usize { self.binds.load(Ordering::SeqCst) }

    pub fn closes(&self) -> usize { self.closes.load(Ordering::SeqCst) }

    fn check_fault(&self) -> Result<(), DirectoryError> {
        if take_one(&self.fail_ops) {
            return Err(DirectoryError::Communication("connection reset by peer".into()));
        }
        Ok(())
    }

    fn verify(&self, principal: Option<&str>, credentials: Option<&str>) -> Result<(), DirectoryError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let Some(dn) = principal else { return Ok(()) };
        let entries = self.entries.read();
        let entry = entries.get(&norm_dn(dn)).ok_or_else(|| DirectoryError::Authentication(format!("no entry {}", dn)))?;
        let ok = match (entry.attributes.first(PASSWORD_ATTR), credentials) {
            (Some(stored), Some(given)) => stored == given,
            _ => false,
        };
        if ok { Ok(()) } else { Err(DirectoryError::Authentication("invalid credentials".into())) }
    }

    fn in_scope(entry_dn: &str, base: &str, scope: SearchScope) -> bool {
        let entry = rdns(entry_dn);
        let base = rdns(base);
        if entry.len() < base.len() || entry[entry.len() - base.len()..] != base[..] {
            return false;
        }
        match scope {
            SearchScope::OneLevel => entry.len() == base.len() + 1,
            SearchScope::Subtree => true,
        }
    }
}

pub struct MemoryDirContext {
    dir: Arc<MemoryDirectory>,
    closed: bool,
}

impl MemoryDirContext {
    fn live(&self) -> Result<(), DirectoryError> {
        if self.closed { return Err(DirectoryError::Communication("context closed".into())); }
        self.dir.check_fault()
    }
}

impl DirContext for MemoryDirContext {
    fn get_attributes(&mut self, dn: &str, attr_ids: &[&str]) -> Result<Option<Attributes>, DirectoryError> {
        self.live()?;
        let entries = self.dir.entries.read();
        let entry = entries.get(&norm_dn(dn)).ok_or_else(|| DirectoryError::NameNotFound(dn.to_string()))?;
        let attrs = entry.attributes.project(attr_ids);
        Ok(if attrs.iter().next().is_none() { None } else { Some(attrs) })
    }

    fn search(&mut self, base: &str, filter: &str, scope: SearchScope, attr_ids: &[&str]) -> Result<Vec<SearchResult>, DirectoryError> {
        self.live()?;
        let filter = Filter::parse(filter)?;
        let entries = self.dir.entries.read();
        Ok(entries
            .iter()
            .filter(|(key, _)| MemoryDirectory::in_scope(key, base, scope))
            .filter(|(_, e)| filter.matches(&e.attributes))
            .map(|(_, e)| SearchResult { dn: e.dn.clone(), attributes: e.attributes.project(attr_ids) })
            .collect())
    }

    fn bind(&mut self, principal: Option<&str>, credentials: Option<&str>) -> Result<(), DirectoryError> {
        if self.closed { return Err(DirectoryError::Communication("context closed".into())); }
        self.dir.verify(principal, credentials)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.dir.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Factory binding the service identity from the environment on connect.
#[derive(Clone)]
pub struct MemoryDirectoryFactory {
    dir: Arc<MemoryDirectory>,
}

impl MemoryDirectoryFactory {
    pub fn new(dir: Arc<MemoryDirectory>) -> Self { Self { dir } }
}

impl DirContextFactory for MemoryDirectoryFactory {
    fn connect(&self, env: &DirectoryEnvironment) -> Result<Box<dyn DirContext>, DirectoryError> {
        if self.dir.unreachable.read().contains(&env.provider_url) {
            return Err(DirectoryError::Communication(format!("cannot reach {}", env.provider_url)));
        }
        if env.connection_name.is_some() {
            self.dir.verify(env.connection_name.as_deref(), env.connection_password.as_deref())?;
        }
        self.dir.connected.lock().push(env.provider_url.clone());
        Ok(Box::new(MemoryDirContext { dir: self.dir.clone(), closed: false }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
}

impl Filter {
    fn parse(text: &str) -> Result<Filter, DirectoryError> {
        let chars: Vec<char> = text.trim().chars().collect();
        let mut pos = 0;
        let f = Self::parse_at(&chars, &mut pos)?;
        if pos != chars.len() {
            return Err(DirectoryError::Naming(format!("trailing text in filter '{}'", text)));
        }
        Ok(f)
    }

    fn parse_at(c: &[char], pos: &mut usize) -> Result<Filter, DirectoryError> {
        if c.get(*pos) != Some(&'(') { return Err(malformed(*pos)); }
        *pos += 1;
        let f = match c.get(*pos) {
            Some('&') | Some('|') | Some('!') => {
                let op = c[*pos];
                *pos += 1;
                let mut parts = Vec::new();
                while c.get(*pos) == Some(&'(') {
                    parts.push(Self::parse_at(c, pos)?);
                }
                match op {
                    '&' => Filter::And(parts),
                    '|' => Filter::Or(parts),
                    _ => {
                        if parts.len() != 1 { return Err(malformed(*pos)); }
                        Filter::Not(Box::new(parts.remove(0)))
                    }
                }
            }
            _ => {
                let start = *pos;
                while c.get(*pos).is_some_and(|ch| *ch != ')') { *pos += 1; }
                let item: String = c[start..*pos].iter().collect();
                let (attr, value) = item.split_once('=').ok_or_else(|| malformed(start))?;
                if value == "*" { Filter::Present(attr.to_string()) } else { Filter::Equal(attr.to_string(), unescape(value)?) }
            }
        };
        if c.get(*pos) != Some(&')') { return Err(malformed(*pos)); }
        *pos += 1;
        Ok(f)
    }

    fn matches(&self, attrs: &Attributes) -> bool {
        match self {
            Filter::And(fs) => fs.iter().all(|f| f.matches(attrs)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(attrs)),
            Filter::Not(f) => !f.matches(attrs),
            Filter::Present(a) => attrs.get(a).is_some_and(|v| !v.is_empty()),
            Filter::Equal(a, want) => attrs.get(a).is_some_and(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(want))),
        }
    }
}

fn malformed(at: usize) -> DirectoryError { DirectoryError::Naming(format!("malformed filter near offset {}", at)) }

/// Undo `\xx` hex escapes.
fn unescape(value: &str) -> Result<String, DirectoryError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = value.get(i + 1..i + 3).ok_or_else(|| DirectoryError::Naming(format!("bad escape in '{}'", value)))?;
            let b = u8::from_str_radix(hex, 16).map_err(|_| DirectoryError::Naming(format!("bad escape in '{}'", value)))?;
            out.push(b);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| DirectoryError::Naming(format!("escape yields invalid utf-8 in '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::directory::escape_filter_value;

    #[test]
    fn filter_evaluation() {
        let a = Attributes::new().with("uid", "bob").with("objectClass", "person").with("member", "cn=x");
        assert!(Filter::parse("(uid=BOB)").unwrap().matches(&a));
        assert!(Filter::parse("(&(objectClass=person)(uid=bob))").unwrap().matches(&a));
        assert!(Filter::parse("(|(uid=alice)(member=*))").unwrap().matches(&a));
        assert!(!Filter::parse("(!(uid=bob))").unwrap().matches(&a));
        assert!(Filter::parse("(uid=bob").is_err());
    }

    #[test]
    fn escaped_values_roundtrip_through_filters() {
        let dn = r"cn=Smith\, J,ou=people";
        let a = Attributes::new().with("member", dn);
        let f = Filter::parse(&format!("(member={})", escape_filter_value(dn))).unwrap();
        assert!(f.matches(&a));
    }

    #[test]
    fn scopes() {
        assert!(MemoryDirectory::in_scope("uid=a,ou=people,dc=x", "ou=people, dc=x", SearchScope::OneLevel));
        assert!(!MemoryDirectory::in_scope("uid=a,ou=staff,ou=people,dc=x", "ou=people,dc=x", SearchScope::OneLevel));
        assert!(MemoryDirectory::in_scope("uid=a,ou=staff,ou=people,dc=x", "ou=people,dc=x", SearchScope::Subtree));
    }
}
