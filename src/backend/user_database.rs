//! Hierarchical user store: users hold direct roles and group memberships, groups hold roles.
//! `MemoryUserDatabase` keeps the graph in memory and persists it as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{RealmError, RealmResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbGroup {
    pub groupname: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

pub trait UserDatabase: Send + Sync {
    fn id(&self) -> &str;

    fn find_user(&self, username: &str) -> Option<DbUser>;

    fn find_group(&self, groupname: &str) -> Option<DbGroup>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    groups: Vec<DbGroup>,
    #[serde(default)]
    users: Vec<DbUser>,
}

#[derive(Debug, Default)]
struct Graph {
    roles: Vec<String>,
    groups: BTreeMap<String, DbGroup>,
    users: BTreeMap<String, DbUser>,
}

pub struct MemoryUserDatabase {
    id: String,
    path: Option<PathBuf>,
    graph: RwLock<Graph>,
}

impl MemoryUserDatabase {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), path: None, graph: RwLock::new(Graph::default()) }
    }

    /// Load from a JSON document `{ "roles": [...], "groups": [...], "users": [...] }`.
    /// A missing file yields an empty database bound to that path.
    pub fn open(id: impl Into<String>, path: impl AsRef<Path>) -> RealmResult<Self> {
        let path = path.as_ref().to_path_buf();
        let doc: Document = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            Document::default()
        };
        let db = Self { id: id.into(), path: Some(path), graph: RwLock::new(Graph::default()) };
        {
            let mut g = db.graph.write();
            g.roles = doc.roles;
            for grp in doc.groups { g.groups.insert(grp.groupname.clone(), grp); }
            for u in doc.users { g.users.insert(u.username.clone(), u); }
        }
        tracing::debug!(target: "realmgate::user_database", id = %db.id, users = db.graph.read().users.len(), "user database loaded");
        Ok(db)
    }

    pub fn save(&self) -> RealmResult<()> {
        let Some(path) = &self.path else { return Err(RealmError::config(format!("user database '{}' has no backing file", self.id))); };
        let doc = {
            let g = self.graph.read();
            Document { roles: g.roles.clone(), groups: g.groups.values().cloned().collect(), users: g.users.values().cloned().collect() }
        };
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
        std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }

    pub fn create_role(&self, role: &str) {
        let mut g = self.graph.write();
        if !g.roles.iter().any(|r| r == role) { g.roles.push(role.to_string()); }
    }

    pub fn create_group(&self, groupname: &str, roles: &[&str]) {
        let grp = DbGroup { groupname: groupname.to_string(), description: None, roles: roles.iter().map(|r| r.to_string()).collect() };
        self.graph.write().groups.insert(groupname.to_string(), grp);
    }

    pub fn create_user(&self, username: &str, password: &str, roles: &[&str], groups: &[&str]) {
        let user = DbUser {
            username: username.to_string(),
            password: password.to_string(),
            full_name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        };
        self.graph.write().users.insert(username.to_string(), user);
    }

    pub fn remove_user(&self, username: &str) -> bool { self.graph.write().users.remove(username).is_some() }

    /// Removing a group also drops it from every member's group list.
    pub fn remove_group(&self, groupname: &str) -> bool {
        let mut g = self.graph.write();
        let removed = g.groups.remove(groupname).is_some();
        if removed {
            for u in g.users.values_mut() { u.groups.retain(|x| x != groupname); }
        }
        removed
    }

    pub fn roles(&self) -> Vec<String> { self.graph.read().roles.clone() }
}

impl UserDatabase for MemoryUserDatabase {
    fn id(&self) -> &str { &self.id }

    fn find_user(&self, username: &str) -> Option<DbUser> { self.graph.read().users.get(username).cloned() }

    fn find_group(&self, groupname: &str) -> Option<DbGroup> { self.graph.read().groups.get(groupname).cloned() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_missing_file_is_empty() {
        let tmp = tempdir().unwrap();
        let db = MemoryUserDatabase::open("users", tmp.path().join("users.json")).unwrap();
        assert!(db.find_user("nobody").is_none());
    }

    #[test]
    fn save_and_reload() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("users.json");
        let db = MemoryUserDatabase::open("users", &path).unwrap();
        db.create_role("viewer");
        db.create_group("g1", &["editor"]);
        db.create_user("carol", "pw", &["viewer"], &["g1"]);
        db.save().unwrap();

        let again = MemoryUserDatabase::open("users", &path).unwrap();
        let carol = again.find_user("carol").unwrap();
        assert_eq!(carol.groups, vec!["g1".to_string()]);
        assert_eq!(again.find_group("g1").unwrap().roles, vec!["editor".to_string()]);
        assert_eq!(again.roles(), vec!["viewer".to_string()]);
    }

    #[test]
    fn remove_group_detaches_members() {
        let db = MemoryUserDatabase::new("mem");
        db.create_group("g1", &["editor"]);
        db.create_user("dave", "pw", &[], &["g1"]);
        assert!(db.remove_group("g1"));
        assert!(db.find_user("dave").unwrap().groups.is_empty());
        assert!(!db.remove_group("g1"));
        assert!(db.remove_user("dave"));
    }

    #[test]
    fn save_without_path_is_config_error() {
        let db = MemoryUserDatabase::new("mem");
        assert!(matches!(db.save(), Err(RealmError::Config(_))));
    }
}
