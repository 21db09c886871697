//! Named resources realms resolve at start or per call (data sources, user databases).
//! Built explicitly by the embedder and handed to the realms that need it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::sql::DataSource;
use crate::backend::user_database::UserDatabase;

#[derive(Clone)]
pub enum NamingResource {
    DataSource(Arc<dyn DataSource>),
    UserDatabase(Arc<dyn UserDatabase>),
}

#[derive(Default)]
pub struct NamingContext {
    entries: RwLock<BTreeMap<String, NamingResource>>,
}

impl NamingContext {
    pub fn new() -> Self { Self::default() }

    pub fn bind(&self, name: impl Into<String>, resource: NamingResource) {
        self.entries.write().insert(name.into(), resource);
    }

    pub fn bind_data_source(&self, name: impl Into<String>, ds: Arc<dyn DataSource>) {
        self.bind(name, NamingResource::DataSource(ds));
    }

    pub fn bind_user_database(&self, name: impl Into<String>, db: Arc<dyn UserDatabase>) {
        self.bind(name, NamingResource::UserDatabase(db));
    }

    pub fn unbind(&self, name: &str) -> bool { self.entries.write().remove(name).is_some() }

    pub fn lookup_data_source(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        match self.entries.read().get(name) {
            Some(NamingResource::DataSource(ds)) => Some(ds.clone()),
            _ => None,
        }
    }

    pub fn lookup_user_database(&self, name: &str) -> Option<Arc<dyn UserDatabase>> {
        match self.entries.read().get(name) {
            Some(NamingResource::UserDatabase(db)) => Some(db.clone()),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<String> { self.entries.read().keys().cloned().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::user_database::MemoryUserDatabase;

    #[test]
    fn lookup_is_typed() {
        let ctx = NamingContext::new();
        ctx.bind_user_database("UserDatabase", Arc::new(MemoryUserDatabase::new("UserDatabase")));
        assert!(ctx.lookup_user_database("UserDatabase").is_some());
        assert!(ctx.lookup_data_source("UserDatabase").is_none());
        assert_eq!(ctx.names(), vec!["UserDatabase".to_string()]);
        assert!(ctx.unbind("UserDatabase"));
        assert!(ctx.lookup_user_database("UserDatabase").is_none());
    }
}
