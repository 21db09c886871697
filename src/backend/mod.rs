//! Collaborator seams the realms talk to. Concrete stores live behind these traits.

pub mod directory;
pub mod login;
pub mod sql;
pub mod user_database;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use directory::{Attributes, DirContext, DirContextFactory, DirectoryEnvironment, SearchResult, SearchScope};
pub use login::{
    Callback, CallbackHandler, ControlFlag, LoginConfiguration, LoginContext, LoginModule, LoginModuleRegistry,
    LoginOutcome, ModuleOptions, SecurityPrincipal, Subject,
};
pub use sql::{ConnectionProps, DataSource, SqlConnection, SqlDriver, SqlStatements};
pub use user_database::{DbGroup, DbUser, MemoryUserDatabase, UserDatabase};
