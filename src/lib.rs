//! Pluggable authentication realms: a shared authenticate/role-check skeleton over
//! in-memory, SQL, directory, login-module and user-database backends.

pub mod backend;
pub mod config;
pub mod digest;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod principal;
pub mod realm;
pub mod testing;

pub use config::{build_realm, RealmConfig, RealmEnvironment};
pub use digest::{CredentialDigest, DigestAlgorithm};
pub use error::{RealmError, RealmResult};
pub use principal::GenericPrincipal;
pub use realm::{DigestRequest, Realm};

// Test diagnostics: eprintln! in test and debug builds, nothing otherwise.
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
