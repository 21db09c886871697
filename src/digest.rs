//! Credential digesting shared by every realm.
//!
//! A realm without a configured algorithm compares credentials as plain text
//! (case-sensitive). With a hex algorithm the supplied credential is hashed and
//! compared to the stored value ignoring hex case. `ARGON2` stores salted PHC
//! strings and is verified rather than recomputed.
//!
//! Every call builds its own hasher state, so one `CredentialDigest` can be used
//! from many request threads at once.

use std::fmt;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use md5::Md5;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{RealmError, RealmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Argon2,
}

impl DigestAlgorithm {
    /// Accepts the usual spellings: `MD5`, `SHA`, `SHA-1`, `SHA1`, `SHA-256`, ...
    pub fn from_name(name: &str) -> RealmResult<Self> {
        let norm = name.trim().to_ascii_uppercase().replace('_', "-");
        match norm.as_str() {
            "MD5" | "MD-5" => Ok(DigestAlgorithm::Md5),
            "SHA" | "SHA1" | "SHA-1" => Ok(DigestAlgorithm::Sha1),
            "SHA256" | "SHA-256" => Ok(DigestAlgorithm::Sha256),
            "SHA384" | "SHA-384" => Ok(DigestAlgorithm::Sha384),
            "SHA512" | "SHA-512" => Ok(DigestAlgorithm::Sha512),
            "ARGON2" | "ARGON2ID" => Ok(DigestAlgorithm::Argon2),
            _ => Err(RealmError::UnknownAlgorithm(name.to_string())),
        }
    }

    /// Hex algorithms are deterministic; Argon2 is salted.
    pub fn is_deterministic(self) -> bool { !matches!(self, DigestAlgorithm::Argon2) }

    fn hex(self, bytes: &[u8]) -> String {
        match self {
            DigestAlgorithm::Md5 => hex::encode(Md5::digest(bytes)),
            DigestAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            DigestAlgorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
            DigestAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
            // never reached: argon2 goes through hash_phc
            DigestAlgorithm::Argon2 => String::new(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
            DigestAlgorithm::Argon2 => "ARGON2",
        };
        f.write_str(s)
    }
}

/// Byte form a credential is hashed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestEncoding {
    #[default]
    Utf8,
    Latin1,
}

impl DigestEncoding {
    pub fn from_name(name: &str) -> RealmResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(DigestEncoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(DigestEncoding::Latin1),
            other => Err(RealmError::config(format!("unsupported digest encoding '{}'", other))),
        }
    }

    pub fn encode(self, s: &str) -> Vec<u8> {
        match self {
            DigestEncoding::Utf8 => s.as_bytes().to_vec(),
            DigestEncoding::Latin1 => s.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect(),
        }
    }
}

/// Digest configuration of one realm. `algorithm == None` means plain-text mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialDigest {
    algorithm: Option<DigestAlgorithm>,
    encoding: DigestEncoding,
}

impl CredentialDigest {
    pub fn plain() -> Self { Self::default() }

    pub fn new(algorithm: Option<DigestAlgorithm>, encoding: DigestEncoding) -> Self { Self { algorithm, encoding } }

    pub fn from_names(algorithm: Option<&str>, encoding: Option<&str>) -> RealmResult<Self> {
        let algorithm = match algorithm.map(str::trim).filter(|s| !s.is_empty()) {
            Some(a) => Some(DigestAlgorithm::from_name(a)?),
            None => None,
        };
        let encoding = match encoding {
            Some(e) => DigestEncoding::from_name(e)?,
            None => DigestEncoding::Utf8,
        };
        Ok(Self { algorithm, encoding })
    }

    pub fn algorithm(&self) -> Option<DigestAlgorithm> { self.algorithm }

    pub fn is_active(&self) -> bool { self.algorithm.is_some() }

    /// Transform a plain credential into its stored form.
    pub fn digest(&self, credentials: &str) -> RealmResult<String> {
        match self.algorithm {
            None => Ok(credentials.to_string()),
            Some(DigestAlgorithm::Argon2) => hash_phc(&self.encoding.encode(credentials)),
            Some(alg) => Ok(alg.hex(&self.encoding.encode(credentials))),
        }
    }

    /// Compare a supplied plain credential to a stored one.
    pub fn matches(&self, supplied: &str, stored: &str) -> bool {
        match self.algorithm {
            None => ct_eq(supplied.as_bytes(), stored.as_bytes()),
            Some(DigestAlgorithm::Argon2) => verify_phc(stored, &self.encoding.encode(supplied)),
            Some(alg) => {
                let computed = alg.hex(&self.encoding.encode(supplied));
                ct_eq(computed.as_bytes(), stored.to_ascii_lowercase().as_bytes())
            }
        }
    }
}

/// Standalone digest utility: hash `credentials` with the named algorithm.
pub fn digest(credentials: &str, algorithm: &str, encoding: Option<&str>) -> RealmResult<String> {
    let d = CredentialDigest::from_names(Some(algorithm), encoding)?;
    d.digest(credentials)
}

pub fn md5_hex(value: &str) -> String { hex::encode(Md5::digest(value.as_bytes())) }

/// RFC 2617 request-digest. `qop == Some("auth")` selects the nc/cnonce form,
/// anything else the legacy `HA1:nonce:HA2` form.
pub fn http_digest_response(ha1: &str, nonce: &str, nc: &str, cnonce: &str, qop: Option<&str>, md5a2: &str) -> String {
    let value = match qop {
        Some("auth") => format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, "auth", md5a2),
        _ => format!("{}:{}:{}", ha1, nonce, md5a2),
    };
    md5_hex(&value)
}

/// LDAP `userPassword` schemes: `{SHA}`, `{SSHA}`, `{MD5}` with base64 payloads.
/// Returns `None` when `stored` carries no recognised scheme prefix.
pub fn matches_ldap_scheme(supplied: &str, stored: &str) -> Option<bool> {
    let (scheme, payload) = split_scheme(stored)?;
    let decoded = match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
        Ok(d) => d,
        Err(_) => return Some(false),
    };
    let ok = match scheme.as_str() {
        "SHA" => ct_eq(&Sha1::digest(supplied.as_bytes()), &decoded),
        "MD5" => ct_eq(&Md5::digest(supplied.as_bytes()), &decoded),
        "SSHA" => {
            if decoded.len() <= 20 { return Some(false); }
            let (hash, salt) = decoded.split_at(20);
            let mut h = Sha1::new();
            h.update(supplied.as_bytes());
            h.update(salt);
            ct_eq(&h.finalize(), hash)
        }
        _ => return None,
    };
    Some(ok)
}

fn split_scheme(stored: &str) -> Option<(String, &str)> {
    let rest = stored.strip_prefix('{')?;
    let (scheme, payload) = rest.split_once('}')?;
    Some((scheme.to_ascii_uppercase(), payload))
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool { a.len() == b.len() && bool::from(a.ct_eq(b)) }

fn hash_phc(password: &[u8]) -> RealmResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| RealmError::config(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| RealmError::config(e.to_string()))?;
    let phc = Argon2::default().hash_password(password, &salt).map_err(|e| RealmError::config(e.to_string()))?.to_string();
    Ok(phc)
}

fn verify_phc(hash: &str, password: &[u8]) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password, &parsed).is_ok()
    } else { false }
}
