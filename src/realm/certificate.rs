//! Client certificate chain checks and subject-to-username mapping.

use regex::Regex;
use x509_parser::certificate::X509Certificate;
use x509_parser::time::ASN1Time;

use crate::config::X509UsernameConfig;
use crate::error::{RealmError, RealmResult};

#[derive(Debug, Clone)]
pub enum X509UsernameMapper {
    SubjectDn,
    CommonName,
    /// First capture group of the regex applied to the subject DN.
    Pattern(Regex),
}

impl X509UsernameMapper {
    pub fn from_config(cfg: &X509UsernameConfig) -> RealmResult<Self> {
        match cfg {
            X509UsernameConfig::SubjectDn => Ok(X509UsernameMapper::SubjectDn),
            X509UsernameConfig::CommonName => Ok(X509UsernameMapper::CommonName),
            X509UsernameConfig::Pattern { regex } => {
                let rx = Regex::new(regex).map_err(|e| RealmError::config(format!("invalid x509 username pattern '{}': {}", regex, e)))?;
                if rx.captures_len() < 2 {
                    return Err(RealmError::config(format!("x509 username pattern '{}' needs a capture group", regex)));
                }
                Ok(X509UsernameMapper::Pattern(rx))
            }
        }
    }

    pub fn username(&self, cert: &X509Certificate<'_>) -> Option<String> {
        let dn = cert.subject().to_string();
        match self {
            X509UsernameMapper::SubjectDn => Some(dn),
            X509UsernameMapper::CommonName => cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_string),
            X509UsernameMapper::Pattern(rx) => rx.captures(&dn).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()),
        }
    }
}

impl Default for X509UsernameMapper {
    fn default() -> Self { X509UsernameMapper::SubjectDn }
}

/// Parse a DER chain. Any undecodable certificate fails the whole chain.
pub fn parse_chain<'a>(chain: &[&'a [u8]]) -> Option<Vec<X509Certificate<'a>>> {
    let mut out = Vec::with_capacity(chain.len());
    for &der in chain {
        match x509_parser::parse_x509_certificate(der) {
            Ok((_, cert)) => out.push(cert),
            Err(e) => {
                tracing::debug!(target: "realmgate::realm", "certificate parse failed: {}", e);
                return None;
            }
        }
    }
    Some(out)
}

/// True only when every certificate is inside its validity window at `now` (unix seconds).
pub fn chain_valid_at(certs: &[X509Certificate<'_>], now: i64) -> bool {
    let Ok(at) = ASN1Time::from_timestamp(now) else { return false; };
    certs.iter().all(|c| {
        let ok = c.validity().is_valid_at(at);
        if !ok {
            tracing::debug!(target: "realmgate::realm", subject = %c.subject(), "certificate outside validity window");
        }
        ok
    })
}
