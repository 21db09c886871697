//! Directory (LDAP-style) collaborator seam plus the template helpers the directory
//! realm uses to build DNs and search filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

/// Attribute values keyed by lowercase attribute id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<String, Vec<String>>);

impl Attributes {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, id: &str, value: impl Into<String>) -> Self {
        self.put(id, value);
        self
    }

    pub fn put(&mut self, id: &str, value: impl Into<String>) {
        self.0.entry(id.to_ascii_lowercase()).or_default().push(value.into());
    }

    pub fn get(&self, id: &str) -> Option<&[String]> { self.0.get(&id.to_ascii_lowercase()).map(Vec::as_slice) }

    pub fn first(&self, id: &str) -> Option<&str> { self.get(id).and_then(|v| v.first()).map(String::as_str) }

    /// Keep only the requested ids; an empty list keeps everything.
    pub fn project(&self, ids: &[&str]) -> Attributes {
        if ids.is_empty() { return self.clone(); }
        let mut out = BTreeMap::new();
        for id in ids {
            let key = id.to_ascii_lowercase();
            if let Some(v) = self.0.get(&key) { out.insert(key, v.clone()); }
        }
        Attributes(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> { self.0.iter() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub dn: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    OneLevel,
    Subtree,
}

impl SearchScope {
    pub fn from_subtree(subtree: bool) -> Self { if subtree { SearchScope::Subtree } else { SearchScope::OneLevel } }
}

/// An open directory context. Implementations own their socket; the realm owns the context.
pub trait DirContext: Send {
    /// `Ok(None)` when the entry exists but holds none of the requested attributes.
    fn get_attributes(&mut self, dn: &str, attr_ids: &[&str]) -> Result<Option<Attributes>, DirectoryError>;

    fn search(&mut self, base: &str, filter: &str, scope: SearchScope, attr_ids: &[&str]) -> Result<Vec<SearchResult>, DirectoryError>;

    /// Swap the security identity of this context and authenticate with it.
    /// `None` means anonymous. An invalid identity yields `DirectoryError::Authentication`.
    fn bind(&mut self, principal: Option<&str>, credentials: Option<&str>) -> Result<(), DirectoryError>;

    fn close(&mut self) {}
}

/// Connection environment handed to a context factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEnvironment {
    pub provider_url: String,
    pub connection_name: Option<String>,
    pub connection_password: Option<String>,
    pub authentication: Option<String>,
    pub protocol: Option<String>,
    pub referrals: Option<String>,
}

pub trait DirContextFactory: Send + Sync {
    fn connect(&self, env: &DirectoryEnvironment) -> Result<Box<dyn DirContext>, DirectoryError>;
}

/// Substitute `{0}`, `{1}`, ... in one left-to-right pass; substituted text is never
/// rescanned. Placeholders without a matching argument stay as written.
pub fn format_template(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let arg = tail
            .find('}')
            .and_then(|close| tail[..close].parse::<usize>().ok().map(|i| (i, close)))
            .and_then(|(i, close)| args.get(i).map(|a| (*a, close)));
        match arg {
            Some((a, close)) => {
                out.push_str(a);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// RFC 4515 filter value escaping.
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

/// RFC 4514 attribute value escaping for DN construction.
pub fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => { out.push('\\'); out.push(c); }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

/// Split `(p1)(p2)` into alternatives; a string without a leading `(` is one pattern.
pub fn parse_user_patterns(text: &str) -> Result<Vec<String>, String> {
    let text = text.trim();
    if text.is_empty() { return Ok(Vec::new()); }
    if !text.starts_with('(') { return Ok(vec![text.to_string()]); }
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in text.chars() {
        match c {
            '(' => {
                if depth > 0 { cur.push(c); }
                depth += 1;
            }
            ')' => {
                if depth == 0 { return Err(format!("unbalanced ')' in user pattern '{}'", text)); }
                depth -= 1;
                if depth == 0 {
                    out.push(std::mem::take(&mut cur));
                } else {
                    cur.push(c);
                }
            }
            _ if depth == 0 => {
                if !c.is_whitespace() { return Err(format!("text outside parentheses in user pattern '{}'", text)); }
            }
            _ => cur.push(c),
        }
    }
    if depth != 0 { return Err(format!("unbalanced '(' in user pattern '{}'", text)); }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_ids_are_case_insensitive() {
        let a = Attributes::new().with("userPassword", "x").with("memberOf", "a").with("MEMBEROF", "b");
        assert_eq!(a.first("USERPASSWORD"), Some("x"));
        assert_eq!(a.get("memberof").unwrap().len(), 2);
        let p = a.project(&["memberOf"]);
        assert!(p.get("userPassword").is_none());
        assert_eq!(p.get("memberOf").unwrap(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn template_substitution() {
        assert_eq!(format_template("(&(member={0})(uid={1}))", &["uid=a,o=x", "a"]), "(&(member=uid=a,o=x)(uid=a))");
        assert_eq!(format_template("uid={0},ou=people", &["bob"]), "uid=bob,ou=people");
        assert_eq!(format_template("{2}{x}{", &["a"]), "{2}{x}{");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        assert_eq!(
            format_template("(&(member={0})(uid={1}))", &["uid=a{1},ou=people", "a{1}"]),
            "(&(member=uid=a{1},ou=people)(uid=a{1}))"
        );
        assert_eq!(format_template("{1}/{0}", &["{1}", "{0}"]), "{0}/{1}");
    }

    #[test]
    fn filter_escaping() {
        assert_eq!(escape_filter_value("a*)(uid=*"), "a\\2a\\29\\28uid=\\2a");
        assert_eq!(escape_filter_value("back\\slash"), "back\\5cslash");
    }

    #[test]
    fn dn_escaping() {
        assert_eq!(escape_dn_value("Smith, John"), "Smith\\, John");
        assert_eq!(escape_dn_value("#lead"), "\\#lead");
        assert_eq!(escape_dn_value(" pad "), "\\ pad\\ ");
    }

    #[test]
    fn user_pattern_alternatives() {
        assert_eq!(parse_user_patterns("uid={0},ou=people").unwrap(), vec!["uid={0},ou=people"]);
        assert_eq!(
            parse_user_patterns("(uid={0},ou=a)(cn={0},ou=b)").unwrap(),
            vec!["uid={0},ou=a".to_string(), "cn={0},ou=b".to_string()]
        );
        assert!(parse_user_patterns("(uid={0}").is_err());
        assert!(parse_user_patterns("(a)x(b)").is_err());
        assert!(parse_user_patterns("").unwrap().is_empty());
    }
}
