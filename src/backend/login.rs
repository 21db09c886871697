//! Pluggable login-module chain: callbacks, control flags, configuration and the
//! login context that runs a named chain and returns the authenticated subject.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::LoginError;

/// A security principal as produced by a login module. `type_name` is the fully
/// qualified identity class the realm classifies on (user class vs role class).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityPrincipal {
    pub type_name: String,
    pub name: String,
}

impl SecurityPrincipal {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), name: name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub principals: Vec<SecurityPrincipal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Name { prompt: String, value: Option<String> },
    Password { prompt: String, value: Option<String> },
    TextOutput(String),
}

pub trait CallbackHandler: Send + Sync {
    fn handle(&self, callbacks: &mut [Callback]) -> Result<(), LoginError>;
}

pub type ModuleOptions = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(Vec<SecurityPrincipal>),
    /// The module does not apply to this login and must not count either way.
    Ignored,
}

pub trait LoginModule: Send + Sync {
    fn login(&self, handler: &dyn CallbackHandler, options: &ModuleOptions) -> Result<LoginOutcome, LoginError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    Required,
    Requisite,
    Sufficient,
    Optional,
}

impl ControlFlag {
    pub fn parse(s: &str) -> Result<Self, LoginError> {
        match s.to_ascii_lowercase().as_str() {
            "required" => Ok(ControlFlag::Required),
            "requisite" => Ok(ControlFlag::Requisite),
            "sufficient" => Ok(ControlFlag::Sufficient),
            "optional" => Ok(ControlFlag::Optional),
            other => Err(LoginError::Config(format!("unknown control flag '{}'", other))),
        }
    }
}

#[derive(Clone)]
pub struct LoginModuleEntry {
    pub name: String,
    pub module: Arc<dyn LoginModule>,
    pub flag: ControlFlag,
    pub options: ModuleOptions,
}

impl fmt::Debug for LoginModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginModuleEntry").field("name", &self.name).field("flag", &self.flag).field("options", &self.options).finish()
    }
}

/// Named login modules available to configuration text.
#[derive(Default, Clone)]
pub struct LoginModuleRegistry {
    modules: BTreeMap<String, Arc<dyn LoginModule>>,
}

impl LoginModuleRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn LoginModule>) {
        self.modules.insert(name.into(), module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LoginModule>> { self.modules.get(name).cloned() }
}

/// Application name -> ordered module chain.
#[derive(Debug, Default, Clone)]
pub struct LoginConfiguration {
    apps: BTreeMap<String, Vec<LoginModuleEntry>>,
}

impl LoginConfiguration {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, app: &str, name: &str, module: Arc<dyn LoginModule>, flag: ControlFlag, options: ModuleOptions) {
        self.apps.entry(app.to_string()).or_default().push(LoginModuleEntry { name: name.to_string(), module, flag, options });
    }

    pub fn entries(&self, app: &str) -> Option<&[LoginModuleEntry]> { self.apps.get(app).map(Vec::as_slice) }

    pub fn contains(&self, app: &str) -> bool { self.apps.contains_key(app) }

    /// Parse `App { module.name flag key=value ...; ... };` blocks.
    pub fn parse(text: &str, registry: &LoginModuleRegistry) -> Result<Self, LoginError> {
        let tokens = tokenize(text)?;
        let mut cfg = LoginConfiguration::new();
        let mut it = tokens.into_iter().peekable();
        while let Some(tok) = it.next() {
            let Token::Word(app) = tok else { return Err(syntax("expected application name")); };
            expect_token(&mut it, Token::Open)?;
            cfg.apps.entry(app.clone()).or_default();
            loop {
                match it.next() {
                    Some(Token::Close) => break,
                    Some(Token::Word(module_name)) => {
                        let Some(Token::Word(flag)) = it.next() else { return Err(syntax("expected control flag")); };
                        let flag = ControlFlag::parse(&flag)?;
                        let mut options = ModuleOptions::new();
                        loop {
                            match it.next() {
                                Some(Token::Semi) => break,
                                Some(Token::Word(key)) => {
                                    expect_token(&mut it, Token::Eq)?;
                                    match it.next() {
                                        Some(Token::Word(v)) | Some(Token::Quoted(v)) => { options.insert(key, v); }
                                        _ => return Err(syntax("expected option value")),
                                    }
                                }
                                _ => return Err(syntax("expected option or ';'")),
                            }
                        }
                        let module = registry
                            .get(&module_name)
                            .ok_or_else(|| LoginError::Config(format!("unknown login module '{}'", module_name)))?;
                        cfg.add(&app, &module_name, module, flag, options);
                    }
                    _ => return Err(syntax("expected login module or '}'")),
                }
            }
            if it.peek() == Some(&Token::Semi) { it.next(); }
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Semi,
    Eq,
}

fn syntax(msg: &str) -> LoginError { LoginError::Config(format!("login configuration syntax: {}", msg)) }

fn expect_token(it: &mut impl Iterator<Item = Token>, want: Token) -> Result<(), LoginError> {
    match it.next() {
        Some(t) if t == want => Ok(()),
        other => Err(syntax(&format!("expected {:?}, found {:?}", want, other))),
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, LoginError> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '#' => { for c in chars.by_ref() { if c == '\n' { break; } } }
            '/' if chars.peek() == Some(&'/') => { for c in chars.by_ref() { if c == '\n' { break; } } }
            '{' => out.push(Token::Open),
            '}' => out.push(Token::Close),
            ';' => out.push(Token::Semi),
            '=' => out.push(Token::Eq),
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err(syntax("unterminated string")),
                    }
                }
                out.push(Token::Quoted(s));
            }
            _ => {
                let mut s = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n.is_whitespace() || matches!(n, '{' | '}' | ';' | '=' | '"') { break; }
                    s.push(n);
                    chars.next();
                }
                out.push(Token::Word(s));
            }
        }
    }
    Ok(out)
}

/// Runs the chain configured for one application name.
pub struct LoginContext<'a> {
    app: String,
    entries: &'a [LoginModuleEntry],
    handler: &'a dyn CallbackHandler,
}

impl<'a> LoginContext<'a> {
    pub fn new(app: &str, config: &'a LoginConfiguration, handler: &'a dyn CallbackHandler) -> Result<Self, LoginError> {
        let entries = config
            .entries(app)
            .ok_or_else(|| LoginError::Config(format!("no login configuration for '{}'", app)))?;
        Ok(Self { app: app.to_string(), entries, handler })
    }

    /// Required/requisite modules must all succeed; with none configured, at least one
    /// sufficient/optional module must. A requisite failure stops the chain at once,
    /// a sufficient success stops it when nothing required has failed so far.
    pub fn login(&self) -> Result<Subject, LoginError> {
        let mut subject = Subject::default();
        let mut required_error: Option<LoginError> = None;
        let mut first_error: Option<LoginError> = None;
        let mut any_success = false;

        for entry in self.entries {
            match entry.module.login(self.handler, &entry.options) {
                Ok(LoginOutcome::Authenticated(principals)) => {
                    any_success = true;
                    subject.principals.extend(principals);
                    if entry.flag == ControlFlag::Sufficient && required_error.is_none() {
                        break;
                    }
                }
                Ok(LoginOutcome::Ignored) => {}
                Err(e) => {
                    tracing::debug!(target: "realmgate::login", app = %self.app, module = %entry.name, "login module failed: {}", e);
                    match entry.flag {
                        ControlFlag::Requisite => {
                            return Err(required_error.unwrap_or(e));
                        }
                        ControlFlag::Required => {
                            if required_error.is_none() { required_error = Some(e); }
                        }
                        ControlFlag::Sufficient | ControlFlag::Optional => {
                            if first_error.is_none() { first_error = Some(e); }
                        }
                    }
                }
            }
        }

        if let Some(e) = required_error { return Err(e); }
        if !any_success {
            return Err(first_error.unwrap_or_else(|| LoginError::FailedLogin(format!("all login modules ignored for '{}'", self.app))));
        }
        Ok(subject)
    }
}
