//!
//! realm_digest
//! ------------
//! Digests credentials the way a realm configured with the same algorithm and
//! encoding would store them. Prints `credential:digest` per argument.

use std::env;

use anyhow::{Context, Result};

use realmgate::digest::digest;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} -a <algorithm> [-e <encoding>] <credential> [<credential> ...]\n\nFlags:\n  -a, --algorithm <name>   MD5, SHA (SHA-1), SHA-256, SHA-384, SHA-512 or ARGON2\n  -e, --encoding <name>    utf-8 (default) or iso-8859-1\n  -h, --help               Show this help\n\nExamples:\n  {program} -a MD5 secret\n  {program} -a SHA-256 -e iso-8859-1 secret other"
    );
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut algorithm: Option<String> = None;
    let mut encoding: Option<String> = None;
    let mut credentials: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-a" | "--algorithm" => {
                if i + 1 >= args.len() { eprintln!("{} requires a value", args[i]); print_usage(&program); std::process::exit(2); }
                algorithm = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "-e" | "--encoding" => {
                if i + 1 >= args.len() { eprintln!("{} requires a value", args[i]); print_usage(&program); std::process::exit(2); }
                encoding = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            other => {
                credentials.push(other.to_string());
                i += 1;
            }
        }
    }

    let Some(algorithm) = algorithm else {
        eprintln!("an algorithm is required");
        print_usage(&program);
        std::process::exit(2);
    };
    if credentials.is_empty() {
        print_usage(&program);
        std::process::exit(2);
    }

    for cred in &credentials {
        let d = digest(cred, &algorithm, encoding.as_deref()).with_context(|| format!("digesting with {}", algorithm))?;
        println!("{}:{}", cred, d);
    }
    Ok(())
}
