use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
}

impl Config {
    /// Read `HEARTLINE_*` variables. `.env` is loaded by the caller first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("HEARTLINE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("HEARTLINE_JWT_SECRET is unset or still a placeholder");
        }

        let db_path = var("HEARTLINE_DB_PATH").unwrap_or_else(|| "heartline.db".into());
        let host = var("HEARTLINE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("HEARTLINE_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("HEARTLINE_PORT must be a port number")?;

        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("HEARTLINE_JWT_SECRET", "dev-secret-change-me")])).is_err());
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("HEARTLINE_JWT_SECRET", "k3y-for-tests")])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("heartline.db"));
        assert_eq!(config.addr.port(), 3000);
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = Config::from_lookup(lookup(&[
            ("HEARTLINE_JWT_SECRET", "k3y-for-tests"),
            ("HEARTLINE_PORT", "eighty"),
        ]));
        assert!(result.is_err());
    }
}
