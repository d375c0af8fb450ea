use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("BOTDESK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("BOTDESK_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = match var("BOTDESK_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("BOTDESK_PORT '{}' is not a port number", port))?,
            None => 3000,
        };

        Ok(Self {
            host: var("BOTDESK_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("BOTDESK_DB_PATH").unwrap_or_else(|| "botdesk.db".into()).into(),
            storage_dir: var("BOTDESK_STORAGE_DIR")
                .unwrap_or_else(|| "./storage/private".into())
                .into(),
            jwt_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("BOTDESK_JWT_SECRET", "s3cr3t")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("botdesk.db"));
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("BOTDESK_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_port() {
        let err = config(&[("BOTDESK_JWT_SECRET", "s3cr3t"), ("BOTDESK_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("BOTDESK_PORT"));
    }
}
