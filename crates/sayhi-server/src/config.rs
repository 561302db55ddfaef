use std::path::PathBuf;

use anyhow::{Context, Result};

/// Server settings, read from `SAYHI_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Secret for message text at rest; normalized to a 32-byte key
    pub encryption_key: String,
    pub upload_dir: PathBuf,
    /// Prefix for media URLs handed to clients, e.g. `https://chat.example.com`
    pub public_url: String,
    /// When set, CORS only admits this origin (with credentials)
    pub client_origin: Option<String>,
    /// Send the session cookie with `Secure`; turn on behind HTTPS
    pub secure_cookies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: "sayhi.db".into(),
            jwt_secret: "dev-secret-change-me".into(),
            encryption_key: "your-default-secret-key-change-this-in-env".into(),
            upload_dir: "./uploads".into(),
            public_url: String::new(),
            client_origin: None,
            secure_cookies: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match std::env::var("SAYHI_PORT") {
            Ok(raw) => raw.parse().with_context(|| format!("SAYHI_PORT is not a port: {}", raw))?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            host: env_or("SAYHI_HOST", defaults.host),
            port,
            db_path: env_or("SAYHI_DB_PATH", defaults.db_path.display().to_string()).into(),
            jwt_secret: env_or("SAYHI_JWT_SECRET", defaults.jwt_secret),
            encryption_key: env_or("SAYHI_ENCRYPTION_KEY", defaults.encryption_key),
            upload_dir: env_or("SAYHI_UPLOAD_DIR", defaults.upload_dir.display().to_string()).into(),
            public_url: env_or("SAYHI_PUBLIC_URL", defaults.public_url),
            client_origin: std::env::var("SAYHI_CLIENT_ORIGIN").ok().filter(|o| !o.is_empty()),
            secure_cookies: match std::env::var("SAYHI_SECURE_COOKIES") {
                Ok(raw) => parse_flag(&raw)
                    .with_context(|| format!("SAYHI_SECURE_COOKIES is not a boolean: {}", raw))?,
                Err(_) => defaults.secure_cookies,
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}
