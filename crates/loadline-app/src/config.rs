use std::path::PathBuf;

use anyhow::Context;

use loadline_backend::BackendConfig;
use loadline_backend::config::DEV_JWT_SECRET;
use loadline_chat::ChatConfig;
use loadline_chat::config::DEFAULT_FETCH_LIMIT;

/// Administrator account created at start-up when missing.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub session_hours: i64,
    pub fetch_limit: u32,
    pub admin: Option<AdminSeed>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let db_path = lookup("LOADLINE_DB_PATH").unwrap_or_else(|| "loadline.db".into());
        let jwt_secret = lookup("LOADLINE_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into());
        let session_hours: i64 = lookup("LOADLINE_SESSION_HOURS")
            .unwrap_or_else(|| "24".into())
            .parse()
            .context("LOADLINE_SESSION_HOURS must be a whole number of hours")?;
        if session_hours <= 0 {
            anyhow::bail!("LOADLINE_SESSION_HOURS must be positive");
        }
        let fetch_limit: u32 = match lookup("LOADLINE_FETCH_LIMIT") {
            Some(raw) => raw
                .parse()
                .context("LOADLINE_FETCH_LIMIT must be a positive integer")?,
            None => DEFAULT_FETCH_LIMIT,
        };
        if fetch_limit == 0 {
            anyhow::bail!("LOADLINE_FETCH_LIMIT must be positive");
        }

        let admin = match (lookup("LOADLINE_ADMIN_EMAIL"), lookup("LOADLINE_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                email,
                password,
                name: lookup("LOADLINE_ADMIN_NAME").unwrap_or_else(|| "Dispatch".into()),
            }),
            _ => None,
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            jwt_secret,
            session_hours,
            fetch_limit,
            admin,
        })
    }

    pub fn backend(&self) -> BackendConfig {
        BackendConfig {
            jwt_secret: self.jwt_secret.clone(),
            session_ttl: chrono::Duration::hours(self.session_hours),
        }
    }

    pub fn chat(&self) -> ChatConfig {
        ChatConfig {
            fetch_limit: self.fetch_limit,
            ..ChatConfig::default()
        }
    }
}
