use chrono::Duration;

/// Secret shipped for local development only.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// HMAC secret used to sign session access tokens.
    pub jwt_secret: String,
    /// Lifetime of a session issued at sign-in.
    pub session_ttl: Duration,
}

impl BackendConfig {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            session_ttl: Duration::hours(24),
        }
    }
}
