use std::env;
use std::time::Duration;

use strum::{Display, EnumString};

/// Authentication mode the upgrade controller enforces at connect time
/// (§4.1). Parsed case-insensitively from `WEBSOCKETS_REST_AUTH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AuthMode {
    /// No credential check at all; `accountability` is always `null`.
    Public,
    /// `access_token` query param required at upgrade time, user must resolve.
    Strict,
    /// Socket admitted unconditionally; first frame must be `AUTH`.
    Handshake,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Secret used only by the bundled example `AuthenticationService` — the
    /// real deployment's token issuer lives outside this crate (§6).
    pub jwt_secret: String,
    /// `WEBSOCKETS_REST_PATH` — the upgrade path the gateway listens on.
    pub websockets_rest_path: String,
    /// `WEBSOCKETS_REST_AUTH` — one of public | strict | handshake.
    pub websockets_rest_auth: AuthMode,
    /// `WEBSOCKETS_REST_AUTH_TIMEOUT` as a ready-to-use [`Duration`].
    ///
    /// The source multiplies the configured seconds value by 10000 before
    /// use — an anomaly preserved verbatim per the spec's open question
    /// (§9): this is a known wart, not a bug to silently "fix" here. A
    /// config value of `5` therefore yields a 50,000 second grace window,
    /// not five seconds.
    pub websockets_rest_auth_timeout: Duration,
    pub app_env: AppEnv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let websockets_rest_auth = env::var("WEBSOCKETS_REST_AUTH")
            .unwrap_or_else(|_| "handshake".to_string())
            .to_lowercase()
            .parse::<AuthMode>()
            .map_err(|_| ConfigError::InvalidAuthMode)?;

        let auth_timeout_secs: u64 = env::var("WEBSOCKETS_REST_AUTH_TIMEOUT")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidAuthTimeout)?;

        let app_env = match env::var("APP_ENV").as_deref() {
            Ok("production") => AppEnv::Production,
            _ => AppEnv::Development,
        };

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev_secret_change_in_production".to_string()),
            websockets_rest_path: env::var("WEBSOCKETS_REST_PATH")
                .unwrap_or_else(|_| "/websocket".to_string()),
            websockets_rest_auth,
            websockets_rest_auth_timeout: Duration::from_secs(auth_timeout_secs * 10_000),
            app_env,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("WEBSOCKETS_REST_AUTH must be one of public, strict, handshake")]
    InvalidAuthMode,
    #[error("WEBSOCKETS_REST_AUTH_TIMEOUT must be an integer number of seconds")]
    InvalidAuthTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_mode_parses_case_insensitively() {
        assert_eq!("public".parse::<AuthMode>().unwrap(), AuthMode::Public);
        assert_eq!("STRICT".to_lowercase().parse::<AuthMode>().unwrap(), AuthMode::Strict);
        assert_eq!(
            "handshake".parse::<AuthMode>().unwrap(),
            AuthMode::Handshake
        );
    }

    #[test]
    fn auth_mode_rejects_unknown_value() {
        assert!("bogus".parse::<AuthMode>().is_err());
    }

    #[test]
    fn auth_timeout_is_scaled_by_ten_thousand() {
        // Documents the preserved wart from §9 — do not "fix" this without
        // a config migration, per the spec's open question.
        let scaled = Duration::from_secs(5 * 10_000);
        assert_eq!(scaled, Duration::from_secs(50_000));
    }
}
