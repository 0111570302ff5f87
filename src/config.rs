use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::HeaderValue;
use clap::{Parser, ValueEnum};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server configuration. Every flag can also come from the environment or a
/// `.env` file (loaded before parsing).
#[derive(Parser, Debug, Clone)]
#[command(name = "jobs_crm")]
#[command(about = "Jobs and customer-relationship REST backend", long_about = None)]
pub struct Config {
    /// Directory of the Sled database
    #[arg(long, env = "DATABASE_PATH", default_value = "jobs_data")]
    pub database_path: PathBuf,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "PORT", default_value_t = 5500)]
    pub port: u16,

    /// Origins allowed by CORS, comma separated
    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:5173,http://localhost:5501"
    )]
    pub cors_origins: Vec<String>,

    /// HS256 secret used to sign session tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Session token lifetime in seconds
    #[arg(long, env = "TOKEN_TTL_SECS", default_value_t = 3600)]
    pub token_ttl_secs: u64,

    #[arg(long, env = "APP_ENV", value_enum, default_value = "development")]
    pub app_env: AppEnv,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Also write daily-rotated log files into this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Admin account created when the users collection is empty
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl Config {
    /// Load `.env` (if present) and parse flags and environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid listen address: {}", e)))
    }

    pub fn is_development(&self) -> bool {
        self.app_env == AppEnv::Development
    }

    pub fn cors_header_values(&self) -> Result<Vec<HeaderValue>, AppError> {
        self.cors_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| AppError::Config(format!("invalid CORS origin '{}'", origin)))
            })
            .collect()
    }

    /// Admin credentials for first start, when both are set.
    pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_origin_list() {
        let config = Config::try_parse_from([
            "jobs_crm",
            "--jwt-secret",
            "s3cret",
            "--cors-origins",
            "http://localhost:5173, https://crm.example.com",
        ])
        .unwrap();

        assert_eq!(config.port, 5500);
        assert!(config.is_development());
        assert_eq!(config.token_ttl_secs, 3600);
        let origins = config.cors_header_values().unwrap();
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1], "https://crm.example.com");
        assert!(config.bootstrap_admin().is_none());
    }

    #[test]
    fn test_production_and_bootstrap() {
        let config = Config::try_parse_from([
            "jobs_crm",
            "--jwt-secret",
            "s3cret",
            "--app-env",
            "production",
            "--admin-email",
            "root@example.com",
            "--admin-password",
            "pw",
            "--port",
            "8080",
        ])
        .unwrap();

        assert!(!config.is_development());
        assert_eq!(config.bootstrap_admin(), Some(("root@example.com", "pw")));
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_bad_address_and_origin_are_config_errors() {
        let config = Config::try_parse_from([
            "jobs_crm",
            "--jwt-secret",
            "s3cret",
            "--host",
            "not a host",
            "--cors-origins",
            "http://ok.example.com,bad\norigin",
        ])
        .unwrap();

        assert!(matches!(config.socket_addr(), Err(AppError::Config(_))));
        assert!(matches!(config.cors_header_values(), Err(AppError::Config(_))));
    }
}
