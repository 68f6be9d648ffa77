//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `LOOPAUTH_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `LOOPAUTH_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `LOOPAUTH_AUTH__ACCESS_TOKEN_TTL=12h` sets the `auth.access_token_ttl` field.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "LOOPAUTH_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL where the club dashboard is accessible (e.g., "https://admin.finiteloop.club").
    /// Used to build email-verification and password-reset links.
    pub dashboard_url: String,
    /// Database connection URL override (DATABASE_URL environment variable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Master secret for token signing (required). Purpose-specific signing secrets
    /// are derived from this value; see `auth::tokens`.
    pub secret_key: Option<String>,
    /// Authentication configuration (token lifetimes, password rules, session cookie)
    pub auth: AuthConfig,
    /// Email configuration for verification and password-reset messages
    pub email: EmailConfig,
    /// Maintenance sweeper configuration
    pub sweeper: SweeperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            dashboard_url: "http://localhost:3000".to_string(),
            database_url: None,
            database: DatabaseConfig::default(),
            secret_key: None,
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Timeout to acquire a connection from the pool
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/loopauth".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Authentication configuration: token lifetimes, password rules, session cookie.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Access token lifetime (self-contained, no server-side record)
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,
    /// Refresh token lifetime. Long-lived by design; the whitelist record is
    /// what actually bounds a session's life.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
    /// Email-verification and password-reset token lifetime
    #[serde(with = "humantime_serde")]
    pub verification_token_ttl: Duration,
    /// Password validation rules
    pub password: PasswordConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_token_ttl: Duration::from_secs(1096 * 24 * 60 * 60),
            verification_token_ttl: Duration::from_secs(24 * 60 * 60),
            password: PasswordConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Password validation rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    /// Minimum password length
    pub min_length: usize,
    /// Maximum password length
    pub max_length: usize,
    /// Argon2 memory cost in KiB (default: 19456 KiB = 19 MB, secure for production)
    pub argon2_memory_kib: u32,
    /// Argon2 iterations (default: 2, secure for production)
    pub argon2_iterations: u32,
    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            argon2_memory_kib: 19456,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Cookie name for the session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "loopauth_session".to_string(),
            cookie_secure: true,
            cookie_same_site: "Strict".to_string(),
        }
    }
}

/// Email configuration for verification and password-reset messages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// Note: Cannot use deny_unknown_fields here due to #[serde(flatten)] on transport
pub struct EmailConfig {
    /// Email transport method
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::File {
                path: "./emails".to_string(),
            },
            from_email: "noreply@finiteloop.club".to_string(),
            from_name: "Finite Loop Club".to_string(),
        }
    }
}

/// Email transport configuration - either SMTP or file-based for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Send emails via SMTP server
    Smtp {
        /// SMTP server hostname
        host: String,
        /// SMTP server port
        port: u16,
        /// SMTP authentication username
        username: String,
        /// SMTP authentication password
        password: String,
        /// Use TLS encryption
        use_tls: bool,
    },
    /// Write emails to files (for development/testing)
    File {
        /// Directory path where email files will be written
        path: String,
    },
}

/// Maintenance sweeper configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperConfig {
    /// Enable the periodic sweep of revoked and stale token records
    pub enabled: bool,
    /// How often the sweep runs
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Age past which never-redeemed verification tokens are purged.
    /// Kept 1h beyond the signed token's own expiry so the sweep never
    /// races a token that is about to expire.
    #[serde(with = "humantime_serde")]
    pub verification_max_age: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(12 * 60 * 60),
            verification_max_age: Duration::from_secs(25 * 60 * 60),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // if database_url is set, use it (preserving existing pool settings)
        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("LOOPAUTH_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database_url".into()))
    }

    /// Address the HTTP server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Internal {
                operation: "Config validation: secret_key is not configured. \
                     Please set LOOPAUTH_SECRET_KEY environment variable or add secret_key to the config file."
                    .to_string(),
            });
        }

        if self.auth.password.min_length > self.auth.password.max_length {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: Invalid password configuration: min_length ({}) cannot be greater than max_length ({})",
                    self.auth.password.min_length, self.auth.password.max_length
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_token_lifetimes() {
        let config = Config::default();
        assert_eq!(config.auth.access_token_ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.auth.refresh_token_ttl, Duration::from_secs(1096 * 24 * 60 * 60));
        assert_eq!(config.auth.verification_token_ttl, Duration::from_secs(24 * 60 * 60));
        // The sweep window must exceed the verification token lifetime
        assert!(config.sweeper.verification_max_age > config.auth.verification_token_ttl);
    }

    #[test]
    fn validate_requires_secret_key() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let config = Config {
            secret_key: Some("test-secret".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_yaml_and_database_url_wins() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
host: "127.0.0.1"
port: 8080
secret_key: "file-secret"
database:
  url: "postgresql://localhost/from_file"
  max_connections: 5
"#,
            )?;
            jail.set_env("LOOPAUTH_PORT", "9999");
            jail.set_env("LOOPAUTH_AUTH__ACCESS_TOKEN_TTL", "12h");
            jail.set_env("DATABASE_URL", "postgresql://db.internal/loopauth");

            let args = Args {
                config: "config.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args)?;

            // env beats yaml, nested fields split on __
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9999);
            assert_eq!(config.auth.access_token_ttl, Duration::from_secs(12 * 60 * 60));

            // DATABASE_URL replaces the url but keeps the pool settings
            assert_eq!(config.database.url, "postgresql://db.internal/loopauth");
            assert_eq!(config.database.max_connections, 5);
            assert!(config.database_url.is_none());

            Ok(())
        });
    }

    #[test]
    fn validate_rejects_inverted_password_lengths() {
        let mut config = Config {
            secret_key: Some("test-secret".to_string()),
            ..Config::default()
        };
        config.auth.password.min_length = 100;
        config.auth.password.max_length = 10;
        assert!(config.validate().is_err());
    }
}
