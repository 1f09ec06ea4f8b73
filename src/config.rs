// src/config.rs

//! Runtime configuration for the database and object-storage tools.
//!
//! Every value is resolved exactly once at startup with the precedence
//! explicit argument > environment variable > hard default, and the resulting
//! struct is passed down explicitly. The environment is read through a lookup
//! closure so resolution can be exercised without touching the process env.

use std::fmt;
use thiserror::Error;

pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const DEFAULT_DB_PORT: u16 = 5432;

pub const ENV_AWS_KEY_ID: &str = "AWS_KEY_ID";
pub const ENV_AWS_SECRET_KEY: &str = "AWS_SECRET_KEY";
pub const ENV_AWS_REGION: &str = "AWS_REGION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing `{flag}`: pass it explicitly or set the {env} environment variable")]
    Missing { flag: &'static str, env: &'static str },

    #[error("invalid value `{value}` for {env}: {reason}")]
    Invalid {
        env: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Argument(String),
}

/// Production environment lookup.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn pick<F>(explicit: Option<String>, env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .filter(|v| !v.is_empty())
        .or_else(|| env(key).filter(|v| !v.is_empty()))
}

fn require<F>(
    explicit: Option<String>,
    env: &F,
    flag: &'static str,
    key: &'static str,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    pick(explicit, env, key).ok_or(ConfigError::Missing { flag, env: key })
}

/// Values a caller may pass explicitly for a PostgreSQL connection.
#[derive(Debug, Default, Clone)]
pub struct DbArgs {
    pub database: String,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub database: String,
    pub host: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl DbConfig {
    /// Resolve against the real process environment.
    pub fn from_args(args: DbArgs) -> Result<Self, ConfigError> {
        Self::resolve(args, process_env)
    }

    pub fn resolve<F>(args: DbArgs, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if args.database.is_empty() {
            return Err(ConfigError::Argument("database name is empty".into()));
        }
        let host = require(args.host, &env, "--host", ENV_DB_HOST)?;
        let user = require(args.user, &env, "--user", ENV_DB_USER)?;
        let password = require(args.password, &env, "--password", ENV_DB_PASSWORD)?;

        let port = match args.port {
            Some(p) => p,
            None => match env(ENV_DB_PORT).filter(|v| !v.is_empty()) {
                Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                    env: ENV_DB_PORT,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?,
                None => DEFAULT_DB_PORT,
            },
        };

        Ok(Self {
            database: args.database,
            host,
            user,
            password,
            port,
        })
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct AwsArgs {
    pub key_id: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AwsConfig {
    pub key_id: String,
    pub secret_key: String,
    pub region: String,
}

impl AwsConfig {
    pub fn from_args(args: AwsArgs) -> Result<Self, ConfigError> {
        Self::resolve(args, process_env)
    }

    pub fn resolve<F>(args: AwsArgs, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            key_id: require(args.key_id, &env, "--key-id", ENV_AWS_KEY_ID)?,
            secret_key: require(args.secret_key, &env, "--secret-key", ENV_AWS_SECRET_KEY)?,
            region: require(args.region, &env, "--region", ENV_AWS_REGION)?,
        })
    }
}

impl fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsConfig")
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}
