use crate::error::{AdapterError, AdapterResult};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;

pub const DEFAULT_DRIVER: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "casbin";
pub const DEFAULT_TABLE_NAME: &str = "policy";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

const SUPPORTED_DRIVERS: [&str; 2] = ["postgres", "postgresql"];
const MAX_IDENTIFIER_LEN: usize = 63;

// Adapter configuration sourced from code, environment variables or a YAML override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub driver: String,
    pub url: String,
    /// When false the adapter creates `database_name` and connects to it.
    pub database_specified: bool,
    pub database_name: String,
    pub table_name: String,
    pub connect_timeout_ms: u64,
    pub statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlagValue {
    One(bool),
    Many(Vec<bool>),
}

#[derive(Debug, Deserialize)]
struct AdapterConfigOverride {
    driver: Option<String>,
    url: Option<String>,
    database_specified: Option<FlagValue>,
    database_name: Option<String>,
    table_name: Option<String>,
    connect_timeout_ms: Option<u64>,
    statement_timeout_ms: Option<u64>,
}

impl AdapterConfig {
    pub fn new(driver: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            url: url.into(),
            database_specified: false,
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            statement_timeout_ms: None,
        }
    }

    pub fn with_database_specified(mut self, specified: bool) -> Self {
        self.database_specified = specified;
        self
    }

    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_statement_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.statement_timeout_ms = timeout_ms;
        self
    }

    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup (the process env in production).
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let driver = lookup("CASBIN_PG_DRIVER").unwrap_or_else(|| DEFAULT_DRIVER.to_string());
        let url = lookup("CASBIN_PG_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .context("CASBIN_PG_URL or DATABASE_URL must be set")?;
        let mut config = Self::new(driver, url);
        if let Some(value) = lookup("CASBIN_PG_DATABASE_SPECIFIED") {
            config.database_specified = parse_database_specified(&value)
                .with_context(|| "parse CASBIN_PG_DATABASE_SPECIFIED")?;
        }
        if let Some(value) = lookup("CASBIN_PG_DATABASE") {
            config.database_name = value;
        }
        if let Some(value) = lookup("CASBIN_PG_TABLE") {
            config.table_name = value;
        }
        if let Some(value) = lookup("CASBIN_PG_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = value
                .parse()
                .with_context(|| "parse CASBIN_PG_CONNECT_TIMEOUT_MS")?;
        }
        if let Some(value) = lookup("CASBIN_PG_STATEMENT_TIMEOUT_MS") {
            config.statement_timeout_ms = Some(
                value
                    .parse()
                    .with_context(|| "parse CASBIN_PG_STATEMENT_TIMEOUT_MS")?,
            );
        }
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("CASBIN_PG_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read CASBIN_PG_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    /// Overlay the fields present in a YAML document onto this config.
    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: AdapterConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse adapter config yaml")?;
        if let Some(value) = override_cfg.driver {
            self.driver = value;
        }
        if let Some(value) = override_cfg.url {
            self.url = value;
        }
        if let Some(value) = override_cfg.database_specified {
            self.database_specified = match value {
                FlagValue::One(flag) => flag,
                FlagValue::Many(flags) => single_flag(&flags)?,
            };
        }
        if let Some(value) = override_cfg.database_name {
            self.database_name = value;
        }
        if let Some(value) = override_cfg.table_name {
            self.table_name = value;
        }
        if let Some(value) = override_cfg.connect_timeout_ms {
            self.connect_timeout_ms = value;
        }
        if let Some(value) = override_cfg.statement_timeout_ms {
            self.statement_timeout_ms = Some(value);
        }
        Ok(())
    }

    /// Reject configurations the adapter cannot act on.
    ///
    /// Database and table names end up inside DDL/DML text, so they are held to
    /// plain lowercase identifiers.
    pub fn validate(&self) -> AdapterResult<()> {
        if !SUPPORTED_DRIVERS.contains(&self.driver.as_str()) {
            return Err(AdapterError::Config(format!(
                "unsupported driver {:?} (expected one of {:?})",
                self.driver, SUPPORTED_DRIVERS
            )));
        }
        if self.url.trim().is_empty() {
            return Err(AdapterError::Config("data source url is empty".to_string()));
        }
        validate_identifier("table_name", &self.table_name)?;
        if !self.database_specified {
            validate_identifier("database_name", &self.database_name)?;
        }
        if self.connect_timeout_ms == 0 {
            return Err(AdapterError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse the "database already specified" flag; more than one value is an error.
pub fn parse_database_specified(value: &str) -> Result<bool> {
    let flags = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<bool>()
                .with_context(|| format!("invalid boolean {part:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    single_flag(&flags)
}

fn single_flag(flags: &[bool]) -> Result<bool> {
    match flags {
        [] => Ok(false),
        [flag] => Ok(*flag),
        _ => bail!("invalid parameter: database_specified accepts at most one value"),
    }
}

fn validate_identifier(field: &str, name: &str) -> AdapterResult<()> {
    let mut chars = name.chars();
    let leading_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !leading_ok || !rest_ok || name.len() > MAX_IDENTIFIER_LEN {
        return Err(AdapterError::Config(format!(
            "{field} {name:?} must match [a-z_][a-z0-9_]* and be at most {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    Ok(())
}
