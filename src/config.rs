use crate::balance::{DepartedPayer, EqualSplit, RecordedShare, SplitPolicy};
use std::env;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE: &str = "SplitLedger";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplitPolicyKind {
    #[default]
    Equal,
    Recorded,
}

impl SplitPolicyKind {
    pub fn into_policy(self) -> Box<dyn SplitPolicy> {
        match self {
            SplitPolicyKind::Equal => Box::new(EqualSplit),
            SplitPolicyKind::Recorded => Box::new(RecordedShare),
        }
    }
}

impl FromStr for SplitPolicyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(SplitPolicyKind::Equal),
            "recorded" => Ok(SplitPolicyKind::Recorded),
            _ => Err(()),
        }
    }
}

/// Runtime configuration, read from the environment (and a `.env` file when
/// present).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub session_secret: String,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
    pub split_policy: SplitPolicyKind,
    pub departed_payer: DepartedPayer,
    pub cors_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let non_empty = |name| lookup(name).filter(|value| !value.trim().is_empty());

        let session_secret =
            non_empty("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;

        let split_policy = match non_empty("SPLIT_POLICY") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "SPLIT_POLICY",
                value,
            })?,
            None => SplitPolicyKind::default(),
        };

        let departed_payer = match non_empty("DEPARTED_PAYER").as_deref().map(str::trim) {
            None | Some("credit") => DepartedPayer::Credit,
            Some("reject") => DepartedPayer::Reject,
            Some(value) => {
                return Err(ConfigError::Invalid {
                    name: "DEPARTED_PAYER",
                    value: value.to_string(),
                })
            }
        };

        Ok(AppConfig {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            session_secret,
            mongodb_uri: non_empty("MONGODB_URI"),
            mongodb_database: non_empty("MONGODB_DATABASE")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            split_policy,
            departed_payer,
            cors_origin: non_empty("CORS_ORIGIN"),
        })
    }
}
