//! Optional start-run settings and their string normalization.
//!
//! Every field of [`RunOptions`] is optional and skipped during
//! serialization when unset, so the remote service's own defaults apply to
//! anything the caller did not ask for explicitly.

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Raised when a run option value is not one of its accepted spellings.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum OptionParseError {
    #[error("invalid {option} '{value}'; expected one of: {expected}")]
    Invalid {
        option: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl OptionParseError {
    fn invalid(option: &'static str, value: &str, expected: &'static str) -> Self {
        Self::Invalid {
            option,
            value: value.to_string(),
            expected,
        }
    }
}

/// Run storage allocation mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageType {
    Static,
    Dynamic,
}

impl FromStr for StorageType {
    type Err = OptionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STATIC" => Ok(Self::Static),
            "DYNAMIC" => Ok(Self::Dynamic),
            _ => Err(OptionParseError::invalid("storage type", value, "STATIC, DYNAMIC")),
        }
    }
}

/// Call caching behavior for a run.
///
/// Accepts the short aliases `no`, `failure` and `always` as well as the
/// canonical names, all case-insensitively.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheBehavior {
    NoCache,
    CacheOnFailure,
    CacheAlways,
}

impl CacheBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCache => "NO_CACHE",
            Self::CacheOnFailure => "CACHE_ON_FAILURE",
            Self::CacheAlways => "CACHE_ALWAYS",
        }
    }
}

impl FromStr for CacheBehavior {
    type Err = OptionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NO" | "NO_CACHE" => Ok(Self::NoCache),
            "FAILURE" | "CACHE_ON_FAILURE" => Ok(Self::CacheOnFailure),
            "ALWAYS" | "CACHE_ALWAYS" => Ok(Self::CacheAlways),
            _ => Err(OptionParseError::invalid(
                "cache behavior",
                value,
                "no, failure, always, NO_CACHE, CACHE_ON_FAILURE, CACHE_ALWAYS",
            )),
        }
    }
}

/// Whether run outputs are retained after the run record is removed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionMode {
    Retain,
    Remove,
}

impl FromStr for RetentionMode {
    type Err = OptionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RETAIN" => Ok(Self::Retain),
            "REMOVE" => Ok(Self::Remove),
            _ => Err(OptionParseError::invalid("retention mode", value, "RETAIN, REMOVE")),
        }
    }
}

/// Sparse start-run options. Unset fields are never sent.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_group_id: Option<String>,
    /// Static storage capacity in gigabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_capacity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<StorageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_behavior: Option<CacheBehavior>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_mode: Option<RetentionMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_behavior_aliases_normalize() {
        assert_eq!("always".parse::<CacheBehavior>().unwrap(), CacheBehavior::CacheAlways);
        assert_eq!("failure".parse::<CacheBehavior>().unwrap(), CacheBehavior::CacheOnFailure);
        assert_eq!("No".parse::<CacheBehavior>().unwrap(), CacheBehavior::NoCache);
        assert_eq!("CACHE_ALWAYS".parse::<CacheBehavior>().unwrap().as_str(), "CACHE_ALWAYS");
        assert_eq!("cache_on_failure".parse::<CacheBehavior>().unwrap(), CacheBehavior::CacheOnFailure);
    }

    #[test]
    fn unknown_cache_behavior_is_rejected() {
        let err = "sometimes".parse::<CacheBehavior>().unwrap_err();
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn storage_type_and_retention_mode_are_case_insensitive() {
        assert_eq!("dynamic".parse::<StorageType>().unwrap(), StorageType::Dynamic);
        assert_eq!("Static".parse::<StorageType>().unwrap(), StorageType::Static);
        assert_eq!("remove".parse::<RetentionMode>().unwrap(), RetentionMode::Remove);
        assert!("keep".parse::<RetentionMode>().is_err());
        assert!("elastic".parse::<StorageType>().is_err());
    }

    #[test]
    fn unset_options_serialize_to_nothing() {
        let empty = serde_json::to_value(RunOptions::default()).unwrap();
        assert_eq!(empty, serde_json::json!({}));

        let options = RunOptions {
            cache_behavior: Some(CacheBehavior::CacheAlways),
            storage_type: Some(StorageType::Dynamic),
            ..RunOptions::default()
        };
        assert_eq!(
            serde_json::to_value(options).unwrap(),
            serde_json::json!({"cacheBehavior": "CACHE_ALWAYS", "storageType": "DYNAMIC"})
        );
    }
}
