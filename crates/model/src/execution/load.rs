use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// How extracted rows are written to the target table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadMode {
    /// Append new rows. With a business key configured, keys already in the
    /// target are skipped; without one every row is new.
    #[default]
    Insert,

    /// Empty the target once per job, then append.
    TruncateLoad,

    /// SCD Type 1: insert new keys, overwrite changed ones in place.
    #[serde(alias = "SCD1")]
    Upsert,

    /// SCD Type 2: close the current version and insert a new one.
    Scd2,
}

impl LoadMode {
    /// Modes that look up existing target rows by business key.
    pub fn needs_business_key(&self) -> bool {
        matches!(self, LoadMode::Upsert | LoadMode::Scd2)
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadMode::Insert => "INSERT",
            LoadMode::TruncateLoad => "TRUNCATE_LOAD",
            LoadMode::Upsert => "UPSERT",
            LoadMode::Scd2 => "SCD2",
        };
        write!(f, "{name}")
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(LoadMode::Insert),
            "TRUNCATE_LOAD" => Ok(LoadMode::TruncateLoad),
            "UPSERT" | "SCD1" => Ok(LoadMode::Upsert),
            "SCD2" => Ok(LoadMode::Scd2),
            other => Err(format!("unknown load mode '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStrategy {
    /// Persist the highest committed value of an ordered key column.
    Key,

    /// Persist the count of committed rows; forces sequential execution.
    RowSkip,

    /// `Key` when a usable key column exists, `RowSkip` otherwise.
    #[default]
    Auto,

    /// No checkpointing.
    #[serde(rename = "NONE")]
    Disabled,
}

impl CheckpointStrategy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, CheckpointStrategy::Disabled)
    }
}

impl fmt::Display for CheckpointStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointStrategy::Key => "KEY",
            CheckpointStrategy::RowSkip => "ROW_SKIP",
            CheckpointStrategy::Auto => "AUTO",
            CheckpointStrategy::Disabled => "NONE",
        };
        write!(f, "{name}")
    }
}

impl FromStr for CheckpointStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KEY" => Ok(CheckpointStrategy::Key),
            "ROW_SKIP" => Ok(CheckpointStrategy::RowSkip),
            "AUTO" => Ok(CheckpointStrategy::Auto),
            "NONE" => Ok(CheckpointStrategy::Disabled),
            other => Err(format!("unknown checkpoint strategy '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scd1_is_an_alias_of_upsert() {
        let mode: LoadMode = serde_json::from_str("\"SCD1\"").unwrap();
        assert_eq!(mode, LoadMode::Upsert);
        assert_eq!("scd1".parse::<LoadMode>().unwrap(), LoadMode::Upsert);
        assert_eq!(serde_json::to_string(&LoadMode::TruncateLoad).unwrap(), "\"TRUNCATE_LOAD\"");
    }

    #[test]
    fn test_checkpoint_strategy_names() {
        let none: CheckpointStrategy = serde_json::from_str("\"NONE\"").unwrap();
        assert_eq!(none, CheckpointStrategy::Disabled);
        assert!(!none.is_enabled());
        assert_eq!(CheckpointStrategy::RowSkip.to_string(), "ROW_SKIP");
        assert!("sometimes".parse::<CheckpointStrategy>().is_err());
    }
}
