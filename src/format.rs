use std::str::FromStr;

use anyhow::{Result, bail};
use serde::Serialize;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned columns for people.
    #[default]
    Text,
    /// Pretty JSON for scripts.
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => bail!("Invalid format '{s}'. Use: text or json"),
        }
    }
}

impl OutputFormat {
    /// Serialize data as JSON.
    ///
    /// # Errors
    /// If the value cannot be serialized, or for [`Self::Text`], which the
    /// caller renders itself.
    pub fn serialize<T: Serialize>(self, data: &T) -> Result<String> {
        match self {
            Self::Json => serde_json::to_string_pretty(data)
                .map_err(|e| anyhow::anyhow!("JSON serialization failed: {e}")),
            Self::Text => bail!("Text format should not use serialize()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("toon".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn json_serializes() {
        let out = OutputFormat::Json.serialize(&vec![1, 2]).unwrap();
        assert!(out.contains('1'));
        assert!(OutputFormat::Text.serialize(&1).is_err());
    }
}
