//! JSON join configuration handed to worker processes.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShmemError};
use crate::token::UniqueJoinToken;

/// `{"uid": [...], "npes": n, "pe_start": k}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Flattened join token, see [`UniqueJoinToken::to_values`].
    pub uid: Vec<i64>,
    /// Total number of participants in the job.
    pub npes: u32,
    /// Participant ordinal of this process's first worker.
    pub pe_start: u32,
}

impl JoinConfig {
    pub fn new(token: &UniqueJoinToken, npes: u32, pe_start: u32) -> Self {
        Self { uid: token.to_values(), npes, pe_start }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ShmemError::InvalidConfig(format!("JSON parse error: {e}")))?;
        if !value.is_object() {
            return Err(ShmemError::InvalidConfig("JSON is not an object".into()));
        }
        serde_json::from_value(value).map_err(|e| ShmemError::InvalidConfig(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ShmemError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{TOKEN_LEN, UNIQUEID_PADDING};

    #[test]
    fn test_parse_roundtrip() {
        let token = UniqueJoinToken::new(2, [7u8; UNIQUEID_PADDING]);
        let config = JoinConfig::new(&token, 8, 4);
        let parsed = JoinConfig::parse(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.uid.len(), TOKEN_LEN);
    }

    #[test]
    fn test_malformed_json() {
        let err = JoinConfig::parse("{\"uid\": [1, 2").unwrap_err();
        assert!(err.to_string().contains("JSON parse error"));
    }

    #[test]
    fn test_non_object() {
        let err = JoinConfig::parse("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("JSON is not an object"));
    }

    #[test]
    fn test_missing_and_out_of_range_fields() {
        assert!(matches!(
            JoinConfig::parse(r#"{"uid": [], "npes": 2}"#),
            Err(ShmemError::InvalidConfig(_))
        ));
        assert!(matches!(
            JoinConfig::parse(r#"{"uid": [], "npes": -1, "pe_start": 0}"#),
            Err(ShmemError::InvalidConfig(_))
        ));
    }
}
