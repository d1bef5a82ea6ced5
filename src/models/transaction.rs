use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown transaction type '{0}'")]
pub struct UnknownTransactionType(pub String);

/// A transaction either adds a domain record or retracts one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrType {
    Insert,
    Delete,
}

impl TrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for TrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("insert") {
            Ok(Self::Insert)
        } else if s.eq_ignore_ascii_case("delete") {
            Ok(Self::Delete)
        } else {
            Err(UnknownTransactionType(s.to_string()))
        }
    }
}

/// The wire envelope published on resource channels.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEnvelope {
    pub tr_type: TrType,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tr_type_parses_case_insensitively() {
        assert_eq!("insert".parse::<TrType>().unwrap(), TrType::Insert);
        assert_eq!("DELETE".parse::<TrType>().unwrap(), TrType::Delete);
        assert!("upsert".parse::<TrType>().is_err());
    }

    #[test]
    fn envelope_deserializes() {
        let envelope: TransactionEnvelope =
            serde_json::from_str(r#"{"tr_type": "insert", "payload": {"ts": "2011-08-01"}}"#)
                .unwrap();
        assert_eq!(envelope.tr_type, TrType::Insert);
        assert_eq!(envelope.payload["ts"], "2011-08-01");
    }
}
