use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CredenceError;

/// Caller-supplied request metadata.
///
/// Keys are chosen by the caller. Values are forwarded to the inference
/// provider untouched; the scheduler never reads or converts them.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// The kind of content analysis a request asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    /// Every analysis below, combined into one credibility report.
    #[default]
    Full,
    Credibility,
    Bias,
    Facts,
    Sentiment,
    Classification,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 6] = [
        AnalysisKind::Full,
        AnalysisKind::Credibility,
        AnalysisKind::Bias,
        AnalysisKind::Facts,
        AnalysisKind::Sentiment,
        AnalysisKind::Classification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Full => "full",
            AnalysisKind::Credibility => "credibility",
            AnalysisKind::Bias => "bias",
            AnalysisKind::Facts => "facts",
            AnalysisKind::Sentiment => "sentiment",
            AnalysisKind::Classification => "classification",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = CredenceError;

    /// Exact, case-insensitive match on the kind name. Anything else is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AnalysisKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| CredenceError::UnknownAnalysisKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_kinds() {
        assert_eq!("full".parse::<AnalysisKind>().unwrap(), AnalysisKind::Full);
        assert_eq!(" Bias ".parse::<AnalysisKind>().unwrap(), AnalysisKind::Bias);
        assert_eq!(
            "CLASSIFICATION".parse::<AnalysisKind>().unwrap(),
            AnalysisKind::Classification
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "summary".parse::<AnalysisKind>().unwrap_err();
        assert!(matches!(err, CredenceError::UnknownAnalysisKind(ref k) if k == "summary"));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&AnalysisKind::Facts).unwrap();
        assert_eq!(json, "\"facts\"");
        let kind: AnalysisKind = serde_json::from_str("\"sentiment\"").unwrap();
        assert_eq!(kind, AnalysisKind::Sentiment);
    }

    #[test]
    fn display_matches_as_str() {
        for kind in AnalysisKind::ALL {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }
}
