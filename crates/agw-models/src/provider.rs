// SPDX-License-Identifier: MIT OR Apache-2.0
//! The provider enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A backend LLM provider the gateway can execute against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic.
    Anthropic,
    /// Amazon Bedrock.
    Bedrock,
    /// Mistral AI.
    Mistral,
    /// Google (Gemini API).
    Google,
    /// xAI.
    #[serde(rename = "xai")]
    XAi,
    /// Cerebras.
    Cerebras,
}

impl Provider {
    /// All providers, in definition order.
    pub const ALL: &'static [Provider] = &[
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Bedrock,
        Provider::Mistral,
        Provider::Google,
        Provider::XAi,
        Provider::Cerebras,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Bedrock => "bedrock",
            Self::Mistral => "mistral",
            Self::Google => "google",
            Self::XAi => "xai",
            Self::Cerebras => "cerebras",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for p in Provider::ALL {
            assert_eq!(p.as_str().parse::<Provider>(), Ok(*p));
        }
        assert!("azure".parse::<Provider>().is_err());
    }

    #[test]
    fn serde_uses_the_stable_names() {
        assert_eq!(serde_json::to_string(&Provider::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(serde_json::to_string(&Provider::XAi).unwrap(), "\"xai\"");
        let p: Provider = serde_json::from_str("\"bedrock\"").unwrap();
        assert_eq!(p, Provider::Bedrock);
    }
}
