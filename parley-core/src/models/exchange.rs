use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Logical model names clients may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelName {
    Llama3,
    #[serde(alias = "llama3fast")]
    Mixtral,
    Gemma,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported model '{0}'")]
pub struct UnknownModelError(pub String);

impl ModelName {
    pub const ALL: [ModelName; 3] = [ModelName::Llama3, ModelName::Mixtral, ModelName::Gemma];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::Llama3 => "llama3",
            ModelName::Mixtral => "mixtral",
            ModelName::Gemma => "gemma",
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelName {
    type Err = UnknownModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "llama3" => Ok(ModelName::Llama3),
            "mixtral" | "llama3fast" => Ok(ModelName::Mixtral),
            "gemma" => Ok(ModelName::Gemma),
            other => Err(UnknownModelError(other.to_string())),
        }
    }
}

impl TryFrom<String> for ModelName {
    type Error = UnknownModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One prompt/response pair within a chat.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub prompt: String,
    pub response: String,
    #[sqlx(try_from = "String")]
    pub model: ModelName,
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(chat_id: Uuid, prompt: String, response: String, model: ModelName) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            prompt,
            response,
            model,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_models_and_alias() {
        assert_eq!("llama3".parse::<ModelName>().unwrap(), ModelName::Llama3);
        assert_eq!("gemma".parse::<ModelName>().unwrap(), ModelName::Gemma);
        assert_eq!("llama3fast".parse::<ModelName>().unwrap(), ModelName::Mixtral);
    }

    #[test]
    fn rejects_unknown_model() {
        let err = "gpt-4o".parse::<ModelName>().unwrap_err();
        assert_eq!(err, UnknownModelError("gpt-4o".to_string()));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_value(ModelName::Mixtral).unwrap();
        assert_eq!(json, "mixtral");
        for model in ModelName::ALL {
            assert_eq!(model.as_str().parse::<ModelName>().unwrap(), model);
        }
    }
}
