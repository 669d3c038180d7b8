use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Title suffix appended after the leading words of the first prompt.
const TITLE_ELLIPSIS: &str = "...";
const TITLE_WORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    /// A chat that has not been stored yet, titled after the opening prompt.
    pub fn draft(owner_id: Uuid, first_prompt: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title: derive_title(first_prompt),
            summary: None,
            created_at: Utc::now(),
        }
    }
}

pub fn derive_title(prompt: &str) -> String {
    let words: Vec<&str> = prompt.split_whitespace().take(TITLE_WORDS).collect();
    format!("{}{}", words.join(" "), TITLE_ELLIPSIS)
}
