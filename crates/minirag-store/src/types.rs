use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub plan: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: minirag_core::types::Role,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiToken {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub last_used_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotProfile {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Sealed JSON blob of provider keys; decrypted on demand, never logged.
    #[serde(skip_serializing)]
    pub encrypted_credentials: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    Upload,
    Url,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Text => write!(f, "text"),
            SourceType::Upload => write!(f, "upload"),
            SourceType::Url => write!(f, "url"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(SourceType::Text),
            "upload" => Ok(SourceType::Upload),
            "url" => Ok(SourceType::Url),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Pending => write!(f, "pending"),
            SourceStatus::Processing => write!(f, "processing"),
            SourceStatus::Ready => write!(f, "ready"),
            SourceStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SourceStatus::Pending),
            "processing" => Ok(SourceStatus::Processing),
            "ready" => Ok(SourceStatus::Ready),
            "error" => Ok(SourceStatus::Error),
            other => Err(format!("unknown source status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshSchedule {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
}

impl RefreshSchedule {
    /// Interval before a ready source becomes eligible for re-ingestion.
    pub fn interval_secs(&self) -> Option<i64> {
        match self {
            RefreshSchedule::None => None,
            RefreshSchedule::Hourly => Some(3600),
            RefreshSchedule::Daily => Some(86_400),
            RefreshSchedule::Weekly => Some(7 * 86_400),
        }
    }
}

impl fmt::Display for RefreshSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshSchedule::None => write!(f, "none"),
            RefreshSchedule::Hourly => write!(f, "hourly"),
            RefreshSchedule::Daily => write!(f, "daily"),
            RefreshSchedule::Weekly => write!(f, "weekly"),
        }
    }
}

impl std::str::FromStr for RefreshSchedule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(RefreshSchedule::None),
            "hourly" => Ok(RefreshSchedule::Hourly),
            "daily" => Ok(RefreshSchedule::Daily),
            "weekly" => Ok(RefreshSchedule::Weekly),
            other => Err(format!("unknown refresh schedule: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub tenant_id: String,
    pub bot_profile_id: String,
    pub parent_source_id: Option<String>,
    pub source_type: SourceType,
    pub status: SourceStatus,
    pub name: String,
    /// Raw input text or the URL to fetch, depending on `source_type`.
    pub content: String,
    /// Opaque JSON blob persisted verbatim.
    pub config: String,
    pub refresh_schedule: RefreshSchedule,
    pub last_refreshed_at: Option<String>,
    pub last_error: Option<String>,
    pub document_count: u32,
    pub chunk_count: u32,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub tenant_id: String,
    pub source_id: String,
    pub content: String,
    pub char_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub tenant_id: String,
    pub document_id: String,
    pub source_id: String,
    pub bot_profile_id: String,
    pub ordinal: u32,
    pub content: String,
    /// Vector id in the shared collection; always equals `id`.
    pub vector_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Chunk payload for `commit_ingest`; ids are minted by the worker so the
/// vector upsert can reuse them.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: String,
    pub ordinal: u32,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: String,
    pub tenant_id: String,
    pub bot_profile_id: String,
    pub user_id: String,
    pub title: String,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub tenant_id: String,
    pub role: MessageRole,
    pub content: String,
    /// JSON list of chunk ids used for retrieval on this turn.
    pub context_chunks: Option<String>,
    /// "positive" | "negative" | null.
    pub feedback: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub id: String,
    pub tenant_id: String,
    pub chat_id: String,
    pub message_id: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub is_stream: bool,
    pub time_to_first_token_ms: Option<u64>,
    pub stream_duration_ms: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// JSON array of subscribed event tags.
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enum_round_trips() {
        for t in [SourceType::Text, SourceType::Upload, SourceType::Url] {
            assert_eq!(SourceType::from_str(&t.to_string()).unwrap(), t);
        }
        for s in [
            SourceStatus::Pending,
            SourceStatus::Processing,
            SourceStatus::Ready,
            SourceStatus::Error,
        ] {
            assert_eq!(SourceStatus::from_str(&s.to_string()).unwrap(), s);
        }
        for r in [
            RefreshSchedule::None,
            RefreshSchedule::Hourly,
            RefreshSchedule::Daily,
            RefreshSchedule::Weekly,
        ] {
            assert_eq!(RefreshSchedule::from_str(&r.to_string()).unwrap(), r);
        }
    }

    #[test]
    fn refresh_intervals() {
        assert_eq!(RefreshSchedule::None.interval_secs(), None);
        assert_eq!(RefreshSchedule::Hourly.interval_secs(), Some(3600));
        assert_eq!(RefreshSchedule::Daily.interval_secs(), Some(86_400));
        assert_eq!(RefreshSchedule::Weekly.interval_secs(), Some(604_800));
    }

    #[test]
    fn secret_fields_never_serialize() {
        let user = User {
            id: "u1".into(),
            tenant_id: "t1".into(),
            email: "a@x".into(),
            password_hash: "$argon2id$secret".into(),
            role: minirag_core::types::Role::Owner,
            is_active: true,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("password_hash"));
    }
}
