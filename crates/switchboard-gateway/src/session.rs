//! Chat sessions and their transcripts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEFAULT_SESSION: &str = "main";

/// Speaker label for lines typed by the human
pub const USER_SPEAKER: &str = "User";

/// One line of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// `User` or the name of the agent that replied
    pub speaker: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    #[serde(skip)]
    transcript: Vec<TranscriptEntry>,
}

impl Session {
    fn new(id: String, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            created_at: now,
            last_activity: now,
            message_count: 0,
            transcript: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// The transcript as the classifier sees it: one `Speaker: content` per line
    pub fn chat_history(&self) -> String {
        self.transcript
            .iter()
            .map(|e| format!("{}: {}", e.speaker, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, speaker: &str, content: &str) {
        let now = Utc::now();
        self.transcript.push(TranscriptEntry {
            speaker: speaker.to_string(),
            content: content.to_string(),
            at: now,
        });
        self.last_activity = now;
        self.message_count += 1;
    }
}

/// Manages all sessions; starts with a default "main" session
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(
            DEFAULT_SESSION.to_string(),
            Session::new(DEFAULT_SESSION.to_string(), "Main"),
        );
        Self {
            sessions: Arc::new(RwLock::new(sessions)),
        }
    }

    /// All sessions, most recently active first
    pub async fn list(&self) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<Session> = sessions.values().cloned().collect();
        list.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        list
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    pub async fn create(&self, name: &str) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), name);
        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), session.clone());
        info!("Created session '{}' ({})", name, id);
        session
    }

    /// Append a line to a session and return the full chat history after it.
    /// `None` if the session does not exist.
    pub async fn append(&self, session_id: &str, speaker: &str, content: &str) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        session.push(speaker, content);
        debug!(
            "Session '{}' activity (messages: {})",
            session_id, session.message_count
        );
        Some(session.chat_history())
    }

    /// Hand the history with the new line to `deliver` and keep the line
    /// only if it succeeds. The session stays locked throughout, so no other
    /// line can slip in between. `None` if the session does not exist.
    pub async fn append_if<T, E>(
        &self,
        session_id: &str,
        speaker: &str,
        content: &str,
        deliver: impl FnOnce(String) -> Result<T, E>,
    ) -> Option<Result<T, E>> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        let mut history = session.chat_history();
        if !history.is_empty() {
            history.push('\n');
        }
        history.push_str(&format!("{}: {}", speaker, content));

        let result = deliver(history);
        if result.is_ok() {
            session.push(speaker, content);
            debug!(
                "Session '{}' activity (messages: {})",
                session_id, session.message_count
            );
        }
        Some(result)
    }

    pub async fn history(&self, session_id: &str) -> Option<Vec<TranscriptEntry>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|s| s.transcript.clone())
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
