//! Recent-turn history per session.
//!
//! The memory agent reads from it to build context; the calling route writes
//! the finished turn back. The pipeline orchestrator never touches it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::types::{ConversationState, CrisisSeverity, EmotionState, TOTAL_LATENCY_KEY};

/// Context string returned when a session has no cached turns.
pub const NO_PRIOR_CONTEXT: &str = "No prior context (new session)";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store could not be reached.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// A stored entry could not be decoded.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

// ---------------------------------------------------------------------------
// CachedTurn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTurn {
    pub id: Uuid,
    pub session_id: String,
    pub turn_number: u32,
    pub user_message: String,
    pub mollei_response: String,
    #[serde(default)]
    pub user_emotion: Option<EmotionState>,
    #[serde(default)]
    pub mollei_emotion: Option<EmotionState>,
    #[serde(default)]
    pub crisis_detected: Option<bool>,
    #[serde(default)]
    pub crisis_severity: Option<CrisisSeverity>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl CachedTurn {
    pub fn new(
        session_id: impl Into<String>,
        turn_number: u32,
        user_message: impl Into<String>,
        mollei_response: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            turn_number,
            user_message: user_message.into(),
            mollei_response: mollei_response.into(),
            user_emotion: None,
            mollei_emotion: None,
            crisis_detected: None,
            crisis_severity: None,
            latency_ms: None,
            created_at: Utc::now(),
        }
    }

    /// Snapshot a finished pipeline state for the history cache.
    pub fn from_state(state: &ConversationState) -> Self {
        Self {
            user_emotion: state.user_emotion.clone(),
            mollei_emotion: state.mollei_emotion.clone(),
            crisis_detected: state.crisis_detected,
            crisis_severity: state.crisis_severity,
            latency_ms: state.latency_ms.get(TOTAL_LATENCY_KEY).copied(),
            ..Self::new(
                state.session_id.clone(),
                state.turn_number,
                state.user_message.clone(),
                state.response.clone().unwrap_or_default(),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Storage behind [`ConversationCache`].
#[async_trait]
pub trait ConversationCacheBackend: Send + Sync {
    /// Up to `limit` most recent turns, newest first.
    async fn session_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<CachedTurn>, CacheError>;

    async fn push_turn(&self, turn: CachedTurn) -> Result<(), CacheError>;

    async fn session_summary(&self, session_id: &str) -> Result<Option<String>, CacheError>;

    async fn set_session_summary(
        &self,
        session_id: &str,
        summary: String,
    ) -> Result<(), CacheError>;
}

// ---------------------------------------------------------------------------
// InMemoryBackend
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SummaryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local backend. Keeps a bounded ring of turns per session and
/// expiring summaries.
#[derive(Debug)]
pub struct InMemoryBackend {
    turns: DashMap<String, VecDeque<CachedTurn>>,
    summaries: DashMap<String, SummaryEntry>,
    max_turns: usize,
    summary_ttl: Duration,
}

impl InMemoryBackend {
    pub fn new(max_turns: usize, summary_ttl: Duration) -> Self {
        Self {
            turns: DashMap::new(),
            summaries: DashMap::new(),
            max_turns: max_turns.max(1),
            summary_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.max_turns_per_session,
            Duration::from_secs(config.summary_ttl_secs),
        )
    }

    /// Drop expired summaries together with their session's turns.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .summaries
            .iter()
            .filter(|entry| now > entry.value().expires_at)
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in &expired {
            self.summaries.remove(session_id);
            self.turns.remove(session_id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "purged expired sessions");
        }
        expired.len()
    }

    pub fn session_count(&self) -> usize {
        self.turns.len()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[async_trait]
impl ConversationCacheBackend for InMemoryBackend {
    async fn session_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<CachedTurn>, CacheError> {
        Ok(self
            .turns
            .get(session_id)
            .map(|turns| turns.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn push_turn(&self, turn: CachedTurn) -> Result<(), CacheError> {
        let mut turns = self.turns.entry(turn.session_id.clone()).or_default();
        turns.push_back(turn);
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
        Ok(())
    }

    async fn session_summary(&self, session_id: &str) -> Result<Option<String>, CacheError> {
        let expired = match self.summaries.get(session_id) {
            None => return Ok(None),
            Some(entry) if Instant::now() > entry.expires_at => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
        };
        if expired {
            self.summaries.remove(session_id);
        }
        Ok(None)
    }

    async fn set_session_summary(
        &self,
        session_id: &str,
        summary: String,
    ) -> Result<(), CacheError> {
        self.summaries.insert(
            session_id.to_string(),
            SummaryEntry {
                value: summary,
                expires_at: Instant::now() + self.summary_ttl,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConversationCache
// ---------------------------------------------------------------------------

/// Shared handle to the conversation history. Cheap to clone.
#[derive(Clone)]
pub struct ConversationCache {
    backend: Arc<dyn ConversationCacheBackend>,
}

impl ConversationCache {
    pub fn new(backend: Arc<dyn ConversationCacheBackend>) -> Self {
        Self { backend }
    }

    /// In-memory cache with default bounds.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::default()))
    }

    /// Render the most recent `max_turns` turns (newest first) as prompt
    /// context.
    pub async fn get_session_context(
        &self,
        session_id: &str,
        max_turns: usize,
    ) -> Result<String, CacheError> {
        let turns = self.backend.session_turns(session_id, max_turns).await?;
        if turns.is_empty() {
            return Ok(NO_PRIOR_CONTEXT.to_string());
        }
        Ok(turns
            .iter()
            .map(|t| {
                format!(
                    "Turn {}:\nUser: {}\nMollei: {}",
                    t.turn_number, t.user_message, t.mollei_response
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    pub async fn cache_turn(&self, turn: CachedTurn) -> Result<(), CacheError> {
        self.backend.push_turn(turn).await
    }

    pub async fn get_recent_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<CachedTurn>, CacheError> {
        self.backend.session_turns(session_id, limit).await
    }

    /// 1 for a new session, otherwise one past the latest cached turn.
    pub async fn get_next_turn_number(&self, session_id: &str) -> Result<u32, CacheError> {
        let latest = self.backend.session_turns(session_id, 1).await?;
        Ok(latest.first().map(|t| t.turn_number + 1).unwrap_or(1))
    }

    pub async fn get_session_summary(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, CacheError> {
        self.backend.session_summary(session_id).await
    }

    pub async fn set_session_summary(
        &self,
        session_id: &str,
        summary: impl Into<String>,
    ) -> Result<(), CacheError> {
        self.backend
            .set_session_summary(session_id, summary.into())
            .await
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for ConversationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationCache").finish_non_exhaustive()
    }
}
