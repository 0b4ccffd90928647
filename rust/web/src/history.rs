use chrono::{DateTime, Utc};
use gambit_engine::{EndReason, GameKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;
use thiserror::Error;

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_LIMIT: usize = 100;

/// A seated player as it was when the match ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub seat: String,
    pub player_id: String,
    pub name: String,
    pub bot: bool,
}

/// One finished match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub code: String,
    pub kind: GameKind,
    pub match_number: u32,
    pub players: Vec<SeatRecord>,
    /// Seat label of the winner; `None` for draws.
    pub winner: Option<String>,
    pub reason: EndReason,
    /// PGN movetext for chess.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub final_state: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn involves(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p.player_id == player_id)
    }
}

/// Finished-match storage, bounded: the oldest record is evicted first.
#[derive(Debug)]
pub struct HistoryStore {
    records: RwLock<VecDeque<MatchRecord>>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn add_record(&self, record: MatchRecord) -> Result<(), HistoryError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| HistoryError::StoragePoisoned)?;
        if records.len() == self.capacity {
            records.pop_front();
        }
        tracing::debug!(
            record_id = %record.id,
            code = %record.code,
            kind = %record.kind,
            reason = %record.reason,
            "match recorded"
        );
        records.push_back(record);
        Ok(())
    }

    /// Most recent first.
    pub fn get_recent(&self, limit: Option<usize>) -> Result<Vec<MatchRecord>, HistoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| HistoryError::StoragePoisoned)?;
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    pub fn get_record(&self, id: &str) -> Result<Option<MatchRecord>, HistoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| HistoryError::StoragePoisoned)?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    pub fn by_player(&self, player_id: &str) -> Result<Vec<MatchRecord>, HistoryError> {
        self.filter(MatchFilter {
            player_id: Some(player_id.to_string()),
            ..Default::default()
        })
    }

    /// Matching records, most recent first.
    pub fn filter(&self, filter: MatchFilter) -> Result<Vec<MatchRecord>, HistoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| HistoryError::StoragePoisoned)?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn calculate_stats(&self) -> Result<MatchStatistics, HistoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| HistoryError::StoragePoisoned)?;

        let mut stats = MatchStatistics::default();
        for record in records.iter() {
            stats.total_matches += 1;
            *stats.by_kind.entry(record.kind.slug().to_string()).or_default() += 1;
            *stats
                .by_reason
                .entry(record.reason.as_str().to_string())
                .or_default() += 1;
            if record.winner.is_some() {
                stats.decisive += 1;
            } else {
                stats.drawn += 1;
            }
        }
        Ok(stats)
    }

    pub fn total_records(&self) -> Result<usize, HistoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| HistoryError::StoragePoisoned)?;
        Ok(records.len())
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter criteria for match history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<GameKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl MatchFilter {
    fn matches(&self, record: &MatchRecord) -> bool {
        if self.kind.is_some_and(|kind| kind != record.kind) {
            return false;
        }
        if self.reason.is_some_and(|reason| reason != record.reason) {
            return false;
        }
        if let Some(player_id) = &self.player_id {
            if !record.involves(player_id) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchStatistics {
    pub total_matches: usize,
    pub decisive: usize,
    pub drawn: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_reason: BTreeMap<String, usize>,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History storage poisoned")]
    StoragePoisoned,
    #[error("Match not found: {0}")]
    NotFound(String),
}

impl crate::errors::IntoErrorResponse for HistoryError {
    fn status_code(&self) -> warp::http::StatusCode {
        use warp::http::StatusCode;
        match self {
            HistoryError::StoragePoisoned => StatusCode::INTERNAL_SERVER_ERROR,
            HistoryError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            HistoryError::StoragePoisoned => "history_storage_error",
            HistoryError::NotFound(_) => "match_not_found",
        }
    }

    fn error_message(&self) -> String {
        self.to_string()
    }

    fn severity(&self) -> crate::errors::ErrorSeverity {
        use crate::errors::ErrorSeverity;
        match self {
            HistoryError::StoragePoisoned => ErrorSeverity::Critical,
            HistoryError::NotFound(_) => ErrorSeverity::Client,
        }
    }
}
