use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::actor::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    #[serde(rename = "score.set")]
    ScoreSet,
    #[serde(rename = "block.add")]
    BlockAdd,
    #[serde(rename = "block.update")]
    BlockUpdate,
    #[serde(rename = "block.remove")]
    BlockRemove,
    #[serde(rename = "grades.publish")]
    Publish,
    #[serde(rename = "grades.unpublish")]
    Unpublish,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScoreSet => "score.set",
            Self::BlockAdd => "block.add",
            Self::BlockUpdate => "block.update",
            Self::BlockRemove => "block.remove",
            Self::Publish => "grades.publish",
            Self::Unpublish => "grades.unpublish",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity-log entry produced by the core; recording it is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor_id: String,
    pub action: AuditAction,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        entity_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id: actor.id.clone(),
            action,
            entity_id: entity_id.into(),
            timestamp,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
