use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::info;

use crate::actor::{Actor, Role};
use crate::error::{GradeError, Result};

pub const DEFAULT_EDIT_WINDOW_HOURS: f64 = 24.0;
pub const MAX_EDIT_WINDOW_HOURS: f64 = 720.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    #[default]
    Draft,
    Published,
}

impl PublicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            _ => None,
        }
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate_edit_window_hours(hours: f64) -> Result<f64> {
    if !hours.is_finite() || hours <= 0.0 || hours > MAX_EDIT_WINDOW_HOURS {
        return Err(GradeError::validation_with(
            format!(
                "editWindowHours must be > 0 and <= {}",
                MAX_EDIT_WINDOW_HOURS
            ),
            json!({ "editWindowHours": if hours.is_finite() { json!(hours) } else { json!(null) } }),
        ));
    }
    Ok(hours)
}

/// Draft/published state of one grading dataset and the edit lock derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationRecord {
    status: PublicationStatus,
    published_at: Option<DateTime<Utc>>,
    edit_window_hours: f64,
}

impl Default for PublicationRecord {
    fn default() -> Self {
        Self {
            status: PublicationStatus::Draft,
            published_at: None,
            edit_window_hours: DEFAULT_EDIT_WINDOW_HOURS,
        }
    }
}

impl PublicationRecord {
    pub fn new(edit_window_hours: f64) -> Result<Self> {
        Ok(Self {
            edit_window_hours: validate_edit_window_hours(edit_window_hours)?,
            ..Self::default()
        })
    }

    /// Rebuilds a record from stored columns. A published record must carry its timestamp.
    pub fn restore(
        status: PublicationStatus,
        published_at: Option<DateTime<Utc>>,
        edit_window_hours: f64,
    ) -> Result<Self> {
        let edit_window_hours = validate_edit_window_hours(edit_window_hours)?;
        match (status, published_at) {
            (PublicationStatus::Published, None) => {
                return Err(GradeError::validation(
                    "published record is missing publishedAt",
                ))
            }
            (PublicationStatus::Draft, Some(_)) => {
                return Err(GradeError::validation("draft record must not carry publishedAt"))
            }
            _ => {}
        }
        Ok(Self {
            status,
            published_at,
            edit_window_hours,
        })
    }

    pub fn status(&self) -> PublicationStatus {
        self.status
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    pub fn edit_window_hours(&self) -> f64 {
        self.edit_window_hours
    }

    fn edit_window(&self) -> Duration {
        Duration::milliseconds((self.edit_window_hours * 3_600_000.0).round() as i64)
    }

    pub fn lock_deadline(&self) -> Option<DateTime<Utc>> {
        self.published_at.map(|at| at + self.edit_window())
    }

    pub fn publish(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.status == PublicationStatus::Published {
            return Err(GradeError::InvalidTransition {
                action: "publish",
                from: self.status,
            });
        }
        self.status = PublicationStatus::Published;
        self.published_at = Some(now);
        info!(published_at = %now, "grades published");
        Ok(now)
    }

    pub fn unpublish(&mut self, actor: &Actor) -> Result<()> {
        if !actor.is_admin_capable() {
            return Err(GradeError::PermissionDenied("unpublishing grades"));
        }
        if self.status == PublicationStatus::Draft {
            return Err(GradeError::InvalidTransition {
                action: "unpublish",
                from: self.status,
            });
        }
        self.status = PublicationStatus::Draft;
        self.published_at = None;
        info!(actor_id = %actor.id, "grades returned to draft");
        Ok(())
    }

    /// The deadline itself is still editable.
    pub fn can_edit(&self, role: Role, now: DateTime<Utc>) -> bool {
        if role.is_admin_capable() {
            return true;
        }
        match (self.status, self.lock_deadline()) {
            (PublicationStatus::Draft, _) => true,
            (PublicationStatus::Published, Some(deadline)) => now <= deadline,
            (PublicationStatus::Published, None) => false,
        }
    }

    pub fn time_remaining(&self, role: Role, now: DateTime<Utc>) -> Option<Duration> {
        if role.is_admin_capable() || self.status == PublicationStatus::Draft {
            return None;
        }
        let deadline = self.lock_deadline()?;
        if now > deadline {
            None
        } else {
            Some(deadline - now)
        }
    }
}
