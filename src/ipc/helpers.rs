use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::error::{err, ok};
use super::handlers::setup::load_grading_settings;
use super::types::{AppState, Request};
use crate::actor::{Actor, Role};
use crate::blocks::BlockRegistry;
use crate::calc::Slot;
use crate::clock::Clock;
use crate::db;
use crate::error::GradeError;
use crate::session::GradingSession;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn update(e: impl std::fmt::Display) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GradeError> for HandlerErr {
    fn from(e: GradeError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            log_rejection(&req.method, &e);
            e.response(&req.id)
        }
    }
}

pub fn require_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn parse_actor(params: &Value) -> Result<Actor, HandlerErr> {
    let Some(raw) = params.get("actor").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing actor"));
    };
    let id = match raw.get("id").and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(HandlerErr::bad_params("missing actor.id")),
    };
    let role_raw = raw.get("role").and_then(|v| v.as_str()).unwrap_or("");
    let Some(role) = Role::parse(role_raw) else {
        return Err(HandlerErr::bad_params("actor.role must be one of: admin, teacher")
            .with_details(json!({ "role": role_raw })));
    };
    Ok(Actor::new(id, role))
}

pub fn parse_slot(params: &Value) -> Result<Slot, HandlerErr> {
    let raw = get_required_str(params, "slot")?;
    Slot::parse(&raw).ok_or_else(|| {
        HandlerErr::from(GradeError::validation_with(
            "slot must be one of: p1..p4, rp1..rp4",
            json!({ "slot": raw }),
        ))
    })
}

/// `value` must be present: a number sets the slot, `null` clears it.
pub fn parse_score_value(params: &Value) -> Result<Option<f64>, HandlerErr> {
    match params.get("value") {
        None => Err(HandlerErr::bad_params("missing value")),
        Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params("value must be a number or null")),
    }
}

/// Loads the dataset named by `params.datasetId` along with the current registry.
pub fn open_session(
    conn: &Connection,
    clock: Arc<dyn Clock>,
    params: &Value,
) -> Result<(GradingSession, BlockRegistry), HandlerErr> {
    let dataset_id = get_required_str(params, "datasetId")?;
    let settings = load_grading_settings(conn).map_err(HandlerErr::query)?;
    let registry = db::load_registry(conn).map_err(HandlerErr::query)?;
    let session = db::load_session(conn, &dataset_id, &registry, settings.edit_window_hours, clock)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::from(GradeError::not_found("dataset", dataset_id)))?;
    Ok((session, registry))
}

/// Writes the session and its pending audit events in one transaction.
pub fn commit_session(conn: &Connection, session: &mut GradingSession) -> Result<(), HandlerErr> {
    let events = session.take_audit_events();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::update)?;
    db::save_session(&tx, session).map_err(HandlerErr::update)?;
    db::insert_audit_events(&tx, Some(&session.dataset().id), &events)
        .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::update)?;
    Ok(())
}

fn log_rejection(method: &str, e: &HandlerErr) {
    match e.code {
        "validation_failed" | "invariant_violation" | "invalid_transition" | "edit_locked"
        | "permission_denied" => {
            warn!(method, code = e.code, message = %e.message, "request rejected")
        }
        _ => {}
    }
}
