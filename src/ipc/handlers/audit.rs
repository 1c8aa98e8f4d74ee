use crate::db;
use crate::ipc::helpers::{get_optional_str, require_conn, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

const DEFAULT_LIMIT: i64 = 200;
const MAX_LIMIT: i64 = 5000;

fn audit_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let dataset_id = get_optional_str(params, "datasetId")?;
    let limit = match params.get("limit") {
        None | Some(Value::Null) => DEFAULT_LIMIT,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=MAX_LIMIT).contains(&n) => n,
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "limit must be an integer in 1..={}",
                    MAX_LIMIT
                )))
            }
        },
    };
    let events =
        db::list_audit_events(conn, dataset_id.as_deref(), limit).map_err(HandlerErr::query)?;
    Ok(json!({ "events": events }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "audit.list" => audit_list(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
