use crate::ipc::helpers::{
    commit_session, get_required_str, open_session, parse_actor, parse_score_value, parse_slot,
    require_conn, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use tracing::info;

fn grades_set_score(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let student_id = get_required_str(params, "studentId")?;
    let block_id = get_required_str(params, "blockId")?;
    let slot = parse_slot(params)?;
    let value = parse_score_value(params)?;

    let (mut session, _registry) = open_session(conn, state.clock.clone(), params)?;
    let record = session.set_score(&actor, &student_id, &block_id, slot, value)?;
    commit_session(conn, &mut session)?;
    info!(
        dataset_id = %session.dataset().id,
        student_id = %student_id,
        block_id = %block_id,
        slot = %slot,
        final_grade = record.final_grade(),
        "score recorded"
    );
    Ok(json!({ "record": record }))
}

fn grades_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let (session, _registry) = open_session(conn, state.clock.clone(), params)?;
    let record = session.get_student_grade(&student_id)?;
    Ok(json!({ "record": record }))
}

fn grades_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let (session, registry) = open_session(conn, state.clock.clone(), params)?;
    let blocks = session
        .block_ids()
        .iter()
        .filter_map(|id| registry.get_block(id))
        .collect::<Vec<_>>();
    Ok(json!({
        "datasetId": session.dataset().id,
        "blocks": blocks,
        "students": session.student_grades(),
    }))
}

fn grades_summary(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let (session, _registry) = open_session(conn, state.clock.clone(), params)?;
    Ok(json!({ "summary": session.class_summary() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.setScore" => grades_set_score(state, &req.params),
        "grades.get" => grades_get(state, &req.params),
        "grades.list" => grades_list(state, &req.params),
        "grades.summary" => grades_summary(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
