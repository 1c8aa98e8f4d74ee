use crate::audit::{AuditAction, AuditEvent};
use crate::blocks::{BlockDraft, BlockPatch, BlockRegistry};
use crate::db;
use crate::ipc::helpers::{
    get_required_str, parse_actor, require_conn, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_json<T: serde::de::DeserializeOwned>(params: &Value, key: &str) -> Result<T, HandlerErr> {
    let Some(raw) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", key, e)))
}

/// Persists one subject's blocks together with the audit trail of the change.
fn commit_registry(
    conn: &Connection,
    registry: &BlockRegistry,
    subject_id: &str,
    events: &[AuditEvent],
    removed_block: Option<&str>,
) -> Result<(), HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(HandlerErr::update)?;
    db::save_subject_blocks(&tx, registry, subject_id).map_err(HandlerErr::update)?;
    if let Some(block_id) = removed_block {
        db::delete_block_scores(&tx, block_id).map_err(HandlerErr::update)?;
    }
    db::insert_audit_events(&tx, None, events).map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::update)?;
    Ok(())
}

fn blocks_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let registry = db::load_registry(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "blocks": registry.list_blocks(&subject_id) }))
}

fn blocks_add(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let draft: BlockDraft = parse_json(params, "block")?;

    let mut registry = db::load_registry(conn).map_err(HandlerErr::query)?;
    let block = registry.add_block(&actor, &subject_id, &draft)?;
    let event = AuditEvent::new(&actor, AuditAction::BlockAdd, block.id.clone(), state.clock.now())
        .with_details(json!({ "subjectId": block.subject_id, "code": block.code }));
    commit_registry(conn, &registry, &block.subject_id, &[event], None)?;
    Ok(json!({ "block": block }))
}

fn blocks_import(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let drafts: Vec<BlockDraft> = parse_json(params, "blocks")?;

    let mut registry = db::load_registry(conn).map_err(HandlerErr::query)?;
    let added = registry.import_blocks(&actor, &subject_id, &drafts)?;
    let now = state.clock.now();
    let events: Vec<AuditEvent> = added
        .iter()
        .map(|b| {
            AuditEvent::new(&actor, AuditAction::BlockAdd, b.id.clone(), now)
                .with_details(json!({ "subjectId": b.subject_id, "code": b.code, "import": true }))
        })
        .collect();
    commit_registry(conn, &registry, subject_id.trim(), &events, None)?;
    Ok(json!({ "blocks": added }))
}

fn blocks_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let block_id = get_required_str(params, "blockId")?;
    let patch: BlockPatch = parse_json(params, "patch")?;

    let mut registry = db::load_registry(conn).map_err(HandlerErr::query)?;
    let block = registry.update_block(&actor, &block_id, &patch)?;
    let event = AuditEvent::new(&actor, AuditAction::BlockUpdate, block.id.clone(), state.clock.now())
        .with_details(json!({ "code": block.code, "name": block.name }));
    commit_registry(conn, &registry, &block.subject_id, &[event], None)?;
    Ok(json!({ "block": block }))
}

fn blocks_remove(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let block_id = get_required_str(params, "blockId")?;

    let mut registry = db::load_registry(conn).map_err(HandlerErr::query)?;
    let removed = registry.remove_block(&actor, &block_id)?;
    let event = AuditEvent::new(&actor, AuditAction::BlockRemove, removed.id.clone(), state.clock.now())
        .with_details(json!({ "subjectId": removed.subject_id, "code": removed.code }));
    commit_registry(conn, &registry, &removed.subject_id, &[event], Some(&removed.id))?;
    Ok(json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "blocks.list" => blocks_list(state, &req.params),
        "blocks.add" => blocks_add(state, &req.params),
        "blocks.import" => blocks_import(state, &req.params),
        "blocks.update" => blocks_update(state, &req.params),
        "blocks.remove" => blocks_remove(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
