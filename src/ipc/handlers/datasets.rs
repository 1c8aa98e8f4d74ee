use crate::actor::Actor;
use crate::db;
use crate::ipc::handlers::setup::load_grading_settings;
use crate::ipc::helpers::{
    commit_session, get_required_str, open_session, require_conn, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::Dataset;
use serde_json::{json, Value};
use tracing::info;

fn dataset_json(row: &db::DatasetRow) -> Value {
    json!({
        "id": row.dataset.id,
        "sectionId": row.dataset.section_id,
        "subjectId": row.dataset.subject_id,
        "term": row.dataset.term,
        "status": row.status.as_str(),
        "publishedAt": row.published_at.map(|d| d.to_rfc3339()),
    })
}

/// Finds the dataset for a section, subject and term, creating it on first use.
/// A subject without blocks is seeded from the configured default definitions.
fn datasets_open(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let section_id = get_required_str(params, "sectionId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let term = get_required_str(params, "term")?;

    let existing = db::find_dataset(conn, &section_id, &subject_id, &term)
        .map_err(HandlerErr::query)?;
    let (row, created, seeded) = match existing {
        Some(row) => (row, false, 0),
        None => {
            let settings = load_grading_settings(conn).map_err(HandlerErr::query)?;
            let mut registry = db::load_registry(conn).map_err(HandlerErr::query)?;
            let dataset = Dataset::new(&section_id, &subject_id, &term)?;

            let mut seeded = 0;
            if registry.list_blocks(&subject_id).is_empty() {
                let system = Actor::admin("system");
                seeded = registry
                    .import_blocks(&system, &subject_id, &settings.default_blocks)?
                    .len();
            }

            let tx = conn.unchecked_transaction().map_err(HandlerErr::update)?;
            if seeded > 0 {
                db::save_subject_blocks(&tx, &registry, &subject_id)
                    .map_err(HandlerErr::update)?;
            }
            db::insert_dataset(&tx, &dataset).map_err(HandlerErr::update)?;
            tx.commit().map_err(HandlerErr::update)?;
            info!(
                dataset_id = %dataset.id,
                section_id = %dataset.section_id,
                subject_id = %dataset.subject_id,
                term = %dataset.term,
                seeded_blocks = seeded,
                "dataset created"
            );

            let row = db::get_dataset(conn, &dataset.id)
                .map_err(HandlerErr::query)?
                .ok_or_else(|| HandlerErr::query("dataset missing after insert"))?;
            (row, true, seeded)
        }
    };

    let registry = db::load_registry(conn).map_err(HandlerErr::query)?;
    Ok(json!({
        "dataset": dataset_json(&row),
        "created": created,
        "seededBlocks": seeded,
        "blocks": registry.list_blocks(&row.dataset.subject_id),
    }))
}

fn datasets_list(state: &AppState, _params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let rows = db::list_datasets(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "datasets": rows.iter().map(dataset_json).collect::<Vec<_>>() }))
}

fn datasets_enroll(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let Some(raw) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("studentIds must be an array"));
    };
    let student_ids = raw
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| HandlerErr::bad_params("studentIds must contain strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (mut session, _registry) = open_session(conn, state.clock.clone(), params)?;
    let added = session.enroll_students(&student_ids)?;
    if added > 0 {
        commit_session(conn, &mut session)?;
    }
    Ok(json!({
        "added": added,
        "studentCount": session.student_grades().len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "datasets.open" => datasets_open(state, &req.params),
        "datasets.list" => datasets_list(state, &req.params),
        "datasets.enroll" => datasets_enroll(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
