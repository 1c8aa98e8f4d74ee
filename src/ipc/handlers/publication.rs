use crate::actor::Actor;
use crate::ipc::helpers::{
    commit_session, open_session, parse_actor, require_conn, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::GradingSession;
use serde_json::{json, Value};

fn status_json(session: &GradingSession, actor: &Actor) -> Value {
    let publication = session.publication();
    json!({
        "datasetId": session.dataset().id,
        "status": publication.status().as_str(),
        "publishedAt": publication.published_at().map(|d| d.to_rfc3339()),
        "editWindowHours": publication.edit_window_hours(),
        "lockDeadline": publication.lock_deadline().map(|d| d.to_rfc3339()),
        "canEdit": session.can_edit(actor),
        "timeRemainingSeconds": session.time_remaining(actor).map(|d| d.num_seconds()),
    })
}

fn publication_status(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let (session, _registry) = open_session(conn, state.clock.clone(), params)?;
    Ok(status_json(&session, &actor))
}

fn publication_publish(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let (mut session, _registry) = open_session(conn, state.clock.clone(), params)?;
    session.publish(&actor)?;
    commit_session(conn, &mut session)?;
    Ok(status_json(&session, &actor))
}

fn publication_unpublish(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let actor = parse_actor(params)?;
    let (mut session, _registry) = open_session(conn, state.clock.clone(), params)?;
    session.unpublish(&actor)?;
    commit_session(conn, &mut session)?;
    Ok(status_json(&session, &actor))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "publication.status" => publication_status(state, &req.params),
        "publication.publish" => publication_publish(state, &req.params),
        "publication.unpublish" => publication_unpublish(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
