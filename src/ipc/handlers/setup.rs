use crate::blocks::{reference_blocks, BlockDraft};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::publication::{validate_edit_window_hours, DEFAULT_EDIT_WINDOW_HOURS};
use serde_json::{json, Map, Value};
use tracing::info;

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "editWindowHours": DEFAULT_EDIT_WINDOW_HOURS,
            "defaultBlocks": reference_blocks(),
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_default_blocks(v: &Value) -> Result<Vec<BlockDraft>, String> {
    let drafts: Vec<BlockDraft> = serde_json::from_value(v.clone())
        .map_err(|e| format!("defaultBlocks must be a list of {{code, name}}: {}", e))?;
    if drafts.is_empty() {
        return Err("defaultBlocks must not be empty".into());
    }
    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::with_capacity(drafts.len());
    for (i, d) in drafts.iter().enumerate() {
        let d = d
            .validate()
            .map_err(|e| format!("defaultBlocks[{}]: {}", i, e))?;
        if !seen.insert(d.code.to_ascii_lowercase()) {
            return Err(format!("defaultBlocks has duplicate code {}", d.code));
        }
        normalized.push(d);
    }
    Ok(normalized)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "editWindowHours" => {
                    let hours = v
                        .as_f64()
                        .ok_or_else(|| "editWindowHours must be a number".to_string())?;
                    let hours = validate_edit_window_hours(hours).map_err(|e| e.to_string())?;
                    obj.insert(k.clone(), Value::from(hours));
                }
                "defaultBlocks" => {
                    let drafts = parse_default_blocks(v)?;
                    obj.insert(
                        k.clone(),
                        serde_json::to_value(drafts).map_err(|e| e.to_string())?,
                    );
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored fields fall back to defaults.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

/// Typed view of the `grading` settings section.
#[derive(Debug, Clone)]
pub struct GradingSettings {
    pub edit_window_hours: f64,
    pub default_blocks: Vec<BlockDraft>,
}

pub fn load_grading_settings(conn: &rusqlite::Connection) -> anyhow::Result<GradingSettings> {
    let section = load_section(conn, SetupSection::Grading)?;
    let edit_window_hours = section
        .get("editWindowHours")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_EDIT_WINDOW_HOURS);
    let default_blocks = match section.get("defaultBlocks") {
        Some(v) => serde_json::from_value(v.clone())?,
        None => reference_blocks(),
    };
    Ok(GradingSettings {
        edit_window_hours,
        default_blocks,
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "grading": grading }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "validation_failed", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(section = section.key(), "settings updated");
    ok(&req.id, json!({ "ok": true, "section": section_raw, "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
