use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::blocks::{BlockRegistry, CompetencyBlock};
use crate::calc::Slot;
use crate::clock::Clock;
use crate::publication::{PublicationRecord, PublicationStatus};
use crate::session::{Dataset, GradingSession, StoredScore};

pub const DB_FILE: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS competency_blocks(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            description_text TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_competency_blocks_subject
         ON competency_blocks(subject_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_datasets(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            term TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            published_at TEXT,
            UNIQUE(section_id, subject_id, term)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dataset_students(
            dataset_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(dataset_id, student_id),
            FOREIGN KEY(dataset_id) REFERENCES grade_datasets(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS period_scores(
            dataset_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            block_id TEXT NOT NULL,
            slot TEXT NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY(dataset_id, student_id, block_id, slot),
            FOREIGN KEY(dataset_id) REFERENCES grade_datasets(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_period_scores_block ON period_scores(block_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_events(
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            dataset_id TEXT,
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            at TEXT NOT NULL,
            details_json TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_events_dataset ON audit_events(dataset_id, seq)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn load_registry(conn: &Connection) -> anyhow::Result<BlockRegistry> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, code, name, description_text
         FROM competency_blocks
         ORDER BY subject_id, sort_order",
    )?;
    let blocks = stmt
        .query_map([], |r| {
            Ok(CompetencyBlock {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                code: r.get(2)?,
                name: r.get(3)?,
                description_text: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BlockRegistry::from_blocks(blocks))
}

/// Rewrites a subject's block rows so `sort_order` mirrors the registry's creation order.
pub fn save_subject_blocks(
    conn: &Connection,
    registry: &BlockRegistry,
    subject_id: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM competency_blocks WHERE subject_id = ?",
        [subject_id],
    )?;
    for (i, b) in registry.list_blocks(subject_id).into_iter().enumerate() {
        conn.execute(
            "INSERT INTO competency_blocks(id, subject_id, code, name, description_text, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &b.id,
                &b.subject_id,
                &b.code,
                &b.name,
                &b.description_text,
                i as i64,
            ),
        )?;
    }
    Ok(())
}

pub fn delete_block_scores(conn: &Connection, block_id: &str) -> anyhow::Result<usize> {
    Ok(conn.execute("DELETE FROM period_scores WHERE block_id = ?", [block_id])?)
}

#[derive(Debug, Clone)]
pub struct DatasetRow {
    pub dataset: Dataset,
    pub status: PublicationStatus,
    pub published_at: Option<DateTime<Utc>>,
}

fn parse_timestamp(raw: Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .with_context(|| format!("bad timestamp {}", s))
    })
    .transpose()
}

type DatasetTuple = (String, String, String, String, String, Option<String>);

fn dataset_from_row(row: DatasetTuple) -> anyhow::Result<DatasetRow> {
    let (id, section_id, subject_id, term, status, published_at) = row;
    let status = PublicationStatus::parse(&status)
        .with_context(|| format!("dataset {} has unknown status {}", id, status))?;
    Ok(DatasetRow {
        dataset: Dataset::with_id(&id, &section_id, &subject_id, &term)?,
        status,
        published_at: parse_timestamp(published_at)?,
    })
}

const DATASET_COLUMNS: &str = "id, section_id, subject_id, term, status, published_at";

pub fn get_dataset(conn: &Connection, dataset_id: &str) -> anyhow::Result<Option<DatasetRow>> {
    let row: Option<DatasetTuple> = conn
        .query_row(
            &format!("SELECT {} FROM grade_datasets WHERE id = ?", DATASET_COLUMNS),
            [dataset_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .optional()?;
    row.map(dataset_from_row).transpose()
}

pub fn find_dataset(
    conn: &Connection,
    section_id: &str,
    subject_id: &str,
    term: &str,
) -> anyhow::Result<Option<DatasetRow>> {
    let row: Option<DatasetTuple> = conn
        .query_row(
            &format!(
                "SELECT {} FROM grade_datasets WHERE section_id = ? AND subject_id = ? AND term = ?",
                DATASET_COLUMNS
            ),
            (section_id, subject_id, term),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .optional()?;
    row.map(dataset_from_row).transpose()
}

pub fn list_datasets(conn: &Connection) -> anyhow::Result<Vec<DatasetRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM grade_datasets ORDER BY section_id, subject_id, term",
        DATASET_COLUMNS
    ))?;
    let rows: Vec<DatasetTuple> = stmt
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(dataset_from_row).collect()
}

pub fn insert_dataset(conn: &Connection, dataset: &Dataset) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO grade_datasets(id, section_id, subject_id, term, status, published_at)
         VALUES(?, ?, ?, ?, 'draft', NULL)",
        (
            &dataset.id,
            &dataset.section_id,
            &dataset.subject_id,
            &dataset.term,
        ),
    )?;
    Ok(())
}

/// Loads a dataset into a session aligned with the registry's current blocks.
pub fn load_session(
    conn: &Connection,
    dataset_id: &str,
    registry: &BlockRegistry,
    edit_window_hours: f64,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Option<GradingSession>> {
    let Some(row) = get_dataset(conn, dataset_id)? else {
        return Ok(None);
    };
    let publication = PublicationRecord::restore(row.status, row.published_at, edit_window_hours)?;

    let mut students_stmt = conn.prepare(
        "SELECT student_id FROM dataset_students WHERE dataset_id = ? ORDER BY student_id",
    )?;
    let students = students_stmt
        .query_map([dataset_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut scores_stmt = conn.prepare(
        "SELECT student_id, block_id, slot, value FROM period_scores WHERE dataset_id = ?",
    )?;
    let raw_scores = scores_stmt
        .query_map([dataset_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut scores = Vec::with_capacity(raw_scores.len());
    for (student_id, block_id, slot, value) in raw_scores {
        let slot = Slot::parse(&slot)
            .with_context(|| format!("stored score has unknown slot {}", slot))?;
        scores.push(StoredScore {
            student_id,
            block_id,
            slot,
            value,
        });
    }

    let block_ids = registry.block_ids(&row.dataset.subject_id);
    let session = GradingSession::restore(row.dataset, block_ids, publication, students, scores, clock)?;
    Ok(Some(session))
}

/// Replaces the stored state of the session's dataset. Call inside a transaction.
pub fn save_session(conn: &Connection, session: &GradingSession) -> anyhow::Result<()> {
    let dataset_id = &session.dataset().id;
    let publication = session.publication();
    conn.execute(
        "UPDATE grade_datasets SET status = ?, published_at = ? WHERE id = ?",
        (
            publication.status().as_str(),
            publication.published_at().map(|d| d.to_rfc3339()),
            dataset_id,
        ),
    )?;

    conn.execute(
        "DELETE FROM dataset_students WHERE dataset_id = ?",
        [dataset_id],
    )?;
    conn.execute("DELETE FROM period_scores WHERE dataset_id = ?", [dataset_id])?;

    let mut student_stmt =
        conn.prepare("INSERT INTO dataset_students(dataset_id, student_id) VALUES(?, ?)")?;
    let mut score_stmt = conn.prepare(
        "INSERT INTO period_scores(dataset_id, student_id, block_id, slot, value)
         VALUES(?, ?, ?, ?, ?)",
    )?;
    for record in session.student_grades() {
        student_stmt.execute((dataset_id, record.student_id()))?;
        for block in record.blocks() {
            for slot in Slot::all() {
                if let Some(v) = block.scores().get(slot) {
                    score_stmt.execute((
                        dataset_id,
                        record.student_id(),
                        block.block_id(),
                        slot.to_string(),
                        v,
                    ))?;
                }
            }
        }
    }
    Ok(())
}

pub fn insert_audit_events(
    conn: &Connection,
    dataset_id: Option<&str>,
    events: &[AuditEvent],
) -> anyhow::Result<()> {
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM audit_events",
        [],
        |r| r.get(0),
    )?;
    for (i, e) in events.iter().enumerate() {
        let details = e.details.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO audit_events(id, seq, dataset_id, actor_id, action, entity_id, at, details_json)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                next_seq + i as i64,
                dataset_id,
                &e.actor_id,
                e.action.as_str(),
                &e.entity_id,
                e.timestamp.to_rfc3339(),
                details,
            ),
        )?;
    }
    Ok(())
}

pub fn list_audit_events(
    conn: &Connection,
    dataset_id: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT seq, dataset_id, actor_id, action, entity_id, at, details_json
         FROM audit_events
         WHERE (?1 IS NULL OR dataset_id = ?1)
         ORDER BY seq
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map((dataset_id, limit), |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (seq, dataset_id, actor_id, action, entity_id, at, details_json) in rows {
        let details = match details_json {
            Some(s) => serde_json::from_str::<serde_json::Value>(&s)?,
            None => serde_json::Value::Null,
        };
        out.push(serde_json::json!({
            "seq": seq,
            "datasetId": dataset_id,
            "actorId": actor_id,
            "action": action,
            "entityId": entity_id,
            "timestamp": at,
            "details": details,
        }));
    }
    Ok(out)
}
