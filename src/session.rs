use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::audit::{AuditAction, AuditEvent};
use crate::blocks::BlockRegistry;
use crate::calc::{self, DistributionStats, PeriodScoreSet, Slot};
use crate::clock::Clock;
use crate::error::{GradeError, Result};
use crate::publication::PublicationRecord;

fn required_key(field: &str, value: &str) -> Result<String> {
    let t = value.trim();
    if t.is_empty() {
        return Err(GradeError::validation_with(
            format!("{} must not be empty", field),
            json!({ "field": field }),
        ));
    }
    Ok(t.to_string())
}

/// One section + subject + term: the unit that is graded and published together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub section_id: String,
    pub subject_id: String,
    pub term: String,
}

impl Dataset {
    pub fn new(section_id: &str, subject_id: &str, term: &str) -> Result<Self> {
        Self::with_id(&Uuid::new_v4().to_string(), section_id, subject_id, term)
    }

    pub fn with_id(id: &str, section_id: &str, subject_id: &str, term: &str) -> Result<Self> {
        Ok(Self {
            id: required_key("datasetId", id)?,
            section_id: required_key("sectionId", section_id)?,
            subject_id: required_key("subjectId", subject_id)?,
            term: required_key("term", term)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockGrade {
    block_id: String,
    scores: PeriodScoreSet,
    average: f64,
    graded_slots: usize,
}

impl BlockGrade {
    fn new(block_id: String, scores: PeriodScoreSet) -> Self {
        let avg = calc::block_average(&scores);
        Self {
            block_id,
            scores,
            average: avg.average,
            graded_slots: avg.graded_slots,
        }
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn scores(&self) -> &PeriodScoreSet {
        &self.scores
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn graded_slots(&self) -> usize {
        self.graded_slots
    }
}

/// A student's raw scores plus the averages derived from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRecord {
    student_id: String,
    blocks: Vec<BlockGrade>,
    final_grade: f64,
}

impl StudentGradeRecord {
    fn empty(student_id: String, block_ids: &[String]) -> Self {
        Self {
            student_id,
            blocks: block_ids
                .iter()
                .map(|id| BlockGrade::new(id.clone(), PeriodScoreSet::default()))
                .collect(),
            final_grade: 0.0,
        }
    }

    fn recompute(&mut self) {
        for b in &mut self.blocks {
            let avg = calc::block_average(&b.scores);
            b.average = avg.average;
            b.graded_slots = avg.graded_slots;
        }
        self.final_grade = calc::final_grade(self.blocks.iter().map(|b| b.average));
        debug!(student_id = %self.student_id, final_grade = self.final_grade, "grades recomputed");
    }

    fn realign(&mut self, block_ids: &[String]) {
        let mut existing: BTreeMap<String, PeriodScoreSet> = self
            .blocks
            .drain(..)
            .map(|b| (b.block_id, b.scores))
            .collect();
        self.blocks = block_ids
            .iter()
            .map(|id| BlockGrade::new(id.clone(), existing.remove(id).unwrap_or_default()))
            .collect();
        self.recompute();
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn blocks(&self) -> &[BlockGrade] {
        &self.blocks
    }

    pub fn block(&self, block_id: &str) -> Option<&BlockGrade> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    pub fn block_averages(&self) -> Vec<f64> {
        self.blocks.iter().map(|b| b.average).collect()
    }

    pub fn final_grade(&self) -> f64 {
        self.final_grade
    }
}

/// A persisted score cell, used to rebuild a session.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredScore {
    pub student_id: String,
    pub block_id: String,
    pub slot: Slot,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub block_id: String,
    #[serde(flatten)]
    pub stats: DistributionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub student_count: usize,
    pub blocks: Vec<BlockSummary>,
    #[serde(rename = "final")]
    pub final_stats: DistributionStats,
}

/// Owns the score table and publication state of one dataset.
pub struct GradingSession {
    dataset: Dataset,
    block_ids: Vec<String>,
    records: BTreeMap<String, StudentGradeRecord>,
    publication: PublicationRecord,
    clock: Arc<dyn Clock>,
    pending_events: Vec<AuditEvent>,
}

impl GradingSession {
    pub fn new(
        dataset: Dataset,
        block_ids: Vec<String>,
        publication: PublicationRecord,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &block_ids {
            if !seen.insert(id.as_str()) {
                return Err(GradeError::validation_with(
                    "duplicate block id in session",
                    json!({ "blockId": id }),
                ));
            }
        }
        Ok(Self {
            dataset,
            block_ids,
            records: BTreeMap::new(),
            publication,
            clock,
            pending_events: Vec::new(),
        })
    }

    /// Session over the blocks the registry currently lists for the dataset's subject.
    pub fn for_subject(
        dataset: Dataset,
        registry: &BlockRegistry,
        publication: PublicationRecord,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let block_ids = registry.block_ids(&dataset.subject_id);
        Self::new(dataset, block_ids, publication, clock)
    }

    /// Rebuilds a session from stored parts; every derived field is recomputed.
    /// Scores that point at blocks no longer in the session are dropped.
    pub fn restore(
        dataset: Dataset,
        block_ids: Vec<String>,
        publication: PublicationRecord,
        students: Vec<String>,
        scores: Vec<StoredScore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut session = Self::new(dataset, block_ids, publication, clock)?;
        session.enroll_students(&students)?;
        for s in scores {
            let Some(idx) = session.block_index(&s.block_id) else {
                warn!(block_id = %s.block_id, student_id = %s.student_id, "dropping score for unknown block");
                continue;
            };
            let record = session.record_entry(&s.student_id)?;
            record.blocks[idx].scores.set(s.slot, Some(s.value))?;
        }
        for record in session.records.values_mut() {
            record.recompute();
        }
        Ok(session)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn block_ids(&self) -> &[String] {
        &self.block_ids
    }

    pub fn publication(&self) -> &PublicationRecord {
        &self.publication
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn block_index(&self, block_id: &str) -> Option<usize> {
        self.block_ids.iter().position(|b| b == block_id)
    }

    fn record_entry(&mut self, student_id: &str) -> Result<&mut StudentGradeRecord> {
        let student_id = required_key("studentId", student_id)?;
        let block_ids = &self.block_ids;
        Ok(self
            .records
            .entry(student_id.clone())
            .or_insert_with(|| StudentGradeRecord::empty(student_id, block_ids)))
    }

    /// Adds empty records for roster students. Returns how many were new.
    pub fn enroll_students(&mut self, student_ids: &[String]) -> Result<usize> {
        let ids = student_ids
            .iter()
            .map(|s| required_key("studentId", s))
            .collect::<Result<Vec<_>>>()?;
        let mut added = 0;
        for id in ids {
            if !self.records.contains_key(&id) {
                self.record_entry(&id)?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn set_score(
        &mut self,
        actor: &Actor,
        student_id: &str,
        block_id: &str,
        slot: Slot,
        value: Option<f64>,
    ) -> Result<StudentGradeRecord> {
        let student_id = required_key("studentId", student_id)?;
        let value = value.map(calc::validate_score).transpose()?;
        let Some(idx) = self.block_index(block_id) else {
            return Err(GradeError::not_found("block", block_id));
        };

        let now = self.clock.now();
        if !self.publication.can_edit(actor.role, now) {
            warn!(
                actor_id = %actor.id,
                dataset_id = %self.dataset.id,
                student_id = %student_id,
                "score edit rejected: edit window closed"
            );
            return Err(GradeError::EditLocked);
        }

        let record = self.record_entry(&student_id)?;
        let previous = record.blocks[idx].scores.get(slot);
        record.blocks[idx].scores.set(slot, value)?;
        record.recompute();
        let snapshot = record.clone();

        self.pending_events.push(
            AuditEvent::new(actor, AuditAction::ScoreSet, student_id.clone(), now).with_details(
                json!({
                    "datasetId": self.dataset.id,
                    "blockId": block_id,
                    "slot": slot.to_string(),
                    "previous": previous,
                    "value": value,
                }),
            ),
        );
        Ok(snapshot)
    }

    pub fn get_student_grade(&self, student_id: &str) -> Result<StudentGradeRecord> {
        let key = student_id.trim();
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| GradeError::not_found("student", key))
    }

    /// Snapshots for every student, ordered by student id.
    pub fn student_grades(&self) -> Vec<StudentGradeRecord> {
        self.records.values().cloned().collect()
    }

    pub fn class_summary(&self) -> ClassSummary {
        let blocks = self
            .block_ids
            .iter()
            .enumerate()
            .map(|(i, block_id)| BlockSummary {
                block_id: block_id.clone(),
                stats: calc::distribution(self.records.values().map(|r| r.blocks[i].average)),
            })
            .collect();
        ClassSummary {
            student_count: self.records.len(),
            blocks,
            final_stats: calc::distribution(self.records.values().map(|r| r.final_grade)),
        }
    }

    /// Any teacher or administrator of the session may publish.
    pub fn publish(&mut self, actor: &Actor) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let at = self.publication.publish(now)?;
        self.pending_events.push(
            AuditEvent::new(actor, AuditAction::Publish, self.dataset.id.clone(), now)
                .with_details(json!({ "editWindowHours": self.publication.edit_window_hours() })),
        );
        Ok(at)
    }

    pub fn unpublish(&mut self, actor: &Actor) -> Result<()> {
        self.publication.unpublish(actor)?;
        let now = self.clock.now();
        self.pending_events.push(AuditEvent::new(
            actor,
            AuditAction::Unpublish,
            self.dataset.id.clone(),
            now,
        ));
        Ok(())
    }

    pub fn can_edit(&self, actor: &Actor) -> bool {
        self.publication.can_edit(actor.role, self.clock.now())
    }

    pub fn time_remaining(&self, actor: &Actor) -> Option<Duration> {
        self.publication.time_remaining(actor.role, self.clock.now())
    }

    /// Realigns the session with the registry's current blocks for the subject.
    pub fn sync_blocks(&mut self, registry: &BlockRegistry) -> bool {
        let ids = registry.block_ids(&self.dataset.subject_id);
        if ids == self.block_ids {
            return false;
        }
        for record in self.records.values_mut() {
            record.realign(&ids);
        }
        self.block_ids = ids;
        true
    }

    pub fn take_audit_events(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.pending_events)
    }
}
