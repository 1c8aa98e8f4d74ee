use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::actor::Actor;
use crate::error::{GradeError, Result};

pub const CODE_MAX_CHARS: usize = 16;
pub const NAME_MAX_CHARS: usize = 120;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyBlock {
    pub id: String,
    pub subject_id: String,
    pub code: String,
    pub name: String,
    pub description_text: String,
}

/// Fields supplied when creating a block (also the shape of curriculum seed definitions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDraft {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description_text: Option<String>,
}

fn bounded(field: &str, value: &str, max_chars: usize, required: bool) -> Result<String> {
    let t = value.trim();
    if required && t.is_empty() {
        return Err(GradeError::validation_with(
            format!("{} must not be empty", field),
            json!({ "field": field }),
        ));
    }
    let len = t.chars().count();
    if len > max_chars {
        return Err(GradeError::validation_with(
            format!("{} length must be <= {}", field, max_chars),
            json!({ "field": field, "length": len, "max": max_chars }),
        ));
    }
    Ok(t.to_string())
}

fn normalize_draft(draft: &BlockDraft) -> Result<BlockDraft> {
    Ok(BlockDraft {
        code: bounded("code", &draft.code, CODE_MAX_CHARS, true)?,
        name: bounded("name", &draft.name, NAME_MAX_CHARS, true)?,
        description_text: bounded(
            "descriptionText",
            &draft.description_text,
            DESCRIPTION_MAX_CHARS,
            false,
        )?,
    })
}

impl BlockDraft {
    /// Trimmed copy that satisfies the registry's field rules.
    pub fn validate(&self) -> Result<BlockDraft> {
        normalize_draft(self)
    }
}

fn require_admin(actor: &Actor, operation: &'static str) -> Result<()> {
    if actor.is_admin_capable() {
        Ok(())
    } else {
        Err(GradeError::PermissionDenied(operation))
    }
}

fn duplicate_code(subject_id: &str, code: &str) -> GradeError {
    GradeError::validation_with(
        format!("code {} already exists for this subject", code),
        json!({ "subjectId": subject_id, "code": code }),
    )
}

/// Competency blocks of every subject, kept in creation order.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    blocks: Vec<CompetencyBlock>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from already-validated rows, e.g. loaded from storage.
    pub fn from_blocks(blocks: Vec<CompetencyBlock>) -> Self {
        Self { blocks }
    }

    fn code_taken(&self, subject_id: &str, code: &str, except_id: Option<&str>) -> bool {
        self.blocks.iter().any(|b| {
            b.subject_id == subject_id
                && Some(b.id.as_str()) != except_id
                && b.code.eq_ignore_ascii_case(code)
        })
    }

    pub fn add_block(
        &mut self,
        actor: &Actor,
        subject_id: &str,
        draft: &BlockDraft,
    ) -> Result<CompetencyBlock> {
        require_admin(actor, "adding a competency block")?;
        let subject_id = bounded("subjectId", subject_id, usize::MAX, true)?;
        let draft = normalize_draft(draft)?;
        if self.code_taken(&subject_id, &draft.code, None) {
            return Err(duplicate_code(&subject_id, &draft.code));
        }

        let block = CompetencyBlock {
            id: Uuid::new_v4().to_string(),
            subject_id,
            code: draft.code,
            name: draft.name,
            description_text: draft.description_text,
        };
        info!(block_id = %block.id, subject_id = %block.subject_id, code = %block.code, "competency block added");
        self.blocks.push(block.clone());
        Ok(block)
    }

    /// Adds every definition or none of them.
    pub fn import_blocks(
        &mut self,
        actor: &Actor,
        subject_id: &str,
        drafts: &[BlockDraft],
    ) -> Result<Vec<CompetencyBlock>> {
        require_admin(actor, "importing competency blocks")?;
        let subject = bounded("subjectId", subject_id, usize::MAX, true)?;

        let mut seen: HashSet<String> = HashSet::new();
        for (i, d) in drafts.iter().enumerate() {
            let d = normalize_draft(d).map_err(|e| match e {
                GradeError::Validation { message, .. } => GradeError::validation_with(
                    format!("definition {}: {}", i, message),
                    json!({ "index": i }),
                ),
                other => other,
            })?;
            let key = d.code.to_ascii_lowercase();
            if !seen.insert(key) || self.code_taken(&subject, &d.code, None) {
                return Err(duplicate_code(&subject, &d.code));
            }
        }

        let mut staged = self.clone();
        let mut added = Vec::with_capacity(drafts.len());
        for d in drafts {
            added.push(staged.add_block(actor, &subject, d)?);
        }
        *self = staged;
        Ok(added)
    }

    pub fn update_block(
        &mut self,
        actor: &Actor,
        block_id: &str,
        patch: &BlockPatch,
    ) -> Result<CompetencyBlock> {
        require_admin(actor, "editing a competency block")?;
        let Some(idx) = self.blocks.iter().position(|b| b.id == block_id) else {
            return Err(GradeError::not_found("block", block_id));
        };

        let current = &self.blocks[idx];
        let merged = normalize_draft(&BlockDraft {
            code: patch.code.clone().unwrap_or_else(|| current.code.clone()),
            name: patch.name.clone().unwrap_or_else(|| current.name.clone()),
            description_text: patch
                .description_text
                .clone()
                .unwrap_or_else(|| current.description_text.clone()),
        })?;
        if self.code_taken(&current.subject_id, &merged.code, Some(block_id)) {
            return Err(duplicate_code(&current.subject_id, &merged.code));
        }

        let block = &mut self.blocks[idx];
        block.code = merged.code;
        block.name = merged.name;
        block.description_text = merged.description_text;
        info!(block_id = %block.id, code = %block.code, "competency block updated");
        Ok(block.clone())
    }

    pub fn remove_block(&mut self, actor: &Actor, block_id: &str) -> Result<CompetencyBlock> {
        require_admin(actor, "deleting a competency block")?;
        let Some(idx) = self.blocks.iter().position(|b| b.id == block_id) else {
            return Err(GradeError::not_found("block", block_id));
        };
        let subject_id = self.blocks[idx].subject_id.clone();
        let remaining = self
            .blocks
            .iter()
            .filter(|b| b.subject_id == subject_id)
            .count();
        if remaining <= 1 {
            return Err(GradeError::InvariantViolation(format!(
                "subject {} must keep at least one competency block",
                subject_id
            )));
        }

        let removed = self.blocks.remove(idx);
        info!(block_id = %removed.id, subject_id = %removed.subject_id, "competency block removed");
        Ok(removed)
    }

    pub fn get_block(&self, block_id: &str) -> Option<&CompetencyBlock> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    pub fn list_blocks(&self, subject_id: &str) -> Vec<&CompetencyBlock> {
        self.blocks
            .iter()
            .filter(|b| b.subject_id == subject_id)
            .collect()
    }

    pub fn block_ids(&self, subject_id: &str) -> Vec<String> {
        self.list_blocks(subject_id)
            .into_iter()
            .map(|b| b.id.clone())
            .collect()
    }
}

/// The four reference blocks used when a subject has no curriculum definitions.
pub fn reference_blocks() -> Vec<BlockDraft> {
    [
        ("PC1", "Competency block 1"),
        ("PC2", "Competency block 2"),
        ("PC3", "Competency block 3"),
        ("PC4", "Competency block 4"),
    ]
    .into_iter()
    .map(|(code, name)| BlockDraft {
        code: code.to_string(),
        name: name.to_string(),
        description_text: String::new(),
    })
    .collect()
}
