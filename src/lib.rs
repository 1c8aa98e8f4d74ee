//! Competency-block grading: block registry, grade aggregation, and the
//! publish/edit-lock lifecycle, plus the JSON-lines sidecar that hosts them.

pub mod actor;
pub mod audit;
pub mod backup;
pub mod blocks;
pub mod calc;
pub mod clock;
pub mod db;
pub mod error;
pub mod ipc;
pub mod publication;
pub mod session;

pub use actor::{Actor, Role};
pub use blocks::{BlockDraft, BlockPatch, BlockRegistry, CompetencyBlock};
pub use calc::{PeriodScoreSet, Slot};
pub use error::{GradeError, Result};
pub use publication::{PublicationRecord, PublicationStatus};
pub use session::{Dataset, GradingSession, StudentGradeRecord};
