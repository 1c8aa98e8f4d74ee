pub mod audit;
pub mod backup;
pub mod blocks;
pub mod core;
pub mod datasets;
pub mod grades;
pub mod publication;
pub mod setup;
