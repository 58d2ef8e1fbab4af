//! Database queries for the sync service
//!
//! One module per table family. Query functions take either a pool or a
//! `&mut SqliteConnection` so callers can compose them inside transactions.

pub mod curriculum;
pub mod memberships;
pub mod monitors;
pub mod study_plan_items;
pub mod study_plans;
