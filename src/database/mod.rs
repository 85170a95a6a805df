//! SQLite persistence: schema, the retry layer, per-modality writers,
//! read-side lookups, and cross-table deletion.

pub mod lookup;
pub mod maintenance;
pub mod modality;
pub mod retry;
pub mod schema;
pub mod writer;
