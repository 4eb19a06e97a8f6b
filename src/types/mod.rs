mod errors;
mod monetary;

pub use monetary::Monetary;

pub type TaskId = uuid::Uuid;
pub type BatchNumber = u64;
