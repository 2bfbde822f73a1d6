pub mod cache;
pub mod reconcile;
pub mod sources;
