/// Court snapshot and match history persistence.
pub mod court_store;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
