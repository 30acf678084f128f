pub mod admin;
pub mod events;
pub mod health;
pub mod public;
pub mod sse;
pub mod validation;
