//! Library crate for courtside-back, exposing modules for binaries and integration tests.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod uno;

#[cfg(test)]
pub(crate) mod test_support;
