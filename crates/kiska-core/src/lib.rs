//! Core types, config, errors, transcript and credential model for KISKA.

pub mod auth;
pub mod config;
pub mod error;
pub mod transcript;
