// src/lib.rs

//! portalwatch: polls a login-protected web inbox and forwards new messages.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;
