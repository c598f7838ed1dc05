//! Token issuance, validation and the OAuth2 authorization-code grant.

pub mod client_store;
pub mod clock;
pub mod code_store;
pub mod config;
pub mod context;
pub mod crypto;
pub mod endpoints;
pub mod flow;
pub mod gate;
pub mod http;
pub mod jwt;
pub mod keys;
pub mod service;
pub mod token_store;
pub mod types;
