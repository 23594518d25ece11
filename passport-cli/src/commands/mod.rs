//! Subcommand implementations.

pub mod accounts;
pub mod attestation;
pub mod forget;
pub mod login;
pub mod register;
pub mod status;
