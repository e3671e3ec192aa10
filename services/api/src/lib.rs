//! Mentor API Library Crate
//!
//! This library contains the logic for the credential-minting web service:
//! application state, the minter client, API handlers, and routing. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod minter;
pub mod router;
pub mod state;
