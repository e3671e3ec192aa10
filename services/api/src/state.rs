//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the credential minter and configuration.

use crate::{config::Config, minter::CredentialMinter};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub minter: Arc<dyn CredentialMinter>,
    pub config: Arc<Config>,
}
