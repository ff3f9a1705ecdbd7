//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the configuration
//! and the upstream service clients shared by every handler.

use crate::{
    config::Config,
    openai::{ImageGenerator, SessionIssuer, VoiceAssistant},
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionIssuer>,
    pub images: Arc<dyn ImageGenerator>,
    pub voice: Arc<dyn VoiceAssistant>,
}
