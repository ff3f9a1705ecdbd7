//! Guess Who API Library Crate
//!
//! HTTP routes backing the voice guessing game: realtime session credentials,
//! card drawing, card illustration and push-to-talk voice chat. The binaries
//! are thin wrappers around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod openai;
pub mod router;
pub mod state;
