//! Client side of an OpenAI realtime voice session over a peer connection.
//!
//! [`ConnectionManager`] negotiates and owns the session, [`ToolBridge`]
//! answers the model's function calls from a
//! [`ToolRegistry`](guesswho_core::tools::ToolRegistry), and
//! [`EnergySampler`] turns the model's voice into an animation scale.

pub mod bridge;
pub mod connection;
pub mod error;
pub mod events;
pub mod negotiate;
pub mod sampler;
pub mod transport;

pub use bridge::{Diagnostic, ToolBridge};
pub use connection::{Collaborators, ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{RealtimeError, Result};
pub use negotiate::{
    EphemeralKey, HttpSdpNegotiator, HttpSessionTokenProvider, RoundContext, SdpNegotiator,
    SessionTokenProvider,
};
pub use sampler::{EnergySampler, SamplerHandle};
