pub mod card;
pub mod energy;
pub mod game;
pub mod tools;

/// Round events the game publishes to the runtime driving the session.
///
/// The game never touches the voice session itself; the runtime reacts to
/// these, for example by revealing the card or stopping the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A guess was counted.
    GuessRecorded { guesses: u32, remaining: u32 },
    /// The host ended the round; the runtime should tear the session down.
    EndRound { success: bool },
}
