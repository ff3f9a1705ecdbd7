//! Guess Game
//!
//! Tracks one round of the guessing game and exposes the tools the voice host
//! calls while the children play: counting guesses and ending the round.

use crate::{
    Command,
    card::RoundCard,
    tools::{ToolError, ToolRegistry},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

pub const MAX_GUESSES: u32 = 5;

pub const INCREASE_GUESS_COUNT: &str = "increaseGuessCount";
pub const END_GAME: &str = "endGame";

const BASE_INSTRUCTIONS: &str = "You are the host of a guessing game for children. \
You have picked an animal doing an unusual activity (like riding a scooter). \
The children will ask you questions about the animal and the activity. \
Answer the questions in a way that is easy for children to understand, \
and never say the answer unless the round is over.";

/// Instructions for the voice host, primed with the hidden answer.
pub fn host_instructions(description: &str) -> String {
    format!(
        "{BASE_INSTRUCTIONS}\n\n\
         The hidden answer for this round is: {description}.\n\
         Every time a child makes a guess, call `{INCREASE_GUESS_COUNT}`. \
         When a child guesses correctly, call `{END_GAME}` with `success` set to true. \
         If the children run out of guesses ({MAX_GUESSES}), call `{END_GAME}` with \
         `success` set to false and reveal the answer."
    )
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    Won,
    Lost,
}

/// The state of the current round.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GuessRound {
    pub card: RoundCard,
    pub guesses: u32,
    pub max_guesses: u32,
    pub outcome: Option<RoundOutcome>,
}

impl GuessRound {
    pub fn new(card: RoundCard) -> Self {
        Self {
            card,
            guesses: 0,
            max_guesses: MAX_GUESSES,
            outcome: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_guesses.saturating_sub(self.guesses)
    }

    /// The card is revealed once the round has an outcome or the guesses are used up.
    pub fn is_revealed(&self) -> bool {
        self.outcome.is_some() || self.remaining() == 0
    }
}

/// Arguments for `endGame`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct EndGameArgs {
    /// True if the children guessed the animal and its activity.
    pub success: bool,
}

/// Output of `increaseGuessCount`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GuessReport {
    /// False when the guess limit was already reached and nothing changed.
    pub success: bool,
    pub guesses: u32,
    pub remaining: u32,
}

/// Output of `endGame`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EndGameReport {
    pub success: bool,
}

/// Shared handle to a guess round and its tool set.
#[derive(Clone)]
pub struct GuessGame {
    round: Arc<Mutex<GuessRound>>,
    command_tx: Option<mpsc::Sender<Command>>,
}

impl GuessGame {
    /// # Arguments
    ///
    /// * `card` - The hidden answer for the first round.
    /// * `command_tx` - Optional channel on which round events are published.
    pub fn new(card: RoundCard, command_tx: Option<mpsc::Sender<Command>>) -> Self {
        Self {
            round: Arc::new(Mutex::new(GuessRound::new(card))),
            command_tx,
        }
    }

    pub async fn snapshot(&self) -> GuessRound {
        self.round.lock().await.clone()
    }

    /// Starts a new round with a fresh card ("play again").
    pub async fn reset(&self, card: RoundCard) {
        let mut round = self.round.lock().await;
        info!(description = %card.description, "Starting new round");
        *round = GuessRound::new(card);
    }

    /// Counts one guess, up to the round's limit.
    pub async fn increase_guess_count(&self) -> GuessReport {
        let report = {
            let mut round = self.round.lock().await;
            if round.remaining() == 0 {
                GuessReport {
                    success: false,
                    guesses: round.guesses,
                    remaining: 0,
                }
            } else {
                round.guesses += 1;
                GuessReport {
                    success: true,
                    guesses: round.guesses,
                    remaining: round.remaining(),
                }
            }
        };
        info!(guesses = report.guesses, remaining = report.remaining, "Guess counted");

        if report.success {
            self.publish(Command::GuessRecorded {
                guesses: report.guesses,
                remaining: report.remaining,
            })
            .await;
        }
        report
    }

    /// Records the outcome and asks the caller to tear the session down.
    pub async fn end_game(&self, success: bool) -> EndGameReport {
        {
            let mut round = self.round.lock().await;
            round.outcome = Some(if success {
                RoundOutcome::Won
            } else {
                RoundOutcome::Lost
            });
            info!(success, description = %round.card.description, "Round ended");
        }
        self.publish(Command::EndRound { success }).await;
        EndGameReport { success }
    }

    /// The tools the voice host may call for this game.
    pub fn tools(&self) -> Result<ToolRegistry, ToolError> {
        let mut registry = ToolRegistry::new();

        let game = self.clone();
        registry.register_fn(
            INCREASE_GUESS_COUNT,
            "Increase the guess count by one. Call this every time a child makes a guess.",
            None,
            move |_args: Value| {
                let game = game.clone();
                async move {
                    Ok::<_, anyhow::Error>(serde_json::to_value(game.increase_guess_count().await)?)
                }
            },
        )?;

        let game = self.clone();
        registry.register_typed(
            END_GAME,
            "End the game. Call this when a child guesses correctly or when the guesses run out.",
            move |args: EndGameArgs| {
                let game = game.clone();
                async move { Ok::<_, anyhow::Error>(game.end_game(args.success).await) }
            },
        )?;

        Ok(registry)
    }

    async fn publish(&self, command: Command) {
        if let Some(tx) = &self.command_tx {
            if tx.send(command).await.is_err() {
                warn!("Failed to publish game command: receiver dropped.");
            }
        }
    }
}
