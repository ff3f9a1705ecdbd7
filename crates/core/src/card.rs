//! Round Cards
//!
//! A card is the hidden answer for one round: a random animal paired with a
//! random, unusual activity. The card is usable immediately; its illustration
//! is commissioned separately through an [`ImageClient`] and may fail without
//! affecting the round.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const ANIMAL_NAMES: [&str; 20] = [
    "Elephant",
    "Giraffe",
    "Lion",
    "Tiger",
    "Zebra",
    "Kangaroo",
    "Panda",
    "Penguin",
    "Monkey",
    "Rabbit",
    "Horse",
    "Bear",
    "Fox",
    "Wolf",
    "Deer",
    "Owl",
    "Dolphin",
    "Shark",
    "Crocodile",
    "Flamingo",
];

pub const ANIMAL_SCENARIOS: [&str; 20] = [
    "jumping out of an airplane",
    "landing on the moon",
    "riding a skateboard",
    "eating a giant ice cream",
    "playing video games",
    "surfing a huge wave",
    "having a tea party",
    "dancing in a disco",
    "painting a masterpiece",
    "building a sandcastle",
    "playing soccer",
    "flying a kite",
    "reading a book in a library",
    "going on a treasure hunt",
    "baking a cake",
    "singing on stage",
    "exploring a jungle",
    "riding a roller coaster",
    "having a snowball fight",
    "taking selfies with friends",
];

/// Image shown while the real illustration is being generated.
pub const PLACEHOLDER_IMAGE: &str = "/cat.jpg";

/// The hidden subject of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCard {
    pub animal: String,
    pub scenario: String,
    /// `"<Animal> <scenario>"`, the text the host and the image model see.
    pub description: String,
    /// A URL or `data:` URI, absent until the card has been illustrated.
    pub image: Option<String>,
}

impl RoundCard {
    pub fn new(animal: impl Into<String>, scenario: impl Into<String>) -> Self {
        let animal = animal.into();
        let scenario = scenario.into();
        let description = format!("{} {}", animal, scenario);
        Self {
            animal,
            scenario,
            description,
            image: None,
        }
    }

    /// Draws a uniformly random animal and scenario.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // Both pools are non-empty constants.
        let animal = ANIMAL_NAMES.choose(rng).copied().unwrap_or(ANIMAL_NAMES[0]);
        let scenario = ANIMAL_SCENARIOS
            .choose(rng)
            .copied()
            .unwrap_or(ANIMAL_SCENARIOS[0]);
        Self::new(animal, scenario)
    }
}

/// Something that can turn a card description into an image reference.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Returns a URL or an inline `data:` URI for the described scene.
    async fn fetch_image(&self, description: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct ImageResponse {
    image: Option<String>,
    error: Option<String>,
}

/// An [`ImageClient`] backed by the service's `GET /api/image` endpoint.
pub struct HttpImageClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpImageClient {
    /// # Arguments
    ///
    /// * `base_url` - Root of the API service, e.g. `http://localhost:3000`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/image", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl ImageClient for HttpImageClient {
    async fn fetch_image(&self, description: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("description", description)])
            .send()
            .await
            .context("Failed to fetch image")?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<ImageResponse>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| status.to_string());
            return Err(anyhow!("Failed to fetch image: {}", detail));
        }
        let body: ImageResponse = response.json().await.context("Failed to fetch image")?;
        body.image
            .filter(|image| !image.is_empty())
            .context("No image returned")
    }
}

/// Draws cards and illustrates them.
pub struct CardService {
    images: Arc<dyn ImageClient>,
    placeholder: String,
}

impl CardService {
    pub fn new(images: Arc<dyn ImageClient>) -> Self {
        Self {
            images,
            placeholder: PLACEHOLDER_IMAGE.to_string(),
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    /// A fresh card showing the placeholder image.
    pub fn draw(&self) -> RoundCard {
        let mut card = RoundCard::random(&mut rand::rng());
        card.image = Some(self.placeholder.clone());
        card
    }

    /// Replaces the card's image with a generated one.
    ///
    /// On failure the card keeps whatever image it had and the error is returned
    /// for display.
    pub async fn illustrate(&self, card: &mut RoundCard) -> Result<()> {
        let image = self.images.fetch_image(&card.description).await?;
        info!(description = %card.description, "Card illustrated");
        card.image = Some(image);
        Ok(())
    }

    /// Draws a card and illustrates it, returning any illustration error as a message.
    pub async fn draw_illustrated(&self) -> (RoundCard, Option<String>) {
        let mut card = self.draw();
        match self.illustrate(&mut card).await {
            Ok(()) => (card, None),
            Err(e) => {
                warn!(description = %card.description, error = %e, "Card illustration failed");
                (card, Some(e.to_string()))
            }
        }
    }
}
