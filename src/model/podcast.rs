use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::episode::{Episode, Explicit};

/// Errors raised when a mutation would break a model invariant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Link must be an http(s) URL: {0}")]
    InvalidLink(String),

    #[error("Language must be a code like 'en' or 'en-us': {0}")]
    InvalidLanguage(String),

    #[error("Episode id must not be empty")]
    EmptyEpisodeId,

    #[error("Episode id already exists: {0}")]
    DuplicateEpisodeId(String),

    #[error("Audio URL '{url}' cannot be resolved: {reason}")]
    InvalidAudioUrl { url: String, reason: String },

    #[error("Image URL '{url}' cannot be resolved: {reason}")]
    InvalidImageUrl { url: String, reason: String },
}

/// Channel-level podcast metadata: everything but the episode list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
    pub pub_date: DateTime<Utc>,

    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub summary: String,
    /// URI-reference to the artwork, possibly relative.
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit: Option<Explicit>,
    #[serde(default)]
    pub category: String,
}

impl Channel {
    /// Checks the fields a settings update must carry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("title", &self.title),
            ("link", &self.link),
            ("description", &self.description),
            ("language", &self.language),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(name));
            }
        }

        if !self.link.starts_with("http://") && !self.link.starts_with("https://") {
            return Err(ValidationError::InvalidLink(self.link.clone()));
        }

        if !is_language_code(&self.language) {
            return Err(ValidationError::InvalidLanguage(self.language.clone()));
        }

        Ok(())
    }
}

/// `xx` or `xx-yy`, lowercase ASCII letters only.
fn is_language_code(code: &str) -> bool {
    let two_letters = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_lowercase());
    match code.split_once('-') {
        Some((lang, region)) => two_letters(lang) && two_letters(region),
        None => two_letters(code),
    }
}

/// The whole podcast: channel metadata plus episodes in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    #[serde(flatten)]
    pub channel: Channel,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl Podcast {
    /// Placeholder podcast written on first start.
    ///
    /// The timestamp is truncated to whole seconds so a freshly written
    /// default decodes back to an identical value.
    pub fn new_default() -> Self {
        Self {
            channel: Channel {
                title: "My Podcast".to_string(),
                link: "https://example.com".to_string(),
                description: "A podcast about interesting topics".to_string(),
                language: "en-us".to_string(),
                pub_date: Utc::now().trunc_subsecs(0),
                author: "Podcast Creator".to_string(),
                subtitle: "Interesting conversations".to_string(),
                summary: "A podcast about interesting topics".to_string(),
                image_url: "/static/default-podcast-artwork.jpg".to_string(),
                explicit: Some(Explicit::No),
                category: "Technology".to_string(),
            },
            episodes: Vec::new(),
        }
    }

    pub fn episode(&self, id: &str) -> Option<&Episode> {
        self.episodes.iter().find(|ep| ep.id == id)
    }

    /// Appends an episode, advancing the channel date if the episode is newer.
    pub(crate) fn push_episode(&mut self, episode: Episode) -> Result<(), ValidationError> {
        if episode.id.trim().is_empty() {
            return Err(ValidationError::EmptyEpisodeId);
        }
        if self.episode(&episode.id).is_some() {
            return Err(ValidationError::DuplicateEpisodeId(episode.id));
        }

        if episode.pub_date > self.channel.pub_date {
            self.channel.pub_date = episode.pub_date;
        }
        self.episodes.push(episode);
        Ok(())
    }

    /// Removes and returns the episode with `id`, if any.
    pub(crate) fn remove_episode(&mut self, id: &str) -> Option<Episode> {
        let index = self.episodes.iter().position(|ep| ep.id == id)?;
        Some(self.episodes.remove(index))
    }
}
