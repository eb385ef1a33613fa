use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MIME type written on enclosures whose episode carries none.
pub const DEFAULT_AUDIO_TYPE: &str = "audio/mpeg";

/// iTunes explicit-content marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Explicit {
    Yes,
    No,
    Clean,
}

impl Explicit {
    pub fn as_str(self) -> &'static str {
        match self {
            Explicit::Yes => "yes",
            Explicit::No => "no",
            Explicit::Clean => "clean",
        }
    }
}

impl fmt::Display for Explicit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Explicit {
    type Err = String;

    /// Accepts both the legacy `yes`/`no`/`clean` vocabulary and the
    /// `true`/`false` form newer directories expect.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "explicit" => Ok(Explicit::Yes),
            "no" | "false" => Ok(Explicit::No),
            "clean" => Ok(Explicit::Clean),
            other => Err(format!("unknown explicit value: {other}")),
        }
    }
}

/// iTunes episode type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeType {
    Full,
    Trailer,
    Bonus,
}

impl EpisodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeType::Full => "full",
            EpisodeType::Trailer => "trailer",
            EpisodeType::Bonus => "bonus",
        }
    }
}

impl fmt::Display for EpisodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(EpisodeType::Full),
            "trailer" => Ok(EpisodeType::Trailer),
            "bonus" => Ok(EpisodeType::Bonus),
            other => Err(format!("unknown episode type: {other}")),
        }
    }
}

/// A single podcast episode.
///
/// `audio_url` is a URI-reference exactly as it was stored; it is only made
/// absolute when the feed is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub title: String,
    pub description: String,
    pub pub_date: DateTime<Utc>,
    /// Empty means "use the id".
    #[serde(default)]
    pub guid: String,

    pub audio_url: String,
    /// Enclosure length in bytes.
    pub audio_length: u64,
    pub audio_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit: Option<Explicit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_type: Option<EpisodeType>,

    /// Audio filename inside the media directory.
    #[serde(default)]
    pub filename: String,
    /// Not carried by the feed, so `None` for decoded episodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Episode {
    /// Creates an episode with the required fields and every optional
    /// iTunes field unset.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        pub_date: DateTime<Utc>,
        audio_url: impl Into<String>,
        audio_length: u64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            pub_date,
            guid: String::new(),
            audio_url: audio_url.into(),
            audio_length,
            audio_type: DEFAULT_AUDIO_TYPE.to_string(),
            duration: None,
            explicit: None,
            episode_number: None,
            season_number: None,
            episode_type: None,
            filename: String::new(),
            uploaded_at: None,
        }
    }

    /// The guid written to the feed: the stored guid, or the id when empty.
    pub fn effective_guid(&self) -> &str {
        if self.guid.trim().is_empty() {
            &self.id
        } else {
            &self.guid
        }
    }
}
