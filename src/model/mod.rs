//! Podcast domain types.
//!
//! - [`Podcast`] is the whole show: a [`Channel`] plus episodes in insertion order
//! - [`Episode`] carries RSS 2.0 and iTunes item metadata
//! - [`episode_id`] derives stable `ep-<date>-<slug>` identifiers

mod episode;
mod id;
mod podcast;

pub use episode::{Episode, EpisodeType, Explicit, DEFAULT_AUDIO_TYPE};
pub use id::{episode_id, slugify, MAX_SLUG_LEN};
pub use podcast::{Channel, Podcast, ValidationError};
