//! Feed codec: the podcast model to and from RSS 2.0 + iTunes markup.
//!
//! - [`encode`] writes a feed, resolving stored relative references into
//!   absolute URLs and skipping episodes whose audio URL cannot be resolved
//! - [`decode`] reads a feed back, tolerating bad dates and foreign generators
//! - [`resolve`] is the URI-reference resolver used during encoding
//!
//! # Example
//!
//! ```
//! use podfeed::feed::{decode, encode_xml};
//! use podfeed::model::Podcast;
//!
//! let podcast = Podcast::new_default();
//! let xml = encode_xml(&podcast, "https://pod.example.com").unwrap();
//! let back = decode(&xml).unwrap();
//! assert_eq!(back.channel.title, podcast.channel.title);
//! ```

mod decode;
mod encode;
mod resolve;

pub use decode::{decode, DecodeError};
pub use encode::{encode, encode_xml, EncodeError, EncodedFeed, SkippedEpisode, ITUNES_NS};
pub use resolve::{resolve, ResolveError};
