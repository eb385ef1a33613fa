mod atomic;
mod error;
pub mod media;
mod store;

pub use error::StoreError;
pub use media::{MediaError, PlacedFile};
pub use store::FeedStore;
