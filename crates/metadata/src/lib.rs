//! rtx-metadata: Feed and stream tuning configuration for the price connector

pub mod error;
pub mod feed;
pub mod stream;

pub use error::MetadataError;
pub use feed::Feed;
pub use stream::StreamConfig;
