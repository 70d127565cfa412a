//! Seams to the outside world: listing a source and fetching item content.

mod local;

pub use local::{DirectoryMirrorHandler, LocalDirectorySource};

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

/// An item's content, read chunk by chunk.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Produces the complete current listing of a source.
///
/// Implementations report transport problems as
/// [`SluiceError::SourceUnavailable`](crate::error::SluiceError::SourceUnavailable);
/// a failed listing never touches the backlog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotProvider<T: Send + Sync + 'static>: Send + Sync {
    async fn list_current_items(&self) -> Result<Vec<T>>;
}

/// Opens an item's content so handlers see bytes instead of a name.
///
/// Each call opens a new stream; content is never buffered whole.
#[async_trait]
pub trait ItemFetcher<T>: Send + Sync {
    async fn fetch(&self, item: &T) -> Result<ByteStream>;
}
