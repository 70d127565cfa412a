use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ByteStream, ItemFetcher, SnapshotProvider};
use crate::dispatcher::{Delivery, Handler, HandlerOutcome};
use crate::error::{Result, SluiceError};
use crate::item::RemoteFile;

/// Lists and reads regular files directly under one directory.
#[derive(Clone, Debug)]
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, item: &RemoteFile) -> Result<PathBuf> {
        if !is_plain_file_name(&item.name) {
            return Err(SluiceError::fetch(&item.name, "name escapes the source directory"));
        }
        Ok(self.root.join(&item.name))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl SnapshotProvider<RemoteFile> for LocalDirectorySource {
    async fn list_current_items(&self) -> Result<Vec<RemoteFile>> {
        let mut dir = fs::read_dir(&self.root).await.map_err(|err| {
            SluiceError::SourceUnavailable(format!(
                "failed to read directory {}: {err}",
                self.root.display()
            ))
        })?;

        let mut files = Vec::new();
        while let Some(entry_res) = dir.next_entry().await.transpose() {
            let entry = match entry_res {
                Ok(entry) => entry,
                Err(err) => {
                    return Err(SluiceError::SourceUnavailable(format!(
                        "listing of {} interrupted: {err}",
                        self.root.display()
                    )));
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Removed between read_dir and stat.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(target: "sluice::poll", entry = %name, error = %err, "skipping entry due to metadata error");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let modified_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                .unwrap_or_default();
            files.push(RemoteFile::new(name, metadata.len(), modified_ms));
        }

        // read_dir order is platform dependent.
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(target: "sluice::poll", root = %self.root.display(), files = files.len(), "directory listed");
        Ok(files)
    }
}

#[async_trait]
impl ItemFetcher<RemoteFile> for LocalDirectorySource {
    async fn fetch(&self, item: &RemoteFile) -> Result<ByteStream> {
        let path = self.resolve(item)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|err| SluiceError::fetch(&item.name, err))?;
        Ok(ReaderStream::new(file).boxed())
    }
}

/// Copies fetched content into a destination directory.
///
/// Content is streamed into a temporary name first and renamed into place, so
/// readers of the destination never see a partial file.
#[derive(Clone, Debug)]
pub struct DirectoryMirrorHandler {
    destination: PathBuf,
}

impl DirectoryMirrorHandler {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[async_trait]
impl Handler<RemoteFile> for DirectoryMirrorHandler {
    async fn try_handle(&self, delivery: &Delivery<RemoteFile>) -> Result<HandlerOutcome> {
        let name = &delivery.item.name;
        if !delivery.has_content() {
            return Ok(HandlerOutcome::NotApplicable);
        }
        if !is_plain_file_name(name) {
            return Err(SluiceError::processing(name, "name escapes the destination directory"));
        }
        let Some(mut content) = delivery.open().await? else {
            return Ok(HandlerOutcome::NotApplicable);
        };

        fs::create_dir_all(&self.destination).await?;
        let path = self.destination.join(name);
        let tmp = self
            .destination
            .join(format!(".{name}.tmp-{}", Uuid::new_v4().simple()));

        let written = match copy_to_file(name, &mut content, &tmp).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(err);
            }
        };
        fs::rename(&tmp, &path).await.map_err(|err| {
            SluiceError::processing(
                name,
                format!("failed to move {} -> {}: {err}", tmp.display(), path.display()),
            )
        })?;

        debug!(target: "sluice::dispatch", file = %name, bytes = written, "file mirrored");
        Ok(HandlerOutcome::Consumed)
    }
}

/// Drains `content` into a new file at `path`, returning the bytes written.
async fn copy_to_file(name: &str, content: &mut ByteStream, path: &Path) -> Result<u64> {
    let write_failed =
        |err: io::Error| SluiceError::processing(name, format!("failed to write {}: {err}", path.display()));

    let mut file = fs::File::create(path).await.map_err(write_failed)?;
    let mut written = 0u64;
    while let Some(chunk) = content.next().await {
        let chunk = chunk.map_err(|err| SluiceError::fetch(name, err))?;
        file.write_all(&chunk).await.map_err(write_failed)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_failed)?;
    file.sync_all().await.map_err(write_failed)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn lists_only_regular_files_sorted_by_name() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("b.csv"), b"bb")?;
        std::fs::write(dir.path().join("a.csv"), b"a")?;
        std::fs::create_dir(dir.path().join("nested"))?;

        let source = LocalDirectorySource::new(dir.path());
        let files = source.list_current_items().await?;
        let names: Vec<_> = files.iter().map(|f| (f.name.as_str(), f.size)).collect();
        assert_eq!(names, [("a.csv", 1), ("b.csv", 2)]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_directory_is_source_unavailable() {
        let source = LocalDirectorySource::new("/definitely/not/here");
        let err = source.list_current_items().await.unwrap_err();
        assert!(matches!(err, SluiceError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn mirror_writes_fetched_content() -> Result<()> {
        let src = TempDir::new()?;
        let dst = TempDir::new()?;
        std::fs::write(src.path().join("report.csv"), b"id,total\n1,2\n")?;

        let source = LocalDirectorySource::new(src.path());
        let item = source.list_current_items().await?.remove(0);
        let delivery = Delivery::new(item).with_fetcher(Arc::new(source));

        let handler = DirectoryMirrorHandler::new(dst.path());
        assert_eq!(handler.try_handle(&delivery).await?, HandlerOutcome::Consumed);
        assert_eq!(
            std::fs::read(dst.path().join("report.csv"))?,
            b"id,total\n1,2\n"
        );
        assert_eq!(std::fs::read_dir(dst.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn mirror_streams_content_larger_than_one_chunk() -> Result<()> {
        let src = TempDir::new()?;
        let dst = TempDir::new()?;
        let body: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        std::fs::write(src.path().join("large.bin"), &body)?;

        let source = Arc::new(LocalDirectorySource::new(src.path()));
        let item = source.list_current_items().await?.remove(0);

        let mut stream = source.fetch(&item).await?;
        let mut chunks = 0;
        while let Some(chunk) = stream.next().await {
            chunk?;
            chunks += 1;
        }
        assert!(chunks > 1);

        let delivery = Delivery::new(item).with_fetcher(source);
        let handler = DirectoryMirrorHandler::new(dst.path());
        assert_eq!(handler.try_handle(&delivery).await?, HandlerOutcome::Consumed);
        assert_eq!(std::fs::read(dst.path().join("large.bin"))?, body);
        Ok(())
    }

    #[tokio::test]
    async fn mirror_leaves_no_temp_file_when_the_source_vanished() -> Result<()> {
        let src = TempDir::new()?;
        let dst = TempDir::new()?;
        let source = Arc::new(LocalDirectorySource::new(src.path()));
        let delivery = Delivery::new(RemoteFile::new("gone.csv", 3, 1)).with_fetcher(source);

        let handler = DirectoryMirrorHandler::new(dst.path());
        let err = handler.try_handle(&delivery).await.unwrap_err();
        assert!(matches!(err, SluiceError::FetchFailed { .. }));
        assert_eq!(std::fs::read_dir(dst.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn mirror_without_fetcher_is_not_applicable() -> Result<()> {
        let dst = TempDir::new()?;
        let handler = DirectoryMirrorHandler::new(dst.path());
        let delivery = Delivery::new(RemoteFile::new("a.csv", 1, 1));
        assert_eq!(handler.try_handle(&delivery).await?, HandlerOutcome::NotApplicable);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_rejects_path_traversal() {
        let source = LocalDirectorySource::new("/tmp");
        let opened = source.fetch(&RemoteFile::new("../etc/passwd", 1, 1)).await;
        assert!(matches!(opened, Err(SluiceError::FetchFailed { .. })));
    }
}
