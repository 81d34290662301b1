use std::collections::HashSet;
use std::sync::Arc;

use block_client::BlockFetcher;
use bytes::Bytes;
use drive_config::{ArchiveConfig, DownloadConfig};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc::{self, Sender};
use tracing::{debug, info, warn};
use transfer::{ContentTransform, SinkChunk, disambiguated_name};

use crate::concurrent_iterator::{ArchiveItem, ConcurrentIterator, IterControls};
use crate::error::Result;
use crate::tree_loader::FolderTreeLoader;
use crate::types::FolderSource;
use crate::zip::ZipWriter;

/// The archive output: ZIP bytes, terminated by an error item on abort so
/// downstream consumers observe a clean failure rather than silent
/// truncation.
pub type ArchiveByteStream = BoxStream<'static, Result<Bytes>>;

/// Streams a remote folder tree into a single ZIP archive.
///
/// Composes the trio: a [`FolderTreeLoader`] discovering entries, a
/// [`ConcurrentIterator`] running bounded per-file downloads in discovery
/// order, and the ZIP serializer writing entries as they complete. The
/// output stream is consumable long before the whole tree has finished
/// downloading.
pub struct ArchiveGenerator {
    loader: FolderTreeLoader,
    iterator: ConcurrentIterator,
    out_depth: usize,
}

impl ArchiveGenerator {
    /// Starts folder traversal immediately; downloads begin on `start()`.
    pub fn new(
        source: Arc<dyn FolderSource>,
        fetcher: Arc<dyn BlockFetcher>,
        transform: Option<Arc<dyn ContentTransform>>,
        root_folder_id: &str,
        archive_config: &ArchiveConfig,
        download_config: DownloadConfig,
    ) -> Self {
        let loader = FolderTreeLoader::start(source.clone(), root_folder_id, archive_config);
        let iterator = ConcurrentIterator::new(
            loader.iterate_all_children(),
            source,
            fetcher,
            transform,
            archive_config,
            download_config,
        );
        Self {
            loader,
            iterator,
            out_depth: archive_config.pipe_depth.max(1),
        }
    }

    /// Spawns the archive driver and returns the control handle plus the
    /// archive byte stream.
    pub fn start(self) -> (ArchiveHandle, ArchiveByteStream) {
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(self.out_depth);
        let controls = self.iterator.controls();

        let iterator = self.iterator;
        let err_tx = tx.clone();
        tokio::spawn(async move {
            match drive(iterator, tx).await {
                Ok(()) => info!("Archive complete"),
                Err(e) => {
                    if e.is_cancellation() {
                        debug!("Archive canceled");
                    } else {
                        warn!(error = %e, "Archive failed");
                    }
                    let _ = err_tx.send(Err(e)).await;
                },
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed();

        (
            ArchiveHandle {
                loader: self.loader,
                controls,
            },
            stream,
        )
    }
}

/// Control surface of a running archival.
pub struct ArchiveHandle {
    loader: FolderTreeLoader,
    controls: IterControls,
}

impl ArchiveHandle {
    /// Suspends every active per-file download.
    pub async fn pause(&self) {
        self.controls.pause().await;
    }

    pub fn resume(&self) {
        self.controls.resume();
    }

    /// Aborts the archive writer, all active downloads, and further
    /// traversal.
    pub fn cancel(&self) {
        self.loader.cancel();
        self.controls.cancel();
    }

    /// Total content size of the tree; `Some` once traversal completes.
    pub fn total_size(&self) -> Option<u64> {
        self.loader.total_size()
    }

    pub fn discovered_entries(&self) -> usize {
        self.loader.discovered_count()
    }
}

async fn drive(mut iterator: ConcurrentIterator, tx: Sender<Result<Bytes>>) -> Result<()> {
    let mut zip = ZipWriter::new(tx);
    let mut used_paths: HashSet<String> = HashSet::new();

    loop {
        match iterator.next().await? {
            Some(ArchiveItem::Folder { path }) => {
                let path = unique_path(&mut used_paths, path);
                zip.add_directory(&path).await?;
            },
            Some(ArchiveItem::File { path, mut content, .. }) => {
                let path = unique_path(&mut used_paths, path);
                zip.begin_file(&path).await?;
                while let Some(chunk) = content.recv().await {
                    match chunk {
                        SinkChunk::Data(data) => zip.write_file_chunk(data).await?,
                        SinkChunk::Aborted(err) => return Err(err.into()),
                    }
                }
                zip.finish_file().await?;
            },
            None => return zip.finish().await,
        }
    }
}

/// Sibling entries that resolve to the same archive path get the same
/// `(n)` disambiguation uploads use.
fn unique_path(used: &mut HashSet<String>, mut path: Vec<String>) -> Vec<String> {
    let base = path.last().cloned().unwrap_or_default();
    let mut attempt = 0;
    while !used.insert(path.join("/")) {
        attempt += 1;
        if let Some(last) = path.last_mut() {
            *last = disambiguated_name(&base, attempt);
        } else {
            break;
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_path_disambiguates_duplicates() {
        let mut used = HashSet::new();
        let a = unique_path(&mut used, vec!["docs".into(), "a.txt".into()]);
        let b = unique_path(&mut used, vec!["docs".into(), "a.txt".into()]);
        let c = unique_path(&mut used, vec!["docs".into(), "a.txt".into()]);
        assert_eq!(a.join("/"), "docs/a.txt");
        assert_eq!(b.join("/"), "docs/a (1).txt");
        assert_eq!(c.join("/"), "docs/a (2).txt");
    }
}
