use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use drive_config::ArchiveConfig;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::types::{DiscoveredEntry, EntryKind, FolderSource};

/// Lazily enumerates a remote folder tree, breadth-first per directory and
/// to unbounded depth, accumulating a flat queue of discovered entries
/// annotated with their parent-path segments.
///
/// Consumers iterate through [`iterate_all_children`]
/// (FolderTreeLoader::iterate_all_children) and receive entries as they are
/// discovered; nobody waits for the whole tree before starting downloads.
pub struct FolderTreeLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    state: Mutex<TreeState>,
    notify: Notify,
    cancel: CancellationToken,
}

struct TreeState {
    entries: Vec<DiscoveredEntry>,
    done: bool,
    failed: Option<ArchiveError>,
    total_size: u64,
}

impl FolderTreeLoader {
    /// Starts the traversal task immediately.
    pub fn start(source: Arc<dyn FolderSource>, root_folder_id: &str, config: &ArchiveConfig) -> Self {
        let inner = Arc::new(LoaderInner {
            state: Mutex::new(TreeState {
                entries: Vec::new(),
                done: false,
                failed: None,
                total_size: 0,
            }),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
        });

        let traversal = inner.clone();
        let root = root_folder_id.to_string();
        let limit = config.list_page_size.max(1);
        tokio::spawn(async move {
            traverse(traversal, source, root, limit).await;
        });

        Self { inner }
    }

    /// The running total content size; `Some` once traversal completes.
    pub fn total_size(&self) -> Option<u64> {
        let state = self.inner.state.lock().unwrap();
        state.done.then_some(state.total_size)
    }

    pub fn discovered_count(&self) -> usize {
        self.inner.state.lock().unwrap().entries.len()
    }

    /// Stops further traversal and makes any iterator terminate.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        self.inner.notify.notify_waiters();
    }

    /// A lazy producer over the discovered entries: already-known entries
    /// yield immediately, and the iterator waits for notification while
    /// traversal is still filling the queue. Restartable only by
    /// constructing a new iterator.
    pub fn iterate_all_children(&self) -> ChildIterator {
        ChildIterator {
            inner: self.inner.clone(),
            pos: 0,
        }
    }
}

async fn traverse(inner: Arc<LoaderInner>, source: Arc<dyn FolderSource>, root: String, limit: usize) {
    let mut folders: VecDeque<(String, Vec<String>)> = VecDeque::new();
    folders.push_back((root, Vec::new()));

    while let Some((folder_id, path)) = folders.pop_front() {
        let mut offset = 0usize;
        loop {
            if inner.cancel.is_cancelled() {
                fail(&inner, ArchiveError::Cancelled);
                return;
            }

            let children = match source.list_children(&folder_id, offset, limit, &inner.cancel).await {
                Ok(children) => children,
                Err(e) => {
                    warn!(folder_id = %folder_id, error = %e, "Folder listing failed");
                    fail(&inner, e.into());
                    return;
                },
            };

            let full_page = children.len() == limit;
            offset += children.len();

            {
                let mut state = inner.state.lock().unwrap();
                for child in children {
                    if child.kind == EntryKind::Folder {
                        let mut child_path = path.clone();
                        child_path.push(child.name.clone());
                        folders.push_back((child.id.clone(), child_path));
                    }
                    state.total_size += child.size.unwrap_or(0);
                    state.entries.push(DiscoveredEntry {
                        entry: child,
                        parent_path: path.clone(),
                    });
                }
            }
            inner.notify.notify_waiters();

            if !full_page {
                break;
            }
        }
        debug!(folder_id = %folder_id, "Folder traversed");
    }

    {
        let mut state = inner.state.lock().unwrap();
        state.done = true;
        info!(entries = state.entries.len(), total_size = state.total_size, "Folder traversal complete");
    }
    inner.notify.notify_waiters();
}

fn fail(inner: &Arc<LoaderInner>, err: ArchiveError) {
    inner.state.lock().unwrap().failed = Some(err);
    inner.notify.notify_waiters();
}

/// Yields discovered entries in discovery order.
pub struct ChildIterator {
    inner: Arc<LoaderInner>,
    pos: usize,
}

impl ChildIterator {
    /// Waits for the next entry; `Ok(None)` once the whole tree has been
    /// yielded.
    pub async fn next(&mut self) -> Result<Option<DiscoveredEntry>> {
        loop {
            let inner = self.inner.clone();
            let notified = inner.notify.notified();
            match self.try_next()? {
                Step::Entry(e) => return Ok(Some(e)),
                Step::Done => return Ok(None),
                Step::Pending => notified.await,
            }
        }
    }

    /// Non-blocking variant: `Ok(None)` means nothing is available right
    /// now (either traversal is still running or it has finished).
    pub fn poll_next(&mut self) -> Result<Option<DiscoveredEntry>> {
        match self.try_next()? {
            Step::Entry(e) => Ok(Some(e)),
            _ => Ok(None),
        }
    }

    fn try_next(&mut self) -> Result<Step> {
        let state = self.inner.state.lock().unwrap();
        if self.pos < state.entries.len() {
            let entry = state.entries[self.pos].clone();
            self.pos += 1;
            return Ok(Step::Entry(entry));
        }
        if let Some(err) = &state.failed {
            return Err(err.clone());
        }
        if state.done {
            return Ok(Step::Done);
        }
        if self.inner.cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        Ok(Step::Pending)
    }
}

enum Step {
    Entry(DiscoveredEntry),
    Done,
    Pending,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use block_client::{BlockPage, BlockPagination, BlockSource};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::types::FolderEntry;

    struct StaticTree {
        children: HashMap<String, Vec<FolderEntry>>,
    }

    #[async_trait::async_trait]
    impl FolderSource for StaticTree {
        async fn list_children(
            &self,
            folder_id: &str,
            offset: usize,
            limit: usize,
            _cancel: &CancellationToken,
        ) -> block_client::Result<Vec<FolderEntry>> {
            let all = self.children.get(folder_id).cloned().unwrap_or_default();
            Ok(all.into_iter().skip(offset).take(limit).collect())
        }

        fn block_source(&self, _file_id: &str) -> Arc<dyn BlockSource> {
            struct Never;
            #[async_trait::async_trait]
            impl BlockSource for Never {
                async fn get_blocks(
                    &self,
                    _p: BlockPagination,
                    _c: &CancellationToken,
                ) -> block_client::Result<BlockPage> {
                    Ok(BlockPage::Paged(vec![]))
                }
            }
            Arc::new(Never)
        }
    }

    fn file(id: &str, name: &str, size: u64) -> FolderEntry {
        FolderEntry {
            id: id.to_string(),
            name: name.to_string(),
            kind: EntryKind::File,
            size: Some(size),
        }
    }

    fn folder(id: &str, name: &str) -> FolderEntry {
        FolderEntry {
            id: id.to_string(),
            name: name.to_string(),
            kind: EntryKind::Folder,
            size: None,
        }
    }

    fn sample_tree() -> Arc<StaticTree> {
        let mut children = HashMap::new();
        children.insert(
            "root".to_string(),
            vec![folder("a", "A"), folder("b", "B"), file("f0", "top.txt", 5)],
        );
        children.insert("a".to_string(), vec![file("f1", "file1", 10), file("f2", "file2", 20)]);
        children.insert("b".to_string(), vec![file("f3", "file3", 30)]);
        Arc::new(StaticTree { children })
    }

    #[tokio::test]
    async fn test_breadth_first_discovery_order_and_total_size() {
        let loader = FolderTreeLoader::start(sample_tree(), "root", &ArchiveConfig::default());
        let mut iter = loader.iterate_all_children();

        let mut seen = Vec::new();
        while let Some(entry) = iter.next().await.unwrap() {
            seen.push(entry.path_segments().join("/"));
        }

        assert_eq!(
            seen,
            vec!["A", "B", "top.txt", "A/file1", "A/file2", "B/file3"]
        );
        assert_eq!(loader.total_size(), Some(65));
    }

    #[tokio::test]
    async fn test_pagination_walks_every_page() {
        let mut children = HashMap::new();
        children.insert(
            "root".to_string(),
            (0..7).map(|i| file(&format!("f{i}"), &format!("file{i}"), 1)).collect(),
        );
        let source = Arc::new(StaticTree { children });

        let mut config = ArchiveConfig::default();
        config.list_page_size = 3;

        let loader = FolderTreeLoader::start(source, "root", &config);
        let mut iter = loader.iterate_all_children();

        let mut count = 0;
        while iter.next().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 7);
    }

    #[tokio::test]
    async fn test_cancel_terminates_iterator() {
        let loader = FolderTreeLoader::start(sample_tree(), "root", &ArchiveConfig::default());
        loader.cancel();

        let mut iter = loader.iterate_all_children();
        // Either entries discovered before the cancel or the cancellation
        // error; the iterator must terminate rather than hang.
        loop {
            match iter.next().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    assert!(e.is_cancellation());
                    break;
                },
            }
        }
    }
}
