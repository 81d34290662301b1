use std::sync::Arc;

use block_client::BlockSource;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// One child of a remote folder, as the listing API reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    /// Content size for files; folders carry none.
    pub size: Option<u64>,
}

/// A folder-tree entry annotated with the path segments of its parents,
/// in the order discovery found it.
#[derive(Debug, Clone)]
pub struct DiscoveredEntry {
    pub entry: FolderEntry,
    pub parent_path: Vec<String>,
}

impl DiscoveredEntry {
    /// Full path segments, parents then the entry's own name.
    pub fn path_segments(&self) -> Vec<String> {
        let mut segments = self.parent_path.clone();
        segments.push(self.entry.name.clone());
        segments
    }
}

/// Remote folder listing collaborator.
///
/// `list_children` pages with an offset/limit cursor; a full page
/// (`len() == limit`) signals that more children exist. `block_source`
/// hands out the per-file paged block accessor the downloads run on.
#[async_trait::async_trait]
pub trait FolderSource: Send + Sync {
    async fn list_children(
        &self,
        folder_id: &str,
        offset: usize,
        limit: usize,
        cancel: &CancellationToken,
    ) -> block_client::Result<Vec<FolderEntry>>;

    fn block_source(&self, file_id: &str) -> Arc<dyn BlockSource>;
}
