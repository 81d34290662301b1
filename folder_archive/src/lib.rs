mod concurrent_iterator;
mod error;
mod generator;
mod tree_loader;
mod types;
mod zip;

pub use concurrent_iterator::{ArchiveItem, ConcurrentIterator, IterControls};
pub use error::{ArchiveError, Result};
pub use generator::{ArchiveByteStream, ArchiveGenerator, ArchiveHandle};
pub use tree_loader::{ChildIterator, FolderTreeLoader};
pub use types::{DiscoveredEntry, EntryKind, FolderEntry, FolderSource};
