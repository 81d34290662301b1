crate::config_group!("ARCHIVE" => {

    /// How many per-file downloads a folder archival runs concurrently.
    ///
    /// Use the environment variable `DRIVE_ARCHIVE_MAX_CONCURRENT_FILES` to set this value.
    ref max_concurrent_files: usize = 3;

    /// Page size for the paged folder-children listing during traversal.
    ///
    /// Use the environment variable `DRIVE_ARCHIVE_LIST_PAGE_SIZE` to set this value.
    ref list_page_size: usize = 50;

    /// How many chunks each per-file byte pipe buffers between the file's
    /// download and the archive writer before the download backpressures.
    ///
    /// Use the environment variable `DRIVE_ARCHIVE_PIPE_DEPTH` to set this value.
    ref pipe_depth: usize = 8;
});
