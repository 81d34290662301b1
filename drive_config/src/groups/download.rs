crate::config_group!("DOWNLOAD" => {

    /// How many block fetches a single download runs concurrently.
    ///
    /// Use the environment variable `DRIVE_DOWNLOAD_MAX_CONCURRENT_FETCHES` to set this value.
    ref max_concurrent_fetches: usize = 6;

    /// How many fetched-but-not-yet-flushed blocks the reorder buffer may
    /// hold. Workers wait for a free slot before fetching further ahead of
    /// the flush position.
    ///
    /// Use the environment variable `DRIVE_DOWNLOAD_MAX_BUFFERED_BLOCKS` to set this value.
    ref max_buffered_blocks: usize = 15;

    /// How many times a download recovers from an expired block reference
    /// by re-fetching fresh block descriptors before giving up.
    ///
    /// Use the environment variable `DRIVE_DOWNLOAD_EXPIRED_REFERENCE_RETRY_LIMIT` to set this value.
    ref expired_reference_retry_limit: usize = 3;

    /// Page size for the paged block-descriptor metadata fetch. A returned
    /// page of exactly this length signals that more pages exist.
    ///
    /// Use the environment variable `DRIVE_DOWNLOAD_BLOCK_PAGE_SIZE` to set this value.
    ref block_page_size: usize = 32;
});
