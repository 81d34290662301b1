use utils::ByteSize;

crate::config_group!("UPLOAD" => {

    /// How many uploads may be active at once across the whole queue;
    /// further uploads stay pending until a slot frees.
    ///
    /// Use the environment variable `DRIVE_UPLOAD_MAX_ACTIVE_UPLOADS` to set this value.
    ref max_active_uploads: usize = 5;

    /// How many block upload requests a single upload runs concurrently.
    ///
    /// Use the environment variable `DRIVE_UPLOAD_MAX_CONCURRENT_BLOCK_UPLOADS` to set this value.
    ref max_concurrent_block_uploads: usize = 4;

    /// Size of the blocks local content is chunked into before encryption
    /// and upload.
    ///
    /// The default value is 4MB.
    ///
    /// Use the environment variable `DRIVE_UPLOAD_BLOCK_SIZE` to set this value.
    ref block_size: ByteSize = ByteSize::from("4mb");
});
