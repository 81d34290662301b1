use std::time::Duration;

crate::config_group!("CLIENT" => {

    /// Maximum number of automatic retries a single transport request makes
    /// on transient failures before the error surfaces to the transfer.
    ///
    /// Use the environment variable `DRIVE_CLIENT_RETRY_MAX_ATTEMPTS` to set this value.
    ref retry_max_attempts: usize = 3;

    /// Base delay of the exponential backoff between transport retries.
    ///
    /// Use the environment variable `DRIVE_CLIENT_RETRY_BASE_DELAY` to set this value.
    ref retry_base_delay: Duration = Duration::from_millis(300);

    /// Per-request timeout for block fetch and metadata requests.
    ///
    /// Use the environment variable `DRIVE_CLIENT_REQUEST_TIMEOUT` to set this value.
    ref request_timeout: Duration = Duration::from_secs(30);
});
