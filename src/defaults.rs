//! Default values for endpoint options.

use std::time::Duration;

/// Size of the region armed for each receive operation.
pub const fn receive_buffer_size() -> usize {
    8192
}

/// Initial capacity of the outbound swap buffers.
pub const fn send_buffer_size() -> usize {
    8192
}

/// Pending-connection queue length for acceptors.
pub const fn acceptor_backlog() -> u32 {
    1024
}

/// How long the awaiting `send` variant waits for drain capacity before
/// giving up.
pub const fn send_timeout() -> Duration {
    Duration::from_secs(60)
}

/// How long an HTTP client waits for the response to a request issued
/// through the future-returning API.
pub const fn request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Interval between rescans of static content served from the response
/// cache.
pub const fn cache_rescan_interval() -> Duration {
    Duration::from_secs(1)
}

/// Upper bound on HTTP header count accepted by the parsers.
pub const fn max_header_count() -> usize {
    128
}

/// Upper bound on the total size of an HTTP header block.
pub const fn max_header_size() -> usize {
    1024 * 16
}

/// Upper bound on an HTTP message body; 0 means unlimited.
pub const fn max_body_size() -> usize {
    0
}

/// Upper bound on an assembled WebSocket message.
pub const fn max_ws_message_size() -> usize {
    64 * 1024 * 1024
}
