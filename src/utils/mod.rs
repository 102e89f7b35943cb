pub mod cancel;
pub mod format;
pub mod retry;

pub use cancel::{with_cancel, sleep_or_cancel};
pub use format::{format_bytes, format_bitrate, format_duration, format_timestamp};
pub use retry::{retry, retry_with_config, RetryConfig, RetryStrategy, RetryBuilder};
