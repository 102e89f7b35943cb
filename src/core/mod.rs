mod errors;
mod scheduler;
mod store;
mod traits;
mod types;
mod worker;

pub use errors::{Error, Result};
pub use scheduler::{ClientFactory, Pipeline};
pub use store::{is_video_file, MovieStore, VIDEO_EXTENSIONS};
pub use traits::{MediaProber, ScreenshotGenerator, ThumbnailGridGenerator, UploadClient};
pub use types::{HostUploads, MediaInfo, Movie, MovieId, MovieState, ProbeOutput, StoreSnapshot};
pub use worker::screenshot_timestamps;

#[cfg(test)]
mod tests;
