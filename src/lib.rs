pub mod config;
pub mod core;
pub mod logging;
pub mod media;
pub mod template;
pub mod uploaders;
pub mod utils;

pub use config::{AppConfig, HostsConfig, PipelineConfig};
pub use core::{
    Error,
    Result,
    Movie,
    MovieId,
    MovieState,
    MovieStore,
    Pipeline,
    StoreSnapshot,
};
pub use template::render;
pub use uploaders::{ImageHost, UploadResult};
