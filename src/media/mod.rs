//! Process-backed implementations of the collaborator traits.

mod command;
pub mod probe;
pub mod screenshot;
pub mod thumbnail;

pub use probe::FfprobeProber;
pub use screenshot::FfmpegScreenshotter;
pub use thumbnail::MtnGridGenerator;
