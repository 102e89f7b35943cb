//! Contact sheet generation with mtn (movie thumbnailer).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tracing::debug;
use crate::core::{Error, Result, ThumbnailGridGenerator};
use super::command::{locate, run, stderr_tail};

const GRID_SUFFIX: &str = "_grid.jpg";

pub struct MtnGridGenerator {
    program: Option<PathBuf>,
    columns: u32,
    rows: u32,
    width: u32,
}

impl Default for MtnGridGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MtnGridGenerator {
    /// A missing mtn binary is reported per call as `ToolMissing`.
    pub fn new() -> Self {
        Self {
            program: locate("mtn").ok(),
            columns: 4,
            rows: 4,
            width: 1920,
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self { program: Some(program.into()), ..Self::new() }
    }

    pub fn grid(mut self, columns: u32, rows: u32) -> Self {
        self.columns = columns.max(1);
        self.rows = rows.max(1);
        self
    }

    fn args(&self, path: &Path, output_dir: &Path) -> Vec<OsString> {
        vec![
            "-c".into(),
            self.columns.to_string().into(),
            "-r".into(),
            self.rows.to_string().into(),
            "-w".into(),
            self.width.to_string().into(),
            "-P".into(),
            "-o".into(),
            GRID_SUFFIX.into(),
            "-O".into(),
            output_dir.as_os_str().to_owned(),
            path.as_os_str().to_owned(),
        ]
    }
}

/// Where mtn writes the sheet for `path`
pub(crate) fn grid_output_path(path: &Path, output_dir: &Path) -> PathBuf {
    let stem = path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "movie".to_string());
    output_dir.join(format!("{}{}", stem, GRID_SUFFIX))
}

#[async_trait]
impl ThumbnailGridGenerator for MtnGridGenerator {
    async fn generate(&self, path: &Path, output_dir: &Path) -> Result<PathBuf> {
        let program = self.program.as_ref()
            .ok_or_else(|| Error::ToolMissing("mtn".to_string()))?;

        debug!(input = %path.display(), "Generating thumbnail grid");
        let output = run(program, self.args(path, output_dir)).await?;
        if !output.status.success() {
            return Err(Error::Generation(format!("mtn failed: {}", stderr_tail(&output))));
        }

        let sheet = grid_output_path(path, output_dir);
        if !tokio::fs::try_exists(&sheet).await.unwrap_or(false) {
            return Err(Error::Generation(format!("mtn wrote no sheet at {}", sheet.display())));
        }
        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_output_path() {
        let out = grid_output_path(Path::new("/videos/My Movie.2020.mkv"), Path::new("/work/1"));
        assert_eq!(out, PathBuf::from("/work/1/My Movie.2020_grid.jpg"));
    }

    #[test]
    fn test_args_end_with_input() {
        let generator = MtnGridGenerator::with_program("mtn").grid(3, 0);
        let args = generator.args(Path::new("/v/a.mp4"), Path::new("/w"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args[..4], ["-c", "3", "-r", "1"]);
        assert_eq!(args[args.len() - 2..], ["/w", "/v/a.mp4"]);
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let generator = MtnGridGenerator { program: None, ..MtnGridGenerator::with_program("mtn") };
        let err = generator.generate(Path::new("a.mp4"), Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, Error::ToolMissing(ref tool) if tool == "mtn"));
    }
}
