use super::*;
use std::path::Path;

#[test]
fn test_movie_state_transition() {
    use MovieState::*;

    // valid
    assert!(MovieState::is_valid_transition(Pending, AnalyzingMedia));
    assert!(MovieState::is_valid_transition(AnalyzingMedia, WaitingForScreenshotSlot));
    assert!(MovieState::is_valid_transition(WaitingForScreenshotSlot, GeneratingScreenshots));
    assert!(MovieState::is_valid_transition(GeneratingScreenshots, WaitingForUploadSlot));
    assert!(MovieState::is_valid_transition(WaitingForUploadSlot, UploadingScreenshots));
    assert!(MovieState::is_valid_transition(UploadingScreenshots, Completed));
    assert!(MovieState::is_valid_transition(Pending, Error));
    assert!(MovieState::is_valid_transition(GeneratingScreenshots, Error));
    assert!(MovieState::is_valid_transition(UploadingScreenshots, Pending));

    // invalid
    assert!(!MovieState::is_valid_transition(GeneratingScreenshots, AnalyzingMedia));
    assert!(!MovieState::is_valid_transition(Pending, Pending));
    assert!(!MovieState::is_valid_transition(Completed, Pending));
    assert!(!MovieState::is_valid_transition(Completed, Error));
    assert!(!MovieState::is_valid_transition(Error, AnalyzingMedia));
}

#[test]
fn test_movie_lifecycle_timestamps() {
    let mut movie = Movie::new(Path::new("/videos/a.mkv"), 10);
    assert_eq!(movie.name, "a.mkv");
    assert_eq!(movie.state, MovieState::Pending);

    assert!(movie.transition(MovieState::AnalyzingMedia));
    assert!(movie.started_at.is_some());
    assert!(!movie.transition(MovieState::AnalyzingMedia));

    assert!(movie.fail("probe failed"));
    assert_eq!(movie.state, MovieState::Error);
    assert_eq!(movie.error.as_deref(), Some("probe failed"));
    assert!(movie.finished_at.is_some());
    assert!(!movie.fail("again"));
    assert_eq!(movie.error.as_deref(), Some("probe failed"));
}

#[test]
fn test_reset_to_pending_clears_run_data() {
    let mut movie = Movie::new(Path::new("/videos/a.mkv"), 10);
    movie.transition(MovieState::AnalyzingMedia);
    movie.media = Some(MediaInfo::default());
    movie.artifact_errors.push("screenshot 1 failed".to_string());

    movie.reset_to_pending();
    assert_eq!(movie.state, MovieState::Pending);
    assert!(movie.media.is_none());
    assert!(movie.artifact_errors.is_empty());
    assert!(movie.started_at.is_none());
}

#[test]
fn test_state_serializes_snake_case() {
    let json = serde_json::to_string(&MovieState::WaitingForScreenshotSlot).unwrap();
    assert_eq!(json, "\"waiting_for_screenshot_slot\"");
    assert_eq!(MovieState::UploadingScreenshots.to_string(), "uploading_screenshots");
}

#[test]
fn test_movie_id_generation() {
    let id1 = MovieId::new();
    let id2 = MovieId::new();

    assert_ne!(id1, id2);
    assert_eq!(id1, id1);
    assert!(!id1.to_string().is_empty());
}

#[test]
fn test_screenshot_timestamps() {
    assert_eq!(screenshot_timestamps(120.0, 3), vec![30.0, 60.0, 90.0]);

    let stamps = screenshot_timestamps(5400.25, 7);
    assert_eq!(stamps.len(), 7);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    assert!(stamps.iter().all(|t| *t > 0.0 && *t < 5400.25));

    assert!(screenshot_timestamps(0.0, 4).is_empty());
    assert!(screenshot_timestamps(f64::NAN, 4).is_empty());
    assert!(screenshot_timestamps(60.0, 0).is_empty());
}
