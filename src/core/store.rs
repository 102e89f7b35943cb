use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;
use super::errors::{Error, Result};
use super::types::{Movie, MovieId, MovieState, StoreSnapshot};

/// Extensions accepted by [`MovieStore::add`], compared case-insensitively
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg",
    "ts", "m2ts", "vob", "3gp", "ogv", "divx", "rm", "rmvb", "asf", "mts",
];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

type Entry = (MovieId, Arc<Mutex<Movie>>);

/// Ordered in-memory movie collection.
///
/// The outer lock guards membership and order; each movie has its own lock so
/// updates to different movies never wait on each other. Structural changes take
/// the write side of the outer lock and therefore exclude every in-flight update.
pub struct MovieStore {
    movies: RwLock<Vec<Entry>>,
    processing: AtomicBool,
    snapshot_tx: broadcast::Sender<StoreSnapshot>,
}

impl Default for MovieStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MovieStore {
    pub fn new() -> Self {
        let (snapshot_tx, _) = broadcast::channel(256);
        Self {
            movies: RwLock::new(Vec::new()),
            processing: AtomicBool::new(false),
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub async fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::SeqCst);
        self.publish().await;
    }

    /// Adds every video file found under `paths`, sorted by path.
    pub async fn add<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<MovieId> {
        let mut candidates = Vec::new();
        for path in paths {
            collect_video_files(path.as_ref(), &mut candidates).await;
        }
        candidates.sort();
        candidates.dedup();

        let mut fresh = Vec::with_capacity(candidates.len());
        for path in candidates {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => fresh.push(Movie::new(&path, meta.len())),
                Ok(_) => debug!(file = %path.display(), "Skipping non-regular file"),
                Err(err) => debug!(file = %path.display(), error = %err, "Skipping unreadable file"),
            }
        }

        let mut ids = Vec::with_capacity(fresh.len());
        {
            let mut movies = self.movies.write().await;
            let mut known: HashSet<PathBuf> = HashSet::with_capacity(movies.len());
            for (_, movie) in movies.iter() {
                known.insert(movie.lock().await.path.clone());
            }

            for movie in fresh {
                if !known.insert(movie.path.clone()) {
                    debug!(file = %movie.path.display(), "Skipping file already in the list");
                    continue;
                }
                ids.push(movie.id);
                movies.push((movie.id, Arc::new(Mutex::new(movie))));
            }
        }

        self.publish().await;
        ids
    }

    /// Applies `mutator` to the movie with `id`; false if there is no such movie.
    pub async fn update_by_id<F>(&self, id: MovieId, mutator: F) -> bool
    where
        F: FnOnce(&mut Movie),
    {
        {
            let movies = self.movies.read().await;
            let Some((_, entry)) = movies.iter().find(|(movie_id, _)| *movie_id == id) else {
                return false;
            };
            let mut movie = entry.lock().await;
            mutator(&mut movie);
        }

        self.publish().await;
        true
    }

    pub async fn remove(&self, id: MovieId) -> bool {
        let removed = {
            let mut movies = self.movies.write().await;
            let before = movies.len();
            movies.retain(|(movie_id, _)| *movie_id != id);
            movies.len() != before
        };

        if removed {
            self.publish().await;
        }
        removed
    }

    pub async fn clear(&self) {
        self.movies.write().await.clear();
        self.publish().await;
    }

    /// Rearranges the list; `ids` must be a permutation of the current members.
    pub async fn reorder(&self, ids: &[MovieId]) -> Result<()> {
        {
            let mut movies = self.movies.write().await;
            let wanted: HashSet<MovieId> = ids.iter().copied().collect();
            if wanted.len() != ids.len() {
                return Err(Error::validation("reorder list contains duplicate ids"));
            }
            if wanted.len() != movies.len() || movies.iter().any(|(id, _)| !wanted.contains(id)) {
                return Err(Error::validation("reorder list does not match the current movies"));
            }

            let mut ordered = Vec::with_capacity(movies.len());
            for id in ids {
                if let Some(pos) = movies.iter().position(|(movie_id, _)| movie_id == id) {
                    ordered.push(movies.swap_remove(pos));
                }
            }
            *movies = ordered;
        }

        self.publish().await;
        Ok(())
    }

    pub async fn get(&self, id: MovieId) -> Option<Movie> {
        let movies = self.movies.read().await;
        let (_, entry) = movies.iter().find(|(movie_id, _)| *movie_id == id)?;
        let movie = entry.lock().await.clone();
        Some(movie)
    }

    pub async fn movies(&self) -> Vec<Movie> {
        let movies = self.movies.read().await;
        let mut out = Vec::with_capacity(movies.len());
        for (_, entry) in movies.iter() {
            out.push(entry.lock().await.clone());
        }
        out
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            processing: self.is_processing(),
            movies: self.movies().await,
        }
    }

    pub async fn len(&self) -> usize {
        self.movies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.movies.read().await.is_empty()
    }

    pub async fn ids_in_state(&self, state: MovieState) -> Vec<MovieId> {
        let movies = self.movies.read().await;
        let mut ids = Vec::new();
        for (id, entry) in movies.iter() {
            if entry.lock().await.state == state {
                ids.push(*id);
            }
        }
        ids
    }

    /// Puts every movie that did not reach a terminal state back to `Pending`.
    pub async fn reset_unfinished(&self) -> usize {
        let mut reset = 0;
        {
            let movies = self.movies.read().await;
            for (_, entry) in movies.iter() {
                let mut movie = entry.lock().await;
                if !movie.state.is_terminal() && (movie.state != MovieState::Pending || movie.error.is_some()) {
                    movie.reset_to_pending();
                    reset += 1;
                }
            }
        }

        if reset > 0 {
            self.publish().await;
        }
        reset
    }

    async fn publish(&self) {
        if self.snapshot_tx.receiver_count() == 0 {
            return;
        }
        let snapshot = self.snapshot().await;
        let _ = self.snapshot_tx.send(snapshot);
    }
}

async fn collect_video_files(root: &Path, out: &mut Vec<PathBuf>) {
    let mut stack = vec![root.to_path_buf()];

    while let Some(path) = stack.pop() {
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) => {
                debug!(file = %path.display(), error = %err, "Skipping path that cannot be read");
                continue;
            }
        };

        if !meta.is_dir() {
            if is_video_file(&path) {
                out.push(path);
            }
            continue;
        }

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %path.display(), error = %err, "Skipping unreadable directory");
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            stack.push(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_add_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.mkv", 10);
        touch(dir.path(), "a.MP4", 20);
        touch(dir.path(), "notes.txt", 5);
        touch(dir.path(), "nested/c.avi", 30);

        let store = MovieStore::new();
        let ids = store.add(&[dir.path()]).await;
        assert_eq!(ids.len(), 3);

        let movies = store.movies().await;
        let names: Vec<_> = movies.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a.MP4", "b.mkv", "c.avi"]);
        assert!(movies.iter().all(|m| m.state == MovieState::Pending));
        assert_eq!(movies[0].size, 20);
    }

    #[tokio::test]
    async fn test_add_skips_missing_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let file = touch(dir.path(), "movie.mkv", 10);

        let store = MovieStore::new();
        let missing = dir.path().join("missing.mkv");
        assert_eq!(store.add(&[file.clone(), missing]).await.len(), 1);
        assert!(store.add(&[file]).await.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_by_id() {
        let dir = TempDir::new().unwrap();
        let file = touch(dir.path(), "movie.mkv", 10);
        let store = MovieStore::new();
        let id = store.add(&[file]).await[0];

        assert!(store.update_by_id(id, |m| { m.transition(MovieState::AnalyzingMedia); }).await);
        assert_eq!(store.get(id).await.unwrap().state, MovieState::AnalyzingMedia);
        assert!(!store.update_by_id(MovieId::new(), |_| {}).await);
    }

    #[tokio::test]
    async fn test_reorder_remove_clear() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "1.mkv", 1);
        touch(dir.path(), "2.mkv", 1);
        touch(dir.path(), "3.mkv", 1);
        let store = MovieStore::new();
        let ids = store.add(&[dir.path()]).await;

        let reversed: Vec<_> = ids.iter().rev().copied().collect();
        store.reorder(&reversed).await.unwrap();
        let order: Vec<_> = store.movies().await.iter().map(|m| m.id).collect();
        assert_eq!(order, reversed);

        assert!(store.reorder(&ids[..2]).await.is_err());
        assert!(store.reorder(&[ids[0], ids[0], ids[1]]).await.is_err());

        assert!(store.remove(ids[1]).await);
        assert!(!store.remove(ids[1]).await);
        assert_eq!(store.len().await, 2);

        store.clear().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_mutations_publish_snapshots() {
        let dir = TempDir::new().unwrap();
        let file = touch(dir.path(), "movie.mkv", 10);
        let store = MovieStore::new();
        let mut rx = store.subscribe();

        let id = store.add(&[file]).await[0];
        let snapshot = rx.recv().await.unwrap();
        assert!(!snapshot.processing);
        assert_eq!(snapshot.movies.len(), 1);

        store.set_processing(true).await;
        assert!(rx.recv().await.unwrap().processing);

        store.update_by_id(id, |m| { m.fail("boom"); }).await;
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.movies[0].state, MovieState::Error);
    }
}
