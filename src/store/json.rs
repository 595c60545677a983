use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{newest_first, slice_page, ReviewStore};
use crate::error::{ReviewError, Result};
use crate::models::{Page, PageRequest, Review, UpsertReview, Upserted};

/// JSON file-based review store.
///
/// Each review is written to `<id>.json`; `index.json` carries the
/// (user, movie) pair and timestamps of every row so that lookups, ordering
/// and counts never have to open the review files. The index is the
/// uniqueness constraint and the source of truth: a review file is only
/// visible once the index names it.
///
/// Every file is replaced through a temp file and a rename. When the second
/// write of an operation fails, the first one is undone so the index and the
/// review files keep agreeing. Operations are serialized within the process;
/// the directory must not be shared between processes.
pub struct JsonStore {
    base_path: PathBuf,
    lock: Mutex<()>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct ReviewIndex {
    reviews: Vec<ReviewIndexEntry>,
}

impl ReviewIndex {
    fn position(&self, user_id: Uuid, movie_id: Uuid) -> Option<usize> {
        self.reviews
            .iter()
            .position(|e| e.user_id == user_id && e.movie_id == movie_id)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ReviewIndexEntry {
    id: Uuid,
    user_id: Uuid,
    movie_id: Uuid,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
}

impl From<&Review> for ReviewIndexEntry {
    fn from(review: &Review) -> Self {
        Self {
            id: review.id,
            user_id: review.user_id,
            movie_id: review.movie_id,
            created_on: review.created_on,
            updated_on: review.updated_on,
        }
    }
}

fn file_error(path: &Path, source: io::Error) -> ReviewError {
    ReviewError::File {
        path: path.to_path_buf(),
        source,
    }
}

impl JsonStore {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path).map_err(|e| file_error(&base_path, e))?;

        info!(path = %base_path.display(), "Initialized JSON review store");

        Ok(Self {
            base_path,
            lock: Mutex::new(()),
        })
    }

    fn review_path(&self, id: &Uuid) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }

    fn index_path(&self) -> PathBuf {
        self.base_path.join("index.json")
    }

    async fn load_index(&self) -> Result<ReviewIndex> {
        let path = self.index_path();

        match fs::read_to_string(&path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| ReviewError::Parse { path, source })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ReviewIndex::default()),
            Err(e) => Err(file_error(&path, e)),
        }
    }

    async fn save_index(&self, index: &ReviewIndex) -> Result<()> {
        let content = serde_json::to_string_pretty(index)?;
        write_atomically(&self.index_path(), content).await
    }

    async fn write_review(&self, review: &Review) -> Result<()> {
        let content = serde_json::to_string_pretty(review)?;
        write_atomically(&self.review_path(&review.id), content).await
    }

    async fn read_review(&self, id: &Uuid) -> Result<Review> {
        let path = self.review_path(id);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| file_error(&path, e))?;

        serde_json::from_str(&content).map_err(|source| ReviewError::Parse { path, source })
    }

    async fn read_entries(&self, entries: Vec<&ReviewIndexEntry>) -> Result<Vec<Review>> {
        let mut reviews = Vec::with_capacity(entries.len());
        for entry in entries {
            reviews.push(self.read_review(&entry.id).await?);
        }
        Ok(reviews)
    }

    /// Write a new review file and publish it in the index.
    ///
    /// The caller holds the lock and has checked that the pair is free.
    async fn insert_locked(&self, mut index: ReviewIndex, review: &Review) -> Result<()> {
        self.write_review(review).await?;
        index.reviews.push(ReviewIndexEntry::from(review));

        if let Err(e) = self.save_index(&index).await {
            let path = self.review_path(&review.id);
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %cleanup, "Failed to remove unindexed review file");
            }
            return Err(e);
        }

        debug!(id = %review.id, "Saved review to JSON store");

        Ok(())
    }
}

/// Replace `path` with `content` via a sibling temp file and a rename
async fn write_atomically(path: &Path, content: String) -> Result<()> {
    let tmp = path.with_extension("json.tmp");

    fs::write(&tmp, content)
        .await
        .map_err(|e| file_error(&tmp, e))?;

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(file_error(path, e));
    }

    Ok(())
}

impl ReviewStore for JsonStore {
    async fn find_by_user_and_movie(&self, user_id: Uuid, movie_id: Uuid) -> Result<Option<Review>> {
        let _guard = self.lock.lock().await;
        let index = self.load_index().await?;

        match index.position(user_id, movie_id) {
            Some(position) => Ok(Some(self.read_review(&index.reviews[position].id).await?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, review: &Review) -> Result<()> {
        let _guard = self.lock.lock().await;
        let index = self.load_index().await?;

        if index.position(review.user_id, review.movie_id).is_some() {
            return Err(ReviewError::UniqueViolation {
                user_id: review.user_id,
                movie_id: review.movie_id,
            });
        }

        self.insert_locked(index, review).await
    }

    async fn upsert(&self, request: UpsertReview, now: DateTime<Utc>) -> Result<Upserted> {
        let _guard = self.lock.lock().await;
        let mut index = self.load_index().await?;

        let Some(position) = index.position(request.user_id, request.movie_id) else {
            let review = Review::new(request, now);
            self.insert_locked(index, &review).await?;
            return Ok(Upserted::Created(review));
        };

        let previous = self.read_review(&index.reviews[position].id).await?;
        let mut review = previous.clone();
        review.apply(&request, now);

        self.write_review(&review).await?;
        index.reviews[position] = ReviewIndexEntry::from(&review);

        if let Err(e) = self.save_index(&index).await {
            // the index still describes the previous version
            if let Err(restore) = self.write_review(&previous).await {
                warn!(id = %previous.id, error = %restore, "Failed to restore review file");
            }
            return Err(e);
        }

        debug!(id = %review.id, "Updated review in JSON store");

        Ok(Upserted::Updated(review))
    }

    async fn delete_by_user_and_movie(&self, user_id: Uuid, movie_id: Uuid) -> Result<Option<Review>> {
        let _guard = self.lock.lock().await;
        let mut index = self.load_index().await?;

        let Some(position) = index.position(user_id, movie_id) else {
            return Ok(None);
        };

        let entry = index.reviews.remove(position);
        let review = self.read_review(&entry.id).await?;

        self.save_index(&index).await?;

        let path = self.review_path(&entry.id);
        if let Err(e) = fs::remove_file(&path).await {
            // put the entry back so the file is not orphaned
            index.reviews.insert(position, entry);
            if let Err(restore) = self.save_index(&index).await {
                warn!(id = %review.id, error = %restore, "Failed to restore index entry");
            }
            return Err(file_error(&path, e));
        }

        debug!(id = %review.id, "Removed review from JSON store");

        Ok(Some(review))
    }

    async fn page_by_movie(&self, movie_id: Uuid, request: PageRequest) -> Result<Page<Review>> {
        let _guard = self.lock.lock().await;
        let index = self.load_index().await?;

        let mut matching: Vec<&ReviewIndexEntry> = index
            .reviews
            .iter()
            .filter(|e| e.movie_id == movie_id)
            .collect();
        matching.sort_by(|a, b| newest_first((a.updated_on, a.id), (b.updated_on, b.id)));

        let total = matching.len() as u64;
        let items = self.read_entries(slice_page(matching, request)).await?;

        Ok(Page::new(items, request, total))
    }

    async fn count_by_movie(&self, movie_id: Uuid) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let index = self.load_index().await?;

        Ok(index.reviews.iter().filter(|e| e.movie_id == movie_id).count() as u64)
    }

    async fn count_movies_by_user(&self, user_id: Uuid) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let index = self.load_index().await?;

        let movies: HashSet<Uuid> = index
            .reviews
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.movie_id)
            .collect();
        Ok(movies.len() as u64)
    }

    async fn latest_by_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<Review>> {
        let _guard = self.lock.lock().await;
        let index = self.load_index().await?;

        let mut matching: Vec<&ReviewIndexEntry> = index
            .reviews
            .iter()
            .filter(|e| e.user_id == user_id)
            .collect();
        matching.sort_by(|a, b| newest_first((a.created_on, a.id), (b.created_on, b.id)));
        matching.truncate(limit);

        self.read_entries(matching).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn request(user_id: Uuid, movie_id: Uuid, rating: Option<i32>, title: &str) -> UpsertReview {
        UpsertReview {
            user_id,
            movie_id,
            rating,
            title: Some(title.to_string()),
            content: format!("{} content", title),
        }
    }

    /// Make the next index save fail by occupying its temp path with a directory
    fn block_index_writes(dir: &Path) -> PathBuf {
        let blocker = dir.join("index.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        blocker
    }

    fn review_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".json") && name != "index.json")
            .collect()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());

        let review = Review::new(request(user, movie, Some(5), "Title"), Utc::now());
        store.insert(&review).await.unwrap();

        let loaded = store.find_by_user_and_movie(user, movie).await.unwrap().unwrap();
        assert_eq!(loaded, review);
        assert!(store
            .find_by_user_and_movie(user, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_pair() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());

        store
            .insert(&Review::new(request(user, movie, None, "First"), Utc::now()))
            .await
            .unwrap();
        let err = store
            .insert(&Review::new(request(user, movie, None, "Second"), Utc::now()))
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::UniqueViolation { .. }));
        assert_eq!(store.count_by_movie(movie).await.unwrap(), 1);
        assert_eq!(review_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());

        {
            let store = JsonStore::new(dir.path()).unwrap();
            store
                .upsert(request(user, movie, Some(3), "Persisted"), Utc::now())
                .await
                .unwrap();
        }

        let reopened = JsonStore::new(dir.path()).unwrap();
        let loaded = reopened.find_by_user_and_movie(user, movie).await.unwrap().unwrap();
        assert_eq!(loaded.title.as_deref(), Some("Persisted"));
        assert_eq!(loaded.rating, Some(3));
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let created = store
            .upsert(request(user, movie, Some(5), "First"), now)
            .await
            .unwrap();
        assert!(created.is_created());

        let updated = store
            .upsert(request(user, movie, None, "Second"), now + Duration::seconds(1))
            .await
            .unwrap();
        assert!(!updated.is_created());
        assert_eq!(updated.review().id, created.review().id);
        assert_eq!(updated.review().rating, Some(5));
        assert_eq!(updated.review().title.as_deref(), Some("Second"));

        let stored = store.find_by_user_and_movie(user, movie).await.unwrap().unwrap();
        assert_eq!(&stored, updated.review());
        assert_eq!(review_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_upsert_keeps_newer_state() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());
        let base = Utc::now();

        store
            .upsert(request(user, movie, Some(0), "Seed"), base)
            .await
            .unwrap();
        store
            .upsert(request(user, movie, Some(99), "Newer"), base + Duration::seconds(2))
            .await
            .unwrap();
        let late = store
            .upsert(request(user, movie, None, "Older"), base + Duration::seconds(1))
            .await
            .unwrap()
            .into_review();

        assert_eq!(late.rating, Some(99));
        assert_eq!(late.updated_on, base + Duration::seconds(2));

        let page = store
            .page_by_movie(movie, PageRequest::new(0, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(page.items, vec![late]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_never_lose_updates() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path()).unwrap());
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());
        let base = Utc::now();

        let handles: Vec<_> = (1..=16i64)
            .map(|i| {
                let store = Arc::clone(&store);
                let rating = (i == 16).then_some(16);
                tokio::spawn(async move {
                    store
                        .upsert(
                            request(user, movie, rating, &format!("Attempt {}", i)),
                            base + Duration::seconds(i),
                        )
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_created() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        let stored = store.find_by_user_and_movie(user, movie).await.unwrap().unwrap();
        assert_eq!(stored.updated_on, base + Duration::seconds(16));
        assert_eq!(stored.rating, Some(16));
        assert_eq!(review_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_index_save_leaves_no_orphan_file() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());
        let blocker = block_index_writes(dir.path());

        let err = store
            .upsert(request(user, movie, Some(1), "Lost"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(&err, ReviewError::File { path, .. } if *path == blocker));
        assert!(review_files(dir.path()).is_empty());

        std::fs::remove_dir(&blocker).unwrap();
        assert!(store.find_by_user_and_movie(user, movie).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_index_save_restores_previous_version() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let original = store
            .upsert(request(user, movie, Some(4), "Original"), now)
            .await
            .unwrap()
            .into_review();

        let blocker = block_index_writes(dir.path());
        assert!(store
            .upsert(request(user, movie, Some(1), "Rewrite"), now + Duration::seconds(1))
            .await
            .is_err());
        std::fs::remove_dir(&blocker).unwrap();

        let stored = store.find_by_user_and_movie(user, movie).await.unwrap().unwrap();
        assert_eq!(stored, original);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_review() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());

        let review = store
            .upsert(request(user, movie, None, "Kept"), Utc::now())
            .await
            .unwrap()
            .into_review();

        let blocker = block_index_writes(dir.path());
        assert!(store.delete_by_user_and_movie(user, movie).await.is_err());
        std::fs::remove_dir(&blocker).unwrap();

        assert_eq!(
            store.find_by_user_and_movie(user, movie).await.unwrap(),
            Some(review)
        );
        assert_eq!(review_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_index_names_the_file() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("index.json"), "{ not json").unwrap();

        let err = store.count_by_movie(Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(&err, ReviewError::Parse { path, .. } if *path == dir.path().join("index.json")));
        assert!(err.to_string().contains("index.json"));
    }

    #[tokio::test]
    async fn test_missing_review_file_names_the_file() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());

        let review = store
            .upsert(request(user, movie, None, "Vanishing"), Utc::now())
            .await
            .unwrap()
            .into_review();
        let path = dir.path().join(format!("{}.json", review.id));
        std::fs::remove_file(&path).unwrap();

        let err = store.find_by_user_and_movie(user, movie).await.unwrap_err();
        assert!(err.to_string().contains(&review.id.to_string()));
        assert!(matches!(err, ReviewError::File { path: p, .. } if p == path));
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_index_entry() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let (user, movie) = (Uuid::new_v4(), Uuid::new_v4());

        let created = store
            .upsert(request(user, movie, None, "Gone"), Utc::now())
            .await
            .unwrap()
            .into_review();

        let removed = store.delete_by_user_and_movie(user, movie).await.unwrap().unwrap();
        assert_eq!(removed.id, created.id);
        assert!(!dir.path().join(format!("{}.json", created.id)).exists());
        assert_eq!(store.count_by_movie(movie).await.unwrap(), 0);
        assert!(store.delete_by_user_and_movie(user, movie).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_page_uses_index_order() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let movie = Uuid::new_v4();
        let start = Utc::now();

        for i in 0..7 {
            store
                .upsert(
                    request(Uuid::new_v4(), movie, Some(i), &format!("Review {}", i)),
                    start + Duration::seconds(i64::from(i)),
                )
                .await
                .unwrap();
        }

        let first = store
            .page_by_movie(movie, PageRequest::new(0, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(first.items.len(), 5);
        assert_eq!(first.total_elements, 7);
        assert_eq!(first.items[0].rating, Some(6));

        let second = store
            .page_by_movie(movie, PageRequest::new(1, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].rating, Some(0));
    }

    #[tokio::test]
    async fn test_latest_by_user_orders_by_created_then_id() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let user = Uuid::new_v4();
        let tied = Utc::now();

        for n in [3u128, 1, 2] {
            let mut review = Review::new(request(user, Uuid::new_v4(), None, "Tied"), tied);
            review.id = Uuid::from_u128(n);
            store.insert(&review).await.unwrap();
        }
        let mut newest = Review::new(
            request(user, Uuid::new_v4(), None, "Newest"),
            tied + Duration::seconds(1),
        );
        newest.id = Uuid::from_u128(9);
        store.insert(&newest).await.unwrap();

        let ids: Vec<Uuid> = store
            .latest_by_user(user, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                Uuid::from_u128(9),
                Uuid::from_u128(1),
                Uuid::from_u128(2),
                Uuid::from_u128(3)
            ]
        );

        let limited = store.latest_by_user(user, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].id, Uuid::from_u128(1));
    }
}
