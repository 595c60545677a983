use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{newest_first, slice_page, ReviewStore};
use crate::error::{ReviewError, Result};
use crate::models::{Page, PageRequest, Review, UpsertReview, Upserted};

/// In-process review store.
///
/// Rows live behind a single lock together with the (user, movie) index, so
/// the uniqueness check and the write that depends on it happen atomically.
/// All data is lost when the store is dropped.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    rows: HashMap<Uuid, Review>,
    by_pair: HashMap<(Uuid, Uuid), Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored reviews
    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl ReviewStore for MemoryStore {
    async fn find_by_user_and_movie(&self, user_id: Uuid, movie_id: Uuid) -> Result<Option<Review>> {
        let state = self.state.read().await;
        Ok(state
            .by_pair
            .get(&(user_id, movie_id))
            .and_then(|id| state.rows.get(id))
            .cloned())
    }

    async fn insert(&self, review: &Review) -> Result<()> {
        let mut state = self.state.write().await;

        if state.by_pair.contains_key(&review.key()) {
            return Err(ReviewError::UniqueViolation {
                user_id: review.user_id,
                movie_id: review.movie_id,
            });
        }

        state.by_pair.insert(review.key(), review.id);
        state.rows.insert(review.id, review.clone());

        debug!(id = %review.id, "Inserted review into memory store");

        Ok(())
    }

    async fn upsert(&self, request: UpsertReview, now: DateTime<Utc>) -> Result<Upserted> {
        let mut state = self.state.write().await;

        if let Some(id) = state.by_pair.get(&(request.user_id, request.movie_id)).copied() {
            if let Some(row) = state.rows.get_mut(&id) {
                row.apply(&request, now);
                debug!(id = %row.id, "Updated review in memory store");
                return Ok(Upserted::Updated(row.clone()));
            }
        }

        let review = Review::new(request, now);
        state.by_pair.insert(review.key(), review.id);
        state.rows.insert(review.id, review.clone());

        debug!(id = %review.id, "Inserted review into memory store");

        Ok(Upserted::Created(review))
    }

    async fn delete_by_user_and_movie(&self, user_id: Uuid, movie_id: Uuid) -> Result<Option<Review>> {
        let mut state = self.state.write().await;

        let removed = state
            .by_pair
            .remove(&(user_id, movie_id))
            .and_then(|id| state.rows.remove(&id));

        Ok(removed)
    }

    async fn page_by_movie(&self, movie_id: Uuid, request: PageRequest) -> Result<Page<Review>> {
        let state = self.state.read().await;

        let mut matching: Vec<&Review> = state
            .rows
            .values()
            .filter(|r| r.movie_id == movie_id)
            .collect();
        matching.sort_by(|a, b| newest_first((a.updated_on, a.id), (b.updated_on, b.id)));

        let total = matching.len() as u64;
        let items = slice_page(matching, request).into_iter().cloned().collect();

        Ok(Page::new(items, request, total))
    }

    async fn count_by_movie(&self, movie_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.rows.values().filter(|r| r.movie_id == movie_id).count() as u64)
    }

    async fn count_movies_by_user(&self, user_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        let movies: HashSet<Uuid> = state
            .rows
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.movie_id)
            .collect();
        Ok(movies.len() as u64)
    }

    async fn latest_by_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<Review>> {
        let state = self.state.read().await;

        let mut matching: Vec<&Review> = state
            .rows
            .values()
            .filter(|r| r.user_id == user_id)
            .collect();
        matching.sort_by(|a, b| newest_first((a.created_on, a.id), (b.created_on, b.id)));

        Ok(matching.into_iter().take(limit).cloned().collect())
    }
}
