pub mod json;
pub mod memory;
pub mod postgres;

pub use json::JsonStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::cmp::Ordering;
use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Page, PageRequest, Review, UpsertReview, Upserted};

/// Persistence backend for reviews.
///
/// Every method is a single atomic operation against the backend, and every
/// backend enforces the (user, movie) uniqueness constraint itself: `insert`
/// of a second row for an existing pair fails with
/// [`ReviewError::UniqueViolation`](crate::ReviewError::UniqueViolation).
pub trait ReviewStore: Send + Sync {
    fn find_by_user_and_movie(
        &self,
        user_id: Uuid,
        movie_id: Uuid,
    ) -> impl Future<Output = Result<Option<Review>>> + Send;

    /// Insert a new row
    fn insert(&self, review: &Review) -> impl Future<Output = Result<()>> + Send;

    /// Insert the review for a pair, or update it in place if one exists.
    ///
    /// Lookup and write happen as one storage-level operation, so concurrent
    /// upserts of the same pair neither create a second row nor overwrite
    /// each other with stale snapshots. Updates follow [`Review::apply`].
    fn upsert(
        &self,
        request: UpsertReview,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Upserted>> + Send;

    /// Delete the row for a pair, returning it if one existed
    fn delete_by_user_and_movie(
        &self,
        user_id: Uuid,
        movie_id: Uuid,
    ) -> impl Future<Output = Result<Option<Review>>> + Send;

    /// Reviews for a movie, most recently updated first
    fn page_by_movie(
        &self,
        movie_id: Uuid,
        request: PageRequest,
    ) -> impl Future<Output = Result<Page<Review>>> + Send;

    fn count_by_movie(&self, movie_id: Uuid) -> impl Future<Output = Result<u64>> + Send;

    /// Number of distinct movies the user has reviewed
    fn count_movies_by_user(&self, user_id: Uuid) -> impl Future<Output = Result<u64>> + Send;

    /// A user's reviews, most recently created first
    fn latest_by_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Review>>> + Send;
}

/// Orders (timestamp, id) keys newest first, ties broken by ascending id
pub(crate) fn newest_first(a: (DateTime<Utc>, Uuid), b: (DateTime<Utc>, Uuid)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

/// Cut the requested page out of an already ordered sequence
pub(crate) fn slice_page<T>(sorted: Vec<T>, request: PageRequest) -> Vec<T> {
    let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
    sorted
        .into_iter()
        .skip(offset)
        .take(request.page_size() as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ordering_breaks_ties_by_id() {
        let now = Utc::now();
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);

        assert_eq!(newest_first((now, low), (now, high)), Ordering::Less);
        assert_eq!(
            newest_first((now, high), (now + Duration::seconds(1), low)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_slice_page() {
        let items: Vec<u32> = (0..7).collect();

        let first = slice_page(items.clone(), PageRequest::new(0, 5).unwrap());
        assert_eq!(first, vec![0, 1, 2, 3, 4]);

        let second = slice_page(items.clone(), PageRequest::new(1, 5).unwrap());
        assert_eq!(second, vec![5, 6]);

        let past_end = slice_page(items, PageRequest::new(4, 5).unwrap());
        assert!(past_end.is_empty());
    }
}
