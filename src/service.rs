use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LimitsConfig;
use crate::error::{ReviewError, Result};
use crate::models::{Page, PageRequest, Review, UpsertReview, Upserted};
use crate::store::ReviewStore;

/// Review operations over a storage backend.
///
/// Note the asymmetric empty-result policy: `latest_for_movie`,
/// `latest_for_user` and both counts report [`ReviewError::NotFound`] when
/// nothing matches, while `page_for_movie` returns an empty page. Callers that
/// map results to transport responses must expect both shapes.
pub struct ReviewService<S: ReviewStore> {
    store: S,
    limits: LimitsConfig,
    clock: fn() -> DateTime<Utc>,
}

impl<S: ReviewStore> ReviewService<S> {
    pub fn new(store: S, limits: LimitsConfig) -> Self {
        Self {
            store,
            limits,
            clock: Utc::now,
        }
    }

    /// Replace the time source used for `created_on` / `updated_on`
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Create the review for a (user, movie) pair, or update it in place.
    ///
    /// Content and title are always overwritten on update; the rating only
    /// when the request carries one.
    pub async fn upsert(&self, request: UpsertReview) -> Result<Upserted> {
        if request.content.trim().is_empty() {
            return Err(ReviewError::InvalidRequest(
                "Review content must not be blank".to_string(),
            ));
        }

        let upserted = self.store.upsert(request, (self.clock)()).await?;

        let review = upserted.review();
        if upserted.is_created() {
            info!(
                id = %review.id,
                user_id = %review.user_id,
                movie_id = %review.movie_id,
                "Created new review"
            );
        } else {
            info!(
                id = %review.id,
                user_id = %review.user_id,
                movie_id = %review.movie_id,
                "Updated review"
            );
        }

        Ok(upserted)
    }

    pub async fn find_by_user_and_movie(&self, user_id: Uuid, movie_id: Uuid) -> Result<Review> {
        self.store
            .find_by_user_and_movie(user_id, movie_id)
            .await?
            .ok_or_else(|| ReviewError::review_not_found(user_id, movie_id))
    }

    /// Delete the review for a pair, returning the removed record
    pub async fn remove(&self, user_id: Uuid, movie_id: Uuid) -> Result<Review> {
        let review = self
            .store
            .delete_by_user_and_movie(user_id, movie_id)
            .await?
            .ok_or_else(|| ReviewError::review_not_found(user_id, movie_id))?;

        info!(id = %review.id, %user_id, %movie_id, "Removed review");

        Ok(review)
    }

    /// Most recently updated reviews of a movie.
    ///
    /// Fails with `NotFound` when the movie has no reviews at all.
    pub async fn latest_for_movie(&self, movie_id: Uuid, limit: Option<usize>) -> Result<Vec<Review>> {
        let limit = limit.unwrap_or(self.limits.latest_for_movie);
        let page_size = u32::try_from(limit.max(1)).unwrap_or(u32::MAX);

        let page = self
            .store
            .page_by_movie(movie_id, PageRequest::new(0, page_size)?)
            .await?;

        if page.total_elements == 0 {
            return Err(ReviewError::NotFound(format!(
                "Latest Reviews not found for movie with id [{}]",
                movie_id
            )));
        }

        let mut items = page.items;
        items.truncate(limit);

        debug!(%movie_id, count = items.len(), "Fetched latest reviews for movie");

        Ok(items)
    }

    /// A page of a movie's reviews, most recently updated first.
    ///
    /// An empty page is a successful result.
    pub async fn page_for_movie(
        &self,
        movie_id: Uuid,
        page_number: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<Page<Review>> {
        let page_size = page_size.unwrap_or(self.limits.default_page_size);
        if page_size > self.limits.max_page_size {
            return Err(ReviewError::InvalidRequest(format!(
                "Page size {} exceeds the maximum of {}",
                page_size, self.limits.max_page_size
            )));
        }

        let request = PageRequest::new(page_number.unwrap_or(0), page_size)?;
        self.store.page_by_movie(movie_id, request).await
    }

    /// Fails with `NotFound` when the movie has no reviews
    pub async fn count_reviews_for_movie(&self, movie_id: Uuid) -> Result<u64> {
        match self.store.count_by_movie(movie_id).await? {
            0 => Err(ReviewError::NotFound(format!(
                "No reviews found for movie with id [{}]",
                movie_id
            ))),
            count => Ok(count),
        }
    }

    /// Fails with `NotFound` when the user has reviewed nothing
    pub async fn count_movies_reviewed_by_user(&self, user_id: Uuid) -> Result<u64> {
        match self.store.count_movies_by_user(user_id).await? {
            0 => Err(ReviewError::NotFound(format!(
                "No movies reviewed by user with id [{}]",
                user_id
            ))),
            count => Ok(count),
        }
    }

    /// A user's most recently created reviews.
    ///
    /// Ordered by creation time, unlike the movie listings which follow
    /// `updated_on`. Fails with `NotFound` when the user has no reviews.
    pub async fn latest_for_user(&self, user_id: Uuid, limit: Option<usize>) -> Result<Vec<Review>> {
        let limit = limit.unwrap_or(self.limits.latest_for_user);

        if limit == 0 {
            self.count_movies_reviewed_by_user(user_id).await?;
            return Ok(Vec::new());
        }

        let reviews = self.store.latest_by_user(user_id, limit).await?;
        if reviews.is_empty() {
            return Err(ReviewError::NotFound(format!(
                "Latest Reviews not found for user with id [{}]",
                user_id
            )));
        }

        Ok(reviews)
    }
}
