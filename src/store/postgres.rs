use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::ReviewStore;
use crate::error::{ReviewError, Result};
use crate::models::{Page, PageRequest, Review, UpsertReview, Upserted};

const REVIEW_COLUMNS: &str =
    "id, user_id, movie_id, rating, title, content, created_on, updated_on";

/// PostgreSQL-backed review store for production persistence.
///
/// The `reviews_user_movie_key` unique index enforces one review per
/// (user, movie) pair; upserts are a single `INSERT .. ON CONFLICT` statement
/// against that index.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given connection string
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ReviewError::Database(e.into()))?;

        info!("Database migrations complete");

        Ok(())
    }
}

impl ReviewStore for PostgresStore {
    async fn find_by_user_and_movie(&self, user_id: Uuid, movie_id: Uuid) -> Result<Option<Review>> {
        let row = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE user_id = $1 AND movie_id = $2"
        ))
        .bind(user_id)
        .bind(movie_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(review_from_row))
    }

    async fn insert(&self, review: &Review) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO reviews ({REVIEW_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(review.id)
        .bind(review.user_id)
        .bind(review.movie_id)
        .bind(review.rating)
        .bind(&review.title)
        .bind(&review.content)
        .bind(review.created_on)
        .bind(review.updated_on)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, review.user_id, review.movie_id))?;

        debug!(id = %review.id, "Inserted review into database");

        Ok(())
    }

    async fn delete_by_user_and_movie(&self, user_id: Uuid, movie_id: Uuid) -> Result<Option<Review>> {
        let row = sqlx::query(&format!(
            "DELETE FROM reviews WHERE user_id = $1 AND movie_id = $2 RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(user_id)
        .bind(movie_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(review_from_row))
    }

    async fn page_by_movie(&self, movie_id: Uuid, request: PageRequest) -> Result<Page<Review>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE movie_id = $1")
            .bind(movie_id)
            .fetch_one(&mut *tx)
            .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {REVIEW_COLUMNS}
            FROM reviews
            WHERE movie_id = $1
            ORDER BY updated_on DESC, id ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(movie_id)
        .bind(i64::from(request.page_size()))
        .bind(request.offset() as i64)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let items = rows.iter().map(review_from_row).collect();
        Ok(Page::new(items, request, total as u64))
    }

    async fn count_by_movie(&self, movie_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE movie_id = $1")
            .bind(movie_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn count_movies_by_user(&self, user_id: Uuid) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT movie_id) FROM reviews WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn latest_by_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<Review>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REVIEW_COLUMNS}
            FROM reviews
            WHERE user_id = $1
            ORDER BY created_on DESC, id ASC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(review_from_row).collect())
    }

    /// Single-statement upsert against the unique (user_id, movie_id) index.
    ///
    /// `xmax = 0` holds only for a freshly inserted tuple, which tells the
    /// two outcomes apart without a second round trip.
    async fn upsert(&self, request: UpsertReview, now: DateTime<Utc>) -> Result<Upserted> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reviews ({REVIEW_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (user_id, movie_id) DO UPDATE SET
                rating = COALESCE(EXCLUDED.rating, reviews.rating),
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                updated_on = GREATEST(EXCLUDED.updated_on, reviews.updated_on)
            RETURNING {REVIEW_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.movie_id)
        .bind(request.rating)
        .bind(&request.title)
        .bind(&request.content)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let review = review_from_row(&row);
        if row.get::<bool, _>("inserted") {
            Ok(Upserted::Created(review))
        } else {
            Ok(Upserted::Updated(review))
        }
    }
}

fn review_from_row(row: &PgRow) -> Review {
    Review {
        id: row.get("id"),
        user_id: row.get("user_id"),
        movie_id: row.get("movie_id"),
        rating: row.get("rating"),
        title: row.get("title"),
        content: row.get("content"),
        created_on: row.get("created_on"),
        updated_on: row.get("updated_on"),
    }
}

fn map_unique_violation(err: sqlx::Error, user_id: Uuid, movie_id: Uuid) -> ReviewError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ReviewError::UniqueViolation { user_id, movie_id }
        }
        _ => ReviewError::Database(err),
    }
}
