//! Transport-facing contract: request/response shapes and the mapping of
//! service outcomes onto HTTP-style statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ReviewError;
use crate::models::{Page, Review, UpsertReview};

/// Incoming review payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub user_id: Uuid,
    pub movie_id: Uuid,
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

impl From<ReviewRequest> for UpsertReview {
    fn from(request: ReviewRequest) -> Self {
        Self {
            user_id: request.user_id,
            movie_id: request.movie_id,
            rating: request.rating,
            title: request.title,
            content: request.content,
        }
    }
}

/// A review as exposed to clients. The internal id is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub user_id: Uuid,
    pub movie_id: Uuid,
    pub rating: Option<i32>,
    pub title: Option<String>,
    pub content: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl From<Review> for ReviewResponse {
    fn from(review: Review) -> Self {
        Self {
            user_id: review.user_id,
            movie_id: review.movie_id,
            rating: review.rating,
            title: review.title,
            content: review.content,
            created_on: review.created_on,
            updated_on: review.updated_on,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub content: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl From<Page<Review>> for PageResponse<ReviewResponse> {
    fn from(page: Page<Review>) -> Self {
        let page = page.map(ReviewResponse::from);
        Self {
            content: page.items,
            page_number: page.page_number,
            page_size: page.page_size,
            total_elements: page.total_elements,
            total_pages: page.total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieReviewStats {
    pub total_reviews: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReviewStats {
    pub reviewed_movies: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Response status for a service outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    NoContent,
    NotFound,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NoContent => 204,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
        }
    }

    pub fn is_success(self) -> bool {
        self.code() < 400
    }
}

impl From<&ReviewError> for Status {
    fn from(err: &ReviewError) -> Self {
        match err {
            ReviewError::NotFound(_) => Status::NotFound,
            _ => Status::InternalServerError,
        }
    }
}

impl ErrorResponse {
    /// Map a failed operation to its status and body, logging it on the way.
    ///
    /// Not-found outcomes are expected client errors and log at warn; anything
    /// else is unexpected and logs at error.
    pub fn from_error(err: &ReviewError) -> (Status, Self) {
        let status = Status::from(err);
        match status {
            Status::NotFound => warn!(error = %err, "Review lookup found nothing"),
            _ => error!(error = %err, "Unexpected error while handling review request"),
        }

        (
            status,
            Self {
                timestamp: Utc::now(),
                message: err.to_string(),
            },
        )
    }
}
