use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReviewError, Result};

/// A user's review of a movie. At most one exists per (user, movie) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub movie_id: Uuid,
    pub rating: Option<i32>,
    pub title: Option<String>,
    pub content: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// Payload for creating or updating the review of a (user, movie) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReview {
    pub user_id: Uuid,
    pub movie_id: Uuid,
    pub rating: Option<i32>,
    pub title: Option<String>,
    pub content: String,
}

impl Review {
    pub fn new(request: UpsertReview, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            movie_id: request.movie_id,
            rating: request.rating,
            title: request.title,
            content: request.content,
            created_on: now,
            updated_on: now,
        }
    }

    /// Overwrite the mutable fields from an upsert request.
    ///
    /// Content and title are always replaced. The rating is only replaced when
    /// the request carries one, so an absent rating never clears a stored one.
    /// `updated_on` never moves backwards.
    pub fn apply(&mut self, request: &UpsertReview, now: DateTime<Utc>) {
        self.content = request.content.clone();
        self.title = request.title.clone();
        if let Some(rating) = request.rating {
            self.rating = Some(rating);
        }
        self.updated_on = now.max(self.updated_on);
    }

    pub fn key(&self) -> (Uuid, Uuid) {
        (self.user_id, self.movie_id)
    }
}

/// Outcome of an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Created(Review),
    Updated(Review),
}

impl Upserted {
    pub fn review(&self) -> &Review {
        match self {
            Upserted::Created(review) | Upserted::Updated(review) => review,
        }
    }

    pub fn into_review(self) -> Review {
        match self {
            Upserted::Created(review) | Upserted::Updated(review) => review,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Upserted::Created(_))
    }
}

/// Zero-based page address. Always has a page size of at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPageRequest")]
pub struct PageRequest {
    page_number: u32,
    page_size: u32,
}

#[derive(Deserialize)]
struct RawPageRequest {
    page_number: u32,
    page_size: u32,
}

impl TryFrom<RawPageRequest> for PageRequest {
    type Error = ReviewError;

    fn try_from(raw: RawPageRequest) -> Result<Self> {
        Self::new(raw.page_number, raw.page_size)
    }
}

impl PageRequest {
    pub fn new(page_number: u32, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(ReviewError::InvalidRequest(
                "Page size must not be less than one".to_string(),
            ));
        }
        Ok(Self {
            page_number,
            page_size,
        })
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page_number) * u64::from(self.page_size)
    }
}

/// A bounded slice of an ordered result set plus total-count metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        let total_pages = match u64::from(request.page_size) {
            0 => 0,
            size => total_elements.div_ceil(size),
        };
        Self {
            items,
            page_number: request.page_number,
            page_size: request.page_size,
            total_elements,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page_number: self.page_number,
            page_size: self.page_size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
