//! Review store: code reviews tracked per branch

use super::{STORE_VERSION, load_file, lock, save_file};
use crate::error::Result;
use crate::types::Review;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error};

#[derive(Serialize, Deserialize)]
struct ReviewsFile {
    version: u32,
    #[serde(default)]
    reviews: Vec<Review>,
}

/// Code reviews keyed by `(repository, review id)`
///
/// Only the event dispatcher (and the startup backlog load) writes here.
pub struct ReviewStore {
    reviews: Mutex<Vec<Review>>,
    path: Option<PathBuf>,
}

impl ReviewStore {
    /// Store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            reviews: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Store persisted at `path`, loading whatever it already holds
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let reviews = load_file::<ReviewsFile>(&path)?
            .map(|file| file.reviews)
            .unwrap_or_default();

        Ok(Self {
            reviews: Mutex::new(reviews),
            path: Some(path),
        })
    }

    /// Insert a review, replacing any review with the same identity
    pub fn upsert(&self, review: Review) {
        let mut reviews = lock(&self.reviews);
        debug!(review_id = %review.id, branch_id = %review.branch_id, status = %review.status, "storing review");
        match reviews
            .iter_mut()
            .find(|r| r.repository == review.repository && r.id == review.id)
        {
            Some(existing) => *existing = review,
            None => reviews.push(review),
        }
        self.persist(&reviews);
    }

    /// Delete a review, returning whether it was stored
    pub fn delete(&self, repository: &str, review_id: &str) -> bool {
        let mut reviews = lock(&self.reviews);
        let before = reviews.len();
        reviews.retain(|r| !(r.repository == repository && r.id == review_id));
        if reviews.len() == before {
            return false;
        }

        debug!(review_id, "deleted review");
        self.persist(&reviews);
        true
    }

    /// Every review targeting the branch
    pub fn get_by_branch(&self, repository: &str, branch_id: &str) -> Vec<Review> {
        lock(&self.reviews)
            .iter()
            .filter(|r| r.repository == repository && r.branch_id == branch_id)
            .cloned()
            .collect()
    }

    /// True only if the branch has reviews and every one is approved
    pub fn all_approved_and_at_least_one(&self, repository: &str, branch_id: &str) -> bool {
        let reviews = self.get_by_branch(repository, branch_id);
        !reviews.is_empty() && reviews.iter().all(Review::is_approved)
    }

    /// Number of stored reviews
    pub fn len(&self) -> usize {
        lock(&self.reviews).len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        lock(&self.reviews).is_empty()
    }

    fn persist(&self, reviews: &[Review]) {
        let Some(path) = &self.path else {
            return;
        };

        let file = ReviewsFile {
            version: STORE_VERSION,
            reviews: reviews.to_vec(),
        };
        if let Err(e) = save_file(path, "review store", &file) {
            error!(error = %e, "failed to persist review store");
        }
    }
}
