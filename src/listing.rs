//! Listing Service: read-only composition of Video Store queries into the
//! three views the site renders.

use serde::Serialize;

use crate::error::ReelResult;
use crate::store::{VideoRecord, VideoStore};

pub const HOME_FEATURED_LIMIT: usize = 3;
pub const HOME_RECENT_LIMIT: usize = 6;

/// A video may appear in both lists; the two queries are independent.
#[derive(Debug, Clone, Serialize)]
pub struct HomeView {
    pub featured: Vec<VideoRecord>,
    pub recent: Vec<VideoRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HighlightsView {
    pub featured: Vec<VideoRecord>,
    pub others: Vec<VideoRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminView {
    pub videos: Vec<VideoRecord>,
}

#[derive(Debug, Clone)]
pub struct ListingService {
    store: VideoStore,
}

impl ListingService {
    pub fn new(store: VideoStore) -> Self {
        Self { store }
    }

    pub fn home(&self) -> ReelResult<HomeView> {
        Ok(HomeView {
            featured: self.store.list_featured(HOME_FEATURED_LIMIT)?,
            recent: self.store.list_recent(HOME_RECENT_LIMIT)?,
        })
    }

    pub fn highlights(&self) -> ReelResult<HighlightsView> {
        Ok(HighlightsView {
            featured: self.store.list_featured(usize::MAX)?,
            others: self.store.list_non_featured()?,
        })
    }

    pub fn admin(&self) -> ReelResult<AdminView> {
        Ok(AdminView {
            videos: self.store.list_all()?,
        })
    }
}
