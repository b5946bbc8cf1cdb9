//! Page requests and paged results for read-model queries.

use serde::{Deserialize, Serialize};

pub const MAX_PAGE_SIZE: u32 = 100;

/// A validated page request: `page >= 1`, `1 <= page_size <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Clamp raw caller input into range. Never fails.
    pub fn clamped(page: i64, page_size: i64) -> Self {
        Self {
            page: page.clamp(1, i64::from(u32::MAX)) as u32,
            page_size: page_size.clamp(1, i64::from(MAX_PAGE_SIZE)) as u32,
        }
    }

    pub fn first(page_size: u32) -> Self {
        Self::clamped(1, i64::from(page_size))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1).saturating_mul(self.page_size as usize)
    }

    /// Cut one page out of a fully sorted result set.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(self.offset())
            .take(self.page_size as usize)
            .collect();
        Page {
            items,
            page: self.page,
            page_size: self.page_size,
            total,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(20)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size as usize)
    }

    pub fn has_next(&self) -> bool {
        (self.page as usize) < self.total_pages()
    }
}
