use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::PaginationConfig;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A clamped page/limit pair. Both are at least 1, and `page` is capped so
/// the row offset of the page always fits in an `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64, max_limit: i64) -> Self {
        let limit = limit.max(1).min(max_limit.max(1));
        Self {
            page: page.clamp(1, i64::MAX / limit),
            limit,
        }
    }

    pub fn from_query(query: &PageQuery, config: &PaginationConfig) -> Self {
        Self::new(
            query.page.unwrap_or(config.default_page),
            query.limit.unwrap_or(config.default_limit),
            config.max_limit,
        )
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// Output names for the item list and the total count.
#[derive(Debug, Clone, Copy)]
pub struct PageLabels {
    pub docs: &'static str,
    pub total_docs: &'static str,
}

/// One page of a listing plus the metadata clients page with.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub request: PageRequest,
    pub labels: PageLabels,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest, labels: PageLabels) -> Self {
        Self {
            items,
            total,
            request,
            labels,
        }
    }

    pub fn total_pages(&self) -> i64 {
        let pages = (self.total + self.request.limit - 1) / self.request.limit;
        pages.max(1)
    }

    pub fn has_prev_page(&self) -> bool {
        self.request.page > 1
    }

    pub fn has_next_page(&self) -> bool {
        self.request.page < self.total_pages()
    }
}

impl<T: Serialize> Serialize for Page<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(10))?;
        map.serialize_entry(self.labels.docs, &self.items)?;
        map.serialize_entry(self.labels.total_docs, &self.total)?;
        map.serialize_entry("limit", &self.request.limit)?;
        map.serialize_entry("page", &self.request.page)?;
        map.serialize_entry("totalPages", &self.total_pages())?;
        map.serialize_entry(
            "serialNumberStartFrom",
            &self.request.offset().saturating_add(1),
        )?;
        map.serialize_entry("hasPrevPage", &self.has_prev_page())?;
        map.serialize_entry("hasNextPage", &self.has_next_page())?;
        map.serialize_entry(
            "prevPage",
            &self.has_prev_page().then(|| self.request.page - 1),
        )?;
        map.serialize_entry(
            "nextPage",
            &self.has_next_page().then(|| self.request.page + 1),
        )?;
        map.end()
    }
}
