//! List options and page tokens
//!
//! Pagination is forward-only. The next-page token is an opaque base64 JSON
//! document holding the offset and the sort order it was issued under.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pipelines_core::domain::StorageState;
use pipelines_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i32 = 20;
pub const MAX_PAGE_SIZE: i32 = 200;

/// Simple equality filters applied before paging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub name: Option<String>,
    pub storage_state: Option<StorageState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PageToken {
    offset: i64,
    sort_by: String,
    desc: bool,
}

/// Validated list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub page_size: i32,
    pub sort_by: String,
    pub desc: bool,
    pub filter: ListFilter,
    offset: i64,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: String::new(),
            desc: false,
            filter: ListFilter::default(),
            offset: 0,
        }
    }
}

impl ListOptions {
    /// Build options from raw request values
    ///
    /// A zero page size takes the default and large sizes are capped. A token
    /// issued under a different sort order is rejected.
    pub fn new(page_size: i32, page_token: &str, sort_by: &str, desc: bool) -> Result<Self> {
        if page_size < 0 {
            return Err(Error::invalid_input(format!(
                "Invalid page size {page_size}: must be non-negative"
            )));
        }
        let page_size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let offset = if page_token.is_empty() {
            0
        } else {
            let token = decode_token(page_token)?;
            if token.sort_by != sort_by || token.desc != desc {
                return Err(Error::invalid_input(format!(
                    "Page token was issued for sort order {:?} (desc: {}), not {sort_by:?} (desc: {desc})",
                    token.sort_by, token.desc
                )));
            }
            token.offset
        };
        Ok(Self {
            page_size,
            sort_by: sort_by.to_string(),
            desc,
            filter: ListFilter::default(),
            offset,
        })
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn with_filter(mut self, filter: ListFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Rows to fetch: one more than the page to detect a following page
    pub fn fetch_limit(&self) -> i64 {
        i64::from(self.page_size) + 1
    }

    /// Map `sort_by` onto a column, ties broken by id
    ///
    /// `columns` maps accepted API field names to column names. The first
    /// entry is the default.
    pub fn order_clause(&self, columns: &[(&str, &str)]) -> Result<String> {
        let column = if self.sort_by.is_empty() {
            columns.first().map(|(_, column)| *column).unwrap_or("created_at")
        } else {
            columns
                .iter()
                .find(|(field, _)| *field == self.sort_by)
                .map(|(_, column)| *column)
                .ok_or_else(|| {
                    Error::invalid_input(format!("Cannot sort by field {:?}", self.sort_by))
                })?
        };
        let direction = if self.desc { "DESC" } else { "ASC" };
        Ok(format!("ORDER BY {column} {direction}, id {direction}"))
    }

    /// Build a page from a window fetched with [`Self::fetch_limit`]
    pub fn page<T>(&self, mut window: Vec<T>, total_size: i64) -> Result<ListPage<T>> {
        let has_more = window.len() > self.page_size as usize;
        window.truncate(self.page_size as usize);
        let next_page_token = if has_more {
            encode_token(&PageToken {
                offset: self.offset + i64::from(self.page_size),
                sort_by: self.sort_by.clone(),
                desc: self.desc,
            })?
        } else {
            String::new()
        };
        Ok(ListPage {
            items: window,
            total_size: i32::try_from(total_size).unwrap_or(i32::MAX),
            next_page_token,
        })
    }

    /// Page over an already filtered and sorted in-memory list
    pub fn paginate<T>(&self, items: Vec<T>) -> Result<ListPage<T>> {
        let total = items.len() as i64;
        let window: Vec<T> = items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.fetch_limit() as usize)
            .collect();
        self.page(window, total)
    }
}

/// One page of a list result
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub total_size: i32,
    pub next_page_token: String,
}

impl<T> ListPage<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListPage<U> {
        ListPage {
            items: self.items.into_iter().map(f).collect(),
            total_size: self.total_size,
            next_page_token: self.next_page_token,
        }
    }
}

fn encode_token(token: &PageToken) -> Result<String> {
    let json = serde_json::to_vec(token)
        .map_err(|e| Error::internal(e, "Failed to encode the next page token"))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_token(token: &str) -> Result<PageToken> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| Error::invalid_input(format!("Invalid page token: {e}")))?;
    let token: PageToken = serde_json::from_slice(&bytes)
        .map_err(|e| Error::invalid_input(format!("Invalid page token: {e}")))?;
    if token.offset < 0 {
        return Err(Error::invalid_input(format!(
            "Invalid page token: negative offset {}",
            token.offset
        )));
    }
    Ok(token)
}
