//! Mapping from page number to an in-memory page buffer, plus monotonic
//! page-number allocation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace};

use crate::error::BtreeError;
use crate::page::MemPage;

/// Only fetch; fail if the page is missing.
pub const FETCH: u8 = 0x1;
/// Create the page (assigning the next free page number) on a miss.
pub const CREATE: u8 = 0x2;

/// One cached page plus its bookkeeping.
#[derive(Clone)]
pub struct CacheEntry {
    pub page_no: u32,
    pub dirty: bool,
    pub page: Rc<RefCell<MemPage>>,
}

/// Page number -> in-memory page, plus the high-water mark for
/// allocation. An unbounded, purely in-memory cache; it never evicts.
pub struct PageCache {
    entries: HashMap<u32, CacheEntry>,
    page_count: u32,
}

impl PageCache {
    pub fn new() -> Self {
        PageCache {
            entries: HashMap::new(),
            page_count: 0,
        }
    }

    /// Next allocation is this value + 1.
    pub fn page_number(&self) -> u32 {
        self.page_count
    }

    /// `fetch(pageNo, flags)`. `pageNo == 0` is always `InvalidPageNumber`.
    /// On a miss with `CREATE` set, a new page is allocated under the
    /// *next free* page number — not necessarily `page_no`. Callers that
    /// need a specific page number should use the allocator directly
    /// instead of relying on a mismatched `fetch(pageNo, CREATE)`.
    pub fn fetch(&mut self, page_no: u32, flags: u8) -> Result<CacheEntry, BtreeError> {
        if page_no == 0 {
            return Err(BtreeError::InvalidPageNumber);
        }
        if let Some(entry) = self.entries.get(&page_no) {
            trace!("page cache hit for page {}", page_no);
            return Ok(entry.clone());
        }
        if flags & CREATE != 0 {
            return Ok(self.allocate());
        }
        debug!("page cache miss for page {}", page_no);
        Err(BtreeError::CacheMiss)
    }

    /// Bump the page counter and insert a fresh zeroed page under the new
    /// number, marked dirty.
    pub fn allocate(&mut self) -> CacheEntry {
        self.page_count += 1;
        let page_no = self.page_count;
        let entry = CacheEntry {
            page_no,
            dirty: true,
            page: Rc::new(RefCell::new(MemPage::new_zero(page_no))),
        };
        debug!("allocated new page {}", page_no);
        self.entries.insert(page_no, entry.clone());
        entry
    }

    pub fn mark_dirty(&mut self, page_no: u32) {
        if let Some(entry) = self.entries.get_mut(&page_no) {
            entry.dirty = true;
        }
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_zero_is_invalid_page_number() {
        let mut cache = PageCache::new();
        assert_eq!(
            cache.fetch(0, CREATE),
            Err(BtreeError::InvalidPageNumber)
        );
    }

    #[test]
    fn fetch_missing_without_create_is_cache_miss() {
        let mut cache = PageCache::new();
        assert_eq!(cache.fetch(999, FETCH), Err(BtreeError::CacheMiss));
    }

    #[test]
    fn fetch_with_create_allocates_next_free_page_number_not_requested() {
        let mut cache = PageCache::new();
        cache.allocate(); // page 1 already exists
        let entry = cache.fetch(5, CREATE).unwrap();
        assert_eq!(entry.page_no, 2);
    }

    #[test]
    fn fetch_returns_cached_entry_on_hit() {
        let mut cache = PageCache::new();
        let first = cache.allocate();
        let second = cache.fetch(first.page_no, FETCH).unwrap();
        assert_eq!(first.page_no, second.page_no);
        assert!(Rc::ptr_eq(&first.page, &second.page));
    }
}
