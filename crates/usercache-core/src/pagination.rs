//! Page slicing for in-memory lists.
//!
//! `Paginator` keeps `1 <= page <= total_pages` at all times. When the
//! list shrinks the page is clamped down; it is never moved up on its
//! own, and nothing resets it when the caller switches to a different
//! list.

/// Items shown per page
pub const ITEMS_PER_PAGE: usize = 6;

/// `max(1, ceil(count / per_page))`
pub fn total_pages(count: usize, per_page: usize) -> usize {
    let per_page = per_page.max(1);
    count.div_ceil(per_page).max(1)
}

/// The visible slice of `items` for `page` (1-based). Out-of-range pages
/// yield an empty slice.
pub fn paginate<T>(items: &[T], page: usize, per_page: usize) -> &[T] {
    let per_page = per_page.max(1);
    let start = page.saturating_sub(1).saturating_mul(per_page);
    if start >= items.len() {
        return &[];
    }
    let end = (start + per_page).min(items.len());
    &items[start..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page: usize,
    per_page: usize,
    item_count: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(ITEMS_PER_PAGE)
    }
}

impl Paginator {
    pub fn new(per_page: usize) -> Self {
        Self {
            page: 1,
            per_page: per_page.max(1),
            item_count: 0,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.item_count, self.per_page)
    }

    /// Record the current length of the source list and clamp the page
    /// down if it now points past the end.
    pub fn set_item_count(&mut self, count: usize) {
        self.item_count = count;
        let total = self.total_pages();
        if self.page > total {
            self.page = total;
        }
    }

    /// Jump to page `n`, clamped into `[1, total_pages]`. Non-finite input
    /// is ignored; fractional input is truncated toward one.
    pub fn go_to_page(&mut self, n: f64) {
        if !n.is_finite() {
            return;
        }
        let total = self.total_pages();
        let clamped = n.clamp(1.0, total as f64);
        self.page = (clamped.floor() as usize).clamp(1, total);
    }

    pub fn go_to_next_page(&mut self) {
        self.go_to_page(self.page as f64 + 1.0);
    }

    pub fn go_to_previous_page(&mut self) {
        self.go_to_page(self.page as f64 - 1.0);
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    /// Sync with `items` and return the current page of it.
    pub fn slice<'a, T>(&mut self, items: &'a [T]) -> &'a [T] {
        self.set_item_count(items.len());
        paginate(items, self.page, self.per_page)
    }
}
