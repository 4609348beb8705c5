use async_trait::async_trait;
use sqlx::PgPool;

use crate::db;
use crate::filter::QueryFilter;
use crate::models::{Department, GraduatePage, GraduateRecord};

#[async_trait]
pub trait PageSource {
    async fn fetch_page(
        &self,
        dept: Department,
        filter: &QueryFilter,
    ) -> anyhow::Result<GraduatePage>;
}

#[async_trait]
impl PageSource for PgPool {
    async fn fetch_page(
        &self,
        dept: Department,
        filter: &QueryFilter,
    ) -> anyhow::Result<GraduatePage> {
        db::fetch_graduates(self, dept, filter).await
    }
}

/// Page navigation over one department with a fixed filter.
///
/// Every successful move re-fetches and replaces the held rows. Navigation
/// takes `&mut self`, so there is never more than one page request in flight.
pub struct Pager<S> {
    source: S,
    dept: Department,
    filter: QueryFilter,
    current_page: u32,
    total_pages: u32,
    total_records: u64,
    rows: Vec<GraduateRecord>,
}

impl<S: PageSource> Pager<S> {
    pub fn new(source: S, dept: Department, filter: QueryFilter) -> Self {
        Self {
            source,
            dept,
            filter,
            current_page: 1,
            total_pages: 1,
            total_records: 0,
            rows: Vec::new(),
        }
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn rows(&self) -> &[GraduateRecord] {
        &self.rows
    }

    pub fn can_prev(&self) -> bool {
        self.current_page > 1
    }

    pub fn can_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    /// Fetches the current page unconditionally. Used for the first load and
    /// to retry after an error.
    pub async fn refresh(&mut self) -> anyhow::Result<()> {
        self.load(self.current_page).await
    }

    /// Returns `Ok(false)` without fetching when `page` is outside
    /// `1..=total_pages`.
    pub async fn go_to(&mut self, page: u32) -> anyhow::Result<bool> {
        if page < 1 || page > self.total_pages {
            return Ok(false);
        }
        self.load(page).await?;
        Ok(true)
    }

    pub async fn next(&mut self) -> anyhow::Result<bool> {
        if !self.can_next() {
            return Ok(false);
        }
        self.go_to(self.current_page + 1).await
    }

    pub async fn prev(&mut self) -> anyhow::Result<bool> {
        if !self.can_prev() {
            return Ok(false);
        }
        self.go_to(self.current_page - 1).await
    }

    async fn load(&mut self, page: u32) -> anyhow::Result<()> {
        let filter = self.filter.with_page(page);
        let result = self.source.fetch_page(self.dept, &filter).await?;
        self.current_page = result.current_page;
        self.total_pages = result.total_pages;
        self.total_records = result.total_records;
        self.rows = result.data;
        Ok(())
    }
}
