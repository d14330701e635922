use std::sync::Arc;

use async_trait::async_trait;
use shared::{error::LoadError, record::Record};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    pub filter: Option<String>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self::at(0, limit)
    }

    pub fn at(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: limit.max(1),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub records: Vec<Record>,
    pub is_last_page: bool,
}

impl PageResult {
    pub fn from_records(records: Vec<Record>, limit: usize) -> Self {
        let is_last_page = records.len() < limit;
        Self {
            records,
            is_last_page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEndpoint {
    pub entity_set: String,
    pub search_fields: Vec<String>,
}

impl ListEndpoint {
    pub fn new(entity_set: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            search_fields: Vec::new(),
        }
    }

    pub fn with_search_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        entity_set: &str,
        request: &PageRequest,
    ) -> Result<PageResult, LoadError>;
}

#[async_trait]
impl<T> PageSource for Arc<T>
where
    T: PageSource + ?Sized,
{
    async fn fetch_page(
        &self,
        entity_set: &str,
        request: &PageRequest,
    ) -> Result<PageResult, LoadError> {
        self.as_ref().fetch_page(entity_set, request).await
    }
}
