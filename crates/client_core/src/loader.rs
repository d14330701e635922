use std::sync::Arc;

use shared::{error::LoadError, record::Record};
use tracing::{debug, info, warn};

use crate::{
    odata::contains_filter,
    source::{ListEndpoint, PageRequest, PageSource},
    view::{sort_in_place, LocalFilter, SortDirection, SortKey},
};

/// Continuation state and base snapshot of one list view. Owned by the caller
/// and threaded through every loader operation; the loader keeps none.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    base_records: Vec<Record>,
    next_offset: usize,
    has_more: bool,
    loaded: bool,
    page_size: usize,
    active_query: Option<String>,
    active_sort: Option<SortKey>,
    active_filter: Option<LocalFilter>,
}

impl CollectionState {
    pub fn new(page_size: usize) -> Self {
        Self {
            base_records: Vec::new(),
            next_offset: 0,
            has_more: false,
            loaded: false,
            page_size: page_size.max(1),
            active_query: None,
            active_sort: None,
            active_filter: None,
        }
    }

    pub fn base_records(&self) -> &[Record] {
        &self.base_records
    }

    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn active_query(&self) -> Option<&str> {
        self.active_query.as_deref()
    }

    pub fn active_sort(&self) -> Option<&SortKey> {
        self.active_sort.as_ref()
    }

    pub fn active_filter(&self) -> Option<&LocalFilter> {
        self.active_filter.as_ref()
    }

    pub fn sort_indicator(&self, field: &str) -> Option<SortDirection> {
        SortKey::indicator(self.active_sort.as_ref(), field)
    }

    pub fn displayed(&self) -> Vec<Record> {
        let mut records = match &self.active_filter {
            Some(filter) => filter.apply(&self.base_records),
            None => self.base_records.clone(),
        };
        if let Some(key) = &self.active_sort {
            sort_in_place(&mut records, key);
        }
        records
    }

    pub fn with_sort(mut self, sort: Option<SortKey>) -> Self {
        self.active_sort = sort;
        self
    }

    pub fn with_filter(mut self, filter: Option<LocalFilter>) -> Self {
        self.active_filter = filter;
        self
    }

    fn replace_base(&mut self, records: Vec<Record>) {
        self.next_offset = records.len();
        self.has_more = self.next_offset >= self.page_size;
        self.base_records = records;
        self.loaded = true;
    }

    fn clear_base(&mut self) {
        self.base_records.clear();
        self.next_offset = 0;
        self.has_more = false;
        self.loaded = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewUpdate {
    pub records: Vec<Record>,
    pub has_more: bool,
    pub sort: Option<SortKey>,
    pub query: Option<String>,
}

impl ViewUpdate {
    pub fn of(state: &CollectionState) -> Self {
        Self {
            records: state.displayed(),
            has_more: state.has_more,
            sort: state.active_sort.clone(),
            query: state.active_query.clone(),
        }
    }
}

pub trait ViewModelSink: Send + Sync {
    fn publish(&self, update: ViewUpdate);
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &LoadError);
}

pub struct DiscardView;

impl ViewModelSink for DiscardView {
    fn publish(&self, _update: ViewUpdate) {}
}

pub struct DiscardErrors;

impl ErrorSink for DiscardErrors {
    fn report(&self, _error: &LoadError) {}
}

pub struct LogErrors;

impl ErrorSink for LogErrors {
    fn report(&self, error: &LoadError) {
        warn!(kind = ?error.kind, status = ?error.status, "list fetch failed: {}", error.message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub state: CollectionState,
    /// Already reported to the error sink when present.
    pub error: Option<LoadError>,
}

impl LoadOutcome {
    fn ok(state: CollectionState) -> Self {
        Self { state, error: None }
    }
}

pub struct PagedCollectionLoader<S: PageSource> {
    source: S,
    view_sink: Arc<dyn ViewModelSink>,
    error_sink: Arc<dyn ErrorSink>,
}

impl<S: PageSource> PagedCollectionLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            view_sink: Arc::new(DiscardView),
            error_sink: Arc::new(LogErrors),
        }
    }

    pub fn with_view_sink(mut self, sink: Arc<dyn ViewModelSink>) -> Self {
        self.view_sink = sink;
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    pub async fn load_initial(&self, endpoint: &ListEndpoint, page_size: usize) -> LoadOutcome {
        self.fetch_first_page(CollectionState::new(page_size), endpoint, None)
            .await
    }

    /// Appends the next page. Does nothing, and fetches nothing, once
    /// `has_more` is false.
    pub async fn load_more(&self, state: CollectionState, endpoint: &ListEndpoint) -> LoadOutcome {
        if !state.has_more {
            debug!(
                entity_set = %endpoint.entity_set,
                next_offset = state.next_offset,
                "load more skipped: no further pages"
            );
            return LoadOutcome::ok(state);
        }

        let mut state = state;
        let filter = state
            .active_query
            .as_deref()
            .and_then(|query| contains_filter(&endpoint.search_fields, query));
        let request = PageRequest::at(state.next_offset, state.page_size).with_filter(filter);

        let error = match self.source.fetch_page(&endpoint.entity_set, &request).await {
            Ok(page) if page.records.is_empty() => {
                info!(
                    entity_set = %endpoint.entity_set,
                    offset = request.offset,
                    "empty page, end of list"
                );
                state.has_more = false;
                None
            }
            Ok(page) => {
                let fetched = page.records.len();
                state.base_records.extend(page.records);
                state.next_offset += fetched;
                state.has_more = !page.is_last_page;
                info!(
                    entity_set = %endpoint.entity_set,
                    fetched,
                    total = state.next_offset,
                    has_more = state.has_more,
                    "appended page"
                );
                None
            }
            Err(err) => {
                state.has_more = false;
                Some(err)
            }
        };

        self.finish(state, error)
    }

    /// Server-side search over the endpoint's search fields. Always replaces
    /// the base snapshot; a blank query is a plain reload.
    pub async fn search(
        &self,
        state: CollectionState,
        endpoint: &ListEndpoint,
        query: &str,
    ) -> LoadOutcome {
        let query = query.trim();
        let fresh = CollectionState::new(state.page_size)
            .with_sort(state.active_sort)
            .with_filter(state.active_filter);
        if query.is_empty() {
            return self.fetch_first_page(fresh, endpoint, None).await;
        }
        if endpoint.search_fields.is_empty() {
            warn!(
                entity_set = %endpoint.entity_set,
                "no search fields configured, loading unfiltered list"
            );
        }
        self.fetch_first_page(fresh, endpoint, Some(query.to_string()))
            .await
    }

    pub fn sort(&self, mut state: CollectionState, field: &str) -> CollectionState {
        state.active_sort = Some(SortKey::toggle(state.active_sort.as_ref(), field));
        self.view_sink.publish(ViewUpdate::of(&state));
        state
    }

    pub fn filter(&self, state: CollectionState, filter: Option<LocalFilter>) -> CollectionState {
        let state = state.with_filter(filter);
        self.view_sink.publish(ViewUpdate::of(&state));
        state
    }

    async fn fetch_first_page(
        &self,
        mut state: CollectionState,
        endpoint: &ListEndpoint,
        query: Option<String>,
    ) -> LoadOutcome {
        let filter = query
            .as_deref()
            .and_then(|query| contains_filter(&endpoint.search_fields, query));
        let request = PageRequest::first(state.page_size).with_filter(filter);
        state.active_query = query;

        let error = match self.source.fetch_page(&endpoint.entity_set, &request).await {
            Ok(page) => {
                state.replace_base(page.records);
                info!(
                    entity_set = %endpoint.entity_set,
                    fetched = state.next_offset,
                    has_more = state.has_more,
                    query = state.active_query.as_deref().unwrap_or(""),
                    "loaded first page"
                );
                None
            }
            Err(err) => {
                state.clear_base();
                Some(err)
            }
        };

        self.finish(state, error)
    }

    fn finish(&self, state: CollectionState, error: Option<LoadError>) -> LoadOutcome {
        if let Some(err) = &error {
            self.error_sink.report(err);
        }
        self.view_sink.publish(ViewUpdate::of(&state));
        LoadOutcome { state, error }
    }
}

#[cfg(test)]
#[path = "tests/loader_tests.rs"]
mod tests;
