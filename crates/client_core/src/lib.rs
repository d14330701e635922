pub mod loader;
pub mod odata;
pub mod session;
pub mod source;
pub mod view;

pub use loader::{
    CollectionState, DiscardErrors, DiscardView, ErrorSink, LoadOutcome, LogErrors,
    PagedCollectionLoader, ViewModelSink, ViewUpdate,
};
pub use odata::{FetchPolicy, ODataSource};
pub use session::{ListSession, Phase, SessionError};
pub use source::{ListEndpoint, PageRequest, PageResult, PageSource};
pub use view::{
    apply_local_filter, compare_values, sort_by, FilterParseError, LocalFilter, SortDirection,
    SortKey,
};
