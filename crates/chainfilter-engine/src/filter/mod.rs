//! Installed filters and their result buffers.
//!
//! A [`Filter`] pairs one of the filter variants with two buffers:
//! `all` (everything the filter ever produced) and `changes` (produced since
//! the last drain). Both only grow through [`Filter::initialize`] and
//! [`Filter::advance`].
//!
//! Push-only filters ([`Filter::push_only`]) back subscriptions. Their
//! results are drained right after every advance, so they keep no `all`
//! history and skip the log backfill.

pub mod block;
pub mod log;

use chainfilter_core::{FilterError, FilterItem, FilterParams, FilterType, SyncEvent};

use crate::upstream::Upstream;

pub use self::block::{BlockFilter, PendingTransactionFilter};
pub use self::log::LogFilter;

/// The filter variants.
#[derive(Debug, Clone)]
pub enum FilterKind {
    Log(LogFilter),
    Block(BlockFilter),
    PendingTransaction(PendingTransactionFilter),
}

#[derive(Debug, Clone)]
struct ResultBuffer {
    all: Vec<FilterItem>,
    changes: Vec<FilterItem>,
    /// `false` for push-only filters.
    retain_all: bool,
}

impl Default for ResultBuffer {
    fn default() -> Self {
        Self {
            all: Vec::new(),
            changes: Vec::new(),
            retain_all: true,
        }
    }
}

impl ResultBuffer {
    fn seed(&mut self, items: impl IntoIterator<Item = FilterItem>) {
        self.all.extend(items);
    }

    fn push(&mut self, items: Vec<FilterItem>) {
        if self.retain_all {
            self.all.extend(items.iter().cloned());
        }
        self.changes.extend(items);
    }
}

/// A filter together with its accumulated results.
#[derive(Debug, Clone)]
pub struct Filter {
    kind: FilterKind,
    results: ResultBuffer,
}

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            results: ResultBuffer::default(),
        }
    }

    pub fn log(params: FilterParams) -> Self {
        Self::new(FilterKind::Log(LogFilter::new(params)))
    }

    pub fn block() -> Self {
        Self::new(FilterKind::Block(BlockFilter))
    }

    pub fn pending_transactions() -> Self {
        Self::new(FilterKind::PendingTransaction(PendingTransactionFilter))
    }

    /// Keep results only until they are drained: no backfill on
    /// initialize and an always-empty [`all_results`](Self::all_results).
    pub fn push_only(mut self) -> Self {
        self.results.retain_all = false;
        self
    }

    pub fn is_push_only(&self) -> bool {
        !self.results.retain_all
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    pub fn filter_type(&self) -> FilterType {
        match self.kind {
            FilterKind::Log(_) => FilterType::Log,
            FilterKind::Block(_) => FilterType::Block,
            FilterKind::PendingTransaction(_) => FilterType::PendingTransaction,
        }
    }

    /// Prepare the filter at chain head `head`. Only log filters backfill;
    /// the backfill lands in the full results, not in the pending changes.
    /// Push-only log filters just pin their lower bound.
    pub async fn initialize(&mut self, upstream: &Upstream, head: u64) -> Result<(), FilterError> {
        if let FilterKind::Log(filter) = &mut self.kind {
            if self.results.retain_all {
                let logs = filter.initialize(&upstream.query, head).await?;
                self.results.seed(logs.into_iter().map(FilterItem::from));
            } else {
                filter.pin(head);
            }
        }
        Ok(())
    }

    /// Process the blocks `event` newly covers. Returns the number of new items.
    pub async fn advance(&mut self, upstream: &Upstream, event: SyncEvent) -> Result<usize, FilterError> {
        let items: Vec<FilterItem> = match &self.kind {
            FilterKind::Log(filter) => filter
                .advance(&upstream.query, event)
                .await?
                .into_iter()
                .map(FilterItem::from)
                .collect(),
            FilterKind::Block(filter) => filter
                .advance(&upstream.fetcher, event)
                .await
                .into_iter()
                .map(FilterItem::Hash)
                .collect(),
            FilterKind::PendingTransaction(filter) => filter
                .advance(&upstream.fetcher, event)
                .await
                .into_iter()
                .map(FilterItem::Hash)
                .collect(),
        };
        let count = items.len();
        self.results.push(items);
        Ok(count)
    }

    /// Take the changes accumulated since the previous call.
    pub fn take_changes(&mut self) -> Vec<FilterItem> {
        std::mem::take(&mut self.results.changes)
    }

    pub fn all_results(&self) -> &[FilterItem] {
        &self.results.all
    }

    /// `eth_getFilterLogs` view: the full results of a log filter, nothing
    /// for the other variants.
    pub fn logs(&self) -> &[FilterItem] {
        match self.kind {
            FilterKind::Log(_) => self.all_results(),
            _ => &[],
        }
    }
}
