//! Optional timing counters for the query layer.
//!
//! Counters are only collected when the `SOMBRA_PROFILE` environment variable is set when
//! the process first touches them; otherwise every hook is a cheap no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query-layer profiling metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent optimizing trees (cache lookups included).
    pub optimize_ns: u64,
    /// Number of optimize calls.
    pub optimize_count: u64,
    /// Total nanoseconds spent instantiating tree-keeping sequences.
    pub instantiate_ns: u64,
    /// Number of tree instantiations.
    pub instantiate_count: u64,
    /// Total nanoseconds spent in materialized set operations.
    pub set_op_ns: u64,
    /// Number of materialized set operations.
    pub set_op_count: u64,
    /// Total nanoseconds spent in in-memory sorts.
    pub in_memory_sort_ns: u64,
    /// Number of in-memory sorts.
    pub in_memory_sort_count: u64,
    /// Total nanoseconds spent in indirect link sorts.
    pub link_sort_ns: u64,
    /// Number of indirect link sorts.
    pub link_sort_count: u64,
    /// Total nanoseconds spent merging per-type sorted sequences.
    pub merge_ns: u64,
    /// Number of merges.
    pub merge_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    optimize_ns: AtomicU64,
    optimize_count: AtomicU64,
    instantiate_ns: AtomicU64,
    instantiate_count: AtomicU64,
    set_op_ns: AtomicU64,
    set_op_count: AtomicU64,
    in_memory_sort_ns: AtomicU64,
    in_memory_sort_count: AtomicU64,
    link_sort_ns: AtomicU64,
    link_sort_count: AtomicU64,
    merge_ns: AtomicU64,
    merge_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("SOMBRA_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    Optimize,
    Instantiate,
    SetOperation,
    InMemorySort,
    LinkSort,
    Merge,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Optimize => (&counters.optimize_ns, &counters.optimize_count),
        QueryProfileKind::Instantiate => (&counters.instantiate_ns, &counters.instantiate_count),
        QueryProfileKind::SetOperation => (&counters.set_op_ns, &counters.set_op_count),
        QueryProfileKind::InMemorySort => {
            (&counters.in_memory_sort_ns, &counters.in_memory_sort_count)
        }
        QueryProfileKind::LinkSort => (&counters.link_sort_ns, &counters.link_sort_count),
        QueryProfileKind::Merge => (&counters.merge_ns, &counters.merge_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of the query profiling counters.
///
/// Returns `None` when profiling is disabled. With `reset` the counters are zeroed as
/// they are read.
///
/// ```no_run
/// use sombra_entity_query::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("optimized {} trees in {}ns", snapshot.optimize_count, snapshot.optimize_ns);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        optimize_ns: load(&counters.optimize_ns),
        optimize_count: load(&counters.optimize_count),
        instantiate_ns: load(&counters.instantiate_ns),
        instantiate_count: load(&counters.instantiate_count),
        set_op_ns: load(&counters.set_op_ns),
        set_op_count: load(&counters.set_op_count),
        in_memory_sort_ns: load(&counters.in_memory_sort_ns),
        in_memory_sort_count: load(&counters.in_memory_sort_count),
        link_sort_ns: load(&counters.link_sort_ns),
        link_sort_count: load(&counters.link_sort_count),
        merge_ns: load(&counters.merge_ns),
        merge_count: load(&counters.merge_count),
    })
}
