use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use serde::Serialize;

/// A snapshot of query processing profiling metrics.
///
/// Profiling is enabled via the `SOMBRA_ASK_PROFILE` environment variable and
/// tracks time spent in each phase of answering a query.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent compiling descriptions into plans.
    pub compile_ns: u64,
    /// Number of compilations.
    pub compile_count: u64,
    /// Total nanoseconds spent materializing plan nodes.
    pub execute_ns: u64,
    /// Number of plan executions.
    pub execute_count: u64,
    /// Total nanoseconds spent computing hierarchy closures.
    pub hierarchy_ns: u64,
    /// Number of hierarchy closures resolved (cache hits included).
    pub hierarchy_count: u64,
    /// Total nanoseconds spent in the final result selection.
    pub select_ns: u64,
    /// Number of final result selections.
    pub select_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    compile_ns: AtomicU64,
    compile_count: AtomicU64,
    execute_ns: AtomicU64,
    execute_count: AtomicU64,
    hierarchy_ns: AtomicU64,
    hierarchy_count: AtomicU64,
    select_ns: AtomicU64,
    select_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("SOMBRA_ASK_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Description to plan compilation.
    Compile,
    /// Plan materialization.
    Execute,
    /// Hierarchy closure computation.
    Hierarchy,
    /// Final instance or count selection.
    Select,
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
        QueryProfileKind::Compile => (&counters.compile_ns, &counters.compile_count),
        QueryProfileKind::Execute => (&counters.execute_ns, &counters.execute_count),
        QueryProfileKind::Hierarchy => (&counters.hierarchy_ns, &counters.hierarchy_count),
        QueryProfileKind::Select => (&counters.select_ns, &counters.select_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current query profiling metrics.
///
/// With `reset` set, all counters are zeroed after reading them. Returns
/// `None` unless the `SOMBRA_ASK_PROFILE` environment variable is set.
///
/// # Example
///
/// ```no_run
/// use sombra_ask::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("hierarchy closures: {}", snapshot.hierarchy_count);
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
        compile_ns: load(&counters.compile_ns),
        compile_count: load(&counters.compile_count),
        execute_ns: load(&counters.execute_ns),
        execute_count: load(&counters.execute_count),
        hierarchy_ns: load(&counters.hierarchy_ns),
        hierarchy_count: load(&counters.hierarchy_count),
        select_ns: load(&counters.select_ns),
        select_count: load(&counters.select_count),
    })
}
