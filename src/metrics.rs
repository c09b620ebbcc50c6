#[cfg(feature = "metrics")]
mod imp {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    // Shared queue (cumulative counts)
    static RECORDS_PUSHED: AtomicU64 = AtomicU64::new(0);
    static PUSH_REJECTED: AtomicU64 = AtomicU64::new(0);
    static DIRECT_DELIVERIES: AtomicU64 = AtomicU64::new(0);
    // Completion routing
    static DRAINS: AtomicU64 = AtomicU64::new(0);
    static DRAINED_RECORDS: AtomicU64 = AtomicU64::new(0);
    static COMPLETIONS: AtomicU64 = AtomicU64::new(0);
    // Dispatch
    static SYNC_CALLS: AtomicU64 = AtomicU64::new(0);
    static ASYNC_CALLS: AtomicU64 = AtomicU64::new(0);
    // Gauges
    static OUTSTANDING: AtomicUsize = AtomicUsize::new(0);
    static MAX_OUTSTANDING: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, Copy)]
    pub struct MetricsSnapshot {
        pub records_pushed: u64,
        pub push_rejected: u64,
        pub direct_deliveries: u64,
        pub drains: u64,
        pub drained_records: u64,
        pub completions: u64,
        pub sync_calls: u64,
        pub async_calls: u64,
        pub outstanding: usize,
        pub max_outstanding: usize,
    }

    pub fn inc_records_pushed() {
        RECORDS_PUSHED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_push_rejected() {
        PUSH_REJECTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_direct_deliveries() {
        DIRECT_DELIVERIES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_drains(records: usize) {
        DRAINS.fetch_add(1, Ordering::Relaxed);
        DRAINED_RECORDS.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn inc_completions() {
        COMPLETIONS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sync_calls() {
        SYNC_CALLS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_async_calls() {
        ASYNC_CALLS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_outstanding(value: usize) {
        OUTSTANDING.store(value, Ordering::Relaxed);
        update_max(&MAX_OUTSTANDING, value);
    }

    fn update_max(target: &AtomicUsize, value: usize) {
        let mut prev = target.load(Ordering::Relaxed);
        while value > prev {
            match target.compare_exchange_weak(prev, value, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(next) => prev = next,
            }
        }
    }

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            records_pushed: RECORDS_PUSHED.load(Ordering::Relaxed),
            push_rejected: PUSH_REJECTED.load(Ordering::Relaxed),
            direct_deliveries: DIRECT_DELIVERIES.load(Ordering::Relaxed),
            drains: DRAINS.load(Ordering::Relaxed),
            drained_records: DRAINED_RECORDS.load(Ordering::Relaxed),
            completions: COMPLETIONS.load(Ordering::Relaxed),
            sync_calls: SYNC_CALLS.load(Ordering::Relaxed),
            async_calls: ASYNC_CALLS.load(Ordering::Relaxed),
            outstanding: OUTSTANDING.load(Ordering::Relaxed),
            max_outstanding: MAX_OUTSTANDING.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot() {
        let snap = snapshot();
        let avg_drain = if snap.drains > 0 {
            snap.drained_records as f64 / snap.drains as f64
        } else {
            0.0
        };
        tracing::info!(
            pushed = snap.records_pushed,
            rejected = snap.push_rejected,
            direct = snap.direct_deliveries,
            drains = snap.drains,
            avg_drain = (avg_drain * 10.0).round() / 10.0,
            completions = snap.completions,
            sync_calls = snap.sync_calls,
            async_calls = snap.async_calls,
            outstanding = snap.outstanding,
            max_outstanding = snap.max_outstanding,
            "bridge metrics"
        );
    }
}

#[cfg(not(feature = "metrics"))]
#[allow(dead_code)]
mod imp {
    #[derive(Debug, Clone, Copy)]
    pub struct MetricsSnapshot {
        pub records_pushed: u64,
        pub push_rejected: u64,
        pub direct_deliveries: u64,
        pub drains: u64,
        pub drained_records: u64,
        pub completions: u64,
        pub sync_calls: u64,
        pub async_calls: u64,
        pub outstanding: usize,
        pub max_outstanding: usize,
    }

    pub fn inc_records_pushed() {}
    pub fn inc_push_rejected() {}
    pub fn inc_direct_deliveries() {}
    pub fn inc_drains(_: usize) {}
    pub fn inc_completions() {}
    pub fn inc_sync_calls() {}
    pub fn inc_async_calls() {}
    pub fn update_outstanding(_: usize) {}
    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            records_pushed: 0,
            push_rejected: 0,
            direct_deliveries: 0,
            drains: 0,
            drained_records: 0,
            completions: 0,
            sync_calls: 0,
            async_calls: 0,
            outstanding: 0,
            max_outstanding: 0,
        }
    }
    pub fn log_snapshot() {}
}

pub use imp::*;
