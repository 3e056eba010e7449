use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge, IntGaugeVec, Opts, Registry};

/// The registry a host gets if it has no pre-existing one of its own to
/// register into — mirrors how the teacher crate keeps a process-wide
/// default available for binaries that don't wire up their own
/// `prometheus::Registry`.
static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub fn default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}

/// Ambient observability for a running reader, gathered the way
/// `swarm::metrics` gathers a `prometheus::Registry` for the store: a small
/// set of counters/gauges registered once at construction and updated
/// in-line with the state machine, never read back by the core itself.
pub struct ReaderMetrics {
    pub delivered_total: IntCounter,
    pub buffer_depth: IntGaugeVec,
    /// `0` while in `IndexMode`, `1` after switching to `TfMode`.
    pub mode: IntGauge,
}

impl ReaderMetrics {
    /// `anyhow::Result` here, not a typed error, the same way
    /// `swarm::metrics::metrics` reaches for `anyhow` at a setup boundary
    /// that only ever needs to propagate `?`, not match on a variant.
    pub fn register(registry: &Registry) -> anyhow::Result<Self> {
        let delivered_total = IntCounter::new(
            "event_type_reader_delivered_total",
            "Total number of events delivered past the high-water mark",
        )?;
        let buffer_depth = IntGaugeVec::new(
            Opts::new(
                "event_type_reader_buffer_depth",
                "Number of pending events queued per type-index stream",
            ),
            &["stream"],
        )?;
        let mode = IntGauge::new(
            "event_type_reader_mode",
            "Current reader mode (0 = index, 1 = tf)",
        )?;

        registry.register(Box::new(delivered_total.clone()))?;
        registry.register(Box::new(buffer_depth.clone()))?;
        registry.register(Box::new(mode.clone()))?;

        Ok(Self {
            delivered_total,
            buffer_depth,
            mode,
        })
    }
}
