use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static PROJECTS_CREATED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("projects_created_total", "Total projects created").unwrap());

pub static QUEUES_CREATED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("queues_created_total", "Total queues created").unwrap());

pub static MESSAGES_ENQUEUED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("messages_enqueued_total", "Total messages enqueued").unwrap());

pub static MESSAGES_LEASED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("messages_leased_total", "Total messages leased").unwrap());

pub static MESSAGES_DELETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("messages_deleted_total", "Total messages acknowledged and deleted").unwrap()
});

/// Approximate: grows on lease and shrinks on acknowledgement, but a
/// lease that lapses on its own is not subtracted until the message is
/// leased again.
pub static MESSAGES_LEASED_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "messages_leased_inflight",
        "Approximate number of messages currently under lease",
    )
    .unwrap()
});

/// Registration happens once per process; repeat calls (test binaries
/// share the registry) are no-ops.
pub fn init_metrics() {
    let collectors: [Box<dyn Collector>; 6] = [
        Box::new(PROJECTS_CREATED.clone()),
        Box::new(QUEUES_CREATED.clone()),
        Box::new(MESSAGES_ENQUEUED.clone()),
        Box::new(MESSAGES_LEASED.clone()),
        Box::new(MESSAGES_DELETED.clone()),
        Box::new(MESSAGES_LEASED_INFLIGHT.clone()),
    ];
    for collector in collectors {
        let _ = REGISTRY.register(collector);
    }
}

pub fn gather() -> String {
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buf)
        .expect("encode metrics");
    String::from_utf8(buf).expect("metrics text is utf-8")
}
