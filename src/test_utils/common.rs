use crate::child_path;
use crate::InMemoryCoordinator;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Creates `base` (with ancestors) and one child per `(name, rack)` pair.
pub(crate) fn seed_children(
    coordinator: &InMemoryCoordinator,
    base: &str,
    children: &[(&str, &str)],
) {
    coordinator.ensure_path(base).unwrap();
    for (name, rack) in children {
        coordinator.create(&child_path(base, name), *rack).unwrap();
    }
}
