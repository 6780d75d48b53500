//! Pool metrics recorded through the `metrics` facade
//!
//! - `handler_pool_generations_created_total` (counter)
//! - `handler_pool_creation_failures_total` (counter)
//! - `handler_pool_handlers_disposed_total` (counter)
//! - `handler_pool_disposal_errors_total` (counter)
//! - `handler_pool_in_flight` (gauge): borrows currently held across all generations
//!
//! Without an installed recorder every call is a no-op.

pub(crate) fn record_generation_created() {
    metrics::counter!("handler_pool_generations_created_total").increment(1);
}

pub(crate) fn record_creation_failure() {
    metrics::counter!("handler_pool_creation_failures_total").increment(1);
}

pub(crate) fn record_disposed() {
    metrics::counter!("handler_pool_handlers_disposed_total").increment(1);
}

pub(crate) fn record_disposal_error() {
    metrics::counter!("handler_pool_disposal_errors_total").increment(1);
}

pub(crate) fn borrow_started() {
    metrics::gauge!("handler_pool_in_flight").increment(1.0);
}

pub(crate) fn borrow_finished() {
    metrics::gauge!("handler_pool_in_flight").decrement(1.0);
}
