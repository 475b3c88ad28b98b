//! # vk-timing
//!
//! A Vulkan layer that measures GPU execution time of every command buffer
//! submitted to every queue, and forwards the resulting intervals to an
//! external trace producer on the host clock timeline.
//!
//! ## Architecture
//! - **Layer glue** ([`layer`]): loader entry points, dispatch-chain
//!   resolution, and the process-wide registry of instances, physical
//!   devices, devices, and queues.
//! - **Timing core** ([`timing`]): per-queue state machine — a ring of
//!   timestamp query slots, a submission wrapper that brackets user work
//!   with timestamp command buffers, a periodic CPU/GPU clock sync, and a
//!   harvester thread per queue that reads results and emits events.
//! - **Producer boundary** ([`producer`]): the `send_event` sink the trace
//!   daemon side installs; everything upstream of it is this crate.
//!
//! The layer talks to the next element of the dispatch chain through
//! resolved `vk::PFN_*` function pointers. It never owns the instance or
//! device; it observes, wraps submissions, and must never take the
//! application down with it.

pub mod clock;
pub mod config;
pub mod error;
pub mod layer;
pub mod producer;
pub mod timing;

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// A layer has no `main`, so logging is initialized on the first
/// `vkCreateInstance` that reaches us. Losing the race to another logger
/// in the host process is fine.
pub(crate) fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = env_logger::Builder::from_default_env().try_init();
    });
}
