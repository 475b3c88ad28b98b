//! Per-queue GPU timing orchestration.
//!
//! Every instrumented queue owns a ring of timestamp query slots, a
//! transient command pool, a deque of in-flight submissions, and a
//! harvester thread. The submission wrapper ([`submit`]) brackets user
//! command buffers with timestamp writes, the sync protocol ([`sync`])
//! periodically measures the device-tick to host-clock drift, and the
//! worker ([`worker`]) turns retired query results into trace events.

pub mod queue;
pub mod submit;
pub mod sync;
pub mod worker;

use ash::vk;

/// Timestamp slots per queue. Bounds the number of simultaneously
/// in-flight submissions on one queue.
pub const MAX_QUERIES: u32 = 4096;

/// An enqueued unit of work awaiting harvest.
pub(crate) enum Submission {
    /// A wrapped user command buffer: two query slots, two helper command
    /// buffers, and the fence that retires them.
    TimingPair {
        fence: vk::Fence,
        slot: u32,
        prefix: vk::CommandBuffer,
        suffix: vk::CommandBuffer,
        user: vk::CommandBuffer,
    },
    /// A clock-sync sample: one query slot, one command buffer running
    /// the three-event handshake.
    SyncSample {
        fence: vk::Fence,
        slot: u32,
        cmd: vk::CommandBuffer,
    },
}

/// Claim two consecutive slots for a timing pair. A pair must never
/// straddle the ring end, so a cursor on the last slot restarts at zero
/// and the tail slot sits out until the next cycle.
pub(crate) fn claim_pair_slots(next_slot: &mut u32) -> u32 {
    let mut slot = *next_slot;
    if slot >= MAX_QUERIES - 1 {
        slot = 0;
    }
    *next_slot = (slot + 2) % MAX_QUERIES;
    slot
}

/// Claim a single slot for a sync sample.
pub(crate) fn claim_sync_slot(next_slot: &mut u32) -> u32 {
    let slot = *next_slot;
    *next_slot = (slot + 1) % MAX_QUERIES;
    slot
}

/// Convert a raw device tick count to boot-clock nanoseconds using the
/// drift measured by the most recent sync sample.
pub fn ticks_to_host_ns(drift: i64, ts_period: f32, ticks: u64) -> i64 {
    drift + (ticks as f64 * ts_period as f64).round() as i64
}

/// Inverse of [`ticks_to_host_ns`], exact up to the rounding of one
/// `ts_period`.
pub fn host_ns_to_ticks(drift: i64, ts_period: f32, host_ns: i64) -> u64 {
    (((host_ns - drift) as f64) / ts_period as f64).round() as u64
}
