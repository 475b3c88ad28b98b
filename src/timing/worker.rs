//! The per-queue harvester.
//!
//! One thread per instrumented queue. It sleeps on the ticket condvar,
//! pops pending submissions in FIFO order, waits for their fences, reads
//! the query results, and either completes a sync sample (updating the
//! drift) or emits a timing event. Errors are logged and the record is
//! dropped; only `exiting` ends the loop.

use std::ffi::c_void;
use std::sync::Arc;

use ash::vk;

use crate::timing::queue::{command_buffer_label, QueueState};
use crate::timing::{self, Submission};
use crate::{clock, producer};

pub(crate) fn run(state: Arc<QueueState>) {
    loop {
        let submission = {
            let mut shared = state.shared.lock().unwrap();
            loop {
                if shared.exiting {
                    return;
                }
                if let Some(submission) = shared.pending.pop_front() {
                    break submission;
                }
                shared = state.ticket.wait(shared).unwrap();
            }
        };

        // Handles popped off `pending` are exclusively ours now.
        unsafe {
            match submission {
                Submission::SyncSample { fence, slot, cmd } => {
                    complete_sync(&state, fence, slot, cmd)
                }
                Submission::TimingPair {
                    fence,
                    slot,
                    prefix,
                    suffix,
                    user,
                } => harvest_pair(&state, fence, slot, prefix, suffix, user),
            }
        }
    }
}

/// Busy-poll a GPU event. The expected wait is microseconds, so spinning
/// beats any blocking primitive the API doesn't offer anyway. A stall is
/// loud in the log but never fatal; an error status ends the poll.
unsafe fn poll_event(state: &QueueState, event: vk::Event, which: &str) {
    let mut spins: u64 = 0;
    loop {
        let status = (state.table.get_event_status)(state.device, event);
        if status != vk::Result::EVENT_RESET {
            if status != vk::Result::EVENT_SET {
                log::warn!("polling {} returned {:?}", which, status);
            }
            return;
        }
        spins += 1;
        if spins % (1 << 24) == 0 {
            log::warn!("still waiting on {} after {} polls", which, spins);
        }
        std::hint::spin_loop();
    }
}

/// Host half of the sync handshake (steps H1..H6).
unsafe fn complete_sync(state: &QueueState, fence: vk::Fence, slot: u32, cmd: vk::CommandBuffer) {
    let table = &state.table;
    let device = state.device;

    // The GPU is running our command buffer once cpu_wait goes up.
    poll_event(state, state.cpu_wait, "cpu_wait");
    let _ = (table.set_event)(device, state.gpu_wait);
    // cpu2_wait marks the moment the timestamp write is next; host time
    // taken right here is what the device timestamp gets pinned to.
    poll_event(state, state.cpu2_wait, "cpu2_wait");
    let after_ts = clock::boottime_ns();

    let _ = (table.wait_for_fences)(device, 1, &fence, vk::TRUE, u64::MAX);

    let mut device_time: u64 = 0;
    let result = (table.get_query_pool_results)(
        device,
        state.query_pool,
        slot,
        1,
        std::mem::size_of::<u64>(),
        &mut device_time as *mut u64 as *mut c_void,
        std::mem::size_of::<u64>() as vk::DeviceSize,
        vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
    );

    let mut synced = false;
    let mut drift = 0i64;
    if result == vk::Result::SUCCESS {
        let scaled = (device_time as f64 * state.ts_period as f64).round() as i64;
        drift = after_ts - scaled;
        synced = true;
        log::info!(
            "queue {}.{} drift: {} (device {} host {})",
            state.family_index,
            state.queue_index,
            drift,
            scaled,
            after_ts
        );
    } else {
        log::warn!("sync query read failed: {:?}", result);
    }

    let _ = (table.reset_event)(device, state.gpu_wait);
    let _ = (table.reset_event)(device, state.cpu_wait);
    let _ = (table.reset_event)(device, state.cpu2_wait);

    {
        let mut shared = state.shared.lock().unwrap();
        (table.free_command_buffers)(device, state.command_pool, 1, &cmd);
        shared.syncing = false;
        if synced {
            shared.drift = drift;
        }
    }
    (table.destroy_fence)(device, fence, std::ptr::null());
}

/// Retire one timing pair: wait, read, convert, emit, reclaim.
unsafe fn harvest_pair(
    state: &QueueState,
    fence: vk::Fence,
    slot: u32,
    prefix: vk::CommandBuffer,
    suffix: vk::CommandBuffer,
    user: vk::CommandBuffer,
) {
    let table = &state.table;
    let device = state.device;

    let _ = (table.wait_for_fences)(device, 1, &fence, vk::TRUE, u64::MAX);

    let mut ticks = [0u64; 2];
    let result = (table.get_query_pool_results)(
        device,
        state.query_pool,
        slot,
        2,
        std::mem::size_of_val(&ticks),
        ticks.as_mut_ptr() as *mut c_void,
        std::mem::size_of::<u64>() as vk::DeviceSize,
        vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
    );

    if result == vk::Result::SUCCESS {
        let drift = state.shared.lock().unwrap().drift;
        let start_ns = timing::ticks_to_host_ns(drift, state.ts_period, ticks[0]);
        let end_ns = timing::ticks_to_host_ns(drift, state.ts_period, ticks[1]);
        let label = command_buffer_label(user);
        producer::emit(
            state.queue,
            state.packed_queue_idx(),
            start_ns,
            end_ns,
            &label,
        );
    } else {
        // Disjoint or unavailable result; nothing usable to emit.
        log::warn!(
            "queue {}.{} slot {}: query read failed ({:?}), dropping record",
            state.family_index,
            state.queue_index,
            slot,
            result
        );
    }

    {
        let _shared = state.shared.lock().unwrap();
        let buffers = [prefix, suffix];
        (table.free_command_buffers)(device, state.command_pool, 2, buffers.as_ptr());
    }
    (table.destroy_fence)(device, fence, std::ptr::null());
}
