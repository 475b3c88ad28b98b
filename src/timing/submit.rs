//! The intercepted `vkQueueSubmit`.
//!
//! Each user command buffer is resubmitted as a three-buffer batch —
//! prefix timestamp, user buffer, suffix timestamp — with a private
//! fence, and a pending record is queued for the harvester. Semaphores
//! stay where the application put them: waits on the first wrapped batch
//! of a submit info, signals on the last.

use ash::vk;

use crate::error::LayerError;
use crate::layer::{self, dispatch};
use crate::timing::queue::QueueState;
use crate::timing::{self, sync, Submission};
use crate::{clock, config};

/// Intercepted `vkQueueSubmit`.
///
/// # Safety
/// Called by the loader with loader-validated arguments; `p_submits`
/// must point to `submit_count` submit infos.
pub unsafe extern "system" fn queue_submit(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo,
    fence: vk::Fence,
) -> vk::Result {
    let Some(state) = layer::global().queue(queue) else {
        // A queue we never saw retrieved; nothing to forward through.
        log::error!("vkQueueSubmit on unobserved queue");
        return LayerError::UnknownHandle("queue").as_vk();
    };
    let table = &state.table;

    if submit_count == 0 || !state.supports_timestamps {
        return (table.queue_submit)(queue, submit_count, p_submits, fence);
    }

    // Drift goes stale on an idle queue; bound it before new work lands.
    let needs_sync = {
        let shared = state.shared.lock().unwrap();
        !shared.syncing
            && clock::boottime_ns() - shared.last_sync > config::get().sync_interval_ns()
    };
    if needs_sync {
        sync::send_sync(&state);
    }

    let submits = std::slice::from_raw_parts(p_submits, submit_count as usize);
    for submit_info in submits {
        if submit_info.command_buffer_count == 0 {
            // Semaphore-only info: forward the original array untouched,
            // fenceless, and keep going.
            let result = (table.queue_submit)(queue, submit_count, p_submits, vk::Fence::null());
            if result != vk::Result::SUCCESS {
                return result;
            }
            continue;
        }

        let users = std::slice::from_raw_parts(
            submit_info.p_command_buffers,
            submit_info.command_buffer_count as usize,
        );
        let last = users.len() - 1;
        for (j, &user) in users.iter().enumerate() {
            let (prefix, suffix, slot) = match record_timing_pair(&state) {
                Ok(recorded) => recorded,
                Err(result) => return result,
            };

            let wrapped = [prefix, user, suffix];
            let mut info = vk::SubmitInfo::default();
            info.command_buffer_count = wrapped.len() as u32;
            info.p_command_buffers = wrapped.as_ptr();
            if j == 0 {
                info.p_next = submit_info.p_next;
                info.wait_semaphore_count = submit_info.wait_semaphore_count;
                info.p_wait_semaphores = submit_info.p_wait_semaphores;
                info.p_wait_dst_stage_mask = submit_info.p_wait_dst_stage_mask;
            }
            if j == last {
                info.signal_semaphore_count = submit_info.signal_semaphore_count;
                info.p_signal_semaphores = submit_info.p_signal_semaphores;
            }

            let mut pair_fence = vk::Fence::null();
            let fence_info = vk::FenceCreateInfo::default();
            let result =
                (table.create_fence)(state.device, &fence_info, std::ptr::null(), &mut pair_fence);
            if result != vk::Result::SUCCESS {
                free_pair(&state, prefix, suffix);
                return result;
            }

            let result = (table.queue_submit)(queue, 1, &info, pair_fence);
            if result != vk::Result::SUCCESS {
                // Records already queued stay valid; this pair never ran.
                free_pair(&state, prefix, suffix);
                (table.destroy_fence)(state.device, pair_fence, std::ptr::null());
                return result;
            }

            {
                let mut shared = state.shared.lock().unwrap();
                shared.pending.push_back(Submission::TimingPair {
                    fence: pair_fence,
                    slot,
                    prefix,
                    suffix,
                    user,
                });
            }
            state.ticket.notify_one();
        }
    }

    if fence != vk::Fence::null() {
        // The application's fence rides an empty submit of its own, so it
        // signals only after every wrapped batch above has retired.
        return (table.queue_submit)(queue, 0, std::ptr::null(), fence);
    }
    vk::Result::SUCCESS
}

/// Allocate and record the prefix/suffix timestamp buffers and claim a
/// slot pair. Runs under the queue lock: the ring cursor and the
/// transient command pool are both worker-contended.
unsafe fn record_timing_pair(
    state: &QueueState,
) -> Result<(vk::CommandBuffer, vk::CommandBuffer, u32), vk::Result> {
    let table = &state.table;
    let mut shared = state.shared.lock().unwrap();

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(state.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(2);
    let mut buffers = [vk::CommandBuffer::null(); 2];
    let result =
        (table.allocate_command_buffers)(state.device, &alloc_info, buffers.as_mut_ptr());
    if result != vk::Result::SUCCESS {
        return Err(result);
    }
    let [prefix, suffix] = buffers;
    dispatch::set_dispatch_from_parent(prefix, state.device);
    dispatch::set_dispatch_from_parent(suffix, state.device);

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    for &buffer in &buffers {
        let result = (table.begin_command_buffer)(buffer, &begin_info);
        if result != vk::Result::SUCCESS {
            (table.free_command_buffers)(state.device, state.command_pool, 2, buffers.as_ptr());
            return Err(result);
        }
    }

    let slot = timing::claim_pair_slots(&mut shared.next_slot);
    (table.cmd_reset_query_pool)(prefix, state.query_pool, slot, 2);
    (table.cmd_write_timestamp)(
        prefix,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        state.query_pool,
        slot,
    );
    (table.cmd_write_timestamp)(
        suffix,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        state.query_pool,
        slot + 1,
    );

    for &buffer in &buffers {
        let result = (table.end_command_buffer)(buffer);
        if result != vk::Result::SUCCESS {
            (table.free_command_buffers)(state.device, state.command_pool, 2, buffers.as_ptr());
            return Err(result);
        }
    }
    Ok((prefix, suffix, slot))
}

unsafe fn free_pair(state: &QueueState, prefix: vk::CommandBuffer, suffix: vk::CommandBuffer) {
    let _shared = state.shared.lock().unwrap();
    let buffers = [prefix, suffix];
    (state.table.free_command_buffers)(
        state.device,
        state.command_pool,
        2,
        buffers.as_ptr(),
    );
}
