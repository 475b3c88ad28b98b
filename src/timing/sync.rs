//! Clock re-synchronization.
//!
//! The GPU timestamp counter and the host boot clock tick independently.
//! A sync sample pins one device timestamp to a host timestamp using a
//! three-event handshake: the GPU announces it is running (`cpu_wait`),
//! stalls on the host (`gpu_wait`), announces it is about to sample
//! (`cpu2_wait`), then writes the timestamp. The harvester drives the
//! host half and computes the drift; see [`crate::timing::worker`].

use ash::vk;

use crate::clock;
use crate::layer::dispatch;
use crate::timing::queue::QueueState;
use crate::timing::{self, Submission};

/// Record and submit one sync sample, then mark the queue as syncing.
/// At most one sample is in flight per queue; callers hold that off via
/// the `syncing` flag.
pub(crate) fn send_sync(state: &QueueState) {
    let table = &state.table;
    let device = state.device;

    // GPU half of the handshake, one one-shot command buffer.
    let (cmd, slot) = {
        let mut shared = state.shared.lock().unwrap();

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(state.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let mut cmd = vk::CommandBuffer::null();
        let result =
            unsafe { (table.allocate_command_buffers)(device, &alloc_info, &mut cmd) };
        if result != vk::Result::SUCCESS {
            log::warn!("sync command buffer allocation failed: {:?}", result);
            shared.last_sync = clock::boottime_ns();
            return;
        }

        unsafe {
            dispatch::set_dispatch_from_parent(cmd, device);
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            let _ = (table.begin_command_buffer)(cmd, &begin_info);

            let slot = timing::claim_sync_slot(&mut shared.next_slot);
            (table.cmd_reset_query_pool)(cmd, state.query_pool, slot, 1);
            (table.cmd_set_event)(cmd, state.cpu_wait, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
            (table.cmd_wait_events)(
                cmd,
                1,
                &state.gpu_wait,
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::ALL_GRAPHICS,
                0,
                std::ptr::null(),
                0,
                std::ptr::null(),
                0,
                std::ptr::null(),
            );
            (table.cmd_set_event)(cmd, state.cpu2_wait, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
            (table.cmd_write_timestamp)(
                cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                state.query_pool,
                slot,
            );
            let result = (table.end_command_buffer)(cmd);
            if result != vk::Result::SUCCESS {
                log::warn!("sync command buffer recording failed: {:?}", result);
                (table.free_command_buffers)(device, state.command_pool, 1, &cmd);
                shared.last_sync = clock::boottime_ns();
                return;
            }
            (cmd, slot)
        }
    };

    let mut fence = vk::Fence::null();
    let fence_info = vk::FenceCreateInfo::default();
    let result = unsafe { (table.create_fence)(device, &fence_info, std::ptr::null(), &mut fence) };
    if result == vk::Result::SUCCESS {
        let mut submit_info = vk::SubmitInfo::default();
        submit_info.command_buffer_count = 1;
        submit_info.p_command_buffers = &cmd;
        let result = unsafe { (table.queue_submit)(state.queue, 1, &submit_info, fence) };
        if result == vk::Result::SUCCESS {
            let mut shared = state.shared.lock().unwrap();
            shared.last_sync = clock::boottime_ns();
            shared.syncing = true;
            shared.pending.push_back(Submission::SyncSample { fence, slot, cmd });
            drop(shared);
            state.ticket.notify_one();
            return;
        }
        log::warn!("sync submission failed: {:?}", result);
        unsafe { (table.destroy_fence)(device, fence, std::ptr::null()) };
    } else {
        log::warn!("sync fence creation failed: {:?}", result);
    }

    // Failed to launch; reclaim and retry no sooner than next interval.
    let mut shared = state.shared.lock().unwrap();
    unsafe { (table.free_command_buffers)(device, state.command_pool, 1, &cmd) };
    shared.last_sync = clock::boottime_ns();
}
