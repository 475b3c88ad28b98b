//! Per-queue state: bootstrap on first observation, teardown at device
//! destruction.
//!
//! A queue is observed when the application first retrieves it. If its
//! family reports valid timestamp bits the queue gets a query pool, a
//! transient command pool, the three handshake events, and a harvester
//! thread; otherwise it is recorded but never instrumented.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use ash::vk;

use crate::layer::dispatch::DeviceTable;
use crate::layer::{self, Context, DeviceRecord};
use crate::timing::{sync, worker, Submission, MAX_QUERIES};
use crate::{clock, config};

/// Fields mutated after bootstrap, all guarded by one mutex.
pub(crate) struct QueueShared {
    /// Cursor into the query-slot ring.
    pub next_slot: u32,
    /// In-flight submissions, oldest first. The wrapper pushes, the
    /// worker pops the front; nobody else touches it.
    pub pending: VecDeque<Submission>,
    /// True between issuing a sync submission and its completion.
    pub syncing: bool,
    /// Terminates the worker.
    pub exiting: bool,
    /// Boot-clock nanoseconds of the most recent sync attempt.
    pub last_sync: i64,
    /// Signed offset such that `host_ns ≈ drift + ticks * ts_period`.
    /// Written only by the worker.
    pub drift: i64,
}

/// Everything the layer knows about one queue.
///
/// Fields outside [`QueueShared`] are set at bootstrap and read-only
/// afterwards.
pub struct QueueState {
    pub queue: vk::Queue,
    pub device: vk::Device,
    pub family_index: u32,
    pub queue_index: u32,
    pub supports_timestamps: bool,
    /// Nanoseconds per device tick.
    pub ts_period: f32,
    pub table: DeviceTable,

    pub query_pool: vk::QueryPool,
    pub command_pool: vk::CommandPool,
    /// Set by the worker to release the GPU out of its handshake wait.
    pub gpu_wait: vk::Event,
    /// Set by the GPU when the sync command buffer starts executing.
    pub cpu_wait: vk::Event,
    /// Set by the GPU just before it writes the sync timestamp.
    pub cpu2_wait: vk::Event,

    pub(crate) shared: Mutex<QueueShared>,
    pub(crate) ticket: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueState {
    fn new(
        queue: vk::Queue,
        device: vk::Device,
        family_index: u32,
        queue_index: u32,
        ts_period: f32,
        table: DeviceTable,
    ) -> Self {
        Self {
            queue,
            device,
            family_index,
            queue_index,
            supports_timestamps: false,
            ts_period,
            table,
            query_pool: vk::QueryPool::null(),
            command_pool: vk::CommandPool::null(),
            gpu_wait: vk::Event::null(),
            cpu_wait: vk::Event::null(),
            cpu2_wait: vk::Event::null(),
            shared: Mutex::new(QueueShared {
                next_slot: 0,
                pending: VecDeque::new(),
                syncing: false,
                exiting: false,
                last_sync: 0,
                drift: 0,
            }),
            ticket: Condvar::new(),
            worker: Mutex::new(None),
        }
    }

    /// `(family_index << 16) | queue_index`, the packed id events carry.
    pub fn packed_queue_idx(&self) -> u32 {
        (self.family_index << 16) | self.queue_index
    }

    /// Stop the worker and reclaim every GPU and host resource. Pending
    /// records the worker never reached have their fences destroyed and
    /// helper buffers freed here.
    pub fn shutdown(&self) {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.exiting {
                return;
            }
            shared.exiting = true;
        }
        self.ticket.notify_one();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let leftovers: Vec<Submission> = {
            let mut shared = self.shared.lock().unwrap();
            shared.pending.drain(..).collect()
        };
        let table = &self.table;
        unsafe {
            for submission in leftovers {
                match submission {
                    Submission::TimingPair {
                        fence,
                        prefix,
                        suffix,
                        ..
                    } => {
                        let buffers = [prefix, suffix];
                        (table.free_command_buffers)(
                            self.device,
                            self.command_pool,
                            2,
                            buffers.as_ptr(),
                        );
                        (table.destroy_fence)(self.device, fence, std::ptr::null());
                    }
                    Submission::SyncSample { fence, cmd, .. } => {
                        (table.free_command_buffers)(self.device, self.command_pool, 1, &cmd);
                        (table.destroy_fence)(self.device, fence, std::ptr::null());
                    }
                }
            }

            for event in [self.gpu_wait, self.cpu_wait, self.cpu2_wait] {
                if event != vk::Event::null() {
                    (table.destroy_event)(self.device, event, std::ptr::null());
                }
            }
            if self.command_pool != vk::CommandPool::null() {
                (table.destroy_command_pool)(self.device, self.command_pool, std::ptr::null());
            }
            if self.query_pool != vk::QueryPool::null() {
                (table.destroy_query_pool)(self.device, self.query_pool, std::ptr::null());
            }
        }
    }
}

/// Intercepted `vkGetDeviceQueue`: forward, then bootstrap timing state
/// on first sight of the handle.
///
/// # Safety
/// Called by the loader with loader-validated arguments.
pub unsafe extern "system" fn get_device_queue(
    device: vk::Device,
    queue_family_index: u32,
    queue_index: u32,
    p_queue: *mut vk::Queue,
) {
    let ctx = layer::global();
    let Some(record) = ctx.with_device(device, |record| *record) else {
        log::error!("vkGetDeviceQueue on unregistered device");
        return;
    };
    (record.table.get_device_queue)(device, queue_family_index, queue_index, p_queue);
    if p_queue.is_null() {
        return;
    }
    let queue = *p_queue;
    if queue == vk::Queue::null() || ctx.contains_queue(queue) {
        return;
    }
    observe_queue(ctx, &record, device, queue_family_index, queue_index, queue);
}

unsafe fn observe_queue(
    ctx: &Context,
    record: &DeviceRecord,
    device: vk::Device,
    family_index: u32,
    queue_index: u32,
    queue: vk::Queue,
) {
    let Some(instance_table) =
        ctx.with_instance(record.instance, |instance| instance.table)
    else {
        log::error!("device's instance is no longer registered");
        return;
    };

    // 1. Family sanity and timestamp support.
    let mut family_count = 0u32;
    (instance_table.get_physical_device_queue_family_properties)(
        record.physical_device,
        &mut family_count,
        std::ptr::null_mut(),
    );
    if family_index >= family_count {
        log::error!(
            "queue family {} out of range ({} families)",
            family_index,
            family_count
        );
        return;
    }
    let mut families = vec![vk::QueueFamilyProperties::default(); family_count as usize];
    (instance_table.get_physical_device_queue_family_properties)(
        record.physical_device,
        &mut family_count,
        families.as_mut_ptr(),
    );
    let supports_timestamps = families[family_index as usize].timestamp_valid_bits > 0;

    let mut properties = vk::PhysicalDeviceProperties::default();
    (instance_table.get_physical_device_properties)(record.physical_device, &mut properties);
    let ts_period = properties.limits.timestamp_period;

    let mut state = QueueState::new(
        queue,
        device,
        family_index,
        queue_index,
        ts_period,
        record.table,
    );

    if !supports_timestamps || config::get().disabled {
        // Observed but never instrumented; no events will be emitted.
        log::info!(
            "queue {}.{}: timestamps unsupported or disabled, observe only",
            family_index,
            queue_index
        );
        ctx.insert_queue(queue, Arc::new(state));
        return;
    }

    log::info!(
        "queue {}.{}: ts_period {} ns/tick",
        family_index,
        queue_index,
        ts_period
    );

    // 2. GPU objects: query-slot ring, transient command pool, handshake
    // events (created reset).
    let table = &record.table;
    let pool_info = vk::QueryPoolCreateInfo::default()
        .query_type(vk::QueryType::TIMESTAMP)
        .query_count(MAX_QUERIES);
    let mut query_pool = vk::QueryPool::null();
    let mut result =
        (table.create_query_pool)(device, &pool_info, std::ptr::null(), &mut query_pool);

    let mut command_pool = vk::CommandPool::null();
    if result == vk::Result::SUCCESS {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(family_index);
        result = (table.create_command_pool)(
            device,
            &pool_info,
            std::ptr::null(),
            &mut command_pool,
        );
    }

    let mut events = [vk::Event::null(); 3];
    if result == vk::Result::SUCCESS {
        let event_info = vk::EventCreateInfo::default();
        for event in events.iter_mut() {
            result = (table.create_event)(device, &event_info, std::ptr::null(), event);
            if result != vk::Result::SUCCESS {
                break;
            }
            let _ = (table.reset_event)(device, *event);
        }
    }

    if result != vk::Result::SUCCESS {
        log::error!(
            "queue {}.{}: timing setup failed ({:?}), observe only",
            family_index,
            queue_index,
            result
        );
        for event in events {
            if event != vk::Event::null() {
                (table.destroy_event)(device, event, std::ptr::null());
            }
        }
        if command_pool != vk::CommandPool::null() {
            (table.destroy_command_pool)(device, command_pool, std::ptr::null());
        }
        if query_pool != vk::QueryPool::null() {
            (table.destroy_query_pool)(device, query_pool, std::ptr::null());
        }
        ctx.insert_queue(queue, Arc::new(state));
        return;
    }

    state.supports_timestamps = true;
    state.query_pool = query_pool;
    state.command_pool = command_pool;
    state.gpu_wait = events[0];
    state.cpu_wait = events[1];
    state.cpu2_wait = events[2];
    state.shared.get_mut().unwrap().last_sync = clock::boottime_ns();

    // 3. Harvester worker, then the first clock sync.
    let state = Arc::new(state);
    let worker_state = Arc::clone(&state);
    let handle = std::thread::Builder::new()
        .name(format!("vk-timing {}.{}", family_index, queue_index))
        .spawn(move || worker::run(worker_state));
    match handle {
        Ok(handle) => *state.worker.lock().unwrap() = Some(handle),
        Err(err) => {
            log::error!("queue worker spawn failed: {}, observe only", err);
            state.shutdown();
            ctx.insert_queue(
                queue,
                Arc::new(QueueState::new(
                    queue,
                    device,
                    family_index,
                    queue_index,
                    ts_period,
                    record.table,
                )),
            );
            return;
        }
    }

    let registered = ctx.insert_queue(queue, Arc::clone(&state));
    if !Arc::ptr_eq(&registered, &state) {
        // Another thread observed this queue first; ours never went live.
        state.shutdown();
        return;
    }
    sync::send_sync(&state);
}

/// Label emitted with each timing pair.
pub(crate) fn command_buffer_label(user: vk::CommandBuffer) -> std::ffi::CString {
    use ash::vk::Handle;
    std::ffi::CString::new(format!("CommandBuffer:{:X}", user.as_raw())).unwrap_or_default()
}
