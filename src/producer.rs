//! Event sink boundary.
//!
//! The trace daemon side of the world is reached through a single C-ABI
//! function. Discovery and loading of the real producer library happen
//! outside this crate; whoever loads it installs the function pointer
//! here. With no sink installed the layer keeps running and counts what
//! it would have sent.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

use ash::vk::{self, Handle};

/// `send_event(pid, queue_id, queue_idx, start_ts, end_ts, label)`.
///
/// `queue_idx` packs `(family_index << 16) | queue_index`; timestamps are
/// boot-clock nanoseconds. The label is NUL-terminated and owned by the
/// caller for the duration of the call; the sink copies what it keeps.
pub type SendEventFn = unsafe extern "C" fn(
    pid: u32,
    queue_id: u64,
    queue_idx: u32,
    start_ts: i64,
    end_ts: i64,
    label: *const c_char,
);

static SINK: RwLock<Option<SendEventFn>> = RwLock::new(None);
static DROPPED: AtomicU64 = AtomicU64::new(0);

/// Install the producer sink. Replaces any previous sink.
pub fn install_sink(sink: SendEventFn) {
    *SINK.write().unwrap() = Some(sink);
}

/// Events dropped because no sink was installed.
pub fn dropped_events() -> u64 {
    DROPPED.load(Ordering::Relaxed)
}

fn pid() -> u32 {
    static PID: OnceLock<u32> = OnceLock::new();
    *PID.get_or_init(std::process::id)
}

/// Forward one timing event to the producer.
pub(crate) fn emit(queue: vk::Queue, queue_idx: u32, start_ns: i64, end_ns: i64, label: &CStr) {
    let sink = *SINK.read().unwrap();
    match sink {
        Some(send_event) => unsafe {
            send_event(
                pid(),
                queue.as_raw(),
                queue_idx,
                start_ns,
                end_ns,
                label.as_ptr(),
            );
        },
        None => {
            DROPPED.fetch_add(1, Ordering::Relaxed);
            log::trace!(
                "no producer sink installed, dropping event {:?} [{}..{}]",
                label,
                start_ns,
                end_ns
            );
        }
    }
}
