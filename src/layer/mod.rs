//! Process-wide layer state.
//!
//! Four handle-keyed stores: instances, physical devices, devices, and
//! queues. Each store has its own mutex; lookups either run a closure
//! under the lock or hand out an `Arc` clone (queues), so no caller ever
//! holds a reference into a map without its lock.

pub mod dispatch;
pub mod entry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use ash::vk;

use crate::error::LayerError;
use crate::timing::queue::QueueState;
use dispatch::{DeviceTable, InstanceTable};

/// Per-instance record: the downstream function table.
#[derive(Clone, Copy)]
pub struct InstanceRecord {
    pub table: InstanceTable,
}

/// A physical device only needs to know which instance surfaced it.
/// Non-owning back-reference, resolved through the registry on demand.
#[derive(Clone, Copy)]
pub struct PhysicalDeviceRecord {
    pub instance: vk::Instance,
}

/// Per-device record: the downstream table plus back-references up the
/// object hierarchy.
#[derive(Clone, Copy)]
pub struct DeviceRecord {
    pub table: DeviceTable,
    pub physical_device: vk::PhysicalDevice,
    pub instance: vk::Instance,
}

#[derive(Default)]
pub struct Context {
    instances: Mutex<HashMap<vk::Instance, InstanceRecord>>,
    physical_devices: Mutex<HashMap<vk::PhysicalDevice, PhysicalDeviceRecord>>,
    devices: Mutex<HashMap<vk::Device, DeviceRecord>>,
    queues: Mutex<HashMap<vk::Queue, Arc<QueueState>>>,
}

/// The global context. Allocated on first use, lives for the process.
pub fn global() -> &'static Context {
    static CONTEXT: OnceLock<Context> = OnceLock::new();
    CONTEXT.get_or_init(Context::default)
}

impl Context {
    /// Register a freshly created instance and enumerate its physical
    /// devices so later `vkCreateDevice` calls can find their way back.
    ///
    /// # Safety
    /// `instance` must be a live instance matching `record.table`.
    pub unsafe fn register_instance(
        &self,
        instance: vk::Instance,
        record: InstanceRecord,
    ) -> Result<(), LayerError> {
        {
            let mut instances = self.instances.lock().unwrap();
            if instances.contains_key(&instance) {
                return Err(LayerError::DuplicateHandle("instance"));
            }
            instances.insert(instance, record);
        }

        let mut count = 0u32;
        let _ = (record.table.enumerate_physical_devices)(instance, &mut count, std::ptr::null_mut());
        let mut handles = vec![vk::PhysicalDevice::null(); count as usize];
        let _ = (record.table.enumerate_physical_devices)(instance, &mut count, handles.as_mut_ptr());
        handles.truncate(count as usize);

        let mut physical_devices = self.physical_devices.lock().unwrap();
        for handle in handles {
            physical_devices.insert(handle, PhysicalDeviceRecord { instance });
        }
        Ok(())
    }

    /// Remove an instance and the physical-device records it surfaced.
    pub fn remove_instance(&self, instance: vk::Instance) -> Option<InstanceRecord> {
        let record = self.instances.lock().unwrap().remove(&instance);
        if record.is_some() {
            self.physical_devices
                .lock()
                .unwrap()
                .retain(|_, pd| pd.instance != instance);
        }
        record
    }

    pub fn with_instance<R>(
        &self,
        instance: vk::Instance,
        f: impl FnOnce(&InstanceRecord) -> R,
    ) -> Option<R> {
        let instances = self.instances.lock().unwrap();
        instances.get(&instance).map(f)
    }

    pub fn physical_device_instance(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Option<vk::Instance> {
        let physical_devices = self.physical_devices.lock().unwrap();
        physical_devices.get(&physical_device).map(|pd| pd.instance)
    }

    pub fn register_device(
        &self,
        device: vk::Device,
        record: DeviceRecord,
    ) -> Result<(), LayerError> {
        let mut devices = self.devices.lock().unwrap();
        if devices.contains_key(&device) {
            return Err(LayerError::DuplicateHandle("device"));
        }
        devices.insert(device, record);
        Ok(())
    }

    pub fn remove_device(&self, device: vk::Device) -> Option<DeviceRecord> {
        self.devices.lock().unwrap().remove(&device)
    }

    pub fn with_device<R>(
        &self,
        device: vk::Device,
        f: impl FnOnce(&DeviceRecord) -> R,
    ) -> Option<R> {
        let devices = self.devices.lock().unwrap();
        devices.get(&device).map(f)
    }

    /// Look up a queue's state. The `Arc` keeps the state alive past the
    /// map lock, which is all a wrapper call needs.
    pub fn queue(&self, queue: vk::Queue) -> Option<Arc<QueueState>> {
        self.queues.lock().unwrap().get(&queue).cloned()
    }

    /// Insert a queue observed for the first time, or return the existing
    /// state if another thread won the race.
    pub fn insert_queue(&self, queue: vk::Queue, state: Arc<QueueState>) -> Arc<QueueState> {
        self.queues
            .lock()
            .unwrap()
            .entry(queue)
            .or_insert(state)
            .clone()
    }

    pub fn contains_queue(&self, queue: vk::Queue) -> bool {
        self.queues.lock().unwrap().contains_key(&queue)
    }

    /// Detach every queue belonging to `device`, for teardown.
    pub fn take_device_queues(&self, device: vk::Device) -> Vec<Arc<QueueState>> {
        let mut queues = self.queues.lock().unwrap();
        let handles: Vec<vk::Queue> = queues
            .iter()
            .filter(|(_, state)| state.device == device)
            .map(|(&handle, _)| handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| queues.remove(&handle))
            .collect()
    }
}
