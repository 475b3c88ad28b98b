//! Dispatch-chain plumbing.
//!
//! A layer sits between the loader and the driver. At instance/device
//! creation the loader hands us a link-info chain carrying the
//! `GetProcAddr` of the *next* element; everything we ever call downstream
//! is resolved through it once and kept in an immutable table.
//!
//! The link-info structures live in `vk_layer.h`, not the core API, so
//! `ash` does not generate them; the `#[repr(C)]` mirrors here match the
//! loader ABI field for field.

use std::ffi::c_void;

use ash::vk::{self, Handle};

use crate::error::LayerError;

/// `VkLayerFunction` from `vk_layer.h`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerFunction(pub i32);

impl LayerFunction {
    pub const LAYER_LINK_INFO: Self = Self(0);
}

/// One element of the loader's instance dispatch chain.
#[repr(C)]
pub struct LayerInstanceLink {
    pub p_next: *mut LayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_physical_device_proc_addr: vk::PFN_vkVoidFunction,
}

/// One element of the loader's device dispatch chain.
#[repr(C)]
pub struct LayerDeviceLink {
    pub p_next: *mut LayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

#[repr(C)]
pub union LayerInstanceInfo {
    pub p_layer_info: *mut LayerInstanceLink,
}

#[repr(C)]
pub union LayerDeviceInfo {
    pub p_layer_info: *mut LayerDeviceLink,
}

/// `VkLayerInstanceCreateInfo`, found on the `pNext` chain of
/// `VkInstanceCreateInfo` with `sType == LOADER_INSTANCE_CREATE_INFO`.
#[repr(C)]
pub struct LayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerInstanceInfo,
}

/// `VkLayerDeviceCreateInfo`, the device-side equivalent.
#[repr(C)]
pub struct LayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerDeviceInfo,
}

/// Shared prefix of both layer create-info layouts; also serves as the
/// minimal view of any `pNext` chain node.
#[repr(C)]
struct LayerCreateInfoPrefix {
    s_type: vk::StructureType,
    p_next: *const c_void,
    function: LayerFunction,
}

unsafe fn find_link_info(mut node: *const c_void, s_type: vk::StructureType) -> *mut c_void {
    while !node.is_null() {
        let prefix = node as *const LayerCreateInfoPrefix;
        if (*prefix).s_type == s_type && (*prefix).function == LayerFunction::LAYER_LINK_INFO {
            return node as *mut c_void;
        }
        node = (*prefix).p_next;
    }
    std::ptr::null_mut()
}

/// Locate the loader's link info on an instance create-info chain.
///
/// # Safety
/// `create_info` must point to a valid `VkInstanceCreateInfo`.
pub unsafe fn instance_link_info(
    create_info: *const vk::InstanceCreateInfo,
) -> Option<&'static mut LayerInstanceCreateInfo> {
    let node = find_link_info(
        (*create_info).p_next,
        vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
    );
    (node as *mut LayerInstanceCreateInfo).as_mut()
}

/// Locate the loader's link info on a device create-info chain.
///
/// # Safety
/// `create_info` must point to a valid `VkDeviceCreateInfo`.
pub unsafe fn device_link_info(
    create_info: *const vk::DeviceCreateInfo,
) -> Option<&'static mut LayerDeviceCreateInfo> {
    let node = find_link_info(
        (*create_info).p_next,
        vk::StructureType::LOADER_DEVICE_CREATE_INFO,
    );
    (node as *mut LayerDeviceCreateInfo).as_mut()
}

/// Copy the dispatch-table pointer of `device` into a command buffer the
/// layer allocated itself. The loader requires every dispatchable handle
/// it sees to carry a valid table in its first pointer-sized word.
///
/// # Safety
/// Both handles must be live dispatchable handles.
pub unsafe fn set_dispatch_from_parent(child: vk::CommandBuffer, device: vk::Device) {
    let child = child.as_raw() as usize as *mut *const c_void;
    let parent = device.as_raw() as usize as *const *const c_void;
    *child = *parent;
}

macro_rules! resolve {
    ($gpa:expr, $handle:expr, $name:ident) => {{
        match $gpa($handle, concat!(stringify!($name), "\0").as_ptr().cast()) {
            Some(f) => std::mem::transmute(f),
            None => return Err(LayerError::MissingSymbol(stringify!($name))),
        }
    }};
}

/// Downstream instance functions, resolved once at `vkCreateInstance`.
#[derive(Clone, Copy)]
pub struct InstanceTable {
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub destroy_instance: vk::PFN_vkDestroyInstance,
    pub enumerate_physical_devices: vk::PFN_vkEnumeratePhysicalDevices,
    pub get_physical_device_properties: vk::PFN_vkGetPhysicalDeviceProperties,
    pub get_physical_device_queue_family_properties:
        vk::PFN_vkGetPhysicalDeviceQueueFamilyProperties,
}

impl InstanceTable {
    /// Resolve the table through the next element's `GetInstanceProcAddr`.
    ///
    /// # Safety
    /// `instance` must be the handle just returned by the downstream
    /// `vkCreateInstance` and `gipa` the next element's resolver.
    pub unsafe fn load(
        gipa: vk::PFN_vkGetInstanceProcAddr,
        instance: vk::Instance,
    ) -> Result<Self, LayerError> {
        Ok(Self {
            get_instance_proc_addr: resolve!(gipa, instance, vkGetInstanceProcAddr),
            destroy_instance: resolve!(gipa, instance, vkDestroyInstance),
            enumerate_physical_devices: resolve!(gipa, instance, vkEnumeratePhysicalDevices),
            get_physical_device_properties: resolve!(
                gipa,
                instance,
                vkGetPhysicalDeviceProperties
            ),
            get_physical_device_queue_family_properties: resolve!(
                gipa,
                instance,
                vkGetPhysicalDeviceQueueFamilyProperties
            ),
        })
    }
}

/// Downstream device functions, resolved once at `vkCreateDevice`.
///
/// Worker threads keep their own copy, so the table is `Copy` and every
/// field is a plain function pointer.
#[derive(Clone, Copy)]
pub struct DeviceTable {
    pub get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    pub destroy_device: vk::PFN_vkDestroyDevice,

    pub get_device_queue: vk::PFN_vkGetDeviceQueue,
    pub queue_submit: vk::PFN_vkQueueSubmit,

    pub create_query_pool: vk::PFN_vkCreateQueryPool,
    pub destroy_query_pool: vk::PFN_vkDestroyQueryPool,
    pub get_query_pool_results: vk::PFN_vkGetQueryPoolResults,

    pub create_command_pool: vk::PFN_vkCreateCommandPool,
    pub destroy_command_pool: vk::PFN_vkDestroyCommandPool,
    pub allocate_command_buffers: vk::PFN_vkAllocateCommandBuffers,
    pub free_command_buffers: vk::PFN_vkFreeCommandBuffers,
    pub begin_command_buffer: vk::PFN_vkBeginCommandBuffer,
    pub end_command_buffer: vk::PFN_vkEndCommandBuffer,

    pub create_event: vk::PFN_vkCreateEvent,
    pub destroy_event: vk::PFN_vkDestroyEvent,
    pub reset_event: vk::PFN_vkResetEvent,
    pub set_event: vk::PFN_vkSetEvent,
    pub get_event_status: vk::PFN_vkGetEventStatus,

    pub create_fence: vk::PFN_vkCreateFence,
    pub destroy_fence: vk::PFN_vkDestroyFence,
    pub wait_for_fences: vk::PFN_vkWaitForFences,

    pub cmd_reset_query_pool: vk::PFN_vkCmdResetQueryPool,
    pub cmd_write_timestamp: vk::PFN_vkCmdWriteTimestamp,
    pub cmd_set_event: vk::PFN_vkCmdSetEvent,
    pub cmd_wait_events: vk::PFN_vkCmdWaitEvents,
}

impl DeviceTable {
    /// Resolve the table through the next element's `GetDeviceProcAddr`.
    ///
    /// # Safety
    /// `device` must be the handle just returned by the downstream
    /// `vkCreateDevice` and `gdpa` the next element's resolver.
    pub unsafe fn load(
        gdpa: vk::PFN_vkGetDeviceProcAddr,
        device: vk::Device,
    ) -> Result<Self, LayerError> {
        Ok(Self {
            get_device_proc_addr: resolve!(gdpa, device, vkGetDeviceProcAddr),
            destroy_device: resolve!(gdpa, device, vkDestroyDevice),

            get_device_queue: resolve!(gdpa, device, vkGetDeviceQueue),
            queue_submit: resolve!(gdpa, device, vkQueueSubmit),

            create_query_pool: resolve!(gdpa, device, vkCreateQueryPool),
            destroy_query_pool: resolve!(gdpa, device, vkDestroyQueryPool),
            get_query_pool_results: resolve!(gdpa, device, vkGetQueryPoolResults),

            create_command_pool: resolve!(gdpa, device, vkCreateCommandPool),
            destroy_command_pool: resolve!(gdpa, device, vkDestroyCommandPool),
            allocate_command_buffers: resolve!(gdpa, device, vkAllocateCommandBuffers),
            free_command_buffers: resolve!(gdpa, device, vkFreeCommandBuffers),
            begin_command_buffer: resolve!(gdpa, device, vkBeginCommandBuffer),
            end_command_buffer: resolve!(gdpa, device, vkEndCommandBuffer),

            create_event: resolve!(gdpa, device, vkCreateEvent),
            destroy_event: resolve!(gdpa, device, vkDestroyEvent),
            reset_event: resolve!(gdpa, device, vkResetEvent),
            set_event: resolve!(gdpa, device, vkSetEvent),
            get_event_status: resolve!(gdpa, device, vkGetEventStatus),

            create_fence: resolve!(gdpa, device, vkCreateFence),
            destroy_fence: resolve!(gdpa, device, vkDestroyFence),
            wait_for_fences: resolve!(gdpa, device, vkWaitForFences),

            cmd_reset_query_pool: resolve!(gdpa, device, vkCmdResetQueryPool),
            cmd_write_timestamp: resolve!(gdpa, device, vkCmdWriteTimestamp),
            cmd_set_event: resolve!(gdpa, device, vkCmdSetEvent),
            cmd_wait_events: resolve!(gdpa, device, vkCmdWaitEvents),
        })
    }
}
