//! Loader-facing entry points.
//!
//! The loader finds the layer through `TimingGetInstanceProcAddr` /
//! `TimingGetDeviceProcAddr` and the four enumeration exports. Creation
//! interceptors splice us into the dispatch chain; everything not listed
//! here passes straight through to the next element.

use std::ffi::CStr;
use std::os::raw::c_char;

use ash::vk;

use crate::layer::dispatch::{self, DeviceTable, InstanceTable};
use crate::layer::{self, DeviceRecord, InstanceRecord};
use crate::timing;

/// Layer metadata, as reported by the enumeration entry points.
pub const LAYER_NAME: &str = "Timing";
pub const LAYER_DESCRIPTION: &str = "command buffer timing";
pub const LAYER_SPEC_VERSION: u32 = vk::make_api_version(0, 1, 0, 5);
pub const LAYER_IMPLEMENTATION_VERSION: u32 = 1;

macro_rules! intercept {
    ($f:expr) => {
        Some(std::mem::transmute($f))
    };
}

/// Intercepted `vkCreateInstance`: splice into the chain, create
/// downstream, resolve and register our table.
///
/// # Safety
/// Called by the loader; `p_create_info` must carry the loader's
/// link-info chain.
pub unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    crate::init_logging();

    let Some(link_info) = dispatch::instance_link_info(p_create_info) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let Some(layer_link) = link_info.u.p_layer_info.as_ref() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let gipa = layer_link.pfn_next_get_instance_proc_addr;

    let next_create_instance = gipa(
        vk::Instance::null(),
        b"vkCreateInstance\0".as_ptr().cast(),
    );
    let Some(next_create_instance) = next_create_instance else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let next_create_instance: vk::PFN_vkCreateInstance =
        std::mem::transmute(next_create_instance);

    // Advance the chain for the next layer down.
    link_info.u.p_layer_info = layer_link.p_next;

    let result = next_create_instance(p_create_info, p_allocator, p_instance);
    if result != vk::Result::SUCCESS {
        return result;
    }

    let table = match InstanceTable::load(gipa, *p_instance) {
        Ok(table) => table,
        Err(err) => {
            log::error!("instance table resolution failed: {}", err);
            return err.as_vk();
        }
    };
    if let Err(err) = layer::global().register_instance(*p_instance, InstanceRecord { table }) {
        log::error!("instance registration failed: {}", err);
        return err.as_vk();
    }
    vk::Result::SUCCESS
}

/// Intercepted `vkDestroyInstance`: deregister and forward.
///
/// # Safety
/// Called by the loader.
pub unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks,
) {
    match layer::global().remove_instance(instance) {
        Some(record) => (record.table.destroy_instance)(instance, p_allocator),
        None => log::error!("vkDestroyInstance on unregistered instance"),
    }
}

/// Intercepted `vkCreateDevice`.
///
/// # Safety
/// Called by the loader; `p_create_info` must carry the loader's
/// link-info chain.
pub unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    let Some(link_info) = dispatch::device_link_info(p_create_info) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let Some(layer_link) = link_info.u.p_layer_info.as_ref() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let gipa = layer_link.pfn_next_get_instance_proc_addr;
    let gdpa = layer_link.pfn_next_get_device_proc_addr;

    let next_create_device = gipa(vk::Instance::null(), b"vkCreateDevice\0".as_ptr().cast());
    let Some(next_create_device) = next_create_device else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let next_create_device: vk::PFN_vkCreateDevice = std::mem::transmute(next_create_device);

    link_info.u.p_layer_info = layer_link.p_next;

    let result = next_create_device(physical_device, p_create_info, p_allocator, p_device);
    if result != vk::Result::SUCCESS {
        return result;
    }

    let ctx = layer::global();
    let Some(instance) = ctx.physical_device_instance(physical_device) else {
        log::error!("vkCreateDevice on a physical device from an unregistered instance");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let table = match DeviceTable::load(gdpa, *p_device) {
        Ok(table) => table,
        Err(err) => {
            log::error!("device table resolution failed: {}", err);
            return err.as_vk();
        }
    };
    let record = DeviceRecord {
        table,
        physical_device,
        instance,
    };
    if let Err(err) = ctx.register_device(*p_device, record) {
        log::error!("device registration failed: {}", err);
        return err.as_vk();
    }
    vk::Result::SUCCESS
}

/// Intercepted `vkDestroyDevice`: tear down this device's queues (joining
/// their harvesters), deregister, and forward.
///
/// # Safety
/// Called by the loader; all queue work must be externally complete or
/// abandoned per the API contract.
pub unsafe extern "system" fn destroy_device(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let ctx = layer::global();
    for queue in ctx.take_device_queues(device) {
        queue.shutdown();
    }
    match ctx.remove_device(device) {
        Some(record) => (record.table.destroy_device)(device, p_allocator),
        None => log::error!("vkDestroyDevice on unregistered device"),
    }
}

/// The layer's `vkGetInstanceProcAddr`.
///
/// # Safety
/// `p_name` must be a NUL-terminated string.
pub unsafe extern "system" fn get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetInstanceProcAddr" => {
            return intercept!(get_instance_proc_addr as vk::PFN_vkGetInstanceProcAddr)
        }
        b"vkCreateInstance" => return intercept!(create_instance as vk::PFN_vkCreateInstance),
        b"vkDestroyInstance" => return intercept!(destroy_instance as vk::PFN_vkDestroyInstance),
        b"vkCreateDevice" => return intercept!(create_device as vk::PFN_vkCreateDevice),
        _ => {}
    }

    match layer::global().with_instance(instance, |record| record.table.get_instance_proc_addr) {
        Some(next) => next(instance, p_name),
        None => {
            log::warn!(
                "vkGetInstanceProcAddr({:?}) on unregistered instance",
                CStr::from_ptr(p_name)
            );
            None
        }
    }
}

/// The layer's `vkGetDeviceProcAddr`.
///
/// # Safety
/// `p_name` must be a NUL-terminated string.
pub unsafe extern "system" fn get_device_proc_addr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetDeviceProcAddr" => {
            return intercept!(get_device_proc_addr as vk::PFN_vkGetDeviceProcAddr)
        }
        b"vkDestroyDevice" => return intercept!(destroy_device as vk::PFN_vkDestroyDevice),
        b"vkGetDeviceQueue" => {
            return intercept!(timing::queue::get_device_queue as vk::PFN_vkGetDeviceQueue)
        }
        b"vkQueueSubmit" => return intercept!(timing::submit::queue_submit as vk::PFN_vkQueueSubmit),
        _ => {}
    }

    match layer::global().with_device(device, |record| record.table.get_device_proc_addr) {
        Some(next) => next(device, p_name),
        None => {
            log::warn!(
                "vkGetDeviceProcAddr({:?}) on unregistered device",
                CStr::from_ptr(p_name)
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Exported symbols
// ---------------------------------------------------------------------------

/// # Safety
/// Loader ABI.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn TimingGetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    get_instance_proc_addr(instance, p_name)
}

/// # Safety
/// Loader ABI.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn TimingGetDeviceProcAddr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    get_device_proc_addr(device, p_name)
}

fn write_fixed_cstr(dst: &mut [c_char], src: &str) {
    // Arrays come zeroed; leave room for the terminator.
    let max_len = dst.len() - 1;
    for (dst, src) in dst.iter_mut().zip(src.bytes().take(max_len)) {
        *dst = src as c_char;
    }
}

unsafe fn layer_properties(
    p_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    if p_properties.is_null() {
        *p_count = 1;
        return vk::Result::SUCCESS;
    }
    if *p_count == 0 {
        return vk::Result::INCOMPLETE;
    }
    *p_count = 1;
    let mut properties = vk::LayerProperties::default();
    write_fixed_cstr(&mut properties.layer_name, LAYER_NAME);
    properties.spec_version = LAYER_SPEC_VERSION;
    properties.implementation_version = LAYER_IMPLEMENTATION_VERSION;
    write_fixed_cstr(&mut properties.description, LAYER_DESCRIPTION);
    *p_properties = properties;
    vk::Result::SUCCESS
}

/// # Safety
/// Loader ABI.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateInstanceLayerProperties(
    p_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    layer_properties(p_count, p_properties)
}

/// # Safety
/// Loader ABI.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateDeviceLayerProperties(
    _physical_device: vk::PhysicalDevice,
    p_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    layer_properties(p_count, p_properties)
}

/// The layer ships no instance extensions.
///
/// # Safety
/// Loader ABI.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateInstanceExtensionProperties(
    _p_layer_name: *const c_char,
    p_count: *mut u32,
    _p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    *p_count = 0;
    vk::Result::SUCCESS
}

/// The layer ships no device extensions.
///
/// # Safety
/// Loader ABI.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateDeviceExtensionProperties(
    _physical_device: vk::PhysicalDevice,
    _p_layer_name: *const c_char,
    p_count: *mut u32,
    _p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    *p_count = 0;
    vk::Result::SUCCESS
}
