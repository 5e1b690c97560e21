//! Vulkan instance creation and physical device selection.

use crate::error::{BootstrapError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

/// Validation layers to enable when validation is requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// Requested layers that the loader does not know are skipped with a warning.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    api_version: u32,
    enable_validation: bool,
    extensions: &[&CStr],
) -> Result<ash::Instance> {
    let app_name =
        CString::new(app_name).map_err(|_| BootstrapError::InvalidName(app_name.to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"easyvk")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(api_version);

    let extension_names: Vec<*const std::ffi::c_char> =
        extensions.iter().map(|ext| ext.as_ptr()).collect();

    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = if enable_validation {
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available_layers
                    .iter()
                    .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        vec![]
    };
    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names);

    Ok(entry.create_instance(&create_info, None)?)
}

/// Select the highest-scoring physical device that supports `min_api_version` and has a
/// queue family with compute support.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    min_api_version: u32,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best = None;
    let mut best_score = -1i64;

    for device in devices {
        let properties = instance.get_physical_device_properties(device);
        let Some(queue_family) = find_queue_family(
            &instance.get_physical_device_queue_family_properties(device),
        ) else {
            continue;
        };

        let memory = instance.get_physical_device_memory_properties(device);
        let score = score_device(
            properties.device_type,
            properties.api_version,
            min_api_version,
            device_local_bytes(&memory),
        );
        if score > best_score {
            best_score = score;
            best = Some((device, queue_family));
        }
    }

    best.ok_or_else(|| easyvk::GpuError::NoSuitableDevice.into())
}

/// First family with graphics and compute, otherwise the first with compute.
pub fn find_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    let both = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(both))
        .or_else(|| {
            families
                .iter()
                .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::COMPUTE))
        })
        .map(|i| i as u32)
}

fn device_local_bytes(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size)
        .sum()
}

/// Score a device; negative means unusable.
pub fn score_device(
    device_type: vk::PhysicalDeviceType,
    api_version: u32,
    min_api_version: u32,
    device_local_bytes: u64,
) -> i64 {
    let version = |v: u32| (vk::api_version_major(v), vk::api_version_minor(v));
    if version(api_version) < version(min_api_version) {
        return -1;
    }

    let mut score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };
    // +1 per GiB
    score += (device_local_bytes >> 30) as i64;
    score
}
