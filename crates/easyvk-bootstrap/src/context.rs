//! GPU context management.

use crate::error::Result;
use crate::instance::{create_instance, select_physical_device};
use ash::vk;
use easyvk::{AllocatorConfig, BufferAllocator};
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

/// Settings for [`GpuContext::new`].
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub app_name: String,
    pub enable_validation: bool,
    /// Minimum device API version; also requested for the instance.
    pub api_version: u32,
    pub instance_extensions: Vec<&'static CStr>,
    pub device_extensions: Vec<&'static CStr>,
    pub allocator: AllocatorConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            app_name: "easyvk".to_string(),
            enable_validation: cfg!(debug_assertions),
            api_version: vk::API_VERSION_1_2,
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            allocator: AllocatorConfig::default(),
        }
    }
}

impl BootstrapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    pub fn instance_extension(mut self, name: &'static CStr) -> Self {
        self.instance_extensions.push(name);
        self
    }

    pub fn device_extension(mut self, name: &'static CStr) -> Self {
        self.device_extensions.push(name);
        self
    }

    pub fn allocator(mut self, config: AllocatorConfig) -> Self {
        self.allocator = config;
        self
    }
}

/// Device features that were found and enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledFeatures {
    pub buffer_device_address: bool,
    pub dynamic_rendering: bool,
    pub tessellation_shader: bool,
}

/// Instance, device, one queue and a buffer allocator.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device: Arc<ash::Device>,
    features: EnabledFeatures,
    allocator: Mutex<BufferAllocator>,
    queue_family: u32,
    queue: vk::Queue,
}

impl GpuContext {
    /// Load Vulkan and build a context.
    pub fn new(config: &BootstrapConfig) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }?;

        let instance = unsafe {
            create_instance(
                &entry,
                &config.app_name,
                config.api_version,
                config.enable_validation,
                &config.instance_extensions,
            )
        }?;

        let parts = match unsafe { DeviceParts::create(&instance, config) } {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        Ok(Self {
            entry,
            instance,
            physical_device: parts.physical_device,
            properties: parts.properties,
            device: parts.device,
            features: parts.features,
            allocator: Mutex::new(parts.allocator),
            queue_family: parts.queue_family,
            queue: parts.queue,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle for objects that keep the device alive.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        self.device.clone()
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn features(&self) -> EnabledFeatures {
        self.features
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get access to the buffer allocator.
    pub fn allocator(&self) -> &Mutex<BufferAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // The allocator frees its memory blocks, so it must go before the device.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Everything created against an instance.
struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device: Arc<ash::Device>,
    features: EnabledFeatures,
    allocator: BufferAllocator,
    queue_family: u32,
    queue: vk::Queue,
}

impl DeviceParts {
    /// # Safety
    /// The instance must be valid.
    unsafe fn create(instance: &ash::Instance, config: &BootstrapConfig) -> Result<Self> {
        let (physical_device, queue_family) =
            select_physical_device(instance, config.api_version)?;
        let properties = instance.get_physical_device_properties(physical_device);

        tracing::info!(
            "Selected GPU: {:?} ({:?})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type
        );

        let (device, features) = create_device(
            instance,
            physical_device,
            usable_api_version(config.api_version, properties.api_version),
            queue_family,
            &config.device_extensions,
        )?;
        let device = Arc::new(device);
        let queue = device.get_device_queue(queue_family, 0);

        let allocator_config = config
            .allocator
            .clone()
            .with_buffer_device_address(features.buffer_device_address);
        let allocator =
            match BufferAllocator::new(instance, device.clone(), physical_device, &allocator_config)
            {
                Ok(allocator) => allocator,
                Err(e) => {
                    device.destroy_device(None);
                    return Err(e.into());
                }
            };

        Ok(Self {
            physical_device,
            properties,
            device,
            features,
            allocator,
            queue_family,
            queue,
        })
    }
}

/// The API version device-level structures may target: the instance was created with
/// `requested`, so a newer device version does not make newer core features usable.
fn usable_api_version(requested: u32, device: u32) -> u32 {
    requested.min(device)
}

fn at_least(version: u32, major: u32, minor: u32) -> bool {
    (vk::api_version_major(version), vk::api_version_minor(version)) >= (major, minor)
}

/// Create the logical device with one queue, enabling the optional features the device has.
///
/// # Safety
/// The instance and physical device must be valid, and `api_version` must not exceed the
/// instance's API version.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    api_version: u32,
    queue_family: u32,
    extensions: &[&CStr],
) -> Result<(ash::Device, EnabledFeatures)> {
    let at_least_1_2 = at_least(api_version, 1, 2);
    let at_least_1_3 = at_least(api_version, 1, 3);

    let mut supported_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut supported_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let supported_base = {
        let mut query = vk::PhysicalDeviceFeatures2::default();
        if at_least_1_2 {
            query = query.push_next(&mut supported_1_2);
        }
        if at_least_1_3 {
            query = query.push_next(&mut supported_1_3);
        }
        instance.get_physical_device_features2(physical_device, &mut query);
        query.features
    };

    let enabled = EnabledFeatures {
        buffer_device_address: at_least_1_2 && supported_1_2.buffer_device_address == vk::TRUE,
        dynamic_rendering: at_least_1_3 && supported_1_3.dynamic_rendering == vk::TRUE,
        tessellation_shader: supported_base.tessellation_shader == vk::TRUE,
    };

    let queue_priority = 1.0_f32;
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extension_names: Vec<*const std::ffi::c_char> =
        extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(enabled.buffer_device_address);
    let mut vulkan_1_3_features =
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(enabled.dynamic_rendering);
    let base_features =
        vk::PhysicalDeviceFeatures::default().tessellation_shader(enabled.tessellation_shader);

    let mut features2 = vk::PhysicalDeviceFeatures2::default().features(base_features);
    if at_least_1_2 {
        features2 = features2.push_next(&mut vulkan_1_2_features);
    }
    if at_least_1_3 {
        features2 = features2.push_next(&mut vulkan_1_3_features);
    }

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance.create_device(physical_device, &device_create_info, None)?;

    tracing::debug!(?enabled, queue_family, "created logical device");
    Ok((device, enabled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_overrides_defaults() {
        let config = BootstrapConfig::new()
            .app_name("round-trip")
            .validation(false)
            .api_version(vk::API_VERSION_1_3)
            .device_extension(ash::khr::swapchain::NAME);
        assert_eq!(config.app_name, "round-trip");
        assert!(!config.enable_validation);
        assert_eq!(config.api_version, vk::API_VERSION_1_3);
        assert_eq!(config.device_extensions, vec![ash::khr::swapchain::NAME]);
        assert!(config.instance_extensions.is_empty());
    }

    #[test]
    fn newer_device_does_not_lift_the_instance_version() {
        let usable = usable_api_version(vk::API_VERSION_1_2, vk::make_api_version(0, 1, 3, 280));
        assert_eq!(usable, vk::API_VERSION_1_2);
        assert!(at_least(usable, 1, 2));
        assert!(!at_least(usable, 1, 3));

        let usable = usable_api_version(vk::API_VERSION_1_3, vk::make_api_version(0, 1, 3, 280));
        assert!(at_least(usable, 1, 3));

        let usable = usable_api_version(vk::API_VERSION_1_3, vk::make_api_version(0, 1, 2, 198));
        assert!(!at_least(usable, 1, 3));
        assert!(!at_least(vk::API_VERSION_1_1, 1, 2));
        assert!(at_least(vk::make_api_version(0, 2, 0, 0), 1, 3));
    }

    #[test]
    fn validation_defaults_to_debug_builds() {
        assert_eq!(
            BootstrapConfig::default().enable_validation,
            cfg!(debug_assertions)
        );
    }
}
