//! Swapchain management.

use crate::error::{GpuError, Result};
use crate::sync::{Fence, Semaphore};
use ash::vk;

/// Everything needed to build a swapchain for an existing surface.
pub struct SwapchainDesc<'a> {
    pub entry: &'a ash::Entry,
    pub instance: &'a ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: &'a ash::Device,
    pub surface: vk::SurfaceKHR,
    pub width: u32,
    pub height: u32,
    /// Queue family that will present; it must support the surface.
    pub queue_family: u32,
    /// FIFO when set, otherwise the lowest-latency mode available.
    pub vsync: bool,
    pub old_swapchain: Option<&'a Swapchain>,
}

/// Swapchain wrapper.
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain.
    ///
    /// # Safety
    /// All handles in `desc` must be valid.
    pub unsafe fn new(desc: &SwapchainDesc<'_>) -> Result<Self> {
        let surface_loader = ash::khr::surface::Instance::new(desc.entry, desc.instance);
        let supported = surface_loader.get_physical_device_surface_support(
            desc.physical_device,
            desc.queue_family,
            desc.surface,
        )?;
        if !supported {
            return Err(GpuError::SwapchainCreation(format!(
                "queue family {} cannot present to the surface",
                desc.queue_family
            )));
        }

        let capabilities = surface_loader
            .get_physical_device_surface_capabilities(desc.physical_device, desc.surface)?;
        let formats = surface_loader
            .get_physical_device_surface_formats(desc.physical_device, desc.surface)?;
        let present_modes = surface_loader
            .get_physical_device_surface_present_modes(desc.physical_device, desc.surface)?;

        let format = select_surface_format(&formats).ok_or_else(|| {
            GpuError::SwapchainCreation("surface reports no formats".to_string())
        })?;
        let present_mode = select_present_mode(&present_modes, desc.vsync);
        let extent = calculate_extent(&capabilities, desc.width, desc.height);
        let image_count = select_image_count(&capabilities);

        let queue_families = [desc.queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(
                desc.old_swapchain
                    .map_or(vk::SwapchainKHR::null(), Swapchain::handle),
            );

        let loader = ash::khr::swapchain::Device::new(desc.instance, desc.device);
        let swapchain = loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = match loader.get_swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                loader.destroy_swapchain(swapchain, None);
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            match desc.device.create_image_view(&view_info, None) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for view in image_views {
                        desc.device.destroy_image_view(view, None);
                    }
                    loader.destroy_swapchain(swapchain, None);
                    return Err(e.into());
                }
            }
        }

        tracing::debug!(
            images = images.len(),
            ?extent,
            format = ?format.format,
            ?present_mode,
            "created swapchain"
        );

        Ok(Self {
            loader,
            swapchain,
            images,
            image_views,
            format,
            present_mode,
            extent,
        })
    }

    /// Get the raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Acquire the next image. Returns the image index and whether the swapchain is
    /// suboptimal.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        semaphore: Option<&Semaphore>,
        fence: Option<&Fence>,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        // OUT_OF_DATE means no image was acquired; the caller must recreate the swapchain.
        Ok(self.loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore.map_or(vk::Semaphore::null(), Semaphore::handle),
            fence.map_or(vk::Fence::null(), Fence::handle),
        )?)
    }

    /// Present an image. Returns `true` when the swapchain should be recreated.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[&Semaphore],
    ) -> Result<bool> {
        let waits: Vec<vk::Semaphore> = wait_semaphores.iter().map(|s| s.handle()).collect();
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.loader.queue_present(queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the image views and the swapchain.
    ///
    /// # Safety
    /// The device must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(self, device: &ash::Device) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        self.loader.destroy_swapchain(self.swapchain, None);
    }
}

/// Prefer an sRGB BGRA8 format, otherwise take the first one reported.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// FIFO for vsync, otherwise mailbox, then immediate, then FIFO (always supported).
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's fixed extent when it has one, otherwise clamp the desired size.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One image more than the minimum, capped by the maximum (0 = unbounded).
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn srgb_format_is_preferred() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(select_surface_format(&[unorm, srgb]).unwrap().format, srgb.format);
        assert_eq!(select_surface_format(&[unorm]).unwrap().format, unorm.format);
        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_follows_vsync() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_is_clamped_when_surface_is_flexible() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(64, 64),
            max_image_extent: extent(1920, 1080),
            ..Default::default()
        };
        assert_eq!(calculate_extent(&caps, 4000, 10), extent(1920, 64));

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(800, 600),
            ..caps
        };
        assert_eq!(calculate_extent(&fixed, 4000, 10), extent(800, 600));
    }

    #[test]
    fn image_count_respects_maximum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(select_image_count(&caps), 3);
        let capped = vk::SurfaceCapabilitiesKHR {
            max_image_count: 2,
            ..caps
        };
        assert_eq!(select_image_count(&capped), 2);
    }
}
