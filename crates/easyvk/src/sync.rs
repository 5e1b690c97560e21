//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Binary GPU→CPU completion signal.
#[derive(Debug)]
pub struct Fence {
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence. It starts unsignaled unless `flags` contains `SIGNALED`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create(device: &ash::Device, flags: vk::FenceCreateFlags) -> Result<Self> {
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = device.create_fence(&create_info, None)?;
        Ok(Self { fence })
    }

    /// Create a fence in the signaled state, so the first wait on it returns immediately.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create_signaled(device: &ash::Device) -> Result<Self> {
        Self::create(device, vk::FenceCreateFlags::SIGNALED)
    }

    /// Get the raw fence handle.
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Reset the fence to unsignaled state.
    ///
    /// # Safety
    /// The device must be valid and the fence must not be part of a pending submission.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_fences(&[self.fence])?;
        Ok(())
    }

    /// Wait for the fence to be signaled.
    ///
    /// Returns `false` if `timeout_ns` elapsed first. `u64::MAX` waits forever and `0`
    /// only polls.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn wait(&self, device: &ash::Device, timeout_ns: u64) -> Result<bool> {
        wait_for_fences(device, &[self], true, timeout_ns)
    }

    /// Query whether the fence is currently signaled.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn status(&self, device: &ash::Device) -> Result<bool> {
        Ok(device.get_fence_status(self.fence)?)
    }

    /// Destroy the fence.
    ///
    /// # Safety
    /// The device must be valid and the fence must not be part of a pending submission.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_fence(self.fence, None);
    }
}

/// Wait on several fences at once.
///
/// Returns `false` if the timeout elapsed before the wait condition was met.
///
/// # Safety
/// The device and all fences must be valid.
pub unsafe fn wait_for_fences(
    device: &ash::Device,
    fences: &[&Fence],
    wait_all: bool,
    timeout_ns: u64,
) -> Result<bool> {
    if fences.is_empty() {
        return Ok(true);
    }
    let handles: Vec<vk::Fence> = fences.iter().map(|f| f.handle()).collect();
    match device.wait_for_fences(&handles, wait_all, timeout_ns) {
        Ok(()) => Ok(true),
        Err(vk::Result::TIMEOUT) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Binary GPU→GPU signal, consumed through queue submission wait/signal lists.
#[derive(Debug)]
pub struct Semaphore {
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a semaphore.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create(device: &ash::Device) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = device.create_semaphore(&create_info, None)?;
        Ok(Self { semaphore })
    }

    /// Get the raw semaphore handle.
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Destroy the semaphore.
    ///
    /// # Safety
    /// The device must be valid and no pending submission may reference the semaphore.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_semaphore(self.semaphore, None);
    }
}
