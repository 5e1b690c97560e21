//! GPU buffer memory management.
//!
//! Two ways to back a buffer:
//! * dedicated memory picked from required/preferred property flags
//!   ([`BufferAllocator::create_buffer_exclusive`], [`BufferAllocator::create_buffer_concurrent`]);
//! * memory managed by `gpu-allocator` from a [`MemoryLocation`] policy
//!   ([`BufferAllocator::create_buffer_with_location`]).
//!
//! Host access goes through [`BufferAllocator::mmap`] / [`BufferAllocator::munmap`], with
//! flush/invalidate for memory that is not host-coherent.

use crate::command::{execute_one_time, CommandPool};
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::ptr::NonNull;
use std::sync::Arc;

/// Allocator settings.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub log_memory_information: bool,
    pub log_leaks_on_shutdown: bool,
    pub store_stack_traces: bool,
    pub log_allocations: bool,
    pub log_frees: bool,
    /// Requires the `bufferDeviceAddress` feature to be enabled on the device.
    pub buffer_device_address: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            log_memory_information: cfg!(debug_assertions),
            log_leaks_on_shutdown: true,
            store_stack_traces: cfg!(debug_assertions),
            log_allocations: false,
            log_frees: false,
            buffer_device_address: false,
        }
    }
}

impl AllocatorConfig {
    pub fn with_buffer_device_address(mut self, enabled: bool) -> Self {
        self.buffer_device_address = enabled;
        self
    }

    /// Log every allocation and free.
    pub fn with_allocation_logging(mut self, enabled: bool) -> Self {
        self.log_allocations = enabled;
        self.log_frees = enabled;
        self
    }

    pub fn with_leak_logging(mut self, enabled: bool) -> Self {
        self.log_leaks_on_shutdown = enabled;
        self
    }

    fn debug_settings(&self) -> gpu_allocator::AllocatorDebugSettings {
        gpu_allocator::AllocatorDebugSettings {
            log_memory_information: self.log_memory_information,
            log_leaks_on_shutdown: self.log_leaks_on_shutdown,
            store_stack_traces: self.store_stack_traces,
            log_allocations: self.log_allocations,
            log_frees: self.log_frees,
            log_stack_traces: false,
        }
    }
}

/// Pick a memory type allowed by `type_bits` that has `required | preferred`, falling back to
/// one that has `required` only.
pub fn select_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
    preferred: vk::MemoryPropertyFlags,
) -> Option<(u32, vk::MemoryPropertyFlags)> {
    let count = (properties.memory_type_count as usize).min(properties.memory_types.len());
    let find = |wanted: vk::MemoryPropertyFlags| {
        properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|&(i, ty)| type_bits & (1u32 << i) != 0 && ty.property_flags.contains(wanted))
            .map(|(i, ty)| (i as u32, ty.property_flags))
    };
    find(required | preferred).or_else(|| find(required))
}

/// Expand `offset..offset + size` (relative to the start of a memory object) to
/// `atom`-aligned bounds, clamped to `limit`. Returns `(offset, size)`.
pub fn align_mapped_range(offset: u64, size: u64, atom: u64, limit: u64) -> (u64, u64) {
    let atom = atom.max(1);
    let start = offset - offset % atom;
    let end = offset.saturating_add(size);
    let end = match end % atom {
        0 => end,
        rem => end.saturating_add(atom - rem),
    }
    .min(limit);
    (start, end.saturating_sub(start))
}

/// Round a sub-allocation request up to whole `atom`s, so flushes padded to atom bounds stay
/// inside the sub-allocation. Device-only memory is never mapped and keeps its requirements.
pub fn pad_to_atom(
    mut requirements: vk::MemoryRequirements,
    atom: u64,
    location: MemoryLocation,
) -> vk::MemoryRequirements {
    if location == MemoryLocation::GpuOnly || atom <= 1 {
        return requirements;
    }
    requirements.alignment = requirements.alignment.max(atom);
    requirements.size = requirements.size.div_ceil(atom).saturating_mul(atom);
    requirements
}

#[derive(Debug)]
enum BufferMemory {
    Managed(Allocation),
    Dedicated {
        memory: vk::DeviceMemory,
        size: u64,
        mapped: Option<NonNull<u8>>,
    },
}

/// A buffer with its backing memory.
#[derive(Debug)]
pub struct AllocatedBuffer {
    buffer: vk::Buffer,
    memory: Option<BufferMemory>,
    size: u64,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    sharing_mode: vk::SharingMode,
    map_count: u32,
}

// SAFETY: the dedicated mapping pointer is only dereferenced through `&mut AllocatedBuffer`
// by the allocator methods; the handles themselves are plain values.
unsafe impl Send for AllocatedBuffer {}

impl AllocatedBuffer {
    /// Get the raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Property flags of the memory type actually used.
    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    pub fn sharing_mode(&self) -> vk::SharingMode {
        self.sharing_mode
    }

    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    pub fn is_host_coherent(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Whether a host pointer is currently available.
    pub fn is_mapped(&self) -> bool {
        match &self.memory {
            Some(BufferMemory::Managed(allocation)) => allocation.mapped_ptr().is_some(),
            Some(BufferMemory::Dedicated { mapped, .. }) => mapped.is_some(),
            None => false,
        }
    }

    /// Memory object backing the buffer.
    pub fn memory(&self) -> vk::DeviceMemory {
        match &self.memory {
            // SAFETY: the allocation stays alive for as long as the buffer.
            Some(BufferMemory::Managed(allocation)) => unsafe { allocation.memory() },
            Some(BufferMemory::Dedicated { memory, .. }) => *memory,
            None => vk::DeviceMemory::null(),
        }
    }

    /// Offset of the buffer inside [`AllocatedBuffer::memory`].
    pub fn memory_offset(&self) -> u64 {
        match &self.memory {
            Some(BufferMemory::Managed(allocation)) => allocation.offset(),
            _ => 0,
        }
    }

    /// End of this buffer's memory, relative to the start of [`AllocatedBuffer::memory`].
    fn memory_end(&self) -> u64 {
        match &self.memory {
            Some(BufferMemory::Managed(allocation)) => allocation.offset() + allocation.size(),
            Some(BufferMemory::Dedicated { size, .. }) => *size,
            None => 0,
        }
    }

    /// Get the device address of this buffer. The buffer needs `SHADER_DEVICE_ADDRESS` usage.
    ///
    /// # Safety
    /// The device must be valid and have the `bufferDeviceAddress` feature enabled.
    pub unsafe fn device_address(&self, device: &ash::Device) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        device.get_buffer_device_address(&info)
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "range {offset}..{end} exceeds buffer size {}",
                self.size
            )));
        }
        Ok(())
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if self.memory.is_some() {
            tracing::warn!(
                buffer = ?self.buffer,
                size = self.size,
                "buffer dropped without destroy_buffer, memory leaked"
            );
        }
    }
}

/// Buffer allocator bound to one device.
pub struct BufferAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    non_coherent_atom_size: u64,
}

impl BufferAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        config: &AllocatorConfig,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: config.debug_settings(),
            buffer_device_address: config.buffer_device_address,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);
        let limits = instance
            .get_physical_device_properties(physical_device)
            .limits;

        Ok(Self {
            allocator: Some(allocator),
            device,
            memory_properties,
            non_coherent_atom_size: limits.non_coherent_atom_size,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn non_coherent_atom_size(&self) -> u64 {
        self.non_coherent_atom_size
    }

    fn allocator_mut(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    /// Create a buffer owned by one queue family at a time, with dedicated memory.
    pub fn create_buffer_exclusive(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        required: vk::MemoryPropertyFlags,
        preferred: vk::MemoryPropertyFlags,
    ) -> Result<AllocatedBuffer> {
        self.create_dedicated(size, usage, &[], required, preferred)
    }

    /// Create a buffer shared by several queue families, with dedicated memory.
    ///
    /// Duplicate families are dropped; a single remaining family yields an exclusive buffer.
    pub fn create_buffer_concurrent(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        required: vk::MemoryPropertyFlags,
        preferred: vk::MemoryPropertyFlags,
        queue_families: &[u32],
    ) -> Result<AllocatedBuffer> {
        let mut families = queue_families.to_vec();
        families.sort_unstable();
        families.dedup();
        self.create_dedicated(size, usage, &families, required, preferred)
    }

    fn create_dedicated(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        queue_families: &[u32],
        required: vk::MemoryPropertyFlags,
        preferred: vk::MemoryPropertyFlags,
    ) -> Result<AllocatedBuffer> {
        if size == 0 {
            return Err(GpuError::InvalidState("buffer size must be non-zero".to_string()));
        }
        let sharing_mode = if queue_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let mut buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode);
        if sharing_mode == vk::SharingMode::CONCURRENT {
            buffer_info = buffer_info.queue_family_indices(queue_families);
        }

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let Some((type_index, properties)) = select_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            required,
            preferred,
        ) else {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(GpuError::NoCompatibleMemoryType {
                required,
                type_bits: requirements.memory_type_bits,
            });
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);
        let memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(e.into());
        }

        tracing::debug!(
            ?buffer,
            size,
            type_index,
            ?properties,
            ?sharing_mode,
            "created buffer with dedicated memory"
        );

        Ok(AllocatedBuffer {
            buffer,
            memory: Some(BufferMemory::Dedicated {
                memory,
                size: requirements.size,
                mapped: None,
            }),
            size,
            usage,
            properties,
            sharing_mode,
            map_count: 0,
        })
    }

    /// Create a buffer whose memory is sub-allocated according to `location`.
    pub fn create_buffer_with_location(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<AllocatedBuffer> {
        if size == 0 {
            return Err(GpuError::InvalidState("buffer size must be non-zero".to_string()));
        }
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = pad_to_atom(
            unsafe { self.device.get_buffer_memory_requirements(buffer) },
            self.non_coherent_atom_size,
            location,
        );

        let allocation = self.allocator_mut().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.allocator_mut()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
            return Err(e.into());
        }

        let properties = allocation.memory_properties();
        tracing::debug!(?buffer, size, ?location, name, "created buffer");

        Ok(AllocatedBuffer {
            buffer,
            memory: Some(BufferMemory::Managed(allocation)),
            size,
            usage,
            properties,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            map_count: 0,
        })
    }

    /// Create a host-writable buffer sized to `data` and fill it.
    ///
    /// Device-only locations are rejected; use [`BufferAllocator::upload_buffer`] for those.
    pub fn create_buffer<T: bytemuck::Pod>(
        &mut self,
        data: &[T],
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<AllocatedBuffer> {
        if location == MemoryLocation::GpuOnly {
            return Err(GpuError::Unsupported(
                "GpuOnly buffers cannot be filled from the host; use upload_buffer".to_string(),
            ));
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer =
            self.create_buffer_with_location(bytes.len() as u64, usage, location, "host data")?;

        if !buffer.is_host_visible() {
            self.destroy_buffer(buffer)?;
            return Err(GpuError::Unsupported(format!(
                "{location:?} memory is not host-visible on this device"
            )));
        }
        if let Err(e) = self.transfer_memory(&mut buffer, 0, bytes) {
            self.destroy_buffer(buffer)?;
            return Err(e);
        }
        Ok(buffer)
    }

    /// Create a device-local buffer filled with `data` through a staging buffer.
    ///
    /// # Safety
    /// `queue` must belong to the queue family of `pool`, and both must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn upload_buffer<T: bytemuck::Pod>(
        &mut self,
        pool: &CommandPool,
        queue: vk::Queue,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        let staging = self.create_buffer(
            data,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        let size = staging.size();

        let target = match self.create_buffer_with_location(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "upload target",
        ) {
            Ok(target) => target,
            Err(e) => {
                self.destroy_buffer(staging)?;
                return Err(e);
            }
        };

        let device = Arc::clone(&self.device);
        let (src, dst) = (staging.handle(), target.handle());
        let copied = execute_one_time(&device, pool, queue, |rec| {
            let region = vk::BufferCopy::default().size(size);
            rec.copy_buffer(src, dst, &[region])?;
            Ok(())
        });

        self.destroy_buffer(staging)?;
        match copied {
            Ok(()) => Ok(target),
            Err(e) => {
                self.destroy_buffer(target)?;
                Err(e)
            }
        }
    }

    /// Map the buffer's memory. Mappings are reference counted; each call must be paired
    /// with [`BufferAllocator::munmap`].
    pub fn mmap(&self, buffer: &mut AllocatedBuffer) -> Result<NonNull<u8>> {
        if !buffer.is_host_visible() {
            return Err(GpuError::Unsupported(
                "buffer memory is not host-visible".to_string(),
            ));
        }
        let ptr = match buffer.memory.as_mut() {
            Some(BufferMemory::Managed(allocation)) => allocation
                .mapped_ptr()
                .map(|p| p.cast::<u8>())
                .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?,
            Some(BufferMemory::Dedicated { memory, mapped, .. }) => match *mapped {
                Some(ptr) => ptr,
                None => {
                    let raw = unsafe {
                        self.device.map_memory(
                            *memory,
                            0,
                            vk::WHOLE_SIZE,
                            vk::MemoryMapFlags::empty(),
                        )?
                    };
                    let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| {
                        GpuError::InvalidState("driver returned a null mapping".to_string())
                    })?;
                    *mapped = Some(ptr);
                    ptr
                }
            },
            None => return Err(GpuError::InvalidState("buffer was destroyed".to_string())),
        };
        buffer.map_count += 1;
        Ok(ptr)
    }

    /// Release one mapping obtained from [`BufferAllocator::mmap`].
    pub fn munmap(&self, buffer: &mut AllocatedBuffer) -> Result<()> {
        if buffer.map_count == 0 {
            return Err(GpuError::InvalidState("buffer is not mapped".to_string()));
        }
        buffer.map_count -= 1;
        if buffer.map_count == 0 {
            if let Some(BufferMemory::Dedicated { memory, mapped, .. }) = buffer.memory.as_mut() {
                if mapped.take().is_some() {
                    unsafe { self.device.unmap_memory(*memory) };
                }
            }
        }
        Ok(())
    }

    fn mapped_range(
        &self,
        buffer: &AllocatedBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Option<vk::MappedMemoryRange<'static>>> {
        if !buffer.is_host_visible() {
            return Err(GpuError::Unsupported(
                "buffer memory is not host-visible".to_string(),
            ));
        }
        let size = if size == vk::WHOLE_SIZE {
            buffer.size.saturating_sub(offset)
        } else {
            size
        };
        buffer.check_range(offset, size)?;
        if buffer.is_host_coherent() {
            tracing::trace!(buffer = ?buffer.buffer, "coherent memory, flush/invalidate skipped");
            return Ok(None);
        }
        if !buffer.is_mapped() {
            return Err(GpuError::InvalidState(
                "flush/invalidate needs a mapped buffer".to_string(),
            ));
        }

        let (start, len) = align_mapped_range(
            buffer.memory_offset() + offset,
            size,
            self.non_coherent_atom_size,
            buffer.memory_end(),
        );
        Ok(Some(
            vk::MappedMemoryRange::default()
                .memory(buffer.memory())
                .offset(start)
                .size(len),
        ))
    }

    /// Make host writes in `offset..offset + size` visible to the device. No-op on coherent
    /// memory. `size` may be `vk::WHOLE_SIZE`.
    pub fn flush_mapped_memory(
        &self,
        buffer: &AllocatedBuffer,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        if let Some(range) = self.mapped_range(buffer, offset, size)? {
            unsafe { self.device.flush_mapped_memory_ranges(&[range])? };
        }
        Ok(())
    }

    /// Make device writes in `offset..offset + size` visible to the host. No-op on coherent
    /// memory. `size` may be `vk::WHOLE_SIZE`.
    pub fn invalidate_mapped_memory(
        &self,
        buffer: &AllocatedBuffer,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        if let Some(range) = self.mapped_range(buffer, offset, size)? {
            unsafe { self.device.invalidate_mapped_memory_ranges(&[range])? };
        }
        Ok(())
    }

    /// Copy `bytes` into the buffer at `offset` and flush them.
    pub fn transfer_memory(
        &self,
        buffer: &mut AllocatedBuffer,
        offset: u64,
        bytes: &[u8],
    ) -> Result<()> {
        buffer.check_range(offset, bytes.len() as u64)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let ptr = self.mmap(buffer)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        let flushed = self.flush_mapped_memory(buffer, offset, bytes.len() as u64);
        self.munmap(buffer)?;
        flushed
    }

    /// Write typed data to the buffer at the given byte offset.
    pub fn write<T: bytemuck::Pod>(
        &self,
        buffer: &mut AllocatedBuffer,
        offset: u64,
        data: &[T],
    ) -> Result<()> {
        self.transfer_memory(buffer, offset, bytemuck::cast_slice(data))
    }

    /// Invalidate and copy `out.len()` bytes starting at `offset` out of the buffer.
    pub fn read_into(
        &self,
        buffer: &mut AllocatedBuffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<()> {
        buffer.check_range(offset, out.len() as u64)?;
        if out.is_empty() {
            return Ok(());
        }
        let ptr = self.mmap(buffer)?;
        let result = self
            .invalidate_mapped_memory(buffer, offset, out.len() as u64)
            .map(|()| unsafe {
                std::ptr::copy_nonoverlapping(
                    ptr.as_ptr().add(offset as usize),
                    out.as_mut_ptr(),
                    out.len(),
                );
            });
        self.munmap(buffer)?;
        result
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read_bytes(
        &self,
        buffer: &mut AllocatedBuffer,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(buffer, offset, &mut out)?;
        Ok(out)
    }

    /// Read `count` values of `T` starting at byte `offset`.
    pub fn read<T: bytemuck::Pod>(
        &self,
        buffer: &mut AllocatedBuffer,
        offset: u64,
        count: usize,
    ) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); count];
        self.read_into(buffer, offset, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }

    /// Destroy a buffer and release its memory.
    pub fn destroy_buffer(&mut self, mut buffer: AllocatedBuffer) -> Result<()> {
        let memory = buffer.memory.take();
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };

        match memory {
            Some(BufferMemory::Managed(allocation)) => {
                self.allocator_mut()?
                    .free(allocation)
                    .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
            }
            Some(BufferMemory::Dedicated { memory, mapped, .. }) => unsafe {
                if mapped.is_some() {
                    self.device.unmap_memory(memory);
                }
                self.device.free_memory(memory, None);
            },
            None => {}
        }
        tracing::debug!(buffer = ?buffer.buffer, size = buffer.size, "destroyed buffer");
        Ok(())
    }
}

impl BufferAllocator {
    /// Shutdown the allocator, freeing all managed GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for BufferAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    #[test]
    fn preferred_properties_win_when_available() {
        let props = properties(&[
            DEVICE_LOCAL,
            HOST_VISIBLE,
            HOST_VISIBLE | HOST_COHERENT,
        ]);
        let (index, flags) =
            select_memory_type(&props, 0b111, HOST_VISIBLE, HOST_COHERENT).unwrap();
        assert_eq!(index, 2);
        assert!(flags.contains(HOST_COHERENT));
    }

    #[test]
    fn falls_back_to_required_only() {
        let props = properties(&[DEVICE_LOCAL, HOST_VISIBLE]);
        let (index, _) = select_memory_type(&props, 0b11, HOST_VISIBLE, HOST_COHERENT).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn type_bits_restrict_candidates() {
        let props = properties(&[HOST_VISIBLE, HOST_VISIBLE | HOST_COHERENT]);
        let (index, _) = select_memory_type(&props, 0b01, HOST_VISIBLE, HOST_COHERENT).unwrap();
        assert_eq!(index, 0);
        assert!(select_memory_type(&props, 0b00, HOST_VISIBLE, HOST_COHERENT).is_none());
    }

    #[test]
    fn unsatisfiable_requirements_are_not_substituted() {
        let props = properties(&[DEVICE_LOCAL, HOST_VISIBLE | HOST_COHERENT]);
        let lazy = vk::MemoryPropertyFlags::LAZILY_ALLOCATED | HOST_VISIBLE;
        assert!(select_memory_type(&props, 0b11, lazy, vk::MemoryPropertyFlags::empty()).is_none());
    }

    #[test]
    fn mapped_ranges_align_to_atoms() {
        assert_eq!(align_mapped_range(0, 100, 64, 4096), (0, 128));
        assert_eq!(align_mapped_range(70, 10, 64, 4096), (64, 64));
        assert_eq!(align_mapped_range(128, 64, 64, 4096), (128, 64));
        assert_eq!(align_mapped_range(4000, 90, 64, 4090), (3968, 122));
        assert_eq!(align_mapped_range(5, 3, 1, 100), (5, 3));
        assert_eq!(align_mapped_range(5, 3, 0, 100), (5, 3));
    }

    #[test]
    fn padded_sub_allocations_bound_their_flushes() {
        let requirements = vk::MemoryRequirements {
            size: 100,
            alignment: 16,
            memory_type_bits: 0b1,
        };
        let padded = pad_to_atom(requirements, 64, MemoryLocation::CpuToGpu);
        assert_eq!((padded.size, padded.alignment), (128, 64));
        let untouched = pad_to_atom(requirements, 64, MemoryLocation::GpuOnly);
        assert_eq!((untouched.size, untouched.alignment), (100, 16));

        // A whole-buffer flush of a sub-allocation at 256 in a larger block stops at its end.
        let end = 256 + padded.size;
        assert_eq!(align_mapped_range(256, 100, 64, end), (256, 128));
        assert_eq!(align_mapped_range(300, 56, 64, end), (256, 128));
    }

    #[test]
    fn config_defaults_keep_device_address_off() {
        let config = AllocatorConfig::default();
        assert!(!config.buffer_device_address);
        assert!(config.log_leaks_on_shutdown);

        let config = config
            .with_buffer_device_address(true)
            .with_allocation_logging(true);
        assert!(config.buffer_device_address);
        assert!(config.debug_settings().log_frees);
    }
}
