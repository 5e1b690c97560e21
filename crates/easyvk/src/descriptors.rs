//! Descriptor set management.
//!
//! Layouts keep a sorted copy of their bindings (the layout *signature*). Sets remember the
//! signature they were allocated against, which lets writes and binds be checked before they
//! reach the driver, and pools track their remaining capacity so exhaustion is reported as
//! [`GpuError::CapacityExhausted`] instead of undefined driver behavior.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    fn is_dynamic(&self) -> bool {
        matches!(
            self.descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        )
    }
}

/// Sorted, immutable binding list of a descriptor set layout.
///
/// Two sets are bind-compatible with a pipeline layout slot when their signatures are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutSignature(Arc<[DescriptorBinding]>);

impl LayoutSignature {
    /// Build a signature, rejecting duplicate binding indices.
    pub fn new(mut bindings: Vec<DescriptorBinding>) -> Result<Self> {
        bindings.sort_by_key(|b| b.binding);
        if let Some(pair) = bindings.windows(2).find(|w| w[0].binding == w[1].binding) {
            return Err(GpuError::LayoutMismatch(format!(
                "binding {} declared more than once",
                pair[0].binding
            )));
        }
        Ok(Self(bindings.into()))
    }

    /// Bindings ordered by index.
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.0
    }

    /// Look up a binding by index.
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.0
            .binary_search_by_key(&binding, |b| b.binding)
            .ok()
            .map(|i| &self.0[i])
    }

    /// Number of dynamic offsets a bind of a set with this signature consumes.
    pub fn dynamic_offset_count(&self) -> usize {
        self.0
            .iter()
            .filter(|b| b.is_dynamic())
            .map(|b| b.count as usize)
            .sum()
    }

    /// Add this signature's descriptors to `totals`. Fails if a total overflows `u32`.
    fn add_descriptor_counts(&self, totals: &mut HashMap<vk::DescriptorType, u32>) -> Result<()> {
        for binding in self.0.iter().filter(|b| b.count > 0) {
            let total = totals.entry(binding.descriptor_type).or_default();
            *total = total.checked_add(binding.count).ok_or_else(|| {
                GpuError::InvalidArgument(format!(
                    "{:?} descriptor count overflows u32",
                    binding.descriptor_type
                ))
            })?;
        }
        Ok(())
    }

    fn descriptor_counts(&self) -> impl Iterator<Item = (vk::DescriptorType, u32)> + '_ {
        self.0
            .iter()
            .filter(|b| b.count > 0)
            .map(|b| (b.descriptor_type, b.count))
    }
}

/// Descriptor set layout builder.
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBinding>,
    flags: vk::DescriptorSetLayoutCreateFlags,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set layout creation flags.
    pub fn flags(mut self, flags: vk::DescriptorSetLayoutCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            descriptor_type,
            count,
            stages: stage_flags,
        });
        self
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage image binding.
    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    /// Add a sampled image binding.
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<DescriptorSetLayout> {
        let signature = LayoutSignature::new(self.bindings)?;
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = signature
            .bindings()
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(self.flags)
            .bindings(&vk_bindings);

        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        Ok(DescriptorSetLayout { layout, signature })
    }
}

/// Descriptor set layout and its binding signature.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    signature: LayoutSignature,
}

impl DescriptorSetLayout {
    /// Get the raw layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings ordered by index.
    pub fn bindings(&self) -> &[DescriptorBinding] {
        self.signature.bindings()
    }

    pub fn signature(&self) -> &LayoutSignature {
        &self.signature
    }

    /// Destroy the layout.
    ///
    /// # Safety
    /// The device must be valid and no pipeline layout creation may be using it.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_descriptor_set_layout(self.layout, None);
    }
}

/// Accumulates `(type, count)` pairs for descriptor pool creation.
#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolSizes {
    sizes: Vec<vk::DescriptorPoolSize>,
}

impl DescriptorPoolSizes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` descriptors of `descriptor_type`. Repeated types are summed.
    pub fn add(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        match self.sizes.iter_mut().find(|s| s.ty == descriptor_type) {
            Some(size) => size.descriptor_count = size.descriptor_count.saturating_add(count),
            None => self.sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(descriptor_type)
                    .descriptor_count(count),
            ),
        }
        self
    }

    pub fn as_slice(&self) -> &[vk::DescriptorPoolSize] {
        &self.sizes
    }
}

/// Remaining capacity of a descriptor pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolCapacity {
    max_sets: u32,
    remaining_sets: u32,
    limits: HashMap<vk::DescriptorType, u32>,
    remaining: HashMap<vk::DescriptorType, u32>,
}

impl PoolCapacity {
    pub fn new(max_sets: u32, sizes: &DescriptorPoolSizes) -> Self {
        let limits: HashMap<_, _> = sizes
            .as_slice()
            .iter()
            .map(|s| (s.ty, s.descriptor_count))
            .collect();
        Self {
            max_sets,
            remaining_sets: max_sets,
            remaining: limits.clone(),
            limits,
        }
    }

    /// Sets that can still be allocated.
    pub fn remaining_sets(&self) -> u32 {
        self.remaining_sets
    }

    /// Descriptors of `descriptor_type` that can still be allocated.
    pub fn remaining(&self, descriptor_type: vk::DescriptorType) -> u32 {
        self.remaining.get(&descriptor_type).copied().unwrap_or(0)
    }

    /// Reserve room for one set per signature. Nothing is reserved if any part does not fit.
    pub fn try_reserve(&mut self, signatures: &[&LayoutSignature]) -> Result<()> {
        let set_count = u32::try_from(signatures.len()).unwrap_or(u32::MAX);
        if set_count > self.remaining_sets {
            return Err(GpuError::CapacityExhausted(format!(
                "{set_count} set(s) requested, {} of {} remaining",
                self.remaining_sets, self.max_sets
            )));
        }

        let mut totals = HashMap::new();
        for signature in signatures {
            signature.add_descriptor_counts(&mut totals)?;
        }
        for (ty, &count) in &totals {
            let left = self.remaining(*ty);
            if count > left {
                return Err(GpuError::CapacityExhausted(format!(
                    "{count} {ty:?} descriptor(s) requested, {left} remaining"
                )));
            }
        }

        self.remaining_sets -= set_count;
        for (ty, count) in totals {
            if let Some(left) = self.remaining.get_mut(&ty) {
                *left -= count;
            }
        }
        Ok(())
    }

    /// Return the capacity of freed sets.
    pub fn release(&mut self, signatures: &[&LayoutSignature]) {
        let set_count = u32::try_from(signatures.len()).unwrap_or(u32::MAX);
        self.remaining_sets = self
            .remaining_sets
            .saturating_add(set_count)
            .min(self.max_sets);

        let mut totals: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for (ty, count) in signatures.iter().flat_map(|s| s.descriptor_counts()) {
            let total = totals.entry(ty).or_default();
            *total = total.saturating_add(count);
        }
        for (ty, count) in totals {
            let limit = self.limits.get(&ty).copied().unwrap_or(0);
            if let Some(left) = self.remaining.get_mut(&ty) {
                *left = left.saturating_add(count).min(limit);
            }
        }
    }

    /// Restore the full capacity.
    pub fn reset(&mut self) {
        self.remaining_sets = self.max_sets;
        self.remaining = self.limits.clone();
    }
}

/// Descriptor pool for allocating descriptor sets.
#[derive(Debug)]
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    capacity: PoolCapacity,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
        pool_sizes: &DescriptorPoolSizes,
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes.as_slice())
            .flags(flags);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        tracing::debug!(?pool, max_sets, ?flags, "created descriptor pool");

        Ok(Self {
            pool,
            flags,
            capacity: PoolCapacity::new(max_sets, pool_sizes),
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn capacity(&self) -> &PoolCapacity {
        &self.capacity
    }

    /// Allocate one descriptor set.
    ///
    /// # Safety
    /// The device and layout must be valid.
    pub unsafe fn allocate_set(
        &mut self,
        device: &ash::Device,
        layout: &DescriptorSetLayout,
    ) -> Result<DescriptorSet> {
        let mut sets = self.allocate_sets(device, &[layout])?;
        sets.pop()
            .ok_or_else(|| GpuError::InvalidState("driver returned no descriptor set".to_string()))
    }

    /// Allocate one descriptor set per layout, all or nothing.
    ///
    /// # Safety
    /// The device and layouts must be valid.
    pub unsafe fn allocate_sets(
        &mut self,
        device: &ash::Device,
        layouts: &[&DescriptorSetLayout],
    ) -> Result<Vec<DescriptorSet>> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }
        let signatures: Vec<&LayoutSignature> = layouts.iter().map(|l| l.signature()).collect();
        if let Err(err) = self.capacity.try_reserve(&signatures) {
            tracing::warn!(pool = ?self.pool, %err, "descriptor set reservation rejected");
            return Err(err);
        }

        let handles: Vec<vk::DescriptorSetLayout> = layouts.iter().map(|l| l.handle()).collect();
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&handles);

        let sets = match device.allocate_descriptor_sets(&alloc_info) {
            Ok(sets) => sets,
            Err(e) => {
                self.capacity.release(&signatures);
                return Err(match e {
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                        tracing::warn!(pool = ?self.pool, result = ?e, "descriptor pool exhausted");
                        GpuError::CapacityExhausted(format!("driver reported {e}"))
                    }
                    other => other.into(),
                });
            }
        };

        Ok(sets
            .into_iter()
            .zip(layouts)
            .map(|(set, layout)| DescriptorSet {
                set,
                pool: self.pool,
                signature: layout.signature().clone(),
            })
            .collect())
    }

    /// Free individual sets. Requires a pool created with `FREE_DESCRIPTOR_SET`.
    ///
    /// # Safety
    /// The device must be valid and the sets must not be in use.
    pub unsafe fn free_sets(
        &mut self,
        device: &ash::Device,
        sets: impl IntoIterator<Item = DescriptorSet>,
    ) -> Result<()> {
        if !self
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return Err(GpuError::Unsupported(
                "descriptor pool was not created with FREE_DESCRIPTOR_SET".to_string(),
            ));
        }

        let sets: Vec<DescriptorSet> = sets.into_iter().collect();
        if sets.iter().any(|s| s.pool != self.pool) {
            return Err(GpuError::InvalidState(
                "descriptor set was allocated from a different pool".to_string(),
            ));
        }
        if sets.is_empty() {
            return Ok(());
        }

        let handles: Vec<vk::DescriptorSet> = sets.iter().map(|s| s.set).collect();
        device.free_descriptor_sets(self.pool, &handles)?;
        let signatures: Vec<&LayoutSignature> = sets.iter().map(|s| &s.signature).collect();
        self.capacity.release(&signatures);
        Ok(())
    }

    /// Reset the pool, freeing all descriptor sets.
    ///
    /// # Safety
    /// The device must be valid and no descriptor sets must be in use. Sets allocated before
    /// the reset must not be used afterwards.
    pub unsafe fn reset(&mut self, device: &ash::Device) -> Result<()> {
        device.reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        self.capacity.reset();
        Ok(())
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
        tracing::debug!(pool = ?self.pool, "destroyed descriptor pool");
    }
}

/// A descriptor set and the signature of the layout it was allocated against.
#[derive(Debug)]
pub struct DescriptorSet {
    set: vk::DescriptorSet,
    pool: vk::DescriptorPool,
    signature: LayoutSignature,
}

impl DescriptorSet {
    /// Get the raw set handle.
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn signature(&self) -> &LayoutSignature {
        &self.signature
    }
}

/// Check that `sets` may be bound at `first_set` of a pipeline layout whose set slots have
/// the signatures `layout_sets`, with `dynamic_offsets` dynamic offsets.
pub fn check_set_compatibility(
    layout_sets: &[LayoutSignature],
    first_set: u32,
    sets: &[&LayoutSignature],
    dynamic_offsets: usize,
) -> Result<()> {
    let first = first_set as usize;
    if first + sets.len() > layout_sets.len() {
        return Err(GpuError::LayoutMismatch(format!(
            "sets {first}..{} bound but pipeline layout declares {} set(s)",
            first + sets.len(),
            layout_sets.len()
        )));
    }

    for (i, signature) in sets.iter().enumerate() {
        if **signature != layout_sets[first + i] {
            return Err(GpuError::LayoutMismatch(format!(
                "set {} does not match the pipeline layout's set layout",
                first + i
            )));
        }
    }

    let expected: usize = sets.iter().map(|s| s.dynamic_offset_count()).sum();
    if expected != dynamic_offsets {
        return Err(GpuError::LayoutMismatch(format!(
            "{dynamic_offsets} dynamic offset(s) given, {expected} expected"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Buffer,
    Image,
    TexelBuffer,
}

impl ResourceKind {
    fn of(descriptor_type: vk::DescriptorType) -> Option<Self> {
        match descriptor_type {
            vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => Some(Self::Buffer),
            vk::DescriptorType::SAMPLER
            | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::STORAGE_IMAGE
            | vk::DescriptorType::INPUT_ATTACHMENT => Some(Self::Image),
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
                Some(Self::TexelBuffer)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum WriteResource {
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Images(Vec<vk::DescriptorImageInfo>),
    TexelBuffers(Vec<vk::BufferView>),
}

impl WriteResource {
    fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffers(_) => ResourceKind::Buffer,
            Self::Images(_) => ResourceKind::Image,
            Self::TexelBuffers(_) => ResourceKind::TexelBuffer,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Buffers(v) => v.len(),
            Self::Images(v) => v.len(),
            Self::TexelBuffers(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    binding: u32,
    array_element: u32,
    descriptor_type: vk::DescriptorType,
    resource: WriteResource,
}

/// Batches descriptor writes to one set and applies them with a single update call.
///
/// Each write must stay within its binding's array; writes never spill into the next binding.
pub struct DescriptorWriter<'s> {
    set: &'s DescriptorSet,
    writes: Vec<PendingWrite>,
}

impl<'s> DescriptorWriter<'s> {
    pub fn new(set: &'s DescriptorSet) -> Self {
        Self {
            set,
            writes: Vec::new(),
        }
    }

    /// Write buffer descriptors starting at `array_element`.
    pub fn buffers(
        mut self,
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        infos: &[vk::DescriptorBufferInfo],
    ) -> Self {
        self.writes.push(PendingWrite {
            binding,
            array_element,
            descriptor_type,
            resource: WriteResource::Buffers(infos.to_vec()),
        });
        self
    }

    /// Write a single buffer descriptor.
    pub fn buffer(
        self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    ) -> Self {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(range);
        self.buffers(binding, 0, descriptor_type, &[info])
    }

    pub fn storage_buffer(self, binding: u32, buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        self.buffer(
            binding,
            vk::DescriptorType::STORAGE_BUFFER,
            buffer,
            offset,
            range,
        )
    }

    pub fn uniform_buffer(self, binding: u32, buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        self.buffer(
            binding,
            vk::DescriptorType::UNIFORM_BUFFER,
            buffer,
            offset,
            range,
        )
    }

    /// Write image descriptors starting at `array_element`.
    pub fn images(
        mut self,
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        infos: &[vk::DescriptorImageInfo],
    ) -> Self {
        self.writes.push(PendingWrite {
            binding,
            array_element,
            descriptor_type,
            resource: WriteResource::Images(infos.to_vec()),
        });
        self
    }

    /// Write a single image descriptor.
    pub fn image(
        self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        sampler: vk::Sampler,
        image_view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Self {
        let info = vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(image_view)
            .image_layout(layout);
        self.images(binding, 0, descriptor_type, &[info])
    }

    pub fn storage_image(
        self,
        binding: u32,
        image_view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Self {
        self.image(
            binding,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::Sampler::null(),
            image_view,
            layout,
        )
    }

    pub fn combined_image_sampler(
        self,
        binding: u32,
        sampler: vk::Sampler,
        image_view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Self {
        self.image(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            sampler,
            image_view,
            layout,
        )
    }

    /// Write texel buffer views starting at `array_element`.
    pub fn texel_buffers(
        mut self,
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        views: &[vk::BufferView],
    ) -> Self {
        self.writes.push(PendingWrite {
            binding,
            array_element,
            descriptor_type,
            resource: WriteResource::TexelBuffers(views.to_vec()),
        });
        self
    }

    /// Check every pending write against the set's layout signature.
    pub fn validate(&self) -> Result<()> {
        for write in &self.writes {
            let binding = self.set.signature.binding(write.binding).ok_or_else(|| {
                GpuError::LayoutMismatch(format!("binding {} is not in the layout", write.binding))
            })?;

            if binding.descriptor_type != write.descriptor_type {
                return Err(GpuError::LayoutMismatch(format!(
                    "binding {} is {:?}, write is {:?}",
                    write.binding, binding.descriptor_type, write.descriptor_type
                )));
            }

            if ResourceKind::of(write.descriptor_type) != Some(write.resource.kind()) {
                return Err(GpuError::LayoutMismatch(format!(
                    "{:?} resource cannot back a {:?} descriptor",
                    write.resource.kind(),
                    write.descriptor_type
                )));
            }

            let count = write.resource.len() as u64;
            let end = u64::from(write.array_element) + count;
            if count == 0 || end > u64::from(binding.count) {
                return Err(GpuError::LayoutMismatch(format!(
                    "write of {count} descriptor(s) at element {} does not fit binding {} of {}",
                    write.array_element, write.binding, binding.count
                )));
            }
        }
        Ok(())
    }

    /// Validate and apply all pending writes.
    ///
    /// # Safety
    /// The device and all referenced resources must be valid, and the set must not be in use
    /// by a pending command buffer.
    pub unsafe fn update(self, device: &ash::Device) -> Result<()> {
        self.validate()?;
        if self.writes.is_empty() {
            return Ok(());
        }

        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .map(|w| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set.set)
                    .dst_binding(w.binding)
                    .dst_array_element(w.array_element)
                    .descriptor_type(w.descriptor_type);
                match &w.resource {
                    WriteResource::Buffers(infos) => write.buffer_info(infos),
                    WriteResource::Images(infos) => write.image_info(infos),
                    WriteResource::TexelBuffers(views) => write.texel_buffer_view(views),
                }
            })
            .collect();

        device.update_descriptor_sets(&writes, &[]);
        Ok(())
    }
}
