//! SPIR-V shader modules and specialization constants.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V byte blob into words, checking its length and magic number.
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(GpuError::InvalidShaderCode(format!(
            "code size {} is not a non-zero multiple of 4",
            bytes.len()
        )));
    }
    let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .map_err(|e| GpuError::InvalidShaderCode(e.to_string()))?;
    check_magic(&words)?;
    Ok(words)
}

fn check_magic(words: &[u32]) -> Result<()> {
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(()),
        Some(other) => Err(GpuError::InvalidShaderCode(format!(
            "bad magic number {other:#010x}"
        ))),
        None => Err(GpuError::InvalidShaderCode("empty shader code".to_string())),
    }
}

/// Specialization constants for one shader stage.
#[derive(Debug, Clone, Default)]
pub struct Specialization {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl Specialization {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append constant `constant_id` with the bytes of `value`.
    pub fn constant<T: bytemuck::Pod>(mut self, constant_id: u32, value: T) -> Self {
        let bytes = bytemuck::bytes_of(&value);
        self.entries.push(
            vk::SpecializationMapEntry::default()
                .constant_id(constant_id)
                .offset(self.data.len() as u32)
                .size(bytes.len()),
        );
        self.data.extend_from_slice(bytes);
        self
    }

    /// Build from explicit map entries over a data block. Every entry must lie inside `data`.
    pub fn from_raw(entries: Vec<vk::SpecializationMapEntry>, data: Vec<u8>) -> Result<Self> {
        for entry in &entries {
            let end = u64::from(entry.offset) + entry.size as u64;
            if entry.size == 0 || end > data.len() as u64 {
                return Err(GpuError::InvalidShaderCode(format!(
                    "specialization constant {} range {}+{} exceeds {} data byte(s)",
                    entry.constant_id,
                    entry.offset,
                    entry.size,
                    data.len()
                )));
            }
        }
        Ok(Self { entries, data })
    }

    pub fn entries(&self) -> &[vk::SpecializationMapEntry] {
        &self.entries
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Vulkan view of the constants, borrowing this value.
    pub fn info(&self) -> vk::SpecializationInfo<'_> {
        vk::SpecializationInfo::default()
            .map_entries(&self.entries)
            .data(&self.data)
    }
}

/// A shader module bound to one pipeline stage.
#[derive(Debug)]
pub struct ShaderModule {
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
    specialization: Option<Specialization>,
}

impl ShaderModule {
    /// Create a shader module from a SPIR-V byte blob.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn from_bytes(
        device: &ash::Device,
        stage: vk::ShaderStageFlags,
        code: &[u8],
        entry_point: &str,
        specialization: Option<Specialization>,
    ) -> Result<Self> {
        let words = decode_spirv(code)?;
        Self::from_words(device, stage, &words, entry_point, specialization)
    }

    /// Create a shader module from SPIR-V words.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn from_words(
        device: &ash::Device,
        stage: vk::ShaderStageFlags,
        code: &[u32],
        entry_point: &str,
        specialization: Option<Specialization>,
    ) -> Result<Self> {
        check_magic(code)?;
        let entry_point = CString::new(entry_point)
            .map_err(|_| GpuError::InvalidShaderCode("entry point contains a NUL".to_string()))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = device.create_shader_module(&create_info, None)?;

        Ok(Self {
            module,
            stage,
            entry_point,
            specialization,
        })
    }

    /// Get the raw module handle.
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    pub fn specialization(&self) -> Option<&Specialization> {
        self.specialization.as_ref()
    }

    /// Stage description for pipeline creation. `specialization` must come from
    /// [`Specialization::info`] on this module's constants (or be `None`).
    pub fn stage_info<'a>(
        &'a self,
        specialization: Option<&'a vk::SpecializationInfo<'a>>,
    ) -> vk::PipelineShaderStageCreateInfo<'a> {
        let info = vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(&self.entry_point);
        match specialization {
            Some(spec) => info.specialization_info(spec),
            None => info,
        }
    }

    /// Destroy the module. Pipelines already built from it stay valid.
    ///
    /// # Safety
    /// The device must be valid and no pipeline creation may be using the module.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_shader_module(self.module, None);
    }

    /// Module with a null handle, for exercising pipeline validation without a device.
    #[cfg(test)]
    pub(crate) fn detached(stage: vk::ShaderStageFlags) -> Self {
        Self {
            module: vk::ShaderModule::null(),
            stage,
            entry_point: c"main".to_owned(),
            specialization: None,
        }
    }
}
