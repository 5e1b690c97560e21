//! Command pool and command buffer management.
//!
//! Command buffers track their lifecycle (`Initial → Recording → Executable → Pending`)
//! so that misuse fails with a typed error instead of reaching the driver. Examples are
//! recording into a buffer that is not recording, submitting one that was never ended, and
//! resetting one whose pool forbids it.
//!
//! A completed buffer goes back to `Initial` when its pool allows individual resets and
//! stays `Invalid` until the whole pool is reset otherwise.

use crate::error::{GpuError, Result};
use crate::recorder::CommandRecorder;
use crate::sync::{Fence, Semaphore};
use ash::vk;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Epoch value published by a pool once it has been destroyed.
const POOL_DESTROYED: u64 = u64::MAX;

/// Lifecycle state of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Freshly allocated or reset.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Ended and ready to be submitted.
    Executable,
    /// Submitted and not yet observed complete.
    Pending,
    /// Unusable until its pool is reset: a completed buffer of a pool without individual
    /// reset, or a buffer whose pool is gone.
    Invalid,
}

/// Kind of render pass instance a recording buffer is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassScope {
    /// `begin_render_pass` .. `end_render_pass`.
    RenderPass,
    /// `begin_rendering` .. `end_rendering`.
    Rendering,
    /// A secondary buffer begun with `RENDER_PASS_CONTINUE`.
    Inherited,
}

/// State machine shared by [`CommandBuffer`] and [`CommandRecorder`].
#[derive(Debug, Clone)]
pub(crate) struct Lifecycle {
    state: CommandBufferState,
    individually_resettable: bool,
    pool_destroyed: bool,
    scope: Option<PassScope>,
}

impl Lifecycle {
    pub(crate) fn new(individually_resettable: bool) -> Self {
        Self {
            state: CommandBufferState::Initial,
            individually_resettable,
            pool_destroyed: false,
            scope: None,
        }
    }

    pub(crate) fn state(&self) -> CommandBufferState {
        self.state
    }

    pub(crate) fn violation(&self, operation: &'static str) -> GpuError {
        GpuError::StateViolation {
            operation,
            state: self.state,
        }
    }

    pub(crate) fn require_recording(&self, operation: &'static str) -> Result<()> {
        if self.state == CommandBufferState::Recording {
            Ok(())
        } else {
            Err(self.violation(operation))
        }
    }

    pub(crate) fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<()> {
        let implicit_reset = matches!(
            self.state,
            CommandBufferState::Executable | CommandBufferState::Invalid
        );
        let allowed = !self.pool_destroyed
            && (self.state == CommandBufferState::Initial
                || (implicit_reset && self.individually_resettable));
        if !allowed {
            return Err(self.violation("begin"));
        }
        self.state = CommandBufferState::Recording;
        self.scope = flags
            .contains(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .then_some(PassScope::Inherited);
        Ok(())
    }

    pub(crate) fn end(&mut self) -> Result<()> {
        self.require_recording("end")?;
        if matches!(self.scope, Some(PassScope::RenderPass | PassScope::Rendering)) {
            return Err(self.violation("end"));
        }
        self.state = CommandBufferState::Executable;
        self.scope = None;
        Ok(())
    }

    pub(crate) fn enter_pass(&mut self, scope: PassScope, operation: &'static str) -> Result<()> {
        self.require_recording(operation)?;
        if self.scope.is_some() {
            return Err(self.violation(operation));
        }
        self.scope = Some(scope);
        Ok(())
    }

    pub(crate) fn leave_pass(&mut self, scope: PassScope, operation: &'static str) -> Result<()> {
        self.require_recording(operation)?;
        if self.scope != Some(scope) {
            return Err(self.violation(operation));
        }
        self.scope = None;
        Ok(())
    }

    /// Draws need a render pass instance, begun here or inherited.
    pub(crate) fn require_inside_pass(&self, operation: &'static str) -> Result<()> {
        self.require_recording(operation)?;
        if self.scope.is_none() {
            return Err(self.violation(operation));
        }
        Ok(())
    }

    /// Dispatches and transfers are only valid outside a render pass instance.
    pub(crate) fn require_outside_pass(&self, operation: &'static str) -> Result<()> {
        self.require_recording(operation)?;
        if self.scope.is_some() {
            return Err(self.violation(operation));
        }
        Ok(())
    }

    pub(crate) fn require_subpass(&self, operation: &'static str) -> Result<()> {
        self.require_recording(operation)?;
        if self.scope != Some(PassScope::RenderPass) {
            return Err(self.violation(operation));
        }
        Ok(())
    }

    pub(crate) fn check_submittable(&self) -> Result<()> {
        if self.state == CommandBufferState::Executable {
            Ok(())
        } else {
            Err(self.violation("submit"))
        }
    }

    pub(crate) fn mark_pending(&mut self) {
        self.state = CommandBufferState::Pending;
    }

    pub(crate) fn complete(&mut self) {
        if self.state == CommandBufferState::Pending {
            self.state = if self.individually_resettable {
                CommandBufferState::Initial
            } else {
                CommandBufferState::Invalid
            };
        }
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        if !self.individually_resettable {
            return Err(GpuError::Unsupported(
                "command pool was not created with RESET_COMMAND_BUFFER".to_string(),
            ));
        }
        if self.pool_destroyed || self.state == CommandBufferState::Pending {
            return Err(self.violation("reset"));
        }
        self.state = CommandBufferState::Initial;
        self.scope = None;
        Ok(())
    }

    fn pool_reset(&mut self) {
        self.state = CommandBufferState::Initial;
        self.scope = None;
    }

    fn pool_destroyed(&mut self) {
        self.state = CommandBufferState::Invalid;
        self.pool_destroyed = true;
        self.scope = None;
    }
}

/// Command pool for allocating command buffers.
#[derive(Debug)]
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
    epoch: Arc<AtomicU64>,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        flags: vk::CommandPoolCreateFlags,
        queue_family: u32,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;
        tracing::debug!(?pool, queue_family, ?flags, "created command pool");

        Ok(Self {
            pool,
            queue_family,
            flags,
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get the creation flags.
    pub fn flags(&self) -> vk::CommandPoolCreateFlags {
        self.flags
    }

    /// Whether buffers from this pool may be reset one at a time.
    pub fn allows_individual_reset(&self) -> bool {
        self.flags
            .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Allocate a single command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        level: vk::CommandBufferLevel,
    ) -> Result<CommandBuffer> {
        let mut buffers = self.allocate_many(device, level, 1)?;
        buffers
            .pop()
            .ok_or_else(|| GpuError::InvalidState("driver returned no command buffer".to_string()))
    }

    /// Allocate multiple command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_many(
        &self,
        device: &ash::Device,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(count);

        let handles = device.allocate_command_buffers(&alloc_info)?;
        let epoch = self.epoch.load(Ordering::Acquire);
        Ok(handles
            .into_iter()
            .map(|buffer| CommandBuffer {
                buffer,
                pool: self.pool,
                level,
                pool_epoch: Arc::clone(&self.epoch),
                seen_epoch: epoch,
                lifecycle: Lifecycle::new(self.allows_individual_reset()),
            })
            .collect())
    }

    /// Return command buffers to the pool.
    ///
    /// Buffers of another pool are rejected, but the ones owned here are still freed. The
    /// rejected buffers are released when their own pool is reset or destroyed.
    ///
    /// # Safety
    /// The device must be valid and none of the buffers may be pending.
    pub unsafe fn free(
        &self,
        device: &ash::Device,
        buffers: impl IntoIterator<Item = CommandBuffer>,
    ) -> Result<()> {
        let (handles, foreign) = owned_handles(self.pool, buffers);
        if !handles.is_empty() {
            device.free_command_buffers(self.pool, &handles);
        }
        if foreign > 0 {
            return Err(GpuError::InvalidState(format!(
                "{foreign} command buffer(s) were allocated from a different pool"
            )));
        }
        Ok(())
    }

    /// Reset the command pool. Every buffer allocated from it returns to the initial state.
    ///
    /// # Safety
    /// The device must be valid and all command buffers from this pool must not be in use.
    pub unsafe fn reset(
        &self,
        device: &ash::Device,
        flags: vk::CommandPoolResetFlags,
    ) -> Result<()> {
        device.reset_command_pool(self.pool, flags)?;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Destroy the command pool, implicitly freeing every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(self, device: &ash::Device) {
        self.epoch.store(POOL_DESTROYED, Ordering::Release);
        device.destroy_command_pool(self.pool, None);
        tracing::debug!(pool = ?self.pool, "destroyed command pool");
    }
}

/// Split `buffers` into the handles allocated from `pool` and a count of the others.
fn owned_handles(
    pool: vk::CommandPool,
    buffers: impl IntoIterator<Item = CommandBuffer>,
) -> (Vec<vk::CommandBuffer>, usize) {
    let mut handles = Vec::new();
    let mut foreign = 0;
    for buffer in buffers {
        if buffer.pool == pool {
            handles.push(buffer.buffer);
        } else {
            foreign += 1;
        }
    }
    (handles, foreign)
}

/// A command buffer and its tracked lifecycle state.
#[derive(Debug)]
pub struct CommandBuffer {
    buffer: vk::CommandBuffer,
    pool: vk::CommandPool,
    level: vk::CommandBufferLevel,
    pool_epoch: Arc<AtomicU64>,
    seen_epoch: u64,
    lifecycle: Lifecycle,
}

impl CommandBuffer {
    /// Get the raw command buffer handle.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Get the buffer level.
    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    /// Current lifecycle state, including resets and destruction of the owning pool.
    pub fn state(&self) -> CommandBufferState {
        match self.pool_epoch.load(Ordering::Acquire) {
            epoch if epoch == self.seen_epoch => self.lifecycle.state(),
            POOL_DESTROYED => CommandBufferState::Invalid,
            _ => CommandBufferState::Initial,
        }
    }

    fn sync_with_pool(&mut self) {
        let epoch = self.pool_epoch.load(Ordering::Acquire);
        if epoch == self.seen_epoch {
            return;
        }
        self.seen_epoch = epoch;
        if epoch == POOL_DESTROYED {
            self.lifecycle.pool_destroyed();
        } else {
            self.lifecycle.pool_reset();
        }
    }

    pub(crate) fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        self.sync_with_pool();
        &mut self.lifecycle
    }

    /// Begin recording.
    ///
    /// Beginning an executable or invalid buffer implicitly resets it, which the driver only
    /// allows for pools created with `RESET_COMMAND_BUFFER`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn begin(
        &mut self,
        device: &ash::Device,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        self.begin_with_info(device, &begin_info)
    }

    /// Begin recording a secondary command buffer that inherits render pass state.
    ///
    /// # Safety
    /// The device and the inheritance handles must be valid.
    pub unsafe fn begin_with_inheritance(
        &mut self,
        device: &ash::Device,
        flags: vk::CommandBufferUsageFlags,
        inheritance: &vk::CommandBufferInheritanceInfo<'_>,
    ) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(flags)
            .inheritance_info(inheritance);
        self.begin_with_info(device, &begin_info)
    }

    /// Begin recording a buffer that will be submitted exactly once.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn begin_one_time_submit(&mut self, device: &ash::Device) -> Result<()> {
        self.begin(device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    unsafe fn begin_with_info(
        &mut self,
        device: &ash::Device,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<()> {
        let lifecycle = self.lifecycle_mut();
        let mut next = lifecycle.clone();
        next.begin(begin_info.flags)?;
        device.begin_command_buffer(self.buffer, begin_info)?;
        self.lifecycle = next;
        Ok(())
    }

    /// Finish recording.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn end(&mut self, device: &ash::Device) -> Result<()> {
        let mut next = self.lifecycle_mut().clone();
        next.end()?;
        device.end_command_buffer(self.buffer)?;
        self.lifecycle = next;
        Ok(())
    }

    /// Reset this buffer to the initial state.
    ///
    /// Fails with [`GpuError::Unsupported`] if the pool does not allow individual resets.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset(
        &mut self,
        device: &ash::Device,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<()> {
        let mut next = self.lifecycle_mut().clone();
        next.reset()?;
        device.reset_command_buffer(self.buffer, flags)?;
        self.lifecycle = next;
        Ok(())
    }

    /// Record commands into this buffer. Every recorder call fails unless the buffer is
    /// recording.
    pub fn recorder<'a>(&'a mut self, device: &'a ash::Device) -> CommandRecorder<'a> {
        CommandRecorder::new(device, self)
    }

    /// Mark a submitted buffer as finished once its fence (or a queue wait) has been observed.
    ///
    /// The buffer returns to [`CommandBufferState::Initial`] if its pool allows individual
    /// resets, and becomes [`CommandBufferState::Invalid`] until the pool is reset otherwise.
    pub fn complete(&mut self) {
        self.lifecycle_mut().complete();
    }
}

/// Semaphores a submission waits on and signals.
#[derive(Debug, Default, Clone)]
pub struct SubmitSync {
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signal_semaphores: Vec<vk::Semaphore>,
}

impl SubmitSync {
    /// Create an empty set of wait/signal semaphores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait on `semaphore` before `stage` executes.
    pub fn wait(mut self, semaphore: &Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.wait_semaphores.push(semaphore.handle());
        self.wait_stages.push(stage);
        self
    }

    /// Signal `semaphore` once the submission completes.
    pub fn signal(mut self, semaphore: &Semaphore) -> Self {
        self.signal_semaphores.push(semaphore.handle());
        self
    }
}

/// Submit command buffers to a queue. Every buffer must be executable; all of them become
/// pending until [`CommandBuffer::complete`] is called.
///
/// # Safety
/// All handles must be valid and the queue must belong to the buffers' pool family.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &mut [&mut CommandBuffer],
    sync: &SubmitSync,
    fence: Option<&Fence>,
) -> Result<()> {
    for buffer in command_buffers.iter_mut() {
        if buffer.level != vk::CommandBufferLevel::PRIMARY {
            return Err(GpuError::InvalidState(
                "secondary command buffers cannot be submitted to a queue".to_string(),
            ));
        }
        buffer.lifecycle_mut().check_submittable()?;
    }

    let handles: Vec<vk::CommandBuffer> = command_buffers.iter().map(|b| b.handle()).collect();
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(&handles)
        .wait_semaphores(&sync.wait_semaphores)
        .wait_dst_stage_mask(&sync.wait_stages)
        .signal_semaphores(&sync.signal_semaphores);

    let fence = fence.map_or(vk::Fence::null(), Fence::handle);
    device.queue_submit(queue, &[submit_info], fence)?;

    for buffer in command_buffers.iter_mut() {
        buffer.lifecycle.mark_pending();
    }
    Ok(())
}

/// Block until the queue has finished all submitted work.
///
/// # Safety
/// The device and queue must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn queue_wait_idle(device: &ash::Device, queue: vk::Queue) -> Result<()> {
    device.queue_wait_idle(queue)?;
    Ok(())
}

/// Record, submit and wait for a single-use command buffer.
///
/// # Safety
/// All handles must be valid and `queue` must belong to the pool's queue family.
pub unsafe fn execute_one_time<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(&mut CommandRecorder<'_>) -> Result<()>,
{
    let mut cmd = pool.allocate(device, vk::CommandBufferLevel::PRIMARY)?;
    let result = record_and_wait(device, &mut cmd, queue, record);
    pool.free(device, [cmd])?;
    result
}

unsafe fn record_and_wait<F>(
    device: &ash::Device,
    cmd: &mut CommandBuffer,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(&mut CommandRecorder<'_>) -> Result<()>,
{
    cmd.begin_one_time_submit(device)?;
    record(&mut cmd.recorder(device))?;
    cmd.end(device)?;

    let fence = Fence::create(device, vk::FenceCreateFlags::empty())?;
    let waited = submit(device, queue, &mut [&mut *cmd], &SubmitSync::new(), Some(&fence))
        .and_then(|()| fence.wait(device, u64::MAX));
    fence.destroy(device);

    if !waited? {
        return Err(GpuError::InvalidState(
            "one-time submission did not complete".to_string(),
        ));
    }
    cmd.complete();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn recording(resettable: bool) -> Lifecycle {
        let mut lifecycle = Lifecycle::new(resettable);
        lifecycle.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        lifecycle
    }

    fn detached_buffer(pool: u64, buffer: u64) -> CommandBuffer {
        CommandBuffer {
            buffer: vk::CommandBuffer::from_raw(buffer),
            pool: vk::CommandPool::from_raw(pool),
            level: vk::CommandBufferLevel::PRIMARY,
            pool_epoch: Arc::new(AtomicU64::new(0)),
            seen_epoch: 0,
            lifecycle: Lifecycle::new(true),
        }
    }

    #[test]
    fn foreign_buffers_do_not_hold_back_owned_ones() {
        let pool = vk::CommandPool::from_raw(1);
        let buffers = [
            detached_buffer(1, 10),
            detached_buffer(2, 20),
            detached_buffer(1, 11),
        ];
        let (handles, foreign) = owned_handles(pool, buffers);
        assert_eq!(
            handles,
            [vk::CommandBuffer::from_raw(10), vk::CommandBuffer::from_raw(11)]
        );
        assert_eq!(foreign, 1);
    }

    #[test]
    fn completed_buffer_returns_to_initial_when_resettable() {
        let mut lifecycle = recording(true);
        lifecycle.end().unwrap();
        lifecycle.check_submittable().unwrap();
        lifecycle.mark_pending();
        assert_eq!(lifecycle.state(), CommandBufferState::Pending);
        lifecycle.complete();
        assert_eq!(lifecycle.state(), CommandBufferState::Initial);
        assert!(lifecycle.check_submittable().is_err());
        lifecycle.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
    }

    #[test]
    fn completed_buffer_stays_invalid_until_pool_reset() {
        let mut lifecycle = Lifecycle::new(false);
        lifecycle
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        lifecycle.end().unwrap();
        lifecycle.mark_pending();
        lifecycle.complete();
        assert_eq!(lifecycle.state(), CommandBufferState::Invalid);
        assert!(lifecycle.begin(vk::CommandBufferUsageFlags::empty()).is_err());
        assert!(lifecycle.check_submittable().is_err());

        lifecycle.pool_reset();
        assert_eq!(lifecycle.state(), CommandBufferState::Initial);
        lifecycle.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
    }

    #[test]
    fn recording_required_outside_recording() {
        let lifecycle = Lifecycle::new(true);
        let err = lifecycle.require_recording("draw").unwrap_err();
        assert!(matches!(
            err,
            GpuError::StateViolation {
                operation: "draw",
                state: CommandBufferState::Initial
            }
        ));
    }

    #[test]
    fn end_requires_closed_render_pass() {
        let mut lifecycle = recording(false);
        lifecycle.enter_pass(PassScope::RenderPass, "begin_render_pass").unwrap();
        assert!(lifecycle.enter_pass(PassScope::RenderPass, "begin_render_pass").is_err());
        assert!(lifecycle.enter_pass(PassScope::Rendering, "begin_rendering").is_err());
        assert!(lifecycle.end().is_err());
        assert!(lifecycle.leave_pass(PassScope::Rendering, "end_rendering").is_err());
        lifecycle.leave_pass(PassScope::RenderPass, "end_render_pass").unwrap();
        assert!(lifecycle.leave_pass(PassScope::RenderPass, "end_render_pass").is_err());
        lifecycle.end().unwrap();
    }

    #[test]
    fn draws_need_a_pass_and_transfers_forbid_one() {
        let mut lifecycle = recording(false);
        assert!(lifecycle.require_inside_pass("draw").is_err());
        assert!(lifecycle.require_subpass("next_subpass").is_err());
        lifecycle.require_outside_pass("dispatch").unwrap();

        lifecycle.enter_pass(PassScope::Rendering, "begin_rendering").unwrap();
        lifecycle.require_inside_pass("draw").unwrap();
        assert!(lifecycle.require_subpass("next_subpass").is_err());
        assert!(lifecycle.require_outside_pass("copy_buffer").is_err());
        lifecycle.leave_pass(PassScope::Rendering, "end_rendering").unwrap();

        lifecycle.enter_pass(PassScope::RenderPass, "begin_render_pass").unwrap();
        lifecycle.require_subpass("next_subpass").unwrap();
        lifecycle.require_inside_pass("draw_indexed").unwrap();
        assert!(lifecycle.require_outside_pass("dispatch").is_err());
    }

    #[test]
    fn continued_secondary_inherits_the_pass() {
        let mut lifecycle = Lifecycle::new(false);
        lifecycle
            .begin(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .unwrap();
        lifecycle.require_inside_pass("draw").unwrap();
        assert!(lifecycle.require_subpass("next_subpass").is_err());
        assert!(lifecycle.enter_pass(PassScope::RenderPass, "begin_render_pass").is_err());
        assert!(lifecycle.leave_pass(PassScope::RenderPass, "end_render_pass").is_err());
        lifecycle.end().unwrap();
    }

    #[test]
    fn rebegin_needs_individual_reset() {
        let mut lifecycle = recording(false);
        lifecycle.end().unwrap();
        assert!(lifecycle.begin(vk::CommandBufferUsageFlags::empty()).is_err());

        let mut lifecycle = recording(true);
        lifecycle.end().unwrap();
        lifecycle.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        assert_eq!(lifecycle.state(), CommandBufferState::Recording);
    }

    #[test]
    fn reset_without_capability_is_unsupported() {
        let mut lifecycle = recording(false);
        let err = lifecycle.reset().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }

    #[test]
    fn pending_buffer_cannot_be_reset_or_begun() {
        let mut lifecycle = recording(true);
        lifecycle.end().unwrap();
        lifecycle.mark_pending();
        assert!(lifecycle.reset().is_err());
        assert!(lifecycle.begin(vk::CommandBufferUsageFlags::empty()).is_err());
        assert!(lifecycle.check_submittable().is_err());
    }

    #[test]
    fn pool_events_override_buffer_state() {
        let mut lifecycle = recording(false);
        lifecycle.end().unwrap();
        lifecycle.pool_reset();
        assert_eq!(lifecycle.state(), CommandBufferState::Initial);
        lifecycle.begin(vk::CommandBufferUsageFlags::empty()).unwrap();

        lifecycle.pool_destroyed();
        assert_eq!(lifecycle.state(), CommandBufferState::Invalid);
        assert!(lifecycle.begin(vk::CommandBufferUsageFlags::empty()).is_err());
        assert!(lifecycle.require_recording("dispatch").is_err());
    }
}
