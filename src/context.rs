//! Device session abstraction.
//!
//! This module defines the interface the loader consumes from the device
//! side: an open session ([`DeviceContext`]) that owns a device-memory
//! allocator and a host-to-device copy engine. The loader performs no device
//! access of its own; everything it does to the device goes through this
//! trait, which keeps the crate portable across driver backends and makes
//! the load pipeline testable against a mock session.

use crate::Result;

/// An address in device memory.
pub type DevicePtr = u64;

/// An open device session under which modules are loaded.
///
/// All methods are blocking. The loader issues them strictly sequentially
/// within a single load or unload call and performs no internal locking;
/// callers that share one context across threads must ensure the
/// implementation itself is concurrency-safe, and must serialize load/unload
/// pairs against a single module.
///
/// A context must outlive every module loaded against it: using a module's
/// device addresses after the session is torn down is undefined and is the
/// caller's obligation to prevent.
pub trait DeviceContext {
    /// Returns the architecture tag of the device behind this session.
    ///
    /// Only the low byte identifies the chipset generation; the loader masks
    /// the tag accordingly when gating a binary against the device.
    fn arch_tag(&self) -> u32;

    /// Allocates `size` bytes of device memory and returns its address.
    ///
    /// Implementations report exhaustion as [`Error::DeviceOutOfMemory`] and
    /// may surface [`Error::NotInitialized`] or [`Error::InvalidContext`]
    /// when the session is not usable. The loader never requests a
    /// zero-sized allocation.
    ///
    /// [`Error::DeviceOutOfMemory`]: crate::Error::DeviceOutOfMemory
    /// [`Error::NotInitialized`]: crate::Error::NotInitialized
    /// [`Error::InvalidContext`]: crate::Error::InvalidContext
    fn alloc(&self, size: u64) -> Result<DevicePtr>;

    /// Releases a device allocation previously returned by [`alloc`].
    ///
    /// [`alloc`]: DeviceContext::alloc
    fn free(&self, addr: DevicePtr) -> Result<()>;

    /// Copies `bytes` from host memory to device memory at `dst`.
    fn copy_to_device(&self, dst: DevicePtr, bytes: &[u8]) -> Result<()>;
}

/// RAII guard over a single device allocation.
///
/// Each pipeline stage that acquires device memory holds one of these; if a
/// later stage fails, the guards release their allocations on drop in
/// reverse declaration order, which is exactly the reverse of acquisition
/// order. Committing a module disarms the guards with [`into_raw`], after
/// which the `Module` owns the addresses and the unloader releases them.
///
/// [`into_raw`]: DeviceAlloc::into_raw
pub(crate) struct DeviceAlloc<'ctx, C: DeviceContext> {
    ctx: &'ctx C,
    addr: DevicePtr,
    armed: bool,
}

impl<'ctx, C: DeviceContext> DeviceAlloc<'ctx, C> {
    /// Requests `size` bytes from the context's allocator.
    pub(crate) fn new(ctx: &'ctx C, size: u64) -> Result<Self> {
        debug_assert!(size > 0);
        let addr = ctx.alloc(size)?;
        Ok(Self {
            ctx,
            addr,
            armed: true,
        })
    }

    /// Returns the device address of this allocation.
    #[inline]
    pub(crate) fn addr(&self) -> DevicePtr {
        self.addr
    }

    /// Disarms the guard and hands the raw address to the caller, which
    /// becomes responsible for releasing it.
    #[inline]
    pub(crate) fn into_raw(mut self) -> DevicePtr {
        self.armed = false;
        self.addr
    }
}

impl<C: DeviceContext> Drop for DeviceAlloc<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Rollback path. A failed release here cannot preempt the error
        // already propagating, so it is reported through the log facade only.
        if self.ctx.free(self.addr).is_err() {
            #[cfg(feature = "log")]
            log::warn!(
                "failed to release device allocation 0x{:x} during rollback",
                self.addr
            );
        }
    }
}
