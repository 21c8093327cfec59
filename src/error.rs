//! Error types reported by the module loader.
//!
//! Every failure surfaced by this crate is one of the variants below. Loader
//! failures are reported only after the rollback path has released every
//! device resource acquired by the failed load attempt.

use alloc::string::String;
use core::fmt;

/// The error type used throughout this crate.
#[derive(Debug)]
pub enum Error {
    /// The driver or session backing the context is not ready.
    ///
    /// This variant is never constructed by the loader itself; a
    /// [`DeviceContext`](crate::DeviceContext) implementation surfaces it
    /// when it is asked to operate before driver initialization.
    NotInitialized,
    /// A required input was empty or otherwise unusable.
    InvalidArgument {
        /// Description of the rejected input.
        msg: String,
    },
    /// The device session behind a context handle is no longer active.
    ///
    /// Like [`Error::NotInitialized`], this originates from the
    /// [`DeviceContext`](crate::DeviceContext) collaborator.
    InvalidContext,
    /// The binary container could not be parsed, or its contents are
    /// internally inconsistent.
    MalformedBinary {
        /// Description of the defect found in the container.
        msg: String,
    },
    /// The binary was compiled for a different chipset than the one the
    /// context is bound to.
    IncompatibleArchitecture {
        /// Architecture tag of the device behind the context.
        expected: u32,
        /// Architecture tag declared by the binary image.
        found: u32,
    },
    /// The device-memory allocator could not satisfy a request.
    DeviceOutOfMemory {
        /// Size in bytes of the failed request.
        size: u64,
    },
    /// The host-side staging buffer could not be allocated.
    HostOutOfMemory {
        /// Size in bytes of the failed request.
        size: u64,
    },
    /// The bulk copy of the assembled code image onto the device failed.
    DeviceTransferFailed {
        /// Description of the underlying transfer failure.
        msg: String,
    },
    /// No kernel or global with the requested name exists, or a descriptor
    /// referenced an offset outside its segment during layout resolution.
    NotFound {
        /// The name that failed to resolve.
        name: String,
    },
    /// The requested surface exists in the driver API but is deliberately
    /// unsupported by this loader.
    Unimplemented {
        /// The unsupported surface.
        what: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInitialized => write!(f, "driver not initialized"),
            Error::InvalidArgument { msg } => write!(f, "invalid argument: {msg}"),
            Error::InvalidContext => write!(f, "no active device session"),
            Error::MalformedBinary { msg } => write!(f, "malformed binary: {msg}"),
            Error::IncompatibleArchitecture { expected, found } => write!(
                f,
                "incompatible architecture: device is 0x{expected:x}, binary targets 0x{found:x}"
            ),
            Error::DeviceOutOfMemory { size } => {
                write!(f, "device out of memory allocating {size} bytes")
            }
            Error::HostOutOfMemory { size } => {
                write!(f, "host out of memory allocating {size} bytes")
            }
            Error::DeviceTransferFailed { msg } => write!(f, "device transfer failed: {msg}"),
            Error::NotFound { name } => write!(f, "not found: {name}"),
            Error::Unimplemented { what } => write!(f, "unimplemented: {what}"),
        }
    }
}

impl core::error::Error for Error {}

#[cold]
pub(crate) fn invalid_argument(msg: impl Into<String>) -> Error {
    Error::InvalidArgument { msg: msg.into() }
}

#[cold]
pub(crate) fn malformed_error(msg: impl Into<String>) -> Error {
    Error::MalformedBinary { msg: msg.into() }
}

#[cold]
pub(crate) fn arch_error(expected: u32, found: u32) -> Error {
    Error::IncompatibleArchitecture { expected, found }
}

#[cold]
pub(crate) fn host_oom_error(size: u64) -> Error {
    Error::HostOutOfMemory { size }
}

#[cold]
pub(crate) fn transfer_error(msg: impl Into<String>) -> Error {
    Error::DeviceTransferFailed { msg: msg.into() }
}

#[cold]
pub(crate) fn not_found_error(name: impl Into<String>) -> Error {
    Error::NotFound { name: name.into() }
}

#[cold]
pub(crate) fn unimplemented_error(what: &'static str) -> Error {
    Error::Unimplemented { what }
}
