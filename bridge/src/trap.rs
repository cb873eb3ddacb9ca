//! Traps and errors handed across the boundary.
//!
//! A [`BridgeTrap`] ends guest execution; a [`BridgeError`] reports a failure
//! that happened before any guest code ran (compilation, marshaling, ...).
//! Both are boxed and owned by whoever holds the pointer.

use thiserror::Error;
use wasmtime::{FrameInfo, Trap, WasmBacktrace};

use crate::vec;

/// Failure raised on the host side of a host-function call.
///
/// `fatal` marks faults of the bridge itself (an entry point that unwound,
/// results of the wrong shape) as opposed to traps the callback asked for.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HostTrap {
    pub message: String,
    pub fatal: bool,
}

impl HostTrap {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Boxed trap handle.
pub struct BridgeTrap {
    error: anyhow::Error,
    message: String,
}

impl BridgeTrap {
    pub fn new(trap: HostTrap) -> Self {
        Self::from_error(trap.into())
    }

    /// Wraps an execution failure coming back from the engine.
    pub fn from_error(error: anyhow::Error) -> Self {
        let message = if let Some(host) = error.downcast_ref::<HostTrap>() {
            host.message.clone()
        } else if let Some(trap) = error.downcast_ref::<Trap>() {
            trap.to_string()
        } else {
            format!("{error:#}")
        };
        Self { error, message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.error
            .downcast_ref::<HostTrap>()
            .is_some_and(|host| host.fatal)
    }

    /// The wasm trap code, when the guest itself trapped.
    pub fn code(&self) -> Option<u8> {
        self.error.downcast_ref::<Trap>().and_then(|trap| trap_code(*trap))
    }

    /// Wasm frames active when the trap was raised, innermost first. Empty for
    /// traps that never passed through the engine.
    pub fn frames(&self) -> &[FrameInfo] {
        self.error
            .downcast_ref::<WasmBacktrace>()
            .map_or(&[], |trace| trace.frames())
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub(crate) fn into_error(self) -> anyhow::Error {
        self.error
    }
}

impl core::fmt::Debug for BridgeTrap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BridgeTrap")
            .field("message", &self.message)
            .field("fatal", &self.is_fatal())
            .finish()
    }
}

/// Codes in the order the host bindings expose them.
fn trap_code(trap: Trap) -> Option<u8> {
    let code = match trap {
        Trap::StackOverflow => 0,
        Trap::MemoryOutOfBounds => 1,
        Trap::HeapMisaligned => 2,
        Trap::TableOutOfBounds => 3,
        Trap::IndirectCallToNull => 4,
        Trap::BadSignature => 5,
        Trap::IntegerOverflow => 6,
        Trap::IntegerDivisionByZero => 7,
        Trap::BadConversionToInteger => 8,
        Trap::UnreachableCodeReached => 9,
        Trap::Interrupt => 10,
        Trap::OutOfFuel => 11,
        _ => return None,
    };
    Some(code)
}

/// Boxed error handle.
#[derive(Debug)]
pub struct BridgeError {
    message: String,
}

impl BridgeError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<crate::Error> for BridgeError {
    fn from(err: crate::Error) -> Self {
        let message = match &err {
            crate::Error::Engine(inner) => format!("{inner:#}"),
            other => other.to_string(),
        };
        Self { message }
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        crate::Error::Engine(err).into()
    }
}

/// Creates an application trap carrying the given message.
///
/// # Safety
///
/// `msg_ptr..msg_ptr + msg_len` must be readable for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn bridge_trap_new(msg_ptr: *const u8, msg_len: usize) -> Box<BridgeTrap> {
    let bytes = vec::ByteVec::from_raw_parts(msg_ptr, msg_len).as_bytes();
    let message = String::from_utf8_lossy(bytes).into_owned();
    Box::new(BridgeTrap::new(HostTrap::new(message)))
}

/// Points `out_ptr`/`out_len` at the trap's message; valid while the trap is.
///
/// # Safety
///
/// Both out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_trap_message(
    trap: &BridgeTrap,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) {
    *out_ptr = trap.message().as_ptr();
    *out_len = trap.message().len();
}

#[no_mangle]
pub extern "C" fn bridge_trap_is_fatal(trap: &BridgeTrap) -> bool {
    trap.is_fatal()
}

/// Writes the wasm trap code and returns true, or returns false for traps
/// raised by the host.
///
/// # Safety
///
/// `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_trap_code(trap: &BridgeTrap, out: *mut u8) -> bool {
    match trap.code() {
        Some(code) => {
            *out = code;
            true
        }
        None => false,
    }
}

#[no_mangle]
pub extern "C" fn bridge_trap_frames_len(trap: &BridgeTrap) -> usize {
    trap.frames().len()
}

/// Writes the function index of frame `index`. False when out of range.
///
/// # Safety
///
/// `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_trap_frame_func_index(
    trap: &BridgeTrap,
    index: usize,
    out: *mut u32,
) -> bool {
    match trap.frames().get(index) {
        Some(frame) => {
            out.write(frame.func_index());
            true
        }
        None => false,
    }
}

/// Points `out_ptr`/`out_len` at the name of frame `index`'s function. False
/// when out of range or when the module carries no name for it.
///
/// # Safety
///
/// Both out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_trap_frame_func_name(
    trap: &BridgeTrap,
    index: usize,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) -> bool {
    let Some(name) = trap.frames().get(index).and_then(FrameInfo::func_name) else {
        return false;
    };
    out_ptr.write(name.as_ptr());
    out_len.write(name.len());
    true
}

/// Like `bridge_trap_frame_func_name`, for the name of the frame's module.
///
/// # Safety
///
/// Both out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_trap_frame_module_name(
    trap: &BridgeTrap,
    index: usize,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) -> bool {
    let Some(name) = trap.frames().get(index).and_then(|frame| frame.module().name()) else {
        return false;
    };
    out_ptr.write(name.as_ptr());
    out_len.write(name.len());
    true
}

#[no_mangle]
pub extern "C" fn bridge_trap_delete(_trap: Box<BridgeTrap>) {}

/// Points `out_ptr`/`out_len` at the error's message; valid while the error is.
///
/// # Safety
///
/// Both out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_error_message(
    error: &BridgeError,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) {
    *out_ptr = error.message().as_ptr();
    *out_len = error.message().len();
}

#[no_mangle]
pub extern "C" fn bridge_error_delete(_error: Box<BridgeError>) {}
