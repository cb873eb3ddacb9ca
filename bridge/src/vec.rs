//! Non-owning byte-span views over host-supplied buffers.
//!
//! The managed side passes identifiers (module names, field names, trap
//! messages) as a `(pointer, length)` pair whose storage it keeps pinned for
//! the duration of the call. Nothing here copies or retains the bytes.

use core::{marker::PhantomData, slice, str};

use crate::{Error, Result};

/// Length-prefixed view over borrowed bytes, laid out like the engine's
/// `wasm_byte_vec_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ByteVec<'a> {
    pub size: usize,
    pub data: *const u8,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> ByteVec<'a> {
    /// Reinterprets `(ptr, len)` as a vector view.
    ///
    /// # Safety
    ///
    /// When `len > 0`, `ptr..ptr + len` must be readable and stay unmoved for
    /// `'a`. A zero length accepts any pointer, null included.
    pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Self {
        Self {
            size: len,
            data: ptr,
            _borrow: PhantomData,
        }
    }

    /// Builds a view over a Rust slice.
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        Self {
            size: bytes.len(),
            data: bytes.as_ptr(),
            _borrow: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The viewed bytes, exactly `size` of them.
    pub fn as_bytes(&self) -> &'a [u8] {
        if self.size == 0 {
            return &[];
        }
        // SAFETY: non-empty views were built from a readable region of
        // `size` bytes that outlives `'a`.
        unsafe { slice::from_raw_parts(self.data, self.size) }
    }

    /// The viewed bytes as UTF-8, which is how the engine keys its namespace.
    pub fn as_str(&self) -> Result<&'a str> {
        str::from_utf8(self.as_bytes()).map_err(|_| Error::NameNotUtf8)
    }
}

/// Shorthand for the shims: view `(ptr, len)` and decode it as a name.
///
/// # Safety
///
/// Same contract as [`ByteVec::from_raw_parts`].
pub(crate) unsafe fn name<'a>(ptr: *const u8, len: usize) -> Result<&'a str> {
    ByteVec::from_raw_parts(ptr, len).as_str()
}
