//! Linear memory handles.
//!
//! A memory is usable from the store that owns it, or from inside a host
//! callback through the `bridge_caller_memory_*` variants in `caller`.

use wasmtime::{AsContext, AsContextMut, Memory};

use crate::{engine::BridgeStore, module::BridgeExtern, trap::BridgeError, Error, Result};

pub struct BridgeMemory {
    pub(crate) memory: Memory,
}

impl BridgeMemory {
    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    /// Base of the memory. Invalidated by growth.
    pub fn data_ptr(&self, ctx: impl AsContext) -> *mut u8 {
        self.memory.data_ptr(ctx)
    }

    /// Size in bytes.
    pub fn data_size(&self, ctx: impl AsContext) -> usize {
        self.memory.data_size(ctx)
    }

    /// Size in wasm pages.
    pub fn pages(&self, ctx: impl AsContext) -> u64 {
        self.memory.size(ctx)
    }

    /// Grows by `delta` pages and returns the previous size in pages.
    pub fn grow(&self, ctx: impl AsContextMut, delta: u64) -> Result<u64> {
        Ok(self.memory.grow(ctx, delta)?)
    }
}

impl TryFrom<&BridgeExtern> for BridgeMemory {
    type Error = Error;

    fn try_from(ext: &BridgeExtern) -> Result<Self> {
        ext.ext
            .clone()
            .into_memory()
            .map(BridgeMemory::new)
            .ok_or(Error::WrongExtern("memory"))
    }
}

/// Shared body of the grow entry points.
pub(crate) unsafe fn grow_raw(
    ctx: impl AsContextMut,
    memory: &BridgeMemory,
    delta: u64,
    prev_out: *mut u64,
) -> Option<Box<BridgeError>> {
    match memory.grow(ctx, delta) {
        Ok(prev) => {
            prev_out.write(prev);
            None
        }
        Err(err) => Some(Box::new(err.into())),
    }
}

/// Null when the extern is not a memory.
#[no_mangle]
pub extern "C" fn bridge_extern_as_memory(ext: &BridgeExtern) -> Option<Box<BridgeMemory>> {
    BridgeMemory::try_from(ext).ok().map(Box::new)
}

#[no_mangle]
pub extern "C" fn bridge_memory_as_extern(memory: &BridgeMemory) -> Box<BridgeExtern> {
    Box::new(BridgeExtern::new(memory.memory.into()))
}

/// # Safety
///
/// `memory` must belong to `store`.
#[no_mangle]
pub unsafe extern "C" fn bridge_memory_data(store: &BridgeStore, memory: &BridgeMemory) -> *mut u8 {
    memory.data_ptr(&store.store)
}

/// # Safety
///
/// `memory` must belong to `store`.
#[no_mangle]
pub unsafe extern "C" fn bridge_memory_data_size(
    store: &BridgeStore,
    memory: &BridgeMemory,
) -> usize {
    memory.data_size(&store.store)
}

/// # Safety
///
/// `memory` must belong to `store`.
#[no_mangle]
pub unsafe extern "C" fn bridge_memory_size(store: &BridgeStore, memory: &BridgeMemory) -> u64 {
    memory.pages(&store.store)
}

/// Grows `memory` by `delta` pages, writing the previous page count to
/// `prev_out` on success.
///
/// # Safety
///
/// `memory` must belong to `store`, `prev_out` must be writable, and no call
/// into `store` may be in flight.
#[no_mangle]
pub unsafe extern "C" fn bridge_memory_grow(
    store: &mut BridgeStore,
    memory: &BridgeMemory,
    delta: u64,
    prev_out: *mut u64,
) -> Option<Box<BridgeError>> {
    grow_raw(&mut store.store, memory, delta, prev_out)
}

#[no_mangle]
pub extern "C" fn bridge_memory_delete(_memory: Box<BridgeMemory>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{bridge_engine_new, bridge_store_new},
        module::bridge_instance_export_get,
        testing,
    };

    const WAT: &str = r#"
        (module
          (memory (export "mem") 1 3)
          (data (i32.const 8) "hi")
          (func (export "f")))
    "#;

    fn export(
        store: &mut BridgeStore,
        instance: &crate::BridgeInstance,
        name: &str,
    ) -> Box<BridgeExtern> {
        unsafe { bridge_instance_export_get(store, instance, name.as_ptr(), name.len()) }.unwrap()
    }

    #[test]
    fn data_and_size() {
        let engine = bridge_engine_new();
        let mut store = bridge_store_new(&engine, &testing::entry_points()).unwrap();
        let module = testing::compile(&engine, WAT);
        let instance = testing::instantiate(&mut store, &module, &[]);

        let mem = bridge_extern_as_memory(&export(&mut store, &instance, "mem")).unwrap();
        assert!(bridge_extern_as_memory(&export(&mut store, &instance, "f")).is_none());

        let (base, len) = unsafe {
            (
                bridge_memory_data(&store, &mem),
                bridge_memory_data_size(&store, &mem),
            )
        };
        assert_eq!(len, 65536);
        assert_eq!(unsafe { bridge_memory_size(&store, &mem) }, 1);
        let bytes = unsafe { core::slice::from_raw_parts(base, len) };
        assert_eq!(&bytes[8..10], b"hi");
    }

    #[test]
    fn grow_respects_the_maximum() {
        let engine = bridge_engine_new();
        let mut store = bridge_store_new(&engine, &testing::entry_points()).unwrap();
        let module = testing::compile(&engine, WAT);
        let instance = testing::instantiate(&mut store, &module, &[]);
        let mem = bridge_extern_as_memory(&export(&mut store, &instance, "mem")).unwrap();

        let mut prev = 0;
        assert!(unsafe { bridge_memory_grow(&mut store, &mem, 2, &mut prev) }.is_none());
        assert_eq!(prev, 1);
        assert_eq!(unsafe { bridge_memory_size(&store, &mem) }, 3);
        assert_eq!(unsafe { bridge_memory_data_size(&store, &mem) }, 3 * 65536);

        let err = unsafe { bridge_memory_grow(&mut store, &mem, 1, &mut prev) };
        assert!(err.is_some());
        assert_eq!(prev, 1);
    }
}
