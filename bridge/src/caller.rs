//! Calling context handed to host callbacks.
//!
//! A [`BridgeCaller`] only exists on the trampoline's stack frame, so the
//! functions here are valid only while the callback that received it is
//! running.

use wasmtime::Caller;

use crate::{
    engine::StoreData,
    func::{self, BridgeFunc},
    global::{self, BridgeGlobal},
    memory::{self, BridgeMemory},
    module::BridgeExtern,
    trap::{BridgeError, BridgeTrap},
    val::RawVal,
    vec,
};

pub struct BridgeCaller<'a> {
    pub(crate) caller: Caller<'a, StoreData>,
}

impl<'a> BridgeCaller<'a> {
    pub(crate) fn new(caller: Caller<'a, StoreData>) -> Self {
        Self { caller }
    }

    /// Export of the instance that made the current call.
    pub fn export(&mut self, name: &str) -> Option<BridgeExtern> {
        self.caller.get_export(name).map(BridgeExtern::new)
    }

    pub fn caller_mut(&mut self) -> &mut Caller<'a, StoreData> {
        &mut self.caller
    }
}

/// Resolves `name` among the exports of the calling instance. Null when no
/// such export exists or the name is not UTF-8.
///
/// # Safety
///
/// `name_ptr..name_ptr + name_len` must be readable.
#[no_mangle]
pub unsafe extern "C" fn bridge_caller_export_get(
    caller: &mut BridgeCaller<'_>,
    name_ptr: *const u8,
    name_len: usize,
) -> Option<Box<BridgeExtern>> {
    let name = match vec::name(name_ptr, name_len) {
        Ok(name) => name,
        Err(err) => {
            tracing::debug!("export lookup: {err}");
            return None;
        }
    };
    caller.export(name).map(Box::new)
}

/// Calls `func` from inside a callback, re-entering the calling instance.
/// Same contract as `bridge_func_call`.
///
/// # Safety
///
/// `args`/`results` must point to `nargs`/`nresults` values and `trap_out`
/// must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_caller_func_call(
    caller: &mut BridgeCaller<'_>,
    func: &BridgeFunc,
    args: *const RawVal,
    nargs: usize,
    results: *mut RawVal,
    nresults: usize,
    trap_out: *mut Option<Box<BridgeTrap>>,
) -> Option<Box<BridgeError>> {
    func::call_raw(
        &mut caller.caller,
        func,
        args,
        nargs,
        results,
        nresults,
        trap_out,
    )
}

/// Base of `memory` as seen from inside a callback.
///
/// # Safety
///
/// `memory` must belong to the caller's store.
#[no_mangle]
pub unsafe extern "C" fn bridge_caller_memory_data(
    caller: &BridgeCaller<'_>,
    memory: &BridgeMemory,
) -> *mut u8 {
    memory.data_ptr(&caller.caller)
}

/// # Safety
///
/// `memory` must belong to the caller's store.
#[no_mangle]
pub unsafe extern "C" fn bridge_caller_memory_data_size(
    caller: &BridgeCaller<'_>,
    memory: &BridgeMemory,
) -> usize {
    memory.data_size(&caller.caller)
}

/// Same contract as `bridge_memory_grow`. Pointers taken before the call are
/// stale afterwards.
///
/// # Safety
///
/// `memory` must belong to the caller's store and `prev_out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_caller_memory_grow(
    caller: &mut BridgeCaller<'_>,
    memory: &BridgeMemory,
    delta: u64,
    prev_out: *mut u64,
) -> Option<Box<BridgeError>> {
    memory::grow_raw(&mut caller.caller, memory, delta, prev_out)
}

/// # Safety
///
/// `global` must belong to the caller's store and `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_caller_global_get(
    caller: &mut BridgeCaller<'_>,
    global: &BridgeGlobal,
    out: *mut RawVal,
) -> bool {
    global::get_raw(&mut caller.caller, global, out)
}

/// # Safety
///
/// `global` must belong to the caller's store.
#[no_mangle]
pub unsafe extern "C" fn bridge_caller_global_set(
    caller: &mut BridgeCaller<'_>,
    global: &BridgeGlobal,
    val: &RawVal,
) -> Option<Box<BridgeError>> {
    global::set_raw(&mut caller.caller, global, val)
}
