//! Name-based binding of functions, items and whole instances.
//!
//! A linker is bound to the store it was created for, which must outlive it.
//! Define results are the engine's verdict reported as-is: `false` means the
//! engine refused the definition (a duplicate without shadowing, an item from
//! another store, ...).

use core::ptr::NonNull;

use wasmtime::Linker;

use crate::{
    engine::{BridgeStore, StoreData},
    module::{BridgeExtern, BridgeInstance, BridgeModule},
    trap::BridgeError,
    vec, Result,
};

pub struct BridgeLinker {
    linker: Linker<StoreData>,
    // SAFETY: the store outlives the linker and is not otherwise borrowed
    // while a linker operation runs; in particular no call into it is in
    // flight, since the running call holds the store.
    store: NonNull<BridgeStore>,
}

impl BridgeLinker {
    pub fn new(store: &mut BridgeStore) -> Self {
        Self {
            linker: Linker::new(store.store.engine()),
            store: NonNull::from(store),
        }
    }

    pub fn allow_shadowing(&mut self, allow: bool) {
        self.linker.allow_shadowing(allow);
    }

    pub fn define(&mut self, module: &str, name: &str, item: &BridgeExtern) -> Result<()> {
        let store = unsafe { self.store.as_ref() };
        self.linker
            .define(&store.store, module, name, item.ext.clone())?;
        Ok(())
    }

    pub fn define_instance(&mut self, name: &str, instance: &BridgeInstance) -> Result<()> {
        let store = unsafe { self.store.as_mut() };
        self.linker
            .instance(&mut store.store, name, instance.instance)?;
        Ok(())
    }

    pub fn instantiate(&mut self, module: &BridgeModule) -> Result<BridgeInstance> {
        let store = unsafe { self.store.as_mut() };
        let instance = self.linker.instantiate(&mut store.store, &module.module)?;
        Ok(BridgeInstance { instance })
    }

    pub fn get(&mut self, module: &str, name: &str) -> Option<BridgeExtern> {
        let store = unsafe { self.store.as_mut() };
        self.linker
            .get(&mut store.store, module, name)
            .map(BridgeExtern::new)
    }
}

fn report(what: &str, module: &str, name: &str, outcome: Result<()>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(module, name, "{what} rejected: {err}");
            false
        }
    }
}

/// Creates a linker bound to `store`. The store must outlive the linker, and
/// like every handle of that store it must be used by one thread at a time.
#[no_mangle]
pub extern "C" fn bridge_linker_new(store: &mut BridgeStore) -> Box<BridgeLinker> {
    Box::new(BridgeLinker::new(store))
}

#[no_mangle]
pub extern "C" fn bridge_linker_allow_shadowing(linker: &mut BridgeLinker, allow: bool) {
    linker.allow_shadowing(allow);
}

/// Registers `item` under `(module, name)`.
///
/// # Safety
///
/// Both byte spans must be readable for the duration of the call. No call
/// into the linker's store may be in flight.
#[no_mangle]
pub unsafe extern "C" fn bridge_linker_define(
    linker: &mut BridgeLinker,
    module_ptr: *const u8,
    module_len: usize,
    name_ptr: *const u8,
    name_len: usize,
    item: &BridgeExtern,
) -> bool {
    let (module, name) = match (
        vec::name(module_ptr, module_len),
        vec::name(name_ptr, name_len),
    ) {
        (Ok(module), Ok(name)) => (module, name),
        (Err(err), _) | (_, Err(err)) => {
            tracing::debug!("define rejected: {err}");
            return false;
        }
    };
    report("define", module, name, linker.define(module, name, item))
}

/// Registers every export of `instance` under the module name `name`.
///
/// # Safety
///
/// The byte span must be readable for the duration of the call. No call into
/// the linker's store may be in flight.
#[no_mangle]
pub unsafe extern "C" fn bridge_linker_define_instance(
    linker: &mut BridgeLinker,
    name_ptr: *const u8,
    name_len: usize,
    instance: &BridgeInstance,
) -> bool {
    let name = match vec::name(name_ptr, name_len) {
        Ok(name) => name,
        Err(err) => {
            tracing::debug!("define_instance rejected: {err}");
            return false;
        }
    };
    report(
        "define_instance",
        name,
        "*",
        linker.define_instance(name, instance),
    )
}

/// Instantiates `module` with imports resolved through the linker.
///
/// # Safety
///
/// `out` must be writable. Must not be called while a call into the linker's
/// store is in flight, such as from inside a host callback: the running call
/// already holds the store. Callbacks reach their instance through
/// `bridge_caller_export_get` and `bridge_caller_func_call` instead.
#[no_mangle]
pub unsafe extern "C" fn bridge_linker_instantiate(
    linker: &mut BridgeLinker,
    module: &BridgeModule,
    out: *mut Option<Box<BridgeInstance>>,
) -> Option<Box<BridgeError>> {
    match linker.instantiate(module) {
        Ok(instance) => {
            out.write(Some(Box::new(instance)));
            None
        }
        Err(err) => {
            out.write(None);
            Some(Box::new(err.into()))
        }
    }
}

/// Looks up a definition; null when `(module, name)` is not defined.
///
/// # Safety
///
/// Both byte spans must be readable for the duration of the call. Same
/// restriction on in-flight calls as `bridge_linker_instantiate`.
#[no_mangle]
pub unsafe extern "C" fn bridge_linker_get(
    linker: &mut BridgeLinker,
    module_ptr: *const u8,
    module_len: usize,
    name_ptr: *const u8,
    name_len: usize,
) -> Option<Box<BridgeExtern>> {
    let module = vec::name(module_ptr, module_len).ok()?;
    let name = vec::name(name_ptr, name_len).ok()?;
    linker.get(module, name).map(Box::new)
}

#[no_mangle]
pub extern "C" fn bridge_linker_delete(_linker: Box<BridgeLinker>) {}
