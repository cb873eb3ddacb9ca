//! Module, instance and extern handles.
//!
//! These wrap engine objects the bridge only borrows: deleting a handle frees
//! the box, while the object itself lives as long as its store.

use wasmtime::{Extern, ExternType, Instance, Module};

use crate::{
    engine::{BridgeEngine, BridgeStore},
    func::BridgeFunc,
    trap::BridgeError,
    vec, Error, Result,
};

pub struct BridgeModule {
    pub(crate) module: Module,
}

pub struct BridgeInstance {
    pub(crate) instance: Instance,
}

#[derive(Clone)]
pub struct BridgeExtern {
    pub(crate) ext: Extern,
}

/// Extern kind tags.
pub const EXTERN_FUNC: u8 = 0;
pub const EXTERN_GLOBAL: u8 = 1;
pub const EXTERN_TABLE: u8 = 2;
pub const EXTERN_MEMORY: u8 = 3;
pub const EXTERN_OTHER: u8 = 0xff;

impl BridgeModule {
    /// Compiles a binary module or one in the text format.
    pub fn new(engine: &BridgeEngine, wasm: &[u8]) -> Result<Self> {
        Ok(Self {
            module: Module::new(&engine.engine, wasm)?,
        })
    }

    /// `(module, name, kind)` of each import, in declaration order.
    pub fn imports(&self) -> impl ExactSizeIterator<Item = (&str, &str, u8)> + '_ {
        self.module
            .imports()
            .map(|import| (import.module(), import.name(), type_kind(&import.ty())))
    }

    /// `(name, kind)` of each export, in declaration order.
    pub fn exports(&self) -> impl ExactSizeIterator<Item = (&str, u8)> + '_ {
        self.module
            .exports()
            .map(|export| (export.name(), type_kind(&export.ty())))
    }
}

fn type_kind(ty: &ExternType) -> u8 {
    match ty {
        ExternType::Func(_) => EXTERN_FUNC,
        ExternType::Global(_) => EXTERN_GLOBAL,
        ExternType::Table(_) => EXTERN_TABLE,
        ExternType::Memory(_) => EXTERN_MEMORY,
        _ => EXTERN_OTHER,
    }
}

impl BridgeInstance {
    pub fn export(&self, store: &mut BridgeStore, name: &str) -> Option<BridgeExtern> {
        self.instance
            .get_export(&mut store.store, name)
            .map(BridgeExtern::new)
    }
}

impl BridgeExtern {
    pub fn new(ext: Extern) -> Self {
        Self { ext }
    }

    pub fn kind(&self) -> u8 {
        match &self.ext {
            Extern::Func(_) => EXTERN_FUNC,
            Extern::Global(_) => EXTERN_GLOBAL,
            Extern::Table(_) => EXTERN_TABLE,
            Extern::Memory(_) => EXTERN_MEMORY,
            _ => EXTERN_OTHER,
        }
    }

    pub fn get(&self) -> &Extern {
        &self.ext
    }
}

/// Compiles `bytes`, which may be a binary module or the text format.
///
/// # Safety
///
/// `bytes..bytes + len` must be readable and `out` writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_module_new(
    engine: &BridgeEngine,
    bytes: *const u8,
    len: usize,
    out: *mut Option<Box<BridgeModule>>,
) -> Option<Box<BridgeError>> {
    let wasm = vec::ByteVec::from_raw_parts(bytes, len);
    match BridgeModule::new(engine, wasm.as_bytes()) {
        Ok(module) => {
            out.write(Some(Box::new(module)));
            None
        }
        Err(err) => {
            out.write(None);
            Some(Box::new(err.into()))
        }
    }
}

#[no_mangle]
pub extern "C" fn bridge_module_imports_len(module: &BridgeModule) -> usize {
    module.imports().len()
}

/// Describes import `index`. Names point into the module and stay valid while
/// it does. False when `index` is out of range.
///
/// # Safety
///
/// Every out pointer must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_module_import_get(
    module: &BridgeModule,
    index: usize,
    module_ptr: *mut *const u8,
    module_len: *mut usize,
    name_ptr: *mut *const u8,
    name_len: *mut usize,
    kind_out: *mut u8,
) -> bool {
    let Some((from, name, kind)) = module.imports().nth(index) else {
        return false;
    };
    module_ptr.write(from.as_ptr());
    module_len.write(from.len());
    name_ptr.write(name.as_ptr());
    name_len.write(name.len());
    kind_out.write(kind);
    true
}

#[no_mangle]
pub extern "C" fn bridge_module_exports_len(module: &BridgeModule) -> usize {
    module.exports().len()
}

/// Describes export `index`; see `bridge_module_import_get`.
///
/// # Safety
///
/// Every out pointer must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_module_export_get(
    module: &BridgeModule,
    index: usize,
    name_ptr: *mut *const u8,
    name_len: *mut usize,
    kind_out: *mut u8,
) -> bool {
    let Some((name, kind)) = module.exports().nth(index) else {
        return false;
    };
    name_ptr.write(name.as_ptr());
    name_len.write(name.len());
    kind_out.write(kind);
    true
}

#[no_mangle]
pub extern "C" fn bridge_module_delete(_module: Box<BridgeModule>) {}

/// Instantiates `module` with `imports` given positionally.
///
/// # Safety
///
/// `imports` must point to `nimports` valid extern handles and `out` must be
/// writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_instance_new(
    store: &mut BridgeStore,
    module: &BridgeModule,
    imports: *const &BridgeExtern,
    nimports: usize,
    out: *mut Option<Box<BridgeInstance>>,
) -> Option<Box<BridgeError>> {
    let imports: Vec<Extern> = if nimports == 0 {
        Vec::new()
    } else {
        core::slice::from_raw_parts(imports, nimports)
            .iter()
            .map(|ext| ext.ext.clone())
            .collect()
    };
    match Instance::new(&mut store.store, &module.module, &imports) {
        Ok(instance) => {
            out.write(Some(Box::new(BridgeInstance { instance })));
            None
        }
        Err(err) => {
            out.write(None);
            Some(Box::new(err.into()))
        }
    }
}

/// Looks up an export by name; null when it does not exist.
///
/// # Safety
///
/// `name_ptr..name_ptr + name_len` must be readable.
#[no_mangle]
pub unsafe extern "C" fn bridge_instance_export_get(
    store: &mut BridgeStore,
    instance: &BridgeInstance,
    name_ptr: *const u8,
    name_len: usize,
) -> Option<Box<BridgeExtern>> {
    let name = vec::name(name_ptr, name_len).ok()?;
    instance.export(store, name).map(Box::new)
}

#[no_mangle]
pub extern "C" fn bridge_instance_delete(_instance: Box<BridgeInstance>) {}

#[no_mangle]
pub extern "C" fn bridge_extern_kind(ext: &BridgeExtern) -> u8 {
    ext.kind()
}

/// Null when the extern is not a function.
#[no_mangle]
pub extern "C" fn bridge_extern_as_func(ext: &BridgeExtern) -> Option<Box<BridgeFunc>> {
    match BridgeFunc::try_from(ext) {
        Ok(func) => Some(Box::new(func)),
        Err(err) => {
            tracing::debug!("{err}");
            None
        }
    }
}

#[no_mangle]
pub extern "C" fn bridge_extern_delete(_ext: Box<BridgeExtern>) {}

impl TryFrom<&BridgeExtern> for BridgeFunc {
    type Error = Error;

    fn try_from(ext: &BridgeExtern) -> Result<Self> {
        ext.ext
            .clone()
            .into_func()
            .map(BridgeFunc::new)
            .ok_or(Error::WrongExtern("function"))
    }
}
