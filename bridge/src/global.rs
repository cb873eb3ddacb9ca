//! Global variable handles.

use wasmtime::{AsContext, AsContextMut, Global, Mutability};

use crate::{
    engine::BridgeStore, module::BridgeExtern, trap::BridgeError, val::RawVal, Error, Result,
};

pub struct BridgeGlobal {
    pub(crate) global: Global,
}

impl BridgeGlobal {
    pub fn new(global: Global) -> Self {
        Self { global }
    }

    pub fn get(&self, ctx: impl AsContextMut) -> Result<RawVal> {
        RawVal::from_val(&self.global.get(ctx))
    }

    /// Fails for immutable globals and for values of another kind.
    pub fn set(&self, ctx: impl AsContextMut, val: &RawVal) -> Result<()> {
        Ok(self.global.set(ctx, val.to_val()?)?)
    }

    pub fn is_mutable(&self, ctx: impl AsContext) -> bool {
        matches!(self.global.ty(ctx).mutability(), Mutability::Var)
    }
}

impl TryFrom<&BridgeExtern> for BridgeGlobal {
    type Error = Error;

    fn try_from(ext: &BridgeExtern) -> Result<Self> {
        ext.ext
            .clone()
            .into_global()
            .map(BridgeGlobal::new)
            .ok_or(Error::WrongExtern("global"))
    }
}

pub(crate) unsafe fn get_raw(ctx: impl AsContextMut, global: &BridgeGlobal, out: *mut RawVal) -> bool {
    match global.get(ctx) {
        Ok(val) => {
            out.write(val);
            true
        }
        Err(err) => {
            tracing::debug!("global read: {err}");
            false
        }
    }
}

pub(crate) fn set_raw(
    ctx: impl AsContextMut,
    global: &BridgeGlobal,
    val: &RawVal,
) -> Option<Box<BridgeError>> {
    global.set(ctx, val).err().map(|err| Box::new(err.into()))
}

/// Null when the extern is not a global.
#[no_mangle]
pub extern "C" fn bridge_extern_as_global(ext: &BridgeExtern) -> Option<Box<BridgeGlobal>> {
    BridgeGlobal::try_from(ext).ok().map(Box::new)
}

#[no_mangle]
pub extern "C" fn bridge_global_as_extern(global: &BridgeGlobal) -> Box<BridgeExtern> {
    Box::new(BridgeExtern::new(global.global.into()))
}

/// Writes the current value to `out`. False for reference-typed globals,
/// which the bridge does not marshal.
///
/// # Safety
///
/// `global` must belong to `store` and `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_global_get(
    store: &mut BridgeStore,
    global: &BridgeGlobal,
    out: *mut RawVal,
) -> bool {
    get_raw(&mut store.store, global, out)
}

/// # Safety
///
/// `global` must belong to `store`.
#[no_mangle]
pub unsafe extern "C" fn bridge_global_set(
    store: &mut BridgeStore,
    global: &BridgeGlobal,
    val: &RawVal,
) -> Option<Box<BridgeError>> {
    set_raw(&mut store.store, global, val)
}

/// # Safety
///
/// `global` must belong to `store`.
#[no_mangle]
pub unsafe extern "C" fn bridge_global_is_mutable(store: &BridgeStore, global: &BridgeGlobal) -> bool {
    global.is_mutable(&store.store)
}

#[no_mangle]
pub extern "C" fn bridge_global_delete(_global: Box<BridgeGlobal>) {}
