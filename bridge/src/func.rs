//! Function factory, trampoline and finalizer.
//!
//! A host function is a wasmtime closure that owns a [`HostFunc`]: the
//! managed side's token plus the entry pair selected for its convention.
//! Calls go through [`HostFunc::invoke`]; dropping the closure, which the
//! engine does exactly once when the owning store goes away, fires the
//! finalizer. That a finalizer never overlaps a call for the same token is the
//! engine's guarantee; nothing here enforces it.

use std::panic::{self, AssertUnwindSafe};

use wasmtime::{AsContextMut, Caller, Engine, Func, FuncType, Val};

use crate::{
    caller::BridgeCaller,
    engine::{BridgeEngine, BridgeStore, StoreData},
    host::{Convention, EntryPair, EnvToken},
    module::BridgeExtern,
    trap::{BridgeError, BridgeTrap, HostTrap},
    val::{self, RawVal, ValKind},
    Error, Result,
};

/// Function signature plus the kinds the bridge marshals for it.
pub struct BridgeFuncType {
    pub(crate) ty: FuncType,
    engine: Engine,
    params: Vec<ValKind>,
    results: Vec<ValKind>,
}

impl BridgeFuncType {
    pub fn new(engine: &BridgeEngine, params: &[ValKind], results: &[ValKind]) -> Self {
        let ty = FuncType::new(
            &engine.engine,
            params.iter().map(|kind| kind.val_type()),
            results.iter().map(|kind| kind.val_type()),
        );
        Self {
            ty,
            engine: engine.engine.clone(),
            params: params.to_vec(),
            results: results.to_vec(),
        }
    }

    pub fn params(&self) -> &[ValKind] {
        &self.params
    }

    pub fn results(&self) -> &[ValKind] {
        &self.results
    }
}

pub struct BridgeFunc {
    pub(crate) func: Func,
}

/// State owned by one host function for its whole life.
struct HostFunc {
    token: EnvToken,
    entry: EntryPair,
    results: Vec<ValKind>,
}

impl HostFunc {
    fn invoke(
        &self,
        caller: Caller<'_, StoreData>,
        params: &[Val],
        results: &mut [Val],
    ) -> anyhow::Result<()> {
        let args = val::lower(params).map_err(|err| self.fault(format!("bad argument: {err}")))?;
        let mut raw_results: Vec<RawVal> = self.results.iter().map(|k| RawVal::zero(*k)).collect();

        tracing::trace!(
            token = self.token,
            convention = ?self.entry.convention(),
            nargs = args.len(),
            "dispatching host call"
        );

        let mut caller = BridgeCaller::new(caller);
        let dispatch = self.entry.dispatch();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            dispatch(
                &mut caller,
                self.token,
                args.as_ptr(),
                raw_results.as_mut_ptr(),
            )
        }));

        match outcome {
            Ok(None) => {}
            Ok(Some(trap)) => return Err((*trap).into_error()),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return Err(self.fault(format!("host dispatch unwound: {reason}")));
            }
        }

        val::lift(&raw_results, &self.results, results)
            .map_err(|err| self.fault(format!("bad result: {err}")))
    }

    /// Logs a bridge-level defect and turns it into a fatal trap.
    fn fault(&self, message: String) -> anyhow::Error {
        tracing::error!(
            target: "bridge::fault",
            token = self.token,
            convention = ?self.entry.convention(),
            "{message}"
        );
        HostTrap::fatal(message).into()
    }
}

impl Drop for HostFunc {
    fn drop(&mut self) {
        let finalize = self.entry.finalize();
        let token = self.token;
        tracing::trace!(token, convention = ?self.entry.convention(), "finalizing host function");
        if panic::catch_unwind(|| unsafe { finalize(token) }).is_err() {
            tracing::error!(target: "bridge::fault", token, "host finalizer unwound");
        }
    }
}

impl BridgeFunc {
    pub fn new(func: Func) -> Self {
        Self { func }
    }

    /// Creates a host function in `store` that dispatches `env` through the
    /// entry pair of `convention`. Fails, without taking ownership of `env`,
    /// when `ty` was built on another engine.
    pub fn create(
        store: &mut BridgeStore,
        ty: &BridgeFuncType,
        env: EnvToken,
        convention: Convention,
    ) -> Result<Self> {
        if !Engine::same(&ty.engine, store.store.engine()) {
            return Err(Error::ForeignEngine("function type"));
        }
        let entry = convention.select(store.store.data().host());
        let state = HostFunc {
            token: env,
            entry,
            results: ty.results.clone(),
        };
        let func = Func::new(&mut store.store, ty.ty.clone(), move |caller, params, results| {
            state.invoke(caller, params, results)
        });
        Ok(Self { func })
    }

    pub fn func(&self) -> &Func {
        &self.func
    }

    /// Calls the function with raw values. `Ok(Some(trap))` means the call ran
    /// and trapped; `Err` means it never started.
    ///
    /// # Panics
    ///
    /// When the function belongs to a store other than `ctx`.
    pub fn call(
        &self,
        mut ctx: impl AsContextMut<Data = StoreData>,
        args: &[RawVal],
        results: &mut [RawVal],
    ) -> Result<Option<BridgeTrap>> {
        let ty = self.func.ty(ctx.as_context_mut());
        if args.len() != ty.params().len() {
            return Err(Error::Arity {
                what: "arguments",
                expected: ty.params().len(),
                found: args.len(),
            });
        }
        if results.len() != ty.results().len() {
            return Err(Error::Arity {
                what: "results",
                expected: ty.results().len(),
                found: results.len(),
            });
        }

        let params = args
            .iter()
            .zip(ty.params())
            .map(|(arg, ty)| arg.to_val_of(ValKind::of_type(&ty)?))
            .collect::<Result<Vec<Val>>>()?;
        let mut out = ty
            .results()
            .map(|ty| ValKind::of_type(&ty).and_then(|kind| RawVal::zero(kind).to_val()))
            .collect::<Result<Vec<Val>>>()?;

        if let Err(err) = self.func.call(ctx.as_context_mut(), &params, &mut out) {
            return Ok(Some(BridgeTrap::from_error(err)));
        }
        for (slot, val) in results.iter_mut().zip(&out) {
            *slot = RawVal::from_val(val)?;
        }
        Ok(None)
    }
}

/// Shared body of the raw call entry points. `func` must belong to `ctx`.
pub(crate) unsafe fn call_raw(
    ctx: impl AsContextMut<Data = StoreData>,
    func: &BridgeFunc,
    args: *const RawVal,
    nargs: usize,
    results: *mut RawVal,
    nresults: usize,
    trap_out: *mut Option<Box<BridgeTrap>>,
) -> Option<Box<BridgeError>> {
    let args: &[RawVal] = if nargs == 0 {
        &[]
    } else {
        core::slice::from_raw_parts(args, nargs)
    };
    let results: &mut [RawVal] = if nresults == 0 {
        &mut []
    } else {
        core::slice::from_raw_parts_mut(results, nresults)
    };
    match func.call(ctx, args, results) {
        Ok(trap) => {
            trap_out.write(trap.map(Box::new));
            None
        }
        Err(err) => {
            trap_out.write(None);
            Some(Box::new(err.into()))
        }
    }
}

/// Builds a function type from kind tags. Null if a tag is unknown.
///
/// # Safety
///
/// `params` and `results` must point to `nparams` and `nresults` readable
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn bridge_functype_new(
    engine: &BridgeEngine,
    params: *const u8,
    nparams: usize,
    results: *const u8,
    nresults: usize,
) -> Option<Box<BridgeFuncType>> {
    let kinds = |ptr: *const u8, len: usize| -> Result<Vec<ValKind>> {
        crate::vec::ByteVec::from_raw_parts(ptr, len)
            .as_bytes()
            .iter()
            .map(|tag| ValKind::try_from(*tag))
            .collect()
    };
    match (kinds(params, nparams), kinds(results, nresults)) {
        (Ok(params), Ok(results)) => Some(Box::new(BridgeFuncType::new(engine, &params, &results))),
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!("refusing function type: {err}");
            None
        }
    }
}

#[no_mangle]
pub extern "C" fn bridge_functype_param_arity(ty: &BridgeFuncType) -> usize {
    ty.params.len()
}

#[no_mangle]
pub extern "C" fn bridge_functype_result_arity(ty: &BridgeFuncType) -> usize {
    ty.results.len()
}

#[no_mangle]
pub extern "C" fn bridge_functype_delete(_ty: Box<BridgeFuncType>) {}

/// Creates a host function bound to `env`. `convention` is `0` for direct and
/// `1` for wrapped. An unknown tag, or a `ty` built on another engine than the
/// store's, returns null and `env` is never finalized.
#[no_mangle]
pub extern "C" fn bridge_func_new(
    store: &mut BridgeStore,
    ty: &BridgeFuncType,
    env: EnvToken,
    convention: u8,
) -> Option<Box<BridgeFunc>> {
    match Convention::try_from(convention)
        .and_then(|convention| BridgeFunc::create(store, ty, env, convention))
    {
        Ok(func) => Some(Box::new(func)),
        Err(err) => {
            tracing::warn!(token = env, "refusing host function: {err}");
            None
        }
    }
}

/// Calls `func`. On return either an error is returned (the call never
/// started), or `*trap_out` holds the trap, or null and `results` is filled.
///
/// # Safety
///
/// `args`/`results` must point to `nargs`/`nresults` values and `trap_out`
/// must be writable. `func` must belong to `store`. No call into `store` may
/// be in flight: from inside a callback use `bridge_caller_func_call`.
#[no_mangle]
pub unsafe extern "C" fn bridge_func_call(
    store: &mut BridgeStore,
    func: &BridgeFunc,
    args: *const RawVal,
    nargs: usize,
    results: *mut RawVal,
    nresults: usize,
    trap_out: *mut Option<Box<BridgeTrap>>,
) -> Option<Box<BridgeError>> {
    call_raw(
        &mut store.store,
        func,
        args,
        nargs,
        results,
        nresults,
        trap_out,
    )
}

/// # Safety
///
/// `func` must belong to `store`.
#[no_mangle]
pub unsafe extern "C" fn bridge_func_param_arity(store: &BridgeStore, func: &BridgeFunc) -> usize {
    func.func.ty(&store.store).params().len()
}

/// # Safety
///
/// `func` must belong to `store`.
#[no_mangle]
pub unsafe extern "C" fn bridge_func_result_arity(store: &BridgeStore, func: &BridgeFunc) -> usize {
    func.func.ty(&store.store).results().len()
}

#[no_mangle]
pub extern "C" fn bridge_func_as_extern(func: &BridgeFunc) -> Box<BridgeExtern> {
    Box::new(BridgeExtern::new(func.func.into()))
}

#[no_mangle]
pub extern "C" fn bridge_func_delete(_func: Box<BridgeFunc>) {}
