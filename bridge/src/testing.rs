//! A small managed side for the unit tests: a slot registry of closures keyed
//! by env token, plus the four entry points that dispatch into it.

use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex, MutexGuard},
};

use slotmap::{DefaultKey, Key, KeyData, SlotMap};
use wasmtime::Val;

use crate::{
    caller::BridgeCaller,
    engine::{BridgeEngine, BridgeStore},
    func::BridgeFunc,
    host::{EnvToken, HostEntryPoints},
    module::{
        bridge_extern_as_func, bridge_instance_export_get, bridge_instance_new, bridge_module_new,
        BridgeExtern, BridgeInstance, BridgeModule,
    },
    trap::{BridgeTrap, HostTrap},
    val::RawVal,
};

type DirectFn =
    dyn Fn(&mut BridgeCaller<'_>, &[RawVal], &mut [RawVal]) -> Option<Box<BridgeTrap>> + Send + Sync;
type WrappedFn = dyn Fn(&[Val]) -> Result<Vec<Val>, String> + Send + Sync;

enum Callback {
    Direct(Box<DirectFn>),
    Wrapped(Box<WrappedFn>),
}

struct Entry {
    nparams: usize,
    nresults: usize,
    callback: Callback,
}

/// Which finalizer released a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    Direct,
    Wrapped,
}

#[derive(Default)]
struct Registry {
    slots: SlotMap<DefaultKey, Arc<Entry>>,
    calls: HashMap<EnvToken, usize>,
    last_args: HashMap<EnvToken, Vec<RawVal>>,
    finalized: HashMap<EnvToken, Vec<Finalized>>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(Default::default);

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key(token: EnvToken) -> DefaultKey {
    KeyData::from_ffi(token as u64).into()
}

fn register(entry: Entry) -> EnvToken {
    let key = registry().slots.insert(Arc::new(entry));
    key.data().as_ffi() as EnvToken
}

/// The lock is released before the callback runs so callbacks may re-enter
/// the bridge.
fn lookup(token: EnvToken) -> Arc<Entry> {
    registry()
        .slots
        .get(key(token))
        .cloned()
        .unwrap_or_else(|| panic!("dispatch for unknown token {token:#x}"))
}

fn record(token: EnvToken, args: &[RawVal]) {
    let mut reg = registry();
    *reg.calls.entry(token).or_default() += 1;
    reg.last_args.insert(token, args.to_vec());
}

pub fn register_direct<F>(nparams: usize, nresults: usize, f: F) -> EnvToken
where
    F: Fn(&mut BridgeCaller<'_>, &[RawVal], &mut [RawVal]) -> Option<Box<BridgeTrap>>
        + Send
        + Sync
        + 'static,
{
    register(Entry {
        nparams,
        nresults,
        callback: Callback::Direct(Box::new(f)),
    })
}

pub fn register_wrapped<G>(nparams: usize, nresults: usize, g: G) -> EnvToken
where
    G: Fn(&[Val]) -> Result<Vec<Val>, String> + Send + Sync + 'static,
{
    register(Entry {
        nparams,
        nresults,
        callback: Callback::Wrapped(Box::new(g)),
    })
}

pub fn calls(token: EnvToken) -> usize {
    registry().calls.get(&token).copied().unwrap_or(0)
}

pub fn last_args(token: EnvToken) -> Vec<RawVal> {
    registry().last_args.get(&token).cloned().unwrap_or_default()
}

pub fn finalized(token: EnvToken) -> Vec<Finalized> {
    registry().finalized.get(&token).cloned().unwrap_or_default()
}

pub fn trap(message: &str) -> Box<BridgeTrap> {
    Box::new(BridgeTrap::new(HostTrap::new(message)))
}

unsafe fn slices<'a>(
    entry: &Entry,
    args: *const RawVal,
    results: *mut RawVal,
) -> (&'a [RawVal], &'a mut [RawVal]) {
    let args: &[RawVal] = if entry.nparams == 0 {
        &[]
    } else {
        core::slice::from_raw_parts(args, entry.nparams)
    };
    let results: &mut [RawVal] = if entry.nresults == 0 {
        &mut []
    } else {
        core::slice::from_raw_parts_mut(results, entry.nresults)
    };
    (args, results)
}

pub unsafe extern "C-unwind" fn dispatch_direct(
    caller: &mut BridgeCaller<'_>,
    env: EnvToken,
    args: *const RawVal,
    results: *mut RawVal,
) -> Option<Box<BridgeTrap>> {
    let entry = lookup(env);
    let (args, results) = slices(&entry, args, results);
    record(env, args);
    match &entry.callback {
        Callback::Direct(f) => f(caller, args, results),
        Callback::Wrapped(_) => panic!("wrapped callback dispatched directly"),
    }
}

pub unsafe extern "C-unwind" fn dispatch_wrapped(
    _caller: &mut BridgeCaller<'_>,
    env: EnvToken,
    args: *const RawVal,
    results: *mut RawVal,
) -> Option<Box<BridgeTrap>> {
    let entry = lookup(env);
    let (args, results) = slices(&entry, args, results);
    record(env, args);
    let Callback::Wrapped(g) = &entry.callback else {
        panic!("direct callback dispatched as wrapped");
    };
    let typed = match args.iter().map(RawVal::to_val).collect::<crate::Result<Vec<Val>>>() {
        Ok(typed) => typed,
        Err(err) => return Some(Box::new(BridgeTrap::new(HostTrap::fatal(err.to_string())))),
    };
    let out = match g(&typed) {
        Ok(out) => out,
        Err(message) => return Some(trap(&message)),
    };
    if out.len() != results.len() {
        return Some(Box::new(BridgeTrap::new(HostTrap::fatal(format!(
            "callback returned {} values, expected {}",
            out.len(),
            results.len()
        )))));
    }
    for (slot, val) in results.iter_mut().zip(&out) {
        match RawVal::from_val(val) {
            Ok(raw) => *slot = raw,
            Err(err) => return Some(Box::new(BridgeTrap::new(HostTrap::fatal(err.to_string())))),
        }
    }
    None
}

fn finalize(env: EnvToken, how: Finalized) {
    let mut reg = registry();
    reg.slots.remove(key(env));
    reg.finalized.entry(env).or_default().push(how);
}

pub unsafe extern "C-unwind" fn finalize_direct(env: EnvToken) {
    finalize(env, Finalized::Direct);
}

pub unsafe extern "C-unwind" fn finalize_wrapped(env: EnvToken) {
    finalize(env, Finalized::Wrapped);
}

pub fn entry_points() -> HostEntryPoints {
    HostEntryPoints {
        dispatch_direct: Some(dispatch_direct),
        dispatch_wrapped: Some(dispatch_wrapped),
        finalize_direct: Some(finalize_direct),
        finalize_wrapped: Some(finalize_wrapped),
    }
}

pub fn compile(engine: &BridgeEngine, wat: &str) -> Box<BridgeModule> {
    let mut out = None;
    let err = unsafe { bridge_module_new(engine, wat.as_ptr(), wat.len(), &mut out) };
    if let Some(err) = err {
        panic!("compile failed: {}", err.message());
    }
    out.unwrap()
}

pub fn instantiate(
    store: &mut BridgeStore,
    module: &BridgeModule,
    imports: &[&BridgeExtern],
) -> Box<BridgeInstance> {
    let mut out = None;
    let err = unsafe {
        bridge_instance_new(store, module, imports.as_ptr(), imports.len(), &mut out)
    };
    if let Some(err) = err {
        panic!("instantiate failed: {}", err.message());
    }
    out.unwrap()
}

pub fn export_func(store: &mut BridgeStore, instance: &BridgeInstance, name: &str) -> Box<BridgeFunc> {
    let ext = unsafe { bridge_instance_export_get(store, instance, name.as_ptr(), name.len()) }
        .unwrap_or_else(|| panic!("no export `{name}`"));
    bridge_extern_as_func(&ext).unwrap_or_else(|| panic!("export `{name}` is not a function"))
}
