//! Host side of the bridge: live host functions keyed by env token.
//!
//! Tokens are slot-map keys flattened with `KeyData::as_ffi`, so a stale token
//! never aliases a newer entry. Finalizers remove the slot.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use bridge::{
    wasmtime::Val, BridgeCaller, BridgeTrap, Convention, EnvToken, HostEntryPoints, HostTrap,
    RawVal, ValKind,
};
use slotmap::{DefaultKey, Key, KeyData, SlotMap};

pub type RawBody = fn(&[RawVal], &mut [RawVal]) -> Result<(), String>;
pub type TypedBody = fn(&[Val]) -> Result<Vec<Val>, String>;

/// Direct functions see the raw value arrays, wrapped ones typed values.
#[derive(Clone, Copy)]
pub enum Body {
    Raw(RawBody),
    Typed(TypedBody),
}

impl Body {
    pub fn convention(&self) -> Convention {
        match self {
            Body::Raw(_) => Convention::Direct,
            Body::Typed(_) => Convention::Wrapped,
        }
    }
}

pub struct HostFn {
    pub module: &'static str,
    pub name: &'static str,
    pub params: Vec<ValKind>,
    pub results: Vec<ValKind>,
    pub body: Body,
}

static SLOTS: LazyLock<Mutex<SlotMap<DefaultKey, Arc<HostFn>>>> =
    LazyLock::new(Default::default);

fn slots() -> MutexGuard<'static, SlotMap<DefaultKey, Arc<HostFn>>> {
    SLOTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key(token: EnvToken) -> DefaultKey {
    KeyData::from_ffi(token as u64).into()
}

pub fn register(host: HostFn) -> EnvToken {
    let key = slots().insert(Arc::new(host));
    key.data().as_ffi() as EnvToken
}

/// Number of host functions not yet finalized.
pub fn live() -> usize {
    slots().len()
}

#[cfg(test)]
pub fn is_live(token: EnvToken) -> bool {
    slots().contains_key(key(token))
}

pub fn entry_points() -> HostEntryPoints {
    HostEntryPoints {
        dispatch_direct: Some(dispatch_direct),
        dispatch_wrapped: Some(dispatch_wrapped),
        finalize_direct: Some(finalize_direct),
        finalize_wrapped: Some(finalize_wrapped),
    }
}

/// Drops a token the bridge never took ownership of.
pub fn discard(token: EnvToken) {
    slots().remove(key(token));
}

fn lookup(token: EnvToken) -> Result<Arc<HostFn>, Box<BridgeTrap>> {
    slots().get(key(token)).cloned().ok_or_else(|| {
        Box::new(BridgeTrap::new(HostTrap::fatal(format!(
            "no host function for token {token:#x}"
        ))))
    })
}

fn trap(message: String) -> Option<Box<BridgeTrap>> {
    Some(Box::new(BridgeTrap::new(HostTrap::new(message))))
}

unsafe fn arrays<'a>(
    host: &HostFn,
    args: *const RawVal,
    results: *mut RawVal,
) -> (&'a [RawVal], &'a mut [RawVal]) {
    let args: &[RawVal] = match host.params.len() {
        0 => &[],
        n => std::slice::from_raw_parts(args, n),
    };
    let results: &mut [RawVal] = match host.results.len() {
        0 => &mut [],
        n => std::slice::from_raw_parts_mut(results, n),
    };
    (args, results)
}

unsafe extern "C-unwind" fn dispatch_direct(
    _caller: &mut BridgeCaller<'_>,
    env: EnvToken,
    args: *const RawVal,
    results: *mut RawVal,
) -> Option<Box<BridgeTrap>> {
    let host = match lookup(env) {
        Ok(host) => host,
        Err(trap) => return Some(trap),
    };
    let Body::Raw(body) = host.body else {
        return Some(Box::new(BridgeTrap::new(HostTrap::fatal(format!(
            "{}.{} is not a direct function",
            host.module, host.name
        )))));
    };
    let (args, results) = arrays(&host, args, results);
    body(args, results).err().and_then(trap)
}

unsafe extern "C-unwind" fn dispatch_wrapped(
    _caller: &mut BridgeCaller<'_>,
    env: EnvToken,
    args: *const RawVal,
    results: *mut RawVal,
) -> Option<Box<BridgeTrap>> {
    let host = match lookup(env) {
        Ok(host) => host,
        Err(trap) => return Some(trap),
    };
    let Body::Typed(body) = host.body else {
        return Some(Box::new(BridgeTrap::new(HostTrap::fatal(format!(
            "{}.{} is not a wrapped function",
            host.module, host.name
        )))));
    };
    let (args, results) = arrays(&host, args, results);

    let typed = match args.iter().map(RawVal::to_val).collect::<bridge::Result<Vec<_>>>() {
        Ok(typed) => typed,
        Err(err) => return trap(err.to_string()),
    };
    let out = match body(&typed) {
        Ok(out) if out.len() == results.len() => out,
        Ok(out) => {
            return trap(format!(
                "{}.{} returned {} values, declared {}",
                host.module,
                host.name,
                out.len(),
                results.len()
            ))
        }
        Err(message) => return trap(message),
    };
    for (slot, val) in results.iter_mut().zip(&out) {
        match RawVal::from_val(val) {
            Ok(raw) => *slot = raw,
            Err(err) => return trap(err.to_string()),
        }
    }
    None
}

/// Frees `env` if `by` is the convention it was registered with. A mismatch
/// means the bridge paired the wrong finalizer; the slot is left to the right
/// one.
fn release(env: EnvToken, by: Convention) -> bool {
    let mut slots = slots();
    let Some(host) = slots.get(key(env)) else {
        return false;
    };
    let expected = host.body.convention();
    if expected != by {
        tracing::error!(
            target: "bridge::fault",
            token = env,
            ?expected,
            found = ?by,
            "{}.{} finalized through the wrong convention",
            host.module,
            host.name
        );
        return false;
    }
    if let Some(host) = slots.remove(key(env)) {
        tracing::debug!(token = env, "released {}.{}", host.module, host.name);
    }
    true
}

unsafe extern "C-unwind" fn finalize_direct(env: EnvToken) {
    release(env, Convention::Direct);
}

unsafe extern "C-unwind" fn finalize_wrapped(env: EnvToken) {
    release(env, Convention::Wrapped);
}
