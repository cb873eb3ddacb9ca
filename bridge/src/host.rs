//! Entry points the managed side exports to the bridge.
//!
//! The managed side keeps its own registry from [`EnvToken`] to closure; the
//! bridge never looks inside it. All it knows is the four functions below,
//! two per calling convention, and which pair a function was created with.

use crate::{caller::BridgeCaller, trap::BridgeTrap, val::RawVal, Error, Result};

/// Opaque, pointer-sized handle owned by the managed side. Stored and
/// forwarded, never interpreted.
pub type EnvToken = usize;

/// Forwards one host-function call to the managed side.
///
/// `args` holds as many values as the function type has parameters and
/// `results` as many as it has results; `results` is pre-filled with zeroes of
/// the declared kinds. Returning `None` means success. Returning a trap hands
/// its ownership to the bridge. Unwinding out of this function is treated as a
/// fatal bridge fault.
pub type DispatchFn = unsafe extern "C-unwind" fn(
    caller: &mut BridgeCaller<'_>,
    env: EnvToken,
    args: *const RawVal,
    results: *mut RawVal,
) -> Option<Box<BridgeTrap>>;

/// Releases whatever the managed side keyed by `env`. Called exactly once per
/// function, after its last dispatch.
pub type FinalizeFn = unsafe extern "C-unwind" fn(env: EnvToken);

/// Table handed over by the managed side when it creates a store.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct HostEntryPoints {
    pub dispatch_direct: Option<DispatchFn>,
    pub dispatch_wrapped: Option<DispatchFn>,
    pub finalize_direct: Option<FinalizeFn>,
    pub finalize_wrapped: Option<FinalizeFn>,
}

/// A [`HostEntryPoints`] table with every slot checked present.
#[derive(Clone, Copy, Debug)]
pub struct HostTable {
    dispatch_direct: DispatchFn,
    dispatch_wrapped: DispatchFn,
    finalize_direct: FinalizeFn,
    finalize_wrapped: FinalizeFn,
}

impl TryFrom<&HostEntryPoints> for HostTable {
    type Error = Error;

    fn try_from(entry: &HostEntryPoints) -> Result<Self> {
        Ok(Self {
            dispatch_direct: entry
                .dispatch_direct
                .ok_or(Error::MissingEntryPoint("dispatch_direct"))?,
            dispatch_wrapped: entry
                .dispatch_wrapped
                .ok_or(Error::MissingEntryPoint("dispatch_wrapped"))?,
            finalize_direct: entry
                .finalize_direct
                .ok_or(Error::MissingEntryPoint("finalize_direct"))?,
            finalize_wrapped: entry
                .finalize_wrapped
                .ok_or(Error::MissingEntryPoint("finalize_wrapped"))?,
        })
    }
}

/// How the managed side marshals a function's value arrays. Fixed when the
/// function is created.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Convention {
    /// The managed callback consumes the raw value arrays as they are.
    Direct = 0,
    /// The managed side coerces the arrays into typed arguments first.
    Wrapped = 1,
}

impl TryFrom<u8> for Convention {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Convention::Direct),
            1 => Ok(Convention::Wrapped),
            other => Err(Error::BadConvention(other)),
        }
    }
}

impl Convention {
    /// The dispatch and finalizer pair for this convention. This is the only
    /// way to obtain an [`EntryPair`], so a function can never be wired to one
    /// convention's dispatcher and the other's finalizer.
    pub fn select(self, table: &HostTable) -> EntryPair {
        let (dispatch, finalize) = match self {
            Convention::Direct => (table.dispatch_direct, table.finalize_direct),
            Convention::Wrapped => (table.dispatch_wrapped, table.finalize_wrapped),
        };
        EntryPair {
            convention: self,
            dispatch,
            finalize,
        }
    }
}

/// Dispatcher and finalizer selected for one convention.
#[derive(Clone, Copy, Debug)]
pub struct EntryPair {
    convention: Convention,
    dispatch: DispatchFn,
    finalize: FinalizeFn,
}

impl EntryPair {
    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub(crate) fn dispatch(&self) -> DispatchFn {
        self.dispatch
    }

    pub(crate) fn finalize(&self) -> FinalizeFn {
        self.finalize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn convention_tags() {
        assert_eq!(Convention::try_from(0).unwrap(), Convention::Direct);
        assert_eq!(Convention::try_from(1).unwrap(), Convention::Wrapped);
        assert!(matches!(
            Convention::try_from(2),
            Err(Error::BadConvention(2))
        ));
    }

    #[test]
    fn incomplete_table_is_rejected() {
        let mut entry = testing::entry_points();
        entry.finalize_wrapped = None;
        let err = HostTable::try_from(&entry).unwrap_err();
        assert!(matches!(err, Error::MissingEntryPoint("finalize_wrapped")));
    }

    #[test]
    fn select_pairs_dispatch_with_its_finalizer() {
        let table = HostTable::try_from(&testing::entry_points()).unwrap();

        let direct = Convention::Direct.select(&table);
        assert_eq!(direct.convention(), Convention::Direct);
        assert_eq!(direct.dispatch() as usize, testing::dispatch_direct as usize);
        assert_eq!(direct.finalize() as usize, testing::finalize_direct as usize);

        let wrapped = Convention::Wrapped.select(&table);
        assert_eq!(wrapped.convention(), Convention::Wrapped);
        assert_eq!(wrapped.dispatch() as usize, testing::dispatch_wrapped as usize);
        assert_eq!(wrapped.finalize() as usize, testing::finalize_wrapped as usize);
    }
}
