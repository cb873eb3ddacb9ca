// C-ABI bridge between a managed host language and the wasmtime engine.
//
// The managed side registers host functions by handing over an opaque
// environment token; wasm calls land in a trampoline that forwards the token
// and the raw value arrays to one of the managed side's entry points.
//
// Threading: a store and every handle created in it (functions, instances,
// externs, memories, globals, linkers bound to it) must be used by one thread
// at a time. Dispatch entry points run synchronously on the thread that made
// the call into wasm, and finalizers on the thread that deletes the store.
// Engines and interrupt handles may be shared across threads.

use thiserror::Error;

pub mod caller;
pub mod engine;
pub mod func;
pub mod global;
pub mod host;
pub mod linker;
pub mod logging;
pub mod memory;
pub mod module;
pub mod trap;
pub mod val;
pub mod vec;

#[cfg(test)]
mod testing;

pub use caller::BridgeCaller;
pub use engine::{BridgeConfig, BridgeEngine, BridgeInterruptHandle, BridgeStore, StoreData};
pub use func::{BridgeFunc, BridgeFuncType};
pub use global::BridgeGlobal;
pub use host::{Convention, EntryPair, EnvToken, HostEntryPoints, HostTable};
pub use linker::BridgeLinker;
pub use memory::BridgeMemory;
pub use module::{BridgeExtern, BridgeInstance, BridgeModule};
pub use trap::{BridgeError, BridgeTrap, HostTrap};
pub use val::{RawVal, ValKind};
pub use vec::ByteVec;
pub use wasmtime;

/// Result alias used by the bridge.
pub type Result<T> = core::result::Result<T, Error>;

/// Error cases raised on the Rust side of the boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// A byte-span identifier was not valid UTF-8.
    #[error("name is not valid utf-8")]
    NameNotUtf8,
    /// A calling-convention tag outside {direct, wrapped}.
    #[error("unknown calling convention tag {0}")]
    BadConvention(u8),
    /// The managed side left one of its entry points null.
    #[error("host entry point `{0}` is missing")]
    MissingEntryPoint(&'static str),
    /// A value kind the bridge cannot marshal.
    #[error("unsupported value kind {0}")]
    UnsupportedValue(String),
    /// A value of one kind was supplied where another was declared.
    #[error("expected a value of kind {expected:?}, found {found:?}")]
    KindMismatch { expected: ValKind, found: ValKind },
    /// Argument or result count does not match the function type.
    #[error("expected {expected} {what}, found {found}")]
    Arity {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// A handle was not of the requested extern kind.
    #[error("extern is not a {0}")]
    WrongExtern(&'static str),
    /// A handle was created on a different engine than the one it is used with.
    #[error("{0} belongs to a different engine")]
    ForeignEngine(&'static str),
    /// The engine rejected the operation.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}
