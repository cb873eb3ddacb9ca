//! Config, engine and store handles.

use wasmtime::{Config, Engine, OptLevel, Store};

use crate::host::{HostEntryPoints, HostTable};

/// Engine settings, consumed when the engine is built.
pub struct BridgeConfig {
    pub(crate) config: Config,
    epoch_interruption: bool,
}

pub struct BridgeEngine {
    pub(crate) engine: Engine,
    epoch_interruption: bool,
}

/// Per-store state owned by the engine.
pub struct StoreData {
    host: HostTable,
}

impl StoreData {
    pub fn host(&self) -> &HostTable {
        &self.host
    }
}

pub struct BridgeStore {
    pub(crate) store: Store<StoreData>,
    epoch_interruption: bool,
}

/// Interrupts wasm running in any store of one engine. Unlike the store it
/// came from, it may be used from any thread.
pub struct BridgeInterruptHandle {
    engine: Engine,
}

impl BridgeInterruptHandle {
    pub fn interrupt(&self) {
        self.engine.increment_epoch();
    }
}

impl BridgeStore {
    pub fn new(engine: &BridgeEngine, host: HostTable) -> Self {
        let mut store = Store::new(&engine.engine, StoreData { host });
        if engine.epoch_interruption {
            // Any interrupt after this point ends the running call.
            store.set_epoch_deadline(1);
        }
        Self {
            store,
            epoch_interruption: engine.epoch_interruption,
        }
    }

    /// `None` unless the engine was built with epoch interruption.
    pub fn interrupt_handle(&self) -> Option<BridgeInterruptHandle> {
        self.epoch_interruption.then(|| BridgeInterruptHandle {
            engine: self.store.engine().clone(),
        })
    }

    pub fn store(&self) -> &Store<StoreData> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<StoreData> {
        &mut self.store
    }
}

#[no_mangle]
pub extern "C" fn bridge_config_new() -> Box<BridgeConfig> {
    Box::new(BridgeConfig {
        config: Config::new(),
        epoch_interruption: false,
    })
}

#[no_mangle]
pub extern "C" fn bridge_config_delete(_config: Box<BridgeConfig>) {}

#[no_mangle]
pub extern "C" fn bridge_config_debug_info_set(config: &mut BridgeConfig, enable: bool) {
    config.config.debug_info(enable);
}

#[no_mangle]
pub extern "C" fn bridge_config_wasm_threads_set(config: &mut BridgeConfig, enable: bool) {
    config.config.wasm_threads(enable);
}

#[no_mangle]
pub extern "C" fn bridge_config_wasm_reference_types_set(config: &mut BridgeConfig, enable: bool) {
    config.config.wasm_reference_types(enable);
}

#[no_mangle]
pub extern "C" fn bridge_config_wasm_simd_set(config: &mut BridgeConfig, enable: bool) {
    config.config.wasm_simd(enable);
}

#[no_mangle]
pub extern "C" fn bridge_config_wasm_bulk_memory_set(config: &mut BridgeConfig, enable: bool) {
    config.config.wasm_bulk_memory(enable);
}

#[no_mangle]
pub extern "C" fn bridge_config_wasm_multi_value_set(config: &mut BridgeConfig, enable: bool) {
    config.config.wasm_multi_value(enable);
}

#[no_mangle]
pub extern "C" fn bridge_config_cranelift_debug_verifier_set(
    config: &mut BridgeConfig,
    enable: bool,
) {
    config.config.cranelift_debug_verifier(enable);
}

/// `0` none, `1` speed, `2` speed and size. Returns false for anything else.
#[no_mangle]
pub extern "C" fn bridge_config_cranelift_opt_level_set(config: &mut BridgeConfig, level: u8) -> bool {
    let level = match level {
        0 => OptLevel::None,
        1 => OptLevel::Speed,
        2 => OptLevel::SpeedAndSize,
        other => {
            tracing::warn!(level = other, "rejecting unknown cranelift opt level");
            return false;
        }
    };
    config.config.cranelift_opt_level(level);
    true
}

#[no_mangle]
pub extern "C" fn bridge_config_consume_fuel_set(config: &mut BridgeConfig, enable: bool) {
    config.config.consume_fuel(enable);
}

/// Enables interrupting running wasm through a [`BridgeInterruptHandle`].
#[no_mangle]
pub extern "C" fn bridge_config_epoch_interruption_set(config: &mut BridgeConfig, enable: bool) {
    config.config.epoch_interruption(enable);
    config.epoch_interruption = enable;
}

#[no_mangle]
pub extern "C" fn bridge_engine_new() -> Box<BridgeEngine> {
    Box::new(BridgeEngine {
        engine: Engine::default(),
        epoch_interruption: false,
    })
}

/// Builds an engine from `config`, which is consumed either way. Returns null
/// when the engine rejects the settings.
#[no_mangle]
pub extern "C" fn bridge_engine_new_with_config(config: Box<BridgeConfig>) -> Option<Box<BridgeEngine>> {
    match Engine::new(&config.config) {
        Ok(engine) => Some(Box::new(BridgeEngine {
            engine,
            epoch_interruption: config.epoch_interruption,
        })),
        Err(err) => {
            tracing::warn!("engine rejected config: {err:#}");
            None
        }
    }
}

#[no_mangle]
pub extern "C" fn bridge_engine_delete(_engine: Box<BridgeEngine>) {}

/// Creates a store whose host functions dispatch through `host`. Returns null
/// if any entry point is missing.
///
/// The store and every handle created in it must be used by one thread at a
/// time. Entry points in `host` are called on the thread that called into
/// wasm; the finalizers on the thread that deletes the store.
#[no_mangle]
pub extern "C" fn bridge_store_new(
    engine: &BridgeEngine,
    host: &HostEntryPoints,
) -> Option<Box<BridgeStore>> {
    match HostTable::try_from(host) {
        Ok(table) => Some(Box::new(BridgeStore::new(engine, table))),
        Err(err) => {
            tracing::warn!("refusing store: {err}");
            None
        }
    }
}

/// Drops the store and everything it owns. Host functions created in it are
/// finalized here.
#[no_mangle]
pub extern "C" fn bridge_store_delete(_store: Box<BridgeStore>) {}

/// Returns false when fuel consumption is not enabled on the engine.
#[no_mangle]
pub extern "C" fn bridge_store_set_fuel(store: &mut BridgeStore, fuel: u64) -> bool {
    match store.store.set_fuel(fuel) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!("set_fuel failed: {err:#}");
            false
        }
    }
}

/// Handle that interrupts wasm running in `store`, from any thread. Null when
/// the engine was built without epoch interruption.
#[no_mangle]
pub extern "C" fn bridge_store_interrupt_handle(
    store: &BridgeStore,
) -> Option<Box<BridgeInterruptHandle>> {
    store.interrupt_handle().map(Box::new)
}

/// Re-arms `store` after an interrupt: the next `ticks` interrupts are
/// tolerated before the running call traps. No-op without epoch interruption.
#[no_mangle]
pub extern "C" fn bridge_store_set_epoch_deadline(store: &mut BridgeStore, ticks: u64) {
    if store.epoch_interruption {
        store.store.set_epoch_deadline(ticks);
    }
}

/// Interrupts the wasm currently running in the handle's stores, or the next
/// wasm to start running there.
#[no_mangle]
pub extern "C" fn bridge_interrupt_handle_interrupt(handle: &BridgeInterruptHandle) {
    handle.interrupt();
}

#[no_mangle]
pub extern "C" fn bridge_interrupt_handle_delete(_handle: Box<BridgeInterruptHandle>) {}

/// # Safety
///
/// `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn bridge_store_get_fuel(store: &BridgeStore, out: *mut u64) -> bool {
    match store.store.get_fuel() {
        Ok(fuel) => {
            *out = fuel;
            true
        }
        Err(_) => false,
    }
}
