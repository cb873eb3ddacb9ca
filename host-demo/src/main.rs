mod registry;

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use bridge::{
    engine::{
        bridge_config_consume_fuel_set, bridge_config_cranelift_opt_level_set, bridge_config_new,
        bridge_engine_new_with_config, bridge_store_get_fuel, bridge_store_new,
        bridge_store_set_fuel,
    },
    wasmtime::Val,
    BridgeEngine, BridgeFunc, BridgeFuncType, BridgeLinker, BridgeModule, BridgeStore, RawVal,
    ValKind,
};
use clap::{Parser, ValueEnum};
use registry::{Body, HostFn};

#[derive(Parser, Debug)]
#[command(name = "host-demo", about = "Runs a wasm module against a few bridged host functions.")]
struct Args {
    /// Path to a .wasm or .wat module
    path: PathBuf,

    /// Exported function to call
    #[arg(short, long, default_value = "run")]
    entry: String,

    /// i32 arguments for the entry
    #[arg(long, num_args = 0.., allow_negative_numbers = true)]
    args: Vec<i32>,

    /// Run with fuel metering and this much fuel
    #[arg(long)]
    fuel: Option<u64>,

    #[arg(long, value_enum, default_value_t = OptLevel::Speed)]
    opt_level: OptLevel,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OptLevel {
    None = 0,
    Speed = 1,
    SpeedAndSize = 2,
}

fn main() -> anyhow::Result<()> {
    bridge::logging::init();
    let args = Args::parse();

    let wasm = fs::read(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    let outcome = run(&args, &wasm)?;

    let shown: Vec<String> = outcome.results.iter().map(show).collect();
    println!(
        "✅ {}({}) = [{}]",
        args.entry,
        args.args
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        shown.join(", ")
    );
    if let Some(fuel) = outcome.fuel_left {
        println!("fuel left: {fuel}");
    }
    tracing::debug!(live = registry::live(), "host functions after store teardown");
    Ok(())
}

struct Outcome {
    results: Vec<RawVal>,
    fuel_left: Option<u64>,
}

/// The functions every module run by the demo may import from `host`.
fn host_functions() -> Vec<HostFn> {
    vec![
        HostFn {
            module: "host",
            name: "add",
            params: vec![ValKind::I32, ValKind::I32],
            results: vec![ValKind::I32],
            body: Body::Raw(host_add),
        },
        HostFn {
            module: "host",
            name: "log_i32",
            params: vec![ValKind::I32],
            results: vec![],
            body: Body::Typed(host_log_i32),
        },
        HostFn {
            module: "host",
            name: "fail",
            params: vec![],
            results: vec![],
            body: Body::Raw(host_fail),
        },
    ]
}

fn host_add(args: &[RawVal], results: &mut [RawVal]) -> Result<(), String> {
    match (args[0].as_i32(), args[1].as_i32()) {
        (Some(a), Some(b)) => {
            results[0] = RawVal::i32(a.wrapping_add(b));
            Ok(())
        }
        _ => Err("host.add expects two i32 values".to_string()),
    }
}

fn host_log_i32(args: &[Val]) -> Result<Vec<Val>, String> {
    match args {
        [Val::I32(value)] => {
            println!("host.log_i32: {value}");
            Ok(Vec::new())
        }
        _ => Err("host.log_i32 expects one i32".to_string()),
    }
}

fn host_fail(_: &[RawVal], _: &mut [RawVal]) -> Result<(), String> {
    Err("host.fail called".to_string())
}

fn engine(args: &Args) -> anyhow::Result<Box<BridgeEngine>> {
    let mut config = bridge_config_new();
    if !bridge_config_cranelift_opt_level_set(&mut config, args.opt_level as u8) {
        bail!("unsupported opt level {:?}", args.opt_level);
    }
    bridge_config_consume_fuel_set(&mut config, args.fuel.is_some());
    bridge_engine_new_with_config(config).context("engine rejected configuration")
}

fn run(args: &Args, wasm: &[u8]) -> anyhow::Result<Outcome> {
    let engine = engine(args)?;
    let mut store =
        bridge_store_new(&engine, &registry::entry_points()).context("incomplete entry points")?;
    if let Some(fuel) = args.fuel {
        if !bridge_store_set_fuel(&mut store, fuel) {
            bail!("store refused fuel");
        }
    }

    let module = BridgeModule::new(&engine, wasm).context("compiling module")?;
    let funcs = host_functions()
        .into_iter()
        .map(|host| {
            let ty = BridgeFuncType::new(&engine, &host.params, &host.results);
            let convention = host.body.convention();
            let (module, name) = (host.module, host.name);
            let token = registry::register(host);
            match BridgeFunc::create(&mut store, &ty, token, convention) {
                Ok(func) => Ok((module, name, func)),
                Err(err) => {
                    // Never handed to the store, so no finalizer will run.
                    registry::discard(token);
                    Err(err).with_context(|| format!("creating {module}.{name}"))
                }
            }
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let instance = {
        let mut linker = BridgeLinker::new(&mut store);
        for (module, name, func) in &funcs {
            linker
                .define(module, name, &bridge::BridgeExtern::new((*func.func()).into()))
                .with_context(|| format!("defining {module}.{name}"))?;
        }
        linker.instantiate(&module).context("instantiating module")?
    };

    let entry = instance
        .export(&mut store, &args.entry)
        .ok_or_else(|| anyhow!("module has no export `{}`", args.entry))?;
    let entry = BridgeFunc::try_from(&entry)?;
    let results = call(&mut store, &entry, &args.args)?;

    let fuel_left = match args.fuel {
        Some(_) => {
            let mut left = 0;
            unsafe { bridge_store_get_fuel(&store, &mut left) }.then_some(left)
        }
        None => None,
    };
    Ok(Outcome { results, fuel_left })
}

fn call(store: &mut BridgeStore, func: &BridgeFunc, args: &[i32]) -> anyhow::Result<Vec<RawVal>> {
    let ty = func.func().ty(store.store());
    let raw_args: Vec<RawVal> = args.iter().copied().map(RawVal::i32).collect();
    let mut results = ty
        .results()
        .map(|ty| ValKind::of_type(&ty).map(RawVal::zero))
        .collect::<bridge::Result<Vec<_>>>()?;

    if let Some(trap) = func.call(store.store_mut(), &raw_args, &mut results)? {
        match trap.code() {
            Some(code) => bail!("trap (code {code}): {}", trap.message()),
            None => bail!("trap: {}", trap.message()),
        }
    }
    Ok(results)
}

fn show(val: &RawVal) -> String {
    if let Some(v) = val.as_i32() {
        v.to_string()
    } else if let Some(v) = val.as_i64() {
        v.to_string()
    } else if let Some(v) = val.as_f32() {
        v.to_string()
    } else if let Some(v) = val.as_f64() {
        v.to_string()
    } else {
        format!("{val:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUEST: &str = r#"
        (module
          (import "host" "add" (func $add (param i32 i32) (result i32)))
          (import "host" "log_i32" (func $log (param i32)))
          (import "host" "fail" (func $fail))
          (func (export "run") (param i32 i32) (result i32)
            (local $sum i32)
            (local.set $sum (call $add (local.get 0) (local.get 1)))
            (call $log (local.get $sum))
            (local.get $sum))
          (func (export "boom")
            call $fail)
          (func (export "spin")
            (loop $l (br $l))))
    "#;

    fn args(entry: &str, values: &[i32], fuel: Option<u64>) -> Args {
        Args {
            path: PathBuf::from("guest.wat"),
            entry: entry.to_string(),
            args: values.to_vec(),
            fuel,
            opt_level: OptLevel::Speed,
        }
    }

    #[test]
    fn parses_cli() {
        let parsed = Args::try_parse_from([
            "host-demo",
            "guest.wat",
            "--entry",
            "go",
            "--args",
            "1",
            "-2",
            "--fuel",
            "10",
            "--opt-level",
            "speed-and-size",
        ])
        .unwrap();
        assert_eq!(parsed.entry, "go");
        assert_eq!(parsed.args, vec![1, -2]);
        assert_eq!(parsed.fuel, Some(10));
        assert!(matches!(parsed.opt_level, OptLevel::SpeedAndSize));
    }

    #[test]
    fn runs_entry_through_host_functions() {
        let outcome = run(&args("run", &[2, 3], None), GUEST.as_bytes()).unwrap();
        assert_eq!(outcome.results, vec![RawVal::i32(5)]);
        assert!(outcome.fuel_left.is_none());
    }

    #[test]
    fn host_trap_becomes_an_error() {
        let err = run(&args("boom", &[], None), GUEST.as_bytes()).err().unwrap();
        assert!(format!("{err:#}").contains("host.fail called"));
    }

    #[test]
    fn fuel_runs_out() {
        let err = run(&args("spin", &[], Some(10_000)), GUEST.as_bytes()).err().unwrap();
        assert!(format!("{err:#}").contains("code 11"));
    }

    #[test]
    fn fuel_is_reported() {
        let outcome = run(&args("run", &[1, 1], Some(1_000_000)), GUEST.as_bytes()).unwrap();
        let left = outcome.fuel_left.unwrap();
        assert!(left < 1_000_000);
    }

    #[test]
    fn missing_entry_is_reported() {
        let err = run(&args("nope", &[], None), GUEST.as_bytes()).err().unwrap();
        assert!(err.to_string().contains("no export `nope`"));
    }
}
