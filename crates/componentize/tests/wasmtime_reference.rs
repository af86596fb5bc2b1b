//! Runs linked components in wasmtime, the reference host for the
//! component model.

mod common;

use anyhow::{Context, anyhow};
use componentize::Componentizer;
use wasmtime::component::{Component, Func, Instance, Linker, Val};
use wasmtime::{Config, Engine, Store};

use common::*;

/// `greeter` plus a world-level export reporting the guest's live heap
/// allocations.
const COUNTED_GREET_WIT: &str = r#"
package example:greet;

interface greet {
    hello: func(name: string) -> string;
}

world greeter {
    export greet;
    export live-allocations: func() -> u32;
}
"#;

/// Counts buffers handed out by `cabi_realloc` and not yet freed. `hello`
/// copies the name into a fresh buffer, frees the argument it now owns and
/// returns the copy.
const COUNTED_GREET_WAT: &str = r#"
(module
    (memory (export "memory") 1)
    (global $heap (mut i32) (i32.const 1024))
    (global $live (mut i32) (i32.const 0))
    (func $realloc (export "cabi_realloc")
        (param $old i32) (param $old_size i32) (param $align i32) (param $new_size i32)
        (result i32)
        (local $ptr i32)
        (if (i32.eqz (local.get $new_size))
            (then
                (if (local.get $old)
                    (then (global.set $live (i32.sub (global.get $live) (i32.const 1)))))
                (return (i32.const 0))))
        (if (i32.eqz (local.get $old))
            (then (global.set $live (i32.add (global.get $live) (i32.const 1)))))
        (local.set $ptr
            (i32.and
                (i32.add (global.get $heap) (i32.sub (local.get $align) (i32.const 1)))
                (i32.xor (i32.sub (local.get $align) (i32.const 1)) (i32.const -1))))
        (global.set $heap (i32.add (local.get $ptr) (local.get $new_size)))
        (if (local.get $old)
            (then (memory.copy (local.get $ptr) (local.get $old) (local.get $old_size))))
        (local.get $ptr))
    (func (export "example:greet/greet#hello") (param $ptr i32) (param $len i32) (param $ret i32)
        (local $copy i32)
        (local.set $copy
            (call $realloc (i32.const 0) (i32.const 0) (i32.const 1) (local.get $len)))
        (memory.copy (local.get $copy) (local.get $ptr) (local.get $len))
        (drop (call $realloc (local.get $ptr) (local.get $len) (i32.const 1) (i32.const 0)))
        (i32.store (local.get $ret) (local.get $copy))
        (i32.store offset=4 (local.get $ret) (local.get $len)))
    (func (export "live-allocations") (result i32)
        global.get $live))
"#;

/// A linked component instantiated with no host imports.
fn instantiate(wit: &str, wat: &str) -> Result<(Store<()>, Instance), anyhow::Error> {
    let bytes = Componentizer::new()
        .wit_text("world.wit", wit)
        .module_bytes(wat)
        .componentize()?;

    let mut config = Config::new();
    config.wasm_component_model(true);
    let engine = Engine::new(&config)?;
    let component = Component::new(&engine, bytes.bytes())?;
    let linker: Linker<()> = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let instance = linker.instantiate(&mut store, &component)?;
    Ok((store, instance))
}

/// Call `func` and run its post-return, returning the single result.
fn call(store: &mut Store<()>, func: Func, args: &[Val]) -> Result<Val, anyhow::Error> {
    let mut results = vec![Val::Bool(false)];
    func.call(&mut *store, args, &mut results)?;
    func.post_return(&mut *store)?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no result"))
}

#[test]
fn scalar_exports_run_without_memory() -> Result<(), anyhow::Error> {
    let (mut store, instance) = instantiate(MATH_WIT, MATH_WAT)?;
    let add = instance
        .get_func(&mut store, "add")
        .context("`add` is not exported")?;

    let sum = call(&mut store, add, &[Val::U32(2), Val::U32(40)])?;
    assert_eq!(sum, Val::U32(42));
    Ok(())
}

#[test]
fn post_return_frees_every_returned_buffer() -> Result<(), anyhow::Error> {
    let (mut store, instance) = instantiate(COUNTED_GREET_WIT, COUNTED_GREET_WAT)?;
    let greet = instance
        .get_export_index(&mut store, None, "example:greet/greet")
        .context("`example:greet/greet` is not exported")?;
    let hello = instance
        .get_export_index(&mut store, Some(&greet), "hello")
        .and_then(|index| instance.get_func(&mut store, index))
        .context("`hello` is not exported")?;
    let live = instance
        .get_func(&mut store, "live-allocations")
        .context("`live-allocations` is not exported")?;

    for name in ["world", "component model"] {
        let greeting = call(&mut store, hello, &[Val::String(name.to_string())])?;
        assert_eq!(greeting, Val::String(name.to_string()));
        // The copy and the result area are both gone once post-return ran.
        assert_eq!(call(&mut store, live, &[])?, Val::U32(0));
    }
    Ok(())
}
