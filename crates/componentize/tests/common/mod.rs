//! Common test utilities and fixtures.
//!
//! WIT worlds paired with hand-written core modules that implement them,
//! plus helpers to inspect the components the linker produces.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use wasmparser::{Parser, Payload};

// =============================================================================
// WIT Worlds
// =============================================================================

/// Scalar-only world: no memory traffic at all.
pub const MATH_WIT: &str = r#"
package example:math;

world math {
    export add: func(a: u32, b: u32) -> u32;
}
"#;

/// Strings in both directions through an exported interface.
pub const GREET_WIT: &str = r#"
package example:greet;

interface greet {
    hello: func(name: string) -> string;
}

world greeter {
    export greet;
}
"#;

/// A world-level import taking a string, and an export calling it.
pub const LOGGER_WIT: &str = r#"
package example:logger;

world logger {
    import log: func(msg: string);
    export run: func();
}
"#;

/// A resource defined and exported by the component.
pub const COUNTER_WIT: &str = r#"
package example:counter;

interface api {
    resource counter {
        constructor(start: u32);
        get: func() -> u32;
    }
}

world counters {
    export api;
}
"#;

pub const SHAPES_WIT: &str = r#"
package example:shapes;

interface geometry {
    record point {
        x: s32,
        y: s32,
    }
    type coordinate = s32;
    manhattan: func(p: point) -> coordinate;
}

world shapes {
    export geometry;
}
"#;

/// A world the core module reaches only through an adapter module.
pub const CLOCK_WIT: &str = r#"
package example:clock;

world clock {
    import now: func() -> u64;
    export elapsed: func() -> u64;
}
"#;

/// Refers to a type that is never defined.
pub const UNDEFINED_TYPE_WIT: &str = r#"
package example:broken;

world broken {
    export get: func() -> missing-type;
}
"#;

// =============================================================================
// Core Modules
// =============================================================================

pub const MATH_WAT: &str = r#"
(module
    (func (export "add") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        i32.add))
"#;

/// Bump allocator shared by the modules that need `cabi_realloc`.
const REALLOC_WAT: &str = r#"
    (global $heap (mut i32) (i32.const 1024))
    (func $realloc (export "cabi_realloc")
        (param $old i32) (param $old_size i32) (param $align i32) (param $new_size i32)
        (result i32)
        (local $ptr i32)
        (if (i32.eqz (local.get $new_size))
            (then (return (i32.const 0))))
        (local.set $ptr
            (i32.and
                (i32.add (global.get $heap) (i32.sub (local.get $align) (i32.const 1)))
                (i32.xor (i32.sub (local.get $align) (i32.const 1)) (i32.const -1))))
        (global.set $heap (i32.add (local.get $ptr) (local.get $new_size)))
        (if (local.get $old)
            (then (memory.copy (local.get $ptr) (local.get $old) (local.get $old_size))))
        (local.get $ptr))
"#;

/// Echoes the name back: copies it into a fresh buffer and writes the
/// pointer and length through the return pointer.
pub fn greet_wat() -> String {
    format!(
        r#"
(module
    (memory (export "memory") 1)
    {REALLOC_WAT}
    (func (export "example:greet/greet#hello") (param $ptr i32) (param $len i32) (param $ret i32)
        (local $copy i32)
        (local.set $copy
            (call $realloc (i32.const 0) (i32.const 0) (i32.const 1) (local.get $len)))
        (memory.copy (local.get $copy) (local.get $ptr) (local.get $len))
        (i32.store (local.get $ret) (local.get $copy))
        (i32.store offset=4 (local.get $ret) (local.get $len))))
"#
    )
}

pub const LOGGER_WAT: &str = r#"
(module
    (import "$root" "log" (func $log (param i32 i32)))
    (memory (export "memory") 1)
    (data (i32.const 16) "hello")
    (func (export "run")
        (call $log (i32.const 16) (i32.const 5))))
"#;

pub const COUNTER_WAT: &str = r#"
(module
    (import "[export]example:counter/api" "[resource-new]counter"
        (func $new (param i32) (result i32)))
    (func (export "example:counter/api#[constructor]counter") (param i32) (result i32)
        (call $new (local.get 0)))
    (func (export "example:counter/api#[method]counter.get") (param i32) (result i32)
        local.get 0))
"#;

pub const SHAPES_WAT: &str = r#"
(module
    (func (export "example:shapes/geometry#manhattan") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        i32.add))
"#;

/// Imports its clock from `preview1` instead of the world.
pub const CLOCK_WAT: &str = r#"
(module
    (import "preview1" "clock" (func $clock (result i64)))
    (memory (export "memory") 1)
    (func (export "elapsed") (result i64)
        call $clock))
"#;

/// Implements `preview1.clock` on top of the world's `now` import.
pub const PREVIEW1_ADAPTER_WAT: &str = r#"
(module
    (import "env" "memory" (memory 0))
    (import "$root" "now" (func $now (result i64)))
    (func (export "clock") (result i64)
        call $now))
"#;

// =============================================================================
// Helpers
// =============================================================================

/// Write `text` to `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, text: &str) -> Result<(), anyhow::Error> {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}

/// Names of the top-level exports of a component.
pub fn component_exports(bytes: &[u8]) -> Result<Vec<String>, anyhow::Error> {
    let mut names = Vec::new();
    let mut depth = 0usize;
    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::ModuleSection { .. } | Payload::ComponentSection { .. } => depth += 1,
            Payload::End(_) => depth = depth.saturating_sub(1),
            Payload::ComponentExportSection(reader) if depth == 0 => {
                for export in reader {
                    names.push(export?.name.0.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(names)
}

/// Names of the top-level imports of a component.
pub fn component_imports(bytes: &[u8]) -> Result<Vec<String>, anyhow::Error> {
    let mut names = Vec::new();
    let mut depth = 0usize;
    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::ModuleSection { .. } | Payload::ComponentSection { .. } => depth += 1,
            Payload::End(_) => depth = depth.saturating_sub(1),
            Payload::ComponentImportSection(reader) if depth == 0 => {
                for import in reader {
                    names.push(import?.name.0.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(names)
}

/// Number of core modules embedded in a component.
pub fn core_module_count(bytes: &[u8]) -> Result<usize, anyhow::Error> {
    let mut count = 0;
    for payload in Parser::new(0).parse_all(bytes) {
        if let Payload::ModuleSection { .. } = payload? {
            count += 1;
        }
    }
    Ok(count)
}
