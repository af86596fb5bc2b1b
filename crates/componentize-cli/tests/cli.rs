//! Runs the `componentize` binary against WIT and modules in a temporary
//! directory.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const MATH_WIT: &str = r#"
package example:math;

world math {
    export add: func(a: u32, b: u32) -> u32;
}
"#;

const MATH_WAT: &str = r#"
(module
    (func (export "add") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        i32.add))
"#;

/// A temp dir with `wit/math.wit` and `guest.wat`.
fn project() -> Result<TempDir, anyhow::Error> {
    let dir = TempDir::new()?;
    fs::create_dir_all(dir.path().join("wit"))?;
    fs::write(dir.path().join("wit/math.wit"), MATH_WIT)?;
    fs::write(dir.path().join("guest.wat"), MATH_WAT)?;
    Ok(dir)
}

fn componentize(dir: &Path, args: &[&str]) -> Result<Output, anyhow::Error> {
    let output = Command::new(env!("CARGO_BIN_EXE_componentize"))
        .current_dir(dir)
        .env_remove("COMPONENTIZE_WIT_PATH")
        .env_remove("COMPONENTIZE_WORLD")
        .env_remove("COMPONENTIZE_FEATURES")
        .env_remove("COMPONENTIZE_ALL_FEATURES")
        .env_remove("COMPONENTIZE_CONFIG")
        .env_remove("COMPONENTIZE_OUTPUT")
        .env_remove("RUST_LOG")
        .args(args)
        .output()?;
    Ok(output)
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn link_uses_the_default_wit_dir_and_output_name() -> Result<(), anyhow::Error> {
    let dir = project()?;
    let output = componentize(dir.path(), &["link", "guest.wat"])?;
    assert!(output.status.success(), "{}", stderr(&output));

    let bytes = fs::read(dir.path().join("guest.component.wasm"))?;
    assert!(is_component(&bytes));
    Ok(())
}

#[test]
fn link_honours_explicit_output_and_wit_path() -> Result<(), anyhow::Error> {
    let dir = project()?;
    fs::rename(dir.path().join("wit"), dir.path().join("interfaces"))?;
    let output = componentize(
        dir.path(),
        &["-d", "interfaces", "link", "guest.wat", "-o", "out.wasm"],
    )?;
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(dir.path().join("out.wasm").is_file());
    Ok(())
}

#[test]
fn resolution_failures_exit_with_3_and_a_hint() -> Result<(), anyhow::Error> {
    let dir = project()?;
    fs::write(
        dir.path().join("wit/math.wit"),
        "package example:math;\nworld math { export get: func() -> missing-type; }\n",
    )?;
    let output = componentize(dir.path(), &["link", "guest.wat"])?;
    assert_eq!(output.status.code(), Some(3));
    let text = stderr(&output);
    assert!(text.starts_with("error: "), "{text}");
    assert!(text.contains("missing-type"), "{text}");
    assert!(text.contains("hint: "), "{text}");
    assert!(!dir.path().join("guest.component.wasm").exists());
    Ok(())
}

#[test]
fn parse_failures_exit_with_2() -> Result<(), anyhow::Error> {
    let dir = project()?;
    fs::write(dir.path().join("wit/math.wit"), "package example:math;\nworld {\n")?;
    let output = componentize(dir.path(), &["abi"])?;
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("math.wit:2:"), "{}", stderr(&output));
    Ok(())
}

#[test]
fn link_failures_exit_with_4() -> Result<(), anyhow::Error> {
    let dir = project()?;
    fs::write(dir.path().join("guest.wat"), "(module)")?;
    let output = componentize(dir.path(), &["link", "guest.wat"])?;
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("componentize abi"), "{}", stderr(&output));
    Ok(())
}

#[test]
fn missing_modules_exit_with_5() -> Result<(), anyhow::Error> {
    let dir = project()?;
    let output = componentize(dir.path(), &["link", "absent.wasm"])?;
    assert_eq!(output.status.code(), Some(5));
    Ok(())
}

#[test]
fn wit_and_abi_print_to_stdout() -> Result<(), anyhow::Error> {
    let dir = project()?;
    let wit = componentize(dir.path(), &["wit"])?;
    assert!(wit.status.success(), "{}", stderr(&wit));
    let text = String::from_utf8(wit.stdout)?;
    assert!(text.contains("add: func(a: u32, b: u32) -> u32"), "{text}");

    let abi = componentize(dir.path(), &["abi"])?;
    assert!(abi.status.success(), "{}", stderr(&abi));
    let text = String::from_utf8(abi.stdout)?;
    assert!(text.contains("lowered: (i32, i32) -> (i32)"), "{text}");
    Ok(())
}

#[test]
fn config_file_supplies_defaults() -> Result<(), anyhow::Error> {
    let dir = project()?;
    fs::rename(dir.path().join("wit"), dir.path().join("idl"))?;
    fs::write(
        dir.path().join("componentize.toml"),
        "[wit]\npaths = [\"idl\"]\nworld = \"math\"\n\n[output]\npath = \"dist.wasm\"\n",
    )?;
    let output = componentize(dir.path(), &["link", "guest.wat"])?;
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(dir.path().join("dist.wasm").is_file());
    Ok(())
}

#[test]
fn broken_config_exits_with_1() -> Result<(), anyhow::Error> {
    let dir = project()?;
    fs::write(dir.path().join("custom.toml"), "[wit\n")?;
    let output = componentize(dir.path(), &["-c", "custom.toml", "wit"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Failed to parse config"), "{}", stderr(&output));
    Ok(())
}

#[test]
fn embed_writes_the_module_with_metadata() -> Result<(), anyhow::Error> {
    let dir = project()?;
    let output = componentize(dir.path(), &["embed", "guest.wat"])?;
    assert!(output.status.success(), "{}", stderr(&output));
    let bytes = fs::read(dir.path().join("guest.embed.wasm"))?;
    // core module preamble
    assert_eq!(bytes.get(..8), Some(&[0, 0x61, 0x73, 0x6d, 1, 0, 0, 0][..]));
    Ok(())
}

#[test]
fn adapters_are_given_as_name_equals_path() -> Result<(), anyhow::Error> {
    let dir = project()?;
    fs::write(
        dir.path().join("wit/math.wit"),
        "package example:math;\nworld math {\n    import seed: func() -> u32;\n    export add: func(a: u32, b: u32) -> u32;\n}\n",
    )?;
    fs::write(
        dir.path().join("guest.wat"),
        r#"(module
            (import "rng" "next" (func $next (result i32)))
            (memory (export "memory") 1)
            (func (export "add") (param i32 i32) (result i32)
                (i32.add (i32.add (local.get 0) (local.get 1)) (call $next))))"#,
    )?;
    fs::write(
        dir.path().join("rng.wat"),
        r#"(module
            (import "$root" "seed" (func $seed (result i32)))
            (func (export "next") (result i32) call $seed))"#,
    )?;

    let output = componentize(dir.path(), &["link", "guest.wat"])?;
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("`rng`.`next`"), "{}", stderr(&output));

    let output = componentize(dir.path(), &["link", "guest.wat", "--adapt", "rng=rng.wat"])?;
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(is_component(&fs::read(dir.path().join("guest.component.wasm"))?));
    Ok(())
}

/// Component binaries carry layer 1 in the version field.
fn is_component(bytes: &[u8]) -> bool {
    bytes.get(..8) == Some(&[0, 0x61, 0x73, 0x6d, 0x0d, 0, 1, 0][..])
}
