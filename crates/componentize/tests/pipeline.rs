//! End-to-end tests: WIT and a core module in, a validated component out.

mod common;

use componentize::link::metadata::embedded_worlds;
use componentize::link::{CoreModule, LinkError};
use componentize::wit::{ResolutionError, WitError};
use componentize::{Componentizer, Error, link};
use tempfile::TempDir;

use common::*;

#[test]
fn math_world_links_without_memory() -> Result<(), anyhow::Error> {
    let builder = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_bytes(MATH_WAT);
    let component = builder.componentize()?;
    link::validate(component.bytes())?;

    assert_eq!(component_exports(component.bytes())?, vec!["add"]);
    assert!(component_imports(component.bytes())?.is_empty());
    // main module and adapter
    assert_eq!(core_module_count(component.bytes())?, 2);

    let abi = builder.abi_dump()?;
    assert!(abi.contains("lifted:  (i32, i32) -> (i32)"), "{abi}");
    assert!(abi.contains("lowered: (i32, i32) -> (i32)"), "{abi}");
    assert!(abi.contains("post-return: none"), "{abi}");
    assert!(!abi.contains("result area"), "{abi}");
    Ok(())
}

#[test]
fn greet_world_returns_strings_through_a_result_area() -> Result<(), anyhow::Error> {
    let builder = Componentizer::new()
        .wit_text("greet.wit", GREET_WIT)
        .module_bytes(greet_wat());
    let component = builder.componentize()?;

    assert_eq!(
        component_exports(component.bytes())?,
        vec!["example:greet/greet"]
    );

    let abi = builder.abi_dump()?;
    assert!(abi.contains("core export: example:greet/greet#hello"), "{abi}");
    assert!(abi.contains("lifted:  (i32, i32) -> (i32)"), "{abi}");
    assert!(abi.contains("lowered: (i32, i32, i32) -> ()"), "{abi}");
    assert!(abi.contains("result area: 8 bytes, align 4"), "{abi}");
    assert!(
        abi.contains("post-return: cabi_post_example:greet/greet#hello, frees 1 buffer(s)"),
        "{abi}"
    );
    Ok(())
}

#[test]
fn imports_passing_strings_go_through_the_shim_table() -> Result<(), anyhow::Error> {
    let component = Componentizer::new()
        .wit_text("logger.wit", LOGGER_WIT)
        .module_bytes(LOGGER_WAT)
        .componentize()?;

    assert_eq!(component_imports(component.bytes())?, vec!["log"]);
    assert_eq!(component_exports(component.bytes())?, vec!["run"]);
    // main, adapter, shim and fixup
    assert_eq!(core_module_count(component.bytes())?, 4);
    Ok(())
}

#[test]
fn exported_resources_are_defined_by_the_component() -> Result<(), anyhow::Error> {
    let component = Componentizer::new()
        .wit_text("counter.wit", COUNTER_WIT)
        .module_bytes(COUNTER_WAT)
        .componentize()?;
    assert_eq!(
        component_exports(component.bytes())?,
        vec!["example:counter/api"]
    );
    Ok(())
}

#[test]
fn exported_interfaces_reexport_their_named_types() -> Result<(), anyhow::Error> {
    let component = Componentizer::new()
        .wit_text("shapes.wit", SHAPES_WIT)
        .module_bytes(SHAPES_WAT)
        .componentize()?;
    assert_eq!(
        component_exports(component.bytes())?,
        vec!["example:shapes/geometry"]
    );
    Ok(())
}

#[test]
fn adapters_provide_imports_on_top_of_the_world() -> Result<(), anyhow::Error> {
    let component = Componentizer::new()
        .wit_text("clock.wit", CLOCK_WIT)
        .module_bytes(CLOCK_WAT)
        .adapter("preview1", PREVIEW1_ADAPTER_WAT)
        .componentize()?;

    assert_eq!(component_imports(component.bytes())?, vec!["now"]);
    assert_eq!(component_exports(component.bytes())?, vec!["elapsed"]);
    // main, export adapter, preview1 adapter, shim and fixup
    assert_eq!(core_module_count(component.bytes())?, 5);
    Ok(())
}

#[test]
fn unadapted_imports_are_unknown() {
    let err = Componentizer::new()
        .wit_text("clock.wit", CLOCK_WIT)
        .module_bytes(CLOCK_WAT)
        .componentize()
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::Link(LinkError::UnknownImport { module, .. }) if module == "preview1"
    ));
}

#[test]
fn undefined_type_fails_resolution_and_writes_nothing() -> Result<(), anyhow::Error> {
    let dir = TempDir::new()?;
    let output = dir.path().join("broken.component.wasm");

    let result = Componentizer::new()
        .wit_text("broken.wit", UNDEFINED_TYPE_WIT)
        .module_bytes(MATH_WAT)
        .componentize()
        .and_then(|component| component.write_to(&output));

    let err = result.expect_err("undefined types must not link");
    assert!(err.is_resolution(), "{err}");
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("missing-type"), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn syntax_errors_report_file_line_and_column() {
    let err = Componentizer::new()
        .wit_text("bad.wit", "package a:b;\nworld w {\n    export f: func( -> u32;\n}\n")
        .module_bytes(MATH_WAT)
        .componentize()
        .unwrap_err();
    assert!(err.is_parse(), "{err}");
    assert_eq!(err.exit_code(), 2);
    let Error::Wit(WitError::Parse(parse)) = &err else {
        panic!("expected a parse error, got {err:?}");
    };
    assert_eq!(parse.file.to_str(), Some("bad.wit"));
    assert_eq!(parse.line, 3);
    assert!(err.to_string().starts_with("bad.wit:3:"), "{err}");
}

#[test]
fn missing_export_is_a_link_error() {
    let err = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_bytes("(module)")
        .componentize()
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::Link(LinkError::MissingExport { name, .. }) if name == "add"
    ));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn signature_mismatch_names_both_signatures() {
    let err = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_bytes(r#"(module (func (export "add") (param i64 i64) (result i64) local.get 0))"#)
        .componentize()
        .unwrap_err();
    let Error::AbiMismatch(mismatch) = &err else {
        panic!("expected a signature mismatch, got {err:?}");
    };
    assert_eq!(mismatch.item, "add");
    assert_eq!(mismatch.expected, "(i32, i32) -> (i32)");
    assert_eq!(mismatch.found, "(i64, i64) -> (i64)");
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn undeclared_imports_are_rejected() {
    let module = r#"(module
        (import "env" "abort" (func))
        (func (export "add") (param i32 i32) (result i32) local.get 0))"#;
    let err = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_bytes(module)
        .componentize()
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::Link(LinkError::UnknownImport { module, name }) if module == "env" && name == "abort"
    ));
}

#[test]
fn string_exports_need_memory_and_realloc() {
    let no_memory = r#"(module
        (func (export "example:greet/greet#hello") (param i32 i32 i32)))"#;
    let err = Componentizer::new()
        .wit_text("greet.wit", GREET_WIT)
        .module_bytes(no_memory)
        .componentize()
        .unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::MissingMemory)), "{err}");

    let no_realloc = r#"(module
        (memory (export "memory") 1)
        (func (export "example:greet/greet#hello") (param i32 i32 i32)))"#;
    let err = Componentizer::new()
        .wit_text("greet.wit", GREET_WIT)
        .module_bytes(no_realloc)
        .componentize()
        .unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::MissingRealloc)), "{err}");
}

#[test]
fn components_are_not_core_modules() -> Result<(), anyhow::Error> {
    let component = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_bytes(MATH_WAT)
        .componentize()?;
    let err = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_bytes(component.into_bytes())
        .componentize()
        .unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::NotACoreModule)), "{err}");
    Ok(())
}

#[test]
fn wit_directories_with_deps_and_module_directories() -> Result<(), anyhow::Error> {
    let dir = TempDir::new()?;
    let wit = dir.path().join("wit");
    write_file(
        &wit,
        "deps/types/types.wit",
        "package example:types;\ninterface numbers { type count = u32; }\n",
    )?;
    write_file(
        &wit,
        "world.wit",
        "package example:app;\n\
         world app {\n\
             use example:types/numbers.{count};\n\
             export add: func(a: count, b: count) -> count;\n\
         }\n",
    )?;
    let module_dir = dir.path().join("build");
    std::fs::create_dir_all(&module_dir)?;
    std::fs::write(module_dir.join("main.wasm"), wat::parse_str(MATH_WAT)?)?;

    let component = Componentizer::new()
        .wit_path(&wit)
        .module_path(&module_dir)
        .componentize()?;
    let output = dir.path().join("out/app.component.wasm");
    std::fs::create_dir_all(dir.path().join("out"))?;
    component.write_to(&output)?;
    let written = std::fs::read(&output)?;
    assert_eq!(written, component.bytes());
    link::validate(&written)?;
    Ok(())
}

#[test]
fn wat_files_are_assembled() -> Result<(), anyhow::Error> {
    let dir = TempDir::new()?;
    write_file(dir.path(), "math.wat", MATH_WAT)?;
    write_file(dir.path(), "math.wit", MATH_WIT)?;
    let component = Componentizer::new()
        .wit_path(dir.path().join("math.wit"))
        .module_path(dir.path().join("math.wat"))
        .componentize()?;
    assert!(!component.is_empty());
    Ok(())
}

#[test]
fn missing_module_file_is_an_io_error() {
    let err = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_path("/nonexistent/guest.wasm")
        .componentize()
        .unwrap_err();
    assert!(err.is_io(), "{err}");
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn world_must_be_selected_when_several_exist() -> Result<(), anyhow::Error> {
    let wit = "package a:b;
        world first { export add: func(a: u32, b: u32) -> u32; }
        world second { export add: func(a: u32, b: u32) -> u32; }";
    let err = Componentizer::new()
        .wit_text("two.wit", wit)
        .module_bytes(MATH_WAT)
        .componentize()
        .unwrap_err();
    assert!(
        matches!(
            &err,
            Error::Wit(WitError::Resolution(ResolutionError::WorldSelection(msg)))
                if msg.contains("first") && msg.contains("second")
        ),
        "{err}"
    );

    let component = Componentizer::new()
        .wit_text("two.wit", wit)
        .world("a:b/second")
        .module_bytes(MATH_WAT)
        .componentize()?;
    assert_eq!(component_exports(component.bytes())?, vec!["add"]);
    Ok(())
}

#[test]
fn unstable_items_follow_feature_flags() -> Result<(), anyhow::Error> {
    let wit = r#"
package a:b@1.0.0;

world w {
    export add: func(a: u32, b: u32) -> u32;
    @unstable(feature = extra)
    export sub: func(a: u32, b: u32) -> u32;
}
"#;
    let without = Componentizer::new().wit_text("w.wit", wit).abi_dump()?;
    assert!(!without.contains("export sub"), "{without}");

    let with = Componentizer::new()
        .wit_text("w.wit", wit)
        .features(["extra"])
        .abi_dump()?;
    assert!(with.contains("export sub"), "{with}");

    let all = Componentizer::new()
        .wit_text("w.wit", wit)
        .all_features(true)
        .abi_dump()?;
    assert_eq!(all, with);
    Ok(())
}

#[test]
fn embed_attaches_the_world_to_the_module() -> Result<(), anyhow::Error> {
    let embedded = Componentizer::new()
        .wit_text("math.wit", MATH_WIT)
        .module_bytes(MATH_WAT)
        .embed()?;
    let core = CoreModule::parse(&embedded)?;
    assert!(core.export("add").is_some());

    let worlds = embedded_worlds(&embedded)?;
    assert_eq!(worlds.len(), 1);
    assert_eq!(worlds[0].0, "component-type:math");
    Ok(())
}

#[test]
fn wit_dump_prints_the_selected_world() -> Result<(), anyhow::Error> {
    let text = Componentizer::new()
        .wit_text("greet.wit", GREET_WIT)
        .wit_dump()?;
    assert!(text.contains("package example:greet;"), "{text}");
    assert!(text.contains("world greeter {"), "{text}");
    assert!(text.contains("hello: func(name: string) -> string;"), "{text}");
    Ok(())
}
