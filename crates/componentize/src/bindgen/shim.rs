//! Shim and fixup modules for imports lowered with memory options.
//!
//! Lowering an import that passes strings or lists needs the core module's
//! memory and `cabi_realloc`, which only exist once the core module is
//! instantiated, while the core module needs the lowered import to be
//! instantiated at all. The shim module breaks the cycle: it exports one
//! stub per such import that calls through a funcref table. After the core
//! module is instantiated the real lowered functions are written into the
//! table by instantiating the fixup module.
//!
//! Imports served by adapter modules take the slots after the lowerings:
//! an adapter is instantiated against the core module's memory, so its
//! exports only exist after the core module does.

use std::borrow::Cow;

use wasm_encoder::{
    CodeSection, ConstExpr, Elements, ElementSection, EntityType, ExportKind, ExportSection,
    Function, FunctionSection, ImportSection, Instruction, Module, RefType, TableSection,
    TableType, TypeSection,
};

use componentize_abi::CoreType;

use super::adapter::val_type;
use super::{Bindings, FunctionPlan};

/// Name the shim exports its table under.
pub const SHIM_TABLE: &str = "$imports";

/// A core import of the main module that an adapter module exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedImport {
    pub module: String,
    pub name: String,
    pub params: Vec<CoreType>,
    pub results: Vec<CoreType>,
}

/// The two glue modules plus the imports routed through them, in table order.
#[derive(Debug, Clone)]
pub struct ShimModules<'a> {
    pub shim: Vec<u8>,
    pub fixup: Vec<u8>,
    pub lowerings: Vec<&'a FunctionPlan>,
    pub adapted: Vec<AdaptedImport>,
}

impl ShimModules<'_> {
    /// Export name of the stub (and fixup import) for table slot `index`.
    pub fn slot_name(index: usize) -> String {
        index.to_string()
    }

    /// Table slot of the adapted import `module`.`name`.
    pub fn adapted_slot(&self, module: &str, name: &str) -> Option<usize> {
        let position = self
            .adapted
            .iter()
            .position(|a| a.module == module && a.name == name)?;
        Some(self.lowerings.len() + position)
    }
}

/// Encode the shim and fixup modules, `None` when every import can be
/// lowered without memory options and no import is adapted.
pub fn shim_modules(bindings: &Bindings, adapted: Vec<AdaptedImport>) -> Option<ShimModules<'_>> {
    let lowerings: Vec<&FunctionPlan> = bindings
        .imports
        .iter()
        .filter(|p| p.is_indirect_lowering())
        .collect();
    if lowerings.is_empty() && adapted.is_empty() {
        return None;
    }
    let signatures: Vec<(&[CoreType], &[CoreType])> = lowerings
        .iter()
        .map(|p| (p.lowered.params.as_slice(), p.lowered.results.as_slice()))
        .chain(adapted.iter().map(|a| (a.params.as_slice(), a.results.as_slice())))
        .collect();
    let count = signatures.len() as u64;
    let table = TableType {
        element_type: RefType::FUNCREF,
        table64: false,
        minimum: count,
        maximum: Some(count),
        shared: false,
    };

    let mut types = TypeSection::new();
    for (params, results) in &signatures {
        types.ty().function(
            params.iter().copied().map(val_type),
            results.iter().copied().map(val_type),
        );
    }

    let mut shim = Module::new();
    let mut tables = TableSection::new();
    tables.table(table);
    let mut functions = FunctionSection::new();
    let mut exports = ExportSection::new();
    let mut code = CodeSection::new();
    for (index, (params, _)) in signatures.iter().enumerate() {
        let index = index as u32;
        functions.function(index);
        exports.export(&ShimModules::slot_name(index as usize), ExportKind::Func, index);
        let mut body = Function::new([]);
        for param in 0..params.len() as u32 {
            body.instruction(&Instruction::LocalGet(param));
        }
        body.instruction(&Instruction::I32Const(index as i32));
        body.instruction(&Instruction::CallIndirect {
            type_index: index,
            table_index: 0,
        });
        body.instruction(&Instruction::End);
        code.function(&body);
    }
    exports.export(SHIM_TABLE, ExportKind::Table, 0);
    shim.section(&types);
    shim.section(&functions);
    shim.section(&tables);
    shim.section(&exports);
    shim.section(&code);

    let mut fixup = Module::new();
    let mut imports = ImportSection::new();
    imports.import("", SHIM_TABLE, EntityType::Table(table));
    for index in 0..signatures.len() {
        imports.import(
            "",
            &ShimModules::slot_name(index),
            EntityType::Function(index as u32),
        );
    }
    let mut elements = ElementSection::new();
    let funcs: Vec<u32> = (0..signatures.len() as u32).collect();
    elements.active(
        None,
        &ConstExpr::i32_const(0),
        Elements::Functions(Cow::Owned(funcs)),
    );
    fixup.section(&types);
    fixup.section(&imports);
    fixup.section(&elements);

    Some(ShimModules {
        shim: shim.finish(),
        fixup: fixup.finish(),
        lowerings,
        adapted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wit::{Features, SourceSet};

    #[test]
    fn string_imports_go_through_the_table() {
        let mut set = SourceSet::new();
        set.push_str(
            "t.wit",
            "package a:b;
             world w {
                 import log: func(msg: string);
                 import tick: func() -> u32;
                 import read: func() -> string;
             }",
        );
        let (resolve, world) = set.resolve(&Features::default(), None).unwrap();
        let bindings = Bindings::generate(&resolve, world).unwrap();
        let modules = shim_modules(&bindings, Vec::new()).unwrap();
        let names: Vec<&str> = modules.lowerings.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["log", "read"]);
        let mut validator = wasmparser::Validator::new();
        validator.validate_all(&modules.shim).unwrap();
        let mut validator = wasmparser::Validator::new();
        validator.validate_all(&modules.fixup).unwrap();
    }

    #[test]
    fn scalar_imports_need_no_shim() {
        let mut set = SourceSet::new();
        set.push_str("t.wit", "package a:b; world w { import tick: func() -> u32; }");
        let (resolve, world) = set.resolve(&Features::default(), None).unwrap();
        let bindings = Bindings::generate(&resolve, world).unwrap();
        assert!(shim_modules(&bindings, Vec::new()).is_none());
    }

    #[test]
    fn adapted_imports_follow_the_lowerings() {
        let mut set = SourceSet::new();
        set.push_str("t.wit", "package a:b; world w { import log: func(msg: string); }");
        let (resolve, world) = set.resolve(&Features::default(), None).unwrap();
        let bindings = Bindings::generate(&resolve, world).unwrap();
        let adapted = vec![AdaptedImport {
            module: "wasi_snapshot_preview1".to_string(),
            name: "fd_write".to_string(),
            params: vec![CoreType::I32; 4],
            results: vec![CoreType::I32],
        }];
        let modules = shim_modules(&bindings, adapted).unwrap();
        assert_eq!(modules.adapted_slot("wasi_snapshot_preview1", "fd_write"), Some(1));
        assert_eq!(modules.adapted_slot("wasi_snapshot_preview1", "fd_read"), None);
        let mut validator = wasmparser::Validator::new();
        validator.validate_all(&modules.shim).unwrap();
        let mut validator = wasmparser::Validator::new();
        validator.validate_all(&modules.fixup).unwrap();
    }
}
