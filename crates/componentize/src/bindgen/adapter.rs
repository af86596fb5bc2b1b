//! The adapter module sitting between the lifted exports and the core
//! module's implementations.
//!
//! For every exported function the adapter exports a wrapper under the
//! implementation's own name. The wrapper traps on reentrance, range checks
//! incoming pointers, allocates the result area and calls the implementation
//! imported from the `main` instance. Exports returning through memory also
//! get a `cabi_post_*` function that walks the returned value, frees every
//! buffer it owns, frees the area and clears the in-call flag.

use std::collections::HashMap;

use componentize_abi::{CoreType, PAGE_SIZE};
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, GlobalSection, GlobalType, ImportSection, Instruction, MemArg, MemoryType,
    Module, TypeSection, ValType,
};

use super::{Bindings, BoundsCheck, Cleanup, FunctionPlan};

/// Instance name the adapter imports the core module under.
pub const MAIN_INSTANCE: &str = "main";

/// Encode the adapter module, `None` when the world exports nothing.
pub fn adapter_module(bindings: &Bindings) -> Option<Vec<u8>> {
    if bindings.exports.is_empty() {
        return None;
    }
    let mut builder = AdapterBuilder::default();
    let memory = bindings.adapter_needs_memory();
    let realloc = bindings.adapter_needs_realloc();

    if realloc {
        let ty = builder.ty(
            &[CoreType::I32, CoreType::I32, CoreType::I32, CoreType::I32],
            &[CoreType::I32],
        );
        builder
            .imports
            .import(MAIN_INSTANCE, "cabi_realloc", EntityType::Function(ty));
        builder.realloc = Some(builder.inc_func());
    }
    if memory {
        builder.imports.import(
            MAIN_INSTANCE,
            "memory",
            EntityType::Memory(MemoryType {
                minimum: 0,
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            }),
        );
    }

    let mut impls = Vec::with_capacity(bindings.exports.len());
    for plan in &bindings.exports {
        let ty = builder.ty(&plan.lowered.params, &plan.lowered.results);
        builder
            .imports
            .import(MAIN_INSTANCE, &plan.core_name, EntityType::Function(ty));
        impls.push(builder.inc_func());
    }

    builder.globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: true,
            shared: false,
        },
        &ConstExpr::i32_const(0),
    );

    for (plan, callee) in bindings.exports.iter().zip(&impls) {
        let ty = builder.ty(&plan.lifted.params, &plan.lifted.results);
        builder.functions.function(ty);
        let index = builder.inc_func();
        builder.exports.export(&plan.core_name, ExportKind::Func, index);
        let body = builder.wrapper(plan, *callee);
        builder.code.function(&body);
    }
    for plan in &bindings.exports {
        let (Some(name), Some(area)) = (plan.post_return(), plan.result_area) else {
            continue;
        };
        let ty = builder.ty(&[CoreType::I32], &[]);
        builder.functions.function(ty);
        let index = builder.inc_func();
        builder.exports.export(&name, ExportKind::Func, index);
        let body = builder.post_return(plan, area.size, area.align);
        builder.code.function(&body);
    }

    let mut module = Module::new();
    module.section(&builder.types);
    module.section(&builder.imports);
    module.section(&builder.functions);
    module.section(&builder.globals);
    module.section(&builder.exports);
    module.section(&builder.code);
    Some(module.finish())
}

const IN_CALL: u32 = 0;

#[derive(Default)]
struct AdapterBuilder {
    types: TypeSection,
    type_map: HashMap<(Vec<CoreType>, Vec<CoreType>), u32>,
    imports: ImportSection,
    functions: FunctionSection,
    globals: GlobalSection,
    exports: ExportSection,
    code: CodeSection,
    funcs: u32,
    realloc: Option<u32>,
}

impl AdapterBuilder {
    fn ty(&mut self, params: &[CoreType], results: &[CoreType]) -> u32 {
        let key = (params.to_vec(), results.to_vec());
        if let Some(index) = self.type_map.get(&key) {
            return *index;
        }
        let index = self.type_map.len() as u32;
        self.types.ty().function(
            params.iter().copied().map(val_type),
            results.iter().copied().map(val_type),
        );
        self.type_map.insert(key, index);
        index
    }

    fn inc_func(&mut self) -> u32 {
        let index = self.funcs;
        self.funcs += 1;
        index
    }

    fn wrapper(&self, plan: &FunctionPlan, callee: u32) -> Function {
        let mut body = Body::new(plan.lifted.params.len() as u32);
        body.push(Instruction::GlobalGet(IN_CALL));
        body.push(Instruction::If(BlockType::Empty));
        body.push(Instruction::Unreachable);
        body.push(Instruction::End);
        body.push(Instruction::I32Const(1));
        body.push(Instruction::GlobalSet(IN_CALL));

        for check in &plan.bounds_checks {
            body.bounds_check(*check);
        }

        let params = plan.lifted.params.len() as u32;
        match (plan.result_area, self.realloc) {
            (Some(area), Some(realloc)) => {
                let ptr = body.local();
                body.push(Instruction::I32Const(0));
                body.push(Instruction::I32Const(0));
                body.push(Instruction::I32Const(area.align as i32));
                body.push(Instruction::I32Const(area.size as i32));
                body.push(Instruction::Call(realloc));
                body.push(Instruction::LocalSet(ptr));
                for i in 0..params {
                    body.push(Instruction::LocalGet(i));
                }
                body.push(Instruction::LocalGet(ptr));
                body.push(Instruction::Call(callee));
                // The flag stays set until post-return runs.
                body.push(Instruction::LocalGet(ptr));
            }
            _ => {
                for i in 0..params {
                    body.push(Instruction::LocalGet(i));
                }
                body.push(Instruction::Call(callee));
                body.push(Instruction::I32Const(0));
                body.push(Instruction::GlobalSet(IN_CALL));
            }
        }
        body.finish()
    }

    fn post_return(&self, plan: &FunctionPlan, size: u32, align: u32) -> Function {
        let mut body = Body::new(1);
        if let Some(realloc) = self.realloc {
            for entry in &plan.cleanup {
                body.cleanup(0, entry, realloc);
            }
            body.free(
                realloc,
                |b| b.push(Instruction::LocalGet(0)),
                |b| b.push(Instruction::I32Const(size as i32)),
                align,
            );
        }
        body.push(Instruction::I32Const(0));
        body.push(Instruction::GlobalSet(IN_CALL));
        body.finish()
    }
}

/// Instructions of one function body plus its extra `i32` locals.
struct Body {
    next_local: u32,
    params: u32,
    insns: Vec<Instruction<'static>>,
}

impl Body {
    fn new(params: u32) -> Self {
        Self {
            next_local: params,
            params,
            insns: Vec::new(),
        }
    }

    fn local(&mut self) -> u32 {
        let index = self.next_local;
        self.next_local += 1;
        index
    }

    fn push(&mut self, insn: Instruction<'static>) {
        self.insns.push(insn);
    }

    fn finish(self) -> Function {
        let mut func = Function::new([(self.next_local - self.params, ValType::I32)]);
        for insn in &self.insns {
            func.instruction(insn);
        }
        func.instruction(&Instruction::End);
        func
    }

    /// Trap unless `ptr + extent` fits in the current memory, computed in
    /// 64 bits so the sum cannot wrap.
    fn bounds_check(&mut self, check: BoundsCheck) {
        match check {
            BoundsCheck::Slice {
                ptr,
                len,
                elem_size,
            } => {
                self.push(Instruction::LocalGet(ptr));
                self.push(Instruction::I64ExtendI32U);
                self.push(Instruction::LocalGet(len));
                self.push(Instruction::I64ExtendI32U);
                self.push(Instruction::I64Const(i64::from(elem_size)));
                self.push(Instruction::I64Mul);
                self.push(Instruction::I64Add);
            }
            BoundsCheck::Record { ptr, size } => {
                self.push(Instruction::LocalGet(ptr));
                self.push(Instruction::I64ExtendI32U);
                self.push(Instruction::I64Const(i64::from(size)));
                self.push(Instruction::I64Add);
            }
        }
        self.push(Instruction::MemorySize(0));
        self.push(Instruction::I64ExtendI32U);
        self.push(Instruction::I64Const(PAGE_SIZE as i64));
        self.push(Instruction::I64Mul);
        self.push(Instruction::I64GtU);
        self.push(Instruction::If(BlockType::Empty));
        self.push(Instruction::Unreachable);
        self.push(Instruction::End);
    }

    /// `cabi_realloc(ptr, size, align, 0)`
    fn free(
        &mut self,
        realloc: u32,
        ptr: impl FnOnce(&mut Self),
        size: impl FnOnce(&mut Self),
        align: u32,
    ) {
        ptr(self);
        size(self);
        self.push(Instruction::I32Const(align as i32));
        self.push(Instruction::I32Const(0));
        self.push(Instruction::Call(realloc));
        self.push(Instruction::Drop);
    }

    fn load(&mut self, base: u32, offset: u32) {
        self.push(Instruction::LocalGet(base));
        self.push(Instruction::I32Load(memarg(offset, 2)));
    }

    fn cleanup(&mut self, base: u32, entry: &Cleanup, realloc: u32) {
        match entry {
            Cleanup::String { offset } => {
                let offset = *offset;
                self.free(realloc, |b| b.load(base, offset), |b| b.load(base, offset + 4), 1);
            }
            Cleanup::List {
                offset,
                elem_size,
                elem_align,
                elem,
            } => {
                let offset = *offset;
                if !elem.is_empty() {
                    let ptr = self.local();
                    let len = self.local();
                    let i = self.local();
                    let item = self.local();
                    self.load(base, offset);
                    self.push(Instruction::LocalSet(ptr));
                    self.load(base, offset + 4);
                    self.push(Instruction::LocalSet(len));
                    self.push(Instruction::I32Const(0));
                    self.push(Instruction::LocalSet(i));
                    self.push(Instruction::Block(BlockType::Empty));
                    self.push(Instruction::Loop(BlockType::Empty));
                    self.push(Instruction::LocalGet(i));
                    self.push(Instruction::LocalGet(len));
                    self.push(Instruction::I32GeU);
                    self.push(Instruction::BrIf(1));
                    self.push(Instruction::LocalGet(ptr));
                    self.push(Instruction::LocalGet(i));
                    self.push(Instruction::I32Const(*elem_size as i32));
                    self.push(Instruction::I32Mul);
                    self.push(Instruction::I32Add);
                    self.push(Instruction::LocalSet(item));
                    for nested in elem {
                        self.cleanup(item, nested, realloc);
                    }
                    self.push(Instruction::LocalGet(i));
                    self.push(Instruction::I32Const(1));
                    self.push(Instruction::I32Add);
                    self.push(Instruction::LocalSet(i));
                    self.push(Instruction::Br(0));
                    self.push(Instruction::End);
                    self.push(Instruction::End);
                }
                let elem_size = *elem_size as i32;
                self.free(
                    realloc,
                    |b| b.load(base, offset),
                    |b| {
                        b.load(base, offset + 4);
                        b.push(Instruction::I32Const(elem_size));
                        b.push(Instruction::I32Mul);
                    },
                    *elem_align,
                );
            }
            Cleanup::Variant {
                offset,
                disc_size,
                cases,
            } => {
                for (case, nested) in cases {
                    self.push(Instruction::LocalGet(base));
                    self.push(match disc_size {
                        1 => Instruction::I32Load8U(memarg(*offset, 0)),
                        2 => Instruction::I32Load16U(memarg(*offset, 1)),
                        _ => Instruction::I32Load(memarg(*offset, 2)),
                    });
                    self.push(Instruction::I32Const(*case as i32));
                    self.push(Instruction::I32Eq);
                    self.push(Instruction::If(BlockType::Empty));
                    for entry in nested {
                        self.cleanup(base, entry, realloc);
                    }
                    self.push(Instruction::End);
                }
            }
        }
    }
}

fn memarg(offset: u32, align: u32) -> MemArg {
    MemArg {
        offset: u64::from(offset),
        align,
        memory_index: 0,
    }
}

pub(crate) fn val_type(ty: CoreType) -> ValType {
    match ty {
        CoreType::I32 => ValType::I32,
        CoreType::I64 => ValType::I64,
        CoreType::F32 => ValType::F32,
        CoreType::F64 => ValType::F64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wit::{Features, SourceSet};

    fn adapter(wit: &str) -> Option<Vec<u8>> {
        let mut set = SourceSet::new();
        set.push_str("t.wit", wit);
        let (resolve, world) = set.resolve(&Features::default(), None).unwrap();
        adapter_module(&Bindings::generate(&resolve, world).unwrap())
    }

    fn exports(bytes: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        for payload in wasmparser::Parser::new(0).parse_all(bytes) {
            if let wasmparser::Payload::ExportSection(reader) = payload.unwrap() {
                for export in reader {
                    names.push(export.unwrap().name.to_string());
                }
            }
        }
        names
    }

    #[test]
    fn adapter_validates_and_exports_post_return() {
        let bytes = adapter(
            "package a:b;
             interface greet { hello: func(names: list<string>) -> list<option<string>>; }
             world w { export greet; }",
        )
        .unwrap();
        wasmparser::Validator::new().validate_all(&bytes).unwrap();
        assert_eq!(
            exports(&bytes),
            ["a:b/greet#hello", "cabi_post_a:b/greet#hello"]
        );
    }

    #[test]
    fn scalar_adapter_has_no_memory_import() {
        let bytes = adapter("package a:b; world w { export add: func(a: u32, b: u32) -> u32; }").unwrap();
        wasmparser::Validator::new().validate_all(&bytes).unwrap();
        assert_eq!(exports(&bytes), ["add"]);
        let text = imports(&bytes);
        assert_eq!(text, ["main.add"]);
    }

    #[test]
    fn no_exports_no_adapter() {
        assert!(adapter("package a:b; world w { import f: func(); }").is_none());
    }

    fn imports(bytes: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        for payload in wasmparser::Parser::new(0).parse_all(bytes) {
            if let wasmparser::Payload::ImportSection(reader) = payload.unwrap() {
                for import in reader {
                    let import = import.unwrap();
                    names.push(format!("{}.{}", import.module, import.name));
                }
            }
        }
        names
    }
}
