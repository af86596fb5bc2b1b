//! What the linker needs to know about the core module: its imports,
//! exports and function signatures.

use componentize_abi::CoreType;
use indexmap::IndexMap;
use wasmparser::{Encoding, ExternalKind, FuncType, Parser, Payload, TypeRef, ValType};

use super::error::LinkError;

/// Flat signature of a core function. Parameters or results outside the
/// four numeric types make the signature unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSig {
    pub params: Vec<CoreType>,
    pub results: Vec<CoreType>,
}

impl FuncSig {
    fn from_wasm(ty: &FuncType) -> Option<Self> {
        let convert = |types: &[ValType]| -> Option<Vec<CoreType>> {
            types.iter().map(|t| core_type(*t)).collect()
        };
        Some(Self {
            params: convert(ty.params())?,
            results: convert(ty.results())?,
        })
    }

    pub fn matches(&self, params: &[CoreType], results: &[CoreType]) -> bool {
        self.params == params && self.results == results
    }

    pub fn describe(&self) -> String {
        describe(&self.params, &self.results)
    }
}

pub(crate) fn describe(params: &[CoreType], results: &[CoreType]) -> String {
    let list = |types: &[CoreType]| types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ");
    format!("({}) -> ({})", list(params), list(results))
}

fn core_type(ty: ValType) -> Option<CoreType> {
    match ty {
        ValType::I32 => Some(CoreType::I32),
        ValType::I64 => Some(CoreType::I64),
        ValType::F32 => Some(CoreType::F32),
        ValType::F64 => Some(CoreType::F64),
        _ => None,
    }
}

/// Kind of an imported or exported core item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreItem {
    /// A function; `None` when its type uses non-numeric values.
    Func(Option<FuncSig>),
    Memory,
    Table,
    Global,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreImport {
    pub module: String,
    pub name: String,
    pub item: CoreItem,
}

/// Summary of a parsed core module.
#[derive(Debug, Clone, Default)]
pub struct CoreModule {
    pub imports: Vec<CoreImport>,
    pub exports: IndexMap<String, CoreItem>,
}

impl CoreModule {
    pub fn parse(bytes: &[u8]) -> Result<Self, LinkError> {
        let invalid = |e: wasmparser::BinaryReaderError| LinkError::InvalidModule(e.to_string());
        let mut types: Vec<Option<FuncSig>> = Vec::new();
        let mut funcs: Vec<u32> = Vec::new();
        let mut module = CoreModule::default();
        let mut exports = Vec::new();

        for payload in Parser::new(0).parse_all(bytes) {
            match payload.map_err(invalid)? {
                Payload::Version { encoding, .. } => {
                    if encoding == Encoding::Component {
                        return Err(LinkError::NotACoreModule);
                    }
                }
                Payload::TypeSection(reader) => {
                    for ty in reader.into_iter_err_on_gc_types() {
                        types.push(FuncSig::from_wasm(&ty.map_err(invalid)?));
                    }
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import.map_err(invalid)?;
                        let item = match import.ty {
                            TypeRef::Func(index) => {
                                funcs.push(index);
                                CoreItem::Func(types.get(index as usize).cloned().flatten())
                            }
                            TypeRef::Memory(_) => CoreItem::Memory,
                            TypeRef::Table(_) => CoreItem::Table,
                            TypeRef::Global(_) => CoreItem::Global,
                            _ => CoreItem::Tag,
                        };
                        module.imports.push(CoreImport {
                            module: import.module.to_string(),
                            name: import.name.to_string(),
                            item,
                        });
                    }
                }
                Payload::FunctionSection(reader) => {
                    for ty in reader {
                        funcs.push(ty.map_err(invalid)?);
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export.map_err(invalid)?;
                        exports.push((export.name.to_string(), export.kind, export.index));
                    }
                }
                _ => {}
            }
        }

        for (name, kind, index) in exports {
            let item = match kind {
                ExternalKind::Func => CoreItem::Func(
                    funcs
                        .get(index as usize)
                        .and_then(|ty| types.get(*ty as usize))
                        .cloned()
                        .flatten(),
                ),
                ExternalKind::Memory => CoreItem::Memory,
                ExternalKind::Table => CoreItem::Table,
                ExternalKind::Global => CoreItem::Global,
                _ => CoreItem::Tag,
            };
            module.exports.insert(name, item);
        }
        Ok(module)
    }

    pub fn export(&self, name: &str) -> Option<&CoreItem> {
        self.exports.get(name)
    }

    /// Whether `name` is an exported function, and its signature if numeric.
    pub fn export_func(&self, name: &str) -> Option<Option<&FuncSig>> {
        match self.exports.get(name)? {
            CoreItem::Func(sig) => Some(sig.as_ref()),
            _ => None,
        }
    }

    pub fn exports_memory(&self) -> bool {
        self.exports.get("memory") == Some(&CoreItem::Memory)
    }

    /// Distinct import module names in first-use order.
    pub fn import_modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = Vec::new();
        for import in &self.imports {
            if !modules.contains(&import.module.as_str()) {
                modules.push(&import.module);
            }
        }
        modules
    }
}
