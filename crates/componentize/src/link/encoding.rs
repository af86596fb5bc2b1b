//! Incremental component binary writer that keeps every index space in
//! step with the sections it emits.

use std::borrow::Cow;
use std::mem;

use wasm_encoder::{
    Alias, CanonicalFunctionSection, CanonicalOption, Component, ComponentAliasSection,
    ComponentExportKind, ComponentExportSection, ComponentImportSection,
    ComponentInstanceSection, ComponentSectionId, ComponentTypeEncoder, ComponentTypeRef,
    ComponentTypeSection, CustomSection, ExportKind, InstanceSection, InstanceType, ModuleArg,
    RawSection, ValType,
};

use super::types::TypeSpace;

#[derive(Default)]
pub(crate) struct ComponentEncoding {
    component: Component,
    last_section: LastSection,

    // Core index spaces
    core_modules: u32,
    core_funcs: u32,
    core_memories: u32,
    core_tables: u32,
    core_globals: u32,
    core_instances: u32,

    // Component index spaces
    types: u32,
    funcs: u32,
    instances: u32,
    components: u32,
}

impl ComponentEncoding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.component.finish()
    }

    pub fn core_module_raw(&mut self, module: &[u8]) -> u32 {
        self.flush();
        self.component.section(&RawSection {
            id: ComponentSectionId::CoreModule.into(),
            data: module,
        });
        inc(&mut self.core_modules)
    }

    pub fn custom(&mut self, name: &str, data: Vec<u8>) {
        self.flush();
        self.component.section(&CustomSection {
            name: Cow::Borrowed(name),
            data: Cow::Owned(data),
        });
    }

    pub fn instantiate<'a, A>(&mut self, module_index: u32, args: A) -> u32
    where
        A: IntoIterator<Item = (&'a str, ModuleArg)>,
        A::IntoIter: ExactSizeIterator,
    {
        self.instances().instantiate(module_index, args);
        inc(&mut self.core_instances)
    }

    pub fn instantiate_core_exports<'a, E>(&mut self, exports: E) -> u32
    where
        E: IntoIterator<Item = (&'a str, ExportKind, u32)>,
        E::IntoIter: ExactSizeIterator,
    {
        self.instances().export_items(exports);
        inc(&mut self.core_instances)
    }

    /// Embed a finished nested component.
    pub fn nested_component(&mut self, inner: ComponentEncoding) -> u32 {
        let bytes = inner.finish();
        self.flush();
        self.component.section(&RawSection {
            id: ComponentSectionId::Component.into(),
            data: &bytes,
        });
        inc(&mut self.components)
    }

    pub fn instantiate_component<'a, A>(&mut self, component: u32, args: A) -> u32
    where
        A: IntoIterator<Item = (&'a str, ComponentExportKind, u32)>,
        A::IntoIter: ExactSizeIterator,
    {
        self.component_instances().instantiate(component, args);
        inc(&mut self.instances)
    }

    pub fn alias_core_item(&mut self, instance: u32, kind: ExportKind, name: &str) -> u32 {
        self.aliases().alias(Alias::CoreInstanceExport {
            instance,
            kind,
            name,
        });
        match kind {
            ExportKind::Func => inc(&mut self.core_funcs),
            ExportKind::Table => inc(&mut self.core_tables),
            ExportKind::Memory => inc(&mut self.core_memories),
            _ => inc(&mut self.core_globals),
        }
    }

    pub fn alias_func(&mut self, instance: u32, name: &str) -> u32 {
        self.aliases().alias(Alias::InstanceExport {
            instance,
            kind: ComponentExportKind::Func,
            name,
        });
        inc(&mut self.funcs)
    }

    pub fn alias_type(&mut self, instance: u32, name: &str) -> u32 {
        self.aliases().alias(Alias::InstanceExport {
            instance,
            kind: ComponentExportKind::Type,
            name,
        });
        inc(&mut self.types)
    }

    pub fn lower_func<O>(&mut self, func_index: u32, options: O) -> u32
    where
        O: IntoIterator<Item = CanonicalOption>,
        O::IntoIter: ExactSizeIterator,
    {
        self.canonical_functions().lower(func_index, options);
        inc(&mut self.core_funcs)
    }

    pub fn lift_func<O>(&mut self, core_func_index: u32, type_index: u32, options: O) -> u32
    where
        O: IntoIterator<Item = CanonicalOption>,
        O::IntoIter: ExactSizeIterator,
    {
        self.canonical_functions()
            .lift(core_func_index, type_index, options);
        inc(&mut self.funcs)
    }

    pub fn resource_new(&mut self, ty: u32) -> u32 {
        self.canonical_functions().resource_new(ty);
        inc(&mut self.core_funcs)
    }

    pub fn resource_rep(&mut self, ty: u32) -> u32 {
        self.canonical_functions().resource_rep(ty);
        inc(&mut self.core_funcs)
    }

    pub fn resource_drop(&mut self, ty: u32) -> u32 {
        self.canonical_functions().resource_drop(ty);
        inc(&mut self.core_funcs)
    }

    pub fn instance_type(&mut self, ty: &InstanceType) -> u32 {
        self.component_types().instance(ty);
        inc(&mut self.types)
    }

    /// A resource represented by an `i32`, without a destructor.
    pub fn resource(&mut self) -> u32 {
        self.component_types().resource(ValType::I32, None);
        inc(&mut self.types)
    }

    pub fn import(&mut self, name: &str, ty: ComponentTypeRef) -> u32 {
        let index = match &ty {
            ComponentTypeRef::Instance(_) => inc(&mut self.instances),
            ComponentTypeRef::Func(_) => inc(&mut self.funcs),
            _ => inc(&mut self.types),
        };
        self.imports().import(name, ty);
        index
    }

    pub fn export(&mut self, name: &str, kind: ComponentExportKind, index: u32) -> u32 {
        self.export_as(name, kind, index, None)
    }

    /// Export `index`, ascribing `ty` to it when given.
    pub fn export_as(
        &mut self,
        name: &str,
        kind: ComponentExportKind,
        index: u32,
        ty: Option<ComponentTypeRef>,
    ) -> u32 {
        self.exports().export(name, kind, index, ty);
        match kind {
            ComponentExportKind::Instance => inc(&mut self.instances),
            ComponentExportKind::Func => inc(&mut self.funcs),
            _ => inc(&mut self.types),
        }
    }
}

impl TypeSpace for ComponentEncoding {
    fn define(&mut self) -> (u32, ComponentTypeEncoder<'_>) {
        let index = inc(&mut self.types);
        (index, self.component_types().ty())
    }

    fn alias_outer(&mut self, _index: u32) -> Option<u32> {
        None
    }
}

macro_rules! section_accessors {
    ($($method:ident => $section:ident)*) => (
        #[derive(Default)]
        enum LastSection {
            #[default]
            None,
            $($section($section),)*
        }

        impl ComponentEncoding {
            $(
                #[allow(clippy::unreachable)]
                fn $method(&mut self) -> &mut $section {
                    if !matches!(&self.last_section, LastSection::$section(_)) {
                        self.flush();
                        self.last_section = LastSection::$section($section::new());
                    }
                    match &mut self.last_section {
                        LastSection::$section(ret) => ret,
                        // Replaced just above.
                        _ => unreachable!(),
                    }
                }
            )*

            /// Write out the pending section, if any.
            fn flush(&mut self) {
                match mem::take(&mut self.last_section) {
                    LastSection::None => {}
                    $(
                        LastSection::$section(section) => {
                            self.component.section(&section);
                        }
                    )*
                }
            }
        }
    )
}

section_accessors! {
    component_types => ComponentTypeSection
    component_instances => ComponentInstanceSection
    instances => InstanceSection
    canonical_functions => CanonicalFunctionSection
    aliases => ComponentAliasSection
    exports => ComponentExportSection
    imports => ComponentImportSection
}

fn inc(idx: &mut u32) -> u32 {
    let ret = *idx;
    *idx += 1;
    ret
}
