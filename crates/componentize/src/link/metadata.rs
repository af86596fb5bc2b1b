//! The `component-type` custom section: a world encoded as a component type.
//!
//! The linker attaches it to every component it produces, and `embed`
//! attaches it to a core module so a later link step can recover the world.

use std::borrow::Cow;

use componentize_abi::TypeDefKind;
use wasm_encoder::{
    Alias, Component, ComponentExportKind, ComponentExportSection, ComponentType,
    ComponentTypeRef, ComponentTypeSection, CustomSection, Section, TypeBounds,
};

use super::error::LinkError;
use super::types::{NamedSpace, TypeEncoder, instance_type};
use crate::logging::debug;
use crate::wit::{Resolve, WorldId, WorldItem};

/// Custom section name prefix.
pub const COMPONENT_TYPE_SECTION: &str = "component-type";

/// Encode `world` as a component exporting a single component type.
pub fn encode_world(resolve: &Resolve, world: WorldId) -> Result<Vec<u8>, LinkError> {
    let w = resolve
        .world(world)
        .map_err(|e| LinkError::encoding(e.to_string()))?;
    let mut ty = ComponentType::new();
    let mut encoder = TypeEncoder::new(resolve);
    let mut instances = 0u32;

    for (key, item) in &w.imports {
        let name = resolve.name_world_key(key);
        match item {
            WorldItem::Interface(id) => {
                let instance = instance_type(resolve, *id, encoder.map())?;
                let index = ty.type_count();
                ty.ty().instance(&instance);
                ty.import(&name, ComponentTypeRef::Instance(index));
                let imported = instances;
                instances += 1;
                let iface = resolve
                    .interface(*id)
                    .map_err(|e| LinkError::encoding(e.to_string()))?;
                for (type_name, type_id) in &iface.types {
                    let local = ty.type_count();
                    ty.alias(Alias::InstanceExport {
                        instance: imported,
                        kind: ComponentExportKind::Type,
                        name: type_name,
                    });
                    encoder.insert(*type_id, local);
                }
            }
            WorldItem::Function(func) => {
                let index = encoder.func_type(&mut ty, func)?;
                ty.import(&name, ComponentTypeRef::Func(index));
            }
            WorldItem::Type(id) => {
                let is_resource = resolve
                    .types
                    .get(*id)
                    .is_ok_and(|def| def.kind == TypeDefKind::Resource);
                let bounds = if is_resource {
                    TypeBounds::SubResource
                } else {
                    TypeBounds::Eq(encoder.type_index(&mut ty, *id)?)
                };
                let index = ty.type_count();
                ty.import(&name, ComponentTypeRef::Type(bounds));
                encoder.insert(*id, index);
            }
        }
    }

    for (key, item) in &w.exports {
        let name = resolve.name_world_key(key);
        match item {
            WorldItem::Interface(id) => {
                let instance = instance_type(resolve, *id, encoder.map())?;
                let index = ty.type_count();
                ty.ty().instance(&instance);
                ty.export(&name, ComponentTypeRef::Instance(index));
            }
            WorldItem::Function(func) => {
                let index = encoder.func_type(&mut ty, func)?;
                ty.export_func(&name, index);
            }
            WorldItem::Type(id) => {
                let index = encoder.type_index(&mut ty, *id)?;
                let exported = ty.export_type(&name, TypeBounds::Eq(index));
                encoder.insert(*id, exported);
            }
        }
    }

    let mut types = ComponentTypeSection::new();
    types.component(&ty);
    let mut exports = ComponentExportSection::new();
    let world_name = resolve.world_id(world).unwrap_or_else(|| w.name.clone());
    exports.export(&world_name, ComponentExportKind::Type, 0, None);

    let mut component = Component::new();
    component.section(&types);
    component.section(&exports);
    debug!(world = %world_name, "encoded world type");
    Ok(component.finish())
}

/// Append a `component-type:<world>` custom section describing `world` to
/// a core module.
pub fn embed(module: &[u8], resolve: &Resolve, world: WorldId) -> Result<Vec<u8>, LinkError> {
    let data = encode_world(resolve, world)?;
    let w = resolve
        .world(world)
        .map_err(|e| LinkError::encoding(e.to_string()))?;
    let mut out = module.to_vec();
    CustomSection {
        name: Cow::Owned(format!("{COMPONENT_TYPE_SECTION}:{}", w.name)),
        data: Cow::Owned(data),
    }
    .append_to(&mut out);
    Ok(out)
}

/// Payloads of the `component-type` custom sections found in a core module.
pub fn embedded_worlds(module: &[u8]) -> Result<Vec<(String, Vec<u8>)>, LinkError> {
    let mut found = Vec::new();
    for payload in wasmparser::Parser::new(0).parse_all(module) {
        let payload = payload.map_err(|e| LinkError::InvalidModule(e.to_string()))?;
        if let wasmparser::Payload::CustomSection(reader) = payload
            && reader.name().starts_with(COMPONENT_TYPE_SECTION)
        {
            found.push((reader.name().to_string(), reader.data().to_vec()));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wit::{Features, SourceSet};

    fn world(wit: &str) -> (Resolve, WorldId) {
        let mut set = SourceSet::new();
        set.push_str("t.wit", wit);
        set.resolve(&Features::default(), None).unwrap()
    }

    #[test]
    fn world_type_is_a_valid_component() {
        let (resolve, w) = world(
            "package a:b;
             interface types { record point { x: u32, y: u32 } resource blob; }
             interface api {
                 use types.{point, blob};
                 get: func(name: string) -> point;
                 size: func(b: borrow<blob>) -> u64;
             }
             world w { import log: func(msg: string); export api; }",
        );
        let bytes = encode_world(&resolve, w).unwrap();
        wasmparser::Validator::new().validate_all(&bytes).unwrap();
    }

    #[test]
    fn embed_appends_a_custom_section() {
        let (resolve, w) = world("package a:b; world w { export run: func(); }");
        let module = wat::parse_str("(module)").unwrap();
        let embedded = embed(&module, &resolve, w).unwrap();
        wasmparser::Validator::new().validate_all(&embedded).unwrap();
        let sections = embedded_worlds(&embedded).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].0, "component-type:w");
        wasmparser::Validator::new().validate_all(&sections[0].1).unwrap();
    }
}
