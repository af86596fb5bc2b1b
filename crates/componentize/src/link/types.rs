//! Encoding resolved WIT types as component-model types.

use std::collections::HashMap;

use componentize_abi::{Handle, Type, TypeDefKind, TypeId};
use wasm_encoder::{
    Alias, ComponentOuterAliasKind, ComponentType, ComponentTypeEncoder, ComponentTypeRef,
    ComponentValType, InstanceType, PrimitiveValType, TypeBounds,
};

use super::error::LinkError;
use crate::wit::{Function, InterfaceId, Resolve};

/// A scope component types can be defined in.
pub(crate) trait TypeSpace {
    /// Start a new type definition, returning its index.
    fn define(&mut self) -> (u32, ComponentTypeEncoder<'_>);

    /// Alias a type of the enclosing component. `None` at the outermost
    /// scope.
    fn alias_outer(&mut self, index: u32) -> Option<u32>;
}

/// A type scope whose items carry names: instance and component types.
pub(crate) trait NamedSpace: TypeSpace {
    fn export_type(&mut self, name: &str, bounds: TypeBounds) -> u32;
    fn export_func(&mut self, name: &str, ty: u32);
}

macro_rules! nested_space {
    ($ty:ty) => {
        impl TypeSpace for $ty {
            fn define(&mut self) -> (u32, ComponentTypeEncoder<'_>) {
                let index = self.type_count();
                (index, self.ty())
            }

            fn alias_outer(&mut self, index: u32) -> Option<u32> {
                let local = self.type_count();
                self.alias(Alias::Outer {
                    kind: ComponentOuterAliasKind::Type,
                    count: 1,
                    index,
                });
                Some(local)
            }
        }

        impl NamedSpace for $ty {
            fn export_type(&mut self, name: &str, bounds: TypeBounds) -> u32 {
                let index = self.type_count();
                self.export(name, ComponentTypeRef::Type(bounds));
                index
            }

            fn export_func(&mut self, name: &str, ty: u32) {
                self.export(name, ComponentTypeRef::Func(ty));
            }
        }
    };
}

nested_space!(InstanceType);
nested_space!(ComponentType);

/// Maps arena types to type indices of one scope, defining anonymous types
/// on first use.
pub(crate) struct TypeEncoder<'r> {
    resolve: &'r Resolve,
    map: HashMap<TypeId, u32>,
    outer: Option<&'r HashMap<TypeId, u32>>,
}

impl<'r> TypeEncoder<'r> {
    pub fn new(resolve: &'r Resolve) -> Self {
        Self {
            resolve,
            map: HashMap::new(),
            outer: None,
        }
    }

    /// Resolve types missing from this scope through `outer`, the index map
    /// of the enclosing scope.
    pub fn nested(resolve: &'r Resolve, outer: &'r HashMap<TypeId, u32>) -> Self {
        Self {
            resolve,
            map: HashMap::new(),
            outer: Some(outer),
        }
    }

    pub fn insert(&mut self, id: TypeId, index: u32) {
        self.map.insert(id, index);
    }

    pub fn get(&self, id: TypeId) -> Option<u32> {
        self.map.get(&id).copied()
    }

    pub fn map(&self) -> &HashMap<TypeId, u32> {
        &self.map
    }

    fn lookup(&mut self, space: &mut impl TypeSpace, id: TypeId) -> Option<u32> {
        if let Some(index) = self.map.get(&id) {
            return Some(*index);
        }
        let outer = *self.outer?.get(&id)?;
        let local = space.alias_outer(outer)?;
        self.map.insert(id, local);
        Some(local)
    }

    pub fn val_type(
        &mut self,
        space: &mut impl TypeSpace,
        ty: &Type,
    ) -> Result<ComponentValType, LinkError> {
        let id = match ty {
            Type::Bool => return Ok(primitive(PrimitiveValType::Bool)),
            Type::U8 => return Ok(primitive(PrimitiveValType::U8)),
            Type::U16 => return Ok(primitive(PrimitiveValType::U16)),
            Type::U32 => return Ok(primitive(PrimitiveValType::U32)),
            Type::U64 => return Ok(primitive(PrimitiveValType::U64)),
            Type::S8 => return Ok(primitive(PrimitiveValType::S8)),
            Type::S16 => return Ok(primitive(PrimitiveValType::S16)),
            Type::S32 => return Ok(primitive(PrimitiveValType::S32)),
            Type::S64 => return Ok(primitive(PrimitiveValType::S64)),
            Type::F32 => return Ok(primitive(PrimitiveValType::F32)),
            Type::F64 => return Ok(primitive(PrimitiveValType::F64)),
            Type::Char => return Ok(primitive(PrimitiveValType::Char)),
            Type::String => return Ok(primitive(PrimitiveValType::String)),
            Type::Id(id) => *id,
        };
        if let Some(index) = self.lookup(space, id) {
            return Ok(ComponentValType::Type(index));
        }
        let resolve = self.resolve;
        let def = resolve
            .types
            .get(id)
            .map_err(|e| LinkError::encoding(e.to_string()))?;

        let index = match &def.kind {
            TypeDefKind::Type(target) => return self.val_type(space, target),
            TypeDefKind::Record(r) => {
                let mut fields = Vec::with_capacity(r.fields.len());
                for f in &r.fields {
                    fields.push((f.name.as_str(), self.val_type(space, &f.ty)?));
                }
                let (index, enc) = space.define();
                enc.defined_type().record(fields);
                index
            }
            TypeDefKind::Variant(v) => {
                let mut cases = Vec::with_capacity(v.cases.len());
                for c in &v.cases {
                    let ty = match &c.ty {
                        Some(t) => Some(self.val_type(space, t)?),
                        None => None,
                    };
                    cases.push((c.name.as_str(), ty, None));
                }
                let (index, enc) = space.define();
                enc.defined_type().variant(cases);
                index
            }
            TypeDefKind::Enum(e) => {
                let (index, enc) = space.define();
                enc.defined_type().enum_type(e.cases.iter().map(String::as_str));
                index
            }
            TypeDefKind::Flags(f) => {
                let (index, enc) = space.define();
                enc.defined_type().flags(f.flags.iter().map(String::as_str));
                index
            }
            TypeDefKind::Tuple(t) => {
                let mut types = Vec::with_capacity(t.types.len());
                for ty in &t.types {
                    types.push(self.val_type(space, ty)?);
                }
                let (index, enc) = space.define();
                enc.defined_type().tuple(types);
                index
            }
            TypeDefKind::Option(t) => {
                let t = self.val_type(space, t)?;
                let (index, enc) = space.define();
                enc.defined_type().option(t);
                index
            }
            TypeDefKind::Result(r) => {
                let ok = match &r.ok {
                    Some(t) => Some(self.val_type(space, t)?),
                    None => None,
                };
                let err = match &r.err {
                    Some(t) => Some(self.val_type(space, t)?),
                    None => None,
                };
                let (index, enc) = space.define();
                enc.defined_type().result(ok, err);
                index
            }
            TypeDefKind::List(t) => {
                let t = self.val_type(space, t)?;
                let (index, enc) = space.define();
                enc.defined_type().list(t);
                index
            }
            TypeDefKind::Handle(handle) => {
                let resource = handle.resource();
                let Some(r) = self.lookup(space, resource) else {
                    return Err(LinkError::encoding(format!(
                        "resource `{}` is not in scope",
                        resolve.types.describe(&Type::Id(resource))
                    )));
                };
                let (index, enc) = space.define();
                match handle {
                    Handle::Own(_) => enc.defined_type().own(r),
                    Handle::Borrow(_) => enc.defined_type().borrow(r),
                };
                index
            }
            TypeDefKind::Resource => {
                return Err(LinkError::encoding(format!(
                    "resource `{}` is not in scope",
                    def.name.as_deref().unwrap_or("<anonymous>")
                )));
            }
            TypeDefKind::Unknown => {
                return Err(LinkError::encoding(format!("type {id} is unresolved")));
            }
        };
        self.map.insert(id, index);
        Ok(ComponentValType::Type(index))
    }

    /// A type index for `id`, defining primitive aliases explicitly so
    /// they can be exported by name.
    pub fn type_index(&mut self, space: &mut impl TypeSpace, id: TypeId) -> Result<u32, LinkError> {
        match self.val_type(space, &Type::Id(id))? {
            ComponentValType::Type(index) => Ok(index),
            ComponentValType::Primitive(p) => {
                let (index, enc) = space.define();
                enc.defined_type().primitive(p);
                Ok(index)
            }
        }
    }

    pub fn func_type(
        &mut self,
        space: &mut impl TypeSpace,
        func: &Function,
    ) -> Result<u32, LinkError> {
        let mut params = Vec::with_capacity(func.params.len());
        for (name, ty) in &func.params {
            params.push((name.as_str(), self.val_type(space, ty)?));
        }
        let result = match &func.result {
            Some(ty) => Some(self.val_type(space, ty)?),
            None => None,
        };
        let (index, enc) = space.define();
        enc.function().params(params).result(result);
        Ok(index)
    }

    /// Export every named type of `iface` from `space`, rebinding each to
    /// its exported index.
    pub fn export_types(
        &mut self,
        space: &mut impl NamedSpace,
        iface: InterfaceId,
    ) -> Result<(), LinkError> {
        let interface = self
            .resolve
            .interface(iface)
            .map_err(|e| LinkError::encoding(e.to_string()))?;
        // Resources first so handles declared before them can refer to them.
        let mut named = Vec::with_capacity(interface.types.len());
        for (name, id) in &interface.types {
            let def = self
                .resolve
                .types
                .get(*id)
                .map_err(|e| LinkError::encoding(e.to_string()))?;
            if def.kind == TypeDefKind::Resource {
                let exported = space.export_type(name, TypeBounds::SubResource);
                self.map.insert(*id, exported);
            } else {
                named.push((name, *id));
            }
        }
        for (name, id) in named {
            let index = self.type_index(space, id)?;
            let exported = space.export_type(name, TypeBounds::Eq(index));
            self.map.insert(id, exported);
        }
        Ok(())
    }

    /// Export the types and functions of `iface` from `space`.
    pub fn export_interface(
        &mut self,
        space: &mut impl NamedSpace,
        iface: InterfaceId,
    ) -> Result<(), LinkError> {
        self.export_types(space, iface)?;
        let interface = self
            .resolve
            .interface(iface)
            .map_err(|e| LinkError::encoding(e.to_string()))?;
        for func in interface.functions.values() {
            let ty = self.func_type(space, func)?;
            space.export_func(&func.name, ty);
        }
        Ok(())
    }
}

/// The instance type of an interface, resolving types of other interfaces
/// through `outer`.
pub(crate) fn instance_type(
    resolve: &Resolve,
    iface: InterfaceId,
    outer: &HashMap<TypeId, u32>,
) -> Result<InstanceType, LinkError> {
    let mut ty = InstanceType::new();
    let mut encoder = TypeEncoder::nested(resolve, outer);
    encoder.export_interface(&mut ty, iface)?;
    Ok(ty)
}

fn primitive(p: PrimitiveValType) -> ComponentValType {
    ComponentValType::Primitive(p)
}
