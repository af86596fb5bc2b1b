//! Conversion of a `wit-parser` resolve into the arena model.
//!
//! Every `wit-parser` arena is copied in iteration order, so package,
//! interface, world and type ids keep their positions.

use std::collections::{HashMap, HashSet};

use componentize_abi::types::{Case, Enum, Field, Flags, Record, ResultType, Tuple, Variant};
use componentize_abi::{Handle, Type, TypeArena, TypeDef, TypeDefKind, TypeId, TypeOwner};
use indexmap::IndexMap;
use wit_parser as wp;

use super::{
    Function, FunctionKind, Interface, InterfaceId, Origin, Package, PackageName, Resolve,
    ResolutionError, World, WorldId, WorldItem, WorldKey,
};

/// Items `wit-parser` accepts that cannot be lifted or lowered here. They
/// only fail resolution when the selected world reaches them.
#[derive(Debug, Default)]
pub(crate) struct Rejected {
    types: HashMap<TypeId, &'static str>,
    interfaces: HashMap<InterfaceId, ResolutionError>,
    worlds: HashMap<WorldId, ResolutionError>,
}

pub(crate) fn convert(parsed: wp::Resolve) -> Result<(Resolve, Rejected), ResolutionError> {
    let mut types = TypeArena::new();
    let ids: Vec<TypeId> = parsed
        .types
        .iter()
        .map(|(_, def)| {
            types.alloc(TypeDef {
                name: def.name.clone(),
                kind: TypeDefKind::Unknown,
                owner: owner(def.owner),
            })
        })
        .collect();
    let cx = Cx { ids: &ids };

    let mut rejected = Rejected::default();
    for ((_, def), id) in parsed.types.iter().zip(&ids) {
        match cx.kind(&def.kind) {
            Ok(kind) => {
                if let Ok(slot) = types.get_mut(*id) {
                    slot.kind = kind;
                }
            }
            Err(what) => {
                rejected.types.insert(*id, what);
            }
        }
    }

    let packages = parsed
        .packages
        .iter()
        .map(|(_, pkg)| Package {
            name: PackageName {
                namespace: pkg.name.namespace.clone(),
                name: pkg.name.name.clone(),
                version: pkg.name.version.clone(),
            },
            interfaces: pkg
                .interfaces
                .iter()
                .map(|(name, id)| (name.clone(), id.index()))
                .collect(),
            worlds: pkg
                .worlds
                .iter()
                .map(|(name, id)| (name.clone(), id.index()))
                .collect(),
        })
        .collect();

    let mut interfaces = Vec::with_capacity(parsed.interfaces.len());
    for (id, iface) in parsed.interfaces.iter() {
        let mut functions = IndexMap::new();
        for (name, func) in &iface.functions {
            match cx.function(func) {
                Ok(func) => {
                    functions.insert(name.clone(), func);
                }
                Err(e) => {
                    rejected.interfaces.entry(id.index()).or_insert(e);
                }
            }
        }
        interfaces.push(Interface {
            name: iface.name.clone(),
            package: iface.package.map(|p| p.index()),
            types: iface
                .types
                .iter()
                .map(|(name, ty)| Ok((name.clone(), cx.id(*ty)?)))
                .collect::<Result<_, ResolutionError>>()?,
            functions,
        });
    }

    let mut worlds = Vec::with_capacity(parsed.worlds.len());
    for (id, world) in parsed.worlds.iter() {
        let mut items = |items| {
            cx.items(items).unwrap_or_else(|e| {
                rejected.worlds.entry(id.index()).or_insert(e);
                IndexMap::new()
            })
        };
        let imports = items(&world.imports);
        let exports = items(&world.exports);
        worlds.push(World {
            name: world.name.clone(),
            package: world.package.map_or(0, |p| p.index()),
            imports,
            exports,
        });
    }

    Ok((
        Resolve {
            types,
            packages,
            interfaces,
            worlds,
            parsed,
        },
        rejected,
    ))
}

impl Rejected {
    /// Fail if `world` uses anything that was set aside during conversion.
    pub(crate) fn check(&self, resolve: &Resolve, world: WorldId) -> Result<(), ResolutionError> {
        if let Some(e) = self.worlds.get(&world) {
            return Err(e.clone());
        }
        let world = resolve.world(world)?;
        let mut roots = Vec::new();
        for item in world.imports.values().chain(world.exports.values()) {
            match item {
                WorldItem::Interface(id) => {
                    if let Some(e) = self.interfaces.get(id) {
                        return Err(e.clone());
                    }
                    let iface = resolve.interface(*id)?;
                    roots.extend(iface.types.values().map(|id| Type::Id(*id)));
                    for func in iface.functions.values() {
                        roots.extend(func.param_types());
                        roots.extend(func.result);
                    }
                }
                WorldItem::Function(func) => {
                    roots.extend(func.param_types());
                    roots.extend(func.result);
                }
                WorldItem::Type(id) => roots.push(Type::Id(*id)),
            }
        }
        if self.types.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        while let Some(ty) = roots.pop() {
            let Type::Id(id) = ty else { continue };
            if !seen.insert(id) {
                continue;
            }
            if let Some(what) = self.types.get(&id) {
                let name = resolve
                    .types
                    .get(id)
                    .ok()
                    .and_then(|def| def.name.clone())
                    .unwrap_or_else(|| id.to_string());
                return Err(ResolutionError::Invalid {
                    message: format!("type `{name}` is {what}, which is not supported"),
                    at: Origin::default(),
                });
            }
            if let Ok(def) = resolve.types.get(id) {
                roots.extend(def.kind.children());
            }
        }
        Ok(())
    }
}

fn owner(owner: wp::TypeOwner) -> TypeOwner {
    match owner {
        wp::TypeOwner::Interface(id) => TypeOwner::Interface(id.index()),
        wp::TypeOwner::World(id) => TypeOwner::World(id.index()),
        wp::TypeOwner::None => TypeOwner::None,
    }
}

struct Cx<'a> {
    ids: &'a [TypeId],
}

impl Cx<'_> {
    fn id(&self, id: wp::TypeId) -> Result<TypeId, ResolutionError> {
        self.ids
            .get(id.index())
            .copied()
            .ok_or_else(|| ResolutionError::Unknown {
                kind: "type",
                name: format!("#{}", id.index()),
                at: Origin::default(),
            })
    }

    /// `Err` describes a type `wit-parser` accepts but lowering does not.
    fn ty(&self, ty: &wp::Type) -> Result<Type, &'static str> {
        Ok(match ty {
            wp::Type::Bool => Type::Bool,
            wp::Type::U8 => Type::U8,
            wp::Type::U16 => Type::U16,
            wp::Type::U32 => Type::U32,
            wp::Type::U64 => Type::U64,
            wp::Type::S8 => Type::S8,
            wp::Type::S16 => Type::S16,
            wp::Type::S32 => Type::S32,
            wp::Type::S64 => Type::S64,
            wp::Type::F32 => Type::F32,
            wp::Type::F64 => Type::F64,
            wp::Type::Char => Type::Char,
            wp::Type::String => Type::String,
            wp::Type::Id(id) => Type::Id(self.id(*id).map_err(|_| "a dangling reference")?),
            wp::Type::ErrorContext => return Err("an error-context"),
        })
    }

    fn opt(&self, ty: Option<&wp::Type>) -> Result<Option<Type>, &'static str> {
        ty.map(|ty| self.ty(ty)).transpose()
    }

    fn kind(&self, kind: &wp::TypeDefKind) -> Result<TypeDefKind, &'static str> {
        Ok(match kind {
            wp::TypeDefKind::Record(r) if r.fields.is_empty() => return Err("an empty record"),
            wp::TypeDefKind::Flags(f) if f.flags.is_empty() => return Err("an empty flags"),
            wp::TypeDefKind::Variant(v) if v.cases.is_empty() => return Err("a variant without cases"),
            wp::TypeDefKind::Enum(e) if e.cases.is_empty() => return Err("an enum without cases"),
            wp::TypeDefKind::Record(r) => TypeDefKind::Record(Record {
                fields: r
                    .fields
                    .iter()
                    .map(|f| {
                        Ok(Field {
                            name: f.name.clone(),
                            ty: self.ty(&f.ty)?,
                        })
                    })
                    .collect::<Result<_, _>>()?,
            }),
            wp::TypeDefKind::Variant(v) => TypeDefKind::Variant(Variant {
                cases: v
                    .cases
                    .iter()
                    .map(|c| {
                        Ok(Case {
                            name: c.name.clone(),
                            ty: self.opt(c.ty.as_ref())?,
                        })
                    })
                    .collect::<Result<_, _>>()?,
            }),
            wp::TypeDefKind::Enum(e) => TypeDefKind::Enum(Enum {
                cases: e.cases.iter().map(|c| c.name.clone()).collect(),
            }),
            wp::TypeDefKind::Flags(f) => TypeDefKind::Flags(Flags {
                flags: f.flags.iter().map(|f| f.name.clone()).collect(),
            }),
            wp::TypeDefKind::Tuple(t) => TypeDefKind::Tuple(Tuple {
                types: t.types.iter().map(|t| self.ty(t)).collect::<Result<_, _>>()?,
            }),
            wp::TypeDefKind::Option(t) => TypeDefKind::Option(self.ty(t)?),
            wp::TypeDefKind::Result(r) => TypeDefKind::Result(ResultType {
                ok: self.opt(r.ok.as_ref())?,
                err: self.opt(r.err.as_ref())?,
            }),
            wp::TypeDefKind::List(t) => TypeDefKind::List(self.ty(t)?),
            wp::TypeDefKind::Resource => TypeDefKind::Resource,
            wp::TypeDefKind::Handle(wp::Handle::Own(r)) => {
                TypeDefKind::Handle(Handle::Own(self.id(*r).map_err(|_| "a dangling reference")?))
            }
            wp::TypeDefKind::Handle(wp::Handle::Borrow(r)) => {
                TypeDefKind::Handle(Handle::Borrow(self.id(*r).map_err(|_| "a dangling reference")?))
            }
            wp::TypeDefKind::Type(t) => TypeDefKind::Type(self.ty(t)?),
            wp::TypeDefKind::Future(_) => return Err("a future"),
            wp::TypeDefKind::Stream(_) => return Err("a stream"),
            wp::TypeDefKind::FixedSizeList(..) => return Err("a fixed-size list"),
            wp::TypeDefKind::Map(..) => return Err("a map"),
            wp::TypeDefKind::Unknown => return Err("an unknown type"),
        })
    }

    fn function(&self, func: &wp::Function) -> Result<Function, ResolutionError> {
        let invalid = |what: &str| ResolutionError::Invalid {
            message: format!("function `{}` uses {what}, which is not supported", func.name),
            at: Origin::default(),
        };
        let kind = match &func.kind {
            wp::FunctionKind::Freestanding => FunctionKind::Freestanding,
            wp::FunctionKind::Constructor(r) => FunctionKind::Constructor(self.id(*r)?),
            wp::FunctionKind::Method(r) => FunctionKind::Method(self.id(*r)?),
            wp::FunctionKind::Static(r) => FunctionKind::Static(self.id(*r)?),
            _ => return Err(invalid("async lifting")),
        };
        let params = func
            .params
            .iter()
            .map(|(name, ty)| Ok((name.clone(), self.ty(ty).map_err(invalid)?)))
            .collect::<Result<_, ResolutionError>>()?;
        let result = self
            .opt(func.result.as_ref())
            .map_err(invalid)?;
        Ok(Function {
            name: func.name.clone(),
            kind,
            params,
            result,
        })
    }

    fn items(
        &self,
        items: &IndexMap<wp::WorldKey, wp::WorldItem>,
    ) -> Result<IndexMap<WorldKey, WorldItem>, ResolutionError> {
        items
            .iter()
            .map(|(key, item)| {
                let key = match key {
                    wp::WorldKey::Name(name) => WorldKey::Name(name.clone()),
                    wp::WorldKey::Interface(id) => WorldKey::Interface(id.index()),
                };
                let item = match item {
                    wp::WorldItem::Interface { id, .. } => WorldItem::Interface(id.index()),
                    wp::WorldItem::Function(func) => WorldItem::Function(self.function(func)?),
                    wp::WorldItem::Type(ty) => WorldItem::Type(self.id(*ty)?),
                };
                Ok((key, item))
            })
            .collect()
    }
}
