//! Index-addressed type model.
//!
//! Every named or anonymous WIT type lives in a [`TypeArena`] and is referred
//! to by a [`TypeId`]. Composite types point at their components through
//! [`Type`] values, so a graph of resources referring to each other through
//! handles never needs owning back-references.

use std::fmt;

use crate::error::AbiError;

/// Index of a [`TypeDef`] inside a [`TypeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl TypeId {
    /// Position of this type in its arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reference to a type: either a primitive or a definition in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    F32,
    F64,
    Char,
    String,
    Id(TypeId),
}

impl Type {
    /// WIT spelling of a primitive, `None` for arena references.
    pub fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            Type::Bool => "bool",
            Type::U8 => "u8",
            Type::U16 => "u16",
            Type::U32 => "u32",
            Type::U64 => "u64",
            Type::S8 => "s8",
            Type::S16 => "s16",
            Type::S32 => "s32",
            Type::S64 => "s64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Char => "char",
            Type::String => "string",
            Type::Id(_) => return None,
        })
    }
}

/// Which component model scope a named type was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeOwner {
    /// Declared inside the interface with this index.
    Interface(usize),
    /// Declared at the top level of the world with this index.
    World(usize),
    /// Anonymous structural type (`list<u8>`, `option<T>`, ...).
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: Option<String>,
    pub kind: TypeDefKind,
    pub owner: TypeOwner,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefKind {
    Record(Record),
    Variant(Variant),
    Enum(Enum),
    Flags(Flags),
    Tuple(Tuple),
    Option(Type),
    Result(ResultType),
    List(Type),
    Resource,
    Handle(Handle),
    /// A named alias for another type, also produced by `use`.
    Type(Type),
    /// Placeholder allocated before a forward reference is resolved.
    Unknown,
}

impl TypeDefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeDefKind::Record(_) => "record",
            TypeDefKind::Variant(_) => "variant",
            TypeDefKind::Enum(_) => "enum",
            TypeDefKind::Flags(_) => "flags",
            TypeDefKind::Tuple(_) => "tuple",
            TypeDefKind::Option(_) => "option",
            TypeDefKind::Result(_) => "result",
            TypeDefKind::List(_) => "list",
            TypeDefKind::Resource => "resource",
            TypeDefKind::Handle(Handle::Own(_)) => "own",
            TypeDefKind::Handle(Handle::Borrow(_)) => "borrow",
            TypeDefKind::Type(_) => "type",
            TypeDefKind::Unknown => "unknown",
        }
    }

    /// Types this definition refers to directly, in declaration order.
    pub fn children(&self) -> Vec<Type> {
        match self {
            TypeDefKind::Record(r) => r.fields.iter().map(|f| f.ty).collect(),
            TypeDefKind::Variant(v) => v.cases.iter().filter_map(|c| c.ty).collect(),
            TypeDefKind::Tuple(t) => t.types.clone(),
            TypeDefKind::Result(r) => r.ok.into_iter().chain(r.err).collect(),
            TypeDefKind::Option(t) | TypeDefKind::List(t) | TypeDefKind::Type(t) => vec![*t],
            TypeDefKind::Handle(h) => vec![Type::Id(h.resource())],
            TypeDefKind::Enum(_)
            | TypeDefKind::Flags(_)
            | TypeDefKind::Resource
            | TypeDefKind::Unknown => Vec::new(),
        }
    }

    /// Payload types of each case for the variant-shaped kinds
    /// (`variant`, `enum`, `option`, `result`).
    pub fn cases(&self) -> Option<Vec<Option<Type>>> {
        match self {
            TypeDefKind::Variant(v) => Some(v.cases.iter().map(|c| c.ty).collect()),
            TypeDefKind::Enum(e) => Some(vec![None; e.cases.len()]),
            TypeDefKind::Option(t) => Some(vec![None, Some(*t)]),
            TypeDefKind::Result(r) => Some(vec![r.ok, r.err]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub name: String,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enum {
    pub cases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flags {
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub types: Vec<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultType {
    pub ok: Option<Type>,
    pub err: Option<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Own(TypeId),
    Borrow(TypeId),
}

impl Handle {
    pub fn resource(&self) -> TypeId {
        match self {
            Handle::Own(id) | Handle::Borrow(id) => *id,
        }
    }
}

/// Arena of type definitions addressed by [`TypeId`].
#[derive(Debug, Default, Clone)]
pub struct TypeArena {
    defs: Vec<TypeDef>,
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.defs.len() as u32);
        self.defs.push(def);
        id
    }

    /// Allocate an anonymous type, reusing a structurally identical one.
    pub fn intern(&mut self, kind: TypeDefKind) -> TypeId {
        if let Some(pos) = self
            .defs
            .iter()
            .position(|d| d.name.is_none() && d.owner == TypeOwner::None && d.kind == kind)
        {
            return TypeId(pos as u32);
        }
        self.alloc(TypeDef {
            name: None,
            kind,
            owner: TypeOwner::None,
        })
    }

    pub fn get(&self, id: TypeId) -> Result<&TypeDef, AbiError> {
        self.defs.get(id.index()).ok_or(AbiError::UnknownType(id))
    }

    pub fn get_mut(&mut self, id: TypeId) -> Result<&mut TypeDef, AbiError> {
        self.defs.get_mut(id.index()).ok_or(AbiError::UnknownType(id))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, def)| (TypeId(i as u32), def))
    }

    /// Follow `type a = b` aliases until a non-alias definition or primitive.
    pub fn dealias(&self, ty: Type) -> Result<Type, AbiError> {
        let mut ty = ty;
        // An alias chain longer than the arena means a cycle.
        for _ in 0..=self.defs.len() {
            match ty {
                Type::Id(id) => match &self.get(id)?.kind {
                    TypeDefKind::Type(next) => ty = *next,
                    _ => return Ok(ty),
                },
                _ => return Ok(ty),
            }
        }
        Err(AbiError::TypeMismatch {
            expected: "non-recursive alias".to_string(),
            got: format!("{ty:?}"),
        })
    }

    /// Human readable spelling of a type, used in diagnostics.
    pub fn describe(&self, ty: &Type) -> String {
        if let Some(name) = ty.primitive_name() {
            return name.to_string();
        }
        let Type::Id(id) = ty else {
            return String::new();
        };
        let Ok(def) = self.get(*id) else {
            return format!("<unknown {id}>");
        };
        if let Some(name) = &def.name {
            return name.clone();
        }
        match &def.kind {
            TypeDefKind::List(t) => format!("list<{}>", self.describe(t)),
            TypeDefKind::Option(t) => format!("option<{}>", self.describe(t)),
            TypeDefKind::Result(r) => {
                let ok = r.ok.map_or("_".to_string(), |t| self.describe(&t));
                let err = r.err.map_or("_".to_string(), |t| self.describe(&t));
                format!("result<{ok}, {err}>")
            }
            TypeDefKind::Tuple(t) => {
                let parts: Vec<_> = t.types.iter().map(|t| self.describe(t)).collect();
                format!("tuple<{}>", parts.join(", "))
            }
            TypeDefKind::Handle(Handle::Own(r)) => format!("own<{}>", self.describe(&Type::Id(*r))),
            TypeDefKind::Handle(Handle::Borrow(r)) => {
                format!("borrow<{}>", self.describe(&Type::Id(*r)))
            }
            TypeDefKind::Type(t) => self.describe(t),
            other => other.as_str().to_string(),
        }
    }
}
