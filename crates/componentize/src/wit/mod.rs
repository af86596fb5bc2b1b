//! WIT documents: loading, name resolution and the resolved world model.
//!
//! Sources are parsed and resolved by `wit-parser`, then copied into a
//! [`Resolve`] whose types live in one
//! [`TypeArena`](componentize_abi::TypeArena) so the ABI and linker never
//! touch `wit-parser` types directly.
//!
//! # Example
//!
//! ```
//! use componentize::wit::{Features, SourceSet};
//!
//! let mut sources = SourceSet::new();
//! sources.push_str(
//!     "math.wit",
//!     "package example:math;\nworld math { export add: func(a: u32, b: u32) -> u32; }",
//! );
//! let (resolve, world) = sources.resolve(&Features::default(), None).unwrap();
//! assert_eq!(resolve.worlds[world].name, "math");
//! ```

mod convert;
pub mod error;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use componentize_abi::{Type, TypeArena, TypeDefKind, TypeId, TypeOwner};
use indexmap::IndexMap;
use wit_component::WitPrinter;

pub use error::{CyclicTypeError, Location, Origin, ParseError, ResolutionError, WitError};
pub use semver::Version;

use crate::logging::{debug, trace};

pub type PackageId = usize;
pub type InterfaceId = usize;
pub type WorldId = usize;

/// `namespace:name@version`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName {
    pub namespace: String,
    pub name: String,
    pub version: Option<Version>,
}

impl PackageName {
    /// Fully qualified id of an interface or world in this package.
    pub fn interface_id(&self, item: &str) -> String {
        let mut id = format!("{}:{}/{item}", self.namespace, self.name);
        if let Some(version) = &self.version {
            id.push('@');
            id.push_str(&version.to_string());
        }
        id
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: PackageName,
    pub interfaces: IndexMap<String, InterfaceId>,
    pub worlds: IndexMap<String, WorldId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Interface {
    /// `None` for interfaces declared inline in a world.
    pub name: Option<String>,
    pub package: Option<PackageId>,
    pub types: IndexMap<String, TypeId>,
    pub functions: IndexMap<String, Function>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    Freestanding,
    Constructor(TypeId),
    Method(TypeId),
    Static(TypeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Canonical name: `f`, `[constructor]r`, `[method]r.f` or `[static]r.f`.
    pub name: String,
    pub kind: FunctionKind,
    pub params: Vec<(String, Type)>,
    pub result: Option<Type>,
}

impl Function {
    /// Name of the function without the resource prefix.
    pub fn item_name(&self) -> &str {
        match self.kind {
            FunctionKind::Freestanding => &self.name,
            FunctionKind::Constructor(_) => self
                .name
                .strip_prefix("[constructor]")
                .unwrap_or(&self.name),
            FunctionKind::Method(_) | FunctionKind::Static(_) => self
                .name
                .split_once('.')
                .map_or(self.name.as_str(), |(_, item)| item),
        }
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|(_, ty)| *ty).collect()
    }

    /// Name of the core export implementing this function: `iface#name` for
    /// interface functions, the bare name at the world level.
    pub fn core_export_name(&self, interface: Option<&str>) -> String {
        match interface {
            Some(iface) => format!("{iface}#{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Key of an import or export in a world.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorldKey {
    Name(String),
    Interface(InterfaceId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorldItem {
    Interface(InterfaceId),
    Function(Function),
    Type(TypeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub name: String,
    pub package: PackageId,
    pub imports: IndexMap<WorldKey, WorldItem>,
    pub exports: IndexMap<WorldKey, WorldItem>,
}

/// Which `@unstable` features are enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    pub enabled: BTreeSet<String>,
    pub all: bool,
}

impl Features {
    /// Build from raw `--features` arguments, each a comma or whitespace
    /// separated list.
    pub fn from_lists<S: AsRef<str>>(lists: &[S], all: bool) -> Self {
        let enabled = lists
            .iter()
            .flat_map(|list| {
                list.as_ref()
                    .split(',')
                    .flat_map(str::split_whitespace)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { enabled, all }
    }

    pub fn is_enabled(&self, feature: &str) -> bool {
        self.all || self.enabled.contains(feature)
    }
}

/// A fully resolved set of WIT packages.
#[derive(Debug, Clone, Default)]
pub struct Resolve {
    pub types: TypeArena,
    pub packages: Vec<Package>,
    pub interfaces: Vec<Interface>,
    pub worlds: Vec<World>,
    /// The `wit-parser` resolve this model was copied from.
    parsed: wit_parser::Resolve,
}

impl Resolve {
    pub fn interface(&self, id: InterfaceId) -> Result<&Interface, ResolutionError> {
        self.interfaces.get(id).ok_or_else(|| unknown("interface", id))
    }

    pub fn world(&self, id: WorldId) -> Result<&World, ResolutionError> {
        self.worlds.get(id).ok_or_else(|| unknown("world", id))
    }

    pub fn package(&self, id: PackageId) -> Result<&Package, ResolutionError> {
        self.packages.get(id).ok_or_else(|| unknown("package", id))
    }

    /// `ns:pkg/iface@version` for named interfaces, `None` for inline ones.
    pub fn id_of(&self, id: InterfaceId) -> Option<String> {
        let iface = self.interfaces.get(id)?;
        let name = iface.name.as_deref()?;
        let package = self.packages.get(iface.package?)?;
        Some(package.name.interface_id(name))
    }

    /// `ns:pkg/world@version`
    pub fn world_id(&self, id: WorldId) -> Option<String> {
        let world = self.worlds.get(id)?;
        let package = self.packages.get(world.package)?;
        Some(package.name.interface_id(&world.name))
    }

    /// Component-level name of a world import or export.
    pub fn name_world_key(&self, key: &WorldKey) -> String {
        match key {
            WorldKey::Name(name) => name.clone(),
            WorldKey::Interface(id) => self.id_of(*id).unwrap_or_else(|| format!("interface-{id}")),
        }
    }

    /// Interfaces whose types `id` brings into scope with `use`, in first-use order.
    pub fn interface_deps(&self, id: InterfaceId) -> Vec<InterfaceId> {
        let mut deps = Vec::new();
        let Some(iface) = self.interfaces.get(id) else {
            return deps;
        };
        for ty in iface.types.values() {
            if let Some(dep) = self.foreign_owner(*ty, TypeOwner::Interface(id))
                && !deps.contains(&dep)
            {
                deps.push(dep);
            }
        }
        deps
    }

    /// Interface owning the target of an alias declared by `owner`, when
    /// that target lives in a different interface.
    pub fn foreign_owner(&self, ty: TypeId, owner: TypeOwner) -> Option<InterfaceId> {
        let def = self.types.get(ty).ok()?;
        let TypeDefKind::Type(Type::Id(target)) = def.kind else {
            return None;
        };
        match self.types.get(target).ok()?.owner {
            TypeOwner::Interface(dep) if TypeOwner::Interface(dep) != owner => Some(dep),
            _ => None,
        }
    }

    /// The `wit-parser` view of the same packages.
    pub fn parsed(&self) -> &wit_parser::Resolve {
        &self.parsed
    }

    /// Pick the world to target among the main packages.
    ///
    /// With no name, the main packages must define exactly one world. A
    /// name is either a plain world name or a `ns:pkg/world` path.
    pub fn select_world(
        &self,
        main: &[PackageId],
        name: Option<&str>,
    ) -> Result<WorldId, ResolutionError> {
        if name.is_none() {
            let candidates: Vec<&str> = main
                .iter()
                .filter_map(|pkg| self.packages.get(*pkg))
                .flat_map(|p| p.worlds.keys().map(String::as_str))
                .collect();
            if candidates.len() > 1 {
                return Err(ResolutionError::WorldSelection(format!(
                    "multiple worlds are defined ({}); select one with --world",
                    candidates.join(", ")
                )));
            }
        }

        let main: Vec<wit_parser::PackageId> = self
            .parsed
            .packages
            .iter()
            .enumerate()
            .filter(|(index, _)| main.contains(index))
            .map(|(_, (id, _))| id)
            .collect();
        match (self.parsed.select_world(&main, name), name) {
            (Ok(world), _) => Ok(world.index()),
            (Err(_), Some(name)) => Err(ResolutionError::Unknown {
                kind: "world",
                name: name.to_string(),
                at: Origin::default(),
            }),
            (Err(e), None) => Err(ResolutionError::WorldSelection(
                e.root_cause().to_string(),
            )),
        }
    }

    /// Render the package defining `world` as WIT text.
    pub fn print_world(&self, world: WorldId) -> Result<String, ResolutionError> {
        let package = self
            .parsed
            .worlds
            .iter()
            .nth(world)
            .and_then(|(_, w)| w.package)
            .ok_or_else(|| unknown("world", world))?;
        let mut printer = WitPrinter::default();
        printer
            .print(&self.parsed, package, &[])
            .map_err(|e| ResolutionError::Invalid {
                message: format!("failed to print world: {e}"),
                at: Origin::default(),
            })?;
        Ok(printer.output.to_string())
    }

    /// Worlds must not import and export the same name.
    fn check_collisions(&self, world: WorldId) -> Result<(), ResolutionError> {
        let w = self.world(world)?;
        for key in w.exports.keys() {
            if w.imports.contains_key(key) {
                return Err(ResolutionError::ImportExportCollision {
                    world: w.name.clone(),
                    name: self.name_world_key(key),
                });
            }
        }
        Ok(())
    }
}

fn unknown(kind: &'static str, id: usize) -> ResolutionError {
    ResolutionError::Unknown {
        kind,
        name: format!("#{id}"),
        at: Origin::default(),
    }
}

/// Where one main package comes from.
#[derive(Debug, Clone)]
pub enum Source {
    /// A `.wit` file, or a directory of them with a `deps/` folder.
    Path(PathBuf),
    /// An in-memory document.
    Text { path: PathBuf, text: String },
}

/// WIT sources collected from paths or strings, resolved together.
///
/// Sources are handed to `wit-parser` in the order they were pushed, so a
/// package pushed as text must follow the packages it uses.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    sources: Vec<Source>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a main package made of a single in-memory document.
    pub fn push_str(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> &mut Self {
        self.sources.push(Source::Text {
            path: path.into(),
            text: text.into(),
        });
        self
    }

    /// Add a main package from a `.wit` file, or from a directory of `.wit`
    /// files together with its `deps/` packages.
    pub fn push_path(&mut self, path: &Path) -> Result<&mut Self, WitError> {
        fs::metadata(path).map_err(|source| WitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        trace!(path = %path.display(), "added WIT path");
        self.sources.push(Source::Path(path.to_path_buf()));
        Ok(self)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Parse and resolve every collected package, then select a world.
    pub fn resolve(
        &self,
        features: &Features,
        world: Option<&str>,
    ) -> Result<(Resolve, WorldId), WitError> {
        let mut parsed = wit_parser::Resolve {
            all_features: features.all,
            ..Default::default()
        };
        for feature in &features.enabled {
            parsed.features.insert(feature.clone());
        }

        let mut main = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let id = match source {
                Source::Path(path) => {
                    let (id, _) = parsed
                        .push_path(path)
                        .map_err(|e| WitError::from_parser(&e))?;
                    debug!(path = %path.display(), "loaded WIT package");
                    id
                }
                Source::Text { path, text } => parsed
                    .push_str(path, text)
                    .map_err(|e| WitError::from_parser(&e))?,
            };
            main.push(id.index());
        }

        let (resolve, rejected) = convert::convert(parsed)?;
        let world = resolve.select_world(&main, world)?;
        resolve.check_collisions(world)?;
        rejected.check(&resolve, world)?;
        debug!(world = ?resolve.world_id(world), "selected world");
        Ok((resolve, world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use componentize_abi::Handle;

    #[test]
    fn features_split_on_commas_and_whitespace() {
        let features = Features::from_lists(&["a,b", " c  d ", ",,"], false);
        let names: Vec<_> = features.enabled.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert!(features.is_enabled("c"));
        assert!(!features.is_enabled("e"));
        assert!(Features::from_lists::<&str>(&[], true).is_enabled("e"));
    }

    #[test]
    fn interface_ids_include_versions() {
        let name = PackageName {
            namespace: "wasi".into(),
            name: "cli".into(),
            version: Some(Version::new(0, 2, 0)),
        };
        assert_eq!(name.interface_id("run"), "wasi:cli/run@0.2.0");
        assert_eq!(name.to_string(), "wasi:cli@0.2.0");
    }

    fn resolve_str(text: &str) -> Result<(Resolve, WorldId), WitError> {
        resolve_with(text, &Features::default())
    }

    fn resolve_with(text: &str, features: &Features) -> Result<(Resolve, WorldId), WitError> {
        let mut set = SourceSet::new();
        set.push_str("test.wit", text);
        set.resolve(features, None)
    }

    fn interface<'r>(resolve: &'r Resolve, name: &str) -> (InterfaceId, &'r Interface) {
        resolve
            .interfaces
            .iter()
            .enumerate()
            .find(|(_, i)| i.name.as_deref() == Some(name))
            .expect("interface exists")
    }

    #[test]
    fn forward_references_resolve() {
        let (resolve, _) = resolve_str(
            "package a:b;
             interface types {
               record outer { inner: inner }
               record inner { x: u32 }
             }
             world w { import types; }",
        )
        .expect("resolves");
        let (_, types) = interface(&resolve, "types");
        let TypeDefKind::Record(record) = &resolve.types.get(types.types["outer"]).expect("outer").kind
        else {
            panic!("outer is a record");
        };
        assert_eq!(record.fields[0].ty, Type::Id(types.types["inner"]));
    }

    #[test]
    fn use_creates_alias_and_dependency() {
        let (resolve, _) = resolve_str(
            "package a:b;
             interface consumer { use types.{point as p}; get: func() -> p; }
             interface types { record point { x: s32, y: s32 } }
             world w { import consumer; }",
        )
        .expect("resolves");
        let (consumer, _) = interface(&resolve, "consumer");
        let (types, _) = interface(&resolve, "types");
        assert_eq!(resolve.interface_deps(consumer), vec![types]);
        let alias = resolve.interfaces[consumer].types["p"];
        assert_eq!(
            resolve.types.get(alias).expect("alias").kind,
            TypeDefKind::Type(Type::Id(resolve.interfaces[types].types["point"]))
        );
    }

    #[test]
    fn resource_functions_are_named_and_typed() {
        let (resolve, _) = resolve_str(
            "package a:b;
             interface counters {
               resource counter {
                 constructor(start: u32);
                 increment: func(by: u32) -> u32;
                 zero: static func() -> counter;
               }
             }
             world w { export counters; }",
        )
        .expect("resolves");
        let (_, iface) = interface(&resolve, "counters");
        let counter = iface.types["counter"];
        let names: Vec<&str> = iface.functions.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            ["[constructor]counter", "[method]counter.increment", "[static]counter.zero"]
        );

        let ctor = &iface.functions["[constructor]counter"];
        assert_eq!(ctor.item_name(), "counter");
        let Some(Type::Id(result)) = ctor.result else {
            panic!("constructor returns a handle");
        };
        assert_eq!(
            resolve.types.get(result).expect("handle").kind,
            TypeDefKind::Handle(Handle::Own(counter))
        );

        let method = &iface.functions["[method]counter.increment"];
        assert_eq!(method.item_name(), "increment");
        assert_eq!(method.params[0].0, "self");
        let Type::Id(this) = method.params[0].1 else {
            panic!("self is a handle");
        };
        assert_eq!(
            resolve.types.get(this).expect("borrow").kind,
            TypeDefKind::Handle(Handle::Borrow(counter))
        );
    }

    #[test]
    fn cyclic_records_are_rejected() {
        let err = resolve_str(
            "package a:b;
             interface t { record a { b: b } record b { a: option<a> } }",
        )
        .expect_err("cycle");
        let WitError::Cyclic(cycle) = err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(cycle.path.first(), cycle.path.last());
        assert!(!cycle.path.is_empty());
    }

    #[test]
    fn recursion_through_handles_is_allowed() {
        resolve_str(
            "package a:b;
             interface t { resource node { children: func() -> list<node>; } }
             world w { import t; }",
        )
        .expect("handles break cycles");
    }

    #[test]
    fn unknown_type_reports_location() {
        let err = resolve_str("package a:b;\ninterface t {\n  f: func(x: missing);\n}")
            .expect_err("unknown");
        let WitError::Resolution(ResolutionError::Unknown { name, at, .. }) = err else {
            panic!("expected unknown, got {err}");
        };
        assert_eq!(name, "missing");
        let at = at.0.expect("location");
        assert_eq!(at.file, PathBuf::from("test.wit"));
        assert_eq!((at.line, at.col), (3, 14));
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        let err = resolve_str("package a:b;\nworld w {\n    export f: func( -> u32;\n}\n")
            .expect_err("syntax");
        let WitError::Parse(parse) = err else {
            panic!("expected a parse error, got {err}");
        };
        assert_eq!(parse.line, 3);
    }

    #[test]
    fn empty_records_are_rejected() {
        let err = resolve_str(
            "package a:b;
             interface t { record e {} f: func(x: e); }
             world w { import t; }",
        )
        .expect_err("empty record");
        assert!(err.to_string().contains("record"), "{err}");
    }

    #[test]
    fn empty_flags_are_rejected() {
        let err = resolve_str(
            "package a:b;
             world w { export f: func(x: list<flags-none>); flags flags-none {} }",
        )
        .expect_err("empty flags");
        assert!(matches!(err, WitError::Resolution(_) | WitError::Parse(_)), "{err}");
    }

    #[test]
    fn own_of_non_resource_is_invalid() {
        let err = resolve_str("package a:b; interface t { record r { x: u8 } f: func(x: own<r>); }")
            .expect_err("not a resource");
        assert!(err.to_string().contains("resource"), "{err}");
    }

    #[test]
    fn export_dependencies_are_imported_first() {
        let (resolve, world) = resolve_str(
            "package a:b;
             interface types { record point { x: u32 } }
             interface api { use types.{point}; get: func() -> point; }
             world w { export api; }",
        )
        .expect("resolves");
        let world = &resolve.worlds[world];
        let imports: Vec<String> = world.imports.keys().map(|k| resolve.name_world_key(k)).collect();
        assert_eq!(imports, ["a:b/types"]);
        let exports: Vec<String> = world.exports.keys().map(|k| resolve.name_world_key(k)).collect();
        assert_eq!(exports, ["a:b/api"]);
    }

    #[test]
    fn unstable_items_follow_features() {
        let text = "package a:b;
             interface t {
               @unstable(feature = fancy)
               fancy: func();
               plain: func();
             }
             world w { import t; }";
        let (resolve, _) = resolve_str(text).expect("resolves");
        assert_eq!(interface(&resolve, "t").1.functions.len(), 1);

        let features = Features::from_lists(&["fancy"], false);
        let (resolve, _) = resolve_with(text, &features).expect("resolves");
        assert_eq!(interface(&resolve, "t").1.functions.len(), 2);

        let (resolve, _) = resolve_with(text, &Features::from_lists::<&str>(&[], true))
            .expect("resolves");
        assert_eq!(interface(&resolve, "t").1.functions.len(), 2);
    }

    #[test]
    fn include_merges_and_renames() {
        let mut set = SourceSet::new();
        set.push_str(
            "test.wit",
            "package a:b;
             world base { import log: func(msg: string); export run: func(); }
             world full { include base with { log as trace-log } }",
        );
        let (resolve, world) = set
            .resolve(&Features::default(), Some("full"))
            .expect("resolves");
        let full = &resolve.worlds[world];
        assert!(full.imports.contains_key(&WorldKey::Name("trace-log".into())));
        assert!(full.exports.contains_key(&WorldKey::Name("run".into())));
    }

    #[test]
    fn dependency_packages_resolve_by_name() {
        let mut set = SourceSet::new();
        set.push_str("dep.wit", "package c:dep@1.0.0; interface logger { log: func(m: string); }");
        set.push_str("main.wit", "package a:main; world w { import c:dep/logger@1.0.0; }");
        let (resolve, world) = set.resolve(&Features::default(), Some("a:main/w")).expect("resolves");
        let imports: Vec<String> = resolve.worlds[world]
            .imports
            .keys()
            .map(|k| resolve.name_world_key(k))
            .collect();
        assert_eq!(imports, ["c:dep/logger@1.0.0"]);
    }

    #[test]
    fn unknown_worlds_are_named() {
        let mut set = SourceSet::new();
        set.push_str("test.wit", "package a:b; world w { export f: func(); }");
        let err = set
            .resolve(&Features::default(), Some("nope"))
            .expect_err("no such world");
        assert!(matches!(
            err,
            WitError::Resolution(ResolutionError::Unknown { kind: "world", ref name, .. }) if name == "nope"
        ));
    }

    #[test]
    fn missing_paths_are_io_errors() {
        let mut set = SourceSet::new();
        let err = set
            .push_path(Path::new("/definitely/not/here.wit"))
            .err()
            .expect("missing path");
        assert!(matches!(err, WitError::Io { .. }));
    }

    #[test]
    fn printing_uses_wit_syntax() {
        let (resolve, world) =
            resolve_str("package a:b;\nworld w { export add: func(a: u32, b: u32) -> u32; }")
                .expect("resolves");
        let text = resolve.print_world(world).expect("prints");
        assert!(text.contains("package a:b;"), "{text}");
        assert!(text.contains("world w {"), "{text}");
        assert!(text.contains("export add: func(a: u32, b: u32) -> u32;"), "{text}");
    }
}
