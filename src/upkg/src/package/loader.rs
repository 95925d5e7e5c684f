//! Object loader
//!
//! Owns every opened package and materializes exports on demand. Creating
//! an object only allocates it and queues it; deserialization happens when
//! the outermost load batch ends, so objects that reference each other can
//! be created in any order:
//!
//! ```text
//! begin_load
//!   create_export(A)          queued
//!     create_export(A.outer)  queued
//! end_load                    drain: A.outer, A, anything they reference
//!                             then post-load hooks
//! ```
//!
//! Failures inside one object are logged, counted in [`RunStats`] and kept
//! for [`Loader::take_errors`]; they never abort the batch.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use crate::archive::Archive;
use crate::game::{ue4_ver, GameCatalog};
use crate::object::{Object, ObjectHandle};
use crate::package::tables::ObjectIndex;
use crate::package::Package;
use crate::property::{PropertyDecoder, TypeRegistry};
use crate::stats::RunStats;
use crate::vfs::FileCatalog;
use crate::{Error, Result, ResultExt};

/// Nested creations deeper than this mean a cyclic outer chain.
const MAX_BATCH_DEPTH: usize = 256;
/// Generation 3 objects carry a net index from this version on.
const NET_INDEX_VERSION: i32 = 322;

#[derive(Default)]
struct LoadBatch {
    depth: usize,
    draining: bool,
    pending: VecDeque<(Rc<Package>, usize)>,
    /// Deserialized objects waiting for their post-load hook.
    loaded: Vec<ObjectHandle>,
}

/// Lower-cased file name without directories or extension.
fn package_key(name: &str) -> String {
    base_name(name).to_ascii_lowercase()
}

fn base_name(name: &str) -> &str {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    }
}

pub struct Loader {
    registry: Arc<TypeRegistry>,
    games: GameCatalog,
    files: FileCatalog,
    stats: RunStats,
    startup_package: Option<String>,
    packages: RefCell<Vec<Rc<Package>>>,
    /// `None` remembers a package that could not be found or opened.
    cache: RefCell<HashMap<String, Option<Rc<Package>>>>,
    batch: RefCell<LoadBatch>,
    errors: RefCell<Vec<Error>>,
}

impl Loader {
    pub fn new(registry: impl Into<Arc<TypeRegistry>>, files: FileCatalog) -> Self {
        Self {
            registry: registry.into(),
            games: GameCatalog::new(),
            files,
            stats: RunStats::new(),
            startup_package: None,
            packages: RefCell::new(Vec::new()),
            cache: RefCell::new(HashMap::new()),
            batch: RefCell::new(LoadBatch::default()),
            errors: RefCell::new(Vec::new()),
        }
    }

    pub fn with_games(mut self, games: GameCatalog) -> Self {
        self.games = games;
        self
    }

    /// Package searched for generation 3 imports whose own package is absent.
    pub fn with_startup_package(mut self, name: &str) -> Self {
        self.startup_package = Some(name.to_string());
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn games(&self) -> &GameCatalog {
        &self.games
    }

    pub fn files(&self) -> &FileCatalog {
        &self.files
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Every package opened so far, in load order.
    pub fn packages(&self) -> Vec<Rc<Package>> {
        self.packages.borrow().clone()
    }

    /// An already opened package.
    pub fn loaded(&self, name: &str) -> Option<Rc<Package>> {
        self.cache.borrow().get(&package_key(name)).cloned().flatten()
    }

    /// Errors caught at object boundaries since the last call.
    pub fn take_errors(&self) -> Vec<Error> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }

    /// Open `name` through the file catalog, or return the cached package.
    ///
    /// `Ok(None)` when no such file is known; a failed open is returned
    /// once and then remembered as absent.
    pub fn load_package(&self, name: &str) -> Result<Option<Rc<Package>>> {
        let key = package_key(name);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let Some(file) = self.files.find_package(name) else {
            tracing::debug!("package {} is not in the catalog", name);
            self.cache.borrow_mut().insert(key, None);
            return Ok(None);
        };
        let opened = self
            .files
            .open(file)
            .and_then(|reader| Package::open(base_name(&file.path), reader, &self.games));
        match opened {
            Ok(package) => Ok(Some(self.add_package(package))),
            Err(err) => {
                self.cache.borrow_mut().insert(key, None);
                Err(err)
            }
        }
    }

    /// Register an already opened package. The first package of a name
    /// wins; a later one with the same name is dropped.
    pub fn add_package(&self, package: Package) -> Rc<Package> {
        let key = package_key(package.name());
        if let Some(Some(existing)) = self.cache.borrow().get(&key) {
            tracing::warn!("package {} already loaded, keeping the first", package.name());
            return existing.clone();
        }
        let version = package.version();
        tracing::info!(
            "loaded {} ({} {}/{}, {} exports)",
            package.name(),
            self.games.name_for(version.game),
            version.file_version,
            version.licensee_version,
            package.exports().len()
        );
        let package = Rc::new(package);
        self.stats.package_loaded();
        self.cache.borrow_mut().insert(key, Some(package.clone()));
        self.packages.borrow_mut().push(package.clone());
        package
    }

    pub fn begin_load(&self) {
        self.batch.borrow_mut().depth += 1;
    }

    /// Close a batch. The outermost close deserializes every queued object,
    /// including objects queued while draining, then runs post-load hooks.
    pub fn end_load(&self) {
        {
            let mut batch = self.batch.borrow_mut();
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 || batch.draining {
                return;
            }
            batch.draining = true;
        }

        loop {
            let next = self.batch.borrow_mut().pending.pop_front();
            let Some((package, index)) = next else {
                break;
            };
            if let Err(err) = self.serialize_export(&package, index) {
                self.caught(err);
            }
        }

        let loaded = std::mem::take(&mut self.batch.borrow_mut().loaded);
        for object in loaded {
            let mut object = object.borrow_mut();
            let Some(hook) = self.registry.post_load_hook(&object.type_name) else {
                continue;
            };
            if let Err(err) = hook(&mut *object).with_context(|| format!("post-load {}", object.full_name())) {
                self.caught(err);
            }
        }
        self.batch.borrow_mut().draining = false;
    }

    fn caught(&self, err: Error) {
        tracing::warn!("{}", err.breadcrumb());
        self.stats.record_error(&err);
        self.errors.borrow_mut().push(err);
    }

    /// Materialize whatever `index` of `package` refers to.
    pub fn resolve(&self, package: &Rc<Package>, index: i32) -> Result<Option<ObjectHandle>> {
        match package.resolve(index)? {
            ObjectIndex::Null => Ok(None),
            ObjectIndex::Import(i) => self.create_import(package, i),
            ObjectIndex::Export(i) => self.create_export(package, i),
        }
    }

    /// Object for export `index`, created at most once.
    ///
    /// Returns `None` for class default objects and for classes the registry
    /// doesn't know. A new object is queued and filled when the outermost
    /// batch ends.
    pub fn create_export(&self, package: &Rc<Package>, index: usize) -> Result<Option<ObjectHandle>> {
        let export = package.exports().get(index).ok_or_else(|| {
            Error::corrupt(0, format!("{}: export {} out of range", package.name(), index))
        })?;
        if let Some(object) = export.object() {
            return Ok(Some(object));
        }
        if export.declined.get() {
            return Ok(None);
        }

        let default_outer = package.version().is_ue4()
            && package
                .object_name(export.outer_index)
                .is_some_and(|n| n.starts_with("Default__"));
        if export.object_name.starts_with("Default__") || default_outer {
            export.declined.set(true);
            return Ok(None);
        }

        let class = package.class_name_of(index).unwrap_or("None");
        let Some(descriptor) = self.registry.find(class) else {
            if self.registry.is_suppressed(class) {
                self.stats.skipped();
            } else {
                tracing::warn!("{}: unknown class {} for {}", package.name(), class, export.object_name);
                self.stats.unknown_class(class);
            }
            export.declined.set(true);
            return Ok(None);
        };

        if self.batch.borrow().depth > MAX_BATCH_DEPTH {
            return Err(Error::corrupt(
                0,
                format!("{}: outer chain of export {} does not terminate", package.name(), index),
            ));
        }

        self.begin_load();
        let result = (|| -> Result<Option<ObjectHandle>> {
            if let ObjectIndex::Export(outer) = package.resolve(export.outer_index)? {
                self.create_export(package, outer)?;
            }
            // the outer chain may have come back around to this export
            if let Some(object) = export.object() {
                return Ok(Some(object));
            }
            let mut object = Object::new(&descriptor.name, &export.object_name, package.name(), index);
            object.properties = self.registry.defaults(&descriptor.name);
            if descriptor.silent {
                tracing::trace!("creating {}", object.full_name());
            } else {
                tracing::debug!("creating {}", object.full_name());
            }
            let object = Rc::new(RefCell::new(object));
            *export.object.borrow_mut() = Some(object.clone());
            self.batch.borrow_mut().pending.push_back((package.clone(), index));
            Ok(Some(object))
        })();
        self.end_load();
        result
    }

    /// Object for import `index` of `package`, found in the package that
    /// defines it. A failure marks the import missing and warns once.
    pub fn create_import(&self, package: &Rc<Package>, index: usize) -> Result<Option<ObjectHandle>> {
        let import = package.imports().get(index).ok_or_else(|| {
            Error::corrupt(0, format!("{}: import {} out of range", package.name(), index))
        })?;
        if import.is_missing() {
            return Ok(None);
        }
        // a package import has no object of its own
        if import.outer_index == 0 {
            return Ok(None);
        }
        let raw = ObjectIndex::Import(index).to_raw();
        let Some(target_name) = package.outermost_name(raw) else {
            return Ok(None);
        };
        let ue4 = package.version().is_ue4();
        if ue4 && (target_name.starts_with("/Script/") || target_name.starts_with("/Engine/")) {
            import.missing.set(true);
            return Ok(None);
        }

        let target = match self.load_package(target_name) {
            Ok(target) => target,
            Err(err) => {
                self.caught(err.context(format!("import {}", import.object_name)));
                None
            }
        };

        if let Some(target) = target {
            if let Some(export) = target.find_export_for_import(package, index) {
                return self.create_export(&target, export);
            }
            tracing::warn!(
                "{}: import {} ({}) not found in {}",
                package.name(),
                import.object_name,
                import.class_name,
                target.name()
            );
            import.missing.set(true);
            self.stats.missing_import();
            return Ok(None);
        }

        if !ue4 {
            if let Some(found) = self.search_loaded(package, index)? {
                return Ok(Some(found));
            }
        }

        if self.stats.missing_package(target_name) {
            tracing::warn!("package {} not found", target_name);
        }
        tracing::debug!(
            "{}: import {}.{} is missing",
            package.name(),
            target_name,
            import.object_name
        );
        import.missing.set(true);
        self.stats.missing_import();
        Ok(None)
    }

    /// Generation 3 fallback: the startup package, then every other open
    /// package.
    fn search_loaded(&self, package: &Rc<Package>, index: usize) -> Result<Option<ObjectHandle>> {
        let mut candidates = Vec::new();
        if let Some(startup) = &self.startup_package {
            match self.load_package(startup) {
                Ok(Some(p)) => candidates.push(p),
                Ok(None) => {}
                Err(err) => self.caught(err),
            }
        }
        for p in self.packages() {
            if !Rc::ptr_eq(&p, package) && !candidates.iter().any(|c| Rc::ptr_eq(c, &p)) {
                candidates.push(p);
            }
        }
        for candidate in candidates {
            if let Some(export) = candidate.find_export_for_import(package, index) {
                return self.create_export(&candidate, export);
            }
        }
        Ok(None)
    }

    /// Deserialize a queued export, then materialize what it references.
    fn serialize_export(&self, package: &Rc<Package>, index: usize) -> Result<()> {
        let export = &package.exports()[index];
        let Some(object) = export.object() else {
            return Ok(());
        };
        if object.borrow().loaded {
            return Ok(());
        }

        if export.serial_size > 0 {
            let mut reader = package.reader()?;
            let ar: &mut dyn Archive = &mut **reader;
            let start = export.serial_offset.max(0) as u64;
            let end = start + export.serial_size as u64;
            let result = ar.seek(start).and_then(|_| {
                ar.set_stopper(Some(end));
                self.read_object(package, ar, &object, end)
            });
            ar.set_stopper(None);
            result.with_context(|| format!("{} export {} ({})", package.name(), index, export.object_name))?;
        }
        object.borrow_mut().loaded = true;
        self.stats.object_loaded();
        self.batch.borrow_mut().loaded.push(object.clone());

        let refs: Vec<i32> = {
            let object = object.borrow();
            let mut out = Vec::new();
            object.properties.collect_refs(&mut out);
            out.iter().map(|r| r.index).collect()
        };
        for index in refs {
            if let Err(err) = self.resolve(package, index) {
                self.caught(err.context(format!("reference {} of {}", index, export.object_name)));
            }
        }
        Ok(())
    }

    fn read_object(&self, package: &Package, ar: &mut dyn Archive, object: &ObjectHandle, end: u64) -> Result<()> {
        let mut guard = object.borrow_mut();
        let object = &mut *guard;
        let version = *ar.version();
        let has_net_index = if version.is_ue4() {
            version.file_version < ue4_ver::REMOVE_NET_INDEX
        } else {
            version.is_ue3_or_later() && version.file_version >= NET_INDEX_VERSION
        };
        if has_net_index {
            object.net_index = Some(ar.read_i32()?);
        }

        PropertyDecoder::new(&self.registry, package)
            .with_stats(&self.stats)
            .read_properties(ar, &object.type_name, &mut object.properties)?;

        if version.is_ue4() && ar.tell() + 4 <= end && ar.read_bool()? {
            let _guid = ar.read_guid()?;
        }
        let pos = ar.tell();
        if pos < end {
            object.trailing = ar.read_bytes_vec((end - pos) as usize)?;
            object.trailing_offset = pos;
        }
        Ok(())
    }

    /// Create and deserialize every export of `package`. Returns how many
    /// exports have an object.
    pub fn load_all(&self, package: &Rc<Package>) -> usize {
        self.begin_load();
        for index in 0..package.exports().len() {
            if let Err(err) = self.create_export(package, index) {
                self.caught(err);
            }
        }
        self.end_load();
        package.exports().iter().filter(|e| e.object().is_some()).count()
    }

    /// Call `f` for every materialized object whose class is `class` or
    /// derives from it. Returns the number of matches.
    pub fn objects_of_class(&self, class: &str, mut f: impl FnMut(&ObjectHandle)) -> usize {
        let mut count = 0;
        for package in self.packages() {
            for export in package.exports() {
                let Some(object) = export.object() else {
                    continue;
                };
                let matches = self.registry.is_a(&object.borrow().type_name, class);
                if matches {
                    f(&object);
                    count += 1;
                }
            }
        }
        count
    }

    /// Open and fully load each named package. `progress` is called before
    /// each one with `(done, total, name)` and stops the run by returning
    /// `false`; packages loaded so far are kept.
    pub fn load_packages(
        &self,
        names: &[String],
        mut progress: impl FnMut(usize, usize, &str) -> bool,
    ) -> Vec<Rc<Package>> {
        let mut loaded = Vec::new();
        for (done, name) in names.iter().enumerate() {
            if !progress(done, names.len(), name) {
                tracing::info!("stopped after {} of {} packages", done, names.len());
                break;
            }
            match self.load_package(name) {
                Ok(Some(package)) => {
                    self.load_all(&package);
                    loaded.push(package);
                }
                Ok(None) => {
                    if self.stats.missing_package(name) {
                        tracing::warn!("package {} not found", name);
                    }
                }
                Err(err) => self.caught(err),
            }
        }
        loaded
    }

    /// Release file handles of every package and container.
    pub fn close_readers(&self) {
        for package in self.packages.borrow().iter() {
            package.close_reader();
        }
        self.files.close_readers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Value;
    use crate::package::fixture::PackageBuilder;
    use crate::property::{FieldType, PropertyDescriptor, TypeDescriptor};
    use crate::ErrorKind;

    fn mark_seen(object: &mut Object) -> Result<()> {
        let health = object.properties.get("Health").and_then(|v| v.as_int()).unwrap_or(-1);
        object.properties.set("Seen", Value::Int(health as i32));
        Ok(())
    }

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::with_builtins();
        r.register(
            TypeDescriptor::new("Pawn")
                .parent("Object")
                .prop(PropertyDescriptor::scalar("Health", FieldType::Int))
                .prop(PropertyDescriptor::scalar("Armor", FieldType::Int))
                .prop(PropertyDescriptor::scalar("Owner", FieldType::Object))
                .post_load(mark_seen),
        );
        r.register(TypeDescriptor::new("Hero").parent("Pawn"));
        r.register(TypeDescriptor::new("Level").parent("Object").silent());
        r.suppress("Sound*");
        r
    }

    /// `Maps`: a level holding two pawns, the second owned by the first.
    fn maps() -> Vec<u8> {
        let mut b = PackageBuilder::new();
        let core = b.import("Core", "Package", 0, "Core");
        let pawn = b.import("Core", "Class", core, "Pawn");
        let hero = b.import("Core", "Class", core, "Hero");
        let level_class = b.import("Core", "Class", core, "Level");
        let level = b.export(level_class, 0, "Entry", Vec::new());
        let body = b.body(|b, w| {
            b.int_property(w, "Health", 100);
            b.int_property(w, "Armor", 5);
        });
        let first = b.export(pawn, level, "Guard", body);
        let body = b.body(|b, w| {
            b.int_property(w, "Health", 40);
            b.object_property(w, "Owner", first);
        });
        b.export(hero, level, "Scout", body);
        b.build()
    }

    fn loader() -> Loader {
        Loader::new(registry(), FileCatalog::new())
    }

    fn open(loader: &Loader, name: &str, bytes: Vec<u8>) -> Rc<Package> {
        loader.add_package(Package::from_bytes(name, bytes, loader.games()).unwrap())
    }

    #[test]
    fn test_create_export_is_idempotent() {
        let loader = loader();
        let package = open(&loader, "Maps", maps());
        let a = loader.create_export(&package, 1).unwrap().unwrap();
        let b = loader.create_export(&package, 1).unwrap().unwrap();
        assert!(Rc::ptr_eq(&a, &b));

        let guard = a.borrow();
        assert!(guard.loaded);
        assert_eq!(guard.type_name, "Pawn");
        assert_eq!(guard.properties.get("Health"), Some(&Value::Int(100)));
        assert_eq!(guard.properties.get("Armor"), Some(&Value::Int(5)));
        assert_eq!(guard.net_index, Some(-1));
        assert_eq!(guard.full_name(), "Pawn'Maps.Guard'");
        // outer was created first
        assert!(package.exports()[0].object().is_some());
    }

    #[test]
    fn test_batch_defers_deserialization() {
        let loader = loader();
        let package = open(&loader, "Maps", maps());
        loader.begin_load();
        let scout = loader.create_export(&package, 2).unwrap().unwrap();
        assert!(!scout.borrow().loaded);
        loader.begin_load();
        loader.end_load();
        assert!(!scout.borrow().loaded);
        loader.end_load();

        let scout = scout.borrow();
        assert!(scout.loaded);
        // hook inherited from Pawn ran after the properties were read
        assert_eq!(scout.properties.get("Seen"), Some(&Value::Int(40)));
        let owner = scout.properties.get("Owner").and_then(|v| v.as_object()).unwrap();
        assert_eq!(owner.path.as_deref(), Some("Maps.Entry.Guard"));
        // the reference was followed
        let guard = package.exports()[1].object().unwrap();
        assert!(guard.borrow().loaded);
        assert_eq!(guard.borrow().properties.get("Seen"), Some(&Value::Int(100)));
    }

    #[test]
    fn test_missing_import_is_not_fatal() {
        let loader = loader();
        let mut b = PackageBuilder::new();
        let core = b.import("Core", "Package", 0, "Core");
        let pawn = b.import("Core", "Class", core, "Pawn");
        let gone = b.import("Core", "Package", 0, "Gone");
        let thing = b.import("Core", "Pawn", gone, "Thing");
        let body = b.body(|b, w| b.object_property(w, "Owner", thing));
        b.export(pawn, 0, "Orphan", body);
        let package = open(&loader, "Maps", b.build());

        assert_eq!(loader.load_all(&package), 1);
        let orphan = package.exports()[0].object().unwrap();
        assert!(orphan.borrow().loaded);
        assert!(package.imports()[3].is_missing());

        // reported once
        assert!(loader.create_import(&package, 3).unwrap().is_none());
        let summary = loader.stats().summary();
        assert_eq!(summary.missing_packages, vec!["gone"]);
        assert!(loader.take_errors().is_empty());
    }

    #[test]
    fn test_import_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = PackageBuilder::new();
        let class = core.import("Core", "Class", 0, "Pawn");
        let body = core.body(|b, w| b.int_property(w, "Health", 9));
        core.export(class, 0, "Boss", body);
        std::fs::write(dir.path().join("Core.u"), core.build()).unwrap();

        let mut files = FileCatalog::new();
        files.register_dir(dir.path()).unwrap();
        let loader = Loader::new(registry(), files);

        let mut b = PackageBuilder::new();
        let pkg = b.import("Core", "Package", 0, "Core");
        let pawn = b.import("Core", "Pawn", pkg, "Boss");
        let class = b.import("Core", "Class", pkg, "Pawn");
        let body = b.body(|b, w| b.object_property(w, "Owner", pawn));
        b.export(class, 0, "Minion", body);
        let package = open(&loader, "Maps", b.build());

        loader.load_all(&package);
        assert_eq!(loader.packages().len(), 2);
        let core = loader.loaded("core").unwrap();
        let boss = core.exports()[0].object().unwrap();
        assert_eq!(boss.borrow().properties.get("Health"), Some(&Value::Int(9)));
        // the same object comes back through the import
        let again = loader.create_import(&package, 1).unwrap().unwrap();
        assert!(Rc::ptr_eq(&boss, &again));
        loader.close_readers();
    }

    #[test]
    fn test_startup_package_fallback() {
        let loader = loader().with_startup_package("Startup");
        let mut startup = PackageBuilder::new();
        let class = startup.import("Core", "Class", 0, "Pawn");
        let body = startup.body(|b, w| b.int_property(w, "Health", 1));
        // forced export: its outermost export stands for the original package
        let shared = startup.export(0, 0, "Shared", Vec::new());
        startup.export(class, shared, "Sentry", body);
        open(&loader, "Startup", startup.build());

        let mut b = PackageBuilder::new();
        let pkg = b.import("Core", "Package", 0, "Shared");
        let sentry = b.import("Core", "Pawn", pkg, "Sentry");
        let lost = b.import("Core", "Pawn", pkg, "Lost");
        let package = open(&loader, "Maps", b.build());

        let sentry = loader.resolve(&package, sentry).unwrap().unwrap();
        assert_eq!(sentry.borrow().package, "Startup");
        assert_eq!(sentry.borrow().properties.get("Health"), Some(&Value::Int(1)));
        assert!(!package.imports()[1].is_missing());

        assert!(loader.resolve(&package, lost).unwrap().is_none());
        assert!(package.imports()[2].is_missing());
        assert_eq!(loader.stats().summary().missing_packages, vec!["shared"]);
    }

    #[test]
    fn test_unknown_and_suppressed_classes() {
        let loader = loader();
        let mut b = PackageBuilder::new();
        let core = b.import("Core", "Package", 0, "Core");
        let mystery = b.import("Core", "Class", core, "Mystery");
        let sound = b.import("Core", "Class", core, "SoundCue");
        let pawn = b.import("Core", "Class", core, "Pawn");
        b.export(mystery, 0, "A", Vec::new());
        b.export(sound, 0, "B", Vec::new());
        b.export(pawn, 0, "Default__Pawn", Vec::new());
        let package = open(&loader, "Maps", b.build());

        assert_eq!(loader.load_all(&package), 0);
        assert!(package.exports()[0].declined.get());
        let summary = loader.stats().summary();
        assert_eq!(summary.unknown_classes, vec!["Mystery"]);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn test_corrupt_object_is_recorded() {
        let loader = loader();
        let mut b = PackageBuilder::new();
        let core = b.import("Core", "Package", 0, "Core");
        let pawn = b.import("Core", "Class", core, "Pawn");
        let mut w = b.writer();
        // net index, then a name index past the table
        w.write_i32(0).write_i32(999).write_i32(0);
        b.export(pawn, 0, "Broken", w.into_inner());
        let body = b.body(|b, w| b.int_property(w, "Health", 3));
        b.export(pawn, 0, "Fine", body);
        let package = open(&loader, "Maps", b.build());

        assert_eq!(loader.load_all(&package), 2);
        let errors = loader.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::StructuralCorruption);
        assert!(errors[0].breadcrumb().starts_with("Maps export 0 (Broken) > "));
        assert!(!package.exports()[0].object().unwrap().borrow().loaded);
        assert!(package.exports()[1].object().unwrap().borrow().loaded);
        assert_eq!(loader.stats().summary().corrupt, 1);
    }

    #[test]
    fn test_objects_of_class_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Maps.umap"), maps()).unwrap();
        let mut files = FileCatalog::new();
        files.register_dir(dir.path()).unwrap();
        let loader = Loader::new(registry(), files);

        let names = vec!["Maps".to_string(), "Absent".to_string(), "Later".to_string()];
        let mut seen = Vec::new();
        let loaded = loader.load_packages(&names, |done, total, name| {
            seen.push((done, total, name.to_string()));
            done < 2
        });
        assert_eq!(loaded.len(), 1);
        assert_eq!(seen.len(), 3);
        assert_eq!(loader.stats().summary().missing_packages, vec!["absent"]);

        let mut found = Vec::new();
        let count = loader.objects_of_class("Pawn", |o| found.push(o.borrow().name.clone()));
        assert_eq!(count, 2);
        assert_eq!(found, vec!["Guard", "Scout"]);
        assert_eq!(loader.objects_of_class("Hero", |_| {}), 1);
        assert_eq!(loader.objects_of_class("Object", |_| {}), 3);
    }

    #[test]
    fn test_package_cache() {
        let loader = loader();
        let first = open(&loader, "Maps", maps());
        let second = open(&loader, "MAPS", maps());
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(loader.packages().len(), 1);
        assert!(loader.load_package("Nowhere").unwrap().is_none());
        assert!(loader.load_package("/Game/Maps.umap").unwrap().is_some());
        assert_eq!(base_name("/Game/Maps/Entry.umap"), "Entry");
    }
}
