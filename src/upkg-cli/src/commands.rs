//! Command handlers

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use upkg::{FileCatalog, Loader, Object, Package, PackageSummary, RunSummary, Settings, TypeRegistry};

/// Registered directories plus the package argument, if it names a file.
///
/// Returns the catalog and the package name to load.
pub fn catalog(dirs: &[PathBuf], package: Option<&str>) -> Result<(FileCatalog, Option<String>)> {
    let mut files = FileCatalog::new();
    for dir in dirs {
        files
            .register_dir(dir)
            .with_context(|| format!("Failed to scan {}", dir.display()))?;
    }

    let name = match package {
        Some(arg) if Path::new(arg).is_file() => {
            let path = Path::new(arg);
            files
                .register_file(path)
                .with_context(|| format!("Failed to register {}", path.display()))?;
            Some(package_name(path))
        }
        Some(arg) => Some(arg.to_string()),
        None => None,
    };

    Ok((files, name))
}

/// Package name for a path: the file name without extension.
pub fn package_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn loader(settings: &Settings, files: FileCatalog) -> Loader {
    let mut registry = TypeRegistry::with_builtins();
    settings.configure(&mut registry);
    let loader = Loader::new(registry, files);
    match &settings.startup_package {
        Some(name) => loader.with_startup_package(name),
        None => loader,
    }
}

fn open(loader: &Loader, name: &str) -> Result<Rc<Package>> {
    match loader.load_package(name)? {
        Some(package) => Ok(package),
        None => bail!("package {} not found", name),
    }
}

#[derive(Serialize)]
struct PackageInfo<'a> {
    name: &'a str,
    game: &'static str,
    fully_compressed: bool,
    names: usize,
    imports: usize,
    exports: usize,
    summary: &'a PackageSummary,
}

pub fn info(loader: &Loader, name: &str) -> Result<()> {
    let package = open(loader, name)?;
    let info = PackageInfo {
        name: package.name(),
        game: loader.games().name_for(package.version().game),
        fully_compressed: package.is_fully_compressed(),
        names: package.names().len(),
        imports: package.imports().len(),
        exports: package.exports().len(),
        summary: package.summary(),
    };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub fn list(loader: &Loader, name: &str, imports: bool, names: bool) -> Result<()> {
    let package = open(loader, name)?;

    println!("Exports ({}):", package.exports().len());
    for (i, export) in package.exports().iter().enumerate() {
        let path = package
            .object_path(i as i32 + 1)
            .unwrap_or_else(|| export.object_name.clone());
        println!(
            "  {:5}  {:<24} {}  ({} bytes @ {})",
            i,
            package.class_name_of(i).unwrap_or("?"),
            path,
            export.serial_size,
            export.serial_offset
        );
    }

    if imports {
        println!("\nImports ({}):", package.imports().len());
        for (i, import) in package.imports().iter().enumerate() {
            let path = package
                .object_path(-(i as i32) - 1)
                .unwrap_or_else(|| import.object_name.clone());
            println!("  {:5}  {:<24} {}", i, import.class_name, path);
        }
    }

    if names {
        println!("\nNames ({}):", package.names().len());
        for (i, n) in package.names().iter().enumerate() {
            println!("  {:5}  {}", i, n);
        }
    }

    Ok(())
}

pub fn dump(loader: &Loader, name: &str, class: Option<&str>, output: Option<&Path>) -> Result<()> {
    let package = open(loader, name)?;
    let count = loader.load_all(&package);
    tracing::info!("loaded {} objects from {}", count, package.name());

    let mut objects: Vec<Object> = Vec::new();
    for export in package.exports() {
        let Some(object) = export.object() else {
            continue;
        };
        let object = object.borrow();
        if let Some(class) = class {
            if !loader.registry().is_a(&object.type_name, class) {
                continue;
            }
        }
        objects.push(object.clone());
    }

    let json = serde_json::to_string_pretty(&objects)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} objects to {}", objects.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub fn scan(loader: &Loader, limit: Option<usize>) -> Result<()> {
    let mut names: Vec<String> = loader
        .files()
        .files()
        .iter()
        .filter(|f| f.is_package)
        .map(|f| package_name(Path::new(&f.path)))
        .collect();
    names.sort_by_key(|n| n.to_ascii_lowercase());
    names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

    if names.is_empty() {
        bail!("no packages found; pass game directories with --dir");
    }

    let limit = limit.unwrap_or(usize::MAX);
    let loaded = loader.load_packages(&names, |done, total, name| {
        if done >= limit {
            return false;
        }
        tracing::info!("[{}/{}] {}", done + 1, total, name);
        true
    });
    loader.close_readers();

    println!("Scanned {} of {} packages", loaded.len(), names.len());
    Ok(())
}

pub fn games(loader: &Loader) {
    for game in loader.games().games() {
        let tag = game.tag.unwrap_or("-");
        println!("{:<12} {:<8} {}", tag, format!("{:?}", game.engine()), game.name);
    }
}

pub fn report(summary: &RunSummary) {
    if summary.is_clean() && summary.unknown_classes.is_empty() {
        tracing::debug!("{}", summary);
        return;
    }
    eprintln!("{}", summary);
}
