use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::script::{DynamicSpec, ScriptSpec, ScriptedBehavior};
use crate::catalog::{Catalog, CatalogError, ClassEntry, MethodEntry, PackageEntry};
use crate::lock::{LockDecl, LockRequirement};
use crate::plan::types::ExecutionMode;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    engine: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    packages: Vec<PackageFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageFile {
    name: String,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    classes: Vec<ClassFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassFile {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    locks: Vec<LockDecl>,
    #[serde(default)]
    execution_mode: ExecutionMode,
    #[serde(default)]
    parallel_children: bool,
    #[serde(default)]
    disabled: Option<String>,
    #[serde(default)]
    script: Option<ScriptSpec>,
    #[serde(default)]
    classes: Vec<ClassFile>,
    #[serde(default)]
    methods: Vec<MethodFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodFile {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    locks: Vec<LockDecl>,
    #[serde(default)]
    execution_mode: ExecutionMode,
    #[serde(default)]
    disabled: Option<String>,
    #[serde(default)]
    script: ScriptSpec,
    #[serde(default)]
    dynamic: Option<Vec<DynamicSpec>>,
}

/// Read and validate a YAML catalog file.
///
/// # Errors
///
/// Returns [`CatalogError`] on I/O failure, malformed YAML, or invalid names.
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_catalog(&text, path)
}

/// Parse and validate YAML catalog text; `origin` only labels errors.
///
/// # Errors
///
/// Returns [`CatalogError`] on malformed YAML or invalid names.
pub fn parse_catalog(text: &str, origin: &Path) -> Result<Catalog, CatalogError> {
    let file: CatalogFile = serde_yaml::from_str(text).map_err(|source| CatalogError::Yaml {
        path: origin.to_path_buf(),
        source,
    })?;
    let catalog = Catalog {
        engine_id: file.engine,
        display_name: file.display_name,
        packages: file.packages.into_iter().map(package_entry).collect(),
    };
    catalog.validate()?;
    tracing::debug!(
        engine = %catalog.engine_id,
        packages = catalog.packages.len(),
        origin = %origin.display(),
        "catalog loaded"
    );
    Ok(catalog)
}

fn package_entry(file: PackageFile) -> PackageEntry {
    PackageEntry {
        name: file.name,
        path: file.path,
        classes: file.classes.into_iter().map(class_entry).collect(),
    }
}

fn class_entry(file: ClassFile) -> ClassEntry {
    ClassEntry {
        name: file.name,
        display_name: file.display_name,
        tags: file.tags,
        locks: LockRequirement::from_decls(&file.locks),
        execution_mode: file.execution_mode,
        parallel_children: file.parallel_children,
        disabled: file.disabled,
        behavior: file.script.map(|s| ScriptedBehavior::new(s).shared()),
        classes: file.classes.into_iter().map(class_entry).collect(),
        methods: file.methods.into_iter().map(method_entry).collect(),
    }
}

fn method_entry(file: MethodFile) -> MethodEntry {
    let factory = file.dynamic.is_some();
    let behavior = ScriptedBehavior::new(file.script)
        .with_dynamic(file.dynamic.unwrap_or_default())
        .shared();
    MethodEntry {
        name: file.name,
        display_name: file.display_name,
        tags: file.tags,
        locks: LockRequirement::from_decls(&file.locks),
        execution_mode: file.execution_mode,
        disabled: file.disabled,
        factory,
        behavior: Some(behavior),
    }
}
