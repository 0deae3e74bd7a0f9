//! The candidate universe an engine resolves selectors against: packages,
//! (nestable) classes and methods, each with the attributes discovery and
//! execution need.

pub mod load;
pub mod script;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::lock::LockRequirement;
use crate::plan::types::ExecutionMode;
use crate::runner::behavior::SharedBehavior;

pub use load::{load_catalog, parse_catalog};

/// Separates nested class names in a fully qualified class name.
pub const NESTED_SEPARATOR: char = '$';
/// Separates class and method in a fully qualified method name.
pub const METHOD_SEPARATOR: char = '#';

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate {what} \"{name}\" in {scope}")]
    Duplicate {
        what: &'static str,
        name: String,
        scope: String,
    },
    #[error("invalid {what} name \"{name}\": must not contain '{forbidden}'")]
    InvalidName {
        what: &'static str,
        name: String,
        forbidden: char,
    },
}

/// All candidates of one engine.
#[derive(Clone)]
pub struct Catalog {
    pub engine_id: String,
    pub display_name: Option<String>,
    pub packages: Vec<PackageEntry>,
}

#[derive(Clone)]
pub struct PackageEntry {
    pub name: String,
    /// Source location, matched by path selectors.
    pub path: Option<PathBuf>,
    pub classes: Vec<ClassEntry>,
}

#[derive(Clone)]
pub struct ClassEntry {
    pub name: String,
    pub display_name: Option<String>,
    pub tags: Vec<String>,
    pub locks: LockRequirement,
    pub execution_mode: ExecutionMode,
    pub parallel_children: bool,
    pub disabled: Option<String>,
    pub behavior: Option<SharedBehavior>,
    pub classes: Vec<ClassEntry>,
    pub methods: Vec<MethodEntry>,
}

#[derive(Clone)]
pub struct MethodEntry {
    pub name: String,
    pub display_name: Option<String>,
    pub tags: Vec<String>,
    pub locks: LockRequirement,
    pub execution_mode: ExecutionMode,
    pub disabled: Option<String>,
    /// A factory is a test that also contains the dynamic nodes it registers.
    pub factory: bool,
    pub behavior: Option<SharedBehavior>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("engine_id", &self.engine_id)
            .field("display_name", &self.display_name)
            .field("packages", &self.packages)
            .finish()
    }
}

impl fmt::Debug for PackageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageEntry")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("classes", &self.classes)
            .finish()
    }
}

// Behaviors are opaque closures and stay out of the output.
impl fmt::Debug for ClassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassEntry")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("locks", &self.locks)
            .field("execution_mode", &self.execution_mode)
            .field("disabled", &self.disabled)
            .field("classes", &self.classes)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("locks", &self.locks)
            .field("disabled", &self.disabled)
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

/// A class found by its fully qualified name, with its enclosing classes.
pub struct ClassPath<'c> {
    pub package: &'c PackageEntry,
    /// Outermost first; the last entry is the located class.
    pub chain: Vec<&'c ClassEntry>,
}

impl<'c> ClassPath<'c> {
    pub fn class(&self) -> &'c ClassEntry {
        self.chain[self.chain.len() - 1]
    }
}

impl Catalog {
    pub fn new(engine_id: impl Into<String>) -> Self {
        Self {
            engine_id: engine_id.into(),
            display_name: None,
            packages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_package(mut self, package: PackageEntry) -> Self {
        self.packages.push(package);
        self
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.engine_id)
    }

    pub fn package(&self, name: &str) -> Option<&PackageEntry> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Packages whose declared path lies under `path`.
    pub fn packages_under(&self, path: &Path) -> Vec<&PackageEntry> {
        self.packages
            .iter()
            .filter(|p| p.path.as_deref().is_some_and(|pp| pp.starts_with(path)))
            .collect()
    }

    /// Find `pkg.Outer$Inner`.
    pub fn locate_class(&self, fq_name: &str) -> Option<ClassPath<'_>> {
        let (package_name, class_names) = split_class_name(fq_name);
        let package = self.package(package_name)?;
        let mut chain: Vec<&ClassEntry> = Vec::new();
        for name in class_names {
            let candidates = match chain.last() {
                Some(outer) => &outer.classes,
                None => &package.classes,
            };
            chain.push(candidates.iter().find(|c| c.name == name)?);
        }
        if chain.is_empty() {
            return None;
        }
        Some(ClassPath { package, chain })
    }

    /// Reject duplicate and malformed names.
    ///
    /// # Errors
    ///
    /// Returns the first [`CatalogError`] found.
    pub fn validate(&self) -> Result<(), CatalogError> {
        check_unique("package", self.packages.iter().map(|p| p.name.as_str()), &self.engine_id)?;
        for package in &self.packages {
            check_name("package", &package.name, &[NESTED_SEPARATOR, METHOD_SEPARATOR])?;
            validate_classes(&package.classes, &package.name)?;
        }
        Ok(())
    }
}

fn validate_classes(classes: &[ClassEntry], scope: &str) -> Result<(), CatalogError> {
    check_unique("class", classes.iter().map(|c| c.name.as_str()), scope)?;
    for class in classes {
        check_name("class", &class.name, &['.', NESTED_SEPARATOR, METHOD_SEPARATOR])?;
        let fq = format!("{scope}.{}", class.name);
        check_unique("method", class.methods.iter().map(|m| m.name.as_str()), &fq)?;
        for method in &class.methods {
            check_name("method", &method.name, &[METHOD_SEPARATOR])?;
        }
        validate_classes(&class.classes, &fq)?;
    }
    Ok(())
}

fn check_unique<'a>(
    what: &'static str,
    names: impl Iterator<Item = &'a str>,
    scope: &str,
) -> Result<(), CatalogError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(CatalogError::Duplicate {
                what,
                name: name.to_owned(),
                scope: scope.to_owned(),
            });
        }
    }
    Ok(())
}

fn check_name(what: &'static str, name: &str, forbidden: &[char]) -> Result<(), CatalogError> {
    match forbidden.iter().find(|c| name.contains(**c)) {
        Some(&forbidden) => Err(CatalogError::InvalidName {
            what,
            name: name.to_owned(),
            forbidden,
        }),
        None => Ok(()),
    }
}

/// Split `pkg.Outer$Inner` into `("pkg", ["Outer", "Inner"])`. A name
/// without a dot lives in the unnamed package `""`.
pub fn split_class_name(fq_name: &str) -> (&str, Vec<&str>) {
    let (package, classes) = fq_name.rsplit_once('.').unwrap_or(("", fq_name));
    let classes = if classes.is_empty() {
        Vec::new()
    } else {
        classes.split(NESTED_SEPARATOR).collect()
    };
    (package, classes)
}

/// Join a package and a class chain into `pkg.Outer$Inner`.
pub fn class_name(package: &str, chain: &[&str]) -> String {
    let classes = chain.join(&NESTED_SEPARATOR.to_string());
    if package.is_empty() {
        classes
    } else {
        format!("{package}.{classes}")
    }
}

impl PackageEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            classes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_class(mut self, class: ClassEntry) -> Self {
        self.classes.push(class);
        self
    }
}

impl ClassEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            tags: Vec::new(),
            locks: LockRequirement::new(),
            execution_mode: ExecutionMode::default(),
            parallel_children: false,
            disabled: None,
            behavior: None,
            classes: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_locks(mut self, locks: LockRequirement) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Allow this class's children to run concurrently.
    #[must_use]
    pub fn parallel_children(mut self) -> Self {
        self.parallel_children = true;
        self
    }

    #[must_use]
    pub fn disabled(mut self, reason: impl Into<String>) -> Self {
        self.disabled = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_behavior(mut self, behavior: SharedBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    #[must_use]
    pub fn with_class(mut self, class: ClassEntry) -> Self {
        self.classes.push(class);
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: MethodEntry) -> Self {
        self.methods.push(method);
        self
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.iter().find(|m| m.name == name)
    }
}

impl MethodEntry {
    pub fn test(name: impl Into<String>, behavior: SharedBehavior) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            tags: Vec::new(),
            locks: LockRequirement::new(),
            execution_mode: ExecutionMode::default(),
            disabled: None,
            factory: false,
            behavior: Some(behavior),
        }
    }

    /// A test factory; `behavior` registers the dynamic nodes.
    pub fn factory(name: impl Into<String>, behavior: SharedBehavior) -> Self {
        Self {
            factory: true,
            ..Self::test(name, behavior)
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_locks(mut self, locks: LockRequirement) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    #[must_use]
    pub fn disabled(mut self, reason: impl Into<String>) -> Self {
        self.disabled = Some(reason.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}
