use std::fmt;
use std::path::PathBuf;

use crate::catalog::METHOD_SEPARATOR;

/// Something a user asked to discover.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiscoverySelector {
    Package(String),
    /// Fully qualified class name, `pkg.Outer$Inner`.
    Class(String),
    Method { class: String, method: String },
    /// Every package declared under this path.
    Path(PathBuf),
    /// Textual unique id; parsed during resolution.
    UniqueId(String),
}

impl DiscoverySelector {
    pub fn package(name: impl Into<String>) -> Self {
        Self::Package(name.into())
    }

    pub fn class(fq_name: impl Into<String>) -> Self {
        Self::Class(fq_name.into())
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Method {
            class: class.into(),
            method: method.into(),
        }
    }

    /// Parse `pkg.Class#method`.
    pub fn parse_method(fq_name: &str) -> Option<Self> {
        let (class, method) = fq_name.split_once(METHOD_SEPARATOR)?;
        if class.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::method(class, method))
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn unique_id(text: impl Into<String>) -> Self {
        Self::UniqueId(text.into())
    }
}

impl fmt::Display for DiscoverySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package(name) => write!(f, "package:{name}"),
            Self::Class(name) => write!(f, "class:{name}"),
            Self::Method { class, method } => write!(f, "method:{class}{METHOD_SEPARATOR}{method}"),
            Self::Path(path) => write!(f, "path:{}", path.display()),
            Self::UniqueId(text) => write!(f, "unique-id:{text}"),
        }
    }
}
