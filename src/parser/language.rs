//! C++ file detection and tree-sitter grammar loading.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tree_sitter::Language;

/// The two kinds of C++ file a version is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// An implementation file (`.cpp`, `.cc`, `.cxx`, `.c++`).
    Source,
    /// A header (`.h`, `.hh`, `.hpp`, `.hxx`, `.inl`).
    Header,
}

impl SourceKind {
    /// Detect the kind from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "cpp" | "cc" | "cxx" | "c++" => Some(SourceKind::Source),
            "h" | "hh" | "hpp" | "hxx" | "h++" | "inl" => Some(SourceKind::Header),
            _ => None,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self, SourceKind::Header)
    }

    /// The tree-sitter grammar used for every C++ file.
    pub fn tree_sitter_language() -> Language {
        tree_sitter_cpp::LANGUAGE.into()
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Source => "source",
            SourceKind::Header => "header",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_sources_and_headers() {
        assert_eq!(SourceKind::from_path(Path::new("a/b.cpp")), Some(SourceKind::Source));
        assert_eq!(SourceKind::from_path(Path::new("b.cc")), Some(SourceKind::Source));
        assert_eq!(SourceKind::from_path(Path::new("b.hpp")), Some(SourceKind::Header));
        assert!(SourceKind::from_path(Path::new("b.h")).is_some_and(|k| k.is_header()));
        assert_eq!(SourceKind::from_path(Path::new("main.rs")), None);
        assert_eq!(SourceKind::from_path(Path::new("Makefile")), None);
    }
}
