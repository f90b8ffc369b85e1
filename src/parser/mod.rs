//! Parsing front end.
//!
//! Uses tree-sitter to turn C++ files into [`TranslationUnit`]s of
//! declaration events for the graph builder.

pub mod cpp;
pub mod language;

pub use cpp::{CppFrontEnd, SymbolTable};
pub use language::SourceKind;

use ignore::WalkBuilder;
use std::path::PathBuf;

/// Every C++ file under `roots`. A root may itself be a file.
///
/// Respects .gitignore. With `headers_only`, implementation files are
/// skipped. The result is sorted so unit order is reproducible.
pub fn discover_sources(roots: &[PathBuf], headers_only: bool) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        files.extend(
            WalkBuilder::new(root)
                .hidden(true)
                .git_ignore(true)
                .git_global(true)
                .git_exclude(true)
                .build()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
                .filter(|entry| {
                    SourceKind::from_path(entry.path())
                        .is_some_and(|kind| !headers_only || kind.is_header())
                })
                .map(|entry| entry.into_path()),
        );
    }
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_sources_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("inc")).unwrap();
        std::fs::write(dir.path().join("b.cpp"), "").unwrap();
        std::fs::write(dir.path().join("a.cpp"), "").unwrap();
        std::fs::write(dir.path().join("inc/a.hpp"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let all = discover_sources(&[dir.path().to_path_buf()], false);
        let names: Vec<_> = all
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.cpp"),
                PathBuf::from("b.cpp"),
                PathBuf::from("inc/a.hpp")
            ]
        );

        let headers = discover_sources(&[dir.path().to_path_buf()], true);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_file_roots_are_taken_as_is() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("one.cpp");
        std::fs::write(&file, "int x;").unwrap();
        assert_eq!(discover_sources(&[file.clone(), file.clone()], false), vec![file]);
    }
}
