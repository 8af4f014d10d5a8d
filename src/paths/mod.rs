// Module: Paths
// Workspace path confinement. Every read and write of generated files
// goes through `sanitize`; nothing else touches the filesystem with a
// model-provided path.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::errors::{SwarmError, SwarmResult};

/// Tamanho máximo de um caminho relativo vindo do Planner.
pub const MAX_PATH_LEN: usize = 512;

static COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid path component regex"));

/// Checks that a model-provided relative path is safe to resolve.
///
/// A path is safe iff it is non-empty, at most 512 characters, not
/// absolute, free of `..`, NUL, CR and LF, and every component matches
/// `[A-Za-z0-9_.-]+` without a leading dot. Empty components (`a//b`)
/// and trailing separators are rejected.
pub fn check_relative_path(path: &str) -> SwarmResult<()> {
    if path.is_empty() {
        return Err(SwarmError::Validation("file_path: caminho vazio".into()));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(SwarmError::Validation(format!(
            "file_path '{}...': excede {} caracteres",
            &path[..32],
            MAX_PATH_LEN
        )));
    }
    if path.contains('\0') || path.contains('\r') || path.contains('\n') {
        return Err(SwarmError::Validation(
            "file_path: contém caractere de controle".into(),
        ));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(SwarmError::Validation(format!(
            "file_path '{}': caminho absoluto não é permitido",
            path
        )));
    }

    // split('/') keeps empty strings for "a//b" and trailing "/",
    // which is exactly what we want to reject.
    for component in path.split('/') {
        if component.is_empty() {
            return Err(SwarmError::Validation(format!(
                "file_path '{}': componente vazio",
                path
            )));
        }
        if component == ".." {
            return Err(SwarmError::Validation(format!(
                "file_path '{}': '..' não é permitido",
                path
            )));
        }
        if component.starts_with('.') {
            return Err(SwarmError::Validation(format!(
                "file_path '{}': componente '{}' começa com ponto",
                path, component
            )));
        }
        if !COMPONENT_RE.is_match(component) {
            return Err(SwarmError::Validation(format!(
                "file_path '{}': componente '{}' contém caractere inválido",
                path, component
            )));
        }
    }

    Ok(())
}

/// Resolves `rel` against `base` and proves the result stays inside.
///
/// `base` must exist (it is the task workspace, created at intake) and
/// is canonicalized to defeat symlinked prefixes. The resolved path must
/// have the canonical base as a strict directory prefix, or equal it.
pub fn sanitize(base: &Path, rel: &str) -> SwarmResult<PathBuf> {
    check_relative_path(rel)?;

    let canonical_base = base.canonicalize().map_err(|e| {
        SwarmError::Internal(format!(
            "workspace '{}' não pôde ser canonicalizado: {}",
            base.display(),
            e
        ))
    })?;

    let resolved = canonical_base.join(rel);

    // Defense in depth: check_relative_path already bans `..` and
    // absolute paths, so a failure here means a logic error above.
    if !resolved.starts_with(&canonical_base) {
        return Err(SwarmError::Validation(format!(
            "file_path '{}': escapa do workspace",
            rel
        )));
    }
    for component in resolved.strip_prefix(&canonical_base).unwrap_or(Path::new("")).components() {
        if matches!(component, Component::ParentDir | Component::RootDir) {
            return Err(SwarmError::Validation(format!(
                "file_path '{}': escapa do workspace",
                rel
            )));
        }
    }

    Ok(resolved)
}
