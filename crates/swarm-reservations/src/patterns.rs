//! Path pattern normalization and overlap.
//!
//! A reservation pattern is either a literal path, which also covers
//! everything beneath it when it names a directory, or a glob (`*`, `?`,
//! `[...]`, `{...}`). Overlap is tested in both directions and errs toward
//! reporting a conflict. Two globs are compared by their literal directory
//! prefixes only, so `src/*.ts` and `src/*.md` are reported as overlapping.

use globset::{GlobBuilder, GlobMatcher};

use crate::errors::{ReservationError, Result};

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// Lexically normalize a path or pattern.
///
/// Removes `.` components, resolves `..` against earlier components, and
/// drops duplicate and trailing slashes. A leading `/` is kept. The project
/// root (`.`, `./`) normalizes to the empty string.
pub fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                let _ = components.pop();
            }
            c => components.push(c),
        }
    }
    let joined = components.join("/");
    if path.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Whether `pattern` contains glob syntax.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(GLOB_CHARS)
}

/// Reject patterns that are blank or fail to parse as globs.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(ReservationError::InvalidArgument(
            "path pattern must not be empty".into(),
        ));
    }
    if is_glob(pattern) {
        let _ = compile(&normalize_path(pattern)).map_err(|e| ReservationError::InvalidPattern {
            pattern: pattern.to_string(),
            detail: e.to_string(),
        })?;
    }
    Ok(())
}

/// Whether reservations on `a` and `b` could cover a common file.
///
/// Symmetric and reflexive. A glob that fails to compile overlaps everything.
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    match (is_glob(&a), is_glob(&b)) {
        (false, false) => contains(&a, &b) || contains(&b, &a),
        (true, false) => glob_overlaps_literal(&a, &b),
        (false, true) => glob_overlaps_literal(&b, &a),
        (true, true) => {
            let pa = literal_prefix(&a);
            let pb = literal_prefix(&b);
            contains(&pa, &pb) || contains(&pb, &pa)
        }
    }
}

fn compile(pattern: &str) -> std::result::Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

/// `parent` equals `child` or is one of its ancestor directories.
fn contains(parent: &str, child: &str) -> bool {
    parent.is_empty()
        || parent == child
        || child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/') || parent.ends_with('/'))
}

/// Leading components of `pattern` that contain no glob syntax.
fn literal_prefix(pattern: &str) -> String {
    let mut prefix = String::new();
    for component in pattern.split('/') {
        if is_glob(component) {
            break;
        }
        if !prefix.is_empty() || pattern.starts_with('/') {
            prefix.push('/');
        }
        prefix.push_str(component);
    }
    // "/a/b" splits into ["", "a", "b"]; collapse the doubled root slash.
    if let Some(stripped) = prefix.strip_prefix("//") {
        prefix = format!("/{stripped}");
    }
    prefix
}

fn glob_overlaps_literal(glob: &str, literal: &str) -> bool {
    // The literal covers the glob's whole region.
    if contains(literal, &literal_prefix(glob)) {
        return true;
    }
    let Ok(matcher) = compile(glob) else {
        return true;
    };
    // The glob names the literal itself or a directory above it.
    if ancestors_and_self(literal).any(|p| matcher.is_match(p)) {
        return true;
    }
    glob_reaches_below(glob, literal)
}

/// Whether `glob` can match a path beneath the directory `literal`.
///
/// Walks both component by component. A `**` component can match any
/// depth, so reaching one is an overlap. Running out of literal components
/// with glob components left over means the rest of the glob lands inside
/// the literal's directory.
fn glob_reaches_below(glob: &str, literal: &str) -> bool {
    let mut globs = glob.split('/');
    for part in literal.split('/') {
        let Some(segment) = globs.next() else {
            return true;
        };
        if segment == "**" {
            return true;
        }
        if !is_glob(segment) {
            if segment != part {
                return false;
            }
            continue;
        }
        match compile(segment) {
            Ok(m) if m.is_match(part) => {}
            Ok(_) => return false,
            Err(_) => return true,
        }
    }
    globs.next().is_some()
}

fn ancestors_and_self(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(|(i, _)| &path[..i])
        .filter(|p| !p.is_empty())
        .chain(std::iter::once(path))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
