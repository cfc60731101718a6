//! Execution-path name algebra.
//!
//! Path names are dot-delimited: the root is `.`, and each fan-out level
//! appends `<route>.<branch>.`. All relationships (parent, siblings,
//! children) are recomputed from names; the engine keeps no object graph.

/// The reserved separator. `EngineConfig` accepts no other value.
pub const SEPARATOR: char = '.';

/// Name of the root path.
pub const ROOT: &str = ".";

pub fn is_root(name: &str) -> bool {
    name == ROOT
}

/// Count of separators; the root has depth 1 and every fan-out level adds 2.
pub fn depth(name: &str) -> usize {
    name.chars().filter(|c| *c == SEPARATOR).count()
}

/// Parent of a path, obtained by stripping the trailing route/branch pair.
/// Returns `""` for the root.
pub fn parent(name: &str) -> &str {
    let Some(trimmed) = name.strip_suffix(SEPARATOR) else {
        return "";
    };
    let Some(branch_dot) = trimmed.rfind(SEPARATOR) else {
        return "";
    };
    match trimmed[..branch_dot].rfind(SEPARATOR) {
        Some(route_dot) => &name[..route_dot + 1],
        None => "",
    }
}

pub fn is_sibling(a: &str, b: &str) -> bool {
    a != b && depth(a) == depth(b) && parent(a) == parent(b) && !parent(a).is_empty()
}

/// Child name for `branch` of `route` fired on `parent_name`.
pub fn child_name(parent_name: &str, route: &str, branch: &str) -> String {
    format!("{parent_name}{route}{SEPARATOR}{branch}{SEPARATOR}")
}

/// The parallel-route segment that created this path (second-to-last
/// segment), or `None` for the root.
pub fn route_segment(name: &str) -> Option<&str> {
    let trimmed = name.strip_prefix(SEPARATOR)?.strip_suffix(SEPARATOR)?;
    if trimmed.is_empty() {
        return None;
    }
    let segments: Vec<&str> = trimmed.split(SEPARATOR).collect();
    if segments.len() < 2 {
        return None;
    }
    Some(segments[segments.len() - 2])
}

/// The branch segment of this path (last segment), or `None` for the root.
pub fn branch_segment(name: &str) -> Option<&str> {
    let trimmed = name.strip_prefix(SEPARATOR)?.strip_suffix(SEPARATOR)?;
    if trimmed.is_empty() {
        return None;
    }
    trimmed.rsplit(SEPARATOR).next()
}

/// True when `child` is exactly one fan-out level below `parent_name` and
/// was created by `route`.
pub fn is_child_of(child: &str, parent_name: &str, route: &str) -> bool {
    let prefix_len = parent_name.len() + route.len() + 1;
    if !child.starts_with(parent_name) {
        return false;
    }
    let Some(rest) = child.get(parent_name.len()..) else {
        return false;
    };
    if !rest.starts_with(route) || rest.as_bytes().get(route.len()) != Some(&b'.') {
        return false;
    }
    let Some(branch) = child.get(prefix_len..) else {
        return false;
    };
    // exactly one more segment: `<branch>.`
    branch.len() > 1
        && branch.ends_with(SEPARATOR)
        && !branch[..branch.len() - 1].contains(SEPARATOR)
}

/// Structural well-formedness: delimited on both ends, odd depth, no empty
/// segments.
pub fn is_well_formed(name: &str) -> bool {
    if name == ROOT {
        return true;
    }
    if !name.starts_with(SEPARATOR) || !name.ends_with(SEPARATOR) {
        return false;
    }
    let inner = &name[1..name.len() - 1];
    if inner.split(SEPARATOR).any(str::is_empty) {
        return false;
    }
    depth(name) % 2 == 1
}
