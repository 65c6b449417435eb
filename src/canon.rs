//! Path canonicalization.
//!
//! Every file the registry knows about is keyed by a lexically normalized
//! path relative to the build root, so that "foo/./bar.c" and "foo//bar.c"
//! name the same file.

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar" and "foo/../bar" => "bar".
/// Leading ".." components that cannot be resolved are kept.
pub fn canon_path<T: AsRef<str>>(inpath: T) -> String {
    let path = inpath.as_ref();
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // "/.." is still "/".
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(component),
        }
    }

    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

/// Canonicalize a path that must stay within the build root.
/// Returns None for absolute paths and paths that climb out of the root.
pub fn canon_rel_path<T: AsRef<str>>(inpath: T) -> Option<String> {
    let path = canon_path(inpath);
    if path.is_empty() || path.starts_with('/') || path == ".." || path.starts_with("../") {
        return None;
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop() {
        assert_eq!(canon_path("foo"), "foo");
        assert_eq!(canon_path("foo/bar.c"), "foo/bar.c");
    }

    #[test]
    fn dot() {
        assert_eq!(canon_path("./foo"), "foo");
        assert_eq!(canon_path("foo/."), "foo");
        assert_eq!(canon_path("foo/./bar"), "foo/bar");
    }

    #[test]
    fn slash() {
        assert_eq!(canon_path("/foo"), "/foo");
        assert_eq!(canon_path("foo//bar"), "foo/bar");
        assert_eq!(canon_path("foo/bar/"), "foo/bar");
    }

    #[test]
    fn parent() {
        assert_eq!(canon_path("foo/../bar"), "bar");
        assert_eq!(canon_path("/foo/../bar"), "/bar");
        assert_eq!(canon_path("/../bar"), "/bar");
        assert_eq!(canon_path("../foo"), "../foo");
        assert_eq!(canon_path("../foo/../bar"), "../bar");
        assert_eq!(canon_path("../../bar"), "../../bar");
    }

    #[test]
    fn relative_to_root() {
        assert_eq!(canon_rel_path("./src/a.c").as_deref(), Some("src/a.c"));
        assert_eq!(canon_rel_path("src/../a.c").as_deref(), Some("a.c"));
        assert_eq!(canon_rel_path("../a.c"), None);
        assert_eq!(canon_rel_path("/usr/include/stdio.h"), None);
        assert_eq!(canon_rel_path("."), None);
    }
}
