use std::path::{Component, Path, PathBuf};

use crate::error::PkgError;

/// Join an in-package name onto `root`, refusing names that would land
/// outside it (absolute paths, drive prefixes, `..`).
pub fn safe_join(root: &Path, name: &str) -> Result<PathBuf, PkgError> {
    let rel = Path::new(name);
    let mut out = root.to_path_buf();
    let mut depth = 0usize;

    for comp in rel.components() {
        match comp {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PkgError::UnsafePath(name.to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(PkgError::UnsafePath(name.to_string()));
    }
    Ok(out)
}

/// In-package name for `file_path` below `input_root`, `/`-separated.
pub fn normalize_rel_path(input_root: &Path, file_path: &Path) -> Option<String> {
    let rel = file_path.strip_prefix(input_root).ok()?;

    let mut out = String::new();
    for comp in rel.components() {
        if let Component::Normal(part) = comp {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.to_string_lossy());
        }
    }

    if out.is_empty() { None } else { Some(out) }
}

/// Last `/`-separated component of an in-package name.
pub fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_nested_names() {
        let root = Path::new("out");
        assert_eq!(
            safe_join(root, "USRDIR/data/a.bin").unwrap(),
            root.join("USRDIR").join("data").join("a.bin")
        );
        assert_eq!(safe_join(root, "./a.txt").unwrap(), root.join("a.txt"));
    }

    #[test]
    fn rejects_escaping_names() {
        let root = Path::new("out");
        for bad in ["../evil", "USRDIR/../../evil", "/etc/passwd", "", "."] {
            assert!(
                matches!(safe_join(root, bad), Err(PkgError::UnsafePath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn relative_names_use_forward_slashes() {
        let root = Path::new("pkgroot");
        let file = root.join("USRDIR").join("EBOOT.BIN");
        assert_eq!(
            normalize_rel_path(root, &file).as_deref(),
            Some("USRDIR/EBOOT.BIN")
        );
        assert_eq!(normalize_rel_path(root, root), None);
        assert_eq!(normalize_rel_path(root, Path::new("elsewhere/x")), None);
    }

    #[test]
    fn base_name_of_nested_entry() {
        assert_eq!(base_name("USRDIR/EBOOT.BIN"), "EBOOT.BIN");
        assert_eq!(base_name("PARAM.SFO"), "PARAM.SFO");
    }
}
