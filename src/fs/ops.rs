use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use util::PathEncodingError;

use super::Error;

/// Copy `src` to `tgt`, recursively if needed, following symlinks so the copy
/// never refers back to the source.
pub fn copy(src: &Path, tgt: &Path) -> Result<()> {
    if src.is_file() {
        fs::copy(src, tgt)?;
    } else if src.is_dir() {
        cp_dir(src, tgt)?;
    } else {
        return Err(
            Error::UnknownPathType(src.to_str().ok_or(PathEncodingError)?.to_owned()).into(),
        );
    }
    Ok(())
}

fn cp_dir(src: &Path, tgt: &Path) -> Result<()> {
    fs::create_dir_all(tgt)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        copy(&entry.path(), &tgt.join(entry.file_name()))?;
    }
    Ok(())
}

/// Symlink the given `link` to `tgt`; works for unix and windows.
pub fn symlink(tgt: &Path, link: &Path) -> Result<()> {
    #[cfg(unix)]
    std::os::unix::fs::symlink(tgt, link)?;

    #[cfg(windows)]
    if tgt.is_dir() {
        std::os::windows::fs::link_dir(tgt, link)?;
    } else {
        std::os::windows::fs::link_file(tgt, link)?;
    }
    Ok(())
}

/// Every entry below `root`, as paths relative to `root`, depth first and
/// sorted by name. Symlinks are listed but not followed, and hidden
/// directories are not descended into.
pub fn list_entries(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = Vec::with_capacity(32);
    walk(root, Path::new(""), &mut entries)?;
    Ok(entries)
}

fn walk(root: &Path, rel: &Path, entries: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut children: Vec<_> = fs::read_dir(root.join(rel))?.collect::<Result<_, _>>()?;
    children.sort_by_key(|entry| entry.file_name());
    for entry in children {
        let name = entry.file_name();
        let child = rel.join(&name);
        let descend = entry.file_type()?.is_dir() && !name.to_string_lossy().starts_with('.');
        entries.push(child.clone());
        if descend {
            walk(root, &child, entries)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_copy_follows_symlinks() -> Result<()> {
        let dir = tempdir()?;
        let real = dir.path().join("real.txt");
        fs::write(&real, "text to copy")?;
        let link = dir.path().join("link.txt");
        symlink(&real, &link)?;

        let tgt = dir.path().join("tgt.txt");
        copy(&link, &tgt)?;

        assert!(!tgt.is_symlink());
        assert_eq!(fs::read_to_string(&tgt)?, "text to copy");
        Ok(())
    }

    #[test]
    fn test_copy_dir() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("subdir"))?;
        fs::write(src.join("subdir/file"), "nested")?;

        let tgt = dir.path().join("tgt");
        copy(&src, &tgt)?;

        assert!(tgt.join("subdir").is_dir());
        assert_eq!(fs::read_to_string(tgt.join("subdir/file"))?, "nested");
        Ok(())
    }

    #[test]
    fn test_list_entries() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("out/deep"))?;
        fs::create_dir_all(root.join(".hidden"))?;
        fs::write(root.join("b.txt"), "")?;
        fs::write(root.join("a.txt"), "")?;
        fs::write(root.join("out/deep/c.txt"), "")?;
        fs::write(root.join(".hidden/x"), "")?;
        fs::write(root.join(".exitcode"), "0")?;

        let entries = list_entries(root)?;
        let expected: Vec<PathBuf> = [
            ".exitcode",
            ".hidden",
            "a.txt",
            "b.txt",
            "out",
            "out/deep",
            "out/deep/c.txt",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(entries, expected);
        Ok(())
    }
}
