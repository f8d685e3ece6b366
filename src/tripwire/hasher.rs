//! PV-014: BLAKE3 hashing for artifacts and installed source trees.

use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Directory names that the running service regenerates on its own.
const VOLATILE_DIRS: [&str; 2] = ["__pycache__", ".pytest_cache"];

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash several subtrees of `base` as one unit.
///
/// Walks each subtree in sorted order, keying every regular file by its path
/// relative to `base`. Symlinks, bytecode caches and `.pyc` files are skipped.
/// Returns `None` when none of the subtrees exist.
pub fn hash_tree(base: &Path, subtrees: &[&str]) -> Result<Option<String>, String> {
    let mut entries: Vec<(String, String)> = Vec::new();
    let mut found = false;

    for sub in subtrees {
        let root = base.join(sub);
        if root.is_dir() {
            found = true;
            walk(base, &root, &mut entries)?;
        }
    }
    if !found {
        return Ok(None);
    }

    let mut hasher = blake3::Hasher::new();
    for (rel, hash) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(Some(format!("blake3:{}", hasher.finalize().to_hex())))
}

fn walk(base: &Path, current: &Path, entries: &mut Vec<(String, String)>) -> Result<(), String> {
    let read_dir = std::fs::read_dir(current)
        .map_err(|e| format!("cannot read dir {}: {}", current.display(), e))?;
    let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let ft = entry
            .file_type()
            .map_err(|e| format!("stat error: {}", e))?;
        if ft.is_symlink() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if ft.is_dir() {
            if !VOLATILE_DIRS.contains(&name.as_str()) {
                walk(base, &path, entries)?;
            }
        } else if ft.is_file() && !name.ends_with(".pyc") {
            let rel = path
                .strip_prefix(base)
                .map_err(|e| format!("path prefix error: {}", e))?
                .to_string_lossy()
                .to_string();
            entries.push((rel, hash_file(&path)?));
        }
    }
    Ok(())
}
