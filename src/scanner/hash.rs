//! Content hashes used to recognise files and folders across renames.
//!
//! Both functions block and are meant for `spawn_blocking`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Hash of a folder's visible tree (names and file contents, recursively).
/// Entries whose name starts with `.` are ignored. `None` when nothing
/// visible is inside, since every empty folder would otherwise collide.
pub fn hash_folder(path: &Path) -> io::Result<Option<String>> {
    let mut hasher = blake3::Hasher::new();
    if hash_tree(path, &mut hasher)? == 0 {
        return Ok(None);
    }
    Ok(Some(hex::encode(hasher.finalize().as_bytes())))
}

fn hash_tree(path: &Path, hasher: &mut blake3::Hasher) -> io::Result<usize> {
    let mut entries = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut visible = 0;
    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            hasher.update(b"d");
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hash_tree(&entry.path(), hasher)?;
            hasher.update(b"/");
        } else if file_type.is_file() {
            hasher.update(b"f");
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(hash_file(&entry.path())?.as_bytes());
        } else {
            continue;
        }
        visible += 1;
    }
    Ok(visible)
}
