use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Read a source file, replacing invalid UTF-8 sequences with the replacement character.
///
/// Package sources occasionally ship with stray Latin-1 bytes in comments;
/// those must not make a whole package unservable.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_source(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write a build artifact, creating parent directories as needed.
///
/// The bytes go to a uniquely named sibling temp file first and are renamed
/// into place, so a concurrent reader sees either the previous artifact or
/// the new one, and concurrent writers never share a temp file.
///
/// # Errors
/// Returns an error if the directory, the temp file, or the rename fails.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Turn a package name into a single path segment (`@scope/pkg` → `scope__pkg`).
#[must_use]
pub fn sanitize_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim_start_matches('@').chars() {
        match c {
            '/' | '\\' => out.push_str("__"),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+') => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}
