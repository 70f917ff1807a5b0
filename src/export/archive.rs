//! Artifact writers: a reproducible tar stream, or an unpacked directory.
//!
//! Entries are written in the order given with fixed ownership, mode, and
//! mtime, so identical inputs give identical archives.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::model::CompressionLevel;
use crate::project::BundleFile;

/// File name suffix for an archive at the given level.
pub(crate) fn archive_extension(level: CompressionLevel) -> &'static str {
    match level.zstd_level() {
        Some(_) => "tar.zst",
        None => "tar",
    }
}

/// Writes `entries` as a tar archive at `path`, zstd-wrapped unless `level`
/// is `none`. Returns the size of the written file.
pub(crate) fn write_archive(
    path: &Path,
    entries: &[BundleFile],
    level: CompressionLevel,
) -> io::Result<u64> {
    let file = BufWriter::new(File::create(path)?);
    match level.zstd_level() {
        Some(zstd_level) => {
            let encoder = zstd::Encoder::new(file, zstd_level)?;
            let encoder = append_all(encoder, entries)?;
            encoder.finish()?.flush()?;
        }
        None => {
            append_all(file, entries)?.flush()?;
        }
    }
    Ok(fs::metadata(path)?.len())
}

fn append_all<W: Write>(writer: W, entries: &[BundleFile]) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.mode(tar::HeaderMode::Deterministic);
    for entry in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(entry.bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, &entry.path, entry.bytes.as_slice())?;
    }
    builder.into_inner()
}

/// Writes `entries` under `dir`. Returns the total bytes written.
pub(crate) fn write_directory(dir: &Path, entries: &[BundleFile]) -> io::Result<u64> {
    let mut total = 0;
    for entry in entries {
        let path = dir.join(&entry.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &entry.bytes)?;
        total += entry.bytes.len() as u64;
    }
    Ok(total)
}

/// Reads every entry of an archive written by [`write_archive`].
#[cfg(test)]
pub(crate) fn read_archive(path: &Path) -> io::Result<Vec<BundleFile>> {
    use std::io::Read;

    let raw = fs::read(path)?;
    let tar_bytes = if path.extension().is_some_and(|e| e == "zst") {
        zstd::decode_all(raw.as_slice())?
    } else {
        raw
    };

    let mut archive = tar::Archive::new(tar_bytes.as_slice());
    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        files.push(BundleFile { path, bytes });
    }
    Ok(files)
}
