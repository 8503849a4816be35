use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use super::manifest::ManifestFile;

/// Pack `files` (all inside `source_dir`) into a gzip'd tar at `archive_path`.
/// Entries are stored under their bare file names.
pub fn create_archive(source_dir: &Path, files: &[&str], archive_path: &Path) -> std::io::Result<()> {
    let out = File::create(archive_path)?;
    let encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for name in files {
        let mut file = File::open(source_dir.join(name))?;
        builder.append_file(name, &mut file)?;
    }
    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Size and SHA-256 of a finished file, as recorded in manifests.
pub fn describe_file(path: &Path) -> std::io::Result<ManifestFile> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(ManifestFile {
        name,
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[test]
    fn archive_holds_files_at_root() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["roles.sql", "schema.sql", "data.sql"] {
            std::fs::write(dir.path().join(name), format!("-- {}\n", name)).unwrap();
        }
        let archive_path = dir.path().join("backup-acme.tar.gz");
        create_archive(dir.path(), &["roles.sql", "schema.sql", "data.sql"], &archive_path).unwrap();

        let decoder = GzDecoder::new(File::open(&archive_path).unwrap());
        let mut archive = tar::Archive::new(decoder);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            assert_eq!(body, format!("-- {}\n", name));
            names.push(name);
        }
        assert_eq!(names, vec!["roles.sql", "schema.sql", "data.sql"]);
    }

    #[test]
    fn describe_reports_size_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"abc").unwrap();
        let described = describe_file(&path).unwrap();
        assert_eq!(described.name, "payload.bin");
        assert_eq!(described.size, 3);
        assert_eq!(
            described.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_archive(dir.path(), &["roles.sql"], &dir.path().join("out.tar.gz"));
        assert!(err.is_err());
    }
}
