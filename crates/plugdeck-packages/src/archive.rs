//! Archive unpacking for plugin bundles and downloaded packages.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use plugdeck_core::{HostError, HostResult};
use xz2::read::XzDecoder;

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarXz,
    TarBz2,
}

impl ArchiveFormat {
    /// Detect the format from a file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect the format from leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x50, 0x4b, 0x03, 0x04, ..] => Some(Self::Zip),
            [0x1f, 0x8b, ..] => Some(Self::TarGz),
            [0xfd, b'7', b'z', b'X', b'Z', 0x00, ..] => Some(Self::TarXz),
            [b'B', b'Z', b'h', ..] => Some(Self::TarBz2),
            _ if bytes.len() > 262 && &bytes[257..262] == b"ustar" => Some(Self::Tar),
            _ => None,
        }
    }
}

/// Unpack an archive file into `dest`.
pub fn unpack_file(archive: &Path, dest: &Path) -> HostResult<()> {
    let format = ArchiveFormat::from_path(archive).ok_or_else(|| HostError::Config {
        message: format!("unsupported archive type: {}", archive.display()),
    })?;
    let file = File::open(archive).map_err(|e| HostError::io(archive, e))?;
    unpack_reader(file, format, dest).map_err(|e| with_archive_context(e, archive))
}

/// Unpack in-memory archive bytes (e.g. a downloaded tarball) into `dest`.
pub fn unpack_bytes(bytes: &[u8], dest: &Path) -> HostResult<()> {
    let format = ArchiveFormat::sniff(bytes).ok_or_else(|| HostError::Config {
        message: "unrecognized archive data".to_string(),
    })?;
    unpack_reader(Cursor::new(bytes), format, dest)
}

fn unpack_reader<R: Read + std::io::Seek>(
    reader: R,
    format: ArchiveFormat,
    dest: &Path,
) -> HostResult<()> {
    std::fs::create_dir_all(dest).map_err(|e| HostError::io(dest, e))?;

    let result = match format {
        ArchiveFormat::Zip => unpack_zip(reader, dest),
        ArchiveFormat::Tar => unpack_tar(tar::Archive::new(reader), dest),
        ArchiveFormat::TarGz => unpack_tar(tar::Archive::new(GzDecoder::new(reader)), dest),
        ArchiveFormat::TarXz => unpack_tar(tar::Archive::new(XzDecoder::new(reader)), dest),
        ArchiveFormat::TarBz2 => unpack_tar(tar::Archive::new(BzDecoder::new(reader)), dest),
    };

    result.map_err(|e| HostError::io(dest, e))
}

fn unpack_zip<R: Read + std::io::Seek>(reader: R, dest: &Path) -> io::Result<()> {
    let mut archive = zip::ZipArchive::new(reader).map_err(io::Error::other)?;
    for index in 0..archive.len() {
        let file = archive.by_index(index).map_err(io::Error::other)?;
        if file.enclosed_name().is_none() {
            return Err(escaping_entry(Path::new(file.name())));
        }
    }
    archive.extract(dest).map_err(io::Error::other)
}

fn unpack_tar<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> io::Result<()> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !is_enclosed(&path) {
            return Err(escaping_entry(&path));
        }
        entry.unpack_in(dest)?;
    }
    Ok(())
}

/// Relative, and never climbs out through `..`.
fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn escaping_entry(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("archive entry escapes destination: {}", path.display()),
    )
}

fn with_archive_context(err: HostError, archive: &Path) -> HostError {
    match err {
        HostError::Io { source, .. } => HostError::Io {
            path: archive.to_path_buf(),
            source,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ArchiveFormat::from_path(&PathBuf::from("clock-1.0.0.TGZ")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_path(&PathBuf::from("bundle.zip")),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(ArchiveFormat::from_path(&PathBuf::from("notes.txt")), None);
    }

    #[test]
    fn test_sniff_magic() {
        assert_eq!(ArchiveFormat::sniff(&[0x1f, 0x8b, 0x08]), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::sniff(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(b"plain"), None);
    }

    #[test]
    fn test_unpack_tar_gz_bytes() {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let data = br#"{"name":"left-pad","version":"1.3.0"}"#;
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "package/package.json", &data[..])
            .unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        unpack_bytes(&bytes, dir.path()).unwrap();
        assert!(dir.path().join("package").join("package.json").exists());
    }

    /// A tar whose single entry name is written into the header verbatim,
    /// bypassing the builder's own path checks.
    fn raw_tar(name: &str) -> Vec<u8> {
        let data = b"owned";
        let mut header = tar::Header::new_gnu();
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &data[..]).unwrap();
        builder.into_inner().unwrap()
    }

    fn zip_with(name: &str) -> Vec<u8> {
        use std::io::Write;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"owned").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_tar_parent_entry_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("target");

        assert!(unpack_bytes(&raw_tar("../evil.txt"), &target).is_err());
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_tar_absolute_entry_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("target");
        let outside = dir.path().join("abs.txt");

        let err = unpack_bytes(&raw_tar(outside.to_str().unwrap()), &target);
        assert!(err.is_err());
        assert!(!outside.exists());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_zip_escaping_entries_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("target");
        let outside = dir.path().join("abs.txt");

        assert!(unpack_bytes(&zip_with("../evil.txt"), &target).is_err());
        assert!(unpack_bytes(&zip_with(outside.to_str().unwrap()), &target).is_err());
        assert!(!dir.path().join("evil.txt").exists());
        assert!(!outside.exists());
    }

    #[test]
    fn test_unpack_zip_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("bundle.zip");
        std::fs::write(&archive, zip_with("clock/plugin.json")).unwrap();

        let target = dir.path().join("target");
        unpack_file(&archive, &target).unwrap();
        assert!(target.join("clock").join("plugin.json").exists());
    }
}
