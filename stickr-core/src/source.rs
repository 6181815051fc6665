//! Bootable image files offered as install media.
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// The image formats a source can be registered as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Iso,
    Img,
}

impl SourceKind {
    /// Maps a file extension (case-insensitive, without the dot) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "iso" => Some(SourceKind::Iso),
            "img" => Some(SourceKind::Img),
            _ => None,
        }
    }
}

/// A registered image file. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    /// Absolute path of the image, also its registry key.
    pub path: PathBuf,
    pub size: u64,
    /// Volume label for ISO images, empty for raw images.
    pub label: String,
    pub kind: SourceKind,
}

/// Why a candidate file was not admitted as a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    NotAFile,
    NoExtension,
    UnknownExtension(String),
    /// An ISO without a boot record or volume label.
    NotBootable,
}

/// The result of offering a file to [`crate::registry::Registry::add_source`].
///
/// Neither a duplicate nor an unsupported file is an error: callers commonly
/// feed many candidates and expect non-matches to be skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added(PathBuf),
    AlreadyPresent(PathBuf),
    Rejected(Rejection),
}

impl AddOutcome {
    pub fn is_added(&self) -> bool {
        matches!(self, AddOutcome::Added(_))
    }
}

const SECTOR_SIZE: u64 = 2048;
const FIRST_DESCRIPTOR_SECTOR: u64 = 16;
// Real images carry a handful of descriptors; stop scanning garbage early.
const MAX_DESCRIPTORS: u64 = 32;

const DESCRIPTOR_BOOT_RECORD: u8 = 0;
const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_TERMINATOR: u8 = 255;
const STANDARD_ID: &[u8] = b"CD001";
const EL_TORITO_ID: &[u8] = b"EL TORITO SPECIFICATION";

/// Reads the volume label of a bootable ISO 9660 image.
///
/// Walks the volume descriptor set looking for an El Torito boot record and
/// the primary volume descriptor. Returns `Ok(None)` when the file is not an
/// ISO image, is not bootable, or has a blank label.
pub fn read_iso_label(path: &Path) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let mut sector = [0u8; SECTOR_SIZE as usize];
    let mut bootable = false;
    let mut label = None;

    for index in 0..MAX_DESCRIPTORS {
        file.seek(SeekFrom::Start((FIRST_DESCRIPTOR_SECTOR + index) * SECTOR_SIZE))?;
        match file.read_exact(&mut sector) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        if &sector[1..6] != STANDARD_ID {
            return Ok(None);
        }

        match sector[0] {
            DESCRIPTOR_BOOT_RECORD => {
                if sector[7..7 + EL_TORITO_ID.len()] == *EL_TORITO_ID {
                    bootable = true;
                }
            }
            DESCRIPTOR_PRIMARY => {
                let volume_id = String::from_utf8_lossy(&sector[40..72]);
                let volume_id = volume_id.trim_matches(|c: char| c == ' ' || c == '\0');
                if !volume_id.is_empty() {
                    label = Some(volume_id.to_string());
                }
            }
            DESCRIPTOR_TERMINATOR => break,
            _ => {}
        }
    }

    Ok(if bootable { label } else { None })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn descriptor(kind: u8) -> Vec<u8> {
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        sector[0] = kind;
        sector[1..6].copy_from_slice(STANDARD_ID);
        sector[6] = 1;
        sector
    }

    /// Builds a minimal ISO 9660 descriptor set, optionally with a boot record.
    pub(crate) fn fake_iso(label: &str, bootable: bool) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".iso").tempfile().unwrap();
        file.write_all(&vec![0u8; (FIRST_DESCRIPTOR_SECTOR * SECTOR_SIZE) as usize])
            .unwrap();

        let mut primary = descriptor(DESCRIPTOR_PRIMARY);
        let mut volume_id = [b' '; 32];
        volume_id[..label.len()].copy_from_slice(label.as_bytes());
        primary[40..72].copy_from_slice(&volume_id);
        file.write_all(&primary).unwrap();

        if bootable {
            let mut boot = descriptor(DESCRIPTOR_BOOT_RECORD);
            boot[7..7 + EL_TORITO_ID.len()].copy_from_slice(EL_TORITO_ID);
            file.write_all(&boot).unwrap();
        }

        file.write_all(&descriptor(DESCRIPTOR_TERMINATOR)).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn extensions_are_case_insensitive() {
        assert_eq!(SourceKind::from_extension("ISO"), Some(SourceKind::Iso));
        assert_eq!(SourceKind::from_extension("img"), Some(SourceKind::Img));
        assert_eq!(SourceKind::from_extension("zip"), None);
    }

    #[test]
    fn bootable_iso_yields_its_label() {
        let iso = fake_iso("Ubuntu 24.04 LTS amd64", true);
        let label = read_iso_label(iso.path()).unwrap();
        assert_eq!(label.as_deref(), Some("Ubuntu 24.04 LTS amd64"));
    }

    #[test]
    fn iso_without_boot_record_is_rejected() {
        let iso = fake_iso("DATA_DISC", false);
        assert_eq!(read_iso_label(iso.path()).unwrap(), None);
    }

    #[test]
    fn blank_label_is_rejected() {
        let iso = fake_iso("", true);
        assert_eq!(read_iso_label(iso.path()).unwrap(), None);
    }

    #[test]
    fn short_or_foreign_files_are_not_isos() {
        let mut small = NamedTempFile::new().unwrap();
        small.write_all(b"hello").unwrap();
        assert_eq!(read_iso_label(small.path()).unwrap(), None);

        let mut foreign = NamedTempFile::new().unwrap();
        foreign.write_all(&vec![0xAA; 64 * 1024]).unwrap();
        assert_eq!(read_iso_label(foreign.path()).unwrap(), None);
    }
}
