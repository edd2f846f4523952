//! The pack archive container.
//!
//! An archive is a bincode-2 (`standard()` config) encoding of
//!
//! ```text
//! { magic: "RPAK", version: 1, entries: [{ path, bytes }, ...] }
//! ```
//!
//! with the JSON manifest at [`MANIFEST_PATH`] followed by one entry per
//! image. Entry order is fixed by the builder, so equal inputs produce
//! byte-identical archives.

use serde::{Deserialize, Serialize};

use super::PackError;

pub const ARCHIVE_MAGIC: [u8; 4] = *b"RPAK";
pub const ARCHIVE_VERSION: u32 = 1;
pub const MANIFEST_PATH: &str = "pack.json";

/// One named file inside an archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Container {
    magic: [u8; 4],
    version: u32,
    entries: Vec<ArchiveEntry>,
}

/// An in-memory pack archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackArchive {
    entries: Vec<ArchiveEntry>,
}

impl PackArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a file. Paths must be unique.
    pub fn push(&mut self, path: impl Into<String>, bytes: Vec<u8>) -> Result<(), PackError> {
        let path = path.into();
        if self.get(&path).is_some() {
            return Err(PackError::Encode(format!("duplicate archive path {path}")));
        }
        self.entries.push(ArchiveEntry { path, bytes });
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.bytes.as_slice())
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Raw `pack.json` bytes, if present.
    pub fn manifest_bytes(&self) -> Option<&[u8]> {
        self.get(MANIFEST_PATH)
    }

    pub fn encode(&self) -> Result<Vec<u8>, PackError> {
        let container = Container {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            entries: self.entries.clone(),
        };
        bincode::serde::encode_to_vec(&container, bincode::config::standard())
            .map_err(|e| PackError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PackError> {
        let (container, read): (Container, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| PackError::MalformedArchive(e.to_string()))?;

        if container.magic != ARCHIVE_MAGIC {
            return Err(PackError::MalformedArchive("bad magic".to_string()));
        }
        if container.version != ARCHIVE_VERSION {
            return Err(PackError::MalformedArchive(format!(
                "unsupported archive version {}",
                container.version
            )));
        }
        if read != bytes.len() {
            return Err(PackError::MalformedArchive(format!(
                "{} trailing bytes",
                bytes.len() - read
            )));
        }

        let mut archive = PackArchive::new();
        for entry in container.entries {
            archive
                .push(entry.path, entry.bytes)
                .map_err(|e| PackError::MalformedArchive(e.to_string()))?;
        }
        Ok(archive)
    }
}

/// File extension used for an image of the given MIME type.
pub fn image_extension(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Archive path of a report's image.
pub fn image_path(report_id: &str, mime: &str) -> String {
    format!("images/{report_id}.{}", image_extension(mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_entries_and_order() {
        let mut archive = PackArchive::new();
        archive.push(MANIFEST_PATH, b"{}".to_vec()).unwrap();
        archive.push("images/a.jpg", vec![1, 2, 3]).unwrap();
        archive.push("images/b.png", vec![]).unwrap();

        let bytes = archive.encode().unwrap();
        let decoded = PackArchive::decode(&bytes).unwrap();
        assert_eq!(decoded, archive);
        assert_eq!(decoded.entries()[0].path, MANIFEST_PATH);
        assert_eq!(decoded.get("images/a.jpg"), Some(&[1u8, 2, 3][..]));
        assert_eq!(decoded.manifest_bytes(), Some(&b"{}"[..]));
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut archive = PackArchive::new();
        archive.push(MANIFEST_PATH, b"{\"a\":1}".to_vec()).unwrap();
        archive.push("images/x.jpg", vec![9; 64]).unwrap();
        assert_eq!(archive.encode().unwrap(), archive.encode().unwrap());
    }

    #[test]
    fn duplicate_paths_are_refused() {
        let mut archive = PackArchive::new();
        archive.push("images/a.jpg", vec![1]).unwrap();
        assert!(archive.push("images/a.jpg", vec![2]).is_err());
    }

    #[test]
    fn garbage_and_truncated_input_is_malformed() {
        assert!(matches!(
            PackArchive::decode(b"definitely not an archive"),
            Err(PackError::MalformedArchive(_))
        ));

        let mut archive = PackArchive::new();
        archive.push(MANIFEST_PATH, vec![7; 32]).unwrap();
        let bytes = archive.encode().unwrap();
        assert!(matches!(
            PackArchive::decode(&bytes[..bytes.len() - 4]),
            Err(PackError::MalformedArchive(_))
        ));

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            PackArchive::decode(&extended),
            Err(PackError::MalformedArchive(_))
        ));
    }

    #[test]
    fn image_paths_follow_mime_type() {
        assert_eq!(image_path("pot-1", "image/jpeg"), "images/pot-1.jpg");
        assert_eq!(image_path("pot-1", "image/png"), "images/pot-1.png");
        assert_eq!(image_path("pot-1", "image/webp"), "images/pot-1.webp");
        assert_eq!(image_path("pot-1", "application/octet-stream"), "images/pot-1.bin");
    }
}
