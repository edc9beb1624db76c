// PFS - archive container (`.s3d`, `.eqg`)
// Named, chunk-compressed entries. The directory is keyed by the checksum of
// the lower-cased name; readable names come from the filename-table entry.

pub mod crc;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use zone_shared::util::{ByteBuffer, ByteReader};

use crate::compression::{chunked_extent, deflate_chunked, inflate_chunked};
use crate::error::{Result, ZoneError};

pub use crc::checksum;

const PFS_MAGIC: &[u8; 4] = b"PFS ";
const PFS_VERSION: u32 = 0x0002_0000;
/// Checksum slot reserved for the filename table
pub const FILENAME_TABLE_CRC: u32 = 0x6158_0AC9;
const FOOTER_MAGIC: &[u8; 5] = b"STEVE";

/// One stored entry; the payload stays compressed until requested
#[derive(Clone, Debug)]
struct PfsEntry {
    compressed: Vec<u8>,
    uncompressed_size: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Archive {
    entries: BTreeMap<String, PfsEntry>,
    footer: Option<u32>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ZoneError::not_found(path.display().to_string())
            } else {
                err.into()
            }
        })?;
        Self::from_bytes(&data)
            .map_err(|err| {
                tracing::debug!("Unable to open archive {}: {}", path.display(), err);
                err
            })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let dir_offset = reader.read_u32()? as usize;
        let magic = reader.bytes(4)?;
        if magic != PFS_MAGIC {
            return Err(ZoneError::format("archive magic is not PFS"));
        }
        let _version = reader.read_u32()?;

        reader.seek(dir_offset)?;
        let count = reader.read_u32()?;

        let mut by_crc: HashMap<u32, PfsEntry> = HashMap::new();
        let mut filename_table = None;
        for _ in 0..count {
            let crc = reader.read_u32()?;
            let offset = reader.read_u32()? as usize;
            let size = reader.read_u32()?;

            let Some(blocks) = data.get(offset..) else {
                tracing::warn!("Archive entry {:08X} starts past end of file", crc);
                continue;
            };
            let extent = match chunked_extent(blocks, size as usize) {
                Ok(extent) => extent,
                Err(err) => {
                    tracing::warn!("Dropping archive entry {:08X}: {}", crc, err);
                    continue;
                }
            };
            let entry = PfsEntry {
                compressed: blocks[..extent].to_vec(),
                uncompressed_size: size,
            };
            if crc == FILENAME_TABLE_CRC {
                filename_table = Some(entry);
            } else {
                by_crc.insert(crc, entry);
            }
        }

        let footer = if reader.remaining() >= 9 && reader.rest().starts_with(FOOTER_MAGIC) {
            reader.skip(FOOTER_MAGIC.len())?;
            Some(reader.read_u32()?)
        } else {
            None
        };

        let filename_table =
            filename_table.ok_or_else(|| ZoneError::format("archive has no filename table"))?;
        let table = inflate_chunked(
            &filename_table.compressed,
            filename_table.uncompressed_size as usize,
        )?;

        let mut entries = BTreeMap::new();
        let mut names = ByteReader::new(&table);
        let name_count = names.read_u32()?;
        for _ in 0..name_count {
            let len = names.read_u32()? as usize;
            let raw = names.bytes(len)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let name = String::from_utf8_lossy(&raw[..end]).to_lowercase();
            if let Some(entry) = by_crc.remove(&(checksum(&name) as u32)) {
                entries.insert(name, entry);
            }
        }

        for crc in by_crc.keys() {
            tracing::debug!("Discarding archive entry {:08X} without a filename", crc);
        }

        Ok(Self { entries, footer })
    }

    /// Decompressed content of `name`
    pub fn get(&self, name: &str) -> Result<Vec<u8>> {
        let key = name.to_lowercase();
        let entry = self
            .entries
            .get(&key)
            .ok_or_else(|| ZoneError::not_found(key.clone()))?;
        inflate_chunked(&entry.compressed, entry.uncompressed_size as usize)
            .map_err(|err| match err {
                ZoneError::Truncated(inner) => {
                    ZoneError::Compression(format!("{}: {}", key, inner))
                }
                other => other,
            })
    }

    /// Store `data` under `name`, replacing any existing entry
    pub fn set(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let entry = PfsEntry {
            compressed: deflate_chunked(data)?,
            uncompressed_size: data.len() as u32,
        };
        self.entries.insert(name.to_lowercase(), entry);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.entries.remove(&name.to_lowercase()).is_some()
    }

    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        let new = new.to_lowercase();
        if self.entries.contains_key(&new) {
            return false;
        }
        match self.entries.remove(&old.to_lowercase()) {
            Some(entry) => {
                self.entries.insert(new, entry);
                true
            }
            None => false,
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Entry names with the given extension (`"*"` for all), sorted
    pub fn list_by_extension(&self, ext: &str) -> Vec<String> {
        if ext == "*" {
            return self.entries.keys().cloned().collect();
        }
        let suffix = format!(".{}", ext.trim_start_matches('.').to_lowercase());
        self.entries
            .keys()
            .filter(|name| name.ends_with(&suffix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn footer(&self) -> Option<u32> {
        self.footer
    }

    pub fn set_footer(&mut self, footer: Option<u32>) {
        self.footer = footer;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = ByteBuffer::new();
        out.write_u32(0); // directory offset, patched below
        out.append(PFS_MAGIC);
        out.write_u32(PFS_VERSION);

        let mut directory: Vec<(u32, u32, u32)> = Vec::with_capacity(self.entries.len() + 1);
        let mut table = ByteBuffer::new();
        table.write_u32(self.entries.len() as u32);

        for (name, entry) in &self.entries {
            directory.push((
                checksum(name) as u32,
                out.size() as u32,
                entry.uncompressed_size,
            ));
            out.append(&entry.compressed);

            table.write_u32(name.len() as u32 + 1);
            table.write_string(name);
        }

        directory.push((FILENAME_TABLE_CRC, out.size() as u32, table.size() as u32));
        out.append(&deflate_chunked(table.contents())?);

        directory.sort_by_key(|(crc, _, _)| *crc);
        let dir_offset = out.size() as u32;
        out.write_u32(directory.len() as u32);
        for (crc, offset, size) in directory {
            out.write_u32(crc);
            out.write_u32(offset);
            out.write_u32(size);
        }

        if let Some(stamp) = self.footer {
            out.append(FOOTER_MAGIC);
            out.write_u32(stamp);
        }

        out.put_u32(0, dir_offset);
        Ok(out.into_inner())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Where entry `name` lands when extracted into `dir`. Names that carry a
/// path separator or are a `.`/`..` component are refused.
pub fn extract_path(dir: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', ':']) {
        return None;
    }
    Some(dir.join(name.to_lowercase()))
}
