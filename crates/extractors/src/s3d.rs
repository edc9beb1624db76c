// S3D - legacy zone assembly from `<zone>.s3d` and `<zone>_obj.s3d`

use std::path::Path;

use crate::error::{Result, ZoneError};
use crate::pfs::Archive;
use crate::wld::WldFile;

const OBJECTS_WLD: &str = "objects.wld";
const LIGHTS_WLD: &str = "lights.wld";

const NAME_SUFFIXES: [&str; 3] = ["_ACTORDEF", "_DMSPRITEDEF", "_HS_DEF"];

/// Streams that make up one legacy zone
#[derive(Clone, Debug, Default)]
pub struct S3dZone {
    /// Terrain and static zone geometry
    pub zone: WldFile,
    /// Placeables (0x15)
    pub objects: Option<WldFile>,
    /// Light instances (0x28)
    pub lights: Option<WldFile>,
    /// Object meshes, skeletons and actor definitions
    pub object_models: Option<WldFile>,
}

/// `name` without its actor/mesh/skeleton definition suffix
pub fn base_name(name: &str) -> &str {
    for suffix in NAME_SUFFIXES {
        if name.len() > suffix.len() && name.is_char_boundary(name.len() - suffix.len()) {
            let (head, tail) = name.split_at(name.len() - suffix.len());
            if tail.eq_ignore_ascii_case(suffix) {
                return head;
            }
        }
    }
    name
}

fn parse_entry(archive: &Archive, entry: &str) -> Result<WldFile> {
    let data = archive.get(entry)?;
    WldFile::parse(&data)
}

/// Optional stream: absent or broken streams are logged and skipped
fn parse_optional(archive: &Archive, entry: &str) -> Option<WldFile> {
    if !archive.exists(entry) {
        return None;
    }
    match parse_entry(archive, entry) {
        Ok(wld) => Some(wld),
        Err(e) => {
            tracing::warn!("{} skipped: {}", entry, e);
            None
        }
    }
}

/// Zone stream `<zone>.wld` from `<dir>/<zone>.s3d`
pub fn load_zone_wld(dir: &Path, zone: &str) -> Result<(Archive, WldFile)> {
    let archive = Archive::open(dir.join(format!("{zone}.s3d")))?;
    let wld_name = format!("{zone}.wld");
    if !archive.exists(&wld_name) {
        return Err(ZoneError::not_found(format!("{zone}.s3d: {wld_name}")));
    }
    let wld = parse_entry(&archive, &wld_name)?;
    Ok((archive, wld))
}

pub fn load(dir: &Path, zone: &str) -> Result<S3dZone> {
    let (archive, wld) = load_zone_wld(dir, zone)?;

    let mut result = S3dZone {
        zone: wld,
        objects: parse_optional(&archive, OBJECTS_WLD),
        lights: parse_optional(&archive, LIGHTS_WLD),
        object_models: None,
    };

    let obj_path = dir.join(format!("{zone}_obj.s3d"));
    match Archive::open(&obj_path) {
        Ok(obj_archive) => {
            result.object_models = parse_optional(&obj_archive, &format!("{zone}_obj.wld"));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => tracing::warn!("{} skipped: {}", obj_path.display(), e),
    }

    tracing::info!(
        "Loaded S3D zone {}: {} zone fragments, objects: {}, lights: {}, object models: {}",
        zone,
        result.zone.len(),
        result.objects.is_some(),
        result.lights.is_some(),
        result.object_models.is_some()
    );
    Ok(result)
}
