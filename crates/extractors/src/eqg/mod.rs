// EQG - v1-3 scene loader
// `.zon` scene + `.mod` models from `<zone>.eqg`, plus `_assets.txt` sidecar archives.

pub mod model;
pub mod tokens;
pub mod v4;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use zone_shared::util::{cstring_at, ByteReader};

use crate::error::{Result, ZoneError};
use crate::geometry::{Geometry, Light, Placeable, Region, Vec3};
use crate::pfs::Archive;

pub const ZON_MAGIC: &[u8; 4] = b"EQGZ";

/// Zone whose sidecar always includes one extra archive
const POKNOWLEDGE_ZONE: &str = "poknowledge";
const POKNOWLEDGE_EXTRA_ARCHIVE: &str = "poknowledge_obj3.eqg";

#[derive(Clone, Debug, PartialEq)]
pub struct ZonObject {
    pub model_index: i32,
    pub name: String,
    pub position: Vec3,
    /// Radians as stored
    pub rotation: Vec3,
    pub scale: f32,
}

/// Parsed binary `.zon` scene (v1-3)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZonFile {
    pub version: u32,
    pub model_names: Vec<String>,
    pub objects: Vec<ZonObject>,
    pub regions: Vec<Region>,
    pub lights: Vec<Light>,
}

impl ZonFile {
    pub fn parse(data: &[u8]) -> Result<ZonFile> {
        let mut reader = ByteReader::new(data);
        if reader.bytes(4)? != ZON_MAGIC {
            return Err(ZoneError::format("bad zon magic"));
        }
        let version = reader.read_u32()?;
        let list_length = reader.read_u32()? as usize;
        let model_count = reader.read_u32()?;
        let object_count = reader.read_u32()?;
        let region_count = reader.read_u32()?;
        let light_count = reader.read_u32()?;
        let list = reader.bytes(list_length)?;

        let mut zon = ZonFile {
            version,
            ..Default::default()
        };

        for _ in 0..model_count {
            let offset = reader.read_u32()? as usize;
            zon.model_names.push(cstring_at(list, offset));
        }

        for _ in 0..object_count {
            let model_index = reader.read_i32()?;
            let name = cstring_at(list, reader.read_u32()? as usize);
            let position = Vec3::from_array(reader.read_f32x3()?);
            let rotation = Vec3::from_array(reader.read_f32x3()?);
            let scale = reader.read_f32()?;
            if version > 1 {
                let extra = reader.read_u32()? as usize;
                reader.skip(extra.saturating_mul(4))?;
            }
            zon.objects.push(ZonObject {
                model_index,
                name,
                position,
                rotation,
                scale,
            });
        }

        for _ in 0..region_count {
            let mut region = Region::new(cstring_at(list, reader.read_u32()? as usize));
            region.position = Vec3::from_array(reader.read_f32x3()?);
            let _unknown = reader.read_f32()?;
            region.flags = [reader.read_u32()?, reader.read_u32()?];
            region.extents = Vec3::from_array(reader.read_f32x3()?);
            zon.regions.push(region);
        }

        for _ in 0..light_count {
            zon.lights.push(Light {
                name: cstring_at(list, reader.read_u32()? as usize),
                position: Vec3::from_array(reader.read_f32x3()?),
                color: Vec3::from_array(reader.read_f32x3()?),
                radius: reader.read_f32()?,
            });
        }

        Ok(zon)
    }
}

/// `(` and `)` become `_`, lower-cased, `.mod` appended when there is no extension
pub fn normalize_model_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c == '(' || c == ')' { '_' } else { c })
        .collect::<String>()
        .to_lowercase();
    if !out.contains('.') {
        out.push_str(".mod");
    }
    out
}

/// Zone archive `<dir>/<zone>.eqg`; `None` when the file does not exist
pub fn open_zone_archive(dir: &Path, zone: &str) -> Result<Option<Archive>> {
    match Archive::open(dir.join(format!("{zone}.eqg"))) {
        Ok(archive) => Ok(Some(archive)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Scene bytes: the first `.zon` entry of the archive, else `<dir>/<zone>.zon`
pub fn find_scene(archive: Option<&Archive>, dir: &Path, zone: &str) -> Result<Vec<u8>> {
    if let Some(archive) = archive {
        if let Some(name) = archive.list_by_extension("zon").into_iter().next() {
            return archive.get(&name);
        }
    }
    let path = dir.join(format!("{zone}.zon"));
    match fs::read(&path) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ZoneError::not_found(format!(
            "no scene for zone {zone}"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Fully loaded v1-3 zone
#[derive(Clone, Debug, Default)]
pub struct EqgZone {
    /// Keyed by normalized model name
    pub models: BTreeMap<String, Geometry>,
    pub placeables: Vec<Placeable>,
    pub regions: Vec<Region>,
    pub lights: Vec<Light>,
}

/// Parse the v1-3 scene of `zone` and its archive
pub fn load_scene(dir: &Path, zone: &str) -> Result<(Option<Archive>, ZonFile)> {
    let archive = open_zone_archive(dir, zone)?;
    let scene = find_scene(archive.as_ref(), dir, zone)?;
    let zon = ZonFile::parse(&scene)?;
    Ok((archive, zon))
}

pub fn load(dir: &Path, zone: &str) -> Result<EqgZone> {
    let (archive, zon) = load_scene(dir, zone)?;
    tracing::info!(
        "Loading EQG zone {} (version {}): {} models, {} objects",
        zone,
        zon.version,
        zon.model_names.len(),
        zon.objects.len()
    );

    let mut result = EqgZone {
        regions: zon.regions,
        lights: zon.lights,
        ..Default::default()
    };

    let model_names: Vec<String> = zon
        .model_names
        .iter()
        .map(|n| normalize_model_name(n))
        .collect();
    for name in &model_names {
        if !result.models.contains_key(name) {
            let geometry = model::load(archive.as_ref(), name);
            result.models.insert(name.clone(), geometry);
        }
    }

    for object in &zon.objects {
        let Some(name) = usize::try_from(object.model_index)
            .ok()
            .and_then(|i| model_names.get(i))
        else {
            tracing::warn!(
                "Object '{}' references model {} of {}",
                object.name,
                object.model_index,
                model_names.len()
            );
            continue;
        };
        let r = object.rotation;
        result.placeables.push(Placeable {
            model_name: name.clone(),
            position: object.position,
            rotation: Vec3::new(r.z, r.y, r.x) * (180.0 / std::f32::consts::PI),
            scale: Vec3::splat(object.scale),
        });
    }

    let sidecar = load_sidecar_models(dir, zone);
    merge_sidecar_models(&mut result.models, sidecar);

    Ok(result)
}

/// Archive names listed by `<dir>/<zone>_assets.txt`
pub fn sidecar_archives(dir: &Path, zone: &str) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_to_string(dir.join(format!("{zone}_assets.txt"))) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    };
    if zone.eq_ignore_ascii_case(POKNOWLEDGE_ZONE)
        && !names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(POKNOWLEDGE_EXTRA_ARCHIVE))
    {
        names.push(POKNOWLEDGE_EXTRA_ARCHIVE.to_string());
    }
    names
}

/// Every `.mod` entry of every sidecar archive, in listing order
pub fn load_sidecar_models(dir: &Path, zone: &str) -> Vec<Geometry> {
    let mut models = Vec::new();
    for archive_name in sidecar_archives(dir, zone) {
        let archive = match Archive::open(dir.join(&archive_name)) {
            Ok(archive) => archive,
            Err(e) => {
                tracing::warn!("Sidecar archive {} skipped: {}", archive_name, e);
                continue;
            }
        };
        for name in archive.list_by_extension("mod") {
            models.push(model::load(Some(&archive), &name));
        }
    }
    models
}

/// Add sidecar models by filename, then fill empty models from the first
/// sidecar model whose name ends with the wanted name
pub fn merge_sidecar_models(models: &mut BTreeMap<String, Geometry>, sidecar: Vec<Geometry>) {
    for (name, geometry) in models.iter_mut() {
        if !geometry.is_empty() {
            continue;
        }
        let wanted = name.to_lowercase();
        if let Some(found) = sidecar
            .iter()
            .find(|m| !m.is_empty() && m.name.to_lowercase().ends_with(&wanted))
        {
            tracing::debug!("Model {} resolved from sidecar {}", name, found.name);
            let mut replacement = found.clone();
            replacement.name = name.clone();
            *geometry = replacement;
        }
    }
    for geometry in sidecar {
        models.entry(geometry.name.clone()).or_insert(geometry);
    }
}
