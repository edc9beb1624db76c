// Water - region classifier and `.wtr` serializer

use std::path::Path;

use zone_shared::util::{ByteBuffer, ByteReader};

use crate::compression::{read_single_block, write_single_block};
use crate::eqg;
use crate::error::{Result, ZoneError};
use crate::geometry::{Region, Vec3};
use crate::s3d;
use crate::wld::{BspNode, BspRegion, WldFile};

pub const WATER_MAGIC: &[u8; 10] = b"EQEMUWATER";
pub const WATER_VERSION_BSP: u32 = 1;
pub const WATER_VERSION_REGIONS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum RegionType {
    Normal = 0,
    Water = 1,
    Lava = 2,
    ZoneLine = 3,
    Pvp = 4,
    Slime = 5,
    Ice = 6,
    VWater = 7,
}

impl RegionType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<RegionType> {
        Some(match code {
            0 => RegionType::Normal,
            1 => RegionType::Water,
            2 => RegionType::Lava,
            3 => RegionType::ZoneLine,
            4 => RegionType::Pvp,
            5 => RegionType::Slime,
            6 => RegionType::Ice,
            7 => RegionType::VWater,
            _ => return None,
        })
    }

    /// v4 numeric area types 1..=7 share the region codes
    pub fn from_area_type(area_type: i32) -> Option<RegionType> {
        match u32::try_from(area_type) {
            Ok(code) if code > 0 => RegionType::from_code(code),
            _ => None,
        }
    }
}

/// Ordered longest-first so `DRNTP` wins over `DRP`
const LEGACY_PREFIXES: [(&str, RegionType); 7] = [
    ("DRNTP", RegionType::ZoneLine),
    ("DRP", RegionType::Pvp),
    ("WT", RegionType::Water),
    ("LA", RegionType::Lava),
    ("SL", RegionType::Slime),
    ("IC", RegionType::Ice),
    ("VW", RegionType::VWater),
];

const AREA_PREFIXES: [(&str, RegionType); 7] = [
    ("AWT", RegionType::Water),
    ("ALV", RegionType::Lava),
    ("ATP", RegionType::ZoneLine),
    ("APK", RegionType::Pvp),
    ("ASL", RegionType::Slime),
    ("AIC", RegionType::Ice),
    ("AVW", RegionType::VWater),
];

fn match_prefix(name: &str, table: &[(&str, RegionType)]) -> Option<RegionType> {
    table
        .iter()
        .find(|(prefix, _)| {
            name.len() >= prefix.len()
                && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
        })
        .map(|&(_, kind)| kind)
}

/// Type of a legacy BSP region record, matched on its name and then on its
/// info string. Unmatched records fall back to water.
pub fn classify_legacy_region(region: &BspRegion) -> RegionType {
    [region.name.as_str(), region.alternate_name.as_str()]
        .into_iter()
        .find_map(|key| match_prefix(key, &LEGACY_PREFIXES))
        .unwrap_or_else(|| {
            tracing::warn!(
                "Region {} ({}) has no known type prefix, treating as water",
                region.name,
                region.alternate_name
            );
            RegionType::Water
        })
}

/// Type of an EQG region by name prefix, then by v4 area type
pub fn classify_area(region: &Region) -> Option<RegionType> {
    match_prefix(&region.name, &AREA_PREFIXES)
        .or_else(|| RegionType::from_area_type(region.area_type))
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaterRegion {
    pub region_type: RegionType,
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    pub extents: Vec3,
}

impl WaterRegion {
    fn from_region(region: &Region, region_type: RegionType) -> Self {
        Self {
            region_type,
            position: region.position,
            rotation: region.rotation,
            scale: region.scale,
            extents: region.extents,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WaterMap {
    /// Version 1: classified BSP node dump
    Bsp(Vec<BspNode>),
    /// Version 2: flat region list
    Regions(Vec<WaterRegion>),
}

/// Classify `zone` from the archives in `dir`, trying EQG v1-3, then v4,
/// then the legacy BSP tree
pub fn classify(dir: &Path, zone: &str) -> Result<WaterMap> {
    match eqg::load_scene(dir, zone) {
        Ok((_, zon)) => {
            tracing::info!("{}: classifying {} EQG regions", zone, zon.regions.len());
            let regions = zon
                .regions
                .iter()
                .filter_map(|r| {
                    match_prefix(&r.name, &AREA_PREFIXES).map(|t| WaterRegion::from_region(r, t))
                })
                .collect();
            return Ok(WaterMap::Regions(regions));
        }
        Err(e) => tracing::debug!("{}: EQG v1-3 not usable: {}", zone, e),
    }

    match eqg::v4::load_terrain(dir, zone) {
        Ok((_, terrain)) => {
            tracing::info!("{}: classifying {} v4 regions", zone, terrain.regions.len());
            let regions = terrain
                .regions
                .iter()
                .filter_map(|r| classify_area(r).map(|t| WaterRegion::from_region(r, t)))
                .collect();
            return Ok(WaterMap::Regions(regions));
        }
        Err(e) => tracing::debug!("{}: EQG v4 not usable: {}", zone, e),
    }

    match s3d::load_zone_wld(dir, zone) {
        Ok((_, wld)) => {
            tracing::info!("{}: classifying BSP tree", zone);
            return classify_bsp(&wld).map(WaterMap::Bsp);
        }
        Err(e) => tracing::debug!("{}: S3D not usable: {}", zone, e),
    }

    Err(ZoneError::not_found(format!("no loadable zone data for {zone}")))
}

/// Tag every reachable leaf whose region belongs to a typed region record
pub fn classify_bsp(wld: &WldFile) -> Result<Vec<BspNode>> {
    let tree = wld
        .first_bsp_tree()
        .ok_or_else(|| ZoneError::not_found("zone stream has no BSP tree"))?;
    let mut nodes = tree.nodes.clone();
    if nodes.is_empty() {
        return Ok(nodes);
    }

    for region in wld.bsp_regions() {
        let kind = classify_legacy_region(region);
        let mut visited = vec![false; nodes.len()];
        let mut stack = vec![1usize];
        while let Some(index) = stack.pop() {
            let Some(slot) = index.checked_sub(1).filter(|&i| i < nodes.len()) else {
                continue;
            };
            if std::mem::replace(&mut visited[slot], true) {
                continue;
            }
            let node = &mut nodes[slot];
            if node.is_leaf() {
                if region.region_ids.contains(&node.region) {
                    node.special = kind.code() as i32;
                }
                continue;
            }
            for child in [node.right, node.left] {
                if child > 0 {
                    stack.push(child as usize);
                }
            }
        }
    }
    Ok(nodes)
}

impl WaterMap {
    pub fn version(&self) -> u32 {
        match self {
            WaterMap::Bsp(_) => WATER_VERSION_BSP,
            WaterMap::Regions(_) => WATER_VERSION_REGIONS,
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<WaterMap> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut payload = ByteBuffer::new();
        match self {
            WaterMap::Bsp(nodes) => {
                payload.write_u32(nodes.len() as u32);
                for node in nodes {
                    write_vec3(&mut payload, node.normal);
                    payload.write_f32(node.distance);
                    payload.write_i32(node.region);
                    payload.write_i32(node.special);
                    payload.write_i32(node.left);
                    payload.write_i32(node.right);
                }
            }
            WaterMap::Regions(regions) => {
                payload.write_u32(regions.len() as u32);
                for region in regions {
                    payload.write_u32(region.region_type.code());
                    write_vec3(&mut payload, region.position);
                    write_vec3(&mut payload, region.rotation);
                    write_vec3(&mut payload, region.scale);
                    write_vec3(&mut payload, region.extents);
                }
            }
        }

        let mut out = ByteBuffer::new();
        out.append(WATER_MAGIC);
        out.write_u32(self.version());
        write_single_block(&mut out, payload.contents())?;
        Ok(out.into_inner())
    }

    pub fn from_bytes(data: &[u8]) -> Result<WaterMap> {
        let mut outer = ByteReader::new(data);
        if outer.bytes(WATER_MAGIC.len())? != WATER_MAGIC {
            return Err(ZoneError::format("bad water map magic"));
        }
        let version = outer.read_u32()?;
        let payload = read_single_block(&mut outer)?;
        let mut reader = ByteReader::new(&payload);
        let count = reader.read_u32()?;

        match version {
            WATER_VERSION_BSP => {
                let mut nodes = Vec::new();
                for _ in 0..count {
                    let normal = read_vec3(&mut reader)?;
                    let distance = reader.read_f32()?;
                    let region = reader.read_i32()?;
                    let special = reader.read_i32()?;
                    let left = reader.read_i32()?;
                    let right = reader.read_i32()?;
                    nodes.push(BspNode {
                        normal,
                        distance,
                        region,
                        left,
                        right,
                        special,
                    });
                }
                Ok(WaterMap::Bsp(nodes))
            }
            WATER_VERSION_REGIONS => {
                let mut regions = Vec::new();
                for _ in 0..count {
                    let code = reader.read_u32()?;
                    let region_type = RegionType::from_code(code)
                        .ok_or_else(|| ZoneError::format(format!("bad region type {code}")))?;
                    regions.push(WaterRegion {
                        region_type,
                        position: read_vec3(&mut reader)?,
                        rotation: read_vec3(&mut reader)?,
                        scale: read_vec3(&mut reader)?,
                        extents: read_vec3(&mut reader)?,
                    });
                }
                Ok(WaterMap::Regions(regions))
            }
            other => Err(ZoneError::format(format!("unsupported water map version {other}"))),
        }
    }
}

fn write_vec3(buf: &mut ByteBuffer, v: Vec3) {
    buf.write_f32(v.x);
    buf.write_f32(v.y);
    buf.write_f32(v.z);
}

fn read_vec3(reader: &mut ByteReader<'_>) -> Result<Vec3> {
    Ok(Vec3::from_array(reader.read_f32x3()?))
}
