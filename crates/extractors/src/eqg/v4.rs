// EQG v4 - token-stream zone options, tiled heightfield terrain,
// water sheets, invisible walls and tile object groups

use std::collections::BTreeMap;
use std::path::Path;

use zone_shared::util::ByteReader;

use super::model;
use super::tokens::{self, Record};
use crate::error::{Result, ZoneError};
use crate::geometry::{Geometry, Placeable, PlaceableGroup, Region, Vec3};
use crate::pfs::Archive;

pub const V4_MAGIC: &str = "EQTZP";

const WATER_ENTRY: &str = "water.dat";
const INVISIBLE_WALL_ENTRY: &str = "invw.dat";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZoneOptions {
    pub name: String,
    pub min_lng: i32,
    pub max_lng: i32,
    pub min_lat: i32,
    pub max_lat: i32,
    pub min_extents: Vec3,
    pub max_extents: Vec3,
    pub units_per_vertex: f32,
    pub quads_per_tile: u32,
    pub cover_map_input_size: u32,
    pub layer_map_input_size: u32,
}

impl ZoneOptions {
    /// Parse a v4 `.zon` entry; anything not starting with `EQTZP` is rejected
    pub fn parse(text: &str) -> Result<ZoneOptions> {
        if tokens::tokens(text).next() != Some(V4_MAGIC) {
            return Err(ZoneError::format("zon is not a v4 token stream"));
        }
        let mut opts = ZoneOptions::default();
        for record in tokens::records(text) {
            match record.key {
                "*NAME" => opts.name = record.text().to_string(),
                "*MINLNG" => opts.min_lng = record.value(0)?,
                "*MAXLNG" => opts.max_lng = record.value(0)?,
                "*MINLAT" => opts.min_lat = record.value(0)?,
                "*MAXLAT" => opts.max_lat = record.value(0)?,
                "*MIN_EXTENTS" => opts.min_extents = Vec3::from_array(record.vec3()?),
                "*MAX_EXTENTS" => opts.max_extents = Vec3::from_array(record.vec3()?),
                "*UNITSPERVERT" => opts.units_per_vertex = record.value(0)?,
                "*QUADSPERTILE" => opts.quads_per_tile = record.value(0)?,
                "*COVERMAPINPUTSIZE" => opts.cover_map_input_size = record.value(0)?,
                "*LAYERINGMAPINPUTSIZE" => opts.layer_map_input_size = record.value(0)?,
                _ => {}
            }
        }
        if opts.quads_per_tile == 0 {
            return Err(ZoneError::format("zon declares zero quads per tile"));
        }
        Ok(opts)
    }

    fn tile_span(&self) -> f32 {
        self.quads_per_tile as f32 * self.units_per_vertex
    }

    /// World position of the tile's origin corner
    fn tile_origin(&self, lng: i32, lat: i32) -> (f32, f32) {
        let span = self.tile_span();
        let dlat = i64::from(lat) - i64::from(self.min_lat);
        let dlng = i64::from(lng) - i64::from(self.min_lng);
        (
            self.min_extents.x + dlat as f32 * span,
            self.min_extents.y + dlng as f32 * span,
        )
    }
}

/// Height samples and quads in a tile with `quads_per_tile` quads per side
pub(crate) fn tile_sample_counts(quads_per_tile: u32) -> Option<(usize, usize)> {
    let q = quads_per_tile as usize;
    let stride = q.checked_add(1)?;
    Some((stride.checked_mul(stride)?, q.checked_mul(q)?))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerrainTile {
    pub lng: i32,
    pub lat: i32,
    pub x: f32,
    pub y: f32,
    pub is_flat: bool,
    /// `(q+1)^2` samples, row-major by local y
    pub heights: Vec<f32>,
    pub colors: Vec<u32>,
    pub colors2: Vec<u32>,
    /// `q^2` entries
    pub quad_flags: Vec<u8>,
    pub base_water_level: f32,
}

impl TerrainTile {
    /// Terrain height at tile-local `(x, y)` in world units
    pub fn height_at(&self, quads_per_tile: u32, units_per_vertex: f32, x: f32, y: f32) -> f32 {
        let q = quads_per_tile as usize;
        let stride = q + 1;
        let Some((vert_count, _)) = tile_sample_counts(quads_per_tile) else {
            return 0.0;
        };
        if q == 0 || self.heights.len() < vert_count || units_per_vertex == 0.0 {
            return 0.0;
        }
        if self.is_flat {
            return self.heights[0];
        }

        let gx = (x / units_per_vertex).clamp(0.0, q as f32);
        let gy = (y / units_per_vertex).clamp(0.0, q as f32);
        let col = (gx.floor() as usize).min(q - 1);
        let row = (gy.floor() as usize).min(q - 1);
        let fx = gx - col as f32;
        let fy = gy - row as f32;

        let h = |c: usize, r: usize| self.heights[r * stride + c];
        let p00 = Vec3::new(0.0, 0.0, h(col, row));
        let p10 = Vec3::new(1.0, 0.0, h(col + 1, row));
        let p01 = Vec3::new(0.0, 1.0, h(col, row + 1));
        let p11 = Vec3::new(1.0, 1.0, h(col + 1, row + 1));

        // quad split on the (0,0)-(1,1) diagonal
        if point_in_triangle(fx, fy, p00, p10, p11) {
            plane_height(fx, fy, p00, p10, p11)
        } else {
            plane_height(fx, fy, p00, p11, p01)
        }
    }
}

fn edge_sign(px: f32, py: f32, a: Vec3, b: Vec3) -> f32 {
    (px - b.x) * (a.y - b.y) - (a.x - b.x) * (py - b.y)
}

fn point_in_triangle(px: f32, py: f32, a: Vec3, b: Vec3, c: Vec3) -> bool {
    let d1 = edge_sign(px, py, a, b);
    let d2 = edge_sign(px, py, b, c);
    let d3 = edge_sign(px, py, c, a);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Height of the plane through `a`, `b`, `c` at `(px, py)`
fn plane_height(px: f32, py: f32, a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let det = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
    if det == 0.0 {
        return a.z;
    }
    let l1 = ((b.y - c.y) * (px - c.x) + (c.x - b.x) * (py - c.y)) / det;
    let l2 = ((c.y - a.y) * (px - c.x) + (a.x - c.x) * (py - c.y)) / det;
    let l3 = 1.0 - l1 - l2;
    l1 * a.z + l2 * b.z + l3 * c.z
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaterSheet {
    pub min: (f32, f32),
    pub max: (f32, f32),
    pub z: f32,
    /// Infinite sheet repeated on every tile at its base water level
    pub tile: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InvisibleWall {
    pub name: String,
    pub flags: u32,
    pub points: Vec<Vec3>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Terrain {
    pub options: ZoneOptions,
    pub base_texture: String,
    pub tiles: Vec<TerrainTile>,
    pub water_sheets: Vec<WaterSheet>,
    pub invisible_walls: Vec<InvisibleWall>,
    pub regions: Vec<Region>,
    pub placeable_groups: Vec<PlaceableGroup>,
}

impl Terrain {
    pub fn quads_per_tile(&self) -> u32 {
        self.options.quads_per_tile
    }

    pub fn units_per_vertex(&self) -> f32 {
        self.options.units_per_vertex
    }
}

/// Fully loaded v4 zone: terrain plus every model its groups reference
#[derive(Clone, Debug, Default)]
pub struct V4Zone {
    pub terrain: Terrain,
    pub models: BTreeMap<String, Geometry>,
}

pub fn load(dir: &Path, zone: &str) -> Result<V4Zone> {
    let (archive, terrain) = load_terrain(dir, zone)?;

    let mut models = BTreeMap::new();
    for group in &terrain.placeable_groups {
        for placeable in &group.placeables {
            if models.contains_key(&placeable.model_name) {
                continue;
            }
            let mut geometry =
                model::load(Some(&archive), &format!("{}.mod", placeable.model_name));
            geometry.name = placeable.model_name.clone();
            models.insert(placeable.model_name.clone(), geometry);
        }
    }

    tracing::info!(
        "Loaded v4 zone {}: {} tiles, {} groups, {} models",
        zone,
        terrain.tiles.len(),
        terrain.placeable_groups.len(),
        models.len()
    );
    Ok(V4Zone { terrain, models })
}

/// Parse options, terrain tiles, water and walls without loading models
pub fn load_terrain(dir: &Path, zone: &str) -> Result<(Archive, Terrain)> {
    let archive = super::open_zone_archive(dir, zone)?;
    let scene = super::find_scene(archive.as_ref(), dir, zone)?;
    let options = ZoneOptions::parse(&tokens::entry_text(&scene))?;
    let archive = archive.ok_or_else(|| ZoneError::not_found(format!("{zone}.eqg")))?;

    let dat_name = format!("{}.dat", options.name);
    let dat = archive.get(&dat_name)?;
    let mut terrain = parse_terrain(&dat, options, &archive)?;

    if archive.exists(WATER_ENTRY) {
        terrain.water_sheets = parse_water(&tokens::entry_text(&archive.get(WATER_ENTRY)?))?;
    }
    if archive.exists(INVISIBLE_WALL_ENTRY) {
        terrain.invisible_walls = parse_invisible_walls(&archive.get(INVISIBLE_WALL_ENTRY)?)?;
    }

    Ok((archive, terrain))
}

fn read_vec3(reader: &mut ByteReader<'_>) -> Result<Vec3> {
    Ok(Vec3::from_array(reader.read_f32x3()?))
}

/// Parse the `<name>.dat` tile stream. `.tog` entries are looked up in `archive`.
pub fn parse_terrain(data: &[u8], options: ZoneOptions, archive: &Archive) -> Result<Terrain> {
    let mut reader = ByteReader::new(data);
    reader.skip(12)?;
    let base_texture = reader.read_cstring()?;
    let tile_count = reader.read_u32()?;

    let (qpt, upv) = (options.quads_per_tile, options.units_per_vertex);
    let (vert_count, quad_count) = tile_sample_counts(qpt)
        .ok_or_else(|| ZoneError::format(format!("{qpt} quads per tile is out of range")))?;
    // heights and both color planes are 4 bytes per sample
    let tile_floor = vert_count.saturating_mul(12).saturating_add(quad_count);

    let mut terrain = Terrain {
        base_texture,
        ..Default::default()
    };

    for _ in 0..tile_count {
        let lng = reader.read_i32()?;
        let lat = reader.read_i32()?;
        let _unknown = reader.read_u32()?;
        if reader.remaining() < tile_floor {
            return Err(ZoneError::format(format!(
                "tile {lng},{lat} needs {tile_floor} bytes, {} left",
                reader.remaining()
            )));
        }

        let (x, y) = options.tile_origin(lng, lat);
        let mut tile = TerrainTile {
            lng,
            lat,
            x,
            y,
            ..Default::default()
        };

        tile.heights.reserve(vert_count);
        for _ in 0..vert_count {
            tile.heights.push(reader.read_f32()?);
        }
        for _ in 0..vert_count {
            tile.colors.push(reader.read_u32()?);
        }
        for _ in 0..vert_count {
            tile.colors2.push(reader.read_u32()?);
        }
        tile.quad_flags = reader.bytes(quad_count)?.to_vec();
        tile.base_water_level = reader.read_f32()?;
        tile.is_flat = tile.heights.windows(2).all(|w| w[0] == w[1]);

        let unknown_count = reader.read_i32()?;
        if unknown_count > 0 {
            if reader.read_i8()? > 0 {
                reader.skip(16)?;
            }
            reader.skip(4)?;
        }

        let layer_count = reader.read_i32()?;
        if layer_count > 0 {
            let _base_material = reader.read_cstring()?;
            for _ in 1..layer_count {
                let _material = reader.read_cstring()?;
                let dim = reader.read_u32()? as usize;
                reader.skip(dim.saturating_mul(dim))?;
            }
        }

        let tile_origin = Vec3::new(tile.x, tile.y, 0.0);
        let mut singles = PlaceableGroup {
            tile_position: Some(tile_origin),
            ..Default::default()
        };

        let placeable_count = reader.read_i32()?;
        for _ in 0..placeable_count.max(0) {
            let model_name = reader.read_cstring()?.to_lowercase();
            let _unknown = reader.read_cstring()?;
            let _unknown = reader.read_i32()?;
            let mut position = read_vec3(&mut reader)?;
            let rotation = read_vec3(&mut reader)?;
            let scale = read_vec3(&mut reader)?;
            let _unknown = reader.read_u8()?;
            position.z += tile.height_at(qpt, upv, position.x, position.y);
            singles.placeables.push(Placeable {
                model_name,
                position,
                rotation,
                scale,
            });
        }

        let area_count = reader.read_i32()?;
        for _ in 0..area_count.max(0) {
            let mut region = Region::new(reader.read_cstring()?);
            region.area_type = reader.read_i32()?;
            let _unknown = reader.read_cstring()?;
            let local = read_vec3(&mut reader)?;
            region.rotation = read_vec3(&mut reader)?;
            region.scale = read_vec3(&mut reader)?;
            region.extents = read_vec3(&mut reader)?;
            let ground = tile.height_at(qpt, upv, local.x, local.y);
            region.position = Vec3::new(tile.x + local.x, tile.y + local.y, local.z + ground);
            terrain.regions.push(region);
        }

        let light_count = reader.read_i32()?;
        for _ in 0..light_count.max(0) {
            let _name = reader.read_cstring()?;
            let _unknown = reader.read_cstring()?;
            let _unknown = reader.read_i8()?;
            reader.skip(9 * 4)?;
            let _radius = reader.read_f32()?;
        }

        let tog_count = reader.read_i32()?;
        let mut tile_groups = Vec::new();
        for _ in 0..tog_count.max(0) {
            let name = reader.read_cstring()?.to_lowercase();
            let mut position = read_vec3(&mut reader)?;
            let rotation = read_vec3(&mut reader)?;
            let scale = read_vec3(&mut reader)?;
            let _z_adjust = reader.read_f32()?;
            position.z += tile.height_at(qpt, upv, position.x, position.y);
            tile_groups.push(PlaceableGroup {
                position,
                rotation,
                scale,
                tile_position: Some(tile_origin),
                placeables: load_tile_object_group(archive, &name),
            });
        }

        if !singles.placeables.is_empty() {
            terrain.placeable_groups.push(singles);
        }
        terrain.placeable_groups.extend(tile_groups);
        terrain.tiles.push(tile);
    }

    terrain.options = options;
    Ok(terrain)
}

/// Placeables of `<name>.tog`; a missing entry gives an empty list
fn load_tile_object_group(archive: &Archive, name: &str) -> Vec<Placeable> {
    let entry = format!("{name}.tog");
    match archive.get(&entry) {
        Ok(data) => parse_tile_object_group(&tokens::entry_text(&data)).unwrap_or_else(|e| {
            tracing::warn!("Object group {} failed to parse: {}", entry, e);
            Vec::new()
        }),
        Err(e) => {
            tracing::warn!("Object group {} unavailable: {}", entry, e);
            Vec::new()
        }
    }
}

pub fn parse_tile_object_group(text: &str) -> Result<Vec<Placeable>> {
    let mut placeables = Vec::new();
    let mut current: Option<Placeable> = None;
    for record in tokens::records(text) {
        match record.key {
            "*BEGIN_OBJECT" => current = Some(Placeable::new("")),
            "*END_OBJECT" => {
                if let Some(p) = current.take() {
                    placeables.push(p);
                }
            }
            _ => {
                if let Some(p) = current.as_mut() {
                    apply_object_record(p, &record)?;
                }
            }
        }
    }
    Ok(placeables)
}

fn apply_object_record(placeable: &mut Placeable, record: &Record<'_>) -> Result<()> {
    match record.key {
        "*NAME" => placeable.model_name = record.text().to_lowercase(),
        "*POSITION" => placeable.position = Vec3::from_array(record.vec3()?),
        "*ROTATION" => placeable.rotation = Vec3::from_array(record.vec3()?),
        "*SCALE" => placeable.scale = Vec3::splat(record.value(0)?),
        _ => {}
    }
    Ok(())
}

pub fn parse_water(text: &str) -> Result<Vec<WaterSheet>> {
    let mut sheets = Vec::new();
    let mut current: Option<WaterSheet> = None;
    for record in tokens::records(text) {
        match record.key {
            "*WATERSHEET" => current = Some(WaterSheet::default()),
            "*END_SHEET" => {
                if let Some(sheet) = current.take() {
                    sheets.push(sheet);
                }
            }
            key => {
                let Some(sheet) = current.as_mut() else {
                    continue;
                };
                match key {
                    "*MINX" => sheet.min.0 = record.value(0)?,
                    "*MINY" => sheet.min.1 = record.value(0)?,
                    "*MAXX" => sheet.max.0 = record.value(0)?,
                    "*MAXY" => sheet.max.1 = record.value(0)?,
                    "*ZHEIGHT" => sheet.z = record.value(0)?,
                    "*TILE" => sheet.tile = true,
                    _ => {}
                }
            }
        }
    }
    Ok(sheets)
}

pub fn parse_invisible_walls(data: &[u8]) -> Result<Vec<InvisibleWall>> {
    let mut reader = ByteReader::new(data);
    let count = reader.read_u32()?;
    let mut walls = Vec::new();
    for _ in 0..count {
        let name = reader.read_cstring()?;
        let flags = reader.read_u32()?;
        let point_count = reader.read_u32()?;
        let mut points = Vec::new();
        for _ in 0..point_count {
            points.push(read_vec3(&mut reader)?);
        }
        walls.push(InvisibleWall {
            name,
            flags,
            points,
        });
    }
    Ok(walls)
}
