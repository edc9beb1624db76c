// Map - unified collision geometry compiler and `.map` serializer
// Tries EQG v1-3, then EQG v4, then S3D; the first family that loads wins.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use zone_shared::util::{ByteBuffer, ByteReader};

use crate::compression::{read_single_block, write_single_block};
use crate::eqg::model::TRIANGLE_NON_COLLIDE;
use crate::eqg::v4::{tile_sample_counts, Terrain, V4Zone};
use crate::eqg::{self, EqgZone};
use crate::error::{Result, ZoneError};
use crate::geometry::{rotate_vertex, transform_vertex, Geometry, Placeable, PlaceableGroup, Vec3};
use crate::s3d::{self, base_name, S3dZone};
use crate::wld::fragments::{ACTOR_DEF, SKELETON_TRACK, STATIC_GEOMETRY};
use crate::wld::{FragmentData, FragmentRef, SkeletonTrack, WldFile, POLYGON_NON_COLLIDE};

pub const MAP_VERSION: u32 = 0x0200_0000;

/// Height of extruded invisible walls
const WALL_HEIGHT: f32 = 1000.0;

/// Vertex/index buffer with exact-position deduplication
#[derive(Clone, Debug, Default)]
pub struct MeshBuffer {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    lookup: HashMap<[u32; 3], u32>,
}

impl PartialEq for MeshBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.vertices == other.vertices && self.indices == other.indices
    }
}

impl MeshBuffer {
    /// Index of `v`, appending it if this exact bit pattern is new
    pub fn add_vertex(&mut self, v: Vec3) -> u32 {
        if let Some(&index) = self.lookup.get(&v.bits()) {
            return index;
        }
        let index = self.vertices.len() as u32;
        self.vertices.push(v);
        self.lookup.insert(v.bits(), index);
        index
    }

    pub fn add_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) {
        let ia = self.add_vertex(a);
        let ib = self.add_vertex(b);
        let ic = self.add_vertex(c);
        self.indices.extend_from_slice(&[ia, ib, ic]);
    }

    /// Two triangles `(a, b, c)` and `(a, c, d)`
    pub fn add_quad(&mut self, a: Vec3, b: Vec3, c: Vec3, d: Vec3) {
        self.add_triangle(a, b, c);
        self.add_triangle(a, c, d);
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn from_raw(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let mut lookup = HashMap::with_capacity(vertices.len());
        for (i, v) in vertices.iter().enumerate() {
            lookup.entry(v.bits()).or_insert(i as u32);
        }
        Self {
            vertices,
            indices,
            lookup,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapPolygon {
    pub indices: [u32; 3],
    pub collidable: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapModel {
    pub vertices: Vec<Vec3>,
    pub polygons: Vec<MapPolygon>,
}

impl MapModel {
    /// Positions and faces of `geometry`; `non_collide` is the family's flag bit
    pub fn from_geometry(geometry: &Geometry, non_collide: u32, swap_xy: bool) -> Self {
        Self {
            vertices: geometry
                .vertices
                .iter()
                .map(|v| if swap_xy { v.pos.swap_xy() } else { v.pos })
                .collect(),
            polygons: geometry
                .polygons
                .iter()
                .map(|p| MapPolygon {
                    indices: p.indices,
                    collidable: p.flags & non_collide == 0,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapTile {
    pub flat: bool,
    pub x: f32,
    pub y: f32,
    /// Empty for flat tiles
    pub quad_flags: Vec<u8>,
    /// A single value for flat tiles
    pub heights: Vec<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapTerrain {
    pub quads_per_tile: u32,
    pub units_per_vertex: f32,
    pub tiles: Vec<MapTile>,
}

impl MapTerrain {
    fn from_terrain(terrain: &Terrain) -> Self {
        let tiles = terrain
            .tiles
            .iter()
            .map(|t| {
                if t.is_flat {
                    MapTile {
                        flat: true,
                        x: t.x,
                        y: t.y,
                        quad_flags: Vec::new(),
                        heights: vec![t.heights.first().copied().unwrap_or(0.0)],
                    }
                } else {
                    MapTile {
                        flat: false,
                        x: t.x,
                        y: t.y,
                        quad_flags: t.quad_flags.clone(),
                        heights: t.heights.clone(),
                    }
                }
            })
            .collect();
        Self {
            quads_per_tile: terrain.quads_per_tile(),
            units_per_vertex: terrain.units_per_vertex(),
            tiles,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnifiedMap {
    pub collide: MeshBuffer,
    pub non_collide: MeshBuffer,
    pub models: BTreeMap<String, MapModel>,
    pub placeables: Vec<Placeable>,
    pub placeable_groups: Vec<PlaceableGroup>,
    pub terrain: Option<MapTerrain>,
}

/// Compile `zone` from the archives in `dir`
pub fn build(dir: &Path, zone: &str) -> Result<UnifiedMap> {
    match eqg::load(dir, zone) {
        Ok(loaded) => {
            tracing::info!("{}: compiling from EQG", zone);
            return Ok(UnifiedMap::from_eqg(&loaded));
        }
        Err(e) => tracing::debug!("{}: EQG v1-3 not usable: {}", zone, e),
    }

    match eqg::v4::load(dir, zone) {
        Ok(loaded) => {
            tracing::info!("{}: compiling from EQG v4 terrain", zone);
            return Ok(UnifiedMap::from_v4(&loaded));
        }
        Err(e) => tracing::debug!("{}: EQG v4 not usable: {}", zone, e),
    }

    match s3d::load(dir, zone) {
        Ok(loaded) => {
            tracing::info!("{}: compiling from S3D", zone);
            return Ok(UnifiedMap::from_s3d(&loaded));
        }
        Err(e) => tracing::debug!("{}: S3D not usable: {}", zone, e),
    }

    Err(ZoneError::not_found(format!("no loadable zone data for {zone}")))
}

enum ActorModel {
    Mesh(String),
    Skeleton(FragmentRef),
}

impl UnifiedMap {
    fn buffer_for(&mut self, flags: u32, non_collide: u32) -> &mut MeshBuffer {
        if flags & non_collide != 0 {
            &mut self.non_collide
        } else {
            &mut self.collide
        }
    }

    /// Add every face of `geometry` after passing its positions through `transform`
    pub fn bake_geometry(
        &mut self,
        geometry: &Geometry,
        non_collide: u32,
        transform: impl Fn(Vec3) -> Vec3,
    ) {
        for polygon in &geometry.polygons {
            let corners: Option<Vec<Vec3>> = polygon
                .indices
                .iter()
                .map(|&i| geometry.vertices.get(i as usize).map(|v| transform(v.pos)))
                .collect();
            let Some(corners) = corners else {
                tracing::warn!("{}: skipping polygon with bad index", geometry.name);
                continue;
            };
            self.buffer_for(polygon.flags, non_collide)
                .add_triangle(corners[0], corners[1], corners[2]);
        }
    }

    pub fn from_eqg(zone: &EqgZone) -> Self {
        let mut map = UnifiedMap::default();
        for placeable in &zone.placeables {
            let Some(model) = zone.models.get(&placeable.model_name) else {
                tracing::warn!("Placeable model {} was never loaded", placeable.model_name);
                continue;
            };
            map.bake_geometry(model, TRIANGLE_NON_COLLIDE, |v| {
                transform_vertex(v, placeable.position, placeable.rotation, placeable.scale)
            });
        }
        map.log_summary("EQG");
        map
    }

    pub fn from_v4(zone: &V4Zone) -> Self {
        let terrain = &zone.terrain;
        let mut map = UnifiedMap {
            terrain: Some(MapTerrain::from_terrain(terrain)),
            placeable_groups: terrain.placeable_groups.clone(),
            ..Default::default()
        };
        for (name, geometry) in &zone.models {
            map.models.insert(
                name.clone(),
                MapModel::from_geometry(geometry, TRIANGLE_NON_COLLIDE, false),
            );
        }

        let span = terrain.quads_per_tile() as f32 * terrain.units_per_vertex();
        for sheet in &terrain.water_sheets {
            if sheet.tile {
                for tile in &terrain.tiles {
                    let z = tile.base_water_level;
                    map.non_collide.add_quad(
                        Vec3::new(tile.x, tile.y, z),
                        Vec3::new(tile.x + span, tile.y, z),
                        Vec3::new(tile.x + span, tile.y + span, z),
                        Vec3::new(tile.x, tile.y + span, z),
                    );
                }
            } else {
                let (min, max, z) = (sheet.min, sheet.max, sheet.z);
                map.non_collide.add_quad(
                    Vec3::new(min.0, min.1, z),
                    Vec3::new(max.0, min.1, z),
                    Vec3::new(max.0, max.1, z),
                    Vec3::new(min.0, max.1, z),
                );
            }
        }

        let up = Vec3::new(0.0, 0.0, WALL_HEIGHT);
        for wall in &terrain.invisible_walls {
            for segment in wall.points.windows(2) {
                let (p0, p1) = (segment[0], segment[1]);
                let (p2, p3) = (p1 + up, p0 + up);
                map.collide.add_quad(p0, p1, p2, p3);
                map.collide.add_quad(p0, p3, p2, p1);
            }
        }

        map.log_summary("EQG v4");
        map
    }

    pub fn from_s3d(zone: &S3dZone) -> Self {
        let mut map = UnifiedMap::default();

        for (_, fragment) in zone.zone.of_type(STATIC_GEOMETRY) {
            if let FragmentData::StaticGeometry(mesh) = &fragment.data {
                map.bake_geometry(&mesh.geometry, POLYGON_NON_COLLIDE, Vec3::swap_xy);
            }
        }

        let Some(models) = &zone.object_models else {
            map.log_summary("S3D");
            return map;
        };

        for (_, fragment) in models.of_type(STATIC_GEOMETRY) {
            if let FragmentData::StaticGeometry(mesh) = &fragment.data {
                map.models
                    .entry(base_name(&fragment.name).to_string())
                    .or_insert_with(|| {
                        MapModel::from_geometry(&mesh.geometry, POLYGON_NON_COLLIDE, true)
                    });
            }
        }

        if let Some(objects) = &zone.objects {
            for wld_placeable in objects.placeables() {
                let Some(actor) = &wld_placeable.actor_name else {
                    continue;
                };
                let placeable = Placeable {
                    model_name: actor.clone(),
                    position: wld_placeable.position.swap_xy(),
                    rotation: wld_placeable.rotation.swap_xy(),
                    scale: wld_placeable.scale,
                };
                match resolve_actor(models, actor) {
                    Some(ActorModel::Mesh(name)) => map.placeables.push(Placeable {
                        model_name: name,
                        ..placeable
                    }),
                    Some(ActorModel::Skeleton(handle)) => match models.skeleton(handle) {
                        Ok(track) => flatten_skeleton(track, models, &placeable, &mut map.placeables),
                        Err(e) => tracing::warn!("Actor {}: {}", actor, e),
                    },
                    None => tracing::debug!("Actor {} has no model", actor),
                }
            }
        }

        map.log_summary("S3D");
        map
    }

    fn log_summary(&self, family: &str) {
        tracing::info!(
            "{} map: {} collide verts / {} tris, {} non-collide verts / {} tris, {} models, {} placeables, {} groups",
            family,
            self.collide.vertices.len(),
            self.collide.triangle_count(),
            self.non_collide.vertices.len(),
            self.non_collide.triangle_count(),
            self.models.len(),
            self.placeables.len(),
            self.placeable_groups.len()
        );
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<UnifiedMap> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut payload = ByteBuffer::new();
        let (quads_per_tile, units_per_vertex, tile_count) = match &self.terrain {
            Some(t) => (t.quads_per_tile, t.units_per_vertex, t.tiles.len()),
            None => (0, 0.0, 0),
        };

        payload.write_u32(self.collide.vertices.len() as u32);
        payload.write_u32(self.collide.indices.len() as u32);
        payload.write_u32(self.non_collide.vertices.len() as u32);
        payload.write_u32(self.non_collide.indices.len() as u32);
        payload.write_u32(self.models.len() as u32);
        payload.write_u32(self.placeables.len() as u32);
        payload.write_u32(self.placeable_groups.len() as u32);
        payload.write_u32(tile_count as u32);
        payload.write_u32(quads_per_tile);
        payload.write_f32(units_per_vertex);

        for buffer in [&self.collide, &self.non_collide] {
            for v in &buffer.vertices {
                write_vec3(&mut payload, *v);
            }
            for &i in &buffer.indices {
                payload.write_u32(i);
            }
        }

        for (name, model) in &self.models {
            payload.write_sized_string(name);
            payload.write_u32(model.vertices.len() as u32);
            payload.write_u32(model.polygons.len() as u32);
            for v in &model.vertices {
                write_vec3(&mut payload, *v);
            }
            for p in &model.polygons {
                for &i in &p.indices {
                    payload.write_u32(i);
                }
                payload.write_u8(p.collidable as u8);
            }
        }

        for placeable in &self.placeables {
            write_placeable(&mut payload, placeable);
        }

        for group in &self.placeable_groups {
            write_vec3(&mut payload, group.position);
            write_vec3(&mut payload, group.rotation);
            write_vec3(&mut payload, group.scale);
            match group.tile_position {
                Some(tile) => {
                    payload.write_u8(1);
                    write_vec3(&mut payload, tile);
                }
                None => payload.write_u8(0),
            }
            payload.write_u32(group.placeables.len() as u32);
            for placeable in &group.placeables {
                write_placeable(&mut payload, placeable);
            }
        }

        if let Some(terrain) = &self.terrain {
            for tile in &terrain.tiles {
                payload.write_u8(tile.flat as u8);
                payload.write_f32(tile.x);
                payload.write_f32(tile.y);
                if tile.flat {
                    payload.write_f32(tile.heights.first().copied().unwrap_or(0.0));
                } else {
                    payload.append(&tile.quad_flags);
                    for &h in &tile.heights {
                        payload.write_f32(h);
                    }
                }
            }
        }

        let mut out = ByteBuffer::with_capacity(payload.size() / 2 + 16);
        out.write_u32(MAP_VERSION);
        write_single_block(&mut out, payload.contents())?;
        Ok(out.into_inner())
    }

    pub fn from_bytes(data: &[u8]) -> Result<UnifiedMap> {
        let mut outer = ByteReader::new(data);
        let version = outer.read_u32()?;
        if version != MAP_VERSION {
            return Err(ZoneError::format(format!("unsupported map version {version:#010x}")));
        }
        let payload = read_single_block(&mut outer)?;
        let mut reader = ByteReader::new(&payload);

        let collide_verts = reader.read_u32()? as usize;
        let collide_inds = reader.read_u32()? as usize;
        let nc_verts = reader.read_u32()? as usize;
        let nc_inds = reader.read_u32()? as usize;
        let model_count = reader.read_u32()?;
        let placeable_count = reader.read_u32()?;
        let group_count = reader.read_u32()?;
        let tile_count = reader.read_u32()?;
        let quads_per_tile = reader.read_u32()?;
        let units_per_vertex = reader.read_f32()?;

        let mut map = UnifiedMap {
            collide: read_buffer(&mut reader, collide_verts, collide_inds)?,
            non_collide: read_buffer(&mut reader, nc_verts, nc_inds)?,
            ..Default::default()
        };

        for _ in 0..model_count {
            let name = read_sized_string(&mut reader)?;
            let vert_count = reader.read_u32()?;
            let poly_count = reader.read_u32()?;
            let mut model = MapModel::default();
            for _ in 0..vert_count {
                model.vertices.push(read_vec3(&mut reader)?);
            }
            for _ in 0..poly_count {
                let indices = [reader.read_u32()?, reader.read_u32()?, reader.read_u32()?];
                let collidable = reader.read_u8()? != 0;
                model.polygons.push(MapPolygon {
                    indices,
                    collidable,
                });
            }
            map.models.insert(name, model);
        }

        for _ in 0..placeable_count {
            map.placeables.push(read_placeable(&mut reader)?);
        }

        for _ in 0..group_count {
            let mut group = PlaceableGroup {
                position: read_vec3(&mut reader)?,
                rotation: read_vec3(&mut reader)?,
                scale: read_vec3(&mut reader)?,
                ..Default::default()
            };
            if reader.read_u8()? != 0 {
                group.tile_position = Some(read_vec3(&mut reader)?);
            }
            let count = reader.read_u32()?;
            for _ in 0..count {
                group.placeables.push(read_placeable(&mut reader)?);
            }
            map.placeable_groups.push(group);
        }

        if tile_count > 0 || quads_per_tile > 0 {
            let (vert_count, quad_count) = tile_sample_counts(quads_per_tile).ok_or_else(|| {
                ZoneError::format(format!("{quads_per_tile} quads per tile is out of range"))
            })?;
            let mut terrain = MapTerrain {
                quads_per_tile,
                units_per_vertex,
                tiles: Vec::new(),
            };
            for _ in 0..tile_count {
                let flat = reader.read_u8()? != 0;
                let x = reader.read_f32()?;
                let y = reader.read_f32()?;
                let mut tile = MapTile {
                    flat,
                    x,
                    y,
                    ..Default::default()
                };
                if flat {
                    tile.heights.push(reader.read_f32()?);
                } else {
                    tile.quad_flags = reader.bytes(quad_count)?.to_vec();
                    for _ in 0..vert_count {
                        tile.heights.push(reader.read_f32()?);
                    }
                }
                terrain.tiles.push(tile);
            }
            map.terrain = Some(terrain);
        }

        Ok(map)
    }
}

/// Mesh or skeleton drawn by `actor`: an actor definition with that exact
/// name first, then any mesh or skeleton sharing its base name
fn resolve_actor(wld: &WldFile, actor: &str) -> Option<ActorModel> {
    let from_handle = |handle: FragmentRef| -> Option<ActorModel> {
        let fragment = wld.fragment(handle).ok()?;
        match &fragment.data {
            FragmentData::MeshRef(r) | FragmentData::SkeletonTrackRef(r) => {
                let target = wld.fragment(r.target).ok()?;
                match &target.data {
                    FragmentData::StaticGeometry(_) => {
                        Some(ActorModel::Mesh(base_name(&target.name).to_string()))
                    }
                    FragmentData::SkeletonTrack(_) => Some(ActorModel::Skeleton(r.target)),
                    _ => None,
                }
            }
            FragmentData::StaticGeometry(_) => {
                Some(ActorModel::Mesh(base_name(&fragment.name).to_string()))
            }
            FragmentData::SkeletonTrack(_) => Some(ActorModel::Skeleton(handle)),
            _ => None,
        }
    };

    if let Some((handle, _)) = wld.of_type(ACTOR_DEF).find(|(_, f)| f.name == actor) {
        if let Ok(def) = wld.actor_def(handle) {
            if let Some(found) = def.refs.iter().find_map(|&r| from_handle(r)) {
                return Some(found);
            }
        }
    }

    let wanted = base_name(actor);
    if let Some((_, fragment)) = wld
        .of_type(STATIC_GEOMETRY)
        .find(|(_, f)| base_name(&f.name) == wanted)
    {
        return Some(ActorModel::Mesh(base_name(&fragment.name).to_string()));
    }
    wld.of_type(SKELETON_TRACK)
        .find(|(_, f)| base_name(&f.name) == wanted)
        .map(|(handle, _)| ActorModel::Skeleton(handle))
}

/// Emit one placeable per bone that draws a mesh. Bones inherit their
/// parent's accumulated translation, rotation and scale.
fn flatten_skeleton(
    track: &SkeletonTrack,
    wld: &WldFile,
    root: &Placeable,
    out: &mut Vec<Placeable>,
) {
    struct Frame {
        bone: usize,
        position: Vec3,
        rotation: Vec3,
    }

    if track.bones.is_empty() {
        return;
    }
    let mut visited = vec![false; track.bones.len()];
    let mut stack = vec![Frame {
        bone: 0,
        position: root.position,
        rotation: root.rotation,
    }];

    while let Some(frame) = stack.pop() {
        if std::mem::replace(&mut visited[frame.bone], true) {
            continue;
        }
        let bone = &track.bones[frame.bone];
        let shift = bone.transform.shift().swap_xy().scale(root.scale);
        let position = frame.position + rotate_vertex(shift, frame.rotation);
        let rotation = frame.rotation + bone.transform.rotation().swap_xy();

        if let Some(mesh) = bone.model.and_then(|h| wld.fragment(h).ok()) {
            out.push(Placeable {
                model_name: base_name(&mesh.name).to_string(),
                position,
                rotation,
                scale: root.scale,
            });
        }
        for &child in bone.children.iter().rev() {
            stack.push(Frame {
                bone: child,
                position,
                rotation,
            });
        }
    }
}

fn write_vec3(buf: &mut ByteBuffer, v: Vec3) {
    buf.write_f32(v.x);
    buf.write_f32(v.y);
    buf.write_f32(v.z);
}

fn write_placeable(buf: &mut ByteBuffer, placeable: &Placeable) {
    buf.write_sized_string(&placeable.model_name);
    write_vec3(buf, placeable.position);
    write_vec3(buf, placeable.rotation);
    write_vec3(buf, placeable.scale);
}

fn read_vec3(reader: &mut ByteReader<'_>) -> Result<Vec3> {
    Ok(Vec3::from_array(reader.read_f32x3()?))
}

fn read_sized_string(reader: &mut ByteReader<'_>) -> Result<String> {
    let len = reader.read_u32()? as usize;
    Ok(String::from_utf8_lossy(reader.bytes(len)?).into_owned())
}

fn read_placeable(reader: &mut ByteReader<'_>) -> Result<Placeable> {
    Ok(Placeable {
        model_name: read_sized_string(reader)?,
        position: read_vec3(reader)?,
        rotation: read_vec3(reader)?,
        scale: read_vec3(reader)?,
    })
}

fn read_buffer(reader: &mut ByteReader<'_>, verts: usize, inds: usize) -> Result<MeshBuffer> {
    let mut vertices = Vec::with_capacity(verts.min(1 << 20));
    for _ in 0..verts {
        vertices.push(read_vec3(reader)?);
    }
    let mut indices = Vec::with_capacity(inds.min(1 << 20));
    for _ in 0..inds {
        indices.push(reader.read_u32()?);
    }
    Ok(MeshBuffer::from_raw(vertices, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eqg::v4::{InvisibleWall, TerrainTile, WaterSheet, ZoneOptions};
    use crate::test_support::{self, write_archive, MeshBody, ModBuilder, WldBuilder, ZonBuilder};
    use crate::wld::fragments::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dedup_reuses_exact_positions() {
        let mut buffer = MeshBuffer::default();
        let p = Vec3::new(1.0, 2.0, 3.0);
        let first = buffer.add_vertex(p);
        assert_eq!(buffer.add_vertex(p), first);

        // neighbouring float is a different vertex
        let close = Vec3::new(1.0, 2.0, f32::from_bits(3.0f32.to_bits() + 1));
        assert_ne!(buffer.add_vertex(close), first);
        assert_eq!(buffer.vertices.len(), 2);
    }

    #[test]
    fn test_dedup_separates_signed_zero() {
        let mut buffer = MeshBuffer::default();
        let a = buffer.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = buffer.add_vertex(Vec3::new(-0.0, 0.0, 0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_dedup_is_per_buffer() {
        let mut map = UnifiedMap::default();
        let p = Vec3::new(5.0, 5.0, 5.0);
        map.collide.add_triangle(p, Vec3::ZERO, Vec3::ONE);
        map.non_collide.add_triangle(Vec3::ONE, Vec3::ZERO, p);
        assert_eq!(map.collide.indices, vec![0, 1, 2]);
        assert_eq!(map.non_collide.indices, vec![0, 1, 2]);
    }

    fn write_eqg_zone(dir: &Path, zone: &str, flags: u32) {
        let mut zon = ZonBuilder::new(1);
        let model = zon.model("tri");
        zon.object(model, "tri01", [10.0, 20.0, 30.0], [0.0; 3], 1.0);
        let mut tri = ModBuilder::new(1, b'T');
        tri.vertex([0.0, 0.0, 0.0]);
        tri.vertex([1.0, 0.0, 0.0]);
        tri.vertex([0.0, 1.0, 0.0]);
        tri.triangle([0, 1, 2], 0, flags);
        let zon_name = format!("{zone}.zon");
        write_archive(
            &dir.join(format!("{zone}.eqg")),
            &[(zon_name.as_str(), zon.build()), ("tri.mod", tri.build())],
        );
    }

    #[test]
    fn test_eqg_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_eqg_zone(dir.path(), "test", TRIANGLE_NON_COLLIDE);

        let map = build(dir.path(), "test").unwrap();
        let out = dir.path().join("test.map");
        map.write(&out).unwrap();

        let raw = std::fs::read(&out).unwrap();
        assert_eq!(&raw[..4], &MAP_VERSION.to_le_bytes());

        let back = UnifiedMap::read(&out).unwrap();
        assert_eq!(back.non_collide.vertices.len(), 3);
        assert_eq!(back.non_collide.triangle_count(), 1);
        assert!(back.collide.vertices.is_empty());
        assert!(back.collide.indices.is_empty());
        assert_eq!(
            back.non_collide.vertices,
            vec![
                Vec3::new(10.0, 20.0, 30.0),
                Vec3::new(11.0, 20.0, 30.0),
                Vec3::new(10.0, 21.0, 30.0),
            ]
        );
    }

    #[test]
    fn test_eqg_collidable_faces() {
        let dir = tempfile::tempdir().unwrap();
        write_eqg_zone(dir.path(), "solid", 0);
        let map = build(dir.path(), "solid").unwrap();
        assert_eq!(map.collide.triangle_count(), 1);
        assert!(map.non_collide.vertices.is_empty());
    }

    fn zone_mesh() -> Vec<u8> {
        let mut builder = WldBuilder::new();
        let mesh = MeshBody {
            vertices: vec![[1, 2, 3], [4, 5, 6], [7, 8, 9], [1, 1, 1]],
            polygons: vec![(0, [0, 1, 2]), (POLYGON_NON_COLLIDE as u16, [0, 1, 3])],
            ..Default::default()
        };
        builder.push(STATIC_GEOMETRY, "ZONE_DMSPRITEDEF", mesh.encode(false));
        builder.build()
    }

    #[test]
    fn test_s3d_fallback_swaps_xy() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(&dir.path().join("town.s3d"), &[("town.wld", zone_mesh())]);

        let map = build(dir.path(), "town").unwrap();
        assert_eq!(map.collide.triangle_count(), 1);
        assert_eq!(map.non_collide.triangle_count(), 1);
        assert_eq!(map.collide.vertices[0], Vec3::new(2.0, 1.0, 3.0));
        assert!(map.terrain.is_none());
    }

    #[test]
    fn test_eqg_is_tried_before_s3d() {
        let dir = tempfile::tempdir().unwrap();
        write_eqg_zone(dir.path(), "both", TRIANGLE_NON_COLLIDE);
        write_archive(&dir.path().join("both.s3d"), &[("both.wld", zone_mesh())]);

        let map = build(dir.path(), "both").unwrap();
        assert_eq!(map.non_collide.vertices.len(), 3);
        assert!(map.collide.vertices.is_empty());
    }

    #[test]
    fn test_bad_wld_magic_fails_every_family() {
        let dir = tempfile::tempdir().unwrap();
        let mut wld = zone_mesh();
        wld[0] ^= 0xFF;
        write_archive(&dir.path().join("broken.s3d"), &[("broken.wld", wld)]);

        let err = build(dir.path(), "broken").unwrap_err();
        assert!(err.is_not_found());
        assert!(build(dir.path(), "missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_skeleton_flattening() {
        let mut models = WldBuilder::new();
        let mesh = MeshBody {
            vertices: vec![[2, 0, 0], [0, 0, 0], [0, 2, 0]],
            polygons: vec![(0, [0, 1, 2])],
            ..Default::default()
        };
        let mesh = models.push(STATIC_GEOMETRY, "ARM_DMSPRITEDEF", mesh.encode(false));
        let mesh_ref = models.push(MESH_REF, "", test_support::reference(mesh));
        let still = models.push(BONE_ORIENTATION, "", test_support::bone_orientation([0; 8]));
        let still_ref = models.push(BONE_ORIENTATION_REF, "", test_support::reference(still));
        let moved = models.push(
            BONE_ORIENTATION,
            "",
            test_support::bone_orientation([1, 0, 0, 0, 4, 0, 0, 1]),
        );
        let moved_ref = models.push(BONE_ORIENTATION_REF, "", test_support::reference(moved));
        let root_name = models.name_ref("ROOT");
        let arm_name = models.name_ref("ARM");
        models.push(
            SKELETON_TRACK,
            "BODY_HS_DEF",
            test_support::skeleton(&[
                (root_name, still_ref, 0, vec![1]),
                (arm_name, moved_ref, mesh_ref, vec![]),
            ]),
        );

        let mut objects = WldBuilder::new();
        let actor = objects.name_ref("BODY_ACTORDEF");
        objects.push(
            PLACEABLE,
            "",
            test_support::placeable(actor, [1.0, 2.0, 3.0], [0.0; 3], 1.0),
        );
        let unnamed = test_support::placeable(0, [0.0; 3], [0.0; 3], 1.0);
        objects.push(PLACEABLE, "", unnamed);

        let zone = S3dZone {
            zone: WldFile::parse(&WldBuilder::new().build()).unwrap(),
            objects: Some(WldFile::parse(&objects.build()).unwrap()),
            lights: None,
            object_models: Some(WldFile::parse(&models.build()).unwrap()),
        };
        let map = UnifiedMap::from_s3d(&zone);

        assert_eq!(map.placeables.len(), 1);
        let arm = &map.placeables[0];
        assert_eq!(arm.model_name, "ARM");
        assert_eq!(arm.position, Vec3::new(2.0, 5.0, 3.0));
        assert_eq!(arm.rotation, Vec3::ZERO);

        let model = &map.models["ARM"];
        assert_eq!(model.vertices[0], Vec3::new(0.0, 2.0, 0.0));
        assert!(model.polygons[0].collidable);
    }

    #[test]
    fn test_actor_definition_resolves_mesh() {
        let mut models = WldBuilder::new();
        let mesh = MeshBody {
            vertices: vec![[0, 0, 0]; 3],
            polygons: vec![(0, [0, 1, 2])],
            ..Default::default()
        };
        let mesh = models.push(STATIC_GEOMETRY, "ROCK_DMSPRITEDEF", mesh.encode(false));
        let mesh_ref = models.push(MESH_REF, "", test_support::reference(mesh));
        models.push(ACTOR_DEF, "BOULDER_ACTORDEF", test_support::actor_def(&[mesh_ref]));

        let mut objects = WldBuilder::new();
        let actor = objects.name_ref("BOULDER_ACTORDEF");
        objects.push(
            PLACEABLE,
            "",
            test_support::placeable(actor, [1.0, 2.0, 3.0], [128.0, 0.0, 0.0], 1.0),
        );

        let zone = S3dZone {
            zone: WldFile::parse(&WldBuilder::new().build()).unwrap(),
            objects: Some(WldFile::parse(&objects.build()).unwrap()),
            lights: None,
            object_models: Some(WldFile::parse(&models.build()).unwrap()),
        };
        let map = UnifiedMap::from_s3d(&zone);
        assert_eq!(map.placeables.len(), 1);
        assert_eq!(map.placeables[0].model_name, "ROCK");
        assert_eq!(map.placeables[0].position, Vec3::new(2.0, 1.0, 3.0));
        assert_eq!(map.placeables[0].rotation, Vec3::new(0.0, 90.0, 0.0));
    }

    fn v4_zone() -> V4Zone {
        let options = ZoneOptions {
            name: "arena2".to_string(),
            quads_per_tile: 1,
            units_per_vertex: 2.0,
            ..Default::default()
        };
        let terrain = Terrain {
            options,
            tiles: vec![TerrainTile {
                x: 0.0,
                y: 0.0,
                is_flat: true,
                heights: vec![0.0; 4],
                quad_flags: vec![0],
                base_water_level: 5.0,
                ..Default::default()
            }],
            water_sheets: vec![
                WaterSheet {
                    min: (10.0, 10.0),
                    max: (20.0, 20.0),
                    z: 1.0,
                    tile: false,
                },
                WaterSheet {
                    tile: true,
                    ..Default::default()
                },
            ],
            invisible_walls: vec![InvisibleWall {
                name: "wall".to_string(),
                flags: 0,
                points: vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)],
            }],
            placeable_groups: vec![PlaceableGroup {
                tile_position: Some(Vec3::ZERO),
                placeables: vec![Placeable::new("rock")],
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut rock = Geometry::named("rock");
        rock.vertices = vec![Default::default(); 3];
        rock.polygons.push(crate::geometry::Polygon {
            indices: [0, 1, 2],
            flags: TRIANGLE_NON_COLLIDE,
            material: 0,
        });
        V4Zone {
            terrain,
            models: BTreeMap::from([("rock".to_string(), rock)]),
        }
    }

    #[test]
    fn test_v4_water_and_walls() {
        let map = UnifiedMap::from_v4(&v4_zone());

        // finite sheet + one tile sheet quad
        assert_eq!(map.non_collide.vertices.len(), 8);
        assert_eq!(map.non_collide.triangle_count(), 4);
        assert!(map.non_collide.vertices.contains(&Vec3::new(2.0, 2.0, 5.0)));

        // one segment, both windings
        assert_eq!(map.collide.vertices.len(), 4);
        assert_eq!(map.collide.triangle_count(), 4);
        assert!(map.collide.vertices.contains(&Vec3::new(10.0, 0.0, WALL_HEIGHT)));

        assert_eq!(map.placeable_groups.len(), 1);
        assert!(!map.models["rock"].polygons[0].collidable);
        let terrain = map.terrain.as_ref().unwrap();
        assert_eq!(terrain.tiles[0].heights, vec![0.0]);
    }

    #[test]
    fn test_map_round_trip() {
        let mut map = UnifiedMap::from_v4(&v4_zone());
        map.placeables.push(Placeable {
            model_name: "tree".to_string(),
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::new(0.0, 45.0, 0.0),
            scale: Vec3::splat(1.5),
        });
        map.placeable_groups.push(PlaceableGroup::default());
        if let Some(terrain) = map.terrain.as_mut() {
            terrain.tiles.push(MapTile {
                flat: false,
                x: 2.0,
                y: 0.0,
                quad_flags: vec![3],
                heights: vec![0.0, 1.0, 2.0, 3.0],
            });
        }

        let back = UnifiedMap::from_bytes(&map.to_bytes().unwrap()).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_oversized_tile_grid_is_rejected() {
        let map = UnifiedMap {
            terrain: Some(MapTerrain {
                quads_per_tile: u32::MAX,
                units_per_vertex: 1.0,
                tiles: vec![MapTile {
                    flat: false,
                    heights: vec![0.0; 4],
                    quad_flags: vec![0],
                    ..Default::default()
                }],
            }),
            ..Default::default()
        };
        assert!(matches!(
            UnifiedMap::from_bytes(&map.to_bytes().unwrap()),
            Err(ZoneError::Format(_))
        ));
    }

    #[test]
    fn test_unsupported_map_version() {
        let mut bytes = UnifiedMap::default().to_bytes().unwrap();
        bytes[3] = 0x7F;
        assert!(matches!(
            UnifiedMap::from_bytes(&bytes),
            Err(ZoneError::Format(_))
        ));
        assert_eq!(
            UnifiedMap::from_bytes(&UnifiedMap::default().to_bytes().unwrap()).unwrap(),
            UnifiedMap::default()
        );
    }
}
