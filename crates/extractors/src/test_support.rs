// Test support - encoders for synthetic archives, WLD streams and EQG entries

use std::path::Path;

use zone_shared::util::ByteBuffer;

use crate::pfs::Archive;
use crate::wld::{decode_xor, WLD_MAGIC, WLD_VERSION_OLD};

const WLD_VERSION_NEW: u32 = 0x0001_5501;

/// Write an archive holding `entries` to `path`
pub fn write_archive(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut archive = Archive::new();
    for (name, data) in entries {
        archive.set(name, data).unwrap();
    }
    archive.save(path).unwrap();
}

struct RawFragment {
    size: u32,
    type_code: u32,
    name_ref: i32,
    body: Vec<u8>,
}

/// Builds a WLD stream fragment by fragment. Handles are 1-based.
pub struct WldBuilder {
    version: u32,
    pool: Vec<u8>,
    fragments: Vec<RawFragment>,
}

impl WldBuilder {
    pub fn new() -> Self {
        Self::with_version(WLD_VERSION_NEW)
    }

    pub fn old() -> Self {
        Self::with_version(WLD_VERSION_OLD)
    }

    fn with_version(version: u32) -> Self {
        Self {
            version,
            pool: vec![0],
            fragments: Vec::new(),
        }
    }

    /// Add `name` to the string pool and return its negated offset
    pub fn name_ref(&mut self, name: &str) -> i32 {
        let offset = self.pool.len() as i32;
        self.pool.extend_from_slice(name.as_bytes());
        self.pool.push(0);
        -offset
    }

    pub fn push(&mut self, type_code: u32, name: &str, body: ByteBuffer) -> i32 {
        let name_ref = if name.is_empty() { 0 } else { self.name_ref(name) };
        self.push_raw(type_code, name_ref, body.into_inner())
    }

    pub fn push_raw(&mut self, type_code: u32, name_ref: i32, body: Vec<u8>) -> i32 {
        let size = body.len() as u32 + 4;
        self.push_sized(type_code, size, name_ref, body);
        self.fragments.len() as i32
    }

    /// Fragment with an explicit size field, which may disagree with the body
    pub fn push_sized(&mut self, type_code: u32, size: u32, name_ref: i32, body: Vec<u8>) {
        self.fragments.push(RawFragment {
            size,
            type_code,
            name_ref,
            body,
        });
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = ByteBuffer::new();
        out.write_u32(WLD_MAGIC);
        out.write_u32(self.version);
        out.write_u32(self.fragments.len() as u32);
        out.write_u32(0);
        out.write_u32(0);
        out.write_u32(self.pool.len() as u32);
        out.write_u32(0);
        out.append(&decode_xor(&self.pool));
        for fragment in &self.fragments {
            out.write_u32(fragment.size);
            out.write_u32(fragment.type_code);
            out.write_i32(fragment.name_ref);
            out.append(&fragment.body);
        }
        out.into_inner()
    }
}

fn encoded_string(buf: &mut ByteBuffer, text: &str) -> usize {
    let mut raw = text.as_bytes().to_vec();
    raw.push(0);
    let encoded = decode_xor(&raw);
    buf.append(&encoded);
    encoded.len()
}

pub fn texture(frames: &[&str]) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(frames.len() as u32);
    for frame in frames {
        buf.write_u16(frame.len() as u16 + 1);
        encoded_string(&mut buf, frame);
    }
    buf
}

pub fn refs_with_flags(flags: u32, refs: &[i32]) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(flags);
    buf.write_u32(refs.len() as u32);
    for &r in refs {
        buf.write_i32(r);
    }
    buf
}

pub fn reference(target: i32) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_i32(target);
    buf.write_u32(0);
    buf
}

pub fn material(render_mode: u32, brush: i32) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(0);
    buf.write_u32(render_mode);
    buf.write_u32(0);
    buf.write_f32(1.0);
    buf.write_f32(0.0);
    buf.write_i32(brush);
    buf
}

/// Single frame: rotate denom, rotate x/y/z, shift x/y/z, shift denom
pub fn bone_orientation(values: [i16; 8]) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(0);
    buf.write_u32(1);
    for v in values {
        buf.write_i16(v);
    }
    buf
}

/// Bones as `(name_ref, orientation_ref, model_ref, children)`
pub fn skeleton(bones: &[(i32, i32, i32, Vec<u32>)]) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(0);
    buf.write_u32(bones.len() as u32);
    buf.write_i32(0);
    for (name_ref, orientation, model, children) in bones {
        buf.write_i32(*name_ref);
        buf.write_u32(0);
        buf.write_i32(*orientation);
        buf.write_i32(*model);
        buf.write_u32(children.len() as u32);
        for &child in children {
            buf.write_u32(child);
        }
    }
    buf
}

pub fn actor_def(refs: &[i32]) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(0);
    buf.write_i32(0);
    buf.write_u32(0);
    buf.write_u32(refs.len() as u32);
    buf.write_i32(0);
    for &r in refs {
        buf.write_i32(r);
    }
    buf
}

pub fn placeable(actor_ref: i32, pos: [f32; 3], rot_raw: [f32; 3], scale: f32) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_i32(actor_ref);
    buf.write_u32(0);
    buf.write_u32(0);
    for v in pos.into_iter().chain(rot_raw) {
        buf.write_f32(v);
    }
    buf.write_f32(0.0);
    buf.write_f32(scale);
    buf.write_f32(scale);
    buf
}

/// Nodes as `(normal, distance, region, left, right)`
pub fn bsp_tree(nodes: &[([f32; 3], f32, i32, i32, i32)]) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(nodes.len() as u32);
    for (normal, distance, region, left, right) in nodes {
        for &n in normal {
            buf.write_f32(n);
        }
        buf.write_f32(*distance);
        buf.write_i32(*region);
        buf.write_i32(*left);
        buf.write_i32(*right);
    }
    buf
}

pub fn bsp_region(region_ids: &[i32], alternate_name: &str) -> ByteBuffer {
    let mut buf = ByteBuffer::new();
    buf.write_u32(0);
    buf.write_u32(region_ids.len() as u32);
    for &id in region_ids {
        buf.write_i32(id);
    }
    buf.write_u32(alternate_name.len() as u32 + 1);
    encoded_string(&mut buf, alternate_name);
    buf
}

/// 0x36 body; polygons are `(flags, indices)`
#[derive(Clone, Debug, Default)]
pub struct MeshBody {
    pub center: [f32; 3],
    pub scale: i16,
    pub vertices: Vec<[i16; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub polygons: Vec<(u16, [u16; 3])>,
    pub material_list: i32,
}

impl MeshBody {
    pub fn encode(&self, old: bool) -> ByteBuffer {
        let mut buf = ByteBuffer::new();
        buf.write_u32(0);
        buf.write_i32(self.material_list);
        buf.write_i32(0);
        buf.write_i32(0);
        buf.write_i32(0);
        for c in self.center {
            buf.write_f32(c);
        }
        for _ in 0..3 {
            buf.write_u32(0);
        }
        buf.write_f32(0.0);
        for _ in 0..6 {
            buf.write_f32(0.0);
        }

        buf.write_u16(self.vertices.len() as u16);
        buf.write_u16(self.uvs.len() as u16);
        buf.write_u16(0);
        buf.write_u16(0);
        buf.write_u16(self.polygons.len() as u16);
        for _ in 0..4 {
            buf.write_u16(0);
        }
        buf.write_i16(self.scale);

        for v in &self.vertices {
            for &c in v {
                buf.write_i16(c);
            }
        }
        for uv in &self.uvs {
            if old {
                buf.write_i16((uv[0] * 256.0) as i16);
                buf.write_i16((uv[1] * 256.0) as i16);
            } else {
                buf.write_f32(uv[0]);
                buf.write_f32(uv[1]);
            }
        }
        for (flags, indices) in &self.polygons {
            buf.write_u16(*flags);
            for &i in indices {
                buf.write_u16(i);
            }
        }
        buf
    }
}

/// Offset-addressed string list shared by `.mod` and `.zon` entries
#[derive(Default)]
struct StringList {
    bytes: Vec<u8>,
}

impl StringList {
    fn add(&mut self, text: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        offset
    }
}

pub struct ModBuilder {
    version: u32,
    tag: u8,
    list: StringList,
    material_count: u32,
    materials: ByteBuffer,
    vertices: Vec<[f32; 3]>,
    color: u32,
    triangles: ByteBuffer,
    triangle_count: u32,
    bone_count: u32,
}

impl ModBuilder {
    pub fn new(version: u32, tag: u8) -> Self {
        Self {
            version,
            tag,
            list: StringList::default(),
            material_count: 0,
            materials: ByteBuffer::new(),
            vertices: Vec::new(),
            color: 0,
            triangles: ByteBuffer::new(),
            triangle_count: 0,
            bone_count: 0,
        }
    }

    /// Material with string-valued properties
    pub fn material(&mut self, name: &str, shader: &str, props: &[(&str, &str)]) {
        self.materials.write_u32(self.material_count);
        self.materials.write_u32(self.list.add(name));
        self.materials.write_u32(self.list.add(shader));
        self.materials.write_u32(props.len() as u32);
        for (prop, value) in props {
            self.materials.write_u32(self.list.add(prop));
            self.materials.write_u32(2);
            self.materials.write_u32(self.list.add(value));
        }
        self.material_count += 1;
    }

    pub fn vertex(&mut self, pos: [f32; 3]) {
        self.vertices.push(pos);
    }

    /// Color of every vertex; only encoded from version 3 on
    pub fn set_color(&mut self, color: u32) {
        self.color = color;
    }

    pub fn triangle(&mut self, indices: [u32; 3], material: i32, flags: u32) {
        for i in indices {
            self.triangles.write_u32(i);
        }
        self.triangles.write_i32(material);
        self.triangles.write_u32(flags);
        self.triangle_count += 1;
    }

    pub fn bones(&mut self, count: u32) {
        self.bone_count = count;
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = ByteBuffer::new();
        out.append(b"EQG");
        out.write_u8(self.tag);
        out.write_u32(self.version);
        out.write_u32(self.list.bytes.len() as u32);
        out.write_u32(self.material_count);
        out.write_u32(self.vertices.len() as u32);
        out.write_u32(self.triangle_count);
        if self.tag == b'M' {
            out.write_u32(self.bone_count);
        }
        out.append(&self.list.bytes);
        out.append(self.materials.contents());
        for pos in &self.vertices {
            for &c in pos {
                out.write_f32(c);
            }
            for n in [0.0, 0.0, 1.0] {
                out.write_f32(n);
            }
            if self.version >= 3 {
                out.write_u32(self.color);
                out.write_f32(0.0);
                out.write_f32(0.0);
                out.write_f32(0.0);
                out.write_f32(0.0);
            } else {
                out.write_f32(0.0);
                out.write_f32(0.0);
            }
        }
        out.append(self.triangles.contents());
        if self.tag == b'M' {
            out.append(&vec![0u8; self.bone_count as usize * 56]);
        }
        out.into_inner()
    }
}

pub struct ZonBuilder {
    version: u32,
    list: StringList,
    models: Vec<u32>,
    objects: ByteBuffer,
    object_count: u32,
    regions: ByteBuffer,
    region_count: u32,
    lights: ByteBuffer,
    light_count: u32,
}

impl ZonBuilder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            list: StringList::default(),
            models: Vec::new(),
            objects: ByteBuffer::new(),
            object_count: 0,
            regions: ByteBuffer::new(),
            region_count: 0,
            lights: ByteBuffer::new(),
            light_count: 0,
        }
    }

    /// Register a model name and return its index
    pub fn model(&mut self, name: &str) -> i32 {
        let offset = self.list.add(name);
        self.models.push(offset);
        self.models.len() as i32 - 1
    }

    pub fn object(&mut self, model: i32, name: &str, pos: [f32; 3], rot: [f32; 3], scale: f32) {
        self.object_with_extra(model, name, pos, rot, scale, &[]);
    }

    pub fn object_with_extra(
        &mut self,
        model: i32,
        name: &str,
        pos: [f32; 3],
        rot: [f32; 3],
        scale: f32,
        extra: &[u32],
    ) {
        let name = self.list.add(name);
        self.objects.write_i32(model);
        self.objects.write_u32(name);
        for v in pos.into_iter().chain(rot) {
            self.objects.write_f32(v);
        }
        self.objects.write_f32(scale);
        if self.version > 1 {
            self.objects.write_u32(extra.len() as u32);
            for &e in extra {
                self.objects.write_u32(e);
            }
        }
        self.object_count += 1;
    }

    pub fn region(&mut self, name: &str, center: [f32; 3], extents: [f32; 3], flags: [u32; 2]) {
        let name = self.list.add(name);
        self.regions.write_u32(name);
        for v in center {
            self.regions.write_f32(v);
        }
        self.regions.write_f32(0.0);
        self.regions.write_u32(flags[0]);
        self.regions.write_u32(flags[1]);
        for v in extents {
            self.regions.write_f32(v);
        }
        self.region_count += 1;
    }

    pub fn light(&mut self, name: &str, pos: [f32; 3], color: [f32; 3], radius: f32) {
        let name = self.list.add(name);
        self.lights.write_u32(name);
        for v in pos.into_iter().chain(color) {
            self.lights.write_f32(v);
        }
        self.lights.write_f32(radius);
        self.light_count += 1;
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = ByteBuffer::new();
        out.append(b"EQGZ");
        out.write_u32(self.version);
        out.write_u32(self.list.bytes.len() as u32);
        out.write_u32(self.models.len() as u32);
        out.write_u32(self.object_count);
        out.write_u32(self.region_count);
        out.write_u32(self.light_count);
        out.append(&self.list.bytes);
        for &offset in &self.models {
            out.write_u32(offset);
        }
        out.append(self.objects.contents());
        out.append(self.regions.contents());
        out.append(self.lights.contents());
        out.into_inner()
    }
}

fn write_vec3(buf: &mut ByteBuffer, v: [f32; 3]) {
    for c in v {
        buf.write_f32(c);
    }
}

/// One `.dat` tile record
pub struct TileBuilder {
    lng: i32,
    lat: i32,
    quads: usize,
    pub heights: Vec<f32>,
    pub base_water_level: f32,
    placeables: ByteBuffer,
    placeable_count: i32,
    areas: ByteBuffer,
    area_count: i32,
    togs: ByteBuffer,
    tog_count: i32,
}

impl TileBuilder {
    pub fn flat(lng: i32, lat: i32, quads: usize, height: f32) -> Self {
        Self {
            lng,
            lat,
            quads,
            heights: vec![height; (quads + 1) * (quads + 1)],
            base_water_level: 0.0,
            placeables: ByteBuffer::new(),
            placeable_count: 0,
            areas: ByteBuffer::new(),
            area_count: 0,
            togs: ByteBuffer::new(),
            tog_count: 0,
        }
    }

    pub fn placeable(&mut self, name: &str, pos: [f32; 3]) {
        self.placeables.write_string(name);
        self.placeables.write_string("");
        self.placeables.write_i32(0);
        write_vec3(&mut self.placeables, pos);
        write_vec3(&mut self.placeables, [0.0; 3]);
        write_vec3(&mut self.placeables, [1.0; 3]);
        self.placeables.write_u8(0);
        self.placeable_count += 1;
    }

    pub fn area(&mut self, name: &str, area_type: i32, pos: [f32; 3], extents: [f32; 3]) {
        self.areas.write_string(name);
        self.areas.write_i32(area_type);
        self.areas.write_string("");
        write_vec3(&mut self.areas, pos);
        write_vec3(&mut self.areas, [0.0; 3]);
        write_vec3(&mut self.areas, [1.0; 3]);
        write_vec3(&mut self.areas, extents);
        self.area_count += 1;
    }

    pub fn tog(&mut self, name: &str, pos: [f32; 3]) {
        self.togs.write_string(name);
        write_vec3(&mut self.togs, pos);
        write_vec3(&mut self.togs, [0.0; 3]);
        write_vec3(&mut self.togs, [1.0; 3]);
        self.togs.write_f32(0.0);
        self.tog_count += 1;
    }

    fn encode(&self, out: &mut ByteBuffer) {
        let verts = (self.quads + 1) * (self.quads + 1);
        out.write_i32(self.lng);
        out.write_i32(self.lat);
        out.write_u32(0);
        for &h in &self.heights {
            out.write_f32(h);
        }
        for _ in 0..verts * 2 {
            out.write_u32(0xFFFF_FFFF);
        }
        out.append(&vec![0u8; self.quads * self.quads]);
        out.write_f32(self.base_water_level);
        out.write_i32(0);
        out.write_i32(0);
        out.write_i32(self.placeable_count);
        out.append(self.placeables.contents());
        out.write_i32(self.area_count);
        out.append(self.areas.contents());
        out.write_i32(0);
        out.write_i32(self.tog_count);
        out.append(self.togs.contents());
    }
}

/// `<name>.dat` terrain entry
pub struct TerrainBuilder {
    base_texture: String,
    tiles: Vec<TileBuilder>,
}

impl TerrainBuilder {
    pub fn new(base_texture: &str) -> Self {
        Self {
            base_texture: base_texture.to_string(),
            tiles: Vec::new(),
        }
    }

    pub fn tile(&mut self, tile: TileBuilder) {
        self.tiles.push(tile);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = ByteBuffer::new();
        for _ in 0..3 {
            out.write_u32(0);
        }
        out.write_string(&self.base_texture);
        out.write_u32(self.tiles.len() as u32);
        for tile in &self.tiles {
            tile.encode(&mut out);
        }
        out.into_inner()
    }
}
