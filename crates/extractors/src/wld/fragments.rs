// WLD fragment bodies - one decoder per known type code
// Every decoder reads from a child reader bounded to the fragment body.

use zone_shared::util::ByteReader;

use super::{decode_xor, NamePool};
use crate::error::{Result, ZoneError};
use crate::geometry::{Geometry, Light, Polygon, Vec3, Vertex};

/// 1-based handle into the fragment arena, 0 for "none"
pub type FragmentRef = i32;

pub const TEXTURE: u32 = 0x03;
pub const TEXTURE_BRUSH: u32 = 0x04;
pub const TEXTURE_BRUSH_REF: u32 = 0x05;
pub const SKELETON_TRACK: u32 = 0x10;
pub const SKELETON_TRACK_REF: u32 = 0x11;
pub const BONE_ORIENTATION: u32 = 0x12;
pub const BONE_ORIENTATION_REF: u32 = 0x13;
pub const ACTOR_DEF: u32 = 0x14;
pub const PLACEABLE: u32 = 0x15;
pub const LIGHT_DEF: u32 = 0x1B;
pub const LIGHT_REF: u32 = 0x1C;
pub const BSP_TREE: u32 = 0x21;
pub const BSP_LEAF: u32 = 0x22;
pub const LIGHT_INSTANCE: u32 = 0x28;
pub const BSP_REGION: u32 = 0x29;
pub const MESH_REF: u32 = 0x2D;
pub const MATERIAL: u32 = 0x30;
pub const MATERIAL_LIST: u32 = 0x31;
pub const STATIC_GEOMETRY: u32 = 0x36;

/// Polygon flag: invisible to collision
pub const POLYGON_NON_COLLIDE: u32 = 0x10;

/// Material flag set on the placeholder used for unresolvable materials
pub const MATERIAL_NO_RENDER: u32 = 0x8000_0000;

pub const PLACEHOLDER_TEXTURE: &str = "collide_dummy";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Texture {
    pub frames: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureBrush {
    pub flags: u32,
    pub textures: Vec<FragmentRef>,
}

/// Generic `ref + flags` record used by all the 0x05/0x11/0x13/0x1C/0x2D kinds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reference {
    pub target: FragmentRef,
    pub flags: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WldMaterial {
    pub flags: u32,
    pub render_mode: u32,
    pub rgb: u32,
    pub brightness: f32,
    pub ambient: f32,
    pub brush: FragmentRef,
    /// Texture frames, filled by the link pass
    pub frames: Vec<String>,
    pub material_flags: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialList {
    pub flags: u32,
    pub materials: Vec<FragmentRef>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoneTransform {
    pub rotate_denom: i16,
    pub rotate_x_num: i16,
    pub rotate_y_num: i16,
    pub rotate_z_num: i16,
    pub shift_x_num: i16,
    pub shift_y_num: i16,
    pub shift_z_num: i16,
    pub shift_denom: i16,
}

impl BoneTransform {
    /// Translation in world units
    pub fn shift(&self) -> Vec3 {
        if self.shift_denom == 0 {
            return Vec3::ZERO;
        }
        let d = self.shift_denom as f32;
        Vec3::new(
            self.shift_x_num as f32 / d,
            self.shift_y_num as f32 / d,
            self.shift_z_num as f32 / d,
        )
    }

    /// Rotation in degrees
    pub fn rotation(&self) -> Vec3 {
        if self.rotate_denom == 0 {
            return Vec3::ZERO;
        }
        let d = self.rotate_denom as f32;
        Vec3::new(
            (self.rotate_x_num as f32 / d).to_degrees(),
            (self.rotate_y_num as f32 / d).to_degrees(),
            (self.rotate_z_num as f32 / d).to_degrees(),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneOrientation {
    pub flags: u32,
    pub frame_count: u32,
    pub transform: BoneTransform,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bone {
    pub name: String,
    pub flags: u32,
    pub orientation_ref: FragmentRef,
    pub model_ref: FragmentRef,
    pub child_indices: Vec<u32>,
    /// Resolved by the link pass
    pub transform: BoneTransform,
    /// Handle of the 0x36 record this bone draws, resolved by the link pass
    pub model: Option<FragmentRef>,
    /// Indices into the owning track's bone list, resolved by the link pass
    pub children: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletonTrack {
    pub flags: u32,
    pub poly_anim: FragmentRef,
    pub bones: Vec<Bone>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActorAction {
    pub unknown: u32,
    pub lods: Vec<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActorDef {
    pub flags: u32,
    pub callback_ref: i32,
    pub bounds_ref: i32,
    pub actions: Vec<ActorAction>,
    pub refs: Vec<FragmentRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WldPlaceable {
    /// Actor name from the name pool; `None` when the pool offset is not positive
    pub actor_name: Option<String>,
    pub flags: u32,
    pub position: Vec3,
    /// Degrees
    pub rotation: Vec3,
    pub scale: Vec3,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightDef {
    pub flags: u32,
    pub frame_count: u32,
    pub current_frame: u32,
    pub sleep: u32,
    pub levels: Vec<f32>,
    pub colors: Vec<Vec3>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LightInstance {
    pub light_ref: FragmentRef,
    pub flags: u32,
    pub position: Vec3,
    pub radius: f32,
    /// Filled by the link pass when 0x1C -> 0x1B resolves
    pub light: Option<Light>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BspNode {
    pub normal: Vec3,
    pub distance: f32,
    pub region: i32,
    pub left: i32,
    pub right: i32,
    /// Region type tag, 0 until classified
    pub special: i32,
}

impl BspNode {
    pub fn is_leaf(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BspTree {
    pub nodes: Vec<BspNode>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BspLeaf {
    pub flags: u32,
    pub ambient_ref: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BspRegion {
    pub name: String,
    pub flags: u32,
    pub region_ids: Vec<i32>,
    pub alternate_name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticGeometry {
    pub flags: u32,
    pub material_list: FragmentRef,
    pub anim: FragmentRef,
    pub center: Vec3,
    pub max_distance: f32,
    pub min: Vec3,
    pub max: Vec3,
    /// Vertices, polygons and (after linking) materials
    pub geometry: Geometry,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FragmentData {
    Texture(Texture),
    TextureBrush(TextureBrush),
    TextureBrushRef(Reference),
    Material(WldMaterial),
    MaterialList(MaterialList),
    SkeletonTrack(SkeletonTrack),
    SkeletonTrackRef(Reference),
    BoneOrientation(BoneOrientation),
    BoneOrientationRef(Reference),
    ActorDef(ActorDef),
    Placeable(WldPlaceable),
    LightDef(LightDef),
    LightRef(Reference),
    LightInstance(LightInstance),
    BspTree(BspTree),
    BspLeaf(BspLeaf),
    BspRegion(BspRegion),
    MeshRef(Reference),
    StaticGeometry(StaticGeometry),
    Unknown,
}

impl FragmentData {
    pub fn kind(&self) -> &'static str {
        match self {
            FragmentData::Texture(_) => "Texture",
            FragmentData::TextureBrush(_) => "TextureBrush",
            FragmentData::TextureBrushRef(_) => "TextureBrushRef",
            FragmentData::Material(_) => "Material",
            FragmentData::MaterialList(_) => "MaterialList",
            FragmentData::SkeletonTrack(_) => "SkeletonTrack",
            FragmentData::SkeletonTrackRef(_) => "SkeletonTrackRef",
            FragmentData::BoneOrientation(_) => "BoneOrientation",
            FragmentData::BoneOrientationRef(_) => "BoneOrientationRef",
            FragmentData::ActorDef(_) => "ActorDef",
            FragmentData::Placeable(_) => "Placeable",
            FragmentData::LightDef(_) => "LightDef",
            FragmentData::LightRef(_) => "LightRef",
            FragmentData::LightInstance(_) => "LightInstance",
            FragmentData::BspTree(_) => "BspTree",
            FragmentData::BspLeaf(_) => "BspLeaf",
            FragmentData::BspRegion(_) => "BspRegion",
            FragmentData::MeshRef(_) => "MeshRef",
            FragmentData::StaticGeometry(_) => "StaticGeometry",
            FragmentData::Unknown => "Unknown",
        }
    }
}

/// Decode one fragment body. Unknown type codes yield `Unknown`.
pub fn decode(
    type_code: u32,
    name: &str,
    body: &mut ByteReader<'_>,
    pool: &NamePool,
    old_format: bool,
) -> Result<FragmentData> {
    let data = match type_code {
        TEXTURE => FragmentData::Texture(read_texture(body)?),
        TEXTURE_BRUSH => FragmentData::TextureBrush(read_texture_brush(body)?),
        TEXTURE_BRUSH_REF => FragmentData::TextureBrushRef(read_reference(body)?),
        SKELETON_TRACK => FragmentData::SkeletonTrack(read_skeleton_track(body, pool)?),
        SKELETON_TRACK_REF => FragmentData::SkeletonTrackRef(read_reference(body)?),
        BONE_ORIENTATION => FragmentData::BoneOrientation(read_bone_orientation(body)?),
        BONE_ORIENTATION_REF => FragmentData::BoneOrientationRef(read_reference(body)?),
        ACTOR_DEF => FragmentData::ActorDef(read_actor_def(body)?),
        PLACEABLE => FragmentData::Placeable(read_placeable(body, pool)?),
        LIGHT_DEF => FragmentData::LightDef(read_light_def(body)?),
        LIGHT_REF => FragmentData::LightRef(read_reference(body)?),
        BSP_TREE => FragmentData::BspTree(read_bsp_tree(body)?),
        BSP_LEAF => FragmentData::BspLeaf(BspLeaf {
            flags: body.read_u32()?,
            ambient_ref: body.read_i32()?,
        }),
        LIGHT_INSTANCE => FragmentData::LightInstance(read_light_instance(body)?),
        BSP_REGION => FragmentData::BspRegion(read_bsp_region(body, name)?),
        MESH_REF => FragmentData::MeshRef(read_reference(body)?),
        MATERIAL => FragmentData::Material(read_material(body)?),
        MATERIAL_LIST => FragmentData::MaterialList(read_material_list(body)?),
        STATIC_GEOMETRY => {
            FragmentData::StaticGeometry(read_static_geometry(body, name, old_format)?)
        }
        _ => FragmentData::Unknown,
    };
    Ok(data)
}

fn read_refs(body: &mut ByteReader<'_>, count: u32) -> Result<Vec<FragmentRef>> {
    let mut refs = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        refs.push(body.read_i32()?);
    }
    Ok(refs)
}

fn read_vec3(body: &mut ByteReader<'_>) -> Result<Vec3> {
    Ok(Vec3::from_array(body.read_f32x3()?))
}

fn read_reference(body: &mut ByteReader<'_>) -> Result<Reference> {
    Ok(Reference {
        target: body.read_i32()?,
        flags: body.read_u32()?,
    })
}

fn read_texture(body: &mut ByteReader<'_>) -> Result<Texture> {
    let count = body.read_u32()?.max(1);
    let mut frames = Vec::new();
    for _ in 0..count {
        let len = body.read_u16()? as usize;
        let decoded = decode_xor(body.bytes(len)?);
        let end = decoded.iter().position(|&b| b == 0).unwrap_or(decoded.len());
        frames.push(String::from_utf8_lossy(&decoded[..end]).to_string());
    }
    Ok(Texture { frames })
}

fn read_texture_brush(body: &mut ByteReader<'_>) -> Result<TextureBrush> {
    let flags = body.read_u32()?;
    let count = body.read_u32()?;
    if flags & 0x04 != 0 {
        body.skip(4)?;
    }
    if flags & 0x08 != 0 {
        // sleep
        body.skip(4)?;
    }
    Ok(TextureBrush {
        flags,
        textures: read_refs(body, count)?,
    })
}

fn read_skeleton_track(body: &mut ByteReader<'_>, pool: &NamePool) -> Result<SkeletonTrack> {
    let flags = body.read_u32()?;
    let track_count = body.read_u32()?;
    let poly_anim = body.read_i32()?;
    if flags & 1 != 0 {
        body.skip(12)?;
    }
    if flags & 2 != 0 {
        body.skip(4)?;
    }

    let mut bones = Vec::new();
    for _ in 0..track_count {
        let name_ref = body.read_i32()?;
        let bone_flags = body.read_u32()?;
        let orientation_ref = body.read_i32()?;
        let model_ref = body.read_i32()?;
        let child_count = body.read_u32()?;
        let mut child_indices = Vec::new();
        for _ in 0..child_count {
            child_indices.push(body.read_u32()?);
        }
        bones.push(Bone {
            name: pool.resolve(name_ref),
            flags: bone_flags,
            orientation_ref,
            model_ref,
            child_indices,
            ..Default::default()
        });
    }

    Ok(SkeletonTrack {
        flags,
        poly_anim,
        bones,
    })
}

fn read_bone_orientation(body: &mut ByteReader<'_>) -> Result<BoneOrientation> {
    let flags = body.read_u32()?;
    let frame_count = body.read_u32()?;
    let mut transform = BoneTransform::default();
    if frame_count > 0 {
        transform = BoneTransform {
            rotate_denom: body.read_i16()?,
            rotate_x_num: body.read_i16()?,
            rotate_y_num: body.read_i16()?,
            rotate_z_num: body.read_i16()?,
            shift_x_num: body.read_i16()?,
            shift_y_num: body.read_i16()?,
            shift_z_num: body.read_i16()?,
            shift_denom: body.read_i16()?,
        };
    }
    Ok(BoneOrientation {
        flags,
        frame_count,
        transform,
    })
}

fn read_actor_def(body: &mut ByteReader<'_>) -> Result<ActorDef> {
    let flags = body.read_u32()?;
    let callback_ref = body.read_i32()?;
    let action_count = body.read_u32()?;
    let ref_count = body.read_u32()?;
    let bounds_ref = body.read_i32()?;
    if flags & 1 != 0 {
        body.skip(4)?;
    }
    if flags & 2 != 0 {
        body.skip(4)?;
    }

    let mut actions = Vec::new();
    for _ in 0..action_count {
        let lod_count = body.read_u32()?;
        let unknown = body.read_u32()?;
        let mut lods = Vec::new();
        for _ in 0..lod_count {
            lods.push(body.read_f32()?);
        }
        actions.push(ActorAction { unknown, lods });
    }

    Ok(ActorDef {
        flags,
        callback_ref,
        bounds_ref,
        actions,
        refs: read_refs(body, ref_count)?,
    })
}

/// Placeable rotation is stored in 512ths of a full turn
const PLACEABLE_ROTATION_SCALE: f32 = 360.0 / 512.0;

fn read_placeable(body: &mut ByteReader<'_>, pool: &NamePool) -> Result<WldPlaceable> {
    let actor_name_ref = body.read_i32()?;
    let flags = body.read_u32()?;
    body.skip(4)?;
    let position = read_vec3(body)?;
    let rotation = read_vec3(body)? * PLACEABLE_ROTATION_SCALE;
    body.skip(4)?;
    let scale_y = body.read_f32()?;
    let scale_x = body.read_f32()?;

    let actor_name = if actor_name_ref < 0 {
        Some(pool.resolve(actor_name_ref))
    } else {
        None
    };

    Ok(WldPlaceable {
        actor_name,
        flags,
        position,
        rotation,
        scale: Vec3::new(scale_x, scale_y, scale_y),
    })
}

fn read_light_def(body: &mut ByteReader<'_>) -> Result<LightDef> {
    let flags = body.read_u32()?;
    let frame_count = body.read_u32()?;
    let mut light = LightDef {
        flags,
        frame_count,
        ..Default::default()
    };
    if flags & 0x01 != 0 {
        light.current_frame = body.read_u32()?;
    }
    if flags & 0x02 != 0 {
        light.sleep = body.read_u32()?;
    }
    if flags & 0x04 != 0 {
        for _ in 0..frame_count {
            light.levels.push(body.read_f32()?);
        }
    }
    if flags & 0x10 != 0 {
        for _ in 0..frame_count {
            light.colors.push(read_vec3(body)?);
        }
    }
    Ok(light)
}

fn read_light_instance(body: &mut ByteReader<'_>) -> Result<LightInstance> {
    Ok(LightInstance {
        light_ref: body.read_i32()?,
        flags: body.read_u32()?,
        position: read_vec3(body)?,
        radius: body.read_f32()?,
        light: None,
    })
}

fn read_bsp_tree(body: &mut ByteReader<'_>) -> Result<BspTree> {
    let count = body.read_u32()?;
    let mut nodes = Vec::with_capacity(count.min(65536) as usize);
    for _ in 0..count {
        nodes.push(BspNode {
            normal: read_vec3(body)?,
            distance: body.read_f32()?,
            region: body.read_i32()?,
            left: body.read_i32()?,
            right: body.read_i32()?,
            special: 0,
        });
    }
    Ok(BspTree { nodes })
}

fn read_bsp_region(body: &mut ByteReader<'_>, name: &str) -> Result<BspRegion> {
    let flags = body.read_u32()?;
    let region_count = body.read_u32()?;
    let mut region_ids = Vec::new();
    for _ in 0..region_count {
        region_ids.push(body.read_i32()?);
    }
    let string_len = body.read_u32()? as usize;
    let decoded = decode_xor(body.bytes(string_len)?);
    let end = decoded.iter().position(|&b| b == 0).unwrap_or(decoded.len());

    Ok(BspRegion {
        name: name.to_string(),
        flags,
        region_ids,
        alternate_name: String::from_utf8_lossy(&decoded[..end]).to_string(),
    })
}

fn read_material(body: &mut ByteReader<'_>) -> Result<WldMaterial> {
    Ok(WldMaterial {
        flags: body.read_u32()?,
        render_mode: body.read_u32()?,
        rgb: body.read_u32()?,
        brightness: body.read_f32()?,
        ambient: body.read_f32()?,
        brush: body.read_i32()?,
        frames: Vec::new(),
        material_flags: 0,
    })
}

fn read_material_list(body: &mut ByteReader<'_>) -> Result<MaterialList> {
    let flags = body.read_u32()?;
    let count = body.read_u32()?;
    Ok(MaterialList {
        flags,
        materials: read_refs(body, count)?,
    })
}

fn read_static_geometry(
    body: &mut ByteReader<'_>,
    name: &str,
    old_format: bool,
) -> Result<StaticGeometry> {
    let flags = body.read_u32()?;
    let material_list = body.read_i32()?;
    let anim = body.read_i32()?;
    body.skip(8)?;
    let center = read_vec3(body)?;
    body.skip(12)?;
    let max_distance = body.read_f32()?;
    let min = read_vec3(body)?;
    let max = read_vec3(body)?;

    let vertex_count = body.read_u16()? as usize;
    let tex_coord_count = body.read_u16()? as usize;
    let normal_count = body.read_u16()? as usize;
    let color_count = body.read_u16()? as usize;
    let polygon_count = body.read_u16()? as usize;
    let vertex_piece_count = body.read_u16()? as usize;
    let polygon_tex_count = body.read_u16()? as usize;
    let vertex_tex_count = body.read_u16()? as usize;
    let _size9 = body.read_u16()?;
    let scale = body.read_i16()?;
    let unit = 1.0 / (1u32 << (scale.clamp(0, 31) as u32)) as f32;

    let mut geometry = Geometry::named(name);
    geometry.vertices.reserve(vertex_count);
    for _ in 0..vertex_count {
        let x = body.read_i16()? as f32;
        let y = body.read_i16()? as f32;
        let z = body.read_i16()? as f32;
        geometry.vertices.push(Vertex {
            pos: center + Vec3::new(x, y, z) * unit,
            ..Default::default()
        });
    }

    for i in 0..tex_coord_count {
        let uv = if old_format {
            [body.read_i16()? as f32 / 256.0, body.read_i16()? as f32 / 256.0]
        } else {
            [body.read_f32()?, body.read_f32()?]
        };
        if let Some(v) = geometry.vertices.get_mut(i) {
            v.uv = uv;
        }
    }

    for i in 0..normal_count {
        let n = Vec3::new(
            body.read_i8()? as f32 / 127.0,
            body.read_i8()? as f32 / 127.0,
            body.read_i8()? as f32 / 127.0,
        );
        if let Some(v) = geometry.vertices.get_mut(i) {
            v.normal = n;
        }
    }

    for i in 0..color_count {
        let color = body.read_u32()?;
        if let Some(v) = geometry.vertices.get_mut(i) {
            v.color = color;
        }
    }

    for _ in 0..polygon_count {
        let poly_flags = body.read_u16()? as u32;
        let indices = [
            body.read_u16()? as u32,
            body.read_u16()? as u32,
            body.read_u16()? as u32,
        ];
        if indices.iter().any(|&i| i as usize >= vertex_count) {
            return Err(ZoneError::format(format!(
                "mesh {name}: polygon index out of range ({indices:?} of {vertex_count})"
            )));
        }
        geometry.polygons.push(Polygon {
            indices,
            flags: poly_flags,
            material: 0,
        });
    }

    body.skip(vertex_piece_count * 4)?;

    let mut polygon = 0usize;
    for _ in 0..polygon_tex_count {
        let count = body.read_u16()? as usize;
        let material = body.read_u16()? as u32;
        for p in geometry.polygons.iter_mut().skip(polygon).take(count) {
            p.material = material;
        }
        polygon += count;
    }

    body.skip(vertex_tex_count * 4)?;

    Ok(StaticGeometry {
        flags,
        material_list,
        anim,
        center,
        max_distance,
        min,
        max,
        geometry,
    })
}
