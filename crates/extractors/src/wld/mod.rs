// WLD - fragment stream parser
// Decodes a stream into an arena of typed records, then links the
// cross-record handles in a second pass.

pub mod fragments;

use zone_shared::util::{cstring_at, BufferError, ByteReader};

use crate::error::{Result, ZoneError};
use crate::geometry::{Light, Material, Vec3};

pub use fragments::{
    ActorDef, Bone, BoneTransform, BspNode, BspRegion, BspTree, FragmentData, FragmentRef,
    SkeletonTrack, StaticGeometry, WldPlaceable, MATERIAL_NO_RENDER, PLACEHOLDER_TEXTURE,
    POLYGON_NON_COLLIDE,
};

pub const WLD_MAGIC: u32 = 0x5450_3D02;
pub const WLD_VERSION_OLD: u32 = 0x0001_5500;

const XOR_KEY: [u8; 8] = [0x95, 0x3A, 0xC5, 0x2A, 0x95, 0x7A, 0x95, 0x6A];

/// Apply the string cipher. The operation is its own inverse.
pub fn decode_xor(data: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, &b)| b ^ XOR_KEY[i % XOR_KEY.len()])
        .collect()
}

/// Decoded string pool addressed by negated byte offsets
#[derive(Clone, Debug, Default)]
pub struct NamePool {
    bytes: Vec<u8>,
}

impl NamePool {
    pub fn new(encoded: &[u8]) -> Self {
        Self {
            bytes: decode_xor(encoded),
        }
    }

    /// Resolve a name reference; only negative values address the pool
    pub fn resolve(&self, name_ref: i32) -> String {
        if name_ref >= 0 {
            return String::new();
        }
        cstring_at(&self.bytes, name_ref.unsigned_abs() as usize)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    pub type_code: u32,
    pub name: String,
    pub data: FragmentData,
}

#[derive(Clone, Debug, Default)]
pub struct WldFile {
    pub old_format: bool,
    pub region_count: u32,
    pub fragments: Vec<Fragment>,
}

impl WldFile {
    /// Parse a whole stream. Header, name pool and sub-header failures are
    /// fatal; a body that fails to decode is recorded as `Unknown`.
    pub fn parse(data: &[u8]) -> Result<WldFile> {
        let mut reader = ByteReader::new(data);
        let magic = reader.read_u32()?;
        if magic != WLD_MAGIC {
            return Err(ZoneError::format(format!(
                "bad WLD magic {magic:#010x}"
            )));
        }
        let version = reader.read_u32()?;
        let fragment_count = reader.read_u32()?;
        let region_count = reader.read_u32()?;
        let _max_object_bytes = reader.read_u32()?;
        let hash_length = reader.read_u32()? as usize;
        let _unknown = reader.read_u32()?;

        let old_format = version == WLD_VERSION_OLD;
        let pool = NamePool::new(reader.bytes(hash_length)?);

        let mut fragments = Vec::with_capacity(fragment_count.min(1 << 20) as usize);
        for index in 0..fragment_count {
            let size = reader.read_u32()? as usize;
            let type_code = reader.read_u32()?;
            let name_ref = reader.read_i32()?;
            if size < 4 {
                return Err(BufferError::Truncated {
                    offset: reader.position(),
                    wanted: size,
                    len: reader.len(),
                }
                .into());
            }
            let mut body = reader.sub_reader(size - 4)?;
            let name = pool.resolve(name_ref);

            let data = match fragments::decode(type_code, &name, &mut body, &pool, old_format) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        "Fragment {} (type {:#04x}, '{}') failed to decode: {}",
                        index + 1,
                        type_code,
                        name,
                        e
                    );
                    FragmentData::Unknown
                }
            };
            fragments.push(Fragment {
                type_code,
                name,
                data,
            });
        }

        let mut wld = WldFile {
            old_format,
            region_count,
            fragments,
        };
        wld.link();
        tracing::debug!(
            "Parsed WLD stream: {} fragments, old format: {}",
            wld.fragments.len(),
            wld.old_format
        );
        Ok(wld)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    fn slot(&self, handle: FragmentRef) -> Option<usize> {
        if handle <= 0 || handle as usize > self.fragments.len() {
            return None;
        }
        Some(handle as usize - 1)
    }

    /// Record for a 1-based handle
    pub fn fragment(&self, handle: FragmentRef) -> Result<&Fragment> {
        self.slot(handle)
            .map(|i| &self.fragments[i])
            .ok_or_else(|| ZoneError::format(format!("fragment handle {handle} out of range")))
    }

    fn data(&self, handle: FragmentRef) -> Option<&FragmentData> {
        self.slot(handle).map(|i| &self.fragments[i].data)
    }

    fn typed<'a, T>(
        &'a self,
        handle: FragmentRef,
        expected: &'static str,
        pick: impl Fn(&'a FragmentData) -> Option<&'a T>,
    ) -> Result<&'a T> {
        let fragment = self.fragment(handle)?;
        pick(&fragment.data).ok_or(ZoneError::WrongKind {
            handle,
            expected,
            found: fragment.data.kind(),
        })
    }

    pub fn geometry(&self, handle: FragmentRef) -> Result<&StaticGeometry> {
        self.typed(handle, "StaticGeometry", |d| match d {
            FragmentData::StaticGeometry(g) => Some(g),
            _ => None,
        })
    }

    pub fn skeleton(&self, handle: FragmentRef) -> Result<&SkeletonTrack> {
        self.typed(handle, "SkeletonTrack", |d| match d {
            FragmentData::SkeletonTrack(s) => Some(s),
            _ => None,
        })
    }

    pub fn actor_def(&self, handle: FragmentRef) -> Result<&ActorDef> {
        self.typed(handle, "ActorDef", |d| match d {
            FragmentData::ActorDef(a) => Some(a),
            _ => None,
        })
    }

    pub fn bsp_tree(&self, handle: FragmentRef) -> Result<&BspTree> {
        self.typed(handle, "BspTree", |d| match d {
            FragmentData::BspTree(t) => Some(t),
            _ => None,
        })
    }

    /// Handles and records of every fragment with the given type code
    pub fn of_type(&self, type_code: u32) -> impl Iterator<Item = (FragmentRef, &Fragment)> {
        self.fragments
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.type_code == type_code)
            .map(|(i, f)| ((i + 1) as FragmentRef, f))
    }

    pub fn placeables(&self) -> impl Iterator<Item = &WldPlaceable> {
        self.fragments.iter().filter_map(|f| match &f.data {
            FragmentData::Placeable(p) => Some(p),
            _ => None,
        })
    }

    pub fn bsp_regions(&self) -> impl Iterator<Item = &BspRegion> {
        self.fragments.iter().filter_map(|f| match &f.data {
            FragmentData::BspRegion(r) => Some(r),
            _ => None,
        })
    }

    pub fn lights(&self) -> impl Iterator<Item = &Light> {
        self.fragments.iter().filter_map(|f| match &f.data {
            FragmentData::LightInstance(l) => l.light.as_ref(),
            _ => None,
        })
    }

    /// First BSP tree in the stream
    pub fn first_bsp_tree(&self) -> Option<&BspTree> {
        self.fragments.iter().find_map(|f| match &f.data {
            FragmentData::BspTree(t) => Some(t),
            _ => None,
        })
    }

    // Link pass

    fn link(&mut self) {
        self.link_materials();
        self.link_geometry_materials();
        self.link_skeletons();
        self.link_lights();
    }

    /// Texture frames behind a 0x05 -> 0x04 -> 0x03 chain
    fn resolve_brush(&self, handle: FragmentRef) -> Option<Vec<String>> {
        let brush = match self.data(handle)? {
            FragmentData::TextureBrushRef(r) => match self.data(r.target)? {
                FragmentData::TextureBrush(b) => b,
                _ => return None,
            },
            _ => return None,
        };
        let mut frames = Vec::new();
        for &texture in &brush.textures {
            match self.data(texture)? {
                FragmentData::Texture(t) => frames.extend(t.frames.iter().cloned()),
                _ => return None,
            }
        }
        if frames.is_empty() {
            return None;
        }
        Some(frames)
    }

    fn link_materials(&mut self) {
        let mut resolved = Vec::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            if let FragmentData::Material(m) = &fragment.data {
                let frames = if m.render_mode == 0 {
                    None
                } else {
                    self.resolve_brush(m.brush)
                };
                resolved.push((i, frames));
            }
        }
        for (i, frames) in resolved {
            if let FragmentData::Material(m) = &mut self.fragments[i].data {
                match frames {
                    Some(frames) => m.frames = frames,
                    None => {
                        m.frames = vec![PLACEHOLDER_TEXTURE.to_string()];
                        m.material_flags |= MATERIAL_NO_RENDER;
                    }
                }
            }
        }
    }

    fn material_for(&self, handle: FragmentRef) -> Material {
        match self.slot(handle).map(|i| &self.fragments[i]) {
            Some(Fragment {
                name,
                data: FragmentData::Material(m),
                ..
            }) => Material {
                name: name.clone(),
                shader: String::new(),
                frames: m.frames.clone(),
                flags: m.material_flags,
                properties: Vec::new(),
            },
            _ => Material {
                name: PLACEHOLDER_TEXTURE.to_string(),
                frames: vec![PLACEHOLDER_TEXTURE.to_string()],
                flags: MATERIAL_NO_RENDER,
                ..Default::default()
            },
        }
    }

    fn link_geometry_materials(&mut self) {
        let mut resolved = Vec::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            if let FragmentData::StaticGeometry(g) = &fragment.data {
                let materials = match self.data(g.material_list) {
                    Some(FragmentData::MaterialList(list)) => list
                        .materials
                        .iter()
                        .map(|&m| self.material_for(m))
                        .collect(),
                    _ => Vec::new(),
                };
                resolved.push((i, materials));
            }
        }
        for (i, materials) in resolved {
            if let FragmentData::StaticGeometry(g) = &mut self.fragments[i].data {
                g.geometry.materials = materials;
            }
        }
    }

    fn link_skeletons(&mut self) {
        struct BoneLinks {
            transform: BoneTransform,
            model: Option<FragmentRef>,
        }

        let mut resolved = Vec::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            let FragmentData::SkeletonTrack(track) = &fragment.data else {
                continue;
            };
            let mut links = Vec::with_capacity(track.bones.len());
            let mut pairs = Vec::new();
            for (index, bone) in track.bones.iter().enumerate() {
                let transform = match self.data(bone.orientation_ref) {
                    Some(FragmentData::BoneOrientationRef(r)) => match self.data(r.target) {
                        Some(FragmentData::BoneOrientation(o)) => o.transform,
                        _ => BoneTransform::default(),
                    },
                    _ => BoneTransform::default(),
                };
                let model = match self.data(bone.model_ref) {
                    Some(FragmentData::MeshRef(r)) => match self.data(r.target) {
                        Some(FragmentData::StaticGeometry(_)) => Some(r.target),
                        _ => None,
                    },
                    _ => None,
                };
                links.push(BoneLinks { transform, model });
                for &child in &bone.child_indices {
                    pairs.push((index, child as usize));
                }
            }
            resolved.push((i, links, pairs));
        }

        for (i, links, pairs) in resolved {
            let fragment = &mut self.fragments[i];
            if let FragmentData::SkeletonTrack(track) = &mut fragment.data {
                for (bone, link) in track.bones.iter_mut().zip(links) {
                    bone.transform = link.transform;
                    bone.model = link.model;
                }
                let bone_count = track.bones.len();
                for (parent, child) in pairs {
                    if child < bone_count && child != parent {
                        track.bones[parent].children.push(child);
                    } else {
                        tracing::warn!(
                            "Skeleton '{}' bone {} has invalid child {}",
                            fragment.name,
                            parent,
                            child
                        );
                    }
                }
            }
        }
    }

    fn link_lights(&mut self) {
        let mut resolved = Vec::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            let FragmentData::LightInstance(instance) = &fragment.data else {
                continue;
            };
            let def = match self.data(instance.light_ref) {
                Some(FragmentData::LightRef(r)) => match self.slot(r.target) {
                    Some(slot) => match &self.fragments[slot].data {
                        FragmentData::LightDef(def) => {
                            Some((self.fragments[slot].name.clone(), def))
                        }
                        _ => None,
                    },
                    None => None,
                },
                _ => None,
            };
            if let Some((name, def)) = def {
                resolved.push((
                    i,
                    Light {
                        name,
                        position: instance.position,
                        color: def.colors.first().copied().unwrap_or(Vec3::ONE),
                        radius: instance.radius,
                    },
                ));
            }
        }
        for (i, light) in resolved {
            if let FragmentData::LightInstance(instance) = &mut self.fragments[i].data {
                instance.light = Some(light);
            }
        }
    }
}
