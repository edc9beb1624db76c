// Geometry - in-memory model produced by every loader family

use std::ops::{Add, Mul, Sub};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vec3 = Vec3 { x: 1.0, y: 1.0, z: 1.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Exchange the X and Y components
    pub fn swap_xy(self) -> Self {
        Self::new(self.y, self.x, self.z)
    }

    /// Component-wise product
    pub fn scale(self, s: Vec3) -> Self {
        Self::new(self.x * s.x, self.y * s.y, self.z * s.z)
    }

    /// Bit pattern of the three components, used as an exact hash key
    pub fn bits(self) -> [u32; 3] {
        [self.x.to_bits(), self.y.to_bits(), self.z.to_bits()]
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
}

/// Rotate `v` about X, then Y, then Z by the given angles in degrees
pub fn rotate_vertex(v: Vec3, rot_deg: Vec3) -> Vec3 {
    let (sx, cx) = rot_deg.x.to_radians().sin_cos();
    let (sy, cy) = rot_deg.y.to_radians().sin_cos();
    let (sz, cz) = rot_deg.z.to_radians().sin_cos();

    let mut p = v;
    if rot_deg.x != 0.0 {
        p = Vec3::new(p.x, p.y * cx - p.z * sx, p.y * sx + p.z * cx);
    }
    if rot_deg.y != 0.0 {
        p = Vec3::new(p.x * cy + p.z * sy, p.y, -p.x * sy + p.z * cy);
    }
    if rot_deg.z != 0.0 {
        p = Vec3::new(p.x * cz - p.y * sz, p.x * sz + p.y * cz, p.z);
    }
    p
}

/// Full placement: rotate, then scale, then translate
pub fn transform_vertex(v: Vec3, position: Vec3, rotation: Vec3, scale: Vec3) -> Vec3 {
    rotate_vertex(v, rotation).scale(scale) + position
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub pos: Vec3,
    pub uv: [f32; 2],
    pub normal: Vec3,
    pub color: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Polygon {
    pub indices: [u32; 3],
    pub flags: u32,
    pub material: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Int(u32),
    String(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialProperty {
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Material {
    pub name: String,
    pub shader: String,
    /// Texture file names, one per animation frame
    pub frames: Vec<String>,
    pub flags: u32,
    pub properties: Vec<MaterialProperty>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub polygons: Vec<Polygon>,
    pub materials: Vec<Material>,
}

impl Geometry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Whether every polygon only references existing vertices
    pub fn indices_valid(&self) -> bool {
        let count = self.vertices.len() as u32;
        self.polygons
            .iter()
            .all(|p| p.indices.iter().all(|&i| i < count))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Placeable {
    pub model_name: String,
    pub position: Vec3,
    /// Degrees
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Placeable {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlaceableGroup {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    /// Origin of the terrain tile the group was placed on
    pub tile_position: Option<Vec3>,
    pub placeables: Vec<Placeable>,
}

impl Default for PlaceableGroup {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            tile_position: None,
            placeables: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub name: String,
    pub position: Vec3,
    pub color: Vec3,
    pub radius: f32,
}

/// Axis-aligned volume with a name, used for water/lava/zone-line areas
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub name: String,
    pub flags: [u32; 2],
    /// Numeric area type from v4 terrain, 0 elsewhere
    pub area_type: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    pub extents: Vec3,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: [0, 0],
            area_type: 0,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            extents: Vec3::ZERO,
        }
    }
}
