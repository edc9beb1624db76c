// EQG model - .mod / .ter mesh entries

use zone_shared::util::{cstring_at, ByteReader};

use crate::error::{Result, ZoneError};
use crate::geometry::{Geometry, Material, MaterialProperty, Polygon, PropertyValue, Vec3, Vertex};
use crate::pfs::Archive;

/// Triangle flag: invisible to collision
pub const TRIANGLE_NON_COLLIDE: u32 = 0x01;

const BONE_RECORD_SIZE: usize = 56;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    /// `EQGM`, carries a bone table
    Animated,
    /// `EQGT`
    Static,
}

/// Parse a model entry into a named geometry
pub fn parse(data: &[u8], name: &str) -> Result<Geometry> {
    let mut reader = ByteReader::new(data);
    let magic = reader.bytes(4)?;
    if &magic[..3] != b"EQG" {
        return Err(ZoneError::format(format!("{name}: bad model magic")));
    }
    let kind = match magic[3] {
        b'M' => ModelKind::Animated,
        b'T' => ModelKind::Static,
        other => {
            return Err(ZoneError::format(format!(
                "{name}: unknown model tag {:?}",
                other as char
            )));
        }
    };

    let version = reader.read_u32()?;
    let list_length = reader.read_u32()? as usize;
    let material_count = reader.read_u32()?;
    let vertex_count = reader.read_u32()? as usize;
    let triangle_count = reader.read_u32()?;
    let bone_count = match kind {
        ModelKind::Animated => reader.read_u32()? as usize,
        ModelKind::Static => 0,
    };
    let list = reader.bytes(list_length)?;

    let mut geometry = Geometry::named(name);

    for _ in 0..material_count {
        let _index = reader.read_u32()?;
        let material_name = cstring_at(list, reader.read_u32()? as usize);
        let shader = cstring_at(list, reader.read_u32()? as usize);
        let property_count = reader.read_u32()?;

        let mut material = Material {
            name: material_name,
            shader,
            ..Default::default()
        };
        for _ in 0..property_count {
            let prop_name = cstring_at(list, reader.read_u32()? as usize);
            let prop_type = reader.read_u32()?;
            let value = match prop_type {
                0 => PropertyValue::Float(reader.read_f32()?),
                2 => PropertyValue::String(cstring_at(list, reader.read_u32()? as usize)),
                _ => PropertyValue::Int(reader.read_u32()?),
            };
            if let PropertyValue::String(texture) = &value {
                if prop_name.starts_with("e_Texture") {
                    material.frames.push(texture.clone());
                }
            }
            material.properties.push(MaterialProperty {
                name: prop_name,
                value,
            });
        }
        geometry.materials.push(material);
    }

    geometry.vertices.reserve(vertex_count.min(1 << 20));
    for _ in 0..vertex_count {
        let pos = Vec3::from_array(reader.read_f32x3()?);
        let normal = Vec3::from_array(reader.read_f32x3()?);
        let (color, uv) = if version < 3 {
            (0, [reader.read_f32()?, reader.read_f32()?])
        } else {
            let color = reader.read_u32()?;
            let uv = [reader.read_f32()?, reader.read_f32()?];
            reader.skip(8)?;
            (color, uv)
        };
        geometry.vertices.push(Vertex {
            pos,
            uv,
            normal,
            color,
        });
    }

    for _ in 0..triangle_count {
        let indices = [reader.read_u32()?, reader.read_u32()?, reader.read_u32()?];
        let material = reader.read_i32()?;
        let flags = reader.read_u32()?;
        if indices.iter().any(|&i| i as usize >= vertex_count) {
            return Err(ZoneError::format(format!(
                "{name}: triangle index out of range ({indices:?} of {vertex_count})"
            )));
        }
        geometry.polygons.push(Polygon {
            indices,
            flags,
            material: material as u32,
        });
    }

    reader.skip(bone_count * BONE_RECORD_SIZE)?;

    Ok(geometry)
}

/// Load `name` from the archive. A missing or unreadable entry yields an
/// empty geometry carrying the name.
pub fn load(archive: Option<&Archive>, name: &str) -> Geometry {
    let Some(archive) = archive else {
        return Geometry::named(name);
    };
    let data = match archive.get(name) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("Model {} unavailable: {}", name, e);
            return Geometry::named(name);
        }
    };
    match parse(&data, name) {
        Ok(geometry) => geometry,
        Err(e) => {
            tracing::warn!("Model {} failed to parse: {}", name, e);
            Geometry::named(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ModBuilder;
    use pretty_assertions::assert_eq;

    fn triangle(version: u32, tag: u8) -> ModBuilder {
        let mut builder = ModBuilder::new(version, tag);
        builder.material("rock", "Opaque_MaxCB1.fx", &[("e_TextureDiffuse0", "rock.dds")]);
        builder.vertex([0.0, 0.0, 0.0]);
        builder.vertex([1.0, 0.0, 0.0]);
        builder.vertex([0.0, 1.0, 0.0]);
        builder.triangle([0, 1, 2], 0, TRIANGLE_NON_COLLIDE);
        builder
    }

    #[test]
    fn test_parse_without_vertex_colors() {
        let geometry = parse(&triangle(2, b'T').build(), "rock.mod").unwrap();
        assert_eq!(geometry.name, "rock.mod");
        assert_eq!(geometry.vertices.len(), 3);
        assert_eq!(geometry.vertices[1].pos, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(geometry.vertices[1].color, 0);
        assert_eq!(geometry.polygons.len(), 1);
        assert_eq!(geometry.polygons[0].flags, TRIANGLE_NON_COLLIDE);
        assert_eq!(geometry.materials[0].shader, "Opaque_MaxCB1.fx");
        assert_eq!(geometry.materials[0].frames, vec!["rock.dds".to_string()]);
    }

    #[test]
    fn test_parse_with_vertex_colors() {
        let mut builder = triangle(3, b'T');
        builder.set_color(0xFF80_4020);
        let geometry = parse(&builder.build(), "rock.mod").unwrap();
        assert_eq!(geometry.vertices.len(), 3);
        assert_eq!(geometry.vertices[2].pos, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(geometry.vertices[2].color, 0xFF80_4020);
    }

    #[test]
    fn test_animated_model_skips_bones() {
        let mut builder = triangle(1, b'M');
        builder.bones(2);
        let geometry = parse(&builder.build(), "orc.mod").unwrap();
        assert_eq!(geometry.polygons.len(), 1);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let data = triangle(1, b'X').build();
        assert!(matches!(parse(&data, "x.mod"), Err(ZoneError::Format(_))));
    }

    #[test]
    fn test_index_out_of_range_is_rejected() {
        let mut builder = triangle(1, b'T');
        builder.triangle([0, 1, 9], 0, 0);
        assert!(matches!(
            parse(&builder.build(), "x.mod"),
            Err(ZoneError::Format(_))
        ));
    }

    #[test]
    fn test_missing_model_is_empty() {
        let archive = Archive::new();
        let geometry = load(Some(&archive), "nothing.mod");
        assert_eq!(geometry, Geometry::named("nothing.mod"));

        let mut archive = Archive::new();
        archive.set("broken.mod", b"EQGT\x01").unwrap();
        assert!(load(Some(&archive), "broken.mod").is_empty());
    }
}
