// zone-extractors - zone archive readers and geometry compilers
// - PFS archives and the S3D/WLD fragment stream
// - EQG v1-3 scenes and models, EQG v4 terrain
// - `.map` collision geometry and `.wtr` water/region output

pub mod compression;
pub mod eqg;
pub mod error;
pub mod geometry;
pub mod map;
pub mod pfs;
pub mod s3d;
pub mod water;
pub mod wld;

#[cfg(test)]
mod test_support;

pub use error::{Result, ZoneError};
