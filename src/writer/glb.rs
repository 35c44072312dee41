//! Point cloud tile encoding as binary glTF, used by 3D Tiles 1.1.
//!
//! Each tile is a glTF 2.0 document with a single POINTS mesh primitive.
//! Intensity and classification ride along as the custom `_INTENSITY` and
//! `_CLASSIFICATION` attributes, described through the
//! `EXT_structural_metadata` extension so that Cesium can style on them.

use crate::error::Result;
use crate::tree::Node;
use crate::writer::{TileEncoder, TilesetVersion};
use byteorder::{LittleEndian, WriteBytesExt};
use serde_json::json;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_F32: u32 = 5126;
const COMPONENT_U8: u32 = 5121;
const COMPONENT_U16: u32 = 5123;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const MODE_POINTS: u32 = 0;

// glTF is Y up while Cesium is Z up, this node matrix rotates between the two
const YUP_TO_ZUP: [f64; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

/// Encodes a node as a `content.glb` tile
pub struct GlbEncoder;

impl TileEncoder for GlbEncoder {
    fn filename(&self) -> &'static str {
        "content.glb"
    }

    fn tileset_version(&self) -> TilesetVersion {
        TilesetVersion::V1_1
    }

    fn encode(&self, node: &Node) -> Result<Vec<u8>> {
        let n = node.local_points();

        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        let mut bin = Vec::with_capacity(n * 20);
        for pt in node.points() {
            for (axis, c) in [pt.x, pt.y, pt.z].into_iter().enumerate() {
                min[axis] = min[axis].min(c);
                max[axis] = max[axis].max(c);
            }
            bin.write_f32::<LittleEndian>(pt.x)?;
            bin.write_f32::<LittleEndian>(pt.y)?;
            bin.write_f32::<LittleEndian>(pt.z)?;
        }

        let colors_offset = bin.len();
        for pt in node.points() {
            // LAS colors are sRGB but glTF requires COLOR_0 in linear space
            bin.extend_from_slice(&[
                srgb_to_linear(pt.r),
                srgb_to_linear(pt.g),
                srgb_to_linear(pt.b),
            ]);
        }
        pad_chunk(&mut bin, 0);

        let intensity_offset = bin.len();
        for pt in node.points() {
            bin.write_u16::<LittleEndian>(pt.intensity as u16)?;
        }
        pad_chunk(&mut bin, 0);

        let classification_offset = bin.len();
        for pt in node.points() {
            bin.write_u16::<LittleEndian>(pt.classification as u16)?;
        }
        pad_chunk(&mut bin, 0);

        let document = json!({
            "asset": {
                "version": "2.0",
                "generator": format!("cesium-tiler {}", crate::VERSION)
            },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [{
                "name": "PointCloud",
                "mesh": 0,
                "matrix": YUP_TO_ZUP
            }],
            "meshes": [{
                "name": "PointCloud",
                "primitives": [{
                    "mode": MODE_POINTS,
                    "attributes": {
                        "POSITION": 0,
                        "COLOR_0": 1,
                        "_INTENSITY": 2,
                        "_CLASSIFICATION": 3
                    },
                    "extensions": {
                        "EXT_structural_metadata": { "propertyAttributes": [0] }
                    }
                }]
            }],
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                {
                    "buffer": 0,
                    "byteOffset": 0,
                    "byteLength": 12 * n,
                    "target": TARGET_ARRAY_BUFFER
                },
                {
                    "buffer": 0,
                    "byteOffset": colors_offset,
                    "byteLength": 3 * n,
                    "target": TARGET_ARRAY_BUFFER
                },
                {
                    "buffer": 0,
                    "byteOffset": intensity_offset,
                    "byteLength": 2 * n,
                    "target": TARGET_ARRAY_BUFFER
                },
                {
                    "buffer": 0,
                    "byteOffset": classification_offset,
                    "byteLength": 2 * n,
                    "target": TARGET_ARRAY_BUFFER
                }
            ],
            "accessors": [
                {
                    "bufferView": 0,
                    "componentType": COMPONENT_F32,
                    "count": n,
                    "type": "VEC3",
                    "min": min,
                    "max": max
                },
                {
                    "bufferView": 1,
                    "componentType": COMPONENT_U8,
                    "normalized": true,
                    "count": n,
                    "type": "VEC3"
                },
                {
                    "bufferView": 2,
                    "componentType": COMPONENT_U16,
                    "count": n,
                    "type": "SCALAR"
                },
                {
                    "bufferView": 3,
                    "componentType": COMPONENT_U16,
                    "count": n,
                    "type": "SCALAR"
                }
            ],
            "extensionsUsed": ["EXT_structural_metadata"],
            "extensions": {
                "EXT_structural_metadata": metadata_schema()
            }
        });

        let mut json_chunk = serde_json::to_vec(&document).map_err(|e| {
            crate::error::Error::InvariantViolation(format!("glTF serialization failed: {e}"))
        })?;
        pad_chunk(&mut json_chunk, b' ');

        let total = 12 + 8 + json_chunk.len() + 8 + bin.len();
        let mut w = Vec::with_capacity(total);
        w.write_u32::<LittleEndian>(GLB_MAGIC)?;
        w.write_u32::<LittleEndian>(2)?; // glTF container version
        w.write_u32::<LittleEndian>(total as u32)?;
        w.write_u32::<LittleEndian>(json_chunk.len() as u32)?;
        w.write_u32::<LittleEndian>(CHUNK_JSON)?;
        w.extend_from_slice(&json_chunk);
        w.write_u32::<LittleEndian>(bin.len() as u32)?;
        w.write_u32::<LittleEndian>(CHUNK_BIN)?;
        w.extend_from_slice(&bin);
        Ok(w)
    }
}

/// The static schema describing the per point attributes carried through
/// `EXT_structural_metadata`
fn metadata_schema() -> serde_json::Value {
    json!({
        "schema": {
            "id": "pts_schema",
            "name": "pts_schema",
            "description": "point cloud point attribute schema",
            "version": "1.0.0",
            "classes": {
                "point": {
                    "name": "point",
                    "description": "Properties of point cloud points",
                    "properties": {
                        "INTENSITY": {
                            "description": "Laser intensity",
                            "type": "SCALAR",
                            "componentType": "UINT16",
                            "required": true
                        },
                        "CLASSIFICATION": {
                            "description": "Point classification",
                            "type": "SCALAR",
                            "componentType": "UINT16",
                            "required": true
                        }
                    }
                }
            }
        },
        "propertyAttributes": [{
            "class": "point",
            "properties": {
                "INTENSITY": { "attribute": "_INTENSITY" },
                "CLASSIFICATION": { "attribute": "_CLASSIFICATION" }
            }
        }]
    })
}

fn srgb_to_linear(c: u8) -> u8 {
    (255.0 * (c as f64 / 255.0).powf(2.2)).round() as u8
}

fn pad_chunk(chunk: &mut Vec<u8>, filler: u8) {
    while chunk.len() % 4 != 0 {
        chunk.push(filler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_conversion_endpoints() {
        assert_eq!(srgb_to_linear(0), 0);
        assert_eq!(srgb_to_linear(255), 255);
        // mid gray gets darker in linear space
        assert!(srgb_to_linear(128) < 128);
        assert_eq!(srgb_to_linear(128), 56);
    }

    #[test]
    fn chunks_pad_to_four_bytes() {
        let mut chunk = vec![1u8, 2, 3];
        pad_chunk(&mut chunk, b' ');
        assert_eq!(chunk.len(), 4);
        assert_eq!(chunk[3], b' ');
        pad_chunk(&mut chunk, b' ');
        assert_eq!(chunk.len(), 4);
    }

    #[test]
    fn metadata_schema_links_the_custom_attributes() {
        let schema = metadata_schema();
        assert_eq!(
            schema["propertyAttributes"][0]["properties"]["INTENSITY"]["attribute"],
            "_INTENSITY"
        );
        assert_eq!(
            schema["schema"]["classes"]["point"]["properties"]["CLASSIFICATION"]["componentType"],
            "UINT16"
        );
    }
}
