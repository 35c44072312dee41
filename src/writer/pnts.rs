//! Point cloud tile encoding in the 3D Tiles 1.0 `.pnts` format.

use crate::error::Result;
use crate::tree::Node;
use crate::writer::{TileEncoder, TilesetVersion};
use byteorder::{LittleEndian, WriteBytesExt};

const HEADER_LENGTH: usize = 28;

/// Encodes a node as a `content.pnts` tile: a feature table carrying the
/// float32 positions and 8 bit colors, plus a batch table carrying per point
/// intensity and classification.
pub struct PntsEncoder;

impl TileEncoder for PntsEncoder {
    fn filename(&self) -> &'static str {
        "content.pnts"
    }

    fn tileset_version(&self) -> TilesetVersion {
        TilesetVersion::V1_0
    }

    fn encode(&self, node: &Node) -> Result<Vec<u8>> {
        let n = node.local_points();
        let feature_table = feature_table_json(n);
        let batch_table = batch_table_json(n);
        // positions as 3 float32, colors as 3 bytes
        let feature_table_binary_length = 12 * n + 3 * n;
        // intensity and classification, one byte each
        let batch_table_binary_length = 2 * n;
        let total = HEADER_LENGTH
            + feature_table.len()
            + feature_table_binary_length
            + batch_table.len()
            + batch_table_binary_length;

        let mut w = Vec::with_capacity(total);
        w.extend_from_slice(b"pnts");
        w.write_u32::<LittleEndian>(1)?; // container version
        w.write_u32::<LittleEndian>(total as u32)?;
        w.write_u32::<LittleEndian>(feature_table.len() as u32)?;
        w.write_u32::<LittleEndian>(feature_table_binary_length as u32)?;
        w.write_u32::<LittleEndian>(batch_table.len() as u32)?;
        w.write_u32::<LittleEndian>(batch_table_binary_length as u32)?;

        w.extend_from_slice(feature_table.as_bytes());
        // positions are written as raw local frame coordinates, the node
        // transform in the tileset manifest carries the geo-referencing
        for pt in node.points() {
            w.write_f32::<LittleEndian>(pt.x)?;
            w.write_f32::<LittleEndian>(pt.y)?;
            w.write_f32::<LittleEndian>(pt.z)?;
        }
        for pt in node.points() {
            w.extend_from_slice(&[pt.r, pt.g, pt.b]);
        }

        w.extend_from_slice(batch_table.as_bytes());
        for pt in node.points() {
            w.push(pt.intensity);
        }
        for pt in node.points() {
            w.push(pt.classification);
        }
        Ok(w)
    }
}

/// The feature table declares the point count and where positions and colors
/// start in the binary body. Space padded to a multiple of four bytes.
fn feature_table_json(points: usize) -> String {
    let mut s = format!(
        r#"{{"POINTS_LENGTH":{points},"POSITION":{{"byteOffset":0}},"RGB":{{"byteOffset":{}}}}}"#,
        points * 12
    );
    pad_to_four(&mut s);
    s
}

/// The batch table declares the per point intensity and classification
/// scalars. Space padded to a multiple of four bytes.
fn batch_table_json(points: usize) -> String {
    let mut s = format!(
        r#"{{"INTENSITY":{{"byteOffset":0,"componentType":"UNSIGNED_BYTE","type":"SCALAR"}},"CLASSIFICATION":{{"byteOffset":{points},"componentType":"UNSIGNED_BYTE","type":"SCALAR"}}}}"#
    );
    pad_to_four(&mut s);
    s
}

fn pad_to_four(s: &mut String) {
    while s.len() % 4 != 0 {
        s.push(' ');
    }
}
