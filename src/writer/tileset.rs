//! Serializable tileset.json entities, as defined by the Cesium 3D Tiles
//! specification.

use crate::tree::Node;
use crate::writer::TilesetVersion;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Asset {
    pub version: String,
}

#[derive(Serialize, Debug)]
pub struct Content {
    pub uri: String,
}

#[derive(Serialize, Debug)]
pub struct BoundingVolume {
    #[serde(rename = "box")]
    pub cesium_box: [f64; 12],
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub content: Content,
    pub bounding_volume: BoundingVolume,
    pub geometric_error: f64,
    pub refine: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Child>,
    pub content: Content,
    pub bounding_volume: BoundingVolume,
    pub geometric_error: f64,
    pub refine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 16]>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
    pub asset: Asset,
    pub geometric_error: f64,
    pub root: Root,
}

const REFINE_ADD: &str = "ADD";

/// Builds the tileset manifest for a node. The `transform` property is only
/// emitted on the tree root, and only when it differs from the identity: it
/// is what geo-references the local frame coordinates stored in the tiles.
pub(crate) fn tileset_for_node(
    node: &Node,
    content_filename: &str,
    version: &TilesetVersion,
) -> Tileset {
    let mut children = Vec::new();
    for (octant, child) in node.children().iter().enumerate() {
        let Some(child) = child else { continue };
        if child.total_points() == 0 {
            continue;
        }
        let filename = if child.is_leaf() {
            content_filename
        } else {
            "tileset.json"
        };
        children.push(Child {
            content: Content {
                uri: format!("{octant}/{filename}"),
            },
            bounding_volume: BoundingVolume {
                cesium_box: child.bounding_box().as_cesium_box(),
            },
            geometric_error: child.geometric_error(),
            refine: REFINE_ADD.to_string(),
        });
    }

    let transform = match node.transform() {
        Some(t) if node.is_root() && !t.is_identity() => Some(t.forward_column_major()),
        _ => None,
    };

    Tileset {
        asset: Asset {
            version: version.to_string(),
        },
        geometric_error: node.geometric_error(),
        root: Root {
            children,
            content: Content {
                uri: content_filename.to_string(),
            },
            bounding_volume: BoundingVolume {
                cesium_box: node.bounding_box().as_cesium_box(),
            },
            geometric_error: node.geometric_error(),
            refine: REFINE_ADD.to_string(),
            transform,
        },
    }
}
