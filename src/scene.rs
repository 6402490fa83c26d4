//! The neutral in-memory scene model exchanged with the host
//!
//! A [`Scene`] is what an import call returns and an export call consumes.
//! It is host-agnostic: objects live in an arena keyed by integer id,
//! component references between them are weak (lookup by id, never
//! ownership), and build items name the top-level instances to materialize.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Identifier for a [`SceneObject`] within one [`Scene`]
pub type ObjectId = u32;

/// A 4x4 affine transform, row-major, column-vector convention
///
/// The 3MF wire form is 12 space-separated decimal values: the row-major
/// 3x3 rotation/scale block followed by the translation vector
/// (`m00 m01 m02 m10 m11 m12 m20 m21 m22 tx ty tz`). The fourth matrix row
/// is fixed at `(0, 0, 0, 1)` and never serialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Matrix entries, `m[row][column]`
    pub m: [[f64; 4]; 4],
}

impl Transform {
    /// The identity transform
    pub const IDENTITY: Transform = Transform {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Create the identity transform
    pub fn identity() -> Self {
        Self::IDENTITY
    }

    /// Create a pure translation
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut t = Self::IDENTITY;
        t.m[0][3] = x;
        t.m[1][3] = y;
        t.m[2][3] = z;
        t
    }

    /// Create a pure axis-aligned scale
    pub fn scale(sx: f64, sy: f64, sz: f64) -> Self {
        let mut t = Self::IDENTITY;
        t.m[0][0] = sx;
        t.m[1][1] = sy;
        t.m[2][2] = sz;
        t
    }

    /// Parse the 3MF `transform` attribute (exactly 12 decimal values)
    ///
    /// Wrong value count or malformed numeric text is `MalformedXml`;
    /// callers handle a missing attribute as identity themselves.
    pub fn from_model_attr(text: &str) -> Result<Self> {
        let mut values = [0.0f64; 12];
        let mut count = 0;
        for token in text.split_whitespace() {
            if count == 12 {
                count += 1;
                break;
            }
            values[count] = token
                .parse::<f64>()
                .map_err(|_| Error::bad_number("transform", token))?;
            count += 1;
        }
        if count != 12 {
            return Err(Error::MalformedXml(format!(
                "transform attribute must contain exactly 12 values: '{}'",
                text
            )));
        }

        // The wire order is the transpose of the column-vector matrix:
        // values[3*i + j] lands at m[j][i], translation at m[j][3].
        let mut t = Self::IDENTITY;
        for i in 0..3 {
            for j in 0..3 {
                t.m[j][i] = values[3 * i + j];
            }
        }
        for j in 0..3 {
            t.m[j][3] = values[9 + j];
        }
        Ok(t)
    }

    /// Render back to the 12-value 3MF attribute form
    pub fn to_model_attr(&self) -> String {
        let mut values = Vec::with_capacity(12);
        for i in 0..3 {
            for j in 0..3 {
                values.push(self.m[j][i].to_string());
            }
        }
        for j in 0..3 {
            values.push(self.m[j][3].to_string());
        }
        values.join(" ")
    }

    /// Matrix product `self * rhs` (parent-then-child composition)
    pub fn multiply(&self, rhs: &Transform) -> Transform {
        let mut out = [[0.0f64; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[r][k] * rhs.m[k][c]).sum();
            }
        }
        Transform { m: out }
    }

    /// Apply to a point (implicit w = 1)
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0f64; 3];
        for (r, v) in out.iter_mut().enumerate() {
            *v = self.m[r][0] * p[0] + self.m[r][1] * p[1] + self.m[r][2] * p[2] + self.m[r][3];
        }
        out
    }

    /// Exact comparison against identity (untouched transforms stay exact)
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Entry-wise comparison within a tolerance
    pub fn approx_eq(&self, other: &Transform, eps: f64) -> bool {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A vertex position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Vertex {
    /// Create a new vertex
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A triangle defined by three 0-based vertex indices, consistent winding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    /// Index of the first vertex
    pub v1: usize,
    /// Index of the second vertex
    pub v2: usize,
    /// Index of the third vertex
    pub v3: usize,
}

impl Triangle {
    /// Create a new triangle
    pub fn new(v1: usize, v2: usize, v3: usize) -> Self {
        Self { v1, v2, v3 }
    }
}

/// Triangle mesh geometry with an optional material reference
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Ordered vertex positions
    pub vertices: Vec<Vertex>,
    /// Ordered triangles indexing into `vertices`
    pub triangles: Vec<Triangle>,
    /// Optional index into [`Scene::materials`]
    pub material: Option<usize>,
}

impl Mesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            triangles: Vec::new(),
            material: None,
        }
    }

    /// Create an empty mesh with pre-allocated capacity
    pub fn with_capacity(vertices: usize, triangles: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertices),
            triangles: Vec::with_capacity(triangles),
            material: None,
        }
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak reference from a component group to a child object
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRef {
    /// Id of the referenced object
    pub object_id: ObjectId,
    /// Transform applied to the child, relative to the group
    pub transform: Transform,
    /// Optional material override (index into [`Scene::materials`])
    pub material: Option<usize>,
    /// Unrecognized XML attributes, re-emitted verbatim on write
    pub extra: Vec<(String, String)>,
}

impl ComponentRef {
    /// Create a reference with an identity transform
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            transform: Transform::IDENTITY,
            material: None,
            extra: Vec::new(),
        }
    }

    /// Create a reference with a transform
    pub fn with_transform(object_id: ObjectId, transform: Transform) -> Self {
        Self {
            object_id,
            transform,
            material: None,
            extra: Vec::new(),
        }
    }
}

/// The geometric content of a [`SceneObject`]
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Concrete triangle geometry
    Mesh(Mesh),
    /// An assembly of references to other objects
    Components(Vec<ComponentRef>),
}

/// One entry in the scene's object arena
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    /// Optional display name
    pub name: Option<String>,
    /// Mesh or component-group content
    pub shape: Shape,
    /// Unrecognized XML attributes, re-emitted verbatim on write
    pub extra: Vec<(String, String)>,
}

impl SceneObject {
    /// Wrap a mesh
    pub fn mesh(mesh: Mesh) -> Self {
        Self {
            name: None,
            shape: Shape::Mesh(mesh),
            extra: Vec::new(),
        }
    }

    /// Wrap a component group
    pub fn components(components: Vec<ComponentRef>) -> Self {
        Self {
            name: None,
            shape: Shape::Components(components),
            extra: Vec::new(),
        }
    }
}

/// A top-level instruction to place one object into the assembled scene
#[derive(Debug, Clone, PartialEq)]
pub struct BuildItem {
    /// Id of the placed object; must exist in [`Scene::objects`]
    pub object_id: ObjectId,
    /// World placement of the object
    pub transform: Transform,
    /// Unrecognized XML attributes, re-emitted verbatim on write
    pub extra: Vec<(String, String)>,
}

impl BuildItem {
    /// Create a build item with an identity transform
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            transform: Transform::IDENTITY,
            extra: Vec::new(),
        }
    }

    /// Create a build item with a transform
    pub fn with_transform(object_id: ObjectId, transform: Transform) -> Self {
        Self {
            object_id,
            transform,
            extra: Vec::new(),
        }
    }
}

/// A shared material: base color plus an optional texture part reference
///
/// Materials are shared by reference (index into [`Scene::materials`]) and
/// never duplicated on import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    /// Optional display name
    pub name: Option<String>,
    /// Base color, RGBA with 8-bit channels
    pub color: (u8, u8, u8, u8),
    /// Optional package path of a texture attachment
    pub texture: Option<String>,
}

impl Material {
    /// Create an opaque single-color material
    pub fn color(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            name: None,
            color: (r, g, b, a),
            texture: None,
        }
    }
}

/// A document metadata entry, passed through verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    /// Entry name (e.g. `Title`, `Designer`, producer-specific)
    pub name: String,
    /// Entry value
    pub value: String,
    /// Optional preservation flag
    pub preserve: Option<bool>,
}

impl MetadataEntry {
    /// Create a metadata entry without a preservation flag
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            preserve: None,
        }
    }
}

/// Role of a binary attachment within the package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// A texture image part
    Texture,
    /// The package thumbnail
    Thumbnail,
}

/// An opaque binary part carried through import/export for round-trips
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Part path within the package (no leading slash)
    pub path: String,
    /// MIME content type (e.g. `image/png`)
    pub content_type: String,
    /// Role recorded in the package relationships
    pub kind: AttachmentKind,
    /// Raw part bytes
    pub data: Vec<u8>,
}

/// The neutral scene-graph representation of one 3MF document
///
/// Constructed fresh per import or export call; no state crosses calls.
/// Ownership is tree-shaped except for object sharing via [`ComponentRef`],
/// which is by-id lookup. Cycles among object ids are rejected by
/// [`crate::reconcile::flatten`] with [`Error::GraphCycle`].
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    /// Document unit of measurement (`millimeter` by default)
    pub unit: String,
    /// Metadata entries in document order
    pub metadata: Vec<MetadataEntry>,
    /// Shared material table
    pub materials: Vec<Material>,
    /// Object arena keyed by id
    pub objects: BTreeMap<ObjectId, SceneObject>,
    /// Ordered top-level instances to materialize
    pub build: Vec<BuildItem>,
    /// Binary parts (textures, thumbnail) preserved for round-trips
    pub attachments: Vec<Attachment>,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self {
            unit: "millimeter".to_string(),
            metadata: Vec::new(),
            materials: Vec::new(),
            objects: BTreeMap::new(),
            build: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Look up a metadata value by name
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value.as_str())
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
