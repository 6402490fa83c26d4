//! # meshpack
//!
//! A standalone codec for the 3MF (3D Manufacturing Format) file format:
//! packages in, neutral scenes out. No host application types appear
//! anywhere in the API; hosts adapt the [`Scene`] model on their side.
//!
//! - [`import`] reads a 3MF package from bytes into a [`Scene`]
//! - [`export`] serializes a [`Scene`] back into a 3MF package
//! - [`reconcile::flatten`] resolves the scene graph into world-placed
//!   mesh instances for hosts without component support
//! - [`reconcile::assemble`] folds flat placements back into a scene,
//!   sharing duplicated geometry
//!
//! ## Example
//!
//! ```
//! use meshpack::{BuildItem, Mesh, Scene, SceneObject, Triangle, Vertex};
//!
//! let mut mesh = Mesh::new();
//! mesh.vertices.push(Vertex::new(0.0, 0.0, 0.0));
//! mesh.vertices.push(Vertex::new(10.0, 0.0, 0.0));
//! mesh.vertices.push(Vertex::new(0.0, 10.0, 0.0));
//! mesh.triangles.push(Triangle::new(0, 1, 2));
//!
//! let mut scene = Scene::new();
//! scene.objects.insert(1, SceneObject::mesh(mesh));
//! scene.build.push(BuildItem::new(1));
//!
//! let bytes = meshpack::export(&scene).unwrap();
//! let back = meshpack::import(&bytes).unwrap();
//! assert_eq!(back.objects.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod package;
pub mod parser;
pub mod reconcile;
pub mod scene;
pub mod writer;

use std::io::{Read, Write};

pub use error::{Error, Result};
pub use package::Package;
pub use reconcile::MeshInstance;
pub use scene::{
    Attachment, AttachmentKind, BuildItem, ComponentRef, Material, Mesh, MetadataEntry, ObjectId,
    Scene, SceneObject, Shape, Transform, Triangle, Vertex,
};

/// Read a 3MF package into a [`Scene`]
///
/// A byte buffer that is not a ZIP archive fails with
/// [`Error::NotAnArchive`]; an archive with no entries at all imports as an
/// empty scene. Texture and thumbnail parts named by the package
/// relationships are carried along as [`Attachment`]s.
pub fn import(data: &[u8]) -> Result<Scene> {
    let package = Package::from_bytes(data)?;
    if package.is_empty() {
        return Ok(Scene::new());
    }

    let model = package.model_part()?;
    let xml = std::str::from_utf8(&model.data)
        .map_err(|e| Error::MalformedXml(format!("model part is not UTF-8: {}", e)))?;
    let mut scene = parser::parse_model_xml(xml)?;

    for rel in package.relationships() {
        let kind = match rel.rel_type.as_str() {
            package::TEXTURE_REL_TYPE => AttachmentKind::Texture,
            package::THUMBNAIL_REL_TYPE => AttachmentKind::Thumbnail,
            _ => continue,
        };
        // Package::open already validated that every target exists.
        if let Some(part) = package.part(&rel.target) {
            scene.attachments.push(Attachment {
                path: part.path.clone(),
                content_type: content_type_for(&part.path).to_string(),
                kind,
                data: part.data.clone(),
            });
        }
    }

    Ok(scene)
}

/// Serialize a [`Scene`] into a 3MF package
///
/// The package is regenerated from scratch: model part, content-types
/// manifest, relationships, and one part per attachment.
pub fn export(scene: &Scene) -> Result<Vec<u8>> {
    let xml = writer::write_model_xml(scene)?;

    let mut package = Package::new();
    package.insert_part(package::MODEL_PATH, xml.into_bytes());
    package.add_relationship(package::MODEL_PATH, package::MODEL_REL_TYPE);

    for attachment in &scene.attachments {
        let rel_type = match attachment.kind {
            AttachmentKind::Texture => package::TEXTURE_REL_TYPE,
            AttachmentKind::Thumbnail => package::THUMBNAIL_REL_TYPE,
        };
        package.insert_part(attachment.path.clone(), attachment.data.clone());
        package.add_relationship(attachment.path.clone(), rel_type);
    }

    package.write_bytes()
}

impl Scene {
    /// Read a scene from any reader carrying a 3MF package
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        import(&data)
    }

    /// Write this scene as a 3MF package to any writer
    pub fn to_writer<W: Write>(&self, mut writer: W) -> Result<()> {
        let bytes = export(self)?;
        writer.write_all(&bytes)?;
        Ok(())
    }
}

/// MIME type for an attachment part, from its file extension
fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
        Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
            "image/jpeg"
        }
        _ => "application/octet-stream",
    }
}
