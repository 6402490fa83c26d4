//! Archive Layer: the ZIP/OPC package container
//!
//! 3MF documents are ZIP archives following the Open Packaging Conventions:
//! named parts plus a relationships part (`_rels/.rels`) that locates the
//! root model part. A [`Package`] holds every part in memory in insertion
//! order together with the parsed relationship list.

use std::io::{Cursor, Read, Seek, Write};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};

/// Root model part path within the archive
pub const MODEL_PATH: &str = "3D/3dmodel.model";

/// Content types manifest path
pub const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";

/// Package relationships part path
pub const RELS_PATH: &str = "_rels/.rels";

/// Relationship type of the root 3D model part
pub const MODEL_REL_TYPE: &str = "http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel";

/// Relationship type of texture parts
pub const TEXTURE_REL_TYPE: &str = "http://schemas.microsoft.com/3dmanufacturing/2013/01/3dtexture";

/// Relationship type of the package thumbnail (OPC standard)
pub const THUMBNAIL_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/thumbnail";

/// A named byte-content entry within a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part path, without a leading slash
    pub path: String,
    /// Raw part bytes
    pub data: Vec<u8>,
}

/// A typed link from the package to one of its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship id (`rel0`, `rel1`, ...)
    pub id: String,
    /// Target part path, without a leading slash
    pub target: String,
    /// Relationship type URI
    pub rel_type: String,
}

/// An in-memory OPC package: ordered parts plus relationships
#[derive(Debug, Clone, Default)]
pub struct Package {
    parts: Vec<Part>,
    relationships: Vec<Relationship>,
}

impl Package {
    /// Create an empty package
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a package from a reader
    ///
    /// An unreadable container fails with [`Error::NotAnArchive`]. A
    /// zero-entry archive opens as an empty package; callers distinguish
    /// "no model root" from "malformed archive". A relationships part that
    /// cannot be parsed, and any relationship target absent from the
    /// archive, fail the open with [`Error::MissingPart`].
    pub fn open<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive =
            ZipArchive::new(reader).map_err(|e| Error::NotAnArchive(e.to_string()))?;

        let mut parts = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|e| Error::NotAnArchive(e.to_string()))?;
            if file.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            parts.push(Part {
                path: file.name().to_string(),
                data,
            });
        }

        let mut package = Self {
            parts,
            relationships: Vec::new(),
        };

        if let Some(rels) = package.part(RELS_PATH) {
            // An unparseable relationships part leaves the model root
            // unlocatable, same as an absent one.
            let xml = std::str::from_utf8(&rels.data)
                .map_err(|e| Error::MissingPart(format!("relationships part unreadable: {}", e)))?
                .to_string();
            package.relationships = parse_relationships(&xml)
                .map_err(|e| Error::MissingPart(format!("relationships part unreadable: {}", e)))?;

            // Fail fast on dangling relationship targets.
            for rel in &package.relationships {
                if package.part(&rel.target).is_none() {
                    return Err(Error::MissingPart(rel.target.clone()));
                }
            }
        }

        Ok(package)
    }

    /// Open a package from a byte buffer
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::open(Cursor::new(data))
    }

    /// All parts in insertion order
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Parsed package relationships
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Number of parts
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the package holds no parts at all
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Look up a part by path (leading slashes ignored)
    pub fn part(&self, path: &str) -> Option<&Part> {
        let wanted = path.trim_start_matches('/');
        self.parts
            .iter()
            .find(|p| p.path.trim_start_matches('/') == wanted)
    }

    /// Insert or replace a part
    pub fn insert_part(&mut self, path: impl Into<String>, data: Vec<u8>) {
        let path = path.into();
        let path = path.trim_start_matches('/').to_string();
        if let Some(existing) = self.parts.iter_mut().find(|p| p.path == path) {
            existing.data = data;
        } else {
            self.parts.push(Part { path, data });
        }
    }

    /// Record a relationship to a part; ids are assigned sequentially
    pub fn add_relationship(&mut self, target: impl Into<String>, rel_type: impl Into<String>) {
        let target = target.into();
        let target = target.trim_start_matches('/').to_string();
        self.relationships.push(Relationship {
            id: format!("rel{}", self.relationships.len()),
            target,
            rel_type: rel_type.into(),
        });
    }

    /// First relationship of the given type, if any
    pub fn relationship_of_type(&self, rel_type: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.rel_type == rel_type)
    }

    /// Resolve the root model part through the relationships
    ///
    /// Absence of the model relationship or of the part it names is
    /// [`Error::MissingPart`].
    pub fn model_part(&self) -> Result<&Part> {
        let rel = self
            .relationship_of_type(MODEL_REL_TYPE)
            .ok_or_else(|| Error::MissingPart("3D model relationship".to_string()))?;
        self.part(&rel.target)
            .ok_or_else(|| Error::MissingPart(rel.target.clone()))
    }

    /// Write the package as a ZIP archive
    ///
    /// Always emits the content-types manifest and the relationships part,
    /// then every other part in insertion order. A model relationship is
    /// synthesized when a model part is present but no relationship names
    /// it.
    pub fn write<W: Write + Seek>(&self, writer: W) -> Result<W> {
        let mut zip = ZipWriter::new(writer);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(CONTENT_TYPES_PATH, options)?;
        zip.write_all(self.render_content_types().as_bytes())?;

        zip.start_file(RELS_PATH, options)?;
        zip.write_all(self.render_relationships().as_bytes())?;

        for part in &self.parts {
            if part.path == CONTENT_TYPES_PATH || part.path == RELS_PATH {
                continue;
            }
            zip.start_file(&part.path, options)?;
            zip.write_all(&part.data)?;
        }

        Ok(zip.finish()?)
    }

    /// Write the package to a fresh byte buffer
    pub fn write_bytes(&self) -> Result<Vec<u8>> {
        let cursor = self.write(Cursor::new(Vec::new()))?;
        Ok(cursor.into_inner())
    }

    /// Build the `[Content_Types].xml` manifest for the parts present
    fn render_content_types(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="model" ContentType="application/vnd.ms-package.3dmanufacturing-3dmodel+xml"/>
"#,
        );
        let mut png = false;
        let mut jpeg = false;
        for part in &self.parts {
            match part.path.rsplit('.').next() {
                Some(ext) if ext.eq_ignore_ascii_case("png") => png = true,
                Some(ext)
                    if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") =>
                {
                    jpeg = true;
                }
                _ => {}
            }
        }
        if png {
            xml.push_str("  <Default Extension=\"png\" ContentType=\"image/png\"/>\n");
        }
        if jpeg {
            xml.push_str("  <Default Extension=\"jpeg\" ContentType=\"image/jpeg\"/>\n");
            xml.push_str("  <Default Extension=\"jpg\" ContentType=\"image/jpeg\"/>\n");
        }
        xml.push_str("</Types>");
        xml
    }

    /// Build the `_rels/.rels` part
    fn render_relationships(&self) -> String {
        let mut rels = self.relationships.clone();
        if self.part(MODEL_PATH).is_some() && !rels.iter().any(|r| r.rel_type == MODEL_REL_TYPE) {
            rels.push(Relationship {
                id: format!("rel{}", rels.len()),
                target: MODEL_PATH.to_string(),
                rel_type: MODEL_REL_TYPE.to_string(),
            });
        }

        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
"#,
        );
        for rel in &rels {
            xml.push_str(&format!(
                "  <Relationship Target=\"/{}\" Id=\"{}\" Type=\"{}\"/>\n",
                rel.target, rel.id, rel.rel_type
            ));
        }
        xml.push_str("</Relationships>");
        xml
    }
}

/// Parse `_rels/.rels` into a relationship list
///
/// Targets may be percent-encoded per OPC while the ZIP entry name is
/// UTF-8; they are decoded here so part lookups match.
fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let name = std::str::from_utf8(name.as_ref())
                    .map_err(|e| Error::MalformedXml(e.to_string()))?;
                if !name.ends_with("Relationship") {
                    buf.clear();
                    continue;
                }

                let mut id = None;
                let mut target = None;
                let mut rel_type = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = std::str::from_utf8(attr.key.as_ref())
                        .map_err(|e| Error::MalformedXml(e.to_string()))?;
                    let value = std::str::from_utf8(&attr.value)
                        .map_err(|e| Error::MalformedXml(e.to_string()))?;
                    match key {
                        "Id" => id = Some(value.to_string()),
                        "Target" => target = Some(value.to_string()),
                        "Type" => rel_type = Some(value.to_string()),
                        _ => {}
                    }
                }

                let target =
                    target.ok_or_else(|| Error::missing_attribute("Relationship", "Target"))?;
                let rel_type =
                    rel_type.ok_or_else(|| Error::missing_attribute("Relationship", "Type"))?;
                let decoded = match urlencoding::decode(&target) {
                    Ok(decoded) => decoded.into_owned(),
                    Err(_) => target,
                };
                relationships.push(Relationship {
                    id: id.unwrap_or_default(),
                    target: decoded.trim_start_matches('/').to_string(),
                    rel_type,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::MalformedXml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn empty_zip_opens_as_empty_package() {
        let bytes = zip_with(&[]);
        let package = Package::from_bytes(&bytes).unwrap();
        assert!(package.is_empty());
        assert!(package.relationships().is_empty());
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let result = Package::from_bytes(b"this is definitely not a zip file");
        assert!(matches!(result, Err(Error::NotAnArchive(_))));
    }

    #[test]
    fn dangling_relationship_target_is_missing_part() {
        let rels = br#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Target="/3D/3dmodel.model" Id="rel0" Type="http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel"/>
</Relationships>"#;
        let bytes = zip_with(&[(RELS_PATH, rels.as_slice())]);
        let result = Package::from_bytes(&bytes);
        assert!(matches!(result, Err(Error::MissingPart(_))));
    }

    #[test]
    fn unparseable_relationships_part_is_missing_part() {
        let bytes = zip_with(&[
            (RELS_PATH, b"<Relationships><Relationship Target=".as_slice()),
            (MODEL_PATH, b"<model/>".as_slice()),
        ]);
        let result = Package::from_bytes(&bytes);
        assert!(matches!(result, Err(Error::MissingPart(_))));
    }

    #[test]
    fn model_part_resolves_through_relationships() {
        let rels = br#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Target="/3D/3dmodel.model" Id="rel0" Type="http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel"/>
</Relationships>"#;
        let bytes = zip_with(&[
            (RELS_PATH, rels.as_slice()),
            (MODEL_PATH, b"<model/>".as_slice()),
        ]);
        let package = Package::from_bytes(&bytes).unwrap();
        assert_eq!(package.model_part().unwrap().data, b"<model/>");
    }

    #[test]
    fn percent_encoded_targets_match_utf8_entries() {
        let rels = "<?xml version=\"1.0\"?>
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">
  <Relationship Target=\"/2D/test%C3%86file.model\" Id=\"rel0\" Type=\"http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel\"/>
</Relationships>";
        let bytes = zip_with(&[
            (RELS_PATH, rels.as_bytes()),
            ("2D/testÆfile.model", b"<model/>".as_slice()),
        ]);
        let package = Package::from_bytes(&bytes).unwrap();
        assert_eq!(package.model_part().unwrap().path, "2D/testÆfile.model");
    }

    #[test]
    fn no_model_relationship_is_missing_part() {
        let bytes = zip_with(&[("readme.txt", b"hello".as_slice())]);
        let package = Package::from_bytes(&bytes).unwrap();
        assert!(matches!(
            package.model_part(),
            Err(Error::MissingPart(_))
        ));
    }

    #[test]
    fn write_then_open_round_trips_parts() {
        let mut package = Package::new();
        package.insert_part(MODEL_PATH, b"<model/>".to_vec());
        package.add_relationship(MODEL_PATH, MODEL_REL_TYPE);
        package.insert_part("Textures/wood.png", vec![1, 2, 3]);
        package.add_relationship("/Textures/wood.png", TEXTURE_REL_TYPE);

        let bytes = package.write_bytes().unwrap();
        assert_eq!(&bytes[0..2], b"PK");

        let reopened = Package::from_bytes(&bytes).unwrap();
        assert_eq!(reopened.model_part().unwrap().data, b"<model/>");
        assert_eq!(reopened.part("Textures/wood.png").unwrap().data, [1, 2, 3]);
        let manifest = reopened.part(CONTENT_TYPES_PATH).unwrap();
        let manifest = std::str::from_utf8(&manifest.data).unwrap();
        assert!(manifest.contains("image/png"));
    }

    #[test]
    fn write_synthesizes_model_relationship() {
        let mut package = Package::new();
        package.insert_part(MODEL_PATH, b"<model/>".to_vec());

        let bytes = package.write_bytes().unwrap();
        let reopened = Package::from_bytes(&bytes).unwrap();
        assert!(reopened.relationship_of_type(MODEL_REL_TYPE).is_some());
    }
}
