//! Container-level import behaviors: malformed archives, missing parts,
//! hand-built packages

use std::io::{Cursor, Write};

use meshpack::package::{MODEL_PATH, MODEL_REL_TYPE, RELS_PATH};
use meshpack::{Error, Package, Shape};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Build a raw ZIP archive without any of the Package conveniences
fn raw_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn model_rels() -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Target="/{}" Id="rel0" Type="{}"/>
</Relationships>"#,
        MODEL_PATH, MODEL_REL_TYPE
    )
    .into_bytes()
}

#[test]
fn garbage_bytes_are_not_an_archive() {
    let result = meshpack::import(b"not remotely a zip file");
    assert!(matches!(result, Err(Error::NotAnArchive(_))));
}

#[test]
fn truncated_archive_is_not_an_archive() {
    let mut scene = meshpack::Scene::new();
    let mut mesh = meshpack::Mesh::new();
    mesh.vertices.push(meshpack::Vertex::new(0.0, 0.0, 0.0));
    scene.objects.insert(1, meshpack::SceneObject::mesh(mesh));
    let bytes = meshpack::export(&scene).unwrap();

    let result = meshpack::import(&bytes[..bytes.len() / 2]);
    assert!(matches!(result, Err(Error::NotAnArchive(_))));
}

#[test]
fn empty_archive_imports_as_empty_scene() {
    let bytes = raw_zip(&[]);
    let scene = meshpack::import(&bytes).unwrap();
    assert!(scene.objects.is_empty());
    assert!(scene.build.is_empty());
    assert!(scene.metadata.is_empty());
}

#[test]
fn archive_without_model_relationship_is_missing_part() {
    let bytes = raw_zip(&[("readme.txt", b"hello".as_slice())]);
    let result = meshpack::import(&bytes);
    assert!(matches!(result, Err(Error::MissingPart(_))));
}

#[test]
fn dangling_relationship_target_is_missing_part() {
    let bytes = raw_zip(&[(RELS_PATH, model_rels().as_slice())]);
    let result = meshpack::import(&bytes);
    assert!(matches!(result, Err(Error::MissingPart(_))));
}

#[test]
fn hand_written_package_imports() {
    let model = br#"<?xml version="1.0" encoding="UTF-8"?>
<model unit="millimeter" xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
  <resources>
    <object id="1" name="Wedge">
      <mesh>
        <vertices>
          <vertex x="0" y="0" z="0"/>
          <vertex x="10" y="0" z="0"/>
          <vertex x="0" y="10" z="0"/>
          <vertex x="0" y="0" z="10"/>
        </vertices>
        <triangles>
          <triangle v1="0" v2="1" v3="2"/>
          <triangle v1="0" v2="3" v3="1"/>
          <triangle v1="0" v2="2" v3="3"/>
          <triangle v1="1" v2="3" v3="2"/>
        </triangles>
      </mesh>
    </object>
  </resources>
  <build>
    <item objectid="1" transform="1 0 0 0 1 0 0 0 1 0 0 5"/>
  </build>
</model>"#;
    let bytes = raw_zip(&[
        (RELS_PATH, model_rels().as_slice()),
        (MODEL_PATH, model.as_slice()),
    ]);

    let scene = meshpack::import(&bytes).unwrap();
    assert_eq!(scene.objects.len(), 1);
    let object = &scene.objects[&1];
    assert_eq!(object.name.as_deref(), Some("Wedge"));
    let Shape::Mesh(mesh) = &object.shape else {
        panic!("expected a mesh object");
    };
    assert_eq!(mesh.vertices.len(), 4);
    assert_eq!(mesh.triangles.len(), 4);
    assert_eq!(scene.build[0].transform.m[2][3], 5.0);
}

#[test]
fn non_standard_model_path_resolves_through_relationships() {
    let rels = format!(
        r#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Target="/models/custom.model" Id="rel0" Type="{}"/>
</Relationships>"#,
        MODEL_REL_TYPE
    );
    let model = br#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02"><resources/><build/></model>"#;
    let bytes = raw_zip(&[
        (RELS_PATH, rels.as_bytes()),
        ("models/custom.model", model.as_slice()),
    ]);

    let scene = meshpack::import(&bytes).unwrap();
    assert!(scene.objects.is_empty());
    assert_eq!(scene.unit, "millimeter");
}

#[test]
fn required_extension_fails_the_import() {
    let model = br#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02"
  xmlns:b="http://schemas.microsoft.com/3dmanufacturing/beamlattice/2017/02"
  requiredextensions="b">
  <resources/>
  <build/>
</model>"#;
    let bytes = raw_zip(&[
        (RELS_PATH, model_rels().as_slice()),
        (MODEL_PATH, model.as_slice()),
    ]);

    let result = meshpack::import(&bytes);
    match result {
        Err(Error::UnsupportedExtension(ns)) => assert!(ns.contains("beamlattice")),
        other => panic!("expected UnsupportedExtension, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn model_part_with_invalid_utf8_is_malformed() {
    let bytes = raw_zip(&[
        (RELS_PATH, model_rels().as_slice()),
        (MODEL_PATH, &[0xFF, 0xFE, 0x00, 0x80]),
    ]);
    let result = meshpack::import(&bytes);
    assert!(matches!(result, Err(Error::MalformedXml(_))));
}

#[test]
fn package_layer_exposes_raw_parts() {
    let bytes = raw_zip(&[
        (RELS_PATH, model_rels().as_slice()),
        (MODEL_PATH, b"<model xmlns=\"http://schemas.microsoft.com/3dmanufacturing/core/2015/02\"><resources/><build/></model>".as_slice()),
        ("Metadata/notes.txt", b"printer profile A".as_slice()),
    ]);

    let package = Package::from_bytes(&bytes).unwrap();
    assert_eq!(package.len(), 3);
    assert_eq!(
        package.part("Metadata/notes.txt").unwrap().data,
        b"printer profile A"
    );
}
