//! Model Writer: a [`Scene`] back into 3MF model XML
//!
//! Export regenerates the document from scratch. Object ids are reassigned
//! densely in dependency order so every referenced object is declared
//! before its first use, identity transforms are omitted, and passthrough
//! attributes captured on import are re-emitted verbatim.

use std::collections::HashMap;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::{Error, Result};
use crate::parser::CORE_NAMESPACE;
use crate::scene::{Mesh, ObjectId, Scene, Shape};

// The basematerials group id when the scene carries materials; object ids
// start after it.
const MATERIAL_GROUP_ID: u32 = 1;

/// Serialize a [`Scene`] to model part XML
pub fn write_model_xml(scene: &Scene) -> Result<String> {
    let ids = assign_ids(scene)?;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut model = BytesStart::new("model");
    model.push_attribute(("unit", scene.unit.as_str()));
    model.push_attribute(("xml:lang", "en-US"));
    model.push_attribute(("xmlns", CORE_NAMESPACE));
    writer.write_event(Event::Start(model))?;

    for entry in &scene.metadata {
        let mut e = BytesStart::new("metadata");
        e.push_attribute(("name", entry.name.as_str()));
        if let Some(preserve) = entry.preserve {
            e.push_attribute(("preserve", if preserve { "1" } else { "0" }));
        }
        writer.write_event(Event::Start(e))?;
        writer.write_event(Event::Text(BytesText::new(&entry.value)))?;
        writer.write_event(Event::End(BytesEnd::new("metadata")))?;
    }

    writer.write_event(Event::Start(BytesStart::new("resources")))?;

    if !scene.materials.is_empty() {
        let mut group = BytesStart::new("basematerials");
        group.push_attribute(("id", MATERIAL_GROUP_ID.to_string().as_str()));
        writer.write_event(Event::Start(group))?;
        for material in &scene.materials {
            let mut base = BytesStart::new("base");
            if let Some(name) = &material.name {
                base.push_attribute(("name", name.as_str()));
            }
            base.push_attribute(("displaycolor", format_color(material.color).as_str()));
            if let Some(texture) = &material.texture {
                base.push_attribute(("texture", texture.as_str()));
            }
            writer.write_event(Event::Empty(base))?;
        }
        writer.write_event(Event::End(BytesEnd::new("basematerials")))?;
    }

    // Emit objects in assigned-id order; dependency ordering guarantees
    // components only reference objects already written.
    let mut order: Vec<(u32, ObjectId)> = ids.iter().map(|(&old, &new)| (new, old)).collect();
    order.sort_unstable();
    for (assigned, old_id) in order {
        let object = &scene.objects[&old_id];
        let mut start = BytesStart::new("object");
        start.push_attribute(("id", assigned.to_string().as_str()));
        if let Some(name) = &object.name {
            start.push_attribute(("name", name.as_str()));
        }
        if let Shape::Mesh(mesh) = &object.shape {
            if let Some(material) = mesh.material {
                push_material_attrs(&mut start, material, scene)?;
            }
        }
        for (key, value) in &object.extra {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        writer.write_event(Event::Start(start))?;

        match &object.shape {
            Shape::Mesh(mesh) => write_mesh(&mut writer, mesh)?,
            Shape::Components(components) => {
                writer.write_event(Event::Start(BytesStart::new("components")))?;
                for component in components {
                    let mut e = BytesStart::new("component");
                    let target = ids.get(&component.object_id).ok_or_else(|| {
                        Error::dangling_reference("component reference", component.object_id)
                    })?;
                    e.push_attribute(("objectid", target.to_string().as_str()));
                    if !component.transform.is_identity() {
                        e.push_attribute(("transform", component.transform.to_model_attr().as_str()));
                    }
                    if let Some(material) = component.material {
                        push_material_attrs(&mut e, material, scene)?;
                    }
                    for (key, value) in &component.extra {
                        e.push_attribute((key.as_str(), value.as_str()));
                    }
                    writer.write_event(Event::Empty(e))?;
                }
                writer.write_event(Event::End(BytesEnd::new("components")))?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("object")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("resources")))?;

    writer.write_event(Event::Start(BytesStart::new("build")))?;
    for item in &scene.build {
        let mut e = BytesStart::new("item");
        let target = ids
            .get(&item.object_id)
            .ok_or_else(|| Error::dangling_reference("build item", item.object_id))?;
        e.push_attribute(("objectid", target.to_string().as_str()));
        if !item.transform.is_identity() {
            e.push_attribute(("transform", item.transform.to_model_attr().as_str()));
        }
        for (key, value) in &item.extra {
            e.push_attribute((key.as_str(), value.as_str()));
        }
        writer.write_event(Event::Empty(e))?;
    }
    writer.write_event(Event::End(BytesEnd::new("build")))?;

    writer.write_event(Event::End(BytesEnd::new("model")))?;

    String::from_utf8(writer.into_inner()).map_err(|e| Error::MalformedXml(e.to_string()))
}

/// Serialize one `<mesh>` block
fn write_mesh(writer: &mut Writer<Vec<u8>>, mesh: &Mesh) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("mesh")))?;

    writer.write_event(Event::Start(BytesStart::new("vertices")))?;
    for vertex in &mesh.vertices {
        let mut e = BytesStart::new("vertex");
        e.push_attribute(("x", vertex.x.to_string().as_str()));
        e.push_attribute(("y", vertex.y.to_string().as_str()));
        e.push_attribute(("z", vertex.z.to_string().as_str()));
        writer.write_event(Event::Empty(e))?;
    }
    writer.write_event(Event::End(BytesEnd::new("vertices")))?;

    writer.write_event(Event::Start(BytesStart::new("triangles")))?;
    for triangle in &mesh.triangles {
        let mut e = BytesStart::new("triangle");
        e.push_attribute(("v1", triangle.v1.to_string().as_str()));
        e.push_attribute(("v2", triangle.v2.to_string().as_str()));
        e.push_attribute(("v3", triangle.v3.to_string().as_str()));
        writer.write_event(Event::Empty(e))?;
    }
    writer.write_event(Event::End(BytesEnd::new("triangles")))?;

    writer.write_event(Event::End(BytesEnd::new("mesh")))?;
    Ok(())
}

/// Attach `pid`/`pindex` attributes for a material table index
fn push_material_attrs(e: &mut BytesStart, material: usize, scene: &Scene) -> Result<()> {
    if material >= scene.materials.len() {
        return Err(Error::InvalidGeometry(format!(
            "material index {} is out of range ({} materials)",
            material,
            scene.materials.len()
        )));
    }
    e.push_attribute(("pid", MATERIAL_GROUP_ID.to_string().as_str()));
    e.push_attribute(("pindex", material.to_string().as_str()));
    Ok(())
}

/// Assign dense wire ids in dependency order
///
/// A depth-first walk from every object assigns ids post-order, so the
/// children of a component group always carry smaller ids and serialize
/// first. Cycles are unwritable and fail with [`Error::GraphCycle`].
fn assign_ids(scene: &Scene) -> Result<HashMap<ObjectId, u32>> {
    let base = if scene.materials.is_empty() {
        1
    } else {
        MATERIAL_GROUP_ID + 1
    };
    let mut ids = HashMap::with_capacity(scene.objects.len());
    let mut path = Vec::new();
    for &id in scene.objects.keys() {
        visit(scene, id, base, &mut ids, &mut path)?;
    }
    Ok(ids)
}

fn visit(
    scene: &Scene,
    id: ObjectId,
    base: u32,
    ids: &mut HashMap<ObjectId, u32>,
    path: &mut Vec<ObjectId>,
) -> Result<()> {
    if ids.contains_key(&id) {
        return Ok(());
    }
    if path.contains(&id) {
        return Err(Error::GraphCycle(id));
    }
    let object = scene
        .objects
        .get(&id)
        .ok_or_else(|| Error::dangling_reference("component reference", id))?;
    if let Shape::Components(components) = &object.shape {
        path.push(id);
        for component in components {
            visit(scene, component.object_id, base, ids, path)?;
        }
        path.pop();
    }
    let assigned = base + ids.len() as u32;
    ids.insert(id, assigned);
    Ok(())
}

/// Format RGBA as `#RRGGBB`, or `#RRGGBBAA` when not fully opaque
fn format_color((r, g, b, a): (u8, u8, u8, u8)) -> String {
    if a == 255 {
        format!("#{:02X}{:02X}{:02X}", r, g, b)
    } else {
        format!("#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_model_xml;
    use crate::scene::{
        BuildItem, ComponentRef, Material, Mesh, MetadataEntry, SceneObject, Transform, Triangle,
        Vertex,
    };

    fn triangle_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::new(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::new(10.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::new(0.0, 10.0, 0.0));
        mesh.triangles.push(Triangle::new(0, 1, 2));
        mesh
    }

    #[test]
    fn writes_reparsable_model() {
        let mut scene = Scene::new();
        scene.metadata.push(MetadataEntry::new("Title", "Wedge"));
        scene.objects.insert(4, SceneObject::mesh(triangle_mesh()));
        scene.build.push(BuildItem::new(4));

        let xml = write_model_xml(&scene).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(CORE_NAMESPACE));

        let back = parse_model_xml(&xml).unwrap();
        assert_eq!(back.unit, "millimeter");
        assert_eq!(back.metadata_value("Title"), Some("Wedge"));
        assert_eq!(back.objects.len(), 1);
        assert_eq!(back.build.len(), 1);
        let Shape::Mesh(mesh) = &back.objects[&1].shape else {
            panic!("expected a mesh object");
        };
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.triangles.len(), 1);
    }

    #[test]
    fn identity_transforms_are_omitted() {
        let mut scene = Scene::new();
        scene.objects.insert(1, SceneObject::mesh(triangle_mesh()));
        scene.build.push(BuildItem::new(1));
        scene
            .build
            .push(BuildItem::with_transform(1, Transform::translation(5.0, 0.0, 0.0)));

        let xml = write_model_xml(&scene).unwrap();
        assert_eq!(xml.matches("transform=").count(), 1);
        assert!(xml.contains("transform=\"1 0 0 0 1 0 0 0 1 5 0 0\""));
    }

    #[test]
    fn children_are_declared_before_component_groups() {
        let mut scene = Scene::new();
        // Key order puts the group first; the writer must still emit the
        // referenced mesh with a smaller id.
        scene
            .objects
            .insert(1, SceneObject::components(vec![ComponentRef::new(9)]));
        scene.objects.insert(9, SceneObject::mesh(triangle_mesh()));
        scene.build.push(BuildItem::new(1));

        let xml = write_model_xml(&scene).unwrap();
        let mesh_pos = xml.find("<mesh>").unwrap();
        let group_pos = xml.find("<components>").unwrap();
        assert!(mesh_pos < group_pos);

        let back = parse_model_xml(&xml).unwrap();
        let Shape::Components(components) = &back.objects[&2].shape else {
            panic!("expected a component group");
        };
        assert_eq!(components[0].object_id, 1);
    }

    #[test]
    fn materials_serialize_as_basematerials_group() {
        let mut scene = Scene::new();
        scene.materials.push(Material {
            name: Some("Steel".to_string()),
            color: (128, 128, 140, 255),
            texture: None,
        });
        scene.materials.push(Material::color(255, 0, 0, 128));
        let mut mesh = triangle_mesh();
        mesh.material = Some(1);
        scene.objects.insert(1, SceneObject::mesh(mesh));
        scene.build.push(BuildItem::new(1));

        let xml = write_model_xml(&scene).unwrap();
        assert!(xml.contains("displaycolor=\"#80808C\""));
        assert!(xml.contains("displaycolor=\"#FF000080\""));

        let back = parse_model_xml(&xml).unwrap();
        assert_eq!(back.materials.len(), 2);
        let Shape::Mesh(mesh) = &back.objects[&2].shape else {
            panic!("expected a mesh object");
        };
        assert_eq!(mesh.material, Some(1));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut scene = Scene::new();
        scene
            .objects
            .insert(1, SceneObject::components(vec![ComponentRef::new(2)]));
        scene
            .objects
            .insert(2, SceneObject::components(vec![ComponentRef::new(1)]));
        scene.build.push(BuildItem::new(1));

        let result = write_model_xml(&scene);
        assert!(matches!(result, Err(Error::GraphCycle(_))));
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut scene = Scene::new();
        scene
            .objects
            .insert(1, SceneObject::components(vec![ComponentRef::new(42)]));
        assert!(matches!(
            write_model_xml(&scene),
            Err(Error::InvalidGeometry(_))
        ));

        let mut scene = Scene::new();
        scene.objects.insert(1, SceneObject::mesh(triangle_mesh()));
        scene.build.push(BuildItem::new(7));
        assert!(matches!(
            write_model_xml(&scene),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn passthrough_attributes_are_re_emitted() {
        let mut scene = Scene::new();
        let mut object = SceneObject::mesh(triangle_mesh());
        object
            .extra
            .push(("p:UUID".to_string(), "abc-123".to_string()));
        scene.objects.insert(1, object);
        let mut item = BuildItem::new(1);
        item.extra.push(("printable".to_string(), "1".to_string()));
        scene.build.push(item);

        let xml = write_model_xml(&scene).unwrap();
        assert!(xml.contains("p:UUID=\"abc-123\""));
        assert!(xml.contains("printable=\"1\""));
    }

    #[test]
    fn shared_objects_keep_a_single_declaration() {
        let mut scene = Scene::new();
        scene.objects.insert(3, SceneObject::mesh(triangle_mesh()));
        scene.objects.insert(
            5,
            SceneObject::components(vec![
                ComponentRef::new(3),
                ComponentRef::with_transform(3, Transform::translation(0.0, 20.0, 0.0)),
            ]),
        );
        scene.build.push(BuildItem::new(5));

        let xml = write_model_xml(&scene).unwrap();
        assert_eq!(xml.matches("<mesh>").count(), 1);
        assert_eq!(xml.matches("<component ").count(), 2);
    }
}
