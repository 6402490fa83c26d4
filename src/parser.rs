//! Model Parser: 3MF model XML into a [`Scene`]
//!
//! A single event-loop pass over the model part. All numeric parsing is
//! strict (malformed text is an error, never a silent zero), object and
//! build references are validated before the parse returns, and attributes
//! the codec does not recognize are captured for verbatim re-emission.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::scene::{
    BuildItem, ComponentRef, Material, Mesh, MetadataEntry, ObjectId, Scene, SceneObject, Shape,
    Transform, Triangle, Vertex,
};

/// The 3MF core specification namespace
pub const CORE_NAMESPACE: &str = "http://schemas.microsoft.com/3dmanufacturing/core/2015/02";

/// An `<object>` element being accumulated
struct PendingObject {
    id: ObjectId,
    name: Option<String>,
    pid: Option<u32>,
    pindex: Option<usize>,
    extra: Vec<(String, String)>,
    mesh: Option<Mesh>,
    components: Option<Vec<ComponentRef>>,
}

/// Parse the model part XML into a [`Scene`]
pub fn parse_model_xml(xml: &str) -> Result<Scene> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut scene = Scene::new();
    let mut buf = Vec::new();

    // basematerials group id -> offset of its first entry in scene.materials
    let mut material_groups: HashMap<u32, usize> = HashMap::new();

    let mut in_resources = false;
    let mut in_build = false;
    let mut pending: Option<PendingObject> = None;
    let mut pending_metadata: Option<(String, Option<bool>)> = None;

    loop {
        let ev = reader.read_event_into(&mut buf)?;
        let empty = matches!(&ev, Event::Empty(_));
        match ev {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = e.name();
                let name = std::str::from_utf8(name.as_ref())
                    .map_err(|err| Error::MalformedXml(err.to_string()))?
                    .to_string();

                match name.as_str() {
                    "model" => parse_model_attrs(e, &mut scene)?,
                    "metadata" => {
                        let mut attrs = attributes(e)?;
                        let entry_name = take(&mut attrs, "name")
                            .ok_or_else(|| Error::missing_attribute("metadata", "name"))?;
                        let preserve = match take(&mut attrs, "preserve") {
                            Some(v) => Some(v == "1" || v.eq_ignore_ascii_case("true")),
                            None => None,
                        };
                        if empty {
                            scene.metadata.push(MetadataEntry {
                                name: entry_name,
                                value: String::new(),
                                preserve,
                            });
                        } else {
                            pending_metadata = Some((entry_name, preserve));
                        }
                    }
                    "resources" if !empty => in_resources = true,
                    "build" if !empty => in_build = true,
                    "basematerials" if in_resources => {
                        let mut attrs = attributes(e)?;
                        let id = take(&mut attrs, "id")
                            .ok_or_else(|| Error::missing_attribute("basematerials", "id"))?;
                        let id = parse_u32("basematerials id", &id)?;
                        material_groups.insert(id, scene.materials.len());
                    }
                    "base" if in_resources => {
                        let mut attrs = attributes(e)?;
                        let color = match take(&mut attrs, "displaycolor") {
                            Some(c) => parse_display_color(&c)?,
                            None => (255, 255, 255, 255),
                        };
                        scene.materials.push(Material {
                            name: take(&mut attrs, "name"),
                            color,
                            texture: take(&mut attrs, "texture"),
                        });
                    }
                    "object" if in_resources => {
                        let object = parse_object_attrs(e)?;
                        if empty {
                            finalize_object(object, &mut scene, &material_groups)?;
                        } else {
                            pending = Some(object);
                        }
                    }
                    "mesh" => {
                        if let Some(obj) = pending.as_mut() {
                            if obj.mesh.is_some() || obj.components.is_some() {
                                return Err(Error::MalformedXml(format!(
                                    "object {} declares more than one shape",
                                    obj.id
                                )));
                            }
                            obj.mesh = Some(Mesh::new());
                        }
                    }
                    "vertex" => {
                        if let Some(mesh) = pending.as_mut().and_then(|o| o.mesh.as_mut()) {
                            mesh.vertices.push(parse_vertex(e)?);
                        }
                    }
                    "triangle" => {
                        if let Some(mesh) = pending.as_mut().and_then(|o| o.mesh.as_mut()) {
                            mesh.triangles.push(parse_triangle(e)?);
                        }
                    }
                    "components" => {
                        if let Some(obj) = pending.as_mut() {
                            if obj.mesh.is_some() || obj.components.is_some() {
                                return Err(Error::MalformedXml(format!(
                                    "object {} declares more than one shape",
                                    obj.id
                                )));
                            }
                            obj.components = Some(Vec::new());
                        }
                    }
                    "component" => {
                        if let Some(components) =
                            pending.as_mut().and_then(|o| o.components.as_mut())
                        {
                            let component =
                                parse_component(e, &material_groups, scene.materials.len())?;
                            components.push(component);
                        }
                    }
                    "item" if in_build => {
                        scene.build.push(parse_build_item(e)?);
                    }
                    // Extension elements (prefixed) and unknown core elements
                    // are skipped for forward compatibility.
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let Some((name, preserve)) = pending_metadata.take() {
                    let value = t
                        .xml_content()
                        .map_err(|err| Error::MalformedXml(err.to_string()))?
                        .into_owned();
                    scene.metadata.push(MetadataEntry {
                        name,
                        value,
                        preserve,
                    });
                }
            }
            Event::End(ref e) => {
                let name = e.name();
                let name = std::str::from_utf8(name.as_ref())
                    .map_err(|err| Error::MalformedXml(err.to_string()))?
                    .to_string();
                match name.as_str() {
                    "resources" => in_resources = false,
                    "build" => in_build = false,
                    "object" => {
                        if let Some(object) = pending.take() {
                            finalize_object(object, &mut scene, &material_groups)?;
                        }
                    }
                    "metadata" => {
                        // <metadata name=...></metadata> with no text
                        if let Some((name, preserve)) = pending_metadata.take() {
                            scene.metadata.push(MetadataEntry {
                                name,
                                value: String::new(),
                                preserve,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    validate_references(&scene)?;
    Ok(scene)
}

/// Handle the `<model>` element: unit and required-extension rejection
fn parse_model_attrs(e: &BytesStart, scene: &mut Scene) -> Result<()> {
    let attrs = attributes(e)?;

    let mut namespaces: HashMap<&str, &str> = HashMap::new();
    let mut required: Option<&str> = None;
    for (key, value) in &attrs {
        if key == "unit" {
            scene.unit = value.clone();
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespaces.insert(prefix, value);
        } else if key == "requiredextensions" {
            required = Some(value);
        }
    }

    // Fail fast before any resources are parsed: a document that requires
    // an extension we do not implement cannot be represented faithfully.
    if let Some(required) = required {
        for prefix in required.split_whitespace() {
            let namespace = namespaces.get(prefix).copied().ok_or_else(|| {
                Error::MalformedXml(format!(
                    "requiredextensions names undeclared prefix '{}'",
                    prefix
                ))
            })?;
            if namespace != CORE_NAMESPACE {
                return Err(Error::UnsupportedExtension(namespace.to_string()));
            }
        }
    }

    Ok(())
}

/// Parse `<object>` attributes into a pending object
fn parse_object_attrs(e: &BytesStart) -> Result<PendingObject> {
    let mut attrs = attributes(e)?;
    let id = take(&mut attrs, "id").ok_or_else(|| Error::missing_attribute("object", "id"))?;
    let id = parse_u32("object id", &id)?;
    let name = take(&mut attrs, "name");
    let pid = match take(&mut attrs, "pid") {
        Some(v) => Some(parse_u32("object pid", &v)?),
        None => None,
    };
    let pindex = match take(&mut attrs, "pindex") {
        Some(v) => Some(parse_usize("object pindex", &v)?),
        None => None,
    };
    Ok(PendingObject {
        id,
        name,
        pid,
        pindex,
        extra: attrs,
        mesh: None,
        components: None,
    })
}

/// Parse a `<vertex>` element
fn parse_vertex(e: &BytesStart) -> Result<Vertex> {
    let mut attrs = attributes(e)?;
    let x = take(&mut attrs, "x").ok_or_else(|| Error::missing_attribute("vertex", "x"))?;
    let y = take(&mut attrs, "y").ok_or_else(|| Error::missing_attribute("vertex", "y"))?;
    let z = take(&mut attrs, "z").ok_or_else(|| Error::missing_attribute("vertex", "z"))?;
    Ok(Vertex::new(
        parse_f64("vertex x", &x)?,
        parse_f64("vertex y", &y)?,
        parse_f64("vertex z", &z)?,
    ))
}

/// Parse a `<triangle>` element
///
/// Indices are range-checked against the vertex table when the owning
/// object closes. Per-triangle property attributes need the materials
/// extension to mean anything and are ignored here.
fn parse_triangle(e: &BytesStart) -> Result<Triangle> {
    let mut attrs = attributes(e)?;
    let v1 = take(&mut attrs, "v1").ok_or_else(|| Error::missing_attribute("triangle", "v1"))?;
    let v2 = take(&mut attrs, "v2").ok_or_else(|| Error::missing_attribute("triangle", "v2"))?;
    let v3 = take(&mut attrs, "v3").ok_or_else(|| Error::missing_attribute("triangle", "v3"))?;
    Ok(Triangle::new(
        parse_usize("triangle v1", &v1)?,
        parse_usize("triangle v2", &v2)?,
        parse_usize("triangle v3", &v3)?,
    ))
}

/// Parse a `<component>` element
fn parse_component(
    e: &BytesStart,
    material_groups: &HashMap<u32, usize>,
    material_count: usize,
) -> Result<ComponentRef> {
    let mut attrs = attributes(e)?;
    let object_id =
        take(&mut attrs, "objectid").ok_or_else(|| Error::missing_attribute("component", "objectid"))?;
    let object_id = parse_u32("component objectid", &object_id)?;
    let transform = match take(&mut attrs, "transform") {
        Some(t) => Transform::from_model_attr(&t)?,
        None => Transform::IDENTITY,
    };
    let pid = match take(&mut attrs, "pid") {
        Some(v) => Some(parse_u32("component pid", &v)?),
        None => None,
    };
    let pindex = match take(&mut attrs, "pindex") {
        Some(v) => Some(parse_usize("component pindex", &v)?),
        None => None,
    };
    let material = resolve_material(material_groups, material_count, pid, pindex, "component")?;
    Ok(ComponentRef {
        object_id,
        transform,
        material,
        extra: attrs,
    })
}

/// Parse a `<item>` element from the build table
fn parse_build_item(e: &BytesStart) -> Result<BuildItem> {
    let mut attrs = attributes(e)?;
    let object_id =
        take(&mut attrs, "objectid").ok_or_else(|| Error::missing_attribute("item", "objectid"))?;
    let object_id = parse_u32("item objectid", &object_id)?;
    let transform = match take(&mut attrs, "transform") {
        Some(t) => Transform::from_model_attr(&t)?,
        None => Transform::IDENTITY,
    };
    Ok(BuildItem {
        object_id,
        transform,
        extra: attrs,
    })
}

/// Close out an `<object>`: shape checks, index validation, material lookup
fn finalize_object(
    object: PendingObject,
    scene: &mut Scene,
    material_groups: &HashMap<u32, usize>,
) -> Result<()> {
    let PendingObject {
        id,
        name,
        pid,
        pindex,
        extra,
        mesh,
        components,
    } = object;

    if scene.objects.contains_key(&id) {
        return Err(Error::MalformedXml(format!("duplicate object id {}", id)));
    }

    let shape = match (mesh, components) {
        (Some(mut mesh), None) => {
            let vertex_count = mesh.vertices.len();
            for triangle in &mesh.triangles {
                if triangle.v1 >= vertex_count
                    || triangle.v2 >= vertex_count
                    || triangle.v3 >= vertex_count
                {
                    return Err(Error::InvalidGeometry(format!(
                        "object {}: triangle index out of range (mesh has {} vertices)",
                        id, vertex_count
                    )));
                }
            }
            mesh.material = resolve_material(
                material_groups,
                scene.materials.len(),
                pid,
                pindex,
                "object",
            )?;
            Shape::Mesh(mesh)
        }
        (None, Some(components)) => Shape::Components(components),
        (Some(_), Some(_)) => {
            return Err(Error::MalformedXml(format!(
                "object {} declares both a mesh and components",
                id
            )));
        }
        (None, None) => {
            return Err(Error::MalformedXml(format!(
                "object {} declares neither a mesh nor components",
                id
            )));
        }
    };

    scene.objects.insert(id, SceneObject { name, shape, extra });
    Ok(())
}

/// Fail-fast reference validation over the finished object table
fn validate_references(scene: &Scene) -> Result<()> {
    for item in &scene.build {
        if !scene.objects.contains_key(&item.object_id) {
            return Err(Error::dangling_reference("build item", item.object_id));
        }
    }
    for (id, object) in &scene.objects {
        if let Shape::Components(components) = &object.shape {
            for component in components {
                if !scene.objects.contains_key(&component.object_id) {
                    return Err(Error::InvalidGeometry(format!(
                        "component in object {} references object {}, which does not exist",
                        id, component.object_id
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Map a (group id, index) property pair to a flat material table index
fn resolve_material(
    material_groups: &HashMap<u32, usize>,
    material_count: usize,
    pid: Option<u32>,
    pindex: Option<usize>,
    what: &str,
) -> Result<Option<usize>> {
    let Some(pid) = pid else {
        return Ok(None);
    };
    let offset = material_groups.get(&pid).ok_or_else(|| {
        Error::InvalidGeometry(format!(
            "{} references material group {}, which does not exist",
            what, pid
        ))
    })?;
    let index = offset + pindex.unwrap_or(0);
    if index >= material_count {
        return Err(Error::InvalidGeometry(format!(
            "{} references material index {} in group {}, which is out of range",
            what,
            pindex.unwrap_or(0),
            pid
        )));
    }
    Ok(Some(index))
}

/// Parse a `displaycolor` value (`#RRGGBB` or `#RRGGBBAA`)
fn parse_display_color(text: &str) -> Result<(u8, u8, u8, u8)> {
    let hex = text.strip_prefix('#').unwrap_or(text);
    // Byte-sliced below; multi-byte input must be rejected up front.
    if !hex.is_ascii() {
        return Err(Error::bad_number("displaycolor", text));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|_| Error::bad_number("displaycolor", text))
    };
    match hex.len() {
        6 => Ok((channel(0..2)?, channel(2..4)?, channel(4..6)?, 255)),
        8 => Ok((
            channel(0..2)?,
            channel(2..4)?,
            channel(4..6)?,
            channel(6..8)?,
        )),
        _ => Err(Error::bad_number("displaycolor", text)),
    }
}

/// Collect an element's attributes as ordered name/value pairs
fn attributes(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| Error::MalformedXml(err.to_string()))?;
        let value = std::str::from_utf8(&attr.value)
            .map_err(|err| Error::MalformedXml(err.to_string()))?;
        out.push((key.to_string(), value.to_string()));
    }
    Ok(out)
}

/// Remove and return a recognized attribute; what remains is passthrough
fn take(attrs: &mut Vec<(String, String)>, key: &str) -> Option<String> {
    attrs
        .iter()
        .position(|(k, _)| k == key)
        .map(|i| attrs.remove(i).1)
}

fn parse_f64(field: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| Error::bad_number(field, value))
}

fn parse_u32(field: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| Error::bad_number(field, value))
}

fn parse_usize(field: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| Error::bad_number(field, value))
}
