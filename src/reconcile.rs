//! Scene Reconciler: between the scene graph and flat mesh instances
//!
//! Hosts that cannot represent component graphs consume a [`Scene`] through
//! [`flatten`], which resolves every build item into world-placed mesh
//! instances. The reverse direction is [`assemble`], which folds a flat
//! list of placed meshes back into a scene, sharing one object per distinct
//! mesh so duplicated geometry serializes once.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::scene::{BuildItem, Mesh, ObjectId, Scene, SceneObject, Shape, Transform};

/// One world-placed occurrence of a mesh object
#[derive(Debug, Clone, PartialEq)]
pub struct MeshInstance {
    /// Id of the mesh object within the source [`Scene`]
    pub object_id: ObjectId,
    /// Display name of the mesh object, if any
    pub name: Option<String>,
    /// Composed world transform of this occurrence
    pub transform: Transform,
    /// Resolved material (index into [`Scene::materials`])
    ///
    /// The mesh's own material wins; otherwise the override on the nearest
    /// enclosing component reference applies.
    pub material: Option<usize>,
}

/// Resolve the build table into flat, world-placed mesh instances
///
/// Instances appear in build order, depth-first through component groups.
/// Objects reachable twice along different paths yield one instance per
/// path; a path that revisits an object is a cycle and fails with
/// [`Error::GraphCycle`].
pub fn flatten(scene: &Scene) -> Result<Vec<MeshInstance>> {
    let mut instances = Vec::new();
    let mut path = Vec::new();
    for item in &scene.build {
        walk(
            scene,
            item.object_id,
            item.transform,
            None,
            &mut path,
            &mut instances,
        )?;
    }
    Ok(instances)
}

fn walk(
    scene: &Scene,
    id: ObjectId,
    acc: Transform,
    inherited: Option<usize>,
    path: &mut Vec<ObjectId>,
    out: &mut Vec<MeshInstance>,
) -> Result<()> {
    if path.contains(&id) {
        return Err(Error::GraphCycle(id));
    }
    let object = scene
        .objects
        .get(&id)
        .ok_or_else(|| Error::dangling_reference("scene reference", id))?;

    match &object.shape {
        Shape::Mesh(mesh) => {
            out.push(MeshInstance {
                object_id: id,
                name: object.name.clone(),
                transform: acc,
                material: mesh.material.or(inherited),
            });
        }
        Shape::Components(components) => {
            path.push(id);
            for component in components {
                walk(
                    scene,
                    component.object_id,
                    acc.multiply(&component.transform),
                    component.material.or(inherited),
                    path,
                    out,
                )?;
            }
            path.pop();
        }
    }
    Ok(())
}

/// Fold world-placed meshes back into a scene
///
/// Bit-identical meshes (same vertices, triangles, and material) collapse
/// into a single shared object; every input placement becomes a build item
/// referencing it. Object ids are assigned densely in first-appearance
/// order.
pub fn assemble(instances: &[(Mesh, Transform)]) -> Scene {
    let mut scene = Scene::new();
    let mut seen: HashMap<MeshKey, ObjectId> = HashMap::new();

    for (mesh, transform) in instances {
        let key = MeshKey::of(mesh);
        let id = match seen.get(&key) {
            Some(&id) => id,
            None => {
                let id = scene.objects.len() as ObjectId + 1;
                scene.objects.insert(id, SceneObject::mesh(mesh.clone()));
                seen.insert(key, id);
                id
            }
        };
        scene.build.push(BuildItem::with_transform(id, *transform));
    }

    scene
}

/// Hashable content key over a mesh (coordinates compared bit-exactly)
#[derive(PartialEq, Eq, Hash)]
struct MeshKey {
    vertices: Vec<(u64, u64, u64)>,
    triangles: Vec<(usize, usize, usize)>,
    material: Option<usize>,
}

impl MeshKey {
    fn of(mesh: &Mesh) -> Self {
        Self {
            vertices: mesh
                .vertices
                .iter()
                .map(|v| (v.x.to_bits(), v.y.to_bits(), v.z.to_bits()))
                .collect(),
            triangles: mesh
                .triangles
                .iter()
                .map(|t| (t.v1, t.v2, t.v3))
                .collect(),
            material: mesh.material,
        }
    }
}
