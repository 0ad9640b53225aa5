//! Object graph resolution into a single triangle buffer.
//!
//! Resolution starts from the root document's build items. A root document
//! whose build manifest lists no items at all, or a package with no root
//! document, contributes every mesh of every document instead.
//!
//! Component graphs are walked with an explicit work stack, so nesting depth
//! is bounded by memory rather than by the thread's stack.

use std::collections::HashSet;

use nalgebra::Matrix4;

use crate::error::CodecResult;
use crate::geometry::FlatMesh;
use crate::package::Package;
use crate::transform::Transform;

/// Flatten `package` starting from the document keyed `root_document`.
///
/// References to missing documents or objects contribute nothing. Component
/// cycles are cut where they close and logged.
///
/// # Errors
///
/// Returns `CodecError::MeshTooLarge` if the flattened vertex count no
/// longer fits 32-bit indices.
pub fn flatten(
    package: &Package,
    root_document: &str,
    apply_transforms: bool,
) -> CodecResult<FlatMesh> {
    let mut flattener = Flattener::new(package, apply_transforms);

    match package.document(root_document) {
        Some(root) if !root.build_items().is_empty() => {
            for item in root.build_items() {
                let Some(object_id) = item.object_id.as_deref() else {
                    tracing::debug!(root = root_document, "build item without objectid");
                    continue;
                };
                let placement = if apply_transforms { item.transform } else { None };
                flattener.resolve(object_id, root_document, placement)?;
            }
        }
        _ => {
            tracing::debug!(
                root = root_document,
                documents = package.len(),
                "no build items, flattening every mesh"
            );
            for document in package.documents() {
                for (_, mesh) in document.meshes() {
                    flattener.output.append(mesh, None)?;
                }
            }
        }
    }

    let output = flattener.output;
    if output.dropped_triangles() > 0 {
        tracing::warn!(
            dropped = output.dropped_triangles(),
            "skipped triangles with out-of-range vertex indices"
        );
    }
    Ok(output)
}

/// (document, object) pair identifying one object in a package.
type ObjectKey = (String, String);

enum Step {
    Enter {
        document: String,
        object_id: String,
        placement: Option<Matrix4<f32>>,
    },
    /// Every component of the object has been emitted.
    Exit(ObjectKey),
}

struct Flattener<'p> {
    package: &'p Package,
    apply_transforms: bool,
    /// Objects on the current resolution path.
    active: HashSet<ObjectKey>,
    output: FlatMesh,
}

impl<'p> Flattener<'p> {
    fn new(package: &'p Package, apply_transforms: bool) -> Self {
        Self {
            package,
            apply_transforms,
            active: HashSet::new(),
            output: FlatMesh::new(),
        }
    }

    /// Append `object_id` and everything it references, depth first in
    /// document order.
    fn resolve(
        &mut self,
        object_id: &str,
        document: &str,
        placement: Option<Matrix4<f32>>,
    ) -> CodecResult<()> {
        let package = self.package;
        let mut stack = vec![Step::Enter {
            document: document.to_string(),
            object_id: object_id.to_string(),
            placement,
        }];

        while let Some(step) = stack.pop() {
            let (document, object_id, placement) = match step {
                Step::Exit(key) => {
                    self.active.remove(&key);
                    continue;
                }
                Step::Enter {
                    document,
                    object_id,
                    placement,
                } => (document, object_id, placement),
            };

            let Some(model) = package.document(&document) else {
                tracing::debug!(%document, %object_id, "reference into missing document");
                continue;
            };

            let key = (document, object_id);
            if self.active.contains(&key) {
                tracing::warn!(
                    document = %key.0,
                    object_id = %key.1,
                    "component cycle, skipping reference"
                );
                continue;
            }

            if let Some(mesh) = model.mesh(&key.1) {
                self.output.append(mesh, placement.as_ref())?;
            }

            let components = model.components(&key.1).unwrap_or_default();
            self.active.insert(key.clone());
            stack.push(Step::Exit(key.clone()));
            // Reversed so the first component is popped first.
            for component in components.iter().rev() {
                let child = if self.apply_transforms {
                    Transform::compose(placement.as_ref(), component.transform.as_ref())
                } else {
                    None
                };
                stack.push(Step::Enter {
                    document: component.target_document(&key.0),
                    object_id: component.object_id.clone(),
                    placement: child,
                });
            }
        }

        Ok(())
    }
}
