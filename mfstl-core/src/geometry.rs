//! Mesh buffers and per-triangle normals
use nalgebra::{Matrix4, Point3, Vector3};

use crate::error::{CodecError, CodecResult};

/// An indexed triangle mesh as read from one 3MF object.
///
/// Triangle indices are local to this mesh's vertex list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f32>>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, x: f32, y: f32, z: f32) {
        self.vertices.push(Point3::new(x, y, z));
    }

    pub fn add_triangle(&mut self, v1: u32, v2: u32, v3: u32) {
        self.triangles.push([v1, v2, v3]);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

/// Accumulator for the flattened output of one conversion.
///
/// Every appended mesh has its triangle indices shifted by the number of
/// vertices already present, so indices stay valid in the combined buffer.
#[derive(Debug, Clone, Default)]
pub struct FlatMesh {
    vertices: Vec<Point3<f32>>,
    triangles: Vec<[u32; 3]>,
    dropped: usize,
}

impl FlatMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `mesh`, optionally placing its vertices with `transform`.
    ///
    /// Triangles that reference a vertex outside `mesh` are dropped and
    /// counted in [`FlatMesh::dropped_triangles`].
    pub fn append(&mut self, mesh: &Mesh, transform: Option<&Matrix4<f32>>) -> CodecResult<()> {
        let total = self.vertices.len() + mesh.vertices.len();
        if u32::try_from(total).is_err() {
            return Err(CodecError::MeshTooLarge {
                what: "vertices",
                count: total,
            });
        }
        // Cannot truncate: `total` fits in u32.
        let offset = self.vertices.len() as u32;
        let local_count = mesh.vertices.len();

        match transform {
            Some(matrix) => self
                .vertices
                .extend(mesh.vertices.iter().map(|v| matrix.transform_point(v))),
            None => self.vertices.extend_from_slice(&mesh.vertices),
        }

        for &[a, b, c] in &mesh.triangles {
            if [a, b, c].iter().any(|&i| i as usize >= local_count) {
                self.dropped += 1;
                continue;
            }
            self.triangles.push([a + offset, b + offset, c + offset]);
        }

        Ok(())
    }

    pub fn vertices(&self) -> &[Point3<f32>] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Number of malformed triangles skipped while appending.
    pub fn dropped_triangles(&self) -> usize {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Vertex positions of each triangle, in buffer order.
    pub fn triangle_positions(&self) -> impl Iterator<Item = [&Point3<f32>; 3]> + '_ {
        self.triangles.iter().map(move |&[a, b, c]| {
            [
                &self.vertices[a as usize],
                &self.vertices[b as usize],
                &self.vertices[c as usize],
            ]
        })
    }
}

/// Calculate the unit face normal of triangle ABC (right-hand rule).
///
/// A triangle whose cross product has exactly zero magnitude (collinear or
/// coincident points) gets the zero vector instead of NaN.
pub fn triangle_normal(a: &Point3<f32>, b: &Point3<f32>, c: &Point3<f32>) -> Vector3<f32> {
    let a = a.cast::<f64>();
    let edge1 = b.cast::<f64>() - a;
    let edge2 = c.cast::<f64>() - a;

    let normal = edge1.cross(&edge2);
    let magnitude = normal.norm();
    if magnitude == 0.0 {
        return Vector3::zeros();
    }

    (normal / magnitude).cast::<f32>()
}
