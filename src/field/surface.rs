use serde::{Deserialize, Serialize};

use super::value::FieldValue;
use crate::dimension::DimensionSet;
use crate::error::{Error, Result};
use crate::mesh::Mesh;

/// Values on faces: one per internal face, and one per boundary face grouped
/// by patch. An `oriented` field is a flux-like quantity whose sign is tied
/// to the face orientation, so it changes sign when a face is flipped.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceField<T> {
    pub name: String,
    pub dimensions: DimensionSet,
    pub oriented: bool,
    pub internal: Vec<T>,
    pub boundary: Vec<Vec<T>>,
}

impl<T: FieldValue> SurfaceField<T> {
    /// Build a field by evaluating `f` on every face of the mesh.
    ///
    pub fn from_fn<S, F>(name: S, mesh: &Mesh, dimensions: DimensionSet, oriented: bool, mut f: F) -> Self
    where
        S: Into<String>,
        F: FnMut(usize) -> T,
    {
        let internal = (0..mesh.n_internal_faces()).map(&mut f).collect();
        let boundary = mesh.patches().iter().map(|p| p.range().map(&mut f).collect()).collect();
        Self {
            name: name.into(),
            dimensions,
            oriented,
            internal,
            boundary,
        }
    }

    pub fn uniform<S: Into<String>>(name: S, mesh: &Mesh, dimensions: DimensionSet, value: T) -> Self {
        Self::from_fn(name, mesh, dimensions, false, |_| value)
    }

    /// The value on face `face`, internal or boundary, in mesh numbering.
    ///
    pub fn face_value(&self, mesh: &Mesh, face: usize) -> T {
        let n_internal = mesh.n_internal_faces();
        if face < n_internal {
            return self.internal[face];
        }
        for (patch, values) in mesh.patches().iter().zip(&self.boundary) {
            if patch.range().contains(&face) {
                return values[face - patch.start];
            }
        }
        panic!("face {} is outside the mesh", face)
    }

    /// All face values in mesh numbering.
    pub fn flatten(&self) -> Vec<T> {
        let mut all = self.internal.clone();
        for values in &self.boundary {
            all.extend_from_slice(values)
        }
        all
    }

    /// Check that the field has the shape of `mesh`.
    ///
    pub fn check(&self, mesh: &Mesh) -> Result<()> {
        let bad = |details: String| Err(Error::topology("surface field", format!("{}: {}", self.name, details)));
        if self.internal.len() != mesh.n_internal_faces() {
            return bad(format!("{} internal values for {} faces", self.internal.len(), mesh.n_internal_faces()));
        }
        if self.boundary.len() != mesh.patches().len() {
            return bad(format!("{} patches, mesh has {}", self.boundary.len(), mesh.patches().len()));
        }
        for (values, patch) in self.boundary.iter().zip(mesh.patches()) {
            if values.len() != patch.size {
                return bad(format!("patch {} has {} values for {} faces", patch.name, values.len(), patch.size));
            }
        }
        Ok(())
    }

    /// Multiply face by face with a scalar surface field.
    ///
    pub fn scale(&self, by: &SurfaceField<f64>) -> Self {
        Self {
            name: format!("{}*{}", by.name, self.name),
            dimensions: by.dimensions * self.dimensions,
            oriented: self.oriented != by.oriented,
            internal: self.internal.iter().zip(&by.internal).map(|(a, b)| *a * *b).collect(),
            boundary: self
                .boundary
                .iter()
                .zip(&by.boundary)
                .map(|(a, b)| a.iter().zip(b).map(|(a, b)| *a * *b).collect())
                .collect(),
        }
    }

    pub fn map_values<U: FieldValue, F: Fn(T) -> U>(&self, name: &str, dimensions: DimensionSet, f: F) -> SurfaceField<U> {
        SurfaceField {
            name: name.to_string(),
            dimensions,
            oriented: self.oriented,
            internal: self.internal.iter().map(|v| f(*v)).collect(),
            boundary: self.boundary.iter().map(|p| p.iter().map(|v| f(*v)).collect()).collect(),
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::dimension::{DIMLESS, DIM_LENGTH};
    use crate::meshing::BlockMesh;

    #[test]
    fn faces_are_addressed_in_mesh_order() {
        let mesh = BlockMesh::line(3, 1.0).build().unwrap();
        let sf = SurfaceField::from_fn("id", &mesh, DIMLESS, false, |f| f as f64);
        assert!(sf.check(&mesh).is_ok());
        for face in 0..mesh.n_faces() {
            assert_eq!(sf.face_value(&mesh, face), face as f64);
        }
        assert_eq!(sf.flatten().len(), mesh.n_faces());
    }

    #[test]
    fn scaling_combines_dimensions_and_orientation() {
        let mesh = BlockMesh::line(2, 1.0).build().unwrap();
        let mut phi = SurfaceField::uniform("phi", &mesh, DIM_LENGTH, 2.0);
        phi.oriented = true;
        let gamma = SurfaceField::uniform("gamma", &mesh, DIM_LENGTH, 3.0);
        let product = phi.scale(&gamma);
        assert!(product.oriented);
        assert_eq!(product.internal[0], 6.0);
        assert_eq!(product.dimensions, DIM_LENGTH * DIM_LENGTH);
    }
}
