//! Values attached to the cells and faces of a mesh. A volume field holds one
//! value per cell plus one sub-field per boundary patch, each governed by a
//! polymorphic boundary condition; a surface field holds one value per face.

pub mod boundary;
pub mod coefficient;
pub mod conditions;
pub mod surface;
pub mod value;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::dimension::DimensionSet;
use crate::error::{Error, Result};
use crate::mesh::{Mesh, MeshMap, PatchMap, PolyPatch};
pub use boundary::{BoundaryCondition, BoundarySpec};
pub use coefficient::{Coefficient, Diffusivity};
pub use surface::SurfaceField;
pub use value::{FieldValue, Gradable};

/// Number of previous time levels a field retains.
pub const MAX_OLD_TIMES: usize = 2;

/// The values of one patch of a volume field together with the condition
/// that governs them.
///
#[derive(Clone)]
pub struct PatchField<T: FieldValue> {
    values: Vec<T>,
    condition: Box<dyn BoundaryCondition<T>>,
}

impl<T: FieldValue> PatchField<T> {
    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn condition(&self) -> &dyn BoundaryCondition<T> {
        self.condition.as_ref()
    }

    pub fn coupled(&self) -> bool {
        self.condition.coupled()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A snapshot of a field at a previous time step.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeLevel<T> {
    pub internal: Vec<T>,
    pub boundary: Vec<Vec<T>>,
}

/// The stored form of one patch of a volume field.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchData<T> {
    pub patch: String,
    pub spec: BoundarySpec<T>,
    pub values: Vec<T>,
}

/// The stored form of a volume field.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldData<T> {
    pub name: String,
    pub dimensions: DimensionSet,
    pub internal: Vec<T>,
    pub boundary: Vec<PatchData<T>>,
}

/// A field of values in cells, with boundary conditions on every patch and
/// a bounded history of previous time levels.
///
#[derive(Clone)]
pub struct VolField<T: FieldValue> {
    name: String,
    dimensions: DimensionSet,
    internal: Vec<T>,
    boundary: Vec<PatchField<T>>,
    old: Vec<TimeLevel<T>>,
}

impl<T: FieldValue> VolField<T> {
    /// Create a field from cell values and one condition per patch. Patch
    /// values start as the adjacent cell values and are then evaluated, so
    /// on a decomposed mesh every rank must construct its fields in the
    /// same order.
    ///
    pub fn new<S: Into<String>>(
        name: S,
        mesh: &Mesh,
        dimensions: DimensionSet,
        internal: Vec<T>,
        specs: Vec<BoundarySpec<T>>,
    ) -> Result<Self> {
        let name = name.into();
        check_size(&name, "cells", internal.len(), mesh.n_cells())?;
        check_size(&name, "patches", specs.len(), mesh.patches().len())?;

        let boundary = specs
            .into_iter()
            .enumerate()
            .map(|(patch, spec)| {
                Ok(PatchField {
                    values: boundary::patch_internal_field(mesh, patch, &internal),
                    condition: spec.into_condition(mesh, patch)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut field = Self {
            name,
            dimensions,
            internal,
            boundary,
            old: Vec::new(),
        };
        field.correct_boundary_conditions(mesh)?;
        Ok(field)
    }

    /// A uniform field; `f` picks the condition on each non-coupled patch.
    ///
    pub fn uniform<S, F>(name: S, mesh: &Mesh, dimensions: DimensionSet, value: T, f: F) -> Result<Self>
    where
        S: Into<String>,
        F: Fn(&PolyPatch) -> BoundarySpec<T>,
    {
        let specs = BoundarySpec::for_patches(mesh.patches(), f);
        Self::new(name, mesh, dimensions, vec![value; mesh.n_cells()], specs)
    }

    /// A derived field: calculated patches everywhere except on coupled
    /// patches, with patch values extrapolated from the adjacent cells.
    ///
    pub fn new_calculated<S: Into<String>>(
        name: S,
        mesh: &Mesh,
        dimensions: DimensionSet,
        internal: Vec<T>,
    ) -> Result<Self> {
        let specs = BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::Calculated);
        Self::new(name, mesh, dimensions, internal, specs)
    }

    /// Rebuild a field from its stored form. Patch values are taken as
    /// stored; nothing is evaluated.
    ///
    pub fn from_data(mesh: &Mesh, data: FieldData<T>) -> Result<Self> {
        check_size(&data.name, "cells", data.internal.len(), mesh.n_cells())?;
        check_size(&data.name, "patches", data.boundary.len(), mesh.patches().len())?;

        let mut boundary = Vec::with_capacity(data.boundary.len());
        for (patch, pd) in data.boundary.into_iter().enumerate() {
            let poly = mesh.patch(patch);
            if pd.patch != poly.name {
                return Err(Error::topology(
                    "field",
                    format!("field {} patch {} is {}, mesh has {}", data.name, patch, pd.patch, poly.name),
                ));
            }
            check_size(&data.name, "patch faces", pd.values.len(), poly.size)?;
            boundary.push(PatchField {
                values: pd.values,
                condition: pd.spec.into_condition(mesh, patch)?,
            });
        }
        Ok(Self {
            name: data.name,
            dimensions: data.dimensions,
            internal: data.internal,
            boundary,
            old: Vec::new(),
        })
    }

    pub fn to_data(&self, mesh: &Mesh) -> FieldData<T> {
        FieldData {
            name: self.name.clone(),
            dimensions: self.dimensions,
            internal: self.internal.clone(),
            boundary: self
                .boundary
                .iter()
                .zip(mesh.patches())
                .map(|(pf, poly)| PatchData {
                    patch: poly.name.clone(),
                    spec: pf.condition.spec(),
                    values: pf.values.clone(),
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename<S: Into<String>>(&mut self, name: S) {
        self.name = name.into()
    }

    pub fn dimensions(&self) -> DimensionSet {
        self.dimensions
    }

    pub fn value(&self, cell: usize) -> T {
        self.internal[cell]
    }

    pub fn boundary_value(&self, patch: usize, face: usize) -> T {
        self.boundary[patch].values[face]
    }

    pub fn internal(&self) -> &[T] {
        &self.internal
    }

    /// Mutable access to the cell values. Boundary values are stale until
    /// the next `correct_boundary_conditions`.
    pub fn internal_mut(&mut self) -> &mut [T] {
        &mut self.internal
    }

    pub fn boundary(&self) -> &[PatchField<T>] {
        &self.boundary
    }

    pub fn patch(&self, patch: usize) -> &PatchField<T> {
        &self.boundary[patch]
    }

    pub fn patch_mut(&mut self, patch: usize) -> &mut PatchField<T> {
        &mut self.boundary[patch]
    }

    /// Set every face of a patch to `value`; the usual way of prescribing a
    /// fixed value.
    pub fn assign_patch(&mut self, patch: usize, value: T) {
        self.boundary[patch].values.iter_mut().for_each(|v| *v = value)
    }

    /// One component of every cell value.
    pub fn component(&self, d: usize) -> Vec<f64> {
        self.internal.iter().map(|v| v.component(d)).collect()
    }

    pub fn replace_component(&mut self, d: usize, values: &[f64]) {
        for (v, x) in self.internal.iter_mut().zip(values) {
            v.set_component(d, *x)
        }
    }

    /// Re-evaluate every patch from the current cell values. All sends are
    /// posted before any receive is waited on.
    ///
    pub fn correct_boundary_conditions(&mut self, mesh: &Mesh) -> Result<()> {
        let tag = mesh.comm().next_tag();
        let internal = &self.internal;

        for pf in self.boundary.iter_mut() {
            pf.condition.update_coeffs(mesh, internal)?;
            pf.condition.initiate_evaluate(mesh, internal, tag)?;
        }
        for pf in self.boundary.iter_mut() {
            pf.condition.evaluate(mesh, internal, &mut pf.values, tag)?;
        }
        Ok(())
    }

    /// Whether no patch of this field pins its level on any rank. This is
    /// a collective call.
    ///
    pub fn need_reference(&self, mesh: &Mesh) -> Result<bool> {
        let fixes = self.boundary.iter().any(|pf| pf.condition.fixes_value());
        let any = mesh.comm().max(if fixes { 1.0 } else { 0.0 })?;
        Ok(any == 0.0)
    }

    pub fn n_old_times(&self) -> usize {
        self.old.len()
    }

    /// The field `n` steps ago (`n = 1` is the previous step). Level 0 is
    /// the current field and is not stored in the history.
    ///
    pub fn old_time(&self, n: usize) -> Result<&TimeLevel<T>> {
        if n == 0 {
            return Err(Error::Config(format!(
                "{}: old-time level 0 is the current field; use current_level",
                self.name
            )));
        }
        self.old.get(n - 1).ok_or_else(|| Error::InsufficientHistory {
            field: self.name.clone(),
            requested: n,
            available: self.old.len(),
        })
    }

    /// Push the current values onto the history, dropping the oldest level
    /// beyond the retained depth. Call once per time step, before the
    /// field is updated.
    ///
    pub fn store_old_time(&mut self) {
        self.old.insert(0, self.current_level());
        self.old.truncate(MAX_OLD_TIMES);
        debug!("{}: stored old time, {} level(s) retained", self.name, self.old.len());
    }

    pub fn current_level(&self) -> TimeLevel<T> {
        TimeLevel {
            internal: self.internal.clone(),
            boundary: self.boundary.iter().map(|pf| pf.values.clone()).collect(),
        }
    }

    /// Carry the field through a topology change. `mesh` is the mesh after
    /// the change. Cells with no old counterpart take the mean of the
    /// mapped cells; each condition decides about its new faces.
    ///
    pub fn map(&mut self, mesh: &Mesh, map: &MeshMap) -> Result<()> {
        check_size(&self.name, "mapped cells", map.cell_map.len(), mesh.n_cells())?;
        check_size(&self.name, "mapped patches", map.patch_maps.len(), self.boundary.len())?;

        self.internal = map_cells(&map.cell_map, &self.internal);

        for (patch, (pf, pm)) in self.boundary.iter_mut().zip(&map.patch_maps).enumerate() {
            check_size(&self.name, "mapped patch faces", pm.size(), mesh.patch(patch).size)?;
            let pif = boundary::patch_internal_field(mesh, patch, &self.internal);
            pf.values = pf.condition.auto_map(pm, &pf.values, &pif);
        }

        for level in self.old.iter_mut() {
            level.internal = map_cells(&map.cell_map, &level.internal);
            for (patch, (values, pm)) in level.boundary.iter_mut().zip(&map.patch_maps).enumerate() {
                let pif = boundary::patch_internal_field(mesh, patch, &level.internal);
                *values = map_faces(pm, values, &pif);
            }
        }
        Ok(())
    }
}

fn map_cells<T: FieldValue>(cell_map: &[Option<usize>], old: &[T]) -> Vec<T> {
    let mapped: Vec<T> = cell_map.iter().filter_map(|a| a.and_then(|i| old.get(i).copied())).collect();
    let fill = match mapped.len() {
        0 => T::zero(),
        n => mapped.iter().fold(T::zero(), |acc, x| acc + *x) * (1.0 / n as f64),
    };
    cell_map
        .iter()
        .map(|a| a.and_then(|i| old.get(i).copied()).unwrap_or(fill))
        .collect()
}

fn map_faces<T: FieldValue>(map: &PatchMap, old: &[T], patch_internal: &[T]) -> Vec<T> {
    map.addressing
        .iter()
        .enumerate()
        .map(|(i, a)| a.and_then(|j| old.get(j).copied()).unwrap_or(patch_internal[i]))
        .collect()
}

fn check_size(field: &str, what: &str, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::topology(
            "field",
            format!("field {} has {} {}, mesh has {}", field, got, what, expected),
        ))
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::dimension::DIMLESS;
    use crate::meshing::BlockMesh;
    use crate::num_vec::Vector3;
    use approx::assert_relative_eq;

    fn line() -> Mesh {
        BlockMesh::line(3, 3.0).build().unwrap()
    }

    #[test]
    fn zero_gradient_patches_copy_adjacent_cells() {
        let mesh = line();
        let field = VolField::new(
            "T",
            &mesh,
            DIMLESS,
            vec![1.0, 2.0, 3.0],
            BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::ZeroGradient),
        )
        .unwrap();
        let xmin = mesh.find_patch("xmin").unwrap();
        let xmax = mesh.find_patch("xmax").unwrap();
        assert_eq!(field.boundary_value(xmin, 0), 1.0);
        assert_eq!(field.boundary_value(xmax, 0), 3.0);
        assert_eq!(field.value(1), 2.0);
    }

    #[test]
    fn history_is_bounded() {
        let mesh = line();
        let mut field = VolField::uniform("T", &mesh, DIMLESS, 0.0, |_| BoundarySpec::ZeroGradient).unwrap();
        assert!(matches!(field.old_time(1), Err(Error::InsufficientHistory { available: 0, .. })));

        for step in 1..=3 {
            field.store_old_time();
            field.internal_mut().iter_mut().for_each(|v| *v = step as f64);
        }
        assert_eq!(field.n_old_times(), 2);
        assert!(matches!(field.old_time(0), Err(Error::Config(_))));
        assert_eq!(field.old_time(1).unwrap().internal[0], 2.0);
        assert_eq!(field.old_time(2).unwrap().internal[0], 1.0);
        assert!(matches!(
            field.old_time(3),
            Err(Error::InsufficientHistory {
                requested: 3,
                available: 2,
                ..
            })
        ));
    }

    #[test]
    fn identity_map_leaves_field_unchanged() {
        let mesh = line();
        let mut field = VolField::new(
            "T",
            &mesh,
            DIMLESS,
            vec![1.0, 5.0, 2.0],
            BoundarySpec::for_patches(mesh.patches(), |p| {
                if p.name == "xmax" {
                    BoundarySpec::uniform_gradient(0.5, p.size)
                } else {
                    BoundarySpec::FixedValue
                }
            }),
        )
        .unwrap();
        field.assign_patch(0, 9.0);
        let before = field.to_data(&mesh);
        field.map(&mesh, &MeshMap::identity(mesh.n_cells(), &mesh.patch_sizes())).unwrap();
        assert_eq!(field.to_data(&mesh), before);
    }

    #[test]
    fn stored_form_round_trips() {
        let mesh = line();
        let field = VolField::uniform("p", &mesh, DIMLESS, 4.0, |_| BoundarySpec::FixedValue).unwrap();
        let data = field.to_data(&mesh);
        let back = VolField::from_data(&mesh, data.clone()).unwrap();
        assert_eq!(back.to_data(&mesh), data);
    }

    #[test]
    fn wrong_sizes_are_rejected() {
        let mesh = line();
        let r = VolField::new("T", &mesh, DIMLESS, vec![0.0; 2], vec![]);
        assert!(matches!(r, Err(Error::InvalidTopology { .. })));
    }

    #[test]
    fn fixed_value_fields_need_no_reference() {
        let mesh = line();
        let fixed = VolField::uniform("p", &mesh, DIMLESS, 0.0, |_| BoundarySpec::FixedValue).unwrap();
        let floating = VolField::uniform("p", &mesh, DIMLESS, 0.0, |_| BoundarySpec::ZeroGradient).unwrap();
        assert!(!fixed.need_reference(&mesh).unwrap());
        assert!(floating.need_reference(&mesh).unwrap());
    }

    #[test]
    fn topology_change_grows_cells_and_patches() {
        let block = |n: usize| BlockMesh::new(Vector3::zero(), Vector3::xyz(n as f64, 1.0, 1.0), (n, 1, 1));
        let mut mesh = block(2).build().unwrap();
        let (ymin, ymax, zmin) = (
            mesh.find_patch("ymin").unwrap(),
            mesh.find_patch("ymax").unwrap(),
            mesh.find_patch("zmin").unwrap(),
        );
        let specs = BoundarySpec::for_patches(mesh.patches(), |p| match p.name.as_str() {
            "ymin" => BoundarySpec::FixedValue,
            "ymax" => BoundarySpec::uniform_gradient(5.0, p.size),
            "zmin" => BoundarySpec::Mixed {
                ref_value: vec![2.0, 4.0],
                ref_grad: vec![1.0, 1.0],
                value_fraction: vec![0.5, 1.0],
            },
            _ => BoundarySpec::ZeroGradient,
        });
        let mut field = VolField::new("T", &mesh, DIMLESS, vec![1.0, 3.0], specs).unwrap();
        field.patch_mut(ymin).values = vec![2.0, 4.0];
        field.store_old_time();
        field.internal_mut().copy_from_slice(&[10.0, 30.0]);

        let grown = block(3).description();
        let patch_maps = grown
            .patches
            .iter()
            .zip(mesh.patch_sizes())
            .map(|(p, old_size)| PatchMap {
                addressing: (0..p.size).map(|i| if i < old_size { Some(i) } else { None }).collect(),
                old_size,
            })
            .collect();
        let map = mesh
            .change_topology(
                grown,
                Some(MeshMap {
                    cell_map: vec![Some(0), Some(1), None],
                    patch_maps,
                }),
            )
            .unwrap();
        field.map(&mesh, &map).unwrap();

        assert_eq!(field.internal(), &[10.0, 30.0, 20.0]);
        assert_eq!(field.patch(ymin).values, vec![2.0, 4.0, 3.0]);
        assert_eq!(field.boundary().len(), mesh.patches().len());
        for (patch, pf) in field.boundary().iter().enumerate() {
            assert_eq!(pf.values.len(), mesh.patch(patch).size);
        }

        let data = field.to_data(&mesh);
        match &data.boundary[ymax].spec {
            BoundarySpec::FixedGradient { gradient } => assert_eq!(gradient, &vec![5.0, 5.0, 0.0]),
            other => panic!("ymax became {}", other.type_name()),
        }
        match &data.boundary[zmin].spec {
            BoundarySpec::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => {
                assert_eq!(ref_value, &vec![2.0, 4.0, 3.0]);
                assert_eq!(ref_grad, &vec![1.0, 1.0, 0.0]);
                assert_relative_eq!(value_fraction[2], 0.75, epsilon = 1e-14);
            }
            other => panic!("zmin became {}", other.type_name()),
        }

        let old = field.old_time(1).unwrap();
        assert_eq!(old.internal, vec![1.0, 3.0, 2.0]);
        assert_eq!(old.boundary[ymin][..2], [2.0, 4.0]);
        for patch in [ymin, ymax] {
            let new_face_cell = mesh.patch_face_cells(patch)[2];
            assert_eq!(old.boundary[patch][2], old.internal[new_face_cell]);
        }
    }
}
