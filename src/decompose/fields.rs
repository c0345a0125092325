//! Splitting stored fields along a decomposition.

use rayon::prelude::*;

use super::{Decomposition, ProcMesh};
use crate::error::Result;
use crate::field::{BoundarySpec, FieldData, FieldValue, PatchData, SurfaceField, VolField};
use crate::mesh::Mesh;
use crate::storage::AnyField;




// ============================================================================
impl Decomposition {

    /// One piece of a volume field per processor. Processor patch values
    /// are the linear interpolate of the complete field at the shared face,
    /// so both sides start from the same face value.
    ///
    pub fn decompose_vol<T: FieldValue>(&self, mesh: &Mesh, data: &FieldData<T>) -> Result<Vec<FieldData<T>>> {
        self.procs.par_iter().map(|pm| vol_piece(mesh, pm, data)).collect()
    }

    pub fn decompose_vol_field<T: FieldValue>(&self, mesh: &Mesh, field: &VolField<T>) -> Result<Vec<FieldData<T>>> {
        self.decompose_vol(mesh, &field.to_data(mesh))
    }

    /// One piece of a surface field per processor. Oriented values change
    /// sign on faces the processor sees reversed.
    ///
    pub fn decompose_surface<T: FieldValue>(&self, mesh: &Mesh, field: &SurfaceField<T>) -> Result<Vec<SurfaceField<T>>> {
        let flat = field.flatten();
        self.procs.par_iter().map(|pm| surface_piece(mesh, pm, field, &flat)).collect()
    }

    pub fn decompose_any(&self, mesh: &Mesh, field: &AnyField) -> Result<Vec<AnyField>> {
        field.check(mesh)?;
        Ok(match field {
            AnyField::VolScalar(d) => self.decompose_vol(mesh, d)?.into_iter().map(AnyField::VolScalar).collect(),
            AnyField::VolVector(d) => self.decompose_vol(mesh, d)?.into_iter().map(AnyField::VolVector).collect(),
            AnyField::VolTensor(d) => self.decompose_vol(mesh, d)?.into_iter().map(AnyField::VolTensor).collect(),
            AnyField::SurfaceScalar(s) => self
                .decompose_surface(mesh, s)?
                .into_iter()
                .map(AnyField::SurfaceScalar)
                .collect(),
            AnyField::SurfaceVector(s) => self
                .decompose_surface(mesh, s)?
                .into_iter()
                .map(AnyField::SurfaceVector)
                .collect(),
        })
    }
}

fn vol_piece<T: FieldValue>(mesh: &Mesh, pm: &ProcMesh, data: &FieldData<T>) -> Result<FieldData<T>> {
    let addr = &pm.addressing;
    let internal = addr.cell.iter().map(|&c| data.internal[c]).collect();

    let boundary = pm
        .desc
        .patches
        .iter()
        .enumerate()
        .map(|(local, patch)| -> Result<PatchData<T>> {
            let faces = patch
                .range()
                .map(|f| addr.global_face(f).map(|(g, _)| g))
                .collect::<Result<Vec<usize>>>()?;
            Ok(match addr.global_patch(local) {
                Some(gp) => {
                    let start = mesh.patch(gp).start;
                    let within: Vec<usize> = faces.iter().map(|g| g - start).collect();
                    let stored = &data.boundary[gp];
                    PatchData {
                        patch: patch.name.clone(),
                        spec: stored.spec.select(&within),
                        values: within.iter().map(|&i| stored.values[i]).collect(),
                    }
                }
                None => PatchData {
                    patch: patch.name.clone(),
                    spec: BoundarySpec::Processor,
                    values: faces
                        .iter()
                        .map(|&g| {
                            let w = mesh.weights()[g];
                            let own = data.internal[mesh.owner()[g]];
                            let nei = data.internal[mesh.neighbour()[g]];
                            own * w + nei * (1.0 - w)
                        })
                        .collect(),
                },
            })
        })
        .collect::<Result<_>>()?;

    Ok(FieldData {
        name: data.name.clone(),
        dimensions: data.dimensions,
        internal,
        boundary,
    })
}

fn surface_piece<T: FieldValue>(
    mesh: &Mesh,
    pm: &ProcMesh,
    field: &SurfaceField<T>,
    flat: &[T],
) -> Result<SurfaceField<T>> {
    let addr = &pm.addressing;
    let value = |local: usize| -> Result<T> {
        let (g, flipped) = addr.global_face(local)?;
        Ok(if flipped && field.oriented { -flat[g] } else { flat[g] })
    };
    debug_assert_eq!(flat.len(), mesh.n_faces());

    Ok(SurfaceField {
        name: field.name.clone(),
        dimensions: field.dimensions,
        oriented: field.oriented,
        internal: (0..pm.desc.n_internal_faces()).map(value).collect::<Result<_>>()?,
        boundary: pm
            .desc
            .patches
            .iter()
            .map(|p| p.range().map(value).collect::<Result<_>>())
            .collect::<Result<_>>()?,
    })
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::dimension::DIMLESS;
    use crate::meshing::BlockMesh;

    fn line() -> (Mesh, Decomposition) {
        let mesh = BlockMesh::line(4, 4.0).build().unwrap();
        let d = Decomposition::from_assignment(&mesh, vec![0, 0, 1, 1], 2).unwrap();
        (mesh, d)
    }

    #[test]
    fn processor_values_interpolate_across_the_cut() {
        let (mesh, d) = line();
        let specs = BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::ZeroGradient);
        let t = VolField::new("T", &mesh, DIMLESS, vec![1.0, 2.0, 4.0, 8.0], specs).unwrap();
        let pieces = d.decompose_vol_field(&mesh, &t).unwrap();

        assert_eq!(pieces[0].internal, vec![1.0, 2.0]);
        assert_eq!(pieces[1].internal, vec![4.0, 8.0]);
        let proc0 = pieces[0].boundary.last().unwrap();
        let proc1 = pieces[1].boundary.last().unwrap();
        assert_eq!(proc0.spec, BoundarySpec::Processor);
        assert_eq!(proc0.values, vec![3.0]);
        assert_eq!(proc1.values, vec![3.0]);
    }

    #[test]
    fn oriented_values_flip_on_the_neighbour_side() {
        let (mesh, d) = line();
        let phi = SurfaceField::from_fn("phi", &mesh, DIMLESS, true, |f| f as f64 + 1.0);
        let pieces = d.decompose_surface(&mesh, &phi).unwrap();
        let shared = mesh.owner().iter().zip(mesh.neighbour()).position(|(&o, &n)| o == 1 && n == 2).unwrap();
        let expected = shared as f64 + 1.0;
        assert_eq!(pieces[0].boundary.last().unwrap(), &vec![expected]);
        assert_eq!(pieces[1].boundary.last().unwrap(), &vec![-expected]);

        let mut unoriented = phi.clone();
        unoriented.oriented = false;
        let pieces = d.decompose_surface(&mesh, &unoriented).unwrap();
        assert_eq!(pieces[1].boundary.last().unwrap(), &vec![expected]);
    }

    #[test]
    fn processor_pieces_rebuild_as_fields() {
        let (mesh, d) = line();
        let specs = BoundarySpec::for_patches(mesh.patches(), |p| {
            if p.name == "xmin" {
                BoundarySpec::FixedValue
            } else {
                BoundarySpec::ZeroGradient
            }
        });
        let t = VolField::new("T", &mesh, DIMLESS, vec![1.0, 2.0, 3.0, 4.0], specs).unwrap();
        for (pm, piece) in d.procs.iter().zip(d.decompose_vol_field(&mesh, &t).unwrap()) {
            let local = Mesh::new(pm.desc.clone()).unwrap();
            let field = VolField::from_data(&local, piece).unwrap();
            assert_eq!(field.boundary().len(), pm.desc.patches.len());
        }
    }
}
