//! Gathering processor fields onto the complete mesh.

use log::warn;

use super::{gather, Reconstructor};
use crate::error::{Error, Result};
use crate::field::{BoundarySpec, FieldData, FieldValue, PatchData, SurfaceField};
use crate::storage::AnyField;

/// Relative difference above which the two sides of a processor face are
/// reported as disagreeing.
pub const MISMATCH_TOLERANCE: f64 = 1e-10;




// ============================================================================
impl Reconstructor {

    /// Gather one piece per processor of a volume field. Processor patch
    /// values are dropped; every other value lands where it came from.
    ///
    pub fn reconstruct_vol<T: FieldValue>(&self, pieces: &[FieldData<T>]) -> Result<FieldData<T>> {
        self.check_piece_count(pieces.len())?;
        let complete = self.complete();
        let first = &pieces[0];

        let mut internal: Vec<Option<T>> = vec![None; complete.n_cells()];
        for (proc_no, (pm, piece)) in self.procs().iter().zip(pieces).enumerate() {
            if piece.internal.len() != pm.addressing.cell.len() || piece.boundary.len() != pm.desc.patches.len() {
                return Err(Error::PartitionInvariant(format!(
                    "piece of {} from processor {} does not fit its mesh",
                    piece.name, proc_no
                )));
            }
            first.dimensions.check(&piece.dimensions, "reconstruct")?;
            for (&cell, v) in pm.addressing.cell.iter().zip(&piece.internal) {
                if internal[cell].replace(*v).is_some() {
                    return Err(Error::PartitionInvariant(format!("cell {} supplied twice", cell)));
                }
            }
        }

        let mut boundary = Vec::with_capacity(complete.patches.len());
        for (gp, patch) in complete.patches.iter().enumerate() {
            let mut values: Vec<Option<T>> = vec![None; patch.size];
            let mut parts: Vec<(&BoundarySpec<T>, Vec<usize>)> = Vec::new();

            for (proc_no, (pm, piece)) in self.procs().iter().zip(pieces).enumerate() {
                for (local, lpatch) in pm.desc.patches.iter().enumerate() {
                    if pm.addressing.global_patch(local) != Some(gp) {
                        continue;
                    }
                    let stored = &piece.boundary[local];
                    if stored.patch != lpatch.name || stored.values.len() != lpatch.size {
                        return Err(Error::PartitionInvariant(format!(
                            "patch {} of {} on processor {} does not fit its mesh",
                            lpatch.name, piece.name, proc_no
                        )));
                    }
                    let faces = lpatch
                        .range()
                        .map(|f| pm.addressing.global_face(f).map(|(g, _)| g.wrapping_sub(patch.start)))
                        .collect::<Result<Vec<usize>>>()?;
                    for (&f, v) in faces.iter().zip(&stored.values) {
                        let slot = values.get_mut(f).ok_or_else(|| Error::StaleAddressing {
                            proc_no,
                            details: format!("a face of patch {} lies outside global patch {}", lpatch.name, patch.name),
                        })?;
                        if slot.replace(*v).is_some() {
                            return Err(Error::PartitionInvariant(format!(
                                "face {} of patch {} supplied twice",
                                f, patch.name
                            )));
                        }
                    }
                    parts.push((&stored.spec, faces));
                }
            }

            let refs: Vec<(&BoundarySpec<T>, &[usize])> = parts.iter().map(|(s, f)| (*s, f.as_slice())).collect();
            boundary.push(PatchData {
                patch: patch.name.clone(),
                spec: BoundarySpec::scatter(patch.size, &refs)?,
                values: gather(values, &format!("face of patch {}", patch.name))?,
            });
        }

        Ok(FieldData {
            name: first.name.clone(),
            dimensions: first.dimensions,
            internal: gather(internal, "cell")?,
            boundary,
        })
    }

    /// Gather one piece per processor of a surface field, and count the
    /// processor faces whose two sides disagree. The lower rank's value is
    /// kept for those.
    ///
    pub fn reconstruct_surface<T: FieldValue>(&self, pieces: &[SurfaceField<T>]) -> Result<(SurfaceField<T>, usize)> {
        self.check_piece_count(pieces.len())?;
        let complete = self.complete();
        let first = &pieces[0];
        let mut flat: Vec<Option<T>> = vec![None; complete.faces.len()];
        let mut mismatches = 0;

        for (proc_no, (pm, piece)) in self.procs().iter().zip(pieces).enumerate() {
            let local_values = piece
                .internal
                .iter()
                .map(|v| (*v, false))
                .chain(pm.desc.patches.iter().enumerate().zip(&piece.boundary).flat_map(|((local, _), values)| {
                    let shared = pm.addressing.global_patch(local).is_none();
                    values.iter().map(move |v| (*v, shared))
                }));
            let n_local: usize = piece.internal.len() + piece.boundary.iter().map(Vec::len).sum::<usize>();
            if n_local != pm.desc.faces.len() || piece.boundary.len() != pm.desc.patches.len() {
                return Err(Error::PartitionInvariant(format!(
                    "piece of {} from processor {} does not fit its mesh",
                    piece.name, proc_no
                )));
            }

            for (local, (v, shared)) in local_values.enumerate() {
                let (g, flipped) = pm.addressing.global_face(local)?;
                let v = if flipped && piece.oriented { -v } else { v };
                match flat[g] {
                    None => flat[g] = Some(v),
                    Some(kept) if shared => {
                        if (kept - v).mag() > MISMATCH_TOLERANCE * (kept.mag() + v.mag()) {
                            warn!(
                                "{}: face {} is {:?} on the lower rank and {:?} on processor {}",
                                piece.name, g, kept, v, proc_no
                            );
                            mismatches += 1;
                        }
                    }
                    Some(_) => return Err(Error::PartitionInvariant(format!("face {} of {} supplied twice", g, piece.name))),
                }
            }
        }

        let mut flat = gather(flat, "face")?;
        let boundary = complete
            .patches
            .iter()
            .rev()
            .map(|p| flat.split_off(p.start))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        Ok((
            SurfaceField {
                name: first.name.clone(),
                dimensions: first.dimensions,
                oriented: first.oriented,
                internal: flat,
                boundary,
            },
            mismatches,
        ))
    }

    pub fn reconstruct_any(&self, pieces: &[AnyField]) -> Result<(AnyField, usize)> {
        self.check_piece_count(pieces.len())?;
        let name = pieces[0].name().to_string();
        let class = pieces[0].class_name();
        let wrong = || Error::PartitionInvariant(format!("pieces of {} disagree on its class {}", name, class));

        macro_rules! collect {
            ($variant:ident) => {
                pieces
                    .iter()
                    .map(|p| match p {
                        AnyField::$variant(x) => Ok(x.clone()),
                        _ => Err(wrong()),
                    })
                    .collect::<Result<Vec<_>>>()?
            };
        }

        Ok(match &pieces[0] {
            AnyField::VolScalar(_) => (AnyField::VolScalar(self.reconstruct_vol(&collect!(VolScalar))?), 0),
            AnyField::VolVector(_) => (AnyField::VolVector(self.reconstruct_vol(&collect!(VolVector))?), 0),
            AnyField::VolTensor(_) => (AnyField::VolTensor(self.reconstruct_vol(&collect!(VolTensor))?), 0),
            AnyField::SurfaceScalar(_) => {
                let (s, m) = self.reconstruct_surface(&collect!(SurfaceScalar))?;
                (AnyField::SurfaceScalar(s), m)
            }
            AnyField::SurfaceVector(_) => {
                let (s, m) = self.reconstruct_surface(&collect!(SurfaceVector))?;
                (AnyField::SurfaceVector(s), m)
            }
        })
    }

    fn check_piece_count(&self, n: usize) -> Result<()> {
        if n != self.n_procs() || n == 0 {
            return Err(Error::PartitionInvariant(format!(
                "{} pieces for {} processors",
                n,
                self.n_procs()
            )));
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::decompose::Decomposition;
    use crate::dimension::{DIMLESS, DIM_LENGTH};
    use crate::field::VolField;
    use crate::meshing::BlockMesh;

    fn line() -> (crate::mesh::Mesh, Decomposition, Reconstructor) {
        let mesh = BlockMesh::line(4, 4.0).build().unwrap();
        let d = Decomposition::from_assignment(&mesh, vec![0, 1, 1, 0], 2).unwrap();
        let rec = Reconstructor::new(mesh.description().clone(), d.procs.clone()).unwrap();
        (mesh, d, rec)
    }

    #[test]
    fn boundary_conditions_are_reassembled() {
        let (mesh, d, rec) = line();
        let specs = BoundarySpec::for_patches(mesh.patches(), |p| {
            if p.name == "xmin" {
                BoundarySpec::FixedValue
            } else {
                BoundarySpec::uniform_gradient(2.0, p.size)
            }
        });
        let t = VolField::new("T", &mesh, DIMLESS, vec![1.0, 2.0, 3.0, 4.0], specs).unwrap();
        let back = rec.reconstruct_any(&d.decompose_any(&mesh, &AnyField::VolScalar(t.to_data(&mesh))).unwrap());
        assert_eq!(back.unwrap(), (AnyField::VolScalar(t.to_data(&mesh)), 0));
    }

    #[test]
    fn mixed_classes_are_rejected() {
        let (mesh, d, rec) = line();
        let t = VolField::uniform("T", &mesh, DIMLESS, 1.0, |_| BoundarySpec::ZeroGradient).unwrap();
        let mut pieces = d.decompose_any(&mesh, &AnyField::VolScalar(t.to_data(&mesh))).unwrap();
        let phi = crate::field::SurfaceField::from_fn("T", &mesh, DIMLESS, false, |_| 0.0);
        pieces[1] = d.decompose_any(&mesh, &AnyField::SurfaceScalar(phi)).unwrap().remove(1);
        assert!(matches!(rec.reconstruct_any(&pieces), Err(Error::PartitionInvariant(_))));
    }

    #[test]
    fn wrong_piece_count_or_dimensions_are_rejected() {
        let (mesh, d, rec) = line();
        let t = VolField::uniform("T", &mesh, DIMLESS, 1.0, |_| BoundarySpec::ZeroGradient).unwrap();
        let mut pieces = d.decompose_vol_field(&mesh, &t).unwrap();
        assert!(rec.reconstruct_vol(&pieces[..1]).is_err());

        pieces[1].dimensions = DIM_LENGTH;
        assert!(matches!(rec.reconstruct_vol(&pieces), Err(Error::DimensionMismatch { .. })));
    }
}
