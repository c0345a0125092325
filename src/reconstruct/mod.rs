//! Reconstruction: gather processor meshes and fields back onto the
//! complete mesh through the decomposition addressing. Every cell and face
//! must be supplied exactly once, except faces on processor patches, which
//! both sides supply; there the lower rank's value is kept.

pub mod fields;

use std::path::Path;

use log::{info, warn};

use crate::decompose::{check_cell_coverage, AddressingHeader, ProcAddressing, ProcMesh};
use crate::error::{Error, Result};
use crate::mesh::{MeshDescription, PolyPatch};
use crate::num_vec::Vector3;
use crate::storage::{AnyField, Case};




/**
 * The complete mesh with the processor meshes that reconstruct onto it,
 * their addressing checked.
 */
pub struct Reconstructor {
    complete: MeshDescription,
    procs: Vec<ProcMesh>,
}




/**
 * What a reconstruction did. Value mismatches on processor faces and a
 * stale complete mesh are reported here rather than raised.
 */
#[derive(Clone, Debug, Default)]
pub struct ReconstructReport {
    pub n_procs: usize,
    pub stale: bool,
    pub mesh_reconstructed: bool,
    pub rebuilt_addressing: Vec<usize>,
    pub mismatches: usize,
    pub fields: usize,
    pub times: Vec<String>,
}




// ============================================================================
impl Reconstructor {

    pub fn new(complete: MeshDescription, procs: Vec<ProcMesh>) -> Result<Self> {
        let n_procs = procs.len();
        for (proc_no, pm) in procs.iter().enumerate() {
            if pm.addressing.header.proc_no != proc_no {
                return Err(Error::StaleAddressing {
                    proc_no,
                    details: format!("addressing belongs to processor {}", pm.addressing.header.proc_no),
                });
            }
            pm.addressing.check(&complete, &pm.desc, n_procs)?;
        }
        let addressing: Vec<ProcAddressing> = procs.iter().map(|pm| pm.addressing.clone()).collect();
        check_cell_coverage(&addressing, complete.n_cells())?;
        Ok(Self { complete, procs })
    }

    pub fn complete(&self) -> &MeshDescription {
        &self.complete
    }

    pub fn procs(&self) -> &[ProcMesh] {
        &self.procs
    }

    pub fn n_procs(&self) -> usize {
        self.procs.len()
    }

    /// Whether any processor mesh was written after the complete mesh.
    pub fn is_stale(&self) -> bool {
        self.procs.iter().any(|pm| pm.desc.instance > self.complete.instance)
    }
}

/// Reassemble the complete mesh from processor meshes and their
/// addressing, for cases whose complete mesh is missing. Global patches
/// take their names and kinds from processor 0.
///
pub fn reconstruct_mesh(procs: &[ProcMesh]) -> Result<MeshDescription> {
    let first = procs
        .first()
        .ok_or_else(|| Error::PartitionInvariant("no processor meshes to reconstruct".into()))?;
    let header = &first.addressing.header;
    for (proc_no, pm) in procs.iter().enumerate() {
        let expected = AddressingHeader {
            proc_no,
            n_procs: procs.len(),
            ..header.clone()
        };
        if pm.addressing.header != expected {
            return Err(Error::StaleAddressing {
                proc_no,
                details: format!("header {:?} does not match processor 0, expected {:?}", pm.addressing.header, expected),
            });
        }
        pm.addressing.check_local(&pm.desc)?;
    }

    let n_global_patches = first.addressing.boundary.iter().filter(|&&b| b >= 0).count();
    let mut patch_sizes = vec![0; n_global_patches];
    for pm in procs {
        for (local, patch) in pm.desc.patches.iter().enumerate() {
            if let Some(gp) = pm.addressing.global_patch(local) {
                let slot = patch_sizes.get_mut(gp).ok_or_else(|| {
                    Error::PartitionInvariant(format!("patch {} maps to global patch {} of {}", patch.name, gp, n_global_patches))
                })?;
                *slot += patch.size
            }
        }
    }
    let n_boundary: usize = patch_sizes.iter().sum();
    let n_internal = header.n_faces.checked_sub(n_boundary).ok_or_else(|| {
        Error::PartitionInvariant(format!("{} boundary faces exceed {} faces", n_boundary, header.n_faces))
    })?;

    let mut start = n_internal;
    let mut patches = Vec::with_capacity(n_global_patches);
    for (local, patch) in first.desc.patches.iter().enumerate() {
        if let Some(gp) = first.addressing.global_patch(local) {
            if gp != patches.len() {
                return Err(Error::PartitionInvariant(format!("global patch {} out of order on processor 0", gp)));
            }
            patches.push(PolyPatch::new(patch.name.clone(), start, patch_sizes[gp], patch.kind.clone()));
            start += patch_sizes[gp];
        }
    }

    let mut points: Vec<Option<Vector3>> = vec![None; header.n_points];
    let mut faces: Vec<Option<Vec<usize>>> = vec![None; header.n_faces];
    let mut owner: Vec<Option<usize>> = vec![None; header.n_faces];
    let mut neighbour: Vec<Option<usize>> = vec![None; n_internal];

    for (proc_no, pm) in procs.iter().enumerate() {
        let addr = &pm.addressing;
        let missing = |what: &str, index: usize| Error::StaleAddressing {
            proc_no,
            details: format!("no addressing for local {} {}", what, index),
        };
        let global_cell = |list: &[usize], local: usize| {
            list.get(local)
                .and_then(|&c| addr.cell.get(c).copied())
                .ok_or_else(|| missing("cell of face", local))
        };

        for (&global, &point) in addr.point.iter().zip(&pm.desc.points) {
            place(&mut points, global, point, "point", proc_no)?;
        }
        for (local, f) in pm.desc.faces.iter().enumerate() {
            let (g, flipped) = addr.global_face(local)?;
            let mapped = f
                .iter()
                .map(|&p| addr.point.get(p).copied().ok_or_else(|| missing("point", p)))
                .collect::<Result<Vec<usize>>>()?;
            let mapped = if flipped { crate::decompose::reversed(&mapped) } else { mapped };
            place(&mut faces, g, mapped, "face", proc_no)?;

            let cell = global_cell(&pm.desc.owner, local)?;
            if local < pm.desc.n_internal_faces() {
                place(&mut owner, g, cell, "face owner", proc_no)?;
                place_in(&mut neighbour, g, global_cell(&pm.desc.neighbour, local)?, proc_no)?;
            } else if flipped {
                place_in(&mut neighbour, g, cell, proc_no)?;
            } else {
                place(&mut owner, g, cell, "face owner", proc_no)?;
            }
        }
    }

    let instance = procs.iter().map(|pm| pm.desc.instance).fold(f64::MIN, f64::max);
    let desc = MeshDescription {
        instance,
        points: gather(points, "point")?,
        faces: gather(faces, "face")?,
        owner: gather(owner, "face owner")?,
        neighbour: gather(neighbour, "face neighbour")?,
        patches,
    };
    desc.check()?;
    info!(
        "reconstructed mesh: {} points, {} faces, {} cells",
        desc.points.len(),
        desc.faces.len(),
        desc.n_cells()
    );
    Ok(desc)
}

/// Put `value` in `slots[index]`. A second, identical value is allowed,
/// since processor faces arrive from both sides; a different one is not.
fn place<T: PartialEq + std::fmt::Debug>(slots: &mut [Option<T>], index: usize, value: T, what: &str, proc_no: usize) -> Result<()> {
    let n = slots.len();
    let slot = slots
        .get_mut(index)
        .ok_or_else(|| Error::PartitionInvariant(format!("processor {} names {} {} of {}", proc_no, what, index, n)))?;
    match slot {
        Some(existing) if *existing != value => Err(Error::PartitionInvariant(format!(
            "{} {} from processor {} is {:?}, already {:?}",
            what, index, proc_no, value, existing
        ))),
        Some(_) => Ok(()),
        None => {
            *slot = Some(value);
            Ok(())
        }
    }
}

fn place_in(neighbour: &mut [Option<usize>], face: usize, cell: usize, proc_no: usize) -> Result<()> {
    if face >= neighbour.len() {
        return Err(Error::PartitionInvariant(format!(
            "processor {} reverses boundary face {}",
            proc_no, face
        )));
    }
    place(neighbour, face, cell, "face neighbour", proc_no)
}

pub(crate) fn gather<T>(slots: Vec<Option<T>>, what: &str) -> Result<Vec<T>> {
    let n = slots.len();
    slots
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| Error::PartitionInvariant(format!("{} {} of {} is on no processor", what, i, n))))
        .collect()
}

/// Reconstruct the case at `root`. Fields are taken from every time
/// directory of processor 0 (or `time` only), limited to `fields` if
/// given. A missing complete mesh is rebuilt from the addressing; missing
/// addressing is rebuilt against the complete mesh and written back.
///
pub fn reconstruct_case<P: AsRef<Path>>(root: P, fields: Option<&[String]>, time: Option<&str>) -> Result<ReconstructReport> {
    let case = Case::new(root.as_ref());
    let n_procs = case.processor_count()?;
    if n_procs == 0 {
        return Err(Error::Config(format!("{} has no processor directories", case.root().display())));
    }
    let mut report = ReconstructReport {
        n_procs,
        ..ReconstructReport::default()
    };

    let descs = (0..n_procs)
        .map(|p| case.processor(p).read_mesh())
        .collect::<Result<Vec<_>>>()?;
    let stored = (0..n_procs)
        .map(|p| case.processor(p).read_addressing())
        .collect::<Result<Vec<_>>>()?;

    let complete = if case.has_mesh() {
        case.read_mesh()?
    } else {
        let procs = descs
            .iter()
            .zip(&stored)
            .enumerate()
            .map(|(proc_no, (desc, addr))| match addr {
                Some(a) => Ok(ProcMesh {
                    desc: desc.clone(),
                    addressing: a.clone(),
                }),
                None => Err(Error::StaleAddressing {
                    proc_no,
                    details: "no complete mesh and no addressing to rebuild it from".into(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        let desc = reconstruct_mesh(&procs)?;
        case.write_mesh(&desc)?;
        report.mesh_reconstructed = true;
        desc
    };

    let mut procs = Vec::with_capacity(n_procs);
    for (proc_no, (desc, addr)) in descs.into_iter().zip(stored).enumerate() {
        let addressing = match addr {
            Some(a) => a,
            None => {
                let a = ProcAddressing::rebuild(&complete, &desc, n_procs, proc_no)?;
                case.processor(proc_no).write_addressing(&a)?;
                report.rebuilt_addressing.push(proc_no);
                a
            }
        };
        procs.push(ProcMesh { desc, addressing });
    }

    let reconstructor = Reconstructor::new(complete, procs)?;
    if reconstructor.is_stale() {
        warn!("processor meshes are newer than the complete mesh");
        report.stale = true;
    }

    report.times = match time {
        Some(t) => vec![t.to_string()],
        None => case.processor(0).times()?,
    };

    for t in &report.times {
        for name in case.processor(0).field_names(t)? {
            if let Some(wanted) = fields {
                if !wanted.iter().any(|w| *w == name) {
                    continue;
                }
            }
            let pieces = (0..n_procs)
                .map(|p| case.processor(p).read_field(t, &name))
                .collect::<Result<Vec<AnyField>>>()?;
            let (field, mismatches) = reconstructor.reconstruct_any(&pieces)?;
            case.write_field(t, &field)?;
            report.mismatches += mismatches;
            report.fields += 1;
        }
    }

    info!(
        "reconstructed {} field(s) over {} time(s) from {} processors, {} mismatched processor face value(s)",
        report.fields,
        report.times.len(),
        n_procs,
        report.mismatches
    );
    Ok(report)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::decompose::Decomposition;
    use crate::dimension::{Dimensioned, DIMLESS, DIM_KINEMATIC_VISCOSITY};
    use crate::field::{BoundarySpec, FieldData, VolField};
    use crate::fvc::NonOrthCorrection;
    use crate::fvm;
    use crate::matrix::{SolverControls, SolverKind};
    use crate::mesh::{Mesh, PatchKind};
    use crate::message::ChannelCommunicator;
    use crate::meshing::BlockMesh;
    use approx::assert_relative_eq;

    fn square(n: usize) -> Mesh {
        BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 1.0, 0.1), (n, n, 1)).build().unwrap()
    }

    fn scattered(mesh: &Mesh, n_procs: usize) -> Decomposition {
        let cell_proc = (0..mesh.n_cells()).map(|c| (c * 7 + c / 3) % n_procs).collect();
        Decomposition::from_assignment(mesh, cell_proc, n_procs).unwrap()
    }

    fn temperature(mesh: &Mesh) -> VolField<f64> {
        let specs = BoundarySpec::for_patches(mesh.patches(), |p| match p.name.as_str() {
            "xmin" | "xmax" => BoundarySpec::FixedValue,
            _ => BoundarySpec::ZeroGradient,
        });
        let values = mesh.cell_centres().iter().map(|c| c[0] * c[1]).collect();
        let mut t = VolField::new("T", mesh, DIMLESS, values, specs).unwrap();
        let xmax = mesh.find_patch("xmax").unwrap();
        t.assign_patch(xmax, 1.0);
        t
    }

    #[test]
    fn decompose_then_reconstruct_is_exact() {
        let mesh = square(5);
        let d = scattered(&mesh, 3);
        let t = temperature(&mesh);
        let u = VolField::uniform("U", &mesh, DIMLESS, Vector3::xyz(1.0, -2.0, 0.0), |_| BoundarySpec::ZeroGradient).unwrap();
        let phi = crate::fvc::flux(&mesh, &u);

        let rec = Reconstructor::new(mesh.description().clone(), d.procs.clone()).unwrap();

        let pieces = d.decompose_vol_field(&mesh, &t).unwrap();
        let back: FieldData<f64> = rec.reconstruct_vol(&pieces).unwrap();
        assert_eq!(back, t.to_data(&mesh));

        let pieces = d.decompose_surface(&mesh, &phi).unwrap();
        let (back, mismatches) = rec.reconstruct_surface(&pieces).unwrap();
        assert_eq!(back, phi);
        assert_eq!(mismatches, 0);
    }

    #[test]
    fn mesh_is_rebuilt_from_processor_meshes() {
        let mesh = square(4);
        let d = scattered(&mesh, 3);
        let rebuilt = reconstruct_mesh(&d.procs).unwrap();
        assert_eq!(&rebuilt, mesh.description());
    }

    #[test]
    fn corrupt_addressing_fails_mesh_rebuild() {
        let mesh = square(3);
        let d = scattered(&mesh, 2);
        let stale = |procs: Vec<ProcMesh>| matches!(reconstruct_mesh(&procs), Err(Error::StaleAddressing { .. }));

        let mut procs = d.procs.clone();
        procs[1].addressing.cell.pop();
        assert!(stale(procs));

        let mut procs = d.procs.clone();
        procs[0].addressing.face[0] = 0;
        assert!(stale(procs));

        let mut procs = d.procs.clone();
        procs[1].addressing.point.truncate(2);
        assert!(stale(procs));

        let mut procs = d.procs.clone();
        procs[1].addressing.header.n_cells += 1;
        assert!(stale(procs));
    }

    #[test]
    fn disagreeing_processor_faces_keep_the_lower_rank() {
        let mesh = BlockMesh::line(2, 2.0).build().unwrap();
        let d = Decomposition::from_assignment(&mesh, vec![0, 1], 2).unwrap();
        let phi = crate::field::SurfaceField::from_fn("phi", &mesh, DIMLESS, true, |_| 1.0);
        let mut pieces = d.decompose_surface(&mesh, &phi).unwrap();
        let last = pieces[1].boundary.len() - 1;
        pieces[1].boundary[last][0] = 5.0;

        let rec = Reconstructor::new(mesh.description().clone(), d.procs.clone()).unwrap();
        let (back, mismatches) = rec.reconstruct_surface(&pieces).unwrap();
        assert_eq!(mismatches, 1);
        assert_eq!(back.internal, vec![1.0]);
    }

    #[test]
    fn missing_piece_is_a_gap() {
        let mesh = square(3);
        let d = scattered(&mesh, 2);
        let mut procs = d.procs.clone();
        procs[1].addressing.cell.pop();
        assert!(Reconstructor::new(mesh.description().clone(), procs).is_err());
    }

    #[test]
    fn addressing_for_another_mesh_is_stale() {
        let mesh = square(3);
        let other = square(4);
        let d = scattered(&mesh, 2);
        let result = Reconstructor::new(other.description().clone(), d.procs.clone());
        assert!(matches!(result, Err(Error::StaleAddressing { .. })));
    }

    #[test]
    fn newer_processor_mesh_is_flagged() {
        let mesh = square(2);
        let d = scattered(&mesh, 2);
        let mut procs = d.procs.clone();
        procs[0].desc.instance = 1.0;
        let rec = Reconstructor::new(mesh.description().clone(), procs).unwrap();
        assert!(rec.is_stale());
    }

    #[test]
    fn case_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let mesh = square(4);
        case.write_mesh(mesh.description()).unwrap();
        let t = temperature(&mesh);
        case.write_field("0", &AnyField::VolScalar(t.to_data(&mesh))).unwrap();

        let settings = crate::config::DecompositionConfig {
            n_procs: 2,
            method: crate::decompose::Method::Simple { n: [2, 1, 1] },
            preserve_cyclics: false,
        };
        let summary = crate::decompose::decompose_case(dir.path(), &settings, None).unwrap();
        assert_eq!(summary.cells_per_proc, vec![8, 8]);

        std::fs::remove_file(case.field_path("0", "T")).unwrap();
        std::fs::remove_file(case.processor(1).addressing_path()).unwrap();

        let report = reconstruct_case(dir.path(), None, None).unwrap();
        assert_eq!(report.rebuilt_addressing, vec![1]);
        assert_eq!(report.fields, 1);
        assert!(!report.stale);
        assert_eq!(case.read_field("0", "T").unwrap(), AnyField::VolScalar(t.to_data(&mesh)));
        assert!(case.processor(1).read_addressing().unwrap().is_some());
    }

    #[test]
    fn parallel_solve_matches_serial_solve() {
        let mesh = square(6);
        let controls = SolverControls {
            tolerance: 1e-12,
            ..SolverControls::with_solver(SolverKind::Pcg)
        };
        let nu = Dimensioned::new(1.0, DIM_KINEMATIC_VISCOSITY);

        let mut serial = temperature(&mesh);
        let mut eqn = fvm::laplacian(&mesh, nu, &serial, NonOrthCorrection::Corrected).unwrap();
        eqn.solve(&mesh, &mut serial, &controls).unwrap();

        let d = Decomposition::new(
            &mesh,
            &crate::config::DecompositionConfig {
                n_procs: 3,
                method: crate::decompose::Method::Simple { n: [3, 1, 1] },
                preserve_cyclics: false,
            },
        )
        .unwrap();
        let pieces = d.decompose_vol_field(&mesh, &temperature(&mesh)).unwrap();

        let solved: Vec<FieldData<f64>> = ChannelCommunicator::run(3, |comm| {
            let rank = comm.rank();
            let local = Mesh::with_communicator(d.procs[rank].desc.clone(), comm).unwrap();
            let mut t = VolField::from_data(&local, pieces[rank].clone()).unwrap();
            t.correct_boundary_conditions(&local).unwrap();
            let mut eqn = fvm::laplacian(&local, nu, &t, NonOrthCorrection::Corrected).unwrap();
            let perf = eqn.solve(&local, &mut t, &controls).unwrap();
            assert!(perf.converged);
            t.to_data(&local)
        });

        for pm in &d.procs {
            assert!(pm.desc.patches.iter().any(|p| matches!(p.kind, PatchKind::Processor { .. })));
        }
        let rec = Reconstructor::new(mesh.description().clone(), d.procs.clone()).unwrap();
        let parallel = rec.reconstruct_vol(&solved).unwrap();
        for cell in 0..mesh.n_cells() {
            assert_relative_eq!(parallel.internal[cell], serial.value(cell), epsilon = 1e-8);
        }
    }
}
