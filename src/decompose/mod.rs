//! Domain decomposition: split a complete mesh and its fields into one mesh
//! per processor. Local cells keep their global order, so every local
//! internal face keeps `owner < neighbour`. Faces shared between two
//! processors become processor patches, ordered by neighbour rank, with the
//! faces of each in global order on both sides; the side holding the
//! global neighbour sees the face reversed.

pub mod addressing;
pub mod fields;
pub mod method;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::{info, warn};
use rayon::prelude::*;

use crate::config::{CaseConfig, DecompositionConfig};
use crate::error::{Error, Result};
use crate::mesh::{Mesh, MeshDescription, PatchKind, PolyPatch};
use crate::storage::Case;
pub use addressing::{check_cell_coverage, AddressingHeader, ProcAddressing};
pub use method::Method;




/**
 * The mesh of one processor together with its addressing into the complete
 * mesh.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct ProcMesh {
    pub desc: MeshDescription,
    pub addressing: ProcAddressing,
}




/**
 * A complete decomposition: the cell assignment and the processor meshes it
 * produced.
 */
#[derive(Clone, Debug)]
pub struct Decomposition {
    pub n_procs: usize,
    pub cell_proc: Vec<usize>,
    pub procs: Vec<ProcMesh>,
}




/**
 * What `decompose_case` did, for the command line report.
 */
#[derive(Clone, Debug, Default)]
pub struct DecomposeSummary {
    pub n_procs: usize,
    pub cells_per_proc: Vec<usize>,
    pub processor_faces: usize,
    pub fields: usize,
    pub times: Vec<String>,
}




// ============================================================================
impl Decomposition {

    /// Assign cells with `settings` and split the mesh.
    ///
    pub fn new(mesh: &Mesh, settings: &DecompositionConfig) -> Result<Self> {
        let mut cell_proc = settings.method.assign(mesh, settings.n_procs)?;
        if settings.preserve_cyclics {
            let moved = method::preserve_cyclics(mesh, &mut cell_proc);
            if moved > 0 {
                info!("moved {} cells to keep cyclic neighbours together", moved)
            }
        }
        Self::from_assignment(mesh, cell_proc, settings.n_procs)
    }

    /// Split the mesh with a given cell assignment. A cyclic face pair whose
    /// cells land on different processors violates the partition
    /// invariant; assign with `preserve_cyclics` to avoid it.
    ///
    pub fn from_assignment(mesh: &Mesh, cell_proc: Vec<usize>, n_procs: usize) -> Result<Self> {
        method::validate(&cell_proc, mesh.n_cells(), n_procs)?;
        check_cyclics(mesh, &cell_proc)?;

        let mut local_cell = vec![0; mesh.n_cells()];
        let mut cells: Vec<Vec<usize>> = vec![Vec::new(); n_procs];
        for (cell, &p) in cell_proc.iter().enumerate() {
            local_cell[cell] = cells[p].len();
            cells[p].push(cell);
        }

        // neighbour rank -> shared global faces, for each processor
        let mut shared: Vec<BTreeMap<usize, Vec<usize>>> = vec![BTreeMap::new(); n_procs];
        for face in 0..mesh.n_internal_faces() {
            let own = cell_proc[mesh.owner()[face]];
            let nei = cell_proc[mesh.neighbour()[face]];
            if own != nei {
                shared[own].entry(nei).or_default().push(face);
                shared[nei].entry(own).or_default().push(face);
            }
        }

        let splitter = Splitter {
            mesh,
            n_procs,
            cell_proc: &cell_proc,
            local_cell: &local_cell,
        };
        let procs = cells
            .into_par_iter()
            .zip(shared)
            .enumerate()
            .map(|(proc_no, (cells, shared))| splitter.proc_mesh(proc_no, cells, shared))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            n_procs,
            cell_proc,
            procs,
        })
    }

    pub fn cells_per_proc(&self) -> Vec<usize> {
        self.procs.iter().map(|p| p.addressing.cell.len()).collect()
    }

    /// Number of faces on processor patches, counted once per shared face.
    pub fn processor_faces(&self) -> usize {
        let total: usize = self
            .procs
            .iter()
            .flat_map(|p| p.desc.patches.iter())
            .filter(|patch| patch.is_processor())
            .map(|patch| patch.size)
            .sum();
        total / 2
    }
}

fn check_cyclics(mesh: &Mesh, cell_proc: &[usize]) -> Result<()> {
    for (index, patch) in mesh.patches().iter().enumerate() {
        if let PatchKind::Cyclic { neighbour_patch, .. } = patch.kind {
            let here = mesh.patch_face_cells(index);
            let there = mesh.patch_face_cells(neighbour_patch);
            for (i, (&a, &b)) in here.iter().zip(there).enumerate() {
                if cell_proc[a] != cell_proc[b] {
                    return Err(Error::PartitionInvariant(format!(
                        "face {} of cyclic patch {} couples cell {} on processor {} to cell {} on processor {}",
                        i, patch.name, a, cell_proc[a], b, cell_proc[b]
                    )));
                }
            }
        }
    }
    Ok(())
}

struct Splitter<'a> {
    mesh: &'a Mesh,
    n_procs: usize,
    cell_proc: &'a [usize],
    local_cell: &'a [usize],
}

impl<'a> Splitter<'a> {
    fn proc_mesh(&self, proc_no: usize, cells: Vec<usize>, shared: BTreeMap<usize, Vec<usize>>) -> Result<ProcMesh> {
        let mesh = self.mesh;
        let on_proc = |cell: usize| self.cell_proc[cell] == proc_no;

        let mut faces: Vec<Vec<usize>> = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();
        let mut face_addr = Vec::new();
        let mut patches = Vec::new();
        let mut boundary_addr = Vec::new();

        for face in 0..mesh.n_internal_faces() {
            let (own, nei) = (mesh.owner()[face], mesh.neighbour()[face]);
            if on_proc(own) && on_proc(nei) {
                faces.push(mesh.faces()[face].clone());
                owner.push(self.local_cell[own]);
                neighbour.push(self.local_cell[nei]);
                face_addr.push(ProcAddressing::encode_face(face, false));
            }
        }

        for (index, patch) in mesh.patches().iter().enumerate() {
            let start = faces.len();
            for face in patch.range().filter(|&f| on_proc(mesh.owner()[f])) {
                faces.push(mesh.faces()[face].clone());
                owner.push(self.local_cell[mesh.owner()[face]]);
                face_addr.push(ProcAddressing::encode_face(face, false));
            }
            patches.push(PolyPatch::new(patch.name.clone(), start, faces.len() - start, patch.kind.clone()));
            boundary_addr.push(index as i64);
        }

        for (neighb_proc, shared_faces) in shared {
            let start = faces.len();
            let mut centres = Vec::with_capacity(shared_faces.len());
            for face in shared_faces {
                let (own, nei) = (mesh.owner()[face], mesh.neighbour()[face]);
                let points = &mesh.faces()[face];
                if on_proc(own) {
                    faces.push(points.clone());
                    owner.push(self.local_cell[own]);
                    centres.push(mesh.cell_centres()[nei]);
                    face_addr.push(ProcAddressing::encode_face(face, false));
                } else {
                    faces.push(reversed(points));
                    owner.push(self.local_cell[nei]);
                    centres.push(mesh.cell_centres()[own]);
                    face_addr.push(ProcAddressing::encode_face(face, true));
                }
            }
            patches.push(PolyPatch::new(
                PolyPatch::processor_name(proc_no, neighb_proc),
                start,
                faces.len() - start,
                PatchKind::Processor {
                    my_proc: proc_no,
                    neighb_proc,
                    neighb_cell_centres: centres,
                },
            ));
            boundary_addr.push(-1);
        }

        let mut point_addr: Vec<usize> = faces.iter().flatten().copied().collect();
        point_addr.sort_unstable();
        point_addr.dedup();
        let local_point: HashMap<usize, usize> = point_addr.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        for f in &mut faces {
            for p in f.iter_mut() {
                *p = local_point[&*p]
            }
        }

        let desc = MeshDescription {
            instance: mesh.instance(),
            points: point_addr.iter().map(|&p| mesh.points()[p]).collect(),
            faces,
            owner,
            neighbour,
            patches,
        };
        desc.check().map_err(|e| Error::PartitionInvariant(format!("processor {} mesh: {}", proc_no, e)))?;

        let addressing = ProcAddressing {
            header: AddressingHeader::for_mesh(mesh.description(), self.n_procs, proc_no),
            point: point_addr,
            face: face_addr,
            cell: cells,
            boundary: boundary_addr,
        };
        Ok(ProcMesh { desc, addressing })
    }
}

/// The same face seen from the other side: same first point, opposite
/// direction.
///
pub fn reversed(points: &[usize]) -> Vec<usize> {
    let mut r = Vec::with_capacity(points.len());
    if let Some((first, rest)) = points.split_first() {
        r.push(*first);
        r.extend(rest.iter().rev());
    }
    r
}

/// Decompose the case at `root`: split the mesh, write each processor mesh
/// with its addressing, and decompose the fields of every time directory
/// (or of `time` only).
///
pub fn decompose_case<P: AsRef<Path>>(root: P, settings: &DecompositionConfig, time: Option<&str>) -> Result<DecomposeSummary> {
    let case = Case::new(root.as_ref());
    let mesh = Mesh::new(case.read_mesh()?)?;
    let decomposition = Decomposition::new(&mesh, settings)?;

    let existing = case.processor_count()?;
    if existing > decomposition.n_procs {
        warn!(
            "case has {} processor directories, {} are being written; the rest are left as they are",
            existing, decomposition.n_procs
        );
    }

    decomposition
        .procs
        .par_iter()
        .enumerate()
        .map(|(proc_no, pm)| {
            let proc_case = case.processor(proc_no);
            proc_case.write_mesh(&pm.desc)?;
            proc_case.write_addressing(&pm.addressing)
        })
        .collect::<Result<Vec<_>>>()?;

    let times = match time {
        Some(t) => vec![t.to_string()],
        None => case.times()?,
    };

    let mut n_fields = 0;
    for t in &times {
        for name in case.field_names(t)? {
            let field = case.read_field(t, &name)?;
            let pieces = decomposition.decompose_any(&mesh, &field)?;
            for (proc_no, piece) in pieces.iter().enumerate() {
                case.processor(proc_no).write_field(t, piece)?;
            }
            n_fields += 1;
        }
    }

    let cells_per_proc = decomposition.cells_per_proc();
    let mean = mesh.n_cells() as f64 / decomposition.n_procs as f64;
    let max = cells_per_proc.iter().copied().max().unwrap_or(0);
    info!(
        "decomposed {} cells onto {} processors, {} processor faces, max imbalance {:.1}%",
        mesh.n_cells(),
        decomposition.n_procs,
        decomposition.processor_faces(),
        100.0 * (max as f64 - mean) / mean.max(1.0)
    );

    Ok(DecomposeSummary {
        n_procs: decomposition.n_procs,
        cells_per_proc,
        processor_faces: decomposition.processor_faces(),
        fields: n_fields,
        times,
    })
}

/// Decompose using the settings stored in the case's controls file.
///
pub fn decompose_case_with_controls<P: AsRef<Path>>(root: P) -> Result<DecomposeSummary> {
    let config = CaseConfig::load(root.as_ref())?;
    decompose_case(root, &config.decomposition, None)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::meshing::BlockMesh;
    use crate::num_vec::Vector3;

    fn square(n: usize) -> Mesh {
        BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 1.0, 0.1), (n, n, 1)).build().unwrap()
    }

    fn checkerboard(mesh: &Mesh) -> Vec<usize> {
        mesh.cell_centres()
            .iter()
            .map(|c| ((c[0] > 0.5) as usize) + 2 * ((c[1] > 0.5) as usize))
            .collect()
    }

    #[test]
    fn cell_addressing_partitions_the_mesh() {
        let mesh = square(4);
        let d = Decomposition::from_assignment(&mesh, checkerboard(&mesh), 4).unwrap();
        let addressing: Vec<_> = d.procs.iter().map(|p| p.addressing.clone()).collect();
        check_cell_coverage(&addressing, mesh.n_cells()).unwrap();
        assert_eq!(d.cells_per_proc(), vec![4, 4, 4, 4]);
        assert_eq!(d.processor_faces(), 8);
    }

    #[test]
    fn processor_patches_face_each_other() {
        let mesh = square(4);
        let d = Decomposition::from_assignment(&mesh, checkerboard(&mesh), 4).unwrap();

        for pm in &d.procs {
            let mut last_neighbour = None;
            for (local, patch) in pm.desc.patches.iter().enumerate() {
                let (my_proc, neighb_proc) = match &patch.kind {
                    PatchKind::Processor { my_proc, neighb_proc, .. } => (*my_proc, *neighb_proc),
                    _ => continue,
                };
                assert!(last_neighbour < Some(neighb_proc));
                last_neighbour = Some(neighb_proc);
                assert_eq!(pm.addressing.boundary[local], -1);

                let other = &d.procs[neighb_proc];
                let partner = other
                    .desc
                    .patches
                    .iter()
                    .find(|p| p.neighb_proc() == Some(my_proc))
                    .unwrap();
                assert_eq!(partner.size, patch.size);

                for (a, b) in patch.range().zip(partner.range()) {
                    let (ga, fa) = pm.addressing.global_face(a).unwrap();
                    let (gb, fb) = other.addressing.global_face(b).unwrap();
                    assert_eq!(ga, gb);
                    assert_ne!(fa, fb);
                    // the reversed loop keeps the first point
                    let pa: Vec<_> = pm.desc.faces[a].iter().map(|&p| pm.addressing.point[p]).collect();
                    let pb: Vec<_> = other.desc.faces[b].iter().map(|&p| other.addressing.point[p]).collect();
                    assert_eq!(pa, reversed(&pb));
                }
            }
        }
    }

    #[test]
    fn every_processor_keeps_every_global_patch() {
        let mesh = square(2);
        let d = Decomposition::from_assignment(&mesh, vec![0, 0, 1, 1], 2).unwrap();
        for pm in &d.procs {
            for (index, patch) in mesh.patches().iter().enumerate() {
                assert_eq!(pm.desc.patches[index].name, patch.name);
                assert_eq!(pm.addressing.boundary[index], index as i64);
            }
        }
    }

    #[test]
    fn split_cyclic_is_rejected_unless_preserved() {
        let mesh = BlockMesh::line(4, 4.0).cyclic_x().build().unwrap();
        let result = Decomposition::from_assignment(&mesh, vec![0, 0, 1, 1], 2);
        assert!(matches!(result, Err(Error::PartitionInvariant(_))));

        let settings = DecompositionConfig {
            n_procs: 2,
            method: Method::Manual {
                assignment: vec![0, 0, 1, 1],
            },
            preserve_cyclics: true,
        };
        let d = Decomposition::new(&mesh, &settings).unwrap();
        assert_eq!(d.cell_proc, vec![0, 0, 1, 0]);
    }

    #[test]
    fn processor_meshes_build() {
        let mesh = square(4);
        let d = Decomposition::from_assignment(&mesh, checkerboard(&mesh), 4).unwrap();
        let volume: f64 = d
            .procs
            .iter()
            .map(|pm| Mesh::new(pm.desc.clone()).unwrap().cell_volumes().iter().sum::<f64>())
            .sum();
        assert!((volume - 0.1).abs() < 1e-12);
    }

    #[test]
    fn rebuilt_addressing_matches_written_addressing() {
        let mesh = square(3);
        let cell_proc = vec![0, 1, 1, 0, 2, 1, 2, 2, 0];
        let d = Decomposition::from_assignment(&mesh, cell_proc, 3).unwrap();
        for (proc_no, pm) in d.procs.iter().enumerate() {
            let rebuilt = ProcAddressing::rebuild(mesh.description(), &pm.desc, 3, proc_no).unwrap();
            assert_eq!(rebuilt, pm.addressing);
            rebuilt.check(mesh.description(), &pm.desc, 3).unwrap();
        }
    }
}
