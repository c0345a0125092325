//! Unstructured polyhedral mesh topology and geometry. Faces are stored
//! internal-first; each internal face has an owner cell and a neighbour cell
//! with `owner < neighbour`, and its area vector points from owner to
//! neighbour. Boundary faces follow, grouped contiguously by patch, with
//! area vectors pointing out of the domain.

pub mod geometry;
pub mod map;
pub mod patch;

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{exchange, Communicator, SerialCommunicator};
use crate::num_vec::Vector3;
pub use geometry::Geometry;
pub use map::{MeshMap, PatchMap};
pub use patch::{PatchKind, PolyPatch};

/// The raw connectivity of a mesh, as stored on disk and as produced by the
/// decomposer. `instance` is the time at which this mesh was last written;
/// reconstruction compares instances to detect stale processor meshes.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshDescription {
    pub instance: f64,
    pub points: Vec<Vector3>,
    pub faces: Vec<Vec<usize>>,
    pub owner: Vec<usize>,
    pub neighbour: Vec<usize>,
    pub patches: Vec<PolyPatch>,
}

impl MeshDescription {
    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    /// Number of cells, inferred from the largest cell label referenced by
    /// the owner and neighbour lists.
    pub fn n_cells(&self) -> usize {
        self.owner
            .iter()
            .chain(self.neighbour.iter())
            .max()
            .map_or(0, |c| c + 1)
    }

    /// Check the structural invariants of the connectivity: list lengths,
    /// label ranges, the owner < neighbour orientation of every internal
    /// face, and that patches tile the boundary faces in order.
    ///
    pub fn check(&self) -> Result<()> {
        let n_faces = self.faces.len();
        let n_internal = self.neighbour.len();
        let n_points = self.points.len();

        if self.owner.len() != n_faces {
            return Err(Error::topology(
                "mesh",
                format!("{} faces but {} owner entries", n_faces, self.owner.len()),
            ));
        }
        if n_internal > n_faces {
            return Err(Error::topology(
                "mesh",
                format!("{} neighbour entries exceed {} faces", n_internal, n_faces),
            ));
        }
        for (face, f) in self.faces.iter().enumerate() {
            if f.len() < 3 {
                return Err(Error::topology("mesh", format!("face {} has {} points", face, f.len())));
            }
            if let Some(p) = f.iter().find(|&&p| p >= n_points) {
                return Err(Error::topology(
                    "mesh",
                    format!("face {} references point {} of {}", face, p, n_points),
                ));
            }
        }
        for face in 0..n_internal {
            let (own, nei) = (self.owner[face], self.neighbour[face]);
            if own >= nei {
                return Err(Error::topology(
                    "mesh",
                    format!("internal face {} has owner {} >= neighbour {}", face, own, nei),
                ));
            }
        }

        let mut next = n_internal;
        for patch in &self.patches {
            if patch.start != next {
                return Err(Error::topology(
                    "mesh",
                    format!("patch {} starts at face {}, expected {}", patch.name, patch.start, next),
                ));
            }
            next += patch.size;
        }
        if next != n_faces {
            return Err(Error::topology(
                "mesh",
                format!("patches cover faces up to {}, mesh has {}", next, n_faces),
            ));
        }

        for patch in &self.patches {
            if let PatchKind::Cyclic { neighbour_patch, .. } = patch.kind {
                let nbr = self.patches.get(neighbour_patch).ok_or_else(|| {
                    Error::topology("cyclic", format!("patch {} names missing neighbour {}", patch.name, neighbour_patch))
                })?;
                if nbr.size != patch.size {
                    return Err(Error::topology(
                        "cyclic",
                        format!("patch {} has {} faces, neighbour {} has {}", patch.name, patch.size, nbr.name, nbr.size),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A mesh with its derived geometry and the communicator of the rank that
/// owns it. Read-only except through the mesh-change events `move_points`
/// and `change_topology`, which recompute all derived data.
///
pub struct Mesh {
    desc: MeshDescription,
    n_cells: usize,
    cell_faces: Vec<Vec<usize>>,
    geometry: Geometry,
    event: u64,
    comm: Arc<dyn Communicator>,
}

impl Mesh {
    /// Build a serial mesh.
    ///
    pub fn new(desc: MeshDescription) -> Result<Self> {
        Self::with_communicator(desc, Arc::new(SerialCommunicator::new()))
    }

    /// Build the mesh of one rank in a parallel run.
    ///
    pub fn with_communicator(desc: MeshDescription, comm: Arc<dyn Communicator>) -> Result<Self> {
        desc.check()?;
        let n_cells = desc.n_cells();
        let geometry = Geometry::compute(&desc, n_cells)?;
        let cell_faces = make_cell_faces(&desc, n_cells);

        info!(
            "[{}] mesh: {} cells, {} faces ({} internal), {} patches",
            comm.rank(),
            n_cells,
            desc.faces.len(),
            desc.n_internal_faces(),
            desc.patches.len()
        );

        Ok(Self {
            desc,
            n_cells,
            cell_faces,
            geometry,
            event: 0,
            comm,
        })
    }

    pub fn description(&self) -> &MeshDescription {
        &self.desc
    }

    pub fn into_description(self) -> MeshDescription {
        self.desc
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn comm_handle(&self) -> Arc<dyn Communicator> {
        Arc::clone(&self.comm)
    }

    pub fn instance(&self) -> f64 {
        self.desc.instance
    }

    pub fn set_instance(&mut self, instance: f64) {
        self.desc.instance = instance
    }

    /// Number of mesh-change events this mesh has been through.
    pub fn event(&self) -> u64 {
        self.event
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_faces(&self) -> usize {
        self.desc.faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.desc.neighbour.len()
    }

    pub fn n_points(&self) -> usize {
        self.desc.points.len()
    }

    pub fn points(&self) -> &[Vector3] {
        &self.desc.points
    }

    pub fn faces(&self) -> &[Vec<usize>] {
        &self.desc.faces
    }

    pub fn owner(&self) -> &[usize] {
        &self.desc.owner
    }

    pub fn neighbour(&self) -> &[usize] {
        &self.desc.neighbour
    }

    pub fn patches(&self) -> &[PolyPatch] {
        &self.desc.patches
    }

    pub fn patch(&self, index: usize) -> &PolyPatch {
        &self.desc.patches[index]
    }

    pub fn find_patch(&self, name: &str) -> Option<usize> {
        self.desc.patches.iter().position(|p| p.name == name)
    }

    pub fn patch_sizes(&self) -> Vec<usize> {
        self.desc.patches.iter().map(|p| p.size).collect()
    }

    /// Cells adjacent to the faces of a patch.
    pub fn patch_face_cells(&self, patch: usize) -> &[usize] {
        &self.desc.owner[self.desc.patches[patch].range()]
    }

    pub fn cell_faces(&self, cell: usize) -> &[usize] {
        &self.cell_faces[cell]
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn cell_volumes(&self) -> &[f64] {
        &self.geometry.cell_volumes
    }

    pub fn cell_centres(&self) -> &[Vector3] {
        &self.geometry.cell_centres
    }

    pub fn face_centres(&self) -> &[Vector3] {
        &self.geometry.face_centres
    }

    pub fn face_areas(&self) -> &[Vector3] {
        &self.geometry.face_areas
    }

    pub fn mag_face_areas(&self) -> &[f64] {
        &self.geometry.mag_face_areas
    }

    pub fn weights(&self) -> &[f64] {
        &self.geometry.weights
    }

    pub fn delta_coeffs(&self) -> &[f64] {
        &self.geometry.delta_coeffs
    }

    pub fn non_orth_delta_coeffs(&self) -> &[f64] {
        &self.geometry.non_orth_delta_coeffs
    }

    pub fn non_orth_correction_vectors(&self) -> &[Vector3] {
        &self.geometry.non_orth_correction_vectors
    }

    /// Total volume summed over all ranks.
    pub fn total_volume(&self) -> Result<f64> {
        self.comm.sum(self.geometry.cell_volumes.iter().sum())
    }

    /// Verify the owner < neighbour orientation of every internal face.
    ///
    pub fn check_orientation(&self) -> Result<()> {
        self.desc.check()
    }

    /// Mesh motion: replace the point coordinates and recompute all derived
    /// geometry. On processor patches the neighbour cell centres are
    /// refreshed by exchange, so every rank must move its mesh together. The
    /// mesh is left untouched if the new points give invalid geometry.
    /// Motion keeps the topology, so the returned map is the identity.
    ///
    pub fn move_points(&mut self, points: Vec<Vector3>) -> Result<MeshMap> {
        if points.len() != self.desc.points.len() {
            return Err(Error::topology(
                "mesh motion",
                format!("{} points supplied for a mesh of {}", points.len(), self.desc.points.len()),
            ));
        }
        let mut desc = self.desc.clone();
        desc.points = points;
        let geometry = rebuild_geometry(self.comm.as_ref(), &mut desc, self.n_cells)?;

        self.desc = desc;
        self.geometry = geometry;
        self.event += 1;
        debug!("[{}] mesh moved, event {}", self.comm.rank(), self.event);
        Ok(MeshMap::identity(self.n_cells, &self.patch_sizes()))
    }

    /// Topology change: replace the connectivity wholesale and return the
    /// map that dependent fields need to follow it. Without a `map`, the
    /// change must keep the cell count and every patch size, and the
    /// identity is returned. Collective when the mesh has processor patches.
    ///
    pub fn change_topology(&mut self, desc: MeshDescription, map: Option<MeshMap>) -> Result<MeshMap> {
        let mut desc = desc;
        desc.check()?;
        let n_cells = desc.n_cells();
        let map = self.topology_map(&desc, n_cells, map)?;
        let geometry = rebuild_geometry(self.comm.as_ref(), &mut desc, n_cells)?;

        self.cell_faces = make_cell_faces(&desc, n_cells);
        self.geometry = geometry;
        self.n_cells = n_cells;
        self.desc = desc;
        self.event += 1;
        info!(
            "[{}] topology changed: {} cells, {} faces, event {}",
            self.comm.rank(),
            self.n_cells,
            self.n_faces(),
            self.event
        );
        Ok(map)
    }

    fn topology_map(&self, desc: &MeshDescription, n_cells: usize, map: Option<MeshMap>) -> Result<MeshMap> {
        let new_sizes: Vec<usize> = desc.patches.iter().map(|p| p.size).collect();
        let old_sizes = self.patch_sizes();

        let map = match map {
            Some(map) => map,
            None if n_cells == self.n_cells && new_sizes == old_sizes => MeshMap::identity(n_cells, &new_sizes),
            None => {
                return Err(Error::topology(
                    "topology change",
                    "cell count or patch sizes changed and no map was given",
                ))
            }
        };

        let out_of_range = |addressing: &[Option<usize>], n_old: usize| addressing.iter().flatten().any(|&i| i >= n_old);
        if map.cell_map.len() != n_cells || out_of_range(&map.cell_map, self.n_cells) {
            return Err(Error::topology(
                "topology change",
                format!("cell map does not take {} old cells to {} new cells", self.n_cells, n_cells),
            ));
        }
        if map.patch_maps.len() != new_sizes.len() || new_sizes.len() != old_sizes.len() {
            return Err(Error::topology(
                "topology change",
                format!("{} patch maps for {} patches", map.patch_maps.len(), new_sizes.len()),
            ));
        }
        for (patch, (pm, (&new, &old))) in map.patch_maps.iter().zip(new_sizes.iter().zip(&old_sizes)).enumerate() {
            if pm.size() != new || pm.old_size != old || out_of_range(&pm.addressing, old) {
                return Err(Error::topology(
                    "topology change",
                    format!("map of patch {} does not take {} old faces to {} new faces", desc.patches[patch].name, old, new),
                ));
            }
        }
        Ok(map)
    }
}

/// Exchange the cell centres next to every processor patch, then compute
/// the geometry of `desc`. Centres are taken from the unchecked geometry so
/// that all ranks reach the exchange even if one of them holds a broken
/// mesh.
///
fn rebuild_geometry(comm: &dyn Communicator, desc: &mut MeshDescription, n_cells: usize) -> Result<Geometry> {
    if desc.patches.iter().any(|p| p.is_processor()) {
        let (face_centres, face_areas) = geometry::face_centres_and_areas(&desc.points, &desc.faces);
        let (cell_centres, _) =
            geometry::cell_centres_and_volumes(n_cells, &desc.owner, &desc.neighbour, &face_centres, &face_areas);
        let tag = comm.next_tag();

        for patch in desc.patches.iter().filter(|p| p.is_processor()) {
            let centres: Vec<Vector3> = patch.range().map(|face| cell_centres[desc.owner[face]]).collect();
            if let Some(nbr) = patch.neighb_proc() {
                exchange::send_values(comm, nbr, tag, &centres)?;
            }
        }
        for patch in desc.patches.iter_mut() {
            let size = patch.size;
            if let PatchKind::Processor { neighb_proc, neighb_cell_centres, .. } = &mut patch.kind {
                *neighb_cell_centres = exchange::recv_values(comm, *neighb_proc, tag, size)?;
            }
        }
    }
    Geometry::compute(desc, n_cells)
}

fn make_cell_faces(desc: &MeshDescription, n_cells: usize) -> Vec<Vec<usize>> {
    let mut cell_faces = vec![Vec::new(); n_cells];
    for (face, &cell) in desc.owner.iter().enumerate() {
        cell_faces[cell].push(face)
    }
    for (face, &cell) in desc.neighbour.iter().enumerate() {
        cell_faces[cell].push(face)
    }
    for faces in &mut cell_faces {
        faces.sort_unstable()
    }
    cell_faces
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::decompose::Decomposition;
    use crate::meshing::BlockMesh;
    use crate::message::ChannelCommunicator;
    use approx::assert_relative_eq;

    #[test]
    fn unit_cube_has_unit_volume() {
        let mesh = BlockMesh::unit_cube(1).build().unwrap();
        assert_eq!(mesh.n_cells(), 1);
        assert_eq!(mesh.n_faces(), 6);
        assert_relative_eq!(mesh.cell_volumes()[0], 1.0, epsilon = 1e-14);
        assert_relative_eq!(mesh.cell_centres()[0][0], 0.5, epsilon = 1e-14);
    }

    #[test]
    fn closed_cells_have_zero_net_area() {
        let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 2.0, 3.0), (3, 2, 2)).build().unwrap();
        let mut net = vec![Vector3::zero(); mesh.n_cells()];
        for face in 0..mesh.n_faces() {
            net[mesh.owner()[face]] += mesh.face_areas()[face];
            if face < mesh.n_internal_faces() {
                net[mesh.neighbour()[face]] -= mesh.face_areas()[face];
            }
        }
        for n in net {
            assert!(n.mag() < 1e-12);
        }
    }

    #[test]
    fn reversed_internal_face_is_rejected() {
        let mut desc = BlockMesh::line(2, 1.0).description();
        let (own, nei) = (desc.owner[0], desc.neighbour[0]);
        desc.owner[0] = nei;
        desc.neighbour[0] = own;
        assert!(matches!(Mesh::new(desc), Err(Error::InvalidTopology { .. })));
    }

    #[test]
    fn collapsed_cell_is_fatal() {
        let mut desc = BlockMesh::line(2, 1.0).description();
        for p in desc.points.iter_mut() {
            p[1] = 0.0
        }
        assert!(matches!(Mesh::new(desc), Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn motion_recomputes_geometry_and_keeps_orientation() {
        let mut mesh = BlockMesh::line(4, 1.0).build().unwrap();
        let stretched: Vec<_> = mesh.points().iter().map(|p| Vector3::xyz(p[0] * 2.0, p[1], p[2])).collect();
        mesh.move_points(stretched).unwrap();
        assert_eq!(mesh.event(), 1);
        assert_relative_eq!(mesh.cell_volumes()[0], 0.5, epsilon = 1e-14);
        assert!(mesh.check_orientation().is_ok());
        for face in 0..mesh.n_internal_faces() {
            assert!(mesh.owner()[face] < mesh.neighbour()[face]);
        }
    }

    #[test]
    fn failed_motion_leaves_the_mesh_unchanged() {
        let mut mesh = BlockMesh::line(2, 1.0).build().unwrap();
        let before = mesh.points().to_vec();
        let flattened: Vec<_> = before.iter().map(|p| Vector3::xyz(p[0], 0.0, p[2])).collect();
        assert!(matches!(mesh.move_points(flattened), Err(Error::InvalidGeometry { .. })));
        assert_eq!(mesh.points(), before.as_slice());
        assert_eq!(mesh.event(), 0);
        assert_relative_eq!(mesh.cell_volumes()[0], 0.5, epsilon = 1e-14);
    }

    #[test]
    fn topology_change_refreshes_processor_neighbours() {
        let mesh = BlockMesh::line(4, 1.0).build().unwrap();
        let d = Decomposition::from_assignment(&mesh, vec![0, 0, 1, 1], 2).unwrap();

        let coeffs = ChannelCommunicator::run(2, |comm| {
            let desc = d.procs[comm.rank()].desc.clone();
            let stretched: Vec<_> = desc.points.iter().map(|p| Vector3::xyz(p[0] * 2.0, p[1], p[2])).collect();
            let mut moved = Mesh::with_communicator(desc.clone(), Arc::clone(&comm)).unwrap();
            let mut changed = Mesh::with_communicator(desc.clone(), comm).unwrap();

            moved.move_points(stretched.clone()).unwrap();
            let map = changed
                .change_topology(MeshDescription { points: stretched, ..desc }, None)
                .unwrap();
            assert_eq!(map, MeshMap::identity(changed.n_cells(), &changed.patch_sizes()));
            assert_eq!(changed.event(), 1);

            let processor_coeff = |m: &Mesh| {
                let patch = m.patches().iter().find(|p| p.is_processor()).unwrap();
                m.delta_coeffs()[patch.range().start]
            };
            (processor_coeff(&moved), processor_coeff(&changed))
        });

        for (moved, changed) in coeffs {
            assert_relative_eq!(moved, 2.0, epsilon = 1e-12);
            assert_relative_eq!(changed, 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn topology_change_needs_a_map_when_sizes_change() {
        let mut mesh = BlockMesh::line(2, 1.0).build().unwrap();
        let finer = BlockMesh::line(3, 1.0).description();
        assert!(matches!(
            mesh.change_topology(finer.clone(), None),
            Err(Error::InvalidTopology { .. })
        ));
        assert_eq!(mesh.n_cells(), 2);

        let patch_maps = finer
            .patches
            .iter()
            .zip(mesh.patch_sizes())
            .map(|(p, old_size)| PatchMap {
                addressing: (0..p.size).map(|i| if i < old_size { Some(i) } else { None }).collect(),
                old_size,
            })
            .collect();
        let map = MeshMap {
            cell_map: vec![Some(0), Some(1), None],
            patch_maps,
        };
        let returned = mesh.change_topology(finer, Some(map.clone())).unwrap();
        assert_eq!(returned, map);
        assert_eq!(mesh.n_cells(), 3);
        assert_eq!(mesh.cell_faces(2).len(), 6);
    }

    #[test]
    fn orthogonal_faces_have_no_correction() {
        let mesh = BlockMesh::unit_cube(3).build().unwrap();
        for face in 0..mesh.n_internal_faces() {
            assert!(mesh.non_orth_correction_vectors()[face].mag() < 1e-12);
            assert_relative_eq!(mesh.weights()[face], 0.5, epsilon = 1e-12);
            assert_relative_eq!(mesh.delta_coeffs()[face], 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cell_faces_list_every_face_once_per_side() {
        let mesh = BlockMesh::unit_cube(2).build().unwrap();
        let total: usize = (0..mesh.n_cells()).map(|c| mesh.cell_faces(c).len()).sum();
        assert_eq!(total, mesh.n_faces() + mesh.n_internal_faces());
        assert!((0..mesh.n_cells()).all(|c| mesh.cell_faces(c).len() == 6));
    }
}
