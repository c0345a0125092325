use crate::error::Result;
use crate::mesh::{Mesh, MeshDescription, PatchKind, PolyPatch};
use crate::num_vec::Vector3;

/// Names of the six boundary patches of a block, in the order they are
/// written to the face list.
pub const BLOCK_PATCH_NAMES: [&str; 6] = ["xmin", "xmax", "ymin", "ymax", "zmin", "zmax"];

/// A generator for structured hexahedral meshes of an axis-aligned box,
/// written out as a general polyhedral mesh. Useful for test cases and
/// demonstration runs.
///
/// Points are numbered `i + (nx + 1) * (j + (ny + 1) * k)` and cells
/// `i + nx * (j + ny * k)`. Internal faces are listed cell by cell in the
/// order +x, +y, +z, which puts them in upper-triangular order.
///
#[derive(Clone, Debug)]
pub struct BlockMesh {
    lower: Vector3,
    upper: Vector3,
    cells: (usize, usize, usize),
    cyclic_x: bool,
    walls: bool,
}

impl BlockMesh {
    pub fn new(lower: Vector3, upper: Vector3, cells: (usize, usize, usize)) -> Self {
        assert!(
            cells.0 > 0 && cells.1 > 0 && cells.2 > 0,
            "block mesh needs at least one cell on each axis"
        );
        Self {
            lower,
            upper,
            cells,
            cyclic_x: false,
            walls: false,
        }
    }

    /// The unit cube with `n` cells on each axis.
    pub fn unit_cube(n: usize) -> Self {
        Self::new(Vector3::zero(), Vector3::xyz(1.0, 1.0, 1.0), (n, n, n))
    }

    /// A row of `n` cells along x, of total length `length` and unit cross
    /// section.
    pub fn line(n: usize, length: f64) -> Self {
        Self::new(Vector3::zero(), Vector3::xyz(length, 1.0, 1.0), (n, 1, 1))
    }

    /// Couple the `xmin` and `xmax` patches as a periodic pair.
    pub fn cyclic_x(mut self) -> Self {
        self.cyclic_x = true;
        self
    }

    /// Mark the non-periodic patches as walls.
    pub fn walls(mut self) -> Self {
        self.walls = true;
        self
    }

    pub fn num_cells(&self) -> usize {
        self.cells.0 * self.cells.1 * self.cells.2
    }

    pub fn description(&self) -> MeshDescription {
        let (nx, ny, nz) = self.cells;
        let pt = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cell = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

        let dx = self.upper - self.lower;
        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    points.push(Vector3::xyz(
                        self.lower[0] + dx[0] * i as f64 / nx as f64,
                        self.lower[1] + dx[1] * j as f64 / ny as f64,
                        self.lower[2] + dx[2] * k as f64 / nz as f64,
                    ))
                }
            }
        }

        // Faces normal to +x, +y, +z, lying in the given index plane.
        let x_face = |i: usize, j: usize, k: usize| vec![pt(i, j, k), pt(i, j + 1, k), pt(i, j + 1, k + 1), pt(i, j, k + 1)];
        let y_face = |i: usize, j: usize, k: usize| vec![pt(i, j, k), pt(i, j, k + 1), pt(i + 1, j, k + 1), pt(i + 1, j, k)];
        let z_face = |i: usize, j: usize, k: usize| vec![pt(i, j, k), pt(i + 1, j, k), pt(i + 1, j + 1, k), pt(i, j + 1, k)];
        let reversed = |mut f: Vec<usize>| {
            f.reverse();
            f
        };

        let mut faces = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let c = cell(i, j, k);
                    if i + 1 < nx {
                        faces.push(x_face(i + 1, j, k));
                        owner.push(c);
                        neighbour.push(cell(i + 1, j, k));
                    }
                    if j + 1 < ny {
                        faces.push(y_face(i, j + 1, k));
                        owner.push(c);
                        neighbour.push(cell(i, j + 1, k));
                    }
                    if k + 1 < nz {
                        faces.push(z_face(i, j, k + 1));
                        owner.push(c);
                        neighbour.push(cell(i, j, k + 1));
                    }
                }
            }
        }

        let mut patch_faces: [Vec<(Vec<usize>, usize)>; 6] = Default::default();
        for k in 0..nz {
            for j in 0..ny {
                patch_faces[0].push((reversed(x_face(0, j, k)), cell(0, j, k)));
                patch_faces[1].push((x_face(nx, j, k), cell(nx - 1, j, k)));
            }
        }
        for k in 0..nz {
            for i in 0..nx {
                patch_faces[2].push((reversed(y_face(i, 0, k)), cell(i, 0, k)));
                patch_faces[3].push((y_face(i, ny, k), cell(i, ny - 1, k)));
            }
        }
        for j in 0..ny {
            for i in 0..nx {
                patch_faces[4].push((reversed(z_face(i, j, 0)), cell(i, j, 0)));
                patch_faces[5].push((z_face(i, j, nz), cell(i, j, nz - 1)));
            }
        }

        let mut patches = Vec::with_capacity(6);
        for (index, list) in patch_faces.into_iter().enumerate() {
            let kind = match index {
                0 if self.cyclic_x => PatchKind::Cyclic {
                    neighbour_patch: 1,
                    separation: Vector3::xyz(-dx[0], 0.0, 0.0),
                },
                1 if self.cyclic_x => PatchKind::Cyclic {
                    neighbour_patch: 0,
                    separation: Vector3::xyz(dx[0], 0.0, 0.0),
                },
                _ if self.walls => PatchKind::Wall,
                _ => PatchKind::Patch,
            };
            patches.push(PolyPatch::new(BLOCK_PATCH_NAMES[index], faces.len(), list.len(), kind));
            for (face, c) in list {
                faces.push(face);
                owner.push(c);
            }
        }

        MeshDescription {
            instance: 0.0,
            points,
            faces,
            owner,
            neighbour,
            patches,
        }
    }

    /// Build a serial mesh of the block.
    pub fn build(&self) -> Result<Mesh> {
        Mesh::new(self.description())
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn counts_are_right() {
        let desc = BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 1.0, 1.0), (3, 2, 1)).description();
        assert_eq!(desc.n_cells(), 6);
        assert_eq!(desc.points.len(), 4 * 3 * 2);
        assert_eq!(desc.n_internal_faces(), 2 * 2 + 3 * 1);
        assert_eq!(desc.faces.len() - desc.n_internal_faces(), 2 * 2 + 2 * 3 + 2 * 6);
        assert!(desc.check().is_ok());
    }

    #[test]
    fn boundary_faces_point_outward() {
        let mesh = BlockMesh::unit_cube(2).build().unwrap();
        let centre = Vector3::xyz(0.5, 0.5, 0.5);
        for face in mesh.n_internal_faces()..mesh.n_faces() {
            let out = mesh.face_centres()[face] - centre;
            assert!(mesh.face_areas()[face].dot(&out) > 0.0);
        }
    }

    #[test]
    fn internal_faces_point_owner_to_neighbour() {
        let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(2.0, 1.0, 1.0), (4, 3, 2)).build().unwrap();
        for face in 0..mesh.n_internal_faces() {
            let d = mesh.cell_centres()[mesh.neighbour()[face]] - mesh.cell_centres()[mesh.owner()[face]];
            assert!(mesh.face_areas()[face].dot(&d) > 0.0);
        }
    }

    #[test]
    fn total_volume_matches_box() {
        let mesh = BlockMesh::new(Vector3::xyz(-1.0, 0.0, 0.0), Vector3::xyz(1.0, 0.5, 3.0), (5, 2, 3)).build().unwrap();
        assert_relative_eq!(mesh.total_volume().unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn cyclic_pair_is_coupled_with_full_weights() {
        let mesh = BlockMesh::line(4, 1.0).cyclic_x().build().unwrap();
        let xmin = mesh.find_patch("xmin").unwrap();
        assert!(mesh.patch(xmin).coupled());
        let face = mesh.patch(xmin).start;
        assert_relative_eq!(mesh.weights()[face], 0.5, epsilon = 1e-12);
        assert_relative_eq!(mesh.delta_coeffs()[face], 4.0, epsilon = 1e-12);
    }
}
