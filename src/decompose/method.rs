//! Cell-to-processor assignment.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mesh::{Mesh, PatchKind};

/// How cells are assigned to processors.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Method {
    /// Geometric split into `n[0] * n[1] * n[2]` boxes. Cells are sorted
    /// along each axis independently and cut into groups of equal count.
    Simple { n: [usize; 3] },

    /// An explicit processor for every cell.
    Manual { assignment: Vec<usize> },
}

impl Default for Method {
    fn default() -> Self {
        Method::Simple { n: [1, 1, 1] }
    }
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Simple { .. } => "simple",
            Method::Manual { .. } => "manual",
        }
    }

    /// The processor of every cell of `mesh`, validated against `n_procs`.
    ///
    pub fn assign(&self, mesh: &Mesh, n_procs: usize) -> Result<Vec<usize>> {
        let cell_proc = match self {
            Method::Simple { n } => simple(mesh, *n, n_procs)?,
            Method::Manual { assignment } => assignment.clone(),
        };
        validate(&cell_proc, mesh.n_cells(), n_procs)?;
        Ok(cell_proc)
    }
}

/// Check that an assignment covers every cell with a processor in range.
/// Processors that receive no cells are allowed, with a warning.
///
pub fn validate(cell_proc: &[usize], n_cells: usize, n_procs: usize) -> Result<()> {
    if n_procs == 0 {
        return Err(Error::PartitionInvariant("zero processors requested".into()));
    }
    if cell_proc.len() != n_cells {
        return Err(Error::PartitionInvariant(format!(
            "assignment has {} entries for {} cells",
            cell_proc.len(),
            n_cells
        )));
    }
    if let Some((cell, proc_no)) = cell_proc.iter().enumerate().find(|(_, &p)| p >= n_procs) {
        return Err(Error::PartitionInvariant(format!(
            "cell {} assigned to processor {} of {}",
            cell, proc_no, n_procs
        )));
    }
    let mut counts = vec![0usize; n_procs];
    for &p in cell_proc {
        counts[p] += 1
    }
    for (proc_no, count) in counts.iter().enumerate() {
        if *count == 0 {
            warn!("processor {} receives no cells", proc_no)
        }
    }
    Ok(())
}

fn simple(mesh: &Mesh, n: [usize; 3], n_procs: usize) -> Result<Vec<usize>> {
    if n[0] * n[1] * n[2] != n_procs {
        return Err(Error::Config(format!(
            "simple decomposition ({}, {}, {}) does not make {} processors",
            n[0], n[1], n[2], n_procs
        )));
    }
    let centres = mesh.cell_centres();
    let n_cells = mesh.n_cells();
    let mut cell_proc = vec![0; n_cells];
    let mut stride = 1;

    for (axis, &parts) in n.iter().enumerate() {
        let mut order: Vec<usize> = (0..n_cells).collect();
        order.sort_by(|&a, &b| centres[a][axis].total_cmp(&centres[b][axis]).then(a.cmp(&b)));

        for (group, cells) in groups(&order, parts).into_iter().enumerate() {
            for &cell in cells {
                cell_proc[cell] += group * stride
            }
        }
        stride *= parts;
    }
    Ok(cell_proc)
}

/// Cut `items` into `parts` consecutive groups whose sizes differ by at most
/// one, the larger groups first.
fn groups(items: &[usize], parts: usize) -> Vec<&[usize]> {
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for group in 0..parts {
        let size = if group < extra { base + 1 } else { base };
        out.push(&items[start..start + size]);
        start += size;
    }
    out
}

/// Move cells so that the two cells of every cyclic face pair share a
/// processor. Cells coupled through cyclics, directly or in a chain, form a
/// group, and the group goes to the processor of its lowest cell.
///
pub fn preserve_cyclics(mesh: &Mesh, cell_proc: &mut [usize]) -> usize {
    let mut parent: Vec<usize> = (0..mesh.n_cells()).collect();

    fn find(parent: &mut [usize], mut c: usize) -> usize {
        while parent[c] != c {
            parent[c] = parent[parent[c]];
            c = parent[c];
        }
        c
    }

    for (index, patch) in mesh.patches().iter().enumerate() {
        if let PatchKind::Cyclic { neighbour_patch, .. } = patch.kind {
            if neighbour_patch < index {
                continue;
            }
            let here = mesh.patch_face_cells(index);
            let there = mesh.patch_face_cells(neighbour_patch);
            for (&a, &b) in here.iter().zip(there) {
                let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                // keep the lowest cell as the root
                if ra < rb {
                    parent[rb] = ra
                } else if rb < ra {
                    parent[ra] = rb
                }
            }
        }
    }

    let mut moved = 0;
    for cell in 0..cell_proc.len() {
        let root = find(&mut parent, cell);
        if cell_proc[cell] != cell_proc[root] {
            cell_proc[cell] = cell_proc[root];
            moved += 1;
        }
    }
    moved
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::meshing::BlockMesh;
    use crate::num_vec::Vector3;

    #[test]
    fn simple_split_of_a_block_is_boxes() {
        let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(4.0, 2.0, 1.0), (4, 2, 1)).build().unwrap();
        let cell_proc = Method::Simple { n: [2, 2, 1] }.assign(&mesh, 4).unwrap();
        for (cell, c) in mesh.cell_centres().iter().enumerate() {
            let expected = (c[0] > 2.0) as usize + 2 * (c[1] > 1.0) as usize;
            assert_eq!(cell_proc[cell], expected);
        }
    }

    #[test]
    fn simple_split_must_match_processor_count() {
        let mesh = BlockMesh::line(4, 4.0).build().unwrap();
        assert!(Method::Simple { n: [2, 1, 1] }.assign(&mesh, 3).is_err());
    }

    #[test]
    fn uneven_groups_put_the_remainder_first() {
        let items: Vec<usize> = (0..7).collect();
        let sizes: Vec<usize> = groups(&items, 3).iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
    }

    #[test]
    fn manual_assignment_is_validated() {
        let mesh = BlockMesh::line(3, 3.0).build().unwrap();
        assert!(Method::Manual { assignment: vec![0, 1] }.assign(&mesh, 2).is_err());
        assert!(Method::Manual { assignment: vec![0, 1, 2] }.assign(&mesh, 2).is_err());
        assert_eq!(Method::Manual { assignment: vec![1, 1, 0] }.assign(&mesh, 2).unwrap(), vec![1, 1, 0]);
    }

    #[test]
    fn empty_processor_is_allowed() {
        assert!(validate(&[0, 0, 0], 3, 2).is_ok());
    }

    #[test]
    fn cyclic_pairs_are_kept_together() {
        let mesh = BlockMesh::line(4, 4.0).cyclic_x().build().unwrap();
        let mut cell_proc = vec![0, 0, 1, 1];
        let moved = preserve_cyclics(&mesh, &mut cell_proc);
        assert_eq!(moved, 1);
        assert_eq!(cell_proc, vec![0, 0, 1, 0]);
    }
}
