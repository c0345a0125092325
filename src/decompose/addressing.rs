//! The maps from a processor mesh back to the complete mesh.

use std::collections::HashMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mesh::MeshDescription;

pub const FORMAT_VERSION: u32 = 1;




/**
 * Identifies the decomposition an addressing file belongs to. Reading an
 * addressing whose header does not match the complete mesh is an error,
 * since every index in it would be meaningless.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressingHeader {
    pub format_version: u32,
    pub n_procs: usize,
    pub proc_no: usize,
    pub n_points: usize,
    pub n_faces: usize,
    pub n_cells: usize,
}




/**
 * Local-to-global maps of one processor mesh. Face entries are signed and
 * one-based, `+(g + 1)` for a face with the orientation of global face `g`
 * and `-(g + 1)` for the reversed face. Boundary entries give the global
 * patch of each local patch, or `-1` for processor patches.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcAddressing {
    pub header: AddressingHeader,
    pub point: Vec<usize>,
    pub face: Vec<i64>,
    pub cell: Vec<usize>,
    pub boundary: Vec<i64>,
}




// ============================================================================
impl AddressingHeader {

    pub fn for_mesh(complete: &MeshDescription, n_procs: usize, proc_no: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            n_procs,
            proc_no,
            n_points: complete.points.len(),
            n_faces: complete.faces.len(),
            n_cells: complete.n_cells(),
        }
    }
}




// ============================================================================
impl ProcAddressing {

    pub fn encode_face(global: usize, flipped: bool) -> i64 {
        let a = global as i64 + 1;
        if flipped {
            -a
        } else {
            a
        }
    }

    /// The global face and whether the local face is reversed.
    pub fn decode_face(a: i64) -> Result<(usize, bool)> {
        match a.unsigned_abs().checked_sub(1) {
            Some(g) => Ok((g as usize, a < 0)),
            None => Err(Error::topology("face addressing", "entries are one-based, found 0")),
        }
    }

    pub fn global_face(&self, local: usize) -> Result<(usize, bool)> {
        let proc_no = self.header.proc_no;
        let a = *self.face.get(local).ok_or_else(|| Error::StaleAddressing {
            proc_no,
            details: format!("no face addressing for local face {} of {}", local, self.face.len()),
        })?;
        Self::decode_face(a).map_err(|e| Error::StaleAddressing {
            proc_no,
            details: format!("local face {}: {}", local, e),
        })
    }

    pub fn global_patch(&self, local: usize) -> Option<usize> {
        self.boundary.get(local).and_then(|&b| usize::try_from(b).ok())
    }

    /// Fail with `StaleAddressing` unless this addressing was made for the
    /// given complete mesh and processor mesh.
    ///
    pub fn check(&self, complete: &MeshDescription, local: &MeshDescription, n_procs: usize) -> Result<()> {
        let proc_no = self.header.proc_no;
        let stale = |details: String| Error::StaleAddressing { proc_no, details };
        let expected = AddressingHeader::for_mesh(complete, n_procs, proc_no);

        if self.header != expected {
            return Err(stale(format!("header {:?} does not match the case {:?}", self.header, expected)));
        }
        self.check_local(local)?;
        if self.boundary.iter().any(|&b| b >= complete.patches.len() as i64) {
            return Err(stale("boundary addressing names a patch outside the complete mesh".into()));
        }
        Ok(())
    }

    /// Fail with `StaleAddressing` unless the entry counts match the
    /// processor mesh and every entry lies inside the sizes of the header.
    ///
    pub fn check_local(&self, local: &MeshDescription) -> Result<()> {
        let header = &self.header;
        let stale = |details: String| Error::StaleAddressing {
            proc_no: header.proc_no,
            details,
        };
        let sizes = [
            ("point", self.point.len(), local.points.len()),
            ("face", self.face.len(), local.faces.len()),
            ("cell", self.cell.len(), local.n_cells()),
            ("boundary", self.boundary.len(), local.patches.len()),
        ];
        for (what, have, want) in sizes {
            if have != want {
                return Err(stale(format!("{} addressing has {} entries, processor mesh has {}", what, have, want)));
            }
        }
        if self.point.iter().any(|&p| p >= header.n_points)
            || self.cell.iter().any(|&c| c >= header.n_cells)
            || self.face.iter().any(|&f| f == 0 || f.unsigned_abs() > header.n_faces as u64)
            || self.boundary.iter().any(|&b| b < -1)
        {
            return Err(stale("addressing refers outside the complete mesh".into()));
        }
        Ok(())
    }

    /// Recover the addressing of a processor mesh by matching it against
    /// the complete mesh: points by exact coordinates, faces by their sets
    /// of points, cells through the owners of their faces, and patches by
    /// name.
    ///
    pub fn rebuild(complete: &MeshDescription, local: &MeshDescription, n_procs: usize, proc_no: usize) -> Result<Self> {
        let fail = |details: String| Error::StaleAddressing { proc_no, details };

        let by_coordinates: HashMap<[u64; 3], usize> = complete
            .points
            .iter()
            .enumerate()
            .rev()
            .map(|(i, p)| ([p[0].to_bits(), p[1].to_bits(), p[2].to_bits()], i))
            .collect();

        let point = local
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                by_coordinates
                    .get(&[p[0].to_bits(), p[1].to_bits(), p[2].to_bits()])
                    .copied()
                    .ok_or_else(|| fail(format!("point {} at {:?} is not in the complete mesh", i, p)))
            })
            .collect::<Result<Vec<_>>>()?;

        let by_points: HashMap<Vec<usize>, usize> = complete
            .faces
            .iter()
            .enumerate()
            .map(|(i, f)| (sorted(f), i))
            .collect();

        let mut face = Vec::with_capacity(local.faces.len());
        for (i, f) in local.faces.iter().enumerate() {
            let mapped: Vec<usize> = f.iter().map(|&p| point[p]).collect();
            let g = *by_points
                .get(&sorted(&mapped))
                .ok_or_else(|| fail(format!("face {} matches no face of the complete mesh", i)))?;
            face.push(Self::encode_face(g, !same_orientation(&complete.faces[g], &mapped)));
        }

        let n_cells = local.n_cells();
        let mut cell = vec![None; n_cells];
        for (i, &a) in face.iter().enumerate() {
            let (g, flipped) = Self::decode_face(a)?;
            let global_owner = if flipped {
                complete.neighbour.get(g).copied()
            } else {
                Some(complete.owner[g])
            };
            cell[local.owner[i]] = cell[local.owner[i]].or(global_owner);
            if i < local.n_internal_faces() {
                cell[local.neighbour[i]] = cell[local.neighbour[i]].or(complete.neighbour.get(g).copied());
            }
        }
        let cell = cell
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.ok_or_else(|| fail(format!("cell {} could not be matched", i))))
            .collect::<Result<Vec<_>>>()?;

        let boundary = local
            .patches
            .iter()
            .map(|patch| {
                if patch.is_processor() {
                    return Ok(-1);
                }
                complete
                    .patches
                    .iter()
                    .position(|p| p.name == patch.name)
                    .map(|p| p as i64)
                    .ok_or_else(|| fail(format!("patch {} is not in the complete mesh", patch.name)))
            })
            .collect::<Result<Vec<_>>>()?;

        info!("rebuilt addressing of processor {}", proc_no);

        Ok(Self {
            header: AddressingHeader::for_mesh(complete, n_procs, proc_no),
            point,
            face,
            cell,
            boundary,
        })
    }
}

fn sorted(points: &[usize]) -> Vec<usize> {
    let mut s = points.to_vec();
    s.sort_unstable();
    s
}

/// Whether two loops over the same points run in the same direction.
fn same_orientation(a: &[usize], b: &[usize]) -> bool {
    let n = a.len();
    match a.iter().position(|&p| p == b[0]) {
        Some(k) => a[(k + 1) % n] == b[1 % n],
        None => true,
    }
}

/// Check that the cell addressing of all processors together lists every
/// cell of the complete mesh exactly once.
///
pub fn check_cell_coverage(addressing: &[ProcAddressing], n_cells: usize) -> Result<()> {
    let mut seen: Vec<Option<usize>> = vec![None; n_cells];
    for a in addressing {
        let proc_no = a.header.proc_no;
        for &c in &a.cell {
            match seen.get(c) {
                None => {
                    return Err(Error::PartitionInvariant(format!(
                        "processor {} lists cell {} of {}",
                        proc_no, c, n_cells
                    )))
                }
                Some(Some(other)) => {
                    return Err(Error::PartitionInvariant(format!(
                        "cell {} is on processors {} and {}",
                        c, other, proc_no
                    )))
                }
                Some(None) => seen[c] = Some(proc_no),
            }
        }
    }
    if let Some(gap) = seen.iter().position(Option::is_none) {
        return Err(Error::PartitionInvariant(format!("cell {} is on no processor", gap)));
    }
    Ok(())
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn addressing(proc_no: usize, cell: Vec<usize>) -> ProcAddressing {
        ProcAddressing {
            header: AddressingHeader {
                format_version: FORMAT_VERSION,
                n_procs: 2,
                proc_no,
                n_points: 0,
                n_faces: 0,
                n_cells: 4,
            },
            point: vec![],
            face: vec![],
            cell,
            boundary: vec![],
        }
    }

    #[test]
    fn faces_are_signed_and_one_based() {
        assert_eq!(ProcAddressing::encode_face(0, false), 1);
        assert_eq!(ProcAddressing::encode_face(4, true), -5);
        assert_eq!(ProcAddressing::decode_face(-5).unwrap(), (4, true));
        assert_eq!(ProcAddressing::decode_face(1).unwrap(), (0, false));
        assert!(matches!(ProcAddressing::decode_face(0), Err(Error::InvalidTopology { .. })));

        let mut a = addressing(1, vec![]);
        a.face = vec![0, 3];
        assert!(matches!(a.global_face(0), Err(Error::StaleAddressing { proc_no: 1, .. })));
        assert_eq!(a.global_face(1).unwrap(), (2, false));
        assert!(matches!(a.global_face(2), Err(Error::StaleAddressing { .. })));
    }

    #[test]
    fn coverage_detects_gaps_and_collisions() {
        let good = [addressing(0, vec![0, 2]), addressing(1, vec![1, 3])];
        assert!(check_cell_coverage(&good, 4).is_ok());

        let gap = [addressing(0, vec![0, 2]), addressing(1, vec![1])];
        assert!(matches!(check_cell_coverage(&gap, 4), Err(Error::PartitionInvariant(_))));

        let collision = [addressing(0, vec![0, 1, 2]), addressing(1, vec![1, 3])];
        assert!(matches!(check_cell_coverage(&collision, 4), Err(Error::PartitionInvariant(_))));
    }

    #[test]
    fn orientation_of_point_loops() {
        assert!(same_orientation(&[0, 1, 2, 3], &[2, 3, 0, 1]));
        assert!(!same_orientation(&[0, 1, 2, 3], &[0, 3, 2, 1]));
    }
}
