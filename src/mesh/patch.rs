use core::ops::Range;
use serde::{Deserialize, Serialize};

use crate::num_vec::Vector3;




/**
 * The kind of a boundary patch. Coupled kinds (`Cyclic`, `Processor`) stand
 * for faces whose far side is a cell that is not addressed by this mesh's
 * owner/neighbour lists: either a cell across a periodic boundary, or a cell
 * owned by another rank.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PatchKind {
    Patch,
    Wall,

    /// Face `i` of this patch is coupled to face `i` of `neighbour_patch`.
    /// `separation` translates the neighbour patch onto this one:
    /// `Cf_this = Cf_neighbour + separation`.
    Cyclic {
        neighbour_patch: usize,
        separation: Vector3,
    },

    /// Faces shared with rank `neighb_proc`. Face `i` here and face `i` of
    /// the matching patch on the neighbour are the same global face with
    /// opposite orientation. The neighbour's cell centres are kept for
    /// geometry; they are refreshed by exchange when the mesh moves.
    Processor {
        my_proc: usize,
        neighb_proc: usize,
        neighb_cell_centres: Vec<Vector3>,
    },
}




/**
 * A named, contiguous range of boundary faces.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolyPatch {
    pub name: String,
    pub start: usize,
    pub size: usize,
    pub kind: PatchKind,
}




// ============================================================================
impl PolyPatch {

    pub fn new<S: Into<String>>(name: S, start: usize, size: usize, kind: PatchKind) -> Self {
        Self { name: name.into(), start, size, kind }
    }

    /**
     * The name conventionally given to the patch on `my_proc` facing
     * `neighb_proc`.
     */
    pub fn processor_name(my_proc: usize, neighb_proc: usize) -> String {
        format!("procBoundary{}to{}", my_proc, neighb_proc)
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }

    pub fn coupled(&self) -> bool {
        matches!(self.kind, PatchKind::Cyclic { .. } | PatchKind::Processor { .. })
    }

    pub fn is_processor(&self) -> bool {
        matches!(self.kind, PatchKind::Processor { .. })
    }

    pub fn neighb_proc(&self) -> Option<usize> {
        match self.kind {
            PatchKind::Processor { neighb_proc, .. } => Some(neighb_proc),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            PatchKind::Patch => "patch",
            PatchKind::Wall => "wall",
            PatchKind::Cyclic { .. } => "cyclic",
            PatchKind::Processor { .. } => "processor",
        }
    }
}
