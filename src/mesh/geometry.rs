use log::warn;

use super::patch::PatchKind;
use super::MeshDescription;
use crate::error::{Error, Result};
use crate::num_vec::Vector3;

pub const VSMALL: f64 = 1e-300;
pub const ROOT_VSMALL: f64 = 1e-150;

/// Lower bound on `n · d / |d|` used for the non-orthogonal delta
/// coefficients; it keeps the implicit coefficient finite on faces whose
/// normal is almost perpendicular to the centre-to-centre vector.
const NON_ORTH_DELTA_LIMIT: f64 = 0.05;

/// Derived geometric quantities of a mesh. Face arrays cover all faces,
/// internal faces first; entries for non-coupled boundary faces use the
/// face centre in place of a neighbour cell centre.
///
#[derive(Clone, Debug, Default)]
pub struct Geometry {
    pub face_centres: Vec<Vector3>,
    pub face_areas: Vec<Vector3>,
    pub mag_face_areas: Vec<f64>,
    pub cell_centres: Vec<Vector3>,
    pub cell_volumes: Vec<f64>,

    /// Owner-side linear interpolation weight of each face.
    pub weights: Vec<f64>,
    /// `1 / |d|` across internal and coupled faces, `1 / (n · d)` on
    /// non-coupled boundary faces.
    pub delta_coeffs: Vec<f64>,
    pub non_orth_delta_coeffs: Vec<f64>,
    /// `n - d * non_orth_delta_coeff`; zero on non-coupled boundary faces.
    pub non_orth_correction_vectors: Vec<Vector3>,
}

impl Geometry {
    /// Compute all derived geometry. A face with no area or a cell with no
    /// (or negative) volume is a fatal error: the mesh is broken.
    ///
    pub fn compute(desc: &MeshDescription, n_cells: usize) -> Result<Self> {
        let (face_centres, face_areas) = face_centres_and_areas(&desc.points, &desc.faces);
        let mag_face_areas: Vec<f64> = face_areas.iter().map(|s| s.mag()).collect();

        for (face, &a) in mag_face_areas.iter().enumerate() {
            if !(a > VSMALL) {
                return Err(Error::InvalidGeometry {
                    what: "face",
                    index: face,
                    measure: "area",
                    value: a,
                });
            }
        }

        let (cell_centres, cell_volumes) =
            cell_centres_and_volumes(n_cells, &desc.owner, &desc.neighbour, &face_centres, &face_areas);

        for (cell, &v) in cell_volumes.iter().enumerate() {
            if !(v > VSMALL) {
                return Err(Error::InvalidGeometry {
                    what: "cell",
                    index: cell,
                    measure: "volume",
                    value: v,
                });
            }
        }

        let mut geometry = Self {
            face_centres,
            face_areas,
            mag_face_areas,
            cell_centres,
            cell_volumes,
            ..Self::default()
        };
        geometry.make_interpolation_factors(desc)?;
        Ok(geometry)
    }

    /// Return the centres of the cells on the far side of each face of a
    /// coupled patch, or `None` for a non-coupled patch.
    ///
    pub fn coupled_neighbour_centres(&self, desc: &MeshDescription, patch: usize) -> Result<Option<Vec<Vector3>>> {
        let p = &desc.patches[patch];
        match &p.kind {
            PatchKind::Cyclic { neighbour_patch, separation } => {
                let nbr = desc.patches.get(*neighbour_patch).ok_or_else(|| {
                    Error::topology("cyclic", format!("patch {} names missing neighbour {}", p.name, neighbour_patch))
                })?;
                Ok(Some(
                    nbr.range()
                        .map(|face| self.cell_centres[desc.owner[face]] + *separation)
                        .collect(),
                ))
            }
            PatchKind::Processor { neighb_cell_centres, .. } => {
                if neighb_cell_centres.len() != p.size {
                    return Err(Error::topology(
                        "processor",
                        format!(
                            "patch {} has {} faces but {} neighbour cell centres",
                            p.name,
                            p.size,
                            neighb_cell_centres.len()
                        ),
                    ));
                }
                Ok(Some(neighb_cell_centres.clone()))
            }
            _ => Ok(None),
        }
    }

    fn make_interpolation_factors(&mut self, desc: &MeshDescription) -> Result<()> {
        let n_faces = desc.faces.len();
        let n_internal = desc.neighbour.len();

        self.weights = vec![1.0; n_faces];
        self.delta_coeffs = vec![0.0; n_faces];
        self.non_orth_delta_coeffs = vec![0.0; n_faces];
        self.non_orth_correction_vectors = vec![Vector3::zero(); n_faces];

        let mut max_non_orth: f64 = 0.0;

        for face in 0..n_internal {
            let c_own = self.cell_centres[desc.owner[face]];
            let c_nei = self.cell_centres[desc.neighbour[face]];
            max_non_orth = max_non_orth.max(self.set_coupled_factors(face, c_own, c_nei));
        }

        for (patch_index, patch) in desc.patches.iter().enumerate() {
            match self.coupled_neighbour_centres(desc, patch_index)? {
                Some(centres) => {
                    for (i, face) in patch.range().enumerate() {
                        let c_own = self.cell_centres[desc.owner[face]];
                        max_non_orth = max_non_orth.max(self.set_coupled_factors(face, c_own, centres[i]));
                    }
                }
                None => {
                    for face in patch.range() {
                        let n = self.face_areas[face] / self.mag_face_areas[face];
                        let d = self.face_centres[face] - self.cell_centres[desc.owner[face]];
                        let dc = 1.0 / n.dot(&d).max(ROOT_VSMALL);
                        self.delta_coeffs[face] = dc;
                        self.non_orth_delta_coeffs[face] = dc;
                    }
                }
            }
        }

        if max_non_orth > 70.0 {
            warn!("maximum face non-orthogonality is {:.1} degrees", max_non_orth);
        }
        Ok(())
    }

    /// Set weight and delta coefficients of a face with cells on both sides;
    /// return the face non-orthogonality angle in degrees.
    fn set_coupled_factors(&mut self, face: usize, c_own: Vector3, c_nei: Vector3) -> f64 {
        let s = self.face_areas[face];
        let cf = self.face_centres[face];
        let n = s / self.mag_face_areas[face];

        let d_own = s.dot(&(cf - c_own)).abs();
        let d_nei = s.dot(&(c_nei - cf)).abs();
        self.weights[face] = if d_own + d_nei > VSMALL { d_nei / (d_own + d_nei) } else { 0.5 };

        let delta = c_nei - c_own;
        let mag_delta = delta.mag();
        self.delta_coeffs[face] = 1.0 / mag_delta.max(VSMALL);

        let n_dot_d = n.dot(&delta);
        let non_orth_dc = 1.0 / n_dot_d.max(NON_ORTH_DELTA_LIMIT * mag_delta);
        self.non_orth_delta_coeffs[face] = non_orth_dc;
        self.non_orth_correction_vectors[face] = n - delta * non_orth_dc;

        let cos = (n_dot_d / mag_delta.max(VSMALL)).clamp(-1.0, 1.0);
        cos.acos().to_degrees()
    }
}

/// Face centres and area vectors by triangle decomposition about the point
/// average. Area vectors follow the right-hand rule over the point loop.
///
pub fn face_centres_and_areas(points: &[Vector3], faces: &[Vec<usize>]) -> (Vec<Vector3>, Vec<Vector3>) {
    let mut centres = Vec::with_capacity(faces.len());
    let mut areas = Vec::with_capacity(faces.len());

    for face in faces {
        let n_points = face.len();

        if n_points == 3 {
            let (p0, p1, p2) = (points[face[0]], points[face[1]], points[face[2]]);
            centres.push((p0 + p1 + p2) / 3.0);
            areas.push((p1 - p0).cross(&(p2 - p0)) * 0.5);
            continue;
        }

        let mut estimate = Vector3::zero();
        for &p in face {
            estimate += points[p]
        }
        let estimate = estimate / n_points as f64;

        let mut sum_n = Vector3::zero();
        let mut sum_a = 0.0;
        let mut sum_ac = Vector3::zero();

        for i in 0..n_points {
            let this = points[face[i]];
            let next = points[face[(i + 1) % n_points]];
            let c = this + next + estimate;
            let n = (next - this).cross(&(estimate - this));
            let a = n.mag();
            sum_n += n;
            sum_a += a;
            sum_ac += c * a;
        }

        if sum_a < ROOT_VSMALL {
            centres.push(estimate);
            areas.push(Vector3::zero());
        } else {
            centres.push(sum_ac / (3.0 * sum_a));
            areas.push(sum_n * 0.5);
        }
    }
    (centres, areas)
}

/// Cell centres and volumes by pyramid decomposition about the average of
/// each cell's face centres.
///
pub fn cell_centres_and_volumes(
    n_cells: usize,
    owner: &[usize],
    neighbour: &[usize],
    face_centres: &[Vector3],
    face_areas: &[Vector3],
) -> (Vec<Vector3>, Vec<f64>) {
    let mut estimate = vec![Vector3::zero(); n_cells];
    let mut count = vec![0usize; n_cells];

    for (face, &cell) in owner.iter().enumerate() {
        estimate[cell] += face_centres[face];
        count[cell] += 1;
    }
    for (face, &cell) in neighbour.iter().enumerate() {
        estimate[cell] += face_centres[face];
        count[cell] += 1;
    }
    for (e, &n) in estimate.iter_mut().zip(&count) {
        *e = *e / (n.max(1) as f64)
    }

    let mut centres = vec![Vector3::zero(); n_cells];
    let mut volumes = vec![0.0; n_cells];

    for (face, &cell) in owner.iter().enumerate() {
        let pyr3_vol = face_areas[face].dot(&(face_centres[face] - estimate[cell]));
        let pc = face_centres[face] * 0.75 + estimate[cell] * 0.25;
        centres[cell] += pc * pyr3_vol;
        volumes[cell] += pyr3_vol;
    }
    for (face, &cell) in neighbour.iter().enumerate() {
        let pyr3_vol = face_areas[face].dot(&(estimate[cell] - face_centres[face]));
        let pc = face_centres[face] * 0.75 + estimate[cell] * 0.25;
        centres[cell] += pc * pyr3_vol;
        volumes[cell] += pyr3_vol;
    }

    for cell in 0..n_cells {
        if volumes[cell].abs() > VSMALL {
            centres[cell] = centres[cell] / volumes[cell];
        } else {
            centres[cell] = estimate[cell];
        }
        volumes[cell] /= 3.0;
    }
    (centres, volumes)
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unit_square_face_has_unit_area() {
        let points = vec![
            Vector3::xyz(0.0, 0.0, 0.0),
            Vector3::xyz(1.0, 0.0, 0.0),
            Vector3::xyz(1.0, 1.0, 0.0),
            Vector3::xyz(0.0, 1.0, 0.0),
        ];
        let (c, a) = face_centres_and_areas(&points, &[vec![0, 1, 2, 3]]);
        assert_relative_eq!(c[0][0], 0.5);
        assert_relative_eq!(c[0][1], 0.5);
        assert_relative_eq!(a[0][2], 1.0);
        assert_relative_eq!(a[0][0], 0.0);
    }

    #[test]
    fn triangle_area_is_half_the_cross_product() {
        let points = vec![
            Vector3::xyz(0.0, 0.0, 0.0),
            Vector3::xyz(2.0, 0.0, 0.0),
            Vector3::xyz(0.0, 2.0, 0.0),
        ];
        let (_, a) = face_centres_and_areas(&points, &[vec![0, 1, 2]]);
        assert_relative_eq!(a[0][2], 2.0);
    }
}
