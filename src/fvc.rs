//! Explicit finite-volume operators. Each takes fields and returns a new
//! field computed from their current values; inputs are never modified.
//! Operators that build volume fields evaluate the coupled patches of the
//! result, which on a decomposed mesh is a collective call.

use log::info;
use serde::{Deserialize, Serialize};

use crate::dimension::{DIM_AREA, DIM_LENGTH, DIM_VOLUME};
use crate::error::Result;
use crate::field::{Diffusivity, FieldValue, Gradable, SurfaceField, VolField};
use crate::interpolation::{self, Scheme};
use crate::mesh::Mesh;
use crate::num_vec::Vector3;

const SMALL: f64 = 1e-15;

/// Treatment of the non-orthogonal part of the face-normal gradient.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "correction", rename_all = "camelCase")]
pub enum NonOrthCorrection {
    Uncorrected,
    Corrected,
    /// Corrected, with the correction limited to `coeff` times the
    /// orthogonal part; 0 is uncorrected and 1 is fully corrected.
    Limited { coeff: f64 },
}

impl Default for NonOrthCorrection {
    fn default() -> Self {
        NonOrthCorrection::Corrected
    }
}

/// Interpolate a volume field to the faces with the given scheme.
///
pub fn interpolate<T: Gradable>(
    mesh: &Mesh,
    vf: &VolField<T>,
    scheme: Scheme,
    phi: Option<&SurfaceField<f64>>,
) -> Result<SurfaceField<T>> {
    let w = interpolation::weights(mesh, scheme, phi, vf)?;
    Ok(interpolation::interpolate(mesh, vf, &w))
}

/// Sum of the face values over the faces of each cell, outward positive,
/// divided by the cell volume.
///
pub fn surface_integrate<T: FieldValue>(mesh: &Mesh, ssf: &SurfaceField<T>) -> Vec<T> {
    let owner = mesh.owner();
    let neighbour = mesh.neighbour();
    let mut result = vec![T::zero(); mesh.n_cells()];

    for (face, v) in ssf.internal.iter().enumerate() {
        result[owner[face]] += *v;
        result[neighbour[face]] -= *v;
    }
    for (poly, values) in mesh.patches().iter().zip(&ssf.boundary) {
        for (face, v) in poly.range().zip(values) {
            result[owner[face]] += *v
        }
    }
    for (r, vol) in result.iter_mut().zip(mesh.cell_volumes()) {
        *r = *r * (1.0 / vol)
    }
    result
}

/// Gauss gradient: face values from linear interpolation times the face
/// area vectors, summed per cell and divided by the volume. On non-coupled
/// patches the normal component of the boundary gradient is replaced by
/// the boundary condition's normal gradient.
///
pub fn grad<T: Gradable>(mesh: &Mesh, vf: &VolField<T>) -> Result<VolField<T::Grad>> {
    let sf = interpolation::linear(mesh, vf);
    let areas = mesh.face_areas();
    let owner = mesh.owner();
    let neighbour = mesh.neighbour();
    let mut igrad = vec![<T::Grad as FieldValue>::zero(); mesh.n_cells()];

    for (face, v) in sf.internal.iter().enumerate() {
        let contribution = T::face_product(&areas[face], v);
        igrad[owner[face]] += contribution;
        igrad[neighbour[face]] -= contribution;
    }
    for (poly, values) in mesh.patches().iter().zip(&sf.boundary) {
        for (face, v) in poly.range().zip(values) {
            igrad[owner[face]] += T::face_product(&areas[face], v)
        }
    }
    for (g, vol) in igrad.iter_mut().zip(mesh.cell_volumes()) {
        *g = *g * (1.0 / vol)
    }

    let mut result = VolField::new_calculated(format!("grad({})", vf.name()), mesh, vf.dimensions() / DIM_LENGTH, igrad)?;

    for (patch, poly) in mesh.patches().iter().enumerate() {
        let pf = vf.patch(patch);
        if pf.coupled() {
            continue;
        }
        let sn = pf.condition().sn_grad(mesh, vf.internal(), pf.values());
        for (i, face) in poly.range().enumerate() {
            let n = areas[face] / mesh.mag_face_areas()[face];
            let gc = result.value(owner[face]);
            result.patch_mut(patch).values_mut()[i] = gc + T::face_product(&n, &(sn[i] - T::directional(&n, &gc)));
        }
    }
    Ok(result)
}

/// Divergence of a face field: the net outward sum per unit volume.
///
pub fn div<T: FieldValue>(mesh: &Mesh, ssf: &SurfaceField<T>) -> Result<VolField<T>> {
    VolField::new_calculated(
        format!("div({})", ssf.name),
        mesh,
        ssf.dimensions / DIM_VOLUME,
        surface_integrate(mesh, ssf),
    )
}

/// Convective divergence `div(phi, vf)` with the given interpolation.
///
pub fn div_flux<T: Gradable>(mesh: &Mesh, phi: &SurfaceField<f64>, vf: &VolField<T>, scheme: Scheme) -> Result<VolField<T>> {
    let face_values = interpolate(mesh, vf, scheme, Some(phi))?;
    let mut flux = face_values.scale(phi);
    flux.name = format!("{},{}", phi.name, vf.name());
    div(mesh, &flux)
}

/// Per-face non-orthogonal correction of the normal gradient, or `None` if
/// the correction is switched off. Zero on non-coupled boundary faces.
///
pub fn correction<T: Gradable>(mesh: &Mesh, vf: &VolField<T>, kind: NonOrthCorrection) -> Result<Option<SurfaceField<T>>> {
    if kind == NonOrthCorrection::Uncorrected {
        return Ok(None);
    }
    let g = grad(mesh, vf)?;
    let face_grad = interpolation::linear(mesh, &g);
    let k = mesh.non_orth_correction_vectors();

    let mut corr = SurfaceField::from_fn(format!("corr({})", vf.name()), mesh, vf.dimensions() / DIM_LENGTH, false, |_| T::zero());
    for face in 0..mesh.n_internal_faces() {
        corr.internal[face] = T::directional(&k[face], &face_grad.internal[face]);
    }
    for (patch, poly) in mesh.patches().iter().enumerate() {
        if vf.patch(patch).coupled() {
            for (i, face) in poly.range().enumerate() {
                corr.boundary[patch][i] = T::directional(&k[face], &face_grad.boundary[patch][i]);
            }
        }
    }

    if let NonOrthCorrection::Limited { coeff } = kind {
        let unc = uncorrected_sn_grad(mesh, vf);
        let limit = |c: T, u: T| {
            let limiter = (coeff * u.mag() / ((1.0 - coeff) * c.mag() + SMALL)).min(1.0);
            c * limiter
        };
        for (c, u) in corr.internal.iter_mut().zip(&unc.internal) {
            *c = limit(*c, *u)
        }
        for (cp, up) in corr.boundary.iter_mut().zip(&unc.boundary) {
            for (c, u) in cp.iter_mut().zip(up) {
                *c = limit(*c, *u)
            }
        }
    }
    Ok(Some(corr))
}

/// `dc (psi_N - psi_P)` on internal and coupled faces, the boundary
/// condition's normal gradient elsewhere.
///
fn uncorrected_sn_grad<T: FieldValue>(mesh: &Mesh, vf: &VolField<T>) -> SurfaceField<T> {
    let dc = mesh.non_orth_delta_coeffs();
    let owner = mesh.owner();
    let neighbour = mesh.neighbour();

    let internal = (0..mesh.n_internal_faces())
        .map(|f| (vf.value(neighbour[f]) - vf.value(owner[f])) * dc[f])
        .collect();
    let boundary = mesh
        .patches()
        .iter()
        .enumerate()
        .map(|(patch, poly)| {
            let pf = vf.patch(patch);
            match pf.condition().patch_neighbour_field() {
                Some(pnf) => poly
                    .range()
                    .enumerate()
                    .map(|(i, f)| (pnf[i] - vf.value(owner[f])) * dc[f])
                    .collect(),
                None => pf.condition().sn_grad(mesh, vf.internal(), pf.values()),
            }
        })
        .collect();

    SurfaceField {
        name: format!("snGrad({})", vf.name()),
        dimensions: vf.dimensions() / DIM_LENGTH,
        oriented: true,
        internal,
        boundary,
    }
}

/// Face-normal gradient, with the requested non-orthogonal correction.
///
pub fn sn_grad<T: Gradable>(mesh: &Mesh, vf: &VolField<T>, kind: NonOrthCorrection) -> Result<SurfaceField<T>> {
    let mut sn = uncorrected_sn_grad(mesh, vf);
    if let Some(corr) = correction(mesh, vf, kind)? {
        for (s, c) in sn.internal.iter_mut().zip(&corr.internal) {
            *s += *c
        }
        for (patch, (sp, cp)) in sn.boundary.iter_mut().zip(&corr.boundary).enumerate() {
            if vf.patch(patch).coupled() {
                for (s, c) in sp.iter_mut().zip(cp) {
                    *s += *c
                }
            }
        }
    }
    Ok(sn)
}

/// `div(gamma |S| snGrad(vf))`.
///
pub fn laplacian<'a, T, D>(mesh: &Mesh, gamma: D, vf: &VolField<T>, kind: NonOrthCorrection) -> Result<VolField<T>>
where
    T: Gradable,
    D: Into<Diffusivity<'a>>,
{
    let gamma = gamma.into().on_faces(mesh)?;
    let mag_sf = SurfaceField::from_fn("magSf", mesh, DIM_AREA, false, |f| mesh.mag_face_areas()[f]);
    let mut flux = sn_grad(mesh, vf, kind)?.scale(&gamma.scale(&mag_sf));
    flux.name = format!("laplacian({},{})", gamma.name, vf.name());
    div(mesh, &flux)
}

/// Volumetric flux `U_f . S` of a velocity field.
///
pub fn flux(mesh: &Mesh, u: &VolField<Vector3>) -> SurfaceField<f64> {
    let uf = interpolation::linear(mesh, u);
    let areas = mesh.face_areas();
    let mut phi = SurfaceField::from_fn(format!("phi({})", u.name()), mesh, u.dimensions() * DIM_AREA, true, |_| 0.0);
    for (face, v) in uf.internal.iter().enumerate() {
        phi.internal[face] = v.dot(&areas[face])
    }
    for (patch, poly) in mesh.patches().iter().enumerate() {
        for (i, face) in poly.range().enumerate() {
            phi.boundary[patch][i] = uf.boundary[patch][i].dot(&areas[face])
        }
    }
    phi
}

/// Sum of the face values of each cell, unsigned.
///
pub fn surface_sum<T: FieldValue>(mesh: &Mesh, ssf: &SurfaceField<T>) -> Result<VolField<T>> {
    let owner = mesh.owner();
    let neighbour = mesh.neighbour();
    let mut result = vec![T::zero(); mesh.n_cells()];

    for (face, v) in ssf.internal.iter().enumerate() {
        result[owner[face]] += *v;
        result[neighbour[face]] += *v;
    }
    for (poly, values) in mesh.patches().iter().zip(&ssf.boundary) {
        for (face, v) in poly.range().zip(values) {
            result[owner[face]] += *v
        }
    }
    VolField::new_calculated(format!("surfaceSum({})", ssf.name), mesh, ssf.dimensions, result)
}

/// Integral of the field over the whole domain, across all ranks.
///
pub fn domain_integrate<T: FieldValue>(mesh: &Mesh, vf: &VolField<T>) -> Result<T> {
    let mut total = T::zero();
    for (v, vol) in vf.internal().iter().zip(mesh.cell_volumes()) {
        total += *v * *vol
    }
    let mut result = T::zero();
    for d in 0..T::NUM_COMPONENTS {
        result.set_component(d, mesh.comm().sum(total.component(d))?);
    }
    Ok(result)
}

/// Mean and maximum Courant number of a volumetric flux over a time step.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CourantReport {
    pub mean: f64,
    pub max: f64,
}

impl CourantReport {
    pub fn exceeds(&self, limit: f64) -> bool {
        self.max > limit
    }
}

/// Courant number `0.5 dt sum|phi| / V`, reduced over all ranks.
///
pub fn courant_number(mesh: &Mesh, phi: &SurfaceField<f64>, delta_t: f64) -> Result<CourantReport> {
    let abs_phi = phi.map_values("magPhi", phi.dimensions, f64::abs);
    let sum_phi = surface_sum(mesh, &abs_phi)?;
    let comm = mesh.comm();

    let local_max = sum_phi
        .internal()
        .iter()
        .zip(mesh.cell_volumes())
        .map(|(s, v)| s / v)
        .fold(0.0, f64::max);
    let max = 0.5 * comm.max(local_max)? * delta_t;
    let total_phi = comm.sum(sum_phi.internal().iter().sum())?;
    let total_volume = comm.sum(mesh.cell_volumes().iter().sum())?;
    let mean = 0.5 * total_phi / total_volume * delta_t;

    info!("Courant Number mean: {:.6} max: {:.6}", mean, max);
    Ok(CourantReport { mean, max })
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::dimension::{Dimensioned, DIMLESS, DIM_KINEMATIC_VISCOSITY, DIM_VELOCITY};
    use crate::field::BoundarySpec;
    use crate::meshing::BlockMesh;
    use approx::assert_relative_eq;

    fn zero_gradient<T: FieldValue>(mesh: &Mesh, name: &str, values: Vec<T>) -> VolField<T> {
        let specs = BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::ZeroGradient);
        VolField::new(name, mesh, DIMLESS, values, specs).unwrap()
    }

    #[test]
    fn laplacian_of_uniform_field_is_exactly_zero() {
        let mesh = BlockMesh::unit_cube(1).build().unwrap();
        let t = zero_gradient(&mesh, "T", vec![5.0]);
        let lap = laplacian(&mesh, Dimensioned::new(1.0, DIM_KINEMATIC_VISCOSITY), &t, NonOrthCorrection::Corrected).unwrap();
        assert_eq!(lap.value(0), 0.0);
    }

    #[test]
    fn gradient_of_linear_field_is_exact_in_the_interior() {
        let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(4.0, 1.0, 1.0), (4, 1, 1)).build().unwrap();
        let values = mesh.cell_centres().iter().map(|c| 3.0 * c[0]).collect();
        let t = zero_gradient(&mesh, "T", values);
        let g = grad(&mesh, &t).unwrap();
        assert_relative_eq!(g.value(1)[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(g.value(2)[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(g.value(1)[1], 0.0, epsilon = 1e-12);
        assert_eq!(g.dimensions(), DIMLESS / DIM_LENGTH);
    }

    #[test]
    fn divergence_sums_to_zero_without_boundary_flux() {
        let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 2.0, 1.0), (3, 4, 2)).build().unwrap();
        let mut phi = SurfaceField::from_fn("phi", &mesh, DIMLESS, true, |f| ((f * 7919) % 13) as f64 - 6.0);
        for values in phi.boundary.iter_mut() {
            values.iter_mut().for_each(|v| *v = 0.0)
        }
        let d = div(&mesh, &phi).unwrap();
        let total: f64 = d.internal().iter().zip(mesh.cell_volumes()).map(|(v, vol)| v * vol).sum();
        assert!(total.abs() < 1e-12);
    }

    #[test]
    fn uniform_velocity_has_expected_flux_and_courant_number() {
        let mesh = BlockMesh::line(4, 1.0).build().unwrap();
        let specs = BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::ZeroGradient);
        let u = VolField::new("U", &mesh, DIM_VELOCITY, vec![Vector3::xyz(2.0, 0.0, 0.0); 4], specs).unwrap();
        let phi = flux(&mesh, &u);
        assert!(phi.oriented);
        assert_relative_eq!(phi.internal[0], 2.0, epsilon = 1e-12);

        let co = courant_number(&mesh, &phi, 0.1).unwrap();
        // each cell has |phi| = 2 on its two x faces, volume 0.25
        assert_relative_eq!(co.max, 0.5 * 4.0 / 0.25 * 0.1, epsilon = 1e-12);
        assert!(co.exceeds(0.5));
    }

    #[test]
    fn domain_integral_weights_by_volume() {
        let mesh = BlockMesh::line(2, 2.0).build().unwrap();
        let t = zero_gradient(&mesh, "T", vec![1.0, 3.0]);
        assert_relative_eq!(domain_integrate(&mesh, &t).unwrap(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn divergence_of_convective_flux_is_conservative() {
        let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 1.0, 1.0), (3, 3, 1)).build().unwrap();
        let t = zero_gradient(&mesh, "T", (0..9).map(|c| (c * c) as f64).collect());
        let mut phi = SurfaceField::from_fn("phi", &mesh, DIMLESS, true, |f| if f % 2 == 0 { 1.0 } else { -0.5 });
        for values in phi.boundary.iter_mut() {
            values.iter_mut().for_each(|v| *v = 0.0)
        }
        let d = div_flux(&mesh, &phi, &t, Scheme::Upwind).unwrap();
        let total: f64 = d.internal().iter().zip(mesh.cell_volumes()).map(|(v, vol)| v * vol).sum();
        assert!(total.abs() < 1e-10);
    }
}
