//! Implicit finite-volume operators. Each returns a fresh equation for the
//! given field; combine them with `+` and `-`.

use serde::{Deserialize, Serialize};

use crate::dimension::{DIM_LENGTH, DIM_TIME, DIM_VOLUME};
use crate::error::Result;
use crate::field::boundary::patch_slice;
use crate::field::{Coefficient, Diffusivity, FieldValue, Gradable, SurfaceField, VolField};
use crate::fvc::{self, NonOrthCorrection};
use crate::interpolation::{self, Scheme};
use crate::matrix::FvMatrix;
use crate::mesh::Mesh;
use crate::time::TimeState;

const GREAT: f64 = 1e300;

/// Time derivative schemes.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DdtScheme {
    /// First order implicit.
    Euler,
    /// Second order, three time levels. Falls back to Euler while the field
    /// holds only one old level.
    Backward,
}

impl Default for DdtScheme {
    fn default() -> Self {
        DdtScheme::Euler
    }
}

/// `d(rho psi)/dt`, or `d(psi)/dt` without a density.
///
pub fn ddt<T: FieldValue>(
    mesh: &Mesh,
    time: &TimeState,
    scheme: DdtScheme,
    rho: Option<Coefficient<'_, f64>>,
    vf: &VolField<T>,
) -> Result<FvMatrix<T>> {
    let rho_dims = rho.as_ref().map(|r| r.dimensions());
    let mut dimensions = vf.dimensions() * DIM_VOLUME / DIM_TIME;
    if let Some(d) = rho_dims {
        dimensions = d * dimensions;
    }
    let mut fvm = FvMatrix::new(mesh, vf, dimensions);
    let r_delta_t = 1.0 / time.delta_t;
    let volumes = mesh.cell_volumes();

    let density = |c: &Option<Coefficient<'_, f64>>, cell: usize| c.as_ref().map_or(1.0, |r| r.value(cell));

    let old = vf.old_time(1)?;
    let rho0 = match &rho {
        Some(r) => Some(r.old_time(1)?),
        None => None,
    };

    match scheme {
        DdtScheme::Euler => {
            for cell in 0..mesh.n_cells() {
                fvm.diag_mut()[cell] = r_delta_t * density(&rho, cell) * volumes[cell];
                fvm.source_mut()[cell] = old.internal[cell] * (r_delta_t * density(&rho0, cell) * volumes[cell]);
            }
        }
        DdtScheme::Backward => {
            let has_old_old = vf.n_old_times() >= 2;
            let delta_t = time.delta_t;
            let delta_t0 = if has_old_old { time.delta_t0 } else { GREAT };
            let coefft = 1.0 + delta_t / (delta_t + delta_t0);
            let coefft00 = delta_t * delta_t / (delta_t0 * (delta_t + delta_t0));
            let coefft0 = coefft + coefft00;

            let old_old = if has_old_old { Some(vf.old_time(2)?) } else { None };
            let rho00 = match (&rho, has_old_old) {
                (Some(r), true) => Some(r.old_time(2)?),
                _ => None,
            };

            for cell in 0..mesh.n_cells() {
                fvm.diag_mut()[cell] = coefft * r_delta_t * density(&rho, cell) * volumes[cell];
                let mut s = old.internal[cell] * (coefft0 * density(&rho0, cell));
                if let Some(oo) = old_old {
                    s -= oo.internal[cell] * (coefft00 * density(&rho00, cell));
                }
                fvm.source_mut()[cell] = s * (r_delta_t * volumes[cell]);
            }
        }
    }
    Ok(fvm)
}

/// Convection `div(phi, vf)` with the face values of `vf` from `scheme`.
/// The matrix is asymmetric whatever the scheme.
///
pub fn div<T: Gradable>(mesh: &Mesh, phi: &SurfaceField<f64>, vf: &VolField<T>, scheme: Scheme) -> Result<FvMatrix<T>> {
    let weights = interpolation::weights(mesh, scheme, Some(phi), vf)?;
    let mut fvm = FvMatrix::new(mesh, vf, phi.dimensions * vf.dimensions());

    let lower: Vec<f64> = phi.internal.iter().enumerate().map(|(f, flux)| -weights[f] * flux).collect();
    fvm.lower_mut().copy_from_slice(&lower);
    for (u, (l, flux)) in fvm.upper_mut().iter_mut().zip(lower.iter().zip(&phi.internal)) {
        *u = l + flux
    }
    fvm.neg_sum_diag(mesh);

    for (patch, pf) in vf.boundary().iter().enumerate() {
        let pw = patch_slice(mesh, patch, &weights);
        let patch_flux = &phi.boundary[patch];
        let vic = pf.condition().value_internal_coeffs(mesh, pw)?;
        let vbc = pf.condition().value_boundary_coeffs(mesh, pf.values(), pw)?;
        fvm.internal_coeffs_mut()[patch] = vic.iter().zip(patch_flux).map(|(c, f)| *c * *f).collect();
        fvm.boundary_coeffs_mut()[patch] = vbc.iter().zip(patch_flux).map(|(c, f)| *c * -*f).collect();
    }
    Ok(fvm)
}

/// Diffusion `div(gamma grad(vf))`. The orthogonal part is implicit; the
/// non-orthogonal correction goes to the source and is kept as the face
/// flux correction of the matrix.
///
pub fn laplacian<'a, T, D>(mesh: &Mesh, gamma: D, vf: &VolField<T>, correction: NonOrthCorrection) -> Result<FvMatrix<T>>
where
    T: Gradable,
    D: Into<Diffusivity<'a>>,
{
    let gamma = gamma.into();
    let gamma_f = gamma.on_faces(mesh)?;
    let mag_sf = mesh.mag_face_areas();
    let gamma_mag_sf = SurfaceField::from_fn("gammaMagSf", mesh, gamma_f.dimensions * DIM_LENGTH * DIM_LENGTH, false, |f| {
        gamma_f.face_value(mesh, f) * mag_sf[f]
    });
    let delta = mesh.non_orth_delta_coeffs();
    let mut fvm = FvMatrix::new(mesh, vf, gamma.dimensions() * vf.dimensions() * DIM_LENGTH);

    for (u, (g, dc)) in fvm.upper_mut().iter_mut().zip(gamma_mag_sf.internal.iter().zip(delta)) {
        *u = dc * g
    }
    fvm.neg_sum_diag(mesh);

    for (patch, pf) in vf.boundary().iter().enumerate() {
        let pdc = patch_slice(mesh, patch, delta);
        let pgamma = &gamma_mag_sf.boundary[patch];
        let gic = pf.condition().gradient_internal_coeffs(pdc)?;
        let gbc = pf.condition().gradient_boundary_coeffs(pf.values(), pdc)?;
        fvm.internal_coeffs_mut()[patch] = gic.iter().zip(pgamma).map(|(c, g)| *c * *g).collect();
        fvm.boundary_coeffs_mut()[patch] = gbc.iter().zip(pgamma).map(|(c, g)| *c * -*g).collect();
    }

    if let Some(corr) = fvc::correction(mesh, vf, correction)? {
        let mut flux = corr.scale(&gamma_mag_sf);
        flux.name = format!("faceFluxCorrection({})", vf.name());
        let volumes = mesh.cell_volumes();
        for ((s, d), vol) in fvm.source_mut().iter_mut().zip(fvc::surface_integrate(mesh, &flux)).zip(volumes) {
            *s -= d * *vol
        }
        fvm.set_face_flux_correction(flux);
    }
    Ok(fvm)
}

/// Implicit linear source `sp psi`.
///
pub fn sp<'a, T: FieldValue>(mesh: &Mesh, coeff: impl Into<Coefficient<'a, f64>>, vf: &VolField<T>) -> Result<FvMatrix<T>> {
    let coeff = coeff.into();
    let mut fvm = FvMatrix::new(mesh, vf, coeff.dimensions() * vf.dimensions() * DIM_VOLUME);
    for (cell, (d, vol)) in fvm.diag_mut().iter_mut().zip(mesh.cell_volumes()).enumerate() {
        *d += vol * coeff.value(cell)
    }
    Ok(fvm)
}

/// Explicit source `su`, as a term of the expression.
///
pub fn su<'a, T: FieldValue>(mesh: &Mesh, coeff: impl Into<Coefficient<'a, T>>, vf: &VolField<T>) -> Result<FvMatrix<T>> {
    let coeff = coeff.into();
    let mut fvm = FvMatrix::new(mesh, vf, coeff.dimensions() * DIM_VOLUME);
    for (cell, (s, vol)) in fvm.source_mut().iter_mut().zip(mesh.cell_volumes()).enumerate() {
        *s -= coeff.value(cell) * *vol
    }
    Ok(fvm)
}

/// Linear source `s psi`, implicit where `s` is positive and explicit
/// where it is negative, which keeps the diagonal from weakening.
///
pub fn su_sp<'a, T: FieldValue>(mesh: &Mesh, coeff: impl Into<Coefficient<'a, f64>>, vf: &VolField<T>) -> Result<FvMatrix<T>> {
    let coeff = coeff.into();
    let mut fvm = FvMatrix::new(mesh, vf, coeff.dimensions() * vf.dimensions() * DIM_VOLUME);
    let volumes = mesh.cell_volumes();
    for cell in 0..mesh.n_cells() {
        let s = coeff.value(cell);
        fvm.diag_mut()[cell] += volumes[cell] * s.max(0.0);
        fvm.source_mut()[cell] -= vf.value(cell) * (volumes[cell] * s.min(0.0));
    }
    Ok(fvm)
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::dimension::{Dimensioned, DIMLESS, DIM_DENSITY, DIM_KINEMATIC_VISCOSITY};
    use crate::field::BoundarySpec;
    use crate::matrix::SolverControls;
    use crate::meshing::BlockMesh;
    use crate::num_vec::Vector3;
    use approx::assert_relative_eq;

    fn field(mesh: &Mesh, values: Vec<f64>) -> VolField<f64> {
        let specs = BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::ZeroGradient);
        VolField::new("T", mesh, DIMLESS, values, specs).unwrap()
    }

    fn nu() -> Dimensioned<f64> {
        Dimensioned::new(1.0, DIM_KINEMATIC_VISCOSITY)
    }

    #[test]
    fn two_cell_laplacian_has_area_over_distance_coefficients() {
        let mesh = BlockMesh::line(2, 2.0).build().unwrap();
        let t = field(&mesh, vec![0.0, 10.0]);
        let m = laplacian(&mesh, nu(), &t, NonOrthCorrection::Uncorrected).unwrap();

        assert!(m.symmetric());
        assert_eq!(m.upper().unwrap(), &[1.0]);
        assert_eq!(m.diag(), &[-1.0, -1.0]);
        assert_eq!(m.source(), &[0.0, 0.0]);
        for coeffs in m.boundary_coeffs() {
            assert!(coeffs.iter().all(|c| *c == 0.0));
        }
    }

    #[test]
    fn euler_ddt_solves_to_the_old_value() {
        let mesh = BlockMesh::unit_cube(1).build().unwrap();
        let mut t = field(&mesh, vec![2.0]);
        t.store_old_time();
        let time = TimeState::new(0.0, 1.0);

        let mut m = ddt(&mesh, &time, DdtScheme::Euler, None, &t).unwrap();
        assert_eq!(m.diag(), &[1.0]);
        assert_eq!(m.source(), &[2.0]);
        t.internal_mut()[0] = 0.0;
        m.solve(&mesh, &mut t, &SolverControls::default()).unwrap();
        assert_eq!(t.value(0), 2.0);
    }

    #[test]
    fn ddt_without_history_is_an_error() {
        let mesh = BlockMesh::unit_cube(1).build().unwrap();
        let t = field(&mesh, vec![2.0]);
        let time = TimeState::new(0.0, 1.0);
        assert!(ddt(&mesh, &time, DdtScheme::Euler, None, &t).is_err());
    }

    #[test]
    fn backward_with_one_level_matches_euler() {
        let mesh = BlockMesh::line(3, 3.0).build().unwrap();
        let mut t = field(&mesh, vec![1.0, 2.0, 3.0]);
        t.store_old_time();
        let time = TimeState::new(0.0, 0.5);
        let rho = Dimensioned::new(2.0, DIM_DENSITY);

        let euler = ddt(&mesh, &time, DdtScheme::Euler, Some(rho.into()), &t).unwrap();
        let backward = ddt(&mesh, &time, DdtScheme::Backward, Some(rho.into()), &t).unwrap();
        assert_eq!(euler.diag(), backward.diag());
        assert_eq!(euler.source(), backward.source());
        assert_eq!(euler.diag(), &[4.0, 4.0, 4.0]);
    }

    #[test]
    fn backward_with_two_levels_is_second_order() {
        let mesh = BlockMesh::unit_cube(1).build().unwrap();
        let mut t = field(&mesh, vec![0.0]);
        t.store_old_time();
        t.internal_mut()[0] = 1.0;
        t.store_old_time();
        let time = TimeState::new(0.0, 1.0);

        let m = ddt(&mesh, &time, DdtScheme::Backward, None, &t).unwrap();
        // (3 psi - 4 psi0 + psi00) / 2 dt
        assert_relative_eq!(m.diag()[0], 1.5, epsilon = 1e-14);
        assert_relative_eq!(m.source()[0], 2.0, epsilon = 1e-14);
    }

    #[test]
    fn upwind_convection_is_conservative_and_asymmetric() {
        let mesh = BlockMesh::line(3, 3.0).build().unwrap();
        let t = field(&mesh, vec![1.0, 2.0, 3.0]);
        let phi = SurfaceField::from_fn("phi", &mesh, DIMLESS, true, |f| {
            if f < mesh.n_internal_faces() {
                1.0
            } else {
                mesh.face_areas()[f][0]
            }
        });
        let m = div(&mesh, &phi, &t, Scheme::Upwind).unwrap();
        assert!(m.asymmetric());
        assert_eq!(m.lower().unwrap(), &[-1.0, -1.0]);
        assert_eq!(m.upper().unwrap(), &[0.0, 0.0]);
        assert_eq!(m.diag(), &[1.0, 1.0, 0.0]);

        // column sums of the internal coefficients vanish
        let mut column = m.diag().to_vec();
        for face in 0..mesh.n_internal_faces() {
            column[mesh.owner()[face]] += m.lower().unwrap()[face];
            column[mesh.neighbour()[face]] += m.upper().unwrap()[face];
        }
        assert!(column.iter().all(|c| *c == 0.0));
    }

    #[test]
    fn corrected_laplacian_matches_explicit_operator() {
        let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 1.0, 1.0), (3, 2, 1)).build().unwrap();
        let values: Vec<f64> = mesh.cell_centres().iter().map(|c| c[0] * c[0] + c[1]).collect();
        let t = field(&mesh, values);
        let m = laplacian(&mesh, nu(), &t, NonOrthCorrection::Corrected).unwrap();
        let explicit = fvc::laplacian(&mesh, nu(), &t, NonOrthCorrection::Corrected).unwrap();

        let residual = m.residual(&mesh, &t);
        for cell in 0..mesh.n_cells() {
            // A psi - b equals the integrated explicit Laplacian
            assert_relative_eq!(-residual[cell], explicit.value(cell) * mesh.cell_volumes()[cell], epsilon = 1e-12);
        }
    }

    #[test]
    fn sources_follow_the_expression_sign() {
        let mesh = BlockMesh::line(2, 2.0).build().unwrap();
        let t = field(&mesh, vec![1.0, 1.0]);
        let rate = Dimensioned::new(-3.0, DIMLESS / DIM_TIME);

        let m = sp(&mesh, Dimensioned::new(2.0, DIMLESS / DIM_TIME), &t).unwrap();
        assert_eq!(m.diag(), &[2.0, 2.0]);
        let m = su(&mesh, Dimensioned::new(4.0, DIMLESS / DIM_TIME), &t).unwrap();
        assert_eq!(m.source(), &[-4.0, -4.0]);
        let m = su_sp(&mesh, rate, &t).unwrap();
        assert_eq!(m.diag(), &[0.0, 0.0]);
        assert_eq!(m.source(), &[3.0, 3.0]);
    }
}
