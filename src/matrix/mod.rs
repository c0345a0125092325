//! The finite-volume equation: a sparse matrix in lower-diagonal-upper
//! form over the mesh faces, a source, and per-patch coefficients for the
//! boundary faces. The matrix stands for the expression `A psi - b`, so
//! adding matrices adds expressions, and `solve` sets `A psi = b`.
//!
//! A boundary face contributes `internal_coeffs * psi_P` to the row of its
//! cell. On a non-coupled patch `boundary_coeffs` is a known value moved to
//! the source; on a coupled patch it multiplies the cell value on the far
//! side, which the solvers fetch through interfaces.

pub mod ldu;
pub mod solver;

use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use log::{debug, warn};

use crate::dimension::{DimensionSet, Dimensioned, DIM_VOLUME};
use crate::error::{fatal, Error, Result};
use crate::field::{FieldValue, SurfaceField, VolField};
use crate::mesh::Mesh;
pub use ldu::{Interface, LduSystem};
pub use solver::{SolverControls, SolverKind, SolverPerformance};

/// Life cycle of an equation. Contributions are only accepted while
/// accumulating; relaxation and constraints follow, and solving is
/// terminal.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EquationState {
    Accumulating,
    Relaxed,
    Constrained,
    Solved,
}

impl EquationState {
    pub fn name(&self) -> &'static str {
        match self {
            EquationState::Accumulating => "accumulating",
            EquationState::Relaxed => "relaxed",
            EquationState::Constrained => "constrained",
            EquationState::Solved => "solved",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FvMatrix<T: FieldValue> {
    field_name: String,
    dimensions: DimensionSet,
    n_internal_faces: usize,
    diag: Vec<f64>,
    upper: Option<Vec<f64>>,
    lower: Option<Vec<f64>>,
    source: Vec<T>,
    internal_coeffs: Vec<Vec<T>>,
    boundary_coeffs: Vec<Vec<T>>,
    face_flux_correction: Option<SurfaceField<T>>,
    state: EquationState,
}

impl<T: FieldValue> FvMatrix<T> {
    /// An empty equation for `psi`. `dimensions` are those of the
    /// expression integrated over a cell, e.g. `[psi] m^3/s` for a time
    /// derivative.
    ///
    pub fn new(mesh: &Mesh, psi: &VolField<T>, dimensions: DimensionSet) -> Self {
        Self {
            field_name: psi.name().to_string(),
            dimensions,
            n_internal_faces: mesh.n_internal_faces(),
            diag: vec![0.0; mesh.n_cells()],
            upper: None,
            lower: None,
            source: vec![T::zero(); mesh.n_cells()],
            internal_coeffs: mesh.patches().iter().map(|p| vec![T::zero(); p.size]).collect(),
            boundary_coeffs: mesh.patches().iter().map(|p| vec![T::zero(); p.size]).collect(),
            face_flux_correction: None,
            state: EquationState::Accumulating,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn dimensions(&self) -> DimensionSet {
        self.dimensions
    }

    pub fn state(&self) -> EquationState {
        self.state
    }

    pub fn diag(&self) -> &[f64] {
        &self.diag
    }

    pub fn diag_mut(&mut self) -> &mut [f64] {
        &mut self.diag
    }

    pub fn upper(&self) -> Option<&[f64]> {
        self.upper.as_deref()
    }

    /// Lower coefficients; those of a symmetric matrix are its upper ones.
    pub fn lower(&self) -> Option<&[f64]> {
        self.lower.as_deref().or(self.upper.as_deref())
    }

    /// Upper coefficients, allocated as zero on first use.
    pub fn upper_mut(&mut self) -> &mut [f64] {
        let n = self.n_internal_faces;
        self.upper.get_or_insert_with(|| vec![0.0; n])
    }

    /// Lower coefficients. Allocating them makes the matrix asymmetric;
    /// they start as a copy of the upper ones.
    pub fn lower_mut(&mut self) -> &mut [f64] {
        let n = self.n_internal_faces;
        if self.lower.is_none() {
            let init = self.upper.get_or_insert_with(|| vec![0.0; n]).clone();
            self.lower = Some(init);
        }
        self.lower.get_or_insert_with(|| vec![0.0; n])
    }

    pub fn source(&self) -> &[T] {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut [T] {
        &mut self.source
    }

    pub fn internal_coeffs(&self) -> &[Vec<T>] {
        &self.internal_coeffs
    }

    pub fn internal_coeffs_mut(&mut self) -> &mut [Vec<T>] {
        &mut self.internal_coeffs
    }

    pub fn boundary_coeffs(&self) -> &[Vec<T>] {
        &self.boundary_coeffs
    }

    pub fn boundary_coeffs_mut(&mut self) -> &mut [Vec<T>] {
        &mut self.boundary_coeffs
    }

    pub fn face_flux_correction(&self) -> Option<&SurfaceField<T>> {
        self.face_flux_correction.as_ref()
    }

    pub fn set_face_flux_correction(&mut self, correction: SurfaceField<T>) {
        self.face_flux_correction = Some(correction)
    }

    pub fn symmetric(&self) -> bool {
        self.upper.is_some() && self.lower.is_none()
    }

    pub fn asymmetric(&self) -> bool {
        self.lower.is_some()
    }

    pub fn diagonal(&self) -> bool {
        self.upper.is_none() && self.lower.is_none()
    }

    /// Set each diagonal to minus the sum of the off-diagonal coefficients
    /// in its column.
    ///
    pub fn neg_sum_diag(&mut self, mesh: &Mesh) {
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        let upper = self.upper.as_deref().unwrap_or(&[]);
        let lower = self.lower.as_deref().unwrap_or(upper);

        for face in 0..upper.len() {
            self.diag[owner[face]] -= lower[face];
            self.diag[neighbour[face]] -= upper[face];
        }
    }

    fn check_state(&self, operation: &'static str) -> Result<()> {
        if self.state == EquationState::Accumulating {
            Ok(())
        } else {
            Err(Error::MatrixState {
                field: self.field_name.clone(),
                state: self.state.name(),
                operation,
            })
        }
    }

    fn accumulate(&mut self, other: &FvMatrix<T>, sign: f64, operation: &'static str) -> Result<()> {
        self.check_state(operation)?;
        if other.field_name != self.field_name {
            return Err(Error::Config(format!(
                "cannot {} an equation for {} and one for {}",
                operation, self.field_name, other.field_name
            )));
        }
        self.dimensions.check(&other.dimensions, &format!("{} of equations for {}", operation, self.field_name))?;

        axpy(&mut self.diag, &other.diag, sign);
        if let Some(ou) = &other.upper {
            match &other.lower {
                None => {
                    axpy(self.upper_mut(), ou, sign);
                    if let Some(l) = self.lower.as_mut() {
                        axpy(l, ou, sign)
                    }
                }
                Some(ol) => {
                    axpy(self.lower_mut(), ol, sign);
                    axpy(self.upper_mut(), ou, sign);
                }
            }
        }
        for (s, o) in self.source.iter_mut().zip(&other.source) {
            *s += *o * sign
        }
        for (a, b) in self.internal_coeffs.iter_mut().zip(&other.internal_coeffs) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += *y * sign
            }
        }
        for (a, b) in self.boundary_coeffs.iter_mut().zip(&other.boundary_coeffs) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += *y * sign
            }
        }
        if let Some(o) = &other.face_flux_correction {
            match self.face_flux_correction.as_mut() {
                Some(s) => add_surface(s, o, sign),
                None => self.face_flux_correction = Some(o.map_values(&o.name, o.dimensions, |v| v * sign)),
            }
        }
        Ok(())
    }

    /// Add another equation for the same field, returning an error rather
    /// than panicking on a dimension or state mismatch.
    ///
    pub fn try_add(&mut self, other: &FvMatrix<T>) -> Result<()> {
        self.accumulate(other, 1.0, "add")
    }

    pub fn try_sub(&mut self, other: &FvMatrix<T>) -> Result<()> {
        self.accumulate(other, -1.0, "subtract")
    }

    /// Add an explicit term `su` to the expression; it is integrated over
    /// each cell and enters the source with the opposite sign.
    ///
    pub fn add_explicit(&mut self, mesh: &Mesh, su: &VolField<T>) -> Result<()> {
        self.check_state("add an explicit term")?;
        self.dimensions.check(&(su.dimensions() * DIM_VOLUME), &format!("explicit term {} in equation for {}", su.name(), self.field_name))?;
        for ((s, v), vol) in self.source.iter_mut().zip(su.internal()).zip(mesh.cell_volumes()) {
            *s -= *v * *vol
        }
        Ok(())
    }

    /// Entry point for physics models: add a uniform source density to the
    /// right-hand side of the equation for `field`.
    ///
    pub fn add_source(&mut self, mesh: &Mesh, field: &str, magnitude: Dimensioned<T>) -> Result<()> {
        self.check_state("add a source")?;
        if field != self.field_name {
            return Err(Error::Config(format!(
                "source for {} offered to the equation for {}",
                field, self.field_name
            )));
        }
        self.dimensions
            .check(&(magnitude.dimensions * DIM_VOLUME), &format!("source for {}", self.field_name))?;
        for (s, vol) in self.source.iter_mut().zip(mesh.cell_volumes()) {
            *s += magnitude.value * *vol
        }
        debug!("{}: added source {:?}", self.field_name, magnitude.value);
        Ok(())
    }

    /// Under-relax the equation towards the current values of `psi`. The
    /// diagonal is first made at least as large as the sum of the
    /// off-diagonal magnitudes in its row, then divided by `alpha`; the
    /// change is balanced in the source. A second call is ignored.
    ///
    pub fn relax(&mut self, mesh: &Mesh, psi: &VolField<T>, alpha: f64) -> Result<()> {
        match self.state {
            EquationState::Accumulating => {}
            EquationState::Relaxed => {
                warn!("equation for {} is already relaxed; ignoring", self.field_name);
                return Ok(());
            }
            _ => self.check_state("relax")?,
        }
        if alpha <= 0.0 {
            debug!("{}: relaxation factor {} disables relaxation", self.field_name, alpha);
            return Ok(());
        }
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        let d0 = self.diag.clone();
        let mut d = self.diag.clone();
        let mut sum_off = vec![0.0; d.len()];

        if let (Some(upper), Some(lower)) = (self.upper(), self.lower()) {
            for face in 0..upper.len() {
                sum_off[owner[face]] += upper[face].abs();
                sum_off[neighbour[face]] += lower[face].abs();
            }
        }

        let boundary_diag = |patch: usize, face: usize, coupled: bool| {
            let ic = self.internal_coeffs[patch][face];
            if coupled {
                ic.component(0)
            } else {
                (0..T::NUM_COMPONENTS).map(|c| ic.component(c).abs()).fold(0.0, f64::max)
            }
        };

        for (patch, poly) in mesh.patches().iter().enumerate() {
            let coupled = poly.coupled();
            for (i, &c) in mesh.patch_face_cells(patch).iter().enumerate() {
                d[c] += boundary_diag(patch, i, coupled);
                if coupled {
                    sum_off[c] += self.boundary_coeffs[patch][i].component(0).abs();
                }
            }
        }

        for (d, s) in d.iter_mut().zip(&sum_off) {
            *d = d.signum() * d.abs().max(*s) / alpha
        }

        for (patch, poly) in mesh.patches().iter().enumerate() {
            let coupled = poly.coupled();
            for (i, &c) in mesh.patch_face_cells(patch).iter().enumerate() {
                d[c] -= boundary_diag(patch, i, coupled);
            }
        }

        for (cell, s) in self.source.iter_mut().enumerate() {
            *s += psi.value(cell) * (d[cell] - d0[cell])
        }
        self.diag = d;
        self.state = EquationState::Relaxed;
        debug!("{}: relaxed with factor {}", self.field_name, alpha);
        Ok(())
    }

    /// Pin the level of a solution that no boundary fixes, by adding the
    /// diagonal once more in `cell` together with the matching source.
    /// Every rank must call this; `cell` is `None` on ranks that do not
    /// hold the reference cell.
    ///
    pub fn set_reference(&mut self, mesh: &Mesh, psi: &VolField<T>, cell: Option<usize>, value: T) -> Result<()> {
        if self.state == EquationState::Solved {
            self.check_state("set a reference")?;
        }
        if psi.need_reference(mesh)? {
            if let Some(c) = cell {
                self.source[c] += value * self.diag[c];
                self.diag[c] += self.diag[c];
            }
            self.state = EquationState::Constrained;
        }
        Ok(())
    }

    /// Fix `psi` to `values` in `cells`. The couplings of those cells are
    /// moved to the sources of their neighbours and their boundary
    /// coefficients dropped, so the rows reduce to `diag psi = diag value`.
    ///
    pub fn set_values(&mut self, mesh: &Mesh, psi: &mut VolField<T>, cells: &[usize], values: &[T]) -> Result<()> {
        if self.state == EquationState::Solved {
            self.check_state("set values")?;
        }
        if cells.len() != values.len() {
            return Err(Error::Config(format!(
                "{} cells but {} values for {}",
                cells.len(),
                values.len(),
                self.field_name
            )));
        }
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        let n_internal = mesh.n_internal_faces();

        for (&cell, &value) in cells.iter().zip(values) {
            psi.internal_mut()[cell] = value;
            self.source[cell] = value * self.diag[cell];

            for &face in mesh.cell_faces(cell) {
                if face < n_internal {
                    if self.diagonal() {
                        continue;
                    }
                    let upper = self.upper.as_deref().unwrap_or(&[])[face];
                    let lower = self.lower.as_deref().map_or(upper, |l| l[face]);
                    if cell == owner[face] {
                        self.source[neighbour[face]] -= value * lower;
                    } else {
                        self.source[owner[face]] -= value * upper;
                    }
                    self.upper_mut()[face] = 0.0;
                    if let Some(l) = self.lower.as_mut() {
                        l[face] = 0.0
                    }
                } else if let Some((patch, i)) = patch_face(mesh, face) {
                    self.internal_coeffs[patch][i] = T::zero();
                    self.boundary_coeffs[patch][i] = T::zero();
                }
            }
        }
        self.state = EquationState::Constrained;
        Ok(())
    }

    /// The diagonal including the component average of the boundary
    /// coefficients, per unit volume.
    ///
    pub fn a(&self, mesh: &Mesh, psi: &VolField<T>) -> Result<VolField<f64>> {
        let mut d = self.diag.clone();
        for (patch, ic) in self.internal_coeffs.iter().enumerate() {
            for (&c, v) in mesh.patch_face_cells(patch).iter().zip(ic) {
                d[c] += v.cmpt_av()
            }
        }
        for (d, vol) in d.iter_mut().zip(mesh.cell_volumes()) {
            *d /= vol
        }
        VolField::new_calculated(
            format!("A({})", self.field_name),
            mesh,
            self.dimensions / psi.dimensions() / DIM_VOLUME,
            d,
        )
    }

    /// Everything in the equation except the diagonal term of `a()`, per
    /// unit volume, so that `a psi = h` when the equation is satisfied.
    /// Far-side values of coupled patches come from the last boundary
    /// evaluation of `psi`.
    ///
    pub fn h(&self, mesh: &Mesh, psi: &VolField<T>) -> Result<VolField<T>> {
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        let mut h = self.source.clone();

        if let (Some(upper), Some(lower)) = (self.upper(), self.lower()) {
            for face in 0..upper.len() {
                h[neighbour[face]] -= psi.value(owner[face]) * lower[face];
                h[owner[face]] -= psi.value(neighbour[face]) * upper[face];
            }
        }

        for (patch, poly) in mesh.patches().iter().enumerate() {
            let pnf = psi.patch(patch).condition().patch_neighbour_field();
            for (i, &c) in mesh.patch_face_cells(patch).iter().enumerate() {
                let ic = self.internal_coeffs[patch][i];
                let bc = self.boundary_coeffs[patch][i];
                let p = psi.value(c);
                h[c] += (T::splat(ic.cmpt_av()) - ic).cmpt_mul(&p);
                match (poly.coupled(), pnf) {
                    (true, Some(pnf)) => h[c] += bc.cmpt_mul(&pnf[i]),
                    _ => h[c] += bc,
                }
            }
        }

        for (h, vol) in h.iter_mut().zip(mesh.cell_volumes()) {
            *h = *h * (1.0 / vol)
        }
        VolField::new_calculated(format!("H({})", self.field_name), mesh, self.dimensions / DIM_VOLUME, h)
    }

    /// Face fluxes implied by the implicit part of the equation, plus the
    /// explicit face correction.
    ///
    pub fn flux(&self, mesh: &Mesh, psi: &VolField<T>) -> SurfaceField<T> {
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        let mut flux = SurfaceField::from_fn(format!("flux({})", self.field_name), mesh, self.dimensions, true, |_| T::zero());

        if let (Some(upper), Some(lower)) = (self.upper(), self.lower()) {
            for face in 0..upper.len() {
                flux.internal[face] = psi.value(neighbour[face]) * upper[face] - psi.value(owner[face]) * lower[face];
            }
        }
        for (patch, poly) in mesh.patches().iter().enumerate() {
            let pnf = psi.patch(patch).condition().patch_neighbour_field();
            for (i, &c) in mesh.patch_face_cells(patch).iter().enumerate() {
                let inner = self.internal_coeffs[patch][i].cmpt_mul(&psi.value(c));
                let outer = match (poly.coupled(), pnf) {
                    (true, Some(pnf)) => self.boundary_coeffs[patch][i].cmpt_mul(&pnf[i]),
                    _ => self.boundary_coeffs[patch][i],
                };
                flux.boundary[patch][i] = inner - outer;
            }
        }
        if let Some(corr) = &self.face_flux_correction {
            add_surface(&mut flux, corr, 1.0);
        }
        flux
    }

    /// `b - A psi` per cell, with boundary coefficients included and the
    /// far side of coupled patches taken from the last boundary evaluation
    /// of `psi`.
    ///
    pub fn residual(&self, mesh: &Mesh, psi: &VolField<T>) -> Vec<T> {
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        let mut r: Vec<T> = self
            .source
            .iter()
            .zip(&self.diag)
            .zip(psi.internal())
            .map(|((b, d), p)| *b - *p * *d)
            .collect();

        if let (Some(upper), Some(lower)) = (self.upper(), self.lower()) {
            for face in 0..upper.len() {
                r[neighbour[face]] -= psi.value(owner[face]) * lower[face];
                r[owner[face]] -= psi.value(neighbour[face]) * upper[face];
            }
        }
        for (patch, poly) in mesh.patches().iter().enumerate() {
            let pnf = psi.patch(patch).condition().patch_neighbour_field();
            for (i, &c) in mesh.patch_face_cells(patch).iter().enumerate() {
                r[c] -= self.internal_coeffs[patch][i].cmpt_mul(&psi.value(c));
                match (poly.coupled(), pnf) {
                    (true, Some(pnf)) => r[c] += self.boundary_coeffs[patch][i].cmpt_mul(&pnf[i]),
                    _ => r[c] += self.boundary_coeffs[patch][i],
                }
            }
        }
        r
    }

    /// The scalar system for component `cmpt`: boundary internal
    /// coefficients folded into the diagonal, coupled patches as
    /// interfaces.
    ///
    pub fn ldu_system<'m>(&self, mesh: &'m Mesh, cmpt: usize) -> LduSystem<'m> {
        let mut diag = self.diag.clone();
        let mut interfaces = Vec::new();

        for (patch, poly) in mesh.patches().iter().enumerate() {
            for (&c, ic) in mesh.patch_face_cells(patch).iter().zip(&self.internal_coeffs[patch]) {
                diag[c] += ic.component(cmpt)
            }
            if poly.coupled() {
                interfaces.push(Interface {
                    patch,
                    coeffs: self.boundary_coeffs[patch].iter().map(|b| b.component(cmpt)).collect(),
                });
            }
        }
        LduSystem {
            mesh,
            diag,
            upper: self.upper.clone().unwrap_or_else(|| vec![0.0; self.n_internal_faces]),
            lower: self.lower.clone(),
            interfaces,
        }
    }

    /// The source for component `cmpt`, with the known boundary values of
    /// non-coupled patches added.
    ///
    pub fn component_source(&self, mesh: &Mesh, cmpt: usize) -> Vec<f64> {
        let mut source: Vec<f64> = self.source.iter().map(|s| s.component(cmpt)).collect();
        for (patch, poly) in mesh.patches().iter().enumerate() {
            if poly.coupled() {
                continue;
            }
            for (&c, bc) in mesh.patch_face_cells(patch).iter().zip(&self.boundary_coeffs[patch]) {
                source[c] += bc.component(cmpt)
            }
        }
        source
    }

    /// Solve for `psi` component by component, then re-evaluate its
    /// boundary conditions. A matrix can be solved once.
    ///
    pub fn solve(&mut self, mesh: &Mesh, psi: &mut VolField<T>, controls: &SolverControls) -> Result<SolverPerformance> {
        if self.state == EquationState::Solved {
            self.check_state("solve")?;
        }
        if psi.name() != self.field_name {
            return Err(Error::Config(format!(
                "equation for {} cannot be solved for {}",
                self.field_name,
                psi.name()
            )));
        }

        let mut performance: Option<SolverPerformance> = None;
        for cmpt in 0..T::NUM_COMPONENTS {
            let system = self.ldu_system(mesh, cmpt);
            let source = self.component_source(mesh, cmpt);
            let mut psi_c = psi.component(cmpt);
            let name = component_name::<T>(&self.field_name, cmpt);

            let perf = solver::solve(&system, &mut psi_c, &source, controls, &name)?;
            if mesh.comm().is_master() {
                perf.log();
            }
            psi.replace_component(cmpt, &psi_c);
            performance = Some(match performance {
                Some(p) => p.merge(perf),
                None => perf,
            });
        }
        psi.correct_boundary_conditions(mesh)?;
        self.state = EquationState::Solved;

        let mut performance = performance.unwrap_or_else(|| SolverPerformance {
            solver_name: "none".into(),
            field_name: String::new(),
            initial_residual: 0.0,
            final_residual: 0.0,
            iterations: 0,
            converged: true,
        });
        performance.field_name = self.field_name.clone();
        Ok(performance)
    }
}

fn axpy(y: &mut [f64], x: &[f64], a: f64) {
    for (y, x) in y.iter_mut().zip(x) {
        *y += a * x
    }
}

fn add_surface<T: FieldValue>(a: &mut SurfaceField<T>, b: &SurfaceField<T>, sign: f64) {
    for (x, y) in a.internal.iter_mut().zip(&b.internal) {
        *x += *y * sign
    }
    for (pa, pb) in a.boundary.iter_mut().zip(&b.boundary) {
        for (x, y) in pa.iter_mut().zip(pb) {
            *x += *y * sign
        }
    }
}

fn patch_face(mesh: &Mesh, face: usize) -> Option<(usize, usize)> {
    mesh.patches()
        .iter()
        .position(|p| p.range().contains(&face))
        .map(|patch| (patch, face - mesh.patch(patch).start))
}

fn component_name<T: FieldValue>(name: &str, cmpt: usize) -> String {
    const VECTOR: [&str; 3] = ["x", "y", "z"];
    const TENSOR: [&str; 9] = ["xx", "xy", "xz", "yx", "yy", "yz", "zx", "zy", "zz"];
    match T::NUM_COMPONENTS {
        3 => format!("{}{}", name, VECTOR[cmpt]),
        9 => format!("{}{}", name, TENSOR[cmpt]),
        _ => name.to_string(),
    }
}

// ============================================================================
impl<T: FieldValue> Neg for FvMatrix<T> {
    type Output = Self;

    fn neg(mut self) -> Self {
        self.diag.iter_mut().for_each(|d| *d = -*d);
        for off in [self.upper.as_mut(), self.lower.as_mut()].into_iter().flatten() {
            off.iter_mut().for_each(|x| *x = -*x)
        }
        self.source.iter_mut().for_each(|s| *s = -*s);
        for coeffs in self.internal_coeffs.iter_mut().chain(self.boundary_coeffs.iter_mut()) {
            coeffs.iter_mut().for_each(|c| *c = -*c)
        }
        if let Some(corr) = self.face_flux_correction.take() {
            self.face_flux_correction = Some(corr.map_values(&corr.name, corr.dimensions, |v| -v));
        }
        self
    }
}

impl<T: FieldValue> AddAssign for FvMatrix<T> {
    fn add_assign(&mut self, other: Self) {
        if let Err(e) = self.try_add(&other) {
            fatal(e)
        }
    }
}

impl<T: FieldValue> SubAssign for FvMatrix<T> {
    fn sub_assign(&mut self, other: Self) {
        if let Err(e) = self.try_sub(&other) {
            fatal(e)
        }
    }
}

impl<T: FieldValue> Add for FvMatrix<T> {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl<T: FieldValue> Sub for FvMatrix<T> {
    type Output = Self;

    fn sub(mut self, other: Self) -> Self {
        self -= other;
        self
    }
}
