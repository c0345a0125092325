use log::debug;

use super::boundary::{patch_internal_field, patch_slice, BoundaryCondition, BoundarySpec};
use super::value::FieldValue;
use crate::error::{Error, Result};
use crate::mesh::{Mesh, PatchMap};
use crate::message::{exchange, Tag};

fn deltas<'a>(mesh: &'a Mesh, patch: usize) -> &'a [f64] {
    patch_slice(mesh, patch, mesh.delta_coeffs())
}

fn not_implicit<T>(condition: &'static str, mesh: &Mesh, patch: usize) -> Result<Vec<T>> {
    Err(Error::BoundaryCondition {
        condition,
        patch: mesh.patch(patch).name.clone(),
        details: "has no coefficients and cannot be used in an implicit operator".into(),
    })
}

// ============================================================================
/// Patch values are whatever was last assigned to them. Used for derived
/// fields; cannot take part in an implicit operator.
///
#[derive(Clone)]
pub struct Calculated {
    patch: usize,
    name: String,
}

impl Calculated {
    pub fn new<S: Into<String>>(patch: usize, name: S) -> Self {
        Self { patch, name: name.into() }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for Calculated {
    fn type_name(&self) -> &'static str {
        "calculated"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn evaluate(&mut self, _: &Mesh, _: &[T], _: &mut [T], _: Tag) -> Result<()> {
        Ok(())
    }

    fn value_internal_coeffs(&self, mesh: &Mesh, _: &[f64]) -> Result<Vec<T>> {
        not_implicit("calculated", mesh, self.patch)
    }

    fn value_boundary_coeffs(&self, mesh: &Mesh, _: &[T], _: &[f64]) -> Result<Vec<T>> {
        not_implicit("calculated", mesh, self.patch)
    }

    fn gradient_internal_coeffs(&self, _: &[f64]) -> Result<Vec<T>> {
        Err(Error::BoundaryCondition {
            condition: "calculated",
            patch: self.name.clone(),
            details: "has no gradient coefficients".into(),
        })
    }

    fn gradient_boundary_coeffs(&self, _: &[T], _: &[f64]) -> Result<Vec<T>> {
        Err(Error::BoundaryCondition {
            condition: "calculated",
            patch: self.name.clone(),
            details: "has no gradient coefficients".into(),
        })
    }

    fn sn_grad(&self, mesh: &Mesh, internal: &[T], values: &[T]) -> Vec<T> {
        let pif = patch_internal_field(mesh, self.patch, internal);
        values
            .iter()
            .zip(pif)
            .zip(deltas(mesh, self.patch))
            .map(|((v, i), dc)| (*v - i) * *dc)
            .collect()
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::Calculated
    }

    fn clone_box(&self) -> Box<dyn BoundaryCondition<T>> {
        Box::new(self.clone())
    }
}

// ============================================================================
/// Dirichlet condition: the patch values are prescribed.
///
#[derive(Clone)]
pub struct FixedValue {
    patch: usize,
}

impl FixedValue {
    pub fn new(patch: usize) -> Self {
        Self { patch }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for FixedValue {
    fn type_name(&self) -> &'static str {
        "fixedValue"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn fixes_value(&self) -> bool {
        true
    }

    fn evaluate(&mut self, _: &Mesh, _: &[T], _: &mut [T], _: Tag) -> Result<()> {
        Ok(())
    }

    fn value_internal_coeffs(&self, _: &Mesh, weights: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::zero(); weights.len()])
    }

    fn value_boundary_coeffs(&self, _: &Mesh, values: &[T], _: &[f64]) -> Result<Vec<T>> {
        Ok(values.to_vec())
    }

    fn gradient_internal_coeffs(&self, delta: &[f64]) -> Result<Vec<T>> {
        Ok(delta.iter().map(|dc| T::splat(-dc)).collect())
    }

    fn gradient_boundary_coeffs(&self, values: &[T], delta: &[f64]) -> Result<Vec<T>> {
        Ok(values.iter().zip(delta).map(|(v, dc)| *v * *dc).collect())
    }

    fn sn_grad(&self, mesh: &Mesh, internal: &[T], values: &[T]) -> Vec<T> {
        let pif = patch_internal_field(mesh, self.patch, internal);
        values
            .iter()
            .zip(pif)
            .zip(deltas(mesh, self.patch))
            .map(|((v, i), dc)| (*v - i) * *dc)
            .collect()
    }

    /// New faces take the mean of the values that survived the change.
    fn auto_map(&mut self, map: &PatchMap, values: &[T], patch_internal: &[T]) -> Vec<T> {
        match map.mapped_mean(values) {
            Some(mean) => map.apply(values, mean),
            None => patch_internal.to_vec(),
        }
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::FixedValue
    }

    fn clone_box(&self) -> Box<dyn BoundaryCondition<T>> {
        Box::new(self.clone())
    }
}

// ============================================================================
/// The patch values equal the adjacent cell values.
///
#[derive(Clone)]
pub struct ZeroGradient {
    patch: usize,
}

impl ZeroGradient {
    pub fn new(patch: usize) -> Self {
        Self { patch }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for ZeroGradient {
    fn type_name(&self) -> &'static str {
        "zeroGradient"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn evaluate(&mut self, mesh: &Mesh, internal: &[T], values: &mut [T], _: Tag) -> Result<()> {
        for (v, &c) in values.iter_mut().zip(mesh.patch_face_cells(self.patch)) {
            *v = internal[c]
        }
        Ok(())
    }

    fn value_internal_coeffs(&self, _: &Mesh, weights: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::splat(1.0); weights.len()])
    }

    fn value_boundary_coeffs(&self, _: &Mesh, values: &[T], _: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::zero(); values.len()])
    }

    fn gradient_internal_coeffs(&self, delta: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::zero(); delta.len()])
    }

    fn gradient_boundary_coeffs(&self, values: &[T], _: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::zero(); values.len()])
    }

    fn sn_grad(&self, _: &Mesh, _: &[T], values: &[T]) -> Vec<T> {
        vec![T::zero(); values.len()]
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::ZeroGradient
    }

    fn clone_box(&self) -> Box<dyn BoundaryCondition<T>> {
        Box::new(self.clone())
    }
}

// ============================================================================
/// Neumann condition: the normal gradient is prescribed per face.
///
#[derive(Clone)]
pub struct FixedGradient<T> {
    patch: usize,
    gradient: Vec<T>,
}

impl<T: FieldValue> FixedGradient<T> {
    pub fn new(patch: usize, gradient: Vec<T>) -> Self {
        Self { patch, gradient }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for FixedGradient<T> {
    fn type_name(&self) -> &'static str {
        "fixedGradient"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn evaluate(&mut self, mesh: &Mesh, internal: &[T], values: &mut [T], _: Tag) -> Result<()> {
        let dc = deltas(mesh, self.patch);
        for (i, &c) in mesh.patch_face_cells(self.patch).iter().enumerate() {
            values[i] = internal[c] + self.gradient[i] * (1.0 / dc[i])
        }
        Ok(())
    }

    fn value_internal_coeffs(&self, _: &Mesh, weights: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::splat(1.0); weights.len()])
    }

    fn value_boundary_coeffs(&self, mesh: &Mesh, _: &[T], _: &[f64]) -> Result<Vec<T>> {
        let dc = deltas(mesh, self.patch);
        Ok(self.gradient.iter().zip(dc).map(|(g, dc)| *g * (1.0 / dc)).collect())
    }

    fn gradient_internal_coeffs(&self, delta: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::zero(); delta.len()])
    }

    fn gradient_boundary_coeffs(&self, _: &[T], _: &[f64]) -> Result<Vec<T>> {
        Ok(self.gradient.clone())
    }

    fn sn_grad(&self, _: &Mesh, _: &[T], _: &[T]) -> Vec<T> {
        self.gradient.clone()
    }

    fn auto_map(&mut self, map: &PatchMap, values: &[T], patch_internal: &[T]) -> Vec<T> {
        self.gradient = map.apply(&self.gradient, T::zero());
        map.addressing
            .iter()
            .enumerate()
            .map(|(i, a)| a.and_then(|j| values.get(j).copied()).unwrap_or(patch_internal[i]))
            .collect()
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::FixedGradient {
            gradient: self.gradient.clone(),
        }
    }

    fn clone_box(&self) -> Box<dyn BoundaryCondition<T>> {
        Box::new(self.clone())
    }
}

// ============================================================================
/// Weighted blend of a fixed value and a fixed gradient: a value fraction
/// of 1 gives `refValue`, 0 gives `refGrad`.
///
#[derive(Clone)]
pub struct Mixed<T> {
    patch: usize,
    ref_value: Vec<T>,
    ref_grad: Vec<T>,
    value_fraction: Vec<f64>,
}

impl<T: FieldValue> Mixed<T> {
    pub fn new(patch: usize, ref_value: Vec<T>, ref_grad: Vec<T>, value_fraction: Vec<f64>) -> Self {
        Self {
            patch,
            ref_value,
            ref_grad,
            value_fraction,
        }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for Mixed<T> {
    fn type_name(&self) -> &'static str {
        "mixed"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn fixes_value(&self) -> bool {
        true
    }

    fn evaluate(&mut self, mesh: &Mesh, internal: &[T], values: &mut [T], _: Tag) -> Result<()> {
        let dc = deltas(mesh, self.patch);
        for (i, &c) in mesh.patch_face_cells(self.patch).iter().enumerate() {
            let f = self.value_fraction[i];
            values[i] = self.ref_value[i] * f + (internal[c] + self.ref_grad[i] * (1.0 / dc[i])) * (1.0 - f)
        }
        Ok(())
    }

    fn value_internal_coeffs(&self, _: &Mesh, _: &[f64]) -> Result<Vec<T>> {
        Ok(self.value_fraction.iter().map(|f| T::splat(1.0 - f)).collect())
    }

    fn value_boundary_coeffs(&self, mesh: &Mesh, _: &[T], _: &[f64]) -> Result<Vec<T>> {
        let dc = deltas(mesh, self.patch);
        Ok((0..self.value_fraction.len())
            .map(|i| {
                let f = self.value_fraction[i];
                self.ref_value[i] * f + self.ref_grad[i] * ((1.0 - f) / dc[i])
            })
            .collect())
    }

    fn gradient_internal_coeffs(&self, delta: &[f64]) -> Result<Vec<T>> {
        Ok(self.value_fraction.iter().zip(delta).map(|(f, dc)| T::splat(-f * dc)).collect())
    }

    fn gradient_boundary_coeffs(&self, _: &[T], delta: &[f64]) -> Result<Vec<T>> {
        Ok((0..self.value_fraction.len())
            .map(|i| {
                let f = self.value_fraction[i];
                self.ref_value[i] * (f * delta[i]) + self.ref_grad[i] * (1.0 - f)
            })
            .collect())
    }

    fn sn_grad(&self, mesh: &Mesh, internal: &[T], _: &[T]) -> Vec<T> {
        let dc = deltas(mesh, self.patch);
        let pif = patch_internal_field(mesh, self.patch, internal);
        (0..self.value_fraction.len())
            .map(|i| {
                let f = self.value_fraction[i];
                (self.ref_value[i] - pif[i]) * (f * dc[i]) + self.ref_grad[i] * (1.0 - f)
            })
            .collect()
    }

    fn auto_map(&mut self, map: &PatchMap, values: &[T], patch_internal: &[T]) -> Vec<T> {
        let mean_value = map.mapped_mean(&self.ref_value).unwrap_or_default();
        let mean_fraction = map.mapped_mean(&self.value_fraction).unwrap_or(0.0);
        self.ref_value = map.apply(&self.ref_value, mean_value);
        self.ref_grad = map.apply(&self.ref_grad, T::zero());
        self.value_fraction = map.apply(&self.value_fraction, mean_fraction);
        map.addressing
            .iter()
            .enumerate()
            .map(|(i, a)| a.and_then(|j| values.get(j).copied()).unwrap_or(patch_internal[i]))
            .collect()
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::Mixed {
            ref_value: self.ref_value.clone(),
            ref_grad: self.ref_grad.clone(),
            value_fraction: self.value_fraction.clone(),
        }
    }

    fn clone_box(&self) -> Box<dyn BoundaryCondition<T>> {
        Box::new(self.clone())
    }
}

// ============================================================================
/// A fixed value sampled from the cells next to another patch of the same
/// mesh, face by face. Both patches must have the same number of faces.
///
#[derive(Clone)]
pub struct Mapped<T> {
    patch: usize,
    source: usize,
    source_name: String,
    sampled: Option<Vec<T>>,
}

impl<T: FieldValue> Mapped<T> {
    pub fn new(patch: usize, source: usize, source_name: String) -> Self {
        Self {
            patch,
            source,
            source_name,
            sampled: None,
        }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for Mapped<T> {
    fn type_name(&self) -> &'static str {
        "mapped"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn fixes_value(&self) -> bool {
        true
    }

    fn update_coeffs(&mut self, mesh: &Mesh, internal: &[T]) -> Result<()> {
        let sampled = patch_internal_field(mesh, self.source, internal);
        if sampled.len() != mesh.patch(self.patch).size {
            return Err(Error::BoundaryCondition {
                condition: "mapped",
                patch: mesh.patch(self.patch).name.clone(),
                details: format!("source patch {} no longer matches in size", self.source_name),
            });
        }
        self.sampled = Some(sampled);
        Ok(())
    }

    fn evaluate(&mut self, _: &Mesh, _: &[T], values: &mut [T], _: Tag) -> Result<()> {
        if let Some(sampled) = &self.sampled {
            values.copy_from_slice(sampled)
        }
        Ok(())
    }

    fn value_internal_coeffs(&self, _: &Mesh, weights: &[f64]) -> Result<Vec<T>> {
        Ok(vec![T::zero(); weights.len()])
    }

    fn value_boundary_coeffs(&self, _: &Mesh, values: &[T], _: &[f64]) -> Result<Vec<T>> {
        Ok(values.to_vec())
    }

    fn gradient_internal_coeffs(&self, delta: &[f64]) -> Result<Vec<T>> {
        Ok(delta.iter().map(|dc| T::splat(-dc)).collect())
    }

    fn gradient_boundary_coeffs(&self, values: &[T], delta: &[f64]) -> Result<Vec<T>> {
        Ok(values.iter().zip(delta).map(|(v, dc)| *v * *dc).collect())
    }

    fn sn_grad(&self, mesh: &Mesh, internal: &[T], values: &[T]) -> Vec<T> {
        let pif = patch_internal_field(mesh, self.patch, internal);
        values
            .iter()
            .zip(pif)
            .zip(deltas(mesh, self.patch))
            .map(|((v, i), dc)| (*v - i) * *dc)
            .collect()
    }

    fn auto_map(&mut self, map: &PatchMap, values: &[T], patch_internal: &[T]) -> Vec<T> {
        self.sampled = None;
        map.addressing
            .iter()
            .enumerate()
            .map(|(i, a)| a.and_then(|j| values.get(j).copied()).unwrap_or(patch_internal[i]))
            .collect()
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::Mapped {
            source_patch: self.source_name.clone(),
        }
    }

    fn clone_box(&self) -> Box<dyn BoundaryCondition<T>> {
        Box::new(self.clone())
    }
}

// ============================================================================
/// Coupled conditions share their coefficients: the boundary value is the
/// weighted interpolate between the cells on either side of the face.
///
fn coupled_values<T: FieldValue>(mesh: &Mesh, patch: usize, internal: &[T], neighbour: &[T], values: &mut [T]) {
    let w = patch_slice(mesh, patch, mesh.weights());
    for (i, &c) in mesh.patch_face_cells(patch).iter().enumerate() {
        values[i] = internal[c] * w[i] + neighbour[i] * (1.0 - w[i])
    }
}

fn coupled_sn_grad<T: FieldValue>(mesh: &Mesh, patch: usize, internal: &[T], neighbour: &[T]) -> Vec<T> {
    let dc = deltas(mesh, patch);
    mesh.patch_face_cells(patch)
        .iter()
        .enumerate()
        .map(|(i, &c)| (neighbour[i] - internal[c]) * dc[i])
        .collect()
}

macro_rules! coupled_coefficients {
    () => {
        fn coupled(&self) -> bool {
            true
        }

        fn value_internal_coeffs(&self, _: &Mesh, weights: &[f64]) -> Result<Vec<T>> {
            Ok(weights.iter().map(|w| T::splat(*w)).collect())
        }

        fn value_boundary_coeffs(&self, _: &Mesh, _: &[T], weights: &[f64]) -> Result<Vec<T>> {
            Ok(weights.iter().map(|w| T::splat(1.0 - w)).collect())
        }

        fn gradient_internal_coeffs(&self, delta: &[f64]) -> Result<Vec<T>> {
            Ok(delta.iter().map(|dc| T::splat(-dc)).collect())
        }

        fn gradient_boundary_coeffs(&self, _: &[T], delta: &[f64]) -> Result<Vec<T>> {
            Ok(delta.iter().map(|dc| T::splat(*dc)).collect())
        }

        fn sn_grad(&self, mesh: &Mesh, internal: &[T], _: &[T]) -> Vec<T> {
            coupled_sn_grad(mesh, self.patch, internal, &self.neighbour)
        }

        fn patch_neighbour_field(&self) -> Option<&[T]> {
            Some(&self.neighbour)
        }

        fn auto_map(&mut self, map: &PatchMap, values: &[T], patch_internal: &[T]) -> Vec<T> {
            self.neighbour = map.apply(&self.neighbour, T::zero());
            map.addressing
                .iter()
                .enumerate()
                .map(|(i, a)| a.and_then(|j| values.get(j).copied()).unwrap_or(patch_internal[i]))
                .collect()
        }

        fn clone_box(&self) -> Box<dyn BoundaryCondition<T>> {
            Box::new(self.clone())
        }
    };
}

// ============================================================================
/// Periodic coupling to the paired patch of the same mesh.
///
#[derive(Clone)]
pub struct Cyclic<T> {
    patch: usize,
    neighbour_patch: usize,
    neighbour: Vec<T>,
}

impl<T: FieldValue> Cyclic<T> {
    pub fn new(patch: usize, neighbour_patch: usize, size: usize) -> Self {
        Self {
            patch,
            neighbour_patch,
            neighbour: vec![T::zero(); size],
        }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for Cyclic<T> {
    fn type_name(&self) -> &'static str {
        "cyclic"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn initiate_evaluate(&mut self, mesh: &Mesh, internal: &[T], _: Tag) -> Result<()> {
        self.neighbour = patch_internal_field(mesh, self.neighbour_patch, internal);
        Ok(())
    }

    fn evaluate(&mut self, mesh: &Mesh, internal: &[T], values: &mut [T], _: Tag) -> Result<()> {
        coupled_values(mesh, self.patch, internal, &self.neighbour, values);
        Ok(())
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::Cyclic
    }

    coupled_coefficients!();
}

// ============================================================================
/// Coupling to the matching patch on a neighbouring rank. Sends this side's
/// cell values when evaluation is initiated and blocks for the other side's
/// when it completes.
///
#[derive(Clone)]
pub struct Processor<T> {
    patch: usize,
    neighb_proc: usize,
    neighbour: Vec<T>,
}

impl<T: FieldValue> Processor<T> {
    pub fn new(patch: usize, neighb_proc: usize, size: usize) -> Self {
        Self {
            patch,
            neighb_proc,
            neighbour: vec![T::zero(); size],
        }
    }
}

impl<T: FieldValue> BoundaryCondition<T> for Processor<T> {
    fn type_name(&self) -> &'static str {
        "processor"
    }

    fn patch(&self) -> usize {
        self.patch
    }

    fn initiate_evaluate(&mut self, mesh: &Mesh, internal: &[T], tag: Tag) -> Result<()> {
        let send = patch_internal_field(mesh, self.patch, internal);
        debug!(
            "[{}] {} -> {} tag {} ({} faces)",
            mesh.comm().rank(),
            mesh.patch(self.patch).name,
            self.neighb_proc,
            tag,
            send.len()
        );
        exchange::send_values(mesh.comm(), self.neighb_proc, tag, &send)
    }

    fn evaluate(&mut self, mesh: &Mesh, internal: &[T], values: &mut [T], tag: Tag) -> Result<()> {
        self.neighbour = exchange::recv_values(mesh.comm(), self.neighb_proc, tag, values.len())?;
        coupled_values(mesh, self.patch, internal, &self.neighbour, values);
        Ok(())
    }

    fn spec(&self) -> BoundarySpec<T> {
        BoundarySpec::Processor
    }

    coupled_coefficients!();
}
