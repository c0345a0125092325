use core::fmt::Debug;
use core::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::num_vec::{Tensor, Vector, Vector3};

/// The algebra required of values stored in fields: scalars, vectors and
/// tensors. Matrix coefficients are scalar per face or cell, but source
/// terms and boundary coefficients carry one value per component, and the
/// linear solve is segregated by component.
///
pub trait FieldValue:
    Copy
    + Default
    + PartialEq
    + Debug
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f64, Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + 'static
{
    const NUM_COMPONENTS: usize;

    /// Short type name used in diagnostics and stored field headers.
    const TYPE_NAME: &'static str;

    fn splat(x: f64) -> Self;

    fn component(&self, d: usize) -> f64;

    fn set_component(&mut self, d: usize, x: f64);

    fn cmpt_mul(&self, other: &Self) -> Self {
        let mut result = *self;
        for d in 0..Self::NUM_COMPONENTS {
            result.set_component(d, self.component(d) * other.component(d))
        }
        result
    }

    /// Inner product over all components.
    fn inner(&self, other: &Self) -> f64 {
        (0..Self::NUM_COMPONENTS)
            .map(|d| self.component(d) * other.component(d))
            .sum()
    }

    fn mag(&self) -> f64 {
        self.inner(self).sqrt()
    }

    /// Arithmetic mean of the components.
    fn cmpt_av(&self) -> f64 {
        (0..Self::NUM_COMPONENTS).map(|d| self.component(d)).sum::<f64>() / Self::NUM_COMPONENTS as f64
    }

    fn zero() -> Self {
        Self::default()
    }
}

/// Values whose Gauss gradient is itself a field value.
///
pub trait Gradable: FieldValue {
    type Grad: FieldValue;

    /// Contribution `S ⊗ φ` of one face to the Gauss gradient sum.
    fn face_product(area: &Vector3, value: &Self) -> Self::Grad;

    /// Directional derivative `d · ∇φ`.
    fn directional(d: &Vector3, grad: &Self::Grad) -> Self;
}

impl FieldValue for f64 {
    const NUM_COMPONENTS: usize = 1;
    const TYPE_NAME: &'static str = "scalar";

    fn splat(x: f64) -> Self {
        x
    }

    fn component(&self, _: usize) -> f64 {
        *self
    }

    fn set_component(&mut self, _: usize, x: f64) {
        *self = x
    }
}

impl<const DIM: usize> FieldValue for Vector<f64, DIM> {
    const NUM_COMPONENTS: usize = DIM;
    const TYPE_NAME: &'static str = if DIM == 3 { "vector" } else { "tensor" };

    fn splat(x: f64) -> Self {
        Vector::splat(x)
    }

    fn component(&self, d: usize) -> f64 {
        self[d]
    }

    fn set_component(&mut self, d: usize, x: f64) {
        self[d] = x
    }
}

impl Gradable for f64 {
    type Grad = Vector3;

    fn face_product(area: &Vector3, value: &Self) -> Vector3 {
        *area * *value
    }

    fn directional(d: &Vector3, grad: &Vector3) -> Self {
        d.dot(grad)
    }
}

impl Gradable for Vector3 {
    type Grad = Tensor;

    fn face_product(area: &Vector3, value: &Self) -> Tensor {
        area.outer(value)
    }

    fn directional(d: &Vector3, grad: &Tensor) -> Self {
        d.dot_tensor(grad)
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn components_round_trip() {
        let mut v = Vector3::zero();
        v.set_component(1, 2.0);
        assert_eq!(v.component(1), 2.0);
        assert_eq!(<Vector3 as FieldValue>::NUM_COMPONENTS, 3);
        assert_eq!(<Tensor as FieldValue>::NUM_COMPONENTS, 9);
        assert_eq!(<Tensor as FieldValue>::TYPE_NAME, "tensor");
    }

    #[test]
    fn scalar_gradient_products() {
        let s = Vector3::xyz(0.0, 2.0, 0.0);
        assert_eq!(f64::face_product(&s, &3.0), Vector3::xyz(0.0, 6.0, 0.0));
        assert_eq!(f64::directional(&s, &Vector3::xyz(1.0, 1.0, 1.0)), 2.0);
    }
}
