use core::fmt;
use core::ops::{Div, Mul};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const NAMES: [&str; 7] = ["kg", "m", "s", "K", "mol", "A", "cd"];

/// Exponents of the seven SI base units: mass, length, time, temperature,
/// moles, current, luminous intensity. Every field and every equation carries
/// one of these, and they are compared whenever two quantities are combined.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionSet([f64; 7]);

impl DimensionSet {
    pub const fn new(mass: f64, length: f64, time: f64, temperature: f64) -> Self {
        Self([mass, length, time, temperature, 0.0, 0.0, 0.0])
    }

    pub const fn from_exponents(exponents: [f64; 7]) -> Self {
        Self(exponents)
    }

    pub fn exponents(&self) -> &[f64; 7] {
        &self.0
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|e| *e == 0.0)
    }

    pub fn pow(&self, n: f64) -> Self {
        let mut e = self.0;
        e.iter_mut().for_each(|x| *x *= n);
        Self(e)
    }

    /// Return an error naming `operation` if the two sets differ.
    ///
    pub fn check(&self, other: &Self, operation: &str) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                operation: operation.to_string(),
                lhs: self.to_string(),
                rhs: other.to_string(),
            })
        }
    }
}

impl Default for DimensionSet {
    fn default() -> Self {
        DIMLESS
    }
}

impl Mul for DimensionSet {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        let mut e = self.0;
        for (a, b) in e.iter_mut().zip(other.0.iter()) {
            *a += b
        }
        Self(e)
    }
}

impl Div for DimensionSet {
    type Output = Self;

    fn div(self, other: Self) -> Self {
        self * other.pow(-1.0)
    }
}

impl fmt::Display for DimensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "[-]");
        }
        let terms: Vec<_> = self
            .0
            .iter()
            .zip(NAMES.iter())
            .filter(|(e, _)| **e != 0.0)
            .map(|(e, n)| if *e == 1.0 { n.to_string() } else { format!("{}^{}", n, e) })
            .collect();
        write!(f, "[{}]", terms.join(" "))
    }
}

pub const DIMLESS: DimensionSet = DimensionSet::new(0.0, 0.0, 0.0, 0.0);
pub const DIM_MASS: DimensionSet = DimensionSet::new(1.0, 0.0, 0.0, 0.0);
pub const DIM_LENGTH: DimensionSet = DimensionSet::new(0.0, 1.0, 0.0, 0.0);
pub const DIM_TIME: DimensionSet = DimensionSet::new(0.0, 0.0, 1.0, 0.0);
pub const DIM_TEMPERATURE: DimensionSet = DimensionSet::new(0.0, 0.0, 0.0, 1.0);
pub const DIM_AREA: DimensionSet = DimensionSet::new(0.0, 2.0, 0.0, 0.0);
pub const DIM_VOLUME: DimensionSet = DimensionSet::new(0.0, 3.0, 0.0, 0.0);
pub const DIM_VELOCITY: DimensionSet = DimensionSet::new(0.0, 1.0, -1.0, 0.0);
pub const DIM_DENSITY: DimensionSet = DimensionSet::new(1.0, -3.0, 0.0, 0.0);
pub const DIM_KINEMATIC_VISCOSITY: DimensionSet = DimensionSet::new(0.0, 2.0, -1.0, 0.0);

/// A scalar magnitude with physical dimensions, as supplied by a physics
/// model through `FvMatrix::add_source`.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dimensioned<T> {
    pub value: T,
    pub dimensions: DimensionSet,
}

impl<T> Dimensioned<T> {
    pub fn new(value: T, dimensions: DimensionSet) -> Self {
        Self { value, dimensions }
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn products_add_exponents() {
        let d = DIM_LENGTH * DIM_LENGTH * DIM_LENGTH;
        assert_eq!(d, DIM_VOLUME);
        assert_eq!(DIM_LENGTH / DIM_TIME, DIM_VELOCITY);
        assert!((DIM_VOLUME / DIM_VOLUME).is_dimensionless());
    }

    #[test]
    fn mismatch_is_reported_with_both_sides() {
        let err = DIM_VOLUME.check(&DIM_AREA, "a + b").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("m^3"));
        assert!(text.contains("m^2"));
    }
}
