use super::surface::SurfaceField;
use super::value::FieldValue;
use super::VolField;
use crate::dimension::{DimensionSet, Dimensioned};
use crate::error::Result;
use crate::interpolation;
use crate::mesh::Mesh;

/// A per-cell coefficient of an operator: either one dimensioned constant
/// or the values of a volume field.
///
pub enum Coefficient<'a, T: FieldValue> {
    Uniform(Dimensioned<T>),
    Field(&'a VolField<T>),
    Level { values: &'a [T], dimensions: DimensionSet },
}

impl<'a, T: FieldValue> Coefficient<'a, T> {
    pub fn dimensions(&self) -> DimensionSet {
        match self {
            Coefficient::Uniform(d) => d.dimensions,
            Coefficient::Field(f) => f.dimensions(),
            Coefficient::Level { dimensions, .. } => *dimensions,
        }
    }

    pub fn value(&self, cell: usize) -> T {
        match self {
            Coefficient::Uniform(d) => d.value,
            Coefficient::Field(f) => f.value(cell),
            Coefficient::Level { values, .. } => values[cell],
        }
    }

    /// The coefficient `n` time levels ago. Constants do not change.
    ///
    pub fn old_time(&self, n: usize) -> Result<Coefficient<'a, T>> {
        Ok(match *self {
            Coefficient::Uniform(ref d) => Coefficient::Uniform(Dimensioned::new(d.value, d.dimensions)),
            Coefficient::Field(f) => Coefficient::Level {
                values: &f.old_time(n)?.internal,
                dimensions: f.dimensions(),
            },
            Coefficient::Level { values, dimensions } => Coefficient::Level { values, dimensions },
        })
    }
}

impl<'a, T: FieldValue> From<Dimensioned<T>> for Coefficient<'a, T> {
    fn from(d: Dimensioned<T>) -> Self {
        Coefficient::Uniform(d)
    }
}

impl<'a, T: FieldValue> From<&'a VolField<T>> for Coefficient<'a, T> {
    fn from(f: &'a VolField<T>) -> Self {
        Coefficient::Field(f)
    }
}

/// The diffusivity of a Laplacian: a constant, a cell field interpolated
/// linearly to the faces, or a face field.
///
pub enum Diffusivity<'a> {
    Uniform(Dimensioned<f64>),
    Cell(&'a VolField<f64>),
    Face(&'a SurfaceField<f64>),
}

impl<'a> Diffusivity<'a> {
    pub fn dimensions(&self) -> DimensionSet {
        match self {
            Diffusivity::Uniform(d) => d.dimensions,
            Diffusivity::Cell(f) => f.dimensions(),
            Diffusivity::Face(f) => f.dimensions,
        }
    }

    /// Face values of the diffusivity.
    ///
    pub fn on_faces(&self, mesh: &Mesh) -> Result<SurfaceField<f64>> {
        Ok(match self {
            Diffusivity::Uniform(d) => SurfaceField::uniform("gamma", mesh, d.dimensions, d.value),
            Diffusivity::Cell(f) => interpolation::linear(mesh, f),
            Diffusivity::Face(f) => {
                f.check(mesh)?;
                (*f).clone()
            }
        })
    }
}

impl<'a> From<Dimensioned<f64>> for Diffusivity<'a> {
    fn from(d: Dimensioned<f64>) -> Self {
        Diffusivity::Uniform(d)
    }
}

impl<'a> From<&'a VolField<f64>> for Diffusivity<'a> {
    fn from(f: &'a VolField<f64>) -> Self {
        Diffusivity::Cell(f)
    }
}

impl<'a> From<&'a SurfaceField<f64>> for Diffusivity<'a> {
    fn from(f: &'a SurfaceField<f64>) -> Self {
        Diffusivity::Face(f)
    }
}
