use serde::{Deserialize, Serialize};

use super::conditions::{
    Calculated, Cyclic, FixedGradient, FixedValue, Mapped, Mixed, Processor, ZeroGradient,
};
use super::value::FieldValue;
use crate::error::{Error, Result};
use crate::mesh::{Mesh, PatchKind, PatchMap, PolyPatch};
use crate::message::Tag;

/// The behaviour attached to one patch of a volume field. A condition owns
/// whatever per-face data it needs (a gradient, a reference value, the last
/// buffer received from a neighbour); the patch values themselves live in
/// the owning `PatchField` and are passed in where they are needed.
///
/// Evaluation is two-phase. `initiate_evaluate` is called on every patch of
/// a field before `evaluate` is called on any of them, so processor patches
/// can post their sends first and block on receives second.
///
/// The coefficient queries describe the boundary value and the boundary
/// normal gradient as affine functions of the adjacent cell value,
/// `value = vic * psi_P + vbc` and `snGrad = gic * psi_P + gbc`, which is
/// what the implicit operators need to assemble boundary contributions.
///
pub trait BoundaryCondition<T: FieldValue>: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Index of the patch this condition is attached to.
    fn patch(&self) -> usize;

    /// Whether the far side of the patch is a cell (locally or on another
    /// rank) rather than a prescribed value.
    fn coupled(&self) -> bool {
        false
    }

    /// Whether the condition pins the level of the solution, so that a
    /// matrix built on this field does not need a reference value.
    fn fixes_value(&self) -> bool {
        false
    }

    /// Recompute any coefficients that depend on the current internal field.
    fn update_coeffs(&mut self, _mesh: &Mesh, _internal: &[T]) -> Result<()> {
        Ok(())
    }

    /// Phase one of evaluation; must not block.
    fn initiate_evaluate(&mut self, _mesh: &Mesh, _internal: &[T], _tag: Tag) -> Result<()> {
        Ok(())
    }

    /// Phase two of evaluation: write the patch values. May block on data
    /// sent by the neighbour during its `initiate_evaluate`.
    fn evaluate(&mut self, mesh: &Mesh, internal: &[T], values: &mut [T], tag: Tag) -> Result<()>;

    fn value_internal_coeffs(&self, mesh: &Mesh, weights: &[f64]) -> Result<Vec<T>>;

    fn value_boundary_coeffs(&self, mesh: &Mesh, values: &[T], weights: &[f64]) -> Result<Vec<T>>;

    fn gradient_internal_coeffs(&self, delta: &[f64]) -> Result<Vec<T>>;

    fn gradient_boundary_coeffs(&self, values: &[T], delta: &[f64]) -> Result<Vec<T>>;

    /// Normal gradient of the field at the patch faces.
    fn sn_grad(&self, mesh: &Mesh, internal: &[T], values: &[T]) -> Vec<T>;

    /// For coupled conditions, the cell values on the far side of each face
    /// as of the last evaluation.
    fn patch_neighbour_field(&self) -> Option<&[T]> {
        None
    }

    /// Remap the condition's per-face data through a topology change, and
    /// return the new patch values. Faces with no old counterpart take the
    /// value of the cell next to them unless the condition decides
    /// otherwise.
    fn auto_map(&mut self, map: &PatchMap, values: &[T], patch_internal: &[T]) -> Vec<T> {
        map.addressing
            .iter()
            .enumerate()
            .map(|(i, a)| match a.and_then(|j| values.get(j)) {
                Some(v) => *v,
                None => patch_internal[i],
            })
            .collect()
    }

    /// The serialisable description of this condition.
    fn spec(&self) -> BoundarySpec<T>;

    fn clone_box(&self) -> Box<dyn BoundaryCondition<T>>;
}

impl<T: FieldValue> Clone for Box<dyn BoundaryCondition<T>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// The on-disk form of a boundary condition. The patch values are stored
/// alongside it, so conditions whose only data is the value itself
/// (`FixedValue`, `Calculated`) carry nothing here.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BoundarySpec<T> {
    Calculated,
    FixedValue,
    ZeroGradient,
    FixedGradient {
        gradient: Vec<T>,
    },
    Mixed {
        ref_value: Vec<T>,
        ref_grad: Vec<T>,
        value_fraction: Vec<f64>,
    },
    Mapped {
        source_patch: String,
    },
    Cyclic,
    Processor,
}

impl<T: FieldValue> BoundarySpec<T> {
    pub fn type_name(&self) -> &'static str {
        match self {
            BoundarySpec::Calculated => "calculated",
            BoundarySpec::FixedValue => "fixedValue",
            BoundarySpec::ZeroGradient => "zeroGradient",
            BoundarySpec::FixedGradient { .. } => "fixedGradient",
            BoundarySpec::Mixed { .. } => "mixed",
            BoundarySpec::Mapped { .. } => "mapped",
            BoundarySpec::Cyclic => "cyclic",
            BoundarySpec::Processor => "processor",
        }
    }

    /// A fixed gradient that is the same on every face of a patch.
    pub fn uniform_gradient(gradient: T, size: usize) -> Self {
        BoundarySpec::FixedGradient {
            gradient: vec![gradient; size],
        }
    }

    /// Build one spec per patch. Coupled patches always get their
    /// constraint condition; `f` chooses for the rest.
    ///
    pub fn for_patches<F>(patches: &[PolyPatch], f: F) -> Vec<Self>
    where
        F: Fn(&PolyPatch) -> Self,
    {
        patches
            .iter()
            .map(|patch| match patch.kind {
                PatchKind::Cyclic { .. } => BoundarySpec::Cyclic,
                PatchKind::Processor { .. } => BoundarySpec::Processor,
                _ => f(patch),
            })
            .collect()
    }

    /// Instantiate the condition for patch `patch` of `mesh`, checking
    /// that per-face data has the patch's size and that constraint
    /// conditions sit on patches of the matching kind.
    ///
    pub fn into_condition(self, mesh: &Mesh, patch: usize) -> Result<Box<dyn BoundaryCondition<T>>> {
        let poly = mesh.patch(patch);
        let size = poly.size;
        let wrong = |details: String| Error::BoundaryCondition {
            condition: self.type_name(),
            patch: poly.name.clone(),
            details,
        };

        match (&poly.kind, &self) {
            (PatchKind::Cyclic { .. }, BoundarySpec::Cyclic) | (PatchKind::Processor { .. }, BoundarySpec::Processor) => {}
            (PatchKind::Cyclic { .. }, _) | (PatchKind::Processor { .. }, _) => {
                return Err(wrong(format!("a {} patch needs its constraint condition", poly.type_name())))
            }
            (_, BoundarySpec::Cyclic) | (_, BoundarySpec::Processor) => {
                return Err(wrong(format!("patch is of type {}", poly.type_name())))
            }
            _ => {}
        }

        let check_len = |what: &str, n: usize| {
            if n == size {
                Ok(())
            } else {
                Err(wrong(format!("{} has {} entries for {} faces", what, n, size)))
            }
        };

        let condition: Box<dyn BoundaryCondition<T>> = match self {
            BoundarySpec::Calculated => Box::new(Calculated::new(patch, poly.name.clone())),
            BoundarySpec::FixedValue => Box::new(FixedValue::new(patch)),
            BoundarySpec::ZeroGradient => Box::new(ZeroGradient::new(patch)),
            BoundarySpec::FixedGradient { ref gradient } => {
                check_len("gradient", gradient.len())?;
                Box::new(FixedGradient::new(patch, gradient.clone()))
            }
            BoundarySpec::Mixed {
                ref ref_value,
                ref ref_grad,
                ref value_fraction,
            } => {
                check_len("refValue", ref_value.len())?;
                check_len("refGradient", ref_grad.len())?;
                check_len("valueFraction", value_fraction.len())?;
                Box::new(Mixed::new(patch, ref_value.clone(), ref_grad.clone(), value_fraction.clone()))
            }
            BoundarySpec::Mapped { ref source_patch } => {
                let source = mesh
                    .find_patch(source_patch)
                    .ok_or_else(|| wrong(format!("source patch {} does not exist", source_patch)))?;
                check_len("source patch", mesh.patch(source).size)?;
                Box::new(Mapped::new(patch, source, source_patch.clone()))
            }
            BoundarySpec::Cyclic => match poly.kind {
                PatchKind::Cyclic { neighbour_patch, .. } => Box::new(Cyclic::new(patch, neighbour_patch, size)),
                _ => unreachable!(),
            },
            BoundarySpec::Processor => match poly.kind {
                PatchKind::Processor { neighb_proc, .. } => Box::new(Processor::new(patch, neighb_proc, size)),
                _ => unreachable!(),
            },
        };
        Ok(condition)
    }

    /// This description restricted to the given faces, in the given order.
    ///
    pub fn select(&self, faces: &[usize]) -> Self {
        let pick = |data: &Vec<T>| faces.iter().map(|&f| data[f]).collect();
        match self {
            BoundarySpec::FixedGradient { gradient } => BoundarySpec::FixedGradient { gradient: pick(gradient) },
            BoundarySpec::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => BoundarySpec::Mixed {
                ref_value: pick(ref_value),
                ref_grad: pick(ref_grad),
                value_fraction: faces.iter().map(|&f| value_fraction[f]).collect(),
            },
            other => other.clone(),
        }
    }

    /// Assemble a spec for a patch of `size` faces from pieces, each
    /// covering the faces listed with it. The inverse of `select`.
    ///
    pub fn scatter(size: usize, parts: &[(&Self, &[usize])]) -> Result<Self> {
        let first = match parts.first() {
            Some((spec, _)) => *spec,
            None => return Ok(BoundarySpec::Calculated),
        };
        for (spec, _) in parts {
            if spec.type_name() != first.type_name() {
                return Err(Error::PartitionInvariant(format!(
                    "pieces of one patch disagree on its condition: {} vs {}",
                    first.type_name(),
                    spec.type_name()
                )));
            }
        }
        let place = |get: &dyn Fn(&Self) -> Option<&Vec<T>>| {
            let mut out = vec![T::zero(); size];
            for (spec, faces) in parts {
                if let Some(data) = get(spec) {
                    for (d, &f) in data.iter().zip(faces.iter()) {
                        out[f] = *d
                    }
                }
            }
            out
        };

        Ok(match first {
            BoundarySpec::FixedGradient { .. } => BoundarySpec::FixedGradient {
                gradient: place(&|s| match s {
                    BoundarySpec::FixedGradient { gradient } => Some(gradient),
                    _ => None,
                }),
            },
            BoundarySpec::Mixed { .. } => {
                let mut value_fraction = vec![0.0; size];
                for (spec, faces) in parts {
                    if let BoundarySpec::Mixed { value_fraction: vf, .. } = spec {
                        for (d, &f) in vf.iter().zip(faces.iter()) {
                            value_fraction[f] = *d
                        }
                    }
                }
                BoundarySpec::Mixed {
                    ref_value: place(&|s| match s {
                        BoundarySpec::Mixed { ref_value, .. } => Some(ref_value),
                        _ => None,
                    }),
                    ref_grad: place(&|s| match s {
                        BoundarySpec::Mixed { ref_grad, .. } => Some(ref_grad),
                        _ => None,
                    }),
                    value_fraction,
                }
            }
            other => other.clone(),
        })
    }
}

/// Values of the internal field in the cells next to a patch.
///
pub fn patch_internal_field<T: FieldValue>(mesh: &Mesh, patch: usize, internal: &[T]) -> Vec<T> {
    mesh.patch_face_cells(patch).iter().map(|&c| internal[c]).collect()
}

/// The slice of a per-face array belonging to a patch.
///
pub fn patch_slice<'a, X>(mesh: &Mesh, patch: usize, data: &'a [X]) -> &'a [X] {
    &data[mesh.patch(patch).range()]
}
