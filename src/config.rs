//! Case configuration, read from `system/controls.json`. Every section has
//! defaults, so a case without the file, or with only some keys, is valid.

use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::decompose::Method;
use crate::error::{Error, Result};
use crate::fvc::NonOrthCorrection;
use crate::fvm::DdtScheme;
use crate::interpolation::Scheme;
use crate::matrix::SolverControls;

pub const CONTROLS_FILE: &str = "controls.json";




/**
 * Discretisation choices for each family of operator.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Schemes {
    pub ddt: DdtScheme,
    pub div: Scheme,
    pub laplacian: NonOrthCorrection,
}




/**
 * How `finvol-decompose` splits the case when no command line options
 * override it.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DecompositionConfig {
    pub n_procs: usize,
    pub method: Method,
    pub preserve_cyclics: bool,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            n_procs: 1,
            method: Method::default(),
            preserve_cyclics: false,
        }
    }
}




/**
 * The contents of `system/controls.json`.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaseConfig {
    pub schemes: Schemes,

    /// Solver settings by field name; fields not listed use the defaults.
    pub solvers: BTreeMap<String, SolverControls>,

    /// Under-relaxation factors by field name; unlisted fields are not
    /// relaxed.
    pub relaxation: BTreeMap<String, f64>,

    pub decomposition: DecompositionConfig,
}




// ============================================================================
impl CaseConfig {

    /// Load the configuration of the case rooted at `case`. A missing file
    /// gives the defaults; a malformed one is an error.
    pub fn load<P: AsRef<Path>>(case: P) -> Result<Self> {
        let path = case.as_ref().join("system").join(CONTROLS_FILE);
        if !path.exists() {
            info!("no {}, using default controls", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Config(details) => Error::Config(format!("{}: {}", path.display(), details)),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, case: P) -> Result<()> {
        let dir = case.as_ref().join("system");
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        let path = dir.join(CONTROLS_FILE);
        let text = serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&path, text).map_err(|e| Error::io(&path, e))
    }

    pub fn solver_controls(&self, field: &str) -> SolverControls {
        self.solvers.get(field).cloned().unwrap_or_default()
    }

    pub fn relaxation_factor(&self, field: &str) -> Option<f64> {
        self.relaxation.get(field).copied()
    }

    fn validate(&self) -> Result<()> {
        for (field, alpha) in &self.relaxation {
            if !(*alpha > 0.0 && *alpha <= 1.0) {
                return Err(Error::Config(format!("relaxation factor for {} is {}, must be in (0, 1]", field, alpha)));
            }
        }
        for (field, controls) in &self.solvers {
            if controls.tolerance < 0.0 || controls.rel_tol < 0.0 {
                return Err(Error::Config(format!("negative tolerance for {}", field)));
            }
            if controls.min_iter > controls.max_iter {
                return Err(Error::Config(format!("min_iter exceeds max_iter for {}", field)));
            }
        }
        if self.decomposition.n_procs == 0 {
            return Err(Error::Config("decomposition needs at least one processor".into()));
        }
        if let Scheme::LimitedLinear { k } = self.schemes.div {
            if !(k > 0.0 && k <= 1.0) {
                return Err(Error::Config(format!("limitedLinear coefficient {} outside (0, 1]", k)));
            }
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::matrix::SolverKind;

    #[test]
    fn missing_keys_take_defaults() {
        let config = CaseConfig::from_json(r#"{ "relaxation": { "p": 0.3 } }"#).unwrap();
        assert_eq!(config.relaxation_factor("p"), Some(0.3));
        assert_eq!(config.relaxation_factor("U"), None);
        assert_eq!(config.solver_controls("p"), SolverControls::default());
        assert_eq!(config.schemes, Schemes::default());
    }

    #[test]
    fn nested_sections_parse() {
        let text = r#"{
            "schemes": {
                "ddt": "backward",
                "div": { "scheme": "limitedLinear", "k": 0.5 },
                "laplacian": { "correction": "limited", "coeff": 0.33 }
            },
            "solvers": { "T": { "solver": "pcg", "tolerance": 1e-8 } },
            "decomposition": { "nProcs": 4, "method": { "method": "simple", "n": [2, 2, 1] } }
        }"#;
        let config = CaseConfig::from_json(text).unwrap();
        assert_eq!(config.schemes.ddt, DdtScheme::Backward);
        assert_eq!(config.schemes.div, Scheme::LimitedLinear { k: 0.5 });
        assert_eq!(config.schemes.laplacian, NonOrthCorrection::Limited { coeff: 0.33 });
        assert_eq!(config.solver_controls("T").solver, SolverKind::Pcg);
        assert_eq!(config.solver_controls("T").max_iter, 1000);
        assert_eq!(config.decomposition.n_procs, 4);
        assert_eq!(config.decomposition.method, Method::Simple { n: [2, 2, 1] });
    }

    #[test]
    fn out_of_range_relaxation_is_rejected() {
        assert!(CaseConfig::from_json(r#"{ "relaxation": { "p": 1.5 } }"#).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CaseConfig::default();
        config.relaxation.insert("U".into(), 0.7);
        config.save(dir.path()).unwrap();
        assert_eq!(CaseConfig::load(dir.path()).unwrap(), config);
    }
}
