//! Case directories on disk. A case is laid out as
//!
//! ```text
//! <case>/system/controls.json
//! <case>/constant/mesh.cbor
//! <case>/<time>/<field>.cbor
//! <case>/processor<N>/constant/{mesh,addressing}.cbor
//! <case>/processor<N>/<time>/<field>.cbor
//! ```
//!
//! Mesh, addressing and field files are CBOR, written with `ciborium`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::decompose::ProcAddressing;
use crate::error::{Error, Result};
use crate::field::{FieldData, SurfaceField};
use crate::mesh::{Mesh, MeshDescription};
use crate::num_vec::{Tensor, Vector3};

const FIELD_EXTENSION: &str = "cbor";




/**
 * A stored field of any of the supported kinds.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "data")]
pub enum AnyField {
    VolScalar(FieldData<f64>),
    VolVector(FieldData<Vector3>),
    VolTensor(FieldData<Tensor>),
    SurfaceScalar(SurfaceField<f64>),
    SurfaceVector(SurfaceField<Vector3>),
}




// ============================================================================
impl AnyField {

    pub fn name(&self) -> &str {
        match self {
            AnyField::VolScalar(d) => &d.name,
            AnyField::VolVector(d) => &d.name,
            AnyField::VolTensor(d) => &d.name,
            AnyField::SurfaceScalar(s) => &s.name,
            AnyField::SurfaceVector(s) => &s.name,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            AnyField::VolScalar(_) => "volScalarField",
            AnyField::VolVector(_) => "volVectorField",
            AnyField::VolTensor(_) => "volTensorField",
            AnyField::SurfaceScalar(_) => "surfaceScalarField",
            AnyField::SurfaceVector(_) => "surfaceVectorField",
        }
    }

    /// Check the field's sizes against `mesh`.
    pub fn check(&self, mesh: &Mesh) -> Result<()> {
        fn vol<T>(mesh: &Mesh, d: &FieldData<T>) -> Result<()> {
            let sizes_match = d.internal.len() == mesh.n_cells()
                && d.boundary.len() == mesh.patches().len()
                && d.boundary.iter().zip(mesh.patches()).all(|(pd, p)| pd.values.len() == p.size);
            if sizes_match {
                Ok(())
            } else {
                Err(Error::topology("field", format!("stored field {} does not fit the mesh", d.name)))
            }
        }
        match self {
            AnyField::VolScalar(d) => vol(mesh, d),
            AnyField::VolVector(d) => vol(mesh, d),
            AnyField::VolTensor(d) => vol(mesh, d),
            AnyField::SurfaceScalar(s) => s.check(mesh),
            AnyField::SurfaceVector(s) => s.check(mesh),
        }
    }
}




/**
 * A case directory, or one processor directory within it.
 */
#[derive(Clone, Debug)]
pub struct Case {
    root: PathBuf,
}




// ============================================================================
impl Case {

    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn processor(&self, proc_no: usize) -> Case {
        Case::new(self.root.join(format!("processor{}", proc_no)))
    }

    pub fn mesh_path(&self) -> PathBuf {
        self.root.join("constant").join("mesh.cbor")
    }

    pub fn addressing_path(&self) -> PathBuf {
        self.root.join("constant").join("addressing.cbor")
    }

    pub fn field_path(&self, time: &str, name: &str) -> PathBuf {
        self.root.join(time).join(format!("{}.{}", name, FIELD_EXTENSION))
    }

    pub fn has_mesh(&self) -> bool {
        self.mesh_path().exists()
    }

    pub fn read_mesh(&self) -> Result<MeshDescription> {
        read_cbor(&self.mesh_path())
    }

    pub fn write_mesh(&self, desc: &MeshDescription) -> Result<()> {
        write_cbor(&self.mesh_path(), desc)
    }

    /// The stored addressing, or `None` when the file does not exist.
    pub fn read_addressing(&self) -> Result<Option<ProcAddressing>> {
        let path = self.addressing_path();
        if path.exists() {
            read_cbor(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn write_addressing(&self, addressing: &ProcAddressing) -> Result<()> {
        write_cbor(&self.addressing_path(), addressing)
    }

    pub fn read_field(&self, time: &str, name: &str) -> Result<AnyField> {
        read_cbor(&self.field_path(time, name))
    }

    pub fn write_field(&self, time: &str, field: &AnyField) -> Result<()> {
        write_cbor(&self.field_path(time, field.name()), field)
    }

    /// The time directories of the case, in increasing order of time.
    ///
    pub fn times(&self) -> Result<Vec<String>> {
        let mut times: Vec<(f64, String)> = self
            .entries()?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .filter_map(|(name, _)| name.parse::<f64>().ok().map(|t| (t, name)))
            .collect();
        times.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(times.into_iter().map(|(_, name)| name).collect())
    }

    pub fn latest_time(&self) -> Result<Option<String>> {
        Ok(self.times()?.pop())
    }

    /// Names of the fields stored for `time`, sorted.
    ///
    pub fn field_names(&self, time: &str) -> Result<Vec<String>> {
        let dir = self.root.join(time);
        let mut names: Vec<String> = Case::new(dir)
            .entries()?
            .into_iter()
            .filter(|(_, is_dir)| !is_dir)
            .filter_map(|(name, _)| name.strip_suffix(&format!(".{}", FIELD_EXTENSION)).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Number of consecutive `processor<N>` directories starting from 0.
    ///
    pub fn processor_count(&self) -> Result<usize> {
        let mut n = 0;
        while self.processor(n).root.is_dir() {
            n += 1
        }
        Ok(n)
    }

    fn entries(&self) -> Result<Vec<(String, bool)>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(|e| Error::io(&self.root, e))? {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            let is_dir = entry.file_type().map_err(|e| Error::io(entry.path(), e))?.is_dir();
            if let Some(name) = entry.file_name().to_str() {
                out.push((name.to_string(), is_dir))
            }
        }
        Ok(out)
    }
}

/// Serialise `value` to `path` as CBOR, creating parent directories.
///
pub fn write_cbor<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut buffer = BufWriter::new(file);
    ciborium::ser::into_writer(value, &mut buffer).map_err(|e| Error::Encoding {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    buffer.flush().map_err(|e| Error::io(path, e))?;
    debug!("wrote {}", path.display());
    Ok(())
}

pub fn read_cbor<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    ciborium::de::from_reader(BufReader::new(file)).map_err(|e| Error::Encoding {
        path: path.display().to_string(),
        details: e.to_string(),
    })
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::dimension::DIMLESS;
    use crate::field::{BoundarySpec, VolField};
    use crate::meshing::BlockMesh;

    #[test]
    fn mesh_and_fields_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let mesh = BlockMesh::line(3, 1.0).build().unwrap();
        case.write_mesh(mesh.description()).unwrap();
        assert_eq!(&case.read_mesh().unwrap(), mesh.description());

        let specs = BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::ZeroGradient);
        let t = VolField::new("T", &mesh, DIMLESS, vec![0.1, 0.2, 0.3], specs).unwrap();
        let stored = AnyField::VolScalar(t.to_data(&mesh));
        case.write_field("0.5", &stored).unwrap();
        assert_eq!(case.read_field("0.5", "T").unwrap(), stored);
        assert_eq!(case.field_names("0.5").unwrap(), vec!["T".to_string()]);
    }

    #[test]
    fn times_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for t in ["10", "2", "0.5", "constant", "system"] {
            std::fs::create_dir_all(dir.path().join(t)).unwrap();
        }
        let case = Case::new(dir.path());
        assert_eq!(case.times().unwrap(), vec!["0.5", "2", "10"]);
        assert_eq!(case.latest_time().unwrap().as_deref(), Some("10"));
    }

    #[test]
    fn processor_directories_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        assert_eq!(case.processor_count().unwrap(), 0);
        std::fs::create_dir_all(dir.path().join("processor0")).unwrap();
        std::fs::create_dir_all(dir.path().join("processor1")).unwrap();
        assert_eq!(case.processor_count().unwrap(), 2);
        assert!(case.read_addressing().unwrap().is_none());
    }
}
