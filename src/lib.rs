//! Finvol is a finite-volume framework for partial differential equations on
//! unstructured polyhedral meshes. A mesh is a list of faces with an owner
//! and (for internal faces) a neighbour cell; fields live on cells or faces
//! and carry a boundary condition per patch. The `fvc` operators evaluate
//! explicit quantities, and the `fvm` operators assemble implicit terms into
//! an `FvMatrix` in lower-diagonal-upper form, which is then solved in
//! place. Cases can be split across processors with `decompose` and
//! gathered back with `reconstruct`; processor patches exchange values
//! through a `message::Communicator`.

pub mod config;
pub mod decompose;
pub mod dimension;
pub mod error;
pub mod field;
pub mod fvc;
pub mod fvm;
pub mod interpolation;
pub mod matrix;
pub mod mesh;
pub mod meshing;
pub mod message;
pub mod num_vec;
pub mod reconstruct;
pub mod storage;
pub mod time;

pub use error::{Error, Result};
