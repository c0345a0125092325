use std::path::PathBuf;

use clap::Parser;
use finvol::config::DecompositionConfig;
use finvol::decompose::{Decomposition, Method};
use finvol::dimension::{Dimensioned, DIMLESS, DIM_KINEMATIC_VISCOSITY};
use finvol::error::Result;
use finvol::field::{BoundarySpec, FieldData, VolField};
use finvol::fvc::NonOrthCorrection;
use finvol::fvm::{self, DdtScheme};
use finvol::matrix::{SolverControls, SolverKind};
use finvol::mesh::Mesh;
use finvol::meshing::BlockMesh;
use finvol::message::ChannelCommunicator;
use finvol::num_vec::Vector3;
use finvol::reconstruct::Reconstructor;
use finvol::storage::{AnyField, Case};
use finvol::time::TimeState;
use log::info;
use simple_logger::SimpleLogger;




/**
 * Transient heat conduction in a square plate, hot on the left edge and
 * cold on the right, solved on several ranks and gathered back.
 */
#[derive(Debug, Parser)]
struct Opts {
    #[clap(short = 'r', long, default_value = "32")]
    resolution: usize,

    #[clap(short = 'p', long, default_value = "2")]
    procs_per_axis: usize,

    #[clap(short = 's', long, default_value = "50")]
    steps: usize,

    #[clap(long, default_value = "0.005")]
    dt: f64,

    #[clap(long, default_value = "0.1")]
    diffusivity: f64,

    /// Write the final temperature to this case directory
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,
}

fn initial_temperature(mesh: &Mesh) -> Result<VolField<f64>> {
    let specs = BoundarySpec::for_patches(mesh.patches(), |p| match p.name.as_str() {
        "xmin" | "xmax" => BoundarySpec::FixedValue,
        _ => BoundarySpec::ZeroGradient,
    });
    let mut t = VolField::new("T", mesh, DIMLESS, vec![0.0; mesh.n_cells()], specs)?;
    if let Some(xmin) = mesh.find_patch("xmin") {
        t.assign_patch(xmin, 1.0);
    }
    Ok(t)
}

fn march(mesh: &Mesh, t: &mut VolField<f64>, opts: &Opts) -> Result<()> {
    let alpha = Dimensioned::new(opts.diffusivity, DIM_KINEMATIC_VISCOSITY);
    let controls = SolverControls {
        tolerance: 1e-10,
        ..SolverControls::with_solver(SolverKind::Pcg)
    };
    let mut time = TimeState::new(0.0, opts.dt);

    for _ in 0..opts.steps {
        t.store_old_time();
        time.advance(opts.dt);
        let mut eqn = fvm::ddt(mesh, &time, DdtScheme::Backward, None, t)?;
        eqn.try_sub(&fvm::laplacian(mesh, alpha, t, NonOrthCorrection::Corrected)?)?;
        let perf = eqn.solve(mesh, t, &controls)?;
        if mesh.comm().rank() == 0 {
            perf.log();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    SimpleLogger::new().init().ok();
    let opts = Opts::parse();

    let mesh = BlockMesh::new(Vector3::zero(), Vector3::xyz(1.0, 1.0, 0.1), (opts.resolution, opts.resolution, 1)).build()?;
    let n = opts.procs_per_axis;
    let settings = DecompositionConfig {
        n_procs: n * n,
        method: Method::Simple { n: [n, n, 1] },
        preserve_cyclics: false,
    };
    let decomposition = Decomposition::new(&mesh, &settings)?;
    let pieces = decomposition.decompose_vol_field(&mesh, &initial_temperature(&mesh)?)?;

    let start = std::time::Instant::now();
    let solved = ChannelCommunicator::run(settings.n_procs, |comm| -> Result<FieldData<f64>> {
        let rank = comm.rank();
        let local = Mesh::with_communicator(decomposition.procs[rank].desc.clone(), comm)?;
        let mut t = VolField::from_data(&local, pieces[rank].clone())?;
        t.correct_boundary_conditions(&local)?;
        march(&local, &mut t, &opts)?;
        Ok(t.to_data(&local))
    })
    .into_iter()
    .collect::<Result<Vec<_>>>()?;
    info!("{} steps on {} ranks in {:.3}s", opts.steps, settings.n_procs, start.elapsed().as_secs_f64());

    let reconstructor = Reconstructor::new(mesh.description().clone(), decomposition.procs.clone())?;
    let parallel = reconstructor.reconstruct_vol(&solved)?;

    let mut serial = initial_temperature(&mesh)?;
    march(&mesh, &mut serial, &opts)?;
    let max_difference = serial
        .internal()
        .iter()
        .zip(&parallel.internal)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    let mean = parallel.internal.iter().sum::<f64>() / parallel.internal.len() as f64;
    info!("mean temperature {:.6}, largest difference from the serial run {:.3e}", mean, max_difference);

    if let Some(dir) = &opts.output {
        let case = Case::new(dir);
        case.write_mesh(mesh.description())?;
        case.write_field(&format!("{}", opts.dt * opts.steps as f64), &AnyField::VolScalar(parallel))?;
        info!("wrote {}", dir.display());
    }
    Ok(())
}
