use std::path::PathBuf;

use clap::Parser;
use finvol::reconstruct::reconstruct_case;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;




/**
 * Gather the processor directories of a case back onto the complete mesh.
 */
#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// Case directory
    case: PathBuf,

    /// Reconstruct only these fields
    #[clap(short = 'f', long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Reconstruct this time directory only
    #[clap(short = 't', long)]
    time: Option<String>,

    #[clap(short = 'v', long)]
    verbose: bool,
}

fn main() {
    let opts = Opts::parse();
    let level = if opts.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    SimpleLogger::new().with_level(level).init().ok();

    let fields = if opts.fields.is_empty() { None } else { Some(opts.fields.as_slice()) };

    match reconstruct_case(&opts.case, fields, opts.time.as_deref()) {
        Ok(report) => {
            if report.mesh_reconstructed {
                info!("complete mesh rebuilt from the processor meshes");
            }
            if !report.rebuilt_addressing.is_empty() {
                info!("addressing rebuilt for processors {:?}", report.rebuilt_addressing);
            }
            if report.stale {
                warn!("the complete mesh is older than the processor meshes");
            }
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
