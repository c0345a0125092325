use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use finvol::config::CaseConfig;
use finvol::decompose::{decompose_case, Method};
use finvol::error::{Error, Result};
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;




#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodName {
    Simple,
    Manual,
}




/**
 * Split a case into processor directories. Settings not given on the
 * command line are taken from the case's system/controls.json.
 */
#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// Case directory
    case: PathBuf,

    /// Number of processors
    #[clap(short = 'n', long)]
    n_procs: Option<usize>,

    #[clap(short = 'm', long, value_enum)]
    method: Option<MethodName>,

    /// Boxes along x, y and z for the simple method, e.g. 2,2,1
    #[clap(long, value_delimiter = ',')]
    simple_n: Vec<usize>,

    /// JSON file with the processor of every cell, for the manual method
    #[clap(long)]
    assignment: Option<PathBuf>,

    /// Keep both sides of every cyclic face on one processor
    #[clap(long)]
    preserve_cyclics: bool,

    /// Decompose this time directory only
    #[clap(short = 't', long)]
    time: Option<String>,

    #[clap(short = 'v', long)]
    verbose: bool,
}




// ============================================================================
impl Opts {

    fn settings(&self) -> Result<finvol::config::DecompositionConfig> {
        let mut settings = CaseConfig::load(&self.case)?.decomposition;

        if let Some(n) = self.n_procs {
            settings.n_procs = n;
        }
        if self.preserve_cyclics {
            settings.preserve_cyclics = true;
        }
        match self.method {
            Some(MethodName::Simple) => {
                let n = match self.simple_n.as_slice() {
                    [] => [settings.n_procs, 1, 1],
                    [x, y, z] => [*x, *y, *z],
                    other => return Err(Error::Config(format!("--simple-n needs three counts, got {}", other.len()))),
                };
                settings.method = Method::Simple { n }
            }
            Some(MethodName::Manual) => {
                let path = self
                    .assignment
                    .as_ref()
                    .ok_or_else(|| Error::Config("the manual method needs --assignment".into()))?;
                let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
                let assignment = serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                settings.method = Method::Manual { assignment }
            }
            None => {}
        }
        Ok(settings)
    }
}

fn run(opts: &Opts) -> Result<()> {
    let settings = opts.settings()?;
    info!(
        "decomposing {} into {} processors ({})",
        opts.case.display(),
        settings.n_procs,
        settings.method.name()
    );
    let summary = decompose_case(&opts.case, &settings, opts.time.as_deref())?;
    info!(
        "cells per processor {:?}, {} processor faces, {} field(s) over {} time(s)",
        summary.cells_per_proc,
        summary.processor_faces,
        summary.fields,
        summary.times.len()
    );
    Ok(())
}

fn main() {
    let opts = Opts::parse();
    let level = if opts.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    SimpleLogger::new().with_level(level).init().ok();

    if let Err(e) = run(&opts) {
        error!("{}", e);
        std::process::exit(1);
    }
}
