use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;

use clap::Parser;
use env_logger::Builder;
use sugars::{rc, refcell};

use geosim_core::Simulation;

use geosim_cloud::config::{load_delay_matrix, load_links, ConfigError, DatacentersConfig, LinkConfig};
use geosim_cloud::generator::GeneratorConfig;
use geosim_cloud::record::{CsvRecorder, NullRecorder, Recorder};
use geosim_cloud::simulation::GeoCloudSimulation;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Runs a geo-distributed cloud scheduling simulation
struct Args {
    /// Path to JSON file with data center topology and schedulers
    #[arg(short, long)]
    datacenters: PathBuf,

    /// Path to CSV matrix with inter-region network delays
    #[arg(long)]
    region_delay: PathBuf,

    /// Path to CSV matrix with user area to region access delays
    #[arg(long)]
    area_delay: Option<PathBuf>,

    /// Path to CSV file with inter-datacenter links (src, dst, bandwidth, unit_price)
    #[arg(long)]
    bandwidth: Option<PathBuf>,

    /// Path to JSON file with synthetic workload parameters
    #[arg(short, long)]
    requests: PathBuf,

    /// Path to produced CSV file with lifecycle records
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Simulation time limit in ms
    #[arg(short, long)]
    terminate_at: Option<f64>,

    /// Overrides the seed from the topology file
    #[arg(short, long)]
    seed: Option<u64>,
}

fn run(args: Args) -> Result<(), ConfigError> {
    let mut config = DatacentersConfig::from_file(&args.datacenters)?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let region_delays = load_delay_matrix(&args.region_delay)?;
    let area_delays = match &args.area_delay {
        Some(path) => load_delay_matrix(path)?,
        None => Vec::new(),
    };
    let links: Vec<LinkConfig> = match &args.bandwidth {
        Some(path) => load_links(path)?,
        None => Vec::new(),
    };
    let workload = GeneratorConfig::from_file(&args.requests)?;

    let recorder: Rc<RefCell<dyn Recorder>> = match &args.output {
        Some(path) => rc!(refcell!(CsvRecorder::new(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?)),
        None => rc!(refcell!(NullRecorder)),
    };

    let sim = Simulation::new(config.seed);
    let mut sim = GeoCloudSimulation::new(sim, config, &region_delays, &area_delays, &links, recorder)?;
    sim.submit_generated_requests(workload);
    if let Some(time) = args.terminate_at {
        sim.terminate_at(time);
    }
    sim.run();
    Ok(())
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{}", e);
        exit(1);
    }
}
