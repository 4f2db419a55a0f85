mod backend;
mod cpu;
mod instructions;
mod loader;
mod memory_subsystem;

use std::path::PathBuf;
use std::process::exit;

use log::info;
use structopt::StructOpt;

use crate::cpu::{load_cpu_config, CPUConfig, CPU};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "rust_riscv_simulator",
    about = "Cycle accurate simulator of an out of order RV32 processor."
)]
struct Opt {
    /// Hex program image to run.
    #[structopt(parse(from_os_str))]
    file: PathBuf,

    /// YAML file with the processor configuration.
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    let config = match &opt.config {
        Some(path) => match load_cpu_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config {}: {}", path.display(), e);
                exit(1);
            }
        },
        None => CPUConfig::default(),
    };

    let mut cpu = CPU::new(&config);
    let entry = match loader::loader::load(&opt.file, cpu.memory_mut()) {
        Ok(entry) => entry,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };
    cpu.init(entry);

    match cpu.run() {
        Ok(value) => {
            info!("{}", cpu.perf_counters);
            exit(value as i32);
        }
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    }
}
