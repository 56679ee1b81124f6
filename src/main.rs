use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use petct_coreg::{
    BatchConfig,
    batch::{PatientStatus, survey},
    scanner,
};

#[derive(Parser)]
#[command(name = "petct-coreg")]
#[command(about = "Select, convert and mask PET/CT series of a patient corpus")]
struct Args {
    /// TOML batch configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Patient corpus, overrides `root_dir` of the configuration
    #[arg(long)]
    root: Option<PathBuf>,

    /// Output directory, overrides `output_dir` of the configuration
    #[arg(long)]
    output: Option<PathBuf>,

    /// ROI name to look for in the structure sets
    #[arg(long)]
    roi: Option<String>,

    #[arg(long)]
    parallel: bool,

    /// Write a PNG of the middle axial slice next to every volume
    #[arg(long)]
    preview: bool,

    /// Print the attributes of a single DICOM file and exit
    #[arg(long, value_name = "FILE")]
    describe: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<BatchConfig, String> {
    let mut config = match (&args.config, &args.root, &args.output) {
        (Some(path), _, _) => BatchConfig::from_file(path).map_err(|err| err.to_string())?,
        (None, Some(root), Some(output)) => BatchConfig::new(root, output),
        _ => return Err("either --config or both --root and --output are required".into()),
    };

    if let Some(root) = &args.root {
        config.root_dir = root.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(roi) = &args.roi {
        config.policy.roi_name = roi.clone();
    }
    config.parallel |= args.parallel;
    config.preview |= args.preview;
    Ok(config)
}

fn main() -> ExitCode {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .try_init();

    let args = Args::parse();

    if let Some(path) = &args.describe {
        return match scanner::describe_file(path) {
            Ok(attributes) => {
                for (name, value) in attributes {
                    println!("{name}: {value}");
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                log::error!("{}: {err}", path.display());
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match survey(&config) {
        Ok(report) => {
            for outcome in &report.outcomes {
                match &outcome.status {
                    PatientStatus::Completed => {
                        println!("{}: {} files", outcome.patient, outcome.outputs.len())
                    }
                    PatientStatus::Skipped(reason) => {
                        println!("{}: skipped ({reason})", outcome.patient)
                    }
                    PatientStatus::Failed(reason) => {
                        println!("{}: failed ({reason})", outcome.patient)
                    }
                }
            }
            if report.failed() > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
