use fatdisk::cli::{self, UsageError};
use fatdisk::{config, logging};
use std::process;

fn main() {
    if let Err(e) = logging::init(config::log_level()) {
        eprintln!("failed to install logger: {}", e);
    }

    let (geometry, image) = match cli::parse_create(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(UsageError::Clap(e)) => e.exit(),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = cli::create(geometry, &image) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
    println!("File system created successfully: {}", image.display());
}
