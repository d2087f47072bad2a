use fatdisk::cli::{self, UsageError};
use fatdisk::{config, host, logging};
use std::process;

fn main() {
    if let Err(e) = logging::init(config::log_level()) {
        eprintln!("failed to install logger: {}", e);
    }

    let (image, op) = match cli::parse_operate(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(UsageError::Clap(e)) => e.exit(),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    match cli::operate(&image, op, &mut host::Prompt) {
        Ok(Some(output)) => print!("{}", output),
        Ok(None) => {}
        Err(e) => println!("Error: {}", e),
    }
}
