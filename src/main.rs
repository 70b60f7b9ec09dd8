use std::env;
use std::process::ExitCode;

use fat32_fs::shell;
use fat32_fs::volume::Volume;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        let program = args.first().map(String::as_str).unwrap_or("fat32-shell");
        println!("Usage: {program} <disk_file>");
        return ExitCode::FAILURE;
    }

    let mut volume = match Volume::open(&args[1]) {
        Ok(volume) => volume,
        Err(err) => {
            println!("Failed to initialize FAT32 emulator");
            log::error!("init: {err}");
            return ExitCode::FAILURE;
        }
    };

    println!("FAT32 Emulator started. Type 'exit' or 'quit' to exit.");

    if let Err(err) = shell::run(&mut volume) {
        log::error!("shell: {err}");
    }

    println!("Goodbye!");
    ExitCode::SUCCESS
}
