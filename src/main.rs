use std::process;

use gamewright::{cli, config::Config};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let home = Config::home().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        process::exit(1);
    });

    let config = match Config::load(&home) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = cli::run(&home, &config) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
