use std::process;

use pgtaskd::supervisor;
use pgtaskd::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            process::exit(1);
        }
    };

    if let Err(error) = supervisor::run(config).await {
        process::exit(error.exit_code());
    }
}
