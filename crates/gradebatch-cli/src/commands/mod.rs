//! CLI command implementations.

pub mod batches;
pub mod graders;

use anyhow::Result;

pub fn validate(path: &str) -> Result<()> {
    match gradebatch_config::load_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen:  {}", config.server.listen);
            println!("  graders: {}", config.graders.len());
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
