// src/utils/env.rs
use log::{info, warn};

/// Loads a `.env` file if one is present. Variables already set in the process
/// environment take precedence.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {
            info!("No .env file found, using system environment variables")
        }
        Err(e) => warn!(
            "Could not read .env file: {}. Proceeding with system environment variables.",
            e
        ),
    }
}
