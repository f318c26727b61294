//! Interactive first-run credential setup.
//!
//! Loads `auth.json` when present and valid; otherwise walks the
//! operator through choosing a username and a six-digit PIN, with
//! confirmation, and persists the result.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use vantage_core::config::{is_valid_pin, is_valid_username, AuthConfig};

/// Load stored credentials or run the interactive prompt.
pub fn load_or_prompt(path: &Path) -> anyhow::Result<AuthConfig> {
    if let Some(config) = AuthConfig::load(path)? {
        println!("Using existing credentials (username: {}).", config.username);
        return Ok(config);
    }

    println!();
    println!("=== Authentication Setup ===");
    println!("Set up credentials for client authentication.");
    println!();

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let mut read_line = |prompt: &str| -> anyhow::Result<String> {
        print!("{prompt}");
        std::io::stdout().flush()?;
        lines
            .next()
            .transpose()?
            .context("stdin closed during setup")
    };

    let username = loop {
        let entry = read_line("Enter username (3-32 chars, alphanumeric/_/-): ")?;
        let entry = entry.trim().to_string();
        if is_valid_username(&entry) {
            break entry;
        }
        println!("Invalid username. Must be 3-32 characters, alphanumeric with _ or - allowed.");
        println!();
    };

    let pin = loop {
        let first = read_line("Enter PIN (6 digits): ")?;
        let first = first.trim().to_string();
        if !is_valid_pin(&first) {
            println!("Invalid PIN. Must be exactly 6 numeric digits.");
            println!();
            continue;
        }
        let second = read_line("Confirm PIN (6 digits): ")?;
        if first == second.trim() {
            break first;
        }
        println!("PINs do not match. Please try again.");
        println!();
    };

    let config = AuthConfig::new(username, pin).map_err(|e| anyhow::anyhow!(e))?;
    config
        .save(path)
        .with_context(|| format!("saving {}", path.display()))?;
    println!("Credentials set successfully!");
    println!("Username: {}", config.username);
    println!();
    Ok(config)
}
