//! `fleetpulse setup` — store credentials for a named profile.

use std::io::{BufRead, Write};

use anyhow::{bail, Result};
use colored::Colorize;

use crate::config::{self, Config, Credentials, DEFAULT_REGION};

pub fn run() -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    let profile = prompt(&mut input, "Enter profile name", Some("default"))?;
    let access_key_id = prompt(&mut input, "Enter your AWS Access Key ID", None)?;
    let secret_access_key = prompt(&mut input, "Enter your AWS Secret Access Key", None)?;
    let region = prompt(&mut input, "Enter your AWS Region", Some(DEFAULT_REGION))?;

    let path = Config::path()?;
    config::save_profile(
        &path,
        &profile,
        Credentials {
            access_key_id,
            secret_access_key,
            region,
        },
    )?;

    println!(
        "{} Saved profile {} to {}",
        "ok".green().bold(),
        profile.bold(),
        path.display()
    );
    Ok(())
}

/// Ask until a non-empty answer is given, or fall back to `default`.
fn prompt(input: &mut impl BufRead, question: &str, default: Option<&str>) -> Result<String> {
    loop {
        match default {
            Some(d) => eprint!("{} {} [{}]: ", "??".blue().bold(), question, d),
            None => eprint!("{} {}: ", "??".blue().bold(), question),
        }
        std::io::stderr().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            bail!("input closed before '{}' was answered", question);
        }

        let answer = line.trim();
        if !answer.is_empty() {
            return Ok(answer.to_string());
        }
        if let Some(d) = default {
            return Ok(d.to_string());
        }
    }
}
