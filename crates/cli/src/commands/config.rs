use clap::Subcommand;
use std::path::Path;
use switcher_core::{config::InstanceEntry, SwitcherConfig};

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Show the effective configuration, including environment overrides
    Show {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Print the configuration as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file, json } => show_config(&file, json),
    }
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = SwitcherConfig::from_file(file)?;

    print_info("Validating configuration...");
    config.validate()?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Instances: {}", config.instances.len());
    println!(
        "  Tracking: {} ({}, every {}ms)",
        enabled(config.tracking.enabled),
        config.tracking.method,
        config.tracking.interval_ms
    );
    println!("  Switching: {:?}", config.switching.method);
    println!("  Remote fetch: {}", enabled(config.fetch.enabled));

    Ok(())
}

fn show_config(file: &str, json: bool) -> CliResult<()> {
    let config = SwitcherConfig::from_file(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration from {file}:");

    println!("\n[Instances] ({} configured)", config.instances.len());
    for entry in &config.instances {
        match entry {
            InstanceEntry::Url(site) => println!("  {site}"),
            InstanceEntry::Detailed { site, options } => {
                println!("  {site}");
                println!("    Cookies: {}", options.use_cookies);
                if let Some(method) = options.tracking_method {
                    println!("    Tracking Method: {method}");
                }
                if !options.available {
                    println!("    Available: false");
                }
            }
        }
    }

    println!("\n[Detection]");
    println!("  Acceptable Working Rate: {}", config.detection.acceptable_working_rate);
    println!("  Median Working: {}", config.detection.use_median_working);
    println!("  Median Latency: {}", config.detection.use_median_time);
    println!(
        "  Unavailable Counts As Blocked: {}",
        config.detection.consider_unavailable_as_blocked
    );

    println!("\n[Tracking]");
    println!("  Enabled: {}", config.tracking.enabled);
    println!("  Method: {}", config.tracking.method);
    println!("  Interval: {}ms", config.tracking.interval_ms);
    println!("  Parallel: {}", config.tracking.parallel);
    println!("  Only Dead: {}", config.tracking.only_dead);

    println!("\n[Switching]");
    println!("  Method: {:?}", config.switching.method);
    println!("  Only Working: {}", config.switching.only_working);
    println!("  Prefer Same: {}", config.switching.prefer_same);

    println!("\n[Fetch]");
    println!("  Enabled: {}", config.fetch.enabled);
    println!("  URL: {}", config.fetch.url);
    println!("  Ignore Dead: {}", config.fetch.ignore_dead);
    if config.fetch.require_version.enabled {
        println!(
            "  Minimum Version: {} (home fallback: {})",
            config.fetch.require_version.version, config.fetch.require_version.fallback_to_home
        );
    }

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}
