use anyhow::Result;

use krisha_scan::config::Config;

/// Print the effective configuration, validating it first
pub fn print_config(config: &Config) -> Result<()> {
    if let Err(e) = config.validate() {
        tracing::warn!(error = %e, "Configuration is not valid");
    }
    println!("{}", config.to_toml()?);
    Ok(())
}
