pub mod config;
pub mod run;

// Re-export command functions for convenience
pub use config::print_config;
pub use run::run;
