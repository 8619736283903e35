//! Log output setup for the `snapm` binary

use crate::error::{Error, Result};
use std::str::FromStr;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

/// Subsystems whose debug output can be enabled with `--debug`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugOptions {
    pub manager: bool,
    pub command: bool,
    pub plugins: bool,
    pub report: bool,
}

impl DebugOptions {
    pub fn all() -> Self {
        DebugOptions {
            manager: true,
            command: true,
            plugins: true,
            report: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.manager || self.command || self.plugins || self.report
    }

    /// Filter directives turning on debug output for the chosen subsystems
    pub fn directives(&self) -> Vec<&'static str> {
        let mut directives = Vec::new();
        if self.manager {
            directives.extend(["snapm::manager=debug", "snapm::boot=debug"]);
        }
        if self.command {
            directives.push("snapm::command=debug");
        }
        if self.plugins {
            directives.push("snapm::provider=debug");
        }
        if self.report {
            directives.push("snapm::report=debug");
        }
        directives
    }
}

impl FromStr for DebugOptions {
    type Err = Error;

    /// Parse a comma separated list of subsystems, or `all`
    fn from_str(s: &str) -> Result<Self> {
        let mut opts = DebugOptions::default();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name {
                "manager" => opts.manager = true,
                "command" => opts.command = true,
                "plugins" => opts.plugins = true,
                "report" => opts.report = true,
                "all" => opts = DebugOptions::all(),
                other => {
                    return Err(Error::InvalidIdentifier(format!(
                        "Unknown debug option: {}",
                        other
                    )))
                }
            }
        }
        Ok(opts)
    }
}

/// Default filter for a verbosity count: the configured level, then
/// `info` and `debug`
pub fn default_level(config_level: &str, verbose: u8) -> &str {
    match verbose {
        0 => config_level,
        1 => "info",
        _ => "debug",
    }
}

/// Build the log filter; `RUST_LOG` replaces the default directive
pub fn build_filter(default_directive: &str, debug: &DebugOptions) -> Result<EnvFilter> {
    let directive: Directive = default_directive.parse().map_err(|e| {
        Error::Config(format!(
            "failed to parse log level {}: {}",
            default_directive, e
        ))
    })?;
    let mut filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();
    for directive in debug.directives() {
        let directive: Directive = directive
            .parse()
            .map_err(|e| Error::Config(format!("invalid debug directive {}: {}", directive, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Install the global subscriber, writing to stderr
pub fn init_logging(default_directive: &str, debug: &DebugOptions) -> Result<()> {
    let filter = build_filter(default_directive, debug)?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(debug.is_enabled()))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to initialise logging: {}", e)))
}
