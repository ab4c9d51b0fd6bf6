//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments shared by mqttop bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "Publish host metrics to an MQTT broker")]
pub struct BridgeArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::parse_from_with_default(std::env::args_os(), default_config)
    }

    /// Like [`parse_with_default`](Self::parse_with_default), from an explicit
    /// argument list.
    pub fn parse_from_with_default<I, T>(args: I, default_config: &'static str) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let command = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.required(false).default_value(default_config));
        let matches = command.get_matches_from(args);

        <Self as clap::FromArgMatches>::from_arg_matches(&matches)
            .unwrap_or_else(|e| e.exit())
    }

    /// Parse CLI arguments (requires --config to be specified).
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = BridgeArgs::parse_from_with_default(["mqttop"], "mqttop.json5");
        assert_eq!(args.config, PathBuf::from("mqttop.json5"));
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_overrides() {
        let args = BridgeArgs::parse_from_with_default(
            ["mqttop", "-c", "/etc/mqttop.json5", "--log-level", "debug"],
            "mqttop.json5",
        );
        assert_eq!(args.config, PathBuf::from("/etc/mqttop.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
