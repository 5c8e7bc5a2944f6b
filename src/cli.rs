// src/cli.rs

//! Command line surface.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, IMAGES_MAX};
use crate::os::handoff::DEFAULT_HANDOFF_NAME;

#[derive(Parser, Debug, Default)]
#[command(
    name = "fbsplash",
    about = "Show a progress bar, logo, or small animation on the display",
    after_help = format!("Up to {} IMAGEs are supported.", IMAGES_MAX)
)]
pub struct Cli {
    /// Show IMAGEs (at least 2) in rotation over PERIOD ms
    #[arg(short = 'a', long = "animate", value_name = "PERIOD")]
    pub animate: Option<u64>,

    /// Load IMAGEs from DIR, /res/images by default
    #[arg(short = 'i', long = "imagesdir", value_name = "DIR")]
    pub images_dir: Option<PathBuf>,

    /// Show a progress bar over TIME ms
    #[arg(short = 'p', long = "progressbar", value_name = "TIME")]
    pub progressbar: Option<u64>,

    /// Stop showing the IMAGEs after TIME ms
    #[arg(short = 's', long = "stopafter", value_name = "TIME")]
    pub stop_after: Option<u64>,

    /// Show STRING on the screen
    #[arg(short = 't', long = "text", value_name = "STRING")]
    pub text: Option<String>,

    /// Terminate a running splash (when the system bus is not available)
    #[arg(short = 'x', long = "terminate")]
    pub terminate: bool,

    /// Notify the service manager once the display has been handed over
    #[arg(short = 'n', long = "systemd")]
    pub systemd: bool,

    /// Skip display cleanup at exit
    #[arg(short = 'c', long = "skip-cleanup")]
    pub skip_cleanup: bool,

    /// Read defaults from a JSON file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Abstract socket address used to hand over between instances
    #[arg(long, value_name = "NAME", hide = true)]
    pub handoff_name: Option<String>,

    /// Image file names in DIR, with or without the .png extension
    #[arg(value_name = "IMAGE")]
    pub images: Vec<String>,
}

impl Cli {
    /// The handoff address, NUL terminated like the default one.
    pub fn handoff_name(&self) -> Vec<u8> {
        match &self.handoff_name {
            Some(name) => {
                let mut address = name.clone().into_bytes();
                address.push(0);
                address
            }
            None => DEFAULT_HANDOFF_NAME.to_vec(),
        }
    }

    /// Builds the run configuration. Flags given on the command line override
    /// the config file; boolean flags can only switch a setting on.
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(ms) = self.animate {
            config.animate_ms = ms;
        }
        if let Some(dir) = self.images_dir {
            config.images_dir = dir;
        }
        if let Some(ms) = self.progressbar {
            config.progress_ms = ms;
        }
        if let Some(ms) = self.stop_after {
            config.stop_after_ms = ms;
        }
        if self.text.is_some() {
            config.text = self.text;
        }
        if !self.images.is_empty() {
            config.images = self.images;
        }
        config.notify_ready |= self.systemd;
        config.skip_cleanup |= self.skip_cleanup;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn it_should_parse_short_flags_and_images() {
        let cli = Cli::try_parse_from([
            "fbsplash", "-a", "500", "-i", "/tmp/img", "-s", "2000", "-t", "hello", "-n", "-c",
            "one", "two",
        ])
        .expect("valid arguments");
        assert_eq!(cli.animate, Some(500));
        assert_eq!(cli.stop_after, Some(2000));
        assert!(cli.systemd && cli.skip_cleanup && !cli.terminate);
        assert_eq!(cli.images, vec!["one", "two"]);

        let config = cli.into_config().expect("config");
        assert_eq!(config.images_dir, PathBuf::from("/tmp/img"));
        assert_eq!(config.text.as_deref(), Some("hello"));
        assert!(config.notify_ready);
    }

    #[test]
    fn it_should_accept_long_flags() {
        let cli = Cli::try_parse_from(["fbsplash", "--progressbar=1000", "--terminate"])
            .expect("valid arguments");
        assert_eq!(cli.progressbar, Some(1000));
        assert!(cli.terminate);
    }

    #[test]
    fn it_should_default_to_the_well_known_handoff_address() -> Result<()> {
        let cli = Cli::try_parse_from(["fbsplash", "-x"])?;
        assert_eq!(cli.handoff_name(), DEFAULT_HANDOFF_NAME);

        let cli = Cli::try_parse_from(["fbsplash", "-x", "--handoff-name", "splash-test"])?;
        assert_eq!(cli.handoff_name(), b"splash-test\0");
        Ok(())
    }

    #[test]
    fn it_should_reject_non_numeric_durations() {
        assert!(Cli::try_parse_from(["fbsplash", "-p", "soon"]).is_err());
    }

    #[test]
    fn it_should_let_the_command_line_override_the_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("splash.json");
        fs::write(
            &path,
            r#"{ "progress_ms": 3000, "stop_after_ms": 9000, "images": ["logo"] }"#,
        )?;

        let cli = Cli::try_parse_from([
            "fbsplash",
            "--config",
            path.to_str().expect("utf-8 path"),
            "-p",
            "1000",
        ])?;
        let config = cli.into_config()?;
        assert_eq!(config.progress_ms, 1000);
        assert_eq!(config.stop_after_ms, 9000);
        assert_eq!(config.images, vec!["logo".to_string()]);
        Ok(())
    }
}
