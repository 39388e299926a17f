//! Process flags and site settings.
//!
//! Flags come from the command line. Site settings come from an optional
//! TOML file named by `--config`; every key has a default, so the file may
//! be absent or partial.
//!
//! ```toml
//! [site]
//! root = "/public/index"
//! restart_path = "/upgrade"
//! header_read_timeout_secs = 10
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::Error;

/// Paths the binary serves itself, besides the action routes.
pub const RESERVED_PATHS: [&str; 3] = ["/", "/healthz", "/readyz"];

/// Command-line flags.
#[derive(Clone, Debug, Parser)]
#[command(name = "baton", version, about = "Controller/action HTTP server with zero-downtime restarts")]
pub struct Cli {
    /// What port to listen on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Log every transaction.
    #[arg(long)]
    pub verbose: bool,

    /// Site settings file (TOML).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serve on the listening socket inherited at descriptor 3 instead of
    /// binding. Set only by a running instance when it starts its successor.
    #[arg(long, hide = true)]
    pub inherit: bool,
}

impl Cli {
    /// Flags for a successor: the same settings, plus `--inherit`.
    pub fn successor_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--port".into(), self.port.to_string().into()];
        if self.verbose {
            args.push("--verbose".into());
        }
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.clone().into_os_string());
        }
        args.push("--inherit".into());
        args
    }

    /// The default log directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

/// Settings file contents.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub site: Site,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Site {
    /// Action path served at `/` instead of its own path.
    pub root: Option<String>,
    /// Path of the administrative restart endpoint.
    pub restart_path: String,
    pub header_read_timeout_secs: u64,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            root: Some("/public/index".into()),
            restart_path: "/upgrade".into(),
            header_read_timeout_secs: 10,
        }
    }
}

impl Site {
    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_secs(self.header_read_timeout_secs)
    }
}

impl Settings {
    /// Loads `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::parse(&raw).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        let settings: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), Error> {
        let restart_path = self.site.restart_path.as_str();
        if !restart_path.starts_with('/') {
            return Err(Error::Config("site.restart_path must start with `/`".into()));
        }
        if restart_path.contains(['{', '}', '*', '?', '#']) {
            return Err(Error::Config(format!(
                "site.restart_path `{restart_path}` must be a literal path"
            )));
        }
        if RESERVED_PATHS.contains(&restart_path) || self.site.root.as_deref() == Some(restart_path) {
            return Err(Error::Config(format!(
                "site.restart_path `{restart_path}` is already served by another route"
            )));
        }
        if self.site.root.as_deref().is_some_and(|root| !root.starts_with('/')) {
            return Err(Error::Config("site.root must start with `/`".into()));
        }
        if self.site.header_read_timeout_secs == 0 {
            return Err(Error::Config("site.header_read_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.site.root.as_deref(), Some("/public/index"));
        assert_eq!(settings.site.restart_path, "/upgrade");
        assert_eq!(settings.site.header_read_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = Settings::parse("[site]\nrestart_path = \"/internal/restart\"\n").unwrap();
        assert_eq!(settings.site.restart_path, "/internal/restart");
        assert_eq!(settings.site.root.as_deref(), Some("/public/index"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(Settings::parse("[site]\nrestart_path = \"upgrade\"\n").is_err());
        assert!(Settings::parse("[site]\nheader_read_timeout_secs = 0\n").is_err());
        assert!(Settings::parse("[site]\nunknown = 1\n").is_err());
        assert!(Settings::parse("[site\n").is_err());
    }

    #[test]
    fn restart_path_cannot_shadow_other_routes() {
        for path in ["/healthz", "/readyz", "/", "/public/index", "/{controller}", "/up*"] {
            let raw = format!("[site]\nrestart_path = \"{path}\"\n");
            assert!(matches!(Settings::parse(&raw), Err(Error::Config(_))), "{path}");
        }

        let moved = "[site]\nroot = \"/public/star-map\"\nrestart_path = \"/public/index\"\n";
        assert!(Settings::parse(moved).is_ok());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[site]\nroot = \"/public/star-map\"").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.site.root.as_deref(), Some("/public/star-map"));

        let missing = Settings::load(Some(Path::new("/nonexistent/baton.toml")));
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn successor_repeats_the_flags() {
        let cli = Cli::parse_from(["baton", "--port", "9000", "--verbose", "--config", "site.toml"]);
        assert!(!cli.inherit);

        let args = cli.successor_args();
        assert_eq!(args, ["--port", "9000", "--verbose", "--config", "site.toml", "--inherit"]);

        let successor = Cli::parse_from(std::iter::once(OsString::from("baton")).chain(args));
        assert!(successor.inherit);
        assert_eq!(successor.port, 9000);
        assert!(successor.verbose);
    }
}
