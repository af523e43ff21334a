use std::{
    fmt,
    fs::{create_dir_all, write},
    path::{Path, PathBuf},
    str::FromStr,
};

use miette::{IntoDiagnostic, miette};

use crate::gateway::version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Pairing,
    Qr,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown auth method {0:?}, expected \"pairing\" or \"qr\"")]
pub struct UnknownAuthMethod(String);

impl FromStr for AuthMethod {
    type Err = UnknownAuthMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pairing" => Ok(AuthMethod::Pairing),
            "qr" => Ok(AuthMethod::Qr),
            _ => Err(UnknownAuthMethod(s.to_string())),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Pairing => f.write_str("pairing"),
            AuthMethod::Qr => f.write_str("qr"),
        }
    }
}

/// Evolution API server and the webhook it reports events to.
#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Evolution {
    #[knuffel(child, unwrap(argument), default = "http://127.0.0.1:8085".to_string())]
    pub api_url: String,
    #[knuffel(child, unwrap(argument), default)]
    pub api_key: String,
    #[knuffel(child, unwrap(argument), default = "aeon".to_string())]
    pub instance: String,
    #[knuffel(child, unwrap(argument), default = 8086)]
    pub webhook_port: u16,
    #[knuffel(child, unwrap(argument), default = "http://host.docker.internal:8086/webhook".to_string())]
    pub webhook_url: String,
}

impl Default for Evolution {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8085".to_string(),
            api_key: String::new(),
            instance: "aeon".to_string(),
            webhook_port: 8086,
            webhook_url: "http://host.docker.internal:8086/webhook".to_string(),
        }
    }
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Conf {
    #[knuffel(child, unwrap(argument, str))]
    pub auth_method: AuthMethod,
    #[knuffel(child, unwrap(argument))]
    pub session_file: String,
    #[knuffel(child, unwrap(argument), default = "Bot".to_string())]
    pub bot_name: String,
    #[knuffel(child, unwrap(argument), default = "./profile".to_string())]
    pub profile_dir: String,
    /// Empty skips the lookup.
    #[knuffel(child, unwrap(argument), default = version::DEFAULT_URL.to_string())]
    pub version_url: String,
    #[knuffel(child, default)]
    pub evolution: Evolution,
}

impl Conf {
    pub fn parse(name: &str, contents: &str) -> miette::Result<Self> {
        let conf: Conf = knuffel::parse(name, contents).map_err(|e| miette!(e))?;
        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> miette::Result<()> {
        if self.session_file.trim().is_empty() {
            return Err(miette!("session-file must not be empty"));
        }
        if self.evolution.api_key.trim().is_empty() {
            return Err(miette!("evolution api-key must be set"));
        }
        if self.evolution.instance.trim().is_empty() {
            return Err(miette!("evolution instance must not be empty"));
        }
        Ok(())
    }

    fn load(path: &Path) -> miette::Result<Self> {
        let contents = match std::fs::read_to_string(path).into_diagnostic() {
            Ok(contents) => contents,
            Err(err) => {
                tracing::debug!("failed to read config from {path:?}: {err}");
                return Err(err);
            }
        };

        let config = Self::parse(
            path.file_name()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or("config.kdl"),
            &contents,
        )?;

        tracing::debug!("loaded config from {path:?}");
        Ok(config)
    }

    /// Loads the config at `path`. When it does not exist yet, writes the
    /// bundled example there and returns `None`.
    pub fn load_or_create(path: &Path) -> miette::Result<Option<Self>> {
        if !path.exists() {
            tracing::info!("config file {path:?} does not exist, creating default config");
            if let Some(parent) = path.parent() {
                create_dir_all(parent).into_diagnostic()?;
            }
            write(path, include_str!("example.kdl")).into_diagnostic()?;
            return Ok(None);
        }

        Self::load(path).map(Some)
    }

    pub fn session_dir(&self) -> PathBuf {
        PathBuf::from(&self.session_file)
    }

    pub fn profile_dir(&self) -> PathBuf {
        PathBuf::from(&self.profile_dir)
    }
}
