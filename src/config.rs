use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::record::Record;

/// Default sync client executable.
pub const DEFAULT_CLIENT: &str = "nextcloudcmd";

/// Environment variable overriding the `client` setting.
pub const CLIENT_ENV: &str = "SYNCTICK_CLIENT";

const KNOWN_KEYS: &[&str] = &[
    "local_dir",
    "remote_url",
    "user",
    "password",
    "password_file",
    "netrc",
    "unsynced_folders",
    "dav_path",
    "exclude",
    "client",
    "state_dir",
    "timeout",
];

/// Where the sync client gets its credentials from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// User and password passed on the command line. `source` is set when
    /// the password was read from a `password_file`.
    Password {
        user: String,
        password: String,
        source: Option<PathBuf>,
    },
    /// The client reads the caller's netrc file.
    Netrc { path: PathBuf },
}

impl Credentials {
    /// The file credentials come from when they are not embedded in the config.
    pub fn external_source(&self) -> Option<&Path> {
        match self {
            Credentials::Password { source, .. } => source.as_deref(),
            Credentials::Netrc { path } => Some(path),
        }
    }
}

/// Process environment consulted while loading a config.
#[derive(Debug, Clone, Default)]
pub struct ConfigEnv {
    pub home: Option<PathBuf>,
    pub client_override: Option<String>,
}

impl ConfigEnv {
    pub fn from_process() -> Self {
        Self {
            home: dirs::home_dir(),
            client_override: std::env::var(CLIENT_ENV).ok().filter(|v| !v.trim().is_empty()),
        }
    }
}

/// One managed target directory and how to sync it.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub config_file: PathBuf,
    pub local_dir: PathBuf,
    pub remote_url: String,
    pub credentials: Credentials,
    pub unsynced_folders: Option<PathBuf>,
    pub dav_path: Option<String>,
    pub exclude: Option<PathBuf>,
    pub client: String,
    pub state_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, &ConfigEnv::from_process())
    }

    pub fn load_with(path: &Path, env: &ConfigEnv) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let record = Record::parse(&text).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_record(path, &record, env)
    }

    fn from_record(path: &Path, record: &Record, env: &ConfigEnv) -> Result<Self, ConfigError> {
        if let Some(unknown) = record.keys().find(|k| !KNOWN_KEYS.contains(k)) {
            return Err(ConfigError::UnknownField(unknown.to_string()));
        }

        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let resolve = |value: &str| -> PathBuf {
            let p = PathBuf::from(value);
            if p.is_absolute() { p } else { base.join(p) }
        };
        let required = |field: &'static str| {
            record
                .get(field)
                .ok_or(ConfigError::MissingField { field })
        };

        let local_dir = resolve(required("local_dir")?);
        if !local_dir.is_dir() {
            return Err(ConfigError::BadLocalDir(local_dir));
        }
        let remote_url = required("remote_url")?.to_string();

        let credentials = Self::credentials(record, env, &resolve)?;

        let unsynced_folders = record
            .get("unsynced_folders")
            .map(|v| readable("unsynced_folders", resolve(v)))
            .transpose()?;
        let exclude = record
            .get("exclude")
            .map(|v| readable("exclude", resolve(v)))
            .transpose()?;

        let timeout = match record.get("timeout") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "timeout",
                        value: raw.to_string(),
                    });
                }
            },
            None => None,
        };

        let client = env
            .client_override
            .clone()
            .or_else(|| record.get("client").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CLIENT.to_string());

        let state_dir = match record.get("state_dir") {
            Some(dir) => resolve(dir),
            None => base.clone(),
        };

        Ok(Self {
            config_file: path.to_path_buf(),
            local_dir,
            remote_url,
            credentials,
            unsynced_folders,
            dav_path: record.get("dav_path").map(str::to_string),
            exclude,
            client,
            state_dir,
            timeout,
        })
    }

    fn credentials(
        record: &Record,
        env: &ConfigEnv,
        resolve: &dyn Fn(&str) -> PathBuf,
    ) -> Result<Credentials, ConfigError> {
        let netrc = match record.get("netrc") {
            None => false,
            Some(v) => parse_bool(v).ok_or_else(|| ConfigError::InvalidValue {
                field: "netrc",
                value: v.to_string(),
            })?,
        };
        let user = record.get("user");
        let password = record.get("password");
        let password_file = record.get("password_file");

        if netrc {
            if user.is_some() || password.is_some() || password_file.is_some() {
                return Err(ConfigError::Conflict(
                    "`netrc` cannot be combined with `user`, `password` or `password_file`".into(),
                ));
            }
            let home = env.home.clone().ok_or(ConfigError::MissingField { field: "netrc" })?;
            let path = readable("netrc", home.join(".netrc"))?;
            return Ok(Credentials::Netrc { path });
        }

        let user = user.ok_or(ConfigError::MissingField { field: "user" })?;
        match (password, password_file) {
            (Some(_), Some(_)) => Err(ConfigError::Conflict(
                "`password` and `password_file` are mutually exclusive".into(),
            )),
            (Some(password), None) => Ok(Credentials::Password {
                user: user.to_string(),
                password: password.to_string(),
                source: None,
            }),
            (None, Some(file)) => {
                let path = resolve(file);
                let content = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::UnreadableReference {
                        field: "password_file",
                        path: path.clone(),
                        source,
                    }
                })?;
                let password = content.lines().next().unwrap_or("").trim().to_string();
                if password.is_empty() {
                    return Err(ConfigError::MissingField {
                        field: "password_file",
                    });
                }
                Ok(Credentials::Password {
                    user: user.to_string(),
                    password,
                    source: Some(path),
                })
            }
            (None, None) => Err(ConfigError::MissingField { field: "password" }),
        }
    }

    /// Newest modification time, in epoch seconds, of the config file and
    /// the external credential source if there is one.
    pub fn fingerprint(&self) -> Result<i64, ConfigError> {
        let mut newest = mtime_epoch("config", &self.config_file)?;
        if let Some(source) = self.credentials.external_source() {
            newest = newest.max(mtime_epoch("credentials", source)?);
        }
        Ok(newest)
    }

    /// Arguments for the sync client, in order.
    pub fn client_args(&self) -> Vec<String> {
        self.build_args(false)
    }

    /// Client command line with the password masked, for display.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.client.clone()];
        parts.extend(self.build_args(true));
        parts.join(" ")
    }

    fn build_args(&self, mask: bool) -> Vec<String> {
        let mut args = vec!["--non-interactive".to_string()];
        match &self.credentials {
            Credentials::Password { user, password, .. } => {
                args.push("-u".into());
                args.push(user.clone());
                args.push("-p".into());
                args.push(if mask { "********".into() } else { password.clone() });
            }
            Credentials::Netrc { .. } => args.push("-n".into()),
        }
        if let Some(file) = &self.unsynced_folders {
            args.push("--unsyncedfolders".into());
            args.push(file.display().to_string());
        }
        if let Some(dav) = &self.dav_path {
            args.push("--davpath".into());
            args.push(dav.clone());
        }
        if let Some(file) = &self.exclude {
            args.push("--exclude".into());
            args.push(file.display().to_string());
        }
        args.push(self.local_dir.display().to_string());
        args.push(self.remote_url.clone());
        args
    }

    /// Endpoint and scoping settings, as shown in the output log header.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let mut lines = vec![
            ("local", self.local_dir.display().to_string()),
            ("remote", self.remote_url.clone()),
        ];
        if let Some(file) = &self.unsynced_folders {
            lines.push(("unsynced folders", file.display().to_string()));
        }
        if let Some(dav) = &self.dav_path {
            lines.push(("dav path", dav.clone()));
        }
        if let Some(file) = &self.exclude {
            lines.push(("exclude", file.display().to_string()));
        }
        lines
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn readable(field: &'static str, path: PathBuf) -> Result<PathBuf, ConfigError> {
    match std::fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(source) => Err(ConfigError::UnreadableReference {
            field,
            path,
            source,
        }),
    }
}

fn mtime_epoch(field: &'static str, path: &Path) -> Result<i64, ConfigError> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| ConfigError::UnreadableReference {
            field,
            path: path.to_path_buf(),
            source,
        })?;
    let secs = match modified.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    Ok(secs)
}
