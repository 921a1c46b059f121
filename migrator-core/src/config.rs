//! Run settings, layered from defaults, environment variables, then CLI flags.

use std::path::{Path, PathBuf};

use crate::connection::ConnectionOverrides;
use crate::db::MAX_CONNECT_RETRIES;
use crate::error::{MigratorError, Result};
use crate::manifest;

/// Manifest value that asks for [`manifest::find_manifest`] instead of a fixed path.
pub const AUTO_MANIFEST: &str = "auto";

/// How databases are discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ManifestSetting {
    /// Scan Go sources.
    #[default]
    Scan,
    /// Look for a manifest in the default locations under the app root.
    Auto,
    Path(PathBuf),
}

impl ManifestSetting {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case(AUTO_MANIFEST) {
            ManifestSetting::Auto
        } else {
            ManifestSetting::Path(PathBuf::from(value))
        }
    }
}

/// Fully layered settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Infrastructure config document.
    pub config_path: Option<PathBuf>,
    /// Application root to scan.
    pub app_root: PathBuf,
    pub manifest: ManifestSetting,
    pub overrides: ConnectionOverrides,
    pub connect_retries: u32,
    pub connect_timeout_secs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: None,
            app_root: PathBuf::from("."),
            manifest: ManifestSetting::Scan,
            overrides: ConnectionOverrides::default(),
            connect_retries: 0,
            connect_timeout_secs: 30,
        }
    }
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub app: Option<PathBuf>,
    pub manifest: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connect_retries: Option<u32>,
    pub connect_timeout: Option<u32>,
}

impl Settings {
    /// Load settings with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load(overrides: &CliOverrides) -> Self {
        Self::load_with(overrides, |key| std::env::var(key).ok())
    }

    /// [`Settings::load`] with an explicit environment lookup.
    pub fn load_with<F>(overrides: &CliOverrides, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        settings.apply_env(env);
        settings.apply_cli(overrides);

        if settings.connect_retries > MAX_CONNECT_RETRIES {
            settings.connect_retries = MAX_CONNECT_RETRIES;
            tracing::warn!("connect_retries capped at {}", MAX_CONNECT_RETRIES);
        }

        settings
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.is_empty());

        if let Some(v) = var("ENCORE_MIGRATE_CONFIG") {
            self.config_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("ENCORE_MIGRATE_APP") {
            self.app_root = PathBuf::from(v);
        }
        if let Some(v) = var("ENCORE_MIGRATE_MANIFEST") {
            self.manifest = ManifestSetting::parse(&v);
        }
        if let Some(v) = var("ENCORE_MIGRATE_HOST") {
            self.overrides.host = Some(v);
        }
        if let Some(v) = var("ENCORE_MIGRATE_USER") {
            self.overrides.user = Some(v);
        }
        if let Some(v) = var("ENCORE_MIGRATE_PASSWORD") {
            self.overrides.password = Some(v);
        }
        if let Some(v) = var("ENCORE_MIGRATE_CONNECT_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                self.connect_retries = n;
            }
        }
        if let Some(v) = var("ENCORE_MIGRATE_CONNECT_TIMEOUT") {
            if let Ok(n) = v.parse::<u32>() {
                self.connect_timeout_secs = n;
            }
        }
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) {
        if let Some(ref v) = overrides.config {
            self.config_path = Some(v.clone());
        }
        if let Some(ref v) = overrides.app {
            self.app_root = v.clone();
        }
        if let Some(ref v) = overrides.manifest {
            self.manifest = ManifestSetting::parse(v);
        }
        if let Some(ref v) = overrides.host {
            self.overrides.host = Some(v.clone());
        }
        if let Some(ref v) = overrides.user {
            self.overrides.user = Some(v.clone());
        }
        if let Some(ref v) = overrides.password {
            self.overrides.password = Some(v.clone());
        }
        if let Some(v) = overrides.connect_retries {
            self.connect_retries = v;
        }
        if let Some(v) = overrides.connect_timeout {
            self.connect_timeout_secs = v;
        }
    }

    /// The infrastructure config path, required by commands that connect.
    pub fn require_config_path(&self) -> Result<&Path> {
        self.config_path.as_deref().ok_or_else(|| {
            MigratorError::ConfigError(
                "No infrastructure config given. Use --config or ENCORE_MIGRATE_CONFIG.".to_string(),
            )
        })
    }

    /// The manifest to load, if any. `Auto` fails when no default manifest exists.
    pub fn manifest_path(&self) -> Result<Option<PathBuf>> {
        match &self.manifest {
            ManifestSetting::Scan => Ok(None),
            ManifestSetting::Path(path) => Ok(Some(path.clone())),
            ManifestSetting::Auto => manifest::find_manifest(&self.app_root)
                .map(Some)
                .ok_or_else(|| {
                    MigratorError::ManifestError(format!(
                        "No manifest found under '{}' (looked for {})",
                        self.app_root.display(),
                        manifest::DEFAULT_MANIFEST_PATHS.join(", ")
                    ))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::load_with(&CliOverrides::default(), no_env);
        assert_eq!(settings.config_path, None);
        assert_eq!(settings.app_root, PathBuf::from("."));
        assert_eq!(settings.manifest, ManifestSetting::Scan);
        assert_eq!(settings.overrides, ConnectionOverrides::default());
        assert_eq!(settings.connect_retries, 0);
        assert_eq!(settings.connect_timeout_secs, 30);
        assert!(settings.require_config_path().is_err());
    }

    #[test]
    fn test_env_layer() {
        let env = |key: &str| match key {
            "ENCORE_MIGRATE_CONFIG" => Some("/etc/infra.json".to_string()),
            "ENCORE_MIGRATE_MANIFEST" => Some("AUTO".to_string()),
            "ENCORE_MIGRATE_HOST" => Some("bastion:6432".to_string()),
            "ENCORE_MIGRATE_USER" => Some(String::new()),
            "ENCORE_MIGRATE_CONNECT_RETRIES" => Some("3".to_string()),
            "ENCORE_MIGRATE_CONNECT_TIMEOUT" => Some("soon".to_string()),
            _ => None,
        };
        let settings = Settings::load_with(&CliOverrides::default(), env);
        assert_eq!(settings.require_config_path().unwrap(), Path::new("/etc/infra.json"));
        assert_eq!(settings.manifest, ManifestSetting::Auto);
        assert_eq!(settings.overrides.host.as_deref(), Some("bastion:6432"));
        assert_eq!(settings.overrides.user, None);
        assert_eq!(settings.connect_retries, 3);
        assert_eq!(settings.connect_timeout_secs, 30);
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = |key: &str| match key {
            "ENCORE_MIGRATE_APP" => Some("/from/env".to_string()),
            "ENCORE_MIGRATE_PASSWORD" => Some("env-secret".to_string()),
            _ => None,
        };
        let overrides = CliOverrides {
            app: Some(PathBuf::from("/from/cli")),
            manifest: Some("dbs.yaml".to_string()),
            password: Some("cli-secret".to_string()),
            connect_retries: Some(50),
            connect_timeout: Some(0),
            ..Default::default()
        };
        let settings = Settings::load_with(&overrides, env);
        assert_eq!(settings.app_root, PathBuf::from("/from/cli"));
        assert_eq!(settings.manifest, ManifestSetting::Path(PathBuf::from("dbs.yaml")));
        assert_eq!(settings.overrides.password.as_deref(), Some("cli-secret"));
        assert_eq!(settings.connect_retries, MAX_CONNECT_RETRIES);
        assert_eq!(settings.connect_timeout_secs, 0);
    }

    #[test]
    fn test_manifest_auto_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            app_root: dir.path().to_path_buf(),
            manifest: ManifestSetting::Auto,
            ..Default::default()
        };
        assert!(matches!(
            settings.manifest_path(),
            Err(MigratorError::ManifestError(_))
        ));

        std::fs::write(dir.path().join("encore-databases.yaml"), "").unwrap();
        assert_eq!(
            settings.manifest_path().unwrap(),
            Some(dir.path().join("encore-databases.yaml"))
        );
    }
}
