//! Loader settings
//!
//! Settings come from a TOML file and from `--game=<tag>`, `--aes=<key>` and
//! `--ver=<n>` arguments, later sources winning:
//!
//! ```toml
//! game = "batman2"
//! aes = "0x0123...ef"
//! ver = 576
//! startup_package = "Startup"
//! suppress = ["Sound*", "AnimSet"]
//! ```
//!
//! [`Config::resolve`] validates them into [`Settings`]; [`Settings::install`]
//! publishes the process-wide parts (AES key, forced game and version).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::{self, AesKey};
use crate::game::{self, Game, GameCatalog};
use crate::property::TypeRegistry;
use crate::{Error, Result};

/// Raw settings as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Game tag forced on every package.
    pub game: Option<String>,
    /// Container key, `0x` hex or a 32-character string.
    pub aes: Option<String>,
    /// File version forced on every package.
    pub ver: Option<i32>,
    pub startup_package: Option<String>,
    /// Class wildcards expected to be unknown.
    pub suppress: Vec<String>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid settings: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Take `--game=`, `--aes=` and `--ver=` from `args`. Anything else is
    /// returned untouched, in order.
    pub fn parse_args<I, S>(&mut self, args: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rest = Vec::new();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(tag) = arg.strip_prefix("--game=") {
                self.game = Some(tag.to_string());
            } else if let Some(key) = arg.strip_prefix("--aes=") {
                self.aes = Some(key.to_string());
            } else if let Some(ver) = arg.strip_prefix("--ver=") {
                let ver = ver
                    .parse()
                    .map_err(|_| Error::Config(format!("--ver expects a number, got '{}'", ver)))?;
                self.ver = Some(ver);
            } else {
                rest.push(arg.to_string());
            }
        }
        Ok(rest)
    }

    /// Overlay the values set in `other`.
    pub fn merge(&mut self, other: Config) {
        if other.game.is_some() {
            self.game = other.game;
        }
        if other.aes.is_some() {
            self.aes = other.aes;
        }
        if other.ver.is_some() {
            self.ver = other.ver;
        }
        if other.startup_package.is_some() {
            self.startup_package = other.startup_package;
        }
        self.suppress.extend(other.suppress);
    }

    /// Validate the game tag and key.
    pub fn resolve(&self, catalog: &GameCatalog) -> Result<Settings> {
        let game = match &self.game {
            Some(tag) => Some(
                catalog
                    .lookup_by_tag(tag)
                    .map_err(|_| Error::Config(format!("unknown game tag '{}'", tag)))?,
            ),
            None => None,
        };
        let aes_key = self.aes.as_deref().map(crypto::parse_aes_key).transpose()?;
        if let Some(ver) = self.ver {
            if !(0..=0xFFFF).contains(&ver) {
                return Err(Error::Config(format!("forced version {} out of range", ver)));
            }
        }
        Ok(Settings {
            game,
            aes_key,
            version: self.ver,
            startup_package: self.startup_package.clone(),
            suppress: self.suppress.clone(),
        })
    }
}

/// Validated settings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub game: Option<Game>,
    pub aes_key: Option<AesKey>,
    pub version: Option<i32>,
    pub startup_package: Option<String>,
    pub suppress: Vec<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("game", &self.game)
            .field("aes_key", &self.aes_key.map(|_| "<set>"))
            .field("version", &self.version)
            .field("startup_package", &self.startup_package)
            .field("suppress", &self.suppress)
            .finish()
    }
}

impl Settings {
    /// Snapshot of the process-wide values.
    pub fn current() -> Self {
        Self {
            game: game::forced_game(),
            aes_key: crypto::aes_key(),
            version: game::forced_version(),
            ..Default::default()
        }
    }

    /// Publish key, game and version for every package opened afterwards.
    pub fn install(&self) {
        crypto::set_aes_key(self.aes_key);
        game::set_forced_game(self.game);
        game::set_forced_version(self.version);
        if let Some(game) = self.game {
            tracing::info!("forcing game {:?}", game);
        }
        if let Some(version) = self.version {
            tracing::info!("forcing file version {}", version);
        }
    }

    /// Register the suppression wildcards.
    pub fn configure(&self, registry: &mut TypeRegistry) {
        for pattern in &self.suppress {
            registry.suppress(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const KEY: &str = "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            game = "batman2"
            ver = 576
            suppress = ["Sound*"]
            "#,
        )
        .unwrap();
        assert_eq!(config.game.as_deref(), Some("batman2"));
        assert_eq!(config.ver, Some(576));
        assert_eq!(config.suppress, vec!["Sound*"]);
        assert!(config.aes.is_none());

        let err = Config::from_toml("ver = \"high\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_parse_args() {
        let mut config = Config::default();
        let rest = config
            .parse_args(["--game=border", "Engine.u", "--ver=584", "--aes=secret", "-v"])
            .unwrap();
        assert_eq!(rest, vec!["Engine.u", "-v"]);
        assert_eq!(config.game.as_deref(), Some("border"));
        assert_eq!(config.ver, Some(584));
        assert_eq!(config.aes.as_deref(), Some("secret"));

        let err = config.parse_args(["--ver=abc"]).unwrap_err();
        assert!(err.to_string().contains("--ver expects a number"));
    }

    #[test]
    fn test_merge_later_wins() {
        let mut config = Config::from_toml("game = \"border\"\nstartup_package = \"Startup\"").unwrap();
        let mut args = Config::default();
        args.parse_args(["--game=batman2"]).unwrap();
        config.merge(args);
        assert_eq!(config.game.as_deref(), Some("batman2"));
        assert_eq!(config.startup_package.as_deref(), Some("Startup"));
    }

    #[test]
    fn test_resolve() {
        let catalog = GameCatalog::new();
        let config = Config {
            game: Some("BATMAN2".into()),
            aes: Some(KEY.into()),
            ver: Some(576),
            suppress: vec!["Anim*".into()],
            ..Default::default()
        };
        let settings = config.resolve(&catalog).unwrap();
        assert_eq!(settings.game, Some(Game::BATMAN2));
        assert_eq!(settings.aes_key.unwrap()[31], 0x1f);
        assert!(format!("{:?}", settings).contains("aes_key: Some(\"<set>\")"));

        let mut registry = TypeRegistry::new();
        settings.configure(&mut registry);
        assert!(registry.is_suppressed("AnimSequence"));
    }

    #[test]
    fn test_resolve_errors() {
        let catalog = GameCatalog::new();
        let bad_game = Config {
            game: Some("nope".into()),
            ..Default::default()
        };
        let err = bad_game.resolve(&catalog).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(err.to_string().contains("unknown game tag 'nope'"));

        let bad_key = Config {
            aes: Some("0x1234".into()),
            ..Default::default()
        };
        let err = bad_key.resolve(&catalog).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);

        let bad_ver = Config {
            ver: Some(-3),
            ..Default::default()
        };
        assert!(bad_ver.resolve(&catalog).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upkg.toml");
        let config = Config {
            startup_package: Some("Startup".into()),
            ..Default::default()
        };
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);

        std::fs::write(&path, "suppress = 3").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("upkg.toml"));
    }
}
