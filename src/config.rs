use std::borrow::Cow;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "Config::default_cmd")]
    pub cmd: String,

    /// Discovery timeout for a single context, in milliseconds.
    #[serde(default = "Config::default_timeout_ms")]
    pub timeout_ms: u64,

    pub ns_alias: Option<Vec<NsAlias>>,

    #[serde(skip)]
    pub path: Option<PathBuf>,
}

/// Static namespace list for contexts matched by regex or name. Matched
/// contexts are never contacted during discovery.
#[derive(Debug, Deserialize, Clone)]
pub struct NsAlias {
    pub regex: Option<String>,

    pub names: Option<HashSet<String>>,

    pub alias: Vec<String>,

    #[serde(skip)]
    parsed_regex: Option<Regex>,
}

impl Config {
    const CONFIG_PATH_ENV: &'static str = "KUBESWITCH_CONFIG_PATH";

    const MIN_TIMEOUT_MS: u64 = 100;
    const MAX_TIMEOUT_MS: u64 = 10_000;

    pub fn load() -> Result<Config> {
        let path = Self::get_path().context("get config path")?;
        let mut cfg = match path.as_ref() {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        cfg.path = path;
        cfg.validate().context("validate config")?;
        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn match_ns_alias<S: AsRef<str>>(&self, name: S) -> Option<Vec<Cow<str>>> {
        if let Some(alias_list) = self.ns_alias.as_ref() {
            for alias in alias_list.iter() {
                if let Some(alias) = alias.match_alias(name.as_ref()) {
                    return Some(alias);
                }
            }
        }
        None
    }

    fn get_path() -> Result<Option<PathBuf>> {
        let path = match env::var_os(Self::CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => {
                let home_dir = get_home_dir()?;
                home_dir.join(".config").join("kubeswitch.toml")
            }
        };

        match fs::metadata(&path) {
            Ok(meta) => {
                if meta.is_dir() {
                    bail!(
                        "config path '{}' is a directory, require file",
                        path.display()
                    );
                }
                Ok(Some(path))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat config file '{}'", path.display())),
        }
    }

    fn read<P: AsRef<Path>>(path: P) -> Result<Config> {
        let data = fs::read(path).context("read config file")?;
        let config = String::from_utf8(data).context("decode config file as utf-8")?;
        Self::parse(&config)
    }

    pub(crate) fn parse(data: &str) -> Result<Config> {
        toml::from_str(data).context("parse config toml")
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        if self.cmd.is_empty() {
            bail!("`cmd` cannot be empty");
        }
        if !(Self::MIN_TIMEOUT_MS..=Self::MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
            bail!(
                "`timeout_ms` must be between {} and {}, found {}",
                Self::MIN_TIMEOUT_MS,
                Self::MAX_TIMEOUT_MS,
                self.timeout_ms
            );
        }

        if let Some(ns_alias) = self.ns_alias.as_mut() {
            for (idx, alias) in ns_alias.iter_mut().enumerate() {
                alias
                    .validate()
                    .with_context(|| format!("validate ns_alias index {idx}"))?;
            }
        }

        Ok(())
    }

    pub fn default() -> Config {
        Config {
            cmd: Self::default_cmd(),
            timeout_ms: Self::default_timeout_ms(),
            ns_alias: None,
            path: None,
        }
    }

    fn default_cmd() -> String {
        String::from("kubeswitch")
    }

    fn default_timeout_ms() -> u64 {
        1000
    }
}

impl NsAlias {
    fn match_alias<S: AsRef<str>>(&self, name: S) -> Option<Vec<Cow<str>>> {
        let mut is_match = false;
        if let Some(regex) = self.parsed_regex.as_ref() {
            is_match = regex.is_match(name.as_ref());
        }
        if let Some(names) = self.names.as_ref() {
            if names.contains(name.as_ref()) {
                is_match = true;
            }
        }

        if is_match {
            Some(
                self.alias
                    .iter()
                    .map(|s| Cow::Borrowed(s.as_str()))
                    .collect(),
            )
        } else {
            None
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.alias.is_empty() {
            bail!("`ns_alias.alias` cannot be empty");
        }
        for ns in self.alias.iter_mut() {
            *ns = expand_env(ns.as_str()).context("expand env for `ns_alias.alias`")?;
        }

        let mut has_regex = false;
        if let Some(regex) = self.regex.as_ref() {
            let regex =
                Regex::new(regex).with_context(|| format!("parse ns_alias regex '{regex}'"))?;
            self.parsed_regex = Some(regex);
            has_regex = true;
        }

        let mut has_names = false;
        if let Some(names) = self.names.as_ref() {
            has_names = !names.is_empty();
        }

        if !has_regex && !has_names {
            bail!("ns_alias must have at least regex or names");
        }

        Ok(())
    }
}

fn expand_env<S: AsRef<str>>(s: S) -> Result<String> {
    let s = shellexpand::full(s.as_ref())
        .with_context(|| format!("expand env for '{}'", s.as_ref()))?;
    Ok(s.to_string())
}

pub fn get_home_dir() -> Result<PathBuf> {
    match env::var_os("HOME") {
        Some(home) => Ok(PathBuf::from(home)),
        None => bail!(
            "$HOME env not found in your system, please make sure that you are in an UNIX system"
        ),
    }
}
