use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::store::DEFAULT_TABLE;

pub const RC_ENV_VAR: &str =
  "TASKDECKRC";
pub const STORE_KEY_ENV_VAR: &str =
  "TASKDECK_STORE_KEY";
const RC_FILE_NAME: &str =
  ".taskdeckrc";
const DEFAULT_DATA_DIR: &str =
  ".taskdeck";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const DEFAULTS: &[(&str, &str)] = &[
  ("data.location", "~/.taskdeck"),
  ("store.table", DEFAULT_TABLE),
  ("store.timeout", "30"),
  ("auth.username", "admin"),
  ("color", "on"),
  ("report.dir", ".")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the rc file found
  /// via `rc_override`, `$TASKDECKRC`
  /// or `~/.taskdeckrc`.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_rc_path(rc_override)?
    {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.load_file(&path)?;
      }
      | None => {
        warn!(
          "no rc file found; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  /// Applies `key=value` pairs from
  /// the command line. A leading `rc.`
  /// is accepted and dropped.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn set(
    &mut self,
    key: impl Into<String>,
    value: impl Into<String>
  ) {
    self
      .map
      .insert(key.into(), value.into());
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn color_enabled(&self) -> bool {
    self
      .get_bool("color")
      .unwrap_or(true)
  }

  pub fn store_url(
    &self
  ) -> anyhow::Result<String> {
    self
      .get("store.url")
      .map(|url| {
        url
          .trim()
          .trim_end_matches('/')
          .to_string()
      })
      .filter(|url| !url.is_empty())
      .ok_or_else(|| {
        anyhow!(
          "store.url is not configured \
           (set it in ~/.taskdeckrc or \
           pass --rc store.url=...)"
        )
      })
  }

  /// `store.key`, falling back to
  /// `$TASKDECK_STORE_KEY`.
  pub fn store_key(
    &self
  ) -> anyhow::Result<String> {
    self
      .get("store.key")
      .filter(|key| {
        !key.trim().is_empty()
      })
      .or_else(|| {
        std::env::var(STORE_KEY_ENV_VAR)
          .ok()
          .filter(|key| {
            !key.trim().is_empty()
          })
      })
      .ok_or_else(|| {
        anyhow!(
          "store.key is not configured \
           and {STORE_KEY_ENV_VAR} is \
           unset"
        )
      })
  }

  pub fn store_table(&self) -> String {
    self
      .get("store.table")
      .filter(|t| !t.trim().is_empty())
      .unwrap_or_else(|| {
        DEFAULT_TABLE.to_string()
      })
  }

  pub fn store_timeout(
    &self
  ) -> anyhow::Result<Duration> {
    let Some(raw) =
      self.get("store.timeout")
    else {
      return Ok(Duration::from_secs(
        DEFAULT_TIMEOUT_SECS
      ));
    };
    let secs = raw
      .trim()
      .parse::<u64>()
      .with_context(|| {
        format!(
          "store.timeout must be a \
           whole number of seconds, \
           got '{raw}'"
        )
      })?;
    Ok(Duration::from_secs(secs))
  }

  pub fn report_dir(&self) -> PathBuf {
    expand_tilde(Path::new(
      &self
        .get("report.dir")
        .unwrap_or_else(|| {
          ".".to_string()
        })
    ))
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line = strip_comment(raw_line);
      if line.is_empty() {
        continue;
      }

      if let Some(rest) =
        line.strip_prefix("include ")
      {
        let include =
          resolve_include_path(
            &base_dir,
            rest.trim()
          )?;
        if include.exists() {
          debug!(include = %include.display(), line = idx + 1, "following include");
          self.load_file(&include)?;
        } else {
          warn!(include = %include.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            idx + 1,
            raw_line
          )
        })?;
      let key = k.trim().to_string();
      trace!(key = %key, "loaded config key");
      self
        .map
        .insert(key, v.trim().to_string());
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      match cfg.get("data.location") {
        | Some(value) => {
          expand_tilde(Path::new(&value))
        }
        | None => home_dir()?
          .join(DEFAULT_DATA_DIR)
      }
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(from_env) =
    std::env::var(RC_ENV_VAR)
  {
    if from_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      from_env
    )));
  }

  let candidate =
    home_dir()?.join(RC_FILE_NAME);
  Ok(candidate.exists().then_some(candidate))
}

fn home_dir() -> anyhow::Result<PathBuf> {
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home directory"
    )
  })
}

fn strip_comment(raw: &str) -> &str {
  match raw.split_once('#') {
    | Some((before, _)) => before.trim(),
    | None => raw.trim()
  }
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub(crate) fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
