use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{
    ConverterConfig, DEFAULT_CONFIG_FILENAME, DEFAULT_OUTPUT_DIR, load_config,
};
use crate::filesystem::normalize_path;
use crate::source::DEFAULT_SYSTEM_AUTHOR;

pub const ENV_CONFIG: &str = "TRAC2MOIN_CONFIG";
pub const ENV_TRAC: &str = "TRAC2MOIN_TRAC";
pub const ENV_OUTPUT: &str = "TRAC2MOIN_OUTPUT";
pub const ENV_PREFIX: &str = "TRAC2MOIN_PREFIX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

/// Values given on the command line; they win over env and config.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub config: Option<PathBuf>,
    pub trac: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub namemap: Option<PathBuf>,
    pub usermap: Option<PathBuf>,
    pub prefix: Option<String>,
    pub inline_fixups: bool,
    pub exclude_author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixupIdentity {
    pub author: String,
    pub comment: String,
    pub address: String,
}

/// Every setting a run needs, resolved once and then passed around read-only.
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub config_path: PathBuf,
    pub config_loaded: bool,
    pub trac_root: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub namemap_path: Option<PathBuf>,
    pub usermap_path: Option<PathBuf>,
    pub prefix: String,
    pub inline_fixups: bool,
    pub exclude_author: String,
    pub fixup: FixupIdentity,
    pub config_source: ValueSource,
    pub trac_source: ValueSource,
    pub output_source: ValueSource,
    pub prefix_source: ValueSource,
}

impl ResolvedRun {
    pub fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({}, {})\ntrac_root={} ({})\noutput_dir={} ({})\nnamemap={}\nusermap={}\nprefix={:?} ({})\ninline_fixups={}\nexclude_author={}\nfixup_author={}\nfixup_address={}",
            normalize_path(&self.config_path),
            self.config_source.as_str(),
            if self.config_loaded { "loaded" } else { "absent" },
            self.trac_root
                .as_deref()
                .map(normalize_path)
                .unwrap_or_else(|| "<unset>".to_string()),
            self.trac_source.as_str(),
            normalize_path(&self.output_dir),
            self.output_source.as_str(),
            display_optional(self.namemap_path.as_deref()),
            display_optional(self.usermap_path.as_deref()),
            self.prefix,
            self.prefix_source.as_str(),
            self.inline_fixups,
            self.exclude_author,
            self.fixup.author,
            self.fixup.address,
        )
    }
}

pub fn resolve_run(context: &ResolutionContext, overrides: &RunOverrides) -> Result<ResolvedRun> {
    resolve_run_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_run_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &RunOverrides,
    lookup_env: F,
) -> Result<ResolvedRun>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup(ENV_CONFIG) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (context.cwd.join(DEFAULT_CONFIG_FILENAME), ValueSource::Default)
    };
    if config_source != ValueSource::Default && !config_path.exists() {
        bail!("config file not found: {}", normalize_path(&config_path));
    }
    let config_loaded = config_path.exists();
    let config: ConverterConfig = load_config(&config_path)?;
    let migration = &config.migration;

    let (trac_root, trac_source) = if let Some(path) = overrides.trac.as_deref() {
        (Some(absolutize(path, &context.cwd)), ValueSource::Flag)
    } else if let Some(value) = lookup(ENV_TRAC) {
        (
            Some(absolutize(Path::new(&value), &context.cwd)),
            ValueSource::Env,
        )
    } else if let Some(path) = migration.trac.as_deref() {
        (Some(absolutize(path, &context.cwd)), ValueSource::Config)
    } else {
        (None, ValueSource::Default)
    };

    let (output_dir, output_source) = if let Some(path) = overrides.output.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup(ENV_OUTPUT) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else if let Some(path) = migration.output.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Config)
    } else {
        (context.cwd.join(DEFAULT_OUTPUT_DIR), ValueSource::Default)
    };

    let (prefix, prefix_source) = if let Some(prefix) = overrides.prefix.as_deref() {
        (prefix.to_string(), ValueSource::Flag)
    } else if let Some(value) = lookup_env(ENV_PREFIX) {
        (value, ValueSource::Env)
    } else if let Some(prefix) = migration.prefix.as_deref() {
        (prefix.to_string(), ValueSource::Config)
    } else {
        (String::new(), ValueSource::Default)
    };

    let namemap_path = overrides
        .namemap
        .as_deref()
        .or(migration.namemap.as_deref())
        .map(|path| absolutize(path, &context.cwd));
    let usermap_path = overrides
        .usermap
        .as_deref()
        .or(migration.usermap.as_deref())
        .map(|path| absolutize(path, &context.cwd));

    let exclude_author = overrides
        .exclude_author
        .clone()
        .or_else(|| migration.exclude_author.clone())
        .unwrap_or_else(|| DEFAULT_SYSTEM_AUTHOR.to_string());

    Ok(ResolvedRun {
        config_path,
        config_loaded,
        trac_root,
        output_dir,
        namemap_path,
        usermap_path,
        prefix,
        inline_fixups: overrides.inline_fixups || migration.inline_fixups.unwrap_or(false),
        exclude_author,
        fixup: FixupIdentity {
            author: config.fixup.author().to_string(),
            comment: config.fixup.comment().to_string(),
            address: config.fixup.address().to_string(),
        },
        config_source,
        trac_source,
        output_source,
        prefix_source,
    })
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn display_optional(path: Option<&Path>) -> String {
    path.map(normalize_path)
        .unwrap_or_else(|| "<none>".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::config::{DEFAULT_FIXUP_ADDRESS, DEFAULT_FIXUP_COMMENT};

    fn resolve_with_env(
        cwd: &Path,
        overrides: &RunOverrides,
        env: &[(&str, &str)],
    ) -> Result<ResolvedRun> {
        let env: BTreeMap<String, String> = env
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        resolve_run_with_lookup(
            &ResolutionContext {
                cwd: cwd.to_path_buf(),
            },
            overrides,
            |key| env.get(key).cloned(),
        )
    }

    #[test]
    fn defaults_without_config_or_env() {
        let temp = tempdir().expect("tempdir");
        let run = resolve_with_env(temp.path(), &RunOverrides::default(), &[]).expect("resolve");

        assert!(!run.config_loaded);
        assert_eq!(run.config_source, ValueSource::Default);
        assert!(run.trac_root.is_none());
        assert_eq!(run.output_dir, temp.path().join("moin"));
        assert_eq!(run.output_source, ValueSource::Default);
        assert_eq!(run.prefix, "");
        assert!(!run.inline_fixups);
        assert_eq!(run.exclude_author, "trac");
        assert_eq!(run.fixup.comment, DEFAULT_FIXUP_COMMENT);
        assert_eq!(run.fixup.address, DEFAULT_FIXUP_ADDRESS);
    }

    #[test]
    fn flag_beats_env_beats_config() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join("trac2moin.toml"),
            "[migration]\ntrac = \"from-config\"\noutput = \"config-out\"\nprefix = \"Config/\"\ninline_fixups = true\nnamemap = \"names.txt\"\n",
        )
        .expect("write config");

        let run = resolve_with_env(temp.path(), &RunOverrides::default(), &[]).expect("resolve");
        assert!(run.config_loaded);
        assert_eq!(run.trac_root, Some(temp.path().join("from-config")));
        assert_eq!(run.trac_source, ValueSource::Config);
        assert_eq!(run.prefix, "Config/");
        assert!(run.inline_fixups);
        assert_eq!(run.namemap_path, Some(temp.path().join("names.txt")));

        let run = resolve_with_env(
            temp.path(),
            &RunOverrides::default(),
            &[(ENV_TRAC, "/env/trac"), (ENV_PREFIX, "Env/")],
        )
        .expect("resolve");
        assert_eq!(run.trac_root, Some(PathBuf::from("/env/trac")));
        assert_eq!(run.trac_source, ValueSource::Env);
        assert_eq!(run.prefix, "Env/");
        assert_eq!(run.output_dir, temp.path().join("config-out"));

        let run = resolve_with_env(
            temp.path(),
            &RunOverrides {
                trac: Some(PathBuf::from("flag-trac")),
                output: Some(PathBuf::from("/flag/out")),
                prefix: Some(String::new()),
                ..RunOverrides::default()
            },
            &[(ENV_TRAC, "/env/trac"), (ENV_OUTPUT, "/env/out")],
        )
        .expect("resolve");
        assert_eq!(run.trac_root, Some(temp.path().join("flag-trac")));
        assert_eq!(run.trac_source, ValueSource::Flag);
        assert_eq!(run.output_dir, PathBuf::from("/flag/out"));
        assert_eq!(run.prefix, "");
        assert_eq!(run.prefix_source, ValueSource::Flag);
    }

    #[test]
    fn explicit_config_must_exist() {
        let temp = tempdir().expect("tempdir");
        let error = resolve_with_env(
            temp.path(),
            &RunOverrides {
                config: Some(PathBuf::from("missing.toml")),
                ..RunOverrides::default()
            },
            &[],
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("config file not found"));
    }

    #[test]
    fn diagnostics_report_sources() {
        let temp = tempdir().expect("tempdir");
        let run = resolve_with_env(
            temp.path(),
            &RunOverrides {
                trac: Some(PathBuf::from("/srv/trac")),
                ..RunOverrides::default()
            },
            &[],
        )
        .expect("resolve");
        let diagnostics = run.diagnostics();
        assert!(diagnostics.contains("trac_root=/srv/trac (flag)"));
        assert!(diagnostics.contains("namemap=<none>"));
    }
}
