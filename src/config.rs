use crate::{
    error::{Result, SiftError},
    pool::WorkerPool,
    types::IgnoreFilters,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Credential profile used for the initial session.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Role assumed to enumerate organization accounts; empty means
    /// single-account mode.
    #[serde(default)]
    pub organization_role: String,
    /// Role assumed inside each member account.
    #[serde(default)]
    pub scanner_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// DEBUG, INFO, WARN, or ERROR.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Empty means all enabled regions.
    #[serde(default)]
    pub regions: Vec<String>,
    /// Scanner argument names; empty means all.
    #[serde(default)]
    pub scanners: Vec<String>,
    /// "filesystem" or "s3".
    #[serde(default = "default_output")]
    pub output: String,
    /// "json" or "html".
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub bucket_region: String,
    #[serde(default = "default_days_unused")]
    pub days_unused: i64,
    #[serde(default)]
    pub ignore: IgnoreFilters,
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_max_workers() -> usize {
    WorkerPool::default_size()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_output() -> String {
    "filesystem".to_string()
}

fn default_output_format() -> String {
    "json".to_string()
}

fn default_days_unused() -> i64 {
    crate::types::DEFAULT_DAYS_UNUSED
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            organization_role: String::new(),
            scanner_role: String::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            scanners: Vec::new(),
            output: default_output(),
            output_format: default_output_format(),
            bucket: String::new(),
            bucket_region: String::new(),
            days_unused: default_days_unused(),
            ignore: IgnoreFilters::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aws: AwsConfig::default(),
            app: AppConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

/// Command-line overlay. Flags rank above built-in defaults but below the
/// config file and environment.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub regions: Option<Vec<String>>,
    pub scanners: Option<Vec<String>>,
    pub days_unused: Option<i64>,
    pub max_workers: Option<usize>,
    pub output: Option<String>,
    pub output_format: Option<String>,
}

/// Where each parameter's effective value came from, for the startup
/// diagnostics log.
pub type ParameterSources = BTreeMap<&'static str, &'static str>;

impl Config {
    /// Layer the configuration. Precedence, highest first: environment
    /// variables (`CLOUDSIFT_` prefix), config file, command-line flags,
    /// built-in defaults.
    pub fn load(
        explicit_path: Option<&Path>,
        flags: &FlagOverrides,
    ) -> Result<(Self, ParameterSources)> {
        let mut config = Config::default();
        let mut sources = ParameterSources::new();

        config.apply_flags(flags, &mut sources);

        if let Some(path) = find_config_file(explicit_path) {
            let content = std::fs::read_to_string(&path)?;
            let file: FileConfig = serde_yaml::from_str(&content)?;
            info!(path = %path.display(), "Loaded configuration file");
            config.apply_file(file, &mut sources);
        }

        config.apply_env(&mut sources);
        config.validate()?;
        Ok((config, sources))
    }

    /// One line per parameter whose value did not come from the defaults.
    pub fn log_parameter_sources(sources: &ParameterSources) {
        for (parameter, source) in sources {
            info!(parameter, source, "Configuration parameter");
        }
    }

    fn apply_flags(&mut self, flags: &FlagOverrides, sources: &mut ParameterSources) {
        if let Some(regions) = &flags.regions {
            self.scan.regions = regions.clone();
            sources.insert("scan.regions", "flag");
        }
        if let Some(scanners) = &flags.scanners {
            self.scan.scanners = scanners.clone();
            sources.insert("scan.scanners", "flag");
        }
        if let Some(days) = flags.days_unused {
            self.scan.days_unused = days;
            sources.insert("scan.days_unused", "flag");
        }
        if let Some(workers) = flags.max_workers {
            self.app.max_workers = workers;
            sources.insert("app.max_workers", "flag");
        }
        if let Some(output) = &flags.output {
            self.scan.output = output.clone();
            sources.insert("scan.output", "flag");
        }
        if let Some(format) = &flags.output_format {
            self.scan.output_format = format.clone();
            sources.insert("scan.output_format", "flag");
        }
    }

    fn apply_file(&mut self, file: FileConfig, sources: &mut ParameterSources) {
        if let Some(aws) = file.aws {
            apply_field(&mut self.aws.profile, aws.profile, "aws.profile", sources);
            apply_field(
                &mut self.aws.organization_role,
                aws.organization_role,
                "aws.organization_role",
                sources,
            );
            apply_field(
                &mut self.aws.scanner_role,
                aws.scanner_role,
                "aws.scanner_role",
                sources,
            );
        }
        if let Some(app) = file.app {
            apply_field(
                &mut self.app.max_workers,
                app.max_workers,
                "app.max_workers",
                sources,
            );
            apply_field(
                &mut self.app.log_format,
                app.log_format,
                "app.log_format",
                sources,
            );
            apply_field(
                &mut self.app.log_level,
                app.log_level,
                "app.log_level",
                sources,
            );
        }
        if let Some(scan) = file.scan {
            apply_field(&mut self.scan.regions, scan.regions, "scan.regions", sources);
            apply_field(
                &mut self.scan.scanners,
                scan.scanners,
                "scan.scanners",
                sources,
            );
            apply_field(&mut self.scan.output, scan.output, "scan.output", sources);
            apply_field(
                &mut self.scan.output_format,
                scan.output_format,
                "scan.output_format",
                sources,
            );
            apply_field(&mut self.scan.bucket, scan.bucket, "scan.bucket", sources);
            apply_field(
                &mut self.scan.bucket_region,
                scan.bucket_region,
                "scan.bucket_region",
                sources,
            );
            apply_field(
                &mut self.scan.days_unused,
                scan.days_unused,
                "scan.days_unused",
                sources,
            );
            apply_field(&mut self.scan.ignore, scan.ignore, "scan.ignore", sources);
        }
    }

    fn apply_env(&mut self, sources: &mut ParameterSources) {
        env_string("CLOUDSIFT_AWS_PROFILE", &mut self.aws.profile, "aws.profile", sources);
        env_string(
            "CLOUDSIFT_AWS_ORGANIZATION_ROLE",
            &mut self.aws.organization_role,
            "aws.organization_role",
            sources,
        );
        env_string(
            "CLOUDSIFT_AWS_SCANNER_ROLE",
            &mut self.aws.scanner_role,
            "aws.scanner_role",
            sources,
        );
        if let Ok(value) = std::env::var("CLOUDSIFT_APP_MAX_WORKERS") {
            if let Ok(workers) = value.parse() {
                self.app.max_workers = workers;
                sources.insert("app.max_workers", "env");
            }
        }
        env_string(
            "CLOUDSIFT_APP_LOG_FORMAT",
            &mut self.app.log_format,
            "app.log_format",
            sources,
        );
        env_string(
            "CLOUDSIFT_APP_LOG_LEVEL",
            &mut self.app.log_level,
            "app.log_level",
            sources,
        );
        env_list(
            "CLOUDSIFT_SCAN_REGIONS",
            &mut self.scan.regions,
            "scan.regions",
            sources,
        );
        env_list(
            "CLOUDSIFT_SCAN_SCANNERS",
            &mut self.scan.scanners,
            "scan.scanners",
            sources,
        );
        env_string("CLOUDSIFT_SCAN_OUTPUT", &mut self.scan.output, "scan.output", sources);
        env_string(
            "CLOUDSIFT_SCAN_OUTPUT_FORMAT",
            &mut self.scan.output_format,
            "scan.output_format",
            sources,
        );
        env_string("CLOUDSIFT_SCAN_BUCKET", &mut self.scan.bucket, "scan.bucket", sources);
        env_string(
            "CLOUDSIFT_SCAN_BUCKET_REGION",
            &mut self.scan.bucket_region,
            "scan.bucket_region",
            sources,
        );
        if let Ok(value) = std::env::var("CLOUDSIFT_SCAN_DAYS_UNUSED") {
            if let Ok(days) = value.parse() {
                self.scan.days_unused = days;
                sources.insert("scan.days_unused", "env");
            }
        }
        env_list(
            "CLOUDSIFT_SCAN_IGNORE_RESOURCE_IDS",
            &mut self.scan.ignore.resource_ids,
            "scan.ignore.resource_ids",
            sources,
        );
        env_list(
            "CLOUDSIFT_SCAN_IGNORE_RESOURCE_NAMES",
            &mut self.scan.ignore.resource_names,
            "scan.ignore.resource_names",
            sources,
        );
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.scan.output.as_str(), "filesystem" | "s3") {
            return Err(SiftError::Config(format!(
                "scan.output must be 'filesystem' or 's3', got '{}'",
                self.scan.output
            )));
        }
        if !matches!(self.scan.output_format.as_str(), "json" | "html") {
            return Err(SiftError::Config(format!(
                "scan.output_format must be 'json' or 'html', got '{}'",
                self.scan.output_format
            )));
        }
        if self.scan.output == "s3"
            && (self.scan.bucket.is_empty() || self.scan.bucket_region.is_empty())
        {
            return Err(SiftError::Config(
                "scan.bucket and scan.bucket_region are required when scan.output is 's3'"
                    .to_string(),
            ));
        }
        if !matches!(self.app.log_format.as_str(), "text" | "json") {
            return Err(SiftError::Config(format!(
                "app.log_format must be 'text' or 'json', got '{}'",
                self.app.log_format
            )));
        }
        if !matches!(
            self.app.log_level.as_str(),
            "DEBUG" | "INFO" | "WARN" | "ERROR"
        ) {
            return Err(SiftError::Config(format!(
                "app.log_level must be one of DEBUG, INFO, WARN, ERROR, got '{}'",
                self.app.log_level
            )));
        }
        if self.scan.days_unused < 1 {
            return Err(SiftError::Config(
                "scan.days_unused must be at least 1".to_string(),
            ));
        }
        if self.app.max_workers < 1 {
            return Err(SiftError::Config(
                "app.max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn apply_field<T>(
    target: &mut T,
    value: Option<T>,
    name: &'static str,
    sources: &mut ParameterSources,
) {
    if let Some(value) = value {
        *target = value;
        sources.insert(name, "file");
    }
}

fn env_string(
    var: &str,
    target: &mut String,
    name: &'static str,
    sources: &mut ParameterSources,
) {
    if let Ok(value) = std::env::var(var) {
        *target = value;
        sources.insert(name, "env");
    }
}

fn env_list(
    var: &str,
    target: &mut Vec<String>,
    name: &'static str,
    sources: &mut ParameterSources,
) {
    if let Ok(value) = std::env::var(var) {
        *target = value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        sources.insert(name, "env");
    }
}

/// Search order: explicit path, `./config.yaml`,
/// `$HOME/.cloudsift/config.yaml`, `/etc/cloudsift/config.yaml`.
fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let mut candidates = vec![PathBuf::from("config.yaml")];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".cloudsift").join("config.yaml"));
    }
    candidates.push(PathBuf::from("/etc/cloudsift/config.yaml"));
    candidates.into_iter().find(|path| path.exists())
}

/// File-shaped mirror of `Config` with every field optional, so absent
/// keys never clobber values set by lower layers.
#[derive(Debug, Deserialize)]
struct FileConfig {
    aws: Option<FileAwsConfig>,
    app: Option<FileAppConfig>,
    scan: Option<FileScanConfig>,
}

#[derive(Debug, Deserialize)]
struct FileAwsConfig {
    profile: Option<String>,
    organization_role: Option<String>,
    scanner_role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileAppConfig {
    max_workers: Option<usize>,
    log_format: Option<String>,
    log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileScanConfig {
    regions: Option<Vec<String>>,
    scanners: Option<Vec<String>>,
    output: Option<String>,
    output_format: Option<String>,
    bucket: Option<String>,
    bucket_region: Option<String>,
    days_unused: Option<i64>,
    ignore: Option<IgnoreFilters>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.aws.profile, "default");
        assert_eq!(config.scan.days_unused, 90);
        assert_eq!(config.scan.output, "filesystem");
        assert_eq!(config.scan.output_format, "json");
        assert!(config.scan.regions.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn file_overrides_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "scan:\n  days_unused: 30\n").unwrap();

        let flags = FlagOverrides {
            days_unused: Some(60),
            ..Default::default()
        };
        let (config, sources) = Config::load(Some(&path), &flags).unwrap();
        assert_eq!(config.scan.days_unused, 30);
        assert_eq!(sources.get("scan.days_unused"), Some(&"file"));
    }

    #[test]
    fn flags_override_defaults_when_file_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "app:\n  log_level: DEBUG\n").unwrap();

        let flags = FlagOverrides {
            regions: Some(vec!["us-east-1".to_string()]),
            ..Default::default()
        };
        let (config, sources) = Config::load(Some(&path), &flags).unwrap();
        assert_eq!(config.scan.regions, vec!["us-east-1".to_string()]);
        assert_eq!(config.app.log_level, "DEBUG");
        assert_eq!(sources.get("scan.regions"), Some(&"flag"));
        assert_eq!(sources.get("app.log_level"), Some(&"file"));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "aws:\n  profile: from-file\n").unwrap();

        std::env::set_var("CLOUDSIFT_AWS_PROFILE", "from-env");
        let (config, sources) = Config::load(Some(&path), &FlagOverrides::default()).unwrap();
        std::env::remove_var("CLOUDSIFT_AWS_PROFILE");

        assert_eq!(config.aws.profile, "from-env");
        assert_eq!(sources.get("aws.profile"), Some(&"env"));
    }

    #[test]
    fn s3_output_requires_a_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "scan:\n  output: s3\n").unwrap();

        let err = Config::load(Some(&path), &FlagOverrides::default()).unwrap_err();
        assert!(matches!(err, SiftError::Config(_)));
    }

    #[test]
    fn unknown_output_format_is_rejected() {
        let mut config = Config::default();
        config.scan.output_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn ignore_lists_parse_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            concat!(
                "scan:\n",
                "  ignore:\n",
                "    resource_ids:\n",
                "      - vol-123\n",
                "    tags:\n",
                "      Environment: production\n",
            ),
        )
        .unwrap();

        let (config, _) = Config::load(Some(&path), &FlagOverrides::default()).unwrap();
        assert_eq!(config.scan.ignore.resource_ids, vec!["vol-123".to_string()]);
        assert_eq!(
            config.scan.ignore.tags.get("Environment"),
            Some(&"production".to_string())
        );
    }
}
