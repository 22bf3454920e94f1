//! System health checks for Compare Observer
//!
//! This module provides preflight checks to verify every configured system
//! can be watched and copied before a session starts.

use crate::config::SystemConfig;
use crate::Config;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// At least one system is configured
    pub configuration: CheckResult,
    /// Per-system checks, labelled with the system and aspect checked
    pub systems: Vec<(String, CheckResult)>,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        let mut systems = Vec::new();
        for system in &config.systems {
            systems.push((format!("{}: source", system.name), Self::check_source(system)));
            systems.push((
                format!("{}: copy targets", system.name),
                Self::check_copy_targets(system),
            ));
            systems.push((
                format!("{}: assign", system.name),
                Self::check_archive_root(system),
            ));
        }

        Self {
            configuration: Self::check_configuration(config),
            systems,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.configuration.passed && self.systems.iter().all(|(_, r)| r.passed)
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Get all checks for iteration, configuration first
    pub fn all_checks(&self) -> Vec<(&str, &CheckResult)> {
        std::iter::once(("Configuration", &self.configuration))
            .chain(self.systems.iter().map(|(name, r)| (name.as_str(), r)))
            .collect()
    }

    fn check_configuration(config: &Config) -> CheckResult {
        if config.systems.is_empty() {
            let hint = Config::default_config_path()
                .map(|p| format!("Add a system to {}", p.display()))
                .unwrap_or_else(|_| "Add a system to the configuration file".to_string());
            CheckResult::error_with_details("No systems configured", hint)
        } else {
            CheckResult::ok_with_details(
                "Systems configured",
                format!("{} system(s)", config.systems.len()),
            )
        }
    }

    /// Check the source tree exists
    fn check_source(system: &SystemConfig) -> CheckResult {
        if !system.has_source() {
            return CheckResult::warning("No source configured, system will not be watched");
        }

        let source = &system.source_root;
        if source.is_dir() {
            CheckResult::ok_with_details("Source directory exists", source.display().to_string())
        } else {
            CheckResult::error_with_details(
                "Source directory does not exist",
                source.display().to_string(),
            )
        }
    }

    /// Check a destination or git root is set (warning only)
    fn check_copy_targets(system: &SystemConfig) -> CheckResult {
        let targets: Vec<String> = [
            ("destination", &system.destination_root),
            ("git", &system.mirror_root),
            ("backup", &system.backup_root),
        ]
        .into_iter()
        .filter_map(|(label, root)| {
            root.as_ref()
                .map(|root| format!("{}: {}", label, root.display()))
        })
        .collect();

        if system.has_copy_target() {
            CheckResult::ok_with_details("Copy targets configured", targets.join("\n"))
        } else {
            CheckResult::warning_with_details(
                "No destination or git root configured",
                "Changes can be reviewed but not copied",
            )
        }
    }

    /// Check an archive root is set (warning only)
    fn check_archive_root(system: &SystemConfig) -> CheckResult {
        match &system.archive_root {
            Some(root) => CheckResult::ok_with_details("Assign root configured", root.display().to_string()),
            None => CheckResult::warning("No assign root configured, archiving is disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_result_ok() {
        let result = CheckResult::ok_with_details("Test passed", "all good");
        assert!(result.passed);
        assert!(!result.is_warning);
        assert_eq!(result.details.as_deref(), Some("all good"));
    }

    #[test]
    fn test_check_result_warning() {
        let result = CheckResult::warning("Test warning");
        assert!(result.passed); // Warnings still "pass"
        assert!(result.is_warning);
    }

    #[test]
    fn test_check_result_error_with_details() {
        let result = CheckResult::error_with_details("Test failed", "Error details");
        assert!(!result.passed);
        assert!(!result.is_warning);
        assert_eq!(result.details, Some("Error details".to_string()));
    }

    #[test]
    fn test_empty_configuration_fails() {
        let health = HealthCheck::run(&Config::default());
        assert!(!health.all_passed());
        assert_eq!(health.errors().len(), 1);
        assert_eq!(health.all_checks().len(), 1);
    }

    #[test]
    fn test_existing_source_passes_with_warnings() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.systems.push(SystemConfig::new("web", dir.path()));

        let health = HealthCheck::run(&config);

        assert!(health.all_passed());
        // No copy target and no assign root
        assert_eq!(health.warnings().len(), 2);
        assert_eq!(health.all_checks()[1].0, "web: source");
    }

    #[test]
    fn test_missing_source_is_error() {
        let mut config = Config::default();
        let mut system = SystemConfig::new("api", "/nonexistent/path/that/does/not/exist");
        system.destination_root = Some("/tmp/dest".into());
        system.archive_root = Some("/tmp/assign".into());
        config.systems.push(system);

        let health = HealthCheck::run(&config);

        assert!(!health.all_passed());
        assert_eq!(health.errors().len(), 1);
        assert!(health.warnings().is_empty());
    }

    #[test]
    fn test_unset_source_is_warning() {
        let result = HealthCheck::check_source(&SystemConfig::new("idle", ""));
        assert!(result.passed);
        assert!(result.is_warning);
    }

    #[test]
    fn test_copy_target_details_list_roots() {
        let mut system = SystemConfig::new("web", "/src");
        system.mirror_root = Some("/mirror".into());
        system.backup_root = Some("/backup".into());

        let result = HealthCheck::check_copy_targets(&system);

        assert!(result.passed);
        assert_eq!(
            result.details.as_deref(),
            Some("git: /mirror\nbackup: /backup")
        );
    }
}
