//! Language configuration for compilation, execution and isolation

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;

/// Configuration for a supported programming language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Name of the source file (e.g., "main.cpp")
    pub source_file: String,
    /// Compile command template (None if not needed)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Whether this language can plausibly run in a browser tier
    pub can_run_in_browser: bool,
    /// Time limit multiplier and bonus: (multiplier, bonus_seconds)
    /// actual_time = base_time * multiplier + bonus
    pub time_limit: Option<(u32, u32)>,
    /// Memory limit multiplier and bonus: (multiplier, bonus_mb)
    /// actual_memory = base_memory * multiplier + bonus
    pub memory_limit: Option<(u32, u32)>,
    /// Syscalls the runtime is allowed to make; everything else is denied
    pub allowed_syscalls: Vec<String>,
}

impl LanguageConfig {
    pub fn requires_compilation(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Calculate actual time limit in milliseconds from the problem's base limit
    pub fn calculate_time_limit(&self, base_time_ms: u32) -> u32 {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => base_time_ms * multiplier + bonus_seconds * 1000,
            None => base_time_ms,
        }
    }

    /// Calculate actual memory limit in bytes from the problem's base limit
    pub fn calculate_memory_limit(&self, base_memory_bytes: u64) -> u64 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => {
                base_memory_bytes * multiplier as u64 + bonus_mb as u64 * 1024 * 1024
            }
            None => base_memory_bytes,
        }
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    can_run_in_browser: bool,
    #[serde(default)]
    time_limit: Vec<String>,
    #[serde(default)]
    memory_limit: Vec<String>,
    #[serde(default)]
    allowed_syscalls: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Global language configurations
static LANGUAGES: OnceLock<HashMap<String, LanguageConfig>> = OnceLock::new();

/// Initialize language configurations from a TOML file
pub fn init_languages(path: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read language config at {}", path))?;
    init_languages_from_str(&content)
}

/// Initialize language configurations from TOML content.
///
/// Repeated initialization is a no-op, so tests can call this freely.
pub fn init_languages_from_str(content: &str) -> anyhow::Result<()> {
    let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

    let mut languages = HashMap::new();

    for (name, raw) in raw_configs {
        let parse_limit =
            |raw_limit: Vec<String>, kind: &str| -> anyhow::Result<Option<(u32, u32)>> {
                if raw_limit.is_empty() {
                    return Ok(None);
                }
                if raw_limit.len() != 2 {
                    anyhow::bail!("Invalid {} limit for {}: {:?}", kind, name, raw_limit);
                }
                let multiplier = raw_limit[0].parse::<u32>().with_context(|| {
                    format!("Invalid {} multiplier for {}: {}", kind, name, raw_limit[0])
                })?;
                let offset = raw_limit[1].parse::<u32>().with_context(|| {
                    format!("Invalid {} offset for {}: {}", kind, name, raw_limit[1])
                })?;
                Ok(Some((multiplier, offset)))
            };

        let config = LanguageConfig {
            source_file: raw.source_file,
            compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
            run_command: into_command(&raw.run_command),
            can_run_in_browser: raw.can_run_in_browser,
            time_limit: parse_limit(raw.time_limit, "time")?,
            memory_limit: parse_limit(raw.memory_limit, "memory")?,
            allowed_syscalls: raw.allowed_syscalls,
        };

        // Add main language name
        languages.insert(name.to_lowercase(), config.clone());

        // Add aliases
        for alias in raw.aliases {
            languages.insert(alias.to_lowercase(), config.clone());
        }
    }

    let _ = LANGUAGES.set(languages);
    Ok(())
}

/// Get language configuration by language name
pub fn get_language_config(language: &str) -> Option<LanguageConfig> {
    LANGUAGES.get()?.get(&language.to_lowercase()).cloned()
}

/// Get all supported language names
pub fn get_supported_languages() -> Vec<String> {
    LANGUAGES
        .get()
        .map(|langs| langs.keys().cloned().collect())
        .unwrap_or_default()
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

/// Built-in language table used when no config file is provided
pub const DEFAULT_LANGUAGES: &str = include_str!("../files/languages.toml");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_table() {
        let raw: HashMap<String, RawLanguageConfig> = toml::from_str(DEFAULT_LANGUAGES).unwrap();
        assert!(raw.contains_key("python"));
        assert!(raw.contains_key("cpp"));
        assert!(raw["python"].aliases.contains(&"py".to_string()));
        assert!(raw["cpp"].compile_command.is_some());
    }

    #[test]
    fn test_limit_adjustment() {
        let config = LanguageConfig {
            source_file: "main.py".into(),
            compile_command: None,
            run_command: vec!["python3".into(), "main.py".into()],
            can_run_in_browser: true,
            time_limit: Some((3, 2)),
            memory_limit: Some((2, 32)),
            allowed_syscalls: vec![],
        };
        assert_eq!(config.calculate_time_limit(1000), 5000);
        assert_eq!(
            config.calculate_memory_limit(64 * 1024 * 1024),
            160 * 1024 * 1024
        );
        assert!(!config.requires_compilation());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        init_languages_from_str(DEFAULT_LANGUAGES).unwrap();
        assert!(get_language_config("Python").is_some());
        assert!(get_language_config("PY").is_some());
        assert!(get_language_config("fortran").is_none());
    }
}
