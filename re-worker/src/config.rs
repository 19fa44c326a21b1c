//! Parses the worker's TOML configuration file (spec §6).
//!
//! Grounded on `examples/original_source/src/bbworker/config.py`'s
//! `pydantic` settings model: the same section layout
//! (`buildbarn`, `platform`, `worker_id`, `filesystem`,
//! `build_directory_builder`, `build_root`, `concurrency`) translated
//! onto TOML's native `[section] key = value` tables, the way the
//! teacher's own KAS/YAML loader maps a nested document onto a struct.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::de::{self, Visitor};
use serde::Deserialize;

use crate::error::Error;

/// A byte count accepted either as a bare TOML integer or as a string
/// with an optional `K`/`M`/`G` suffix and an optional trailing
/// `b`/`B`, case-insensitive (spec §6 "Size strings").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeBytes(pub u64);

impl<'de> Deserialize<'de> for SizeBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SizeVisitor;

        impl Visitor<'_> for SizeVisitor {
            type Value = SizeBytes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer or a size string like \"10Gb\"")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(SizeBytes(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(v)
                    .map(SizeBytes)
                    .map_err(|_| de::Error::custom("size must not be negative"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                parse_size(v).map(SizeBytes).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

/// Parse a size string: an optional `K`/`M`/`G` multiplier with an
/// optional trailing `b`/`B`, case-insensitive, or a plain integer.
///
/// # Errors
///
/// Returns an error description if `s` isn't a recognized size string.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }
    let mut chars = s.chars();
    let Some(unit) = chars.next_back() else {
        return Err(format!("empty size string {s:?}"));
    };
    let (rest, unit) = if unit.eq_ignore_ascii_case(&'b') {
        let mut rest = chars.as_str();
        let Some(multiplier) = rest.chars().next_back() else {
            return Err(format!("empty size string {s:?}"));
        };
        rest = &rest[..rest.len() - multiplier.len_utf8()];
        (rest, multiplier)
    } else {
        (chars.as_str(), unit)
    };
    let multiplier = match unit.to_ascii_uppercase() {
        'K' => 1024u64,
        'M' => 1024 * 1024,
        'G' => 1024 * 1024 * 1024,
        _ => return Err(format!("unrecognized size suffix in {s:?}")),
    };
    let n: u64 = rest
        .trim()
        .parse()
        .map_err(|_| format!("unrecognized size string {s:?}"))?;
    Ok(n * multiplier)
}

/// `[buildbarn]`: upstream endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildbarnConfig {
    /// Content-addressed store endpoint.
    pub cas_address: String,
    /// Scheduler endpoint.
    pub scheduler_address: String,
}

/// A single advertised platform property.
#[derive(Debug, Clone, Deserialize)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

/// `[platform]`: opaque to the core, passed through to the scheduler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Platform {
    /// Advertised properties.
    #[serde(default)]
    pub properties: Vec<Property>,
}

/// `[filesystem]`: the blob cache (file layer, spec §4.4).
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    /// Blob cache root path.
    pub cache_root: String,
    /// Blob cache byte bound; 0 disables.
    #[serde(default)]
    pub max_cache_size_bytes: SizeBytes,
    /// Blob cache worker threads.
    #[serde(default = "default_filesystem_concurrency")]
    pub concurrency: usize,
    /// Batch/stream transport threshold.
    #[serde(default = "default_download_batch_size_bytes")]
    pub download_batch_size_bytes: SizeBytes,
}

fn default_filesystem_concurrency() -> usize {
    10
}

fn default_download_batch_size_bytes() -> SizeBytes {
    SizeBytes(3 * 1024 * 1024)
}

/// `[build_directory_builder]`: the directory tree cache (spec §4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct BuildDirectoryBuilderConfig {
    /// Tree cache root path.
    pub cache_root: String,
    /// Tree cache byte bound; 0 disables.
    #[serde(default)]
    pub max_cache_size_bytes: SizeBytes,
    /// Tree cache worker threads.
    #[serde(default = "default_filesystem_concurrency")]
    pub concurrency: usize,
}

/// The worker's full parsed configuration (spec §6 table).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Upstream endpoints.
    pub buildbarn: BuildbarnConfig,
    /// Advertised platform properties.
    #[serde(default)]
    pub platform: Platform,
    /// String map advertised to the scheduler.
    #[serde(default)]
    pub worker_id: HashMap<String, String>,
    /// Blob cache configuration.
    pub filesystem: FilesystemConfig,
    /// Tree cache configuration.
    pub build_directory_builder: BuildDirectoryBuilderConfig,
    /// Parent directory for per-thread action build dirs.
    pub build_root: String,
    /// Number of action worker threads.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl Config {
    /// Read and parse a configuration file from `path`.
    ///
    /// Unknown keys are ignored (matching the teacher's tolerant KAS
    /// parsing style); a missing or malformed file is a hard failure,
    /// per spec §6's non-zero exit code on config-parse failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigRead`] if the file can't be read, or
    /// [`Error::ConfigParse`] if it isn't valid TOML for this shape.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.display().to_string(),
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_bare_integer() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
    }

    #[test]
    fn parse_size_accepts_every_unit_with_and_without_b() {
        assert_eq!(parse_size("10K").unwrap(), 10 * 1024);
        assert_eq!(parse_size("10Kb").unwrap(), 10 * 1024);
        assert_eq!(parse_size("10KB").unwrap(), 10 * 1024);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("2mb").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1Gb").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_is_case_insensitive_on_the_multiplier() {
        assert_eq!(parse_size("1g").unwrap(), parse_size("1G").unwrap());
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("ten megabytes").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn load_parses_a_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(
            &path,
            r#"
            build_root = "/tmp/build"

            [buildbarn]
            cas_address = "http://cas.example:8980"
            scheduler_address = "http://scheduler.example:8981"

            [platform]
            properties = [{ name = "os", value = "linux" }]

            [worker_id]
            id = "worker-1"

            [filesystem]
            cache_root = "/var/cache/blobs"
            max_cache_size_bytes = "10Gb"

            [build_directory_builder]
            cache_root = "/var/cache/trees"
            max_cache_size_bytes = "4G"
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.buildbarn.cas_address, "http://cas.example:8980");
        assert_eq!(config.filesystem.max_cache_size_bytes.0, 10 * 1024 * 1024 * 1024);
        assert_eq!(config.build_directory_builder.max_cache_size_bytes.0, 4 * 1024 * 1024 * 1024);
        assert_eq!(config.filesystem.concurrency, 10);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.worker_id.get("id"), Some(&"worker-1".to_string()));
    }

    #[test]
    fn load_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nonexistent.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn load_fails_on_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }
}
