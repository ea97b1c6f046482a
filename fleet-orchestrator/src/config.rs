use std::path::{Path, PathBuf};

use fleet_common::{ClusterDefaults, ClusterEntry, MachineTemplate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported file format for {} (expected .toml or .json)", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("cluster entry for {} has a negative node count ({nodes})", .machine.display())]
    NegativeNodeCount { machine: PathBuf, nodes: i64 },

    #[error("machine {} references a missing cloud-config file {}", .machine.display(), .cloud_config.display())]
    MissingCloudConfig {
        machine: PathBuf,
        cloud_config: PathBuf,
    },

    #[error("invalid value for {name}: {value:?}")]
    InvalidSetting { name: &'static str, value: String },
}

/// Overlay cluster defaults onto every unset resolvable field of `template`.
///
/// A field is unset when it is `None` or holds its zero value (an empty string or an empty
/// list). Any other value is left untouched. Applying the same defaults twice changes nothing.
pub fn resolve(template: &MachineTemplate, defaults: &ClusterDefaults) -> MachineTemplate {
    let mut resolved = template.clone();
    fill(&mut resolved.image_id, &defaults.image_id);
    fill(&mut resolved.region, &defaults.region);
    fill(&mut resolved.key_name, &defaults.key_name);
    fill(&mut resolved.security_groups, &defaults.security_groups);
    fill(&mut resolved.subnet_id, &defaults.subnet_id);
    fill(&mut resolved.availability_zone, &defaults.availability_zone);
    resolved
}

fn fill<T: Clone + ZeroValue>(field: &mut Option<T>, default: &Option<T>) {
    if field.as_ref().map_or(true, ZeroValue::is_zero) {
        field.clone_from(default);
    }
}

trait ZeroValue {
    fn is_zero(&self) -> bool;
}

impl ZeroValue for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> ZeroValue for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// A cluster file after its machine files have been loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Fleet {
    pub defaults: ClusterDefaults,
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Deserialize)]
struct ClusterFile {
    #[serde(default)]
    defaults: ClusterDefaults,
    #[serde(default)]
    clusters: Vec<ClusterFileEntry>,
}

#[derive(Debug, Deserialize)]
struct ClusterFileEntry {
    machine: PathBuf,
    nodes: i64,
}

/// Load a cluster file and every machine file it references. Machine paths are relative
/// to the cluster file.
pub fn load_cluster_file(path: &Path) -> Result<Fleet, ConfigError> {
    let file: ClusterFile = read_structured(path)?;
    let base = parent_dir(path);

    let mut clusters = Vec::with_capacity(file.clusters.len());
    for entry in file.clusters {
        let machine_path = base.join(&entry.machine);
        if entry.nodes < 0 {
            return Err(ConfigError::NegativeNodeCount {
                machine: machine_path,
                nodes: entry.nodes,
            });
        }
        let nodes = u32::try_from(entry.nodes).map_err(|_| ConfigError::Parse {
            path: path.to_path_buf(),
            message: format!("node count {} is too large", entry.nodes),
        })?;
        clusters.push(ClusterEntry {
            machine: load_machine_file(&machine_path)?,
            nodes,
        });
    }

    Ok(Fleet {
        defaults: file.defaults,
        clusters,
    })
}

/// Load one machine template. A relative cloud-config path is resolved against the
/// machine file's directory and must exist.
pub fn load_machine_file(path: &Path) -> Result<MachineTemplate, ConfigError> {
    let mut template: MachineTemplate = read_structured(path)?;

    if let Some(cloud_config) = template.cloud_config.take() {
        let resolved = if cloud_config.is_relative() {
            parent_dir(path).join(cloud_config)
        } else {
            cloud_config
        };
        if !resolved.is_file() {
            return Err(ConfigError::MissingCloudConfig {
                machine: path.to_path_buf(),
                cloud_config: resolved,
            });
        }
        template.cloud_config = Some(resolved);
    }

    Ok(template)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Format::Toml,
        Some("json") => Format::Json,
        _ => {
            return Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match format {
        Format::Toml => toml::from_str(&raw).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(&raw).map_err(|e| parse_error(e.to_string())),
    }
}

enum Format {
    Toml,
    Json,
}
