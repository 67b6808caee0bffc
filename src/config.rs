//! Configuration for the test driver.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (`CALICOVPP_TEST_<ID>_PATH`, `CALICOVPP_TEST_<ID>_BRANCH`)
//! 2. Config file (.calicovpp-e2e/config.yaml)
//! 3. Compiled defaults (sibling checkouts, no branch switch)
//!
//! Config file discovery:
//! - Searches current directory and parents for .calicovpp-e2e/config.yaml
//! - Paths in config file are relative to the directory holding .calicovpp-e2e/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::poller::PollPolicy;
use crate::domain::{Component, ComponentSpec};

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "CALICOVPP_TEST_";

/// Directory searched for in the current directory and its parents
pub const CONFIG_DIR: &str = ".calicovpp-e2e";

/// Deployment manifest of the networking stack, relative to the node tree
pub const DEFAULT_MANIFEST: &str = "etc/k8s/calico-vpp.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub components: HashMap<String, ComponentOverride>,
    #[serde(default)]
    pub tools: Option<Tools>,
    #[serde(default)]
    pub cluster: Option<ClusterSettings>,
    #[serde(default)]
    pub readiness: Option<PollPolicy>,
    pub build_target: Option<String>,
    pub manifest: Option<String>,
    pub command_timeout_seconds: Option<u64>,
    pub results_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentOverride {
    pub path: Option<String>,
    pub branch: Option<String>,
}

/// Binaries used for each external tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tools {
    #[serde(default = "default_make")]
    pub make: String,
    #[serde(default = "default_git")]
    pub git: String,
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    /// Shell used to source the provisioning env file
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_make() -> String {
    "make".to_string()
}
fn default_git() -> String {
    "git".to_string()
}
fn default_kubectl() -> String {
    "kubectl".to_string()
}
fn default_shell() -> String {
    "bash".to_string()
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            make: default_make(),
            git: default_git(),
            kubectl: default_kubectl(),
            shell: default_shell(),
        }
    }
}

/// How the provisioning project is driven
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Sourced before every make invocation in the project
    #[serde(default = "default_env_file")]
    pub env_file: String,
    #[serde(default = "default_up_target")]
    pub up_target: String,
    #[serde(default = "default_load_target")]
    pub load_target: String,
    /// Parallel jobs passed to the image load target
    #[serde(default = "default_load_jobs")]
    pub load_jobs: u32,
    /// Target run when the cluster is destroyed after a run
    #[serde(default = "default_destroy_target")]
    pub destroy_target: String,
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

fn default_env_file() -> String {
    "calicovpp.env".to_string()
}
fn default_up_target() -> String {
    "up".to_string()
}
fn default_load_target() -> String {
    "load-image".to_string()
}
fn default_load_jobs() -> u32 {
    3
}
fn default_destroy_target() -> String {
    "clean".to_string()
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            env_file: default_env_file(),
            up_target: default_up_target(),
            load_target: default_load_target(),
            load_jobs: default_load_jobs(),
            destroy_target: default_destroy_target(),
            kubeconfig: None,
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct HarnessConfig {
    pub cni_plugin: ComponentSpec,
    pub node: ComponentSpec,
    pub vpp_manager: ComponentSpec,
    pub vagrant: ComponentSpec,
    pub tools: Tools,
    pub cluster: ClusterSettings,
    pub readiness: PollPolicy,
    /// Make target producing each component's image
    pub build_target: String,
    /// Deployment manifest, relative to the node source tree unless absolute
    pub manifest: PathBuf,
    /// Upper bound on any single build/provision command
    pub command_timeout: Option<Duration>,
    pub results_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::resolve(None, |_| None)
    }
}

impl HarnessConfig {
    /// Load from the process environment and an optional config file.
    ///
    /// `explicit` wins over discovery; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let file = match config_path {
            Some(ref path) => Some((path.as_path(), load_config_file(path)?)),
            None => None,
        };

        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed config file and an environment lookup over the defaults
    pub fn resolve<F>(file: Option<(&Path, ConfigFile)>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let (config_file, base_dir, file) = match file {
            Some((path, parsed)) => (Some(path.to_path_buf()), base_dir_of(path), parsed),
            None => (None, PathBuf::from("."), ConfigFile::default()),
        };

        let spec = |component: Component| {
            resolve_component(component, file.components.get(component.key()), &base_dir, &env)
        };

        Self {
            cni_plugin: spec(Component::CniPlugin),
            node: spec(Component::Node),
            vpp_manager: spec(Component::VppManager),
            vagrant: spec(Component::Vagrant),
            tools: file.tools.clone().unwrap_or_default(),
            cluster: file.cluster.clone().unwrap_or_default(),
            readiness: file.readiness.clone().unwrap_or_default(),
            build_target: file
                .build_target
                .clone()
                .unwrap_or_else(|| "image".to_string()),
            manifest: PathBuf::from(file.manifest.as_deref().unwrap_or(DEFAULT_MANIFEST)),
            command_timeout: file.command_timeout_seconds.map(Duration::from_secs),
            results_dir: file.results_dir.as_deref().map(|d| resolve_path(&base_dir, d)),
            config_file,
        }
    }

    pub fn component(&self, component: Component) -> &ComponentSpec {
        match component {
            Component::CniPlugin => &self.cni_plugin,
            Component::Node => &self.node,
            Component::VppManager => &self.vpp_manager,
            Component::Vagrant => &self.vagrant,
        }
    }

    /// Image-producing components in build and push order
    pub fn image_components(&self) -> Vec<&ComponentSpec> {
        Component::IMAGES.iter().map(|c| self.component(*c)).collect()
    }
}

/// Environment variable overriding a component's path
pub fn path_var(component: Component) -> String {
    format!("{}{}_PATH", ENV_PREFIX, component.env_id())
}

/// Environment variable overriding a component's branch
pub fn branch_var(component: Component) -> String {
    format!("{}{}_BRANCH", ENV_PREFIX, component.env_id())
}

fn resolve_component<F>(
    component: Component,
    file: Option<&ComponentOverride>,
    base_dir: &Path,
    env: &F,
) -> ComponentSpec
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

    let path = match non_empty(env(&path_var(component))) {
        Some(path) => PathBuf::from(path),
        None => match file.and_then(|f| f.path.as_deref()) {
            Some(path) => resolve_path(base_dir, path),
            None => PathBuf::from(component.default_path()),
        },
    };

    let branch = non_empty(env(&branch_var(component)))
        .or_else(|| non_empty(file.and_then(|f| f.branch.clone())));

    ComponentSpec {
        component,
        path,
        branch,
        image: component.image(),
    }
}

/// Directory against which file paths resolve: the one holding
/// `.calicovpp-e2e/`, or the file's own directory for any other layout
fn base_dir_of(config_path: &Path) -> PathBuf {
    let parent = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return PathBuf::from("."),
    };

    if parent.file_name().map_or(false, |name| name == CONFIG_DIR) {
        return parent
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
    }
    parent.to_path_buf()
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = HarnessConfig::resolve(None, |_| None);

        assert_eq!(config.cni_plugin.path, PathBuf::from("../cni-plugin"));
        assert_eq!(config.node.path, PathBuf::from("../calico-vpp"));
        assert_eq!(config.vpp_manager.path, PathBuf::from("../vpp-manager"));
        assert_eq!(config.vagrant.path, PathBuf::from("../k8s-vagrant-multi-node"));
        assert!(config.image_components().iter().all(|c| c.branch.is_none()));
        assert_eq!(config.build_target, "image");
        assert_eq!(config.manifest, PathBuf::from(DEFAULT_MANIFEST));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_env_var_names() {
        assert_eq!(path_var(Component::CniPlugin), "CALICOVPP_TEST_CNI_PLUGIN_PATH");
        assert_eq!(branch_var(Component::Node), "CALICOVPP_TEST_CALICOVPP_BRANCH");
        assert_eq!(path_var(Component::VppManager), "CALICOVPP_TEST_VPP_MANAGER_PATH");
        assert_eq!(branch_var(Component::Vagrant), "CALICOVPP_TEST_VAGRANT_BRANCH");
    }

    #[test]
    fn test_env_overrides() {
        let env = env_from(&[
            ("CALICOVPP_TEST_CNI_PLUGIN_PATH", "/src/cni"),
            ("CALICOVPP_TEST_CNI_PLUGIN_BRANCH", "feature/ipv6"),
            ("CALICOVPP_TEST_VAGRANT_BRANCH", ""),
        ]);
        let config = HarnessConfig::resolve(None, env);

        assert_eq!(config.cni_plugin.path, PathBuf::from("/src/cni"));
        assert_eq!(config.cni_plugin.branch.as_deref(), Some("feature/ipv6"));
        // Empty values count as unset
        assert!(config.vagrant.branch.is_none());
        assert_eq!(config.node.path, PathBuf::from("../calico-vpp"));
    }

    #[test]
    fn test_config_file_parsing_and_precedence() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1"
components:
  node:
    path: checkouts/calico-vpp
    branch: release-v3.20
  vagrant:
    path: /opt/vagrant
tools:
  kubectl: /usr/local/bin/kubectl
cluster:
  load_jobs: 6
readiness:
  timeout_seconds: 60
results_dir: results
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        let env = env_from(&[("CALICOVPP_TEST_CALICOVPP_BRANCH", "master")]);
        let config = HarnessConfig::resolve(Some((config_path.as_path(), parsed)), env);

        assert_eq!(config.node.path, temp.path().join("checkouts/calico-vpp"));
        // Environment beats the file
        assert_eq!(config.node.branch.as_deref(), Some("master"));
        assert_eq!(config.vagrant.path, PathBuf::from("/opt/vagrant"));
        assert_eq!(config.tools.kubectl, "/usr/local/bin/kubectl");
        assert_eq!(config.tools.make, "make");
        assert_eq!(config.cluster.load_jobs, 6);
        assert_eq!(config.cluster.env_file, "calicovpp.env");
        assert_eq!(config.readiness.timeout_seconds, 60);
        assert_eq!(config.results_dir, Some(temp.path().join("results")));
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.yaml");
        assert!(HarnessConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_base_dir_of_config_layouts() {
        assert_eq!(
            base_dir_of(Path::new("/work/e2e/.calicovpp-e2e/config.yaml")),
            PathBuf::from("/work/e2e")
        );
        assert_eq!(base_dir_of(Path::new("/etc/ci/calicovpp.yaml")), PathBuf::from("/etc/ci"));
        assert_eq!(base_dir_of(Path::new("config.yaml")), PathBuf::from("."));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
