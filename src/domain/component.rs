//! Components under test and the images they produce.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A source tree the harness knows how to build or provision from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// The CNI plugin binary and its image
    CniPlugin,

    /// The node agent (calicovpp/node)
    Node,

    /// The VPP manager (calicovpp/vpp)
    VppManager,

    /// The vagrant multi-node provisioning project
    Vagrant,
}

impl Component {
    /// Components that produce an image, in build and push order
    pub const IMAGES: [Component; 3] = [Component::CniPlugin, Component::Node, Component::VppManager];

    /// Identifier used in environment variable names
    pub fn env_id(&self) -> &'static str {
        match self {
            Self::CniPlugin => "CNI_PLUGIN",
            Self::Node => "CALICOVPP",
            Self::VppManager => "VPP_MANAGER",
            Self::Vagrant => "VAGRANT",
        }
    }

    /// Key used in the config file `components:` map
    pub fn key(&self) -> &'static str {
        match self {
            Self::CniPlugin => "cni-plugin",
            Self::Node => "node",
            Self::VppManager => "vpp-manager",
            Self::Vagrant => "vagrant",
        }
    }

    /// Source path used when nothing overrides it
    pub fn default_path(&self) -> &'static str {
        match self {
            Self::CniPlugin => "../cni-plugin",
            Self::Node => "../calico-vpp",
            Self::VppManager => "../vpp-manager",
            Self::Vagrant => "../k8s-vagrant-multi-node",
        }
    }

    /// Image built from this component, if any
    pub fn image(&self) -> Option<ImageName> {
        match self {
            Self::CniPlugin => Some(ImageName::new("calico/cni:latest")),
            Self::Node => Some(ImageName::new("calicovpp/node:latest")),
            Self::VppManager => Some(ImageName::new("calicovpp/vpp:latest")),
            Self::Vagrant => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A container image reference such as `calicovpp/node:latest`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageName(String);

impl ImageName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A component with its path and branch resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentSpec {
    pub component: Component,

    /// Source tree on disk
    pub path: PathBuf,

    /// Branch to check out before building, if overridden
    pub branch: Option<String>,

    /// Image produced by the build, if any
    pub image: Option<ImageName>,
}

impl ComponentSpec {
    /// Spec using compiled defaults only
    pub fn with_defaults(component: Component) -> Self {
        Self {
            component,
            path: PathBuf::from(component.default_path()),
            branch: None,
            image: component.image(),
        }
    }
}
