//! Marketplace manifest rendering
//!
//! The manifest is YAML with top-level `version`, `services`, `profiles` and `deployment`
//! keys. All maps are ordered so the same [`DeploymentConfig`] always renders to the same
//! bytes, and therefore to the same content-addressed version.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::models::deployment::DeploymentConfig;
use crate::utils::sha256_hash;

const MANIFEST_VERSION: &str = "2.0";
const VOLUME_NAME: &str = "data";

/// Naming and pricing knobs of the rendered manifest
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub service_name: String,
    pub placement_name: String,
    pub denom: String,
    /// Maximum accepted per-block price in the smallest unit
    pub max_price: u64,
    pub storage_class: String,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            service_name: "app".to_string(),
            placement_name: "dcloud".to_string(),
            denom: "uakt".to_string(),
            max_price: 10_000,
            storage_class: "beta2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub services: BTreeMap<String, Service>,
    pub profiles: Profiles,
    pub deployment: BTreeMap<String, BTreeMap<String, DeploymentPlacement>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<Expose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ServiceParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expose {
    pub port: u16,
    #[serde(rename = "as")]
    pub as_port: u16,
    pub to: Vec<ExposeTo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposeTo {
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceParams {
    pub storage: BTreeMap<String, VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub mount: String,
    #[serde(rename = "readOnly")]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profiles {
    pub compute: BTreeMap<String, ComputeProfile>,
    pub placement: BTreeMap<String, PlacementProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeProfile {
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: CpuResource,
    pub memory: SizeResource,
    pub storage: Vec<StorageResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuResource {
    pub units: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeResource {
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<StorageAttributes>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageAttributes {
    pub persistent: bool,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementProfile {
    pub pricing: BTreeMap<String, Pricing>,
}

/// Price in a fixed-point integer amount of the smallest unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub denom: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlacement {
    pub profile: String,
    pub count: u32,
}

/// A manifest together with its YAML text and content hash
#[derive(Debug, Clone)]
pub struct RenderedManifest {
    pub manifest: Manifest,
    pub yaml: String,
    pub version: String,
}

impl Manifest {
    /// Build the manifest for a deployment request
    pub fn from_config(config: &DeploymentConfig, options: &ManifestOptions) -> Self {
        let name = options.service_name.clone();

        let env = config
            .sorted_env()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let expose = config
            .ports
            .iter()
            .map(|&port| Expose {
                port,
                as_port: port,
                to: vec![ExposeTo { global: true }],
            })
            .collect();

        let mut storage = vec![StorageResource {
            name: None,
            size: config.storage.clone(),
            attributes: None,
        }];
        let params = config.persistent.as_ref().map(|volume| {
            storage.push(StorageResource {
                name: Some(VOLUME_NAME.to_string()),
                size: volume.size.clone(),
                attributes: Some(StorageAttributes {
                    persistent: true,
                    class: options.storage_class.clone(),
                }),
            });
            ServiceParams {
                storage: BTreeMap::from([(
                    VOLUME_NAME.to_string(),
                    VolumeMount {
                        mount: volume.mount.clone(),
                        read_only: false,
                    },
                )]),
            }
        });

        let service = Service {
            image: config.image.clone(),
            env,
            expose,
            params,
        };

        let compute = ComputeProfile {
            resources: Resources {
                cpu: CpuResource { units: config.cpu },
                memory: SizeResource {
                    size: config.memory.clone(),
                },
                storage,
            },
        };

        let placement = PlacementProfile {
            pricing: BTreeMap::from([(
                name.clone(),
                Pricing {
                    denom: options.denom.clone(),
                    amount: options.max_price,
                },
            )]),
        };

        let deployment = BTreeMap::from([(
            name.clone(),
            BTreeMap::from([(
                options.placement_name.clone(),
                DeploymentPlacement {
                    profile: name.clone(),
                    count: 1,
                },
            )]),
        )]);

        Self {
            version: MANIFEST_VERSION.to_string(),
            services: BTreeMap::from([(name.clone(), service)]),
            profiles: Profiles {
                compute: BTreeMap::from([(name, compute)]),
                placement: BTreeMap::from([(options.placement_name.clone(), placement)]),
            },
            deployment,
        }
    }
}

/// Render a deployment request to manifest YAML and compute its version hash
pub fn render(config: &DeploymentConfig, options: &ManifestOptions) -> Result<RenderedManifest, AgentError> {
    let manifest = Manifest::from_config(config, options);
    let yaml = serde_yaml::to_string(&manifest)?;
    let version = sha256_hash(yaml.as_bytes());
    Ok(RenderedManifest {
        manifest,
        yaml,
        version,
    })
}
