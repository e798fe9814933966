//! Workload descriptors.
//!
//! Only the subset of a pod spec that can reference secrets or config maps
//! is modelled here. Descriptors deserialize from the usual camelCase JSON.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{ObjectKey, WorkloadId};

/// A workload scheduled on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    /// Unique identity of the workload.
    pub uid: WorkloadId,
    /// Namespace the workload runs in. All references resolve in it.
    pub namespace: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// The workload spec.
    #[serde(default)]
    pub spec: WorkloadSpec,
}

/// The parts of a workload spec that may reference objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Volumes available to containers.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Application containers.
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Containers run to completion before the application containers.
    #[serde(default)]
    pub init_containers: Vec<Container>,
    /// Debug containers attached to a running workload.
    #[serde(default)]
    pub ephemeral_containers: Vec<Container>,
    /// Names of secrets holding registry credentials.
    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// A reference to an object in the workload's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    /// Name of the referenced object.
    pub name: String,
}

/// A named volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Where the volume's content comes from.
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// The source of a volume's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    /// Content of a secret.
    #[serde(rename_all = "camelCase")]
    Secret {
        /// Name of the secret.
        secret_name: String,
    },
    /// Content of a config map.
    ConfigMap {
        /// Name of the config map.
        name: String,
    },
    /// Several sources projected into one directory.
    Projected {
        /// The projected sources.
        sources: Vec<VolumeProjection>,
    },
    /// Scratch space, references nothing.
    EmptyDir {},
}

/// One source of a projected volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeProjection {
    /// A projected secret.
    Secret {
        /// Name of the secret.
        name: String,
    },
    /// A projected config map.
    ConfigMap {
        /// Name of the config map.
        name: String,
    },
}

/// A container of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name.
    #[serde(default)]
    pub name: String,
    /// Individual environment variables.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Bulk environment sources.
    #[serde(default)]
    pub env_from: Vec<EnvFromSource>,
}

/// An environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Literal value.
    #[serde(default)]
    pub value: Option<String>,
    /// Value taken from an object.
    #[serde(default)]
    pub value_from: Option<EnvVarSource>,
}

/// The object an environment variable takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvVarSource {
    /// A key of a secret.
    SecretKeyRef {
        /// Name of the secret.
        name: String,
        /// Key within the secret.
        key: String,
    },
    /// A key of a config map.
    ConfigMapKeyRef {
        /// Name of the config map.
        name: String,
        /// Key within the config map.
        key: String,
    },
}

/// A source of several environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvFromSource {
    /// Every key of a secret.
    SecretRef {
        /// Name of the secret.
        name: String,
    },
    /// Every key of a config map.
    ConfigMapRef {
        /// Name of the config map.
        name: String,
    },
}

impl Workload {
    /// Creates a workload with an empty spec.
    #[must_use]
    pub fn new(uid: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            uid: WorkloadId::new(uid),
            namespace: namespace.into(),
            name: String::new(),
            spec: WorkloadSpec::default(),
        }
    }

    /// Adds a secret volume.
    #[must_use]
    pub fn with_secret_volume(mut self, secret_name: impl Into<String>) -> Self {
        let secret_name = secret_name.into();
        self.spec.volumes.push(Volume {
            name: format!("{secret_name}-vol"),
            source: VolumeSource::Secret { secret_name },
        });
        self
    }

    /// Adds a config map volume.
    #[must_use]
    pub fn with_config_map_volume(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.spec.volumes.push(Volume {
            name: format!("{name}-vol"),
            source: VolumeSource::ConfigMap { name },
        });
        self
    }

    /// Adds an image pull secret.
    #[must_use]
    pub fn with_image_pull_secret(mut self, name: impl Into<String>) -> Self {
        self.spec
            .image_pull_secrets
            .push(LocalObjectReference { name: name.into() });
        self
    }

    /// Adds a container.
    #[must_use]
    pub fn with_container(mut self, container: Container) -> Self {
        self.spec.containers.push(container);
        self
    }

    /// Returns the keys of every secret the workload references.
    #[must_use]
    pub fn secret_keys(&self) -> BTreeSet<ObjectKey> {
        let mut names: Vec<&str> = Vec::new();
        for reference in &self.spec.image_pull_secrets {
            names.push(&reference.name);
        }
        for volume in &self.spec.volumes {
            match &volume.source {
                VolumeSource::Secret { secret_name } => names.push(secret_name),
                VolumeSource::Projected { sources } => {
                    for source in sources {
                        if let VolumeProjection::Secret { name } = source {
                            names.push(name);
                        }
                    }
                }
                VolumeSource::ConfigMap { .. } | VolumeSource::EmptyDir {} => {}
            }
        }
        for container in self.all_containers() {
            for source in &container.env_from {
                if let EnvFromSource::SecretRef { name } = source {
                    names.push(name);
                }
            }
            for var in &container.env {
                if let Some(EnvVarSource::SecretKeyRef { name, .. }) = &var.value_from {
                    names.push(name);
                }
            }
        }
        self.to_keys(names)
    }

    /// Returns the keys of every config map the workload references.
    #[must_use]
    pub fn config_map_keys(&self) -> BTreeSet<ObjectKey> {
        let mut names: Vec<&str> = Vec::new();
        for volume in &self.spec.volumes {
            match &volume.source {
                VolumeSource::ConfigMap { name } => names.push(name),
                VolumeSource::Projected { sources } => {
                    for source in sources {
                        if let VolumeProjection::ConfigMap { name } = source {
                            names.push(name);
                        }
                    }
                }
                VolumeSource::Secret { .. } | VolumeSource::EmptyDir {} => {}
            }
        }
        for container in self.all_containers() {
            for source in &container.env_from {
                if let EnvFromSource::ConfigMapRef { name } = source {
                    names.push(name);
                }
            }
            for var in &container.env {
                if let Some(EnvVarSource::ConfigMapKeyRef { name, .. }) = &var.value_from {
                    names.push(name);
                }
            }
        }
        self.to_keys(names)
    }

    fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.spec
            .init_containers
            .iter()
            .chain(&self.spec.containers)
            .chain(&self.spec.ephemeral_containers)
    }

    fn to_keys(&self, names: Vec<&str>) -> BTreeSet<ObjectKey> {
        names
            .into_iter()
            .filter(|name| !name.is_empty())
            .map(|name| ObjectKey::new(self.namespace.as_str(), name))
            .collect()
    }
}

impl Container {
    /// Creates a container with no environment.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds an environment variable read from a secret key.
    #[must_use]
    pub fn with_secret_env(
        mut self,
        var: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.env.push(EnvVar {
            name: var.into(),
            value: None,
            value_from: Some(EnvVarSource::SecretKeyRef {
                name: secret.into(),
                key: key.into(),
            }),
        });
        self
    }

    /// Adds every key of a secret to the environment.
    #[must_use]
    pub fn with_secret_env_from(mut self, secret: impl Into<String>) -> Self {
        self.env_from.push(EnvFromSource::SecretRef {
            name: secret.into(),
        });
        self
    }

    /// Adds every key of a config map to the environment.
    #[must_use]
    pub fn with_config_map_env_from(mut self, config_map: impl Into<String>) -> Self {
        self.env_from.push(EnvFromSource::ConfigMapRef {
            name: config_map.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn names(keys: &BTreeSet<ObjectKey>) -> Vec<&str> {
        keys.iter().map(ObjectKey::name).collect()
    }

    #[test]
    fn secret_keys_cover_every_reference_site() {
        let mut workload = Workload::new("uid-1", "ns")
            .with_secret_volume("vol-secret")
            .with_image_pull_secret("pull-secret")
            .with_container(
                Container::new("app")
                    .with_secret_env("DB_PASSWORD", "env-secret", "password")
                    .with_secret_env_from("envfrom-secret"),
            );
        workload.spec.init_containers.push(
            Container::new("init").with_secret_env("TOKEN", "init-secret", "token"),
        );
        workload
            .spec
            .ephemeral_containers
            .push(Container::new("debug").with_secret_env_from("debug-secret"));
        workload.spec.volumes.push(Volume {
            name: "projected".to_string(),
            source: VolumeSource::Projected {
                sources: vec![
                    VolumeProjection::Secret {
                        name: "projected-secret".to_string(),
                    },
                    VolumeProjection::ConfigMap {
                        name: "projected-cm".to_string(),
                    },
                ],
            },
        });

        let keys = workload.secret_keys();
        assert_eq!(
            names(&keys),
            vec![
                "debug-secret",
                "env-secret",
                "envfrom-secret",
                "init-secret",
                "projected-secret",
                "pull-secret",
                "vol-secret",
            ]
        );
        assert!(keys.iter().all(|k| k.namespace() == "ns"));
    }

    #[test]
    fn config_map_keys_ignore_secrets() {
        let workload = Workload::new("uid-1", "ns")
            .with_secret_volume("a-secret")
            .with_config_map_volume("settings")
            .with_container(Container::new("app").with_config_map_env_from("env-settings"));

        assert_eq!(names(&workload.config_map_keys()), vec!["env-settings", "settings"]);
        assert_eq!(names(&workload.secret_keys()), vec!["a-secret"]);
    }

    #[test]
    fn duplicate_references_collapse() {
        let workload = Workload::new("uid-1", "ns")
            .with_secret_volume("shared")
            .with_image_pull_secret("shared")
            .with_container(Container::new("app").with_secret_env("X", "shared", "x"));

        assert_eq!(workload.secret_keys().len(), 1);
    }

    #[test_case("" ; "empty name")]
    fn empty_names_are_skipped(name: &str) {
        let workload = Workload::new("uid-1", "ns").with_image_pull_secret(name);
        assert!(workload.secret_keys().is_empty());
    }

    #[test]
    fn workload_without_references_has_no_keys() {
        let mut workload = Workload::new("uid-1", "ns");
        workload.spec.volumes.push(Volume {
            name: "scratch".to_string(),
            source: VolumeSource::EmptyDir {},
        });
        assert!(workload.secret_keys().is_empty());
        assert!(workload.config_map_keys().is_empty());
    }

    #[test]
    fn deserializes_camel_case_descriptor() {
        let json = r#"{
            "uid": "4c1d",
            "namespace": "payments",
            "name": "api-7f9c",
            "spec": {
                "volumes": [
                    { "name": "creds", "secret": { "secretName": "db-cred" } },
                    { "name": "cfg", "configMap": { "name": "api-config" } },
                    { "name": "tmp", "emptyDir": {} }
                ],
                "containers": [{
                    "name": "api",
                    "env": [
                        { "name": "MODE", "value": "prod" },
                        { "name": "KEY", "valueFrom": { "secretKeyRef": { "name": "api-key", "key": "key" } } }
                    ],
                    "envFrom": [ { "configMapRef": { "name": "shared-env" } } ]
                }],
                "imagePullSecrets": [ { "name": "registry" } ]
            }
        }"#;

        let workload: Workload = serde_json::from_str(json).expect("deserialize");
        assert_eq!(workload.uid.as_str(), "4c1d");
        assert_eq!(
            names(&workload.secret_keys()),
            vec!["api-key", "db-cred", "registry"]
        );
        assert_eq!(
            names(&workload.config_map_keys()),
            vec!["api-config", "shared-env"]
        );
    }
}
