//! Kubernetes object access
//!
//! `KubeObjects` is the narrow surface the services need: secrets, config
//! maps and custom resources addressed by group/version/kind. The live
//! implementation wraps a `kube::Client`; `KubeClientFactory` builds one for
//! the controller's own cluster or for any registered target cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::{Client, Config};
use std::sync::Arc;
use tracing::debug;

use crate::domain::deployment_config::{DEFAULT_CLUSTER_ID, DEFAULT_CLUSTER_URL};
use crate::domain::legacy::Cluster;
use crate::error::KubernetesError;

/// Namespaced object operations used by credential distribution and Flux dispatch
#[async_trait]
pub trait KubeObjects: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, KubernetesError>;
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubernetesError>;
    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubernetesError>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, KubernetesError>;
    async fn update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, KubernetesError>;

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, KubernetesError>;
    async fn create_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, KubernetesError>;
    async fn replace_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, KubernetesError>;
    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), KubernetesError>;
}

/// Map a kube error for `kind/name` onto the error taxonomy
pub fn map_kube_error(kind: &str, name: &str, namespace: &str, err: kube::Error) -> KubernetesError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => KubernetesError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            KubernetesError::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => KubernetesError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => KubernetesError::Api(other.to_string()),
    }
}

fn object_name<T: kube::Resource>(object: &T) -> String {
    object.meta().name.clone().unwrap_or_default()
}

/// `KubeObjects` over a live API server
#[derive(Clone)]
pub struct LiveKubeObjects {
    client: Client,
}

impl LiveKubeObjects {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, gvk: &GroupVersionKind, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(gvk);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

#[async_trait]
impl KubeObjects for LiveKubeObjects {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, KubernetesError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| map_kube_error("Secret", name, namespace, e))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubernetesError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| map_kube_error("Secret", &object_name(secret), namespace, e))
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, KubernetesError> {
        let name = object_name(secret);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| map_kube_error("Secret", &name, namespace, e))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, KubernetesError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| map_kube_error("ConfigMap", name, namespace, e))
    }

    async fn update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, KubernetesError> {
        let name = object_name(config_map);
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&name, &PostParams::default(), config_map)
            .await
            .map_err(|e| map_kube_error("ConfigMap", &name, namespace, e))
    }

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, KubernetesError> {
        self.dynamic(gvk, namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(&gvk.kind, name, namespace, e))
    }

    async fn create_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, KubernetesError> {
        debug!("Creating {} {}/{}", gvk.kind, namespace, object_name(object));
        self.dynamic(gvk, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error(&gvk.kind, &object_name(object), namespace, e))
    }

    async fn replace_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, KubernetesError> {
        let name = object_name(object);
        debug!("Replacing {} {}/{}", gvk.kind, namespace, name);
        self.dynamic(gvk, namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error(&gvk.kind, &name, namespace, e))
    }

    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), KubernetesError> {
        self.dynamic(gvk, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(&gvk.kind, name, namespace, e))
    }
}

/// Whether `cluster` is the cluster the control plane runs in
pub fn is_local_cluster(cluster: &Cluster) -> bool {
    cluster.id == DEFAULT_CLUSTER_ID || cluster.server_url == DEFAULT_CLUSTER_URL
}

/// Single-context kubeconfig for a registered cluster
pub fn kubeconfig_yaml(cluster: &Cluster) -> Result<String, KubernetesError> {
    let doc = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": cluster.name,
            "cluster": {
                "server": cluster.server_url,
                "insecure-skip-tls-verify": cluster.insecure_skip_tls_verify,
            }
        }],
        "users": [{
            "name": cluster.name,
            "user": { "token": cluster.bearer_token }
        }],
        "contexts": [{
            "name": cluster.name,
            "context": { "cluster": cluster.name, "user": cluster.name }
        }],
        "current-context": cluster.name,
    });
    serde_yaml::to_string(&doc).map_err(|e| KubernetesError::Api(e.to_string()))
}

/// Builds API clients for the controller's cluster and for target clusters
#[derive(Debug, Clone, Default)]
pub struct KubeClientFactory;

impl KubeClientFactory {
    /// Client for the cluster this process runs against (kubeconfig or in-cluster)
    pub async fn controller_client(&self) -> Result<Client, KubernetesError> {
        let config = Config::infer()
            .await
            .map_err(|e| KubernetesError::Api(format!("Failed to infer kubeconfig: {}", e)))?;
        Client::try_from(config)
            .map_err(|e| KubernetesError::Api(format!("Failed to create Kubernetes client: {}", e)))
    }

    /// Client for a registered cluster, authenticated with its bearer token
    pub async fn cluster_client(&self, cluster: &Cluster) -> Result<Client, KubernetesError> {
        if is_local_cluster(cluster) {
            return self.controller_client().await;
        }
        let yaml = kubeconfig_yaml(cluster)?;
        let kubeconfig = Kubeconfig::from_yaml(&yaml)
            .map_err(|e| KubernetesError::Api(format!("invalid kubeconfig for {}: {}", cluster.name, e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| KubernetesError::Api(format!("Failed to load kubeconfig for {}: {}", cluster.name, e)))?;
        Client::try_from(config)
            .map_err(|e| KubernetesError::Api(format!("Failed to create client for {}: {}", cluster.name, e)))
    }

}

/// Hands out `KubeObjects` for the controller's cluster or a target cluster
#[async_trait]
pub trait KubeObjectsProvider: Send + Sync {
    async fn objects_for(&self, cluster: &Cluster) -> Result<Arc<dyn KubeObjects>, KubernetesError>;

    async fn controller_objects(&self) -> Result<Arc<dyn KubeObjects>, KubernetesError>;
}

#[async_trait]
impl KubeObjectsProvider for KubeClientFactory {
    async fn objects_for(&self, cluster: &Cluster) -> Result<Arc<dyn KubeObjects>, KubernetesError> {
        debug!(cluster = %cluster.name, "Building Kubernetes client");
        Ok(Arc::new(LiveKubeObjects::new(self.cluster_client(cluster).await?)))
    }

    async fn controller_objects(&self) -> Result<Arc<dyn KubeObjects>, KubernetesError> {
        Ok(Arc::new(LiveKubeObjects::new(self.controller_client().await?)))
    }
}
