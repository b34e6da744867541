//! FluxCD object builders
//!
//! A Flux release is a `GitRepository` source pointing at the GitOps repo,
//! a `HelmRelease` rendering the chart from that source, and a basic-auth
//! secret the source controller uses to pull.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::domain::deployment_config::FluxCdSpec;
use crate::domain::GitProvider;

pub const RECONCILE_INTERVAL: &str = "1m";
pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "devtron";
pub const PROVIDER_ID_LABEL: &str = "providerId";
pub const BASIC_AUTH_SECRET_TYPE: &str = "kubernetes.io/basic-auth";

pub fn git_repository_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("source.toolkit.fluxcd.io", "v1", "GitRepository")
}

pub fn helm_release_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("helm.toolkit.fluxcd.io", "v2", "HelmRelease")
}

/// `GitRepository` source for the release's GitOps repo
pub fn git_repository(spec: &FluxCdSpec) -> DynamicObject {
    let resource = ApiResource::from_gvk(&git_repository_gvk());
    DynamicObject::new(&spec.git_repository_name, &resource)
        .within(&spec.git_repository_namespace)
        .data(serde_json::json!({
            "spec": {
                "interval": RECONCILE_INTERVAL,
                "url": spec.repo_url,
                "ref": { "branch": spec.revision_target },
                "secretRef": { "name": spec.git_ops_secret_name },
            }
        }))
}

/// `HelmRelease` rendering the chart out of the `GitRepository` source
pub fn helm_release(spec: &FluxCdSpec) -> DynamicObject {
    let resource = ApiResource::from_gvk(&helm_release_gvk());
    let mut obj = DynamicObject::new(&spec.helm_release_name, &resource).within(&spec.helm_release_namespace);
    obj.metadata.labels = Some(BTreeMap::from([(
        MANAGED_BY_LABEL.to_string(),
        MANAGED_BY_VALUE.to_string(),
    )]));
    obj.data(serde_json::json!({
        "spec": {
            "interval": RECONCILE_INTERVAL,
            "releaseName": spec.helm_release_name,
            "targetNamespace": spec.namespace,
            "driftDetection": { "mode": "enabled" },
            "chart": {
                "spec": {
                    "chart": spec.chart_location,
                    "version": spec.chart_version,
                    "reconcileStrategy": "Revision",
                    "sourceRef": {
                        "kind": "GitRepository",
                        "name": spec.git_repository_name,
                        "namespace": spec.git_repository_namespace,
                    },
                    "valuesFiles": spec.final_values_files(),
                }
            },
        }
    }))
}

/// Overwrite the fields this system manages on a live object, leaving the rest alone
pub fn apply_managed_fields(live: &mut DynamicObject, desired: &DynamicObject) {
    if let Some(labels) = &desired.metadata.labels {
        let merged = live.metadata.labels.get_or_insert_with(BTreeMap::new);
        merged.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Some(spec) = desired.data.get("spec") {
        if !live.data.is_object() {
            live.data = Value::Object(Map::new());
        }
        match live.data.get_mut("spec") {
            Some(current) => merge_json(current, spec),
            None => live.data["spec"] = spec.clone(),
        }
    }
}

// Objects merge key by key; anything else is overwritten.
fn merge_json(current: &mut Value, desired: &Value) {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            for (key, value) in desired {
                match current.get_mut(key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Labels stamped on every credential secret this system writes
pub fn secret_labels(provider: GitProvider) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (PROVIDER_ID_LABEL.to_string(), provider.as_str().to_string()),
    ])
}

/// Basic-auth secret the source controller pulls the repo with
pub fn basic_auth_secret(
    name: &str,
    namespace: &str,
    username: &str,
    password: &str,
    provider: GitProvider,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(secret_labels(provider)),
            ..Default::default()
        },
        type_: Some(BASIC_AUTH_SECRET_TYPE.to_string()),
        data: Some(BTreeMap::from([
            ("username".to_string(), ByteString(username.as_bytes().to_vec())),
            ("password".to_string(), ByteString(password.as_bytes().to_vec())),
        ])),
        ..Default::default()
    }
}

/// Apply `desired`'s data and labels onto an existing secret
pub fn merge_secret(existing: &mut Secret, desired: &Secret) {
    existing.data = desired.data.clone();
    existing.type_ = desired.type_.clone().or_else(|| existing.type_.clone());
    if let Some(labels) = &desired.metadata.labels {
        let merged = existing.metadata.labels.get_or_insert_with(BTreeMap::new);
        merged.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}
