//! Builds the objects an Orderer owns from named templates.
//!
//! Each builder loads its template as a generic object, substitutes names,
//! labels and references on it, checks that the result is the expected kind
//! of Kubernetes object, and finally sets typed fields such as secret data and
//! container resources. Names are derived from the Orderer's key alone, so
//! existence checks elsewhere are by name, never by content.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cluster_client::ObjectKey;
use crds::{Orderer, OrdererSpec};
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, ResourceRequirements, Secret, Service};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use crate::identity::extract_identity;
use crate::templates::{
    CONFIG_MAP_TEMPLATE, SECRET_TEMPLATE, SERVICE_TEMPLATE, STATEFUL_SET_TEMPLATE, TemplateError, TemplateStore,
};

/// Label tying the service, stateful set and pods of one orderer together
pub const APP_LABEL: &str = "k8s-app";
/// Label key marking the objects this controller owns
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`] on owned objects
pub const MANAGED_BY_VALUE: &str = "fabric-operator";
/// Name of the shared fabric configuration ConfigMap
pub const CONFIG_MAP_NAME: &str = "fabric-configuration";

const SECRET_SUFFIX: &str = "-secret";
const DEFAULT_STORAGE_CLASS: &str = "default";
const DEFAULT_STORAGE_SIZE: &str = "5Gi";
const DEFAULT_IMAGE: &str = "hyperledger/fabric-orderer:1.4.3";

/// Name of the credential bundle Secret for the Orderer `name`
pub fn secret_name(name: &str) -> String {
    format!("{name}{SECRET_SUFFIX}")
}

/// Errors raised while building objects
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The template could not be loaded
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The template is for another kind of object
    #[error("template {template} describes a {found}, expected a {expected}")]
    KindMismatch {
        template: String,
        expected: String,
        found: String,
    },

    /// A path the builder writes to cannot exist in the template
    #[error("template {template} has no slot at {path}")]
    TemplateShape { template: String, path: String },

    /// The filled-in template does not deserialize as its kind
    #[error("template {template} is not a valid {kind}: {source}")]
    Invalid {
        template: String,
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Credential fields absent from the Orderer
    #[error("all entries under MSP and TLS are required, missing: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    /// The Orderer cannot be referenced as an owner
    #[error("Orderer {0} has no uid to own its objects")]
    MissingOwner(String),
}

/// Builds credential bundles, network endpoints and workload sets
#[derive(Clone)]
pub struct ResourceFactory {
    templates: Arc<dyn TemplateStore>,
}

impl std::fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFactory").finish_non_exhaustive()
    }
}

impl ResourceFactory {
    /// Factory building from the templates in `templates`
    pub fn new(templates: Arc<dyn TemplateStore>) -> Self {
        Self { templates }
    }

    /// Secret `<name>-secret` holding the decoded MSP and TLS material
    pub fn build_credential_bundle(&self, orderer: &Orderer, key: &ObjectKey) -> Result<Secret, FactoryError> {
        let entries = credential_entries(&orderer.spec)?;

        let mut value = self.templates.load(SECRET_TEMPLATE)?;
        set_identity(&mut value, SECRET_TEMPLATE, &key.sibling(secret_name(&key.name)))?;

        let mut secret: Secret = typed(SECRET_TEMPLATE, value)?;
        secret.data = Some(
            entries
                .into_iter()
                .map(|(name, bytes)| (name, ByteString(bytes)))
                .collect(),
        );
        owned_by(secret, orderer, key)
    }

    /// Service `<name>` selecting the orderer's pods
    pub fn build_network_endpoint(&self, orderer: &Orderer, key: &ObjectKey) -> Result<Service, FactoryError> {
        let mut value = self.templates.load(SERVICE_TEMPLATE)?;
        set_identity(&mut value, SERVICE_TEMPLATE, key)?;
        set_at(&mut value, SERVICE_TEMPLATE, &label_path("/metadata/labels"), json!(key.name))?;
        set_at(&mut value, SERVICE_TEMPLATE, &label_path("/spec/selector"), json!(key.name))?;

        owned_by(typed(SERVICE_TEMPLATE, value)?, orderer, key)
    }

    /// StatefulSet `<name>` running the orderer with the Orderer's storage,
    /// image, resources and extra configuration
    pub fn build_workload_set(&self, orderer: &Orderer, key: &ObjectKey) -> Result<StatefulSet, FactoryError> {
        let spec = &orderer.spec;
        let secret = secret_name(&key.name);
        let t = STATEFUL_SET_TEMPLATE;

        let mut value = self.templates.load(t)?;
        set_identity(&mut value, t, key)?;
        set_at(&mut value, t, "/spec/serviceName", json!(key.name))?;
        set_at(&mut value, t, &label_path("/spec/selector/matchLabels"), json!(key.name))?;
        set_at(&mut value, t, &label_path("/spec/template/metadata/labels"), json!(key.name))?;

        let claim = "/spec/volumeClaimTemplates/0/spec";
        set_at(
            &mut value,
            t,
            &format!("{claim}/storageClassName"),
            json!(or_default(spec.storage_class.as_deref(), DEFAULT_STORAGE_CLASS)),
        )?;
        set_at(
            &mut value,
            t,
            &format!("{claim}/resources/requests/storage"),
            json!(or_default(spec.storage_size.as_deref(), DEFAULT_STORAGE_SIZE)),
        )?;

        let pod = "/spec/template/spec";
        set_at(
            &mut value,
            t,
            &format!("{pod}/containers/0/image"),
            json!(or_default(spec.image.as_deref(), DEFAULT_IMAGE)),
        )?;
        set_at(&mut value, t, &format!("{pod}/volumes/0/secret/secretName"), json!(secret))?;
        set_at(
            &mut value,
            t,
            &format!("{pod}/initContainers/0/env/0/valueFrom/secretKeyRef/name"),
            json!(secret),
        )?;
        set_at(
            &mut value,
            t,
            &format!("{pod}/containers/0/env/0/valueFrom/secretKeyRef/name"),
            json!(secret),
        )?;
        push_at(
            &mut value,
            t,
            &format!("{pod}/containers/0/env"),
            spec.config_params
                .iter()
                .map(|param| json!({ "name": param.name, "value": param.value }))
                .collect(),
        )?;

        let mut stateful_set: StatefulSet = typed(t, value)?;
        if let Some(limits) = &spec.resources {
            if let Some(container) = stateful_set
                .spec
                .as_mut()
                .and_then(|spec| spec.template.spec.as_mut())
                .and_then(|pod| pod.containers.first_mut())
            {
                container.resources = Some(ResourceRequirements::from(limits));
            }
        }
        owned_by(stateful_set, orderer, key)
    }

    /// The shared `fabric-configuration` ConfigMap for `namespace`. It is not
    /// owned by any single Orderer.
    pub fn build_configuration(&self, namespace: &str) -> Result<ConfigMap, FactoryError> {
        let mut value = self.templates.load(CONFIG_MAP_TEMPLATE)?;
        set_identity(&mut value, CONFIG_MAP_TEMPLATE, &ObjectKey::new(namespace, CONFIG_MAP_NAME))?;
        typed(CONFIG_MAP_TEMPLATE, value)
    }
}

/// Decodes the Orderer's MSP and TLS material into secret entries.
///
/// Every credential field must be present. Values that are not valid base64
/// decode to empty entries.
pub fn credential_entries(spec: &OrdererSpec) -> Result<BTreeMap<String, Vec<u8>>, FactoryError> {
    let missing: Vec<&'static str> = [
        ("adminCerts", spec.admin_certs.is_empty()),
        ("caCerts", spec.ca_certs.is_empty()),
        ("keyStore", spec.key_store.is_empty()),
        ("signCerts", spec.sign_certs.is_empty()),
        ("tlsCacerts", spec.tls_cacerts.is_empty()),
        ("tls.tlsCert", spec.tls.tls_cert.is_empty()),
        ("tls.tlsKey", spec.tls.tls_key.is_empty()),
    ]
    .into_iter()
    .filter_map(|(field, absent)| absent.then_some(field))
    .collect();
    if !missing.is_empty() {
        return Err(FactoryError::MissingCredentials(missing));
    }

    let mut entries = BTreeMap::new();
    for (i, cert) in spec.admin_certs.iter().enumerate() {
        entries.insert(format!("admincert{i}"), decode(cert));
    }
    for (i, cert) in spec.ca_certs.iter().enumerate() {
        entries.insert(format!("cacert{i}"), decode(cert));
    }
    entries.insert("keystore".to_string(), decode(&spec.key_store));

    let sign_cert = decode(&spec.sign_certs);
    entries.insert("mspid".to_string(), extract_identity(&sign_cert).into_bytes());
    entries.insert("signcert".to_string(), sign_cert);

    for (i, cert) in spec.tls_cacerts.iter().enumerate() {
        entries.insert(format!("tlscacert{i}"), decode(cert));
    }
    entries.insert("tlscert".to_string(), decode(&spec.tls.tls_cert));
    entries.insert("tlskey".to_string(), decode(&spec.tls.tls_key));
    Ok(entries)
}

fn decode(value: &str) -> Vec<u8> {
    STANDARD.decode(value).unwrap_or_default()
}

/// Present and non-empty, else `default`
fn or_default<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    value.filter(|v| !v.is_empty()).unwrap_or(default)
}

fn label_path(map: &str) -> String {
    format!("{map}/{APP_LABEL}")
}

fn set_identity(value: &mut Value, template: &str, key: &ObjectKey) -> Result<(), FactoryError> {
    set_at(value, template, "/metadata/name", json!(key.name))?;
    set_at(value, template, "/metadata/namespace", json!(key.namespace))
}

/// Resolves a JSON pointer for writing. Missing or null object members are
/// created along the way; array elements must already exist.
fn slot_mut<'a>(value: &'a mut Value, template: &str, pointer: &str) -> Result<&'a mut Value, FactoryError> {
    let shape = || FactoryError::TemplateShape {
        template: template.to_string(),
        path: pointer.to_string(),
    };

    let mut current = value;
    for token in pointer.split('/').skip(1) {
        let index = token.parse::<usize>().ok();
        if current.is_null() {
            if index.is_some() {
                return Err(shape());
            }
            *current = Value::Object(serde_json::Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(token.to_string()).or_insert(Value::Null),
            Value::Array(items) => match index.and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return Err(shape()),
            },
            _ => return Err(shape()),
        };
    }
    Ok(current)
}

fn set_at(value: &mut Value, template: &str, pointer: &str, new: Value) -> Result<(), FactoryError> {
    *slot_mut(value, template, pointer)? = new;
    Ok(())
}

fn push_at(value: &mut Value, template: &str, pointer: &str, items: Vec<Value>) -> Result<(), FactoryError> {
    let slot = slot_mut(value, template, pointer)?;
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(existing) => {
            existing.extend(items);
            Ok(())
        }
        _ => Err(FactoryError::TemplateShape {
            template: template.to_string(),
            path: pointer.to_string(),
        }),
    }
}

/// Checks the template's kind and deserializes it into `K`
fn typed<K>(template: &str, value: Value) -> Result<K, FactoryError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let expected = K::kind(&()).to_string();
    let found = value.get("kind").and_then(Value::as_str).unwrap_or_default();
    if found != expected {
        return Err(FactoryError::KindMismatch {
            template: template.to_string(),
            expected,
            found: found.to_string(),
        });
    }
    serde_json::from_value(value).map_err(|source| FactoryError::Invalid {
        template: template.to_string(),
        kind: expected,
        source,
    })
}

/// Makes the Orderer the controlling owner of `object`, so that deleting the
/// Orderer lets the platform garbage-collect it, and labels it for the
/// owned-object watchers whatever the template carried
fn owned_by<K: Resource>(mut object: K, orderer: &Orderer, key: &ObjectKey) -> Result<K, FactoryError> {
    let owner = orderer
        .controller_owner_ref(&())
        .ok_or_else(|| FactoryError::MissingOwner(key.to_string()))?;
    let meta = object.meta_mut();
    meta.owner_references = Some(vec![owner]);
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    Ok(object)
}
