// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-component IAM credentials.
//!
//! The cloud controller, the node pool controller, the ingress operator and
//! the storage driver of a hosted cluster each get their own ServiceID whose
//! access policies come from a `CredentialsRequest` document. The API key of
//! the ServiceID is handed to the component as an opaque secret.
//!
//! IBM Cloud never returns an API key twice, so an existing ServiceID cannot
//! be turned back into a secret. Re-issuing lost credentials means deleting
//! the ServiceID first, which is what `recreate_secrets` does.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::InfraError;
use crate::ibmcloud::{IamService, PolicyAttribute, PolicyRequest, ServiceId};
use crate::paging::page_items;
use crate::powervs::infra::Secrets;

/// Provider spec kinds a ServiceID can be issued for.
const SUPPORTED_PROVIDER_KINDS: [&str; 2] = ["IBMCloudProviderSpec", "IBMCloudPowerVSProviderSpec"];

const API_KEY_SECRET_KEY: &str = "ibmcloud_api_key";
const CREDENTIALS_ENV_SECRET_KEY: &str = "ibm-credentials.env";

const CLOUD_CONTROLLER_TEMPLATE: &str = r#"apiVersion: cloudcredential.openshift.io/v1
kind: CredentialsRequest
metadata:
  name: ibm-cloud-controller-manager
  namespace: openshift-cloud-credential-operator
spec:
  secretRef:
    name: ibm-cloud-credentials
    namespace: openshift-cloud-controller-manager
  providerSpec:
    apiVersion: cloudcredential.openshift.io/v1
    kind: IBMCloudPowerVSProviderSpec
    policies:
      - roles:
          - "crn:v1:bluemix:public:iam::::role:Viewer"
          - "crn:v1:bluemix:public:iam::::serviceRole:Reader"
          - "crn:v1:bluemix:public:iam::::serviceRole:Manager"
        attributes:
          - name: serviceName
            value: power-iaas
          - name: serviceInstance
            value: "{{ cloud_instance_id }}"
      - roles:
          - "crn:v1:bluemix:public:iam::::role:Editor"
          - "crn:v1:bluemix:public:iam::::role:Operator"
          - "crn:v1:bluemix:public:iam::::role:Viewer"
        attributes:
          - name: serviceName
            value: is
"#;

const NODE_POOL_MANAGEMENT_TEMPLATE: &str = r#"apiVersion: cloudcredential.openshift.io/v1
kind: CredentialsRequest
metadata:
  name: ibm-node-pool-management
  namespace: openshift-cloud-credential-operator
spec:
  secretRef:
    name: ibm-node-pool-management-credentials
    namespace: kube-system
  providerSpec:
    apiVersion: cloudcredential.openshift.io/v1
    kind: IBMCloudPowerVSProviderSpec
    policies:
      - roles:
          - "crn:v1:bluemix:public:iam::::role:Viewer"
          - "crn:v1:bluemix:public:iam::::serviceRole:Reader"
          - "crn:v1:bluemix:public:iam::::serviceRole:Manager"
        attributes:
          - name: serviceName
            value: power-iaas
          - name: serviceInstance
            value: "{{ cloud_instance_id }}"
      - roles:
          - "crn:v1:bluemix:public:iam::::role:Viewer"
        attributes:
          - name: resourceType
            value: resource-group
"#;

const INGRESS_TEMPLATE: &str = r#"apiVersion: cloudcredential.openshift.io/v1
kind: CredentialsRequest
metadata:
  name: openshift-ingress
  namespace: openshift-cloud-credential-operator
spec:
  secretRef:
    name: cloud-credentials
    namespace: openshift-ingress-operator
  providerSpec:
    apiVersion: cloudcredential.openshift.io/v1
    kind: IBMCloudPowerVSProviderSpec
    policies:
      - roles:
          - "crn:v1:bluemix:public:iam::::role:Viewer"
          - "crn:v1:bluemix:public:iam::::serviceRole:Reader"
          - "crn:v1:bluemix:public:iam::::serviceRole:Manager"
        attributes:
          - name: serviceName
            value: internet-svcs
          - name: serviceInstance
            value: "{{ cis_instance_id }}"
"#;

const STORAGE_TEMPLATE: &str = r#"apiVersion: cloudcredential.openshift.io/v1
kind: CredentialsRequest
metadata:
  name: ibm-powervs-block-csi-driver-operator
  namespace: openshift-cloud-credential-operator
spec:
  secretRef:
    name: ibm-powervs-cloud-credentials
    namespace: openshift-cluster-csi-drivers
  providerSpec:
    apiVersion: cloudcredential.openshift.io/v1
    kind: IBMCloudPowerVSProviderSpec
    policies:
      - roles:
          - "crn:v1:bluemix:public:iam::::role:Editor"
          - "crn:v1:bluemix:public:iam::::role:Viewer"
          - "crn:v1:bluemix:public:iam::::serviceRole:Manager"
        attributes:
          - name: serviceName
            value: power-iaas
          - name: serviceInstance
            value: "{{ cloud_instance_id }}"
"#;

/// In-cluster component that gets its own credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRole {
    CloudController,
    NodePoolManagement,
    Ingress,
    Storage,
}

impl CredentialRole {
    /// Every role, in issuing order.
    pub const ALL: [CredentialRole; 4] = [
        CredentialRole::CloudController,
        CredentialRole::NodePoolManagement,
        CredentialRole::Ingress,
        CredentialRole::Storage,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CloudController => "cloud-controller",
            Self::NodePoolManagement => "node-pool-management",
            Self::Ingress => "ingress",
            Self::Storage => "storage",
        }
    }

    /// Suffix of the secret name, `<clusterName>-<suffix>`.
    #[must_use]
    pub fn secret_suffix(self) -> &'static str {
        match self {
            Self::CloudController => "cloud-controller-creds",
            Self::NodePoolManagement => "node-management-creds",
            Self::Ingress => "ingress-creds",
            Self::Storage => "storage-creds",
        }
    }

    fn template(self) -> &'static str {
        match self {
            Self::CloudController => CLOUD_CONTROLLER_TEMPLATE,
            Self::NodePoolManagement => NODE_POOL_MANAGEMENT_TEMPLATE,
            Self::Ingress => INGRESS_TEMPLATE,
            Self::Storage => STORAGE_TEMPLATE,
        }
    }

    /// Name of the ServiceID issued for this role.
    #[must_use]
    pub fn service_id_name(self, infra_id: &str) -> String {
        format!("{infra_id}-{}", self.as_str())
    }

    /// Slot in [`Secrets`] holding this role's secret.
    pub fn slot(self, secrets: &mut Secrets) -> &mut Option<Secret> {
        match self {
            Self::CloudController => &mut secrets.kube_cloud_controller_creds,
            Self::NodePoolManagement => &mut secrets.node_pool_management_creds,
            Self::Ingress => &mut secrets.ingress_operator_cloud_creds,
            Self::Storage => &mut secrets.storage_operator_cloud_creds,
        }
    }
}

/// A `cloudcredential.openshift.io/v1` `CredentialsRequest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    pub api_version: String,
    pub kind: String,
    pub metadata: RequestMetadata,
    pub spec: CredentialsRequestSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequestSpec {
    pub secret_ref: SecretReference,
    pub provider_spec: ProviderSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub policies: Vec<AccessPolicy>,
}

/// Roles granted on the resources matching `attributes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccessPolicy {
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<PolicyAttribute>,
}

/// Values substituted into the policy templates.
#[derive(Debug, Clone, Default)]
pub struct CredentialParams {
    pub infra_id: String,
    pub cluster_name: String,
    pub namespace: String,
    pub cloud_instance_id: String,
    pub cis_crn: String,
}

/// Instance id segment of a resource CRN,
/// `crn:v1:<cname>:<ctype>:<service>:<location>:<scope>:<instance>:...`.
fn crn_instance_id(crn: &str) -> &str {
    crn.split(':').nth(7).unwrap_or_default()
}

/// Expand the role's template and point its secret at
/// `<clusterName>-<suffix>` in the cluster namespace.
///
/// # Errors
///
/// Returns [`InfraError::Credentials`] when the template does not render or
/// decode.
pub fn render_request(
    role: CredentialRole,
    params: &CredentialParams,
) -> Result<CredentialsRequest, InfraError> {
    let rendered = Environment::new()
        .render_str(
            role.template(),
            context! {
                cloud_instance_id => params.cloud_instance_id.as_str(),
                cis_crn => params.cis_crn.as_str(),
                cis_instance_id => crn_instance_id(&params.cis_crn),
            },
        )
        .map_err(|e| InfraError::Credentials(format!("rendering {} policy template: {e}", role.as_str())))?;

    let mut request: CredentialsRequest = serde_yaml::from_str(&rendered).map_err(|e| {
        InfraError::Credentials(format!("decoding {} credentials request: {e}", role.as_str()))
    })?;
    request.spec.secret_ref = SecretReference {
        name: format!("{}-{}", params.cluster_name, role.secret_suffix()),
        namespace: params.namespace.clone(),
    };
    Ok(request)
}

/// IAM policy granting `policy` to the ServiceID `iam_id`, scoped to the
/// account and, when set, the resource group.
#[must_use]
pub fn policy_request(
    iam_id: &str,
    policy: &AccessPolicy,
    account_id: &str,
    resource_group_id: &str,
) -> PolicyRequest {
    let mut attributes: Vec<PolicyAttribute> = policy
        .attributes
        .iter()
        .map(|a| PolicyAttribute {
            name: a.name.clone(),
            value: a.value.clone(),
            operator: None,
        })
        .collect();

    if !resource_group_id.is_empty() {
        // A policy on the resource group itself names it as the resource.
        let name = if attributes
            .iter()
            .any(|a| a.name == "resourceType" && a.value == "resource-group")
        {
            "resource"
        } else {
            "resourceGroupId"
        };
        attributes.push(PolicyAttribute {
            name: name.to_string(),
            value: resource_group_id.to_string(),
            operator: None,
        });
    }

    attributes.push(PolicyAttribute {
        name: "accountId".to_string(),
        value: account_id.to_string(),
        operator: None,
    });

    PolicyRequest {
        subject_iam_id: iam_id.to_string(),
        roles: policy.roles.clone(),
        resource_attributes: attributes,
    }
}

/// Opaque secret carrying `api_key` at the request's secret reference.
///
/// # Errors
///
/// Returns [`InfraError::Credentials`] when the API key is empty.
pub fn build_secret(request: &CredentialsRequest, api_key: &str) -> Result<Secret, InfraError> {
    if api_key.is_empty() {
        return Err(InfraError::Credentials(
            "apiKey or credentialRequest can't be empty".to_string(),
        ));
    }

    let string_data = BTreeMap::from([
        (API_KEY_SECRET_KEY.to_string(), api_key.to_string()),
        (
            CREDENTIALS_ENV_SECRET_KEY.to_string(),
            format!("IBMCLOUD_AUTHTYPE=iam\nIBMCLOUD_APIKEY={api_key}"),
        ),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(request.spec.secret_ref.name.clone()),
            namespace: Some(request.spec.secret_ref.namespace.clone()),
            ..Default::default()
        },
        string_data: Some(string_data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}

/// Issues and deletes ServiceIDs in one account.
pub struct ServiceIdIssuer<'a> {
    iam: &'a dyn IamService,
    account_id: &'a str,
    resource_group_id: &'a str,
    cancel: &'a CancellationToken,
}

impl<'a> ServiceIdIssuer<'a> {
    pub fn new(
        iam: &'a dyn IamService,
        account_id: &'a str,
        resource_group_id: &'a str,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            iam,
            account_id,
            resource_group_id,
            cancel,
        }
    }

    /// Every ServiceID named `name`.
    ///
    /// # Errors
    ///
    /// Returns paging and API errors.
    pub async fn list(&self, name: &str) -> Result<Vec<ServiceId>, InfraError> {
        let iam = self.iam;
        let account_id = self.account_id;
        let mut found = Vec::new();
        page_items(
            self.cancel,
            |start| async move { iam.list_service_ids(account_id, name, start.as_deref()).await },
            |ids| {
                found.extend(ids);
                Ok(false)
            },
        )
        .await?;
        Ok(found)
    }

    /// Check the request can be issued under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::Credentials`] for unsupported provider kinds or
    /// when a ServiceID with the name already exists.
    pub async fn validate(&self, name: &str, request: &CredentialsRequest) -> Result<(), InfraError> {
        let kind = request.spec.provider_spec.kind.as_str();
        if !SUPPORTED_PROVIDER_KINDS.contains(&kind) {
            return Err(InfraError::Credentials(format!("not supported of kind: {kind}")));
        }

        if !self.list(name).await?.is_empty() {
            return Err(InfraError::Credentials(format!(
                "exists with the same name: {name}, please delete the entries or create with a different name"
            )));
        }
        Ok(())
    }

    /// Create the ServiceID, attach one policy per access policy and return
    /// a fresh API key.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::Credentials`] naming the step that failed.
    pub async fn issue(&self, name: &str, request: &CredentialsRequest) -> Result<String, InfraError> {
        let description = format!("ServiceID for {}", request.metadata.name);
        let service_id = self
            .iam
            .create_service_id(self.account_id, name, &description)
            .await
            .map_err(|e| InfraError::Credentials(format!("creating service id {name}: {e}")))?;
        info!(service_id = %service_id.id, name = %name, "Created ServiceID");

        for policy in &request.spec.provider_spec.policies {
            let policy = policy_request(&service_id.iam_id, policy, self.account_id, self.resource_group_id);
            self.iam.create_policy(&policy).await.map_err(|e| {
                InfraError::Credentials(format!("creating access policy for service id {name}: {e}"))
            })?;
        }

        let key = self
            .iam
            .create_api_key(self.account_id, &service_id.iam_id, &format!("{name}-key"))
            .await
            .map_err(|e| {
                InfraError::Credentials(format!(
                    "creating an API key for service id name: {name}, id: {}: {e}",
                    service_id.id
                ))
            })?;
        Ok(key.apikey)
    }

    /// Delete every ServiceID named `name` and return how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns paging and API errors; ServiceIDs that are already gone count
    /// as deleted.
    pub async fn delete(&self, name: &str) -> Result<usize, InfraError> {
        let ids = self.list(name).await?;
        for service_id in &ids {
            info!(service_id = %service_id.id, name = %name, "Deleting ServiceID");
            match self.iam.delete_service_id(&service_id.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(InfraError::Credentials(format!(
                        "deleting service id {}: {e}",
                        service_id.id
                    )));
                }
            }
        }
        Ok(ids.len())
    }
}

/// Issue credentials for every role and return their secrets.
///
/// Roles whose ServiceID already exists are skipped with a warning unless
/// `recreate` is set, in which case the ServiceID is deleted and re-issued.
///
/// # Errors
///
/// Returns the first failure; secrets issued before it are lost with the
/// error, and a re-run with `recreate` set issues them again.
pub async fn setup_credentials(
    issuer: &ServiceIdIssuer<'_>,
    params: &CredentialParams,
    recreate: bool,
) -> Result<Secrets, InfraError> {
    let mut secrets = Secrets::default();
    for role in CredentialRole::ALL {
        let request = render_request(role, params)?;
        let name = role.service_id_name(&params.infra_id);

        if recreate {
            issuer.delete(&name).await?;
        } else if !issuer.list(&name).await?.is_empty() {
            warn!(
                service_id = %name,
                "ServiceID already exists and its API key cannot be retrieved, skipping. Use recreate-secrets to issue new credentials"
            );
            continue;
        }

        issuer.validate(&name, &request).await?;
        let api_key = issuer.issue(&name, &request).await?;
        *role.slot(&mut secrets) = Some(build_secret(&request, &api_key)?);
        info!(role = role.as_str(), secret = %request.spec.secret_ref.name, "Credentials issued");
    }
    Ok(secrets)
}

/// Delete the ServiceIDs of every role.
///
/// # Errors
///
/// Attempts every role and returns [`InfraError::Credentials`] listing the
/// roles that failed.
pub async fn delete_credentials(issuer: &ServiceIdIssuer<'_>, infra_id: &str) -> Result<(), InfraError> {
    let mut failures = Vec::new();
    for role in CredentialRole::ALL {
        let name = role.service_id_name(infra_id);
        match issuer.delete(&name).await {
            Ok(0) => info!(service_id = %name, "No ServiceID to delete"),
            Ok(_) => {}
            Err(e) => failures.push(format!("{}: {e}", role.as_str())),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(InfraError::Credentials(failures.join("; ")))
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod credentials_tests;
