// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP implementation of the IBM Cloud service traits.
//!
//! All services share one `reqwest` client and one IAM [`Authenticator`].
//! Requests are retried with exponential backoff on 429 and 5xx responses;
//! any other non-success status becomes [`CloudError::Http`].
//!
//! The services disagree on how they paginate. Each client converts its
//! native cursor (VPC `next.href`, resource-controller `next_url`, IAM
//! `pagetoken`, CIS page numbers) into an absolute `next` href carrying a
//! `start` parameter so that [`crate::paging`] can drive all of them.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use super::auth::Authenticator;
use super::models::*;
use super::{
    CloudError, CloudProvider, DirectLinkService, DnsService, IamService, PowerVsService,
    ResourceManager, TaggingService, TransitGatewayService, VpcService,
};
use crate::constants::{
    CLOUD_LIST_PAGE_SIZE, ENV_PLATFORM_API_ENDPOINT, ENV_POWER_API_ENDPOINT,
    ENV_VPC_API_ENDPOINT, HTTP_REQUEST_TIMEOUT, VPC_API_VERSION,
};
use crate::retry::{http_backoff, is_retryable_http_status};

/// Placeholder replaced by the region in regional endpoint templates.
const REGION_PLACEHOLDER: &str = "{region}";

/// Base URLs of the IBM Cloud services.
///
/// `vpc` and `power` are templates containing `{region}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub iam: String,
    pub resource_controller: String,
    pub global_catalog: String,
    pub cis: String,
    pub vpc: String,
    pub power: String,
    pub direct_link: String,
    pub transit: String,
    pub tagging: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            iam: "https://iam.cloud.ibm.com".to_string(),
            resource_controller: "https://resource-controller.cloud.ibm.com".to_string(),
            global_catalog: "https://globalcatalog.cloud.ibm.com".to_string(),
            cis: "https://api.cis.cloud.ibm.com".to_string(),
            vpc: "https://{region}.iaas.cloud.ibm.com".to_string(),
            power: "https://{region}.power-iaas.cloud.ibm.com".to_string(),
            direct_link: "https://directlink.cloud.ibm.com".to_string(),
            transit: "https://transit.cloud.ibm.com".to_string(),
            tagging: "https://tags.global-search-tagging.cloud.ibm.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Public endpoints with the `IBMCLOUD_*_API_ENDPOINT` overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let lookup = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self::default().with_overrides(
            lookup(ENV_POWER_API_ENDPOINT).as_deref(),
            lookup(ENV_VPC_API_ENDPOINT).as_deref(),
            lookup(ENV_PLATFORM_API_ENDPOINT).as_deref(),
        )
    }

    /// Inject subdomain prefixes, e.g. `private` turns
    /// `https://iam.cloud.ibm.com` into `https://private.iam.cloud.ibm.com`.
    ///
    /// The platform prefix applies to IAM, resource controller, global catalog
    /// and tagging.
    #[must_use]
    pub fn with_overrides(
        mut self,
        power: Option<&str>,
        vpc: Option<&str>,
        platform: Option<&str>,
    ) -> Self {
        if let Some(prefix) = power {
            self.power = inject_prefix(&self.power, prefix);
        }
        if let Some(prefix) = vpc {
            self.vpc = inject_prefix(&self.vpc, prefix);
        }
        if let Some(prefix) = platform {
            for url in [
                &mut self.iam,
                &mut self.resource_controller,
                &mut self.global_catalog,
                &mut self.tagging,
            ] {
                *url = inject_prefix(url, prefix);
            }
        }
        self
    }

    /// Every service served from one base URL. Used against local test servers.
    #[must_use]
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            iam: base.clone(),
            resource_controller: base.clone(),
            global_catalog: base.clone(),
            cis: base.clone(),
            vpc: base.clone(),
            power: base.clone(),
            direct_link: base.clone(),
            transit: base.clone(),
            tagging: base,
        }
    }

    fn regional(template: &str, region: &str) -> String {
        template.replace(REGION_PLACEHOLDER, region)
    }
}

/// Replace the `https://` scheme prefix with `https://<prefix>.`.
#[must_use]
pub fn inject_prefix(url: &str, prefix: &str) -> String {
    url.replacen("https://", &format!("https://{prefix}."), 1)
}

/// Build a URL from a base, percent-encoded path segments and query pairs.
fn build_url(base: &str, segments: &[&str], query: &[(&str, String)]) -> Result<Url, CloudError> {
    let mut url = Url::parse(base)?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| CloudError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url)
}

/// Pull a human-readable message out of an IBM Cloud error body.
///
/// VPC and CIS return `{"errors": [{"message": ...}]}`, PowerVS returns
/// `{"description": ...}`, IAM returns `{"errorMessage": ...}`.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    value
        .pointer("/errors/0/message")
        .or_else(|| value.get("description"))
        .or_else(|| value.get("errorMessage"))
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), str::to_string)
}

struct Inner {
    http: HttpClient,
    auth: Authenticator,
    endpoints: Endpoints,
}

impl Inner {
    /// Send a request, retrying retryable statuses, and return the status and body.
    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: &[(&'static str, String)],
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), CloudError> {
        let mut backoff = http_backoff();
        let start_time = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(method = %method, url = %url, attempt = attempt, "IBM Cloud API request");

            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header("Authorization", self.auth.bearer().await?)
                .header("Accept", "application/json");
            for (name, value) in headers {
                request = request.header(*name, value);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                return Ok((status, text));
            }

            let message = error_message(&text);
            if !is_retryable_http_status(status) {
                debug!(method = %method, url = %url, status = %status, error = %message, "IBM Cloud API request failed");
                return Err(CloudError::http(status.as_u16(), message));
            }

            let exhausted = backoff
                .max_elapsed_time
                .is_some_and(|max| start_time.elapsed() >= max);
            match backoff.next_backoff() {
                Some(delay) if !exhausted => {
                    warn!(
                        method = %method,
                        url = %url,
                        status = %status,
                        attempt = attempt,
                        retry_after = ?delay,
                        "Retryable IBM Cloud API error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    error!(method = %method, url = %url, attempt = attempt, "Retries exhausted");
                    return Err(CloudError::http(status.as_u16(), message));
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        headers: &[(&'static str, String)],
    ) -> Result<T, CloudError> {
        let (_, body) = self.send(Method::GET, url, headers, None).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: Url,
        headers: &[(&'static str, String)],
        body: &B,
    ) -> Result<T, CloudError> {
        let value = serde_json::to_value(body)?;
        let (_, text) = self.send(Method::POST, url, headers, Some(&value)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn delete(&self, url: Url, headers: &[(&'static str, String)]) -> Result<String, CloudError> {
        let (_, text) = self.send(Method::DELETE, url, headers, None).await?;
        Ok(text)
    }
}

/// IBM Cloud client bound to one API key.
#[derive(Clone)]
pub struct IbmCloud {
    inner: Arc<Inner>,
}

impl IbmCloud {
    /// Client using the public endpoints and any environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self, CloudError> {
        Self::with_endpoints(api_key, Endpoints::from_env())
    }

    /// Client using explicit endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_endpoints(api_key: impl Into<String>, endpoints: Endpoints) -> Result<Self, CloudError> {
        let http = HttpClient::builder().timeout(HTTP_REQUEST_TIMEOUT).build()?;
        let auth = Authenticator::new(api_key, &endpoints.iam, http.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                auth,
                endpoints,
            }),
        })
    }

    /// Endpoints in use.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }
}

impl CloudProvider for IbmCloud {
    fn iam(&self) -> Arc<dyn IamService> {
        Arc::new(IamClient {
            inner: self.inner.clone(),
        })
    }

    fn resource_manager(&self) -> Arc<dyn ResourceManager> {
        Arc::new(ResourceClient {
            inner: self.inner.clone(),
        })
    }

    fn dns(&self) -> Arc<dyn DnsService> {
        Arc::new(CisClient {
            inner: self.inner.clone(),
        })
    }

    fn vpc(&self, region: &str) -> Arc<dyn VpcService> {
        Arc::new(VpcClient {
            base: Endpoints::regional(&self.inner.endpoints.vpc, region),
            inner: self.inner.clone(),
        })
    }

    fn powervs(
        &self,
        region: &str,
        zone: &str,
        cloud_instance_id: &str,
        account_id: &str,
    ) -> Arc<dyn PowerVsService> {
        Arc::new(PowerVsClient {
            base: Endpoints::regional(&self.inner.endpoints.power, region),
            cloud_instance_id: cloud_instance_id.to_string(),
            crn: format!("crn:v1:bluemix:public:power-iaas:{zone}:a/{account_id}:{cloud_instance_id}::"),
            inner: self.inner.clone(),
        })
    }

    fn direct_link(&self) -> Arc<dyn DirectLinkService> {
        Arc::new(DirectLinkClient {
            inner: self.inner.clone(),
        })
    }

    fn transit_gateway(&self) -> Arc<dyn TransitGatewayService> {
        Arc::new(TransitClient {
            inner: self.inner.clone(),
        })
    }

    fn tagging(&self) -> Arc<dyn TaggingService> {
        Arc::new(TaggingClient {
            inner: self.inner.clone(),
        })
    }
}

fn start_query(start: Option<&str>) -> Option<(&'static str, String)> {
    start.map(|s| ("start", s.to_string()))
}

// ============================================================================
// IAM
// ============================================================================

struct IamClient {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
struct ApiKeyDetails {
    account_id: String,
}

#[derive(Deserialize)]
struct ServiceIdList {
    #[serde(default)]
    serviceids: Vec<ServiceId>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct PolicyResponse {
    id: String,
}

#[async_trait]
impl IamService for IamClient {
    async fn account_id(&self) -> Result<String, CloudError> {
        let url = build_url(&self.inner.endpoints.iam, &["v1", "apikeys", "details"], &[])?;
        let details: ApiKeyDetails = self
            .inner
            .get(url, &[("IAM-Apikey", self.inner.auth.api_key().to_string())])
            .await?;
        Ok(details.account_id)
    }

    async fn list_service_ids(
        &self,
        account_id: &str,
        name: &str,
        start: Option<&str>,
    ) -> Result<Page<ServiceId>, CloudError> {
        let base = &self.inner.endpoints.iam;
        let mut query = vec![
            ("account_id", account_id.to_string()),
            ("name", name.to_string()),
        ];
        if let Some(token) = start {
            query.push(("pagetoken", token.to_string()));
        }
        let url = build_url(base, &["v1", "serviceids", ""], &query)?;
        let list: ServiceIdList = self.inner.get(url, &[]).await?;

        // IAM pages with pagetoken; re-express it as a start cursor.
        let next = match list.next.as_deref() {
            Some(href) => {
                let absolute = Url::parse(base)?.join(href)?;
                absolute
                    .query_pairs()
                    .find(|(k, _)| k == "pagetoken")
                    .map(|(_, token)| {
                        build_url(base, &["v1", "serviceids", ""], &[("start", token.into_owned())])
                            .map(String::from)
                    })
                    .transpose()?
            }
            None => None,
        };
        Ok(Page {
            items: list.serviceids,
            next,
        })
    }

    async fn create_service_id(
        &self,
        account_id: &str,
        name: &str,
        description: &str,
    ) -> Result<ServiceId, CloudError> {
        let url = build_url(&self.inner.endpoints.iam, &["v1", "serviceids", ""], &[])?;
        let body = json!({
            "account_id": account_id,
            "name": name,
            "description": description,
        });
        self.inner.post(url, &[], &body).await
    }

    async fn delete_service_id(&self, id: &str) -> Result<(), CloudError> {
        let url = build_url(&self.inner.endpoints.iam, &["v1", "serviceids", id], &[])?;
        self.inner.delete(url, &[]).await?;
        Ok(())
    }

    async fn create_policy(&self, policy: &PolicyRequest) -> Result<String, CloudError> {
        let url = build_url(&self.inner.endpoints.iam, &["v1", "policies"], &[])?;
        let roles: Vec<Value> = policy.roles.iter().map(|r| json!({ "role_id": r })).collect();
        let body = json!({
            "type": "access",
            "subjects": [{ "attributes": [{ "name": "iam_id", "value": policy.subject_iam_id }] }],
            "roles": roles,
            "resources": [{ "attributes": policy.resource_attributes }],
        });
        let created: PolicyResponse = self.inner.post(url, &[], &body).await?;
        Ok(created.id)
    }

    async fn create_api_key(
        &self,
        account_id: &str,
        iam_id: &str,
        name: &str,
    ) -> Result<ApiKey, CloudError> {
        let url = build_url(&self.inner.endpoints.iam, &["v1", "apikeys"], &[])?;
        let body = json!({
            "account_id": account_id,
            "iam_id": iam_id,
            "name": name,
            "store_value": false,
        });
        self.inner.post(url, &[], &body).await
    }
}

// ============================================================================
// Resource controller / global catalog
// ============================================================================

struct ResourceClient {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
struct ResourceList<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
}

#[async_trait]
impl ResourceManager for ResourceClient {
    async fn resource_group_id(
        &self,
        name: &str,
        account_id: &str,
    ) -> Result<Option<String>, CloudError> {
        let url = build_url(
            &self.inner.endpoints.resource_controller,
            &["v2", "resource_groups"],
            &[("account_id", account_id.to_string()), ("name", name.to_string())],
        )?;
        let list: ResourceList<ResourceGroup> = self.inner.get(url, &[]).await?;
        Ok(list
            .resources
            .into_iter()
            .find(|g| g.name == name)
            .map(|g| g.id))
    }

    async fn catalog_ids(
        &self,
        service: &str,
        plan: Option<&str>,
    ) -> Result<CatalogIds, CloudError> {
        let base = &self.inner.endpoints.global_catalog;
        let url = build_url(
            base,
            &["api", "v1"],
            &[("q", service.to_string()), ("kind", "service".to_string())],
        )?;
        let services: ResourceList<CatalogEntry> = self.inner.get(url, &[]).await?;
        let service_id = services
            .resources
            .into_iter()
            .find(|s| s.name == service)
            .map(|s| s.id)
            .ok_or_else(|| CloudError::http(404, format!("service {service} not found in catalog")))?;

        let plan_id = match plan {
            Some(plan) => {
                let url = build_url(base, &["api", "v1", service_id.as_str(), "plan"], &[])?;
                let plans: ResourceList<CatalogEntry> = self.inner.get(url, &[]).await?;
                Some(
                    plans
                        .resources
                        .into_iter()
                        .find(|p| p.name == plan)
                        .map(|p| p.id)
                        .ok_or_else(|| {
                            CloudError::http(404, format!("plan {plan} of service {service} not found"))
                        })?,
                )
            }
            None => None,
        };
        Ok(CatalogIds { service_id, plan_id })
    }

    async fn list_resource_instances(
        &self,
        query: &ResourceInstanceQuery,
        start: Option<&str>,
    ) -> Result<Page<ResourceInstance>, CloudError> {
        let base = &self.inner.endpoints.resource_controller;
        let mut params: Vec<(&str, String)> = Vec::new();
        let filters = [
            ("name", &query.name),
            ("resource_group_id", &query.resource_group_id),
            ("resource_id", &query.resource_id),
            ("resource_plan_id", &query.resource_plan_id),
        ];
        for (key, value) in filters {
            if let Some(value) = value {
                params.push((key, value.clone()));
            }
        }
        params.extend(start_query(start));
        let url = build_url(base, &["v2", "resource_instances"], &params)?;
        let list: ResourceList<ResourceInstance> = self.inner.get(url, &[]).await?;

        // next_url is relative to the service root.
        let next = match list.next_url {
            Some(href) if !href.is_empty() => Some(Url::parse(base)?.join(&href)?.to_string()),
            _ => None,
        };
        Ok(Page {
            items: list.resources,
            next,
        })
    }

    async fn get_resource_instance(&self, id: &str) -> Result<ResourceInstance, CloudError> {
        let url = build_url(
            &self.inner.endpoints.resource_controller,
            &["v2", "resource_instances", id],
            &[],
        )?;
        self.inner.get(url, &[]).await
    }

    async fn create_resource_instance(
        &self,
        request: &CreateResourceInstance,
    ) -> Result<ResourceInstance, CloudError> {
        let url = build_url(
            &self.inner.endpoints.resource_controller,
            &["v2", "resource_instances"],
            &[],
        )?;
        self.inner.post(url, &[], request).await
    }

    async fn delete_resource_instance(&self, id: &str) -> Result<(), CloudError> {
        let url = build_url(
            &self.inner.endpoints.resource_controller,
            &["v2", "resource_instances", id],
            &[("recursive", "true".to_string())],
        )?;
        self.inner.delete(url, &[]).await?;
        Ok(())
    }
}

// ============================================================================
// CIS
// ============================================================================

struct CisClient {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
struct CisResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(Deserialize)]
struct CisList<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
    #[serde(default)]
    result_info: Option<CisResultInfo>,
}

impl CisClient {
    /// CIS paginates by page number. Synthesize a `start=<page+1>` href on the
    /// listing URL while pages remain.
    fn next_page(url: &Url, info: Option<&CisResultInfo>) -> Option<String> {
        let info = info?;
        if info.page >= info.total_pages {
            return None;
        }
        let mut next = url.clone();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "page" && k != "start")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        next.query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair("start", &(info.page + 1).to_string());
        Some(next.to_string())
    }

    fn page_query(start: Option<&str>) -> Vec<(&'static str, String)> {
        vec![
            ("page", start.unwrap_or("1").to_string()),
            ("per_page", CLOUD_LIST_PAGE_SIZE.to_string()),
        ]
    }
}

#[async_trait]
impl DnsService for CisClient {
    async fn list_zones(
        &self,
        cis_crn: &str,
        start: Option<&str>,
    ) -> Result<Page<DnsZone>, CloudError> {
        let url = build_url(
            &self.inner.endpoints.cis,
            &["v1", cis_crn, "zones"],
            &Self::page_query(start),
        )?;
        let list: CisList<DnsZone> = self.inner.get(url.clone(), &[]).await?;
        Ok(Page {
            next: Self::next_page(&url, list.result_info.as_ref()),
            items: list.result,
        })
    }

    async fn list_dns_records(
        &self,
        cis_crn: &str,
        zone_id: &str,
        name: Option<&str>,
        start: Option<&str>,
    ) -> Result<Page<DnsRecord>, CloudError> {
        let mut query = Self::page_query(start);
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }
        let url = build_url(
            &self.inner.endpoints.cis,
            &["v1", cis_crn, "zones", zone_id, "dns_records"],
            &query,
        )?;
        let list: CisList<DnsRecord> = self.inner.get(url.clone(), &[]).await?;
        Ok(Page {
            next: Self::next_page(&url, list.result_info.as_ref()),
            items: list.result,
        })
    }

    async fn delete_dns_record(
        &self,
        cis_crn: &str,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudError> {
        let url = build_url(
            &self.inner.endpoints.cis,
            &["v1", cis_crn, "zones", zone_id, "dns_records", record_id],
            &[],
        )?;
        self.inner.delete(url, &[]).await?;
        Ok(())
    }
}

// ============================================================================
// VPC
// ============================================================================

struct VpcClient {
    inner: Arc<Inner>,
    base: String,
}

#[derive(Deserialize)]
struct ZoneList {
    #[serde(default)]
    zones: Vec<ZoneRef>,
}

/// VPC list responses: `{ "<collection>": [...], "next": { "href": ... } }`.
fn vpc_page<T: DeserializeOwned>(mut body: Value, collection: &str) -> Result<Page<T>, CloudError> {
    let items = match body.get_mut(collection) {
        Some(items) => serde_json::from_value(items.take())?,
        None => Vec::new(),
    };
    let next = body
        .pointer("/next/href")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Page { items, next })
}

impl VpcClient {
    fn url(&self, segments: &[&str], extra: &[(&str, String)]) -> Result<Url, CloudError> {
        let mut query = vec![
            ("version", VPC_API_VERSION.to_string()),
            ("generation", "2".to_string()),
        ];
        query.extend(extra.iter().cloned());
        let mut path = vec!["v1"];
        path.extend_from_slice(segments);
        build_url(&self.base, &path, &query)
    }

    fn list_query(start: Option<&str>) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", CLOUD_LIST_PAGE_SIZE.to_string())];
        query.extend(start_query(start));
        query
    }
}

#[async_trait]
impl VpcService for VpcClient {
    async fn list_vpcs(&self, start: Option<&str>) -> Result<Page<Vpc>, CloudError> {
        let url = self.url(&["vpcs"], &Self::list_query(start))?;
        vpc_page(self.inner.get(url, &[]).await?, "vpcs")
    }

    async fn get_vpc(&self, id: &str) -> Result<Vpc, CloudError> {
        self.inner.get(self.url(&["vpcs", id], &[])?, &[]).await
    }

    async fn create_vpc(&self, request: &CreateVpc) -> Result<Vpc, CloudError> {
        self.inner.post(self.url(&["vpcs"], &[])?, &[], request).await
    }

    async fn delete_vpc(&self, id: &str) -> Result<(), CloudError> {
        self.inner.delete(self.url(&["vpcs", id], &[])?, &[]).await?;
        Ok(())
    }

    async fn get_security_group(&self, id: &str) -> Result<SecurityGroup, CloudError> {
        self.inner.get(self.url(&["security_groups", id], &[])?, &[]).await
    }

    async fn create_security_group_rule(
        &self,
        security_group_id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<SecurityGroupRule, CloudError> {
        let url = self.url(&["security_groups", security_group_id, "rules"], &[])?;
        self.inner.post(url, &[], rule).await
    }

    async fn list_address_prefixes(
        &self,
        vpc_id: &str,
        start: Option<&str>,
    ) -> Result<Page<AddressPrefix>, CloudError> {
        let url = self.url(&["vpcs", vpc_id, "address_prefixes"], &Self::list_query(start))?;
        vpc_page(self.inner.get(url, &[]).await?, "address_prefixes")
    }

    async fn list_region_zones(&self, region: &str) -> Result<Vec<String>, CloudError> {
        let url = self.url(&["regions", region, "zones"], &[])?;
        let zones: ZoneList = self.inner.get(url, &[]).await?;
        Ok(zones.zones.into_iter().map(|z| z.name).collect())
    }

    async fn list_subnets(
        &self,
        query: &SubnetQuery,
        start: Option<&str>,
    ) -> Result<Page<Subnet>, CloudError> {
        let mut params = Self::list_query(start);
        if let Some(rg) = &query.resource_group_id {
            params.push(("resource_group.id", rg.clone()));
        }
        if let Some(rt) = &query.routing_table_id {
            params.push(("routing_table.id", rt.clone()));
        }
        let url = self.url(&["subnets"], &params)?;
        vpc_page(self.inner.get(url, &[]).await?, "subnets")
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet, CloudError> {
        self.inner.get(self.url(&["subnets", id], &[])?, &[]).await
    }

    async fn create_subnet(&self, request: &CreateSubnet) -> Result<Subnet, CloudError> {
        self.inner.post(self.url(&["subnets"], &[])?, &[], request).await
    }

    async fn delete_subnet(&self, id: &str) -> Result<(), CloudError> {
        self.inner.delete(self.url(&["subnets", id], &[])?, &[]).await?;
        Ok(())
    }

    async fn list_load_balancers(
        &self,
        start: Option<&str>,
    ) -> Result<Page<LoadBalancer>, CloudError> {
        let url = self.url(&["load_balancers"], &Self::list_query(start))?;
        vpc_page(self.inner.get(url, &[]).await?, "load_balancers")
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, CloudError> {
        self.inner.get(self.url(&["load_balancers", id], &[])?, &[]).await
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError> {
        self.inner
            .delete(self.url(&["load_balancers", id], &[])?, &[])
            .await?;
        Ok(())
    }
}

// ============================================================================
// PowerVS
// ============================================================================

struct PowerVsClient {
    inner: Arc<Inner>,
    base: String,
    cloud_instance_id: String,
    crn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudConnectionList {
    #[serde(default)]
    cloud_connections: Vec<CloudConnection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudConnectionUpdateResponse {
    #[serde(default)]
    job_ref: Option<JobRef>,
}

impl PowerVsClient {
    fn url(&self, segments: &[&str]) -> Result<Url, CloudError> {
        let mut path = vec!["pcloud", "v1", "cloud-instances", self.cloud_instance_id.as_str()];
        path.extend_from_slice(segments);
        build_url(&self.base, &path, &[])
    }

    fn headers(&self) -> [(&'static str, String); 1] {
        [("CRN", self.crn.clone())]
    }

    async fn put(&self, url: Url, body: Option<&Value>) -> Result<(StatusCode, String), CloudError> {
        self.inner.send(Method::PUT, url, &self.headers(), body).await
    }
}

#[async_trait]
impl PowerVsService for PowerVsClient {
    async fn list_cloud_connections(&self) -> Result<Vec<CloudConnection>, CloudError> {
        let list: CloudConnectionList = self
            .inner
            .get(self.url(&["cloud-connections"])?, &self.headers())
            .await?;
        Ok(list.cloud_connections)
    }

    async fn get_cloud_connection(&self, id: &str) -> Result<CloudConnection, CloudError> {
        self.inner
            .get(self.url(&["cloud-connections", id])?, &self.headers())
            .await
    }

    async fn create_cloud_connection(
        &self,
        request: &CreateCloudConnection,
    ) -> Result<CloudConnection, CloudError> {
        self.inner
            .post(self.url(&["cloud-connections"])?, &self.headers(), request)
            .await
    }

    async fn update_cloud_connection(
        &self,
        id: &str,
        request: &UpdateCloudConnection,
    ) -> Result<Option<JobRef>, CloudError> {
        let body = serde_json::to_value(request)?;
        let (status, text) = self
            .put(self.url(&["cloud-connections", id])?, Some(&body))
            .await?;
        // 202 answers with a bare job reference, 200 with the connection.
        if status == StatusCode::ACCEPTED {
            if let Ok(job) = serde_json::from_str::<JobRef>(&text) {
                return Ok(Some(job));
            }
        }
        let response: CloudConnectionUpdateResponse =
            serde_json::from_str(&text).unwrap_or(CloudConnectionUpdateResponse { job_ref: None });
        Ok(response.job_ref)
    }

    async fn add_network(
        &self,
        cloud_connection_id: &str,
        network_id: &str,
    ) -> Result<JobRef, CloudError> {
        let url = self.url(&["cloud-connections", cloud_connection_id, "networks", network_id])?;
        let (_, text) = self.put(url, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn remove_network(
        &self,
        cloud_connection_id: &str,
        network_id: &str,
    ) -> Result<JobRef, CloudError> {
        let url = self.url(&["cloud-connections", cloud_connection_id, "networks", network_id])?;
        let text = self.inner.delete(url, &self.headers()).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn delete_cloud_connection(&self, id: &str) -> Result<JobRef, CloudError> {
        let text = self
            .inner
            .delete(self.url(&["cloud-connections", id])?, &self.headers())
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_job(&self, id: &str) -> Result<Job, CloudError> {
        self.inner.get(self.url(&["jobs", id])?, &self.headers()).await
    }

    async fn list_dhcp_servers(&self) -> Result<Vec<DhcpServer>, CloudError> {
        self.inner
            .get(self.url(&["services", "dhcp"])?, &self.headers())
            .await
    }

    async fn get_dhcp_server(&self, id: &str) -> Result<DhcpServer, CloudError> {
        self.inner
            .get(self.url(&["services", "dhcp", id])?, &self.headers())
            .await
    }

    async fn create_dhcp_server(
        &self,
        request: &CreateDhcpServer,
    ) -> Result<DhcpServer, CloudError> {
        self.inner
            .post(self.url(&["services", "dhcp"])?, &self.headers(), request)
            .await
    }

    async fn delete_dhcp_server(&self, id: &str) -> Result<(), CloudError> {
        self.inner
            .delete(self.url(&["services", "dhcp", id])?, &self.headers())
            .await?;
        Ok(())
    }

    async fn get_network(&self, id: &str) -> Result<Network, CloudError> {
        self.inner.get(self.url(&["networks", id])?, &self.headers()).await
    }

    async fn get_pvm_instance(&self, id: &str) -> Result<PvmInstance, CloudError> {
        self.inner
            .get(self.url(&["pvm-instances", id])?, &self.headers())
            .await
    }
}

// ============================================================================
// Direct Link / Transit Gateway / Tagging
// ============================================================================

struct DirectLinkClient {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
struct GatewayList {
    #[serde(default)]
    gateways: Vec<DirectLinkGateway>,
}

impl DirectLinkClient {
    fn url(&self, segments: &[&str]) -> Result<Url, CloudError> {
        let mut path = vec!["v1", "gateways"];
        path.extend_from_slice(segments);
        build_url(
            &self.inner.endpoints.direct_link,
            &path,
            &[("version", VPC_API_VERSION.to_string())],
        )
    }
}

#[async_trait]
impl DirectLinkService for DirectLinkClient {
    async fn list_gateways(&self) -> Result<Vec<DirectLinkGateway>, CloudError> {
        let list: GatewayList = self.inner.get(self.url(&[])?, &[]).await?;
        Ok(list.gateways)
    }

    async fn get_gateway(&self, id: &str) -> Result<DirectLinkGateway, CloudError> {
        self.inner.get(self.url(&[id])?, &[]).await
    }
}

struct TransitClient {
    inner: Arc<Inner>,
}

impl TransitClient {
    fn url(&self, segments: &[&str], extra: &[(&str, String)]) -> Result<Url, CloudError> {
        let mut path = vec!["v1", "transit_gateways"];
        path.extend_from_slice(segments);
        let mut query = vec![("version", VPC_API_VERSION.to_string())];
        query.extend(extra.iter().cloned());
        build_url(&self.inner.endpoints.transit, &path, &query)
    }
}

#[async_trait]
impl TransitGatewayService for TransitClient {
    async fn list_transit_gateways(
        &self,
        start: Option<&str>,
    ) -> Result<Page<TransitGateway>, CloudError> {
        let mut extra = vec![("limit", CLOUD_LIST_PAGE_SIZE.to_string())];
        extra.extend(start_query(start));
        let url = self.url(&[], &extra)?;
        vpc_page(self.inner.get(url, &[]).await?, "transit_gateways")
    }

    async fn get_transit_gateway(&self, id: &str) -> Result<TransitGateway, CloudError> {
        self.inner.get(self.url(&[id], &[])?, &[]).await
    }
}

struct TaggingClient {
    inner: Arc<Inner>,
}

#[async_trait]
impl TaggingService for TaggingClient {
    async fn attach_tags(&self, crns: &[String], tags: &[String]) -> Result<(), CloudError> {
        let url = build_url(
            &self.inner.endpoints.tagging,
            &["v3", "tags", "attach"],
            &[("tag_type", "user".to_string())],
        )?;
        let resources: Vec<Value> = crns.iter().map(|crn| json!({ "resource_id": crn })).collect();
        let body = json!({ "resources": resources, "tag_names": tags });
        let _: Value = self.inner.post(url, &[], &body).await?;
        Ok(())
    }
}
