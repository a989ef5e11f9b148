// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the IBM Cloud HTTP clients

#[cfg(test)]
mod tests {
    use super::super::client::inject_prefix;
    use super::super::{
        CloudError, CloudProvider, Endpoints, IbmCloud, ResourceInstanceQuery, UpdateCloudConnection,
    };
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with_token() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "test-token",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;
        server
    }

    fn cloud(server: &MockServer) -> IbmCloud {
        IbmCloud::with_endpoints("test-key", Endpoints::single(&server.uri()))
            .expect("client should build")
    }

    #[test]
    fn test_inject_prefix() {
        assert_eq!(
            inject_prefix("https://iam.cloud.ibm.com", "private"),
            "https://private.iam.cloud.ibm.com"
        );
    }

    #[test]
    fn test_endpoint_overrides() {
        let endpoints = Endpoints::default().with_overrides(Some("private"), None, Some("test"));
        assert_eq!(endpoints.power, "https://private.{region}.power-iaas.cloud.ibm.com");
        assert_eq!(endpoints.vpc, "https://{region}.iaas.cloud.ibm.com");
        assert_eq!(endpoints.iam, "https://test.iam.cloud.ibm.com");
        assert_eq!(
            endpoints.resource_controller,
            "https://test.resource-controller.cloud.ibm.com"
        );
        assert_eq!(endpoints.cis, "https://api.cis.cloud.ibm.com");
    }

    #[tokio::test]
    async fn test_list_vpcs_returns_next_href_and_sends_bearer() {
        let server = server_with_token().await;
        let next = format!("{}/v1/vpcs?limit=50&start=r006-abc", server.uri());
        Mock::given(method("GET"))
            .and(path("/v1/vpcs"))
            .and(header("Authorization", "Bearer test-token"))
            .and(query_param("version", "2023-12-19"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpcs": [{
                    "id": "r006-1",
                    "crn": "crn:v1:vpc:1",
                    "name": "ex-1-vpc",
                    "status": "available"
                }],
                "next": { "href": next }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = cloud(&server)
            .vpc("us-south")
            .list_vpcs(None)
            .await
            .expect("list should succeed");

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "ex-1-vpc");
        assert_eq!(page.next.as_deref(), Some(next.as_str()));
    }

    #[tokio::test]
    async fn test_token_is_cached_between_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "cached",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/subnets/sn-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sn-1",
                "name": "ex-1-vpc-sn",
                "status": "available",
                "vpc": { "id": "r006-1" },
                "zone": { "name": "us-south-1" }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let vpc = cloud(&server).vpc("us-south");
        assert!(vpc.get_subnet("sn-1").await.is_ok());
        assert!(vpc.get_subnet("sn-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_not_found_maps_to_http_error() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v1/vpcs/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errors": [{ "code": "not_found", "message": "VPC not found" }]
            })))
            .mount(&server)
            .await;

        let err = cloud(&server)
            .vpc("us-south")
            .get_vpc("missing")
            .await
            .expect_err("lookup should fail");

        match &err {
            CloudError::Http { status, message } => {
                assert_eq!(*status, 404);
                assert_eq!(message, "VPC not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cis_page_numbers_become_start_cursor() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v1/crn:v1:cis:1/zones"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{ "id": "z1", "name": "bd.example" }],
                "result_info": { "page": 1, "total_pages": 2 }
            })))
            .mount(&server)
            .await;

        let page = cloud(&server)
            .dns()
            .list_zones("crn:v1:cis:1", None)
            .await
            .expect("list should succeed");

        assert_eq!(page.items[0].name, "bd.example");
        let next = page.next.expect("a second page remains");
        assert!(next.contains("start=2"), "next href was {next}");
    }

    #[tokio::test]
    async fn test_resource_instance_next_url_is_made_absolute() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v2/resource_instances"))
            .and(query_param("resource_group_id", "rg-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{ "id": "crn:1", "guid": "g1", "name": "ex-1-nodepool", "state": "active" }],
                "next_url": "/v2/resource_instances?start=tok&resource_group_id=rg-1"
            })))
            .mount(&server)
            .await;

        let query = ResourceInstanceQuery {
            resource_group_id: Some("rg-1".to_string()),
            ..ResourceInstanceQuery::default()
        };
        let page = cloud(&server)
            .resource_manager()
            .list_resource_instances(&query, None)
            .await
            .expect("list should succeed");

        assert_eq!(page.items[0].guid, "g1");
        assert_eq!(
            page.next,
            Some(format!(
                "{}/v2/resource_instances?start=tok&resource_group_id=rg-1",
                server.uri()
            ))
        );
    }

    #[tokio::test]
    async fn test_powervs_update_returns_job_and_sends_crn() {
        let server = server_with_token().await;
        Mock::given(method("PUT"))
            .and(path("/pcloud/v1/cloud-instances/ci-1/cloud-connections/cc-1"))
            .and(header(
                "CRN",
                "crn:v1:bluemix:public:power-iaas:dal10:a/acct:ci-1::",
            ))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "id": "job-1" })))
            .mount(&server)
            .await;

        let job = cloud(&server)
            .powervs("us-south", "dal10", "ci-1", "acct")
            .update_cloud_connection(
                "cc-1",
                &UpdateCloudConnection {
                    global_routing: Some(true),
                    vpc: None,
                },
            )
            .await
            .expect("update should succeed");

        assert_eq!(job.map(|j| j.id).as_deref(), Some("job-1"));
    }

    #[tokio::test]
    async fn test_account_id_uses_api_key_header() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v1/apikeys/details"))
            .and(header("IAM-Apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "account_id": "acct-9" })))
            .mount(&server)
            .await;

        let account = cloud(&server).iam().account_id().await.expect("details");
        assert_eq!(account, "acct-9");
    }
}
