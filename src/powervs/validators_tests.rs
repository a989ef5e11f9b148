// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `powervs/validators.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        check_cloud_connection_capacity, check_ingress_rules, count_cloud_connections, find_by_id,
        find_by_name, validate_cloud_connection_in_zone, CloudConnections, CloudInstances,
        TransitGateways, Vpcs,
    };
    use crate::errors::InfraError;
    use crate::ibmcloud::mock::{MockCloud, MOCK_RESOURCE_GROUP};
    use crate::ibmcloud::{CloudConnection, CloudProvider, ResourceInstanceQuery};
    use tokio_util::sync::CancellationToken;

    fn connection(name: &str) -> CloudConnection {
        CloudConnection {
            cloud_connection_id: format!("{name}-id"),
            name: name.to_string(),
            ..CloudConnection::default()
        }
    }

    #[test]
    fn test_cloud_connection_capacity_rule() {
        assert!(check_cloud_connection_capacity(0, 0).is_ok());
        assert!(check_cloud_connection_capacity(0, 1).is_ok());
        assert!(check_cloud_connection_capacity(1, 2).is_ok());
        assert!(matches!(
            check_cloud_connection_capacity(0, 2),
            Err(InfraError::TooManyCloudConnections { count: 2, max: 2 })
        ));
        assert!(check_cloud_connection_capacity(1, 3).is_err());
    }

    #[test]
    fn test_count_cloud_connections() {
        let connections = vec![connection("a"), connection("ex-1-cc"), connection("b")];
        assert_eq!(count_cloud_connections(&connections, "ex-1-cc"), (1, 3));
        assert_eq!(count_cloud_connections(&connections, "missing"), (0, 3));
    }

    #[tokio::test]
    async fn test_find_vpc_by_name_pages_and_scopes() {
        let cloud = MockCloud::new();
        cloud.with_state(|s| s.page_size = 1);
        cloud.add_vpc("other", &[]);
        cloud.add_vpc("wanted", &[80, 443]);
        let api = cloud.vpc("us-south");
        let cancel = CancellationToken::new();

        let finder = Vpcs::new(api.as_ref(), "us-south", Some(MOCK_RESOURCE_GROUP.1));
        let vpc = find_by_name(&finder, &cancel, "wanted").await.unwrap();
        assert_eq!(vpc.name, "wanted");
        assert_eq!(cloud.calls_for("list_vpcs").len(), 2);

        let elsewhere = Vpcs::new(api.as_ref(), "eu-de", None);
        let err = find_by_name(&elsewhere, &cancel, "wanted").await.unwrap_err();
        assert!(matches!(err, InfraError::NotFound { kind: "vpc", .. }));

        let other_group = Vpcs::new(api.as_ref(), "us-south", Some("another-rg"));
        assert!(find_by_name(&other_group, &cancel, "wanted").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_find_cloud_instance_by_id_checks_state() {
        let cloud = MockCloud::new();
        let instance = cloud.add_cloud_instance("ws", "us-south");
        let rm = cloud.resource_manager();
        let finder = CloudInstances::new(rm.as_ref(), ResourceInstanceQuery::default(), "us-south");

        let found = find_by_id(&finder, &instance.guid).await.unwrap();
        assert_eq!(found.name, "ws");

        cloud.with_state(|s| {
            if let Some(i) = s.resource_instances.iter_mut().find(|i| i.guid == instance.guid) {
                i.state = "provisioning".to_string();
            }
        });
        match find_by_id(&finder, &instance.guid).await {
            Err(InfraError::State { kind, state, .. }) => {
                assert_eq!(kind, "cloud instance");
                assert_eq!(state, "provisioning");
            }
            other => panic!("expected state error, got {other:?}"),
        }

        assert!(matches!(
            find_by_id(&finder, "missing").await,
            Err(InfraError::NotFound { kind: "cloud instance", name }) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_find_cloud_instance_by_name_respects_zone() {
        let cloud = MockCloud::new();
        cloud.add_cloud_instance("ws", "dal10");
        let rm = cloud.resource_manager();
        let cancel = CancellationToken::new();

        let in_zone = CloudInstances::new(rm.as_ref(), ResourceInstanceQuery::default(), "dal10");
        assert!(find_by_name(&in_zone, &cancel, "ws").await.is_ok());

        let other_zone = CloudInstances::new(rm.as_ref(), ResourceInstanceQuery::default(), "us-south");
        assert!(find_by_name(&other_zone, &cancel, "ws").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_ingress_rules_required() {
        let cloud = MockCloud::new();
        let api = cloud.vpc("us-south");

        let open = cloud.add_vpc("open", &[80, 443]);
        assert!(check_ingress_rules(api.as_ref(), &open).await.is_ok());

        let partial = cloud.add_vpc("partial", &[443]);
        match check_ingress_rules(api.as_ref(), &partial).await {
            Err(InfraError::Policy(message)) => {
                assert!(message.contains("port(s) 80"), "{message}");
                assert!(!message.contains("443"), "{message}");
            }
            other => panic!("expected policy error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cloud_connection_zone_validation() {
        let cloud = MockCloud::new();
        let instance = cloud.add_cloud_instance("ws", "us-south");
        let powervs = cloud.powervs("us-south", "us-south", &instance.guid, "acct-1");

        assert_eq!(
            validate_cloud_connection_in_zone(powervs.as_ref(), "ex-1-cc").await.unwrap(),
            None
        );

        cloud.add_cloud_connection(&instance.guid, "first").unwrap();
        let existing = cloud.add_cloud_connection(&instance.guid, "ex-1-cc").unwrap();
        assert_eq!(
            validate_cloud_connection_in_zone(powervs.as_ref(), "ex-1-cc").await.unwrap(),
            Some(existing.cloud_connection_id.clone())
        );
        assert!(matches!(
            validate_cloud_connection_in_zone(powervs.as_ref(), "ex-2-cc").await,
            Err(InfraError::TooManyCloudConnections { .. })
        ));

        let cancel = CancellationToken::new();
        let found = find_by_name(&CloudConnections::new(powervs.as_ref()), &cancel, "ex-1-cc")
            .await
            .unwrap();
        assert_eq!(found.cloud_connection_id, existing.cloud_connection_id);
    }

    #[tokio::test]
    async fn test_transit_gateway_location_scope() {
        let cloud = MockCloud::new();
        cloud.add_transit_gateway("tg", "us-south");
        let api = cloud.transit_gateway();
        let cancel = CancellationToken::new();

        let anywhere = TransitGateways::new(api.as_ref(), None);
        assert!(find_by_name(&anywhere, &cancel, "tg").await.is_ok());

        let elsewhere = TransitGateways::new(api.as_ref(), Some("eu-de"));
        assert!(find_by_name(&elsewhere, &cancel, "tg").await.unwrap_err().is_not_found());
    }
}
