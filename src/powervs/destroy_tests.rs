// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `powervs/destroy.rs`

#[cfg(test)]
mod tests {
    use super::super::destroy_infra;
    use crate::constants::CLOUD_INSTANCE_REMOVED_STATE;
    use crate::ibmcloud::mock::MockCloud;
    use crate::powervs::create::setup_infra;
    use crate::powervs::infra::Infra;
    use crate::powervs::options::{CreateOptions, DestroyOptions};
    use tokio_util::sync::CancellationToken;

    const APPS_RECORD: &str = "*.apps.example.bd.example";

    fn options() -> CreateOptions {
        CreateOptions {
            infra_id: "ex-1".to_string(),
            resource_group: "rg".to_string(),
            base_domain: "bd.example".to_string(),
            ..CreateOptions::default()
        }
    }

    fn cloud() -> MockCloud {
        MockCloud::new().with_cis_domain("bd.example")
    }

    async fn create(cloud: &MockCloud, options: &CreateOptions) -> Infra {
        let (infra, result) = setup_infra(cloud, options, &CancellationToken::new()).await;
        result.unwrap();
        infra
    }

    fn instance_state(cloud: &MockCloud, guid: &str) -> String {
        cloud.with_state(|s| {
            s.resource_instances
                .iter()
                .find(|i| i.guid == guid)
                .map(|i| i.state.clone())
                .unwrap_or_default()
        })
    }

    fn assert_all_gone(cloud: &MockCloud, infra: &Infra) {
        cloud.with_state(|s| {
            assert!(s.vpcs.is_empty(), "vpcs left: {:?}", s.vpcs);
            assert!(s.subnets.is_empty(), "subnets left: {:?}", s.subnets);
            assert!(s.service_ids.is_empty(), "service ids left: {:?}", s.service_ids);
            assert!(!s.workspaces.contains_key(&infra.powervs_cloud_instance_id));
        });
        assert_eq!(
            instance_state(cloud, &infra.powervs_cloud_instance_id),
            CLOUD_INSTANCE_REMOVED_STATE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_from_record() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;
        cloud.add_dns_record("zone-1", APPS_RECORD);
        cloud.with_state(|s| s.calls.clear());

        let destroy_options = DestroyOptions::from(&create_options);
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();

        assert_all_gone(&cloud, &infra);
        assert_eq!(cloud.calls_for("delete_dns_record").len(), 1);
        assert!(cloud.with_state(|s| s.dns_records["zone-1"].is_empty()));
        assert_eq!(
            cloud.calls_for("delete_cloud_connection"),
            vec![format!("delete_cloud_connection:{}", infra.powervs_cloud_connection_id)]
        );
        // Ids came from the record, so nothing was looked up by name.
        assert!(cloud
            .calls_for("list_resource_instances")
            .iter()
            .all(|c| !c.ends_with("ex-1-nodepool")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_by_naming_convention() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;

        let destroy_options = DestroyOptions::from(&create_options);
        destroy_infra(&cloud, &destroy_options, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_all_gone(&cloud, &infra);
        assert_eq!(
            cloud.calls_for("delete_vpc"),
            vec![format!("delete_vpc:{}", infra.vpc_id)]
        );
        assert_eq!(
            cloud.calls_for("delete_subnet"),
            vec![format!("delete_subnet:{}", infra.vpc_subnet_id)]
        );
        // No wildcard record existed, which is not an error.
        assert!(cloud.calls_for("delete_dns_record").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_with_nothing_to_delete() {
        let cloud = cloud();
        let destroy_options = DestroyOptions::from(&options());

        destroy_infra(&cloud, &destroy_options, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(cloud.calls_for("delete_vpc").is_empty());
        assert!(cloud.calls_for("delete_resource_instance").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_runs_twice() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;
        let destroy_options = DestroyOptions::from(&create_options);
        let cancel = CancellationToken::new();

        destroy_infra(&cloud, &destroy_options, Some(&infra), &cancel).await.unwrap();
        destroy_infra(&cloud, &destroy_options, Some(&infra), &cancel).await.unwrap();
        assert_all_gone(&cloud, &infra);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_vpc_is_kept() {
        let cloud = cloud();
        let vpc = cloud.add_vpc("my-vpc", &[80, 443]);
        let create_options = CreateOptions {
            vpc: Some("my-vpc".to_string()),
            ..options()
        };
        let infra = create(&cloud, &create_options).await;

        let destroy_options = DestroyOptions::from(&create_options);
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();

        assert!(cloud.calls_for("delete_vpc").is_empty());
        assert!(cloud.with_state(|s| s.vpcs.iter().any(|v| v.id == vpc.id)));
        assert!(cloud.with_state(|s| s.subnets.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_transit_gateway_is_looked_up_and_kept() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;
        cloud.add_transit_gateway("other-tg", "us-east");
        let gateway = cloud.add_transit_gateway("my-tg", "us-south");

        let destroy_options = DestroyOptions {
            transit_gateway: Some("my-tg".to_string()),
            transit_gateway_location: Some("us-south".to_string()),
            ..DestroyOptions::from(&create_options)
        };
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();

        assert_all_gone(&cloud, &infra);
        assert_eq!(cloud.calls_for("list_transit_gateways").len(), 1);
        assert!(cloud.with_state(|s| s.transit_gateways.iter().any(|g| g.id == gateway.id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_user_transit_gateway_does_not_fail_destroy() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;
        cloud.add_transit_gateway("my-tg", "us-east");

        let destroy_options = DestroyOptions {
            transit_gateway: Some("my-tg".to_string()),
            transit_gateway_location: Some("us-south".to_string()),
            ..DestroyOptions::from(&create_options)
        };
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();

        assert_all_gone(&cloud, &infra);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_with_foreign_vpc_name_keeps_vpc() {
        let cloud = cloud();
        let vpc = cloud.add_vpc("my-vpc", &[80, 443]);
        let infra = Infra {
            vpc_name: "my-vpc".to_string(),
            vpc_id: vpc.id.clone(),
            ..Infra::new("ex-1")
        };

        let destroy_options = DestroyOptions::from(&options());
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();
        assert!(cloud.calls_for("delete_vpc").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_cloud_instance_keeps_everything_but_dhcp() {
        let cloud = cloud();
        let instance = cloud.add_cloud_instance("byo", "us-south");
        let create_options = CreateOptions {
            cloud_instance_id: Some(instance.guid.clone()),
            ..options()
        };
        let infra = create(&cloud, &create_options).await;

        let destroy_options = DestroyOptions::from(&create_options);
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();

        assert!(cloud.calls_for("delete_resource_instance").is_empty());
        assert_eq!(
            cloud.calls_for("delete_dhcp_server"),
            vec![format!("delete_dhcp_server:{}", infra.powervs_dhcp_id)]
        );
        assert_eq!(instance_state(&cloud, &instance.guid), "active");
        cloud.with_state(|s| {
            let workspace = &s.workspaces[&instance.guid];
            assert!(workspace.dhcp_servers.is_empty());
            assert!(workspace.cloud_connections.is_empty());
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_cloud_connection_is_unlinked() {
        let cloud = cloud();
        let instance = cloud.add_cloud_instance("byo", "us-south");
        let connection = cloud.add_cloud_connection(&instance.guid, "shared-cc").unwrap();
        let create_options = CreateOptions {
            cloud_instance_id: Some(instance.guid.clone()),
            cloud_connection: Some("shared-cc".to_string()),
            ..options()
        };
        let infra = create(&cloud, &create_options).await;

        let destroy_options = DestroyOptions::from(&create_options);
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();

        assert!(cloud.calls_for("delete_cloud_connection").is_empty());
        assert_eq!(
            cloud.calls_for("remove_network"),
            vec![format!("remove_network:{}", infra.powervs_dhcp_subnet_id)]
        );
        cloud.with_state(|s| {
            let kept = &s.workspaces[&instance.guid].cloud_connections;
            assert_eq!(kept.len(), 1);
            assert_eq!(kept[0].cloud_connection_id, connection.cloud_connection_id);
            assert!(kept[0].networks.is_empty());
            assert!(!kept[0].has_vpc(&infra.vpc_crn));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_load_balancers_are_deleted() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;
        cloud.add_load_balancer("kube-example-router", &infra.vpc_subnet_id);
        cloud.add_load_balancer("other-cluster-lb", &infra.vpc_subnet_id);
        cloud.add_load_balancer("kube-example-elsewhere", "subnet-other");

        let destroy_options = DestroyOptions::from(&create_options);
        destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap();

        let remaining: Vec<String> =
            cloud.with_state(|s| s.load_balancers.iter().map(|lb| lb.name.clone()).collect());
        assert_eq!(remaining, vec!["other-cluster-lb", "kube-example-elsewhere"]);
        assert_eq!(cloud.calls_for("delete_load_balancer").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_aggregated_and_later_steps_run() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;
        cloud.fail("delete_service_id", 500, "iam unavailable");
        cloud.fail("delete_vpc", 500, "vpc busy");

        let destroy_options = DestroyOptions::from(&create_options);
        let err = destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.len(), 2);
        let rendered = err.to_string();
        assert!(rendered.starts_with("error in destroying infra: ["), "{rendered}");
        assert!(rendered.contains("iam unavailable"), "{rendered}");
        assert!(rendered.contains("vpc busy"), "{rendered}");

        // Steps after the failures still ran.
        assert!(cloud.with_state(|s| s.subnets.is_empty()));
        assert_eq!(
            instance_state(&cloud, &infra.powervs_cloud_instance_id),
            CLOUD_INSTANCE_REMOVED_STATE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cloud_instance_delete_is_retried() {
        let cloud = cloud();
        let create_options = options();
        let infra = create(&cloud, &create_options).await;
        cloud.fail("delete_resource_instance", 409, "instance busy");

        let destroy_options = DestroyOptions::from(&create_options);
        let err = destroy_infra(&cloud, &destroy_options, Some(&infra), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.len(), 1);
        assert_eq!(cloud.calls_for("delete_resource_instance").len(), 5);
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_any_call() {
        let cloud = cloud();
        let err = destroy_infra(&cloud, &DestroyOptions::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.len(), 1);
        assert!(err.to_string().contains("--infra-id"));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_group_stops_destroy() {
        let cloud = cloud();
        let destroy_options = DestroyOptions {
            resource_group: "nope".to_string(),
            ..DestroyOptions::from(&options())
        };
        let err = destroy_infra(&cloud, &destroy_options, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.len(), 1);
        assert!(cloud.calls_for("list_dns_records").is_empty());
    }
}
