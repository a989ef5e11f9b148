// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! End-to-end PowerVS infrastructure lifecycle over the in-memory cloud.
//!
//! Mirrors what the `hostedcp` CLI does: create, persist the infra record to
//! a file, then destroy from that file.

use hostedcp::ibmcloud::mock::MockCloud;
use hostedcp::powervs::{destroy_infra, setup_infra, CreateOptions, DestroyOptions, Infra};
use tokio_util::sync::CancellationToken;

fn create_options(output_file: Option<std::path::PathBuf>) -> CreateOptions {
    CreateOptions {
        infra_id: "lifecycle-1".to_string(),
        resource_group: "rg".to_string(),
        base_domain: "bd.example".to_string(),
        output_file,
        ..CreateOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_create_record_destroy() {
    let dir = tempfile::tempdir().unwrap();
    let record_path = dir.path().join("infra.json");
    let cloud = MockCloud::new().with_cis_domain("bd.example");
    let cancel = CancellationToken::new();

    let options = create_options(Some(record_path.clone()));
    let (infra, result) = setup_infra(&cloud, &options, &cancel).await;
    result.unwrap();
    infra.write_json(options.output_file.as_deref()).unwrap();

    assert_eq!(cloud.with_state(|s| s.vpcs.len()), 1);

    let record = Infra::read_json(&record_path).unwrap();
    assert_eq!(record.vpc_id, infra.vpc_id);
    assert_eq!(record.powervs_cloud_instance_id, infra.powervs_cloud_instance_id);
    assert_eq!(record.powervs_cloud_connection_id, infra.powervs_cloud_connection_id);

    let destroy_options = DestroyOptions::from(&options);
    assert_eq!(destroy_options.infra_json.as_deref(), Some(record_path.as_path()));
    destroy_infra(&cloud, &destroy_options, Some(&record), &cancel)
        .await
        .unwrap();

    assert!(cloud.with_state(|s| s.vpcs.is_empty()));
    assert!(cloud.with_state(|s| s.subnets.is_empty()));
    assert!(cloud.with_state(|s| s.service_ids.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_create_is_idempotent_across_runs() {
    let cloud = MockCloud::new().with_cis_domain("bd.example");
    let cancel = CancellationToken::new();
    let options = create_options(None);

    let (first, result) = setup_infra(&cloud, &options, &cancel).await;
    result.unwrap();
    let (second, result) = setup_infra(&cloud, &options, &cancel).await;
    result.unwrap();

    assert_eq!(first.vpc_id, second.vpc_id);
    assert_eq!(first.powervs_cloud_instance_id, second.powervs_cloud_instance_id);
    assert_eq!(cloud.with_state(|s| s.vpcs.len()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_create_keeps_partial_record() {
    let cloud = MockCloud::new().with_cis_domain("bd.example");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (infra, result) = setup_infra(&cloud, &create_options(None), &cancel).await;
    assert!(result.is_err());
    assert_eq!(infra.id, "lifecycle-1");
}
