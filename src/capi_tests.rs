// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `capi.rs`

#[cfg(test)]
mod tests {
    use super::super::{AWSCluster, AWSMachineTemplate, MachineDeployment, CAPA_API_VERSION};
    use kube::Resource;

    #[test]
    fn test_machine_deployment_parses_capi_yaml() {
        let md: MachineDeployment = serde_yaml::from_str(
            r"
apiVersion: cluster.x-k8s.io/v1beta1
kind: MachineDeployment
metadata:
  name: workers
  namespace: clusters-example
  annotations:
    hypershift.openshift.io/nodePool: clusters/workers
spec:
  clusterName: example-x7k2p
  replicas: 2
  selector:
    matchLabels:
      cluster.x-k8s.io/deployment-name: workers
  template:
    spec:
      clusterName: example-x7k2p
      bootstrap:
        dataSecretName: user-data-workers
      infrastructureRef:
        apiVersion: infrastructure.cluster.x-k8s.io/v1beta2
        kind: AWSMachineTemplate
        name: workers-1a2b3c4d
      version: v1.20.0
  strategy:
    type: RollingUpdate
",
        )
        .unwrap();

        let infra = &md.spec.template.spec.infrastructure_ref;
        assert_eq!(infra.kind, "AWSMachineTemplate");
        assert_eq!(infra.name, "workers-1a2b3c4d");
        assert_eq!(infra.api_version, CAPA_API_VERSION);
        assert_eq!(md.spec.replicas, Some(2));
        assert_eq!(
            md.spec.template.spec.bootstrap.data_secret_name.as_deref(),
            Some("user-data-workers")
        );
    }

    #[test]
    fn test_aws_machine_template_capacity() {
        let template: AWSMachineTemplate = serde_json::from_value(serde_json::json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2",
            "kind": "AWSMachineTemplate",
            "metadata": {"name": "workers", "namespace": "clusters-example"},
            "spec": {"template": {"spec": {"instanceType": "m5.large", "ami": {"id": "ami-1"}}}},
            "status": {"capacity": {"cpu": "2", "memory": "8Gi"}}
        }))
        .unwrap();

        assert_eq!(template.spec.template.spec.instance_type, "m5.large");
        assert_eq!(template.spec.template.spec.ami.id.as_deref(), Some("ami-1"));
        assert_eq!(template.status.unwrap().capacity["cpu"], "2");
    }

    #[test]
    fn test_aws_machine_template_without_status() {
        let template: AWSMachineTemplate = serde_json::from_value(serde_json::json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2",
            "kind": "AWSMachineTemplate",
            "metadata": {"name": "workers"},
            "spec": {"template": {"spec": {"instanceType": "m5.large"}}}
        }))
        .unwrap();
        assert!(template.status.is_none());
    }

    #[test]
    fn test_aws_cluster_region() {
        let cluster: AWSCluster = serde_json::from_value(serde_json::json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2",
            "kind": "AWSCluster",
            "metadata": {"name": "example"},
            "spec": {"region": "us-west-2", "network": {"vpc": {"id": "vpc-1"}}}
        }))
        .unwrap();
        assert_eq!(cluster.spec.region, "us-west-2");
        assert_eq!(AWSCluster::api_version(&()), CAPA_API_VERSION);
    }
}
