// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # hostedcp - Hosted Control Plane Operator
//!
//! hostedcp runs the control planes of tenant OpenShift clusters as workloads
//! on a management cluster, and provisions the IBM Cloud PowerVS
//! infrastructure those tenants run on.
//!
//! ## Overview
//!
//! This library provides the core functionality of the operator and of the
//! `hostedcp` infrastructure CLI, including:
//!
//! - Orchestrated, idempotent create and destroy of PowerVS and VPC resources
//! - PKI and manifest generation for hosted control planes
//! - Translation of node pools into Cluster API objects
//! - Size classification of hosted clusters
//! - A mutating webhook injecting audit log rotation into kube-apiserver
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types of the operator
//! - [`capi`] - Cluster API and CAPA types the operator writes
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`context`] - Shared context and reflector stores for controllers
//! - [`powervs`] - PowerVS infrastructure create and destroy
//! - [`ibmcloud`] - IBM Cloud API client and service traits
//! - [`pki`] - Control plane certificate generation
//! - [`render`] - Control plane manifest rendering
//! - [`webhook`] - Mutating admission webhook
//!
//! ## Example
//!
//! ```rust,no_run
//! use hostedcp::powervs::{setup_infra, CreateOptions};
//! use hostedcp::ibmcloud::mock::MockCloud;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let cloud = MockCloud::new().with_cis_domain("example.com");
//! let options = CreateOptions {
//!     base_domain: "example.com".to_string(),
//!     resource_group: "rg".to_string(),
//!     infra_id: "demo-x7k2p".to_string(),
//!     ..CreateOptions::default()
//! };
//!
//! let (infra, result) = setup_infra(&cloud, &options, &CancellationToken::new()).await;
//! # let _ = (infra, result);
//! # }
//! ```

pub mod capi;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod ibmcloud;
pub mod metrics;
pub mod paging;
pub mod pki;
pub mod powervs;
pub mod reconcilers;
pub mod release;
pub mod render;
pub mod retry;
pub mod webhook;
