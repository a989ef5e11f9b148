// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use hostedcp::{
    capi::{AWSMachineTemplate, MachineDeployment},
    config::OperatorConfig,
    constants::{
        NODE_POOL_ANNOTATION, REQUEUE_WHEN_NOT_READY_SECS, REQUEUE_WHEN_READY_SECS,
        TOKIO_WORKER_THREADS,
    },
    context::{object_key, Context, ErrorBackoff, Stores},
    crd::{ClusterSizingConfiguration, HostedCluster, HostedControlPlane, NodePool},
    errors::ReconcileError,
    metrics::{self, ReconcileOutcome},
    reconcilers::{
        instance_types::{Ec2Catalog, InstanceTypeCache},
        machinedeployment::aws_machine_template_name,
        nodepool::node_pool_key,
        reconcile_cluster_sizing, reconcile_hostedcontrolplane, reconcile_machinedeployment,
        reconcile_nodepool,
    },
    release::FileReleaseProvider,
    render::TemplateSource,
    webhook::{self, WebhookState},
};
use kube::{
    runtime::{
        controller::Action,
        reflector::{self, ObjectRef, Store},
        watcher::{self, Config},
        Controller, WatchStreamExt,
    },
    Api, Client, Resource, ResourceExt,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let config = OperatorConfig::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("hostedcp-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: OperatorConfig) -> Result<()> {
    // Initialize logging with custom format
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level
    // Respects RUST_LOG_FORMAT environment variable for output format (json or text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting hosted control plane operator");

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install the rustls crypto provider"))?;

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let (node_pools, node_pool_writer) = reflector::store::<NodePool>();
    let node_pool_reflector = watcher::watcher(Api::<NodePool>::all(client.clone()), Config::default())
        .default_backoff()
        .reflect(node_pool_writer)
        .applied_objects()
        .for_each(|_| futures::future::ready(()));

    let ctx = Arc::new(Context {
        client: client.clone(),
        stores: Stores {
            node_pools: node_pools.clone(),
        },
        releases: Arc::new(FileReleaseProvider::new(&config.release_info)),
        templates: TemplateSource::Directory(config.manifests_dir.clone()),
        dh_params: config.dh_params.clone(),
        instance_types: Arc::new(InstanceTypeCache::new(Arc::new(Ec2Catalog))),
        backoff: ErrorBackoff::default(),
    });

    info!("Starting all controllers");

    // Controllers should never exit - if one fails, we log it and exit the main process
    tokio::select! {
        () = node_pool_reflector => {
            error!("CRITICAL: NodePool reflector exited unexpectedly");
            anyhow::bail!("NodePool reflector exited unexpectedly")
        }
        result = run_hostedcontrolplane_controller(ctx.clone()) => {
            error!("CRITICAL: HostedControlPlane controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("HostedControlPlane controller exited unexpectedly without error")
        }
        result = run_nodepool_controller(ctx.clone()) => {
            error!("CRITICAL: NodePool controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("NodePool controller exited unexpectedly without error")
        }
        result = run_machinedeployment_controller(ctx.clone()) => {
            error!("CRITICAL: MachineDeployment controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("MachineDeployment controller exited unexpectedly without error")
        }
        result = run_sizing_controller(ctx.clone()) => {
            error!("CRITICAL: HostedCluster sizing controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("HostedCluster sizing controller exited unexpectedly without error")
        }
        result = run_webhook_server(&config, client.clone()) => {
            error!("CRITICAL: Webhook server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Webhook server exited unexpectedly without error")
        }
        result = run_metrics_server(&config) => {
            error!("CRITICAL: Metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting");
            Ok(())
        }
    }
}

/// Run the `HostedControlPlane` controller
async fn run_hostedcontrolplane_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting HostedControlPlane controller");

    let api = Api::<HostedControlPlane>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_hostedcontrolplane_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `NodePool` controller
async fn run_nodepool_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting NodePool controller");

    let api = Api::<NodePool>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_nodepool_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `MachineDeployment` controller
///
/// Changes to a node pool or to a machine template re-enqueue the machine
/// deployments built from them.
async fn run_machinedeployment_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting MachineDeployment controller");
    debug!("Initializing MachineDeployment controller with cluster-wide watch");

    let client = ctx.client.clone();
    let controller = Controller::new(Api::<MachineDeployment>::all(client.clone()), Config::default());

    let by_node_pool = controller.store();
    let by_template = controller.store();

    controller
        .watches(Api::<NodePool>::all(client.clone()), Config::default(), move |np| {
            let key = node_pool_key(&np);
            deployments_matching(&by_node_pool, |md| {
                md.annotations().get(NODE_POOL_ANNOTATION) == Some(&key)
            })
        })
        .watches(
            Api::<AWSMachineTemplate>::all(client),
            Config::default(),
            move |template| {
                let name = template.name_any();
                let namespace = template.namespace();
                deployments_matching(&by_template, |md| {
                    md.namespace() == namespace && aws_machine_template_name(md) == Some(name.as_str())
                })
            },
        )
        .run(reconcile_machinedeployment_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

fn deployments_matching(
    store: &Store<MachineDeployment>,
    predicate: impl Fn(&MachineDeployment) -> bool,
) -> Vec<ObjectRef<MachineDeployment>> {
    store
        .state()
        .iter()
        .filter(|md| predicate(md))
        .map(|md| ObjectRef::from_obj(&**md))
        .collect()
}

/// Run the `HostedCluster` sizing controller
///
/// Node pool changes re-enqueue their hosted cluster; a change of the sizing
/// configuration re-enqueues every hosted cluster.
async fn run_sizing_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting HostedCluster sizing controller");

    let client = ctx.client.clone();
    let controller = Controller::new(Api::<HostedCluster>::all(client.clone()), Config::default());
    let clusters = controller.store();

    controller
        .watches(Api::<NodePool>::all(client.clone()), Config::default(), |np| {
            np.namespace()
                .map(|ns| ObjectRef::new(&np.spec.cluster_name).within(&ns))
        })
        .watches(
            Api::<ClusterSizingConfiguration>::all(client),
            Config::default(),
            move |_| {
                clusters
                    .state()
                    .iter()
                    .map(|hc| ObjectRef::from_obj(&**hc))
                    .collect::<Vec<_>>()
            },
        )
        .run(reconcile_sizing_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Serve the admission webhook when a certificate is configured
async fn run_webhook_server(config: &OperatorConfig, client: Client) -> Result<()> {
    let Some((cert, key)) = config.webhook_tls() else {
        info!("No webhook certificate configured, admission webhook disabled");
        return std::future::pending().await;
    };

    let router = webhook::webhook_router(Arc::new(WebhookState::new(client)));
    webhook::serve_tls(config.webhook_addr, cert, key, router).await?;
    Ok(())
}

/// Serve `/metrics` and `/healthz`
async fn run_metrics_server(config: &OperatorConfig) -> Result<()> {
    info!(addr = %config.metrics_addr, "Starting metrics server");
    axum_server::bind(config.metrics_addr)
        .serve(metrics::metrics_router().into_make_service())
        .await?;
    Ok(())
}

/// Record the outcome of a reconcile and turn transient failures into a
/// backoff requeue.
fn finish<K: Resource>(
    kind: &str,
    obj: &K,
    ctx: &Context,
    start: Instant,
    result: Result<Action, ReconcileError>,
) -> Result<Action, ReconcileError> {
    let key = object_key(obj.namespace().as_deref(), &obj.name_any());
    match result {
        Ok(action) => {
            ctx.backoff.reset(&key);
            metrics::record_reconcile(kind, ReconcileOutcome::Success, start.elapsed());
            Ok(action)
        }
        Err(e) if e.is_transient() => {
            warn!("Transient failure reconciling {} {}: {}", kind, key, e);
            metrics::record_reconcile(kind, ReconcileOutcome::Requeue, start.elapsed());
            Ok(Action::requeue(ctx.backoff.next_delay(&key)))
        }
        Err(e) => {
            error!("Failed to reconcile {} {}: {}", kind, key, e);
            metrics::record_reconcile(kind, ReconcileOutcome::Error, start.elapsed());
            metrics::record_reconcile_error(kind, e.category());
            Err(e)
        }
    }
}

/// Reconcile wrapper for `HostedControlPlane`
async fn reconcile_hostedcontrolplane_wrapper(
    hcp: Arc<HostedControlPlane>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_hostedcontrolplane(ctx.clone(), (*hcp).clone())
        .await
        .map(|is_ready| {
            info!("Successfully reconciled HostedControlPlane: {}", hcp.name_any());
            if is_ready {
                // Control plane is applied, check less frequently
                Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS))
            } else {
                // Endpoints are not assigned yet, check more frequently
                Action::requeue(Duration::from_secs(REQUEUE_WHEN_NOT_READY_SECS))
            }
        });
    finish("HostedControlPlane", &*hcp, &ctx, start, result)
}

/// Reconcile wrapper for `NodePool`
async fn reconcile_nodepool_wrapper(
    node_pool: Arc<NodePool>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_nodepool(ctx.clone(), node_pool.clone())
        .await
        .map(|()| Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS)));
    finish("NodePool", &*node_pool, &ctx, start, result)
}

/// Reconcile wrapper for `MachineDeployment`
async fn reconcile_machinedeployment_wrapper(
    md: Arc<MachineDeployment>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_machinedeployment(ctx.clone(), md.clone())
        .await
        .map(|()| Action::await_change());
    finish("MachineDeployment", &*md, &ctx, start, result)
}

/// Reconcile wrapper for `HostedCluster` sizing
async fn reconcile_sizing_wrapper(
    hc: Arc<HostedCluster>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_cluster_sizing(ctx.clone(), hc.clone())
        .await
        .map(|requeue| match requeue {
            Some(delay) => Action::requeue(delay),
            None => Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS)),
        });
    finish("HostedCluster", &*hc, &ctx, start, result)
}

/// Error policy shared by all controllers: per-object exponential backoff
fn error_policy<K: Resource>(obj: Arc<K>, _err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let key = object_key(obj.namespace().as_deref(), &obj.name_any());
    Action::requeue(ctx.backoff.next_delay(&key))
}
