// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `instance_types.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::constants::INSTANCE_TYPE_MAX_PAGES;
    use aws_sdk_ec2::types::GpuDeviceInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Catalog returning a fixed set of types and counting fetches per call.
    struct CountingCatalog {
        calls: AtomicUsize,
        types: Vec<InstanceTypeInfo>,
        delay: Duration,
    }

    impl CountingCatalog {
        fn new(types: Vec<InstanceTypeInfo>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                types,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InstanceTypeCatalog for CountingCatalog {
        async fn fetch(&self, _region: &str) -> Result<HashMap<String, InstanceTypeInfo>, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self
                .types
                .iter()
                .map(|t| (t.instance_type.clone(), t.clone()))
                .collect())
        }
    }

    struct FailingCatalog;

    #[async_trait]
    impl InstanceTypeCatalog for FailingCatalog {
        async fn fetch(&self, region: &str) -> Result<HashMap<String, InstanceTypeInfo>, ReconcileError> {
            Err(ReconcileError::InstanceType(format!("throttled in {region}")))
        }
    }

    fn info(name: &str, vcpu: i32, memory_mib: i64, arch: &str) -> InstanceTypeInfo {
        InstanceTypeInfo {
            instance_type: name.to_string(),
            vcpu,
            memory_mib,
            gpu: 0,
            arch: arch.to_string(),
        }
    }

    fn catalog() -> Arc<CountingCatalog> {
        Arc::new(CountingCatalog::new(vec![
            info("m6i.xlarge", 4, 16384, ARCH_AMD64),
            info("m6g.xlarge", 4, 16384, ARCH_ARM64),
        ]))
    }

    #[test]
    fn test_normalize_arch() {
        assert_eq!(normalize_arch("x86_64"), "amd64");
        assert_eq!(normalize_arch("amd64"), "amd64");
        assert_eq!(normalize_arch("arm64"), "arm64");
        assert_eq!(normalize_arch("aarch64"), "arm64");
        assert_eq!(normalize_arch("ARM64"), "arm64");
        assert_eq!(normalize_arch("i386"), "amd64");
        assert_eq!(normalize_arch(""), "amd64");
    }

    #[test]
    fn test_gpu_count_sums_and_skips_unset() {
        let gpus = GpuInfo::builder()
            .gpus(GpuDeviceInfo::builder().count(4).build())
            .gpus(GpuDeviceInfo::builder().build())
            .gpus(GpuDeviceInfo::builder().count(2).build())
            .build();
        assert_eq!(gpu_count(&gpus), 6);
        assert_eq!(gpu_count(&GpuInfo::builder().build()), 0);
    }

    #[tokio::test]
    async fn test_cold_cache_fetches_and_populates() {
        let catalog = catalog();
        let cache = InstanceTypeCache::new(catalog.clone());

        let result = cache.get("us-east-1", "m6i.xlarge").await.unwrap();
        assert_eq!(result.vcpu, 4);
        assert_eq!(result.memory_mib, 16384);
        assert_eq!(result.arch, "amd64");
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_cache_does_not_call_catalog() {
        let catalog = catalog();
        let cache = InstanceTypeCache::new(catalog.clone());

        cache.get("us-east-1", "m6i.xlarge").await.unwrap();
        let arm = cache.get("us-east-1", "m6g.xlarge").await.unwrap();
        assert_eq!(arm.arch, "arm64");
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_not_found() {
        let cache = InstanceTypeCache::new(catalog());

        let err = cache.get("us-east-1", "nonexistent.xlarge").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("not found"), "{msg}");
        assert!(msg.contains("nonexistent.xlarge"), "{msg}");
        assert!(is_unknown_instance_type(&err));
    }

    #[tokio::test]
    async fn test_catalog_failure_is_not_unknown_type() {
        let cache = InstanceTypeCache::new(Arc::new(FailingCatalog));

        let err = cache.get("us-east-1", "m6i.xlarge").await.unwrap_err();
        assert!(!is_unknown_instance_type(&err));

        // Nothing cached after a failure
        assert!(cache.regions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_error_mentioning_not_found_is_not_unknown_type() {
        struct NotFoundText;

        #[async_trait]
        impl InstanceTypeCatalog for NotFoundText {
            async fn fetch(&self, _region: &str) -> Result<HashMap<String, InstanceTypeInfo>, ReconcileError> {
                Err(ReconcileError::InstanceType("endpoint not found, retry later".to_string()))
            }
        }

        let cache = InstanceTypeCache::new(Arc::new(NotFoundText));
        let err = cache.get("us-east-1", "m6i.xlarge").await.unwrap_err();
        assert!(!is_unknown_instance_type(&err));
    }

    #[tokio::test]
    async fn test_collect_pages_follows_tokens() {
        let mut calls = Vec::new();
        let types = collect_pages("us-east-1", 10, |token| {
            calls.push(token.clone());
            let page = match token.as_deref() {
                None => (vec![info("m6i.xlarge", 4, 16384, ARCH_AMD64)], Some("p2".to_string())),
                Some("p2") => (vec![info("m6g.xlarge", 4, 16384, ARCH_ARM64)], Some(String::new())),
                Some(other) => panic!("unexpected token {other}"),
            };
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(calls, vec![None, Some("p2".to_string())]);
        assert_eq!(types.len(), 2);
        assert!(types.contains_key("m6g.xlarge"));
    }

    #[tokio::test]
    async fn test_collect_pages_stops_at_page_limit() {
        let mut calls = 0usize;
        let types = collect_pages("us-east-1", INSTANCE_TYPE_MAX_PAGES, |_| {
            calls += 1;
            let page = (
                vec![info(&format!("t{calls}.large"), 2, 8192, ARCH_AMD64)],
                Some("again".to_string()),
            );
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(calls, INSTANCE_TYPE_MAX_PAGES);
        assert_eq!(types.len(), INSTANCE_TYPE_MAX_PAGES);
    }

    #[tokio::test]
    async fn test_collect_pages_returns_page_error() {
        let mut calls = 0usize;
        let err = collect_pages("us-east-1", 10, |_| {
            calls += 1;
            let result = if calls == 1 {
                Ok((vec![info("m6i.xlarge", 4, 16384, ARCH_AMD64)], Some("p2".to_string())))
            } else {
                Err(ReconcileError::InstanceType("throttled".to_string()))
            };
            async move { result }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ReconcileError::InstanceType(_)));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_regions_are_cached_separately() {
        let catalog = catalog();
        let cache = InstanceTypeCache::new(catalog.clone());

        cache.get("us-east-1", "m6i.xlarge").await.unwrap();
        cache.get("us-west-2", "m6i.xlarge").await.unwrap();
        assert_eq!(catalog.calls(), 2);

        cache.get("us-west-2", "m6g.xlarge").await.unwrap();
        assert_eq!(catalog.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let catalog = catalog();
        let cache = InstanceTypeCache::with_ttl(catalog.clone(), Duration::ZERO);

        cache.get("us-east-1", "m6i.xlarge").await.unwrap();
        cache.get("us-east-1", "m6i.xlarge").await.unwrap();
        assert_eq!(catalog.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_reads_fetch_once() {
        let mut slow = CountingCatalog::new(vec![info("m6i.xlarge", 4, 16384, ARCH_AMD64)]);
        slow.delay = Duration::from_millis(50);
        let catalog = Arc::new(slow);
        let cache = Arc::new(InstanceTypeCache::new(catalog.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("us-east-1", "m6i.xlarge").await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().vcpu, 4);
        }
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test]
    async fn test_catalog_refreshes_are_counted_by_outcome() {
        let ok = InstanceTypeCache::new(catalog());
        ok.get("metrics-test-1", "m6i.xlarge").await.unwrap();
        ok.get("metrics-test-1", "m6i.xlarge").await.unwrap();
        let failing = InstanceTypeCache::new(Arc::new(FailingCatalog));
        failing.get("metrics-test-2", "m6i.xlarge").await.unwrap_err();

        let counted = |region: &str, outcome: &str| {
            crate::metrics::INSTANCE_TYPE_FETCHES_TOTAL
                .with_label_values(&[region, outcome])
                .get()
        };
        assert!((counted("metrics-test-1", "success") - 1.0).abs() < f64::EPSILON);
        assert!((counted("metrics-test-2", "error") - 1.0).abs() < f64::EPSILON);
    }
}
