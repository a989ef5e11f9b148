// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for reconciler helper functions.

#[cfg(test)]
mod tests {
    use super::super::status_changed;
    use crate::crd::{set_condition, Condition, HostedControlPlaneStatus};

    #[test]
    fn test_status_changed_both_none() {
        let current: Option<i32> = None;
        let new: Option<i32> = None;

        assert!(!status_changed(&current, &new), "Should return false when both are None");
    }

    #[test]
    fn test_status_changed_set_and_cleared() {
        assert!(status_changed(&None, &Some(42)), "Should return true when status is being set");
        assert!(status_changed(&Some(42), &None), "Should return true when status is being cleared");
    }

    #[test]
    fn test_status_changed_values() {
        assert!(!status_changed(&Some(42), &Some(42)));
        assert!(status_changed(&Some("old-value".to_string()), &Some("new-value".to_string())));
    }

    #[test]
    fn test_status_changed_ignores_reapplied_condition() {
        // Re-setting a condition with the same status keeps its transition
        // time, so the status compares equal and no patch is sent.
        let available = |time: &str| Condition {
            r#type: "Available".to_string(),
            status: "True".to_string(),
            reason: Some("AsExpected".to_string()),
            message: Some("control plane manifests applied".to_string()),
            last_transition_time: Some(time.to_string()),
        };

        let mut current = HostedControlPlaneStatus {
            ready: true,
            ..Default::default()
        };
        set_condition(&mut current.conditions, available("2025-01-01T00:00:00Z"));

        let mut next = current.clone();
        set_condition(&mut next.conditions, available("2025-06-01T00:00:00Z"));
        assert!(!status_changed(&Some(current.clone()), &Some(next.clone())));

        next.ready = false;
        assert!(status_changed(&Some(current), &Some(next)));
    }
}
