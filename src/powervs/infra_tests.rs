// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `powervs/infra.rs`

#[cfg(test)]
mod tests {
    use super::super::{format_duration, parse_duration, Infra, Stat};
    use std::time::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(150)), "150ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(123)), "2m3s");
        assert_eq!(format_duration(Duration::from_secs(3605)), "1h0m5s");
        assert_eq!(format_duration(Duration::from_micros(1_234_567)), "1.235s");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0").ok(), Some(Duration::ZERO));
        assert_eq!(parse_duration("150ms").ok(), Some(Duration::from_millis(150)));
        assert_eq!(parse_duration("2m3s").ok(), Some(Duration::from_secs(123)));
        assert_eq!(parse_duration("1h0m5s").ok(), Some(Duration::from_secs(3605)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("3 days").is_err());
    }

    #[test]
    fn test_record_json_keys() {
        let mut infra = Infra::new("ex-1");
        infra.powervs_cloud_instance_id = "guid-1".to_string();
        infra.vpc_crn = "crn:vpc".to_string();
        infra.stats.vpc = Stat {
            duration: Duration::from_millis(1500),
            status: "available".to_string(),
        };

        let json = serde_json::to_value(&infra).unwrap();
        assert_eq!(json["id"], "ex-1");
        assert_eq!(json["powerVSCloudInstanceID"], "guid-1");
        assert_eq!(json["vpcCrn"], "crn:vpc");
        assert_eq!(json["stats"]["vpc"]["duration"], "1.5s");
        assert_eq!(json["stats"]["vpc"]["status"], "available");
        // Empty status is omitted, secrets that were never issued too.
        assert!(json["stats"]["vpcSubnet"].get("status").is_none());
        assert!(json["secrets"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_write_and_read_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infra.json");
        let mut infra = Infra::new("ex-1");
        infra.vpc_id = "vpc-1".to_string();
        infra.stats.cloud_conn_state = Stat {
            duration: Duration::from_secs(90),
            status: "established".to_string(),
        };

        infra.write_json(Some(&path)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"id\": \"ex-1\""), "two-space indent expected: {text}");
        assert!(text.contains("\"1m30s\""));

        let read = Infra::read_json(&path).unwrap();
        assert_eq!(read, infra);
    }

    #[test]
    fn test_read_record_tolerates_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"id": "ex-2", "vpcID": "vpc-9"}"#).unwrap();

        let read = Infra::read_json(&path).unwrap();
        assert_eq!(read.id, "ex-2");
        assert_eq!(read.vpc_id, "vpc-9");
        assert!(read.powervs_dhcp_id.is_empty());
    }
}
