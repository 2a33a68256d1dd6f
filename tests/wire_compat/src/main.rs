fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use printlink_protocol::{
        ColorMode, IceCandidate, JobRecord, JobStatus, PaperSize, SdpType, SessionDescription,
        Sides, TransferProgress,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Browsers write `cost: 3`, Rust serializes `f64` as `3.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  stored: {fixture}\n  Rust:   {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_job_record() {
        let job: JobRecord = roundtrip_test("job_record.json");
        assert_eq!(job.status, JobStatus::AwaitingPayment);
        assert_eq!(job.total_bytes(), 50_000);
        assert_eq!(job.cost, Some(3.0));
        assert_eq!(job.files[0].specs.color, ColorMode::Color);
        assert_eq!(job.files[0].specs.sides, Sides::Double);
        assert_eq!(job.files[1].specs.paper_size, PaperSize::Letter);
        assert_eq!(
            job.description(SdpType::Answer).map(|d| d.sdp_type),
            Some(SdpType::Answer)
        );
        assert!(job.id.is_empty());
    }

    #[test]
    fn fixture_job_record_submitted() {
        let job: JobRecord = roundtrip_test("job_record_submitted.json");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.offer.is_none());
        assert!(job.created_at.is_none());
    }

    #[test]
    fn fixture_job_record_failed() {
        let job: JobRecord = roundtrip_test("job_record_failed.json");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.failure_reason.unwrap().starts_with("transfer:"));
    }

    #[test]
    fn fixture_ice_candidate() {
        let candidate: IceCandidate = roundtrip_test("ice_candidate.json");
        assert_eq!(candidate.username_fragment.as_deref(), Some("Kp3x"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
    }

    #[test]
    fn fixture_session_description() {
        let offer: SessionDescription = roundtrip_test("session_description.json");
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("a=ice-ufrag:Kp3x"));
    }

    #[test]
    fn fixture_transfer_progress() {
        let progress: TransferProgress = roundtrip_test("transfer_progress.json");
        assert_eq!(progress.bytes_transferred, 32_768);
        assert!(progress.percentage() > 65.0);
    }

    #[test]
    fn minimal_file_specs_default() {
        let job: JobRecord = serde_json::from_value(serde_json::json!({
            "merchantId": "m",
            "status": "pending",
            "files": [{"name": "a.pdf", "size": 1, "specs": {}}]
        }))
        .unwrap();
        assert_eq!(job.files[0].specs.copies, 1);
        assert_eq!(job.files[0].specs.paper_size, PaperSize::A4);
        assert!(job.user_id.is_empty());
    }
}
