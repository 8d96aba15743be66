fn main() {
    println!("Run `cargo test -p format-compat` to check the on-disk and wire formats.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use emdash_protocol::{
        BinaryDescriptor, Method, Record, RecordRef, RpcRequest, RpcResponse,
    };
    use emdash_transfer::{MARKER_VERSION, SidecarMarker};

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

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values.
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
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  ours:    {reserialized}"
        );
        parsed
    }

    #[test]
    fn sidecar_marker_format() {
        let marker: SidecarMarker = roundtrip_test("sidecar_marker.json");
        assert_eq!(marker.version, MARKER_VERSION);
        assert_eq!(marker.remote_name, RecordRef::from("r.4811"));
        assert_eq!(marker.size, 5821);
    }

    #[test]
    fn binary_descriptor_format() {
        let d: BinaryDescriptor = roundtrip_test("binary_descriptor.json");
        assert_eq!(d.filename, "stack.mrc.gz");
        assert_eq!(d.filesize, Some(1_048_576));
    }

    #[test]
    fn record_keeps_unknown_fields() {
        let record: Record = roundtrip_test("record.json");
        assert_eq!(record.rectype, "microscope");
        assert_eq!(record.permissions.len(), 4);
        assert_eq!(record.extra["name_microscope"], "JEOL 3200FSC");
    }

    #[test]
    fn children_request_matches_fixture() {
        let req = RpcRequest::new(7, Method::RelChildren, &("specimen.001", 1)).unwrap();
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            load_fixture("rpc_request_children.json")
        );
    }

    #[test]
    fn find_request_matches_fixture() {
        let records = vec![RecordRef::from("grid.001a"), RecordRef::from("grid.001b")];
        let params = serde_json::json!({ "record": records, "count": 0 });
        let req = RpcRequest::new(8, Method::BinaryFind, &params).unwrap();
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            load_fixture("rpc_request_find.json")
        );
    }

    #[test]
    fn children_response_parses() {
        let resp: RpcResponse =
            serde_json::from_value(load_fixture("rpc_response_children.json")).unwrap();
        let children: Vec<RecordRef> = resp.parse_result().unwrap().unwrap();
        assert_eq!(children.len(), 2);
        assert!(resp.error.is_none());
    }

    #[test]
    fn error_response_parses() {
        let resp: RpcResponse =
            serde_json::from_value(load_fixture("rpc_response_error.json")).unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, 401);
        assert_eq!(error.message, "context expired");
        assert!(resp.result.is_none());
    }
}
