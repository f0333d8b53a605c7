use scopeflow::{any, custom, tag, CoreError, Promised, Schema, Store, TagStore, Validated, ValidationIssue};

#[test]
fn any_schema_accepts_every_value() {
    let schema = any::<i32>();
    assert!(matches!(schema.validate(5), Validated::Value(5)));
}

#[test]
fn custom_schema_reports_its_own_issues() {
    let positive = custom(|n: &i32| {
        if *n > 0 {
            Vec::new()
        } else {
            vec![ValidationIssue {
                message: "must be positive".to_string(),
                path: Vec::new(),
            }]
        }
    });

    assert!(matches!(scopeflow::validate(&positive, 1), Ok(1)));
    let err = scopeflow::validate(&positive, -1).unwrap_err();
    assert!(matches!(err, CoreError::SchemaInvalid { .. }));
}

#[tokio::test]
async fn promised_unifies_sync_and_async_results() {
    let sync = Promised::try_sync(|| Ok::<_, CoreError>(1));
    assert_eq!(sync.resolve().await.unwrap(), 1);

    let async_one = Promised::pending(async { Ok::<_, CoreError>(2) });
    assert_eq!(async_one.resolve().await.unwrap(), 2);
}

#[tokio::test]
async fn promised_map_preserves_sync_shape() {
    let doubled = Promised::try_sync(|| Ok::<_, CoreError>(2)).map(|n| n * 2);
    assert_eq!(doubled.resolve().await.unwrap(), 4);
}

#[test]
fn tag_round_trips_through_a_store() {
    let store = TagStore::new();
    let name = tag::<String>(any(), "name");
    assert_eq!(name.read_from(&store).unwrap(), None);

    name.write_to_store(&store, "ada".to_string());
    assert_eq!(name.read_from(&store).unwrap(), Some("ada".to_string()));
}

#[test]
fn tag_falls_back_to_its_default_when_unset() {
    let store = TagStore::new();
    let retries = tag::<u32>(any(), "retries").with_default(|| 3);
    assert_eq!(retries.read_from(&store).unwrap(), Some(3));
}

#[test]
fn tag_extract_from_fails_without_a_value_or_default() {
    let store = TagStore::new();
    let required = tag::<String>(any(), "required");
    assert!(matches!(required.extract_from(&store), Err(CoreError::TagMissing { .. })));
}

#[test]
fn tag_read_chain_prefers_the_nearest_store() {
    let outer = TagStore::new();
    let inner = TagStore::new();
    let name = tag::<String>(any(), "name");
    name.write_to_store(&outer, "outer".to_string());
    name.write_to_store(&inner, "inner".to_string());

    let chain: Vec<&dyn Store> = vec![&inner, &outer];
    assert_eq!(name.read_chain(&chain).unwrap(), Some("inner".to_string()));
}
