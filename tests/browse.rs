mod common;

use assert_matches::assert_matches;
use serde_json::json;

use pennsieve_client::error::PennsieveError;
use pennsieve_client::transport::Method;

use common::{DATASET_ID, MockTransport, dataset_json, dataset_with_children, package_json};

#[test]
fn search_hits_resolve_through_the_cache() {
    let transport = MockTransport::new();
    transport.on(
        Method::Post,
        "/search",
        json!({"results": [package_json("N:package:3", "scan.nii", "MRI", None)]}),
    );
    transport.on(
        Method::Get,
        "/packages/N:package:3",
        package_json("N:package:3", "scan.nii", "MRI", None),
    );
    let mut client = common::client_with(transport);

    let hits = client.search("scan", 10).unwrap();
    assert_eq!(hits.len(), 1);
    let transport = common::transport(&client);
    let body = transport.last(Method::Post, "/search").unwrap().body.unwrap();
    assert_eq!(body, json!({"query": "scan", "maxResults": 10}));
    assert_eq!(transport.count(Method::Get, "/packages/N:package:3"), 1);
}

#[test]
fn organizations_and_members() {
    let transport = MockTransport::new();
    transport.on(
        Method::Get,
        "/organizations",
        json!({"organizations": [{"organization": {"id": "N:organization:1", "name": "My Lab"}}]}),
    );
    transport.on(
        Method::Get,
        "/organizations/N:organization:1/members",
        json!([{"id": "N:user:5", "email": "grace@example.org"}]),
    );
    let mut client = common::client_with(transport);

    let organizations = client.organizations().unwrap();
    assert_eq!(organizations[0].slug, "my-lab");
    let request = common::transport(&client)
        .last(Method::Get, "/organizations")
        .unwrap();
    assert_eq!(
        request.query,
        vec![("includeAdmins".to_string(), "false".to_string())]
    );
    let members = client.members("N:organization:1").unwrap();
    assert_eq!(members[0].email, "grace@example.org");
}

#[test]
fn package_counts_are_summed() {
    let transport = MockTransport::new();
    transport.on(Method::Get, &format!("/datasets/{DATASET_ID}"), dataset_json(DATASET_ID, "Demo"));
    transport.on(
        Method::Get,
        &format!("/datasets/{DATASET_ID}/packageTypeCounts"),
        json!({"TimeSeries": 3, "CSV": 2}),
    );
    let mut client = common::client_with(transport);
    let dataset = client.get(DATASET_ID).unwrap();
    assert_eq!(client.package_count(dataset).unwrap(), 5);
}

#[test]
fn packages_found_by_filename_join_the_cache() {
    let transport = MockTransport::new();
    transport.on(Method::Get, &format!("/datasets/{DATASET_ID}"), dataset_json(DATASET_ID, "Demo"));
    transport.on(
        Method::Get,
        &format!("/datasets/{DATASET_ID}/packages"),
        json!({"packages": [package_json("N:package:8", "trace.csv", "CSV", None)]}),
    );
    let mut client = common::client_with(transport);
    let dataset = client.get(DATASET_ID).unwrap();

    let found = client.packages_by_filename(dataset, "trace.csv").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(client.get("N:package:8").unwrap(), found[0]);
    let request = common::transport(&client)
        .last(Method::Get, &format!("/datasets/{DATASET_ID}/packages"))
        .unwrap();
    assert!(request.query.contains(&("filename".to_string(), "trace.csv".to_string())));
}

#[test]
fn items_by_name_matches_exactly() {
    let transport = MockTransport::new();
    transport.on(
        Method::Get,
        &format!("/datasets/{DATASET_ID}"),
        dataset_with_children(
            DATASET_ID,
            "Demo",
            vec![
                package_json("N:package:1", "a.csv", "CSV", None),
                package_json("N:package:2", "b.csv", "CSV", None),
            ],
        ),
    );
    let mut client = common::client_with(transport);
    let dataset = client.get(DATASET_ID).unwrap();

    let found = client.items_by_name(dataset, "b.csv").unwrap();
    assert_eq!(found, vec![client.get("N:package:2").unwrap()]);
    assert!(client.items_by_name(dataset, "B.CSV").unwrap().is_empty());
}

#[test]
fn package_files_and_download_urls() {
    let transport = MockTransport::new();
    transport.on(
        Method::Get,
        "/packages/N:package:1",
        package_json("N:package:1", "eeg.edf", "TimeSeries", None),
    );
    transport.on(
        Method::Get,
        "/packages/N:package:1/sources",
        json!([{"content": {"id": 11, "name": "eeg.edf", "fileType": "EDF", "size": 1024}}]),
    );
    transport.on(
        Method::Get,
        "/packages/N:package:1/files/11",
        json!({"url": "https://download.example/eeg.edf"}),
    );
    let mut client = common::client_with(transport);
    let package = client.get("N:package:1").unwrap();

    let sources = client.sources(package).unwrap();
    assert_eq!(sources[0].id, "11");
    assert_eq!(sources[0].package_id, "N:package:1");
    assert_eq!(
        client.file_url(package, &sources[0].id).unwrap(),
        "https://download.example/eeg.edf"
    );
}

#[test]
fn containers_have_no_files() {
    let transport = MockTransport::new();
    transport.on(Method::Get, &format!("/datasets/{DATASET_ID}"), dataset_json(DATASET_ID, "Demo"));
    let mut client = common::client_with(transport);
    let dataset = client.get(DATASET_ID).unwrap();
    assert_matches!(client.files(dataset), Err(PennsieveError::Validation(_)));
    assert_matches!(client.process(dataset), Err(PennsieveError::Validation(_)));
}
