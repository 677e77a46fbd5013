mod common;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use pennsieve_client::Pennsieve;
use pennsieve_client::cache::NodeKey;
use pennsieve_client::concepts::{
    Model, ModelProperty, ModelPropertyType, Record, RelationshipType, ScalarType,
};
use pennsieve_client::error::PennsieveError;
use pennsieve_client::transport::Method;

use common::{DATASET_ID, MockTransport, dataset_json, package_json};

const CONCEPTS: &str = "/models/datasets/N:dataset:1/concepts";
const RELATIONSHIPS: &str = "/models/datasets/N:dataset:1/relationships";

fn client_with_dataset(transport: MockTransport) -> (Pennsieve<MockTransport>, NodeKey) {
    transport.on(
        Method::Get,
        &format!("/datasets/{DATASET_ID}"),
        dataset_json(DATASET_ID, "Demo"),
    );
    let mut client = common::client_with(transport);
    let dataset = client.get(DATASET_ID).unwrap();
    (client, dataset)
}

fn subject_model() -> Model {
    let mut model = Model::new(DATASET_ID, "subject").unwrap();
    model.add_property(
        ModelProperty::new("name", ModelPropertyType::scalar(ScalarType::String))
            .unwrap()
            .as_title(),
    );
    model.add_property(
        ModelProperty::new("age", ModelPropertyType::scalar(ScalarType::Long)).unwrap(),
    );
    model
}

fn schema_json() -> Value {
    json!([
        {"id": "p1", "name": "name", "dataType": "string", "conceptTitle": true, "required": true},
        {"id": "p2", "name": "age", "dataType": "long", "conceptTitle": false}
    ])
}

fn created_subject(client: &mut Pennsieve<MockTransport>, dataset: NodeKey) -> Model {
    let transport = common::transport(client);
    transport.on(
        Method::Post,
        CONCEPTS,
        json!({"id": "m1", "name": "subject", "displayName": "subject"}),
    );
    transport.on(Method::Put, &format!("{CONCEPTS}/m1/properties"), schema_json());
    client.create_model(dataset, subject_model()).unwrap()
}

fn record(id: &str, model: &str) -> Record {
    Record::from_json(
        &json!({"id": id, "type": model, "values": [{"name": "name", "value": id, "dataType": "string"}]}),
        DATASET_ID,
    )
    .unwrap()
}

#[test]
fn creating_a_model_writes_its_schema() {
    let (mut client, dataset) = client_with_dataset(MockTransport::new());
    let model = created_subject(&mut client, dataset);

    assert_eq!(model.id.as_deref(), Some("m1"));
    assert_eq!(model.title_property().unwrap().name, "name");
    assert_eq!(model.property("age").unwrap().id.as_deref(), Some("p2"));
    let body = common::transport(&client)
        .last(Method::Put, &format!("{CONCEPTS}/m1/properties"))
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["conceptTitle"], true);
}

#[test]
fn rejected_schema_rolls_the_model_back() {
    let (mut client, dataset) = client_with_dataset(MockTransport::new());
    let transport = common::transport(&client);
    transport.on(Method::Post, CONCEPTS, json!({"id": "m1", "name": "subject"}));
    transport.fail(Method::Put, &format!("{CONCEPTS}/m1/properties"), 400);
    transport.on(Method::Delete, &format!("{CONCEPTS}/m1"), json!({}));

    let result = client.create_model(dataset, subject_model());
    assert_matches!(result, Err(PennsieveError::Rejected(_)));
    assert_eq!(
        common::transport(&client).count(Method::Delete, &format!("{CONCEPTS}/m1")),
        1
    );
}

#[test]
fn schema_without_title_is_refused_locally() {
    let (mut client, dataset) = client_with_dataset(MockTransport::new());
    let mut model = Model::new(DATASET_ID, "visit").unwrap();
    model.add_property(
        ModelProperty::new("day", ModelPropertyType::scalar(ScalarType::Long)).unwrap(),
    );
    assert_matches!(
        client.create_model(dataset, model),
        Err(PennsieveError::Validation(_))
    );
    assert_eq!(common::transport(&client).count(Method::Post, CONCEPTS), 0);
}

#[test]
fn unchanged_model_is_not_written() {
    let (mut client, dataset) = client_with_dataset(MockTransport::new());
    let mut model = created_subject(&mut client, dataset);
    common::transport(&client).on(
        Method::Put,
        &format!("{CONCEPTS}/m1"),
        json!({"id": "m1", "name": "subject", "updatedAt": "2024-05-01T00:00:00Z"}),
    );

    assert!(!client.update_model(&mut model).unwrap());
    model.description = "study participants".to_string();
    assert!(client.update_model(&mut model).unwrap());
    assert!(!client.update_model(&mut model).unwrap());

    let transport = common::transport(&client);
    assert_eq!(transport.count(Method::Put, &format!("{CONCEPTS}/m1")), 1);
    let body = transport
        .last(Method::Put, &format!("{CONCEPTS}/m1"))
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["id"], "m1");
    assert_eq!(body["description"], "study participants");
    assert_eq!(model.updated_at.as_deref(), Some("2024-05-01T00:00:00Z"));
}

#[test]
fn record_values_are_checked_against_the_schema() {
    let (mut client, dataset) = client_with_dataset(MockTransport::new());
    let model = created_subject(&mut client, dataset);
    let instances = format!("{CONCEPTS}/subject/instances");

    assert_matches!(
        client.create_record(&model, &[("height", json!(180))]),
        Err(PennsieveError::Validation(message)) if message.contains("height")
    );
    assert_matches!(
        client.create_record(&model, &[]),
        Err(PennsieveError::Validation(_))
    );
    assert_eq!(common::transport(&client).count(Method::Post, &instances), 0);

    common::transport(&client).on(
        Method::Post,
        &instances,
        json!({
            "id": "r1",
            "type": "subject",
            "values": [
                {"name": "name", "value": "Ada", "dataType": "string"},
                {"name": "age", "value": 36, "dataType": "long"}
            ]
        }),
    );
    let created = client
        .create_record(&model, &[("name", json!("Ada")), ("age", json!(36))])
        .unwrap();
    assert_eq!(created.id.as_deref(), Some("r1"));
    assert_eq!(created.get("age"), Some(&json!(36)));
    let body = common::transport(&client)
        .last(Method::Post, &instances)
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["values"][0]["name"], "name");
    assert_eq!(body["values"][1]["dataType"], "long");
}

#[test]
fn relating_records_creates_the_missing_type() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    let transport = common::transport(&client);
    transport.on(Method::Get, RELATIONSHIPS, json!([]));
    transport.on(Method::Get, &format!("{CONCEPTS}/subject"), json!({"id": "m1", "name": "subject"}));
    transport.on(Method::Get, &format!("{CONCEPTS}/visit"), json!({"id": "m2", "name": "visit"}));
    transport.on(
        Method::Post,
        RELATIONSHIPS,
        json!({"id": "t1", "name": "related_to", "from": "m1", "to": "m2"}),
    );
    transport.on(
        Method::Post,
        &format!("{RELATIONSHIPS}/t1/instances"),
        json!([{"id": "x1", "type": "related_to", "from": "r1", "to": "r2"}]),
    );

    let relationship = client
        .relate_to(&record("r1", "subject"), &record("r2", "visit"), None)
        .unwrap();
    assert_eq!(relationship.id.as_deref(), Some("x1"));
    assert_eq!(relationship.source, "r1");
    assert_eq!(relationship.destination, "r2");

    let transport = common::transport(&client);
    let created = transport.last(Method::Post, RELATIONSHIPS).unwrap().body.unwrap();
    assert_eq!(created["name"], "related_to");
    assert_eq!(created["type"], "relationship");
    assert_eq!(created["from"], "m1");
    assert_eq!(created["to"], "m2");
    let instance = transport
        .last(Method::Post, &format!("{RELATIONSHIPS}/t1/instances"))
        .unwrap()
        .body
        .unwrap();
    assert_eq!(instance["from"], "r1");
    assert_eq!(instance["to"], "r2");
}

#[test]
fn existing_relationship_type_is_reused() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    let transport = common::transport(&client);
    transport.on(
        Method::Get,
        RELATIONSHIPS,
        json!([{"id": "t9", "name": "attended", "from": "m1", "to": "m2"}]),
    );
    transport.on(
        Method::Post,
        &format!("{RELATIONSHIPS}/t9/instances"),
        json!({"id": "x2", "type": "attended", "from": "r1", "to": "r2"}),
    );

    client
        .relate_to(&record("r1", "subject"), &record("r2", "visit"), Some("attended"))
        .unwrap();
    assert_eq!(common::transport(&client).count(Method::Post, RELATIONSHIPS), 0);
}

#[test]
fn packages_link_through_the_proxy() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    let transport = common::transport(&client);
    transport.on(
        Method::Get,
        "/packages/N:package:1",
        package_json("N:package:1", "eeg.edf", "TimeSeries", None),
    );
    transport.on(
        Method::Get,
        RELATIONSHIPS,
        json!([{"id": "t2", "name": "belongs_to"}]),
    );
    transport.on(
        Method::Post,
        "/models/datasets/N:dataset:1/proxy/package/instances",
        json!([{"relationshipInstance": {"id": "x3", "type": "belongs_to", "from": "N:package:1", "to": "r1"}}]),
    );
    let package = client.get("N:package:1").unwrap();

    let link = client
        .link_package(&record("r1", "subject"), package, None)
        .unwrap();
    assert_eq!(link.relationship_type, "belongs_to");
    assert_eq!(link.destination, "r1");

    let body = common::transport(&client)
        .last(Method::Post, "/models/datasets/N:dataset:1/proxy/package/instances")
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["externalId"], "N:package:1");
    assert_eq!(body["conceptType"], "subject");
    assert_eq!(body["conceptInstanceId"], "r1");
    assert_eq!(body["targets"][0]["relationshipType"], "belongs_to");
    assert_eq!(body["targets"][0]["linkTarget"]["ConceptInstance"]["id"], "r1");
}

#[test]
fn relationship_types_cannot_be_edited() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    let relationship = RelationshipType::new(DATASET_ID, "related_to").unwrap();
    assert_matches!(
        client.update_relationship_type(&relationship),
        Err(PennsieveError::Unsupported(_))
    );
    assert_matches!(
        client.delete_relationship_type(&relationship),
        Err(PennsieveError::Unsupported(_))
    );
}

#[test]
fn topology_splits_models_relationships_and_links() {
    let (mut client, dataset) = client_with_dataset(MockTransport::new());
    let transport = common::transport(&client);
    transport.on(
        Method::Get,
        &format!("{CONCEPTS}/schema/graph"),
        json!([
            {"type": "concept", "id": "m1", "name": "subject"},
            {"type": "schemaRelationship", "id": "t1", "name": "attended", "from": "m1", "to": "m2"},
            {"type": "schemaLinkedProperty", "id": "l1", "name": "site", "from": "m1", "to": "m3"}
        ]),
    );
    transport.on(Method::Get, &format!("{CONCEPTS}/m1/properties"), schema_json());
    transport.on(Method::Get, &format!("{CONCEPTS}/m1/linked"), json!([]));

    let topology = client.topology(dataset).unwrap();
    assert_eq!(topology.models.len(), 1);
    assert_eq!(topology.models[0].schema.len(), 2);
    assert_eq!(topology.relationships[0].name, "attended");
    assert_eq!(topology.linked_properties[0].target, "m3");
}

#[test]
fn batch_records_are_checked_before_sending() {
    let (mut client, dataset) = client_with_dataset(MockTransport::new());
    let model = created_subject(&mut client, dataset);
    let batch = format!("{CONCEPTS}/subject/instances/batch");
    common::transport(&client).on(
        Method::Post,
        &batch,
        json!([
            {"id": "r1", "type": "subject", "values": [{"name": "name", "value": "a", "dataType": "string"}]},
            {"id": "r2", "type": "subject", "values": [{"name": "name", "value": "b", "dataType": "string"}]}
        ]),
    );

    let bad = vec![vec![("name", json!("a"))], vec![("height", json!(2))]];
    assert_matches!(
        client.create_records(&model, &bad),
        Err(PennsieveError::Validation(message)) if message.contains("height")
    );
    assert_eq!(common::transport(&client).count(Method::Post, &batch), 0);

    let rows = vec![vec![("name", json!("a"))], vec![("name", json!("b")), ("age", json!(4))]];
    let records = client.create_records(&model, &rows).unwrap();
    assert_eq!(records.len(), 2);
    let body = common::transport(&client).last(Method::Post, &batch).unwrap().body.unwrap();
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[1]["values"][1]["name"], "age");
}

#[test]
fn related_records_are_paged_until_empty() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    let relations = format!("{CONCEPTS}/subject/instances/r1/relations/visit");
    let transport = common::transport(&client);
    transport.on(Method::Get, &relations, json!([]));
    transport.once(
        Method::Get,
        &relations,
        json!([[
            {"id": "x1", "type": "attended", "from": "r1", "to": "v1"},
            {"id": "v1", "type": "visit", "values": []}
        ]]),
    );

    let related = client.related_records(&record("r1", "subject"), "visit").unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].id.as_deref(), Some("v1"));
    let requests: Vec<_> = common::transport(&client)
        .requests()
        .into_iter()
        .filter(|request| request.path == relations)
        .collect();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].query.contains(&("offset".to_string(), "100".to_string())));
}

#[test]
fn all_related_skips_linked_files() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    let base = format!("{CONCEPTS}/subject/instances/r1");
    let transport = common::transport(&client);
    transport.on(
        Method::Get,
        &format!("{base}/relationCounts"),
        json!([
            {"name": "visit", "displayName": "Visit", "count": 1},
            {"name": "package", "displayName": "Files", "count": 3}
        ]),
    );
    transport.on(Method::Get, &format!("{base}/relations/visit"), json!([]));

    let grouped = client.all_related(&record("r1", "subject")).unwrap();
    assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["visit"]);
    assert_eq!(
        common::transport(&client).count(Method::Get, &format!("{base}/relations/package")),
        0
    );
}

#[test]
fn record_files_enter_the_cache() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    common::transport(&client).on(
        Method::Get,
        &format!("{CONCEPTS}/subject/instances/r1/files"),
        json!([[
            {"id": "x1", "type": "belongs_to"},
            package_json("N:package:5", "scan.nii", "MRI", None)
        ]]),
    );

    let files = client.record_files(&record("r1", "subject")).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(client.node(files[0]).unwrap().name, "scan.nii");
    assert_eq!(client.cache().lookup("N:package:5"), Some(files[0]));
}

#[test]
fn setting_a_linked_value_replaces_the_old_one() {
    let (mut client, _) = client_with_dataset(MockTransport::new());
    let model = Model::from_json(
        &json!({"id": "m1", "name": "subject", "linked": [{"id": "l1", "name": "site", "to": "m3"}]}),
        DATASET_ID,
    )
    .unwrap();
    let linked = format!("{CONCEPTS}/m1/instances/r1/linked");
    let transport = common::transport(&client);
    transport.on(
        Method::Get,
        &linked,
        json!([{"id": "v1", "schemaLinkedPropertyId": "l1", "from": "r1", "to": "s1"}]),
    );
    transport.on(Method::Delete, &format!("{linked}/v1"), Value::Null);
    transport.on(
        Method::Post,
        &linked,
        json!({"id": "v2", "schemaLinkedPropertyId": "l1", "from": "r1", "to": "s2"}),
    );

    let subject = record("r1", "subject");
    let value = client.set_linked_value(&model, &subject, "site", "s2").unwrap();
    assert_eq!(value.target, "s2");
    let transport = common::transport(&client);
    assert_eq!(transport.count(Method::Delete, &format!("{linked}/v1")), 1);
    assert_eq!(
        transport.last(Method::Post, &linked).unwrap().body,
        Some(json!({"schemaLinkedPropertyId": "l1", "to": "s2"}))
    );

    assert_matches!(
        client.set_linked_value(&model, &subject, "clinic", "s2"),
        Err(PennsieveError::NotFound(_))
    );
    client.remove_linked_value(&model, &subject, "site").unwrap();
    assert_eq!(common::transport(&client).count(Method::Delete, &format!("{linked}/v1")), 2);
}
