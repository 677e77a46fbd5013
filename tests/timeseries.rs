mod common;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use pennsieve_client::Pennsieve;
use pennsieve_client::cache::NodeKey;
use pennsieve_client::error::PennsieveError;
use pennsieve_client::timeseries::{Annotation, AnnotationQuery, Channel};
use pennsieve_client::transport::Method;

use common::{MockTransport, package_json};

const TS: &str = "N:package:ts";
const CHANNELS: &str = "/timeseries/N:package:ts/channels";
const LAYERS: &str = "/timeseries/N:package:ts/layers";

fn channel_json(id: &str, name: &str, start: i64, end: i64) -> Value {
    json!({
        "content": {"id": id, "name": name, "rate": 256.0, "start": start, "end": end, "unit": "uV"},
        "properties": []
    })
}

fn time_series_client() -> (Pennsieve<MockTransport>, NodeKey) {
    let transport = MockTransport::new();
    transport.on(
        Method::Get,
        &format!("/packages/{TS}"),
        package_json(TS, "eeg.edf", "TimeSeries", None),
    );
    transport.on(
        Method::Get,
        CHANNELS,
        json!([
            channel_json("N:channel:1", "Fp1", 1_000, 9_000),
            channel_json("N:channel:2", "Fp2", 500, 8_000)
        ]),
    );
    transport.on(Method::Get, LAYERS, json!({"results": [{"id": "5", "name": "spikes"}]}));
    let mut client = common::client_with(transport);
    let ts = client.get(TS).unwrap();
    (client, ts)
}

#[test]
fn limits_span_all_channels() {
    let (mut client, ts) = time_series_client();
    assert_eq!(client.limits(ts).unwrap(), (500, 9_000));
    let channels = client.channels(ts).unwrap();
    assert_eq!(channels[0].package_id.as_deref(), Some(TS));
    assert_eq!(channels[1].unit, "uV");
}

#[test]
fn only_time_series_have_channels() {
    let transport = MockTransport::new();
    transport.on(
        Method::Get,
        "/packages/N:package:1",
        package_json("N:package:1", "notes.txt", "Text", None),
    );
    let mut client = common::client_with(transport);
    let key = client.get("N:package:1").unwrap();
    assert_matches!(client.channels(key), Err(PennsieveError::Validation(_)));
}

#[test]
fn new_channels_are_posted() {
    let (mut client, ts) = time_series_client();
    common::transport(&client).on(
        Method::Post,
        CHANNELS,
        channel_json("N:channel:3", "Cz", 0, 0),
    );
    let created = client.add_channel(ts, &Channel::new("Cz", 512.0)).unwrap();
    assert_eq!(created.id.as_deref(), Some("N:channel:3"));

    let body = common::transport(&client)
        .last(Method::Post, CHANNELS)
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["name"], "Cz");
    assert_eq!(body["rate"], 512.0);
    assert_eq!(body["properties"][0]["key"], "Source Type");

    assert_matches!(
        client.add_channel(ts, &created),
        Err(PennsieveError::Validation(_))
    );
}

#[test]
fn existing_layer_is_returned_instead_of_created() {
    let (mut client, ts) = time_series_client();
    let layer = client.add_layer(ts, "spikes", None).unwrap();
    assert_eq!(layer.id.as_deref(), Some("5"));
    assert_eq!(layer.time_series_id, TS);
    assert_eq!(common::transport(&client).count(Method::Post, LAYERS), 0);
}

#[test]
fn unknown_layer_is_not_found() {
    let (mut client, ts) = time_series_client();
    assert_matches!(client.layer(ts, "seizures"), Err(PennsieveError::NotFound(_)));
}

#[test]
fn annotation_without_channels_covers_every_channel() {
    let (mut client, ts) = time_series_client();
    let path = format!("{LAYERS}/5/annotations");
    common::transport(&client).on(
        Method::Post,
        &path,
        json!({"id": 41, "label": "spike", "start": 2_000, "end": 2_500,
               "channelIds": ["N:channel:1", "N:channel:2"], "layerId": 5}),
    );
    let layer = client.layer(ts, "spikes").unwrap();

    let created = client
        .insert_annotation(ts, &layer, Annotation::new("spike", 2_000, 2_500))
        .unwrap();
    assert_eq!(created.id.as_deref(), Some("41"));
    let body = common::transport(&client)
        .last(Method::Post, &path)
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body["channelIds"], json!(["N:channel:1", "N:channel:2"]));
    assert_eq!(body["layer_id"], "5");
    assert_eq!(body["time_series_id"], TS);
}

#[test]
fn annotations_are_read_page_by_page() {
    let (mut client, ts) = time_series_client();
    let path = format!("{LAYERS}/5/annotations");
    let transport = common::transport(&client);
    transport.on(Method::Get, &path, json!({"annotations": {"results": []}}));
    transport.once(
        Method::Get,
        &path,
        json!({"annotations": {"results": [
            {"id": 1, "label": "a", "start": 600, "end": 700},
            {"id": 2, "label": "b", "start": 800, "end": 900}
        ]}}),
    );
    let layer = client.layer(ts, "spikes").unwrap();

    let annotations = client
        .annotations(ts, &layer, &AnnotationQuery::default())
        .unwrap();
    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[1].label, "b");

    let requests: Vec<_> = common::transport(&client)
        .requests()
        .into_iter()
        .filter(|request| request.path == path)
        .collect();
    assert_eq!(requests.len(), 2);
    let query = |index: usize, key: &str| {
        requests[index]
            .query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    };
    assert_eq!(query(0, "start").as_deref(), Some("500"));
    assert_eq!(query(0, "end").as_deref(), Some("9000"));
    assert_eq!(query(0, "layerName").as_deref(), Some("spikes"));
    assert_eq!(query(1, "offset").as_deref(), Some("100"));
}

#[test]
fn unknown_channels_are_refused() {
    let (mut client, ts) = time_series_client();
    let layer = client.layer(ts, "spikes").unwrap();
    let query = AnnotationQuery {
        channels: Some(vec!["N:channel:9".to_string()]),
        ..AnnotationQuery::default()
    };
    assert_matches!(
        client.annotations(ts, &layer, &query),
        Err(PennsieveError::Validation(message)) if message.contains("N:channel:9")
    );
}

#[test]
fn counts_use_period_in_microseconds() {
    let (mut client, ts) = time_series_client();
    let path = format!("/timeseries/{TS}/annotations/window");
    common::transport(&client).on(Method::Get, &path, json!({"5": []}));
    let layer = client.layer(ts, "spikes").unwrap();

    client
        .annotation_counts(ts, &[layer], 0, 10_000, "1.5hr", None, false)
        .unwrap();
    let request = common::transport(&client).last(Method::Get, &path).unwrap();
    assert!(request.query.contains(&("period".to_string(), "5400000000".to_string())));
    assert!(request.query.contains(&("layerIds".to_string(), "5".to_string())));
}

#[test]
fn segments_come_back_as_pairs() {
    let (mut client, ts) = time_series_client();
    common::transport(&client).on(
        Method::Get,
        "/streaming/ts/retrieve/segments",
        json!([[1_000, 4_000], [6_000, 9_000]]),
    );
    let channel = client.channels(ts).unwrap().remove(0);
    let segments = client.segments(ts, &channel, None, None, 2).unwrap();
    assert_eq!(segments, vec![(1_000, 4_000), (6_000, 9_000)]);
}
