use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};

use crate::cache::NodeKey;
use crate::client::Pennsieve;
use crate::error::PennsieveError;
use crate::node::NodeKind;
use crate::property::{self, DEFAULT_CATEGORY, Property, PropertyType};
use crate::transport::{ApiRequest, Transport};
use crate::wire::{array, as_list, opt_f64, opt_i64, opt_string, require_string, segment};

const SOURCE_TYPE: &str = "Source Type";
const ANNOTATION_PAGE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Continuous,
    Event,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Continuous => "CONTINUOUS",
            ChannelType::Event => "EVENT",
        }
    }

    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("event") {
            ChannelType::Event
        } else {
            ChannelType::Continuous
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: Option<String>,
    pub name: String,
    // Hz
    pub rate: f64,
    pub start: i64,
    pub end: i64,
    pub unit: String,
    pub channel_type: ChannelType,
    pub group: String,
    pub last_annotation: i64,
    pub spike_duration: Option<i64>,
    pub properties: Vec<Property>,
    pub package_id: Option<String>,
}

impl Channel {
    pub fn new(name: &str, rate: f64) -> Self {
        let mut channel = Self {
            id: None,
            name: name.to_string(),
            rate,
            start: 0,
            end: 0,
            unit: "V".to_string(),
            channel_type: ChannelType::Continuous,
            group: "default".to_string(),
            last_annotation: 0,
            spike_duration: None,
            properties: Vec::new(),
            package_id: None,
        };
        channel.set_source_type("unspecified");
        channel
    }

    pub fn with_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = channel_type;
        self
    }

    pub fn set_source_type(&mut self, source_type: &str) {
        let property = Property {
            key: SOURCE_TYPE.to_string(),
            value: source_type.to_uppercase(),
            data_type: PropertyType::String,
            fixed: true,
            hidden: true,
            category: DEFAULT_CATEGORY.to_string(),
        };
        property::upsert(&mut self.properties, property);
    }

    pub fn source_type(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|property| property.key == SOURCE_TYPE)
            .map(|property| property.value.as_str())
    }

    pub fn sample_period(&self) -> f64 {
        1.0e6 / self.rate
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        usecs_to_datetime(self.start)
    }

    pub fn end_datetime(&self) -> Option<DateTime<Utc>> {
        usecs_to_datetime(self.end)
    }

    pub fn from_json(value: &Value, package_id: &str) -> Result<Self, PennsieveError> {
        let content = value.get("content").unwrap_or(value);
        let mut channel = Channel::new(&require_string(content, "name")?, 0.0);
        channel.id = opt_string(content, "id");
        channel.rate = opt_f64(content, "rate").unwrap_or(0.0);
        channel.start = opt_i64(content, "start").unwrap_or(0);
        channel.end = opt_i64(content, "end").unwrap_or(0);
        if let Some(unit) = opt_string(content, "unit") {
            channel.unit = unit;
        }
        if let Some(kind) = opt_string(content, "channelType") {
            channel.channel_type = ChannelType::parse(&kind);
        }
        if let Some(group) = opt_string(content, "group") {
            channel.group = group;
        }
        channel.last_annotation = opt_i64(content, "lastAnnotation").unwrap_or(0);
        channel.spike_duration = opt_i64(content, "spikeDuration");
        for parsed in property::parse_properties(array(value, "properties"))? {
            property::upsert(&mut channel.properties, parsed);
        }
        channel.package_id = Some(package_id.to_string());
        Ok(channel)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "start": self.start,
            "end": self.end,
            "unit": self.unit,
            "rate": self.rate,
            "channelType": self.channel_type.as_str(),
            "lastAnnotation": self.last_annotation,
            "group": self.group,
            "spikeDuration": self.spike_duration,
            "properties": self.properties.iter().map(Property::to_json).collect::<Vec<_>>(),
        })
    }

    fn path(&self, action: &str) -> Result<String, PennsieveError> {
        let id = self
            .id
            .as_deref()
            .ok_or_else(|| PennsieveError::NotCreated(action.to_string()))?;
        let package = self
            .package_id
            .as_deref()
            .ok_or_else(|| PennsieveError::Validation(format!("channel '{}' has no package", self.name)))?;
        Ok(format!(
            "/timeseries/{}/channels/{}",
            segment(package),
            segment(id)
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationLayer {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub time_series_id: String,
}

impl AnnotationLayer {
    pub fn from_json(value: &Value, time_series_id: &str) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: opt_string(value, "id"),
            name: require_string(value, "name")?,
            description: opt_string(value, "description"),
            time_series_id: opt_string(value, "timeSeriesId")
                .unwrap_or_else(|| time_series_id.to_string()),
        })
    }

    pub fn to_json(&self) -> Value {
        json!({"name": self.name, "description": self.description})
    }

    fn path(&self) -> Result<String, PennsieveError> {
        let id = self
            .id
            .as_deref()
            .ok_or_else(|| PennsieveError::NotCreated("using the layer".to_string()))?;
        Ok(format!(
            "/timeseries/{}/layers/{}",
            segment(&self.time_series_id),
            segment(id)
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: Option<String>,
    pub label: String,
    pub channel_ids: Vec<String>,
    pub start: i64,
    pub end: i64,
    pub description: Option<String>,
    pub layer_id: Option<String>,
    pub time_series_id: Option<String>,
    pub user_id: Option<String>,
}

impl Annotation {
    pub fn new(label: &str, start: i64, end: i64) -> Self {
        Self {
            id: None,
            label: label.to_string(),
            channel_ids: Vec::new(),
            start,
            end,
            description: None,
            layer_id: None,
            time_series_id: None,
            user_id: None,
        }
    }

    pub fn on_channels(mut self, channel_ids: Vec<String>) -> Self {
        self.channel_ids = channel_ids;
        self
    }

    pub fn with_description(mut self, description: Option<&str>) -> Self {
        self.description = description.map(|text| text.to_string());
        self
    }

    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: opt_string(value, "id"),
            label: require_string(value, "label")?,
            channel_ids: array(value, "channelIds")
                .iter()
                .filter_map(|id| id.as_str().map(|id| id.to_string()))
                .collect(),
            start: opt_i64(value, "start").unwrap_or(0),
            end: opt_i64(value, "end").unwrap_or(0),
            description: opt_string(value, "description"),
            layer_id: opt_string(value, "layerId").or_else(|| opt_string(value, "layer_id")),
            time_series_id: opt_string(value, "timeSeriesId")
                .or_else(|| opt_string(value, "time_series_id")),
            user_id: opt_string(value, "userId"),
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": "",
            "label": self.label,
            "channelIds": self.channel_ids,
            "start": self.start,
            "end": self.end,
            "description": self.description,
            "layer_id": self.layer_id,
            "time_series_id": self.time_series_id,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub channels: Option<Vec<String>>,
}

impl<T: Transport> Pennsieve<T> {
    fn time_series_id(&self, ts: NodeKey) -> Result<String, PennsieveError> {
        let node = self.node(ts)?;
        if node.kind != NodeKind::TimeSeries {
            return Err(PennsieveError::Validation(format!(
                "'{}' is not a time series",
                node.name
            )));
        }
        Ok(node.require_id("using time series data")?.to_string())
    }

    pub fn channels(&mut self, ts: NodeKey) -> Result<Vec<Channel>, PennsieveError> {
        let id = self.time_series_id(ts)?;
        let value = self.call(ApiRequest::get(format!(
            "/timeseries/{}/channels",
            segment(&id)
        )))?;
        as_list(&value)?
            .iter()
            .map(|entry| Channel::from_json(entry, &id))
            .collect()
    }

    pub fn channel(&mut self, ts: NodeKey, channel_id: &str) -> Result<Channel, PennsieveError> {
        let id = self.time_series_id(ts)?;
        let value = self.call(ApiRequest::get(format!(
            "/timeseries/{}/channels/{}",
            segment(&id),
            segment(channel_id)
        )))?;
        Channel::from_json(&value, &id)
    }

    pub fn add_channel(&mut self, ts: NodeKey, channel: &Channel) -> Result<Channel, PennsieveError> {
        let id = self.time_series_id(ts)?;
        if channel.id.is_some() {
            return Err(PennsieveError::Validation(format!(
                "channel '{}' already exists",
                channel.name
            )));
        }
        let value = self.call(ApiRequest::post(
            format!("/timeseries/{}/channels", segment(&id)),
            channel.to_json(),
        ))?;
        Channel::from_json(&value, &id)
    }

    pub fn update_channel(&mut self, channel: &Channel) -> Result<Channel, PennsieveError> {
        let path = channel.path("updating the channel")?;
        let value = self.call(ApiRequest::put(path, channel.to_json()))?;
        Channel::from_json(&value, channel.package_id.as_deref().unwrap_or_default())
    }

    pub fn update_channel_properties(&mut self, channel: &Channel) -> Result<(), PennsieveError> {
        let path = format!("{}/properties", channel.path("updating channel properties")?);
        let body = Value::Array(channel.properties.iter().map(Property::to_json).collect());
        self.call(ApiRequest::put(path, body))?;
        Ok(())
    }

    pub fn delete_channel(&mut self, channel: &mut Channel) -> Result<(), PennsieveError> {
        let path = channel.path("deleting the channel")?;
        self.call(ApiRequest::delete(path))?;
        channel.id = None;
        Ok(())
    }

    pub fn limits(&mut self, ts: NodeKey) -> Result<(i64, i64), PennsieveError> {
        let channels = self.channels(ts)?;
        let start = channels.iter().map(|channel| channel.start).min().unwrap_or(0);
        let end = channels.iter().map(|channel| channel.end).max().unwrap_or(0);
        Ok((start, end))
    }

    pub fn layers(&mut self, ts: NodeKey) -> Result<Vec<AnnotationLayer>, PennsieveError> {
        let id = self.time_series_id(ts)?;
        let value = self.call(ApiRequest::get(format!("/timeseries/{}/layers", segment(&id))))?;
        array(&value, "results")
            .iter()
            .map(|entry| AnnotationLayer::from_json(entry, &id))
            .collect()
    }

    pub fn add_layer(
        &mut self,
        ts: NodeKey,
        name: &str,
        description: Option<&str>,
    ) -> Result<AnnotationLayer, PennsieveError> {
        if let Some(existing) = self.layers(ts)?.into_iter().find(|layer| layer.name == name) {
            return Ok(existing);
        }
        let id = self.time_series_id(ts)?;
        let value = self.call(ApiRequest::post(
            format!("/timeseries/{}/layers", segment(&id)),
            json!({"name": name, "description": description}),
        ))?;
        AnnotationLayer::from_json(&value, &id)
    }

    pub fn layer(&mut self, ts: NodeKey, name_or_id: &str) -> Result<AnnotationLayer, PennsieveError> {
        let mut matches: Vec<AnnotationLayer> = self
            .layers(ts)?
            .into_iter()
            .filter(|layer| layer.name == name_or_id || layer.id.as_deref() == Some(name_or_id))
            .collect();
        match matches.len() {
            0 => Err(PennsieveError::NotFound(format!("layer '{name_or_id}'"))),
            1 => Ok(matches.remove(0)),
            count => Err(PennsieveError::Validation(format!(
                "{count} layers match '{name_or_id}'"
            ))),
        }
    }

    pub fn update_layer(&mut self, layer: &AnnotationLayer) -> Result<AnnotationLayer, PennsieveError> {
        let value = self.call(ApiRequest::put(layer.path()?, layer.to_json()))?;
        AnnotationLayer::from_json(&value, &layer.time_series_id)
    }

    pub fn delete_layer(&mut self, layer: &mut AnnotationLayer) -> Result<(), PennsieveError> {
        self.call(ApiRequest::delete(layer.path()?))?;
        layer.id = None;
        Ok(())
    }

    pub fn insert_annotation(
        &mut self,
        ts: NodeKey,
        layer: &AnnotationLayer,
        mut annotation: Annotation,
    ) -> Result<Annotation, PennsieveError> {
        let path = format!("{}/annotations", layer.path()?);
        if annotation.channel_ids.is_empty() {
            annotation.channel_ids = self
                .channels(ts)?
                .into_iter()
                .filter_map(|channel| channel.id)
                .collect();
        }
        annotation.layer_id = layer.id.clone();
        annotation.time_series_id = Some(layer.time_series_id.clone());
        let value = self.call(ApiRequest::post(path, annotation.to_json()))?;
        Annotation::from_json(&value)
    }

    pub fn annotations(
        &mut self,
        ts: NodeKey,
        layer: &AnnotationLayer,
        query: &AnnotationQuery,
    ) -> Result<Vec<Annotation>, PennsieveError> {
        let channels = self.requested_channels(ts, query.channels.as_deref())?;
        let (start, end) = match (query.start, query.end) {
            (Some(start), Some(end)) => (start, end),
            (start, end) => {
                let (first, last) = self.limits(ts)?;
                (start.unwrap_or(first), end.unwrap_or(last))
            }
        };
        let path = format!("{}/annotations", layer.path()?);

        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut request = ApiRequest::get(path.clone())
                .query("start", start)
                .query("end", end);
            for channel in &channels {
                request = request.query("channelIds", channel);
            }
            request = request
                .query("layerName", &layer.name)
                .query("limit", ANNOTATION_PAGE)
                .query("offset", offset);
            let value = self.call(request)?;
            let batch = value
                .get("annotations")
                .map(|annotations| array(annotations, "results"))
                .unwrap_or(&[]);
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                out.push(Annotation::from_json(entry)?);
            }
            offset += ANNOTATION_PAGE;
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn annotation_counts(
        &mut self,
        ts: NodeKey,
        layers: &[AnnotationLayer],
        start: i64,
        end: i64,
        period: &str,
        channels: Option<&[String]>,
        merge_periods: bool,
    ) -> Result<Value, PennsieveError> {
        let channels = self.requested_channels(ts, channels)?;
        let period = parse_timedelta(period)?;
        let id = self.time_series_id(ts)?;
        let mut request = ApiRequest::get(format!("/timeseries/{}/annotations/window", segment(&id)))
            .query("aggregation", "count")
            .query("start", start)
            .query("end", end)
            .query("period", period)
            .query("mergePeriods", merge_periods);
        for layer in layers {
            if let Some(layer_id) = &layer.id {
                request = request.query("layerIds", layer_id);
            }
        }
        for channel in &channels {
            request = request.query("channelIds", channel);
        }
        self.call(request)
    }

    pub fn delete_annotation(&mut self, annotation: &mut Annotation) -> Result<(), PennsieveError> {
        let (Some(id), Some(layer), Some(ts)) = (
            annotation.id.as_deref(),
            annotation.layer_id.as_deref(),
            annotation.time_series_id.as_deref(),
        ) else {
            return Err(PennsieveError::NotCreated("deleting the annotation".to_string()));
        };
        self.call(ApiRequest::delete(format!(
            "/timeseries/{}/layers/{}/annotations/{}",
            segment(ts),
            segment(layer),
            segment(id)
        )))?;
        annotation.id = None;
        Ok(())
    }

    pub fn segments(
        &mut self,
        ts: NodeKey,
        channel: &Channel,
        start: Option<i64>,
        end: Option<i64>,
        gap_factor: u32,
    ) -> Result<Vec<(i64, i64)>, PennsieveError> {
        let id = self.time_series_id(ts)?;
        let channel_id = channel
            .id
            .as_deref()
            .ok_or_else(|| PennsieveError::NotCreated("reading segments".to_string()))?;
        let token = self.session().token().unwrap_or_default().to_string();
        let value = self.call(
            ApiRequest::get("/streaming/ts/retrieve/segments")
                .query("channel", channel_id)
                .query("package", &id)
                .query("session", token)
                .query("start", start.unwrap_or(channel.start))
                .query("end", end.unwrap_or(channel.end))
                .query("gapThreshold", gap_factor),
        )?;
        as_list(&value)?
            .iter()
            .map(|pair| match pair.as_array().map(|pair| pair.as_slice()) {
                Some([start, end]) => match (start.as_i64(), end.as_i64()) {
                    (Some(start), Some(end)) => Ok((start, end)),
                    _ => Err(PennsieveError::Json("segment bounds must be integers".to_string())),
                },
                _ => Err(PennsieveError::Json("segment must be a pair".to_string())),
            })
            .collect()
    }

    fn requested_channels(
        &mut self,
        ts: NodeKey,
        channels: Option<&[String]>,
    ) -> Result<Vec<String>, PennsieveError> {
        let Some(channels) = channels else {
            return Ok(Vec::new());
        };
        let known: Vec<String> = self
            .channels(ts)?
            .into_iter()
            .filter_map(|channel| channel.id)
            .collect();
        let missing: Vec<&String> = channels.iter().filter(|id| !known.contains(id)).collect();
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.iter().map(|id| id.as_str()).collect();
            return Err(PennsieveError::Validation(format!(
                "channels {} not found in time series",
                missing.join(", ")
            )));
        }
        Ok(channels.to_vec())
    }
}

/// Parses `1.5hr`, `5m`, `30s` or combinations such as `1hr30m` into
/// microseconds. A bare number is taken as microseconds already.
pub fn parse_timedelta(text: &str) -> Result<i64, PennsieveError> {
    let text = text.trim();
    if let Ok(usecs) = text.parse::<i64>() {
        return Ok(usecs);
    }
    let pattern = Regex::new(
        r"^((?P<hours>\d*\.*\d+?)hr)?((?P<minutes>\d*\.*\d+?)m)?((?P<seconds>\d*\.*\d+?)s)?$",
    )
    .map_err(|err| PennsieveError::Validation(err.to_string()))?;
    let invalid = || PennsieveError::Validation(format!("invalid time period '{text}'"));
    let captures = pattern.captures(text).ok_or_else(invalid)?;

    let mut seconds = 0.0;
    let mut matched = false;
    for (name, factor) in [("hours", 3600.0), ("minutes", 60.0), ("seconds", 1.0)] {
        if let Some(group) = captures.name(name) {
            let value: f64 = group.as_str().parse().map_err(|_| invalid())?;
            seconds += value * factor;
            matched = true;
        }
    }
    if !matched {
        return Err(invalid());
    }
    Ok((seconds * 1.0e6).round() as i64)
}

pub fn usecs_since_epoch(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub fn usecs_to_datetime(usecs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(usecs)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn periods_parse_to_microseconds() {
        assert_eq!(parse_timedelta("1.5hr").unwrap(), 5_400_000_000);
        assert_eq!(parse_timedelta("5m").unwrap(), 300_000_000);
        assert_eq!(parse_timedelta("30s").unwrap(), 30_000_000);
        assert_eq!(parse_timedelta("1hr30m").unwrap(), 5_400_000_000);
        assert_eq!(parse_timedelta("250").unwrap(), 250);
        assert_matches!(parse_timedelta("soon"), Err(PennsieveError::Validation(_)));
        assert_matches!(parse_timedelta(""), Err(PennsieveError::Validation(_)));
    }

    #[test]
    fn channel_carries_hidden_source_type() {
        let channel = Channel::new("Fp1", 256.0);
        let source = channel.properties.iter().find(|p| p.key == "Source Type").unwrap();
        assert!(source.fixed && source.hidden);
        assert_eq!(channel.source_type(), Some("UNSPECIFIED"));
        assert_eq!(channel.to_json()["channelType"], "CONTINUOUS");
    }

    #[test]
    fn channel_from_content() {
        let channel = Channel::from_json(
            &json!({
                "content": {"id": "N:channel:1", "name": "Fp1", "rate": 256.0, "start": 10, "end": 20, "channelType": "EVENT"},
                "properties": []
            }),
            "N:package:1",
        )
        .unwrap();
        assert_eq!(channel.channel_type, ChannelType::Event);
        assert_eq!(channel.package_id.as_deref(), Some("N:package:1"));
        assert_eq!(channel.source_type(), Some("UNSPECIFIED"));
    }

    #[test]
    fn datetime_conversion() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let usecs = usecs_since_epoch(at);
        assert_eq!(usecs, 1_577_836_800_000_000);
        assert_eq!(usecs_to_datetime(usecs), Some(at));
    }
}
