use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::NodeKey;
use crate::client::Pennsieve;
use crate::error::PennsieveError;
use crate::timeseries::{Annotation, AnnotationQuery};
use crate::transport::Transport;

pub const EXTENSION: &str = "bfannot";
pub const FORMAT_VERSION: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub version: Option<f64>,
    pub package_type: Option<String>,
    pub layer_name: String,
    pub layer_description: Option<String>,
    pub annotation_label: String,
    pub start_uutc: Option<i64>,
    pub end_uutc: Option<i64>,
    // `;`-separated; empty means every channel.
    pub channel_names: Option<String>,
    pub annotation_description: Option<String>,
}

impl AnnotationRow {
    fn channel_names(&self) -> Vec<&str> {
        self.channel_names
            .as_deref()
            .map(|names| {
                names
                    .split(';')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerRows {
    pub name: String,
    pub description: Option<String>,
    pub rows: Vec<AnnotationRow>,
}

pub fn read_annotation_file(path: &Utf8Path) -> Result<Vec<AnnotationRow>, PennsieveError> {
    let supported = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION));
    if !supported {
        return Err(PennsieveError::AnnotationFile(format!(
            "unsupported annotation format for {path}; supported: .{EXTENSION}"
        )));
    }
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| PennsieveError::AnnotationFile(format!("{path}: {err}")))?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<AnnotationRow>, _>>()
        .map_err(|err| PennsieveError::AnnotationFile(format!("{path}: {err}")))?;
    match rows.first().and_then(|row| row.version) {
        Some(version) if version == FORMAT_VERSION => Ok(rows),
        Some(version) => Err(PennsieveError::AnnotationFile(format!(
            "version {version} is not supported"
        ))),
        None => Err(PennsieveError::AnnotationFile(
            "missing format version".to_string(),
        )),
    }
}

pub fn write_annotation_file(
    path: &Utf8Path,
    package_type: &str,
    mut rows: Vec<AnnotationRow>,
) -> Result<Utf8PathBuf, PennsieveError> {
    let path = if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION))
    {
        path.to_path_buf()
    } else {
        Utf8PathBuf::from(format!("{path}.{EXTENSION}"))
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
    }
    if rows.is_empty() {
        rows.push(AnnotationRow {
            version: None,
            package_type: None,
            layer_name: String::new(),
            layer_description: None,
            annotation_label: String::new(),
            start_uutc: None,
            end_uutc: None,
            channel_names: None,
            annotation_description: None,
        });
    }
    for (index, row) in rows.iter_mut().enumerate() {
        row.version = (index == 0).then_some(FORMAT_VERSION);
        row.package_type = (index == 0).then(|| package_type.to_string());
    }

    let mut writer = csv::Writer::from_path(&path)
        .map_err(|err| PennsieveError::AnnotationFile(format!("{path}: {err}")))?;
    for row in &rows {
        writer
            .serialize(row)
            .map_err(|err| PennsieveError::AnnotationFile(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
    Ok(path)
}

pub fn group_by_layer(rows: Vec<AnnotationRow>) -> Vec<LayerRows> {
    let mut layers: Vec<LayerRows> = Vec::new();
    for row in rows.into_iter().filter(|row| !row.layer_name.is_empty()) {
        match layers.iter_mut().find(|layer| layer.name == row.layer_name) {
            Some(layer) => layer.rows.push(row),
            None => layers.push(LayerRows {
                name: row.layer_name.clone(),
                description: row.layer_description.clone(),
                rows: vec![row],
            }),
        }
    }
    layers
}

impl<T: Transport> Pennsieve<T> {
    pub fn process_annotation_file(
        &mut self,
        ts: NodeKey,
        path: &Utf8Path,
    ) -> Result<usize, PennsieveError> {
        let layers = group_by_layer(read_annotation_file(path)?);
        let channels = self.channels(ts)?;
        let mut added = 0;
        for group in layers {
            let layer = self.add_layer(ts, &group.name, group.description.as_deref())?;
            for row in &group.rows {
                let names = row.channel_names();
                let channel_ids: Vec<String> = channels
                    .iter()
                    .filter(|channel| names.is_empty() || names.contains(&channel.name.as_str()))
                    .filter_map(|channel| channel.id.clone())
                    .collect();
                let (Some(start), Some(end)) = (row.start_uutc, row.end_uutc) else {
                    return Err(PennsieveError::AnnotationFile(format!(
                        "annotation '{}' has no time range",
                        row.annotation_label
                    )));
                };
                let annotation = Annotation::new(&row.annotation_label, start, end)
                    .on_channels(channel_ids)
                    .with_description(row.annotation_description.as_deref());
                self.insert_annotation(ts, &layer, annotation)?;
                added += 1;
            }
            info!(layer = %layer.name, "imported annotations");
        }
        Ok(added)
    }

    pub fn write_annotation_file(
        &mut self,
        ts: NodeKey,
        path: &Utf8Path,
        layer_names: Option<&[String]>,
    ) -> Result<Utf8PathBuf, PennsieveError> {
        let mut layers = self.layers(ts)?;
        if layers.is_empty() {
            return Err(PennsieveError::AnnotationFile(
                "time series has no layers".to_string(),
            ));
        }
        if let Some(names) = layer_names {
            layers.retain(|layer| names.contains(&layer.name));
        }
        let channels = self.channels(ts)?;
        let package_type = self.node(ts)?.package_type.clone();

        let mut rows = Vec::new();
        for layer in &layers {
            for annotation in self.annotations(ts, layer, &AnnotationQuery::default())? {
                let names: Vec<&str> = channels
                    .iter()
                    .filter(|channel| {
                        channel
                            .id
                            .as_ref()
                            .is_some_and(|id| annotation.channel_ids.contains(id))
                    })
                    .map(|channel| channel.name.as_str())
                    .collect();
                rows.push(AnnotationRow {
                    version: None,
                    package_type: None,
                    layer_name: layer.name.clone(),
                    layer_description: layer.description.clone(),
                    annotation_label: annotation.label,
                    start_uutc: Some(annotation.start),
                    end_uutc: Some(annotation.end),
                    channel_names: Some(names.join(";")),
                    annotation_description: annotation.description,
                });
            }
        }
        write_annotation_file(path, &package_type, rows)
    }
}
