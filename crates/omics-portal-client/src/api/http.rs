// SPDX-License-Identifier: Apache-2.0

use super::{AllSampleMetadata, PortalApi, SignalRequest};
use crate::error::ApiError;
use async_trait::async_trait;
use omics_portal_model::{
    DatasetDefaults, DatasetId, DiffExpTable, EntityId, ExpressionVector, GeneLocation,
    GenomicRange, GwasHit, MetaFeatureValues, PseudobulkExpression, SampleImage, SampleMetadata,
    ScaleFactors, SignalBinRecord, SplitTable, SpotCoordinate, Table,
};
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// Query parameter the backend uses for the catalog "no filter" request.
const DEFAULT_QUERY: &str = "default";

/// reqwest-backed client for the portal REST API (`/api`, `/visium`, `/signal`).
pub struct HttpPortalApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPortalApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| ApiError::transport(format!("invalid api base url: {e}")))?;
        if parsed.host_str().is_none() {
            return Err(ApiError::transport("api base url missing host"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, path: &str, params: &[(&str, String)]) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("GET {path} failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::status(
                status.as_u16(),
                format!("GET {path}: {}", detail_message(&body)),
            ));
        }
        Ok(resp)
    }

    #[instrument(name = "portal_api_get_json", skip(self, params))]
    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let resp = self.send(path, params).await?;
        let value = resp
            .json::<Value>()
            .await
            .map_err(|e| ApiError::decode(format!("GET {path}: {e}")))?;
        debug!(path, "portal api response decoded");
        Ok(value)
    }

    async fn get_bytes(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(Vec<u8>, Option<String>), ApiError> {
        let resp = self.send(path, params).await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiError::transport(format!("GET {path}: read body failed: {e}")))?;
        Ok((bytes.to_vec(), content_type))
    }
}

fn ds(dataset: &DatasetId) -> (&'static str, String) {
    ("dataset", dataset.as_str().to_string())
}

const DEGS_OF_CLUSTER: &str = "/api/getdegsofcluster";

fn degs_params(dataset: &DatasetId, cluster: &EntityId) -> [(&'static str, String); 2] {
    [ds(dataset), ("cluster", cluster.as_str().to_string())]
}

fn region_params(dataset: &DatasetId, range: &GenomicRange) -> Vec<(&'static str, String)> {
    vec![
        ds(dataset),
        ("chromosome", range.chromosome.as_str().to_string()),
        ("start", range.start.to_string()),
        ("end", range.end.to_string()),
    ]
}

fn catalog_query(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// FastAPI errors carry `{"detail": ...}`; fall back to the raw body.
fn detail_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").map(value_text))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Unwraps `{"success": bool, "data": ..., "message": ...}` envelopes; other bodies pass through.
pub(crate) fn unwrap_envelope(value: Value) -> Result<Value, ApiError> {
    match value {
        Value::Object(mut map) if map.contains_key("success") => {
            if map.get("success").and_then(Value::as_bool) == Some(true) {
                Ok(map.remove("data").unwrap_or(Value::Null))
            } else {
                let message = map
                    .get("message")
                    .map(value_text)
                    .unwrap_or_else(|| "request unsuccessful".to_string());
                Err(ApiError::backend(message))
            }
        }
        other => Ok(other),
    }
}

pub(crate) fn decode_string_list(value: Value) -> Result<Vec<String>, ApiError> {
    match unwrap_envelope(value)? {
        Value::Array(items) => Ok(items
            .iter()
            .filter(|v| !v.is_null())
            .map(value_text)
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(ApiError::decode(format!(
            "expected a list of names, got {other}"
        ))),
    }
}

/// Id to number maps. Tables are accepted too: index ids paired with the first numeric column.
/// "First" follows the `columns` order of a split table; column-oriented tables carry no
/// order, so their columns are scanned by name.
pub(crate) fn decode_numeric_map(value: Value) -> Result<BTreeMap<String, f64>, ApiError> {
    let value = unwrap_envelope(value)?;
    if let Value::Object(map) = &value {
        if map.values().all(|v| v.is_number() || v.is_null()) {
            return Ok(map
                .iter()
                .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                .collect());
        }
        if map.contains_key("columns") && map.contains_key("data") {
            let split: SplitTable = serde_json::from_value(value)
                .map_err(|e| ApiError::decode(format!("split table decode failed: {e}")))?;
            let data = split.data.clone();
            let table = Table::from_split(split)?;
            return Ok(table
                .index
                .into_iter()
                .zip(data)
                .filter_map(|(id, row)| row.iter().find_map(Value::as_f64).map(|n| (id, n)))
                .collect());
        }
    }
    let table = Table::from_value(value)?;
    let mut out = BTreeMap::new();
    for (id, row) in table.index.iter().zip(&table.rows) {
        if let Some(n) = row.values().find_map(Value::as_f64) {
            out.insert(id.clone(), n);
        }
    }
    Ok(out)
}

pub(crate) fn decode_sample_metadata(value: Value) -> Result<SampleMetadata, ApiError> {
    let Value::Object(mut map) = unwrap_envelope(value)? else {
        return Err(ApiError::decode("sample metadata must be an object"));
    };
    let cell_metadata = match map.remove("cell_metadata") {
        Some(Value::Null) | None => Table::default(),
        Some(v) => Table::from_value(v)?,
    };
    Ok(SampleMetadata {
        cell_metadata,
        sample_metadata: take_object(&mut map, "sample_metadata"),
        cell_metadata_mapping: take_object(&mut map, "cell_metadata_mapping"),
    })
}

fn take_object(map: &mut Map<String, Value>, key: &str) -> BTreeMap<String, Value> {
    match map.remove(key) {
        Some(Value::Object(obj)) => obj.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

pub(crate) fn decode_all_sample_metadata(value: Value) -> Result<AllSampleMetadata, ApiError> {
    let value = unwrap_envelope(value)?;
    if let Value::Object(map) = &value {
        if map.values().all(Value::is_object) {
            return Ok(map
                .iter()
                .filter_map(|(k, v)| {
                    v.as_object()
                        .map(|obj| (k.clone(), obj.clone().into_iter().collect()))
                })
                .collect());
        }
    }
    let table = Table::from_value(value)?;
    Ok(table.index.into_iter().zip(table.rows).collect())
}

/// `getallmetadata` returns `{"cell_metadata": <table>}`; pick the requested column.
pub(crate) fn decode_meta_feature(feature: &str, value: Value) -> Result<MetaFeatureValues, ApiError> {
    let value = unwrap_envelope(value)?;
    let table_value = match value {
        Value::Object(mut map) if map.contains_key("cell_metadata") => {
            map.remove("cell_metadata").unwrap_or(Value::Null)
        }
        other => other,
    };
    let table = Table::from_value(table_value)?;
    let mut values = BTreeMap::new();
    for (id, row) in table.index.iter().zip(&table.rows) {
        if let Some(v) = row.get(feature) {
            values.insert(id.clone(), v.clone());
        }
    }
    if values.is_empty() && !table.is_empty() {
        return Err(ApiError::decode(format!(
            "metadata response has no column `{feature}`"
        )));
    }
    Ok(MetaFeatureValues {
        feature: feature.to_string(),
        values,
    })
}

pub(crate) fn decode_diff_exp(value: Value) -> Result<DiffExpTable, ApiError> {
    let table = Table::from_value(unwrap_envelope(value)?)?;
    Ok(DiffExpTable::from_table(&table)?)
}

/// Coordinates arrive either bare or as `{"coordinates": <table>, "scales": {...}}`.
pub(crate) fn decode_coordinates(value: Value) -> Result<(Vec<SpotCoordinate>, ScaleFactors), ApiError> {
    let value = unwrap_envelope(value)?;
    let (table_value, scales) = match value {
        Value::Object(mut map) if map.contains_key("coordinates") => {
            let scales = match map.remove("scales") {
                Some(v @ Value::Object(_)) => serde_json::from_value(v)
                    .map_err(|e| ApiError::decode(format!("scale factors: {e}")))?,
                _ => ScaleFactors::default(),
            };
            (map.remove("coordinates").unwrap_or(Value::Null), scales)
        }
        other => (other, ScaleFactors::default()),
    };
    let table = Table::from_value(table_value)?;
    Ok((SpotCoordinate::from_table(&table)?, scales))
}

/// `getregionsignaldata` answers `{"hasBWData": bool, "data": <table>}`.
pub(crate) fn decode_signal(celltype: &str, value: Value) -> Result<Vec<SignalBinRecord>, ApiError> {
    let Value::Object(mut map) = value else {
        return Err(ApiError::decode("signal response must be an object"));
    };
    if map.get("hasBWData").and_then(Value::as_bool) == Some(false) {
        let message = map
            .get("message")
            .map(value_text)
            .unwrap_or_else(|| "no signal data".to_string());
        return Err(ApiError::backend(message));
    }
    let data = map.remove("data").unwrap_or(Value::Null);
    if data.is_null() {
        return Ok(Vec::new());
    }
    let table = Table::from_value(data)?;
    Ok(SignalBinRecord::from_table(&table, celltype)?)
}

pub(crate) fn decode_signal_available(value: &Value) -> Result<bool, ApiError> {
    value
        .get("hasBWData")
        .and_then(Value::as_bool)
        .ok_or_else(|| ApiError::decode("availability response has no hasBWData flag"))
}

pub(crate) fn decode_table<T>(
    value: Value,
    rows: impl FnOnce(&Table) -> Result<Vec<T>, omics_portal_model::ValidationError>,
) -> Result<Vec<T>, ApiError> {
    let value = unwrap_envelope(value)?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    let table = Table::from_value(value)?;
    Ok(rows(&table)?)
}

pub(crate) fn decode_defaults(value: Value) -> Result<DatasetDefaults, ApiError> {
    serde_json::from_value(unwrap_envelope(value)?)
        .map_err(|e| ApiError::decode(format!("dataset defaults: {e}")))
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    fn backend_tag(&self) -> &'static str {
        "http"
    }

    async fn list_genes(&self, dataset: &DatasetId, query: &str) -> Result<Vec<String>, ApiError> {
        let params = [ds(dataset), ("query_str", catalog_query(query))];
        decode_string_list(self.get_json("/api/getgenelist", &params).await?)
    }

    async fn list_samples(&self, dataset: &DatasetId, query: &str) -> Result<Vec<String>, ApiError> {
        let params = [ds(dataset), ("query_str", catalog_query(query))];
        decode_string_list(self.get_json("/api/getsamplelist", &params).await?)
    }

    async fn list_meta_features(
        &self,
        dataset: &DatasetId,
        query: &str,
    ) -> Result<Vec<String>, ApiError> {
        let params = [ds(dataset), ("query_str", catalog_query(query))];
        decode_string_list(self.get_json("/api/getmetalist", &params).await?)
    }

    async fn dataset_defaults(&self, dataset: &DatasetId) -> Result<DatasetDefaults, ApiError> {
        decode_defaults(self.get_json("/visium/getvisiumdefaults", &[ds(dataset)]).await?)
    }

    async fn expression(
        &self,
        dataset: &DatasetId,
        gene: &EntityId,
    ) -> Result<ExpressionVector, ApiError> {
        let params = [ds(dataset), ("gene", gene.as_str().to_string())];
        decode_numeric_map(self.get_json("/api/getexprdata", &params).await?).map(ExpressionVector)
    }

    async fn pseudobulk_expression(
        &self,
        dataset: &DatasetId,
        gene: &EntityId,
    ) -> Result<PseudobulkExpression, ApiError> {
        let params = [ds(dataset), ("gene", gene.as_str().to_string())];
        decode_numeric_map(self.get_json("/api/getpseudoexprdata", &params).await?)
            .map(PseudobulkExpression)
    }

    async fn sample_metadata(
        &self,
        dataset: &DatasetId,
        sample: &EntityId,
    ) -> Result<SampleMetadata, ApiError> {
        let params = [ds(dataset), ("sample", sample.as_str().to_string())];
        decode_sample_metadata(self.get_json("/api/getmetadataofsample", &params).await?)
    }

    async fn all_sample_metadata(&self, dataset: &DatasetId) -> Result<AllSampleMetadata, ApiError> {
        decode_all_sample_metadata(self.get_json("/api/getallsamplemetadata", &[ds(dataset)]).await?)
    }

    async fn meta_feature_values(
        &self,
        dataset: &DatasetId,
        feature: &EntityId,
    ) -> Result<MetaFeatureValues, ApiError> {
        let params = [
            ("dataset_id", dataset.as_str().to_string()),
            ("cols[]", feature.as_str().to_string()),
        ];
        decode_meta_feature(
            feature.as_str(),
            self.get_json("/api/getallmetadata", &params).await?,
        )
    }

    async fn sample_image(
        &self,
        dataset: &DatasetId,
        sample: &EntityId,
    ) -> Result<SampleImage, ApiError> {
        let params = [ds(dataset), ("sample", sample.as_str().to_string())];
        let (coordinates, scales) =
            decode_coordinates(self.get_json("/visium/getcoordinates", &params).await?)?;
        let (image, content_type) = self.get_bytes("/visium/getimage", &params).await?;
        if content_type.as_deref().is_some_and(|ct| ct.contains("json")) {
            let body: Value = serde_json::from_slice(&image)
                .map_err(|e| ApiError::decode(format!("image error body: {e}")))?;
            unwrap_envelope(body)?;
            return Err(ApiError::backend("image endpoint returned json instead of an image"));
        }
        Ok(SampleImage {
            image,
            content_type,
            coordinates,
            scales,
        })
    }

    async fn marker_genes(
        &self,
        dataset: &DatasetId,
        cluster: Option<&EntityId>,
    ) -> Result<DiffExpTable, ApiError> {
        let value = match cluster {
            None => self.get_json("/api/getmarkergenes", &[ds(dataset)]).await?,
            Some(cluster) => {
                let params = degs_params(dataset, cluster);
                self.get_json(DEGS_OF_CLUSTER, &params).await?
            }
        };
        decode_diff_exp(value)
    }

    /// DEGs of a cell type are served by the per-cluster route keyed by that cell type.
    async fn diff_exp_genes(
        &self,
        dataset: &DatasetId,
        comparison: &EntityId,
    ) -> Result<DiffExpTable, ApiError> {
        let params = degs_params(dataset, comparison);
        decode_diff_exp(self.get_json(DEGS_OF_CLUSTER, &params).await?)
    }

    async fn signal_track_available(&self, dataset: &DatasetId) -> Result<bool, ApiError> {
        decode_signal_available(&self.get_json("/signal/getbwdataexists", &[ds(dataset)]).await?)
    }

    async fn signal_cell_types(&self, dataset: &DatasetId) -> Result<Vec<String>, ApiError> {
        decode_string_list(self.get_json("/signal/getcelltypelist", &[ds(dataset)]).await?)
    }

    async fn binned_signal(&self, request: &SignalRequest) -> Result<Vec<SignalBinRecord>, ApiError> {
        let mut params = region_params(&request.dataset, &request.range);
        params.push(("celltype", request.celltype.clone()));
        params.push(("binsize", request.bin_size.to_string()));
        decode_signal(
            &request.celltype,
            self.get_json("/signal/getregionsignaldata", &params).await?,
        )
    }

    async fn gene_locations(
        &self,
        dataset: &DatasetId,
        range: &GenomicRange,
    ) -> Result<Vec<GeneLocation>, ApiError> {
        let params = region_params(dataset, range);
        decode_table(
            self.get_json("/signal/getgenelocationsinchromosome", &params).await?,
            GeneLocation::from_table,
        )
    }

    async fn gwas_hits(
        &self,
        dataset: &DatasetId,
        range: &GenomicRange,
    ) -> Result<Vec<GwasHit>, ApiError> {
        let params = region_params(dataset, range);
        decode_table(
            self.get_json("/signal/getgwasinchromosome", &params).await?,
            GwasHit::from_table,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;
    use serde_json::json;

    #[test]
    fn base_url_is_validated_and_normalised() {
        let api = HttpPortalApi::new("http://portal.local:8000/", Duration::from_secs(1))
            .expect("client");
        assert_eq!(api.base_url(), "http://portal.local:8000");
        assert_eq!(api.url("/api/getgenelist"), "http://portal.local:8000/api/getgenelist");
        assert!(HttpPortalApi::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn empty_catalog_query_becomes_default() {
        assert_eq!(catalog_query(""), "default");
        assert_eq!(catalog_query("  SNC "), "SNC");
    }

    #[test]
    fn unsuccessful_envelope_is_a_backend_error() {
        let err = decode_string_list(json!({"success": false, "message": "Error in getting sample list."}))
            .expect_err("failure");
        assert_eq!(err.kind, ApiErrorKind::Backend);
        assert!(err.message.contains("sample list"));

        let samples = decode_string_list(json!({"success": true, "data": ["S1", "S2"]})).expect("list");
        assert_eq!(samples, vec!["S1", "S2"]);
        assert_eq!(decode_string_list(json!(["SNCA", "GBA"])).expect("bare").len(), 2);
    }

    #[test]
    fn expression_accepts_maps_and_tables() {
        let map = decode_numeric_map(json!({"AAAC-1": 1.5, "AAAG-1": null})).expect("map");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("AAAC-1"), Some(&1.5));

        let table = decode_numeric_map(json!({
            "index": ["c1", "c2"],
            "columns": ["SNCA"],
            "data": [[0.5], [2.0]]
        }))
        .expect("table");
        assert_eq!(table.get("c2"), Some(&2.0));

        let ordered = decode_numeric_map(json!({
            "index": ["c1", "c2"],
            "columns": ["SNCA", "AAA_score", "label"],
            "data": [[0.5, 9.0, "x"], [null, 7.0, "y"]]
        }))
        .expect("ordered table");
        assert_eq!(ordered.get("c1"), Some(&0.5));
        assert_eq!(ordered.get("c2"), Some(&7.0));
    }

    #[test]
    fn cell_type_degs_use_the_cluster_route() {
        let api = HttpPortalApi::new("http://portal.local:8000", Duration::from_secs(1))
            .expect("client");
        assert_eq!(api.url(DEGS_OF_CLUSTER), "http://portal.local:8000/api/getdegsofcluster");
        let dataset = DatasetId::parse("pd").expect("dataset");
        let celltype = EntityId::parse("Microglia").expect("id");
        assert_eq!(
            degs_params(&dataset, &celltype),
            [
                ("dataset", "pd".to_string()),
                ("cluster", "Microglia".to_string())
            ]
        );
    }

    #[test]
    fn sample_metadata_tolerates_missing_sections() {
        let meta = decode_sample_metadata(json!({
            "cell_metadata": {"cell_type": ["Microglia", "Neuron"]},
            "sample_metadata": {"diagnosis": "PD"}
        }))
        .expect("metadata");
        assert_eq!(meta.cell_metadata.len(), 2);
        assert_eq!(meta.sample_metadata.get("diagnosis"), Some(&json!("PD")));
        assert!(meta.cell_metadata_mapping.is_empty());
    }

    #[test]
    fn meta_feature_column_is_selected() {
        let values = decode_meta_feature(
            "cell_type",
            json!({"cell_metadata": {
                "index": ["c1", "c2"],
                "columns": ["cell_type", "n_genes"],
                "data": [["Microglia", 812], ["Neuron", 2300]]
            }}),
        )
        .expect("feature");
        assert_eq!(values.values.get("c2"), Some(&json!("Neuron")));

        let err = decode_meta_feature("missing", json!({"cell_metadata": {"n_genes": [1]}}))
            .expect_err("absent column");
        assert_eq!(err.kind, ApiErrorKind::Decode);
    }

    #[test]
    fn signal_without_bigwig_is_backend_error() {
        let err = decode_signal("Microglia", json!({"hasBWData": false, "message": "no file"}))
            .expect_err("missing");
        assert_eq!(err.kind, ApiErrorKind::Backend);

        let bins = decode_signal(
            "Microglia",
            json!({"hasBWData": true, "data": {"position": [2000, 0], "value": [1.0, 0.5]}}),
        )
        .expect("bins");
        assert_eq!(bins[0].position, 0);
        assert!(decode_signal_available(&json!({"hasBWData": true})).expect("flag"));
        assert!(decode_signal_available(&json!({})).is_err());
    }

    #[test]
    fn coordinates_with_scales() {
        let (coords, scales) = decode_coordinates(json!({
            "coordinates": {"index": ["AAAC-1"], "columns": ["x", "y"], "data": [[10.0, 20.0]]},
            "scales": {"tissue_hires_scalef": 0.17}
        }))
        .expect("coords");
        assert_eq!(coords[0].spot_id, "AAAC-1");
        assert_eq!(scales.tissue_hires_scalef, Some(0.17));
    }

    #[test]
    fn fastapi_detail_is_surfaced() {
        assert_eq!(detail_message(r#"{"detail":"Error in getting gene list."}"#), "Error in getting gene list.");
        assert_eq!(detail_message("plain failure"), "plain failure");
    }
}
