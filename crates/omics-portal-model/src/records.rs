// SPDX-License-Identifier: Apache-2.0

use crate::dataset::ValidationError;
use crate::table::{row_f64, row_str, row_u64, Table, TableRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lower bound applied to p-values before taking `-log10`.
pub const GWAS_P_VALUE_FLOOR: f64 = 1e-20;

/// Cell/spot id to expression value for one gene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpressionVector(pub BTreeMap<String, f64>);

impl ExpressionVector {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn max_value(&self) -> Option<f64> {
        self.0.values().copied().filter(|v| !v.is_nan()).reduce(f64::max)
    }
}

/// Sample id to pseudobulk expression for one gene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PseudobulkExpression(pub BTreeMap<String, f64>);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleMetadata {
    pub cell_metadata: Table,
    #[serde(default)]
    pub sample_metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub cell_metadata_mapping: BTreeMap<String, Value>,
}

/// Sample metadata cache payload: one sample, or the dataset-wide aggregate for the `all` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "value", rename_all = "snake_case")]
pub enum SampleMetadataPayload {
    Sample(SampleMetadata),
    AllSamples(BTreeMap<String, BTreeMap<String, Value>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpotCoordinate {
    pub spot_id: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactors {
    #[serde(default)]
    pub tissue_hires_scalef: Option<f64>,
    #[serde(default)]
    pub tissue_lowres_scalef: Option<f64>,
    #[serde(default)]
    pub spot_diameter_fullres: Option<f64>,
    #[serde(default)]
    pub fiducial_diameter_fullres: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleImage {
    #[serde(skip)]
    pub image: Vec<u8>,
    pub content_type: Option<String>,
    pub coordinates: Vec<SpotCoordinate>,
    pub scales: ScaleFactors,
}

impl SpotCoordinate {
    /// Coordinates arrive as a table with spot ids in the index and x/y pixel columns.
    pub fn from_table(table: &Table) -> Result<Vec<Self>, ValidationError> {
        table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let spot_id = row_str(row, &["spot_id", "barcode"])
                    .or_else(|| table.index.get(i).cloned())
                    .ok_or_else(|| ValidationError(format!("coordinate row {i} has no spot id")))?;
                let x = row_f64(row, &["x", "pxl_col_in_fullres", "imagecol"]).ok_or_else(|| {
                    ValidationError(format!("coordinate row {i} has no x column"))
                })?;
                let y = row_f64(row, &["y", "pxl_row_in_fullres", "imagerow"]).ok_or_else(|| {
                    ValidationError(format!("coordinate row {i} has no y column"))
                })?;
                Ok(Self { spot_id, x, y })
            })
            .collect()
    }
}

/// One row of a marker-gene or differential-expression result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffExpRecord {
    pub gene: String,
    pub group: Option<String>,
    pub score: Option<f64>,
    pub log_fold_change: Option<f64>,
    pub p_value: Option<f64>,
    pub p_value_adj: Option<f64>,
}

impl DiffExpRecord {
    fn from_row(i: usize, row: &TableRow) -> Result<Self, ValidationError> {
        let gene = row_str(row, &["gene", "names", "gene_symbol", "gene_name"])
            .ok_or_else(|| ValidationError(format!("differential expression row {i} has no gene")))?;
        Ok(Self {
            gene,
            group: row_str(row, &["group", "cluster", "cell_type", "celltype"]),
            score: row_f64(row, &["score", "scores"]),
            log_fold_change: row_f64(row, &["log_fold_change", "logfoldchanges", "avg_log2FC"]),
            p_value: row_f64(row, &["p_value", "pvals", "p_val"]),
            p_value_adj: row_f64(row, &["p_value_adj", "pvals_adj", "p_val_adj"]),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffExpTable(pub Vec<DiffExpRecord>);

impl DiffExpTable {
    pub fn from_table(table: &Table) -> Result<Self, ValidationError> {
        table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| DiffExpRecord::from_row(i, row))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cell id to value for one metadata feature (cell type label, QC metric, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaFeatureValues {
    pub feature: String,
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalBinRecord {
    pub position: u64,
    pub value: f64,
    pub celltype: String,
}

impl SignalBinRecord {
    /// Rows are ordered by position; the backend does not repeat the cell type per row.
    pub fn from_table(table: &Table, celltype: &str) -> Result<Vec<Self>, ValidationError> {
        let mut bins = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let position = row_u64(row, &["position", "start", "bin_start"])
                    .ok_or_else(|| ValidationError(format!("signal row {i} has no position")))?;
                let value = row_f64(row, &["value", "signal", "mean"]).unwrap_or(0.0);
                Ok(Self {
                    position,
                    value,
                    celltype: celltype.to_string(),
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        bins.sort_by_key(|bin| bin.position);
        Ok(bins)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneLocation {
    pub gene: String,
    pub start: u64,
    pub end: u64,
    pub strand: Option<String>,
}

impl GeneLocation {
    pub fn from_table(table: &Table) -> Result<Vec<Self>, ValidationError> {
        table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let gene = row_str(row, &["gene", "gene_name", "gene_id", "symbol"])
                    .ok_or_else(|| ValidationError(format!("gene location row {i} has no gene")))?;
                let start = row_u64(row, &["start", "position_start"])
                    .ok_or_else(|| ValidationError(format!("gene location row {i} has no start")))?;
                let end = row_u64(row, &["end", "position_end"])
                    .ok_or_else(|| ValidationError(format!("gene location row {i} has no end")))?;
                Ok(Self {
                    gene,
                    start,
                    end,
                    strand: row_str(row, &["strand"]),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GwasHit {
    pub snp_id: String,
    pub position: u64,
    pub p_value: f64,
    pub beta_value: Option<f64>,
}

impl GwasHit {
    #[must_use]
    pub fn neg_log10_p(&self) -> f64 {
        -self.p_value.max(GWAS_P_VALUE_FLOOR).log10()
    }

    pub fn from_table(table: &Table) -> Result<Vec<Self>, ValidationError> {
        table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let snp_id = row_str(row, &["snp_id", "rsid", "id"])
                    .ok_or_else(|| ValidationError(format!("gwas row {i} has no snp id")))?;
                let position = row_u64(row, &["position", "pos", "bp"])
                    .ok_or_else(|| ValidationError(format!("gwas row {i} has no position")))?;
                let p_value = row_f64(row, &["p_value", "pval", "p"])
                    .ok_or_else(|| ValidationError(format!("gwas row {i} has no p-value")))?;
                Ok(Self {
                    snp_id,
                    position,
                    p_value,
                    beta_value: row_f64(row, &["beta_value", "beta"]),
                })
            })
            .collect()
    }
}

/// Selections applied right after a dataset becomes active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDefaults {
    #[serde(default)]
    pub samples: Vec<String>,
    #[serde(default)]
    pub genes: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
}
