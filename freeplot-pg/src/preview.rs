//! Aperçu d'une couche de référence : reprojection, colonnes utiles, couleur par catégorie

use std::collections::{BTreeSet, HashMap};

use shpfile::{AttributeValue, Crs, Layer, OutputFormat};
use tracing::debug;

use crate::error::{FreeplotError, Result};
use crate::pipeline::LayerSpec;
use crate::transform::reproject;

/// Palette catégorielle (10 couleurs, réutilisées au-delà)
pub const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd",
    "#8c564b", "#e377c2", "#7f7f7f", "#bcbd22", "#17becf",
];

/// Attribut ajouté par [`assign_colors`]
pub const COLOR_ATTRIBUTE: &str = "color";

/// Lit, reprojette et colore une couche, puis la renvoie en GeoJSON
pub fn preview_layer(spec: &LayerSpec, target: &Crs, column: Option<&str>) -> Result<String> {
    let layer = reproject(&spec.read()?, target)?;
    let mut layer = prune_empty_columns(&layer);
    if let Some(column) = column {
        layer = assign_colors(&layer, column)?;
    }

    let bytes = shpfile::serialize(&layer, OutputFormat::GeoJson)?;
    String::from_utf8(bytes).map_err(|e| FreeplotError::Format {
        file: spec.name.clone(),
        reason: e.to_string(),
    })
}

fn is_blank(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::Null => true,
        AttributeValue::Number(n) => *n == 0.0,
        _ => false,
    }
}

/// Retire les colonnes nulles ou à zéro dans toutes les features
pub fn prune_empty_columns(layer: &Layer) -> Layer {
    let columns: BTreeSet<&String> = layer.features.iter().flat_map(|f| f.attributes.keys()).collect();
    let kept: BTreeSet<String> = columns
        .into_iter()
        .filter(|column| {
            layer
                .features
                .iter()
                .any(|f| f.attribute(column).map_or(false, |v| !is_blank(v)))
        })
        .cloned()
        .collect();

    let features = layer
        .features
        .iter()
        .map(|f| {
            let mut feature = f.clone();
            feature.attributes.retain(|k, _| kept.contains(k));
            feature
        })
        .collect();

    debug!(layer = %layer.name, columns = kept.len(), "Empty columns pruned");
    layer.with_features(features)
}

/// Ajoute `color` selon les valeurs distinctes de `column`, dans l'ordre d'apparition
pub fn assign_colors(layer: &Layer, column: &str) -> Result<Layer> {
    let known = layer.features.iter().any(|f| f.attributes.contains_key(column));
    if !known {
        return Err(FreeplotError::NotFound(format!(
            "column {} in layer {}",
            column, layer.name
        )));
    }

    let mut categories: HashMap<String, usize> = HashMap::new();
    let features = layer
        .features
        .iter()
        .map(|f| {
            let key = f
                .attribute(column)
                .map(|v| v.to_json().to_string())
                .unwrap_or_else(|| "null".to_string());
            let next = categories.len();
            let index = *categories.entry(key).or_insert(next);

            let mut feature = f.clone();
            feature.attributes.insert(
                COLOR_ATTRIBUTE.to_string(),
                AttributeValue::Text(PALETTE[index % PALETTE.len()].to_string()),
            );
            feature
        })
        .collect();

    Ok(layer.with_features(features))
}
