use std::fmt;

use metraj_core::document::{Drawing, EntityKind};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::area::{self, DEFAULT_CLOSURE_TOLERANCE_M};
use crate::count::{self, CountMeasurement};
use crate::diagnostics::TakeoffDiagnostics;
use crate::index::{EntityIndex, all_layer_names};
use crate::inference::{LayerCategory, categorize_layer};
use crate::length::{self, DedupPolicy};
use crate::measurement::LayerMeasurement;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeoffSettings {
    pub closure_tolerance_m: f64,
    pub dedup: DedupPolicy,
}

impl Default for TakeoffSettings {
    fn default() -> Self {
        Self {
            closure_tolerance_m: DEFAULT_CLOSURE_TOLERANCE_M,
            dedup: DedupPolicy::default(),
        }
    }
}

/// 单个图层的长度、面积与计数结果。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerTakeoff {
    pub layer_name: String,
    pub category: LayerCategory,
    pub is_visible: bool,
    pub length: LayerMeasurement,
    pub area: LayerMeasurement,
    pub count: CountMeasurement,
    pub diagnostics: TakeoffDiagnostics,
}

impl LayerTakeoff {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length.total_length_m == 0.0
            && self.area.total_area_m2 == 0.0
            && self.count.block_counts.is_empty()
    }
}

fn measure_layer(
    drawing: &Drawing,
    index: &EntityIndex<'_>,
    layer_name: &str,
    settings: &TakeoffSettings,
) -> LayerTakeoff {
    let entities = index.entities_of(layer_name, &EntityKind::ALL);
    let unit = drawing.unit();

    let mut length_diagnostics = TakeoffDiagnostics::new();
    let length = length::measure_length(
        &entities,
        unit,
        layer_name,
        &settings.dedup,
        &mut length_diagnostics,
    );
    let mut area_diagnostics = TakeoffDiagnostics::new();
    let area = area::measure_area(
        &entities,
        unit,
        layer_name,
        settings.closure_tolerance_m,
        &mut area_diagnostics,
    );
    let count = count::measure_count(&entities, layer_name);

    LayerTakeoff {
        layer_name: layer_name.to_string(),
        category: categorize_layer(layer_name),
        is_visible: drawing.layer(layer_name).is_none_or(|layer| layer.is_visible),
        length,
        area,
        count,
        diagnostics: TakeoffDiagnostics::combine_layer(&length_diagnostics, &area_diagnostics),
    }
}

/// 对全部图层（含图层表中的空图层）并行统计，结果按图层名排序。
pub fn measure_all_layers(drawing: &Drawing, settings: &TakeoffSettings) -> Vec<LayerTakeoff> {
    let names: Vec<String> = all_layer_names(drawing).into_iter().collect();
    measure_layers(drawing, &names, settings)
}

/// 只统计指定的图层。每个图层只读取自身的实体，可安全并行。
pub fn measure_layers(
    drawing: &Drawing,
    layer_names: &[String],
    settings: &TakeoffSettings,
) -> Vec<LayerTakeoff> {
    let index = EntityIndex::build(drawing);
    let mut results: Vec<LayerTakeoff> = layer_names
        .par_iter()
        .map(|name| measure_layer(drawing, &index, name, settings))
        .collect();
    results.sort_by(|a, b| a.layer_name.cmp(&b.layer_name));

    let mut totals = TakeoffDiagnostics::new();
    for layer in &results {
        totals.merge(&layer.diagnostics);
    }
    info!(
        layers = results.len(),
        repaired = totals.repaired,
        skipped = totals.skipped,
        deduplicated = totals.deduplicated,
        "图纸算量完成"
    );
    results
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantityUnit {
    #[serde(rename = "m")]
    Meter,
    #[serde(rename = "m²")]
    SquareMeter,
    #[serde(rename = "pcs")]
    Piece,
}

impl QuantityUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            QuantityUnit::Meter => "m",
            QuantityUnit::SquareMeter => "m²",
            QuantityUnit::Piece => "pcs",
        }
    }
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 交给造价计算的清单行。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TakeoffItem {
    pub description: String,
    pub quantity: f64,
    pub unit: QuantityUnit,
    pub category: LayerCategory,
    pub layer: String,
}

/// 每个图层输出长度、面积与按块名的数量三类清单行，数量为 0 的行省略。
pub fn takeoff_items(layers: &[LayerTakeoff]) -> Vec<TakeoffItem> {
    let mut items = Vec::new();
    for layer in layers {
        let category = layer.category;
        if layer.length.total_length_m > 0.0 {
            items.push(TakeoffItem {
                description: format!("{}: {} length", category.label(), layer.layer_name),
                quantity: layer.length.total_length_m,
                unit: QuantityUnit::Meter,
                category,
                layer: layer.layer_name.clone(),
            });
        }
        if layer.area.total_area_m2 > 0.0 {
            items.push(TakeoffItem {
                description: format!("{}: {} area", category.label(), layer.layer_name),
                quantity: layer.area.total_area_m2,
                unit: QuantityUnit::SquareMeter,
                category,
                layer: layer.layer_name.clone(),
            });
        }
        for (block, count) in &layer.count.block_counts {
            if *count == 0 {
                continue;
            }
            items.push(TakeoffItem {
                description: format!("{}: {block}", category.label()),
                quantity: *count as f64,
                unit: QuantityUnit::Piece,
                category,
                layer: layer.layer_name.clone(),
            });
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use metraj_core::geometry::Point2;
    use metraj_core::units::DrawingUnit;

    use super::*;

    fn sample() -> Drawing {
        let mut drawing = Drawing::new(DrawingUnit::Meter);
        drawing.add_segment(Point2::new(0.0, 0.0), Point2::new(4.0, 0.0), "DUVAR");
        drawing.add_polyline(
            [
                Point2::new(0.0, 0.0),
                Point2::new(3.0, 0.0),
                Point2::new(3.0, 3.0),
                Point2::new(0.0, 3.0),
            ],
            true,
            "ZEMIN",
        );
        drawing.add_block_reference("KAPI_90", Point2::new(1.0, 0.0), "KAPI");
        drawing.add_block_reference("KAPI_90", Point2::new(2.0, 0.0), "KAPI");
        drawing.declare_layer("BOS", true);
        drawing.declare_layer("GIZLI", false);
        drawing
    }

    #[test]
    fn every_layer_is_measured_in_name_order() {
        let drawing = sample();
        let layers = measure_all_layers(&drawing, &TakeoffSettings::default());
        let names: Vec<&str> = layers.iter().map(|layer| layer.layer_name.as_str()).collect();
        assert_eq!(names, vec!["BOS", "DUVAR", "GIZLI", "KAPI", "ZEMIN"]);

        let empty = &layers[0];
        assert!(empty.is_empty());
        assert_eq!(empty.length.contributing_entity_count, 0);
        assert!(!layers[2].is_visible);

        let wall = &layers[1];
        assert_eq!(wall.category, LayerCategory::Wall);
        assert!((wall.length.total_length_m - 4.0).abs() < 1e-9);

        let floor = &layers[4];
        assert!((floor.area.total_area_m2 - 9.0).abs() < 1e-9);
        assert!((floor.length.total_length_m - 12.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_result_matches_single_layer_queries() {
        let drawing = sample();
        let layers = measure_all_layers(&drawing, &TakeoffSettings::default());
        for layer in &layers {
            let length = length::aggregate_length(&drawing, &layer.layer_name);
            let area = area::aggregate_area(
                &drawing,
                &layer.layer_name,
                DEFAULT_CLOSURE_TOLERANCE_M,
            );
            assert_eq!(layer.length, length);
            assert_eq!(layer.area, area);
        }
    }

    #[test]
    fn items_skip_zero_quantities() {
        let drawing = sample();
        let layers = measure_all_layers(&drawing, &TakeoffSettings::default());
        let items = takeoff_items(&layers);

        assert_eq!(items.len(), 4);
        let doors = items
            .iter()
            .find(|item| item.unit == QuantityUnit::Piece)
            .expect("door count item");
        assert_eq!(doors.quantity, 2.0);
        assert_eq!(doors.layer, "KAPI");
        assert_eq!(doors.category, LayerCategory::Opening);

        let area_items: Vec<_> = items
            .iter()
            .filter(|item| item.unit == QuantityUnit::SquareMeter)
            .collect();
        assert_eq!(area_items.len(), 1);
        assert_eq!(area_items[0].layer, "ZEMIN");
        assert!(items.iter().all(|item| item.quantity > 0.0));
    }

    #[test]
    fn case_variant_layer_is_measured_once() {
        let mut drawing = Drawing::new(DrawingUnit::Meter);
        drawing.declare_layer("DUVAR", true);
        drawing.add_segment(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), "Duvar");

        let layers = measure_all_layers(&drawing, &TakeoffSettings::default());
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].layer_name, "DUVAR");
        assert!((layers[0].length.total_length_m - 10.0).abs() < 1e-9);

        let items = takeoff_items(&layers);
        assert_eq!(items.len(), 1);
        assert!((items[0].quantity - 10.0).abs() < 1e-9);
    }

    #[test]
    fn selected_layers_only() {
        let drawing = sample();
        let layers = measure_layers(
            &drawing,
            &["zemin".to_string(), "NOPE".to_string()],
            &TakeoffSettings::default(),
        );
        assert_eq!(layers.len(), 2);
        assert!(layers[0].is_empty());
        assert!((layers[1].area.total_area_m2 - 9.0).abs() < 1e-9);
    }
}
