pub mod inference;
pub mod takeoff;

/// 按（图层，实体类型）划分实体流。图层名匹配一律不区分大小写。
pub mod index {
    use std::collections::{BTreeSet, HashMap};

    use metraj_core::document::{Drawing, Entity, EntityKind, Polyline, TextLabel};

    #[inline]
    pub(crate) fn layer_key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    #[derive(Debug, Default)]
    struct LayerBucket<'a> {
        by_kind: HashMap<EntityKind, Vec<(usize, &'a Entity)>>,
        total: usize,
    }

    /// 一次构建、多次查询的实体索引，保留实体在图纸中的原始顺序。
    #[derive(Debug)]
    pub struct EntityIndex<'a> {
        layers: HashMap<String, LayerBucket<'a>>,
    }

    impl<'a> EntityIndex<'a> {
        pub fn build(drawing: &'a Drawing) -> Self {
            let mut layers: HashMap<String, LayerBucket<'a>> = HashMap::new();
            for (order, (_, entity)) in drawing.entities().enumerate() {
                let bucket = layers.entry(layer_key(entity.layer_name())).or_default();
                bucket
                    .by_kind
                    .entry(entity.kind())
                    .or_default()
                    .push((order, entity));
                bucket.total += 1;
            }
            Self { layers }
        }

        /// 指定图层上属于 `kinds` 的实体；没有匹配时返回空集合。
        pub fn entities_of(&self, layer_name: &str, kinds: &[EntityKind]) -> Vec<&'a Entity> {
            let Some(bucket) = self.layers.get(&layer_key(layer_name)) else {
                return Vec::new();
            };
            let mut hits: Vec<(usize, &'a Entity)> = Vec::new();
            let mut seen: Vec<EntityKind> = Vec::with_capacity(kinds.len());
            for kind in kinds {
                if seen.contains(kind) {
                    continue;
                }
                seen.push(*kind);
                if let Some(entries) = bucket.by_kind.get(kind) {
                    hits.extend(entries.iter().copied());
                }
            }
            hits.sort_unstable_by_key(|(order, _)| *order);
            hits.into_iter().map(|(_, entity)| entity).collect()
        }

        #[inline]
        pub fn layer_entity_count(&self, layer_name: &str) -> usize {
            self.layers
                .get(&layer_key(layer_name))
                .map_or(0, |bucket| bucket.total)
        }

        pub fn polylines(&self, layer_name: &str) -> impl Iterator<Item = &'a Polyline> + '_ {
            self.kind_iter(layer_name, EntityKind::Polyline)
                .filter_map(|entity| match entity {
                    Entity::Polyline(polyline) => Some(polyline),
                    _ => None,
                })
        }

        pub fn text_labels(&self, layer_name: &str) -> impl Iterator<Item = &'a TextLabel> + '_ {
            self.kind_iter(layer_name, EntityKind::TextLabel)
                .filter_map(|entity| match entity {
                    Entity::TextLabel(label) => Some(label),
                    _ => None,
                })
        }

        fn kind_iter(&self, layer_name: &str, kind: EntityKind) -> impl Iterator<Item = &'a Entity> + '_ {
            self.layers
                .get(&layer_key(layer_name))
                .and_then(|bucket| bucket.by_kind.get(&kind))
                .into_iter()
                .flat_map(|entries| entries.iter().map(|(_, entity)| *entity))
        }
    }

    /// 不建索引的单次查询，适合只关心一个图层的调用方。
    pub fn entities_of<'a>(
        drawing: &'a Drawing,
        layer_name: &str,
        kinds: &[EntityKind],
    ) -> Vec<&'a Entity> {
        drawing
            .entities()
            .map(|(_, entity)| entity)
            .filter(|entity| {
                entity.layer_name().eq_ignore_ascii_case(layer_name) && kinds.contains(&entity.kind())
            })
            .collect()
    }

    /// 含实体的图层与图层表中声明的空图层的并集。
    ///
    /// 仅大小写不同的图层名视为同一图层，只保留一个显示名：图层表中的写法优先，
    /// 否则取先登记的写法。
    pub fn all_layer_names(drawing: &Drawing) -> BTreeSet<String> {
        let mut by_key: HashMap<String, String> = HashMap::new();
        let declared = drawing.layers().map(|layer| layer.name.as_str());
        let used = drawing.entities().map(|(_, entity)| entity.layer_name());
        for name in declared.chain(used) {
            by_key
                .entry(layer_key(name))
                .or_insert_with(|| name.to_string());
        }
        by_key.into_values().collect()
    }

    #[cfg(test)]
    mod tests {
        use metraj_core::geometry::Point2;
        use metraj_core::units::DrawingUnit;

        use super::*;

        fn sample() -> Drawing {
            let mut drawing = Drawing::new(DrawingUnit::Meter);
            drawing.add_segment(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), "Walls");
            drawing.add_text(Point2::new(0.5, 0.5), "H=280", 0.2, "WALLS");
            drawing.add_polyline(
                [Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), Point2::new(2.0, 2.0)],
                true,
                "walls",
            );
            drawing.add_circle(Point2::new(5.0, 5.0), 1.0, "Columns");
            drawing.declare_layer("EMPTY", true);
            drawing
        }

        #[test]
        fn index_matches_layers_case_insensitively_in_drawing_order() {
            let drawing = sample();
            let index = EntityIndex::build(&drawing);

            let hits = index.entities_of("WALLS", &[EntityKind::Polyline, EntityKind::Segment]);
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0].kind(), EntityKind::Segment);
            assert_eq!(hits[1].kind(), EntityKind::Polyline);

            assert_eq!(index.layer_entity_count("walls"), 3);
            assert_eq!(index.polylines("Walls").count(), 1);
            assert_eq!(index.text_labels("walls").count(), 1);
        }

        #[test]
        fn index_agrees_with_direct_scan() {
            let drawing = sample();
            let index = EntityIndex::build(&drawing);
            let kinds = EntityKind::ALL;
            assert_eq!(
                index.entities_of("walls", &kinds).len(),
                entities_of(&drawing, "walls", &kinds).len()
            );
        }

        #[test]
        fn unknown_layer_yields_empty_result() {
            let drawing = sample();
            let index = EntityIndex::build(&drawing);
            assert!(index.entities_of("MISSING", &EntityKind::ALL).is_empty());
            assert!(entities_of(&drawing, "EMPTY", &EntityKind::ALL).is_empty());
            assert_eq!(index.layer_entity_count("MISSING"), 0);
        }

        #[test]
        fn layer_names_include_declared_empty_layers() {
            let drawing = sample();
            let names = all_layer_names(&drawing);
            assert!(names.contains("EMPTY"));
            assert!(names.contains("Columns"));
            // 大小写不同的写法合并为第一次出现的 "Walls"
            assert_eq!(names.len(), 3);
            assert!(names.contains("Walls"));
            assert!(!names.contains("WALLS"));
        }

        #[test]
        fn declared_spelling_wins_over_entity_spelling() {
            let mut drawing = Drawing::new(DrawingUnit::Meter);
            drawing.declare_layer("DUVAR", true);
            drawing.add_segment(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), "Duvar");

            let names: Vec<String> = all_layer_names(&drawing).into_iter().collect();
            assert_eq!(names, vec!["DUVAR".to_string()]);
        }
    }
}

/// 单次统计调用的诊断累加器，由调用方持有并以 `&mut` 传入，生命周期只覆盖一次查询。
pub mod diagnostics {
    use serde::Serialize;
    use tracing::debug;

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct TakeoffDiagnostics {
        /// 因数据缺陷未参与统计的实体（顶点不足、坐标非有限值、无法识别的类型）。
        pub skipped: usize,
        /// 按容差自动闭合的开口多段线。
        pub repaired: usize,
        /// 嵌套闭合轮廓去重时舍弃的多段线。
        pub deduplicated: usize,
        /// 端点间距超出容差、未计入面积的开口多段线。
        pub open_excluded: usize,
    }

    impl TakeoffDiagnostics {
        pub fn new() -> Self {
            Self::default()
        }

        pub(crate) fn record_skip(&mut self, layer: &str, kind: &str, reason: &str) {
            self.skipped += 1;
            debug!(layer, kind, reason, "跳过实体");
        }

        pub fn merge(&mut self, other: &TakeoffDiagnostics) {
            self.skipped += other.skipped;
            self.repaired += other.repaired;
            self.deduplicated += other.deduplicated;
            self.open_excluded += other.open_excluded;
        }

        /// 合并同一图层的长度与面积诊断。两次统计遍历同一批实体，跳过数取较大者避免重复计数。
        pub fn combine_layer(length: &TakeoffDiagnostics, area: &TakeoffDiagnostics) -> Self {
            Self {
                skipped: length.skipped.max(area.skipped),
                repaired: length.repaired + area.repaired,
                deduplicated: length.deduplicated + area.deduplicated,
                open_excluded: length.open_excluded + area.open_excluded,
            }
        }

        #[inline]
        pub fn is_clean(&self) -> bool {
            self.skipped == 0 && self.repaired == 0
        }

        pub fn summary(&self) -> String {
            format!(
                "{} shapes auto-repaired / {} skipped",
                self.repaired, self.skipped
            )
        }
    }

}

pub mod measurement {
    use serde::Serialize;

    /// 长度或面积统计的结果。每次查询重新计算，构造后不再修改。
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct LayerMeasurement {
        pub layer_name: String,
        pub total_length_m: f64,
        pub total_area_m2: f64,
        pub contributing_entity_count: usize,
        pub repaired_entity_count: usize,
        pub skipped_entity_count: usize,
        pub deduplicated_entity_count: usize,
    }

    impl LayerMeasurement {
        pub fn empty(layer_name: impl Into<String>) -> Self {
            Self {
                layer_name: layer_name.into(),
                total_length_m: 0.0,
                total_area_m2: 0.0,
                contributing_entity_count: 0,
                repaired_entity_count: 0,
                skipped_entity_count: 0,
                deduplicated_entity_count: 0,
            }
        }
    }
}

/// 长度统计：线段、多段线、圆弧与多线中心线，附带嵌套闭合轮廓去重。
pub mod length {
    use std::f64::consts::{PI, TAU};

    use metraj_core::{
        document::{Drawing, Entity, EntityKind},
        geometry::{Point2, polygon},
        units::{self, DrawingUnit},
    };
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    use crate::diagnostics::TakeoffDiagnostics;
    use crate::index::entities_of;
    use crate::measurement::LayerMeasurement;

    /// 闭合多段线的去重阈值。墙体内外两条轮廓线常被同时绘制，
    /// 同组中只保留周长最大的外轮廓；这是外轮廓优先的约定，阈值可调。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct DedupPolicy {
        /// 质心距离阈值（米），按图纸单位换算后比较。
        pub centroid_proximity_m: f64,
        /// 面积相对差阈值，以两者中较大面积为基准。
        pub area_similarity: f64,
        /// 为真时两个条件须同时满足，否则满足其一即可归组。
        pub require_both: bool,
    }

    impl Default for DedupPolicy {
        fn default() -> Self {
            Self {
                centroid_proximity_m: 1.0,
                area_similarity: 0.10,
                require_both: false,
            }
        }
    }

    impl DedupPolicy {
        fn links(&self, a: &ClosedOutline, b: &ClosedOutline, proximity: f64) -> bool {
            let near = a.centroid.distance_to(b.centroid) <= proximity;
            let larger = a.area.max(b.area);
            let similar = larger > 0.0 && (a.area - b.area).abs() < self.area_similarity * larger;
            if self.require_both {
                near && similar
            } else {
                near || similar
            }
        }
    }

    /// 圆弧长度 `r × Δθ`，Δθ 取较短方向并落在 `[0, π]`；完整圆周的贡献为 0。
    pub fn arc_length(radius: f64, start_angle: f64, end_angle: f64) -> f64 {
        let mut delta = (end_angle - start_angle).rem_euclid(TAU);
        if delta > PI {
            delta = TAU - delta;
        }
        radius.abs() * delta
    }

    pub fn aggregate_length(drawing: &Drawing, layer_name: &str) -> LayerMeasurement {
        let mut diagnostics = TakeoffDiagnostics::new();
        aggregate_length_with(drawing, layer_name, &DedupPolicy::default(), &mut diagnostics)
    }

    pub fn aggregate_length_with(
        drawing: &Drawing,
        layer_name: &str,
        policy: &DedupPolicy,
        diagnostics: &mut TakeoffDiagnostics,
    ) -> LayerMeasurement {
        let entities = entities_of(drawing, layer_name, &EntityKind::ALL);
        measure_length(&entities, drawing.unit(), layer_name, policy, diagnostics)
    }

    #[derive(Debug)]
    struct ClosedOutline {
        perimeter: f64,
        centroid: Point2,
        area: f64,
    }

    pub(crate) fn measure_length(
        entities: &[&Entity],
        unit: DrawingUnit,
        layer_name: &str,
        policy: &DedupPolicy,
        diagnostics: &mut TakeoffDiagnostics,
    ) -> LayerMeasurement {
        let mut result = LayerMeasurement::empty(layer_name);
        let mut local = TakeoffDiagnostics::new();
        let mut outlines: Vec<ClosedOutline> = Vec::new();

        for entity in entities {
            match entity {
                Entity::Segment(segment) => {
                    if !(segment.start.is_finite() && segment.end.is_finite()) {
                        local.record_skip(layer_name, "Segment", "non-finite coordinate");
                        continue;
                    }
                    result.total_length_m +=
                        units::to_meters(segment.start.distance_to(segment.end), unit);
                    result.contributing_entity_count += 1;
                }
                Entity::Polyline(polyline) => {
                    if polyline.vertices.len() < 2 {
                        local.record_skip(layer_name, "Polyline", "fewer than 2 vertices");
                        continue;
                    }
                    if !polyline.has_finite_vertices() {
                        local.record_skip(layer_name, "Polyline", "non-finite coordinate");
                        continue;
                    }
                    let raw = polygon::path_length(&polyline.vertices, polyline.is_closed);
                    if polyline.is_closed && has_three_distinct(&polyline.vertices) {
                        outlines.push(ClosedOutline {
                            perimeter: raw,
                            centroid: polygon::centroid(&polyline.vertices)
                                .unwrap_or(polyline.vertices[0]),
                            area: polygon::shoelace_area(&polyline.vertices),
                        });
                    } else {
                        result.total_length_m += units::to_meters(raw, unit);
                        result.contributing_entity_count += 1;
                    }
                }
                Entity::Arc(arc) => {
                    let finite = arc.center.is_finite()
                        && arc.radius.is_finite()
                        && arc.start_angle.is_finite()
                        && arc.end_angle.is_finite();
                    if !finite {
                        local.record_skip(layer_name, "Arc", "non-finite parameter");
                        continue;
                    }
                    let raw = arc_length(arc.radius, arc.start_angle, arc.end_angle);
                    result.total_length_m += units::to_meters(raw, unit);
                    result.contributing_entity_count += 1;
                }
                Entity::MultiStrokeLine(mline) => {
                    if mline.centerline.len() < 2 {
                        local.record_skip(layer_name, "MultiStrokeLine", "fewer than 2 vertices");
                        continue;
                    }
                    if !mline.centerline.iter().all(|vertex| vertex.is_finite()) {
                        local.record_skip(layer_name, "MultiStrokeLine", "non-finite coordinate");
                        continue;
                    }
                    let raw = polygon::path_length(&mline.centerline, mline.is_closed);
                    result.total_length_m += units::to_meters(raw, unit);
                    result.contributing_entity_count += 1;
                }
                Entity::Unrecognized(unknown) => {
                    local.record_skip(
                        layer_name,
                        &unknown.kind,
                        unknown.reason.as_deref().unwrap_or("unsupported entity kind"),
                    );
                }
                Entity::TextLabel(_)
                | Entity::Circle(_)
                | Entity::Ellipse(_)
                | Entity::BlockReference(_) => {}
            }
        }

        let proximity = units::from_meters(policy.centroid_proximity_m, unit);
        for group in group_outlines(&outlines, policy, proximity) {
            let Some(outer) = group
                .iter()
                .map(|&index| outlines[index].perimeter)
                .max_by(f64::total_cmp)
            else {
                continue;
            };
            result.total_length_m += units::to_meters(outer, unit);
            result.contributing_entity_count += 1;
            local.deduplicated += group.len() - 1;
        }

        result.skipped_entity_count = local.skipped;
        result.deduplicated_entity_count = local.deduplicated;
        diagnostics.merge(&local);
        debug!(
            layer = layer_name,
            length_m = result.total_length_m,
            contributing = result.contributing_entity_count,
            deduplicated = result.deduplicated_entity_count,
            skipped = result.skipped_entity_count,
            "图层长度统计完成"
        );
        result
    }

    fn has_three_distinct(vertices: &[Point2]) -> bool {
        let mut distinct: Vec<Point2> = Vec::with_capacity(3);
        for vertex in vertices {
            if !distinct.contains(vertex) {
                distinct.push(*vertex);
                if distinct.len() == 3 {
                    return true;
                }
            }
        }
        false
    }

    /// 并查集归组，关系按传递闭包处理。返回各组成员下标，组内按原始顺序。
    fn group_outlines(
        outlines: &[ClosedOutline],
        policy: &DedupPolicy,
        proximity: f64,
    ) -> Vec<Vec<usize>> {
        let mut parent: Vec<usize> = (0..outlines.len()).collect();

        fn find(parent: &mut [usize], mut node: usize) -> usize {
            while parent[node] != node {
                parent[node] = parent[parent[node]];
                node = parent[node];
            }
            node
        }

        for i in 0..outlines.len() {
            for j in (i + 1)..outlines.len() {
                if policy.links(&outlines[i], &outlines[j], proximity) {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        parent[rj] = ri;
                    }
                }
            }
        }

        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for index in 0..outlines.len() {
            let root = find(&mut parent, index);
            match groups.iter_mut().find(|(r, _)| *r == root) {
                Some((_, members)) => members.push(index),
                None => groups.push((root, vec![index])),
            }
        }
        groups.into_iter().map(|(_, members)| members).collect()
    }

}

/// 面积统计：闭合或可按容差闭合的多段线（鞋带公式）以及圆。
pub mod area {
    use std::f64::consts::PI;

    use metraj_core::{
        document::{Drawing, Entity, EntityKind},
        geometry::polygon,
        units::{self, DrawingUnit},
    };
    use tracing::debug;

    use crate::diagnostics::TakeoffDiagnostics;
    use crate::index::entities_of;
    use crate::measurement::LayerMeasurement;

    pub const DEFAULT_CLOSURE_TOLERANCE_M: f64 = 0.01;

    const TOLERANCE_RELATIVE_EPSILON: f64 = 1e-9;

    pub fn aggregate_area(
        drawing: &Drawing,
        layer_name: &str,
        closure_tolerance_m: f64,
    ) -> LayerMeasurement {
        let mut diagnostics = TakeoffDiagnostics::new();
        aggregate_area_with(drawing, layer_name, closure_tolerance_m, &mut diagnostics)
    }

    pub fn aggregate_area_with(
        drawing: &Drawing,
        layer_name: &str,
        closure_tolerance_m: f64,
        diagnostics: &mut TakeoffDiagnostics,
    ) -> LayerMeasurement {
        let entities = entities_of(drawing, layer_name, &EntityKind::ALL);
        measure_area(&entities, drawing.unit(), layer_name, closure_tolerance_m, diagnostics)
    }

    /// 端点间距是否在闭合容差内（含边界）。
    pub fn within_closure_tolerance(gap: f64, closure_tolerance_m: f64, unit: DrawingUnit) -> bool {
        let tolerance = units::from_meters(closure_tolerance_m.max(0.0), unit);
        gap <= tolerance + tolerance * TOLERANCE_RELATIVE_EPSILON
    }

    pub(crate) fn measure_area(
        entities: &[&Entity],
        unit: DrawingUnit,
        layer_name: &str,
        closure_tolerance_m: f64,
        diagnostics: &mut TakeoffDiagnostics,
    ) -> LayerMeasurement {
        let mut result = LayerMeasurement::empty(layer_name);
        let mut local = TakeoffDiagnostics::new();

        for entity in entities {
            match entity {
                Entity::Polyline(polyline) => {
                    if polyline.vertices.len() < 3 {
                        local.record_skip(layer_name, "Polyline", "fewer than 3 vertices");
                        continue;
                    }
                    if !polyline.has_finite_vertices() {
                        local.record_skip(layer_name, "Polyline", "non-finite coordinate");
                        continue;
                    }
                    if !polyline.is_closed {
                        let gap = polygon::endpoint_gap(&polyline.vertices).unwrap_or(f64::INFINITY);
                        if !within_closure_tolerance(gap, closure_tolerance_m, unit) {
                            local.open_excluded += 1;
                            continue;
                        }
                        local.repaired += 1;
                    }
                    let raw = polygon::shoelace_area(&polyline.vertices);
                    result.total_area_m2 += units::to_square_meters(raw, unit);
                    result.contributing_entity_count += 1;
                }
                Entity::Circle(circle) => {
                    if !(circle.center.is_finite() && circle.radius.is_finite()) {
                        local.record_skip(layer_name, "Circle", "non-finite parameter");
                        continue;
                    }
                    let raw = PI * circle.radius * circle.radius;
                    result.total_area_m2 += units::to_square_meters(raw, unit);
                    result.contributing_entity_count += 1;
                }
                Entity::Ellipse(ellipse) => {
                    if !ellipse.is_finite() {
                        local.record_skip(layer_name, "Ellipse", "non-finite parameter");
                        continue;
                    }
                    // 椭圆弧不围合面积
                    if !ellipse.is_full() {
                        local.open_excluded += 1;
                        continue;
                    }
                    result.total_area_m2 += units::to_square_meters(ellipse.area(), unit);
                    result.contributing_entity_count += 1;
                }
                Entity::Unrecognized(unknown) => {
                    local.record_skip(
                        layer_name,
                        &unknown.kind,
                        unknown.reason.as_deref().unwrap_or("unsupported entity kind"),
                    );
                }
                Entity::Segment(_)
                | Entity::Arc(_)
                | Entity::MultiStrokeLine(_)
                | Entity::TextLabel(_)
                | Entity::BlockReference(_) => {}
            }
        }

        result.repaired_entity_count = local.repaired;
        result.skipped_entity_count = local.skipped;
        diagnostics.merge(&local);
        debug!(
            layer = layer_name,
            area_m2 = result.total_area_m2,
            contributing = result.contributing_entity_count,
            repaired = local.repaired,
            open_excluded = local.open_excluded,
            skipped = local.skipped,
            "图层面积统计完成"
        );
        result
    }

    #[cfg(test)]
    mod tests {
        use metraj_core::geometry::Point2;

        use super::*;

        fn square(side: f64) -> Vec<Point2> {
            vec![
                Point2::new(0.0, 0.0),
                Point2::new(side, 0.0),
                Point2::new(side, side),
                Point2::new(0.0, side),
            ]
        }

        #[test]
        fn closed_square_in_meters_is_side_squared() {
            let mut drawing = Drawing::new(DrawingUnit::Meter);
            drawing.add_polyline(square(7.5), true, "ZEMIN");
            let result = aggregate_area(&drawing, "zemin", DEFAULT_CLOSURE_TOLERANCE_M);
            assert!((result.total_area_m2 - 56.25).abs() < 1e-9);
            assert_eq!(result.repaired_entity_count, 0);
        }

        #[test]
        fn centimeter_area_uses_squared_factor() {
            let mut drawing = Drawing::new(DrawingUnit::Centimeter);
            drawing.add_polyline(square(300.0), true, "ZEMIN");
            let result = aggregate_area(&drawing, "ZEMIN", 0.0);
            assert!((result.total_area_m2 - 9.0).abs() < 1e-9);
        }

        fn open_square_with_gap(gap: f64) -> Vec<Point2> {
            vec![
                Point2::new(0.0, gap),
                Point2::new(0.0, 1000.0),
                Point2::new(1000.0, 1000.0),
                Point2::new(1000.0, 0.0),
                Point2::new(0.0, 0.0),
            ]
        }

        #[test]
        fn gap_equal_to_tolerance_is_repaired() {
            let mut drawing = Drawing::new(DrawingUnit::Millimeter);
            // 10 mm 间距，容差 0.01 m
            drawing.add_polyline(open_square_with_gap(10.0), false, "Z");
            let result = aggregate_area(&drawing, "Z", 0.01);
            assert_eq!(result.repaired_entity_count, 1);
            assert_eq!(result.contributing_entity_count, 1);
            assert!(result.total_area_m2 > 0.0);
        }

        #[test]
        fn gap_beyond_tolerance_is_excluded_not_skipped() {
            let mut drawing = Drawing::new(DrawingUnit::Millimeter);
            drawing.add_polyline(open_square_with_gap(10.5), false, "Z");
            let mut diagnostics = TakeoffDiagnostics::new();
            let result = aggregate_area_with(&drawing, "Z", 0.01, &mut diagnostics);
            assert_eq!(result.total_area_m2, 0.0);
            assert_eq!(result.repaired_entity_count, 0);
            assert_eq!(result.skipped_entity_count, 0);
            assert_eq!(diagnostics.open_excluded, 1);
        }

        #[test]
        fn circles_add_disc_area() {
            let mut drawing = Drawing::new(DrawingUnit::Meter);
            drawing.add_circle(Point2::new(0.0, 0.0), 2.0, "KOLON");
            let result = aggregate_area(&drawing, "KOLON", 0.0);
            assert!((result.total_area_m2 - 4.0 * PI).abs() < 1e-9);
        }

        #[test]
        fn full_ellipses_add_area_and_arcs_are_excluded() {
            use metraj_core::document::{Ellipse, Entity};
            use metraj_core::geometry::Vector2;

            let mut drawing = Drawing::new(DrawingUnit::Centimeter);
            // 长半轴 300 cm，短半轴 150 cm
            drawing.add_ellipse(Point2::new(0.0, 0.0), Vector2::new(300.0, 0.0), 0.5, "HAVUZ");
            drawing.add_entity(Entity::Ellipse(Ellipse {
                center: Point2::new(0.0, 0.0),
                major_axis: Vector2::new(300.0, 0.0),
                ratio: 0.5,
                start_param: 0.0,
                end_param: PI,
                layer: "HAVUZ".to_string(),
            }));

            let mut diagnostics = TakeoffDiagnostics::new();
            let result = aggregate_area_with(&drawing, "HAVUZ", 0.01, &mut diagnostics);
            assert!((result.total_area_m2 - PI * 3.0 * 1.5).abs() < 1e-9);
            assert_eq!(result.contributing_entity_count, 1);
            assert_eq!(result.skipped_entity_count, 0);
            assert_eq!(diagnostics.open_excluded, 1);
        }

        #[test]
        fn short_polylines_are_skipped_and_lines_ignored() {
            let mut drawing = Drawing::new(DrawingUnit::Meter);
            drawing.add_polyline([Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)], true, "Z");
            drawing.add_segment(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), "Z");
            let result = aggregate_area(&drawing, "Z", 0.01);
            assert_eq!(result.skipped_entity_count, 1);
            assert_eq!(result.contributing_entity_count, 0);
        }

        #[test]
        fn tolerance_check_is_inclusive_across_units() {
            assert!(within_closure_tolerance(1.0, 0.01, DrawingUnit::Centimeter));
            assert!(!within_closure_tolerance(1.0001, 0.01, DrawingUnit::Centimeter));
            assert!(within_closure_tolerance(0.0, 0.0, DrawingUnit::Meter));
            assert!(!within_closure_tolerance(0.1, -1.0, DrawingUnit::Meter));
        }

        #[test]
        fn repeated_area_queries_are_identical() {
            let mut drawing = Drawing::new(DrawingUnit::Millimeter);
            drawing.add_polyline(open_square_with_gap(5.0), false, "Z");
            let first = aggregate_area(&drawing, "Z", 0.01);
            let second = aggregate_area(&drawing, "Z", 0.01);
            assert_eq!(first, second);
        }
    }
}

/// 计数统计：块参照按块名计数，直线与多段线以外的实体合计为离散实体数。
pub mod count {
    use std::collections::BTreeMap;

    use metraj_core::document::{Drawing, Entity, EntityKind};
    use serde::Serialize;
    use tracing::debug;

    use crate::index::entities_of;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct CountMeasurement {
        pub layer_name: String,
        pub block_counts: BTreeMap<String, usize>,
        pub discrete_entity_count: usize,
    }

    impl CountMeasurement {
        #[inline]
        pub fn total_blocks(&self) -> usize {
            self.block_counts.values().sum()
        }
    }

    /// 线性实体以外的全部类型都按个计数。
    const DISCRETE_KINDS: [EntityKind; 7] = [
        EntityKind::BlockReference,
        EntityKind::Circle,
        EntityKind::Arc,
        EntityKind::TextLabel,
        EntityKind::Ellipse,
        EntityKind::MultiStrokeLine,
        EntityKind::Unrecognized,
    ];

    /// 解码失败后按无法识别保存的线性实体不计数。
    const LINEAR_SOURCE_KINDS: [&str; 3] = ["LINE", "LWPOLYLINE", "POLYLINE"];

    pub fn aggregate_count(drawing: &Drawing, layer_name: &str) -> CountMeasurement {
        let entities = entities_of(drawing, layer_name, &DISCRETE_KINDS);
        measure_count(&entities, layer_name)
    }

    pub(crate) fn measure_count(entities: &[&Entity], layer_name: &str) -> CountMeasurement {
        let mut block_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut discrete_entity_count = 0;
        for entity in entities {
            match entity {
                Entity::BlockReference(reference) => {
                    *block_counts.entry(reference.name.clone()).or_insert(0) += 1;
                    discrete_entity_count += 1;
                }
                Entity::Circle(_)
                | Entity::Arc(_)
                | Entity::TextLabel(_)
                | Entity::Ellipse(_)
                | Entity::MultiStrokeLine(_) => {
                    discrete_entity_count += 1;
                }
                Entity::Unrecognized(unknown) => {
                    if !LINEAR_SOURCE_KINDS.contains(&unknown.kind.as_str()) {
                        discrete_entity_count += 1;
                    }
                }
                Entity::Segment(_) | Entity::Polyline(_) => {}
            }
        }
        debug!(
            layer = layer_name,
            blocks = block_counts.len(),
            discrete = discrete_entity_count,
            "图层计数完成"
        );
        CountMeasurement {
            layer_name: layer_name.to_string(),
            block_counts,
            discrete_entity_count,
        }
    }

    #[cfg(test)]
    mod tests {
        use metraj_core::geometry::Point2;
        use metraj_core::units::DrawingUnit;

        use super::*;

        #[test]
        fn blocks_are_counted_by_name() {
            let mut drawing = Drawing::new(DrawingUnit::Millimeter);
            drawing.add_block_reference("KAPI_90", Point2::new(0.0, 0.0), "KAPI");
            drawing.add_block_reference("KAPI_90", Point2::new(10.0, 0.0), "KAPI");
            drawing.add_block_reference("KAPI_80", Point2::new(20.0, 0.0), "kapi");
            drawing.add_circle(Point2::new(0.0, 0.0), 1.0, "KAPI");
            drawing.add_segment(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), "KAPI");

            let counts = aggregate_count(&drawing, "KAPI");
            assert_eq!(counts.block_counts.get("KAPI_90"), Some(&2));
            assert_eq!(counts.block_counts.get("KAPI_80"), Some(&1));
            assert_eq!(counts.total_blocks(), 3);
            assert_eq!(counts.discrete_entity_count, 4);
        }

        #[test]
        fn other_kinds_count_as_discrete_but_lines_do_not() {
            use metraj_core::document::{Entity, UnrecognizedEntity};
            use metraj_core::geometry::Vector2;

            let mut drawing = Drawing::new(DrawingUnit::Millimeter);
            drawing.add_ellipse(Point2::new(0.0, 0.0), Vector2::new(2.0, 0.0), 0.5, "PEYZAJ");
            drawing.add_multi_stroke_line([Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)], "PEYZAJ");
            drawing.add_polyline([Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)], false, "PEYZAJ");
            for kind in ["HATCH", "SPLINE", "LINE"] {
                drawing.add_entity(Entity::Unrecognized(UnrecognizedEntity {
                    kind: kind.to_string(),
                    reason: None,
                    layer: "PEYZAJ".to_string(),
                }));
            }

            let counts = aggregate_count(&drawing, "peyzaj");
            assert!(counts.block_counts.is_empty());
            assert_eq!(counts.discrete_entity_count, 4);
        }

        #[test]
        fn empty_layer_counts_nothing() {
            let drawing = Drawing::new(DrawingUnit::Millimeter);
            let counts = aggregate_count(&drawing, "NONE");
            assert!(counts.block_counts.is_empty());
            assert_eq!(counts.discrete_entity_count, 0);
        }
    }
}
