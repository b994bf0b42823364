pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示。Z 坐标在读取阶段即被丢弃，算量只在平面上进行。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance_to(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于估算实体范围以及文字与图层几何之间的距离。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        pub fn include_point(&mut self, point: Point2) {
            if !point.is_finite() {
                return;
            }
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let center = (self.min.as_vec2() + self.max.as_vec2()) * 0.5;
            Point2::from_vec(center)
        }

        /// 点到包围盒的最短距离；点位于盒内时为 0。
        pub fn distance_to_point(&self, point: Point2) -> f64 {
            if self.is_empty() {
                return f64::INFINITY;
            }
            let clamped = point.as_vec2().clamp(self.min.as_vec2(), self.max.as_vec2());
            clamped.distance(point.as_vec2())
        }
    }

    /// 顶点序列上的平面几何计算，长度与面积统计共用。
    pub mod polygon {
        use super::Point2;

        /// 相邻顶点距离之和；`closed` 为真时追加末点到首点的闭合边。
        pub fn path_length(points: &[Point2], closed: bool) -> f64 {
            let open: f64 = points
                .windows(2)
                .map(|pair| pair[0].distance_to(pair[1]))
                .sum();
            match (closed, points.first(), points.last()) {
                (true, Some(first), Some(last)) if points.len() > 1 => {
                    open + last.distance_to(*first)
                }
                _ => open,
            }
        }

        /// 鞋带公式的有向面积（逆时针为正），下标按顶点数取模回绕。
        pub fn signed_area(points: &[Point2]) -> f64 {
            let n = points.len();
            if n < 3 {
                return 0.0;
            }
            let mut twice = 0.0;
            for i in 0..n {
                let a = points[i];
                let b = points[(i + 1) % n];
                twice += a.x() * b.y() - b.x() * a.y();
            }
            twice / 2.0
        }

        /// 鞋带公式面积：`|Σ (x_i·y_{i+1} − x_{i+1}·y_i)| / 2`。
        #[inline]
        pub fn shoelace_area(points: &[Point2]) -> f64 {
            signed_area(points).abs()
        }

        /// 多边形面积质心；退化（面积近 0）时退回顶点平均值。
        pub fn centroid(points: &[Point2]) -> Option<Point2> {
            if points.is_empty() {
                return None;
            }
            let area = signed_area(points);
            if area.abs() <= f64::EPSILON {
                let sum = points
                    .iter()
                    .fold(glam::DVec2::ZERO, |acc, p| acc + p.as_vec2());
                return Some(Point2::from_vec(sum / points.len() as f64));
            }
            let n = points.len();
            let mut cx = 0.0;
            let mut cy = 0.0;
            for i in 0..n {
                let a = points[i];
                let b = points[(i + 1) % n];
                let cross = a.x() * b.y() - b.x() * a.y();
                cx += (a.x() + b.x()) * cross;
                cy += (a.y() + b.y()) * cross;
            }
            let factor = 1.0 / (6.0 * area);
            Some(Point2::new(cx * factor, cy * factor))
        }

        /// 首末顶点之间的距离，用于判断开口多段线能否按容差闭合。
        pub fn endpoint_gap(points: &[Point2]) -> Option<f64> {
            match (points.first(), points.last()) {
                (Some(first), Some(last)) if points.len() > 1 => Some(first.distance_to(*last)),
                _ => None,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::polygon::*;
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
        fn closed_path_adds_exactly_one_closing_edge() {
            let points = square(3.0);
            let open = path_length(&points, false);
            let closed = path_length(&points, true);
            assert!((open - 9.0).abs() < 1e-12);
            assert!((closed - open - 3.0).abs() < 1e-12);
        }

        #[test]
        fn shoelace_is_orientation_independent() {
            let mut points = square(4.0);
            assert!((shoelace_area(&points) - 16.0).abs() < 1e-12);
            points.reverse();
            assert!((shoelace_area(&points) - 16.0).abs() < 1e-12);
            assert!(signed_area(&points) < 0.0);
        }

        #[test]
        fn centroid_of_offset_square() {
            let points: Vec<Point2> = square(2.0)
                .into_iter()
                .map(|p| Point2::new(p.x() + 10.0, p.y() - 4.0))
                .collect();
            let c = centroid(&points).expect("centroid");
            assert!((c.x() - 11.0).abs() < 1e-9);
            assert!((c.y() + 3.0).abs() < 1e-9);
        }

        #[test]
        fn degenerate_centroid_falls_back_to_vertex_mean() {
            let points = [Point2::new(0.0, 0.0), Point2::new(4.0, 0.0), Point2::new(8.0, 0.0)];
            let c = centroid(&points).expect("centroid");
            assert!((c.x() - 4.0).abs() < 1e-12);
            assert!(c.y().abs() < 1e-12);
        }

        #[test]
        fn bounds_distance_is_zero_inside() {
            let mut bounds = Bounds2D::empty();
            bounds.include_point(Point2::new(0.0, 0.0));
            bounds.include_point(Point2::new(10.0, 5.0));
            assert_eq!(bounds.distance_to_point(Point2::new(3.0, 3.0)), 0.0);
            assert!((bounds.distance_to_point(Point2::new(13.0, 9.0)) - 5.0).abs() < 1e-12);
            assert!(Bounds2D::empty().distance_to_point(Point2::new(0.0, 0.0)).is_infinite());
        }
    }
}

/// 图纸单位与米制换算。所有比例常数只在这里出现，聚合器一律经由本模块换算。
pub mod units {
    use std::fmt;
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DrawingUnit {
        Millimeter,
        Centimeter,
        Meter,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum UnitParseError {
        #[error("unrecognized drawing unit {0:?} (expected mm, cm or m)")]
        Unrecognized(String),
        #[error("unsupported $INSUNITS code {0}")]
        UnsupportedInsUnits(i32),
    }

    impl DrawingUnit {
        #[inline]
        const fn linear_factor(self) -> f64 {
            match self {
                DrawingUnit::Millimeter => 0.001,
                DrawingUnit::Centimeter => 0.01,
                DrawingUnit::Meter => 1.0,
            }
        }

        /// 解析 DXF 头部 `$INSUNITS`。0 表示未指定单位，返回 `None` 交由调用方回退。
        pub fn from_insunits(code: i32) -> Result<Option<Self>, UnitParseError> {
            match code {
                0 => Ok(None),
                4 => Ok(Some(DrawingUnit::Millimeter)),
                5 => Ok(Some(DrawingUnit::Centimeter)),
                6 => Ok(Some(DrawingUnit::Meter)),
                other => Err(UnitParseError::UnsupportedInsUnits(other)),
            }
        }

        pub fn symbol(self) -> &'static str {
            match self {
                DrawingUnit::Millimeter => "mm",
                DrawingUnit::Centimeter => "cm",
                DrawingUnit::Meter => "m",
            }
        }
    }

    impl Default for DrawingUnit {
        fn default() -> Self {
            DrawingUnit::Millimeter
        }
    }

    impl fmt::Display for DrawingUnit {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.symbol())
        }
    }

    impl FromStr for DrawingUnit {
        type Err = UnitParseError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "mm" => Ok(DrawingUnit::Millimeter),
                "cm" => Ok(DrawingUnit::Centimeter),
                "m" => Ok(DrawingUnit::Meter),
                _ => Err(UnitParseError::Unrecognized(s.to_string())),
            }
        }
    }

    /// 图纸单位长度 → 米。
    #[inline]
    pub fn to_meters(value: f64, unit: DrawingUnit) -> f64 {
        value * unit.linear_factor()
    }

    /// 图纸单位面积 → 平方米，面积系数为线性系数的平方。
    #[inline]
    pub fn to_square_meters(value: f64, unit: DrawingUnit) -> f64 {
        let factor = unit.linear_factor();
        value * factor * factor
    }

    /// 米 → 图纸单位，`to_meters` 的逆运算（用于把米制容差换算到图纸空间）。
    #[inline]
    pub fn from_meters(value_m: f64, unit: DrawingUnit) -> f64 {
        value_m / unit.linear_factor()
    }

    #[inline]
    pub fn from_square_meters(value_m2: f64, unit: DrawingUnit) -> f64 {
        let factor = unit.linear_factor();
        value_m2 / (factor * factor)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn linear_factors() {
            assert!((to_meters(1500.0, DrawingUnit::Millimeter) - 1.5).abs() < 1e-12);
            assert!((to_meters(280.0, DrawingUnit::Centimeter) - 2.8).abs() < 1e-12);
            assert_eq!(to_meters(7.25, DrawingUnit::Meter), 7.25);
        }

        #[test]
        fn areal_factors_are_squared() {
            assert!((to_square_meters(1_000_000.0, DrawingUnit::Millimeter) - 1.0).abs() < 1e-9);
            assert!((to_square_meters(10_000.0, DrawingUnit::Centimeter) - 1.0).abs() < 1e-9);
            assert_eq!(to_square_meters(3.0, DrawingUnit::Meter), 3.0);
        }

        #[test]
        fn centimeter_round_trip() {
            let original = 123.456;
            let back = from_meters(to_meters(original, DrawingUnit::Centimeter), DrawingUnit::Centimeter);
            assert!((back - original).abs() < 1e-9);

            let area = 98_765.4;
            let back = from_square_meters(
                to_square_meters(area, DrawingUnit::Centimeter),
                DrawingUnit::Centimeter,
            );
            assert!((back - area).abs() < 1e-6);
        }

        #[test]
        fn parse_unit_strings() {
            assert_eq!("mm".parse::<DrawingUnit>(), Ok(DrawingUnit::Millimeter));
            assert_eq!(" CM ".parse::<DrawingUnit>(), Ok(DrawingUnit::Centimeter));
            assert_eq!("m".parse::<DrawingUnit>(), Ok(DrawingUnit::Meter));
            assert!(matches!(
                "inch".parse::<DrawingUnit>(),
                Err(UnitParseError::Unrecognized(_))
            ));
        }

        #[test]
        fn insunits_codes() {
            assert_eq!(DrawingUnit::from_insunits(0), Ok(None));
            assert_eq!(DrawingUnit::from_insunits(4), Ok(Some(DrawingUnit::Millimeter)));
            assert_eq!(DrawingUnit::from_insunits(5), Ok(Some(DrawingUnit::Centimeter)));
            assert_eq!(DrawingUnit::from_insunits(6), Ok(Some(DrawingUnit::Meter)));
            assert_eq!(
                DrawingUnit::from_insunits(1),
                Err(UnitParseError::UnsupportedInsUnits(1))
            );
        }
    }
}

pub mod document {
    use std::collections::HashMap;
    use std::f64::consts::{PI, TAU};

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds2D, Point2, Vector2};
    use crate::units::DrawingUnit;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    /// 图层：名称保留原始大小写用于显示，匹配时不区分大小写。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Layer {
        pub name: String,
        pub is_visible: bool,
    }

    impl Layer {
        #[inline]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                is_visible: true,
            }
        }

        #[inline]
        pub fn matches(&self, name: &str) -> bool {
            self.name.eq_ignore_ascii_case(name)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub enum EntityKind {
        Segment,
        Polyline,
        Arc,
        MultiStrokeLine,
        TextLabel,
        Circle,
        Ellipse,
        BlockReference,
        Unrecognized,
    }

    impl EntityKind {
        pub const ALL: [EntityKind; 9] = [
            EntityKind::Segment,
            EntityKind::Polyline,
            EntityKind::Arc,
            EntityKind::MultiStrokeLine,
            EntityKind::TextLabel,
            EntityKind::Circle,
            EntityKind::Ellipse,
            EntityKind::BlockReference,
            EntityKind::Unrecognized,
        ];
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Entity {
        Segment(Segment),
        Polyline(Polyline),
        Arc(Arc),
        MultiStrokeLine(MultiStrokeLine),
        TextLabel(TextLabel),
        Circle(Circle),
        Ellipse(Ellipse),
        BlockReference(BlockReference),
        /// 读取时无法解码的实体，保留图层归属以便各统计按图层计入跳过数。
        Unrecognized(UnrecognizedEntity),
    }

    impl Entity {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Entity::Segment(segment) => &segment.layer,
                Entity::Polyline(polyline) => &polyline.layer,
                Entity::Arc(arc) => &arc.layer,
                Entity::MultiStrokeLine(mline) => &mline.layer,
                Entity::TextLabel(text) => &text.layer,
                Entity::Circle(circle) => &circle.layer,
                Entity::Ellipse(ellipse) => &ellipse.layer,
                Entity::BlockReference(reference) => &reference.layer,
                Entity::Unrecognized(unknown) => &unknown.layer,
            }
        }

        #[inline]
        pub fn kind(&self) -> EntityKind {
            match self {
                Entity::Segment(_) => EntityKind::Segment,
                Entity::Polyline(_) => EntityKind::Polyline,
                Entity::Arc(_) => EntityKind::Arc,
                Entity::MultiStrokeLine(_) => EntityKind::MultiStrokeLine,
                Entity::TextLabel(_) => EntityKind::TextLabel,
                Entity::Circle(_) => EntityKind::Circle,
                Entity::Ellipse(_) => EntityKind::Ellipse,
                Entity::BlockReference(_) => EntityKind::BlockReference,
                Entity::Unrecognized(_) => EntityKind::Unrecognized,
            }
        }

        /// 计算实体的 2D 轴对齐范围，文字与块参照退化为点。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            match self {
                Entity::Segment(segment) => {
                    bounds.include_point(segment.start);
                    bounds.include_point(segment.end);
                }
                Entity::Polyline(polyline) => {
                    for vertex in &polyline.vertices {
                        bounds.include_point(*vertex);
                    }
                }
                Entity::Arc(arc) => {
                    let r = arc.radius.abs();
                    bounds.include_point(Point2::new(arc.center.x() - r, arc.center.y() - r));
                    bounds.include_point(Point2::new(arc.center.x() + r, arc.center.y() + r));
                }
                Entity::MultiStrokeLine(mline) => {
                    for vertex in &mline.centerline {
                        bounds.include_point(*vertex);
                    }
                }
                Entity::TextLabel(text) => {
                    bounds.include_point(text.position);
                }
                Entity::Circle(circle) => {
                    let r = circle.radius.abs();
                    bounds.include_point(Point2::new(circle.center.x() - r, circle.center.y() - r));
                    bounds.include_point(Point2::new(circle.center.x() + r, circle.center.y() + r));
                }
                Entity::Ellipse(ellipse) => {
                    // 以长半轴为半径的外接正方形，椭圆弧也取整椭圆范围
                    let r = ellipse.semi_major();
                    let center = ellipse.center;
                    bounds.include_point(Point2::new(center.x() - r, center.y() - r));
                    bounds.include_point(Point2::new(center.x() + r, center.y() + r));
                }
                Entity::BlockReference(reference) => {
                    bounds.include_point(reference.insert);
                }
                Entity::Unrecognized(_) => {}
            }
            if bounds.is_empty() {
                None
            } else {
                Some(bounds)
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Segment {
        pub start: Point2,
        pub end: Point2,
        pub layer: String,
    }

    /// 多段线。闭合时隐含一条从末顶点回到首顶点的边；凸度（bulge）不参与算量。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<Point2>,
        pub is_closed: bool,
        pub layer: String,
    }

    impl Polyline {
        #[inline]
        pub fn has_finite_vertices(&self) -> bool {
            self.vertices.iter().all(|v| v.is_finite())
        }
    }

    /// 圆弧实体，角度以弧度形式储存。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Arc {
        pub center: Point2,
        pub radius: f64,
        pub start_angle: f64,
        pub end_angle: f64,
        pub layer: String,
    }

    /// 多线（MLINE），只保留中心线顶点；偏移线与线宽不参与算量。闭合标志来自 MLINE 组码 71 的第 2 位。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MultiStrokeLine {
        pub centerline: Vec<Point2>,
        pub is_closed: bool,
        pub style_name: Option<String>,
        pub layer: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TextLabel {
        pub content: String,
        pub position: Point2,
        pub height: f64,
        pub layer: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Circle {
        pub center: Point2,
        pub radius: f64,
        pub layer: String,
    }

    /// 椭圆或椭圆弧。`major_axis` 为圆心到长轴端点的向量，`ratio` 为短轴与长轴之比，
    /// 参数角以弧度储存，`0..2π` 表示完整椭圆。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Ellipse {
        pub center: Point2,
        pub major_axis: Vector2,
        pub ratio: f64,
        pub start_param: f64,
        pub end_param: f64,
        pub layer: String,
    }

    impl Ellipse {
        const FULL_TURN_EPSILON: f64 = 1e-9;

        #[inline]
        pub fn semi_major(&self) -> f64 {
            self.major_axis.length()
        }

        #[inline]
        pub fn semi_minor(&self) -> f64 {
            self.semi_major() * self.ratio.abs()
        }

        /// 参数跨度是否覆盖一整圈。
        pub fn is_full(&self) -> bool {
            let span = (self.end_param - self.start_param).abs();
            span == 0.0 || (span - TAU).abs() <= Self::FULL_TURN_EPSILON
        }

        /// 完整椭圆的面积 `π·a·b`，以图纸单位平方计。
        #[inline]
        pub fn area(&self) -> f64 {
            PI * self.semi_major() * self.semi_minor()
        }

        pub fn is_finite(&self) -> bool {
            self.center.is_finite()
                && self.major_axis.x().is_finite()
                && self.major_axis.y().is_finite()
                && self.ratio.is_finite()
                && self.start_param.is_finite()
                && self.end_param.is_finite()
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BlockReference {
        pub name: String,
        pub insert: Point2,
        pub layer: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UnrecognizedEntity {
        pub kind: String,
        pub reason: Option<String>,
        pub layer: String,
    }

    #[inline]
    fn layer_map_key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// 一次加载得到的图纸。加载完成后只读，可在多个统计任务间按引用共享。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Drawing {
        unit: DrawingUnit,
        layers: HashMap<String, Layer>,
        entities: Vec<(EntityId, Entity)>,
        next_entity_id: u64,
    }

    impl Drawing {
        pub fn new(unit: DrawingUnit) -> Self {
            Self {
                unit,
                layers: HashMap::new(),
                entities: Vec::new(),
                next_entity_id: 0,
            }
        }

        #[inline]
        pub fn unit(&self) -> DrawingUnit {
            self.unit
        }

        /// 登记图层（来自图层表或实体引用），已存在时保持原样。
        pub fn ensure_layer(&mut self, name: impl AsRef<str>) {
            let name = name.as_ref();
            self.layers
                .entry(layer_map_key(name))
                .or_insert_with(|| Layer::new(name));
        }

        /// 按图层表记录登记图层，覆盖可见性。仅大小写不同的已有图层改用图层表中的写法。
        pub fn declare_layer(&mut self, name: impl Into<String>, is_visible: bool) {
            let name = name.into();
            self.layers
                .entry(layer_map_key(&name))
                .and_modify(|layer| {
                    layer.name.clone_from(&name);
                    layer.is_visible = is_visible;
                })
                .or_insert(Layer { name, is_visible });
        }

        pub fn add_segment(
            &mut self,
            start: Point2,
            end: Point2,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::Segment(Segment { start, end, layer }))
        }

        pub fn add_polyline<I>(
            &mut self,
            vertices: I,
            is_closed: bool,
            layer: impl Into<String>,
        ) -> EntityId
        where
            I: IntoIterator<Item = Point2>,
        {
            let layer = layer.into();
            self.push(Entity::Polyline(Polyline {
                vertices: vertices.into_iter().collect(),
                is_closed,
                layer,
            }))
        }

        pub fn add_arc(
            &mut self,
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::Arc(Arc {
                center,
                radius,
                start_angle,
                end_angle,
                layer,
            }))
        }

        pub fn add_multi_stroke_line<I>(&mut self, centerline: I, layer: impl Into<String>) -> EntityId
        where
            I: IntoIterator<Item = Point2>,
        {
            let layer = layer.into();
            self.push(Entity::MultiStrokeLine(MultiStrokeLine {
                centerline: centerline.into_iter().collect(),
                is_closed: false,
                style_name: None,
                layer,
            }))
        }

        pub fn add_text(
            &mut self,
            position: Point2,
            content: impl Into<String>,
            height: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::TextLabel(TextLabel {
                content: content.into(),
                position,
                height,
                layer,
            }))
        }

        pub fn add_circle(
            &mut self,
            center: Point2,
            radius: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::Circle(Circle {
                center,
                radius,
                layer,
            }))
        }

        pub fn add_ellipse(
            &mut self,
            center: Point2,
            major_axis: Vector2,
            ratio: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::Ellipse(Ellipse {
                center,
                major_axis,
                ratio,
                start_param: 0.0,
                end_param: TAU,
                layer,
            }))
        }

        pub fn add_block_reference(
            &mut self,
            name: impl Into<String>,
            insert: Point2,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::BlockReference(BlockReference {
                name: name.into(),
                insert,
                layer,
            }))
        }

        #[inline]
        pub fn add_entity(&mut self, entity: Entity) -> EntityId {
            self.push(entity)
        }

        fn push(&mut self, entity: Entity) -> EntityId {
            self.ensure_layer(entity.layer_name());
            let id = EntityId::new(self.next_entity_id);
            self.next_entity_id += 1;
            self.entities.push((id, entity));
            id
        }

        #[inline]
        pub fn layers(&self) -> impl Iterator<Item = &Layer> {
            self.layers.values()
        }

        /// 按名称查找图层，不区分大小写。
        pub fn layer(&self, name: &str) -> Option<&Layer> {
            self.layers.get(&layer_map_key(name))
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
            self.entities.iter()
        }

        #[inline]
        pub fn entity_count(&self) -> usize {
            self.entities.len()
        }

        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.entities
                .iter()
                .find(|(entity_id, _)| *entity_id == id)
                .map(|(_, entity)| entity)
        }

        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            for (_, entity) in &self.entities {
                if let Some(entity_bounds) = entity.bounds() {
                    bounds.include_bounds(&entity_bounds);
                }
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }
    }

    impl Default for Drawing {
        fn default() -> Self {
            Self::new(DrawingUnit::default())
        }
    }

}
