use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use metraj_core::{
    document::{Drawing, Entity, EntityKind, TextLabel},
    geometry::Bounds2D,
    units::{self, DrawingUnit},
};
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::index::{EntityIndex, layer_key};

/// 推断来源。派生的 `Ord` 即优先级：LearnedOverride 最高，Default 最低。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeSource {
    Default,
    NearbyText,
    LayerNamePattern,
    LearnedOverride,
}

impl AttributeSource {
    #[inline]
    pub const fn confidence_rank(self) -> u8 {
        match self {
            AttributeSource::Default => 0,
            AttributeSource::NearbyText => 1,
            AttributeSource::LayerNamePattern => 2,
            AttributeSource::LearnedOverride => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeGuess<T> {
    pub value: T,
    pub source: AttributeSource,
    pub confidence_rank: u8,
}

impl<T> AttributeGuess<T> {
    pub fn new(value: T, source: AttributeSource) -> Self {
        Self {
            value,
            source,
            confidence_rank: source.confidence_rank(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallMaterial {
    Brick,
    AeratedConcrete,
    ConcreteBlock,
    ReinforcedConcrete,
    Gypsum,
    Stone,
}

/// 关键字按顺序匹配：复合词（gazbeton、concrete block）须排在其组成词之前。
const MATERIAL_KEYWORDS: &[(WallMaterial, &[&str])] = &[
    (WallMaterial::AeratedConcrete, &["gazbeton", "ytong", "aac", "aerated"]),
    (WallMaterial::ConcreteBlock, &["briket", "bims", "block", "blok", "cmu"]),
    (
        WallMaterial::Gypsum,
        &["alçıpan", "alcipan", "alçı", "alçi", "alci", "gypsum", "drywall"],
    ),
    (WallMaterial::Stone, &["taş", "tas", "stone"]),
    (WallMaterial::Brick, &["tuğla", "tugla", "brick"]),
    (
        WallMaterial::ReinforcedConcrete,
        &["betonarme", "beton", "concrete", "perde"],
    ),
];

impl WallMaterial {
    pub const ALL: [WallMaterial; 6] = [
        WallMaterial::Brick,
        WallMaterial::AeratedConcrete,
        WallMaterial::ConcreteBlock,
        WallMaterial::ReinforcedConcrete,
        WallMaterial::Gypsum,
        WallMaterial::Stone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WallMaterial::Brick => "brick",
            WallMaterial::AeratedConcrete => "aerated_concrete",
            WallMaterial::ConcreteBlock => "concrete_block",
            WallMaterial::ReinforcedConcrete => "reinforced_concrete",
            WallMaterial::Gypsum => "gypsum",
            WallMaterial::Stone => "stone",
        }
    }

    /// 从图层名或注释文字中识别材料关键字（土耳其语与英语）。
    pub fn detect(text: &str) -> Option<Self> {
        let tokens = keyword_tokens(text);
        MATERIAL_KEYWORDS
            .iter()
            .find(|(_, keywords)| contains_keyword(&tokens, keywords))
            .map(|(material, _)| *material)
    }
}

impl fmt::Display for WallMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown wall material {0:?}")]
pub struct UnknownMaterial(pub String);

impl FromStr for WallMaterial {
    type Err = UnknownMaterial;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        WallMaterial::ALL
            .into_iter()
            .find(|material| material.as_str() == normalized)
            .or_else(|| WallMaterial::detect(&normalized))
            .ok_or_else(|| UnknownMaterial(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpeningCategory {
    Door,
    Window,
    None,
}

const DOOR_KEYWORDS: &[&str] = &["kapı", "kapi", "door"];
const WINDOW_KEYWORDS: &[&str] = &["pencere", "window"];

impl OpeningCategory {
    pub fn detect(text: &str) -> Option<Self> {
        let tokens = keyword_tokens(text);
        if contains_keyword(&tokens, DOOR_KEYWORDS) {
            Some(OpeningCategory::Door)
        } else if contains_keyword(&tokens, WINDOW_KEYWORDS) {
            Some(OpeningCategory::Window)
        } else {
            None
        }
    }
}

/// 图层归类，决定算量清单的分部。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerCategory {
    Wall,
    Concrete,
    Opening,
    Electrical,
    Plumbing,
    Roof,
    Earthwork,
    General,
}

impl LayerCategory {
    pub fn label(self) -> &'static str {
        match self {
            LayerCategory::Wall => "Wall works",
            LayerCategory::Concrete => "Concrete works",
            LayerCategory::Opening => "Doors and windows",
            LayerCategory::Electrical => "Electrical installation",
            LayerCategory::Plumbing => "Plumbing",
            LayerCategory::Roof => "Roof works",
            LayerCategory::Earthwork => "Earthworks",
            LayerCategory::General => "General",
        }
    }
}

impl fmt::Display for LayerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 按图层名关键字归类，依 Wall → Earthwork 的顺序取第一个命中项。
pub fn categorize_layer(layer_name: &str) -> LayerCategory {
    let lower = layer_name.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|word| lower.contains(word));

    if has_any(&["duvar", "wall", "dwg"]) {
        LayerCategory::Wall
    } else if has_any(&["kolon", "column", "kiriş", "kiris", "beam"]) {
        LayerCategory::Concrete
    } else if has_any(&["kapı", "kapi", "door", "pencere", "window"]) {
        LayerCategory::Opening
    } else if has_any(&["elektrik", "electric", "elec"]) {
        LayerCategory::Electrical
    } else if has_any(&["water", "kanal", "sewer"])
        || keyword_tokens(&lower).iter().any(|token| token == "su")
    {
        // "su" 过短，只按完整分词匹配
        LayerCategory::Plumbing
    } else if has_any(&["çatı", "çati", "catı", "cati", "roof"]) {
        LayerCategory::Roof
    } else if has_any(&["toprak", "earth", "hafriyat"]) {
        LayerCategory::Earthwork
    } else {
        LayerCategory::General
    }
}

/// 用户此前对某图层所做的修正，数值已换算为米。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrectedAttributes {
    pub height_m: Option<f64>,
    pub thickness_m: Option<f64>,
    pub material: Option<WallMaterial>,
}

/// 由外部持久层提供的只读修正查询，引擎从不写入。
pub trait LearnedStore: Send + Sync {
    fn lookup(&self, layer_name: &str) -> Option<CorrectedAttributes>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLearnedStore {
    entries: HashMap<String, CorrectedAttributes>,
}

impl InMemoryLearnedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer_name: &str, corrected: CorrectedAttributes) {
        self.entries.insert(layer_key(layer_name), corrected);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LearnedStore for InMemoryLearnedStore {
    fn lookup(&self, layer_name: &str) -> Option<CorrectedAttributes> {
        self.entries.get(&layer_key(layer_name)).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceSettings {
    pub default_height_m: f64,
    pub default_thickness_m: f64,
    pub default_material: WallMaterial,
    /// 图层上没有文字时，在此半径（米）内搜索其他图层的注释。
    pub text_search_radius_m: f64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            default_height_m: 2.80,
            default_thickness_m: 0.20,
            default_material: WallMaterial::Brick,
            text_search_radius_m: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WallAttributes {
    pub height: AttributeGuess<f64>,
    pub thickness: AttributeGuess<f64>,
    pub material: AttributeGuess<WallMaterial>,
}

pub fn infer_wall_attributes(
    drawing: &Drawing,
    layer_name: &str,
    learned: Option<&dyn LearnedStore>,
) -> WallAttributes {
    infer_wall_attributes_with(drawing, layer_name, learned, &InferenceSettings::default())
}

/// 高度、厚度、材料各自独立走一遍优先级链，可在同一次调用中落在不同的来源上。
pub fn infer_wall_attributes_with(
    drawing: &Drawing,
    layer_name: &str,
    learned: Option<&dyn LearnedStore>,
    settings: &InferenceSettings,
) -> WallAttributes {
    let context = InferenceContext::new(drawing, layer_name, learned, settings);

    let height = dimension_chain(WallDimension::Height).resolve(&context, settings.default_height_m);
    let thickness =
        dimension_chain(WallDimension::Thickness).resolve(&context, settings.default_thickness_m);
    let material = material_chain().resolve(&context, settings.default_material);

    debug!(
        layer = layer_name,
        height_m = height.value,
        height_source = ?height.source,
        thickness_m = thickness.value,
        thickness_source = ?thickness.source,
        material = %material.value,
        material_source = ?material.source,
        "墙体属性推断完成"
    );
    WallAttributes {
        height,
        thickness,
        material,
    }
}

pub fn infer_opening_category(
    drawing: &Drawing,
    layer_name: &str,
) -> AttributeGuess<OpeningCategory> {
    let settings = InferenceSettings::default();
    let context = InferenceContext::new(drawing, layer_name, None, &settings);
    InferenceChain::new()
        .register(LayerNameOpening)
        .register(NearbyTextOpening)
        .resolve(&context, OpeningCategory::None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WallDimension {
    Height,
    Thickness,
}

impl WallDimension {
    /// 未带标签的尺寸按量级归类：不小于 1 m 视为高度。
    fn classify(meters: f64) -> Self {
        if meters >= 1.0 {
            WallDimension::Height
        } else {
            WallDimension::Thickness
        }
    }
}

struct InferenceContext<'a> {
    drawing: &'a Drawing,
    index: EntityIndex<'a>,
    layer_name: &'a str,
    learned: Option<CorrectedAttributes>,
    settings: &'a InferenceSettings,
    layer_dimensions: OnceCell<Vec<DimensionHit>>,
    nearby_texts: OnceCell<Vec<&'a TextLabel>>,
}

impl<'a> InferenceContext<'a> {
    fn new(
        drawing: &'a Drawing,
        layer_name: &'a str,
        learned: Option<&dyn LearnedStore>,
        settings: &'a InferenceSettings,
    ) -> Self {
        Self {
            drawing,
            index: EntityIndex::build(drawing),
            layer_name,
            learned: learned.and_then(|store| store.lookup(layer_name)),
            settings,
            layer_dimensions: OnceCell::new(),
            nearby_texts: OnceCell::new(),
        }
    }

    fn layer_dimensions(&self) -> &[DimensionHit] {
        self.layer_dimensions
            .get_or_init(|| scan_layer_name(self.layer_name))
    }

    /// 本图层的文字；本图层没有文字时，取全图在搜索半径内的文字并按距离排序。
    fn nearby_texts(&self) -> &[&'a TextLabel] {
        self.nearby_texts.get_or_init(|| {
            let own: Vec<&'a TextLabel> = self.index.text_labels(self.layer_name).collect();
            if !own.is_empty() {
                return own;
            }

            let layer_bounds: Vec<Bounds2D> = self
                .index
                .entities_of(self.layer_name, &EntityKind::ALL)
                .into_iter()
                .filter_map(|entity| entity.bounds())
                .collect();
            if layer_bounds.is_empty() {
                return Vec::new();
            }

            let radius = units::from_meters(self.settings.text_search_radius_m, self.drawing.unit());
            let mut candidates: Vec<(f64, &'a TextLabel)> = self
                .drawing
                .entities()
                .filter_map(|(_, entity)| match entity {
                    Entity::TextLabel(label) => Some(label),
                    _ => None,
                })
                .filter_map(|label| {
                    let distance = layer_bounds
                        .iter()
                        .map(|bounds| bounds.distance_to_point(label.position))
                        .fold(f64::INFINITY, f64::min);
                    (distance <= radius).then_some((distance, label))
                })
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
            candidates.into_iter().map(|(_, label)| label).collect()
        })
    }
}

trait AttributeStrategy<T>: Send + Sync {
    fn source(&self) -> AttributeSource;
    fn resolve(&self, context: &InferenceContext<'_>) -> Option<T>;
}

/// 按注册顺序依次尝试，第一个给出结果的策略胜出。
struct InferenceChain<T> {
    strategies: Vec<Box<dyn AttributeStrategy<T>>>,
}

impl<T> InferenceChain<T> {
    fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    fn register<S: AttributeStrategy<T> + 'static>(mut self, strategy: S) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    fn resolve(&self, context: &InferenceContext<'_>, fallback: T) -> AttributeGuess<T> {
        self.strategies
            .iter()
            .find_map(|strategy| {
                strategy
                    .resolve(context)
                    .map(|value| AttributeGuess::new(value, strategy.source()))
            })
            .unwrap_or_else(|| AttributeGuess::new(fallback, AttributeSource::Default))
    }
}

fn dimension_chain(dimension: WallDimension) -> InferenceChain<f64> {
    InferenceChain::new()
        .register(LearnedDimension(dimension))
        .register(LayerNameDimension(dimension))
        .register(NearbyTextDimension(dimension))
}

fn material_chain() -> InferenceChain<WallMaterial> {
    InferenceChain::new()
        .register(LearnedMaterial)
        .register(LayerNameMaterial)
        .register(NearbyTextMaterial)
}

struct LearnedDimension(WallDimension);

impl AttributeStrategy<f64> for LearnedDimension {
    fn source(&self) -> AttributeSource {
        AttributeSource::LearnedOverride
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<f64> {
        let learned = context.learned?;
        match self.0 {
            WallDimension::Height => learned.height_m,
            WallDimension::Thickness => learned.thickness_m,
        }
    }
}

struct LayerNameDimension(WallDimension);

impl AttributeStrategy<f64> for LayerNameDimension {
    fn source(&self) -> AttributeSource {
        AttributeSource::LayerNamePattern
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<f64> {
        context
            .layer_dimensions()
            .iter()
            .find(|hit| hit.dimension == self.0)
            .map(|hit| hit.meters)
    }
}

struct NearbyTextDimension(WallDimension);

impl AttributeStrategy<f64> for NearbyTextDimension {
    fn source(&self) -> AttributeSource {
        AttributeSource::NearbyText
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<f64> {
        let pattern: &Regex = match self.0 {
            WallDimension::Height => &HEIGHT_TEXT,
            WallDimension::Thickness => &THICKNESS_TEXT,
        };
        context.nearby_texts().iter().find_map(|label| {
            let caps = pattern.captures(&label.content)?;
            measure_from(caps.get(1)?.as_str(), caps.get(2).map(|unit| unit.as_str()))
        })
    }
}

struct LearnedMaterial;

impl AttributeStrategy<WallMaterial> for LearnedMaterial {
    fn source(&self) -> AttributeSource {
        AttributeSource::LearnedOverride
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<WallMaterial> {
        context.learned?.material
    }
}

struct LayerNameMaterial;

impl AttributeStrategy<WallMaterial> for LayerNameMaterial {
    fn source(&self) -> AttributeSource {
        AttributeSource::LayerNamePattern
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<WallMaterial> {
        WallMaterial::detect(context.layer_name)
    }
}

struct NearbyTextMaterial;

impl AttributeStrategy<WallMaterial> for NearbyTextMaterial {
    fn source(&self) -> AttributeSource {
        AttributeSource::NearbyText
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<WallMaterial> {
        context
            .nearby_texts()
            .iter()
            .find_map(|label| WallMaterial::detect(&label.content))
    }
}

struct LayerNameOpening;

impl AttributeStrategy<OpeningCategory> for LayerNameOpening {
    fn source(&self) -> AttributeSource {
        AttributeSource::LayerNamePattern
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<OpeningCategory> {
        OpeningCategory::detect(context.layer_name)
    }
}

struct NearbyTextOpening;

impl AttributeStrategy<OpeningCategory> for NearbyTextOpening {
    fn source(&self) -> AttributeSource {
        AttributeSource::NearbyText
    }

    fn resolve(&self, context: &InferenceContext<'_>) -> Option<OpeningCategory> {
        context
            .nearby_texts()
            .iter()
            .find_map(|label| OpeningCategory::detect(&label.content))
    }
}

const NUMBER: &str = r"(\d+(?:[.,]\d+)?)";

static TAGGED_DIMENSION: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)(?:^|[^\p{{L}}])(height|h|y[üu]k\p{{L}}*|thickness|thick|thk|t|kal\p{{L}}*)\s*[=:_-]?\s*{NUMBER}\s*(mm|cm|m)?"
    ))
});

static SUFFIXED_DIMENSION: Lazy<Regex> =
    Lazy::new(|| compile(&format!(r"(?i){NUMBER}\s*(mm|cm|m)(?:[^\p{{L}}]|$)")));

static PREFIXED_DIMENSION: Lazy<Regex> =
    Lazy::new(|| compile(&format!(r"(?i)(?:^|[^\p{{L}}])(mm|cm|m)\s*[=:_-]?\s*{NUMBER}")));

static BARE_DIMENSION: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|[^\d.,])(\d{3,4})(?:[^\d.,]|$)"));

static HEIGHT_TEXT: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)(?:(?:height|y[üu]ksekl[iıİ]k)\s*[=:]?|\bh\s*[=:])\s*{NUMBER}\s*(mm|cm|m)?(?:[^\p{{L}}]|$)"
    ))
});

static THICKNESS_TEXT: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)(?:(?:thickness|kal[ıiİ]nl[ıiİ]k|thk)\s*[=:]?|\bt\s*[=:])\s*{NUMBER}\s*(mm|cm|m)?(?:[^\p{{L}}]|$)"
    ))
});

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("内置正则表达式应当合法")
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DimensionHit {
    dimension: WallDimension,
    meters: f64,
}

/// 小于该值的无单位小数按米读取（"H=2.70"）。
const UNITLESS_DECIMAL_METER_LIMIT: f64 = 10.0;

/// 数值加可选单位后缀换算为米。没有后缀时按厘米处理（建筑图层命名惯例），
/// 但小于 10 的小数按米处理。
fn measure_from(number: &str, unit: Option<&str>) -> Option<f64> {
    let value: f64 = number.replace(',', ".").parse().ok()?;
    let is_decimal = number.contains(['.', ',']);
    let unit = match unit {
        Some(suffix) => suffix.parse::<DrawingUnit>().ok()?,
        None if is_decimal && value < UNITLESS_DECIMAL_METER_LIMIT => DrawingUnit::Meter,
        None => DrawingUnit::Centimeter,
    };
    let meters = units::to_meters(value, unit);
    (meters.is_finite() && meters > 0.0).then_some(meters)
}

/// 依次尝试：带标签的数值、数值+单位、单位+数值、3~4 位裸数（厘米）。
/// 前一轮命中的片段会被遮盖，避免同一个数值在后续轮次中被重复解读。
fn scan_layer_name(layer_name: &str) -> Vec<DimensionHit> {
    let mut working = layer_name.to_string();
    let mut hits = Vec::new();

    let tagged: Vec<(std::ops::Range<usize>, DimensionHit)> = TAGGED_DIMENSION
        .captures_iter(&working)
        .filter_map(|caps| {
            let tag = caps.get(1)?.as_str().to_lowercase();
            let dimension = if tag.starts_with('h') || tag.starts_with('y') {
                WallDimension::Height
            } else {
                WallDimension::Thickness
            };
            let whole = caps.get(0)?;
            // "H280MALZEME" 中的 M 是下一个单词的首字母而非单位
            let unit = caps
                .get(3)
                .filter(|_| !followed_by_letter(layer_name, whole.end()))
                .map(|unit| unit.as_str());
            let meters = measure_from(caps.get(2)?.as_str(), unit)?;
            Some((whole.range(), DimensionHit { dimension, meters }))
        })
        .collect();
    absorb(&mut working, &mut hits, tagged);

    for (pattern, number_group, unit_group) in [
        (&*SUFFIXED_DIMENSION, 1, 2),
        (&*PREFIXED_DIMENSION, 2, 1),
    ] {
        let found: Vec<_> = pattern
            .captures_iter(&working)
            .filter_map(|caps| {
                let meters = measure_from(
                    caps.get(number_group)?.as_str(),
                    Some(caps.get(unit_group)?.as_str()),
                )?;
                let hit = DimensionHit {
                    dimension: WallDimension::classify(meters),
                    meters,
                };
                Some((caps.get(0)?.range(), hit))
            })
            .collect();
        absorb(&mut working, &mut hits, found);
    }

    let bare: Vec<_> = BARE_DIMENSION
        .captures_iter(&working)
        .filter_map(|caps| {
            let value: u32 = caps.get(1)?.as_str().parse().ok()?;
            if !(100..=9999).contains(&value) {
                return None;
            }
            let meters = units::to_meters(f64::from(value), DrawingUnit::Centimeter);
            let hit = DimensionHit {
                dimension: WallDimension::classify(meters),
                meters,
            };
            Some((caps.get(0)?.range(), hit))
        })
        .collect();
    absorb(&mut working, &mut hits, bare);

    hits
}

fn followed_by_letter(text: &str, offset: usize) -> bool {
    text.get(offset..)
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_alphabetic)
}

fn absorb(
    working: &mut String,
    hits: &mut Vec<DimensionHit>,
    found: Vec<(std::ops::Range<usize>, DimensionHit)>,
) {
    for (range, hit) in found {
        let blank = " ".repeat(range.len());
        working.replace_range(range, &blank);
        hits.push(hit);
    }
}

fn keyword_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// 长关键字按前缀匹配分词（"tugla19" 命中 "tugla"），短关键字要求完整匹配。
fn contains_keyword(tokens: &[String], keywords: &[&str]) -> bool {
    tokens.iter().any(|token| {
        keywords.iter().any(|keyword| {
            if keyword.chars().count() >= 4 {
                token.starts_with(keyword)
            } else {
                token == keyword
            }
        })
    })
}
