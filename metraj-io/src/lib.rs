use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use metraj_core::{
    document::{
        Arc, BlockReference, Circle, Drawing, Ellipse, Entity, MultiStrokeLine, Polyline,
        Segment, TextLabel, UnrecognizedEntity,
    },
    geometry::{Point2, Vector2},
    units::DrawingUnit,
};
use thiserror::Error;
use tracing::{debug, info, warn};

const BINARY_DXF_SENTINEL: &[u8] = b"AutoCAD Binary DXF";
const DEFAULT_LAYER: &str = "0";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("drawing file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("malformed drawing: {0}")]
    MalformedDrawing(String),
    #[error("failed to read drawing: {0}")]
    Io(String),
}

pub trait DrawingLoader {
    fn load(&self, path: &Path) -> Result<Drawing, LoadError>;
}

/// ASCII DXF 加载器。`declared_unit` 为用户声明的单位字符串，优先于文件头的 `$INSUNITS`。
#[derive(Debug, Clone, Default)]
pub struct DxfLoader {
    declared_unit: Option<String>,
}

impl DxfLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_declared_unit(unit: impl Into<String>) -> Self {
        Self {
            declared_unit: Some(unit.into()),
        }
    }

    /// 直接解析内存中的 DXF 文本。
    pub fn parse_str(&self, source: &str) -> Result<Drawing, LoadError> {
        let declared = match self.declared_unit.as_deref() {
            Some(raw) => Some(
                raw.parse::<DrawingUnit>()
                    .map_err(|err| LoadError::MalformedDrawing(err.to_string()))?,
            ),
            None => None,
        };
        let parsed = DxfParser::new(source)
            .parse()
            .map_err(|DxfError::Structure { message }| LoadError::MalformedDrawing(message))?;

        // 声明的单位覆盖文件头，此时不再校验 `$INSUNITS`
        let unit = match (declared, parsed.insunits) {
            (Some(unit), code) => {
                if let Some(code) = code {
                    debug!(code, unit = %unit, "使用声明单位，忽略文件头 $INSUNITS");
                }
                unit
            }
            (None, Some(code)) => DrawingUnit::from_insunits(code)
                .map_err(|err| LoadError::MalformedDrawing(err.to_string()))?
                .unwrap_or_default(),
            (None, None) => DrawingUnit::default(),
        };

        let mut drawing = Drawing::new(unit);
        for (name, is_visible) in parsed.layers {
            drawing.declare_layer(name, is_visible);
        }
        for entity in parsed.entities {
            drawing.add_entity(entity);
        }
        debug!(
            unit = %unit,
            declared = declared.is_some(),
            header = ?parsed.insunits,
            unrecognized = parsed.unrecognized,
            "DXF 解析完成"
        );
        Ok(drawing)
    }
}

impl DrawingLoader for DxfLoader {
    fn load(&self, path: &Path) -> Result<Drawing, LoadError> {
        let bytes = fs::read(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
            _ => LoadError::Io(format!("{}: {source}", path.display())),
        })?;
        if bytes.starts_with(BINARY_DXF_SENTINEL) {
            return Err(LoadError::MalformedDrawing(
                "binary DXF is not supported".to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&bytes);
        let drawing = self.parse_str(&text)?;
        info!(
            path = %path.display(),
            unit = %drawing.unit(),
            entities = drawing.entity_count(),
            layers = drawing.layers().count(),
            "从 DXF 加载图纸成功"
        );
        Ok(drawing)
    }
}

/// 使用文件头推断的单位加载图纸。
pub fn load(path: impl AsRef<Path>) -> Result<Drawing, LoadError> {
    DxfLoader::new().load(path.as_ref())
}

/// 结构性错误：文件整体无法继续解析。
#[derive(Debug)]
enum DxfError {
    Structure { message: String },
}

impl DxfError {
    fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }
}

/// 单个实体解码失败；该实体被记为无法识别，不影响整张图纸。
#[derive(Debug)]
struct DecodeError(String);

impl DecodeError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type GroupPair = (i32, String);

#[derive(Debug, Default)]
struct ParsedDxf {
    insunits: Option<i32>,
    layers: Vec<(String, bool)>,
    entities: Vec<Entity>,
    unrecognized: usize,
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
    output: ParsedDxf,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
            output: ParsedDxf::default(),
        }
    }

    fn parse(mut self) -> Result<ParsedDxf, DxfError> {
        let mut saw_eof = false;
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                return Err(DxfError::structure(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.trim() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::structure("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::structure(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "HEADER" => self.parse_header()?,
                        "TABLES" => self.parse_tables()?,
                        "ENTITIES" => self.parse_entities()?,
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => {
                    saw_eof = true;
                    break;
                }
                unexpected => {
                    return Err(DxfError::structure(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        if !saw_eof {
            return Err(DxfError::structure("文件缺少 EOF 终止标记，可能已被截断"));
        }
        Ok(self.output)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::structure("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_header(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some((9, variable)) if variable.trim() == "$INSUNITS" => {
                    match self.reader.next_pair()? {
                        Some((70, raw)) => {
                            let code = raw.trim().parse::<i32>().map_err(|_| {
                                DxfError::structure(format!("$INSUNITS 值无法解析：\"{raw}\""))
                            })?;
                            self.output.insunits = Some(code);
                        }
                        Some(pair) => self.reader.put_back(pair),
                        None => return Err(DxfError::structure("HEADER 段提前结束")),
                    }
                }
                Some(_) => continue,
                None => return Err(DxfError::structure("HEADER 段提前结束")),
            }
        }
        Ok(())
    }

    fn parse_tables(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::structure("TABLES 段提前结束"))?;
            if code != 0 {
                continue;
            }
            match value.trim() {
                "ENDSEC" => break,
                "TABLE" => {
                    let body = self.read_body("TABLE")?;
                    let is_layer_table = body
                        .iter()
                        .any(|(code, value)| *code == 2 && value.trim() == "LAYER");
                    self.parse_table_records(is_layer_table)?;
                }
                other => {
                    return Err(DxfError::structure(format!(
                        "TABLES 段遇到意外的记录 {other}（期望 TABLE/ENDSEC）"
                    )));
                }
            }
        }
        Ok(())
    }

    fn parse_table_records(&mut self, is_layer_table: bool) -> Result<(), DxfError> {
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::structure("TABLE 未找到 ENDTAB 终止标记"))?;
            if code != 0 {
                return Err(DxfError::structure(format!(
                    "TABLE 记录遇到组码 {code}（期望 0）"
                )));
            }
            match value.trim() {
                "ENDTAB" => {
                    self.read_body("ENDTAB")?;
                    break;
                }
                "LAYER" if is_layer_table => {
                    let body = self.read_body("LAYER")?;
                    let mut name: Option<String> = None;
                    let mut is_visible = true;
                    for (code, value) in &body {
                        match code {
                            2 => name = Some(value.trim().to_string()),
                            62 => {
                                if let Ok(color) = value.trim().parse::<i32>() {
                                    is_visible = color >= 0;
                                }
                            }
                            _ => {}
                        }
                    }
                    match name {
                        Some(name) if !name.is_empty() => {
                            self.output.layers.push((name, is_visible))
                        }
                        _ => warn!("图层表记录缺少名称（组码 2），已忽略"),
                    }
                }
                _ => {
                    self.read_body("TABLE 记录")?;
                }
            }
        }
        Ok(())
    }

    fn parse_entities(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::structure("ENTITIES 段提前结束"))?;
            if code != 0 {
                return Err(DxfError::structure(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            let kind = value.trim().to_string();
            match kind.as_str() {
                "ENDSEC" => break,
                "SEQEND" | "VERTEX" => {
                    // 游离的序列记录，没有对应的 POLYLINE 头
                    self.read_body(&kind)?;
                }
                "POLYLINE" => {
                    let body = self.read_body("POLYLINE")?;
                    let vertices = self.read_vertex_sequence()?;
                    if is_paper_space(&body) {
                        continue;
                    }
                    let decoded = decode_polyline(&body, &vertices);
                    self.push_decoded(&kind, &body, decoded);
                }
                _ => {
                    let body = self.read_body(&kind)?;
                    if is_paper_space(&body) {
                        debug!(kind = %kind, "忽略图纸空间实体");
                        continue;
                    }
                    let decoded = decode_entity(&kind, &body);
                    self.push_decoded(&kind, &body, decoded);
                }
            }
        }
        Ok(())
    }

    /// 读取 POLYLINE 之后的 VERTEX 记录直到 SEQEND。
    fn read_vertex_sequence(&mut self) -> Result<Vec<Vec<GroupPair>>, DxfError> {
        let mut vertices = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => vertices.push(self.read_body("VERTEX")?),
                    "SEQEND" => {
                        self.read_body("SEQEND")?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some((code, _)) => {
                    return Err(DxfError::structure(format!(
                        "POLYLINE 顶点序列遇到组码 {code}（期望 0）"
                    )));
                }
                None => return Err(DxfError::structure("POLYLINE 顶点序列未正确结束")),
            }
        }
        Ok(vertices)
    }

    fn push_decoded(
        &mut self,
        kind: &str,
        body: &[GroupPair],
        decoded: Result<Entity, DecodeError>,
    ) {
        match decoded {
            Ok(entity) => self.output.entities.push(entity),
            Err(DecodeError(reason)) => {
                let layer = layer_of(body);
                warn!(kind, layer = %layer, reason = %reason, "实体解码失败，按无法识别处理");
                self.output.unrecognized += 1;
                self.output
                    .entities
                    .push(Entity::Unrecognized(UnrecognizedEntity {
                        kind: kind.to_string(),
                        reason: Some(reason),
                        layer,
                    }));
            }
        }
    }

    /// 读取实体主体的全部组码，直到下一个组码 0（回退给调用方）。
    fn read_body(&mut self, context: &str) -> Result<Vec<GroupPair>, DxfError> {
        let mut body = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(pair) => body.push(pair),
                None => {
                    return Err(DxfError::structure(format!("{context} 未正确结束")));
                }
            }
        }
        Ok(body)
    }
}

fn is_paper_space(body: &[GroupPair]) -> bool {
    body.iter()
        .any(|(code, value)| *code == 67 && value.trim() == "1")
}

fn layer_of(body: &[GroupPair]) -> String {
    body.iter()
        .find(|(code, _)| *code == 8)
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_LAYER.to_string())
}

fn decode_entity(kind: &str, body: &[GroupPair]) -> Result<Entity, DecodeError> {
    match kind {
        "LINE" => decode_line(body),
        "LWPOLYLINE" => decode_lwpolyline(body),
        "ARC" => decode_arc(body),
        "CIRCLE" => decode_circle(body),
        "ELLIPSE" => decode_ellipse(body),
        "MLINE" => decode_mline(body),
        "TEXT" => decode_text(body),
        "MTEXT" => decode_mtext(body),
        "INSERT" => decode_insert(body),
        _ => Ok(Entity::Unrecognized(UnrecognizedEntity {
            kind: kind.to_string(),
            reason: None,
            layer: layer_of(body),
        })),
    }
}

fn decode_line(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut start_x = None;
    let mut start_y = None;
    let mut end_x = None;
    let mut end_y = None;
    for (code, value) in body {
        match code {
            10 => assign_coord(&mut start_x, value, "LINE 起点 X")?,
            20 => assign_coord(&mut start_y, value, "LINE 起点 Y")?,
            11 => assign_coord(&mut end_x, value, "LINE 终点 X")?,
            21 => assign_coord(&mut end_y, value, "LINE 终点 Y")?,
            _ => {}
        }
    }
    let sx = start_x.ok_or_else(|| DecodeError::new("LINE 缺少起点 X（组码 10）"))?;
    let sy = start_y.ok_or_else(|| DecodeError::new("LINE 缺少起点 Y（组码 20）"))?;
    let ex = end_x.ok_or_else(|| DecodeError::new("LINE 缺少终点 X（组码 11）"))?;
    let ey = end_y.ok_or_else(|| DecodeError::new("LINE 缺少终点 Y（组码 21）"))?;
    Ok(Entity::Segment(Segment {
        start: Point2::new(sx, sy),
        end: Point2::new(ex, ey),
        layer: layer_of(body),
    }))
}

fn decode_lwpolyline(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut is_closed = false;
    let mut vertices: Vec<Point2> = Vec::new();
    let mut pending_x: Option<f64> = None;
    let mut pending_y: Option<f64> = None;
    for (code, value) in body {
        match code {
            70 => {
                let flag = parse_i32(value, "LWPOLYLINE 标志")?;
                is_closed = flag & 0x01 == 0x01;
            }
            10 => {
                let x = parse_f64(value, "LWPOLYLINE 顶点 X")?;
                if let Some(y) = pending_y.take() {
                    vertices.push(Point2::new(x, y));
                } else if pending_x.replace(x).is_some() {
                    return Err(DecodeError::new("LWPOLYLINE 顶点缺少对应的 Y（组码 20）"));
                }
            }
            20 => {
                let y = parse_f64(value, "LWPOLYLINE 顶点 Y")?;
                if let Some(x) = pending_x.take() {
                    vertices.push(Point2::new(x, y));
                } else if pending_y.replace(y).is_some() {
                    return Err(DecodeError::new("LWPOLYLINE 顶点缺少对应的 X（组码 10）"));
                }
            }
            _ => {}
        }
    }
    if pending_x.is_some() || pending_y.is_some() {
        return Err(DecodeError::new(
            "LWPOLYLINE 顶点坐标应成对出现（组码 10/20），检测到不完整的顶点",
        ));
    }
    // 顶点不足的多段线照常保留，由各统计环节计入跳过数
    Ok(Entity::Polyline(Polyline {
        vertices,
        is_closed,
        layer: layer_of(body),
    }))
}

fn decode_polyline(
    header: &[GroupPair],
    vertex_records: &[Vec<GroupPair>],
) -> Result<Entity, DecodeError> {
    let mut flags = 0;
    for (code, value) in header {
        if *code == 70 {
            flags = parse_i32(value, "POLYLINE 标志（组码 70）")?;
        }
    }
    if flags & (0x10 | 0x40) != 0 {
        return Err(DecodeError::new("POLYLINE 网格/多面网格不参与算量"));
    }
    let mut vertices = Vec::with_capacity(vertex_records.len());
    for record in vertex_records {
        let mut x = None;
        let mut y = None;
        let mut vertex_flags = 0;
        for (code, value) in record {
            match code {
                10 => assign_coord(&mut x, value, "VERTEX X")?,
                20 => assign_coord(&mut y, value, "VERTEX Y")?,
                70 => vertex_flags = parse_i32(value, "VERTEX 标志（组码 70）")?,
                _ => {}
            }
        }
        // 样条拟合的控制点（标志 16）不属于实际路径
        if vertex_flags & 0x10 != 0 {
            continue;
        }
        let x = x.ok_or_else(|| DecodeError::new("VERTEX 缺少 X（组码 10）"))?;
        let y = y.ok_or_else(|| DecodeError::new("VERTEX 缺少 Y（组码 20）"))?;
        vertices.push(Point2::new(x, y));
    }
    Ok(Entity::Polyline(Polyline {
        vertices,
        is_closed: flags & 0x01 == 0x01,
        layer: layer_of(header),
    }))
}

fn decode_arc(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut center_x = None;
    let mut center_y = None;
    let mut radius = None;
    let mut start_angle = None;
    let mut end_angle = None;
    for (code, value) in body {
        match code {
            10 => assign_coord(&mut center_x, value, "ARC 圆心 X")?,
            20 => assign_coord(&mut center_y, value, "ARC 圆心 Y")?,
            40 => assign_coord(&mut radius, value, "ARC 半径")?,
            50 => assign_coord(&mut start_angle, value, "ARC 起始角")?,
            51 => assign_coord(&mut end_angle, value, "ARC 终止角")?,
            _ => {}
        }
    }
    let cx = center_x.ok_or_else(|| DecodeError::new("ARC 缺少圆心 X（组码 10）"))?;
    let cy = center_y.ok_or_else(|| DecodeError::new("ARC 缺少圆心 Y（组码 20）"))?;
    let radius = radius.ok_or_else(|| DecodeError::new("ARC 缺少半径（组码 40）"))?;
    let start = start_angle.ok_or_else(|| DecodeError::new("ARC 缺少起始角（组码 50）"))?;
    let end = end_angle.ok_or_else(|| DecodeError::new("ARC 缺少终止角（组码 51）"))?;
    Ok(Entity::Arc(Arc {
        center: Point2::new(cx, cy),
        radius,
        start_angle: start.to_radians(),
        end_angle: end.to_radians(),
        layer: layer_of(body),
    }))
}

fn decode_circle(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut center_x = None;
    let mut center_y = None;
    let mut radius = None;
    for (code, value) in body {
        match code {
            10 => assign_coord(&mut center_x, value, "CIRCLE 圆心 X")?,
            20 => assign_coord(&mut center_y, value, "CIRCLE 圆心 Y")?,
            40 => assign_coord(&mut radius, value, "CIRCLE 半径")?,
            _ => {}
        }
    }
    let cx = center_x.ok_or_else(|| DecodeError::new("CIRCLE 缺少圆心 X（组码 10）"))?;
    let cy = center_y.ok_or_else(|| DecodeError::new("CIRCLE 缺少圆心 Y（组码 20）"))?;
    let radius = radius.ok_or_else(|| DecodeError::new("CIRCLE 缺少半径（组码 40）"))?;
    Ok(Entity::Circle(Circle {
        center: Point2::new(cx, cy),
        radius,
        layer: layer_of(body),
    }))
}

fn decode_ellipse(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut center_x = None;
    let mut center_y = None;
    let mut axis_x = None;
    let mut axis_y = None;
    let mut ratio = None;
    let mut start_param = None;
    let mut end_param = None;
    for (code, value) in body {
        match code {
            10 => assign_coord(&mut center_x, value, "ELLIPSE 圆心 X")?,
            20 => assign_coord(&mut center_y, value, "ELLIPSE 圆心 Y")?,
            // 长轴端点相对圆心的偏移
            11 => assign_coord(&mut axis_x, value, "ELLIPSE 长轴 X")?,
            21 => assign_coord(&mut axis_y, value, "ELLIPSE 长轴 Y")?,
            40 => assign_coord(&mut ratio, value, "ELLIPSE 轴比")?,
            41 => assign_coord(&mut start_param, value, "ELLIPSE 起始参数")?,
            42 => assign_coord(&mut end_param, value, "ELLIPSE 终止参数")?,
            _ => {}
        }
    }
    let cx = center_x.ok_or_else(|| DecodeError::new("ELLIPSE 缺少圆心 X（组码 10）"))?;
    let cy = center_y.ok_or_else(|| DecodeError::new("ELLIPSE 缺少圆心 Y（组码 20）"))?;
    let ax = axis_x.ok_or_else(|| DecodeError::new("ELLIPSE 缺少长轴 X（组码 11）"))?;
    let ay = axis_y.ok_or_else(|| DecodeError::new("ELLIPSE 缺少长轴 Y（组码 21）"))?;
    let ratio = ratio.ok_or_else(|| DecodeError::new("ELLIPSE 缺少轴比（组码 40）"))?;
    Ok(Entity::Ellipse(Ellipse {
        center: Point2::new(cx, cy),
        major_axis: Vector2::new(ax, ay),
        ratio,
        start_param: start_param.unwrap_or(0.0),
        end_param: end_param.unwrap_or(std::f64::consts::TAU),
        layer: layer_of(body),
    }))
}

fn decode_mline(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut style_name = None;
    let mut is_closed = false;
    let mut centerline = Vec::new();
    let mut pending_x: Option<f64> = None;
    for (code, value) in body {
        match code {
            2 => style_name = Some(value.trim().to_string()).filter(|name| !name.is_empty()),
            71 => {
                let flags = parse_i32(value, "MLINE 标志（组码 71）")?;
                is_closed = flags & 0x02 != 0;
            }
            11 => {
                if pending_x.replace(parse_f64(value, "MLINE 顶点 X")?).is_some() {
                    return Err(DecodeError::new("MLINE 顶点缺少对应的 Y（组码 21）"));
                }
            }
            21 => {
                let y = parse_f64(value, "MLINE 顶点 Y")?;
                let x = pending_x
                    .take()
                    .ok_or_else(|| DecodeError::new("MLINE 顶点缺少对应的 X（组码 11）"))?;
                centerline.push(Point2::new(x, y));
            }
            _ => {}
        }
    }
    if pending_x.is_some() {
        return Err(DecodeError::new("MLINE 末尾存在不完整的顶点"));
    }
    Ok(Entity::MultiStrokeLine(MultiStrokeLine {
        centerline,
        is_closed,
        style_name,
        layer: layer_of(body),
    }))
}

fn decode_text(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut insert_x = None;
    let mut insert_y = None;
    let mut height = None;
    let mut content: Option<String> = None;
    for (code, value) in body {
        match code {
            10 => assign_coord(&mut insert_x, value, "TEXT 插入点 X")?,
            20 => assign_coord(&mut insert_y, value, "TEXT 插入点 Y")?,
            40 => assign_coord(&mut height, value, "TEXT 高度")?,
            1 => {
                if let Some(existing) = content.as_mut() {
                    existing.push('\n');
                    existing.push_str(value);
                } else {
                    content = Some(value.clone());
                }
            }
            _ => {}
        }
    }
    let ix = insert_x.ok_or_else(|| DecodeError::new("TEXT 缺少插入点 X（组码 10）"))?;
    let iy = insert_y.ok_or_else(|| DecodeError::new("TEXT 缺少插入点 Y（组码 20）"))?;
    let content = content.ok_or_else(|| DecodeError::new("TEXT 缺少文本内容（组码 1）"))?;
    Ok(Entity::TextLabel(TextLabel {
        content: decode_inline_text(&content),
        position: Point2::new(ix, iy),
        height: height.unwrap_or(0.0),
        layer: layer_of(body),
    }))
}

fn decode_mtext(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut insert_x = None;
    let mut insert_y = None;
    let mut height = None;
    let mut fragments: Vec<&str> = Vec::new();
    let mut tail: Option<&str> = None;
    for (code, value) in body {
        match code {
            10 => assign_coord(&mut insert_x, value, "MTEXT 插入点 X")?,
            20 => assign_coord(&mut insert_y, value, "MTEXT 插入点 Y")?,
            40 => assign_coord(&mut height, value, "MTEXT 高度")?,
            // 组码 3 为前置分段，组码 1 为最后一段
            3 => fragments.push(value),
            1 => tail = Some(value),
            _ => {}
        }
    }
    let ix = insert_x.ok_or_else(|| DecodeError::new("MTEXT 缺少插入点 X（组码 10）"))?;
    let iy = insert_y.ok_or_else(|| DecodeError::new("MTEXT 缺少插入点 Y（组码 20）"))?;
    let tail = tail.ok_or_else(|| DecodeError::new("MTEXT 缺少内容（组码 1）"))?;
    fragments.push(tail);
    let raw: String = fragments.concat();
    Ok(Entity::TextLabel(TextLabel {
        content: decode_inline_text(&raw),
        position: Point2::new(ix, iy),
        height: height.unwrap_or(0.0),
        layer: layer_of(body),
    }))
}

fn decode_insert(body: &[GroupPair]) -> Result<Entity, DecodeError> {
    let mut name = None;
    let mut insert_x = None;
    let mut insert_y = None;
    for (code, value) in body {
        match code {
            2 => name = Some(value.trim().to_string()),
            10 => assign_coord(&mut insert_x, value, "INSERT 插入点 X")?,
            20 => assign_coord(&mut insert_y, value, "INSERT 插入点 Y")?,
            _ => {}
        }
    }
    let name = name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DecodeError::new("INSERT 缺少块名（组码 2）"))?;
    Ok(Entity::BlockReference(BlockReference {
        name,
        insert: Point2::new(insert_x.unwrap_or(0.0), insert_y.unwrap_or(0.0)),
        layer: layer_of(body),
    }))
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<GroupPair>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<GroupPair>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    // 容忍文件末尾的空行
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::structure(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::structure(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn put_back(&mut self, pair: GroupPair) {
        debug_assert!(self.buffer.is_none(), "DXF 组码回退只支持一层");
        self.buffer = Some(pair);
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DecodeError> {
    if slot.is_some() {
        return Err(DecodeError::new(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DecodeError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DecodeError::new(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DecodeError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DecodeError::new(format!("{context} 解析失败（值：\"{raw}\"）")))
}

/// 读取 `+` 之后的 `prefix` 个任意字符与 4 位十六进制数，成功时消耗这些字符。
fn take_hex_escape(chars: &mut std::str::Chars<'_>, prefix: usize) -> Option<u32> {
    let mut lookahead = chars.clone();
    if lookahead.next() != Some('+') {
        return None;
    }
    for _ in 0..prefix {
        lookahead.next()?;
    }
    let digits: String = lookahead.by_ref().take(4).collect();
    if digits.len() != 4 || !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    let code = u32::from_str_radix(&digits, 16).ok()?;
    *chars = lookahead;
    Some(code)
}

/// 去除 TEXT/MTEXT 内联格式码，还原 `\U+XXXX` 字符，保留纯文本供关键字检索。
fn decode_inline_text(raw: &str) -> String {
    let mut result = String::new();
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('P') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('{') => result.push('{'),
                Some('}') => result.push('}'),
                Some('L' | 'l' | 'O' | 'o' | 'K' | 'k') => {}
                Some('U') => match take_hex_escape(&mut chars, 0) {
                    Some(code) => result.push(char::from_u32(code).unwrap_or('\u{FFFD}')),
                    None => result.push('U'),
                },
                // \M+nXXXX：n 为代码页编号，XXXX 为该代码页内的双字节编码，无法还原
                Some('M') => match take_hex_escape(&mut chars, 1) {
                    Some(_) => result.push('\u{FFFD}'),
                    None => result.push('M'),
                },
                Some('A' | 'C' | 'c' | 'F' | 'f' | 'H' | 'Q' | 'S' | 'T' | 'W' | 'p') => {
                    // 带参数的格式码（\H2.5; \fArial|b0; \S1/2; 等），跳到分号
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                    }
                }
                Some(other) => result.push(other),
                None => result.push('\\'),
            },
            '{' | '}' => {}
            other => result.push(other),
        }
    }
    // %%c / %%d / %%p 等控制码
    result
        .replace("%%c", "Ø")
        .replace("%%C", "Ø")
        .replace("%%d", "°")
        .replace("%%D", "°")
        .replace("%%p", "±")
        .replace("%%P", "±")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dxf(lines: &[&str]) -> String {
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    #[test]
    fn reader_rejects_non_integer_group_code() {
        let source = dxf(&["0", "SECTION", "X", "ENTITIES"]);
        let err = DxfLoader::new().parse_str(&source).unwrap_err();
        assert!(matches!(err, LoadError::MalformedDrawing(_)));
    }

    #[test]
    fn missing_eof_is_structural() {
        let source = dxf(&["0", "SECTION", "2", "ENTITIES", "0", "ENDSEC"]);
        let err = DxfLoader::new().parse_str(&source).unwrap_err();
        match err {
            LoadError::MalformedDrawing(message) => assert!(message.contains("EOF")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_drawing_defaults_to_millimeters() {
        let source = dxf(&["0", "SECTION", "2", "ENTITIES", "0", "ENDSEC", "0", "EOF"]);
        let drawing = DxfLoader::new().parse_str(&source).expect("parse");
        assert_eq!(drawing.unit(), DrawingUnit::Millimeter);
        assert_eq!(drawing.entity_count(), 0);
    }

    #[test]
    fn declared_unit_overrides_header() {
        let source = dxf(&[
            "0", "SECTION", "2", "HEADER", "9", "$INSUNITS", "70", "6", "0", "ENDSEC", "0", "EOF",
        ]);
        let inferred = DxfLoader::new().parse_str(&source).expect("parse");
        assert_eq!(inferred.unit(), DrawingUnit::Meter);
        let declared = DxfLoader::with_declared_unit("cm").parse_str(&source).expect("parse");
        assert_eq!(declared.unit(), DrawingUnit::Centimeter);
    }

    #[test]
    fn unknown_units_are_rejected_at_load() {
        let source = dxf(&["0", "EOF"]);
        let err = DxfLoader::with_declared_unit("ft").parse_str(&source).unwrap_err();
        assert!(matches!(err, LoadError::MalformedDrawing(_)));

        let inches = dxf(&[
            "0", "SECTION", "2", "HEADER", "9", "$INSUNITS", "70", "1", "0", "ENDSEC", "0", "EOF",
        ]);
        let err = DxfLoader::new().parse_str(&inches).unwrap_err();
        assert!(matches!(err, LoadError::MalformedDrawing(_)));
    }

    #[test]
    fn bad_coordinate_becomes_unrecognized_entity() {
        let source = dxf(&[
            "0", "SECTION", "2", "ENTITIES", "0", "LINE", "8", "DUVAR", "10", "abc", "20", "0",
            "11", "5", "21", "0", "0", "ENDSEC", "0", "EOF",
        ]);
        let drawing = DxfLoader::new().parse_str(&source).expect("parse");
        let (_, entity) = drawing.entities().next().expect("entity");
        match entity {
            Entity::Unrecognized(unknown) => {
                assert_eq!(unknown.kind, "LINE");
                assert_eq!(unknown.layer, "DUVAR");
                assert!(unknown.reason.as_deref().unwrap_or_default().contains("LINE 起点 X"));
            }
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn inline_text_formatting_is_stripped() {
        assert_eq!(decode_inline_text(r"{\H2.5;\fArial|b0;H=280}"), "H=280");
        assert_eq!(decode_inline_text(r"Line1\PLine2"), "Line1\nLine2");
        assert_eq!(decode_inline_text(r"\LTUGLA\l 19cm"), "TUGLA 19cm");
        assert_eq!(decode_inline_text("%%c12"), "Ø12");
    }

    #[test]
    fn unicode_escapes_are_decoded() {
        assert_eq!(
            decode_inline_text(r"Y\U+00DCKSEKL\U+0130K 280"),
            "YÜKSEKLİK 280"
        );
        assert_eq!(decode_inline_text(r"KALINLIK\U+003D20"), "KALINLIK=20");
        assert_eq!(decode_inline_text(r"A\M+18140B"), "A\u{FFFD}B");
        // 不完整的转义原样保留其后的文本
        assert_eq!(decode_inline_text(r"\U+00 H=280"), "U+00 H=280");
        assert_eq!(decode_inline_text(r"\Xkeep"), "Xkeep");
    }

    #[test]
    fn turkish_text_entity_keeps_full_content() {
        let source = dxf(&[
            "0", "SECTION", "2", "ENTITIES", "0", "TEXT", "8", "IC_DUVAR", "10", "1", "20", "1",
            "40", "0.2", "1", r"Y\U+00DCKSEKL\U+0130K 280", "0", "ENDSEC", "0", "EOF",
        ]);
        let drawing = DxfLoader::new().parse_str(&source).expect("parse");
        match drawing.entities().next() {
            Some((_, Entity::TextLabel(label))) => assert_eq!(label.content, "YÜKSEKLİK 280"),
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn ellipse_is_decoded_with_relative_major_axis() {
        let source = dxf(&[
            "0", "SECTION", "2", "ENTITIES", "0", "ELLIPSE", "8", "HAVUZ", "10", "100", "20",
            "50", "11", "300", "21", "0", "40", "0.5", "41", "0", "42", "6.283185307179586", "0",
            "ENDSEC", "0", "EOF",
        ]);
        let drawing = DxfLoader::new().parse_str(&source).expect("parse");
        match drawing.entities().next() {
            Some((_, Entity::Ellipse(ellipse))) => {
                assert_eq!(ellipse.layer, "HAVUZ");
                assert_eq!(ellipse.center, Point2::new(100.0, 50.0));
                assert!((ellipse.semi_major() - 300.0).abs() < 1e-9);
                assert!((ellipse.semi_minor() - 150.0).abs() < 1e-9);
                assert!(ellipse.is_full());
            }
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn declared_unit_bypasses_unsupported_header() {
        let inches = dxf(&[
            "0", "SECTION", "2", "HEADER", "9", "$INSUNITS", "70", "1", "0", "ENDSEC", "0", "EOF",
        ]);
        let drawing = DxfLoader::with_declared_unit("mm")
            .parse_str(&inches)
            .expect("declared unit replaces the header");
        assert_eq!(drawing.unit(), DrawingUnit::Millimeter);
    }
}
