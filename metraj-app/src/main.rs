use std::path::PathBuf;

use metraj_config::AppConfig;
use metraj_core::{document::Drawing, units::DrawingUnit};
use metraj_engine::{
    diagnostics::TakeoffDiagnostics,
    inference::{AttributeSource, LayerCategory, WallAttributes, infer_wall_attributes_with},
    takeoff::{LayerTakeoff, TakeoffItem, measure_all_layers, measure_layers, takeoff_items},
};
use metraj_io::{DrawingLoader, DxfLoader};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const USAGE: &str =
    "usage: metraj-app <drawing.dxf> [--unit mm|cm|m] [--layer NAME]... [--json] [--config PATH]";

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    drawing: PathBuf,
    unit: Option<String>,
    layers: Vec<String>,
    json: bool,
    config: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut drawing: Option<PathBuf> = None;
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => parsed.json = true,
            "--unit" => {
                let Some(unit) = args.next() else {
                    return Err("`--unit` 需要提供单位（mm、cm 或 m）".to_string());
                };
                parsed.unit = Some(unit);
            }
            "--layer" => {
                let Some(layer) = args.next() else {
                    return Err("`--layer` 需要提供图层名".to_string());
                };
                parsed.layers.push(layer);
            }
            "--config" => {
                let Some(path) = args.next() else {
                    return Err("`--config` 需要提供配置文件路径".to_string());
                };
                parsed.config = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => return Err(format!("未知参数：{other}")),
            other => {
                if drawing.is_some() {
                    return Err(format!("只能指定一个图纸文件：{other}"));
                }
                drawing = Some(PathBuf::from(other));
            }
        }
    }

    parsed.drawing = drawing.ok_or_else(|| "缺少图纸文件路径".to_string())?;
    Ok(parsed)
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    let config = load_configuration(args.config.clone());
    init_logging(&config);
    info!(drawing = %args.drawing.display(), "启动算量");

    let unit = args.unit.clone().or_else(|| config.takeoff.default_unit.clone());
    let loader = match unit {
        Some(unit) => DxfLoader::with_declared_unit(unit),
        None => DxfLoader::new(),
    };
    let drawing = match loader.load(&args.drawing) {
        Ok(drawing) => drawing,
        Err(err) => {
            error!(path = %args.drawing.display(), error = %err, "无法加载图纸");
            std::process::exit(1);
        }
    };

    let report = build_report(&args, &config, &drawing);
    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "序列化算量结果失败");
                std::process::exit(1);
            }
        }
    } else {
        print_report(&report);
    }
}

#[derive(Debug, Serialize)]
struct TakeoffReport {
    drawing: String,
    unit: DrawingUnit,
    entity_count: usize,
    layers: Vec<LayerTakeoff>,
    walls: Vec<WallReport>,
    items: Vec<TakeoffItem>,
    diagnostics: TakeoffDiagnostics,
    summary: String,
}

#[derive(Debug, Serialize)]
struct WallReport {
    layer: String,
    #[serde(flatten)]
    attributes: WallAttributes,
}

fn build_report(args: &CliArgs, config: &AppConfig, drawing: &Drawing) -> TakeoffReport {
    let settings = config.takeoff_settings();
    let layers = if args.layers.is_empty() {
        measure_all_layers(drawing, &settings)
    } else {
        measure_layers(drawing, &args.layers, &settings)
    };

    let inference = config.inference_settings();
    let learned = config.learned_store();
    let walls = layers
        .iter()
        .filter(|layer| layer.category == LayerCategory::Wall)
        .map(|layer| WallReport {
            layer: layer.layer_name.clone(),
            attributes: infer_wall_attributes_with(
                drawing,
                &layer.layer_name,
                Some(&learned),
                &inference,
            ),
        })
        .collect();

    let mut diagnostics = TakeoffDiagnostics::new();
    for layer in &layers {
        diagnostics.merge(&layer.diagnostics);
    }

    TakeoffReport {
        drawing: args.drawing.display().to_string(),
        unit: drawing.unit(),
        entity_count: drawing.entity_count(),
        items: takeoff_items(&layers),
        summary: diagnostics.summary(),
        layers,
        walls,
        diagnostics,
    }
}

fn print_report(report: &TakeoffReport) {
    println!(
        "Drawing: {} ({} entities, unit {})",
        report.drawing, report.entity_count, report.unit
    );

    println!();
    println!("Layers:");
    for layer in &report.layers {
        let visibility = if layer.is_visible { "" } else { " [hidden]" };
        println!(
            "  - {}{} ({}): length {:.3} m, area {:.3} m², blocks {}",
            layer.layer_name,
            visibility,
            layer.category,
            layer.length.total_length_m,
            layer.area.total_area_m2,
            layer.count.total_blocks()
        );
    }

    if !report.walls.is_empty() {
        println!();
        println!("Walls:");
        for wall in &report.walls {
            let attributes = &wall.attributes;
            println!(
                "  - {}: height {:.2} m ({}), thickness {:.2} m ({}), material {} ({})",
                wall.layer,
                attributes.height.value,
                source_label(attributes.height.source),
                attributes.thickness.value,
                source_label(attributes.thickness.source),
                attributes.material.value,
                source_label(attributes.material.source)
            );
        }
    }

    println!();
    println!("Takeoff items:");
    if report.items.is_empty() {
        println!("  (none)");
    }
    for item in &report.items {
        println!("  - {}: {:.3} {}", item.description, item.quantity, item.unit);
    }

    println!();
    println!("{}", report.summary);
}

fn source_label(source: AttributeSource) -> &'static str {
    match source {
        AttributeSource::Default => "default",
        AttributeSource::NearbyText => "nearby text",
        AttributeSource::LayerNamePattern => "layer name",
        AttributeSource::LearnedOverride => "correction",
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    let loaded = match &override_path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    };
    loaded.unwrap_or_else(|err| {
        warn!(
            path = ?err.path(),
            explicit = override_path.is_some(),
            error = %err,
            "加载配置失败，使用内建默认值"
        );
        AppConfig::default()
    })
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    // 日志写到 stderr，stdout 只留给报告
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_full_command_line() {
        let parsed = parse_args(args(&[
            "plan.dxf", "--unit", "cm", "--layer", "DUVAR", "--layer", "ZEMIN", "--json",
            "--config", "metraj.toml",
        ]))
        .expect("valid arguments");
        assert_eq!(parsed.drawing, PathBuf::from("plan.dxf"));
        assert_eq!(parsed.unit.as_deref(), Some("cm"));
        assert_eq!(parsed.layers, vec!["DUVAR".to_string(), "ZEMIN".to_string()]);
        assert!(parsed.json);
        assert_eq!(parsed.config, Some(PathBuf::from("metraj.toml")));
    }

    #[test]
    fn rejects_missing_drawing_and_unknown_flags() {
        assert!(parse_args(args(&["--json"])).is_err());
        assert!(parse_args(args(&["plan.dxf", "--verbose"])).is_err());
        assert!(parse_args(args(&["plan.dxf", "--unit"])).is_err());
        assert!(parse_args(args(&["a.dxf", "b.dxf"])).is_err());
    }

    #[test]
    fn unreadable_explicit_config_falls_back_to_defaults() {
        let config = load_configuration(Some(PathBuf::from("/nonexistent/metraj.toml")));
        assert_eq!(config.logging.level, "info");
        assert!(config.corrections.is_empty());
    }

    #[test]
    fn report_infers_walls_with_config_corrections() {
        use metraj_config::LayerCorrection;
        use metraj_core::geometry::Point2;
        use metraj_engine::inference::WallMaterial;

        let mut drawing = Drawing::new(DrawingUnit::Meter);
        drawing.add_segment(Point2::new(0.0, 0.0), Point2::new(5.0, 0.0), "DUVAR_H300");
        drawing.add_block_reference("KAPI_90", Point2::new(1.0, 0.0), "KAPI");

        let mut config = AppConfig::default();
        config.corrections.push(LayerCorrection {
            layer: "duvar_h300".to_string(),
            height_m: None,
            thickness_m: None,
            material: Some(WallMaterial::Gypsum),
        });
        let cli = CliArgs {
            drawing: PathBuf::from("plan.dxf"),
            ..CliArgs::default()
        };

        let report = build_report(&cli, &config, &drawing);
        assert_eq!(report.layers.len(), 2);
        assert_eq!(report.walls.len(), 1);
        let wall = &report.walls[0].attributes;
        assert!((wall.height.value - 3.0).abs() < 1e-9);
        assert_eq!(wall.material.value, WallMaterial::Gypsum);
        assert_eq!(wall.material.source, AttributeSource::LearnedOverride);
        assert_eq!(report.summary, "0 shapes auto-repaired / 0 skipped");
        assert_eq!(report.items.len(), 2);
    }
}
