// 该文件是 Yunbiao （云标） 项目的一部分。
// src/report.rs - 检查点训练报告
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{info, warn};

use crate::annotation::coco::{self, CocoDocument, CocoError};
use crate::chart::{self, ChartError};
use crate::dataset::{self, DatasetError};
use crate::detector::{DetectOptions, Detector, DetectorError};
use crate::eval::evaluate_detections;
use crate::predict::{self, PredictError, PredictFormat, PredictOptions};

/// 报告预测使用的置信度阈值
pub const REPORT_THRESHOLD: f32 = 0.01;
/// 报告预测每张图像保留的检测数上限
pub const REPORT_MAX_DETS: usize = 100;

#[derive(Error, Debug)]
pub enum ReportError {
  #[error(transparent)]
  Dataset(#[from] DatasetError),
  #[error(transparent)]
  Detector(#[from] DetectorError),
  #[error(transparent)]
  Predict(#[from] PredictError),
  #[error(transparent)]
  Coco(#[from] CocoError),
  #[error(transparent)]
  Chart(#[from] ChartError),
  #[error("读写 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解析 {path} 第 {line} 行失败")]
  MetricsParse { path: PathBuf, line: usize },
}

/// 报告行为参数
#[derive(Debug, Clone)]
pub struct ReportOptions {
  /// 统计时保留的框面积范围 [min, max)
  pub area: (f64, f64),
  /// 面积换算用的等效图像尺寸
  pub shape: Option<(u32, u32)>,
  /// 叠加到已有的 metrics.csv 上
  pub add: bool,
  /// 已有检测文件的检查点是否重新预测
  pub repredict: bool,
}

impl Default for ReportOptions {
  fn default() -> Self {
    Self {
      area: (0.0, 1e10),
      shape: None,
      add: false,
      repredict: true,
    }
  }
}

/// 报告输入输出位置
#[derive(Debug, Clone)]
pub struct ReportConfig<'a> {
  pub library: &'a Path,
  pub config_file: &'a Path,
  pub models_folder: &'a Path,
  pub report_folder: &'a Path,
  pub images_folder: &'a Path,
  pub annotations_file: &'a Path,
}

/// 一个检查点对应的一行指标
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRow {
  pub epoch: u64,
  pub map: f64,
  pub ap_per_class: Vec<f64>,
}

/// 对模型目录下的所有检查点生成训练报告。
///
/// 每个 `epoch_N.weights` 先跑一遍批量预测，再和真值标注比对算
/// mAP；最后写出 metrics.csv、classes.txt 与两张趋势图。`stop`
/// 置位时保留已完成的部分并提前返回。
pub fn run_report(
  config: &ReportConfig<'_>,
  options: &ReportOptions,
  stop: Option<&AtomicBool>,
) -> Result<(), ReportError> {
  let area = if options.area.1 < 0.0 {
    (options.area.0, 1e10)
  } else {
    options.area
  };

  fs::create_dir_all(config.report_folder).map_err(|source| ReportError::Io {
    path: config.report_folder.to_path_buf(),
    source,
  })?;
  let predictions_folder = config.report_folder.join("predictions");
  fs::create_dir_all(&predictions_folder).map_err(|source| ReportError::Io {
    path: predictions_folder.clone(),
    source,
  })?;

  let metrics_file = config.report_folder.join("metrics.csv");
  let mut rows = if options.add && metrics_file.is_file() {
    read_metrics(&metrics_file)?
  } else {
    Vec::new()
  };
  let known: Vec<u64> = rows.iter().map(|row| row.epoch).collect();

  let classes = dataset::load_class_map(Some(config.annotations_file), 0)?;
  let images = dataset::list_images(config.images_folder, Some(config.annotations_file))?;

  let checkpoints = scan_checkpoints(config.models_folder, &known)?;
  info!("待评估检查点: {} 个", checkpoints.len());

  let mut interrupted = false;
  for (epoch, weights) in &checkpoints {
    if let Some(flag) = stop {
      if flag.load(Ordering::Relaxed) {
        warn!("收到中断信号, 停止评估后续检查点");
        interrupted = true;
        break;
      }
    }

    let detections_file = predictions_folder.join(format!("epoch_{}.json", epoch));
    if options.repredict || !detections_file.is_file() {
      info!("评估检查点 epoch_{}: {}", epoch, weights.display());
      let mut detector = Detector::load(config.library, config.config_file, weights)?;
      let predict_options = PredictOptions {
        format: PredictFormat::Coco,
        detections_only: true,
        detect: DetectOptions {
          threshold: REPORT_THRESHOLD,
          nms: 0.45,
          max_dets: REPORT_MAX_DETS,
        },
        input_shape: None,
      };
      predict::run_predict(
        &mut detector,
        &images,
        &classes,
        &predict_options,
        &detections_file,
        stop,
      )?;
    } else {
      info!("epoch_{} 已有检测结果, 跳过预测", epoch);
    }

    if let Some(flag) = stop {
      if flag.load(Ordering::Relaxed) {
        interrupted = true;
        break;
      }
    }

    let mut gt = CocoDocument::load(config.annotations_file)?;
    coco::retain_boxes(&gt.images, &mut gt.annotations, area, options.shape);
    let mut detections = coco::load_annotations(&detections_file)?;
    coco::retain_boxes(&gt.images, &mut detections, area, options.shape);

    let result = evaluate_detections(&gt, &detections);
    info!("epoch_{}: mAP = {:.4}", epoch, result.map);
    rows.push(MetricsRow {
      epoch: *epoch,
      map: result.map,
      ap_per_class: result.ap_per_class.values().copied().collect(),
    });
  }

  rows.sort_by_key(|row| row.epoch);
  write_metrics(&metrics_file, &rows)?;

  let classes_file = config.report_folder.join("classes.txt");
  let names: Vec<&str> = classes.values().map(String::as_str).collect();
  fs::write(&classes_file, names.join(" ")).map_err(|source| ReportError::Io {
    path: classes_file,
    source,
  })?;

  plot_metrics(config.report_folder, &rows)?;

  if interrupted {
    warn!("报告未覆盖全部检查点, 可用 --add 续跑");
  } else {
    info!("报告已写入 {}", config.report_folder.display());
  }
  Ok(())
}

/// 列出模型目录下尚未评估的 `epoch_N.weights`，按轮次升序
fn scan_checkpoints(
  models_folder: &Path,
  known: &[u64],
) -> Result<Vec<(u64, PathBuf)>, ReportError> {
  let read_dir = fs::read_dir(models_folder).map_err(|source| ReportError::Io {
    path: models_folder.to_path_buf(),
    source,
  })?;

  let mut checkpoints = Vec::new();
  for entry in read_dir {
    let entry = entry.map_err(|source| ReportError::Io {
      path: models_folder.to_path_buf(),
      source,
    })?;
    let name = entry.file_name().to_string_lossy().into_owned();
    if let Some(epoch) = parse_epoch(&name) {
      if !known.contains(&epoch) {
        checkpoints.push((epoch, entry.path()));
      }
    }
  }
  checkpoints.sort_by_key(|(epoch, _)| *epoch);
  Ok(checkpoints)
}

/// 从 `epoch_N.weights` 文件名取出轮次
pub fn parse_epoch(name: &str) -> Option<u64> {
  name
    .strip_prefix("epoch_")?
    .strip_suffix(".weights")?
    .parse()
    .ok()
}

/// 读空格分隔的 metrics.csv，首行为表头
pub fn read_metrics(path: &Path) -> Result<Vec<MetricsRow>, ReportError> {
  let content = fs::read_to_string(path).map_err(|source| ReportError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  let mut rows = Vec::new();
  for (index, line) in content.lines().enumerate().skip(1) {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let parse_error = || ReportError::MetricsParse {
      path: path.to_path_buf(),
      line: index + 1,
    };
    let mut fields = line.split_whitespace();
    let epoch = fields
      .next()
      .and_then(|field| field.parse().ok())
      .ok_or_else(parse_error)?;
    let map = fields
      .next()
      .and_then(|field| field.parse().ok())
      .ok_or_else(parse_error)?;
    let ap_per_class = fields
      .map(str::parse)
      .collect::<Result<Vec<f64>, _>>()
      .map_err(|_| parse_error())?;
    rows.push(MetricsRow {
      epoch,
      map,
      ap_per_class,
    });
  }
  Ok(rows)
}

fn write_metrics(path: &Path, rows: &[MetricsRow]) -> Result<(), ReportError> {
  let classes_num = rows
    .iter()
    .map(|row| row.ap_per_class.len())
    .max()
    .unwrap_or(0);

  let mut content = String::from("epoch mAP");
  for class_id in 0..classes_num {
    content.push_str(&format!(" AP{}", class_id));
  }
  content.push('\n');
  for row in rows {
    content.push_str(&format!("{} {}", row.epoch, row.map));
    for ap in &row.ap_per_class {
      content.push_str(&format!(" {}", ap));
    }
    content.push('\n');
  }

  fs::write(path, content).map_err(|source| ReportError::Io {
    path: path.to_path_buf(),
    source,
  })
}

fn plot_metrics(report_folder: &Path, rows: &[MetricsRow]) -> Result<(), ReportError> {
  if rows.is_empty() {
    return Ok(());
  }

  let epochs: Vec<f64> = rows.iter().map(|row| row.epoch as f64).collect();
  let maps: Vec<f64> = rows.iter().map(|row| row.map).collect();
  chart::plot_single_series(&epochs, &maps, &report_folder.join("mAP.png"))?;

  let classes_num = rows
    .iter()
    .map(|row| row.ap_per_class.len())
    .max()
    .unwrap_or(0);
  let mut series: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
  for row in rows {
    for class_id in 0..classes_num {
      series
        .entry(class_id)
        .or_default()
        .push(row.ap_per_class.get(class_id).copied().unwrap_or(0.0));
    }
  }
  let series: Vec<Vec<f64>> = series.into_values().collect();
  chart::plot_series(&epochs, &series, &report_folder.join("APs.png"))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn epoch_names_are_parsed() {
    assert_eq!(parse_epoch("epoch_100.weights"), Some(100));
    assert_eq!(parse_epoch("epoch_007.weights"), Some(7));
    assert_eq!(parse_epoch("final.weights"), None);
    assert_eq!(parse_epoch("epoch_abc.weights"), None);
    assert_eq!(parse_epoch("epoch_100.backup"), None);
  }

  #[test]
  fn metrics_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.csv");
    let rows = vec![
      MetricsRow {
        epoch: 100,
        map: 0.25,
        ap_per_class: vec![0.2, 0.3],
      },
      MetricsRow {
        epoch: 200,
        map: 0.5,
        ap_per_class: vec![0.4, 0.6],
      },
    ];

    write_metrics(&path, &rows).unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("epoch mAP AP0 AP1\n"));

    let parsed = read_metrics(&path).unwrap();
    assert_eq!(parsed, rows);
  }

  #[test]
  fn bad_metrics_line_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.csv");
    fs::write(&path, "epoch mAP\nnot a number\n").unwrap();

    let err = read_metrics(&path).unwrap_err();
    assert!(matches!(err, ReportError::MetricsParse { line: 2, .. }));
  }

  #[test]
  fn scan_skips_known_epochs() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["epoch_100.weights", "epoch_50.weights", "notes.txt"] {
      fs::write(dir.path().join(name), b"").unwrap();
    }

    let checkpoints = scan_checkpoints(dir.path(), &[100]).unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].0, 50);
  }
}
