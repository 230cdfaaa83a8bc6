// 该文件是 Yunbiao （云标） 项目的一部分。
// src/predict.rs - 批量预测
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

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::ValueEnum;
use thiserror::Error;
use tracing::{info, warn};

use crate::annotation::coco::{CocoBuilder, CocoDocument, CocoError};
use crate::annotation::cvat::{CvatDocument, CvatError};
use crate::dataset::{ClassMap, ImageEntry};
use crate::detector::{DetectOptions, DetectorError, Model, snap_to_stride};

/// 预测输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PredictFormat {
  Coco,
  Cvat,
}

/// 一次批量预测的参数
#[derive(Debug, Clone)]
pub struct PredictOptions {
  pub format: PredictFormat,
  /// COCO 输出时只保存标注数组
  pub detections_only: bool,
  pub detect: DetectOptions,
  /// 给定时先把网络输入调整到该尺寸（对齐到步长）
  pub input_shape: Option<(f32, f32)>,
}

#[derive(Error, Debug)]
pub enum PredictError {
  #[error(transparent)]
  Detector(#[from] DetectorError),
  #[error(transparent)]
  Coco(#[from] CocoError),
  #[error(transparent)]
  Cvat(#[from] CvatError),
}

/// 生成的标注文档
pub enum PredictDocument {
  Coco(CocoDocument),
  Cvat(CvatDocument),
}

impl PredictDocument {
  pub fn save(&self, path: &Path, detections_only: bool) -> Result<(), PredictError> {
    match self {
      PredictDocument::Coco(document) => {
        if detections_only {
          document.save_annotations(path)?;
        } else {
          document.save(path)?;
        }
      }
      PredictDocument::Cvat(document) => document.save(path)?,
    }
    Ok(())
  }
}

enum DocumentBuilder {
  Coco(CocoBuilder),
  Cvat(CvatDocument),
}

impl DocumentBuilder {
  fn new(format: PredictFormat, images_num: usize, classes: &ClassMap) -> Self {
    match format {
      PredictFormat::Coco => DocumentBuilder::Coco(CocoBuilder::new(classes)),
      PredictFormat::Cvat => DocumentBuilder::Cvat(CvatDocument::new(images_num, classes)),
    }
  }

  fn add_image(
    &mut self,
    entry: &ImageEntry,
    width: u32,
    height: u32,
    detections: &[crate::detector::Detection],
    classes: &ClassMap,
  ) {
    match self {
      DocumentBuilder::Coco(builder) => {
        builder.add_image(entry.id, &entry.name, width, height, detections);
      }
      DocumentBuilder::Cvat(document) => {
        document.add_image(entry.id, &entry.name, width, height, detections, classes);
      }
    }
  }

  fn finish(self) -> PredictDocument {
    match self {
      DocumentBuilder::Coco(builder) => PredictDocument::Coco(builder.finish()),
      DocumentBuilder::Cvat(document) => PredictDocument::Cvat(document),
    }
  }
}

/// 对整批图像运行检测并把结果写成标注文件。
///
/// `stop` 给出时每张图像前检查一次，置位则放弃剩余图像并保存
/// 已完成的部分。
pub fn run_predict(
  detector: &mut impl Model,
  images: &[ImageEntry],
  classes: &ClassMap,
  options: &PredictOptions,
  out_file: &Path,
  stop: Option<&AtomicBool>,
) -> Result<(), PredictError> {
  if let Some((w, h)) = options.input_shape {
    detector.resize(snap_to_stride(w), snap_to_stride(h))?;
  }

  let mut builder = DocumentBuilder::new(options.format, images.len(), classes);
  for (index, entry) in images.iter().enumerate() {
    if let Some(flag) = stop {
      if flag.load(Ordering::Relaxed) {
        warn!("收到中断信号, 保存已完成的 {} 张图像后退出", index);
        break;
      }
    }

    let result = detector.detect_file(&entry.path, &options.detect)?;
    info!(
      "({}/{}) {}: 检测到 {} 个目标",
      index + 1,
      images.len(),
      entry.name,
      result.items.len()
    );
    builder.add_image(entry, result.width, result.height, &result.items, classes);
  }

  let document = builder.finish();
  document.save(out_file, options.detections_only)?;
  info!("标注已写入 {}", out_file.display());
  Ok(())
}
