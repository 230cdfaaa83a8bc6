// 该文件是 Yunbiao （云标） 项目的一部分。
// src/detector.rs - 检测器安全封装
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

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::ffi::{DarknetApi, FfiError, RawDetections};

/// 网络输入尺寸必须是该步长的倍数
pub const NETWORK_STRIDE: u32 = 32;

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error(transparent)]
  Ffi(#[from] FfiError),
  #[error("模型初始化失败: 配置 {cfg}, 权重 {weights}")]
  InitFailed { cfg: String, weights: String },
  #[error("路径含有内嵌空字符, 无法传给原生库: {0}")]
  InvalidPath(String),
  #[error("仅支持中心点形式的边界框, points = {0}")]
  UnsupportedBoxFormat(i32),
  #[error("调整网络输入尺寸失败, 错误码 {0}")]
  ResizeFailed(i32),
  #[error("原生库无法加载图像: {0}")]
  ImageLoad(String),
}

/// 检测参数
#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
  /// 置信度阈值
  pub threshold: f32,
  /// NMS IOU 阈值
  pub nms: f32,
  /// 每张图像最多保留的检测数
  pub max_dets: usize,
}

impl Default for DetectOptions {
  fn default() -> Self {
    Self {
      threshold: 0.001,
      nms: 0.45,
      max_dets: 1000,
    }
  }
}

/// 单个检测结果
#[derive(Debug, Clone)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  /// 角点形式像素坐标 [x_min, y_min, x_max, y_max]
  pub bbox: [f32; 4],
}

/// 单张图像的检测输出
#[derive(Debug, Clone)]
pub struct DetectResult {
  /// 原图宽度
  pub width: u32,
  /// 原图高度
  pub height: u32,
  pub items: Vec<Detection>,
}

/// 检测模型的抽象；批量预测按此接口驱动
pub trait Model {
  /// 调整网络输入尺寸
  fn resize(&mut self, width: u32, height: u32) -> Result<(), DetectorError>;
  /// 对单张图像运行检测
  fn detect_file(&self, path: &Path, options: &DetectOptions)
  -> Result<DetectResult, DetectorError>;
}

/// darknet 网络句柄的安全封装。
///
/// 句柄由本结构体独占，`Drop` 时释放；内部裸指针使其不可跨线程发送。
pub struct Detector {
  api: DarknetApi,
  net: *mut c_void,
}

impl Detector {
  /// 加载动态库并初始化网络
  pub fn load(library: &Path, cfg: &Path, weights: &Path) -> Result<Self, DetectorError> {
    info!("加载 darknet 动态库: {}", library.display());
    let api = DarknetApi::load(library)?;

    info!(
      "初始化模型: 配置 {}, 权重 {}",
      cfg.display(),
      weights.display()
    );
    let cfg_c = path_to_cstring(cfg)?;
    let weights_c = path_to_cstring(weights)?;
    let net = unsafe { api.init_model(&cfg_c, &weights_c) };
    if net.is_null() {
      return Err(DetectorError::InitFailed {
        cfg: cfg.display().to_string(),
        weights: weights.display().to_string(),
      });
    }

    let detector = Self { api, net };
    let (w, h) = detector.input_shape();
    debug!("模型输入尺寸: {}x{}", w, h);
    Ok(detector)
  }

  /// 当前网络输入尺寸
  pub fn input_shape(&self) -> (u32, u32) {
    let shape = unsafe { self.api.input_shape(self.net) };
    (shape.x.max(0) as u32, shape.y.max(0) as u32)
  }

  /// 调整网络输入尺寸；调用者负责把尺寸对齐到 [`NETWORK_STRIDE`]
  pub fn resize(&mut self, width: u32, height: u32) -> Result<(), DetectorError> {
    info!("调整网络输入尺寸: {}x{}", width, height);
    let code = unsafe {
      self
        .api
        .resize_network(self.net, width as c_int, height as c_int)
    };
    if code != 0 {
      return Err(DetectorError::ResizeFailed(code));
    }
    Ok(())
  }

  /// 通过原生库读取图像尺寸
  pub fn image_size(&self, path: &Path) -> Result<(u32, u32), DetectorError> {
    let path_c = path_to_cstring(path)?;
    let image = unsafe { self.api.load_image(&path_c, 0, 0) };
    let size = (image.w, image.h);
    unsafe { self.api.free_image(image) };
    if size.0 <= 0 || size.1 <= 0 {
      return Err(DetectorError::ImageLoad(path.display().to_string()));
    }
    Ok((size.0 as u32, size.1 as u32))
  }

  /// 对单张图像运行检测。
  ///
  /// letterbox 缩放与 NMS 在原生库内完成；这里把每个检测的逐类别
  /// 概率展开为独立条目，并把中心点形式的归一化坐标转为角点形式
  /// 的像素坐标。
  pub fn detect_file(
    &self,
    path: &Path,
    options: &DetectOptions,
  ) -> Result<DetectResult, DetectorError> {
    let (width, height) = self.image_size(path)?;
    let path_c = path_to_cstring(path)?;

    debug!(
      "检测图像: {} ({}x{}), 阈值 {}",
      path.display(),
      width,
      height,
      options.threshold
    );
    let raw = unsafe { self.api.detect(self.net, &path_c, options.threshold, options.nms) };
    let collected = collect_detections(&raw, width, height, options.threshold);
    unsafe { self.api.free_detections(raw.dets, raw.num) };

    let items = rank_detections(collected?, options.max_dets);
    debug!("检测到 {} 个目标", items.len());

    Ok(DetectResult {
      width,
      height,
      items,
    })
  }
}

impl Model for Detector {
  fn resize(&mut self, width: u32, height: u32) -> Result<(), DetectorError> {
    Detector::resize(self, width, height)
  }

  fn detect_file(
    &self,
    path: &Path,
    options: &DetectOptions,
  ) -> Result<DetectResult, DetectorError> {
    Detector::detect_file(self, path, options)
  }
}

impl Drop for Detector {
  fn drop(&mut self) {
    unsafe { self.api.free_model(self.net) };
  }
}

fn collect_detections(
  raw: &RawDetections,
  width: u32,
  height: u32,
  threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
  if raw.num <= 0 || raw.dets.is_null() {
    return Ok(Vec::new());
  }

  let (width, height) = (width as f32, height as f32);
  let dets = unsafe { std::slice::from_raw_parts(raw.dets, raw.num as usize) };
  let mut items = Vec::new();

  for det in dets {
    if det.points != 0 {
      return Err(DetectorError::UnsupportedBoxFormat(det.points));
    }
    if det.classes <= 0 || det.prob.is_null() {
      continue;
    }
    let probs = unsafe { std::slice::from_raw_parts(det.prob, det.classes as usize) };
    for (class_id, &score) in probs.iter().enumerate() {
      if score < threshold {
        continue;
      }
      let b = det.bbox;
      items.push(Detection {
        class_id: class_id as u32,
        score,
        bbox: [
          (b.x - b.w / 2.0) * width,
          (b.y - b.h / 2.0) * height,
          (b.x + b.w / 2.0) * width,
          (b.y + b.h / 2.0) * height,
        ],
      });
    }
  }

  Ok(items)
}

/// 超出 `max_dets` 时按置信度降序截断；未超出时保持原有顺序
pub(crate) fn rank_detections(mut items: Vec<Detection>, max_dets: usize) -> Vec<Detection> {
  if items.len() > max_dets {
    items.sort_by(|a, b| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    items.truncate(max_dets);
  }
  items
}

/// 把尺寸对齐到最近的步长倍数，至少一个步长。
///
/// 0.5 一律向上取整，与网络配置工具的习惯一致。
pub fn snap_to_stride(value: f32) -> u32 {
  let stride = NETWORK_STRIDE as f32;
  (round_half_up(value.max(0.0) / stride) * NETWORK_STRIDE).max(NETWORK_STRIDE)
}

fn round_half_up(a: f32) -> u32 {
  let i = a as u32;
  if a - i as f32 >= 0.5 { i + 1 } else { i }
}

fn path_to_cstring(path: &Path) -> Result<CString, DetectorError> {
  CString::new(path.as_os_str().as_encoded_bytes())
    .map_err(|_| DetectorError::InvalidPath(path.display().to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(score: f32) -> Detection {
    Detection {
      class_id: 0,
      score,
      bbox: [0.0, 0.0, 1.0, 1.0],
    }
  }

  #[test]
  fn snap_to_stride_rounds_half_up() {
    assert_eq!(snap_to_stride(0.0), 32);
    assert_eq!(snap_to_stride(20.0), 32);
    assert_eq!(snap_to_stride(48.0), 64); // 1.5 倍步长向上
    assert_eq!(snap_to_stride(100.0), 96);
    assert_eq!(snap_to_stride(608.0), 608);
    assert_eq!(snap_to_stride(700.0), 704);
  }

  #[test]
  fn rank_keeps_order_under_limit() {
    let items = vec![detection(0.2), detection(0.9), detection(0.5)];
    let ranked = rank_detections(items, 5);
    let scores: Vec<f32> = ranked.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.2, 0.9, 0.5]);
  }

  #[test]
  fn rank_truncates_by_score() {
    let items = vec![
      detection(0.2),
      detection(0.9),
      detection(0.5),
      detection(0.7),
    ];
    let ranked = rank_detections(items, 2);
    let scores: Vec<f32> = ranked.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.9, 0.7]);
  }

  #[test]
  fn empty_raw_detections_yield_nothing() {
    let raw = RawDetections {
      num: 0,
      dets: std::ptr::null_mut(),
    };
    let items = collect_detections(&raw, 640, 480, 0.5).unwrap();
    assert!(items.is_empty());
  }
}
