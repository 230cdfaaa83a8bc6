// 该文件是 Yunbiao （云标） 项目的一部分。
// src/visualizer/app.rs - 预览窗口
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

use std::time::Instant;

use eframe::egui::{
  self, Color32, ColorImage, Rect, Sense, Stroke, TextureHandle, TextureOptions, Vec2, pos2, vec2,
};
use image::imageops::FilterType;
use tracing::{error, info};

use crate::dataset::{ClassMap, ImageEntry};
use crate::detector::{DetectOptions, Detection, Detector, snap_to_stride};

/// 滚轮一格的缩放比
const ZOOM_IN: f32 = 1.25;
const ZOOM_OUT: f32 = 0.8;

/// 交互式检测预览。
///
/// 左侧面板切换图像、调节阈值与网络输入尺寸；调整任一控件后
/// 同步重新检测并刷新预览。
pub struct VisualizerApp {
  detector: Detector,
  classes: ClassMap,
  images: Vec<ImageEntry>,
  current: usize,
  /// 置信度阈值
  threshold: f32,
  /// 网络输入尺寸滑块档位, 50 为基准尺寸
  size_value: u32,
  /// 基准网络输入尺寸
  base_shape: (u32, u32),
  /// 预览图相对原图的缩放百分比
  scale_percent: u32,
  texture: Option<TextureHandle>,
  /// 预览图像素尺寸
  preview_size: (u32, u32),
  /// 原图宽度, 用于把框坐标换算到预览图
  original_width: u32,
  detections: Vec<Detection>,
  /// 滚轮缩放计数, 小于等于 0 时回到适应窗口
  zoom_steps: i32,
  zoom: f32,
  pan: Vec2,
  needs_refresh: bool,
  last_infer_ms: f64,
  status: String,
}

impl VisualizerApp {
  pub fn new(detector: Detector, classes: ClassMap, images: Vec<ImageEntry>) -> Self {
    let base_shape = detector.input_shape();
    Self {
      detector,
      classes,
      images,
      current: 0,
      threshold: 0.4,
      size_value: 50,
      base_shape,
      scale_percent: 100,
      texture: None,
      preview_size: (0, 0),
      original_width: 0,
      detections: Vec::new(),
      zoom_steps: 0,
      zoom: 1.0,
      pan: Vec2::ZERO,
      needs_refresh: true,
      last_infer_ms: 0.0,
      status: String::new(),
    }
  }

  /// 当前控件状态对应的网络输入尺寸
  fn network_shape(&self) -> (u32, u32) {
    let scale = input_scale(self.size_value);
    (
      snap_to_stride(self.base_shape.0 as f32 * scale),
      snap_to_stride(self.base_shape.1 as f32 * scale),
    )
  }

  /// 重新检测当前图像并重建预览纹理
  fn refresh(&mut self, ctx: &egui::Context) {
    self.needs_refresh = false;
    self.zoom_steps = 0;
    self.zoom = 1.0;
    self.pan = Vec2::ZERO;

    let Some(entry) = self.images.get(self.current) else {
      self.status = "没有可预览的图像".to_string();
      return;
    };
    let entry = entry.clone();

    let (w, h) = self.network_shape();
    if let Err(err) = self.detector.resize(w, h) {
      error!("调整网络输入尺寸失败: {err}");
      self.status = err.to_string();
      return;
    }

    let options = DetectOptions {
      threshold: self.threshold,
      nms: 0.45,
      max_dets: 1000,
    };
    let start = Instant::now();
    let result = match self.detector.detect_file(&entry.path, &options) {
      Ok(result) => result,
      Err(err) => {
        error!("检测 {} 失败: {err}", entry.name);
        self.status = err.to_string();
        return;
      }
    };
    self.last_infer_ms = start.elapsed().as_secs_f64() * 1000.0;
    info!(
      "{}: {} 个目标, {:.1} ms",
      entry.name,
      result.items.len(),
      self.last_infer_ms
    );

    let loaded = match image::open(&entry.path) {
      Ok(loaded) => loaded.to_rgb8(),
      Err(err) => {
        error!("读取 {} 失败: {err}", entry.name);
        self.status = err.to_string();
        return;
      }
    };

    let image_scale = self.scale_percent as f32 / 100.0;
    let preview_w = ((loaded.width() as f32 * image_scale) as u32).max(1);
    let preview_h = ((loaded.height() as f32 * image_scale) as u32).max(1);
    let preview = if (preview_w, preview_h) == loaded.dimensions() {
      loaded
    } else {
      image::imageops::resize(&loaded, preview_w, preview_h, FilterType::Triangle)
    };

    let color_image = ColorImage::from_rgb(
      [preview.width() as usize, preview.height() as usize],
      preview.as_raw(),
    );
    self.texture = Some(ctx.load_texture("preview", color_image, TextureOptions::LINEAR));
    self.preview_size = (preview_w, preview_h);
    self.original_width = result.width;
    self.detections = result.items;
    self.status = format!("{} ({}/{})", entry.name, self.current + 1, self.images.len());
  }

  fn controls(&mut self, ui: &mut egui::Ui) {
    ui.horizontal(|ui| {
      if ui.button("上一张").clicked() && !self.images.is_empty() {
        self.current = (self.current + self.images.len() - 1) % self.images.len();
        self.needs_refresh = true;
      }
      if ui.button("下一张").clicked() && !self.images.is_empty() {
        self.current = (self.current + 1) % self.images.len();
        self.needs_refresh = true;
      }
    });
    ui.separator();

    ui.label("置信度阈值");
    if ui
      .add(egui::Slider::new(&mut self.threshold, 0.0..=1.0))
      .changed()
    {
      self.needs_refresh = true;
    }

    let (w, h) = self.network_shape();
    ui.label(format!(
      "网络输入 {} x {} (x{:.2})",
      w,
      h,
      input_scale(self.size_value)
    ));
    if ui
      .add(egui::Slider::new(&mut self.size_value, 0..=100))
      .changed()
    {
      self.needs_refresh = true;
    }

    ui.label(format!("预览缩放 {}%", self.scale_percent));
    if ui
      .add(egui::Slider::new(&mut self.scale_percent, 1..=100))
      .changed()
    {
      self.needs_refresh = true;
    }

    ui.separator();
    ui.label(format!("推理耗时 {:.1} ms", self.last_infer_ms));
    ui.label(&self.status);

    ui.separator();
    egui::ScrollArea::vertical().show(ui, |ui| {
      for detection in &self.detections {
        if detection.score < self.threshold {
          continue;
        }
        let name = self
          .classes
          .get(&detection.class_id)
          .cloned()
          .unwrap_or_else(|| detection.class_id.to_string());
        ui.label(format!("{} {:.2}", name, detection.score));
      }
    });
  }

  fn preview(&mut self, ui: &mut egui::Ui) {
    let (response, painter) =
      ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
    painter.rect_filled(response.rect, 0.0, Color32::BLACK);

    let Some(texture) = &self.texture else {
      return;
    };
    let (preview_w, preview_h) = (self.preview_size.0 as f32, self.preview_size.1 as f32);
    if preview_w <= 0.0 || preview_h <= 0.0 {
      return;
    }

    // 滚轮缩放, 计数回到 0 及以下时复位为适应窗口
    if response.hovered() {
      let scroll = ui.input(|input| input.raw_scroll_delta.y);
      if scroll > 0.0 {
        self.zoom_steps += 1;
        self.zoom *= ZOOM_IN;
      } else if scroll < 0.0 {
        self.zoom_steps -= 1;
        self.zoom *= ZOOM_OUT;
      }
      if self.zoom_steps <= 0 {
        self.zoom_steps = 0;
        self.zoom = 1.0;
        self.pan = Vec2::ZERO;
      }
    }
    if response.dragged() {
      self.pan += response.drag_delta();
    }

    let fit = (response.rect.width() / preview_w)
      .min(response.rect.height() / preview_h)
      .min(1.0);
    let shown = vec2(preview_w, preview_h) * fit * self.zoom;
    let center = response.rect.center() + self.pan;
    let image_rect = Rect::from_center_size(center, shown);

    painter.image(
      texture.id(),
      image_rect,
      Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
      Color32::WHITE,
    );

    // 框坐标从原图换算到屏幕
    let scale_factor = image_rect.width() / self.original_width.max(1) as f32;
    let stroke = Stroke::new(1.0, Color32::RED);
    for detection in &self.detections {
      if detection.score < self.threshold {
        continue;
      }
      let Some((left, top, right, bottom)) =
        preview_box(&detection.bbox, scale_factor, image_rect.width(), image_rect.height())
      else {
        continue;
      };
      let rect = Rect::from_min_max(
        pos2(image_rect.min.x + left, image_rect.min.y + top),
        pos2(image_rect.min.x + right, image_rect.min.y + bottom),
      );
      painter.rect_stroke(rect, 0.0, stroke);
    }
  }
}

impl eframe::App for VisualizerApp {
  fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
    if self.needs_refresh {
      self.refresh(ctx);
    }

    egui::SidePanel::left("controls")
      .resizable(false)
      .exact_width(240.0)
      .show(ctx, |ui| self.controls(ui));
    egui::CentralPanel::default().show(ctx, |ui| self.preview(ui));
  }
}

/// 输入尺寸滑块档位到缩放比。
///
/// 50 及以上线性放大到 2 倍, 50 以下线性缩小到 0.5 倍。
pub(crate) fn input_scale(value: u32) -> f32 {
  if value >= 50 {
    (value - 50) as f32 / 50.0 + 1.0
  } else {
    value as f32 / 100.0 + 0.5
  }
}

/// 把原图坐标的框换算到预览视口, 裁剪并取整。
///
/// 裁剪后退化成点或线的框丢弃；不足一个像素的视口画不下任何框。
pub(crate) fn preview_box(
  bbox: &[f32; 4],
  scale: f32,
  view_w: f32,
  view_h: f32,
) -> Option<(f32, f32, f32, f32)> {
  if view_w < 1.0 || view_h < 1.0 {
    return None;
  }
  let left = (bbox[0] * scale).clamp(0.0, view_w - 1.0).round();
  let top = (bbox[1] * scale).clamp(0.0, view_h - 1.0).round();
  let right = (bbox[2] * scale).clamp(0.0, view_w - 1.0).round();
  let bottom = (bbox[3] * scale).clamp(0.0, view_h - 1.0).round();
  if right <= left || bottom <= top {
    return None;
  }
  Some((left, top, right, bottom))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scale_is_linear_on_both_sides() {
    assert_eq!(input_scale(50), 1.0);
    assert_eq!(input_scale(100), 2.0);
    assert_eq!(input_scale(0), 0.5);
    assert_eq!(input_scale(75), 1.5);
    assert_eq!(input_scale(25), 0.75);
  }

  #[test]
  fn preview_box_scales_and_clamps() {
    let bbox = [10.0, 20.0, 30.0, 40.0];
    let scaled = preview_box(&bbox, 2.0, 100.0, 100.0).unwrap();
    assert_eq!(scaled, (20.0, 40.0, 60.0, 80.0));

    let clamped = preview_box(&[-5.0, -5.0, 500.0, 500.0], 1.0, 100.0, 80.0).unwrap();
    assert_eq!(clamped, (0.0, 0.0, 99.0, 79.0));
  }

  #[test]
  fn sub_pixel_viewport_yields_no_boxes() {
    // 窗口被拖到极窄时预览区可能不足一个像素, 不能触发 clamp 的
    // min > max 断言
    let bbox = [10.0, 20.0, 30.0, 40.0];
    assert!(preview_box(&bbox, 1.0, 0.5, 100.0).is_none());
    assert!(preview_box(&bbox, 1.0, 100.0, 0.0).is_none());
  }

  #[test]
  fn degenerate_preview_box_is_dropped() {
    // 完全在视口右侧, 裁剪后宽度为零
    assert!(preview_box(&[200.0, 10.0, 250.0, 20.0], 1.0, 100.0, 100.0).is_none());
  }
}
