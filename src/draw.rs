// 该文件是 Yunbiao （云标） 项目的一部分。
// src/draw.rs - 检测结果绘制
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

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::dataset::ClassMap;
use crate::detector::Detection;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体 {path} 失败: {source}")]
  FontIo {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无效的字体文件: {0}")]
  FontInvalid(PathBuf),
}

/// 带标签的边界框绘制工具
#[derive(Debug)]
pub struct Draw {
  font: FontVec,
  font_scale: PxScale,
  colors: Vec<Rgb<u8>>,
}

impl Draw {
  /// 从字体文件创建，按类别数生成色环上均匀分布的颜色
  pub fn from_font_file(path: &Path, num_classes: usize) -> Result<Self, DrawError> {
    let data = fs::read(path).map_err(|source| DrawError::FontIo {
      path: path.to_path_buf(),
      source,
    })?;
    let font = FontVec::try_from_vec(data).map_err(|_| DrawError::FontInvalid(path.to_path_buf()))?;

    let num = num_classes.max(1);
    let colors = (0..num)
      .map(|i| {
        let hue = (i as f32 / num as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Ok(Self {
      font,
      font_scale: PxScale::from(16.0),
      colors,
    })
  }

  /// 把置信度不低于 `threshold` 的检测画到图像上
  pub fn draw_detections(
    &self,
    image: &mut RgbImage,
    detections: &[Detection],
    classes: &ClassMap,
    threshold: f32,
  ) {
    for detection in detections {
      if detection.score < threshold {
        continue;
      }
      let color = self.colors[detection.class_id as usize % self.colors.len()];

      let left = detection.bbox[0].max(0.0).round() as i32;
      let top = detection.bbox[1].max(0.0).round() as i32;
      let right = detection.bbox[2].min(image.width() as f32).round() as i32;
      let bottom = detection.bbox[3].min(image.height() as f32).round() as i32;
      let width = (right - left).max(0) as u32;
      let height = (bottom - top).max(0) as u32;

      if width > 0 && height > 0 {
        let rect = Rect::at(left, top).of_size(width, height);
        draw_hollow_rect_mut(image, rect, color);

        // 绘制第二个边框以增加可见度
        if width > 2 && height > 2 {
          let inner_rect = Rect::at(left + 1, top + 1).of_size(width - 2, height - 2);
          draw_hollow_rect_mut(image, inner_rect, color);
        }
      }

      let name = classes
        .get(&detection.class_id)
        .cloned()
        .unwrap_or_else(|| detection.class_id.to_string());
      let label = format!("{} {:.2}", name, detection.score);
      let text_y = (top - 20).max(0);
      draw_text_mut(image, color, left, text_y, self.font_scale, &self.font, &label);
    }
  }
}

/// HSV 转 RGB
pub(crate) fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hsv_red_and_green() {
    assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb([255, 0, 0]));
    assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb([0, 255, 0]));
  }

  #[test]
  fn missing_font_is_reported() {
    let err = Draw::from_font_file(Path::new("/no/such/font.otf"), 3).unwrap_err();
    assert!(matches!(err, DrawError::FontIo { .. }));
  }
}
