// 该文件是 Yunbiao （云标） 项目的一部分。
// src/chart.rs - 指标折线图
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

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use thiserror::Error;

use crate::draw::hsv_to_rgb;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;
const MARGIN_LEFT: f32 = 60.0;
const MARGIN_RIGHT: f32 = 20.0;
const MARGIN_TOP: f32 = 20.0;
const MARGIN_BOTTOM: f32 = 40.0;
const GRID_DIVISIONS: u32 = 10;

#[derive(Error, Debug)]
pub enum ChartError {
  #[error("保存图表 {path} 失败: {source}")]
  Save {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

/// 画单条折线并保存为 PNG
pub fn plot_single_series(xs: &[f64], ys: &[f64], path: &Path) -> Result<(), ChartError> {
  plot_series(xs, &[ys.to_vec()], path)
}

/// 画多条折线并保存为 PNG。
///
/// 横轴取 `xs` 的范围，纵轴从 0 到各序列最大值；每条序列分到
/// 色环上一种颜色。
pub fn plot_series(xs: &[f64], series: &[Vec<f64>], path: &Path) -> Result<(), ChartError> {
  let mut image = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([255, 255, 255]));

  let plot_w = WIDTH as f32 - MARGIN_LEFT - MARGIN_RIGHT;
  let plot_h = HEIGHT as f32 - MARGIN_TOP - MARGIN_BOTTOM;

  let (x_min, x_max) = range_of(xs);
  let y_max = series
    .iter()
    .flatten()
    .copied()
    .fold(0.0_f64, f64::max)
    .max(1e-6);

  // 网格
  let grid = Rgb([220, 220, 220]);
  for step in 0..=GRID_DIVISIONS {
    let t = step as f32 / GRID_DIVISIONS as f32;
    let x = MARGIN_LEFT + t * plot_w;
    let y = MARGIN_TOP + t * plot_h;
    draw_line_segment_mut(&mut image, (x, MARGIN_TOP), (x, MARGIN_TOP + plot_h), grid);
    draw_line_segment_mut(&mut image, (MARGIN_LEFT, y), (MARGIN_LEFT + plot_w, y), grid);
  }

  // 坐标轴
  let black = Rgb([0, 0, 0]);
  draw_line_segment_mut(
    &mut image,
    (MARGIN_LEFT, MARGIN_TOP),
    (MARGIN_LEFT, MARGIN_TOP + plot_h),
    black,
  );
  draw_line_segment_mut(
    &mut image,
    (MARGIN_LEFT, MARGIN_TOP + plot_h),
    (MARGIN_LEFT + plot_w, MARGIN_TOP + plot_h),
    black,
  );

  let to_pixel = |x: f64, y: f64| -> (f32, f32) {
    let tx = if x_max > x_min {
      ((x - x_min) / (x_max - x_min)) as f32
    } else {
      0.5
    };
    let ty = (y / y_max) as f32;
    (
      MARGIN_LEFT + tx * plot_w,
      MARGIN_TOP + (1.0 - ty.clamp(0.0, 1.0)) * plot_h,
    )
  };

  for (index, ys) in series.iter().enumerate() {
    let hue = (index as f32 / series.len().max(1) as f32) * 360.0;
    let color = hsv_to_rgb(hue, 0.8, 0.9);
    for pair in xs.iter().zip(ys.iter()).collect::<Vec<_>>().windows(2) {
      let (x0, y0) = (*pair[0].0, *pair[0].1);
      let (x1, y1) = (*pair[1].0, *pair[1].1);
      draw_line_segment_mut(&mut image, to_pixel(x0, y0), to_pixel(x1, y1), color);
    }
  }

  image.save(path).map_err(|source| ChartError::Save {
    path: path.to_path_buf(),
    source,
  })
}

fn range_of(xs: &[f64]) -> (f64, f64) {
  let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
  let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  if min.is_finite() && max.is_finite() {
    (min, max)
  } else {
    (0.0, 1.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_series_saves_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mAP.png");
    plot_single_series(&[100.0, 200.0, 300.0], &[0.1, 0.4, 0.35], &path).unwrap();

    let image = image::open(&path).unwrap();
    assert_eq!(image.width(), WIDTH);
    assert_eq!(image.height(), HEIGHT);
  }

  #[test]
  fn multi_series_saves_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("APs.png");
    plot_series(
      &[1.0, 2.0],
      &[vec![0.2, 0.3], vec![0.5, 0.4], vec![0.0, 0.9]],
      &path,
    )
    .unwrap();
    assert!(path.is_file());
  }

  #[test]
  fn single_point_does_not_panic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.png");
    plot_single_series(&[5.0], &[0.5], &path).unwrap();
  }
}
