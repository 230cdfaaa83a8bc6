// 该文件是 Yunbiao （云标） 项目的一部分。
// src/annotation/coco.rs - COCO 标注文档
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
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::ClassMap;
use crate::detector::Detection;

#[derive(Error, Debug)]
pub enum CocoError {
  #[error("读写 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("序列化 {path} 失败: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoDocument {
  #[serde(default)]
  pub images: Vec<CocoImage>,
  #[serde(default)]
  pub annotations: Vec<CocoAnnotation>,
  #[serde(default)]
  pub categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoImage {
  pub id: i64,
  pub file_name: String,
  #[serde(default)]
  pub width: u32,
  #[serde(default)]
  pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
  pub id: i64,
  #[serde(default)]
  pub iscrowd: i32,
  pub image_id: i64,
  pub category_id: u32,
  /// [左上 x, 左上 y, 宽, 高]
  pub bbox: [f32; 4],
  #[serde(default)]
  pub area: f32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoCategory {
  pub id: u32,
  pub name: String,
}

/// 逐图像累积预测的 COCO 文档构造器。
///
/// 类别编号写入时加一（COCO 的类别从 1 起），标注编号从 1 起连续。
pub struct CocoBuilder {
  document: CocoDocument,
}

impl CocoBuilder {
  pub fn new(classes: &ClassMap) -> Self {
    let categories = classes
      .iter()
      .map(|(id, name)| CocoCategory {
        id: id + 1,
        name: name.clone(),
      })
      .collect();

    Self {
      document: CocoDocument {
        images: Vec::new(),
        annotations: Vec::new(),
        categories,
      },
    }
  }

  pub fn add_image(
    &mut self,
    image_id: i64,
    name: &str,
    width: u32,
    height: u32,
    detections: &[Detection],
  ) {
    self.document.images.push(CocoImage {
      id: image_id,
      file_name: name.to_string(),
      width,
      height,
    });

    for det in detections {
      let (left, top, right, bottom) = super::clamp_corner(&det.bbox, width, height);
      let id = self
        .document
        .annotations
        .last()
        .map(|annotation| annotation.id + 1)
        .unwrap_or(1);
      let bbox = [left, top, right - left, bottom - top];
      self.document.annotations.push(CocoAnnotation {
        id,
        iscrowd: 0,
        image_id,
        category_id: det.class_id + 1,
        bbox,
        area: bbox[2] * bbox[3],
        score: Some(det.score),
      });
    }
  }

  pub fn finish(self) -> CocoDocument {
    self.document
  }
}

impl CocoDocument {
  pub fn load(path: &Path) -> Result<Self, CocoError> {
    let file = File::open(path).map_err(|source| CocoError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| CocoError::Json {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn save(&self, path: &Path) -> Result<(), CocoError> {
    write_json(path, self)
  }

  /// 只保存标注数组（检测结果文件）
  pub fn save_annotations(&self, path: &Path) -> Result<(), CocoError> {
    write_json(path, &self.annotations)
  }
}

/// 读取只含标注数组的检测结果文件
pub fn load_annotations(path: &Path) -> Result<Vec<CocoAnnotation>, CocoError> {
  let file = File::open(path).map_err(|source| CocoError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_reader(BufReader::new(file)).map_err(|source| CocoError::Json {
    path: path.to_path_buf(),
    source,
  })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CocoError> {
  let file = File::create(path).map_err(|source| CocoError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|source| CocoError::Json {
    path: path.to_path_buf(),
    source,
  })
}

/// 按面积范围过滤标注框。
///
/// 指定 `shape` 时，先把框按 “图像缩放到该尺寸” 等效换算再计算
/// 面积；面积落在 `[min, max)` 之外的标注被剔除。
pub fn retain_boxes(
  images: &[CocoImage],
  annotations: &mut Vec<CocoAnnotation>,
  area: (f64, f64),
  shape: Option<(u32, u32)>,
) {
  let sizes: BTreeMap<i64, (u32, u32)> = images
    .iter()
    .map(|image| (image.id, (image.width, image.height)))
    .collect();

  annotations.retain(|annotation| {
    let (mut w, mut h) = (annotation.bbox[2] as f64, annotation.bbox[3] as f64);
    if let (Some((target_w, target_h)), Some(&(image_w, image_h))) =
      (shape, sizes.get(&annotation.image_id))
    {
      if image_w > 0 && image_h > 0 {
        w *= target_w as f64 / image_w as f64;
        h *= target_h as f64 / image_h as f64;
      }
    }
    let box_area = w * h;
    box_area >= area.0 && box_area < area.1
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classes() -> ClassMap {
    [(0, "car".to_string()), (1, "person".to_string())]
      .into_iter()
      .collect()
  }

  fn detection(class_id: u32, score: f32, bbox: [f32; 4]) -> Detection {
    Detection {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn builder_numbers_annotations_from_one() {
    let mut builder = CocoBuilder::new(&classes());
    builder.add_image(
      0,
      "a.jpg",
      100,
      100,
      &[
        detection(0, 0.9, [10.0, 10.0, 20.0, 20.0]),
        detection(1, 0.5, [30.0, 30.0, 50.0, 60.0]),
      ],
    );
    builder.add_image(1, "b.jpg", 100, 100, &[detection(0, 0.7, [0.0, 0.0, 5.0, 5.0])]);

    let document = builder.finish();
    assert_eq!(document.categories[1].id, 2);
    let ids: Vec<i64> = document.annotations.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(document.annotations[1].category_id, 2);
    assert_eq!(document.annotations[1].bbox, [30.0, 30.0, 20.0, 30.0]);
    assert_eq!(document.annotations[1].area, 600.0);
  }

  #[test]
  fn builder_clamps_boxes_to_image() {
    let mut builder = CocoBuilder::new(&classes());
    builder.add_image(
      0,
      "a.jpg",
      100,
      80,
      &[detection(0, 0.9, [-10.0, -5.0, 120.0, 90.0])],
    );

    let document = builder.finish();
    assert_eq!(document.annotations[0].bbox, [0.0, 0.0, 100.0, 80.0]);
  }

  #[test]
  fn document_round_trips_through_json() {
    let mut builder = CocoBuilder::new(&classes());
    builder.add_image(3, "a.jpg", 64, 64, &[detection(1, 0.25, [1.0, 2.0, 3.0, 4.0])]);
    let document = builder.finish();

    let text = serde_json::to_string(&document).unwrap();
    let parsed: CocoDocument = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.annotations, document.annotations);
    assert_eq!(parsed.images[0].file_name, "a.jpg");
  }

  #[test]
  fn retain_boxes_filters_by_area() {
    let images = vec![CocoImage {
      id: 0,
      file_name: "a.jpg".to_string(),
      width: 100,
      height: 100,
    }];
    let mut annotations = vec![
      CocoAnnotation {
        id: 1,
        iscrowd: 0,
        image_id: 0,
        category_id: 1,
        bbox: [0.0, 0.0, 2.0, 2.0],
        area: 4.0,
        score: None,
      },
      CocoAnnotation {
        id: 2,
        iscrowd: 0,
        image_id: 0,
        category_id: 1,
        bbox: [0.0, 0.0, 50.0, 50.0],
        area: 2500.0,
        score: None,
      },
    ];

    retain_boxes(&images, &mut annotations, (100.0, 1e10), None);
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].id, 2);
  }

  #[test]
  fn retain_boxes_rescales_with_shape() {
    let images = vec![CocoImage {
      id: 0,
      file_name: "a.jpg".to_string(),
      width: 100,
      height: 100,
    }];
    let mut annotations = vec![CocoAnnotation {
      id: 1,
      iscrowd: 0,
      image_id: 0,
      category_id: 1,
      bbox: [0.0, 0.0, 10.0, 10.0],
      area: 100.0,
      score: None,
    }];

    // 等效缩放到 200x200 后面积放大四倍
    retain_boxes(&images, &mut annotations, (300.0, 1e10), Some((200, 200)));
    assert_eq!(annotations.len(), 1);

    retain_boxes(&images, &mut annotations, (500.0, 1e10), Some((200, 200)));
    assert!(annotations.is_empty());
  }
}
