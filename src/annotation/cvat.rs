// 该文件是 Yunbiao （云标） 项目的一部分。
// src/annotation/cvat.rs - CVAT 标注文档
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

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use crate::dataset::ClassMap;
use crate::detector::Detection;

#[derive(Error, Debug)]
pub enum CvatError {
  #[error("写入 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone)]
pub struct CvatBox {
  pub label: String,
  pub xtl: f32,
  pub ytl: f32,
  pub xbr: f32,
  pub ybr: f32,
  pub score: f32,
}

#[derive(Debug, Clone)]
pub struct CvatImage {
  pub id: i64,
  pub name: String,
  pub width: u32,
  pub height: u32,
  pub boxes: Vec<CvatBox>,
}

/// CVAT annotation 模式的标注文档
#[derive(Debug, Clone)]
pub struct CvatDocument {
  task_size: usize,
  dumped: String,
  labels: Vec<String>,
  images: Vec<CvatImage>,
}

impl CvatDocument {
  pub fn new(images_num: usize, classes: &ClassMap) -> Self {
    Self {
      task_size: images_num,
      dumped: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
      labels: classes.values().cloned().collect(),
      images: Vec::new(),
    }
  }

  pub fn add_image(
    &mut self,
    image_id: i64,
    name: &str,
    width: u32,
    height: u32,
    detections: &[Detection],
    classes: &ClassMap,
  ) {
    let boxes = detections
      .iter()
      .map(|det| {
        let (left, top, right, bottom) = super::clamp_corner(&det.bbox, width, height);
        CvatBox {
          label: classes
            .get(&det.class_id)
            .cloned()
            .unwrap_or_else(|| det.class_id.to_string()),
          xtl: left,
          ytl: top,
          xbr: right,
          ybr: bottom,
          score: det.score,
        }
      })
      .collect();

    self.images.push(CvatImage {
      id: image_id,
      name: name.to_string(),
      width,
      height,
      boxes,
    });
  }

  /// 生成两空格缩进的 XML 文本
  pub fn to_xml_string(&self) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<annotations>\n");
    out.push_str("  <meta>\n");
    out.push_str("    <task>\n");
    let _ = writeln!(out, "      <size>{}</size>", self.task_size);
    out.push_str("      <mode>annotation</mode>\n");
    out.push_str("      <overlap>0</overlap>\n");
    out.push_str("      <flipped>False</flipped>\n");
    let _ = writeln!(out, "      <dumped>{}</dumped>", escape_xml(&self.dumped));
    out.push_str("      <labels>\n");
    for label in &self.labels {
      out.push_str("        <label>\n");
      let _ = writeln!(out, "          <name>{}</name>", escape_xml(label));
      out.push_str("        </label>\n");
    }
    out.push_str("      </labels>\n");
    out.push_str("    </task>\n");
    out.push_str("  </meta>\n");
    for image in &self.images {
      let _ = writeln!(
        out,
        "  <image id=\"{}\" name=\"{}\" width=\"{}\" height=\"{}\">",
        image.id,
        escape_xml(&image.name),
        image.width,
        image.height
      );
      // 坐标与分数按原值输出, 不做精度截断
      for bbox in &image.boxes {
        let _ = writeln!(
          out,
          "    <box label=\"{}\" occluded=\"0\" xtl=\"{}\" ytl=\"{}\" \
           xbr=\"{}\" ybr=\"{}\" score=\"{}\"/>",
          escape_xml(&bbox.label),
          bbox.xtl,
          bbox.ytl,
          bbox.xbr,
          bbox.ybr,
          bbox.score
        );
      }
      out.push_str("  </image>\n");
    }
    out.push_str("</annotations>\n");
    out
  }

  pub fn save(&self, path: &Path) -> Result<(), CvatError> {
    fs::write(path, self.to_xml_string()).map_err(|source| CvatError::Io {
      path: path.to_path_buf(),
      source,
    })
  }
}

fn escape_xml(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for ch in text.chars() {
    match ch {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&apos;"),
      _ => escaped.push(ch),
    }
  }
  escaped
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classes() -> ClassMap {
    [(0, "car".to_string()), (1, "person".to_string())]
      .into_iter()
      .collect()
  }

  #[test]
  fn document_lists_labels_in_class_order() {
    let document = CvatDocument::new(3, &classes());
    let xml = document.to_xml_string();
    assert!(xml.contains("<size>3</size>"));
    assert!(xml.contains("<mode>annotation</mode>"));
    let car = xml.find("<name>car</name>").unwrap();
    let person = xml.find("<name>person</name>").unwrap();
    assert!(car < person);
  }

  #[test]
  fn boxes_are_clamped_and_labeled() {
    let mut document = CvatDocument::new(1, &classes());
    document.add_image(
      0,
      "a.jpg",
      100,
      80,
      &[Detection {
        class_id: 1,
        score: 0.5,
        bbox: [-5.0, 10.0, 120.0, 70.0],
      }],
      &classes(),
    );

    let xml = document.to_xml_string();
    assert!(xml.contains("<image id=\"0\" name=\"a.jpg\" width=\"100\" height=\"80\">"));
    assert!(xml.contains("label=\"person\""));
    assert!(xml.contains("xtl=\"0\""));
    assert!(xml.contains("xbr=\"100\""));
    assert!(xml.contains("ybr=\"70\""));
    assert!(xml.contains("score=\"0.5\""));
  }

  #[test]
  fn box_values_keep_full_precision() {
    let mut document = CvatDocument::new(1, &classes());
    document.add_image(
      0,
      "a.jpg",
      100,
      100,
      &[Detection {
        class_id: 0,
        score: 0.123456789,
        bbox: [1.25, 2.5, 3.75, 4.125],
      }],
      &classes(),
    );

    let xml = document.to_xml_string();
    assert!(xml.contains("xtl=\"1.25\""));
    assert!(xml.contains("ybr=\"4.125\""));
    assert!(xml.contains(&format!("score=\"{}\"", 0.123456789_f32)));
  }

  #[test]
  fn xml_text_is_escaped() {
    let classes: ClassMap = [(0, "a&b".to_string())].into_iter().collect();
    let mut document = CvatDocument::new(1, &classes);
    document.add_image(
      0,
      "<odd>.jpg",
      10,
      10,
      &[Detection {
        class_id: 0,
        score: 1.0,
        bbox: [0.0, 0.0, 1.0, 1.0],
      }],
      &classes,
    );

    let xml = document.to_xml_string();
    assert!(xml.contains("<name>a&amp;b</name>"));
    assert!(xml.contains("name=\"&lt;odd&gt;.jpg\""));
    assert!(!xml.contains("<odd>.jpg"));
  }
}
