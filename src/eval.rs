// 该文件是 Yunbiao （云标） 项目的一部分。
// src/eval.rs - COCO 风格 mAP 评估
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

use crate::annotation::coco::{CocoAnnotation, CocoDocument};

/// IOU 匹配阈值 0.50:0.05:0.95
const IOU_THRESHOLDS: [f64; 10] = [
  0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.95,
];

/// 101 点插值的召回率采样数
const RECALL_POINTS: usize = 101;

/// 一次评估的输出
#[derive(Debug, Clone)]
pub struct EvalResult {
  /// 各类别 AP 对有真值类别取平均
  pub map: f64,
  /// 类别编号（从 0 起）到 AP；没有真值的类别记 0
  pub ap_per_class: BTreeMap<u32, f64>,
}

/// 以 COCO 标准评估一组检测。
///
/// 对每个类别在十个 IOU 阈值上做贪心匹配并求 101 点插值 AP，
/// 再对阈值取平均。`iscrowd` 的真值不参与匹配。
pub fn evaluate_detections(gt: &CocoDocument, detections: &[CocoAnnotation]) -> EvalResult {
  let mut ap_per_class = BTreeMap::new();
  let mut sum = 0.0;
  let mut counted = 0usize;

  for category in &gt.categories {
    let gt_boxes: Vec<&CocoAnnotation> = gt
      .annotations
      .iter()
      .filter(|a| a.category_id == category.id && a.iscrowd == 0)
      .collect();

    let class_id = category.id.saturating_sub(1);
    if gt_boxes.is_empty() {
      ap_per_class.insert(class_id, 0.0);
      continue;
    }

    let mut dets: Vec<&CocoAnnotation> = detections
      .iter()
      .filter(|a| a.category_id == category.id)
      .collect();
    dets.sort_by(|a, b| {
      b.score
        .unwrap_or(0.0)
        .partial_cmp(&a.score.unwrap_or(0.0))
        .unwrap_or(std::cmp::Ordering::Equal)
    });

    let ap = average_precision(&gt_boxes, &dets);
    ap_per_class.insert(class_id, ap);
    sum += ap;
    counted += 1;
  }

  EvalResult {
    map: if counted > 0 { sum / counted as f64 } else { 0.0 },
    ap_per_class,
  }
}

/// 单类别 AP：对各 IOU 阈值求插值 AP 后取平均
fn average_precision(gt_boxes: &[&CocoAnnotation], dets: &[&CocoAnnotation]) -> f64 {
  if dets.is_empty() {
    return 0.0;
  }

  let mut sum = 0.0;
  for &threshold in &IOU_THRESHOLDS {
    sum += ap_at_iou(gt_boxes, dets, threshold);
  }
  sum / IOU_THRESHOLDS.len() as f64
}

fn ap_at_iou(gt_boxes: &[&CocoAnnotation], dets: &[&CocoAnnotation], threshold: f64) -> f64 {
  let mut matched = vec![false; gt_boxes.len()];
  let mut tp = vec![false; dets.len()];

  // 检测已按置信度降序，逐个贪心匹配同图像中 IOU 最大的未匹配真值
  for (det_index, det) in dets.iter().enumerate() {
    let mut best = threshold;
    let mut best_gt = None;
    for (gt_index, gt) in gt_boxes.iter().enumerate() {
      if matched[gt_index] || gt.image_id != det.image_id {
        continue;
      }
      let iou = iou_xywh(&det.bbox, &gt.bbox);
      if iou >= best {
        best = iou;
        best_gt = Some(gt_index);
      }
    }
    if let Some(gt_index) = best_gt {
      matched[gt_index] = true;
      tp[det_index] = true;
    }
  }

  // 累积精度-召回曲线
  let total_gt = gt_boxes.len() as f64;
  let mut precisions = Vec::with_capacity(dets.len());
  let mut recalls = Vec::with_capacity(dets.len());
  let mut tp_count = 0.0;
  for (index, &is_tp) in tp.iter().enumerate() {
    if is_tp {
      tp_count += 1.0;
    }
    precisions.push(tp_count / (index + 1) as f64);
    recalls.push(tp_count / total_gt);
  }

  // 精度曲线取后缀最大值，再在 101 个召回点上采样
  for index in (0..precisions.len().saturating_sub(1)).rev() {
    if precisions[index] < precisions[index + 1] {
      precisions[index] = precisions[index + 1];
    }
  }

  let mut sum = 0.0;
  for point in 0..RECALL_POINTS {
    let recall = point as f64 / (RECALL_POINTS - 1) as f64;
    let precision = recalls
      .iter()
      .position(|&r| r >= recall)
      .map(|index| precisions[index])
      .unwrap_or(0.0);
    sum += precision;
  }
  sum / RECALL_POINTS as f64
}

/// [x, y, w, h] 形式两框的交并比
fn iou_xywh(a: &[f32; 4], b: &[f32; 4]) -> f64 {
  let (ax1, ay1, ax2, ay2) = (a[0] as f64, a[1] as f64, (a[0] + a[2]) as f64, (a[1] + a[3]) as f64);
  let (bx1, by1, bx2, by2) = (b[0] as f64, b[1] as f64, (b[0] + b[2]) as f64, (b[1] + b[3]) as f64);

  let iw = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
  let ih = (ay2.min(by2) - ay1.max(by1)).max(0.0);
  let inter = iw * ih;
  let union = (ax2 - ax1) * (ay2 - ay1) + (bx2 - bx1) * (by2 - by1) - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::coco::{CocoCategory, CocoImage};

  fn gt_doc(annotations: Vec<CocoAnnotation>) -> CocoDocument {
    CocoDocument {
      images: vec![CocoImage {
        id: 0,
        file_name: "a.jpg".to_string(),
        width: 100,
        height: 100,
      }],
      annotations,
      categories: vec![CocoCategory {
        id: 1,
        name: "car".to_string(),
      }],
    }
  }

  fn annotation(id: i64, bbox: [f32; 4], score: Option<f32>) -> CocoAnnotation {
    CocoAnnotation {
      id,
      iscrowd: 0,
      image_id: 0,
      category_id: 1,
      bbox,
      area: bbox[2] * bbox[3],
      score,
    }
  }

  #[test]
  fn perfect_detections_score_one() {
    let gt = gt_doc(vec![
      annotation(1, [10.0, 10.0, 20.0, 20.0], None),
      annotation(2, [50.0, 50.0, 10.0, 10.0], None),
    ]);
    let dets = vec![
      annotation(1, [10.0, 10.0, 20.0, 20.0], Some(0.9)),
      annotation(2, [50.0, 50.0, 10.0, 10.0], Some(0.8)),
    ];

    let result = evaluate_detections(&gt, &dets);
    assert!((result.map - 1.0).abs() < 1e-9);
    assert!((result.ap_per_class[&0] - 1.0).abs() < 1e-9);
  }

  #[test]
  fn false_positive_lowers_precision() {
    let gt = gt_doc(vec![
      annotation(1, [10.0, 10.0, 20.0, 20.0], None),
      annotation(2, [50.0, 50.0, 10.0, 10.0], None),
    ]);
    // 第二高分是误检: 召回 0.5 之前精度 1, 之后 2/3
    let dets = vec![
      annotation(1, [10.0, 10.0, 20.0, 20.0], Some(0.9)),
      annotation(2, [80.0, 80.0, 5.0, 5.0], Some(0.8)),
      annotation(3, [50.0, 50.0, 10.0, 10.0], Some(0.7)),
    ];

    let result = evaluate_detections(&gt, &dets);
    let expected = (51.0 + 50.0 * (2.0 / 3.0)) / 101.0;
    assert!((result.map - expected).abs() < 1e-4);
  }

  #[test]
  fn no_detections_score_zero() {
    let gt = gt_doc(vec![annotation(1, [10.0, 10.0, 20.0, 20.0], None)]);
    let result = evaluate_detections(&gt, &[]);
    assert_eq!(result.map, 0.0);
  }

  #[test]
  fn crowd_ground_truth_is_excluded() {
    let mut crowd = annotation(1, [10.0, 10.0, 20.0, 20.0], None);
    crowd.iscrowd = 1;
    let gt = gt_doc(vec![crowd]);

    // 唯一真值是 crowd, 该类别视为无真值, mAP 无类别可平均
    let result = evaluate_detections(&gt, &[]);
    assert_eq!(result.map, 0.0);
    assert_eq!(result.ap_per_class[&0], 0.0);
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let b = [0.0, 0.0, 10.0, 10.0];
    assert!((iou_xywh(&b, &b) - 1.0).abs() < 1e-9);
    assert_eq!(iou_xywh(&b, &[20.0, 20.0, 5.0, 5.0]), 0.0);
  }
}
