// 该文件是 Yunbiao （云标） 项目的一部分。
// src/annotation/mod.rs - 标注文档模块
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

pub mod coco;
pub mod cvat;

/// 把角点形式的框裁剪到图像范围内，返回 (left, top, right, bottom)
pub(crate) fn clamp_corner(bbox: &[f32; 4], width: u32, height: u32) -> (f32, f32, f32, f32) {
  (
    bbox[0].max(0.0),
    bbox[1].max(0.0),
    bbox[2].min(width as f32),
    bbox[3].min(height as f32),
  )
}
