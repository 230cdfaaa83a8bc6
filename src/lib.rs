// 该文件是 Yunbiao （云标） 项目的一部分。
// src/lib.rs - 库主文件
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

//! 云标 (Yunbiao): darknet 模型的批量标注与评估工具集。
//!
//! 通过动态加载 libdarknet 运行检测，把结果写成 COCO 或 CVAT
//! 标注，对训练检查点生成 mAP 报告，并提供交互式预览窗口。

pub mod annotation;
pub mod chart;
pub mod dataset;
pub mod detector;
pub mod draw;
pub mod eval;
pub mod ffi;
pub mod predict;
pub mod report;
#[cfg(feature = "gui")]
pub mod visualizer;
