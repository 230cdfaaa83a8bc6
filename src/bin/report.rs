// 该文件是 Yunbiao （云标） 项目的一部分。
// src/bin/report.rs - 检查点训练报告
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;

use yunbiao::report::{ReportConfig, ReportOptions, run_report};

/// 对模型目录下的全部检查点计算 mAP 并生成趋势图
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// darknet 动态库路径
  #[arg(long, value_name = "LIBRARY", default_value = "./libdarknet.so")]
  pub library: PathBuf,
  /// 网络配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config_file: PathBuf,
  /// 检查点目录 (epoch_N.weights)
  #[arg(long, value_name = "FOLDER")]
  pub models_folder: PathBuf,
  /// 报告输出目录
  #[arg(long, value_name = "FOLDER")]
  pub report_folder: PathBuf,
  /// 图像目录
  #[arg(long, value_name = "FOLDER")]
  pub images_folder: PathBuf,
  /// COCO 真值标注文件
  #[arg(long, value_name = "ANNOTATIONS")]
  pub annotations_file: PathBuf,
  /// 统计时保留的框面积范围 [min, max); max 为负时视为无上限
  #[arg(long, num_args = 2, value_names = ["MIN", "MAX"],
        allow_negative_numbers = true, default_values_t = [0.0, 1e10])]
  pub area: Vec<f64>,
  /// 面积换算用的等效图像尺寸 (宽 高)
  #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
  pub shape: Option<Vec<u32>>,
  /// 叠加到已有的 metrics.csv 上, 只评估新的检查点
  #[arg(long)]
  pub add: bool,
  /// 已有检测文件时跳过预测
  #[arg(long = "dont-repredict", action = clap::ArgAction::SetFalse)]
  pub repredict: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let stop = Arc::new(AtomicBool::new(false));
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      stop.store(true, Ordering::Relaxed);
    })?;
  }

  let config = ReportConfig {
    library: &args.library,
    config_file: &args.config_file,
    models_folder: &args.models_folder,
    report_folder: &args.report_folder,
    images_folder: &args.images_folder,
    annotations_file: &args.annotations_file,
  };
  let options = ReportOptions {
    area: (args.area[0], args.area[1]),
    shape: args.shape.as_deref().map(|shape| (shape[0], shape[1])),
    add: args.add,
    repredict: args.repredict,
  };
  run_report(&config, &options, Some(&stop))?;

  Ok(())
}
