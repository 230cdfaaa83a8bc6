// 该文件是 Yunbiao （云标） 项目的一部分。
// src/bin/visualizer.rs - 交互式预览
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::info;

use yunbiao::dataset;
use yunbiao::detector::Detector;
use yunbiao::visualizer::VisualizerApp;

/// 浏览图像目录并交互调节检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// darknet 动态库路径
  #[arg(long, value_name = "LIBRARY", default_value = "./libdarknet.so")]
  pub library: PathBuf,
  /// 网络配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config_file: PathBuf,
  /// 权重文件
  #[arg(long, value_name = "WEIGHTS")]
  pub model_file: PathBuf,
  /// 图像目录
  #[arg(long, value_name = "FOLDER")]
  pub images_folder: PathBuf,
  /// 图像清单 (.txt 或 COCO .json); 缺省取目录全部文件
  #[arg(long, value_name = "LIST")]
  pub images_file: Option<PathBuf>,
  /// 类别文件 (.names/.txt 或 COCO .json)
  #[arg(long, value_name = "CLASSES")]
  pub classes_file: Option<PathBuf>,
  /// 预览区宽度
  #[arg(long, default_value_t = 700.0)]
  pub window_width: f32,
  /// 预览区高度
  #[arg(long, default_value_t = 500.0)]
  pub window_height: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let images = dataset::list_images(&args.images_folder, args.images_file.as_deref())?;
  info!("共 {} 张图像", images.len());
  let classes = dataset::load_class_map(args.classes_file.as_deref(), 80)?;
  let detector = Detector::load(&args.library, &args.config_file, &args.model_file)?;

  let app = VisualizerApp::new(detector, classes, images);
  let native_options = eframe::NativeOptions {
    viewport: eframe::egui::ViewportBuilder::default()
      .with_inner_size([args.window_width + 260.0, args.window_height]),
    ..Default::default()
  };
  eframe::run_native(
    "云标预览",
    native_options,
    Box::new(|_cc| Ok(Box::new(app) as Box<dyn eframe::App>)),
  )
  .map_err(|err| anyhow!("窗口运行失败: {err}"))?;

  Ok(())
}
