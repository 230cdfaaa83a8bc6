// 该文件是 Yunbiao （云标） 项目的一部分。
// src/bin/detect.rs - 单图检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use yunbiao::dataset;
use yunbiao::detector::{DetectOptions, Detector};
use yunbiao::draw::Draw;

/// 对单张图像运行检测并保存带框的结果图
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
  /// 待检测图像
  #[arg(long, value_name = "IMAGE")]
  pub image_file: PathBuf,
  /// 类别文件 (.names/.txt 或 COCO .json)
  #[arg(long, value_name = "CLASSES")]
  pub classes_file: Option<PathBuf>,
  /// 标签字体文件
  #[arg(long, value_name = "FONT", default_value = "font/FiraMono-Medium.otf")]
  pub font: PathBuf,
  /// 置信度阈值
  #[arg(long, default_value_t = 0.3)]
  pub threshold: f32,
  /// NMS IOU 阈值
  #[arg(long, default_value_t = 0.45)]
  pub nms: f32,
  /// 结果图输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "img.jpg")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let detector = Detector::load(&args.library, &args.config_file, &args.model_file)?;
  let options = DetectOptions {
    threshold: args.threshold,
    nms: args.nms,
    ..DetectOptions::default()
  };
  let result = detector.detect_file(&args.image_file, &options)?;
  info!("检测到 {} 个目标", result.items.len());
  for detection in &result.items {
    info!(
      "类别 {} 置信度 {:.2}: [{:.1}, {:.1}, {:.1}, {:.1}]",
      detection.class_id,
      detection.score,
      detection.bbox[0],
      detection.bbox[1],
      detection.bbox[2],
      detection.bbox[3]
    );
  }

  let classes = dataset::load_class_map(args.classes_file.as_deref(), 80)?;

  let draw = Draw::from_font_file(&args.font, classes.len())?;
  let mut image = image::open(&args.image_file)?.to_rgb8();
  draw.draw_detections(&mut image, &result.items, &classes, args.threshold);
  image.save(&args.output)?;
  info!("结果图已保存到 {}", args.output.display());

  Ok(())
}
