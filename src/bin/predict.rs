// 该文件是 Yunbiao （云标） 项目的一部分。
// src/bin/predict.rs - 批量预测
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
use tracing::info;

use yunbiao::dataset;
use yunbiao::detector::{DetectOptions, Detector};
use yunbiao::predict::{PredictFormat, PredictOptions, run_predict};

/// 对整个图像目录运行检测并写出标注文件
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
  /// 图像清单 (.txt 每行一个文件名, 或 COCO .json); 缺省取目录全部文件
  #[arg(long, value_name = "LIST")]
  pub images_file: Option<PathBuf>,
  /// 类别文件 (.names/.txt 或 COCO .json)
  #[arg(long, value_name = "CLASSES")]
  pub classes_file: Option<PathBuf>,
  /// 输出格式
  #[arg(long, value_enum, default_value_t = PredictFormat::Coco)]
  pub predict_to: PredictFormat,
  /// COCO 输出时只保存标注数组
  #[arg(long)]
  pub detections_only: bool,
  /// 置信度阈值
  #[arg(long, default_value_t = 0.001)]
  pub threshold: f32,
  /// NMS IOU 阈值
  #[arg(long, default_value_t = 0.45)]
  pub nms: f32,
  /// 每张图像最多保留的检测数
  #[arg(long, default_value_t = 1000)]
  pub max_dets: usize,
  /// 网络输入尺寸 (宽 高), 会对齐到 32 的倍数
  #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
  pub input_shape: Option<Vec<f32>>,
  /// 标注输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub out_file: PathBuf,
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

  let images = dataset::list_images(&args.images_folder, args.images_file.as_deref())?;
  info!("共 {} 张图像", images.len());

  let mut detector = Detector::load(&args.library, &args.config_file, &args.model_file)?;
  let fallback_classes = 80;
  let classes = dataset::load_class_map(args.classes_file.as_deref(), fallback_classes)?;

  let options = PredictOptions {
    format: args.predict_to,
    detections_only: args.detections_only,
    detect: DetectOptions {
      threshold: args.threshold,
      nms: args.nms,
      max_dets: args.max_dets,
    },
    input_shape: args.input_shape.as_deref().map(|shape| (shape[0], shape[1])),
  };
  run_predict(
    &mut detector,
    &images,
    &classes,
    &options,
    &args.out_file,
    Some(&stop),
  )?;

  Ok(())
}
