// 该文件是 Yunbiao （云标） 项目的一部分。
// src/ffi.rs - darknet 原生接口声明
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

use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int, c_void};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// 平台原生符号；有效性由同一结构体中的 `Library` 保证
type RawSymbol<T> = libloading::os::unix::Symbol<T>;

/// 中心点形式的边界框，坐标相对于图像尺寸归一化
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBox {
  pub x: c_float,
  pub y: c_float,
  pub w: c_float,
  pub h: c_float,
}

#[repr(C)]
#[derive(Debug)]
pub struct RawDetection {
  pub bbox: RawBox,
  pub classes: c_int,
  pub prob: *mut c_float,
  pub mask: *mut c_float,
  pub objectness: c_float,
  pub sort_class: c_int,
  pub uc: *mut c_float,
  /// 非零表示角点形式输出，本工具不支持
  pub points: c_int,
}

#[repr(C)]
#[derive(Debug)]
pub struct RawDetections {
  pub num: c_int,
  pub dets: *mut RawDetection,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawIntPair {
  pub x: c_int,
  pub y: c_int,
}

#[repr(C)]
#[derive(Debug)]
pub struct RawImage {
  pub w: c_int,
  pub h: c_int,
  pub c: c_int,
  pub data: *mut c_float,
}

#[derive(Error, Debug)]
pub enum FfiError {
  #[error("无法加载 darknet 动态库: {0}")]
  LibraryLoad(#[source] libloading::Error),
  #[error("动态库缺少符号 {name}: {source}")]
  MissingSymbol {
    name: &'static str,
    #[source]
    source: libloading::Error,
  },
}

type InitModelFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_void;
type FreeModelFn = unsafe extern "C" fn(*mut c_void);
type DetectFn = unsafe extern "C" fn(*mut c_void, *const c_char, c_float, c_float) -> RawDetections;
type FreeDetectionsFn = unsafe extern "C" fn(*mut RawDetection, c_int);
type InputShapeFn = unsafe extern "C" fn(*mut c_void) -> RawIntPair;
type ResizeNetworkFn = unsafe extern "C" fn(*mut c_void, c_int, c_int) -> c_int;
type LoadImageFn = unsafe extern "C" fn(*const c_char, c_int, c_int) -> RawImage;
type FreeImageFn = unsafe extern "C" fn(RawImage);

/// `libdarknet.so` 的外部接口。
///
/// 所有符号在加载时一次性解析，之后的调用不再查找。
/// 原生库自身负责推理、letterbox 缩放与 NMS，这里只做封送。
#[derive(Debug)]
pub struct DarknetApi {
  init_model: RawSymbol<InitModelFn>,
  free_model: RawSymbol<FreeModelFn>,
  detect: RawSymbol<DetectFn>,
  free_detections: RawSymbol<FreeDetectionsFn>,
  get_model_input_shape: RawSymbol<InputShapeFn>,
  resize_network: RawSymbol<ResizeNetworkFn>,
  load_image: RawSymbol<LoadImageFn>,
  free_image: RawSymbol<FreeImageFn>,
  // 符号指向库内代码，必须与符号同生共死
  _library: libloading::Library,
}

impl DarknetApi {
  pub fn load(path: &Path) -> Result<Self, FfiError> {
    debug!("加载动态库: {}", path.display());
    let library = unsafe { libloading::Library::new(path) }.map_err(FfiError::LibraryLoad)?;

    unsafe {
      Ok(Self {
        init_model: resolve(&library, "init_model")?,
        free_model: resolve(&library, "free_model")?,
        detect: resolve(&library, "detect")?,
        free_detections: resolve(&library, "free_detections")?,
        get_model_input_shape: resolve(&library, "get_model_input_shape")?,
        resize_network: resolve(&library, "resize_network")?,
        load_image: resolve(&library, "load_image")?,
        free_image: resolve(&library, "free_image")?,
        _library: library,
      })
    }
  }

  /// # Safety
  /// `cfg` 与 `weights` 必须指向存在的模型文件；返回的句柄归调用者所有。
  pub(crate) unsafe fn init_model(&self, cfg: &CStr, weights: &CStr) -> *mut c_void {
    unsafe { (self.init_model)(cfg.as_ptr(), weights.as_ptr()) }
  }

  /// # Safety
  /// `net` 必须是 `init_model` 返回且未释放的句柄；调用后句柄失效。
  pub(crate) unsafe fn free_model(&self, net: *mut c_void) {
    unsafe { (self.free_model)(net) }
  }

  /// # Safety
  /// `net` 必须有效；返回的检测数组必须用 `free_detections` 释放。
  pub(crate) unsafe fn detect(
    &self,
    net: *mut c_void,
    image_path: &CStr,
    thresh: f32,
    nms: f32,
  ) -> RawDetections {
    unsafe { (self.detect)(net, image_path.as_ptr(), thresh, nms) }
  }

  /// # Safety
  /// `dets`/`num` 必须来自同一次 `detect` 调用，且未被释放过。
  pub(crate) unsafe fn free_detections(&self, dets: *mut RawDetection, num: c_int) {
    if !dets.is_null() {
      unsafe { (self.free_detections)(dets, num) }
    }
  }

  /// # Safety
  /// `net` 必须有效。
  pub(crate) unsafe fn input_shape(&self, net: *mut c_void) -> RawIntPair {
    unsafe { (self.get_model_input_shape)(net) }
  }

  /// # Safety
  /// `net` 必须有效。
  pub(crate) unsafe fn resize_network(&self, net: *mut c_void, w: c_int, h: c_int) -> c_int {
    unsafe { (self.resize_network)(net, w, h) }
  }

  /// # Safety
  /// 返回的图像必须用 `free_image` 释放。
  pub(crate) unsafe fn load_image(&self, path: &CStr, w: c_int, h: c_int) -> RawImage {
    unsafe { (self.load_image)(path.as_ptr(), w, h) }
  }

  /// # Safety
  /// `image` 必须来自 `load_image` 且未被释放过。
  pub(crate) unsafe fn free_image(&self, image: RawImage) {
    unsafe { (self.free_image)(image) }
  }
}

unsafe fn resolve<T>(
  library: &libloading::Library,
  name: &'static str,
) -> Result<RawSymbol<T>, FfiError> {
  let symbol: libloading::Symbol<T> = unsafe { library.get(name.as_bytes()) }
    .map_err(|source| FfiError::MissingSymbol { name, source })?;
  Ok(unsafe { symbol.into_raw() })
}

#[cfg(test)]
mod tests {
  use super::*;

  // 结构体布局必须与 darknet 头文件一致，否则封送会静默出错
  #[test]
  #[cfg(target_pointer_width = "64")]
  fn raw_struct_layout() {
    assert_eq!(std::mem::size_of::<RawBox>(), 16);
    assert_eq!(std::mem::size_of::<RawIntPair>(), 8);
    assert_eq!(std::mem::size_of::<RawDetections>(), 16);
    assert_eq!(std::mem::offset_of!(RawDetection, classes), 16);
    assert_eq!(std::mem::offset_of!(RawDetection, objectness), 40);
    assert_eq!(std::mem::offset_of!(RawDetection, points), 56);
    assert_eq!(std::mem::size_of::<RawDetection>(), 64);
  }

  #[test]
  fn missing_library_is_reported() {
    let err = DarknetApi::load(Path::new("/nonexistent/libdarknet.so")).unwrap_err();
    assert!(matches!(err, FfiError::LibraryLoad(_)));
  }
}
