// 该文件是 Yunbiao （云标） 项目的一部分。
// src/dataset.rs - 图像清单与类别映射
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
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// 类别编号到名称的有序映射
pub type ClassMap = BTreeMap<u32, String>;

/// 待预测的一张图像
#[derive(Debug, Clone)]
pub struct ImageEntry {
  pub id: i64,
  pub name: String,
  pub path: PathBuf,
}

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("读取 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解析 {path} 失败: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("不支持的图像清单格式: {0}")]
  UnsupportedListFormat(PathBuf),
  #[error("不支持的类别文件格式: {0}")]
  UnsupportedClassesFormat(PathBuf),
}

// COCO 标注文件中本模块关心的部分
#[derive(Deserialize)]
struct CocoImagesView {
  images: Vec<CocoImageView>,
}

#[derive(Deserialize)]
struct CocoImageView {
  id: i64,
  file_name: String,
}

#[derive(Deserialize)]
struct CocoCategoriesView {
  categories: Vec<CocoCategoryView>,
}

#[derive(Deserialize)]
struct CocoCategoryView {
  id: u32,
  name: String,
}

/// 列出待预测的图像。
///
/// 不给清单文件时取目录下全部文件（按名称排序，编号从 0 起）；
/// `.json` 清单按 COCO 的 `images` 数组取名称与编号；`.txt` 清单
/// 每行一个文件名。其他扩展名一律拒绝。
pub fn list_images(
  images_folder: &Path,
  images_file: Option<&Path>,
) -> Result<Vec<ImageEntry>, DatasetError> {
  let entries = match images_file {
    None => images_from_folder(images_folder)?,
    Some(file) => match extension(file).as_deref() {
      Some("json") => images_from_json(images_folder, file)?,
      Some("txt") => images_from_list(images_folder, file)?,
      _ => return Err(DatasetError::UnsupportedListFormat(file.to_path_buf())),
    },
  };
  debug!("图像清单: {} 张", entries.len());
  Ok(entries)
}

fn images_from_folder(images_folder: &Path) -> Result<Vec<ImageEntry>, DatasetError> {
  let read_dir = fs::read_dir(images_folder).map_err(|source| DatasetError::Io {
    path: images_folder.to_path_buf(),
    source,
  })?;

  let mut names = Vec::new();
  for entry in read_dir {
    let entry = entry.map_err(|source| DatasetError::Io {
      path: images_folder.to_path_buf(),
      source,
    })?;
    if entry.path().is_file() {
      names.push(entry.file_name().to_string_lossy().into_owned());
    }
  }
  names.sort();

  Ok(
    names
      .into_iter()
      .enumerate()
      .map(|(id, name)| ImageEntry {
        id: id as i64,
        path: images_folder.join(&name),
        name,
      })
      .collect(),
  )
}

fn images_from_json(images_folder: &Path, file: &Path) -> Result<Vec<ImageEntry>, DatasetError> {
  let content = fs::read_to_string(file).map_err(|source| DatasetError::Io {
    path: file.to_path_buf(),
    source,
  })?;
  let view: CocoImagesView =
    serde_json::from_str(&content).map_err(|source| DatasetError::Json {
      path: file.to_path_buf(),
      source,
    })?;

  Ok(
    view
      .images
      .into_iter()
      .map(|image| ImageEntry {
        id: image.id,
        path: images_folder.join(&image.file_name),
        name: image.file_name,
      })
      .collect(),
  )
}

fn images_from_list(images_folder: &Path, file: &Path) -> Result<Vec<ImageEntry>, DatasetError> {
  let content = fs::read_to_string(file).map_err(|source| DatasetError::Io {
    path: file.to_path_buf(),
    source,
  })?;

  Ok(
    content
      .lines()
      .map(str::trim_end)
      .filter(|line| !line.is_empty())
      .enumerate()
      .map(|(id, name)| ImageEntry {
        id: id as i64,
        name: name.to_string(),
        path: images_folder.join(name),
      })
      .collect(),
  )
}

/// 加载类别映射。
///
/// `.names`/`.txt` 文件每行一个类别名；`.json` 取 COCO 的
/// `categories`（类别编号为 `id - 1`）。没有类别文件时退化为
/// 数字名称，`fallback_classes` 给出类别数。
pub fn load_class_map(
  classes_file: Option<&Path>,
  fallback_classes: usize,
) -> Result<ClassMap, DatasetError> {
  match classes_file {
    None => Ok(
      (0..fallback_classes)
        .map(|id| (id as u32, id.to_string()))
        .collect(),
    ),
    Some(file) => match extension(file).as_deref() {
      Some("json") => class_map_from_json(file),
      Some("txt") | Some("names") => class_map_from_lines(file),
      _ => Err(DatasetError::UnsupportedClassesFormat(file.to_path_buf())),
    },
  }
}

fn class_map_from_json(file: &Path) -> Result<ClassMap, DatasetError> {
  let content = fs::read_to_string(file).map_err(|source| DatasetError::Io {
    path: file.to_path_buf(),
    source,
  })?;
  let view: CocoCategoriesView =
    serde_json::from_str(&content).map_err(|source| DatasetError::Json {
      path: file.to_path_buf(),
      source,
    })?;

  Ok(
    view
      .categories
      .into_iter()
      .map(|category| (category.id.saturating_sub(1), category.name))
      .collect(),
  )
}

fn class_map_from_lines(file: &Path) -> Result<ClassMap, DatasetError> {
  let content = fs::read_to_string(file).map_err(|source| DatasetError::Io {
    path: file.to_path_buf(),
    source,
  })?;

  Ok(
    content
      .lines()
      .map(str::trim_end)
      .filter(|line| !line.is_empty())
      .enumerate()
      .map(|(id, name)| (id as u32, name.to_string()))
      .collect(),
  )
}

fn extension(path: &Path) -> Option<String> {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs::File;
  use std::io::Write;

  #[test]
  fn folder_listing_is_sorted_and_numbered() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.jpg", "a.jpg", "c.png"] {
      File::create(dir.path().join(name)).unwrap();
    }
    fs::create_dir(dir.path().join("sub")).unwrap();

    let entries = list_images(dir.path(), None).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg", "c.png"]);
    assert_eq!(entries[2].id, 2);
    assert_eq!(entries[0].path, dir.path().join("a.jpg"));
  }

  #[test]
  fn txt_listing_skips_empty_lines() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("images.txt");
    let mut file = File::create(&list).unwrap();
    writeln!(file, "one.jpg").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "two.jpg").unwrap();

    let entries = list_images(dir.path(), Some(&list)).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].name, "two.jpg");
    assert_eq!(entries[1].id, 1);
  }

  #[test]
  fn json_listing_uses_coco_ids() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("test.json");
    fs::write(
      &list,
      r#"{"images": [{"id": 7, "file_name": "x.jpg", "width": 10, "height": 10}], "annotations": []}"#,
    )
    .unwrap();

    let entries = list_images(dir.path(), Some(&list)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, 7);
    assert_eq!(entries[0].name, "x.jpg");
  }

  #[test]
  fn unknown_list_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("images.csv");
    fs::write(&list, "a.jpg\n").unwrap();

    let err = list_images(dir.path(), Some(&list)).unwrap_err();
    assert!(matches!(err, DatasetError::UnsupportedListFormat(_)));
  }

  #[test]
  fn class_map_falls_back_to_numbers() {
    let classes = load_class_map(None, 3).unwrap();
    assert_eq!(classes.len(), 3);
    assert_eq!(classes.get(&2).map(String::as_str), Some("2"));
  }

  #[test]
  fn class_map_from_coco_shifts_ids() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ann.json");
    fs::write(
      &file,
      r#"{"categories": [{"id": 1, "name": "car"}, {"id": 2, "name": "person"}]}"#,
    )
    .unwrap();

    let classes = load_class_map(Some(&file), 0).unwrap();
    assert_eq!(classes.get(&0).map(String::as_str), Some("car"));
    assert_eq!(classes.get(&1).map(String::as_str), Some("person"));
  }

  #[test]
  fn class_map_from_names_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("classes.names");
    fs::write(&file, "car\nperson\n").unwrap();

    let classes = load_class_map(Some(&file), 0).unwrap();
    assert_eq!(classes.get(&1).map(String::as_str), Some("person"));
  }
}
