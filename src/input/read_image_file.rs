// 该文件是 Tuili （推理） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemaMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像路径不存在: {0}")]
  NotFound(PathBuf),
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// `image:///path` 指向一个图像文件，或一个包含图像文件的目录
#[derive(Debug, Clone)]
pub struct ImageFileInput {
  paths: Vec<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Self::from_urls(std::slice::from_ref(url))
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

/// 目录中的图像文件，按文件名排序
fn list_directory(dir: &Path) -> Result<Vec<PathBuf>, ImageFileInputError> {
  let mut paths = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let path = entry?.path();
    if path.is_file() && is_image_file(&path) {
      paths.push(path);
    }
  }
  paths.sort();
  debug!("目录 {} 中有 {} 个图像文件", dir.display(), paths.len());
  Ok(paths)
}

impl ImageFileInput {
  pub fn from_urls(urls: &[Url]) -> Result<Self, ImageFileInputError> {
    let mut paths = Vec::new();
    for url in urls {
      if url.scheme() != Self::SCHEME {
        error!(
          "URI 方案不匹配: 期望 '{}', 实际 '{}'",
          Self::SCHEME,
          url.scheme()
        );
        return Err(ImageFileInputError::SchemaMismatch(url.scheme().to_string()));
      }
      paths.extend(Self::expand(&crate::url_file_path(url))?);
    }
    Ok(Self { paths })
  }

  pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
    Self {
      paths: paths.into_iter().collect(),
    }
  }

  fn expand(path: &Path) -> Result<Vec<PathBuf>, ImageFileInputError> {
    if path.is_dir() {
      list_directory(path)
    } else if path.exists() {
      Ok(vec![path.to_path_buf()])
    } else {
      error!("图像路径不存在: {}", path.display());
      Err(ImageFileInputError::NotFound(path.to_path_buf()))
    }
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  pub fn into_frames(self) -> ImageFileFrames {
    ImageFileFrames {
      paths: self.paths.into_iter(),
      next_index: 0,
    }
  }
}

/// 逐个解码图像；无法读取的文件记录警告后跳过
pub struct ImageFileFrames {
  paths: std::vec::IntoIter<PathBuf>,
  next_index: usize,
}

fn read_image(path: &Path) -> Result<image::RgbImage, image::ImageError> {
  Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgb8())
}

impl Iterator for ImageFileFrames {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.paths.by_ref() {
      match read_image(&path) {
        Ok(image) => {
          let frame = Frame::new(self.next_index, path, image);
          self.next_index += 1;
          return Some(frame);
        }
        Err(e) => warn!("无法读取图像 {}, 跳过: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn write_image(path: &Path, value: u8) {
    RgbImage::from_pixel(4, 3, Rgb([value, 0, 0])).save(path).unwrap();
  }

  #[test]
  fn directory_is_listed_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_image(&dir.path().join("b.png"), 2);
    write_image(&dir.path().join("a.png"), 1);
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let url = Url::from_directory_path(dir.path()).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.len(), 2);

    let frames: Vec<Frame> = input.into_frames().collect();
    assert_eq!(frames[0].image.get_pixel(0, 0)[0], 1);
    assert_eq!(frames[1].image.get_pixel(0, 0)[0], 2);
    assert_eq!(frames[1].index, 1);
  }

  #[test]
  fn unreadable_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.png");
    let bad = dir.path().join("bad.png");
    write_image(&good, 9);
    std::fs::write(&bad, b"not an image").unwrap();

    let frames: Vec<Frame> = ImageFileInput::from_paths([bad, good.clone()])
      .into_frames()
      .collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].index, 0);
    assert_eq!(frames[0].source, good);
  }

  #[test]
  fn missing_path_is_error() {
    let url = Url::parse("image:///no/such/image.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::NotFound(_))
    ));
  }

  #[test]
  fn wrong_scheme_is_error() {
    let url = Url::parse("video:///a.mp4").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch(_))
    ));
  }
}
