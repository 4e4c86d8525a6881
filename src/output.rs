// 该文件是 Tuili （推理） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "save_json_file"))]
use crate::{FromUrlWithScheme, frame::Frame};

pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "save_json_file")]
mod save_json_file;
#[cfg(feature = "save_json_file")]
pub use self::save_json_file::{SaveJsonFileError, SaveJsonFileOutput, ToJson};

/// 第 `index` 帧在输出目录中的文件名
pub fn output_file(dir: &Path, index: usize, extension: &str) -> PathBuf {
  dir.join(format!("out{}.{}", index, extension))
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "save_json_file")]
  #[error("保存 JSON 文件错误: {0}")]
  SaveJsonFileError(#[from] SaveJsonFileError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "save_json_file")]
  SaveJsonFileOutput(SaveJsonFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "save_json_file")]
      SaveJsonFileOutput::SCHEME => {
        let output = SaveJsonFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveJsonFileOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

#[cfg(all(feature = "save_image_file", feature = "save_json_file"))]
impl<R> Render<Frame, R> for OutputWrapper
where
  R: ToJson,
  draw::Draw: draw::DrawOnImage<R>,
{
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &R) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      OutputWrapper::SaveJsonFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(all(feature = "save_image_file", not(feature = "save_json_file")))]
impl<R> Render<Frame, R> for OutputWrapper
where
  draw::Draw: draw::DrawOnImage<R>,
{
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &R) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(all(feature = "save_json_file", not(feature = "save_image_file")))]
impl<R: ToJson> Render<Frame, R> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &R) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveJsonFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
