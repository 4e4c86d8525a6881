// 该文件是 Tuili （推理） 项目的一部分。
// src/output/save_json_file.rs - 保存 JSON 结果文件
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

use std::path::PathBuf;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{Detection, Embedding, HeadPose},
  output::{Render, output_file},
};

pub trait ToJson {
  fn to_json(&self) -> Value;
}

impl ToJson for Vec<Detection> {
  fn to_json(&self) -> Value {
    Value::Array(
      self
        .iter()
        .map(|d| {
          json!({
            "class_id": d.class_id,
            "probability": d.probability,
            "box": d.corners,
            "color": d.color(),
          })
        })
        .collect(),
    )
  }
}

impl ToJson for HeadPose {
  fn to_json(&self) -> Value {
    json!({
      "yaw": self.yaw,
      "pitch": self.pitch,
      "roll": self.roll,
    })
  }
}

impl ToJson for Embedding {
  fn to_json(&self) -> Value {
    let (height, width) = self.shape();
    json!({
      "shape": [height, width],
      "values": self.to_vec(),
    })
  }
}

/// `json:///dir` 把每帧的结果保存为 `dir/out<index>.json`
pub struct SaveJsonFileOutput {
  dir: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveJsonFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveJsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for SaveJsonFileOutput {
  type Error = SaveJsonFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveJsonFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    Ok(SaveJsonFileOutput::new(crate::url_file_path(uri)))
  }
}

impl SaveJsonFileOutput {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }
}

impl<R: ToJson> Render<Frame, R> for SaveJsonFileOutput {
  type Error = SaveJsonFileError;

  fn render_result(&self, frame: &Frame, result: &R) -> Result<(), Self::Error> {
    std::fs::create_dir_all(&self.dir)?;
    let record = json!({
      "index": frame.index,
      "source": frame.source.display().to_string(),
      "result": result.to_json(),
    });
    let path = output_file(&self.dir, frame.index, "json");
    std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
    info!("保存结果到文件: {}", path.display());
    Ok(())
  }
}
