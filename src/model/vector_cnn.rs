// 该文件是 Tuili （推理） 项目的一部分。
// src/model/vector_cnn.rs - 特征向量提取
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

use ndarray::Array2;
use tracing::{debug, error};

use crate::{
  frame::Frame,
  model::{Model, ModelError, ModelHandle, OutputBlobs},
};

/// 一张图像的特征，数据从输出张量中拷贝而来
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
  pub data: Array2<f32>,
}

impl Embedding {
  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn shape(&self) -> (usize, usize) {
    self.data.dim()
  }

  pub fn to_vec(&self) -> Vec<f32> {
    self.data.iter().copied().collect()
  }
}

/// 两个特征的余弦相似度，长度不同或存在零向量时为 None
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Option<f32> {
  if a.len() != b.len() {
    return None;
  }
  let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
  for (x, y) in a.data.iter().zip(b.data.iter()) {
    dot += x * y;
    norm_a += x * x;
    norm_b += y * y;
  }
  if norm_a == 0.0 || norm_b == 0.0 {
    return None;
  }
  Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

pub struct VectorCnn {
  handle: ModelHandle,
  output: String,
  shape: Option<(usize, usize)>,
}

impl VectorCnn {
  /// 网络只能有一个输出
  pub fn new(handle: ModelHandle) -> Result<Self, ModelError> {
    let output = match handle.output_names() {
      [single] => single.clone(),
      names => {
        error!("特征网络应只有一个输出, 实际为 {:?}", names);
        return Err(ModelError::Load(format!(
          "只支持单输出的网络, 实际输出数量为 {}",
          names.len()
        )));
      }
    };
    Ok(Self {
      handle,
      output,
      shape: None,
    })
  }

  /// 把每个特征整理成 (高, 宽)
  pub fn with_shape(mut self, height: usize, width: usize) -> Self {
    self.shape = Some((height, width));
    self
  }

  pub fn compute(&mut self, frame: &Frame) -> Result<Embedding, ModelError> {
    let (output, shape) = (&self.output, self.shape);
    let mut vectors = Vec::with_capacity(1);
    self.handle.infer_one(&frame.image, |blobs, count| {
      vectors.extend(decode_embeddings(blobs, output, count, shape)?);
      Ok(())
    })?;
    vectors
      .pop()
      .ok_or_else(|| ModelError::Logic("特征推理没有结果".to_string()))
  }
}

/// 拷贝前 `count` 个元素的特征
fn decode_embeddings(
  blobs: &OutputBlobs<'_>,
  name: &str,
  count: usize,
  shape: Option<(usize, usize)>,
) -> Result<Vec<Embedding>, ModelError> {
  let view = blobs.get(name)?;
  let features = view.desc().item_len();
  let data = view.as_f32()?;
  if features == 0 {
    return Err(ModelError::Shape(format!(
      "输出 {} 的特征长度为 0: {:?}",
      name,
      view.desc().dims
    )));
  }
  if data.len() < count * features {
    return Err(ModelError::Shape(format!(
      "输出 {} 的形状 {:?} 不足以读取 {} 个特征",
      name,
      view.desc().dims,
      count
    )));
  }

  let (height, width) = shape.unwrap_or((features, 1));
  data
    .chunks_exact(features)
    .take(count)
    .map(|vector| {
      Array2::from_shape_vec((height, width), vector.to_vec())
        .map(|data| Embedding { data })
        .map_err(|e| {
          ModelError::Shape(format!(
            "长度为 {} 的特征不能整理为 {}x{}: {}",
            features, height, width, e
          ))
        })
    })
    .collect()
}

impl Model for VectorCnn {
  type Input = Frame;
  type Output = Embedding;
  type Error = ModelError;

  fn infer(&mut self, input: &[Frame]) -> Result<Vec<Embedding>, ModelError> {
    if input.is_empty() {
      return Ok(Vec::new());
    }
    let images: Vec<_> = input.iter().map(|f| &f.image).collect();
    let mut vectors = Vec::with_capacity(input.len());
    let (output, shape) = (&self.output, self.shape);
    self.handle.infer_batch(&images, |blobs, count| {
      vectors.extend(decode_embeddings(blobs, output, count, shape)?);
      Ok(())
    })?;
    debug!("提取了 {} 个特征", vectors.len());
    Ok(vectors)
  }
}
