// 该文件是 Tuili （推理） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;

use crate::engine::EngineError;

pub trait Model {
  type Input;
  type Output;
  type Error;

  /// 对一组输入做推理，每个输入对应一个输出
  fn infer(&mut self, input: &[Self::Input]) -> Result<Vec<Self::Output>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("推理引擎错误: {0}")]
  Engine(#[from] EngineError),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("输出张量 '{0}' 不存在")]
  MissingOutput(String),
  #[error("逻辑错误: {0}")]
  Logic(String),
  #[error("形状错误: {0}")]
  Shape(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URI 参数无效: {0}")]
  InvalidParameter(String),
}

mod batch;
mod handle;
mod head_pose;
mod mask_rcnn;
mod vector_cnn;

pub use self::batch::OutputBlobs;
pub use self::handle::{InputPolicy, Loaded, ModelHandle, ModelHandleBuilder};
pub use self::head_pose::{HEAD_POSE_OUTPUTS, HeadPose, HeadPoseEstimator, HeadPoseOutputs};
pub use self::mask_rcnn::{
  CITYSCAPES_COLORS, ClassColors, Detection, DetectionDecoder, MASK_THRESHOLD, MaskRcnn,
  MaskRcnnConfig, MaskSlab, PROBABILITY_THRESHOLD, PixelRect,
};
pub use self::vector_cnn::{Embedding, VectorCnn, cosine_similarity};
