// 该文件是 Tuili （推理） 项目的一部分。
// src/model/head_pose.rs - 头部姿态估计
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

use tracing::{debug, error};

use crate::{
  frame::Frame,
  model::{Model, ModelError, ModelHandle, OutputBlobs},
};

/// 头部姿态网络的三个输出：偏航、俯仰、翻滚
pub const HEAD_POSE_OUTPUTS: [&str; 3] = ["angle_y_fc", "angle_p_fc", "angle_r_fc"];

/// 头部姿态（角度制）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadPose {
  pub yaw: f32,
  pub pitch: f32,
  pub roll: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadPoseOutputs {
  /// 每个角度一个输出，每个元素一个值
  Separate {
    yaw: String,
    pitch: String,
    roll: String,
  },
  /// 一个输出，每个元素依次为 yaw, pitch, roll
  Packed(String),
}

impl Default for HeadPoseOutputs {
  fn default() -> Self {
    let [yaw, pitch, roll] = HEAD_POSE_OUTPUTS;
    HeadPoseOutputs::Separate {
      yaw: yaw.to_string(),
      pitch: pitch.to_string(),
      roll: roll.to_string(),
    }
  }
}

/// 读出第 `item` 个元素的前 `count` 个值
fn item_values(
  blobs: &OutputBlobs<'_>,
  name: &str,
  item: usize,
  count: usize,
) -> Result<Vec<f32>, ModelError> {
  let view = blobs.get(name)?;
  let stride = view.desc().item_len();
  let data = view.as_f32()?;
  if stride < count || data.len() < (item + 1) * stride {
    return Err(ModelError::Shape(format!(
      "输出 {} 的形状 {:?} 不足以读取第 {} 个元素",
      name,
      view.desc().dims,
      item
    )));
  }
  Ok(data[item * stride..item * stride + count].to_vec())
}

impl HeadPoseOutputs {
  /// 从网络的输出名称中推断输出形式
  pub fn detect(output_names: &[String]) -> Result<Self, ModelError> {
    let has = |name: &str| output_names.iter().any(|n| n == name);
    if HEAD_POSE_OUTPUTS.iter().all(|n| has(n)) {
      return Ok(Self::default());
    }
    match output_names {
      [single] => Ok(HeadPoseOutputs::Packed(single.clone())),
      _ => {
        error!("无法识别头部姿态网络的输出: {:?}", output_names);
        Err(ModelError::Load(format!(
          "头部姿态网络需要输出 {:?} 或单个输出, 实际为 {:?}",
          HEAD_POSE_OUTPUTS, output_names
        )))
      }
    }
  }

  pub fn decode(&self, blobs: &OutputBlobs<'_>, count: usize) -> Result<Vec<HeadPose>, ModelError> {
    (0..count)
      .map(|item| match self {
        HeadPoseOutputs::Separate { yaw, pitch, roll } => Ok(HeadPose {
          yaw: item_values(blobs, yaw, item, 1)?[0],
          pitch: item_values(blobs, pitch, item, 1)?[0],
          roll: item_values(blobs, roll, item, 1)?[0],
        }),
        HeadPoseOutputs::Packed(name) => {
          let v = item_values(blobs, name, item, 3)?;
          Ok(HeadPose {
            yaw: v[0],
            pitch: v[1],
            roll: v[2],
          })
        }
      })
      .collect()
  }
}

pub struct HeadPoseEstimator {
  handle: ModelHandle,
  outputs: HeadPoseOutputs,
}

impl HeadPoseEstimator {
  pub fn new(handle: ModelHandle) -> Result<Self, ModelError> {
    let outputs = HeadPoseOutputs::detect(handle.output_names())?;
    debug!("头部姿态输出: {:?}", outputs);
    Ok(Self { handle, outputs })
  }

  /// 使用指定的输出名称，名称必须是网络的输出
  pub fn with_outputs(handle: ModelHandle, outputs: HeadPoseOutputs) -> Result<Self, ModelError> {
    let names: Vec<&String> = match &outputs {
      HeadPoseOutputs::Separate { yaw, pitch, roll } => vec![yaw, pitch, roll],
      HeadPoseOutputs::Packed(name) => vec![name],
    };
    if let Some(missing) = names
      .into_iter()
      .find(|name| !handle.output_names().contains(name))
    {
      return Err(ModelError::MissingOutput(missing.clone()));
    }
    Ok(Self { handle, outputs })
  }

  pub fn estimate(&mut self, frame: &Frame) -> Result<HeadPose, ModelError> {
    let mut poses = self.infer(std::slice::from_ref(frame))?;
    poses
      .pop()
      .ok_or_else(|| ModelError::Logic("头部姿态推理没有结果".to_string()))
  }
}

impl Model for HeadPoseEstimator {
  type Input = Frame;
  type Output = HeadPose;
  type Error = ModelError;

  fn infer(&mut self, input: &[Frame]) -> Result<Vec<HeadPose>, ModelError> {
    let images: Vec<_> = input.iter().map(|f| &f.image).collect();
    let mut poses = Vec::with_capacity(input.len());
    let outputs = &self.outputs;
    self.handle.infer_batch(&images, |blobs, count| {
      poses.extend(outputs.decode(blobs, count)?);
      Ok(())
    })?;
    Ok(poses)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::TensorBuffer;

  #[test]
  fn separate_outputs_decode_per_item() {
    let yaw = TensorBuffer::from_f32([2, 1], vec![10.0, -5.0]).unwrap();
    let pitch = TensorBuffer::from_f32([2, 1], vec![1.0, 2.0]).unwrap();
    let roll = TensorBuffer::from_f32([2, 1], vec![-30.0, 0.5]).unwrap();
    let blobs = OutputBlobs::new(vec![
      ("angle_y_fc", yaw.view()),
      ("angle_p_fc", pitch.view()),
      ("angle_r_fc", roll.view()),
    ]);

    let poses = HeadPoseOutputs::default().decode(&blobs, 2).unwrap();
    assert_eq!(
      poses,
      vec![
        HeadPose {
          yaw: 10.0,
          pitch: 1.0,
          roll: -30.0
        },
        HeadPose {
          yaw: -5.0,
          pitch: 2.0,
          roll: 0.5
        },
      ]
    );
  }

  #[test]
  fn decode_stops_at_count() {
    // 批次为 2，但只有 1 个实际元素；第二个元素的数据不应被读取
    let packed = TensorBuffer::from_f32([2, 3], vec![1.0, 2.0, 3.0, 99.0, 99.0, 99.0]).unwrap();
    let blobs = OutputBlobs::new(vec![("pose", packed.view())]);
    let poses = HeadPoseOutputs::Packed("pose".to_string())
      .decode(&blobs, 1)
      .unwrap();
    assert_eq!(poses.len(), 1);
    assert_eq!(poses[0].roll, 3.0);
  }

  #[test]
  fn detect_prefers_named_outputs() {
    let names: Vec<String> = vec![
      "angle_r_fc".into(),
      "angle_p_fc".into(),
      "angle_y_fc".into(),
    ];
    assert_eq!(
      HeadPoseOutputs::detect(&names).unwrap(),
      HeadPoseOutputs::default()
    );
    assert_eq!(
      HeadPoseOutputs::detect(&["fc".to_string()]).unwrap(),
      HeadPoseOutputs::Packed("fc".to_string())
    );
    assert!(HeadPoseOutputs::detect(&["a".to_string(), "b".to_string()]).is_err());
  }

  #[test]
  fn short_output_is_shape_error() {
    let packed = TensorBuffer::from_f32([1, 2], vec![1.0, 2.0]).unwrap();
    let blobs = OutputBlobs::new(vec![("pose", packed.view())]);
    assert!(matches!(
      HeadPoseOutputs::Packed("pose".to_string()).decode(&blobs, 1),
      Err(ModelError::Shape(_))
    ));
  }
}
