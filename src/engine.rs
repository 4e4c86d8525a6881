// 该文件是 Tuili （推理） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

//! 推理引擎边界。
//!
//! 模型执行、内存布局、设备调度都由外部推理引擎完成，本模块只定义
//! 三个对象安全的接口：[`Engine`] 读取并加载网络，[`Network`] 在加载前
//! 协商精度与批次，[`InferRequest`] 持有输入输出张量并执行推理。

use std::any::Any;
use std::path::Path;

use thiserror::Error;

mod tensor;
pub use self::tensor::{
  Layout, PortInfo, Precision, TensorBuffer, TensorData, TensorDesc, TensorView, TensorViewMut,
  ViewData, ViewDataMut,
};

#[cfg(feature = "openvino")]
mod openvino;
#[cfg(feature = "openvino")]
pub use self::openvino::OpenVinoEngine;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("设备或插件不支持动态批次")]
  DynamicBatchUnsupported,
  #[error("未知的张量: {0}")]
  UnknownTensor(String),
  #[error("张量维度不符合要求 ({expected}): {dims:?}")]
  Rank {
    expected: &'static str,
    dims: Vec<usize>,
  },
  #[error("张量精度不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  Precision {
    expected: Precision,
    actual: Precision,
  },
  #[error("张量大小不匹配: 期望 {expected}, 实际 {actual}")]
  Size { expected: usize, actual: usize },
  #[error("网络批次固定为 {native}, 无法调整")]
  FixedBatch { native: usize },
  #[error("批次大小 {requested} 超出上限 {max}")]
  BatchOutOfRange { requested: usize, max: usize },
  #[error("网络对象不属于引擎 {0}")]
  ForeignNetwork(&'static str),
  #[error("引擎错误: {0}")]
  Backend(String),
}

/// 加载网络时的插件配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
  pub dynamic_batch: bool,
}

pub trait Engine {
  fn name(&self) -> &'static str;

  fn read_network(&self, path: &Path) -> Result<Box<dyn Network>, EngineError>;

  /// 在设备上编译网络并创建唯一的推理请求
  fn load_network(
    &self,
    network: &dyn Network,
    device: &str,
    config: LoadConfig,
  ) -> Result<Box<dyn InferRequest>, EngineError>;
}

/// 读取后、加载前的网络
pub trait Network {
  fn inputs(&self) -> Vec<PortInfo>;
  fn outputs(&self) -> Vec<PortInfo>;
  fn batch_size(&self) -> usize;
  /// 不能改变批次的网络返回 [`EngineError::FixedBatch`]
  fn set_batch_size(&mut self, batch: usize) -> Result<(), EngineError>;
  fn set_input_format(
    &mut self,
    name: &str,
    precision: Precision,
    layout: Layout,
  ) -> Result<(), EngineError>;
  fn set_output_precision(&mut self, name: &str, precision: Precision) -> Result<(), EngineError>;
  /// 把中间层暴露为网络输出
  fn add_output(&mut self, name: &str) -> Result<(), EngineError>;
  fn as_any(&self) -> &dyn Any;
}

/// 推理请求。不可重入，所有会改变状态的操作都需要 `&mut self`。
pub trait InferRequest {
  fn input_desc(&self, name: &str) -> Result<TensorDesc, EngineError>;
  fn input_mut(&mut self, name: &str) -> Result<TensorViewMut<'_>, EngineError>;
  /// 只对本次推理缩小批次，不重新分配缓冲区
  fn set_batch(&mut self, batch: usize) -> Result<(), EngineError>;
  fn infer(&mut self) -> Result<(), EngineError>;
  /// 输出不存在时返回 `Ok(None)`
  fn output(&self, name: &str) -> Result<Option<TensorView<'_>>, EngineError>;
}

/// 根据模型 URL 的 scheme 选择推理引擎
pub fn engine_for_scheme(scheme: &str) -> Option<Box<dyn Engine>> {
  match scheme {
    #[cfg(feature = "openvino")]
    OpenVinoEngine::SCHEME => match OpenVinoEngine::new() {
      Ok(engine) => Some(Box::new(engine)),
      Err(e) => {
        tracing::error!("创建 OpenVINO 引擎失败: {}", e);
        None
      }
    },
    _ => None,
  }
}
