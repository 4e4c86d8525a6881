// 该文件是 Tuili （推理） 项目的一部分。
// tests/common/mod.rs - 测试用的内存推理引擎
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

#![allow(dead_code)]

use std::{any::Any, cell::RefCell, collections::HashMap, path::Path, rc::Rc};

use tuili::engine::{
  Engine, EngineError, InferRequest, Layout, LoadConfig, Network, PortInfo, Precision,
  TensorBuffer, TensorDesc, TensorView, TensorViewMut,
};

/// 一次推理调用看到的输入
pub struct InferCall {
  pub inputs: HashMap<String, TensorBuffer>,
  /// 本次推理的有效批次
  pub batch: usize,
  /// 加载时的批次
  pub max_batch: usize,
}

pub type Responder = Rc<dyn Fn(&InferCall) -> Vec<(String, TensorBuffer)>>;

#[derive(Debug, Default)]
pub struct CallLog {
  pub loads: Vec<(usize, LoadConfig)>,
  pub set_batch: Vec<usize>,
  pub infer_batches: Vec<usize>,
  /// 每次推理时图像输入的拷贝
  pub image_inputs: Vec<TensorBuffer>,
}

/// 按脚本回应的推理引擎
pub struct FakeEngine {
  pub inputs: Vec<PortInfo>,
  pub outputs: Vec<PortInfo>,
  /// 可以通过 `add_output` 暴露的中间层
  pub hidden_outputs: Vec<PortInfo>,
  pub supports_dynamic_batch: bool,
  /// 为 false 时网络批次固定，不能调整
  pub reshapable: bool,
  pub responder: Responder,
  pub log: Rc<RefCell<CallLog>>,
}

impl FakeEngine {
  /// 单个 NCHW 图像输入的网络
  pub fn single_input(batch: usize, height: usize, width: usize, responder: Responder) -> Self {
    Self {
      inputs: vec![PortInfo::new(
        "data",
        TensorDesc::new(Precision::F32, Layout::Any, [batch, 3, height, width]),
      )],
      outputs: Vec::new(),
      hidden_outputs: Vec::new(),
      supports_dynamic_batch: true,
      reshapable: true,
      responder,
      log: Rc::default(),
    }
  }

  pub fn with_output(mut self, name: &str, dims: &[usize]) -> Self {
    self.outputs.push(port(name, dims));
    self
  }

  pub fn with_hidden_output(mut self, name: &str, dims: &[usize]) -> Self {
    self.hidden_outputs.push(port(name, dims));
    self
  }

  pub fn with_input(mut self, name: &str, dims: &[usize]) -> Self {
    self.inputs.push(PortInfo::new(
      name,
      TensorDesc::new(Precision::F32, Layout::Any, dims.to_vec()),
    ));
    self
  }

  pub fn without_dynamic_batch(mut self) -> Self {
    self.supports_dynamic_batch = false;
    self
  }

  pub fn without_reshape(mut self) -> Self {
    self.reshapable = false;
    self
  }
}

fn port(name: &str, dims: &[usize]) -> PortInfo {
  PortInfo::new(
    name,
    TensorDesc::new(Precision::F32, Layout::Any, dims.to_vec()),
  )
}

impl Engine for FakeEngine {
  fn name(&self) -> &'static str {
    "fake"
  }

  fn read_network(&self, _path: &Path) -> Result<Box<dyn Network>, EngineError> {
    let batch = self
      .inputs
      .first()
      .and_then(|p| p.desc.dims.first().copied())
      .unwrap_or(1);
    Ok(Box::new(FakeNetwork {
      inputs: self.inputs.clone(),
      outputs: self.outputs.clone(),
      hidden_outputs: self.hidden_outputs.clone(),
      batch,
      reshapable: self.reshapable,
    }))
  }

  fn load_network(
    &self,
    network: &dyn Network,
    _device: &str,
    config: LoadConfig,
  ) -> Result<Box<dyn InferRequest>, EngineError> {
    let network = network
      .as_any()
      .downcast_ref::<FakeNetwork>()
      .ok_or(EngineError::ForeignNetwork("fake"))?;
    self.log.borrow_mut().loads.push((network.batch, config));
    if config.dynamic_batch && !self.supports_dynamic_batch {
      return Err(EngineError::DynamicBatchUnsupported);
    }

    let inputs = network
      .inputs
      .iter()
      .map(|p| (p.name.clone(), TensorBuffer::zeros(p.desc.clone())))
      .collect();
    let image_input = network
      .inputs
      .iter()
      .find(|p| p.desc.rank() == 4)
      .map(|p| p.name.clone())
      .unwrap_or_default();
    Ok(Box::new(FakeRequest {
      image_input,
      inputs,
      outputs: HashMap::new(),
      max_batch: network.batch,
      batch: network.batch,
      responder: self.responder.clone(),
      log: self.log.clone(),
    }))
  }
}

pub struct FakeNetwork {
  inputs: Vec<PortInfo>,
  outputs: Vec<PortInfo>,
  hidden_outputs: Vec<PortInfo>,
  batch: usize,
  reshapable: bool,
}

impl FakeNetwork {
  fn input(&mut self, name: &str) -> Result<&mut PortInfo, EngineError> {
    self
      .inputs
      .iter_mut()
      .find(|p| p.name == name)
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))
  }
}

impl Network for FakeNetwork {
  fn inputs(&self) -> Vec<PortInfo> {
    self.inputs.clone()
  }

  fn outputs(&self) -> Vec<PortInfo> {
    self.outputs.clone()
  }

  fn batch_size(&self) -> usize {
    self.batch
  }

  fn set_batch_size(&mut self, batch: usize) -> Result<(), EngineError> {
    if !self.reshapable && batch != self.batch {
      return Err(EngineError::FixedBatch { native: self.batch });
    }
    self.batch = batch;
    for port in self.inputs.iter_mut() {
      if let Some(n) = port.desc.dims.first_mut() {
        *n = batch;
      }
    }
    Ok(())
  }

  fn set_input_format(
    &mut self,
    name: &str,
    precision: Precision,
    layout: Layout,
  ) -> Result<(), EngineError> {
    let port = self.input(name)?;
    port.desc.precision = precision;
    port.desc.layout = layout;
    Ok(())
  }

  fn set_output_precision(&mut self, name: &str, precision: Precision) -> Result<(), EngineError> {
    let port = self
      .outputs
      .iter_mut()
      .find(|p| p.name == name)
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))?;
    port.desc.precision = precision;
    Ok(())
  }

  fn add_output(&mut self, name: &str) -> Result<(), EngineError> {
    if self.outputs.iter().any(|p| p.name == name) {
      return Ok(());
    }
    let index = self
      .hidden_outputs
      .iter()
      .position(|p| p.name == name)
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))?;
    let port = self.hidden_outputs.remove(index);
    self.outputs.push(port);
    Ok(())
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

pub struct FakeRequest {
  image_input: String,
  inputs: HashMap<String, TensorBuffer>,
  outputs: HashMap<String, TensorBuffer>,
  max_batch: usize,
  batch: usize,
  responder: Responder,
  log: Rc<RefCell<CallLog>>,
}

impl InferRequest for FakeRequest {
  fn input_desc(&self, name: &str) -> Result<TensorDesc, EngineError> {
    self
      .inputs
      .get(name)
      .map(|b| b.desc().clone())
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))
  }

  fn input_mut(&mut self, name: &str) -> Result<TensorViewMut<'_>, EngineError> {
    self
      .inputs
      .get_mut(name)
      .map(|b| b.view_mut())
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))
  }

  fn set_batch(&mut self, batch: usize) -> Result<(), EngineError> {
    if batch == 0 || batch > self.max_batch {
      return Err(EngineError::BatchOutOfRange {
        requested: batch,
        max: self.max_batch,
      });
    }
    self.log.borrow_mut().set_batch.push(batch);
    self.batch = batch;
    Ok(())
  }

  fn infer(&mut self) -> Result<(), EngineError> {
    let call = InferCall {
      inputs: self.inputs.clone(),
      batch: self.batch,
      max_batch: self.max_batch,
    };
    {
      let mut log = self.log.borrow_mut();
      log.infer_batches.push(self.batch);
      if let Some(image) = self.inputs.get(&self.image_input) {
        log.image_inputs.push(image.clone());
      }
    }
    self.outputs = (self.responder)(&call).into_iter().collect();
    Ok(())
  }

  fn output(&self, name: &str) -> Result<Option<TensorView<'_>>, EngineError> {
    Ok(self.outputs.get(name).map(|b| b.view()))
  }
}

/// 第 `slot` 个图像在输入张量中的第一个值
pub fn first_value_of_slot(call: &InferCall, input: &str, slot: usize) -> f32 {
  let buffer = &call.inputs[input];
  let item = buffer.desc().item_len();
  match buffer.view().data() {
    tuili::engine::ViewData::U8(data) => data[slot * item] as f32,
    tuili::engine::ViewData::F32(data) => data[slot * item],
  }
}
