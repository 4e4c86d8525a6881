// 该文件是 Tuili （推理） 项目的一部分。
// src/engine/openvino.rs - OpenVINO 推理引擎
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

use std::any::Any;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

use openvino::{Core, ElementType, Shape, Tensor, prepostprocess};
use tracing::{debug, info};

use super::{
  Engine, EngineError, InferRequest, Layout, LoadConfig, Network, PortInfo, Precision,
  TensorBuffer, TensorDesc, TensorView, TensorViewMut,
};

fn backend<E: std::fmt::Debug>(e: E) -> EngineError {
  EngineError::Backend(format!("{:?}", e))
}

fn element_type(precision: Precision) -> ElementType {
  match precision {
    Precision::U8 => ElementType::U8,
    Precision::F32 => ElementType::F32,
  }
}

fn to_dims(shape: &Shape) -> Vec<usize> {
  shape
    .get_dimensions()
    .iter()
    .map(|&d| d.max(0) as usize)
    .collect()
}

pub struct OpenVinoEngine {
  core: RefCell<Core>,
}

impl OpenVinoEngine {
  pub const SCHEME: &'static str = "openvino";

  pub fn new() -> Result<Self, EngineError> {
    let core = Core::new().map_err(backend)?;
    Ok(Self {
      core: RefCell::new(core),
    })
  }
}

/// IR 模型文件 `model.xml` 对应的权重文件 `model.bin`
fn weights_path(path: &Path) -> PathBuf {
  path.with_extension("bin")
}

struct OpenVinoNetwork {
  path: PathBuf,
  inputs: Vec<PortInfo>,
  outputs: Vec<PortInfo>,
  batch: usize,
}

impl Network for OpenVinoNetwork {
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
    // openvino 0.8 的 Model 没有 reshape，批次只能是 IR 中的批次
    if batch == self.batch {
      Ok(())
    } else {
      Err(EngineError::FixedBatch { native: self.batch })
    }
  }

  fn set_input_format(
    &mut self,
    name: &str,
    precision: Precision,
    layout: Layout,
  ) -> Result<(), EngineError> {
    let port = self
      .inputs
      .iter_mut()
      .find(|p| p.name == name)
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))?;
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
    // IR 模型的输出在转换时已经确定，这里只能确认该输出存在
    if self.outputs.iter().any(|p| p.name == name) {
      Ok(())
    } else {
      Err(EngineError::UnknownTensor(name.to_string()))
    }
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

impl Engine for OpenVinoEngine {
  fn name(&self) -> &'static str {
    "OpenVINO"
  }

  fn read_network(&self, path: &Path) -> Result<Box<dyn Network>, EngineError> {
    let xml = path.to_string_lossy();
    let bin = weights_path(path);
    info!("读取 OpenVINO 模型: {}", xml);
    let model = self
      .core
      .borrow_mut()
      .read_model_from_file(&xml, &bin.to_string_lossy())
      .map_err(backend)?;

    let mut inputs = Vec::new();
    for i in 0..model.get_inputs_len().map_err(backend)? {
      let node = model.get_input_by_index(i).map_err(backend)?;
      let name = node.get_name().map_err(backend)?;
      let dims = to_dims(&node.get_shape().map_err(backend)?);
      inputs.push(PortInfo::new(
        name,
        TensorDesc::new(Precision::F32, Layout::Any, dims),
      ));
    }

    let mut outputs = Vec::new();
    for i in 0..model.get_outputs_len().map_err(backend)? {
      let node = model.get_output_by_index(i).map_err(backend)?;
      let name = node.get_name().map_err(backend)?;
      let dims = to_dims(&node.get_shape().map_err(backend)?);
      outputs.push(PortInfo::new(
        name,
        TensorDesc::new(Precision::F32, Layout::Any, dims),
      ));
    }

    let batch = inputs
      .first()
      .and_then(|p| p.desc.dims.first().copied())
      .unwrap_or(1);

    Ok(Box::new(OpenVinoNetwork {
      path: path.to_path_buf(),
      inputs,
      outputs,
      batch,
    }))
  }

  fn load_network(
    &self,
    network: &dyn Network,
    device: &str,
    config: LoadConfig,
  ) -> Result<Box<dyn InferRequest>, EngineError> {
    if config.dynamic_batch {
      // 2.0 API 没有旧式的动态批次插件开关
      return Err(EngineError::DynamicBatchUnsupported);
    }
    let network = network
      .as_any()
      .downcast_ref::<OpenVinoNetwork>()
      .ok_or(EngineError::ForeignNetwork("OpenVINO"))?;

    let mut core = self.core.borrow_mut();
    let mut model = core
      .read_model_from_file(
        &network.path.to_string_lossy(),
        &weights_path(&network.path).to_string_lossy(),
      )
      .map_err(backend)?;

    let pipeline = prepostprocess::Pipeline::new(&mut model).map_err(backend)?;
    for port in &network.inputs {
      let input_info = pipeline
        .get_input_info_by_name(&port.name)
        .map_err(backend)?;
      let mut tensor_info = input_info.get_tensor_info().map_err(backend)?;
      tensor_info
        .set_element_type(element_type(port.desc.precision))
        .map_err(backend)?;
    }
    for port in &network.outputs {
      let output_info = pipeline
        .get_output_info_by_name(&port.name)
        .map_err(backend)?;
      let mut tensor_info = output_info.get_tensor_info().map_err(backend)?;
      tensor_info
        .set_element_type(element_type(port.desc.precision))
        .map_err(backend)?;
    }
    let model = pipeline.build_new_model().map_err(backend)?;

    let mut compiled = core
      .compile_model(&model, device.into())
      .map_err(backend)?;
    let request = compiled.create_infer_request().map_err(backend)?;
    debug!("OpenVINO 推理请求创建完成, 设备: {}", device);

    let inputs = network
      .inputs
      .iter()
      .map(|p| (p.name.clone(), TensorBuffer::zeros(p.desc.clone())))
      .collect();
    let outputs = network
      .outputs
      .iter()
      .map(|p| (p.name.clone(), None))
      .collect();

    Ok(Box::new(OpenVinoRequest {
      request,
      inputs,
      outputs,
    }))
  }
}

struct OpenVinoRequest {
  request: openvino::InferRequest,
  inputs: Vec<(String, TensorBuffer)>,
  outputs: Vec<(String, Option<TensorBuffer>)>,
}

impl OpenVinoRequest {
  fn input(&self, name: &str) -> Result<&TensorBuffer, EngineError> {
    self
      .inputs
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, b)| b)
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))
  }
}

impl InferRequest for OpenVinoRequest {
  fn input_desc(&self, name: &str) -> Result<TensorDesc, EngineError> {
    self.input(name).map(|b| b.desc().clone())
  }

  fn input_mut(&mut self, name: &str) -> Result<TensorViewMut<'_>, EngineError> {
    self
      .inputs
      .iter_mut()
      .find(|(n, _)| n == name)
      .map(|(_, b)| b.view_mut())
      .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))
  }

  fn set_batch(&mut self, _batch: usize) -> Result<(), EngineError> {
    Err(EngineError::DynamicBatchUnsupported)
  }

  fn infer(&mut self) -> Result<(), EngineError> {
    for (name, buffer) in &self.inputs {
      let dims: Vec<i64> = buffer.desc().dims.iter().map(|&d| d as i64).collect();
      let shape = Shape::new(&dims).map_err(backend)?;
      let mut tensor =
        Tensor::new(element_type(buffer.desc().precision), &shape).map_err(backend)?;
      match buffer.data() {
        super::TensorData::U8(v) => tensor
          .get_data_mut::<u8>()
          .map_err(backend)?
          .copy_from_slice(v),
        super::TensorData::F32(v) => tensor
          .get_data_mut::<f32>()
          .map_err(backend)?
          .copy_from_slice(v),
      }
      self.request.set_tensor(name, &tensor).map_err(backend)?;
    }

    self.request.infer().map_err(backend)?;

    for (name, slot) in self.outputs.iter_mut() {
      let tensor = self.request.get_tensor(name).map_err(backend)?;
      let dims = to_dims(&tensor.get_shape().map_err(backend)?);
      let data = tensor.get_data::<f32>().map_err(backend)?.to_vec();
      *slot = Some(TensorBuffer::from_f32(dims, data)?);
    }
    Ok(())
  }

  fn output(&self, name: &str) -> Result<Option<TensorView<'_>>, EngineError> {
    Ok(
      self
        .outputs
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, b)| b.as_ref())
        .map(TensorBuffer::view),
    )
  }
}
