// 该文件是 Tuili （推理） 项目的一部分。
// src/model/handle.rs - 模型句柄的加载
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

use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  engine::{
    self, Engine, EngineError, InferRequest, Layout, LoadConfig, Network, Precision, TensorDesc,
  },
  frame::{ChannelOrder, RGB_CHANNELS},
  model::ModelError,
};

const DEFAULT_SCHEME: &str = "openvino";
const DEFAULT_DEVICE: &str = "CPU";

/// 网络输入的约束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputPolicy {
  /// 只允许一个图像输入
  #[default]
  SingleImage,
  /// 一个 4 维图像输入，外加可选的 2 维图像信息输入 `[H, W, 1]`
  ImageWithInfo,
}

#[derive(Debug, Clone)]
pub struct ModelHandleBuilder {
  scheme: String,
  model_path: PathBuf,
  device: String,
  max_batch_size: Option<usize>,
  channel_order: ChannelOrder,
  policy: InputPolicy,
  extra_outputs: Vec<String>,
  dynamic_batch: bool,
}

impl FromUrl for ModelHandleBuilder {
  type Error = ModelError;

  /// `openvino:///path/to/model.xml?device=CPU&batch=4&dynamic=false`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let path = crate::url_file_path(url);
    if path.as_os_str().is_empty() || path == PathBuf::from("/") {
      error!("模型路径为空: {}", url);
      return Err(ModelError::InvalidParameter(format!("模型路径为空: {}", url)));
    }

    let mut builder = ModelHandleBuilder::new(path).scheme(url.scheme());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "device" => builder = builder.device(value.as_ref()),
        "batch" => {
          let batch: usize = value
            .parse()
            .map_err(|_| ModelError::InvalidParameter(format!("batch={}", value)))?;
          if batch == 0 {
            return Err(ModelError::InvalidParameter("batch 必须大于 0".to_string()));
          }
          builder = builder.max_batch_size(batch);
        }
        "channels" => {
          let order = match value.to_ascii_lowercase().as_str() {
            "rgb" => ChannelOrder::Rgb,
            "bgr" => ChannelOrder::Bgr,
            _ => {
              return Err(ModelError::InvalidParameter(format!(
                "channels={}",
                value
              )));
            }
          };
          builder = builder.channel_order(order);
        }
        "dynamic" => {
          let dynamic = value
            .parse()
            .map_err(|_| ModelError::InvalidParameter(format!("dynamic={}", value)))?;
          builder = builder.dynamic_batch(dynamic);
        }
        other => warn!("忽略未知的模型参数: {}={}", other, value),
      }
    }
    Ok(builder)
  }
}

impl ModelHandleBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      scheme: DEFAULT_SCHEME.to_string(),
      model_path: model_path.into(),
      device: DEFAULT_DEVICE.to_string(),
      max_batch_size: None,
      channel_order: ChannelOrder::default(),
      policy: InputPolicy::default(),
      extra_outputs: Vec::new(),
      dynamic_batch: true,
    }
  }

  pub fn scheme(mut self, scheme: &str) -> Self {
    self.scheme = scheme.to_string();
    self
  }

  pub fn device(mut self, device: &str) -> Self {
    self.device = device.to_string();
    self
  }

  /// 不设置时沿用网络自身的批次大小
  pub fn max_batch_size(mut self, batch: usize) -> Self {
    self.max_batch_size = Some(batch);
    self
  }

  pub fn channel_order(mut self, order: ChannelOrder) -> Self {
    self.channel_order = order;
    self
  }

  pub fn input_policy(mut self, policy: InputPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// 关闭后按固定批次推理，不足的槽位循环填充
  pub fn dynamic_batch(mut self, enabled: bool) -> Self {
    self.dynamic_batch = enabled;
    self
  }

  pub fn extra_output(mut self, name: &str) -> Self {
    self.extra_outputs.push(name.to_string());
    self
  }

  /// 按 scheme 创建推理引擎并加载
  pub fn build(self) -> Result<Loaded, ModelError> {
    let engine = engine::engine_for_scheme(&self.scheme).ok_or_else(|| {
      error!("没有可用于 '{}' 的推理引擎", self.scheme);
      ModelError::SchemeMismatch(self.scheme.clone())
    })?;
    let loaded = self.build_with(engine.as_ref())?;
    Ok(loaded.map(|mut handle| {
      handle._engine = Some(engine);
      handle
    }))
  }

  pub fn build_with(self, engine: &dyn Engine) -> Result<Loaded, ModelError> {
    info!(
      "加载模型文件: {} (引擎: {}, 设备: {})",
      self.model_path.display(),
      engine.name(),
      self.device
    );
    let mut network = engine.read_network(&self.model_path)?;

    for name in &self.extra_outputs {
      network.add_output(name).map_err(|e| {
        error!("无法添加输出 {}: {}", name, e);
        ModelError::Load(format!("网络中没有层 '{}': {}", name, e))
      })?;
    }

    let (image_input, info_input) = self.negotiate_inputs(network.as_mut())?;
    let output_names: Vec<String> = network.outputs().into_iter().map(|p| p.name).collect();
    for name in &output_names {
      network.set_output_precision(name, Precision::F32)?;
    }

    let native_batch = network.batch_size();
    let mut max_batch = self.max_batch_size.unwrap_or(native_batch);
    let mut fixed_batch = false;
    if native_batch != max_batch {
      debug!("网络批次 {} 调整为 {}", native_batch, max_batch);
      match network.set_batch_size(max_batch) {
        Ok(()) => {}
        Err(EngineError::FixedBatch { native }) => {
          warn!("网络批次固定为 {}, 无法调整为 {}", native, max_batch);
          max_batch = native;
          fixed_batch = true;
        }
        Err(e) => return Err(e.into()),
      }
    }

    let dynamic_batch = self.dynamic_batch && max_batch > 1;
    let static_load = LoadConfig {
      dynamic_batch: false,
    };
    let (request, dynamic_batch, wrap): (_, _, fn(ModelHandle) -> Loaded) = match engine
      .load_network(network.as_ref(), &self.device, LoadConfig { dynamic_batch })
    {
      Ok(request) if fixed_batch => (request, dynamic_batch, Loaded::FixedBatchFallback),
      Ok(request) => (request, dynamic_batch, Loaded::Native),
      Err(EngineError::DynamicBatchUnsupported) if dynamic_batch => {
        match network.set_batch_size(1) {
          Ok(()) => {
            warn!("设备 {} 不支持动态批次, 退回批次大小 1", self.device);
            let request = engine.load_network(network.as_ref(), &self.device, static_load)?;
            (request, false, Loaded::SingleBatchFallback)
          }
          Err(EngineError::FixedBatch { native }) => {
            warn!(
              "设备 {} 不支持动态批次, 网络批次固定为 {}, 不足的批次循环填充",
              self.device, native
            );
            let request = engine.load_network(network.as_ref(), &self.device, static_load)?;
            (request, false, Loaded::FixedBatchFallback)
          }
          Err(e) => return Err(e.into()),
        }
      }
      Err(e) => {
        error!("模型加载失败: {}", e);
        return Err(e.into());
      }
    };

    let handle = ModelHandle::new(
      request,
      image_input,
      info_input,
      output_names,
      dynamic_batch,
      self.channel_order,
    )?;
    info!(
      "模型加载完成: 输入 {} [{}], 输出 {:?}, 批次 {}{}",
      handle.image_input,
      handle.input_desc,
      handle.output_names,
      handle.batch_size,
      if handle.dynamic_batch {
        " (动态)"
      } else {
        ""
      }
    );

    Ok(wrap(handle))
  }

  fn negotiate_inputs(
    &self,
    network: &mut dyn Network,
  ) -> Result<(String, Option<String>), ModelError> {
    let inputs = network.inputs();
    match self.policy {
      InputPolicy::SingleImage => {
        if inputs.len() != 1 {
          error!("网络输入数量为 {}, 只支持一个输入", inputs.len());
          return Err(ModelError::Load(format!(
            "网络应只有一个输入, 实际为 {}",
            inputs.len()
          )));
        }
        let name = inputs[0].name.clone();
        network.set_input_format(&name, Precision::U8, Layout::Nchw)?;
        Ok((name, None))
      }
      InputPolicy::ImageWithInfo => {
        let mut image = None;
        let mut info = None;
        for port in &inputs {
          match port.desc.rank() {
            4 if image.is_none() => {
              network.set_input_format(&port.name, Precision::U8, Layout::Nchw)?;
              image = Some(port.name.clone());
            }
            2 if info.is_none() => {
              network.set_input_format(&port.name, Precision::F32, Layout::Nc)?;
              info = Some(port.name.clone());
            }
            rank => {
              error!("不支持的输入 {}: {} 维", port.name, rank);
              return Err(ModelError::Load(format!(
                "不支持的输入形状, 维数 = {}",
                rank
              )));
            }
          }
        }
        let image = image.ok_or_else(|| ModelError::Load("网络没有 4 维图像输入".to_string()))?;
        Ok((image, info))
      }
    }
  }
}

/// 加载结果。两种退回都是可恢复的降级。
#[derive(Debug)]
pub enum Loaded {
  Native(ModelHandle),
  /// 不支持动态批次，网络改为批次 1
  SingleBatchFallback(ModelHandle),
  /// 网络批次不能调整，按网络自身的固定批次推理
  FixedBatchFallback(ModelHandle),
}

impl Loaded {
  pub fn is_degraded(&self) -> bool {
    !matches!(self, Loaded::Native(_))
  }

  pub fn handle(&self) -> &ModelHandle {
    match self {
      Loaded::Native(handle)
      | Loaded::SingleBatchFallback(handle)
      | Loaded::FixedBatchFallback(handle) => handle,
    }
  }

  pub fn into_handle(self) -> ModelHandle {
    match self {
      Loaded::Native(handle)
      | Loaded::SingleBatchFallback(handle)
      | Loaded::FixedBatchFallback(handle) => handle,
    }
  }

  fn map(self, f: impl FnOnce(ModelHandle) -> ModelHandle) -> Self {
    match self {
      Loaded::Native(handle) => Loaded::Native(f(handle)),
      Loaded::SingleBatchFallback(handle) => Loaded::SingleBatchFallback(f(handle)),
      Loaded::FixedBatchFallback(handle) => Loaded::FixedBatchFallback(f(handle)),
    }
  }
}

/// 已加载的网络和它唯一的推理请求
pub struct ModelHandle {
  pub(super) request: Box<dyn InferRequest>,
  pub(super) image_input: String,
  pub(super) info_input: Option<String>,
  pub(super) output_names: Vec<String>,
  pub(super) input_desc: TensorDesc,
  pub(super) batch_size: usize,
  pub(super) dynamic_batch: bool,
  pub(super) channel_order: ChannelOrder,
  // 放在 request 之后，保证先释放请求再释放引擎
  _engine: Option<Box<dyn Engine>>,
}

impl std::fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelHandle")
      .field("image_input", &self.image_input)
      .field("info_input", &self.info_input)
      .field("output_names", &self.output_names)
      .field("input_desc", &self.input_desc)
      .field("batch_size", &self.batch_size)
      .field("dynamic_batch", &self.dynamic_batch)
      .finish_non_exhaustive()
  }
}

impl ModelHandle {
  fn new(
    request: Box<dyn InferRequest>,
    image_input: String,
    info_input: Option<String>,
    output_names: Vec<String>,
    dynamic_batch: bool,
    channel_order: ChannelOrder,
  ) -> Result<Self, ModelError> {
    let input_desc = request.input_desc(&image_input)?;
    let channels = input_desc.channels()?;
    if channels != RGB_CHANNELS {
      return Err(ModelError::Load(format!(
        "图像输入应为 {} 通道, 实际为 {}",
        RGB_CHANNELS, channels
      )));
    }
    let batch_size = input_desc.batch()?;
    if batch_size == 0 {
      return Err(ModelError::Load("输入张量批次为 0".to_string()));
    }

    Ok(Self {
      request,
      image_input,
      info_input,
      output_names,
      input_desc,
      batch_size,
      dynamic_batch,
      channel_order,
      _engine: None,
    })
  }

  pub fn batch_size(&self) -> usize {
    self.batch_size
  }

  pub fn is_dynamic_batch(&self) -> bool {
    self.dynamic_batch
  }

  pub fn output_names(&self) -> &[String] {
    &self.output_names
  }

  pub fn input_desc(&self) -> &TensorDesc {
    &self.input_desc
  }

  /// 网络期望的输入尺寸 (宽, 高)
  pub fn input_size(&self) -> (u32, u32) {
    let width = self.input_desc.width().unwrap_or(0) as u32;
    let height = self.input_desc.height().unwrap_or(0) as u32;
    (width, height)
  }
}
