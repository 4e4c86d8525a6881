// 该文件是 Tuili （推理） 项目的一部分。
// src/engine/tensor.rs - 张量描述与视图
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

use std::fmt;

use super::EngineError;

/// 张量精度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
  U8,
  F32,
}

/// 张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
  Nchw,
  Nc,
  Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDesc {
  pub precision: Precision,
  pub layout: Layout,
  pub dims: Vec<usize>,
}

impl fmt::Display for TensorDesc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?} {:?} {:?}", self.precision, self.layout, self.dims)
  }
}

impl TensorDesc {
  pub fn new(precision: Precision, layout: Layout, dims: impl Into<Vec<usize>>) -> Self {
    Self {
      precision,
      layout,
      dims: dims.into(),
    }
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn len(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn batch(&self) -> Result<usize, EngineError> {
    self.dims.first().copied().ok_or(EngineError::Rank {
      expected: "至少 1 维",
      dims: self.dims.clone(),
    })
  }

  pub fn channels(&self) -> Result<usize, EngineError> {
    self.nchw().map(|[_, c, _, _]| c)
  }

  pub fn height(&self) -> Result<usize, EngineError> {
    self.nchw().map(|[_, _, h, _]| h)
  }

  pub fn width(&self) -> Result<usize, EngineError> {
    self.nchw().map(|[_, _, _, w]| w)
  }

  /// 每个批次元素占用的元素个数
  pub fn item_len(&self) -> usize {
    self.dims.iter().skip(1).product()
  }

  fn nchw(&self) -> Result<[usize; 4], EngineError> {
    match self.dims.as_slice() {
      &[n, c, h, w] => Ok([n, c, h, w]),
      _ => Err(EngineError::Rank {
        expected: "4 维 (N, C, H, W)",
        dims: self.dims.clone(),
      }),
    }
  }
}

/// 网络输入/输出端口信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
  pub name: String,
  pub desc: TensorDesc,
}

impl PortInfo {
  pub fn new(name: impl Into<String>, desc: TensorDesc) -> Self {
    Self {
      name: name.into(),
      desc,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  U8(Vec<u8>),
  F32(Vec<f32>),
}

/// 后端持有的张量存储。
///
/// 推理请求内部用它保存输入输出数据，对外只通过 [`TensorView`] 与
/// [`TensorViewMut`] 借出，借用期不超过一次推理调用。
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
  desc: TensorDesc,
  data: TensorData,
}

impl TensorBuffer {
  pub fn zeros(desc: TensorDesc) -> Self {
    let len = desc.len();
    let data = match desc.precision {
      Precision::U8 => TensorData::U8(vec![0; len]),
      Precision::F32 => TensorData::F32(vec![0.0; len]),
    };
    Self { desc, data }
  }

  pub fn from_f32(dims: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self, EngineError> {
    let desc = TensorDesc::new(Precision::F32, Layout::Any, dims);
    if desc.len() != data.len() {
      return Err(EngineError::Size {
        expected: desc.len(),
        actual: data.len(),
      });
    }
    Ok(Self {
      desc,
      data: TensorData::F32(data),
    })
  }

  pub fn desc(&self) -> &TensorDesc {
    &self.desc
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn view(&self) -> TensorView<'_> {
    let data = match &self.data {
      TensorData::U8(v) => ViewData::U8(v),
      TensorData::F32(v) => ViewData::F32(v),
    };
    TensorView {
      desc: &self.desc,
      data,
    }
  }

  pub fn view_mut(&mut self) -> TensorViewMut<'_> {
    let data = match &mut self.data {
      TensorData::U8(v) => ViewDataMut::U8(v),
      TensorData::F32(v) => ViewDataMut::F32(v),
    };
    TensorViewMut {
      desc: &self.desc,
      data,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub enum ViewData<'a> {
  U8(&'a [u8]),
  F32(&'a [f32]),
}

/// 只读张量视图
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
  desc: &'a TensorDesc,
  data: ViewData<'a>,
}

impl<'a> TensorView<'a> {
  pub fn new(desc: &'a TensorDesc, data: ViewData<'a>) -> Self {
    Self { desc, data }
  }

  pub fn desc(&self) -> &'a TensorDesc {
    self.desc
  }

  pub fn data(&self) -> ViewData<'a> {
    self.data
  }

  pub fn as_f32(&self) -> Result<&'a [f32], EngineError> {
    match self.data {
      ViewData::F32(v) => Ok(v),
      ViewData::U8(_) => Err(EngineError::Precision {
        expected: Precision::F32,
        actual: Precision::U8,
      }),
    }
  }

  pub fn as_u8(&self) -> Result<&'a [u8], EngineError> {
    match self.data {
      ViewData::U8(v) => Ok(v),
      ViewData::F32(_) => Err(EngineError::Precision {
        expected: Precision::U8,
        actual: Precision::F32,
      }),
    }
  }
}

#[derive(Debug)]
pub enum ViewDataMut<'a> {
  U8(&'a mut [u8]),
  F32(&'a mut [f32]),
}

/// 可写张量视图
#[derive(Debug)]
pub struct TensorViewMut<'a> {
  desc: &'a TensorDesc,
  data: ViewDataMut<'a>,
}

impl<'a> TensorViewMut<'a> {
  pub fn new(desc: &'a TensorDesc, data: ViewDataMut<'a>) -> Self {
    Self { desc, data }
  }

  pub fn desc(&self) -> &TensorDesc {
    self.desc
  }

  pub fn data_mut(&mut self) -> &mut ViewDataMut<'a> {
    &mut self.data
  }
}
