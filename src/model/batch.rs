// 该文件是 Tuili （推理） 项目的一部分。
// src/model/batch.rs - 批量推理
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

use image::{RgbImage, imageops::FilterType};
use tracing::debug;

use crate::{
  engine::{EngineError, TensorView, TensorViewMut, ViewDataMut},
  frame::{ChannelOrder, RGB_CHANNELS, write_planar},
  model::{ModelError, ModelHandle},
};

/// 一次推理调用的全部输出视图，只在回调期间有效
#[derive(Debug)]
pub struct OutputBlobs<'a> {
  blobs: Vec<(&'a str, TensorView<'a>)>,
}

impl<'a> OutputBlobs<'a> {
  pub fn new(blobs: Vec<(&'a str, TensorView<'a>)>) -> Self {
    Self { blobs }
  }

  pub fn get(&self, name: &str) -> Result<TensorView<'a>, ModelError> {
    self
      .blobs
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, view)| *view)
      .ok_or_else(|| ModelError::MissingOutput(name.to_string()))
  }

  pub fn iter(&self) -> impl Iterator<Item = (&'a str, TensorView<'a>)> + '_ {
    self.blobs.iter().copied()
  }

  pub fn len(&self) -> usize {
    self.blobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blobs.is_empty()
  }
}

impl ModelHandle {
  /// 按批次执行推理。
  ///
  /// `images` 被切成不超过批次大小的若干段，每段推理一次，然后以
  /// `(输出, 本段实际数量)` 调用一次 `fetch_results`。
  /// 不支持动态批次时，最后一段不足的槽位循环重复本段的图像填充，
  /// 回调拿到的数量仍是实际数量。
  pub fn infer_batch<F>(&mut self, images: &[&RgbImage], mut fetch_results: F) -> Result<(), ModelError>
  where
    F: FnMut(&OutputBlobs<'_>, usize) -> Result<(), ModelError>,
  {
    let batch_size = self.batch_size;
    let (net_width, net_height) = self.input_size();

    for chunk in images.chunks(batch_size) {
      let current = chunk.len();
      let slots = if self.dynamic_batch {
        current
      } else {
        batch_size
      };

      {
        let mut input = self.request.input_mut(&self.image_input)?;
        for slot in 0..slots {
          fill_image_slot(chunk[slot % current], &mut input, slot, self.channel_order)?;
        }
      }

      if let Some(name) = &self.info_input {
        let mut info = self.request.input_mut(name)?;
        fill_image_info(&mut info, slots, net_height, net_width)?;
      }

      if self.dynamic_batch {
        self.request.set_batch(current)?;
      }

      debug!("推理 {} 张图像 (批次 {})", current, batch_size);
      self.request.infer()?;

      let blobs = self.fetch_outputs()?;
      fetch_results(&blobs, current)?;
    }

    Ok(())
  }

  pub fn infer_one<F>(&mut self, image: &RgbImage, fetch_results: F) -> Result<(), ModelError>
  where
    F: FnMut(&OutputBlobs<'_>, usize) -> Result<(), ModelError>,
  {
    self.infer_batch(&[image], fetch_results)
  }

  fn fetch_outputs(&self) -> Result<OutputBlobs<'_>, ModelError> {
    let mut blobs = Vec::with_capacity(self.output_names.len());
    for name in &self.output_names {
      let view = self
        .request
        .output(name)?
        .ok_or_else(|| ModelError::MissingOutput(name.clone()))?;
      blobs.push((name.as_str(), view));
    }
    Ok(OutputBlobs::new(blobs))
  }
}

/// 把一张图像写入输入张量的第 `slot` 个位置，尺寸不符时先缩放
pub(crate) fn fill_image_slot(
  image: &RgbImage,
  input: &mut TensorViewMut<'_>,
  slot: usize,
  order: ChannelOrder,
) -> Result<(), ModelError> {
  let desc = input.desc();
  let (channels, height, width) = (desc.channels()?, desc.height()?, desc.width()?);
  if channels != RGB_CHANNELS {
    return Err(ModelError::Shape(format!(
      "输入通道数为 {}, 只支持 {}",
      channels, RGB_CHANNELS
    )));
  }
  let item_len = channels * height * width;
  let range = slot * item_len..(slot + 1) * item_len;
  let total = desc.len();
  if range.end > total {
    return Err(EngineError::Size {
      expected: range.end,
      actual: total,
    }
    .into());
  }

  let resized;
  let image = if image.dimensions() != (width as u32, height as u32) {
    resized = image::imageops::resize(image, width as u32, height as u32, FilterType::Triangle);
    &resized
  } else {
    image
  };

  match input.data_mut() {
    ViewDataMut::U8(data) => write_planar(image, &mut data[range], order, |v| v),
    ViewDataMut::F32(data) => write_planar(image, &mut data[range], order, f32::from),
  }
  Ok(())
}

/// 图像信息输入每行为 `[H, W, 1]`
fn fill_image_info(
  info: &mut TensorViewMut<'_>,
  slots: usize,
  height: u32,
  width: u32,
) -> Result<(), ModelError> {
  let row_len = info.desc().item_len();
  let row = [height as f32, width as f32, 1.0];
  match info.data_mut() {
    ViewDataMut::F32(data) => {
      for chunk in data.chunks_exact_mut(row_len.max(1)).take(slots) {
        for (dst, src) in chunk.iter_mut().zip(row) {
          *dst = src;
        }
      }
      Ok(())
    }
    ViewDataMut::U8(_) => Err(
      EngineError::Precision {
        expected: crate::engine::Precision::F32,
        actual: crate::engine::Precision::U8,
      }
      .into(),
    ),
  }
}
