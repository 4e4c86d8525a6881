// 该文件是 Tuili （推理） 项目的一部分。
// src/frame.rs - 帧定义与 NCHW 转换
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

use image::{ImageBuffer, Rgb, RgbImage};

pub const RGB_CHANNELS: usize = 3;

/// 一张已解码的输入图像
#[derive(Debug, Clone)]
pub struct Frame {
  pub index: usize,
  pub source: PathBuf,
  pub image: RgbImage,
}

impl Frame {
  pub fn new(index: usize, source: impl Into<PathBuf>, image: RgbImage) -> Self {
    Self {
      index,
      source: source.into(),
      image,
    }
  }
}

/// 写入张量时的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  Rgb,
  /// Open Model Zoo 的网络按 BGR 训练
  #[default]
  Bgr,
}

impl ChannelOrder {
  /// 张量第 `plane` 个平面对应的像素通道
  fn source_channel(self, plane: usize) -> usize {
    match self {
      ChannelOrder::Rgb => plane,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - plane,
    }
  }
}

/// 把交错存储的 RGB 图像按平面写入 `dst`（长度为 3 * H * W）
pub fn write_planar<T: Copy>(
  image: &RgbImage,
  dst: &mut [T],
  order: ChannelOrder,
  convert: impl Fn(u8) -> T,
) {
  let (width, height) = image.dimensions();
  let plane_size = (width * height) as usize;
  debug_assert_eq!(dst.len(), plane_size * RGB_CHANNELS);

  for (x, y, pixel) in image.enumerate_pixels() {
    let idx = (y * width + x) as usize;
    for plane in 0..RGB_CHANNELS {
      dst[plane * plane_size + idx] = convert(pixel[order.source_channel(plane)]);
    }
  }
}

/// [`write_planar`] 的逆变换
pub fn read_planar(src: &[u8], width: u32, height: u32, order: ChannelOrder) -> RgbImage {
  let plane_size = (width * height) as usize;

  ImageBuffer::from_fn(width, height, |x, y| {
    let idx = (y * width + x) as usize;
    let mut pixel = [0u8; RGB_CHANNELS];
    for (plane, chunk) in src.chunks_exact(plane_size).take(RGB_CHANNELS).enumerate() {
      pixel[order.source_channel(plane)] = chunk[idx];
    }
    Rgb(pixel)
  })
}
