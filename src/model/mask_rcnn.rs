// 该文件是 Tuili （推理） 项目的一部分。
// src/model/mask_rcnn.rs - Mask R-CNN 实例分割
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

use std::collections::BTreeMap;

use image::{GrayImage, ImageBuffer, Luma, imageops::FilterType};
use tracing::{debug, error, info};

use crate::{
  frame::Frame,
  model::{Model, ModelError, ModelHandle, OutputBlobs},
};

pub const PROBABILITY_THRESHOLD: f32 = 0.2;
/// 掩码像素大于该值时属于目标
pub const MASK_THRESHOLD: f32 = 0.5;

/// 每个检测框描述的长度 (batch, label, prob, x1, y1, x2, y2)
const BOX_DESCRIPTION_SIZE: usize = 7;

pub const CITYSCAPES_COLORS: [[u8; 3]; 19] = [
  [128, 64, 128],
  [244, 35, 232],
  [70, 70, 70],
  [102, 102, 156],
  [190, 153, 153],
  [153, 153, 153],
  [250, 170, 30],
  [220, 220, 0],
  [107, 142, 35],
  [152, 251, 152],
  [70, 130, 180],
  [220, 20, 60],
  [255, 0, 0],
  [0, 0, 142],
  [0, 0, 70],
  [0, 60, 100],
  [0, 80, 100],
  [0, 0, 230],
  [119, 11, 32],
];

/// 类别到调色板下标的映射，按第一次出现的顺序分配
#[derive(Debug, Clone, Default)]
pub struct ClassColors {
  assigned: BTreeMap<u32, usize>,
}

impl ClassColors {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn index_of(&mut self, class_id: u32) -> usize {
    let next = self.assigned.len();
    *self.assigned.entry(class_id).or_insert(next)
  }

  pub fn len(&self) -> usize {
    self.assigned.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assigned.is_empty()
  }

  pub fn color(index: usize) -> [u8; 3] {
    CITYSCAPES_COLORS[index % CITYSCAPES_COLORS.len()]
  }
}

/// 单个类别的掩码概率图
#[derive(Debug, Clone, PartialEq)]
pub struct MaskSlab {
  pub width: u32,
  pub height: u32,
  pub data: Vec<f32>,
}

impl MaskSlab {
  /// 缩放到检测框大小并按阈值二值化，目标像素为 255
  pub fn to_box_mask(&self, width: u32, height: u32, threshold: f32) -> GrayImage {
    let empty = GrayImage::new(width, height);
    let Some(slab) =
      ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(self.width, self.height, self.data.clone())
    else {
      return empty;
    };
    if width == 0 || height == 0 {
      return empty;
    }
    let resized = image::imageops::resize(&slab, width, height, FilterType::Triangle);
    GrayImage::from_fn(width, height, |x, y| {
      if resized.get_pixel(x, y)[0] > threshold {
        Luma([255])
      } else {
        Luma([0])
      }
    })
  }
}

/// 整数像素框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 在本次推理中的批次下标
  pub batch: usize,
  pub class_id: u32,
  pub probability: f32,
  /// 像素坐标 [x1, y1, x2, y2]，已限制在图像范围内
  pub corners: [f32; 4],
  pub rect: PixelRect,
  pub color_index: usize,
  pub mask: MaskSlab,
}

impl Detection {
  pub fn color(&self) -> [u8; 3] {
    ClassColors::color(self.color_index)
  }
}

#[derive(Debug, Clone)]
pub struct MaskRcnnConfig {
  pub detection_output_name: String,
  pub masks_name: String,
  pub probability_threshold: f32,
}

impl Default for MaskRcnnConfig {
  fn default() -> Self {
    Self {
      detection_output_name: "reshape_do_2d".to_string(),
      masks_name: "masks".to_string(),
      probability_threshold: PROBABILITY_THRESHOLD,
    }
  }
}

/// 检测输出与掩码输出的解码器
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  config: MaskRcnnConfig,
  batch_size: usize,
  colors: ClassColors,
}

impl DetectionDecoder {
  pub fn new(config: MaskRcnnConfig, batch_size: usize) -> Self {
    Self {
      config,
      batch_size,
      colors: ClassColors::new(),
    }
  }

  /// 解码一次推理的结果。
  ///
  /// `image_sizes` 是本次推理中每张图像的 (宽, 高)，其长度即实际数量；
  /// 返回值按图像分组。
  pub fn decode(
    &mut self,
    blobs: &OutputBlobs<'_>,
    image_sizes: &[(u32, u32)],
  ) -> Result<Vec<Vec<Detection>>, ModelError> {
    let detections = blobs.get(&self.config.detection_output_name)?;
    let masks = blobs.get(&self.config.masks_name)?;

    let do_dims = &detections.desc().dims;
    if do_dims.len() != 2 || do_dims[1] < BOX_DESCRIPTION_SIZE {
      return Err(ModelError::Logic(format!(
        "检测输出形状应为 (N, {}), 实际为 {:?}",
        BOX_DESCRIPTION_SIZE, do_dims
      )));
    }
    let box_len = do_dims[1];
    let [boxes, channels, mask_h, mask_w] = match masks.desc().dims.as_slice() {
      &[n, c, h, w] => [n, c, h, w],
      dims => {
        return Err(ModelError::Logic(format!(
          "掩码输出应为 4 维, 实际为 {:?}",
          dims
        )));
      }
    };
    let do_data = detections.as_f32()?;
    let masks_data = masks.as_f32()?;
    let slab_len = mask_h * mask_w;
    let box_stride = channels * slab_len;

    let rows = boxes.min(do_data.len() / box_len);
    let mut results = vec![Vec::new(); image_sizes.len()];

    for box_idx in 0..rows {
      let row = &do_data[box_idx * box_len..box_idx * box_len + BOX_DESCRIPTION_SIZE];
      let batch = row[0] as i32;
      if batch < 0 {
        break;
      }
      let batch = batch as usize;
      if batch >= self.batch_size {
        error!("检测框 {} 的批次下标 {} 超出批次大小 {}", box_idx, batch, self.batch_size);
        return Err(ModelError::Logic(format!(
          "检测输出中的批次下标无效: {}",
          batch
        )));
      }
      let Some(&(img_w, img_h)) = image_sizes.get(batch) else {
        // 填充槽位的结果
        continue;
      };

      let (w, h) = (img_w as f32, img_h as f32);
      let probability = row[2];
      let x1 = (row[3] * w).clamp(0.0, w);
      let y1 = (row[4] * h).clamp(0.0, h);
      let x2 = (row[5] * w).clamp(0.0, w);
      let y2 = (row[6] * h).clamp(0.0, h);
      let box_width = (x2 - x1) as i32;
      let box_height = (y2 - y1) as i32;
      let class_id = (row[1] + 1e-6) as u32;

      // NaN 概率也不通过
      let confident = probability > self.config.probability_threshold;
      if !confident || box_width <= 0 || box_height <= 0 {
        continue;
      }
      if class_id == 0 || class_id as usize > channels {
        return Err(ModelError::Logic(format!(
          "类别 {} 没有对应的掩码 (共 {} 个类别)",
          class_id, channels
        )));
      }

      let color_index = self.colors.index_of(class_id);
      let offset = box_stride * box_idx + slab_len * (class_id as usize - 1);
      let slab = masks_data
        .get(offset..offset + slab_len)
        .ok_or_else(|| ModelError::Shape(format!("掩码输出不足以读取检测框 {}", box_idx)))?;

      info!(
        "检测到类别 {}, 概率 {}, 批次 {}: [{}, {}], [{}, {}]",
        class_id, probability, batch, x1, y1, x2, y2
      );

      results[batch].push(Detection {
        batch,
        class_id,
        probability,
        corners: [x1, y1, x2, y2],
        rect: PixelRect {
          x: x1 as u32,
          y: y1 as u32,
          width: box_width as u32,
          height: box_height as u32,
        },
        color_index,
        mask: MaskSlab {
          width: mask_w as u32,
          height: mask_h as u32,
          data: slab.to_vec(),
        },
      });
    }

    debug!(
      "解码完成: {} 张图像, {} 个检测",
      image_sizes.len(),
      results.iter().map(Vec::len).sum::<usize>()
    );
    Ok(results)
  }
}

pub struct MaskRcnn {
  handle: ModelHandle,
  decoder: DetectionDecoder,
}

impl MaskRcnn {
  pub fn new(handle: ModelHandle, config: MaskRcnnConfig) -> Result<Self, ModelError> {
    for name in [&config.detection_output_name, &config.masks_name] {
      if !handle.output_names().iter().any(|n| n == name) {
        error!("网络中没有输出 {}", name);
        return Err(ModelError::MissingOutput(name.clone()));
      }
    }
    let decoder = DetectionDecoder::new(config, handle.batch_size());
    Ok(Self { handle, decoder })
  }

  pub fn batch_size(&self) -> usize {
    self.handle.batch_size()
  }
}

impl Model for MaskRcnn {
  type Input = Frame;
  type Output = Vec<Detection>;
  type Error = ModelError;

  fn infer(&mut self, input: &[Frame]) -> Result<Vec<Vec<Detection>>, ModelError> {
    let images: Vec<_> = input.iter().map(|f| &f.image).collect();
    let sizes: Vec<(u32, u32)> = input.iter().map(|f| f.image.dimensions()).collect();
    let mut results = Vec::with_capacity(input.len());
    let mut offset = 0;

    let Self { handle, decoder } = self;
    handle.infer_batch(&images, |blobs, count| {
      results.extend(decoder.decode(blobs, &sizes[offset..offset + count])?);
      offset += count;
      Ok(())
    })?;
    Ok(results)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::TensorBuffer;

  fn decode_rows(
    rows: &[[f32; 7]],
    classes: usize,
    batch_size: usize,
    sizes: &[(u32, u32)],
  ) -> Result<Vec<Vec<Detection>>, ModelError> {
    let n = rows.len();
    let do_data: Vec<f32> = rows.iter().flatten().copied().collect();
    let detections = TensorBuffer::from_f32([n, 7], do_data).unwrap();
    let masks = TensorBuffer::from_f32([n, classes, 2, 2], vec![1.0; n * classes * 4]).unwrap();
    let blobs = OutputBlobs::new(vec![
      ("reshape_do_2d", detections.view()),
      ("masks", masks.view()),
    ]);
    DetectionDecoder::new(MaskRcnnConfig::default(), batch_size).decode(&blobs, sizes)
  }

  #[test]
  fn single_detection_on_black_image() {
    let result = decode_rows(&[[0.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5]], 2, 1, &[(300, 300)]).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].len(), 1);

    let det = &result[0][0];
    assert_eq!(det.class_id, 1);
    assert!((det.probability - 0.9).abs() < 1e-6);
    for (actual, expected) in det.corners.iter().zip([30.0, 30.0, 150.0, 150.0]) {
      assert!((actual - expected).abs() < 1e-3, "{} != {}", actual, expected);
    }
    assert_eq!((det.rect.x, det.rect.y), (30, 30));
    assert!((119..=120).contains(&det.rect.width));
  }

  #[test]
  fn negative_batch_index_stops_decoding() {
    let rows = [
      [0.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5],
      [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
      [0.0, 2.0, 0.99, 0.2, 0.2, 0.9, 0.9],
    ];
    let result = decode_rows(&rows, 2, 1, &[(100, 100)]).unwrap();
    assert_eq!(result[0].len(), 1);
    assert_eq!(result[0][0].class_id, 1);
  }

  #[test]
  fn low_probability_and_empty_boxes_are_skipped() {
    let rows = [
      [0.0, 1.0, 0.2, 0.1, 0.1, 0.5, 0.5],
      [0.0, 1.0, 0.9, 0.5, 0.5, 0.5, 0.9],
      [0.0, 1.0, 0.9, 0.5, 0.5, 0.504, 0.9],
    ];
    let result = decode_rows(&rows, 1, 1, &[(100, 100)]).unwrap();
    assert!(result[0].is_empty());
  }

  #[test]
  fn nan_probability_is_skipped() {
    let rows = [[0.0, 1.0, f32::NAN, 0.1, 0.1, 0.5, 0.5]];
    let result = decode_rows(&rows, 1, 1, &[(100, 100)]).unwrap();
    assert!(result[0].is_empty());
  }

  #[test]
  fn batch_index_beyond_batch_size_is_logic_error() {
    let rows = [[2.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5]];
    assert!(matches!(
      decode_rows(&rows, 1, 2, &[(10, 10), (10, 10)]),
      Err(ModelError::Logic(_))
    ));
  }

  #[test]
  fn padding_slots_are_ignored() {
    // 批次为 2，但只有一张实际图像
    let rows = [
      [1.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5],
      [0.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5],
    ];
    let result = decode_rows(&rows, 1, 2, &[(50, 50)]).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].len(), 1);
    assert_eq!(result[0][0].batch, 0);
  }

  #[test]
  fn class_without_mask_is_logic_error() {
    let rows = [[0.0, 3.0, 0.9, 0.1, 0.1, 0.5, 0.5]];
    assert!(matches!(
      decode_rows(&rows, 2, 1, &[(10, 10)]),
      Err(ModelError::Logic(_))
    ));
  }

  #[test]
  fn same_class_shares_color() {
    let rows = [
      [0.0, 2.0, 0.9, 0.1, 0.1, 0.5, 0.5],
      [0.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5],
      [0.0, 2.0, 0.9, 0.5, 0.5, 0.9, 0.9],
    ];
    let result = decode_rows(&rows, 2, 1, &[(100, 100)]).unwrap();
    let colors: Vec<usize> = result[0].iter().map(|d| d.color_index).collect();
    assert_eq!(colors, vec![0, 1, 0]);
    assert_eq!(result[0][0].color(), result[0][2].color());
    assert_ne!(result[0][0].color(), result[0][1].color());
  }

  #[test]
  fn palette_wraps_after_all_colors_used() {
    let mut colors = ClassColors::new();
    let n = CITYSCAPES_COLORS.len();
    let indices: Vec<usize> = (0..=n as u32).map(|class| colors.index_of(class + 1)).collect();
    assert_eq!(indices, (0..=n).collect::<Vec<_>>());
    let distinct: std::collections::HashSet<[u8; 3]> =
      indices[..n].iter().map(|&i| ClassColors::color(i)).collect();
    assert_eq!(distinct.len(), n);
    assert_eq!(ClassColors::color(indices[n]), ClassColors::color(0));
    // 再次出现的类别沿用原来的颜色
    assert_eq!(colors.index_of(5), 4);
    assert_eq!(colors.len(), n + 1);
  }

  #[test]
  fn mask_is_resized_and_thresholded() {
    let slab = MaskSlab {
      width: 2,
      height: 1,
      data: vec![0.0, 1.0],
    };
    let mask = slab.to_box_mask(4, 2, MASK_THRESHOLD);
    assert_eq!(mask.dimensions(), (4, 2));
    assert_eq!(mask.get_pixel(0, 0)[0], 0);
    assert_eq!(mask.get_pixel(3, 1)[0], 255);
  }
}
