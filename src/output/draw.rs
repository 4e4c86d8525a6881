// 该文件是 Tuili （推理） 项目的一部分。
// src/output/draw.rs - 推理结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_line_segment_mut},
  rect::Rect,
};

use crate::model::{Detection, HeadPose, MASK_THRESHOLD};

// 掩码叠加常量
const MASK_ALPHA: f32 = 0.7;
const BOX_COLOR: [u8; 3] = [1, 0, 0];

// 头部姿态坐标轴
const AXIS_SCALE: f32 = 0.25; // 相对于图像短边
const AXIS_COLORS: [[u8; 3]; 3] = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];

pub struct Draw {
  mask_alpha: f32,
  mask_threshold: f32,
  box_color: [u8; 3],
  axis_scale: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      mask_alpha: MASK_ALPHA,
      mask_threshold: MASK_THRESHOLD,
      box_color: BOX_COLOR,
      axis_scale: AXIS_SCALE,
    }
  }
}

pub trait DrawOnImage<R> {
  fn draw_on_image(&self, image: &mut RgbImage, result: &R);
}

impl Draw {
  /// 在检测框内按掩码混合类别颜色，并绘制边框
  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let rect = detection.rect;
    let (width, height) = image.dimensions();
    let box_w = rect.width.min(width.saturating_sub(rect.x));
    let box_h = rect.height.min(height.saturating_sub(rect.y));
    if box_w == 0 || box_h == 0 {
      return;
    }

    let mask = detection.mask.to_box_mask(box_w, box_h, self.mask_threshold);
    let color = detection.color();
    for (mx, my, m) in mask.enumerate_pixels() {
      if m[0] == 0 {
        continue;
      }
      let pixel = image.get_pixel_mut(rect.x + mx, rect.y + my);
      for c in 0..3 {
        let blended =
          self.mask_alpha * color[c] as f32 + (1.0 - self.mask_alpha) * pixel[c] as f32;
        pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
      }
    }

    let outline = Rect::at(rect.x as i32, rect.y as i32).of_size(box_w, box_h);
    draw_hollow_rect_mut(image, outline, Rgb(self.box_color));
  }
}

impl DrawOnImage<Vec<Detection>> for Draw {
  fn draw_on_image(&self, image: &mut RgbImage, result: &Vec<Detection>) {
    for detection in result {
      self.draw_detection(image, detection);
    }
  }
}

/// 姿态旋转后三个坐标轴在图像平面上的偏移 (dx, dy)，长度为 `scale`
pub fn pose_axes(pose: &HeadPose, scale: f32) -> [(f32, f32); 3] {
  let (yaw, pitch, roll) = (
    pose.yaw.to_radians(),
    pose.pitch.to_radians(),
    pose.roll.to_radians(),
  );
  let (sy, cy) = yaw.sin_cos();
  let (sp, cp) = pitch.sin_cos();
  let (sr, cr) = roll.sin_cos();

  // R = Rz(roll) * Ry(yaw) * Rx(pitch)
  let r = [
    [cr * cy, cr * sy * sp - sr * cp, cr * sy * cp + sr * sp],
    [sr * cy, sr * sy * sp + cr * cp, sr * sy * cp - cr * sp],
    [-sy, cy * sp, cy * cp],
  ];
  let project = |v: [f32; 3]| {
    let x = r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2];
    let y = r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2];
    (x * scale, y * scale)
  };
  [
    project([1.0, 0.0, 0.0]),
    project([0.0, -1.0, 0.0]),
    project([0.0, 0.0, -1.0]),
  ]
}

impl DrawOnImage<HeadPose> for Draw {
  fn draw_on_image(&self, image: &mut RgbImage, result: &HeadPose) {
    let (width, height) = image.dimensions();
    let center = (width as f32 / 2.0, height as f32 / 2.0);
    let scale = width.min(height) as f32 * self.axis_scale;

    for ((dx, dy), color) in pose_axes(result, scale).into_iter().zip(AXIS_COLORS) {
      draw_line_segment_mut(
        image,
        center,
        (center.0 + dx, center.1 + dy),
        Rgb(color),
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{MaskSlab, PixelRect};

  fn detection(rect: PixelRect, mask_value: f32) -> Detection {
    Detection {
      batch: 0,
      class_id: 1,
      probability: 0.9,
      corners: [
        rect.x as f32,
        rect.y as f32,
        (rect.x + rect.width) as f32,
        (rect.y + rect.height) as f32,
      ],
      rect,
      color_index: 0,
      mask: MaskSlab {
        width: 2,
        height: 2,
        data: vec![mask_value; 4],
      },
    }
  }

  #[test]
  fn mask_blends_inside_box_only() {
    let mut image = RgbImage::new(20, 20);
    let rect = PixelRect {
      x: 5,
      y: 5,
      width: 10,
      height: 10,
    };
    Draw::default().draw_on_image(&mut image, &vec![detection(rect, 1.0)]);

    // 内部像素为 0.7 * 颜色
    let [r, g, b] = crate::model::CITYSCAPES_COLORS[0];
    let expected = Rgb([
      (0.7 * r as f32).round() as u8,
      (0.7 * g as f32).round() as u8,
      (0.7 * b as f32).round() as u8,
    ]);
    assert_eq!(*image.get_pixel(10, 10), expected);
    // 边框
    assert_eq!(*image.get_pixel(5, 5), Rgb(BOX_COLOR));
    assert_eq!(*image.get_pixel(14, 14), Rgb(BOX_COLOR));
    // 框外不变
    assert_eq!(*image.get_pixel(2, 2), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(16, 16), Rgb([0, 0, 0]));
  }

  #[test]
  fn mask_below_threshold_leaves_pixels() {
    let mut image = RgbImage::from_pixel(20, 20, Rgb([10, 20, 30]));
    let rect = PixelRect {
      x: 0,
      y: 0,
      width: 8,
      height: 8,
    };
    Draw::default().draw_on_image(&mut image, &vec![detection(rect, 0.1)]);
    assert_eq!(*image.get_pixel(4, 4), Rgb([10, 20, 30]));
  }

  #[test]
  fn box_past_image_edge_is_clipped() {
    let mut image = RgbImage::new(10, 10);
    let rect = PixelRect {
      x: 6,
      y: 6,
      width: 10,
      height: 10,
    };
    Draw::default().draw_on_image(&mut image, &vec![detection(rect, 1.0)]);
    assert_ne!(*image.get_pixel(8, 8), Rgb([0, 0, 0]));
  }

  #[test]
  fn neutral_pose_axes_point_right_up_and_at_viewer() {
    let [x, y, z] = pose_axes(&HeadPose::default(), 10.0);
    assert!((x.0 - 10.0).abs() < 1e-4 && x.1.abs() < 1e-4);
    assert!(y.0.abs() < 1e-4 && (y.1 + 10.0).abs() < 1e-4);
    assert!(z.0.abs() < 1e-4 && z.1.abs() < 1e-4);
  }

  #[test]
  fn roll_rotates_x_axis_in_plane() {
    let pose = HeadPose {
      yaw: 0.0,
      pitch: 0.0,
      roll: 90.0,
    };
    let [x, _, _] = pose_axes(&pose, 10.0);
    assert!(x.0.abs() < 1e-4);
    assert!((x.1 - 10.0).abs() < 1e-4);
  }

  #[test]
  fn head_pose_draws_from_center() {
    let mut image = RgbImage::new(40, 40);
    Draw::default().draw_on_image(&mut image, &HeadPose::default());
    assert_eq!(*image.get_pixel(25, 20), Rgb(AXIS_COLORS[0]));
    assert_eq!(*image.get_pixel(20, 15), Rgb(AXIS_COLORS[1]));
  }
}
