// 该文件是 Tuili （推理） 项目的一部分。
// src/metrics.rs - 延迟统计
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

use std::time::{Duration, Instant};

use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct PerformanceMetrics {
  samples: Vec<Duration>,
  frames: usize,
}

impl PerformanceMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// 记录一次从 `start` 到现在、处理了 `frames` 帧的调用
  pub fn update(&mut self, start: Instant, frames: usize) -> Duration {
    let elapsed = start.elapsed();
    self.record(elapsed, frames);
    elapsed
  }

  pub fn record(&mut self, elapsed: Duration, frames: usize) {
    self.samples.push(elapsed);
    self.frames += frames;
  }

  pub fn count(&self) -> usize {
    self.samples.len()
  }

  /// 平均延迟；`skip` 跳过最开始的若干次（预热）
  pub fn latency(&self, skip: usize) -> Option<Duration> {
    let kept = self.samples.iter().skip(skip);
    let n = kept.len();
    if n == 0 {
      return None;
    }
    Some(kept.sum::<Duration>() / n as u32)
  }

  pub fn fps(&self) -> Option<f64> {
    let total: Duration = self.samples.iter().sum();
    if total.is_zero() {
      None
    } else {
      Some(self.frames as f64 / total.as_secs_f64())
    }
  }

  pub fn log_report(&self, skip: usize) {
    info!("性能统计:");
    match self.latency(skip) {
      Some(latency) => info!("\t延迟: {:.1} ms", latency.as_secs_f64() * 1000.0),
      None => info!("\t延迟: 无数据"),
    }
    if let Some(fps) = self.fps() {
      info!("\tFPS: {:.1}", fps);
    }
  }
}
