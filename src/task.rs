// 该文件是 Tuili （推理） 项目的一部分。
// src/task.rs - 任务循环
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

use std::time::Instant;

use tracing::{info, warn};

use crate::{metrics::PerformanceMetrics, model::Model, output::Render};

/// 预热次数，不计入平均延迟
const WARMUP_RUNS: usize = 2;

pub trait Task<I, M, O>: Sized {
  type Frame;
  type Output;
  type Error;

  /// 运行任务，返回每一帧和它的推理结果
  fn run_task(
    self,
    input: I,
    model: &mut M,
    output: &O,
  ) -> Result<Vec<(Self::Frame, Self::Output)>, Self::Error>;
}

fn collect_frames<F>(input: impl Iterator<Item = F>) -> anyhow::Result<Vec<F>> {
  let frames: Vec<F> = input.collect();
  if frames.is_empty() {
    anyhow::bail!("没有输入帧");
  }
  info!("读取了 {} 帧图像", frames.len());
  Ok(frames)
}

fn render_all<F, D, O>(output: &O, frames: &[F], results: &[D]) -> anyhow::Result<()>
where
  O: Render<F, D>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  for (frame, result) in frames.iter().zip(results) {
    output.render_result(frame, result)?;
  }
  Ok(())
}

fn check_count<D>(frames: usize, results: &[D]) -> anyhow::Result<()> {
  if results.len() != frames {
    anyhow::bail!("推理结果数量 {} 与输入帧数 {} 不一致", results.len(), frames);
  }
  Ok(())
}

/// 所有帧推理一次
pub struct OneShotTask;

impl<F, D, ME, I, M, O> Task<I, M, O> for OneShotTask
where
  ME: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Frame = F;
  type Output = D;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: &mut M, output: &O) -> Result<Vec<(F, D)>, Self::Error> {
    info!("开始任务...");
    let frames = collect_frames(input)?;

    let mut metrics = PerformanceMetrics::new();
    let now = Instant::now();
    let results = model.infer(&frames)?;
    let elapsed = metrics.update(now, frames.len());
    info!("推理完成，耗时: {:.2?}", elapsed);
    check_count(frames.len(), &results)?;

    render_all(output, &frames, &results)?;
    metrics.log_report(0);

    Ok(frames.into_iter().zip(results).collect())
  }
}

/// 重复推理多次，用于测量平均延迟
#[derive(Debug, Clone, Copy)]
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  pub fn new(times: usize) -> Self {
    Self {
      times: times.max(1),
    }
  }
}

impl<F, D, ME, I, M, O> Task<I, M, O> for RepeatShotTask
where
  ME: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Frame = F;
  type Output = D;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: &mut M, output: &O) -> Result<Vec<(F, D)>, Self::Error> {
    info!("开始任务，重复 {} 次...", self.times);
    let frames = collect_frames(input)?;

    let mut metrics = PerformanceMetrics::new();
    let mut results = Vec::new();
    for i in 0..self.times {
      let now = Instant::now();
      results = model.infer(&frames)?;
      let elapsed = metrics.update(now, frames.len());
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
    }
    check_count(frames.len(), &results)?;

    let skip = if self.times > WARMUP_RUNS {
      WARMUP_RUNS
    } else {
      0
    };
    if let Some(latency) = metrics.latency(skip) {
      warn!("平均推理时间: {:.2?}", latency);
    }
    metrics.log_report(skip);

    render_all(output, &frames, &results)?;
    Ok(frames.into_iter().zip(results).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;

  #[derive(Debug, thiserror::Error)]
  #[error("测试错误")]
  struct TestError;

  #[derive(Default)]
  struct Doubler {
    calls: usize,
  }

  impl Model for Doubler {
    type Input = i32;
    type Output = i32;
    type Error = TestError;

    fn infer(&mut self, input: &[i32]) -> Result<Vec<i32>, TestError> {
      self.calls += 1;
      Ok(input.iter().map(|v| v * 2).collect())
    }
  }

  #[derive(Default)]
  struct Collect {
    rendered: RefCell<Vec<(i32, i32)>>,
  }

  impl Render<i32, i32> for Collect {
    type Error = TestError;

    fn render_result(&self, frame: &i32, result: &i32) -> Result<(), TestError> {
      self.rendered.borrow_mut().push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_infers_and_renders_every_frame() {
    let mut model = Doubler::default();
    let output = Collect::default();
    let results = OneShotTask
      .run_task(vec![1, 2, 3].into_iter(), &mut model, &output)
      .unwrap();
    assert_eq!(results, vec![(1, 2), (2, 4), (3, 6)]);
    assert_eq!(model.calls, 1);
    assert_eq!(output.rendered.borrow().len(), 3);
  }

  #[test]
  fn repeat_shot_renders_once() {
    let mut model = Doubler::default();
    let output = Collect::default();
    RepeatShotTask::new(5)
      .run_task(vec![7].into_iter(), &mut model, &output)
      .unwrap();
    assert_eq!(model.calls, 5);
    assert_eq!(*output.rendered.borrow(), vec![(7, 14)]);
  }

  #[test]
  fn empty_input_is_error() {
    let mut model = Doubler::default();
    let output = Collect::default();
    assert!(
      OneShotTask
        .run_task(std::iter::empty(), &mut model, &output)
        .is_err()
    );
    assert_eq!(model.calls, 0);
  }
}
