// 该文件是 Tuili （推理） 项目的一部分。
// src/bin/vector_cnn.rs - 特征向量提取示例
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

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use url::Url;

use tuili::{
  cli,
  FromUrl,
  input::InputWrapper,
  model::{ModelHandleBuilder, VectorCnn, cosine_similarity},
  output::SaveJsonFileOutput,
  task::{OneShotTask, RepeatShotTask, Task},
};

/// 提取图像特征，并计算两两之间的余弦相似度
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，例如 openvino:///models/reid.xml?device=CPU&batch=8
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像或目录，可以重复
  #[arg(long, value_name = "SOURCE", required = true)]
  pub input: Vec<Url>,
  /// 输出目录，json:///dir
  #[arg(long, value_name = "OUTPUT", default_value = "json:///tmp/tuili")]
  pub output: Url,
  /// 特征整理成的形状，例如 16x16
  #[arg(long, value_name = "HxW")]
  pub shape: Option<String>,
  /// 重复推理次数，大于 1 时报告平均延迟
  #[arg(long, default_value_t = 1)]
  pub repeat: usize,
}

fn parse_shape(text: &str) -> Result<(usize, usize)> {
  let (h, w) = text
    .split_once(['x', 'X'])
    .with_context(|| format!("形状应为 HxW: {}", text))?;
  Ok((h.trim().parse()?, w.trim().parse()?))
}

fn run(args: Args) -> Result<()> {
  info!("模型文件路径: {}", args.model);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_urls(&args.input)?;
  let output = SaveJsonFileOutput::from_url(&args.output)?;
  let handle = ModelHandleBuilder::from_url(&args.model)?
    .build()?
    .into_handle();
  let mut model = VectorCnn::new(handle)?;
  if let Some(shape) = args.shape.as_deref() {
    let (h, w) = parse_shape(shape)?;
    model = model.with_shape(h, w);
  }

  let results = if args.repeat > 1 {
    RepeatShotTask::new(args.repeat).run_task(input.into_frames(), &mut model, &output)?
  } else {
    OneShotTask.run_task(input.into_frames(), &mut model, &output)?
  };

  for (i, (a, ea)) in results.iter().enumerate() {
    for (b, eb) in &results[i + 1..] {
      match cosine_similarity(ea, eb) {
        Some(s) => info!(
          "相似度 {} <-> {}: {:.4}",
          a.source.display(),
          b.source.display(),
          s
        ),
        None => info!(
          "相似度 {} <-> {}: 无法计算",
          a.source.display(),
          b.source.display()
        ),
      }
    }
  }
  Ok(())
}

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  let args = match cli::parse_args::<Args>() {
    Ok(args) => args,
    Err(code) => return code,
  };

  match run(args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("运行失败: {:#}", e);
      ExitCode::FAILURE
    }
  }
}
