// 该文件是 Tuili （推理） 项目的一部分。
// src/bin/mask_rcnn.rs - Mask R-CNN 实例分割示例
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

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use tuili::{
  cli,
  FromUrl,
  input::InputWrapper,
  model::{InputPolicy, MaskRcnn, MaskRcnnConfig, ModelHandleBuilder},
  output::OutputWrapper,
  task::{OneShotTask, RepeatShotTask, Task},
};

/// Mask R-CNN 实例分割
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，例如 openvino:///models/mask_rcnn.xml?device=CPU
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像或目录，可以重复
  #[arg(long, value_name = "SOURCE", required = true)]
  pub input: Vec<Url>,
  /// 输出目录，image:///dir 或 json:///dir
  #[arg(long, value_name = "OUTPUT", default_value = "image:///tmp/tuili")]
  pub output: Url,
  /// 检测输出层的名称
  #[arg(long, default_value = "reshape_do_2d")]
  pub detection_output_name: String,
  /// 掩码输出层的名称
  #[arg(long, default_value = "masks")]
  pub masks_name: String,
  /// 重复推理次数，大于 1 时报告平均延迟
  #[arg(long, default_value_t = 1)]
  pub repeat: usize,
}

fn run(args: Args) -> Result<()> {
  info!("模型文件路径: {}", args.model);
  info!("输入来源: {:?}", args.input.iter().map(Url::as_str).collect::<Vec<_>>());
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_urls(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let config = MaskRcnnConfig {
    detection_output_name: args.detection_output_name,
    masks_name: args.masks_name,
    ..MaskRcnnConfig::default()
  };
  let loaded = ModelHandleBuilder::from_url(&args.model)?
    .input_policy(InputPolicy::ImageWithInfo)
    .extra_output(&config.detection_output_name)
    .build()?;
  let degraded = loaded.is_degraded();
  let mut model = MaskRcnn::new(loaded.into_handle(), config)?;
  if degraded {
    warn!("降级加载, 以批次大小 {} 运行", model.batch_size());
  }

  let results = if args.repeat > 1 {
    RepeatShotTask::new(args.repeat).run_task(input.into_frames(), &mut model, &output)?
  } else {
    OneShotTask.run_task(input.into_frames(), &mut model, &output)?
  };

  for (frame, detections) in &results {
    info!(
      "{}: {} 个目标",
      frame.source.display(),
      detections.len()
    );
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
