// 该文件是 Tuili （推理） 项目的一部分。
// src/cli.rs - 命令行参数解析
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

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

/// 解析命令行参数。
///
/// `--help` 与 `--version` 打印后以 0 退出；其他参数错误打印用法后以 1 退出。
pub fn parse_args<A: Parser>() -> Result<A, ExitCode> {
  parse_args_from(std::env::args_os())
}

pub fn parse_args_from<A, I, T>(args: I) -> Result<A, ExitCode>
where
  A: Parser,
  I: IntoIterator<Item = T>,
  T: Into<OsString> + Clone,
{
  A::try_parse_from(args).map_err(|e| {
    let _ = e.print();
    if e.use_stderr() {
      error!("命令行参数无效: {}", e.kind());
      ExitCode::FAILURE
    } else {
      ExitCode::SUCCESS
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Parser, Debug)]
  #[command(version)]
  struct Args {
    #[arg(long, required = true)]
    input: Vec<String>,
  }

  #[test]
  fn help_and_version_exit_successfully() {
    for flag in ["--help", "--version"] {
      assert_eq!(
        parse_args_from::<Args, _, _>(["tool", flag]).unwrap_err(),
        ExitCode::SUCCESS
      );
    }
  }

  #[test]
  fn missing_argument_exits_with_failure() {
    assert_eq!(
      parse_args_from::<Args, _, _>(["tool"]).unwrap_err(),
      ExitCode::FAILURE
    );
    assert_eq!(
      parse_args_from::<Args, _, _>(["tool", "--bogus"]).unwrap_err(),
      ExitCode::FAILURE
    );
  }

  #[test]
  fn valid_arguments_parse() {
    let args: Args = parse_args_from(["tool", "--input", "a", "--input", "b"]).unwrap();
    assert_eq!(args.input, vec!["a", "b"]);
  }
}
