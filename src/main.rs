// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use difftester::dispatch::Opts;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    // Diagnostics go to stderr; stdout carries test results only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .init();

    let opts = Opts::parse();
    let code = opts.exec()?;
    std::process::exit(code);
}
