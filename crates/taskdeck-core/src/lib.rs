pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod controller;
pub mod datetime;
pub mod error;
pub mod filter;
pub mod remote;
pub mod render;
pub mod report;
pub mod session;
pub mod store;
pub mod task;

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::cli::Command;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    memory = cli.memory,
    "starting taskdeck"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );
  debug!(files = ?cfg.loaded_files, "configuration loaded");

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;
  let credentials =
    session::Credentials::from_config(
      &cfg
    );

  match &cli.command {
    | Command::Login {
      username,
      password
    } => {
      let password = match password {
        | Some(password) => password.clone(),
        | None => {
          commands::read_password(
            io::stdin().lock()
          )?
        }
      };
      let session = session::login(
        &data_dir,
        &credentials,
        username,
        &password
      )?;
      println!(
        "Logged in as {}.",
        session.username
      );
      return Ok(());
    }
    | Command::Logout => {
      if session::logout(&data_dir)? {
        println!("Logged out.");
      } else {
        println!("No active session.");
      }
      return Ok(());
    }
    | _ => {}
  }

  let session = session::require(
    &data_dir,
    &credentials
  )?;
  let renderer =
    render::Renderer::new(&cfg)?;
  let echo_errors =
    cli.command == Command::Shell;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async {
    let store = commands::build_store(
      &cfg, cli.memory
    )?;
    let notifier = Arc::new(
      commands::TerminalNotifier::new(
        renderer.clone(),
        echo_errors
      )
    );
    let workspace =
      commands::Workspace::new(
        controller::TaskCollectionController::new(
          store, notifier
        ),
        renderer,
        cfg.report_dir()
      );

    commands::dispatch(
      &workspace,
      &session,
      cli.command
    )
    .await
  })?;

  info!("done");
  Ok(())
}
