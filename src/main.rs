//! AFC CLI - Automated Filament Changer bench
//!
//! Command-line interface for driving the AFC orchestrator on simulated
//! hardware.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use afc::cli::commands::{self, Bench};
use afc::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    info!("AFC bench v{}", env!("CARGO_PKG_VERSION"));

    let Some(cmd) = cli.command else {
        println!("AFC bench v{}", env!("CARGO_PKG_VERSION"));
        println!("Use --help for available commands");
        return Ok(());
    };

    if let Commands::CheckConfig = cmd {
        commands::check_config(cli.config.as_deref())?;
        return Ok(());
    }

    let mut bench = commands::open_bench(cli.config.as_deref(), &cli.state)
        .with_context(|| format!("opening bench with state {}", cli.state.display()))?;
    handle_command(&mut bench, cmd)?;
    Ok(())
}

fn handle_command(bench: &mut Bench, cmd: Commands) -> afc::Result<()> {
    match cmd {
        Commands::Prep => commands::prep(bench),
        Commands::ToolLoad { lane } => commands::tool_load(bench, &lane),
        Commands::ToolUnload { lane } => commands::tool_unload(bench, lane.as_deref()),
        Commands::ChangeTool { target } => commands::change_tool(bench, &target),
        Commands::LaneMove { lane, distance } => commands::lane_move(bench, &lane, distance),
        Commands::LaneUnload { lane } => commands::lane_unload(bench, &lane),
        Commands::HubLoad { lane } => commands::hub_load(bench, &lane),
        Commands::SetSpoolId { lane, spool_id } => commands::set_spool_id(bench, &lane, spool_id),
        Commands::SetColor { lane, color } => commands::set_color(bench, &lane, &color),
        Commands::SetMaterial { lane, material } => commands::set_material(bench, &lane, &material),
        Commands::SetWeight { lane, weight } => commands::set_weight(bench, &lane, weight),
        Commands::SetRunout { lane, runout } => commands::set_runout(bench, &lane, &runout),
        Commands::SetMap { lane, map } => commands::set_map(bench, &lane, &map),
        Commands::SetToolchanges { total } => commands::set_toolchanges(bench, total),
        Commands::Calibrate { lane, bowden } => {
            commands::calibrate(bench, lane.as_deref(), bowden.as_deref())
        }
        Commands::ResetFailure => commands::reset_failure(bench),
        Commands::Resume => commands::resume(bench),
        Commands::Status => commands::status(bench),
        Commands::StatusJson => commands::status_json(bench),
        Commands::CheckConfig => commands::check_config(None),
    }
}
