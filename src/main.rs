//! engagement-forecast command-line entry point

use clap::Parser;
use engagement_forecast::cli::{cmd_predict, cmd_train, Cli, Commands, TrainArgs};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engagement_forecast=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            files,
            targets,
            output,
            model_output,
            incremental,
            batch_size,
            epochs,
            config,
        } => cmd_train(TrainArgs {
            files,
            targets,
            output,
            model_output,
            incremental,
            batch_size,
            epochs,
            config,
        })?,
        Commands::Predict { model, features, output } => {
            cmd_predict(&model, &features, output.as_deref())?;
        }
    }

    Ok(())
}
