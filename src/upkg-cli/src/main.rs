mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upkg::GameCatalog;

use cli::*;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upkg=info,upkg_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut file_config = config::load(cli.config.as_deref())?;
    file_config.merge(config::from_args(&cli));

    if let Commands::Configure { save } = &cli.command {
        if *save {
            let path = config::save(&file_config, cli.config.as_deref())?;
            println!("Saved settings to {}", path.display());
        } else {
            print!("{}", file_config.to_toml()?);
        }
        return Ok(());
    }

    let settings = file_config.resolve(&GameCatalog::new())?;
    settings.install();

    let package = match &cli.command {
        Commands::Info { package } | Commands::List { package, .. } | Commands::Dump { package, .. } => {
            Some(package.as_str())
        }
        _ => None,
    };
    let (files, name) = commands::catalog(&cli.dirs, package)?;
    let loader = commands::loader(&settings, files);
    let name = name.unwrap_or_default();

    match cli.command {
        Commands::Info { .. } => commands::info(&loader, &name)?,

        Commands::List { imports, names, .. } => commands::list(&loader, &name, imports, names)?,

        Commands::Dump { class, output, .. } => {
            commands::dump(&loader, &name, class.as_deref(), output.as_deref())?
        }

        Commands::Scan { limit } => commands::scan(&loader, limit)?,

        Commands::Games => commands::games(&loader),

        Commands::Configure { .. } => {}
    }

    commands::report(&loader.stats().summary());
    Ok(())
}
