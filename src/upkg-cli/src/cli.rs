//! CLI argument definitions for upkg

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "upkg")]
#[command(about = "Unreal Engine package inspector", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Force a game by tag (see `upkg games`)
    #[arg(long, global = true)]
    pub game: Option<String>,

    /// AES key for encrypted containers, 0x hex or 32 characters
    #[arg(long, global = true)]
    pub aes: Option<String>,

    /// Force the package file version
    #[arg(long, global = true)]
    pub ver: Option<i32>,

    /// Game directories to register (repeatable)
    #[arg(short, long = "dir", global = true)]
    pub dirs: Vec<PathBuf>,

    /// Package searched for imports whose package cannot be found
    #[arg(long, global = true)]
    pub startup: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a package summary as JSON
    #[command(visible_alias = "i")]
    Info {
        /// Package file or package name
        package: String,
    },

    /// List the tables of a package
    #[command(visible_alias = "ls")]
    List {
        /// Package file or package name
        package: String,

        /// Also list imports
        #[arg(long)]
        imports: bool,

        /// Also list names
        #[arg(long)]
        names: bool,
    },

    /// Load every export of a package and print the objects as JSON
    Dump {
        /// Package file or package name
        package: String,

        /// Only objects of this class or its subclasses
        #[arg(short, long)]
        class: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load every package found in the registered directories
    Scan {
        /// Stop after this many packages
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List the games that can be forced with --game
    Games,

    /// Show or write the settings file
    Configure {
        /// Write the merged settings to the settings file
        #[arg(long)]
        save: bool,
    },
}
