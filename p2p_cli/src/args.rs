//! Command-line argument parsing

use clap::{Parser, Subcommand};
use p2p_engine::transfer::TRANSFER_PORT;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Point-to-point compressed file transfer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Scratch directory for compressed staging (overrides config)
    #[arg(long, global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// zstd compression level (overrides config)
    #[arg(long, global = true, value_parser = clap::value_parser!(i32).range(1..=19))]
    pub level: Option<i32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send files to a listening peer
    Send {
        /// Address of the receiving peer
        #[arg(short, long)]
        to: SocketAddr,

        /// Files to send, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Accept one connection and receive its files
    Receive {
        /// Address to listen on
        #[arg(short, long, default_value_t = default_bind())]
        bind: SocketAddr,

        /// Destination directory (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], TRANSFER_PORT))
}
