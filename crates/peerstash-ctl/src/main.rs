//! peerstash-ctl: command-line interface for the peerstash daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9100;

fn print_usage() {
    println!("Usage: peerstash-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  state                      Show capacity, backups and stored chunks");
    println!("  backup <file> <degree>     Back up a file to <degree> peers");
    println!("  restore <file>             Gather a backed-up file into the restore directory");
    println!("  delete <file>              Ask every peer to drop a backed-up file");
    println!("  reclaim                    Evict one stored chunk");
    println!("  capacity <size>            Set local capacity (e.g. 500k, 64m, 1g)");
    println!();
    println!("Options:");
    println!("  --port <port>   Control API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["state"] | []                     => cmd::state::cmd_state(port).await,
        ["backup", file, degree]           => cmd::ops::cmd_backup(port, file, degree).await,
        ["restore", file]                  => cmd::ops::cmd_restore(port, file).await,
        ["delete", file]                   => cmd::ops::cmd_delete(port, file).await,
        ["reclaim"]                        => cmd::ops::cmd_reclaim(port).await,
        ["capacity", size]                 => cmd::ops::cmd_capacity(port, size).await,
        ["help"] | ["--help"] | ["-h"]     => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
