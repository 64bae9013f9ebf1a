//! Tocsin — a concurrent alarm scheduler.
//!
//! Clients enter timed, recurring, grouped alarm requests at an
//! interactive prompt. A single dispatcher task fires each alarm at its
//! deadline, and a lifecycle subsystem keeps one display worker running
//! per group that currently has alarms.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use tocsin::command::{self, Request};
use tocsin::config::Config;
use tocsin::event::CoreEvent;
use tocsin::scheduler::{Scheduler, SchedulerHandle};

/// Tocsin — deadline-driven alarm scheduling with per-group display workers.
#[derive(Parser)]
#[command(name = "tocsin", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler with an interactive request prompt.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Display worker tick interval in seconds (overrides config).
        #[arg(long)]
        tick_secs: Option<u64>,

        /// Emit events as JSON lines instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            tick_secs,
            json,
        } => cmd_run(config, tick_secs, json).await,
    }
}

/// Run the scheduler and the interactive prompt loop.
async fn cmd_run(config_path: Option<PathBuf>, tick_secs: Option<u64>, json: bool) -> Result<()> {
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(tick) = tick_secs {
        config.tick_secs = tick;
    }

    let (scheduler, mut events) = Scheduler::new(&config);
    scheduler.spawn();
    let handle = scheduler.handle();

    // Stdin is blocking; read it on a dedicated thread feeding a channel.
    let (tx, mut lines) = tokio::sync::mpsc::channel::<String>(32);
    let stdin_reader = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break; // receiver dropped
                    }
                }
                Err(_) => break, // EOF or error
            }
        }
    });

    eprintln!(
        "[tocsin] Ready. Display tick: {}s. Enter requests, Ctrl-D to exit.",
        config.tick_secs
    );
    prompt()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[tocsin] Shutdown signal received");
                break;
            }

            event = events.recv() => {
                match event {
                    Some(event) => print_event(&event, json),
                    None => break,
                }
            }

            line = lines.recv() => {
                match line {
                    Some(line) => {
                        if !line.trim().is_empty() {
                            handle_line(&handle, &line);
                        }
                        prompt()?;
                    }
                    None => {
                        eprintln!("[tocsin] Input closed, shutting down.");
                        break;
                    }
                }
            }
        }
    }

    scheduler.shutdown();
    stdin_reader.abort();
    Ok(())
}

fn prompt() -> Result<()> {
    print!("alarm> ");
    io::stdout().flush().wrap_err("failed to flush stdout")?;
    Ok(())
}

/// Parse one input line and apply it to the scheduler.
fn handle_line(handle: &SchedulerHandle, line: &str) {
    let request = match command::parse_request(line) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("[tocsin] {e}");
            return;
        }
    };

    let outcome = match request {
        Request::Start(req) => handle.add_alarm(req),
        Request::Change(req) => handle.change_alarm(req),
        Request::Cancel(id) => handle.cancel_alarm(id),
        Request::Suspend(id) => handle.suspend_alarm(id),
        Request::Reactivate(id) => handle.reactivate_alarm(id),
        Request::View => {
            print_view(handle);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("[tocsin] Request rejected: {e}");
    }
}

/// Render one core event to stdout.
fn print_event(event: &CoreEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("[tocsin] failed to encode event: {e}"),
        }
    } else {
        println!("{event}");
    }
}

/// Render the View_Alarms report: every group with its worker status and
/// assigned alarms, from one consistent snapshot.
fn print_view(handle: &SchedulerHandle) {
    let view = handle.view_alarms();
    if view.is_empty() {
        println!("No alarms.");
        return;
    }

    println!(
        "View alarms at {}:",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    for (index, group) in view.iter().enumerate() {
        let worker = if group.worker_active {
            "display worker active"
        } else {
            "display worker pending"
        };
        println!("{}. Group({}) — {worker}:", index + 1, group.group_id);
        for (alarm_index, alarm) in group.alarms.iter().enumerate() {
            let status = if alarm.suspended { "Suspended" } else { "Active" };
            println!(
                "   {}{}. Alarm({}): interval {}s, created {}, status {}: {}",
                index + 1,
                (b'a' + (alarm_index % 26) as u8) as char,
                alarm.id,
                alarm.interval_seconds,
                alarm.created_at.format("%Y-%m-%d %H:%M:%S"),
                status,
                alarm.message,
            );
        }
    }
}
