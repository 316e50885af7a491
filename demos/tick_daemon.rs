use daemon_reborn::signal::{SignalCommands, SignalFlow};
use daemon_reborn::Context;
use signal_hook::consts::signal::*;
use std::env;
use std::path::PathBuf;
use std::process::exit;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Paths from the command line
    let mut args = env::args_os().skip(1);
    let (Some(pid_path), Some(log_path)) = (args.next(), args.next()) else {
        eprintln!("usage: tick_daemon <pid-file> <log-file> [--stop]");
        exit(64);
    };
    let stop = args.next().map_or(false, |a| a == "--stop");

    let mut ctx = Context::new()
        .pid_file(PathBuf::from(pid_path))
        .log_file(PathBuf::from(log_path));

    // 2. The commands this daemon understands
    let mut commands = SignalCommands::new();
    commands.add(SIGTERM, stop, |_| Ok(SignalFlow::Stop));
    commands.add(SIGINT, false, |_| Ok(SignalFlow::Stop));

    // 3. Controlling invocation: find the daemon and signal it
    if commands.any_requested() {
        match ctx.search()? {
            Some(daemon) => {
                commands.send(&daemon)?;
                println!("Stop sent to {}", daemon.id());
            }
            None => println!("Not running"),
        }
        return Ok(());
    }

    // 4. Re-execute in the background
    match ctx.reborn() {
        Ok(Some(child)) => {
            println!("Launched ticker daemon, pid {}", child.id());
            return Ok(());
        }
        Ok(None) => {}
        Err(e) if e.is_would_block() => {
            eprintln!("[Ticker] already running: {}", e);
            exit(2);
        }
        Err(e) => {
            eprintln!("[Ticker] failed to start: {}", e);
            exit(1);
        }
    }

    // --- From here on we are the daemon; stdout goes to the log file ---
    let server = commands.listen()?;
    println!("[Ticker] started, pid {}", std::process::id());

    thread::spawn(|| {
        let mut i = 0u64;
        loop {
            println!("[Ticker] Ping #{}", i);
            i += 1;
            thread::sleep(Duration::from_secs(1));
        }
    });

    server.serve()?;
    println!("[Ticker] stop received, shutting down");
    ctx.release()?;
    Ok(())
}
