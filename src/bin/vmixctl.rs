use std::env;
use std::process;
use std::time::Duration;

use vmix_kit::control::api;
use vmix_kit::{Engine, NullBackend, Settings};

const USAGE: &str = "Usage: vmixctl [--status] [directive ...]\n\n\
Starts an engine on the null device with the given directives (for example\n\
`-r 48000 -c 2 -b 16 -d speakers -l capture`) and launches the interactive console.\n\
With --status the engine runs briefly and a status snapshot is printed instead.";

fn print_status() {
    match api::get_status() {
        Some(status) => {
            println!("Loop State  : {:?}", status.loop_state);
            println!("Sample Rate : {} Hz", status.sample_rate);
            println!("Block Size  : {} frames", status.samples);
            println!("Mix Channels: {}", status.mix_channels);
            println!("Iterations  : {}", status.iterations);
            println!("Recording   : {}", if status.recording { "on" } else { "off" });
            if let Some(hw) = status.hardware {
                println!(
                    "Hardware    : in {:?} x{} | out {:?} x{}",
                    hw.rx_format, hw.rx_channels, hw.tx_format, hw.tx_channels
                );
            }
            if let Some(report) = status.latency {
                println!(
                    "Delay       : {} frames ({:.2} ms, score {:.2})",
                    report.offset_frames,
                    report.offset_seconds * 1_000.0,
                    report.correlation
                );
            }
            println!("Profiles:");
            for (name, kind) in &status.profiles {
                println!("  {name} ({kind:?})");
            }
            if !status.taps.is_empty() {
                println!("Taps:");
                for (idx, tap) in status.taps.iter().enumerate() {
                    println!(
                        "  [{idx}] {:?} {} -> {} | shift={} | invert={} | mute={} | peak={}",
                        tap.point, tap.src, tap.dst, tap.shift, tap.invert, tap.mute, tap.peak
                    );
                }
            }
            println!("Clients:");
            for client in status.clients {
                println!(
                    "  [{}] {} | {:?} x{} @ {} Hz | rx={} tx={} | queued {}/{} bytes | moved {}/{} bytes | xruns {}/{}",
                    client.id,
                    client.profile,
                    client.format,
                    client.channels,
                    client.rate,
                    if client.rx_enabled { "on" } else { "off" },
                    if client.tx_enabled { "on" } else { "off" },
                    client.rx_queued,
                    client.tx_queued,
                    client.rx_bytes,
                    client.tx_bytes,
                    client.overruns,
                    client.underruns,
                );
            }
            if !status.master_out_peaks.is_empty() {
                println!("Output Peaks:");
                for (idx, peak) in status.master_out_peaks.iter().enumerate() {
                    println!("  Output {}: {}", idx + 1, peak);
                }
            }
            if !status.master_in_peaks.is_empty() {
                println!("Input Peaks:");
                for (idx, peak) in status.master_in_peaks.iter().enumerate() {
                    println!("  Input {}: {}", idx + 1, peak);
                }
            }
        }
        None => {
            eprintln!("vmixctl: no active engine detected");
            process::exit(1);
        }
    }
}

fn main() {
    let mut status_only = false;
    let mut directives = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--status" => status_only = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                return;
            }
            _ => directives.push(arg),
        }
    }

    let engine = match Engine::with_directives(Settings::default(), &directives.join(" ")) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("vmixctl: {err}");
            process::exit(1);
        }
    };
    engine.publish();

    let worker = match engine.spawn(Box::new(NullBackend::new()), Box::new(NullBackend::new())) {
        Ok(worker) => worker,
        Err(err) => {
            eprintln!("vmixctl: cannot start mixing thread: {err}");
            process::exit(1);
        }
    };

    let result = if status_only {
        std::thread::sleep(Duration::from_millis(250));
        print_status();
        Ok(())
    } else {
        vmix_kit::control::ui::run()
    };

    engine.shutdown();
    let _ = worker.join();
    api::unregister();

    if let Err(err) = result {
        eprintln!("vmixctl: {err}");
        process::exit(1);
    }
}
