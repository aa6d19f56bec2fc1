use gridseq::midi::{scan_input_ports, scan_output_ports, Controller, KeyboardController};
use gridseq::sequencer::{Clock, Engine};
use gridseq::MidiRouter;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    println!("=== gridseq ===");

    // Output ports: the first one found becomes the default route.
    // Enumeration is bounded because platform MIDI layers can hang.
    let router = Arc::new(MidiRouter::new());
    match scan_output_ports() {
        Ok(ports) => {
            if let Some(first) = ports.first() {
                info!(port = %first, "default MIDI output");
                router.set_default_port(first);
            } else {
                warn!("no MIDI output ports found, events will be dropped");
            }
        }
        Err(e @ gridseq::MidiError::Init(_)) => {
            // No working MIDI driver is the one unrecoverable start error
            eprintln!("ERROR: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            warn!("MIDI output scan failed, continuing without ports: {e}");
        }
    }

    let clock = Arc::new(Clock::new());
    let mut engine = Engine::new(clock, router);

    // Keyboard input is optional: take the first input port that is not a
    // pad controller and wire it into the recording path.
    match scan_input_ports() {
        Ok(ports) => {
            let keyboard_port = ports
                .iter()
                .find(|p| !p.to_lowercase().contains("launchpad"));
            if let Some(port) = keyboard_port {
                match KeyboardController::connect(port) {
                    Ok(keyboard) => {
                        info!(port = %keyboard.id(), "MIDI keyboard connected");
                        engine.attach_note_input(keyboard.note_events());
                        // Keep the connection alive for the process life
                        std::mem::forget(keyboard);
                    }
                    Err(e) => warn!(port = %port, "keyboard connect failed: {e}"),
                }
            }
        }
        Err(e) => warn!("MIDI input scan failed: {e}"),
    }

    engine.start_runtime();
    engine.focus_session();
    info!("runtime started");

    // The terminal UI drives the engine from here; headless builds just
    // keep the scheduler alive until the process is killed.
    loop {
        std::thread::park();
    }
}
