//! Session runner
//!
//! Startup order: wire ports, build the streamer at the engine's rate, make
//! the first connection, enable capture, activate the engine. Then the drain
//! worker and the connection supervisor run on their own threads until the
//! session stops. Teardown runs here on the calling thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

use crate::audio::buffer::channel_buffer;
use crate::audio::capture::CaptureHandoff;
use crate::audio::engine::AudioEngine;
use crate::audio::wiring::{wire_ports, WiringMode};
use crate::error::{Result, StreamError};
use crate::session::{SessionContext, SessionStatus};
use crate::status::StatusReporter;
use crate::stream::{ConnectionSupervisor, DrainWorker, Streamer};

/// Run one capture session to completion.
///
/// `make_streamer` is called once wiring is done and the session's sample
/// rate is known. Setup failures come back as `Err` with the engine already
/// closed; a session that started returns its terminal status. Either way a
/// failed session leaves no output artifact behind.
pub fn run_session<E, S, F>(
    engine: &mut E,
    mode: &WiringMode,
    session: Arc<SessionContext>,
    status: Arc<StatusReporter>,
    make_streamer: F,
) -> Result<SessionStatus>
where
    E: AudioEngine + ?Sized,
    S: Streamer + 'static,
    F: FnOnce(&SessionContext) -> std::result::Result<S, StreamError>,
{
    let result = run_wired(engine, mode, &session, &status, make_streamer);
    engine.close();

    if let Err(e) = result {
        tracing::error!("Session setup failed: {}", e);
        remove_artifact(&session);
        return Err(e);
    }

    let overruns = session.overruns();
    if overruns > 0 {
        tracing::error!("{} capture overruns, session failed", overruns);
        session.fail(SessionStatus::Overrun);
    }

    let outcome = session.status();
    if outcome != SessionStatus::Ok {
        remove_artifact(&session);
    }
    status.general(&format!(
        "Session ended: {:?}, {} bytes streamed",
        outcome,
        status.total_bytes()
    ));
    Ok(outcome)
}

fn run_wired<E, S, F>(
    engine: &mut E,
    mode: &WiringMode,
    session: &Arc<SessionContext>,
    status: &Arc<StatusReporter>,
    make_streamer: F,
) -> Result<()>
where
    E: AudioEngine + ?Sized,
    S: Streamer + 'static,
    F: FnOnce(&SessionContext) -> std::result::Result<S, StreamError>,
{
    let (producers, consumers): (Vec<_>, Vec<_>) = (0..session.channels())
        .map(|_| channel_buffer(session.buffer_bytes()))
        .unzip();

    wire_ports(engine, mode, session)?;
    session.set_sample_rate(engine.sample_rate());

    let streamer = Arc::new(Mutex::new(make_streamer(session.as_ref())?));
    let mut supervisor =
        ConnectionSupervisor::new(streamer.clone(), session.clone(), status.clone());
    supervisor.connect_initial();

    {
        let session = session.clone();
        engine.on_shutdown(Box::new(move |reason| {
            tracing::error!("Audio engine shut down: {}", reason);
            session.fail(SessionStatus::EngineLost);
            session.request_stop();
        }));
    }

    session.set_capture_enabled(true);
    engine.activate(Box::new(CaptureHandoff::new(session.clone(), producers)))?;
    status.general(&format!(
        "Capturing {} channels at {} Hz",
        session.channels(),
        session.sample_rate()
    ));

    let drain = DrainWorker::new(session.clone(), consumers, streamer.clone());
    let supervisor_handle = thread::Builder::new()
        .name("supervisor".into())
        .spawn(move || supervisor.run())?;
    let drain_handle = match thread::Builder::new()
        .name("drain".into())
        .spawn(move || drain.run())
    {
        Ok(handle) => handle,
        Err(e) => {
            session.request_stop();
            let _ = supervisor_handle.join();
            return Err(e.into());
        }
    };

    match drain_handle.join() {
        Ok(summary) => tracing::info!("Drain worker forwarded {} frames", summary.frames_forwarded),
        Err(_) => {
            tracing::error!("Drain worker panicked");
            session.fail(SessionStatus::StreamFailed);
        }
    }
    session.request_stop();
    session.set_capture_enabled(false);
    if supervisor_handle.join().is_err() {
        tracing::error!("Connection supervisor panicked");
    }

    // The realtime side must be gone before the streamer is finalized
    engine.close();
    if let Err(e) = streamer.lock().finish() {
        tracing::error!("Streamer finish failed: {}", e);
        session.fail(SessionStatus::StreamFailed);
    }
    Ok(())
}

fn remove_artifact(session: &SessionContext) {
    if let Some(path) = session.output_path() {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!("Removed output file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Cannot remove {}: {}", path.display(), e),
        }
    }
}
