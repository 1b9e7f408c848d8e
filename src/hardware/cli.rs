//! `hackrf_transfer` subprocess transmit path

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use num_complex::Complex32;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{Result, Error};
use crate::config::TransmitConfig;
use crate::hardware::{CancelToken, CapabilityTier, TransmitBackend, TransmitJob, TransmitOutcome};
use crate::hardware::device_manager::probe_transfer_tool;
use crate::processing::{EncodedSignal, SignalEncoder, TilingPlan};
use crate::processing::encoder::file_size;

/// Lines of child output kept for error reports
const OUTPUT_TAIL_LINES: usize = 32;

/// Poll step while waiting for a terminated child
const REAP_POLL: Duration = Duration::from_millis(20);

/// Last lines written by the child on stdout/stderr
#[derive(Clone, Default)]
struct OutputTail(Arc<Mutex<VecDeque<String>>>);

impl OutputTail {
    fn drain<R: Read + Send + 'static>(&self, reader: R, stream: &'static str) {
        let tail = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("hackrf-transfer-{}", stream))
            .spawn(move || {
                for line in BufReader::new(reader).split(b'\n').map_while(|l| l.ok()) {
                    let line = String::from_utf8_lossy(&line).trim_end().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("hackrf_transfer {}: {}", stream, line);
                    let mut lines = tail.0.lock();
                    if lines.len() == OUTPUT_TAIL_LINES {
                        lines.pop_front();
                    }
                    lines.push_back(line);
                }
            });
        if let Err(e) = spawned {
            warn!("Could not start {} reader: {}", stream, e);
        }
    }

    fn snapshot(&self) -> String {
        self.0.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    // SAFETY: the pid belongs to a child we have not reaped yet
    let ret = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if ret != 0 {
        debug!("SIGTERM to {} failed: {}", child.id(), std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.kill();
}

/// Spawns the transfer tool and supervises the child process
pub struct CliBackend {
    tool: String,
    encoder: SignalEncoder,
    timing: TransmitConfig,
    probe_timeout: Duration,
    availability: OnceLock<bool>,
    child: Mutex<Option<Child>>,
}

impl CliBackend {
    /// `known_available` seeds the probe result when detection already ran it
    pub fn new(
        tool: String,
        encoder: SignalEncoder,
        timing: TransmitConfig,
        probe_timeout: Duration,
        known_available: Option<bool>,
    ) -> Self {
        let availability = OnceLock::new();
        if let Some(known) = known_available {
            let _ = availability.set(known);
        }
        Self {
            tool,
            encoder,
            timing,
            probe_timeout,
            availability,
            child: Mutex::new(None),
        }
    }

    /// Command-line flags for one transmission
    pub fn build_args(job: &TransmitJob, file: &Path) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            file.display().to_string(),
            "-f".to_string(),
            job.frequency_hz.to_string(),
            "-s".to_string(),
            job.sample_rate_hz.to_string(),
            "-x".to_string(),
            job.gain_db.to_string(),
            "-a".to_string(),
            if job.amp_enable { "1" } else { "0" }.to_string(),
        ];
        if job.plan.repeat {
            args.push("-R".to_string());
        }
        args
    }

    fn try_wait(&self) -> Result<Option<ExitStatus>> {
        match self.child.lock().as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Err(Error::RuntimeFailure("transfer process handle lost".to_string())),
        }
    }

    /// Launch check, then poll until the duration ends, the child exits or
    /// `cancel` is raised. Leaves reaping to the caller.
    fn supervise(
        &self,
        job: &TransmitJob,
        cancel: &CancelToken,
        output: &OutputTail,
        start: Instant,
    ) -> Result<TransmitOutcome> {
        let effective = job.effective_duration();
        let poll = self.timing.poll_interval();

        // An instant exit means the tool rejected the device or arguments
        let launch_window = self.timing.launch_check().min(effective);
        let launch_deadline = start + launch_window;
        while !cancel.is_cancelled() && Instant::now() < launch_deadline {
            if self.try_wait()?.is_some() {
                break;
            }
            std::thread::sleep(poll.min(launch_deadline.saturating_duration_since(Instant::now())));
        }
        if cancel.is_cancelled() {
            info!("Stop requested, terminating HackRF process");
            return Ok(TransmitOutcome::Cancelled);
        }
        if let Some(status) = self.try_wait()? {
            if !status.success() {
                let stderr = output.snapshot();
                warn!("HackRF process failed immediately - {}", status);
                if !stderr.is_empty() {
                    error!("Error: {}", stderr);
                }
                return Err(Error::LaunchFailure(format!("{} exited with {}", self.tool, status)));
            }
        } else {
            info!("HackRF process running successfully");
        }

        loop {
            if cancel.is_cancelled() {
                info!("Stop requested, terminating HackRF process");
                return Ok(TransmitOutcome::Cancelled);
            }
            if let Some(status) = self.try_wait()? {
                if status.success() {
                    return Ok(TransmitOutcome::Completed);
                }
                return Err(Error::RuntimeFailure(format!(
                    "{} exited with {}: {}", self.tool, status, output.snapshot()
                )));
            }
            let elapsed = start.elapsed();
            if elapsed >= effective {
                return Ok(TransmitOutcome::Completed);
            }
            std::thread::sleep(poll.min(effective - elapsed));
        }
    }

    /// Terminate, wait out the grace period, then kill. Always reaps the child.
    fn finish_child(&self) -> Option<ExitStatus> {
        let mut child = self.child.lock().take()?;
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }

        send_terminate(&mut child);
        let deadline = Instant::now() + self.timing.terminate_grace();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => std::thread::sleep(REAP_POLL),
                _ => break,
            }
        }

        warn!("hackrf_transfer ignored SIGTERM, killing pid {}", child.id());
        let _ = child.kill();
        child.wait().ok()
    }
}

impl TransmitBackend for CliBackend {
    fn tier(&self) -> CapabilityTier {
        CapabilityTier::CliSubprocess
    }

    fn available(&self) -> bool {
        *self
            .availability
            .get_or_init(|| probe_transfer_tool(&self.tool, self.probe_timeout))
    }

    fn encode(&self, samples: &[Complex32], plan: &TilingPlan) -> Result<Option<EncodedSignal>> {
        if plan.copies > 1 {
            info!(
                "Creating loopable signal: {} copies for {:.1}s",
                plan.copies, plan.effective_duration
            );
        }
        self.encoder.encode(samples, CapabilityTier::CliSubprocess, plan.copies)
    }

    fn transmit(
        &self,
        job: &TransmitJob,
        signal: Option<&EncodedSignal>,
        cancel: &CancelToken,
    ) -> Result<TransmitOutcome> {
        let signal = signal.ok_or_else(|| {
            Error::LaunchFailure("subprocess transfer needs an encoded signal".to_string())
        })?;
        let args = Self::build_args(job, signal.path());
        info!("Starting HackRF subprocess: {} {}", self.tool, args.join(" "));
        info!("Signal file size: {} bytes", file_size(signal.path()).unwrap_or(0));

        let mut child = Command::new(&self.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::LaunchFailure(format!("could not spawn {}: {}", self.tool, e)))?;
        let pid = child.id();
        let output = OutputTail::default();
        if let Some(stdout) = child.stdout.take() {
            output.drain(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            output.drain(stderr, "stderr");
        }
        *self.child.lock() = Some(child);
        info!("HackRF process started with PID: {}", pid);

        let start = Instant::now();
        let outcome = self.supervise(job, cancel, &output, start);
        // Every exit path, errors included, reaps the child
        let status = self.finish_child();
        let exit = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());
        match &outcome {
            Ok(_) => info!(
                "HackRF transmission completed: {:.1}s, exit: {}",
                start.elapsed().as_secs_f64(),
                exit,
            ),
            Err(e) => debug!("HackRF process reaped after {} (exit: {})", e, exit),
        }
        outcome
    }

    fn abort(&self) {
        if let Some(child) = self.child.lock().as_mut() {
            send_terminate(child);
        }
    }
}
