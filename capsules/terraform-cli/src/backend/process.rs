use super::Stream;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;
use wait_timeout::ChildExt;

/// How often the child is polled while output is being forwarded.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output still buffered when the child exits is forwarded for at most this
/// long. Background processes that inherited the pipes can keep them open
/// indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Exited(i32),
    TimedOut(Duration),
}

/// Spawn `command` and forward its output line by line to `sink` on the
/// calling thread until the process exits or `timeout` elapses.
///
/// Completion is decided by the child's own exit, not by its pipes closing.
/// After exit, remaining output is drained for [`OUTPUT_DRAIN_GRACE`]; reader
/// threads still blocked on pipes held by leftover processes are detached.
pub(crate) fn stream_process(
    mut command: Command,
    timeout: Option<Duration>,
    sink: &mut dyn FnMut(Stream, &str),
) -> io::Result<Completion> {
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let deadline = timeout.map(|limit| (Instant::now() + limit, limit));

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Stream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Stream::Stderr, tx.clone()));
    }
    drop(tx);

    let mut exited = None;
    let mut pipes_closed = false;
    while exited.is_none() && !pipes_closed {
        let slice = match deadline {
            Some((at, limit)) => {
                let now = Instant::now();
                if now >= at {
                    return kill(&mut child, limit);
                }
                (at - now).min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        match rx.recv_timeout(slice) {
            Ok((stream, line)) => sink(stream, &line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => pipes_closed = true,
        }
        exited = child.try_wait()?;
    }

    let status = match exited {
        Some(status) => status,
        None => match deadline {
            Some((at, limit)) => {
                let remaining = at.saturating_duration_since(Instant::now());
                match child.wait_timeout(remaining)? {
                    Some(status) => status,
                    None => return kill(&mut child, limit),
                }
            }
            None => child.wait()?,
        },
    };

    if drain(&rx, sink, OUTPUT_DRAIN_GRACE) {
        for reader in readers {
            let _ = reader.join();
        }
    } else {
        debug!("output pipes still open after exit; leftover processes detached");
    }

    Ok(Completion::Exited(exit_code(&status)))
}

/// Forward queued lines until every reader is done or `grace` runs out.
/// Returns whether the readers finished.
fn drain(
    rx: &Receiver<(Stream, String)>,
    sink: &mut dyn FnMut(Stream, &str),
    grace: Duration,
) -> bool {
    let until = Instant::now() + grace;
    loop {
        let now = Instant::now();
        if now >= until {
            return false;
        }
        match rx.recv_timeout(until - now) {
            Ok((stream, line)) => sink(stream, &line),
            Err(RecvTimeoutError::Timeout) => return false,
            Err(RecvTimeoutError::Disconnected) => return true,
        }
    }
}

fn spawn_reader<R>(reader: R, stream: Stream, tx: Sender<(Stream, String)>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn kill(child: &mut Child, limit: Duration) -> io::Result<Completion> {
    let _ = child.kill();
    let _ = child.wait();
    Ok(Completion::TimedOut(limit))
}

pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
