//! Talking to an arm that lives somewhere else.
//!
//! Each arm is hosted by a worker, a thread or a child process that owns one
//! [`ArmController`] and executes calls on it one at a time. The
//! orchestrator side holds an [`ArmProxy`]. Both ends exchange JSON, one
//! message per line:
//!
//! ```text
//! -> {"cmd": "call", "id": 7, "method": "play", "args": [], "kwargs": {"names": ["left__wave"]}}
//! <- {"id": 7, "ok": true, "result": "completed"}
//! -> {"cmd": "cancel"}
//! -> {"cmd": "shutdown"}
//! ```
//!
//! A `cancel` is handled by the worker's reader as soon as it arrives, so it
//! reaches a playback that is still running. Calls are answered in order;
//! a reply carrying the wrong id means the stream can no longer be trusted,
//! and the proxy refuses every call after it.

use crate::config::Config;
use crate::controller::{open_arm, ArmController, ControllerError};
use crate::naming::Side;
use crate::playback::StopToken;
use crate::pose::Pose;

use log::{debug, error, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    borrow::Cow,
    fmt,
    io::{self, BufRead, BufReader, Write},
    panic::{self, AssertUnwindSafe},
    path::Path,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{mpsc, Arc, Mutex},
    thread,
};

/// Reply text for every call to a worker whose controller failed to start.
pub const INIT_FAILED: &str = "terminal init failed";

/// The operations a worker executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "kwargs", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Method {
    Status,
    Record { name: String, overwrite: bool },
    RecordTimed { name: String, overwrite: bool },
    AddPoint { duration: Option<f64> },
    SetDefaultDuration { seconds: f64 },
    StopRecord,
    RecordSafe { name: Option<String>, overwrite: bool },
    SaveZeroPose,
    CheckZeroPose,
    CheckSafeTracks,
    Play { names: Vec<String> },
    TrackDuration { name: String },
    Get,
    SetJoint { joint: usize, value: i32 },
    SetAll { pose: Pose },
    Nudge { joint: usize, delta: i32 },
    Reset,
}

impl Method {
    /// Wire name of the method.
    pub fn name(&self) -> String {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => match map.remove("method") {
                Some(Value::String(name)) => name,
                _ => String::new(),
            },
            _ => String::new(),
        }
    }

    fn into_wire(self) -> Result<(String, Map<String, Value>), RpcError> {
        let Value::Object(mut map) = serde_json::to_value(&self).map_err(RpcError::Encode)? else {
            return Err(RpcError::UnknownMethod(format!("{:?}", self)));
        };
        let name = match map.remove("method") {
            Some(Value::String(name)) => name,
            _ => return Err(RpcError::UnknownMethod(format!("{:?}", self))),
        };
        let kwargs = match map.remove("kwargs") {
            Some(Value::Object(kwargs)) => kwargs,
            _ => Map::new(),
        };
        Ok((name, kwargs))
    }

    fn from_wire(method: &str, kwargs: Map<String, Value>) -> Result<Self, RpcError> {
        let parse = |content: Value| {
            let mut doc = Map::new();
            doc.insert("method".to_owned(), Value::String(method.to_owned()));
            doc.insert("kwargs".to_owned(), content);
            serde_json::from_value::<Method>(Value::Object(doc))
        };
        // Unit methods want `null`; methods with only optional fields want `{}`.
        let parsed = if kwargs.is_empty() {
            parse(Value::Null).or_else(|_| parse(Value::Object(Map::new())))
        } else {
            parse(Value::Object(kwargs))
        };
        parsed.map_err(|e| RpcError::UnknownMethod(format!("{}: {}", method, e)))
    }
}

/// Parent-to-worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Request {
    /// Execute `method` and reply with the same `id`.
    Call {
        id: u64,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    /// Stop the running playback, if any. Never replied to.
    Cancel,
    /// Let go of the arm and exit. Never replied to.
    Shutdown,
}

/// An error raised inside a worker, as the caller sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[allow(missing_docs)]
    pub message: String,
    /// Which worker and method raised it.
    pub origin: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.origin)
    }
}

/// Worker-to-parent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Id of the call answered; absent when the request could not be read.
    pub id: Option<u64>,
    #[allow(missing_docs)]
    pub ok: bool,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

/// A nice little error for the worker protocol.
#[derive(Debug)]
pub enum RpcError {
    /// The transport failed.
    IoError(io::Error),
    /// A message could not be encoded, or a result not decoded.
    Encode(serde_json::Error),
    /// A line that is not a protocol message.
    Malformed(String),
    /// No such method, or bad arguments for it.
    UnknownMethod(String),
    /// The other end went away.
    Disconnected,
    /// A reply answered some other call. Fatal for the link.
    OutOfOrder {
        #[allow(missing_docs)]
        expected: u64,
        #[allow(missing_docs)]
        got: Option<u64>,
    },
    /// The link was abandoned after a protocol violation.
    Broken,
    /// The worker ran the call and it failed.
    Remote(RemoteError),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RpcError as RE;
        let msg = match self {
            RE::IoError(error) => Cow::from(format!("worker link: {}", error)),
            RE::Encode(error) => Cow::from(format!("worker message encoding: {}", error)),
            RE::Malformed(line) => Cow::from(format!("malformed worker message: {}", line)),
            RE::UnknownMethod(method) => Cow::from(format!("unknown method {}", method)),
            RE::Disconnected => Cow::from("worker disconnected"),
            RE::OutOfOrder { expected, got } => Cow::from(format!(
                "out-of-order reply: expected id {}, got {:?}",
                expected, got
            )),
            RE::Broken => Cow::from("worker link abandoned after a protocol violation"),
            RE::Remote(error) => Cow::from(format!("worker error: {}", error)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for RpcError {}

impl From<io::Error> for RpcError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

/// Receiving half of a line transport.
pub trait Inbound: Send {
    /// The next line, or `None` once the other end has closed.
    fn recv_line(&mut self) -> Result<Option<String>, RpcError>;
}

/// Sending half of a line transport.
pub trait Outbound: Send {
    /// Send one line. The line must not contain a newline.
    fn send_line(&mut self, line: &str) -> Result<(), RpcError>;
}

/// Lines read from any buffered reader: a pipe, stdin.
pub struct LineReader<R>(R);

impl<R: BufRead + Send> LineReader<R> {
    #[allow(missing_docs)]
    pub fn new(reader: R) -> Self {
        LineReader(reader)
    }
}

impl<R: BufRead + Send> Inbound for LineReader<R> {
    fn recv_line(&mut self) -> Result<Option<String>, RpcError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.0.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_owned()));
            }
        }
    }
}

/// Lines written to any writer, flushed one by one.
pub struct LineWriter<W>(W);

impl<W: Write + Send> LineWriter<W> {
    #[allow(missing_docs)]
    pub fn new(writer: W) -> Self {
        LineWriter(writer)
    }
}

impl<W: Write + Send> Outbound for LineWriter<W> {
    fn send_line(&mut self, line: &str) -> Result<(), RpcError> {
        writeln!(self.0, "{}", line)?;
        self.0.flush()?;
        Ok(())
    }
}

impl Inbound for mpsc::Receiver<String> {
    fn recv_line(&mut self) -> Result<Option<String>, RpcError> {
        Ok(self.recv().ok())
    }
}

impl Outbound for mpsc::Sender<String> {
    fn send_line(&mut self, line: &str) -> Result<(), RpcError> {
        self.send(line.to_owned()).map_err(|_| RpcError::Disconnected)
    }
}

fn send_message<T: Serialize>(out: &mut dyn Outbound, message: &T) -> Result<(), RpcError> {
    let line = serde_json::to_string(message).map_err(RpcError::Encode)?;
    out.send_line(&line)
}

fn encode<T: Serialize>(result: Result<T, ControllerError>) -> Result<Value, String> {
    match result {
        Ok(value) => serde_json::to_value(value).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn dispatch(controller: &mut ArmController, method: Method) -> Result<Value, String> {
    use Method as M;
    match method {
        M::Status => encode(Ok(controller.status())),
        M::Record { name, overwrite } => encode(controller.record(&name, overwrite)),
        M::RecordTimed { name, overwrite } => encode(controller.record_timed(&name, overwrite)),
        M::AddPoint { duration } => encode(controller.add_point(duration)),
        M::SetDefaultDuration { seconds } => encode(controller.set_default_duration(seconds)),
        M::StopRecord => encode(controller.stop_record()),
        M::RecordSafe { name, overwrite } => {
            encode(controller.record_safe(name.as_deref(), overwrite))
        }
        M::SaveZeroPose => encode(controller.save_zero_pose()),
        M::CheckZeroPose => encode(controller.check_zero_pose()),
        M::CheckSafeTracks => encode(controller.check_safe_tracks()),
        M::Play { names } => encode(controller.play(&names)),
        M::TrackDuration { name } => encode(controller.track_duration(&name)),
        M::Get => encode(controller.get()),
        M::SetJoint { joint, value } => encode(controller.set_joint(joint, value)),
        M::SetAll { pose } => encode(controller.set_all(pose)),
        M::Nudge { joint, delta } => encode(controller.nudge(joint, delta)),
        M::Reset => encode(controller.reset()),
    }
}

/// [`dispatch`], with a panic turned into an error reply so one bad call
/// cannot take the worker down.
fn guarded_dispatch(controller: &mut ArmController, method: Method) -> Result<Value, String> {
    panic::catch_unwind(AssertUnwindSafe(|| dispatch(controller, method))).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_owned());
        error!("call panicked: {}", reason);
        Err(format!("call panicked: {}", reason))
    })
}

enum Job {
    Call {
        id: u64,
        method: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
    Malformed(String),
    Shutdown,
}

fn read_requests(mut inbound: Box<dyn Inbound>, jobs: mpsc::Sender<Job>, stop: Option<StopToken>) {
    loop {
        let line = match inbound.recv_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("worker input failed: {}", e);
                break;
            }
        };
        let job = match serde_json::from_str::<Request>(&line) {
            Ok(Request::Cancel) => {
                match &stop {
                    Some(stop) => {
                        info!("cancel requested");
                        stop.stop();
                    }
                    None => debug!("cancel ignored, no controller"),
                }
                continue;
            }
            Ok(Request::Shutdown) => Job::Shutdown,
            Ok(Request::Call {
                id,
                method,
                args,
                kwargs,
            }) => Job::Call {
                id,
                method,
                args,
                kwargs,
            },
            Err(e) => {
                warn!("unreadable request {:?}: {}", line, e);
                Job::Malformed(line)
            }
        };
        let last = matches!(job, Job::Shutdown);
        if jobs.send(job).is_err() || last {
            return;
        }
    }
    // The parent hung up without saying goodbye.
    let _ = jobs.send(Job::Shutdown);
}

/// Run a worker until it is told to shut down or its input closes.
///
/// `controller` is the result of bringing the arm up; if that failed, the
/// worker still answers every call, with [`INIT_FAILED`].
pub fn serve(
    side: Side,
    controller: Result<ArmController, ControllerError>,
    inbound: Box<dyn Inbound>,
    mut outbound: Box<dyn Outbound>,
) -> Result<(), RpcError> {
    let mut controller = match controller {
        Ok(controller) => {
            info!("[{}] worker ready", side);
            Some(controller)
        }
        Err(e) => {
            error!("[{}] failed to initialise the arm: {}", side, e);
            None
        }
    };
    let stop = controller.as_ref().map(|c| c.stop_token());
    let (jobs_tx, jobs) = mpsc::channel();
    thread::spawn(move || read_requests(inbound, jobs_tx, stop));

    for job in jobs {
        let reply = match job {
            Job::Shutdown => break,
            Job::Malformed(line) => Reply {
                id: None,
                ok: false,
                result: None,
                error: Some(RemoteError {
                    message: format!("unreadable request: {}", line),
                    origin: format!("{} worker", side),
                }),
            },
            Job::Call {
                id,
                method,
                args,
                kwargs,
            } => {
                let origin = format!("{} worker: {}", side, method);
                let outcome = match controller.as_mut() {
                    None => Err(INIT_FAILED.to_owned()),
                    Some(_) if !args.is_empty() => {
                        Err("positional arguments are not accepted; use kwargs".to_owned())
                    }
                    Some(controller) => match Method::from_wire(&method, kwargs) {
                        Ok(method) => guarded_dispatch(controller, method),
                        Err(e) => Err(e.to_string()),
                    },
                };
                match outcome {
                    Ok(result) => Reply {
                        id: Some(id),
                        ok: true,
                        result: Some(result),
                        error: None,
                    },
                    Err(message) => {
                        warn!("[{}] {} failed: {}", side, method, message);
                        Reply {
                            id: Some(id),
                            ok: false,
                            result: None,
                            error: Some(RemoteError { message, origin }),
                        }
                    }
                }
            }
        };
        send_message(outbound.as_mut(), &reply)?;
    }

    if let Some(controller) = controller.as_mut() {
        if let Err(e) = controller.shutdown() {
            warn!("[{}] shutdown: {}", side, e);
        }
    }
    info!("[{}] worker stopped", side);
    Ok(())
}

/// Serve on this process's stdin and stdout.
pub fn serve_stdio(side: Side, controller: Result<ArmController, ControllerError>) -> Result<(), RpcError> {
    serve(
        side,
        controller,
        Box::new(LineReader::new(BufReader::new(io::stdin()))),
        Box::new(LineWriter::new(io::stdout())),
    )
}

enum Worker {
    Thread(thread::JoinHandle<()>),
    Process(Child),
}

struct Link {
    inbound: Box<dyn Inbound>,
    next_id: u64,
    broken: bool,
}

/// The orchestrator's end of a worker.
pub struct ArmProxy {
    side: Side,
    link: Mutex<Link>,
    out: Arc<Mutex<Box<dyn Outbound>>>,
    worker: Mutex<Option<Worker>>,
}

impl ArmProxy {
    fn new(side: Side, inbound: Box<dyn Inbound>, out: Box<dyn Outbound>, worker: Option<Worker>) -> Self {
        ArmProxy {
            side,
            link: Mutex::new(Link {
                inbound,
                next_id: 0,
                broken: false,
            }),
            out: Arc::new(Mutex::new(out)),
            worker: Mutex::new(worker),
        }
    }

    /// A proxy over an existing transport, with nothing to join on shutdown.
    pub fn from_transport(side: Side, inbound: Box<dyn Inbound>, outbound: Box<dyn Outbound>) -> Self {
        Self::new(side, inbound, outbound, None)
    }

    /// Host the arm on a thread of this process.
    pub fn spawn_thread(side: Side, config: &Config) -> Self {
        let (req_tx, req_rx) = mpsc::channel::<String>();
        let (rep_tx, rep_rx) = mpsc::channel::<String>();
        let config = config.clone();
        let handle = thread::spawn(move || {
            let controller =
                open_arm(side, &config).and_then(|arm| ArmController::connect(side, arm, &config));
            if let Err(e) = serve(side, controller, Box::new(req_rx), Box::new(rep_tx)) {
                error!("[{}] worker thread: {}", side, e);
            }
        });
        Self::new(
            side,
            Box::new(rep_rx),
            Box::new(req_tx),
            Some(Worker::Thread(handle)),
        )
    }

    /// Host the arm in a child process running `piper worker --side <side>`.
    pub fn spawn_process(side: Side, config_path: Option<&Path>) -> Result<Self, RpcError> {
        let mut command = Command::new(std::env::current_exe()?);
        command.arg("worker").arg("--side").arg(side.as_str());
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(RpcError::Disconnected);
        };
        info!("[{}] worker process {} started", side, child.id());
        let inbound: Box<dyn Inbound> = Box::new(LineReader::new(BufReader::<ChildStdout>::new(stdout)));
        let outbound: Box<dyn Outbound> = Box::new(LineWriter::<ChildStdin>::new(stdin));
        Ok(Self::new(side, inbound, outbound, Some(Worker::Process(child))))
    }

    /// The arm behind this proxy.
    pub fn side(&self) -> Side {
        self.side
    }

    fn send(&self, request: &Request) -> Result<(), RpcError> {
        let mut out = self.out.lock().map_err(|_| RpcError::Broken)?;
        send_message(out.as_mut(), request)
    }

    /// Run `method` on the worker and wait for its result.
    pub fn call(&self, method: Method) -> Result<Value, RpcError> {
        let mut link = self.link.lock().map_err(|_| RpcError::Broken)?;
        if link.broken {
            return Err(RpcError::Broken);
        }
        link.next_id += 1;
        let id = link.next_id;
        let (name, kwargs) = method.into_wire()?;
        debug!("[{}] -> #{} {}", self.side, id, name);
        self.send(&Request::Call {
            id,
            method: name,
            args: Vec::new(),
            kwargs,
        })?;

        let line = link.inbound.recv_line()?.ok_or(RpcError::Disconnected)?;
        let reply: Reply = match serde_json::from_str(&line) {
            Ok(reply) => reply,
            Err(_) => {
                link.broken = true;
                return Err(RpcError::Malformed(line));
            }
        };
        if reply.id != Some(id) {
            link.broken = true;
            error!(
                "[{}] reply for {:?} while waiting for {}; abandoning the link",
                self.side, reply.id, id
            );
            return Err(RpcError::OutOfOrder {
                expected: id,
                got: reply.id,
            });
        }
        if reply.ok {
            Ok(reply.result.unwrap_or(Value::Null))
        } else {
            Err(RpcError::Remote(reply.error.unwrap_or(RemoteError {
                message: "unknown error".to_owned(),
                origin: format!("{} worker", self.side),
            })))
        }
    }

    /// [`ArmProxy::call`], decoding the result.
    pub fn call_as<T: DeserializeOwned>(&self, method: Method) -> Result<T, RpcError> {
        let value = self.call(method)?;
        serde_json::from_value(value).map_err(RpcError::Encode)
    }

    /// Ask the worker to stop its running playback. Does not wait.
    pub fn cancel(&self) -> Result<(), RpcError> {
        self.send(&Request::Cancel)
    }

    /// Tell the worker to let go of the arm and wait for it to exit.
    pub fn shutdown(&self) {
        let Ok(mut worker) = self.worker.lock() else {
            return;
        };
        let Some(worker) = worker.take() else {
            return;
        };
        if let Err(e) = self.send(&Request::Shutdown) {
            debug!("[{}] shutdown not delivered: {}", self.side, e);
        }
        match worker {
            Worker::Thread(handle) => {
                if handle.join().is_err() {
                    error!("[{}] worker thread panicked", self.side);
                }
            }
            Worker::Process(mut child) => {
                // Closing stdin makes a worker that missed the message exit too.
                if let Ok(mut out) = self.out.lock() {
                    *out = Box::new(LineWriter::new(io::sink()));
                }
                match child.wait() {
                    Ok(status) => info!("[{}] worker exited: {}", self.side, status),
                    Err(e) => error!("[{}] waiting for worker: {}", self.side, e),
                }
            }
        }
    }
}

impl Drop for ArmProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}
