use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use shellgate_core::audit::{AuditRecord, BufferedAuditSink};
use shellgate_core::policy::{self, Decision, PolicyRuleSet};
use shellgate_core::pool::{ConnectionKey, ConnectionPool};
use shellgate_core::session::{CommandRecord, CommandStatus, HostId, PumpHandle, Session, SessionId, TenantId, UserId};
use tokio::sync::{mpsc, Mutex, Notify};
use std::sync::Mutex as StdMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{ChannelEvent, RusshTransport, ShellChannel};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const JOIN_DEADLINE: Duration = Duration::from_secs(2);
const BLOCKED_PREFIX: &str = "\x1b[31m[blocked] ";
const ANSI_RESET: &str = "\x1b[0m\r\n";

#[derive(Debug)]
pub enum InputFrame {
    Data(Vec<u8>),
    Resize { cols: u32, rows: u32 },
}

/// Implemented by whatever speaks the browser-facing wire protocol (the
/// websocket transport layer). The pump never knows about framing.
#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn send_output(&self, data: Vec<u8>);
    async fn send_closed(&self, reason: String);
}

struct PumpIdentity {
    session_id: SessionId,
    tenant_id: TenantId,
    user_id: UserId,
    host_id: HostId,
}

/// Owns one `ShellChannel` and runs the output/input forwarder tasks.
/// Implements `shellgate_core::session::PumpHandle` so the registry can
/// tear it down without depending on this crate.
pub struct Pump {
    identity: PumpIdentity,
    session: Arc<Mutex<Session>>,
    channel: Arc<ShellChannel>,
    transport: Arc<RusshTransport>,
    pool: Arc<ConnectionPool<RusshTransport>>,
    pool_key: ConnectionKey,
    rule_set: Option<PolicyRuleSet>,
    audit: Arc<BufferedAuditSink>,
    sink: Arc<dyn TransportSink>,
    input_tx: mpsc::Sender<InputFrame>,
    stop: Notify,
    stopped: AtomicBool,
    tasks: StdMutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl Pump {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        session_id: SessionId,
        tenant_id: TenantId,
        user_id: UserId,
        host_id: HostId,
        session: Arc<Mutex<Session>>,
        channel: Arc<ShellChannel>,
        transport: Arc<RusshTransport>,
        pool: Arc<ConnectionPool<RusshTransport>>,
        pool_key: ConnectionKey,
        rule_set: Option<PolicyRuleSet>,
        audit: Arc<BufferedAuditSink>,
        sink: Arc<dyn TransportSink>,
    ) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(64);

        let pump = Arc::new(Self {
            identity: PumpIdentity {
                session_id,
                tenant_id,
                user_id,
                host_id,
            },
            session,
            channel,
            transport,
            pool,
            pool_key,
            rule_set,
            audit,
            sink,
            input_tx,
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
            tasks: StdMutex::new(None),
        });

        let output_task = {
            let pump = pump.clone();
            tokio::task::Builder::new()
                .name("pump-output")
                .spawn(async move { pump.run_output_forwarder().await })
                .expect("spawn output forwarder")
        };
        let input_task = {
            let pump = pump.clone();
            tokio::task::Builder::new()
                .name("pump-input")
                .spawn(async move { pump.run_input_forwarder(input_rx).await })
                .expect("spawn input forwarder")
        };

        *pump.tasks.lock().expect("pump task lock poisoned") = Some((input_task, output_task));

        pump
    }

    pub async fn push_input(&self, data: Vec<u8>) {
        let _ = self.input_tx.send(InputFrame::Data(data)).await;
    }

    pub async fn push_resize(&self, cols: u32, rows: u32) {
        let _ = self.input_tx.send(InputFrame::Resize { cols, rows }).await;
    }

    async fn run_output_forwarder(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            match self.channel.read(READ_TIMEOUT).await {
                Some(ChannelEvent::Data(data)) => {
                    self.session.lock().await.touch();
                    self.sink.send_output(data).await;
                }
                Some(ChannelEvent::ExitStatus(_)) => {}
                Some(ChannelEvent::Closed) => {
                    debug!(session_id = %self.identity.session_id, "ssh channel closed, stopping pump");
                    break;
                }
                Some(ChannelEvent::Other) | None => {}
            }
        }
        self.stop.notify_waiters();
    }

    async fn run_input_forwarder(self: Arc<Self>, mut input_rx: mpsc::Receiver<InputFrame>) {
        loop {
            let frame = tokio::select! {
                _ = self.stop.notified() => break,
                frame = tokio::time::timeout(READ_TIMEOUT, input_rx.recv()) => frame,
            };
            let Ok(Some(frame)) = frame else {
                continue;
            };

            match frame {
                InputFrame::Resize { cols, rows } => {
                    if let Err(err) = self.channel.resize(cols, rows).await {
                        warn!(session_id = %self.identity.session_id, %err, "resize failed");
                        continue;
                    }
                    let mut session = self.session.lock().await;
                    session.terminal_size.cols = cols;
                    session.terminal_size.rows = rows;
                }
                InputFrame::Data(data) => self.handle_input_data(data).await,
            }
        }
    }

    async fn handle_input_data(&self, data: Vec<u8>) {
        let ends_submission = data.last().map(|b| *b == b'\r' || *b == b'\n').unwrap_or(false);

        let submitted_line = {
            let mut session = self.session.lock().await;
            session.command_buffer.extend_from_slice(&data);
            session.touch();
            if ends_submission {
                let line = String::from_utf8_lossy(&session.command_buffer)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                session.command_buffer.clear();
                Some(line)
            } else {
                None
            }
        };

        let Some(line) = submitted_line else {
            if let Err(err) = self.channel.write(&data).await {
                warn!(session_id = %self.identity.session_id, %err, "channel write failed, stopping pump");
                self.stop.notify_waiters();
            }
            return;
        };

        let started_at = Utc::now();
        let decision = policy::evaluate(&line, self.rule_set.as_ref());

        match decision {
            Decision::Allowed => {
                match self.channel.write(&data).await {
                    Ok(()) => {
                        self.record_command(&line, CommandStatus::Success, None, started_at).await;
                    }
                    Err(err) => {
                        warn!(session_id = %self.identity.session_id, %err, "channel write failed, stopping pump");
                        self.record_command(&line, CommandStatus::Failed, None, started_at).await;
                        self.stop.notify_waiters();
                    }
                }
            }
            Decision::Blocked { reason } => {
                self.record_command(&line, CommandStatus::Blocked, Some(reason.clone()), started_at)
                    .await;
                let message = format!("{BLOCKED_PREFIX}{reason}{ANSI_RESET}");
                self.sink.send_output(message.into_bytes()).await;
            }
        }
    }

    async fn record_command(
        &self,
        command_text: &str,
        status: CommandStatus,
        block_reason: Option<String>,
        started_at: chrono::DateTime<Utc>,
    ) {
        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;

        if status != CommandStatus::Blocked {
            let record = CommandRecord {
                session_id: self.identity.session_id,
                command_text: command_text.to_string(),
                status,
                output_capture: None,
                error_capture: None,
                exit_code: None,
                executed_at: started_at,
                duration_ms,
                block_reason: block_reason.clone(),
            };
            self.session.lock().await.command_history.push(record);
        }

        self.audit.append(AuditRecord {
            id: Uuid::new_v4(),
            tenant_id: self.identity.tenant_id.clone(),
            user_id: self.identity.user_id.clone(),
            host_id: self.identity.host_id.clone(),
            session_id: self.identity.session_id,
            command_text: command_text.to_string(),
            status,
            block_reason,
            output_capture: None,
            error_capture: None,
            exit_code: None,
            executed_at: started_at,
            duration_ms,
            ip_address: None,
        });
    }

    /// Non-interactive, single-command execution. Shares the filter and audit code
    /// paths with interactive mode but runs outside the PTY channel.
    pub async fn execute_once(&self, command: &str, timeout: Duration) -> CommandRecord {
        let started_at = Utc::now();
        let decision = policy::evaluate(command, self.rule_set.as_ref());

        if let Decision::Blocked { reason } = decision {
            self.record_command(command, CommandStatus::Blocked, Some(reason.clone()), started_at)
                .await;
            return CommandRecord {
                session_id: self.identity.session_id,
                command_text: command.to_string(),
                status: CommandStatus::Blocked,
                output_capture: None,
                error_capture: None,
                exit_code: None,
                executed_at: started_at,
                duration_ms: 0,
                block_reason: Some(reason),
            };
        }

        let (status, output_capture, error_capture, exit_code) =
            match self.transport.exec_once(command, timeout).await {
                Ok((stdout, stderr, exit_code)) => {
                    let status = if exit_code == Some(0) || exit_code.is_none() {
                        CommandStatus::Success
                    } else {
                        CommandStatus::Failed
                    };
                    (status, Some(stdout), Some(stderr), exit_code)
                }
                Err(err) => (CommandStatus::Failed, None, Some(err.to_string()), None),
            };

        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        let record = CommandRecord {
            session_id: self.identity.session_id,
            command_text: command.to_string(),
            status,
            output_capture: output_capture.clone(),
            error_capture: error_capture.clone(),
            exit_code,
            executed_at: started_at,
            duration_ms,
            block_reason: None,
        };

        self.session.lock().await.command_history.push(record.clone());
        self.audit.append(AuditRecord {
            id: Uuid::new_v4(),
            tenant_id: self.identity.tenant_id.clone(),
            user_id: self.identity.user_id.clone(),
            host_id: self.identity.host_id.clone(),
            session_id: self.identity.session_id,
            command_text: command.to_string(),
            status,
            block_reason: None,
            output_capture,
            error_capture,
            exit_code,
            executed_at: started_at,
            duration_ms,
            ip_address: None,
        });

        record
    }
}

#[async_trait]
impl PumpHandle for Pump {
    async fn stop(&self, reason: &str) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.notify_waiters();
        self.channel.close().await;
        self.pool.release(&self.pool_key).await;

        let tasks = self.tasks.lock().expect("pump task lock poisoned").take();
        if let Some((input_task, output_task)) = tasks {
            let joined = tokio::time::timeout(JOIN_DEADLINE, async {
                let _ = input_task.await;
                let _ = output_task.await;
            })
            .await;
            if joined.is_err() {
                warn!(session_id = %self.identity.session_id, "forwarder join deadline exceeded, abandoning tasks");
            }
        }

        self.sink.send_closed(reason.to_string()).await;
        info!(session_id = %self.identity.session_id, %reason, "pump stopped");
    }
}
