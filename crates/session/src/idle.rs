//! Inactivity logout
//!
//! After `idle` without input the monitor asks the user whether to continue.
//! If the prompt stays unanswered for `grace`, the timeout callback runs.
//! Any input, including input while the prompt shows, restarts the window.
//! Continuing only cancels the pending logout; it never refreshes tokens.

use crate::manager::SessionManager;
use crate::types::{LogoutReason, SessionState, SessionStatus};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Input that counts as user activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Pointer,
    Key,
    Click,
    Scroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePhase {
    Active,
    /// "Continue session?" is showing
    Prompting,
    /// Prompt went unanswered and the timeout callback ran
    TimedOut,
    Stopped,
}

#[derive(Debug)]
enum Command {
    Activity(Activity),
    Continue,
    Stop,
}

/// Handle to a running idle monitor; dropping it stops the monitor
#[derive(Debug)]
pub struct IdleMonitor {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<IdlePhase>,
    task: JoinHandle<()>,
}

impl IdleMonitor {
    /// Start a monitor that runs `on_timeout` once the prompt expires
    pub fn spawn<F, Fut>(idle: Duration, grace: Duration, on_timeout: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::start(idle, grace, None, on_timeout)
    }

    /// Start a monitor that logs `session` out on timeout and stops by itself
    /// once the session ends for any other reason
    pub fn for_session(session: SessionManager, idle: Duration, grace: Duration) -> Self {
        let state = session.subscribe();
        Self::start(idle, grace, Some(state), move || async move {
            session.logout_with(LogoutReason::Idle, true).await;
        })
    }

    fn start<F, Fut>(
        idle: Duration,
        grace: Duration,
        session: Option<watch::Receiver<SessionState>>,
        on_timeout: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(IdlePhase::Active);
        let task = tokio::spawn(run(idle, grace, rx, phase_tx, session, on_timeout));
        Self {
            commands,
            phase,
            task,
        }
    }

    /// Report user input; resets the idle window and dismisses a showing prompt
    pub fn record(&self, activity: Activity) {
        let _ = self.commands.send(Command::Activity(activity));
    }

    /// Answer the prompt with "continue"
    pub fn continue_session(&self) {
        let _ = self.commands.send(Command::Continue);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn phase(&self) -> IdlePhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<IdlePhase> {
        self.phase.clone()
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F, Fut>(
    idle: Duration,
    grace: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    phase: watch::Sender<IdlePhase>,
    mut session: Option<watch::Receiver<SessionState>>,
    on_timeout: F,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut deadline = Instant::now() + idle;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Stop) => break,
                Some(Command::Activity(_) | Command::Continue) => {
                    if *phase.borrow() == IdlePhase::Prompting {
                        debug!("Idle prompt dismissed");
                    }
                    phase.send_replace(IdlePhase::Active);
                    deadline = Instant::now() + idle;
                }
            },
            () = tokio::time::sleep_until(deadline) => {
                if *phase.borrow() == IdlePhase::Active {
                    info!(grace_secs = grace.as_secs(), "Idle, asking to continue session");
                    phase.send_replace(IdlePhase::Prompting);
                    deadline = Instant::now() + grace;
                } else {
                    info!("Idle prompt unanswered, ending session");
                    phase.send_replace(IdlePhase::TimedOut);
                    on_timeout().await;
                    return;
                }
            },
            () = session_ended(&mut session) => {
                debug!("Session ended, stopping idle monitor");
                break;
            },
        }
    }

    phase.send_replace(IdlePhase::Stopped);
}

/// Resolves once the watched session is anonymous; never without a session
async fn session_ended(session: &mut Option<watch::Receiver<SessionState>>) {
    match session {
        Some(rx) => {
            let watched = rx
                .wait_for(|state| state.status() == SessionStatus::Anonymous)
                .await
                .is_ok();
            if !watched {
                // sender gone, nothing left to watch
                *session = None;
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}
