mod config;
mod credential_profile;
mod logging;
mod state;

use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use config::ConsoleConfig;
use credential_profile::{CredentialProfile, load_profile, save_profile};
use handshake_core::{
    CompletedSession, CredentialForm, FlowOutcome, HandshakeCommand, HandshakeEvent,
    HandshakeState,
};
use handshake_gateway::{HandshakeRuntimeHandle, WebSocketConnector, spawn_runtime};
use state::{ConsoleState, ConsoleStep};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast::error::RecvError, mpsc, oneshot},
};
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    logging::init();
    info!("starting session-console");

    let config = match ConsoleConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("session-console")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(config));
    // The stdin reader sits in a blocking read; do not wait for it.
    runtime.shutdown_timeout(Duration::from_millis(100));

    match result {
        Ok(FlowOutcome::Completed) => ExitCode::SUCCESS,
        Ok(FlowOutcome::Cancelled) => {
            println!("Cancelled.");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(error = %err, "session-console stopped");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ConsoleConfig) -> Result<FlowOutcome, String> {
    let profile_path = config.profile_path();
    let remembered = match load_profile(&profile_path) {
        Ok(profile) => profile,
        Err(err) => {
            warn!(error = %err, "ignoring unreadable credential profile");
            None
        }
    };

    let (completed_tx, mut completed_rx) = oneshot::channel::<CompletedSession>();
    let connector = Arc::new(WebSocketConnector::new(config.connect_timeout()));
    let handle = spawn_runtime(config.handshake_config(), connector, move |session| {
        let _ = completed_tx.send(session);
    });
    let mut events = handle.subscribe();
    let mut lines = spawn_stdin_reader();

    println!("Gateway: {}", config.gateway_url);
    let mut console = Console::new(
        handle,
        initial_form(&config, remembered),
        profile_path,
    );
    console.begin_credentials();

    let mut stdin_open = true;
    let mut cancel_requested = false;
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if let Some(outcome) = console.handle_event(event) {
                        if outcome == FlowOutcome::Completed
                            && let Ok(session) = completed_rx.try_recv()
                        {
                            println!(
                                "Session for {} is ready. Returning to the session list.",
                                session.phone_number
                            );
                        }
                        return Ok(outcome);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "console lagged behind handshake events");
                }
                Err(RecvError::Closed) => {
                    return Err("handshake runtime stopped unexpectedly".to_owned());
                }
            },
            line = lines.recv(), if stdin_open => match line {
                Some(line) => console.handle_line(line).await?,
                None => {
                    info!("stdin closed; cancelling handshake");
                    stdin_open = false;
                    cancel_requested = true;
                    console.send(HandshakeCommand::Cancel).await?;
                }
            },
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
                info!("interrupt received; cancelling handshake");
                cancel_requested = true;
                console.send(HandshakeCommand::Cancel).await?;
            }
        }
    }
}

fn initial_form(config: &ConsoleConfig, remembered: Option<CredentialProfile>) -> CredentialForm {
    let mut form = CredentialForm::default();
    if let Some(profile) = remembered {
        form.application_id = profile.application_id;
        form.phone_number = profile.phone_number;
    }
    if let Some(application_id) = &config.prefill_application_id {
        form.application_id = application_id.clone();
    }
    if let Some(phone_number) = &config.prefill_phone_number {
        form.phone_number = phone_number.clone();
    }
    form
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialField {
    ApplicationId,
    ApplicationSecret,
    PhoneNumber,
}

impl CredentialField {
    fn label(self) -> &'static str {
        match self {
            Self::ApplicationId => "Application id",
            Self::ApplicationSecret => "Application secret",
            Self::PhoneNumber => "Phone number",
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::ApplicationId => Some(Self::ApplicationSecret),
            Self::ApplicationSecret => Some(Self::PhoneNumber),
            Self::PhoneNumber => None,
        }
    }
}

/// What the next stdin line answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Nothing,
    Field(CredentialField),
    Challenge,
    Recovery,
}

struct Console {
    handle: HandshakeRuntimeHandle,
    state: ConsoleState,
    form: CredentialForm,
    pending: Pending,
    profile_path: PathBuf,
}

impl Console {
    fn new(handle: HandshakeRuntimeHandle, form: CredentialForm, profile_path: PathBuf) -> Self {
        Self {
            handle,
            state: ConsoleState::new(),
            form,
            pending: Pending::Nothing,
            profile_path,
        }
    }

    async fn send(&self, command: HandshakeCommand) -> Result<(), String> {
        self.handle.send(command).await.map_err(|err| err.to_string())
    }

    fn begin_credentials(&mut self) {
        println!("{}", self.state.snapshot().status_text);
        self.ask_field(CredentialField::ApplicationId);
    }

    fn ask_field(&mut self, field: CredentialField) {
        self.pending = Pending::Field(field);
        let current = match field {
            CredentialField::ApplicationId => self.form.application_id.as_str(),
            CredentialField::ApplicationSecret => "",
            CredentialField::PhoneNumber => self.form.phone_number.as_str(),
        };
        if field == CredentialField::ApplicationSecret && !self.form.application_secret.is_empty()
        {
            prompt(&format!("{} [keep]: ", field.label()));
        } else if current.is_empty() {
            prompt(&format!("{}: ", field.label()));
        } else {
            prompt(&format!("{} [{current}]: ", field.label()));
        }
    }

    fn ask_challenge(&mut self) {
        let snapshot = self.state.snapshot();
        let Some(label) = snapshot.input_label.filter(|_| snapshot.can_submit) else {
            return;
        };
        self.pending = Pending::Challenge;
        if snapshot.input_hidden {
            prompt(&format!("{label} (not stored): "));
        } else {
            prompt(&format!("{label}: "));
        }
    }

    fn ask_recovery(&mut self) {
        self.pending = Pending::Recovery;
        prompt("[r]etry / [c]ancel: ");
    }

    async fn handle_line(&mut self, line: String) -> Result<(), String> {
        let value = line.trim();
        match self.pending {
            Pending::Nothing => {
                debug!("ignoring input while waiting for the gateway");
            }
            Pending::Field(field) => {
                if !value.is_empty() {
                    let slot = match field {
                        CredentialField::ApplicationId => &mut self.form.application_id,
                        CredentialField::ApplicationSecret => &mut self.form.application_secret,
                        CredentialField::PhoneNumber => &mut self.form.phone_number,
                    };
                    *slot = value.to_owned();
                }
                match field.next() {
                    Some(next) => self.ask_field(next),
                    None => {
                        self.pending = Pending::Nothing;
                        self.state.mark_submitted();
                        println!("{}", self.state.snapshot().status_text);
                        self.send(HandshakeCommand::Submit(self.form.clone()))
                            .await?;
                    }
                }
            }
            Pending::Challenge => {
                if value.is_empty() {
                    println!("! an answer is required");
                    self.ask_challenge();
                    return Ok(());
                }
                self.pending = Pending::Nothing;
                self.state.mark_response_sent();
                println!("{}", self.state.snapshot().status_text);
                self.send(HandshakeCommand::Respond {
                    value: value.to_owned(),
                })
                .await?;
            }
            Pending::Recovery => match value.to_ascii_lowercase().as_str() {
                "r" | "retry" => {
                    self.pending = Pending::Nothing;
                    self.send(HandshakeCommand::Retry).await?;
                }
                "c" | "cancel" => {
                    self.pending = Pending::Nothing;
                    self.send(HandshakeCommand::Cancel).await?;
                }
                _ => self.ask_recovery(),
            },
        }
        Ok(())
    }

    /// Apply one runtime event; returns the outcome once the flow has finished.
    fn handle_event(&mut self, event: HandshakeEvent) -> Option<FlowOutcome> {
        self.state.handle_event(event.clone());
        let snapshot = self.state.snapshot();

        match event {
            HandshakeEvent::StateChanged {
                state: HandshakeState::Idle,
            } => self.begin_credentials(),
            HandshakeEvent::StateChanged { .. } => {}
            HandshakeEvent::Prompt { .. } => {
                if let Some(prompt_text) = &snapshot.prompt_text {
                    println!("{prompt_text}");
                }
                self.ask_challenge();
            }
            HandshakeEvent::Completed { .. } => {
                println!("{}", snapshot.status_text);
            }
            HandshakeEvent::Failed { .. } => {
                if let Some(error_text) = &snapshot.error_text {
                    println!("! {error_text}");
                }
                if snapshot.show_recovery {
                    self.ask_recovery();
                }
            }
            HandshakeEvent::Rejected { .. } => {
                if let Some(error_text) = &snapshot.error_text {
                    println!("! {error_text}");
                }
                match snapshot.step {
                    ConsoleStep::Credentials => self.begin_credentials(),
                    ConsoleStep::Code | ConsoleStep::Password => self.ask_challenge(),
                    _ => {}
                }
            }
            HandshakeEvent::Finished { outcome } => {
                if outcome == FlowOutcome::Completed {
                    self.remember_credentials();
                }
                return Some(outcome);
            }
        }
        None
    }

    fn remember_credentials(&self) {
        let profile = CredentialProfile {
            application_id: self.form.application_id.trim().to_owned(),
            phone_number: self.form.phone_number.trim().to_owned(),
        };
        match save_profile(&self.profile_path, &profile) {
            Ok(()) => debug!(path = %self.profile_path.display(), "credential profile saved"),
            Err(err) => warn!(error = %err, "failed to save credential profile"),
        }
    }
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}
