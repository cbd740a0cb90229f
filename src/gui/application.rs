use iced::{Alignment, Application, Command, Element, Length, Settings, Size, Subscription, window};
use iced::event::{self, Event};
use iced::time::every as iced_time_every;
use iced::theme::{self, Theme};
use iced::widget::{button, column, container, horizontal_rule, row, text, Column, Row};
use std::time::Duration;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::backend::rpc::RpcBackend;
use crate::backend::types::{event_channels, EventSenders};
use crate::bridge::{BridgeUpdate, EventBridge};
use crate::config::io::ConfigIO;
use crate::config::types::PanelConfig;
use crate::error::{AppRunError, BackendError};
use crate::gui::chart::RateChart;
use crate::gui::style::TextButtonStyleSheet;
use crate::gui::types::{BackendHandle, Message};
use crate::orchestrator::machine::ConnectionOrchestrator;
use crate::orchestrator::types::{
    Action, BackendRequest, CommandOutcome, ConnectionPhase, ConnectionSession, TRANSPORTS,
};
use crate::telemetry::{SessionStats, TelemetryAccumulator, TelemetrySample};

pub struct ApplicationFlags {
    pub config_io: ConfigIO,
    pub backend_override: Option<String>,
}

pub struct PanelApplication {
    // this token is cancelled upon exit; it tears down the event bridge pump
    // and the backend reader in one place
    app_cancel: CancellationToken,

    // messages that the user must click away
    notices: Vec<String>,

    config_io: ConfigIO,
    config: PanelConfig,
    backend_override: Option<String>,

    backend: Option<BackendHandle>,
    event_senders: EventSenders,
    bridge: EventBridge,

    orchestrator: ConnectionOrchestrator,
    accumulator: TelemetryAccumulator,
    chart: RateChart,

    // latest derived-stream-status push, display only
    derived_stream: Option<String>,

    // window handle is injected here instead of living in a global
    main_window: window::Id,
    always_on_top: bool,

    // the scan dialog can be dismissed visually; the scan itself cannot be
    // cancelled, late events still resolve through the orchestrator
    scan_dialog_dismissed: bool,
}

impl PanelApplication {
    fn before_close(&mut self) {
        self.app_cancel.cancel();
    }

    fn load_config(&self) -> Command<Message> {
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.read().await {
                Ok(config) => (config, None),
                Err(err) => {
                    let mut error_message: Option<String> = None;

                    if err.is_file_not_found_error() {
                        // this is probably the first start of the app
                        info!("Config file not found, using defaults");
                    } else {
                        error!("Failed to load config: {:?}", &err);
                        error_message = Some(format!("Failed to load config: {}", &err));
                    }
                    (PanelConfig::default(), error_message)
                },
            }
        };

        Command::perform(fut, Message::ConfigLoadComplete)
    }

    fn connect_backend(&self) -> Command<Message> {
        let addr = self.config.backend_addr.clone();
        let senders = self.event_senders.clone();
        let cancel = self.app_cancel.clone();

        let fut = async move {
            RpcBackend::connect(&addr, senders, cancel)
                .await
                .map(|backend| BackendHandle(backend))
        };

        Command::perform(fut, Message::BackendConnected)
    }

    fn perform_actions(&mut self, actions: Vec<Action>) -> Command<Message> {
        let mut commands = Vec::new();

        for action in actions {
            match action {
                Action::ResetTelemetry => {
                    self.accumulator.reset();
                    self.chart.request_redraw();
                },
                Action::Invoke(request) => {
                    commands.push(self.invoke(request));
                },
            }
        }

        Command::batch(commands)
    }

    fn invoke(&self, request: BackendRequest) -> Command<Message> {
        let backend = match &self.backend {
            Some(handle) => handle.clone(),
            None => {
                // resolve the request as failed so the orchestrator still
                // observes an outcome and ends up in a consistent phase
                let outcome = offline_outcome(request);
                return Command::perform(async move { outcome }, Message::Outcome);
            },
        };
        let stream_name = self.config.stream_name.clone();

        Command::perform(run_request(backend, request, stream_name), Message::Outcome)
    }
}

async fn run_request(
    backend: BackendHandle,
    request: BackendRequest,
    stream_name: String,
) -> CommandOutcome {
    let backend = backend.0;

    match request {
        BackendRequest::DetectDevice => {
            CommandOutcome::DeviceDetected(backend.detect_device().await)
        },
        BackendRequest::StartStreaming { port } => {
            CommandOutcome::StreamingStarted(backend.start_streaming(&port, &stream_name).await)
        },
        BackendRequest::StartWifiStreaming => {
            CommandOutcome::WifiStreamingStarted(backend.start_wifi_streaming().await)
        },
        BackendRequest::ScanDevices => CommandOutcome::ScanStarted(backend.scan_devices().await),
        BackendRequest::ConnectToDevice { device_id } => {
            let result = backend.connect_to_device(&device_id).await;
            CommandOutcome::DeviceConnected { device_id, result }
        },
        BackendRequest::DisconnectFromDevice { device_id } => {
            CommandOutcome::DeviceDisconnected(backend.disconnect_from_device(&device_id).await)
        },
        BackendRequest::Cleanup => CommandOutcome::CleanupFinished(backend.cleanup().await),
    }
}

fn offline_outcome(request: BackendRequest) -> CommandOutcome {
    let err = BackendError::unreachable("backend not connected");

    match request {
        BackendRequest::DetectDevice => CommandOutcome::DeviceDetected(Err(err)),
        BackendRequest::StartStreaming { .. } => CommandOutcome::StreamingStarted(Err(err)),
        BackendRequest::StartWifiStreaming => CommandOutcome::WifiStreamingStarted(Err(err)),
        BackendRequest::ScanDevices => CommandOutcome::ScanStarted(Err(err)),
        BackendRequest::ConnectToDevice { device_id } => {
            CommandOutcome::DeviceConnected { device_id, result: Err(err) }
        },
        BackendRequest::DisconnectFromDevice { .. } => CommandOutcome::DeviceDisconnected(Err(err)),
        BackendRequest::Cleanup => CommandOutcome::CleanupFinished(Err(err)),
    }
}

impl Application for PanelApplication {
    type Executor = iced::executor::Default;
    type Message = Message;
    type Theme = Theme;
    type Flags = ApplicationFlags;

    fn new(flags: ApplicationFlags) -> (PanelApplication, Command<Self::Message>) {
        let app_cancel = CancellationToken::new();
        let (event_senders, event_channels) = event_channels();
        let bridge = EventBridge::new(event_channels, app_cancel.clone());

        let config = PanelConfig::default();
        let accumulator = TelemetryAccumulator::new(config.chart_window_ms);
        let chart = RateChart::new(config.chart_window_ms);

        let app = PanelApplication {
            app_cancel,
            notices: Vec::new(),
            config_io: flags.config_io,
            config,
            backend_override: flags.backend_override,
            backend: None,
            event_senders,
            bridge,
            orchestrator: ConnectionOrchestrator::new(),
            accumulator,
            chart,
            derived_stream: None,
            main_window: window::Id::MAIN,
            always_on_top: false,
            scan_dialog_dismissed: false,
        };

        let command = app.load_config();
        (app, command)
    }

    fn title(&self) -> String {
        String::from(concat!("Chords Panel ", env!("CARGO_PKG_VERSION")))
    }

    fn update(&mut self, message: Message) -> Command<Self::Message> {
        match message {
            Message::ConfigLoadComplete((mut config, error_message)) => {
                info!("Config load complete");
                if let Some(addr) = &self.backend_override {
                    config.backend_addr = addr.clone();
                }
                self.accumulator = TelemetryAccumulator::new(config.chart_window_ms);
                self.chart.set_window_ms(config.chart_window_ms);
                self.config = config;
                if let Some(error_message) = error_message {
                    self.notices.push(error_message);
                }
                return self.connect_backend();
            },
            Message::BackendConnected(Ok(handle)) => {
                info!("Acquisition backend is reachable");
                self.backend = Some(handle);
            },
            Message::BackendConnected(Err(err)) => {
                error!("Failed to reach the acquisition backend: {}", err);
                self.notices.push(format!(
                    "Could not reach the acquisition backend at {}: {}",
                    self.config.backend_addr, err
                ));
            },
            Message::NoticeConfirmed => {
                if !self.notices.is_empty() {
                    self.notices.remove(0);
                }
            },

            Message::TransportPressed(mode) => {
                self.scan_dialog_dismissed = false;
                self.derived_stream = None;
                let actions = self.orchestrator.select_transport(mode);
                return self.perform_actions(actions);
            },
            Message::DevicePicked(device_id) => {
                self.orchestrator.select_device(&device_id);
            },
            Message::ConfirmDevice => {
                let actions = self.orchestrator.confirm_device_selection();
                return self.perform_actions(actions);
            },
            Message::CancelScan => {
                // visual dismissal only, there is no cancel-in-flight command
                self.scan_dialog_dismissed = true;
            },
            Message::Disconnect => {
                let actions = self.orchestrator.disconnect();
                return self.perform_actions(actions);
            },

            Message::Bridge(BridgeUpdate::Discovery(devices)) => {
                let actions = self.orchestrator.on_discovery(devices);
                return self.perform_actions(actions);
            },
            Message::Bridge(BridgeUpdate::Connection(notice)) => {
                let actions = self.orchestrator.on_connection_status(notice);
                return self.perform_actions(actions);
            },
            Message::Bridge(BridgeUpdate::Rate(rate)) => {
                self.accumulator.on_rate_sample(rate);
                self.chart.request_redraw();
            },
            Message::Bridge(BridgeUpdate::SampleLoss(count)) => {
                self.accumulator.on_sample_loss(count);
            },
            Message::Bridge(BridgeUpdate::DerivedStream(name)) => {
                self.derived_stream = Some(name);
            },
            Message::Outcome(outcome) => {
                let actions = self.orchestrator.on_command_outcome(outcome);
                return self.perform_actions(actions);
            },

            Message::PinToggled => {
                self.always_on_top = !self.always_on_top;
                let level = if self.always_on_top {
                    window::Level::AlwaysOnTop
                } else {
                    window::Level::Normal
                };
                return window::change_level(self.main_window, level);
            },
            Message::MinimizePressed => {
                return window::minimize(self.main_window, true);
            },
            Message::ClosePressed => {
                info!("Close requested from the title bar");
                self.before_close();
                return window::close(self.main_window);
            },
            Message::EventOccurred(Event::Window(id, window::Event::CloseRequested)) => {
                info!("Close requested");
                self.before_close();
                return window::close(id);
            },

            Message::Tick => {
                self.chart.request_redraw();
            },

            _ => {},
        }

        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        let mut subscriptions = vec![
            event::listen().map(Message::EventOccurred),
            self.bridge.subscription().map(Message::Bridge),
        ];

        if self.orchestrator.session().phase == ConnectionPhase::Connected {
            subscriptions.push(iced_time_every(Duration::from_millis(500)).map(|_| Message::Tick));
        }

        Subscription::batch(subscriptions)
    }

    fn view(&self) -> Element<Message> {
        if let Some(notice) = self.notices.first() {
            return container(
                column![
                    text(notice),

                    button(text("Okay"))
                        .on_press(Message::NoticeConfirmed),

                ].align_items(Alignment::Center).spacing(20),
            )
            .width(Length::Fill)
            .padding(20)
            .into();
        }

        let session = self.orchestrator.session();

        let mut content = column![
            title_bar(self.always_on_top),
            horizontal_rule(10),
            transport_row(session),
            text(phase_text(session)),
        ]
        .align_items(Alignment::Center)
        .spacing(20);

        if let Some(status) = &session.status_message {
            content = content.push(text(status).size(14));
        }

        let selection_transport = session
            .mode
            .spec()
            .map_or(false, |spec| spec.expects_selection);

        if selection_transport
            && matches!(session.phase, ConnectionPhase::Scanning | ConnectionPhase::Connecting)
            && !self.scan_dialog_dismissed
        {
            content = content.push(scan_selection_view(session));
        }

        if session.phase == ConnectionPhase::Connected {
            content = content.push(telemetry_view(
                self.accumulator.stats(),
                self.accumulator.series(),
                self.derived_stream.as_deref(),
                &self.chart,
            ));
        }

        container(content)
            .width(Length::Fill)
            .padding(20)
            .into()
    }
}

fn title_bar(always_on_top: bool) -> Element<'static, Message> {
    let text_button = |label: &'static str, message: Message| {
        button(text(label).size(14))
            .style(theme::Button::Custom(Box::new(TextButtonStyleSheet)))
            .on_press(message)
    };

    let pin = button(text(if always_on_top { "Unpin" } else { "Pin" }).size(14))
        .style(if always_on_top {
            theme::Button::Primary
        } else {
            theme::Button::Custom(Box::new(TextButtonStyleSheet))
        })
        .on_press(Message::PinToggled);

    row![
        text(concat!("Chords Panel ", env!("CARGO_PKG_VERSION"))).size(14),
        iced::widget::horizontal_space(),
        pin,
        text_button("Minimize", Message::MinimizePressed),
        text_button("Close", Message::ClosePressed),
    ]
    .align_items(Alignment::Center)
    .spacing(10)
    .width(Length::Fill)
    .into()
}

fn transport_row(session: &ConnectionSession) -> Element<'static, Message> {
    let mut transports = Row::new().spacing(20);

    for mode in TRANSPORTS {
        let style = if session.mode == mode {
            theme::Button::Primary
        } else {
            theme::Button::Secondary
        };

        let mut transport_button = button(text(mode.to_string())).style(style).padding(15);

        // the exclusivity gate lives in the orchestrator; disabling the
        // buttons outside Idle just mirrors it visually
        if session.phase == ConnectionPhase::Idle {
            transport_button = transport_button.on_press(Message::TransportPressed(mode));
        }

        transports = transports.push(transport_button);
    }

    transports.into()
}

fn phase_text(session: &ConnectionSession) -> String {
    match session.phase {
        ConnectionPhase::Idle => "Pick a transport to connect".to_string(),
        ConnectionPhase::Scanning => "Scanning…".to_string(),
        ConnectionPhase::Connecting => "Connecting…".to_string(),
        ConnectionPhase::Connected => format!("Connected via {}", session.mode),
        ConnectionPhase::Disconnecting => "Disconnecting…".to_string(),
    }
}

/// Device list plus the selection affordance. Renders from the session only;
/// emits intents upward.
fn scan_selection_view(session: &ConnectionSession) -> Element<'_, Message> {
    let mut devices = Column::new().spacing(5).width(Length::Fixed(280.0));

    if session.devices.is_empty() {
        devices = devices.push(text("Scanning for devices…").size(14));
    }

    for device in session.devices.values() {
        let selected = session.selected_device_id.as_deref() == Some(device.id.as_str());

        let device_button = button(text(device.display_name()).size(14))
            .style(if selected {
                theme::Button::Primary
            } else {
                theme::Button::Secondary
            })
            .width(Length::Fill)
            .on_press(Message::DevicePicked(device.id.clone()));

        devices = devices.push(device_button);
    }

    let mut connect_button = button(text("Connect"));
    if session.selected_device_id.is_some() && session.phase == ConnectionPhase::Scanning {
        connect_button = connect_button.on_press(Message::ConfirmDevice);
    }

    column![
        text("Bluetooth devices"),
        devices,
        row![
            connect_button,
            button(text("Cancel"))
                .style(theme::Button::Secondary)
                .on_press(Message::CancelScan),
        ].spacing(10),
    ]
    .align_items(Alignment::Center)
    .spacing(10)
    .into()
}

/// Current stats and the scrolling chart. Renders from accumulator state
/// only; the sole intent it emits is Disconnect.
fn telemetry_view<'a>(
    stats: &'a SessionStats,
    series: &'a std::collections::VecDeque<TelemetrySample>,
    derived_stream: Option<&'a str>,
    chart: &'a RateChart,
) -> Element<'a, Message> {
    let mut stat_row = row![
        text(format!("{} Hz", stats.current_rate_hz)),
        text(format!("Lost: {}", stats.samples_lost_cumulative)),
        text(format!("Total: {}", stats.total_samples_cumulative)),
    ]
    .spacing(20);

    if let Some(name) = derived_stream {
        stat_row = stat_row.push(text(format!("LSL: {}", name)).size(14));
    }

    column![
        stat_row,
        chart.view(series),
        button(text("Disconnect"))
            .style(theme::Button::Destructive)
            .on_press(Message::Disconnect),
    ]
    .align_items(Alignment::Center)
    .spacing(15)
    .width(Length::Fill)
    .into()
}

pub fn run_application(backend_override: Option<String>) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let flags = ApplicationFlags { config_io, backend_override };
    let mut settings = Settings::with_flags(flags);

    // handle exits ourselves (Event::CloseRequested)
    settings.id = Some("chords-panel".to_string());
    settings.window.exit_on_close_request = false;
    settings.window.size = Size::new(640.0, 540.0);
    settings.window.resizable = false;

    // this function will call process::exit() unless there was a startup error
    PanelApplication::run(settings)?;
    Ok(())
}
