mod bridge;
mod config;
mod dispatcher;
mod error;
mod provider;
mod search;
mod session;

use iced::{
    widget::{button, column, container, pick_list, row, scrollable, text, text_input, text_input::Id, Column},
    Color, Element, Length, Task, Theme, Font, Subscription,
    clipboard,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment, Padding,
    window,
};
use std::path::Path;

use dispatcher::{DispatchSettings, TurnDispatcher};
use session::{Attachment, ChatTurn, Mode, Sender, SessionState};

fn init_logging() {
    let filter = if std::env::var_os("ASKBAR_DEBUG").is_some() {
        "warn,ask_bar=debug"
    } else {
        "warn,ask_bar=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

fn main() -> iced::Result {
    init_logging();
    let config = config::Config::load();

    let window_settings = window::Settings {
        size: iced::Size::new(config.window.width as f32, config.window.height as f32),
        min_size: Some(iced::Size::new(config.window.min_width as f32, config.window.min_height as f32)),
        position: window::Position::Centered,
        ..Default::default()
    };

    iced::application("Ask Bar", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window_settings)
        .default_font(Font::MONOSPACE)
        .run_with(move || App::new(config))
}

/// Comma-separated paths from the attach field.
fn load_attachments(paths: &str) -> anyhow::Result<Vec<Attachment>> {
    paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Attachment::from_path(Path::new(p)))
        .collect()
}

fn human_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn describe_attachment(attachment: &Attachment) -> String {
    let kind = if attachment.is_image() { "image" } else { "file" };
    format!("[{}] {} ({}, {})", kind, attachment.name, attachment.media_type, human_size(attachment.size()))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    AttachPathChanged(String),
    AttachFiles,
    ClearAttachments,
    ModeSelected(Mode),
    Submit,
    CopyLastReply,
    Exit,
}

#[derive(Debug, Clone)]
enum Notice {
    Warning(String),
    Error(String),
}

struct App {
    session: SessionState,
    dispatcher: TurnDispatcher,
    input_text: String,
    attach_path: String,
    notice: Option<Notice>,
    input_id: Id,
}

impl App {
    fn new(config: config::Config) -> (Self, Task<Message>) {
        let model = provider::from_config(&config.provider);
        let search = search::from_config(&config.search);
        let settings = DispatchSettings::from_config(&config);
        log::info!(
            "Using {} model {} (research mode {})",
            model.name(),
            model.model(),
            if settings.research_enabled { "on" } else { "off" }
        );

        let input_id = Id::unique();

        let app = App {
            session: SessionState::new(),
            dispatcher: TurnDispatcher::new(model, search, settings),
            input_text: String::new(),
            attach_path: String::new(),
            notice: None,
            input_id: input_id.clone(),
        };

        (app, text_input::focus(input_id))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::AttachPathChanged(value) => {
                self.attach_path = value;
                Task::none()
            }
            Message::AttachFiles => {
                match load_attachments(&self.attach_path) {
                    Ok(files) if files.is_empty() => {
                        self.notice = Some(Notice::Warning("Enter one or more file paths to attach".to_string()));
                    }
                    Ok(files) => {
                        log::debug!("Staged {} attachment(s)", files.len());
                        self.session.stage(files);
                        self.attach_path.clear();
                        self.notice = None;
                    }
                    Err(e) => {
                        self.notice = Some(Notice::Error(format!("{:#}", e)));
                    }
                }
                Task::none()
            }
            Message::ClearAttachments => {
                self.session.clear_staged();
                Task::none()
            }
            Message::ModeSelected(mode) => {
                self.session.set_mode(mode);
                Task::none()
            }
            Message::Submit => {
                // Blocks until the reply (or failure) is in the session.
                match self.dispatcher.submit(&mut self.session, &self.input_text) {
                    Ok(_) => {
                        self.input_text.clear();
                        self.notice = None;
                    }
                    Err(e) if e.is_user_correctable() => {
                        self.notice = Some(Notice::Warning(e.to_string()));
                    }
                    Err(e) => {
                        self.notice = Some(Notice::Error(format!("{}. Press Send to try again.", e)));
                    }
                }
                text_input::focus(self.input_id.clone())
            }
            Message::CopyLastReply => {
                let last_reply = self
                    .session
                    .history()
                    .iter()
                    .rev()
                    .find(|turn| turn.sender() == Sender::Assistant)
                    .map(|turn| turn.message().to_string());
                match last_reply {
                    Some(reply) => clipboard::write(reply),
                    None => Task::none(),
                }
            }
            Message::Exit => {
                iced::exit()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        })
    }

    fn view_turn<'a>(&'a self, index: usize, turn: &'a ChatTurn) -> Element<'a, Message> {
        let label = match turn.sender() {
            Sender::User => "You:",
            Sender::Assistant => "Assistant:",
        };

        let mut turn_column = column![
            text(label).size(13).color(Color::from_rgb(0.55, 0.6, 0.85)),
            text(turn.message()).size(15),
        ]
        .spacing(4);

        for attachment in turn.attachments() {
            turn_column = turn_column.push(text(describe_attachment(attachment)).size(12));
        }

        if self.session.is_failed(index) {
            turn_column = turn_column.push(
                text("Not delivered. Press Send to try again.")
                    .size(12)
                    .color(Color::from_rgb(0.9, 0.4, 0.4)),
            );
        }

        container(turn_column).padding(8).width(Length::Fill).into()
    }

    fn view(&self) -> Element<Message> {
        let history: Element<Message> = if self.session.history().is_empty() {
            container(text(format!("Ask {} anything.", self.dispatcher.model_name())).size(15))
                .width(Length::Fill)
                .height(Length::Fill)
                .align_x(alignment::Horizontal::Center)
                .align_y(alignment::Vertical::Center)
                .into()
        } else {
            let turns = self
                .session
                .history()
                .iter()
                .enumerate()
                .map(|(index, turn)| self.view_turn(index, turn));
            scrollable(Column::with_children(turns).spacing(10).padding(10))
                .height(Length::Fill)
                .into()
        };

        let mut controls = row![].spacing(8).align_y(alignment::Vertical::Center);
        if self.dispatcher.settings().research_enabled {
            controls = controls.push(pick_list(Mode::ALL, Some(self.session.mode()), Message::ModeSelected));
        }
        controls = controls
            .push(
                text_input("Attach files (comma-separated paths)", &self.attach_path)
                    .on_input(Message::AttachPathChanged)
                    .on_submit(Message::AttachFiles)
                    .padding(8),
            )
            .push(button(text("+")).on_press(Message::AttachFiles).padding(8));

        let mut content_column = column![history, controls].spacing(10).padding(10);

        let staged = self.session.pending_attachments();
        if !staged.is_empty() {
            let names: Vec<&str> = staged.iter().map(|a| a.name.as_str()).collect();
            content_column = content_column.push(
                row![
                    text(format!("Attached: {}", names.join(", "))).size(13),
                    button(text("Clear").size(13)).on_press(Message::ClearAttachments).padding(4),
                ]
                .spacing(8)
                .align_y(alignment::Vertical::Center),
            );
        }

        if let Some(notice) = &self.notice {
            let notice_text = match notice {
                Notice::Warning(msg) => text(msg.as_str()).color(Color::from_rgb(0.95, 0.75, 0.3)),
                Notice::Error(msg) => text(msg.as_str()).color(Color::from_rgb(0.9, 0.4, 0.4)),
            };
            content_column = content_column.push(notice_text.size(14));
        }

        let input = text_input("Ask your query...", &self.input_text)
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(15)
            .size(18)
            .id(self.input_id.clone());

        let send_row = row![
            input,
            button(text("Send")).on_press(Message::Submit).padding(15),
            button(text("[Copy]").size(14)).on_press(Message::CopyLastReply).padding(Padding::from([15, 10])),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center);

        content_column = content_column.push(send_row);

        container(content_column)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
