use crate::commands::Command;
use crate::logger::{Notice, Notifier};
use crate::session::{SessionState, SessionView};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

/// Точки входа для UI. Клонируется свободно; когда последний клон
/// дропнут, координатор отключается сам.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    notifier: Notifier,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        view: watch::Receiver<SessionView>,
        notifier: Notifier,
    ) -> Self {
        Self {
            commands,
            view,
            notifier,
        }
    }

    /// false, если координатор уже остановлен
    fn send(&self, cmd: Command) -> bool {
        match self.commands.send(cmd) {
            Ok(()) => true,
            Err(e) => {
                debug!("Coordinator is gone, {:?} dropped", e.0);
                false
            }
        }
    }

    pub fn skip(&self) -> bool {
        self.send(Command::Skip)
    }

    pub fn disconnect(&self) -> bool {
        self.send(Command::Disconnect)
    }

    pub fn toggle_audio(&self) -> bool {
        self.send(Command::ToggleAudio)
    }

    pub fn toggle_video(&self) -> bool {
        self.send(Command::ToggleVideo)
    }

    pub fn send_chat_message(&self, text: impl Into<String>) -> bool {
        self.send(Command::SendChat(text.into()))
    }

    pub fn report(&self, reason: impl Into<String>) -> bool {
        self.send(Command::Report(reason.into()))
    }

    /// Текущий снимок состояния
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.view.borrow().state
    }

    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    /// Ждёт снимок, удовлетворяющий условию. `None`, если координатор завершился раньше.
    pub async fn wait_for(&self, mut pred: impl FnMut(&SessionView) -> bool) -> Option<SessionView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(|v| pred(v)).await.ok()?;
        Some(view.clone())
    }
}
