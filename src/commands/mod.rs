pub mod handle;

pub use handle::SessionHandle;

/// Действия пользователя, которые UI передаёт координатору
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// уйти от текущего собеседника и искать следующего
    Skip,
    /// полностью отключиться
    Disconnect,
    ToggleAudio,
    ToggleVideo,
    SendChat(String),
    /// пожаловаться на текущего собеседника
    Report(String),
}
