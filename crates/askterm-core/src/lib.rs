pub mod config;
pub mod engine;
pub mod session;
pub mod state;
pub mod view;

// Re-export main types for convenience
pub use config::Config;
pub use engine::{Engine, EngineError, EngineEvent, EngineExit, Invocation, OutputMode, ProcessEngine};
pub use session::{ConversationSession, Resolution, Submission};
pub use state::{ChatMessage, ChatRole, Transcript};
pub use view::{Key, Menu, MenuChoice, Route, View, ViewController};
