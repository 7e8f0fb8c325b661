//! 核心模块：配置、状态、错误、后台任务与更新分发

pub mod config;
pub mod error;
pub mod state;
pub mod tasks;
pub mod update_router;

pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
pub use update_router::{UpdateChannels, UpdateRouter};
