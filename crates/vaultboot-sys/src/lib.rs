pub mod block;
pub mod command;
pub mod menu;
pub mod pool;

mod parse;

pub use block::SystemBlockProvider;
pub use command::{ToolOutput, ToolRunner};
pub use menu::DialogMenu;
pub use pool::SystemPoolProvider;
