//! Subcommands of the `strand` binary

mod list;
mod replay;
mod show;

pub use list::list_conversations;
pub use replay::{ReplayOptions, replay};
pub use show::{ShowOptions, show};
