mod serve;

pub use serve::{ServeArgs, cmd_serve};
