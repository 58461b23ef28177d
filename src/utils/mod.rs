pub mod channels;

pub use channels::{ui_channel, UiReceiver, UiSender};
