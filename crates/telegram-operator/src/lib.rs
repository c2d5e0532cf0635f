mod messenger;
mod updates;

pub use messenger::TelegramMessenger;
pub use updates::run_update_loop;
