// Recurring rule scheduling
pub mod matcher;
pub mod ticker;
pub mod webhook;

pub use matcher::ScheduleMatcher;
pub use ticker::ScheduleTicker;
pub use webhook::HttpWebhookSender;
