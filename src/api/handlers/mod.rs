mod admin;
mod events;
mod files;
mod widget;

pub use admin::health;
pub use events::event_stream;
pub use files::{download_file, list_files, profile, upload_files};
pub use widget::widget_js;
